use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;

use crate::views::{View, ViewContext};

use super::error::{FsError, FsResult};

/// Builds the view serving a matched route
pub type ViewFactory =
    Box<dyn Fn(&RouteMatch, &ViewContext) -> FsResult<Arc<dyn View>> + Send + Sync>;

/// Result of matching a path against a route pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// The text the pattern consumed, e.g. `/current`
    pub prefix: String,
    /// Everything after the prefix, always starting with `/`
    pub relative: String,
    /// Named capture groups
    pub groups: HashMap<String, String>,
}

impl RouteMatch {
    pub fn group(&self, name: &str) -> Option<&str> {
        self.groups.get(name).map(String::as_str)
    }

    /// Named group that the route pattern guarantees is present
    pub fn require(&self, name: &str) -> FsResult<&str> {
        self.group(name)
            .ok_or_else(|| FsError::NotFound(format!("{}: missing {}", self.prefix, name)))
    }

    /// Relative path as handed to views: no leading slash, empty at the view root
    pub fn view_path(&self) -> PathBuf {
        PathBuf::from(self.relative.trim_start_matches('/'))
    }
}

pub struct Route {
    pattern: Regex,
    factory: ViewFactory,
}

impl Route {
    /// Compile a route; the pattern is anchored at the start of the path
    pub fn new<F>(pattern: &str, factory: F) -> FsResult<Self>
    where
        F: Fn(&RouteMatch, &ViewContext) -> FsResult<Arc<dyn View>> + Send + Sync + 'static,
    {
        let anchored = format!("^(?:{})", pattern.trim_start_matches('^'));
        let pattern = Regex::new(&anchored).map_err(|e| FsError::InvalidRoute {
            pattern: pattern.to_string(),
            detail: e.to_string(),
        })?;
        Ok(Self {
            pattern,
            factory: Box::new(factory),
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Match `path` against this route
    ///
    /// The match must end on a path component boundary: `/history` matches
    /// `/history` and `/history/x` but not `/historyx`.
    pub fn matches(&self, path: &str) -> Option<RouteMatch> {
        let captures = self.pattern.captures(path)?;
        let whole = captures.get(0)?;
        let prefix = whole.as_str();
        let remainder = &path[whole.end()..];
        if !(remainder.is_empty() || remainder.starts_with('/') || prefix.ends_with('/')) {
            return None;
        }

        let groups = self
            .pattern
            .capture_names()
            .flatten()
            .filter_map(|name| {
                captures
                    .name(name)
                    .map(|m| (name.to_string(), m.as_str().to_string()))
            })
            .collect();

        let relative = if remainder.starts_with('/') {
            remainder.to_string()
        } else {
            format!("/{}", remainder)
        };

        Some(RouteMatch {
            prefix: prefix.to_string(),
            relative,
            groups,
        })
    }

    pub(crate) fn build(&self, matched: &RouteMatch, ctx: &ViewContext) -> FsResult<Arc<dyn View>> {
        (self.factory)(matched, ctx)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}
