use common::coord::AdmissionError;
use common::vcs::VcsError;

pub type FsResult<T> = Result<T, FsError>;

/// Failure of a filesystem call, mappable to an errno for the driver
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    #[error("read-only file system")]
    ReadOnly,

    #[error("file too large")]
    TooLarge,

    #[error("permission denied")]
    PermissionDenied,

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("no route for {0}")]
    NoRoute(String),

    #[error("invalid route pattern {pattern}: {detail}")]
    InvalidRoute { pattern: String, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Vcs(#[from] VcsError),
}

impl FsError {
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::NotSupported(_) => libc::ENOTSUP,
            FsError::ReadOnly => libc::EROFS,
            FsError::TooLarge => libc::EFBIG,
            FsError::PermissionDenied => libc::EACCES,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::NotEmpty(_) => libc::ENOTEMPTY,
            FsError::NoRoute(_) => libc::EIO,
            FsError::InvalidRoute { .. } => libc::EINVAL,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            FsError::Vcs(VcsError::NotFound(_)) => libc::ENOENT,
            FsError::Vcs(_) => libc::EIO,
        }
    }
}

impl From<AdmissionError> for FsError {
    fn from(e: AdmissionError) -> Self {
        tracing::debug!(reason = %e, "write refused");
        FsError::ReadOnly
    }
}
