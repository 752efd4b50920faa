use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A named binary flag that threads can wait on
#[derive(Debug)]
pub struct Signal {
    name: &'static str,
    flag: Mutex<bool>,
    changed: Condvar,
}

impl Signal {
    pub fn new(name: &'static str, initial: bool) -> Self {
        Self {
            name,
            flag: Mutex::new(initial),
            changed: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn set(&self) {
        let mut flag = self.flag.lock();
        if !*flag {
            tracing::trace!(signal = self.name, "set");
        }
        *flag = true;
        self.changed.notify_all();
    }

    pub fn clear(&self) {
        let mut flag = self.flag.lock();
        if *flag {
            tracing::trace!(signal = self.name, "cleared");
        }
        *flag = false;
        self.changed.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.flag.lock()
    }

    /// Block until the flag is set
    pub fn wait(&self) {
        let mut flag = self.flag.lock();
        while !*flag {
            self.changed.wait(&mut flag);
        }
    }

    /// Block until the flag is set or `timeout` elapses; returns the flag
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flag = self.flag.lock();
        while !*flag {
            if self.changed.wait_until(&mut flag, deadline).timed_out() {
                break;
            }
        }
        *flag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_set_and_clear() {
        let signal = Signal::new("test", false);
        assert!(!signal.is_set());
        signal.set();
        assert!(signal.is_set());
        signal.clear();
        assert!(!signal.is_set());
    }

    #[test]
    fn test_wait_timeout_expires() {
        let signal = Signal::new("test", false);
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_wait_wakes_on_set() {
        let signal = Arc::new(Signal::new("test", false));
        let waiter = {
            let signal = signal.clone();
            std::thread::spawn(move || signal.wait_timeout(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        signal.set();
        assert!(waiter.join().unwrap());
    }
}
