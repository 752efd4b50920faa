//! Write admission for filesystem calls that mutate the working tree

use std::time::Duration;

use super::CoordinationState;

/// How long a blocked writer sleeps between re-checks of the sync flags
const SYNC_WAIT_SLICE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("last fetch failed, mount is read-only")]
    FetchUnhealthy,
    #[error("last push failed, mount is read-only")]
    PushUnhealthy,
    #[error("mount is temporarily read-only")]
    ReadOnly,
    #[error("mount is shutting down")]
    ShuttingDown,
}

/// Proof that a writer has been admitted
///
/// Dropping the guard releases the writer slot, including when the write
/// itself fails or panics.
#[derive(Debug)]
pub struct WriterGuard<'a> {
    state: &'a CoordinationState,
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        self.state.active_writers.sub(1);
    }
}

impl CoordinationState {
    fn check_writable(&self) -> Result<(), AdmissionError> {
        if self.shutting_down.is_set() {
            return Err(AdmissionError::ShuttingDown);
        }
        if !self.fetch_successful.is_set() {
            return Err(AdmissionError::FetchUnhealthy);
        }
        if !self.push_successful.is_set() {
            return Err(AdmissionError::PushUnhealthy);
        }
        if self.read_only.is_set() {
            return Err(AdmissionError::ReadOnly);
        }
        Ok(())
    }

    /// Admit a writer, blocking while a sync cycle is in progress
    ///
    /// Fails up front, without touching `active_writers`, when remote health
    /// is in doubt or the mount is read-only.
    pub fn admit_write(&self) -> Result<WriterGuard<'_>, AdmissionError> {
        loop {
            self.check_writable()?;

            self.active_writers.add(1);
            if !self.syncing.is_set() {
                return Ok(WriterGuard { state: self });
            }
            self.active_writers.sub(1);

            tracing::debug!("write waiting for sync cycle to finish");
            self.sync_done.wait_timeout(SYNC_WAIT_SLICE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_admitted_writer_counts_until_dropped() {
        let state = CoordinationState::new();
        {
            let _guard = state.admit_write().unwrap();
            assert_eq!(state.active_writers.load(), 1);
        }
        assert_eq!(state.active_writers.load(), 0);
    }

    #[test]
    fn test_rejects_when_fetch_unhealthy() {
        let state = CoordinationState::new();
        state.fetch_successful.clear();

        let err = state.admit_write().unwrap_err();
        assert_eq!(err, AdmissionError::FetchUnhealthy);
        assert_eq!(state.active_writers.load(), 0);
    }

    #[test]
    fn test_rejects_when_push_unhealthy() {
        let state = CoordinationState::new();
        state.push_successful.clear();
        assert_eq!(
            state.admit_write().unwrap_err(),
            AdmissionError::PushUnhealthy
        );
    }

    #[test]
    fn test_rejects_when_read_only() {
        let state = CoordinationState::new();
        state.read_only.set();
        assert_eq!(state.admit_write().unwrap_err(), AdmissionError::ReadOnly);
    }

    #[test]
    fn test_guard_released_on_panic() {
        let state = Arc::new(CoordinationState::new());
        let worker = {
            let state = state.clone();
            std::thread::spawn(move || {
                let _guard = state.admit_write().unwrap();
                panic!("write failed");
            })
        };
        assert!(worker.join().is_err());
        assert_eq!(state.active_writers.load(), 0);
    }

    #[test]
    fn test_writer_blocks_while_syncing() {
        let state = Arc::new(CoordinationState::new());
        state.begin_sync();

        let writer = {
            let state = state.clone();
            std::thread::spawn(move || {
                let _guard = state.admit_write().unwrap();
                // the cycle must be over by the time we get in
                !state.syncing.is_set()
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!writer.is_finished());
        state.finish_sync();

        assert!(writer.join().unwrap());
        assert_eq!(state.active_writers.load(), 0);
    }
}
