use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::{Backend, BuildError, CancelToken, Grid};

/// Handle to a rebuild running in the background.
///
/// Dropping the handle doesn't stop the rebuild; use [`Self::cancel()`] for
/// that.
pub struct RebuildTask<B>
where
    B: Backend,
{
    handle: JoinHandle<Result<Arc<Grid<B>>, BuildError>>,
    cancel: CancelToken,
}

impl<B> RebuildTask<B>
where
    B: Backend,
{
    pub(crate) fn new(
        handle: JoinHandle<Result<Arc<Grid<B>>, BuildError>>,
        cancel: CancelToken,
    ) -> Self {
        Self { handle, cancel }
    }

    /// Asks the rebuild to stop at the next stage boundary; a cancelled
    /// rebuild doesn't publish anything.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Blocks until the rebuild is done and returns the published grid.
    pub fn wait(self) -> Result<Arc<Grid<B>>, BuildError> {
        match self.handle.join() {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

/// Marks a rebuild as being in flight; released on drop.
pub(crate) struct RebuildGuard {
    flag: Arc<AtomicBool>,
}

impl RebuildGuard {
    pub fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, BuildError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BuildError::RebuildInProgress)?;

        Ok(Self {
            flag: Arc::clone(flag),
        })
    }
}

impl Drop for RebuildGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = RebuildGuard::acquire(&flag).unwrap();

        assert!(matches!(
            RebuildGuard::acquire(&flag),
            Err(BuildError::RebuildInProgress)
        ));

        drop(guard);

        assert!(!flag.load(Ordering::Acquire));
        assert!(RebuildGuard::acquire(&flag).is_ok());
    }
}
