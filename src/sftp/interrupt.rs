use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation token polled by long-running operations. Cloning is cheap;
/// all clones observe the same flag, so a signal handler or another thread
/// can stop an in-progress transfer without any process-global state.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
