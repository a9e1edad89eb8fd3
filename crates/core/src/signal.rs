use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Out-of-band "user seeked" flag. Any number of producers may raise it; the loop
/// reads and clears it once per tick.
#[derive(Debug, Clone, Default)]
pub struct SeekSignal {
    raised: Arc<AtomicBool>,
}

impl SeekSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.raised.store(true, Ordering::Release);
    }

    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::AcqRel)
    }
}
