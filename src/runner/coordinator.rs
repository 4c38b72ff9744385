use std::sync::atomic::{AtomicBool, Ordering};

/// Shared shutdown flag for the worker pool and everything it spawned.
/// Workers abandon their task at the next suspension point once shutdown is
/// signalled; executors terminate their child processes.
#[derive(Debug, Default)]
pub struct Coordinator {
    should_stop: AtomicBool,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal_shutdown(&self) {
        self.should_stop.store(true, Ordering::SeqCst);
    }

    pub fn should_shutdown(&self) -> bool {
        self.should_stop.load(Ordering::SeqCst)
    }

    pub fn should_run(&self) -> bool {
        !self.should_shutdown()
    }
}
