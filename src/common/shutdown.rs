//! Cooperative shutdown signal shared between background tasks.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::Notify;

/// One-shot, clonable termination flag.
///
/// Once `shutdown` is called every current and future `wait` resolves.
#[derive(Debug, Default)]
pub struct Shutdown {
    terminated: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals termination to all waiters.
    pub fn shutdown(&self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Resolves once `shutdown` has been called.
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let terminated = self.terminated.clone();
        let notify = self.notify.clone();
        async move {
            loop {
                let notified = notify.notified();
                if terminated.load(Ordering::SeqCst) {
                    return;
                }
                notified.await;
            }
        }
    }
}
