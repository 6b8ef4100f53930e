use std::future::Future;

use tokio::sync::Mutex;

/// Runs metadata mutations one at a time, in arrival order.
///
/// `tokio::sync::Mutex` queues waiters FIFO, and a guard is released on
/// return, error and unwind alike, so a failed mutation never blocks the ones
/// queued behind it.
#[derive(Debug, Default)]
pub struct WriteSerializer {
    turn: Mutex<()>,
}

impl WriteSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run_exclusive<F, Fut, T>(&self, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _turn = self.turn.lock().await;
        op().await
    }
}
