use std::future::Future;

use tokio::sync::watch;

/// One-shot shutdown signal shared between a component and its background tasks.
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx,
        }
    }

    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    /// Resolves once `shutdown` has been called (immediately if it already was).
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            let _ = rx.wait_for(|terminated| *terminated).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_wait_resolves_after_shutdown() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.wait();
        assert!(tokio::time::timeout(Duration::from_millis(20), shutdown.wait()).await.is_err());
        shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap();
        // late waiters resolve immediately
        tokio::time::timeout(Duration::from_secs(1), shutdown.wait()).await.unwrap();
    }
}
