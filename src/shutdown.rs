//! Process shutdown signal shared by background tasks and the HTTP server.

use tokio::sync::watch;

/// Create the shutdown channel; send `true` to stop every receiver
pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolves once the flag is true or the sender is gone
pub async fn signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_resolves_waiters() {
        let (tx, mut rx) = channel();
        let waiter = tokio::spawn(async move { signalled(&mut rx).await });

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_shutdown() {
        let (tx, mut rx) = channel();
        drop(tx);
        signalled(&mut rx).await;
    }
}
