//! Advertising watchdog.
//!
//! Every inbound invitation proves that advertising works, so the node calls
//! [`Watchdog::reset`] for each one, accepted or not. What "advertising looks
//! broken" means and what to do about it belongs to the owner of the node.

/// Reset hook the node invokes on every inbound invitation.
pub trait Watchdog: Send + Sync + 'static {
    fn reset(&self);
}

/// Watchdog that ignores resets.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWatchdog;

impl Watchdog for NoopWatchdog {
    fn reset(&self) {}
}

/// Signals on a channel whenever `interval` passes without a reset.
///
/// ```no_run
/// # async fn run(node: peerlink::Node) {
/// let (watchdog, mut expired) =
///     peerlink::IntervalWatchdog::spawn(std::time::Duration::from_secs(120));
/// # let _ = watchdog;
/// while expired.recv().await.is_some() {
///     let _ = node.restart().await;
/// }
/// # }
/// ```
#[derive(Debug)]
pub struct IntervalWatchdog {
    reset: std::sync::Arc<tokio::sync::Notify>,
    cancel: tokio_util::sync::CancellationToken,
}

impl IntervalWatchdog {
    /// Start the timer. Stops when the watchdog is dropped.
    pub fn spawn(interval: std::time::Duration) -> (Self, tokio::sync::mpsc::Receiver<()>) {
        let reset = std::sync::Arc::new(tokio::sync::Notify::new());
        let cancel = tokio_util::sync::CancellationToken::new();
        let (expired_tx, expired_rx) = tokio::sync::mpsc::channel(1);

        tokio::spawn({
            let reset = reset.clone();
            let cancel = cancel.clone();
            async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = reset.notified() => continue,
                        _ = tokio::time::sleep(interval) => {
                            tracing::warn!(?interval, "no invitation received, advertising may be broken");
                            // A pending signal is as good as a new one.
                            let _ = expired_tx.try_send(());
                        }
                    }
                }
            }
        });

        (Self { reset, cancel }, expired_rx)
    }
}

impl Watchdog for IntervalWatchdog {
    fn reset(&self) {
        self.reset.notify_one();
    }
}

impl Drop for IntervalWatchdog {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn fires_without_resets() {
        let (_watchdog, mut expired) = IntervalWatchdog::spawn(INTERVAL);
        tokio::time::sleep(INTERVAL + std::time::Duration::from_secs(1)).await;
        assert_eq!(expired.try_recv(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn resets_postpone_expiry() {
        let (watchdog, mut expired) = IntervalWatchdog::spawn(INTERVAL);

        for _ in 0..5 {
            tokio::time::sleep(INTERVAL / 2).await;
            watchdog.reset();
        }
        tokio::time::sleep(INTERVAL / 2).await;
        assert!(expired.try_recv().is_err());

        tokio::time::sleep(INTERVAL).await;
        assert_eq!(expired.try_recv(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_stops_the_timer() {
        let (watchdog, mut expired) = IntervalWatchdog::spawn(INTERVAL);
        drop(watchdog);
        assert_eq!(expired.recv().await, None);
    }

    #[test]
    fn noop_is_a_watchdog() {
        let watchdog: std::sync::Arc<dyn Watchdog> = std::sync::Arc::new(NoopWatchdog);
        watchdog.reset();
    }
}
