use std::time::Duration;
use tokio::sync::watch;

/// "Network idle" predicate: at most `max_inflight` requests outstanding,
/// continuously, for `quiet_window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleCondition {
    pub max_inflight: usize,
    pub quiet_window: Duration,
}

impl Default for SettleCondition {
    fn default() -> Self {
        Self {
            max_inflight: 2,
            quiet_window: Duration::from_millis(500),
        }
    }
}

impl SettleCondition {
    /// Resolves once the in-flight count has stayed at or under the
    /// threshold for a whole quiet window. Never times out on its own;
    /// callers bound it.
    pub async fn wait(&self, mut in_flight: watch::Receiver<usize>) {
        loop {
            if *in_flight.borrow_and_update() > self.max_inflight {
                if in_flight.changed().await.is_err() {
                    return;
                }
                continue;
            }

            let window = tokio::time::sleep(self.quiet_window);
            tokio::pin!(window);
            loop {
                tokio::select! {
                    _ = &mut window => return,
                    changed = in_flight.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        if *in_flight.borrow_and_update() > self.max_inflight {
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn condition(max_inflight: usize, window_ms: u64) -> SettleCondition {
        SettleCondition {
            max_inflight,
            quiet_window: Duration::from_millis(window_ms),
        }
    }

    #[tokio::test]
    async fn settles_after_one_quiet_window_when_already_idle() {
        let (_tx, rx) = watch::channel(0usize);
        let started = Instant::now();
        condition(2, 30).wait(rx).await;
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn busy_network_restarts_the_window() {
        let (tx, rx) = watch::channel(5usize);
        let started = Instant::now();
        let waiter = tokio::spawn(async move { condition(2, 40).wait(rx).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send_replace(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send_replace(4);
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send_replace(0);

        waiter.await.unwrap();
        // 30 + 20 + 20 ms of activity, then a full 40 ms quiet window.
        assert!(started.elapsed() >= Duration::from_millis(110));
    }

    #[tokio::test]
    async fn counts_at_threshold_do_not_reset_the_window() {
        let (tx, rx) = watch::channel(2usize);
        let started = Instant::now();
        let waiter = tokio::spawn(async move { condition(2, 50).wait(rx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send_replace(1);
        waiter.await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn returns_when_the_publisher_goes_away() {
        let (tx, rx) = watch::channel(10usize);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), condition(0, 10).wait(rx))
            .await
            .expect("wait should end once the counter is gone");
    }
}
