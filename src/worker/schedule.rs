use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Cooperative stop signal shared by every loop.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested. A dropped sender never triggers.
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Runs `tick` immediately and then every `period` until shutdown. A tick in
/// progress is allowed to finish; ticks observe the signal themselves.
pub async fn run_every<F, Fut>(name: &'static str, period: Duration, mut shutdown: Shutdown, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    info!(loop_name = name, period_secs = period.as_secs(), "Starting loop");
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            _ = ticker.tick() => {}
        }
        if shutdown.is_triggered() {
            break;
        }
        tick().await;
    }
    info!(loop_name = name, "Loop stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_immediately_then_on_period() {
        let (tx, shutdown) = Shutdown::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let handle = tokio::spawn(run_every("test", Duration::from_secs(60), shutdown, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn signal_wakes_waiters() {
        let (tx, mut shutdown) = Shutdown::new();
        let mut waiting = task::spawn(shutdown.triggered());
        assert_pending!(waiting.poll());
        tx.send(true).unwrap();
        assert!(waiting.is_woken());
        assert_ready!(waiting.poll());
    }

    #[test]
    fn dropped_sender_never_triggers() {
        let (tx, mut shutdown) = Shutdown::new();
        drop(tx);
        {
            let mut waiting = task::spawn(shutdown.triggered());
            assert_pending!(waiting.poll());
        }
        assert!(!shutdown.is_triggered());
    }
}
