use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

type Action<T> = dyn Fn(T) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync;

/// Coalesces rapid calls: each `call` cancels the pending one and reschedules
/// the action with the newest value after `quiet` has elapsed.
pub struct Debouncer<T> {
    quiet: Duration,
    action: Arc<Action<T>>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F, Fut>(quiet: Duration, action: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            quiet,
            action: Arc::new(move |value| -> Pin<Box<dyn Future<Output = ()> + Send>> {
                Box::pin(action(value))
            }),
            pending: Mutex::new(None),
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn call(&self, value: T) {
        let action = Arc::clone(&self.action);
        let quiet = self.quiet;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            // Once the quiet period is over the action runs detached, so a
            // later call cannot interrupt a write halfway.
            tokio::spawn(action(value));
        });

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = pending.replace(handle) {
            previous.abort();
        }
    }

    pub fn cancel(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = pending.take() {
            previous.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = pending.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rapid_calls_produce_one_action_with_last_value() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&writes);
        let debouncer = Debouncer::new(Duration::from_secs(1), move |value: u32| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap_or_else(|e| e.into_inner()).push(value);
            }
        });

        for value in 1..=10 {
            debouncer.call(value);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(debouncer.is_pending());
        assert!(writes.lock().unwrap_or_else(|e| e.into_inner()).is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*writes.lock().unwrap_or_else(|e| e.into_inner()), vec![10]);
    }

    #[tokio::test(start_paused = true)]
    async fn calls_separated_by_quiet_period_each_fire() {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let debouncer = Debouncer::new(Duration::from_millis(100), move |_: ()| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });

        debouncer.call(());
        tokio::time::sleep(Duration::from_millis(300)).await;
        debouncer.call(());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_pending_call() {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let debouncer = Debouncer::new(Duration::from_millis(100), move |_: ()| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });

        debouncer.call(());
        debouncer.cancel();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
