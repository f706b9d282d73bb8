use std::future::Future;
use std::time::Duration;

use serde::Serialize;

pub const DEFAULT_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Outcome<T> {
    Fulfilled(T),
    Rejected(String),
}

impl<T> Outcome<T> {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Outcome::Fulfilled(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Fulfilled(value) => Some(value),
            Outcome::Rejected(_) => None,
        }
    }
}

/// Progress payload handed to the callback after each item.
#[derive(Debug, Clone, Copy)]
pub enum Progress<'a, T> {
    Fulfilled(&'a T),
    Rejected(&'a str),
}

/// Runs `op` for every item strictly in order, one at a time, sleeping
/// `delay` between completions (not after the last one). A failing item is
/// recorded as rejected and the batch carries on.
pub async fn run_sequential<I, T, F, Fut>(
    items: Vec<I>,
    delay: Duration,
    mut op: F,
    mut on_progress: Option<&mut (dyn FnMut(usize, bool, Progress<'_, T>) + Send)>,
) -> Vec<Outcome<T>>
where
    F: FnMut(I) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let total = items.len();
    let mut outcomes = Vec::with_capacity(total);

    for (index, item) in items.into_iter().enumerate() {
        let outcome = match op(item).await {
            Ok(value) => Outcome::Fulfilled(value),
            Err(err) => {
                tracing::debug!(index, error = %format!("{err:#}"), "sequential item failed");
                Outcome::Rejected(format!("{err:#}"))
            }
        };

        if let Some(callback) = on_progress.as_deref_mut() {
            match &outcome {
                Outcome::Fulfilled(value) => callback(index, true, Progress::Fulfilled(value)),
                Outcome::Rejected(reason) => callback(index, false, Progress::Rejected(reason)),
            }
        }
        outcomes.push(outcome);

        if index + 1 < total && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn every_item_runs_in_order_and_failures_do_not_stop_the_batch() {
        let delay = Duration::from_millis(1000);
        let started = tokio::time::Instant::now();
        let mut seen = Vec::new();
        let mut progress = |index: usize, ok: bool, _payload: Progress<'_, u32>| {
            seen.push((index, ok));
        };

        let outcomes = run_sequential(
            vec![1u32, 2, 3, 4, 5],
            delay,
            |n| async move {
                if n == 3 {
                    anyhow::bail!("item {n} failed");
                }
                Ok(n * 10)
            },
            Some(&mut progress),
        )
        .await;

        assert_eq!(
            outcomes,
            vec![
                Outcome::Fulfilled(10),
                Outcome::Fulfilled(20),
                Outcome::Rejected("item 3 failed".to_owned()),
                Outcome::Fulfilled(40),
                Outcome::Fulfilled(50),
            ]
        );
        assert_eq!(
            seen,
            vec![(0, true), (1, true), (2, false), (3, true), (4, true)]
        );
        assert_eq!(started.elapsed(), delay * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn single_item_does_not_wait() {
        let started = tokio::time::Instant::now();
        let outcomes = run_sequential(
            vec!["only"],
            DEFAULT_DELAY,
            |s| async move { Ok(s.len()) },
            None,
        )
        .await;
        assert_eq!(outcomes, vec![Outcome::Fulfilled(4)]);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn operations_never_overlap() {
        let in_flight = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let max_seen = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let outcomes = run_sequential(
            vec![1, 2, 3],
            Duration::from_millis(10),
            |_| {
                let in_flight = in_flight.clone();
                let max_seen = max_seen.clone();
                async move {
                    use std::sync::atomic::Ordering;
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            None,
        )
        .await;

        assert!(outcomes.iter().all(Outcome::is_fulfilled));
        assert_eq!(max_seen.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
