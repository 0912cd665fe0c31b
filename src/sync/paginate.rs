//! Pagination orchestrator.
//!
//! Drives repeated fetches against a rate-limited source, either over consecutive time windows
//! (`paginate`) or over a fixed index set (`paginate_exact`). Keys are issued in batches of at
//! most `concurrency`; a batch settles completely before the next one starts, and consecutive
//! batch starts are at least `cooldown` apart.
//!
//! A window-local failure (see [`SyncError::is_window_local`]) drops that window, records it in
//! the context and pagination continues. Any other error, a rate limit in particular, aborts the
//! whole pagination. Cancellation is checked before every fetch is scheduled; fetches already in
//! flight run to completion and everything settled so far is returned flagged as cancelled.

use crate::config::PaginationOptions;
use crate::source::Window;
use crate::sync::context::SyncContext;
use crate::sync::progress_tracker::{contiguous_prefix, find_gaps};
use crate::sync::types::SyncError;

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info};

/// A settled fetch. `rank` is the key's position in issue order.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<K, T> {
    pub rank: usize,
    pub key: K,
    pub value: T,
}

/// Outcome of a pagination: successful pages in completion order plus bookkeeping.
#[derive(Debug)]
pub struct Paginated<K, T> {
    pub pages: Vec<Page<K, T>>,
    /// Every key, in issue order.
    pub keys: Vec<K>,
    pub failed: usize,
    pub cancelled: bool,
    settled: BTreeSet<usize>,
}

impl<K, T> Paginated<K, T> {
    /// Last key of the longest prefix of keys that settled, fetched or dropped.
    pub fn settled_through(&self) -> Option<&K> {
        contiguous_prefix(&self.settled)
            .checked_sub(1)
            .and_then(|last| self.keys.get(last))
    }

    pub fn is_complete(&self) -> bool {
        self.settled.len() == self.keys.len()
    }

    /// Pages ordered by rank.
    pub fn into_ranked(mut self) -> Vec<Page<K, T>> {
        self.pages.sort_by_key(|page| page.rank);
        self.pages
    }
}

impl<T> Paginated<Window, T> {
    /// First timestamp not covered by the contiguous settled windows.
    pub fn resume_at(&self, since: i64) -> i64 {
        self.settled_through()
            .map(|window| window.end + 1)
            .unwrap_or(since)
    }
}

/// Inclusive windows `[start, min(start + window - 1, until)]` covering `since..=until`.
pub fn windows(since: i64, until: i64, window_ms: i64) -> Vec<Window> {
    let mut windows = Vec::new();
    if window_ms < 1 {
        return windows;
    }
    let mut start = since;
    while start <= until {
        let end = start.saturating_add(window_ms - 1).min(until);
        windows.push(Window::new(start, end));
        match start.checked_add(window_ms) {
            Some(next) => start = next,
            None => break,
        }
    }
    windows
}

/// Fetch every window between `since` and `until`.
pub async fn paginate<T, F, Fut>(
    since: i64,
    until: i64,
    options: &PaginationOptions,
    ctx: &SyncContext,
    fetch: F,
) -> Result<Paginated<Window, T>, SyncError>
where
    F: Fn(Window) -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    options.validate()?;
    let keys = windows(since, until, options.window_ms);
    debug!(
        "Paginating {} windows of {}ms from {} to {}",
        keys.len(),
        options.window_ms,
        since,
        until
    );
    run(keys, options, ctx, fetch).await
}

/// Fetch indices `0..count`. The body may itself call [`paginate`].
pub async fn paginate_exact<T, F, Fut>(
    count: usize,
    options: &PaginationOptions,
    ctx: &SyncContext,
    fetch: F,
) -> Result<Paginated<usize, T>, SyncError>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    options.validate()?;
    run((0..count).collect(), options, ctx, fetch).await
}

async fn run<K, T, F, Fut>(
    keys: Vec<K>,
    options: &PaginationOptions,
    ctx: &SyncContext,
    fetch: F,
) -> Result<Paginated<K, T>, SyncError>
where
    K: Clone + fmt::Display,
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let total = keys.len();
    ctx.tracker().record_scheduled(total);

    let mut result = Paginated {
        pages: Vec::with_capacity(total),
        keys: keys.clone(),
        failed: 0,
        cancelled: false,
        settled: BTreeSet::new(),
    };
    let ranked: Vec<(usize, K)> = keys.into_iter().enumerate().collect();
    let mut last_batch_start: Option<Instant> = None;

    for batch in ranked.chunks(options.concurrency) {
        if let Some(started) = last_batch_start {
            let cooldown = options.cooldown();
            let elapsed = started.elapsed();
            if elapsed < cooldown {
                tokio::select! {
                    _ = sleep(cooldown - elapsed) => {}
                    _ = ctx.cancellation_token().cancelled() => {}
                }
            }
        }

        let mut in_flight = FuturesUnordered::new();
        for (rank, key) in batch {
            if ctx.is_cancelled() {
                result.cancelled = true;
                break;
            }
            ctx.detail(&format!("Fetching {}", key));
            let fetching = fetch(key.clone());
            let (rank, key) = (*rank, key.clone());
            in_flight.push(async move { (rank, key, fetching.await) });
        }
        if !in_flight.is_empty() {
            last_batch_start = Some(Instant::now());
        }

        while let Some((rank, key, outcome)) = in_flight.next().await {
            match outcome {
                Ok(value) => {
                    result.settled.insert(rank);
                    ctx.tracker().record_completed();
                    result.pages.push(Page { rank, key, value });
                }
                Err(e) if e.is_window_local() => {
                    result.settled.insert(rank);
                    result.failed += 1;
                    ctx.report(None, &format!("Skipped {}: {}", key, e));
                    ctx.tracker().record_failure(key.to_string(), e.to_string());
                }
                Err(e) => {
                    error!("Aborting pagination at {}: {}", key, e);
                    return Err(e);
                }
            }
        }

        if total > 0 {
            let percent = result.settled.len() as f64 * 100.0 / total as f64;
            ctx.report(
                Some(percent),
                &format!("{}/{} fetched", result.settled.len(), total),
            );
        }
        ctx.tracker().log_progress(false);

        if result.cancelled {
            break;
        }
    }

    if result.cancelled {
        let gaps = find_gaps(&result.settled);
        info!(
            "Pagination cancelled after {} of {} fetches{}",
            result.settled.len(),
            total,
            if gaps.is_empty() {
                String::new()
            } else {
                format!(" ({} gaps)", gaps.len())
            }
        );
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FetchError;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn options(window_ms: i64, concurrency: usize, cooldown_ms: u64) -> PaginationOptions {
        PaginationOptions {
            window_ms,
            concurrency,
            cooldown_ms,
        }
    }

    #[test]
    fn windows_are_inclusive_and_clamped() {
        assert_eq!(
            windows(0, 25, 10),
            vec![Window::new(0, 9), Window::new(10, 19), Window::new(20, 25)]
        );
        assert_eq!(windows(5, 5, 10), vec![Window::new(5, 5)]);
        assert!(windows(10, 9, 10).is_empty());
        assert!(windows(0, 9, 0).is_empty());
    }

    #[tokio::test]
    async fn failed_window_is_dropped_and_pagination_continues() {
        let ctx = SyncContext::tracing();
        let result = paginate(0, 29, &options(10, 1, 0), &ctx, |window| async move {
            if window.start == 10 {
                Err(FetchError::from_status(500, None, None, "boom".into()).into())
            } else {
                Ok(window.start)
            }
        })
        .await
        .unwrap();

        let starts: Vec<i64> = result.pages.iter().map(|p| p.value).collect();
        assert_eq!(starts, vec![0, 20]);
        assert_eq!(result.failed, 1);
        assert!(result.is_complete());
        assert_eq!(ctx.tracker().take_failures().len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_aborts_everything() {
        let ctx = SyncContext::tracing();
        let calls = AtomicUsize::new(0);
        let err = paginate(0, 49, &options(10, 1, 0), &ctx, |window| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if window.start == 20 {
                    Err(FetchError::from_status(429, Some(60), Some(1200), String::new()).into())
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, SyncError::RateLimited(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_scheduling_and_keeps_settled_pages() {
        let ctx = SyncContext::tracing();
        let token = ctx.cancellation_token().clone();
        let result = paginate(0, 49, &options(10, 1, 0), &ctx, |window| {
            let token = token.clone();
            async move {
                if window.start == 10 {
                    token.cancel();
                }
                Ok(window)
            }
        })
        .await
        .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.pages.len(), 2);
        assert_eq!(result.settled_through(), Some(&Window::new(10, 19)));
        assert_eq!(result.resume_at(0), 20);
    }

    #[tokio::test]
    async fn cancelled_before_start_resumes_at_since() {
        let ctx = SyncContext::tracing();
        ctx.cancellation_token().cancel();
        let result = paginate(100, 199, &options(10, 2, 0), &ctx, |w| async move { Ok(w) })
            .await
            .unwrap();
        assert!(result.cancelled);
        assert!(result.pages.is_empty());
        assert_eq!(result.resume_at(100), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn batches_respect_concurrency_and_cooldown() {
        let ctx = SyncContext::tracing();
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let starts = Mutex::new(Vec::new());
        let origin = Instant::now();

        let result = paginate_exact(5, &options(1, 2, 1000), &ctx, |index| {
            let (in_flight, peak, starts) = (&in_flight, &peak, &starts);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                starts.lock().unwrap().push(origin.elapsed());
                sleep(Duration::from_millis(100)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(index)
            }
        })
        .await
        .unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        let starts = starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 5);
        // batches of [0,1], [2,3], [4]
        assert!(starts[2] >= Duration::from_millis(1000));
        assert!(starts[4] >= Duration::from_millis(2000));

        let ranks: Vec<usize> = result.into_ranked().iter().map(|p| p.value).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_during_cooldown_stops_waiting() {
        let ctx = SyncContext::tracing();
        let token = ctx.cancellation_token().clone();
        let calls = AtomicUsize::new(0);
        let origin = Instant::now();

        let result = paginate_exact(3, &options(1, 1, 60_000), &ctx, |index| {
            let (calls, token) = (&calls, token.clone());
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    sleep(Duration::from_secs(5)).await;
                    token.cancel();
                });
                Ok(index)
            }
        })
        .await
        .unwrap();

        assert!(result.cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.pages.len(), 1);
        let waited = origin.elapsed();
        assert!(waited >= Duration::from_secs(5));
        assert!(waited < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn exact_pagination_nests_windowed_pagination() {
        let ctx = SyncContext::tracing();
        let symbols = Arc::new(vec!["BTCUSDT", "ETHBTC"]);
        let result = paginate_exact(symbols.len(), &options(10, 2, 0), &ctx, |index| {
            let ctx = ctx.clone();
            let symbols = symbols.clone();
            async move {
                let inner = paginate(0, 29, &options(10, 2, 0), &ctx, |window| async move {
                    Ok(window.start)
                })
                .await?;
                Ok((symbols[index], inner.pages.len()))
            }
        })
        .await
        .unwrap();

        let mut counts: Vec<(&str, usize)> = result.pages.iter().map(|p| p.value).collect();
        counts.sort();
        assert_eq!(counts, vec![("BTCUSDT", 3), ("ETHBTC", 3)]);
        assert_eq!(ctx.tracker().get_stats().windows_completed, 8);
    }
}
