//! Paginated history fetching
//!
//! Builds an ordered, duplicate-free list of chain items from a paged source.
//! Every request goes through [`retry_with_backoff`]; what happens once retries
//! are exhausted is decided by the caller's [`FailurePolicy`].

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{FetchError, SourceError};

/// Anything listed by a paged source
pub trait ChainItem {
    /// Stable composite identity (tx hash plus log index or token id)
    fn key(&self) -> String;
    fn block(&self) -> u64;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListRequest {
    pub start_block: u64,
    pub end_block: u64,
    pub page: usize,
    pub offset: usize,
}

#[derive(Debug)]
pub struct ListPage<T> {
    pub items: Vec<T>,
    /// The source said explicitly that nothing follows this page
    pub end_of_results: bool,
}

/// A paged listing endpoint, sorted by block ascending
pub trait ListSource {
    type Item: ChainItem + Send;

    fn fetch_page(
        &self,
        req: &ListRequest,
    ) -> impl Future<Output = Result<ListPage<Self::Item>, SourceError>> + Send;
}

/// What a fetch does once a request has exhausted its retries
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailurePolicy {
    /// Fail the whole fetch
    Abort,
    /// Return what was collected, marked incomplete
    Partial,
}

#[derive(Debug)]
pub struct FetchOutcome<T> {
    pub items: Vec<T>,
    pub complete: bool,
    pub requests: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Base delay after the upstream reported a rate limit
    pub rate_limit_delay: Duration,
}

impl RetryPolicy {
    /// Exponential backoff for the given zero-based attempt
    pub fn delay_for(&self, attempt: u32, err: &SourceError) -> Duration {
        let base = if err.is_rate_limit() {
            self.rate_limit_delay
        } else {
            self.base_delay
        };
        base.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt, &e);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Parameters shared by the paginating strategies
#[derive(Debug, Clone)]
pub struct Pagination {
    pub start_block: u64,
    pub end_block: u64,
    pub offset: usize,
    /// Largest `page * offset` the source accepts
    pub page_ceiling: usize,
    /// Pause between consecutive pages
    pub delay: Duration,
    pub retry: RetryPolicy,
    pub policy: FailurePolicy,
}

/// Accumulates items across pages, dropping repeats by key
struct Collector<T> {
    seen: HashSet<String>,
    items: Vec<T>,
    requests: usize,
}

impl<T: ChainItem> Collector<T> {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            items: Vec::new(),
            requests: 0,
        }
    }

    fn absorb(&mut self, batch: Vec<T>) -> usize {
        let mut added = 0;
        for item in batch {
            if self.seen.insert(item.key()) {
                self.items.push(item);
                added += 1;
            }
        }
        added
    }

    fn finish(self, complete: bool) -> FetchOutcome<T> {
        FetchOutcome {
            items: self.items,
            complete,
            requests: self.requests,
        }
    }

    fn fail(
        self,
        policy: FailurePolicy,
        block: u64,
        page: usize,
        source: SourceError,
    ) -> Result<FetchOutcome<T>, FetchError> {
        match policy {
            FailurePolicy::Abort => Err(FetchError::Aborted {
                block,
                page,
                source,
            }),
            FailurePolicy::Partial => {
                warn!(
                    block,
                    page,
                    collected = self.items.len(),
                    error = %source,
                    "giving up on remaining pages, keeping partial results"
                );
                Ok(self.finish(false))
            }
        }
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        sleep(delay).await;
    }
}

/// Page-number pagination. Stops on a short page or an explicit end signal.
/// When the next page would pass the source's ceiling, continues with
/// block-range pagination from the last item's block.
pub async fn paginate_pages<S: ListSource>(
    source: &S,
    params: &Pagination,
) -> Result<FetchOutcome<S::Item>, FetchError> {
    let mut collector = Collector::new();
    let mut page = 1;

    loop {
        if page * params.offset > params.page_ceiling {
            let from = collector
                .items
                .last()
                .map(ChainItem::block)
                .unwrap_or(params.start_block);
            info!(
                page,
                from_block = from,
                "page ceiling reached, switching to block-range pagination"
            );
            return block_loop(source, params, collector, from).await;
        }

        let req = ListRequest {
            start_block: params.start_block,
            end_block: params.end_block,
            page,
            offset: params.offset,
        };
        collector.requests += 1;

        match retry_with_backoff(&params.retry, || source.fetch_page(&req)).await {
            Ok(result) => {
                let count = result.items.len();
                let added = collector.absorb(result.items);
                debug!(page, count, added, total = collector.items.len(), "fetched page");

                if result.end_of_results || count < params.offset {
                    return Ok(collector.finish(true));
                }
                page += 1;
                pause(params.delay).await;
            }
            Err(e) => return collector.fail(params.policy, params.start_block, page, e),
        }
    }
}

/// Block-range pagination: always page 1, moving the lower bound to the last
/// block seen. Overlap at the boundary block is removed by key.
pub async fn paginate_blocks<S: ListSource>(
    source: &S,
    params: &Pagination,
) -> Result<FetchOutcome<S::Item>, FetchError> {
    block_loop(source, params, Collector::new(), params.start_block).await
}

async fn block_loop<S: ListSource>(
    source: &S,
    params: &Pagination,
    mut collector: Collector<S::Item>,
    mut start: u64,
) -> Result<FetchOutcome<S::Item>, FetchError> {
    loop {
        if start > params.end_block {
            return Ok(collector.finish(true));
        }

        let req = ListRequest {
            start_block: start,
            end_block: params.end_block,
            page: 1,
            offset: params.offset,
        };
        collector.requests += 1;

        match retry_with_backoff(&params.retry, || source.fetch_page(&req)).await {
            Ok(result) => {
                let count = result.items.len();
                let last_block = result.items.last().map(ChainItem::block);
                let added = collector.absorb(result.items);
                info!(
                    block = start,
                    count,
                    added,
                    total = collector.items.len(),
                    "fetched block range"
                );

                if result.end_of_results || count < params.offset {
                    return Ok(collector.finish(true));
                }

                match last_block {
                    Some(last) if last > start => start = last,
                    _ => {
                        // More than a full page inside one block: the rest of it is skipped
                        warn!(
                            block = start,
                            offset = params.offset,
                            "page filled by a single block, advancing past it"
                        );
                        start += 1;
                    }
                }
                pause(params.delay).await;
            }
            Err(e) => return collector.fail(params.policy, start, 1, e),
        }
    }
}

/// Walk `[from, to]` in fixed, disjoint block windows
pub async fn scan_windows<T, F, Fut>(
    from: u64,
    to: u64,
    window: u64,
    retry: &RetryPolicy,
    policy: FailurePolicy,
    mut fetch: F,
) -> Result<FetchOutcome<T>, FetchError>
where
    F: FnMut(u64, u64) -> Fut,
    Fut: Future<Output = Result<Vec<T>, SourceError>>,
{
    let mut items = Vec::new();
    let mut requests = 0;
    let mut lo = from;
    let window = window.max(1);

    while lo <= to {
        let hi = lo.saturating_add(window - 1).min(to);
        requests += 1;

        match retry_with_backoff(retry, || fetch(lo, hi)).await {
            Ok(batch) => {
                if !batch.is_empty() {
                    info!(
                        from_block = lo,
                        to_block = hi,
                        count = batch.len(),
                        total = items.len() + batch.len(),
                        "window scanned"
                    );
                }
                items.extend(batch);
            }
            Err(e) => match policy {
                FailurePolicy::Abort => {
                    return Err(FetchError::Aborted {
                        block: lo,
                        page: 0,
                        source: e,
                    });
                }
                FailurePolicy::Partial => {
                    warn!(from_block = lo, error = %e, "window scan stopped early");
                    return Ok(FetchOutcome {
                        items,
                        complete: false,
                        requests,
                    });
                }
            },
        }

        if hi == u64::MAX {
            break;
        }
        lo = hi + 1;
    }

    Ok(FetchOutcome {
        items,
        complete: true,
        requests,
    })
}
