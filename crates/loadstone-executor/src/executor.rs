//! The bulk executor: concurrency governor, rate gate, and result
//! publisher.
//!
//! Every server round-trip (a write, or one page of a read) passes three
//! gates in order: the query permit (user-visible queries), the request
//! permit (outstanding driver requests), and the rate limiter. Results
//! flow out through bounded channels, so a slow consumer backpressures
//! dispatch instead of buffering unboundedly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use loadstone_types::driver::CqlSession;
use loadstone_types::result::{ReadResult, WriteResult};
use loadstone_types::statement::{BoundStatement, Executable};

use crate::limiter::RateLimiter;

/// Executor knobs. Any non-positive bound disables that gate.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// First failure cancels the upstream subscription when `true`;
    /// otherwise failures become failed results and the stream continues.
    pub fail_fast: bool,
    /// Upper bound on concurrent outstanding driver requests.
    pub max_in_flight_requests: i64,
    /// Upper bound on concurrent user-visible queries (a multi-page read
    /// counts once).
    pub max_in_flight_queries: i64,
    /// Token-bucket bound on requests per second.
    pub max_requests_per_second: i64,
    /// Prefetch the next page of a read while the current one drains.
    pub continuous_paging: bool,
    pub page_size: usize,
    /// Capacity of result channels; the downstream demand window.
    pub result_buffer: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            fail_fast: true,
            max_in_flight_requests: 1_000,
            max_in_flight_queries: 200,
            max_requests_per_second: -1,
            continuous_paging: false,
            page_size: 5_000,
            result_buffer: 1_024,
        }
    }
}

fn gate(bound: i64) -> Option<Arc<Semaphore>> {
    usize::try_from(bound)
        .ok()
        .filter(|n| *n > 0)
        .map(|n| Arc::new(Semaphore::new(n)))
}

struct Inner {
    session: Arc<dyn CqlSession>,
    fail_fast: bool,
    requests: Option<Arc<Semaphore>>,
    queries: Option<Arc<Semaphore>>,
    limiter: Option<RateLimiter>,
    continuous_paging: bool,
    page_size: usize,
    result_buffer: usize,
}

impl Inner {
    async fn query_permit(&self) -> Option<OwnedSemaphorePermit> {
        match &self.queries {
            Some(semaphore) => Some(
                Arc::clone(semaphore)
                    .acquire_owned()
                    .await
                    .expect("query gate never closes"),
            ),
            None => None,
        }
    }

    /// One request gate pass: permit plus rate token.
    async fn request_slot(&self) -> Option<OwnedSemaphorePermit> {
        let permit = match &self.requests {
            Some(semaphore) => Some(
                Arc::clone(semaphore)
                    .acquire_owned()
                    .await
                    .expect("request gate never closes"),
            ),
            None => None,
        };
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }
        permit
    }
}

/// Executes statement streams against the shared session. Cheap to clone;
/// clones share the same gates.
#[derive(Clone)]
pub struct BulkExecutor {
    inner: Arc<Inner>,
}

impl BulkExecutor {
    pub fn new(session: Arc<dyn CqlSession>, config: ExecutorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                fail_fast: config.fail_fast,
                requests: gate(config.max_in_flight_requests),
                queries: gate(config.max_in_flight_queries),
                limiter: usize::try_from(config.max_requests_per_second)
                    .ok()
                    .filter(|n| *n > 0)
                    .map(|n| RateLimiter::per_second(n as u64)),
                continuous_paging: config.continuous_paging,
                page_size: config.page_size.max(1),
                result_buffer: config.result_buffer.max(1),
            }),
        }
    }

    /// Executes one statement or batch, producing exactly one result.
    pub async fn write_one(&self, executable: Executable) -> WriteResult {
        let _query = self.inner.query_permit().await;
        let _request = self.inner.request_slot().await;
        match self.inner.session.execute_write(&executable).await {
            Ok(()) => WriteResult::success(executable),
            Err(err) => WriteResult::failure(executable, err),
        }
    }

    /// Fan-in write path: one result per input executable, ordering across
    /// statements unspecified.
    ///
    /// In fail-fast mode the first failure stops demand on `statements`;
    /// results already in flight (at most `max_in_flight_requests`) are
    /// still delivered before the output closes.
    pub fn write_stream(
        &self,
        mut statements: mpsc::Receiver<Executable>,
    ) -> mpsc::Receiver<WriteResult> {
        let (tx, rx) = mpsc::channel(self.inner.result_buffer);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let failed = Arc::new(AtomicBool::new(false));
            let mut tasks: JoinSet<()> = JoinSet::new();
            while let Some(executable) = statements.recv().await {
                if inner.fail_fast && failed.load(Ordering::Relaxed) {
                    break;
                }
                let query_permit = inner.query_permit().await;
                let request_permit = inner.request_slot().await;
                let session = Arc::clone(&inner.session);
                let tx = tx.clone();
                let failed = Arc::clone(&failed);
                tasks.spawn(async move {
                    let result = match session.execute_write(&executable).await {
                        Ok(()) => WriteResult::success(executable),
                        Err(err) => {
                            failed.store(true, Ordering::Relaxed);
                            WriteResult::failure(executable, err)
                        }
                    };
                    drop(request_permit);
                    drop(query_permit);
                    // A closed receiver means downstream cancelled; the
                    // result is silently discarded.
                    let _ = tx.send(result).await;
                });
                while tasks.try_join_next().is_some() {}
            }
            // Cancelling upstream demand: dropping the receiver signals
            // the producer to stop.
            drop(statements);
            while tasks.join_next().await.is_some() {}
            tracing::debug!("write stream drained");
        });
        rx
    }

    /// Executes one read statement, emitting zero or more row results.
    /// The query permit is held for the statement's whole page sequence.
    pub fn read_stream(&self, statement: BoundStatement) -> mpsc::Receiver<ReadResult> {
        let (tx, rx) = mpsc::channel(self.inner.result_buffer);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let permit = inner.query_permit().await;
            run_read(inner, Arc::new(statement), tx, permit).await;
        });
        rx
    }

    /// Fan-in read path: every statement contributes its rows to one
    /// output stream. In fail-fast mode the first failed statement stops
    /// further statements from starting.
    pub fn read_stream_many(
        &self,
        statements: Vec<BoundStatement>,
    ) -> mpsc::Receiver<ReadResult> {
        let (tx, rx) = mpsc::channel(self.inner.result_buffer);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let failed = Arc::new(AtomicBool::new(false));
            let mut tasks: JoinSet<()> = JoinSet::new();
            for statement in statements {
                if inner.fail_fast && failed.load(Ordering::Relaxed) {
                    break;
                }
                let permit = inner.query_permit().await;
                let inner = Arc::clone(&inner);
                let tx = tx.clone();
                let failed = Arc::clone(&failed);
                tasks.spawn(async move {
                    if !run_read(inner, Arc::new(statement), tx, permit).await {
                        failed.store(true, Ordering::Relaxed);
                    }
                });
                while tasks.try_join_next().is_some() {}
            }
            while tasks.join_next().await.is_some() {}
            tracing::debug!("read stream drained");
        });
        rx
    }
}

/// Drives one read statement's page sequence. Returns `false` when the
/// statement terminated with an error result.
async fn run_read(
    inner: Arc<Inner>,
    statement: Arc<BoundStatement>,
    tx: mpsc::Sender<ReadResult>,
    query_permit: Option<OwnedSemaphorePermit>,
) -> bool {
    let _query_permit = query_permit;
    if inner.continuous_paging {
        run_read_continuous(inner, statement, tx).await
    } else {
        run_read_sequential(inner, statement, tx).await
    }
}

async fn run_read_sequential(
    inner: Arc<Inner>,
    statement: Arc<BoundStatement>,
    tx: mpsc::Sender<ReadResult>,
) -> bool {
    let mut state = None;
    loop {
        let request_permit = inner.request_slot().await;
        let fetched = inner
            .session
            .fetch_page(&statement, state.take(), inner.page_size)
            .await;
        drop(request_permit);
        match fetched {
            Ok(page) => {
                for row in page.rows {
                    if tx
                        .send(ReadResult::row(Arc::clone(&statement), row))
                        .await
                        .is_err()
                    {
                        // Downstream cancelled; suspend further demand.
                        return true;
                    }
                }
                match page.next {
                    Some(next) => state = Some(next),
                    None => return true,
                }
            }
            Err(err) => {
                let _ = tx.send(ReadResult::failure(statement, err)).await;
                return false;
            }
        }
    }
}

/// Continuous paging: one page of lookahead fetched while the previous
/// page drains downstream. Page requests stay gated by the request
/// semaphore and the rate limiter.
async fn run_read_continuous(
    inner: Arc<Inner>,
    statement: Arc<BoundStatement>,
    tx: mpsc::Sender<ReadResult>,
) -> bool {
    let (page_tx, mut page_rx) = mpsc::channel(1);
    let fetcher_inner = Arc::clone(&inner);
    let fetcher_statement = Arc::clone(&statement);
    let fetcher = tokio::spawn(async move {
        let mut state = None;
        loop {
            let request_permit = fetcher_inner.request_slot().await;
            let fetched = fetcher_inner
                .session
                .fetch_page(&fetcher_statement, state.take(), fetcher_inner.page_size)
                .await;
            drop(request_permit);
            match fetched {
                Ok(page) => {
                    let next = page.next.clone();
                    if page_tx.send(Ok(page)).await.is_err() {
                        return;
                    }
                    match next {
                        Some(s) => state = Some(s),
                        None => return,
                    }
                }
                Err(err) => {
                    let _ = page_tx.send(Err(err)).await;
                    return;
                }
            }
        }
    });

    let mut clean = true;
    while let Some(page) = page_rx.recv().await {
        match page {
            Ok(page) => {
                for row in page.rows {
                    if tx
                        .send(ReadResult::row(Arc::clone(&statement), row))
                        .await
                        .is_err()
                    {
                        fetcher.abort();
                        return true;
                    }
                }
            }
            Err(err) => {
                let _ = tx.send(ReadResult::failure(Arc::clone(&statement), err)).await;
                clean = false;
            }
        }
    }
    clean
}
