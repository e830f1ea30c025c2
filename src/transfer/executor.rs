//! Bounded parallel execution of per-chunk operations
//!
//! [`run_parallel_transfer`] plans the chunks of a transfer and spawns a fixed
//! pool of worker tasks onto the runtime. Workers pull the next chunk from a
//! shared cursor over the plan and run the caller's [`ChunkOperation`] on it,
//! so on a multi-threaded runtime chunks make progress on separate threads.
//! The first failure cancels a shared [`CancellationToken`] so queued and
//! in-flight chunks can stop early, and every chunk's result is drained and
//! every worker joined before returning.

use crate::error::{Result, TransferError};
use crate::transfer::plan::{Chunk, TransferPlan};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Work performed for one chunk of a transfer.
///
/// Operations are shared by every worker task, so they own their state
/// (usually through `Arc`s) instead of borrowing it. Implementations should
/// check `cancel` on entry and while waiting on remote calls, returning
/// [`TransferError::Canceled`] once it fires. Closures of the form
/// `Fn(Chunk, CancellationToken) -> impl Future` work as operations directly.
pub trait ChunkOperation: Send + Sync + 'static {
    fn execute(
        &self,
        chunk: Chunk,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl<F, Fut> ChunkOperation for F
where
    F: Fn(Chunk, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    fn execute(
        &self,
        chunk: Chunk,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<()>> + Send {
        self(chunk, cancel.clone())
    }
}

/// Parameters for a single batch transfer
#[derive(Debug, Clone, Default)]
pub struct BatchTransferOptions {
    /// Label used in log events
    pub operation_name: String,
    pub transfer_size: u64,
    pub chunk_size: u64,
    /// Maximum concurrently running chunk operations; zero means the default
    pub parallelism: u16,
    /// Caller-owned token; the transfer cancels a child of it on failure
    pub cancel: Option<CancellationToken>,
}

impl BatchTransferOptions {
    pub fn new<S: Into<String>>(operation_name: S, transfer_size: u64, chunk_size: u64) -> Self {
        Self {
            operation_name: operation_name.into(),
            transfer_size,
            chunk_size,
            ..Default::default()
        }
    }

    pub fn parallelism(mut self, parallelism: u16) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Pulls chunks off the shared cursor until the plan is exhausted.
async fn worker_loop<O: ChunkOperation>(
    worker: usize,
    plan: Arc<TransferPlan>,
    cursor: Arc<AtomicUsize>,
    operation: Arc<O>,
    cancel: CancellationToken,
    results: mpsc::Sender<Result<()>>,
) {
    while let Some(chunk) = plan.chunk(cursor.fetch_add(1, Ordering::Relaxed)) {
        let outcome = if cancel.is_cancelled() {
            Err(TransferError::Canceled)
        } else {
            trace!(worker, chunk = chunk.index, offset = chunk.offset, "chunk started");
            operation.execute(chunk, &cancel).await
        };
        trace!(worker, chunk = chunk.index, ok = outcome.is_ok(), "chunk finished");

        // Report before cancelling so the failure arrives ahead of the
        // cancellations it causes.
        let failed = outcome.is_err();
        if results.send(outcome).await.is_err() {
            break;
        }
        if failed {
            cancel.cancel();
        }
    }
}

/// Run `operation` once per planned chunk with bounded parallelism.
///
/// Must be called from within a Tokio runtime. Returns the first error in
/// arrival order. When several chunks fail, which one is reported depends on
/// scheduling, not on chunk offset. A zero chunk size is rejected even for
/// an empty transfer. Dropping the returned future aborts the workers.
pub async fn run_parallel_transfer<O>(options: &BatchTransferOptions, operation: Arc<O>) -> Result<()>
where
    O: ChunkOperation,
{
    let plan = TransferPlan::new(options.transfer_size, options.chunk_size, options.parallelism)?;
    let chunk_count = plan.chunk_count();

    debug!(
        operation = %options.operation_name,
        transfer_size = plan.total_size(),
        chunk_size = plan.chunk_size(),
        chunk_count,
        parallelism = plan.parallelism(),
        "starting batch transfer"
    );

    if chunk_count == 0 {
        return Ok(());
    }

    let cancel = options
        .cancel
        .as_ref()
        .map(CancellationToken::child_token)
        .unwrap_or_default();
    let worker_count = usize::from(plan.parallelism()).min(chunk_count);
    let plan = Arc::new(plan);
    let cursor = Arc::new(AtomicUsize::new(0));
    let (result_tx, mut result_rx) = mpsc::channel::<Result<()>>(chunk_count);

    let mut workers = JoinSet::new();
    for worker in 0..worker_count {
        workers.spawn(worker_loop(
            worker,
            Arc::clone(&plan),
            Arc::clone(&cursor),
            Arc::clone(&operation),
            cancel.clone(),
            result_tx.clone(),
        ));
    }
    drop(result_tx);

    let mut first_error = None;
    for _ in 0..chunk_count {
        match result_rx.recv().await {
            Some(Ok(())) => {}
            Some(Err(err)) => {
                if first_error.is_none() {
                    debug!(operation = %options.operation_name, error = %err, "chunk failed, cancelling transfer");
                    cancel.cancel();
                    first_error = Some(err);
                }
            }
            None => break,
        }
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(err) = joined {
            if err.is_panic() {
                std::panic::resume_unwind(err.into_panic());
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    #[tokio::test]
    async fn test_happy_path_matrix() {
        let matrix: [(u64, u64, u16); 5] = [(100, 10, 5), (100, 9, 4), (100, 8, 15), (100, 1, 3), (0, 100, 5)];

        for (transfer_size, chunk_size, parallelism) in matrix {
            let total = Arc::new(AtomicU64::new(0));
            let runs = Arc::new(AtomicU64::new(0));
            let options = BatchTransferOptions::new("happy", transfer_size, chunk_size)
                .parallelism(parallelism);

            let (sum, count) = (Arc::clone(&total), Arc::clone(&runs));
            let operation = Arc::new(move |chunk: Chunk, _cancel: CancellationToken| {
                sum.fetch_add(chunk.length, Ordering::SeqCst);
                count.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            });
            run_parallel_transfer(&options, operation).await.unwrap();

            assert_eq!(total.load(Ordering::SeqCst), transfer_size);
            assert_eq!(runs.load(Ordering::SeqCst), transfer_size.div_ceil(chunk_size));
        }
    }

    #[tokio::test]
    async fn test_zero_chunk_size_errors() {
        for transfer_size in [100, 0] {
            let options = BatchTransferOptions::new("zero", transfer_size, 0).parallelism(5);
            let operation = Arc::new(|_: Chunk, _: CancellationToken| async { Ok(()) });
            let result = run_parallel_transfer(&options, operation).await;
            assert!(matches!(result, Err(TransferError::InvalidArgument(_))));
        }
    }

    #[tokio::test]
    async fn test_parallelism_bound() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let options = BatchTransferOptions::new("bound", 40, 1).parallelism(3);

        let (now_running, max_seen) = (Arc::clone(&running), Arc::clone(&peak));
        let operation = Arc::new(move |_: Chunk, _: CancellationToken| {
            let running = Arc::clone(&now_running);
            let peak = Arc::clone(&max_seen);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });
        run_parallel_transfer(&options, operation).await.unwrap();

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak} exceeded bound");
        assert!(peak > 1, "chunks never overlapped");
    }

    #[tokio::test]
    #[should_panic(expected = "chunk operation panicked")]
    async fn test_worker_panic_propagates() {
        let options = BatchTransferOptions::new("panic", 4, 1).parallelism(2);
        let operation = Arc::new(|chunk: Chunk, _: CancellationToken| async move {
            if chunk.index == 2 {
                panic!("chunk operation panicked");
            }
            Ok(())
        });
        let _ = run_parallel_transfer(&options, operation).await;
    }
}
