//! Parallel execution over host index ranges

use crate::{Result, SkiffError};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};


/// Outcome of one unit of a fan-out
#[derive(Debug)]
pub struct ExecutionResult {
    /// Index the unit was dispatched for
    pub index: usize,
    /// Host the index resolved to
    pub host: String,
    /// Output of a successful unit
    pub output: Bytes,
    /// Error of a failed unit
    pub error: Option<SkiffError>,
}

impl ExecutionResult {
    /// Successful unit
    pub fn success(index: usize, host: String, output: Bytes) -> Self {
        Self {
            index,
            host,
            output,
            error: None,
        }
    }

    /// Failed unit
    pub fn failure(index: usize, host: String, error: SkiffError) -> Self {
        Self {
            index,
            host,
            output: Bytes::new(),
            error: Some(error),
        }
    }

    /// True when the unit succeeded
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Successful fan-out
#[derive(Debug, Default)]
pub struct FanOutReport {
    /// Indices in the order their units finished
    pub completed: Vec<usize>,
    /// Results in the same order
    pub results: Vec<ExecutionResult>,
}

impl FanOutReport {
    /// Output of the unit for `index`
    pub fn output(&self, index: usize) -> Option<&Bytes> {
        self.results
            .iter()
            .find(|result| result.index == index)
            .map(|result| &result.output)
    }
}

/// Receives per-unit reports as they arrive
pub trait FanOutObserver: Send + Sync {
    /// A unit succeeded
    fn on_success(&self, _result: &ExecutionResult) {}

    /// A unit failed
    fn on_failure(&self, _result: &ExecutionResult) {}
}

/// Observer logging every unit through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl FanOutObserver for TracingObserver {
    fn on_success(&self, result: &ExecutionResult) {
        info!(index = result.index, host = %result.host, "Unit completed");
    }

    fn on_failure(&self, result: &ExecutionResult) {
        if let Some(e) = &result.error {
            error!(index = result.index, host = %result.host, error = %e, "Unit failed");
        }
    }
}

type Resolver = dyn Fn(usize) -> String + Send + Sync;

/// Runs one operation per host over an inclusive index range
#[derive(Clone)]
pub struct FanOut {
    resolver: Arc<Resolver>,
    observer: Arc<dyn FanOutObserver>,
}

impl FanOut {
    /// Create an executor mapping indices to host names with `resolver`
    pub fn new<R>(resolver: R) -> Self
    where
        R: Fn(usize) -> String + Send + Sync + 'static,
    {
        Self {
            resolver: Arc::new(resolver),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replace the per-unit observer
    pub fn with_observer<O>(mut self, observer: O) -> Self
    where
        O: FanOutObserver + 'static,
    {
        self.observer = Arc::new(observer);
        self
    }

    /// Host name for `index`
    pub fn host(&self, index: usize) -> String {
        (self.resolver)(index)
    }

    /// Run `op` for every index in `from..=to` concurrently.
    ///
    /// Every unit runs to completion; failures do not cancel the others.
    /// Fails with [`SkiffError::FanOut`] if any unit failed. An empty range
    /// succeeds with an empty report.
    pub async fn execute<F, Fut>(&self, from: usize, to: usize, op: F) -> Result<FanOutReport>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        let (total, mut rx) = self.scatter(from, to, op);
        let mut report = FanOutReport::default();
        let mut failures = Vec::new();

        while let Some(result) = rx.recv().await {
            if result.is_success() {
                self.observer.on_success(&result);
                report.completed.push(result.index);
                report.results.push(result);
            } else {
                self.observer.on_failure(&result);
                failures.push(result);
            }
        }

        debug!(
            total,
            succeeded = report.completed.len(),
            failed = failures.len(),
            "Fan-out finished"
        );
        if !failures.is_empty() {
            return Err(SkiffError::FanOut { failures, total });
        }
        Ok(report)
    }

    /// Run `op` for every index in `from..=to` and return every result in
    /// index order, successful or not
    pub async fn gather<F, Fut>(&self, from: usize, to: usize, op: F) -> Vec<ExecutionResult>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        let (total, mut rx) = self.scatter(from, to, op);
        let mut results = Vec::with_capacity(total);

        while let Some(result) = rx.recv().await {
            if result.is_success() {
                self.observer.on_success(&result);
            } else {
                self.observer.on_failure(&result);
            }
            results.push(result);
        }

        results.sort_by_key(|result| result.index);
        results
    }

    /// Spawn one task per index and a closer that ends the stream once all
    /// units are done
    fn scatter<F, Fut>(&self, from: usize, to: usize, op: F) -> (usize, mpsc::Receiver<ExecutionResult>)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        let total = if to >= from { to - from + 1 } else { 0 };
        let (tx, rx) = mpsc::channel(total.max(1));
        let op = Arc::new(op);
        let mut units = Vec::with_capacity(total);

        for index in from..=to {
            let host = self.host(index);
            let op = Arc::clone(&op);
            let tx = tx.clone();
            let unit_host = host.clone();
            let handle = tokio::spawn(async move {
                let result = match op(unit_host.clone()).await {
                    Ok(output) => ExecutionResult::success(index, unit_host, output),
                    Err(e) => ExecutionResult::failure(index, unit_host, e),
                };
                let _ = tx.send(result).await;
            });
            units.push((index, host, handle));
        }

        debug!(from, to, total, "Dispatched fan-out units");
        tokio::spawn(async move {
            for (index, host, handle) in units {
                if let Err(e) = handle.await {
                    let result = ExecutionResult::failure(index, host, SkiffError::from(e));
                    let _ = tx.send(result).await;
                }
            }
        });

        (total, rx)
    }
}
