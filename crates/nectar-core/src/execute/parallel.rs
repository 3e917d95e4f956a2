//! Parallel evaluator.
//!
//! Splits the distinct uncached rows of a batch across worker sessions and
//! evaluates the chunks concurrently using Rayon. Every worker owns its own
//! foreign state, so no state is ever shared between threads; the result
//! cache is the only shared structure.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rayon::prelude::*;

use crate::binding::Binding;
use crate::cache::ResultCache;
use crate::config::EvaluatorConfig;
use crate::error::{Error, Result};
use crate::types::{FunctionInfo, Sample};

use super::evaluator::{BatchPlan, fresh_cache};
use super::session::ExecutionSession;

/// Batch evaluator backed by one session per worker.
pub struct ParallelEvaluator {
    workers: Vec<Mutex<ExecutionSession>>,
    cache: Arc<ResultCache>,
    info: FunctionInfo,
    function: String,
}

/// Helper to convert PoisonError to our Error type.
fn lock_error<T>(function: &str, e: PoisonError<T>) -> Error {
    Error::InternalExecution {
        function: function.to_string(),
        message: format!("worker session lock poisoned (thread panicked): {}", e),
        source: None,
    }
}

impl ParallelEvaluator {
    /// Open `config.workers` sessions on `binding` with a fresh cache.
    pub fn new(binding: Arc<Binding>, config: &EvaluatorConfig) -> Result<Self> {
        Self::with_cache(binding, config.workers, Arc::new(config.build_cache()))
    }

    /// Open `workers` sessions (at least one) sharing `cache`.
    pub fn with_cache(
        binding: Arc<Binding>,
        workers: usize,
        cache: Arc<ResultCache>,
    ) -> Result<Self> {
        let sessions = (0..workers.max(1))
            .map(|_| ExecutionSession::new(binding.clone()))
            .collect::<Result<Vec<_>>>()?;

        let info = sessions[0].info().clone();
        tracing::debug!(
            "Parallel evaluator for `{}` with {} worker(s)",
            binding.function(),
            sessions.len()
        );

        Ok(Self {
            workers: sessions.into_iter().map(Mutex::new).collect(),
            cache,
            info,
            function: binding.function().to_string(),
        })
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn info(&self) -> &FunctionInfo {
        &self.info
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn lock_worker(&self, index: usize) -> Result<MutexGuard<'_, ExecutionSession>> {
        self.workers[index]
            .lock()
            .map_err(|e| lock_error(&self.function, e))
    }

    /// Points actually sent to the foreign code, over all workers.
    pub fn calls_count(&self) -> Result<u64> {
        let mut total = 0;
        for index in 0..self.workers.len() {
            total += self.lock_worker(index)?.evaluation_count();
        }
        Ok(total)
    }

    /// Evaluate one point on the first idle worker.
    pub fn evaluate(&self, point: &[f64]) -> Result<Vec<f64>> {
        let mut session = match self.workers.iter().find_map(|w| w.try_lock().ok()) {
            Some(session) => session,
            None => self.lock_worker(0)?,
        };
        session.check_point(point)?;

        if let Some(value) = self.cache.lookup(point) {
            return Ok(value);
        }

        let value = session.evaluate(point)?;
        self.cache.insert(point, value.clone());
        Ok(value)
    }

    /// Evaluate a batch, spreading distinct uncached rows over the workers.
    pub fn evaluate_batch(&self, batch: &Sample) -> Result<Sample> {
        if batch.dimension() != self.info.input_dimension {
            return Err(Error::DimensionMismatch {
                function: self.function.clone(),
                expected: self.info.input_dimension,
                actual: batch.dimension(),
                value: batch.row(0).map(<[f64]>::to_vec).unwrap_or_default(),
            });
        }

        let plan = BatchPlan::new(&self.cache, batch);
        let unknown = &plan.unknown;

        let chunk_rows = unknown.len().div_ceil(self.workers.len()).max(1);
        let chunks: Vec<Sample> = (0..unknown.len())
            .step_by(chunk_rows)
            .filter_map(|start| {
                let end = (start + chunk_rows).min(unknown.len());
                let dim = unknown.dimension();
                let values = unknown.as_flat()[start * dim..end * dim].to_vec();
                Sample::from_flat(dim, end - start, values)
            })
            .collect();

        tracing::debug!(
            "Batch of {} row(s) for `{}`: {} distinct in {} chunk(s)",
            batch.len(),
            self.function,
            unknown.len(),
            chunks.len()
        );

        let results: Vec<Result<Sample>> = chunks
            .par_iter()
            .enumerate()
            .map(|(index, chunk)| self.lock_worker(index)?.evaluate_batch(chunk))
            .collect();

        let fresh = ResultCache::new(unknown.len());
        for (chunk, result) in chunks.iter().zip(results) {
            // Note: Returns first error, like the sequential evaluator would.
            let outputs = result?;
            fresh.merge(&fresh_cache(chunk, &outputs));
        }

        plan.assemble(&self.function, batch, &self.info, &fresh, &self.cache)
    }

    /// Close every worker session; the first failure is returned after all are closed.
    pub fn close(self) -> Result<()> {
        let mut first_error = None;
        for worker in self.workers {
            let session = worker.into_inner().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = session.close() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for ParallelEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelEvaluator")
            .field("function", &self.function)
            .field("workers", &self.workers.len())
            .finish()
    }
}
