//! Cached evaluation of single points and batches.
//!
//! Batch evaluation:
//! 1. look every row up in the long-lived cache
//! 2. deduplicate the rows that missed
//! 3. evaluate the distinct misses once
//! 4. put their outputs in a temporary cache
//! 5. rebuild the full output in row order from both caches
//! 6. merge the temporary cache into the long-lived one

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::binding::Binding;
use crate::cache::{CacheKey, ResultCache};
use crate::config::EvaluatorConfig;
use crate::error::{Error, Result};
use crate::types::{FunctionInfo, Sample};

use super::session::ExecutionSession;

/// Rows of a batch split into cached outputs and distinct points to compute.
pub(crate) struct BatchPlan {
    /// Output of each row already found in the long-lived cache.
    known: Vec<Option<Vec<f64>>>,
    /// Distinct rows that missed, in order of first appearance.
    pub(crate) unknown: Sample,
}

impl BatchPlan {
    pub(crate) fn new(cache: &ResultCache, batch: &Sample) -> Self {
        let mut known = Vec::with_capacity(batch.len());
        let mut seen: FxHashSet<CacheKey> = FxHashSet::default();
        let mut unknown = Sample::new(batch.dimension());

        for row in batch.rows() {
            match cache.lookup(row) {
                Some(value) => known.push(Some(value)),
                None => {
                    known.push(None);
                    if seen.insert(CacheKey::new(row)) {
                        unknown.push(row);
                    }
                }
            }
        }

        Self { known, unknown }
    }

    /// Rebuild outputs in row order and fold `fresh` into `cache`.
    ///
    /// `fresh` must hold the output of every row of `self.unknown`.
    pub(crate) fn assemble(
        self,
        function: &str,
        batch: &Sample,
        info: &FunctionInfo,
        fresh: &ResultCache,
        cache: &ResultCache,
    ) -> Result<Sample> {
        let mut output = Sample::with_capacity(info.output_dimension, batch.len());

        for (index, (row, known)) in batch.rows().zip(self.known).enumerate() {
            let value = match known {
                Some(value) => value,
                None => fresh.lookup(row).ok_or_else(|| Error::InternalExecution {
                    function: function.to_string(),
                    message: format!("row {} ({:?}) was resolved by neither cache", index, row),
                    source: None,
                })?,
            };

            if value.len() != info.output_dimension {
                return Err(Error::InternalExecution {
                    function: function.to_string(),
                    message: format!(
                        "row {} has {} output values, expected {}",
                        index,
                        value.len(),
                        info.output_dimension
                    ),
                    source: None,
                });
            }
            output.push(&value);
        }

        cache.merge(fresh);
        Ok(output.with_description(info.description.clone()))
    }
}

/// Build the temporary cache of freshly computed outputs.
pub(crate) fn fresh_cache(inputs: &Sample, outputs: &Sample) -> ResultCache {
    let fresh = ResultCache::new(inputs.len());
    for (input, output) in inputs.rows().zip(outputs.rows()) {
        fresh.insert(input, output.to_vec());
    }
    fresh
}

/// One session plus a result cache that may be shared with other evaluators.
#[derive(Debug)]
pub struct CachedEvaluator {
    session: ExecutionSession,
    cache: Arc<ResultCache>,
}

impl CachedEvaluator {
    /// Open a session on `binding` with a fresh cache sized from `config`.
    pub fn new(binding: Arc<Binding>, config: &EvaluatorConfig) -> Result<Self> {
        Self::with_cache(binding, Arc::new(config.build_cache()))
    }

    /// Open a session on `binding` that reads and fills `cache`.
    pub fn with_cache(binding: Arc<Binding>, cache: Arc<ResultCache>) -> Result<Self> {
        Ok(Self::from_session(ExecutionSession::new(binding)?, cache))
    }

    pub fn from_session(session: ExecutionSession, cache: Arc<ResultCache>) -> Self {
        Self { session, cache }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn session(&self) -> &ExecutionSession {
        &self.session
    }

    pub fn info(&self) -> &FunctionInfo {
        self.session.info()
    }

    /// Points actually sent to the foreign code.
    pub fn calls_count(&self) -> u64 {
        self.session.evaluation_count()
    }

    /// Evaluate one point, serving it from the cache when possible.
    pub fn evaluate(&mut self, point: &[f64]) -> Result<Vec<f64>> {
        self.session.check_point(point)?;

        if let Some(value) = self.cache.lookup(point) {
            return Ok(value);
        }

        let value = self.session.evaluate(point)?;
        self.cache.insert(point, value.clone());
        Ok(value)
    }

    /// Evaluate a batch; duplicate and cached rows never reach the foreign code.
    pub fn evaluate_batch(&mut self, batch: &Sample) -> Result<Sample> {
        self.session.check_batch(batch)?;

        let plan = BatchPlan::new(&self.cache, batch);
        tracing::debug!(
            "Batch of {} row(s) for `{}`: {} distinct to compute",
            batch.len(),
            self.session.function(),
            plan.unknown.len()
        );

        let computed = self.session.evaluate_batch(&plan.unknown)?;
        let fresh = fresh_cache(&plan.unknown, &computed);

        plan.assemble(
            self.session.function(),
            batch,
            self.session.info(),
            &fresh,
            &self.cache,
        )
    }

    /// Close the underlying session, reporting finalize failures.
    pub fn close(self) -> Result<()> {
        self.session.close()
    }
}
