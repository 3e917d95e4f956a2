//! Eval command implementation.
//!
//! Reads a JSON array of rows, evaluates them through a cached evaluator
//! (or a parallel one when `--workers` is given), prints the output rows as
//! JSON on stdout and the cache statistics on stderr.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use nectar_core::{Binding, CachedEvaluator, EvaluatorConfig, ParallelEvaluator, Sample};
use serde::Serialize;

use crate::open_registry;

pub struct EvalOptions<'a> {
    pub module: &'a str,
    pub function: &'a str,
    pub search_dirs: &'a [PathBuf],
    pub input: Option<&'a Path>,
    pub config: Option<&'a Path>,
    pub workers: Option<usize>,
    pub repeat: usize,
}

/// Summary written to stderr after the run.
#[derive(Serialize)]
struct RunSummary {
    rows: usize,
    repeat: usize,
    foreign_calls: u64,
    cache: nectar_core::CacheStats,
    elapsed_ms: u128,
}

/// Either evaluator, so the command drives both the same way.
enum Evaluator {
    Cached(CachedEvaluator),
    Parallel(ParallelEvaluator),
}

impl Evaluator {
    fn input_dimension(&self) -> usize {
        match self {
            Evaluator::Cached(e) => e.info().input_dimension,
            Evaluator::Parallel(e) => e.info().input_dimension,
        }
    }

    fn evaluate_batch(&mut self, batch: &Sample) -> nectar_core::Result<Sample> {
        match self {
            Evaluator::Cached(e) => e.evaluate_batch(batch),
            Evaluator::Parallel(e) => e.evaluate_batch(batch),
        }
    }

    fn calls_count(&self) -> nectar_core::Result<u64> {
        match self {
            Evaluator::Cached(e) => Ok(e.calls_count()),
            Evaluator::Parallel(e) => e.calls_count(),
        }
    }

    fn cache_stats(&self) -> nectar_core::CacheStats {
        match self {
            Evaluator::Cached(e) => e.cache().stats(),
            Evaluator::Parallel(e) => e.cache().stats(),
        }
    }

    fn close(self) -> nectar_core::Result<()> {
        match self {
            Evaluator::Cached(e) => e.close(),
            Evaluator::Parallel(e) => e.close(),
        }
    }
}

/// Parse a JSON array of rows into a sample of the given dimension.
fn parse_rows(text: &str, dimension: usize) -> anyhow::Result<Sample> {
    let rows: Vec<Vec<f64>> =
        serde_json::from_str(text).context("input must be a JSON array of numeric rows")?;

    Sample::from_rows(dimension, &rows).map_err(|index| {
        anyhow::anyhow!(
            "row {} has {} value(s), expected {}",
            index,
            rows[index].len(),
            dimension
        )
    })
}

fn read_input(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read stdin")?;
            Ok(text)
        }
    }
}

/// Evaluate the input batch.
pub fn execute(options: &EvalOptions<'_>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut config = match options.config {
        Some(path) => EvaluatorConfig::from_json_file(path)?,
        None => EvaluatorConfig::from_env()?,
    };
    if let Some(workers) = options.workers {
        config = config.with_workers(workers);
    }

    let registry = open_registry(options.search_dirs, config.retry.clone());
    let binding = Binding::build(&registry, options.module, options.function)?;

    let mut evaluator = match options.workers {
        Some(_) => Evaluator::Parallel(ParallelEvaluator::new(binding, &config)?),
        None => Evaluator::Cached(CachedEvaluator::new(binding, &config)?),
    };

    let batch = parse_rows(&read_input(options.input)?, evaluator.input_dimension())?;

    let mut output = None;
    for _ in 0..options.repeat.max(1) {
        output = Some(evaluator.evaluate_batch(&batch)?);
    }

    if let Some(output) = output {
        println!("{}", serde_json::to_string(&output.to_rows())?);
    }

    let summary = RunSummary {
        rows: batch.len(),
        repeat: options.repeat.max(1),
        foreign_calls: evaluator.calls_count()?,
        cache: evaluator.cache_stats(),
        elapsed_ms: start.elapsed().as_millis(),
    };
    eprintln!("{}", serde_json::to_string(&summary)?);

    evaluator.close()?;
    registry.teardown()?;
    Ok(())
}
