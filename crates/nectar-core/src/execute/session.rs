//! Execution sessions.
//!
//! A session owns one foreign state for its whole life and hides the
//! init/execute/finalize protocol:
//!
//! ```text
//! Created ──first evaluation──▶ init ──▶ Ready ──▶ ... ──▶ Ready
//!    │                            │                         │
//!    │                            └─failure─▶ Failed        └─corrupted─▶ Corrupted
//!    │                                                      │
//!    └──────────────── close / drop ──▶ finalize ──▶ state-delete
//! ```
//!
//! `init` runs lazily on the first evaluation. `finalize` and state-delete run
//! exactly once, when the session is closed or dropped, even if nothing was
//! ever evaluated.

use std::fmt;
use std::sync::Arc;

use crate::binding::{Binding, CallStatus, ExecutionState};
use crate::error::{Error, Result};
use crate::types::{FunctionInfo, Sample};

/// Lifecycle phase of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    /// State allocated, `init` not run yet.
    Created,
    /// Initialized; evaluations are accepted.
    Ready,
    /// `init` failed; the session never evaluates.
    Failed(String),
    /// The foreign code reported that its state is corrupted.
    Corrupted(String),
}

impl SessionPhase {
    pub fn is_usable(&self) -> bool {
        matches!(self, SessionPhase::Created | SessionPhase::Ready)
    }
}

/// Owner of one foreign state.
///
/// Evaluations take `&mut self`, so a session never has two calls in flight.
/// Use one session per thread for parallel work.
pub struct ExecutionSession {
    binding: Arc<Binding>,
    state: Option<ExecutionState>,
    info: FunctionInfo,
    phase: SessionPhase,
    evaluations: u64,
}

impl ExecutionSession {
    /// Allocate a state and read the function's declared shape.
    pub fn new(binding: Arc<Binding>) -> Result<Self> {
        let mut state = binding.create_state()?;

        let info = match binding.info(&state) {
            Ok(info) => info,
            Err(e) => {
                let _ = binding.finalize(&mut state);
                let _ = binding.delete_state(state);
                return Err(e);
            }
        };

        tracing::debug!(
            "Created session for `{}` ({} -> {})",
            binding.function(),
            info.input_dimension,
            info.output_dimension
        );

        Ok(Self {
            binding,
            state: Some(state),
            info,
            phase: SessionPhase::Created,
            evaluations: 0,
        })
    }

    pub fn binding(&self) -> &Arc<Binding> {
        &self.binding
    }

    pub fn function(&self) -> &str {
        self.binding.function()
    }

    pub fn info(&self) -> &FunctionInfo {
        &self.info
    }

    pub fn input_dimension(&self) -> usize {
        self.info.input_dimension
    }

    pub fn output_dimension(&self) -> usize {
        self.info.output_dimension
    }

    pub fn description(&self) -> Option<&str> {
        self.info.description.as_deref()
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    /// Number of points handed to the foreign code so far.
    pub fn evaluation_count(&self) -> u64 {
        self.evaluations
    }

    /// Fail unless `point` has the declared input dimension.
    pub(crate) fn check_point(&self, point: &[f64]) -> Result<()> {
        if point.len() != self.info.input_dimension {
            return Err(Error::DimensionMismatch {
                function: self.function().to_string(),
                expected: self.info.input_dimension,
                actual: point.len(),
                value: point.to_vec(),
            });
        }
        Ok(())
    }

    pub(crate) fn check_batch(&self, batch: &Sample) -> Result<()> {
        if batch.dimension() != self.info.input_dimension {
            return Err(Error::DimensionMismatch {
                function: self.function().to_string(),
                expected: self.info.input_dimension,
                actual: batch.dimension(),
                value: batch.row(0).map(<[f64]>::to_vec).unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Run `init` if this is the first evaluation and hand out the state.
    fn ready_state(&mut self) -> Result<&mut ExecutionState> {
        if let SessionPhase::Failed(reason) | SessionPhase::Corrupted(reason) = &self.phase {
            return Err(Error::SessionUnusable {
                function: self.binding.function().to_string(),
                reason: reason.clone(),
            });
        }

        if self.phase == SessionPhase::Created {
            let state = self.state.as_mut().ok_or_else(|| closed(&self.binding))?;
            if let Err(e) = self.binding.init(state) {
                tracing::warn!("Init of `{}` failed: {}", self.binding.function(), e);
                self.phase = SessionPhase::Failed(e.to_string());
                return Err(Error::internal(self.binding.function(), e));
            }
            self.phase = SessionPhase::Ready;
        }

        self.state.as_mut().ok_or_else(|| closed(&self.binding))
    }

    /// Record a failed call and convert it to the error returned to callers.
    fn execution_failure(&mut self, err: Error) -> Error {
        if let Error::ForeignExecution {
            status: CallStatus::StateCorrupted,
            message,
            ..
        } = &err
        {
            tracing::warn!(
                "Foreign state of `{}` reported corruption: {}",
                self.binding.function(),
                message
            );
            self.phase = SessionPhase::Corrupted(message.clone());
        }
        Error::internal(self.binding.function(), err)
    }

    /// Evaluate one point.
    pub fn evaluate(&mut self, point: &[f64]) -> Result<Vec<f64>> {
        self.check_point(point)?;

        let output_dimension = self.info.output_dimension;
        let binding = self.binding.clone();
        let state = self.ready_state()?;
        let result = binding.execute(state, point, output_dimension);
        self.evaluations += 1;

        result.map_err(|e| self.execution_failure(e))
    }

    /// Evaluate every point of `batch` in one foreign call.
    ///
    /// The evaluation counter grows by the number of points.
    pub fn evaluate_batch(&mut self, batch: &Sample) -> Result<Sample> {
        self.check_batch(batch)?;

        let description = self.info.description.clone();
        if batch.is_empty() {
            return Ok(Sample::new(self.info.output_dimension).with_description(description));
        }

        let output_dimension = self.info.output_dimension;
        let binding = self.binding.clone();
        let state = self.ready_state()?;
        let result = binding.execute_batch(state, batch, output_dimension);
        self.evaluations += batch.len() as u64;

        result
            .map(|sample| sample.with_description(description))
            .map_err(|e| self.execution_failure(e))
    }

    /// Finalize and delete the state, reporting failures.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(mut state) = self.state.take() else {
            return Ok(());
        };

        let finalized = self.binding.finalize(&mut state);
        let deleted = self.binding.delete_state(state);

        tracing::debug!(
            "Closed session for `{}` after {} evaluation(s)",
            self.binding.function(),
            self.evaluations
        );

        finalized.and(deleted)
    }
}

fn closed(binding: &Binding) -> Error {
    Error::SessionUnusable {
        function: binding.function().to_string(),
        reason: "session already closed".to_string(),
    }
}

impl Drop for ExecutionSession {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!("Failed to close session for `{}`: {}", self.binding.function(), e);
        }
    }
}

impl fmt::Debug for ExecutionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionSession")
            .field("function", &self.binding.function())
            .field("phase", &self.phase)
            .field("evaluations", &self.evaluations)
            .finish()
    }
}
