//! Core engine for nectar foreign-function evaluation.
//!
//! This crate provides:
//! - Module registry that loads each dynamic module once
//! - Typed bindings over the C entry points of a foreign function
//! - Execution sessions that own one foreign state each
//! - Result caching with batch deduplication
//! - Parallel batch evaluation over several sessions

pub mod binding;
pub mod cache;
pub mod config;
pub mod error;
pub mod execute;
pub mod registry;
pub mod types;

pub use binding::{
    Binding, CallStatus, EntryPoint, EntryPoints, ExecutionState, ForeignError, RawState,
};
pub use cache::{CacheKey, CacheStats, ResultCache};
pub use config::{EnvSettings, EvaluatorConfig, SettingsSource};
pub use error::{Error, Result};
pub use execute::{CachedEvaluator, ExecutionSession, ParallelEvaluator, SessionPhase};
pub use registry::{ModuleHandle, ModuleLocator, ModuleRegistry, RetryPolicy, SearchPath};
pub use types::{FunctionInfo, Sample};
