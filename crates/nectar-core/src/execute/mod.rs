//! Execution engine for foreign functions.
//!
//! # Evaluators
//!
//! - **`ExecutionSession`** - Owns one foreign state and runs the
//!   init/execute/finalize protocol. No caching.
//! - **`CachedEvaluator`** - One session plus a result cache, with batch
//!   deduplication.
//! - **`ParallelEvaluator`** - One session per worker, chunks of a batch
//!   evaluated concurrently using Rayon, one shared cache.
//!
//! # Architecture
//!
//! ```text
//! caller
//!     │
//!     └── CachedEvaluator / ParallelEvaluator
//!             │
//!             ├── ResultCache lookup ──hit──▶ output
//!             │
//!             └── miss ──▶ ExecutionSession
//!                             │
//!                             └── Binding ──▶ EntryPoints ──▶ foreign code
//! ```
//!
//! # Module Structure
//!
//! - `session` - ExecutionSession and its lifecycle phases
//! - `evaluator` - CachedEvaluator and the shared batch planning
//! - `parallel` - ParallelEvaluator for concurrent batch evaluation

mod evaluator;
mod parallel;
mod session;

pub use evaluator::CachedEvaluator;
pub use parallel::ParallelEvaluator;
pub use session::{ExecutionSession, SessionPhase};
