//! Error types for nectar-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::binding::CallStatus;

/// Result type for nectar-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in nectar-core.
#[derive(Debug, Error)]
pub enum Error {
    /// No file matching the module name exists in any search directory.
    #[error("module not found: {name} (searched {searched} directories)")]
    ModuleNotFound { name: String, searched: usize },

    /// The platform loader refused to load the module.
    #[error("failed to load module {}: {reason}", path.display())]
    ModuleLoad { path: PathBuf, reason: String },

    /// One or more modules could not be unloaded.
    ///
    /// Every module is attempted; this carries one entry per failure.
    #[error("failed to unload {} module(s): {}", failures.len(), format_unload_failures(failures))]
    ModuleUnload { failures: Vec<(PathBuf, String)> },

    /// The module does not export the requested symbol.
    #[error("symbol `{symbol}` not found in {}", path.display())]
    SymbolNotFound { path: PathBuf, symbol: String },

    /// A required entry point of the foreign contract is missing.
    #[error("binding for `{function}` is incomplete: missing entry point `{entry_point}` in {}", path.display())]
    BindingIncomplete {
        path: PathBuf,
        function: String,
        entry_point: String,
    },

    /// The foreign state could not be allocated.
    #[error("failed to create state for `{function}`: {message}")]
    StateCreation { function: String, message: String },

    /// A caller-supplied vector does not match the declared dimension.
    #[error("dimension mismatch for `{function}`: expected {expected}, got {actual} (value: {value:?})")]
    DimensionMismatch {
        function: String,
        expected: usize,
        actual: usize,
        value: Vec<f64>,
    },

    /// The foreign code signaled failure.
    #[error("`{function}` failed in `{entry_point}` ({status:?}): {message}")]
    ForeignExecution {
        function: String,
        entry_point: String,
        status: CallStatus,
        message: String,
    },

    /// An evaluation failed inside the subsystem boundary.
    #[error("internal execution error for `{function}`: {message}")]
    InternalExecution {
        function: String,
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    /// The session cannot serve evaluations anymore.
    #[error("session for `{function}` is unusable: {reason}")]
    SessionUnusable { function: String, reason: String },

    /// Filesystem access kept failing after the whole retry budget.
    #[error("giving up on {name} after {attempts} attempt(s): {source}")]
    IoRetryExhausted {
        name: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// A configuration value could not be interpreted.
    #[error("invalid configuration value for `{key}`: {message}")]
    InvalidConfig { key: String, message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_unload_failures(failures: &[(PathBuf, String)]) -> String {
    failures
        .iter()
        .map(|(path, reason)| format!("{} ({})", path.display(), reason))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Wrap an error raised while evaluating so it does not leave the session as-is.
    pub(crate) fn internal(function: &str, source: Error) -> Self {
        Error::InternalExecution {
            function: function.to_string(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Render the error together with a recovery hint, when one applies.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::ModuleNotFound { .. } => {
                Some("add the module's directory with --search-dir or NECTAR_MODULE_PATH")
            }
            Error::ModuleLoad { .. } => {
                Some("check that the module was built for this platform and its dependencies resolve")
            }
            Error::BindingIncomplete { .. } | Error::SymbolNotFound { .. } => {
                Some("the module must export NAME_state_create, NAME_state_delete, NAME_info, NAME_init, NAME_exec, NAME_exec_batch and NAME_finalize")
            }
            Error::DimensionMismatch { .. } => Some("fix the input vector length"),
            Error::SessionUnusable { .. } => Some("discard this evaluator and build a new one"),
            Error::IoRetryExhausted { .. } => {
                Some("raise retry.max_attempts or retry.backoff_ms for slow filesystems")
            }
            _ => None,
        };

        match hint {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}
