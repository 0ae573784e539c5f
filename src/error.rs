use thiserror::Error;

use crate::model::Id;

/// Fatal and caller-visible failures of catalog, loader and persister
/// operations.
#[derive(Debug, Error)]
pub enum ConfDbError {
    #[error("{operation}: integrity violation: {detail}")]
    Integrity {
        operation: &'static str,
        detail: String,
    },

    #[error("{operation} failed for {context}: {source}")]
    Transaction {
        operation: &'static str,
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation}: configuration {path} is locked by {holder}")]
    LockConflict {
        operation: &'static str,
        path: String,
        holder: String,
    },

    #[error("{operation}: {entity} not found")]
    NotFound {
        operation: &'static str,
        entity: String,
    },

    #[error("identity allocation failed: {0}")]
    Allocation(#[source] anyhow::Error),

    #[error("{operation}: store error: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl ConfDbError {
    pub fn integrity(operation: &'static str, detail: impl Into<String>) -> Self {
        ConfDbError::Integrity {
            operation,
            detail: detail.into(),
        }
    }

    pub fn not_found(operation: &'static str, entity: impl Into<String>) -> Self {
        ConfDbError::NotFound {
            operation,
            entity: entity.into(),
        }
    }

    /// Wraps a backend failure, for use with `map_err`.
    pub fn store(operation: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| ConfDbError::Store { operation, source }
    }
}

pub type Result<T> = std::result::Result<T, ConfDbError>;

/// Recoverable inconsistency found while loading. The surrounding object is
/// still produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsistencyWarning {
    #[error("{owner}: expected position {expected}, found {found}")]
    PositionSkew {
        owner: String,
        expected: usize,
        found: i32,
    },

    #[error("{owner}: unresolved {kind} reference {target}")]
    UnresolvedReference {
        owner: String,
        kind: &'static str,
        target: Id,
    },

    #[error("{owner}: {count} parameter(s) missing")]
    MissingParameters { owner: String, count: usize },

    #[error("{instance} dropped: {reason}")]
    InstanceDropped { instance: String, reason: String },

    #[error("directory {id} ({name}) is not reachable from the root")]
    OrphanDirectory { id: Id, name: String },
}

/// A loaded value together with the warnings raised while producing it.
#[derive(Debug, Clone)]
pub struct Loaded<T> {
    pub value: T,
    pub warnings: Vec<ConsistencyWarning>,
}

impl<T> Loaded<T> {
    pub fn new(value: T, warnings: Vec<ConsistencyWarning>) -> Self {
        Self { value, warnings }
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Loaded<U> {
        Loaded {
            value: f(self.value),
            warnings: self.warnings,
        }
    }
}

/// Logs and collects consistency warnings.
#[derive(Debug, Default)]
pub(crate) struct WarningSink {
    warnings: Vec<ConsistencyWarning>,
}

impl WarningSink {
    pub(crate) fn push(&mut self, warning: ConsistencyWarning) {
        log::warn!("{}", warning);
        self.warnings.push(warning);
    }

    pub(crate) fn finish<T>(self, value: T) -> Loaded<T> {
        Loaded::new(value, self.warnings)
    }
}
