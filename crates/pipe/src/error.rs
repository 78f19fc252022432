//! # Error Types
//!
//! Errors fall into three kinds:
//!
//! - **Contract** errors are raised while a pipeline is assembled: a stage
//!   without a complete type contract, or two adjacent stages whose types
//!   don't line up. A pipeline that assembles can't fail this way later.
//! - **Store** errors come from the scoped side channel: duplicate writes,
//!   missing entries, binds that can't be placed.
//! - **Runtime** errors wrap whatever a user stage returned, keeping the
//!   original cause reachable through `source()`.

use thiserror::Error;

/// Boxed error returned by user stage bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse classification of a [`PipeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Contract,
    Store,
    Runtime,
}

/// Errors raised by composition, binds, the store and stage execution.
#[derive(Debug, Error)]
pub enum PipeError {
    // ------------------------------------------------------------------
    // Contract errors
    // ------------------------------------------------------------------
    /// A parameter has no declared type.
    #[error("Parameter '{param}' of '{stage}' has no type; every parameter needs a declared type")]
    MissingParamType { stage: String, param: String },

    /// The stage never declared what it returns.
    #[error("Return type is missing for '{stage}'; declare what the stage returns")]
    MissingReturnType { stage: String },

    /// Variadic or keyword-only parameters can't be filled positionally.
    #[error("Parameter '{param}' of '{stage}' is {kind}, which is not supported")]
    UnsupportedParameter {
        stage: String,
        param: String,
        kind: String,
    },

    /// The output of one stage doesn't fit the input of the next.
    #[error(
        "'{consumer}' couldn't be added after '{producer}': the output has format {produced}, \
         the stage expects {expected}{}",
        fmt_reason(.reason)
    )]
    OutputInputMismatch {
        producer: String,
        consumer: String,
        produced: String,
        expected: String,
        reason: Option<String>,
    },

    /// Flattened fan-out values don't match the combiner's parameters.
    #[error("Given arguments do not match '{combiner}': received {received}, '{combiner}' consumes {expected}")]
    MergeArity {
        combiner: String,
        received: String,
        expected: String,
    },

    /// Flattened fan-out values don't match the requested fields.
    #[error("Cannot construct '{target}': {received} values for {expected} fields")]
    ConstructArity {
        target: String,
        expected: usize,
        received: usize,
    },

    /// A field name given to `to` doesn't exist on the target.
    #[error("'{target}' has no field '{field}'")]
    UnknownField { target: String, field: String },

    /// A field name given to `to` more than once.
    #[error("Field '{field}' of '{target}' is named more than once")]
    DuplicateField { target: String, field: String },

    /// `pipeline` needs at least one stage.
    #[error("A pipeline needs at least one stage")]
    EmptyPipeline,

    /// `fork` needs at least one branch.
    #[error("A fork needs at least one branch")]
    EmptyFork,

    /// A stage can write its result under one name only.
    #[error("'{stage}' already writes its result to '{existing}'")]
    WriteAlreadyBound { stage: String, existing: String },

    // ------------------------------------------------------------------
    // Store errors
    // ------------------------------------------------------------------
    /// The name was already written in this scope.
    #[error("The attribute '{name}' already exists")]
    AttributeExists { name: String },

    /// The name was never written in this scope.
    #[error("Tried to access attribute '{name}' but it was not found; available attributes: {available:?}")]
    AttributeNotFound {
        name: String,
        available: Vec<String>,
    },

    /// Store entries must carry a value type.
    #[error("Attribute '{name}' can't be stored with type {ty}; store entries need a value type")]
    InvalidStoreType { name: String, ty: String },

    /// The stored type doesn't fit the parameter it is ingested into.
    #[error("The store entry '{name}' could not be ingested into '{stage}': parameter '{param}' expects {expected}, the entry has type {actual}")]
    StoreTypeMismatch {
        name: String,
        stage: String,
        param: String,
        expected: String,
        actual: String,
    },

    /// Fan primitives (and stages created with `no_ingest`) refuse reads.
    #[error("Store ingest is not allowed for '{stage}'")]
    IngestNotAllowed { stage: String },

    /// Every parameter is already fed from the store.
    #[error("No free parameter left on '{stage}' for store entry '{name}' (searched from the {side})")]
    NoFreeParameter {
        stage: String,
        name: String,
        side: &'static str,
    },

    // ------------------------------------------------------------------
    // Runtime errors
    // ------------------------------------------------------------------
    /// A user stage failed.
    #[error("The step '{stage}' failed: {source}")]
    StepFailed {
        stage: String,
        #[source]
        source: BoxError,
    },

    /// A stage was called with the wrong number of positional arguments.
    #[error("'{stage}' expects {expected} arguments, got {got}")]
    ArgumentCount {
        stage: String,
        expected: String,
        got: usize,
    },

    /// A value couldn't be converted to the requested Rust type.
    #[error("Expected a value of type {expected}, found {found}")]
    ValueType {
        expected: &'static str,
        found: String,
    },

    /// Nested pipelines went deeper than the configured limit.
    #[error("Pipeline nesting exceeded the maximum depth of {max}")]
    DepthExceeded { max: usize },

    // ------------------------------------------------------------------
    // Descriptor errors
    // ------------------------------------------------------------------
    /// A textual type couldn't be parsed.
    #[error("Invalid type syntax '{input}': {reason}")]
    TypeSyntax { input: String, reason: String },

    /// A stage descriptor couldn't be read.
    #[error("Invalid stage descriptor: {0}")]
    Descriptor(#[from] serde_json::Error),
}

fn fmt_reason(reason: &Option<String>) -> String {
    reason
        .as_ref()
        .map(|r| format!(" ({r})"))
        .unwrap_or_default()
}

impl PipeError {
    /// Which of the three error kinds this belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipeError::AttributeExists { .. }
            | PipeError::AttributeNotFound { .. }
            | PipeError::InvalidStoreType { .. }
            | PipeError::StoreTypeMismatch { .. }
            | PipeError::IngestNotAllowed { .. }
            | PipeError::NoFreeParameter { .. } => ErrorKind::Store,
            PipeError::StepFailed { .. }
            | PipeError::ArgumentCount { .. }
            | PipeError::ValueType { .. }
            | PipeError::DepthExceeded { .. } => ErrorKind::Runtime,
            _ => ErrorKind::Contract,
        }
    }

    /// Translate a stage body failure: our own errors pass through,
    /// anything else becomes [`PipeError::StepFailed`].
    pub(crate) fn from_step(stage: &str, err: BoxError) -> Self {
        match err.downcast::<PipeError>() {
            Ok(own) => *own,
            Err(source) => {
                tracing::debug!(stage, error = %source, "translating stage failure");
                PipeError::StepFailed {
                    stage: stage.to_string(),
                    source,
                }
            }
        }
    }
}
