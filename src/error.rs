//! Error types, one enum per concern.
//!
//! [`TtsError`] is what the request path reports. Cache failures have their
//! own type but are never turned into a `TtsError`: a broken cache degrades
//! to "always synthesize".

/// Failure to pick a voice for a character.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("No engines with enabled models are available")]
    NoEnginesAvailable,
    #[error("Engine '{engine}' has no enabled models")]
    NoModelsAvailable { engine: String },
    #[error("Model '{engine}:{model}' has no voices")]
    NoVoicesAvailable { engine: String, model: String },
    #[error("Invalid voice override {0:?}. Expected '::<name>:<engine>:<model>:<voice>'")]
    InvalidOverride(String),
}

/// Failure reported by, or about, a synthesis backend worker.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to initialize '{engine}' worker: {message}")]
    Initialize { engine: String, message: String },
    #[error("Failed to start '{engine}:{model}': {message}")]
    Start {
        engine: String,
        model: String,
        message: String,
    },
    #[error("Failed to stop '{engine}:{model}': {message}")]
    Stop {
        engine: String,
        model: String,
        message: String,
    },
    #[error("Failed to list voices for '{engine}:{model}': {message}")]
    ListVoices {
        engine: String,
        model: String,
        message: String,
    },
    #[error("Synthesis with '{engine}:{model}' failed: {message}")]
    Synthesize {
        engine: String,
        model: String,
        message: String,
    },
    #[error("Worker has been freed")]
    WorkerFreed,
    #[error("{0}")]
    Other(String),
}

/// Profile storage failure.
#[derive(thiserror::Error, Debug)]
pub enum ProfileError {
    #[error("Profile I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid profile JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid profile id {0:?}. Use letters, digits, '-' and '_' only.")]
    InvalidId(String),
    #[error("Profile '{0}' not found")]
    NotFound(String),
    #[error("Profile '{0}' already exists")]
    AlreadyExists(String),
    #[error("The default profile cannot be deleted")]
    DefaultProfileProtected,
}

/// Audio cache failure. Callers treat these as a miss or a skipped write.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid cache index JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid profile id {0:?}")]
    InvalidProfileId(String),
}

/// Engine registration failure.
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("Engine '{0}' is already registered")]
    DuplicateEngine(String),
    #[error("Model '{engine}:{model}' was configured with zero instances")]
    NoInstances { engine: String, model: String },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Configuration loading failure.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Error surfaced to the caller of a synthesis request.
#[derive(thiserror::Error, Debug)]
pub enum TtsError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error("No worker pool for '{engine}:{model}'")]
    PoolUnavailable { engine: String, model: String },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
