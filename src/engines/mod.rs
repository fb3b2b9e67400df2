//! Synthesis engines and their worker pools.
//!
//! An engine is registered once with a [`EngineDescriptor`] listing its
//! models and a factory producing [`Backend`](crate::Backend) instances.
//! The [`EngineRegistry`] builds a fixed-size [`WorkerPool`] per model,
//! initializes every worker up front, and hands workers out through
//! [`PooledWorker`] guards.
//!
//! Models start disabled. Enabling a model starts every worker in its pool;
//! disabling stops them. Disabled models are hidden from catalog listings
//! but remain borrowable by id.
//!
//! ```rust,ignore
//! let registry = EngineRegistry::new();
//! registry.register_engine(
//!     EngineDescriptor::new("piper", "Piper").with_model("lessac", "Lessac (en-US)"),
//!     || Box::new(PiperBackend::default()),
//!     |_| 2,
//! )?;
//! registry.set_enabled("piper", "lessac", true)?;
//!
//! let worker = registry.borrow("piper", "lessac").expect("registered");
//! let audio = worker.synthesize(&voice, "Hello there.")?;
//! // worker returns to the pool on drop
//! ```

pub mod pool;
pub mod registry;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use pool::{PooledWorker, Worker, WorkerPool, WorkerState};
pub use registry::EngineRegistry;

/// A synthesis configuration offered by an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub engine_id: String,
}

impl ModelDescriptor {
    pub fn new(engine_id: impl Into<String>, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            engine_id: engine_id.into(),
        }
    }
}

/// Catalog entry for an engine and the models it declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineDescriptor {
    pub id: String,
    pub name: String,
    pub models: BTreeMap<String, ModelDescriptor>,
}

impl EngineDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            models: BTreeMap::new(),
        }
    }

    /// Add a model, keyed by its id.
    pub fn with_model(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        let model = ModelDescriptor::new(self.id.clone(), id, name);
        self.models.insert(model.id.clone(), model);
        self
    }
}
