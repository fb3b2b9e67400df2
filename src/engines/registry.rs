use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::pool::{PooledWorker, WorkerPool};
use super::{EngineDescriptor, ModelDescriptor};
use crate::error::{RegistryError, TtsError};
use crate::voice::Voice;
use crate::Backend;

struct ModelSlot {
    pool: Arc<WorkerPool>,
    enabled: AtomicBool,
    /// Serializes toggles so the flag and worker states change together.
    toggle: Mutex<()>,
    /// Voice list from the last capability query.
    voices: RwLock<Vec<Voice>>,
}

impl ModelSlot {
    /// Ask worker 0 for the model's voices and keep the answer.
    fn refresh_voices(&self) -> Result<Vec<Voice>, TtsError> {
        let pool = &self.pool;
        let Some(worker) = pool.workers().first() else {
            return Ok(Vec::new());
        };
        let voices: Vec<Voice> = worker
            .list_voices()?
            .into_iter()
            .map(|v| Voice::new(pool.engine_id(), pool.model_id(), v.voice_id, v.display_name))
            .collect();
        *self.voices.write() = voices.clone();
        Ok(voices)
    }
}

struct EngineEntry {
    descriptor: EngineDescriptor,
    models: BTreeMap<String, Arc<ModelSlot>>,
}

/// Registered engines and one worker pool per model.
pub struct EngineRegistry {
    engines: RwLock<BTreeMap<String, EngineEntry>>,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            engines: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register an engine, building and initializing every worker for every
    /// declared model.
    ///
    /// `instance_count` decides the pool size per model. If any worker fails
    /// to initialize, nothing is registered for this engine and the backend
    /// error is returned. Models start disabled. Each model's voice list is
    /// queried once here and again whenever the model is enabled.
    pub fn register_engine<F, N>(
        &self,
        descriptor: EngineDescriptor,
        factory: F,
        instance_count: N,
    ) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn Backend>,
        N: Fn(&ModelDescriptor) -> usize,
    {
        if self.engines.read().contains_key(&descriptor.id) {
            return Err(RegistryError::DuplicateEngine(descriptor.id));
        }

        let mut models = BTreeMap::new();
        for model in descriptor.models.values() {
            let count = instance_count(model);
            let pool = WorkerPool::build(&descriptor.id, &model.id, count, &factory)?;
            log::info!(
                "Registered {}:{} with {} worker(s)",
                descriptor.id,
                model.id,
                count
            );
            let slot = ModelSlot {
                pool: Arc::new(pool),
                enabled: AtomicBool::new(false),
                toggle: Mutex::new(()),
                voices: RwLock::new(Vec::new()),
            };
            if let Err(e) = slot.refresh_voices() {
                log::warn!("Could not list voices of {}:{}: {e}", descriptor.id, model.id);
            }
            models.insert(model.id.clone(), Arc::new(slot));
        }

        let mut engines = self.engines.write();
        if engines.contains_key(&descriptor.id) {
            return Err(RegistryError::DuplicateEngine(descriptor.id));
        }
        engines.insert(
            descriptor.id.clone(),
            EngineEntry { descriptor, models },
        );
        Ok(())
    }

    fn slot(&self, engine_id: &str, model_id: &str) -> Option<Arc<ModelSlot>> {
        self.engines
            .read()
            .get(engine_id)
            .and_then(|entry| entry.models.get(model_id))
            .cloned()
    }

    fn pool_unavailable(engine_id: &str, model_id: &str) -> TtsError {
        TtsError::PoolUnavailable {
            engine: engine_id.to_string(),
            model: model_id.to_string(),
        }
    }

    /// Enable or disable a model, starting or stopping every worker in its
    /// pool. Individual start/stop failures are logged and the workers stay
    /// in the pool. Enabling an enabled model retries workers that are not
    /// started yet and refreshes the voice list.
    ///
    /// Stopping waits for a worker's in-flight synthesis to finish.
    pub fn set_enabled(&self, engine_id: &str, model_id: &str, enabled: bool) -> Result<(), TtsError> {
        let slot = self
            .slot(engine_id, model_id)
            .ok_or_else(|| Self::pool_unavailable(engine_id, model_id))?;

        let _toggle = slot.toggle.lock();
        let was_enabled = slot.enabled.load(Ordering::SeqCst);
        if enabled {
            slot.pool.start_all();
            if let Err(e) = slot.refresh_voices() {
                log::warn!("Could not list voices of {engine_id}:{model_id}: {e}");
            }
            slot.enabled.store(true, Ordering::SeqCst);
        } else if was_enabled {
            slot.enabled.store(false, Ordering::SeqCst);
            slot.pool.stop_all();
        }

        if was_enabled != enabled {
            log::info!(
                "{} {engine_id}:{model_id}",
                if enabled { "Enabled" } else { "Disabled" }
            );
        }
        Ok(())
    }

    /// Query a model's voices again, whether or not it is enabled.
    pub fn refresh_voices(&self, engine_id: &str, model_id: &str) -> Result<Vec<Voice>, TtsError> {
        self.slot(engine_id, model_id)
            .ok_or_else(|| Self::pool_unavailable(engine_id, model_id))?
            .refresh_voices()
    }

    /// Whether a model is enabled. Unknown models are reported as disabled.
    pub fn is_enabled(&self, engine_id: &str, model_id: &str) -> bool {
        self.slot(engine_id, model_id)
            .map(|slot| slot.enabled.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Block until a worker for `(engine, model)` is idle.
    ///
    /// Returns `None` immediately for an unknown engine or model. The registry
    /// lock is not held while waiting.
    pub fn borrow(&self, engine_id: &str, model_id: &str) -> Option<PooledWorker> {
        let slot = self.slot(engine_id, model_id)?;
        slot.pool.borrow()
    }

    /// Non-blocking [`borrow`](Self::borrow).
    pub fn try_borrow(&self, engine_id: &str, model_id: &str) -> Option<PooledWorker> {
        self.slot(engine_id, model_id)?.pool.try_borrow()
    }

    /// [`borrow`](Self::borrow) with an upper bound on the wait.
    pub fn borrow_timeout(
        &self,
        engine_id: &str,
        model_id: &str,
        timeout: Duration,
    ) -> Option<PooledWorker> {
        self.slot(engine_id, model_id)?.pool.borrow_timeout(timeout)
    }

    /// Idle workers for a model, `None` if unknown.
    pub fn idle_count(&self, engine_id: &str, model_id: &str) -> Option<usize> {
        self.slot(engine_id, model_id)
            .map(|slot| slot.pool.idle_count())
    }

    /// Catalog of enabled models. Engines with nothing enabled are omitted.
    pub fn list_engines(&self) -> Vec<EngineDescriptor> {
        let engines = self.engines.read();
        engines
            .values()
            .filter_map(|entry| {
                let mut descriptor = entry.descriptor.clone();
                descriptor.models.retain(|id, _| {
                    entry
                        .models
                        .get(id)
                        .is_some_and(|slot| slot.enabled.load(Ordering::SeqCst))
                });
                (!descriptor.models.is_empty()).then_some(descriptor)
            })
            .collect()
    }

    /// Every registered engine and model, enabled or not.
    pub fn list_all_engines(&self) -> Vec<EngineDescriptor> {
        self.engines
            .read()
            .values()
            .map(|entry| entry.descriptor.clone())
            .collect()
    }

    /// Voices of an enabled model. A disabled model lists no voices.
    pub fn list_voices(&self, engine_id: &str, model_id: &str) -> Result<Vec<Voice>, TtsError> {
        let slot = self
            .slot(engine_id, model_id)
            .ok_or_else(|| Self::pool_unavailable(engine_id, model_id))?;
        if !slot.enabled.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        let voices = slot.voices.read().clone();
        Ok(voices)
    }

    /// Voices of a model regardless of its enable state. Served from the
    /// stored list, so it never waits for a busy worker.
    pub fn model_voices(&self, engine_id: &str, model_id: &str) -> Result<Vec<Voice>, TtsError> {
        let slot = self
            .slot(engine_id, model_id)
            .ok_or_else(|| Self::pool_unavailable(engine_id, model_id))?;
        let voices = slot.voices.read().clone();
        Ok(voices)
    }

    /// Stop and free every worker of an engine and drop it from the registry.
    /// Returns false if the engine was not registered.
    pub fn unregister_engine(&self, engine_id: &str) -> bool {
        let Some(entry) = self.engines.write().remove(engine_id) else {
            return false;
        };
        for slot in entry.models.values() {
            slot.pool.free_all();
        }
        log::info!("Unregistered engine {engine_id}");
        true
    }

    /// Free every worker of every engine.
    pub fn shutdown(&self) {
        let engines = std::mem::take(&mut *self.engines.write());
        for (engine_id, entry) in engines {
            for slot in entry.models.values() {
                slot.pool.free_all();
            }
            log::debug!("Freed workers of {engine_id}");
        }
    }
}
