//! In-memory backend for tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::error::BackendError;
use crate::voice::Voice;
use crate::Backend;

#[derive(Default)]
struct Calls {
    initialized: AtomicUsize,
    started: AtomicUsize,
    stopped: AtomicUsize,
    synthesized: AtomicUsize,
    start_failures_left: AtomicUsize,
}

/// Holds every synthesis call until the test lets it through.
struct Gate {
    entered: Sender<()>,
    release: Receiver<()>,
}

/// Test side of a [`ScriptedBackend::gated`] backend.
pub struct GateControl {
    pub entered: Receiver<()>,
    pub release: Sender<()>,
}

/// Backend template. Each `boxed()` call makes a new worker sharing the
/// same voice table and call counters.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    voices: Arc<Mutex<BTreeMap<String, Vec<String>>>>,
    calls: Arc<Calls>,
    fail_initialize: bool,
    fail_start: bool,
    gate: Option<Arc<Gate>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_voices(self, model: &str, voices: &[&str]) -> Self {
        self.voices.lock().insert(
            model.to_string(),
            voices.iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// The next `count` start calls, across all workers, fail.
    pub fn failing_first_starts(self, count: usize) -> Self {
        self.calls.start_failures_left.store(count, Ordering::SeqCst);
        self
    }

    /// Synthesis signals `entered` and then waits for one `release` message.
    pub fn gated(mut self) -> (Self, GateControl) {
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        self.gate = Some(Arc::new(Gate {
            entered: entered_tx,
            release: release_rx,
        }));
        let control = GateControl {
            entered: entered_rx,
            release: release_tx,
        };
        (self, control)
    }

    pub fn boxed(&self) -> Box<dyn Backend> {
        Box::new(ScriptedWorker {
            template: self.clone(),
            engine_id: String::new(),
            started: HashSet::new(),
        })
    }

    pub fn initialized(&self) -> usize {
        self.calls.initialized.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.calls.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.calls.stopped.load(Ordering::SeqCst)
    }

    pub fn synthesized(&self) -> usize {
        self.calls.synthesized.load(Ordering::SeqCst)
    }
}

struct ScriptedWorker {
    template: ScriptedBackend,
    engine_id: String,
    started: HashSet<String>,
}

impl Backend for ScriptedWorker {
    fn initialize(&mut self) -> Result<(), BackendError> {
        if self.template.fail_initialize {
            return Err(BackendError::Initialize {
                engine: "scripted".to_string(),
                message: "refused".to_string(),
            });
        }
        self.engine_id = "scripted".to_string();
        self.template.calls.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start(&mut self, model_id: &str) -> Result<(), BackendError> {
        let scripted_failure = self
            .template
            .calls
            .start_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if self.template.fail_start || scripted_failure {
            return Err(BackendError::Start {
                engine: self.engine_id.clone(),
                model: model_id.to_string(),
                message: "refused".to_string(),
            });
        }
        self.started.insert(model_id.to_string());
        self.template.calls.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self, model_id: &str) -> Result<(), BackendError> {
        self.started.remove(model_id);
        self.template.calls.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn list_voices(&self, model_id: &str) -> Result<Vec<Voice>, BackendError> {
        let voices = self.template.voices.lock();
        Ok(voices
            .get(model_id)
            .map(|ids| {
                ids.iter()
                    .map(|id| Voice::new(&self.engine_id, model_id, id.as_str(), id.as_str()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn synthesize(&mut self, voice: &Voice, text: &str) -> Result<Vec<u8>, BackendError> {
        if !self.started.contains(&voice.model_id) {
            return Err(BackendError::Synthesize {
                engine: voice.engine_id.clone(),
                model: voice.model_id.clone(),
                message: "model not started".to_string(),
            });
        }
        if let Some(gate) = &self.template.gate {
            let _ = gate.entered.send(());
            let _ = gate.release.recv();
        }
        self.template.calls.synthesized.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}|{text}", voice.fingerprint()).into_bytes())
    }
}
