//! # voicecast
//!
//! Turns scripted dialogue lines into speech by casting each character to a
//! voice, reusing audio that was already generated for that voice, and
//! sharing a bounded set of backend workers between concurrent requests.
//!
//! ## Pieces
//!
//! - [`EngineRegistry`]: engines, their models, and a fixed worker pool per model
//! - [`VoiceAllocator`]: deterministic, persisted character → voice casting
//! - [`AudioCache`]: per-character audio keyed by line text, invalidated on voice change
//! - [`ProfileStore`]: durable profiles holding the character bindings
//! - [`SpeechService`]: the request path tying them together
//!
//! ## Quick Start
//!
//! ```ignore
//! use voicecast::{engines::EngineDescriptor, ServiceConfig, SpeechService};
//!
//! let service = SpeechService::open(ServiceConfig::default())?;
//! service.register_engine(
//!     EngineDescriptor::new("piper", "Piper").with_model("lessac", "Lessac"),
//!     || Box::new(PiperBackend::default()),
//! )?;
//! service.registry().set_enabled("piper", "lessac", true)?;
//!
//! let audio = service.synthesize("default", "Alice", "Hello, world!")?;
//! std::fs::write("alice.wav", audio)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod allocator;
pub mod cache;
pub mod config;
pub mod engines;
pub mod error;
pub mod profile;
pub mod service;
pub mod voice;

#[cfg(test)]
pub(crate) mod test_support;

use std::io::Cursor;

pub use allocator::VoiceAllocator;
pub use cache::AudioCache;
pub use config::{CacheConfig, RegistryConfig, ServiceConfig};
pub use engines::EngineRegistry;
pub use error::{AllocationError, BackendError, CacheError, ProfileError, TtsError};
pub use profile::{Profile, ProfileSettings, ProfileStore};
pub use service::SpeechService;
pub use voice::Voice;

/// Raw f32 samples produced by a sample-level synthesizer.
///
/// Backends that render samples can use [`SynthesisResult::to_wav_bytes`]
/// to produce the byte payload [`Backend::synthesize`] returns.
#[derive(Debug)]
pub struct SynthesisResult {
    /// Raw audio samples as f32 values
    pub samples: Vec<f32>,
    /// Sample rate of the audio
    pub sample_rate: u32,
}

impl SynthesisResult {
    /// Encode as a mono 32-bit float WAV file in memory.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>, hound::Error> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut buffer, spec)?;
            for &sample in &self.samples {
                writer.write_sample(sample)?;
            }
            writer.finalize()?;
        }
        Ok(buffer.into_inner())
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Common interface for text-to-speech backends.
///
/// One value is one worker: the registry creates several per model and
/// never calls into the same value from two threads at once. Network
/// clients, local processes and native runtimes all sit behind this trait.
pub trait Backend: Send {
    /// One-time setup, run when the worker is created.
    fn initialize(&mut self) -> Result<(), BackendError>;

    /// Make `model_id` ready for synthesis.
    fn start(&mut self, model_id: &str) -> Result<(), BackendError>;

    /// Release whatever `start` acquired.
    fn stop(&mut self, model_id: &str) -> Result<(), BackendError>;

    /// Voices offered by `model_id`.
    fn list_voices(&self, model_id: &str) -> Result<Vec<Voice>, BackendError>;

    /// Synthesize `text` with `voice`, returning the backend's native audio
    /// payload. A stopped model should fail here rather than panic.
    fn synthesize(&mut self, voice: &Voice, text: &str) -> Result<Vec<u8>, BackendError>;
}
