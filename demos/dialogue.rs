use std::path::PathBuf;
use std::time::Instant;

use voicecast::{
    config::{CacheConfigBuilder, ServiceConfigBuilder},
    engines::EngineDescriptor,
    Backend, BackendError, SpeechService, SynthesisResult, Voice,
};

const SAMPLE_RATE: u32 = 24000;

/// Renders each line as a short tone whose pitch depends on the voice.
#[derive(Default)]
struct ToneBackend {
    started: bool,
}

impl Backend for ToneBackend {
    fn initialize(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn start(&mut self, _model_id: &str) -> Result<(), BackendError> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self, _model_id: &str) -> Result<(), BackendError> {
        self.started = false;
        Ok(())
    }

    fn list_voices(&self, model_id: &str) -> Result<Vec<Voice>, BackendError> {
        Ok(["low", "mid", "high"]
            .iter()
            .map(|id| Voice::new("tone", model_id, *id, format!("Tone {id}")))
            .collect())
    }

    fn synthesize(&mut self, voice: &Voice, text: &str) -> Result<Vec<u8>, BackendError> {
        if !self.started {
            return Err(BackendError::Synthesize {
                engine: voice.engine_id.clone(),
                model: voice.model_id.clone(),
                message: "model not started".to_string(),
            });
        }

        let freq = match voice.voice_id.as_str() {
            "low" => 180.0,
            "mid" => 260.0,
            _ => 340.0,
        };
        // Roughly 60ms of audio per character of text.
        let len = text.chars().count() * SAMPLE_RATE as usize * 6 / 100;
        let samples = (0..len)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                0.2 * (2.0 * std::f32::consts::PI * freq * t).sin()
            })
            .collect();

        SynthesisResult {
            samples,
            sample_rate: SAMPLE_RATE,
        }
        .to_wav_bytes()
        .map_err(|e| BackendError::Other(e.to_string()))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let root = PathBuf::from("target/voicecast-demo");
    let config = ServiceConfigBuilder::default()
        .profiles_dir(root.join("profiles"))
        .cache(CacheConfigBuilder::default().root(root.join("cache")).build()?)
        .build()?;

    let service = SpeechService::open(config)?;
    service.register_engine(
        EngineDescriptor::new("tone", "Tone generator")
            .with_model("sine", "Sine")
            .with_model("sine-hq", "Sine (HQ)"),
        || Box::new(ToneBackend::default()),
    )?;
    service.registry().set_enabled("tone", "sine", true)?;
    service.registry().set_enabled("tone", "sine-hq", true)?;

    let script = [
        ("Alice", "Did you hear that?"),
        ("Bob", "Hear what?"),
        ("Alice", "Exactly."),
        ("::narrator:tone:sine:low", "The room fell silent."),
    ];

    for pass in 1..=2 {
        let start = Instant::now();
        let mut bytes = 0;
        for (character, line) in script {
            let voice = service.resolve_voice("demo", character)?;
            let audio = service.synthesize("demo", character, line)?;
            bytes += audio.len();
            println!("  {character:<28} {voice}  {} bytes", audio.len());
        }
        println!("Pass {pass}: {bytes} bytes in {:.2?}", start.elapsed());
    }

    service.shutdown();
    Ok(())
}
