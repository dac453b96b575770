use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use murmur_app::{AudioChunkStream, TextInjector, TranscriptionManager, TranscriptionPhase};
use murmur_foundation::{ConnectionStateHub, TranscriptionError};
use murmur_stt::{ProviderConfig, StreamingAdapter};
use murmur_stt_deepgram::DeepgramAdapter;
use murmur_stt_openai::OpenAiRealtimeAdapter;

/// Stream a WAV file through a transcription provider as if it were live
/// microphone capture.
#[derive(Parser, Debug)]
#[command(name = "murmur", version, about)]
struct Cli {
    /// Provider wire protocol: "openai" or "deepgram".
    #[arg(long, default_value = "deepgram")]
    provider: String,

    #[arg(long, default_value = "nova-3")]
    model: String,

    #[arg(long, env = "MURMUR_API_KEY", hide_env_values = true)]
    api_key: String,

    /// BCP-47 language hint (provider default when omitted).
    #[arg(long)]
    language: Option<String>,

    /// PCM16 mono WAV file to stream.
    input: PathBuf,
}

/// Replays a WAV file as paced PCM16 chunks.
struct WavChunkStream {
    chunks: VecDeque<Vec<u8>>,
    pace: Duration,
}

impl WavChunkStream {
    fn open(path: &PathBuf) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        let spec = reader.spec();
        if spec.channels != 1 || spec.bits_per_sample != 16 {
            bail!(
                "expected PCM16 mono input, got {} channel(s) at {} bits",
                spec.channels,
                spec.bits_per_sample
            );
        }
        let samples: Vec<i16> = reader.samples::<i16>().collect::<Result<_, _>>()?;
        // 100 ms of audio per chunk.
        let chunk_samples = spec.sample_rate as usize / 10;
        let chunks = samples
            .chunks(chunk_samples.max(1))
            .map(|chunk| chunk.iter().flat_map(|s| s.to_le_bytes()).collect())
            .collect();
        Ok(Self {
            chunks,
            pace: Duration::from_millis(20),
        })
    }
}

#[async_trait]
impl AudioChunkStream for WavChunkStream {
    async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        let chunk = self.chunks.pop_front()?;
        tokio::time::sleep(self.pace).await;
        Some(chunk)
    }
}

/// Injection target for the CLI: finalized text goes to stdout.
struct StdoutInjector;

#[async_trait]
impl TextInjector for StdoutInjector {
    async fn inject(&self, text: &str) -> Result<(), TranscriptionError> {
        println!("{}", text);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    // One hub for the whole process: the manager and the adapter's reconnect
    // reporting publish to the same subscribers.
    let hub = ConnectionStateHub::new();
    let adapter: Arc<dyn StreamingAdapter> = match cli.provider.as_str() {
        "openai" => Arc::new(OpenAiRealtimeAdapter::new()),
        "deepgram" => Arc::new(DeepgramAdapter::new().with_state_hub(hub.clone())),
        other => bail!("unknown provider: {}", other),
    };

    let mut config = ProviderConfig::new(cli.api_key, cli.model);
    if let Some(language) = cli.language {
        config = config.with_language(language);
    }

    let manager = TranscriptionManager::builder(adapter, Arc::new(StdoutInjector))
        .connection_hub(hub)
        .on_completion(|summary| {
            tracing::info!(
                target: "stt",
                provider = summary.provider,
                model = %summary.model,
                success = summary.success,
                audio_ms = summary.audio_duration_ms,
                processing_ms = summary.processing_time_ms,
                "Recording finished"
            );
        })
        .build();

    let stream = WavChunkStream::open(&cli.input)?;
    manager
        .start_transcription(Box::new(stream), config)
        .await?;

    let mut shown = String::new();
    while manager.is_transcribing() {
        let text = manager.current_text();
        if text != shown {
            eprint!("\r{}", text);
            shown = text;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    eprintln!();

    match manager.phase() {
        TranscriptionPhase::Completed => Ok(()),
        TranscriptionPhase::Failed(e) => bail!("transcription failed: {}", e),
        other => bail!("unexpected end state: {:?}", other),
    }
}
