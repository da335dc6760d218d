//! Audio output.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::info;

use crate::error::Result;

/// Renders encoded audio.
///
/// `play` resolves when the audio has finished. Dropping the future must
/// stop output; that is how a newer narration supersedes an older one.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Render `audio`.
    ///
    /// # Errors
    ///
    /// Returns an error if the output device or file cannot be written.
    async fn play(&self, audio: Bytes) -> Result<()>;
}

/// Writes each utterance to `utterance-NNNN.wav` in a directory.
#[derive(Debug)]
pub struct WavFileSink {
    dir: PathBuf,
    counter: AtomicU64,
}

impl WavFileSink {
    /// Sink writing into `dir`, created if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            counter: AtomicU64::new(0),
        })
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl AudioSink for WavFileSink {
    async fn play(&self, audio: Bytes) -> Result<()> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let path = self.dir.join(format!("utterance-{n:04}.wav"));
        tokio::fs::write(&path, &audio).await?;
        info!("wrote {} bytes of audio to {}", audio.len(), path.display());
        Ok(())
    }
}
