use crate::error::{FitcamError, Result};
use crate::pipeline::CapturedData;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Downstream consumer of finished capture records
#[async_trait]
pub trait CaptureSink: Send + Sync {
    async fn deliver(&self, data: &CapturedData) -> Result<()>;
}

/// Writes each record as pretty JSON named after its timestamp
pub struct JsonFileSink {
    directory: PathBuf,
}

impl JsonFileSink {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    pub async fn write(&self, data: &CapturedData) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(data).map_err(|e| {
            FitcamError::component("capture_sink", format!("Failed to serialize capture: {}", e))
        })?;

        fs::create_dir_all(&self.directory).await.map_err(|e| {
            FitcamError::component(
                "capture_sink",
                format!("Failed to create output directory: {}", e),
            )
        })?;

        let name = data.timestamp().format("%Y%m%d_%H%M%S_%3f");
        let path = self.directory.join(format!("{}.json", name));
        fs::write(&path, json).await.map_err(|e| {
            FitcamError::component(
                "capture_sink",
                format!("Failed to write capture file: {}", e),
            )
        })?;

        debug!("Saved capture to {}", path.display());
        Ok(path)
    }
}

#[async_trait]
impl CaptureSink for JsonFileSink {
    async fn deliver(&self, data: &CapturedData) -> Result<()> {
        let path = self.write(data).await?;
        info!("Capture record written to {}", path.display());
        Ok(())
    }
}

/// Hands records to an embedding application over a channel
pub struct ChannelSink {
    sender: mpsc::Sender<CapturedData>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<CapturedData>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl CaptureSink for ChannelSink {
    async fn deliver(&self, data: &CapturedData) -> Result<()> {
        self.sender
            .send(data.clone())
            .await
            .map_err(|_| FitcamError::component("capture_sink", "Capture receiver dropped"))
    }
}

/// Logs a summary and keeps nothing
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl CaptureSink for LogSink {
    async fn deliver(&self, data: &CapturedData) -> Result<()> {
        let m = data.measurements();
        info!(
            "Captured PD {:.1} mm (L {:.1} / R {:.1}), face {:.0}x{:.0} mm, shape {}",
            m.pd,
            m.pd_left,
            m.pd_right,
            m.face_width,
            m.face_height,
            data.face_shape().unwrap_or("unknown")
        );
        Ok(())
    }
}
