//! FLV recording (DVR)
//!
//! When `flv_dir` is configured, every publishing channel gets a recorder
//! consumer writing `<flv_dir>/<app>/<stream>_<unix>.flv` as the
//! canonical FLV byte stream for as long as the publisher lives.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::Result;
use crate::httpflv::writer::{FlvSink, FlvWriter};
use crate::registry::packet::StreamInfo;

/// Sink appending to the recording file
struct FileSink {
    file: fs::File,
}

#[async_trait]
impl FlvSink for FileSink {
    async fn send(&mut self, bytes: Bytes) -> Result<()> {
        self.file.write_all(&bytes).await?;
        Ok(())
    }

    async fn finish(&mut self) {
        let _ = self.file.flush().await;
    }
}

/// Open a recording file for a channel and spawn its writer.
pub async fn spawn_recorder(flv_dir: &Path, key: &str) -> Result<Arc<FlvWriter>> {
    let (app, stream) = key.split_once('/').unwrap_or((key, "stream"));
    let dir = flv_dir.join(app);
    fs::create_dir_all(&dir).await?;

    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let path = dir.join(format!("{}_{}.flv", stream, unix));
    let file = fs::File::create(&path).await?;
    info!(path = %path.display(), channel = %key, "recording");

    let info = StreamInfo::new(key, path.display().to_string()).interstitial();
    Ok(FlvWriter::spawn(info, FileSink { file }))
}
