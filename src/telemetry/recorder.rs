//! JSONL telemetry recorder with file rotation
//!
//! Every frame becomes one JSON object per line. A new file is started after
//! `max_records_per_file` records; only the newest `max_files_to_keep` files
//! written by this recorder are kept.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::RecorderConfig;
use crate::error::{RelayError, Result};
use crate::mavlink::protocol::{FrameHeader, MavlinkVersion};
use crate::session::TelemetryFrame;
use crate::sinks::FrameSink;

/// MAVLink header fields of a recorded frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MavlinkFields {
    pub version: MavlinkVersion,
    pub sequence: u8,
    pub system_id: u8,
    pub component_id: u8,
    pub message_id: u32,
}

/// One line of a recording
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameRecord {
    pub timestamp: DateTime<Utc>,
    pub session: String,
    pub seq: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mavlink: Option<MavlinkFields>,
    pub len: usize,
    pub payload_hex: String,
}

impl FrameRecord {
    pub fn new(frame: &TelemetryFrame, timestamp: DateTime<Utc>) -> Self {
        let payload = frame.payload();
        let mavlink = FrameHeader::parse(payload).map(|header| MavlinkFields {
            version: header.version,
            sequence: header.sequence,
            system_id: header.system_id,
            component_id: header.component_id,
            message_id: header.message_id,
        });

        Self {
            timestamp,
            session: frame.session().to_string(),
            seq: frame.sequence(),
            mavlink,
            len: payload.len(),
            payload_hex: hex(payload),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

pub struct JsonlRecorder {
    name: String,
    dir: PathBuf,
    max_records: usize,
    max_files: usize,
    current: Option<File>,
    records_in_file: usize,
    files: VecDeque<PathBuf>,
    files_created: u64,
}

impl JsonlRecorder {
    /// The directory is created on the first delivery
    pub fn new(name: impl Into<String>, config: &RecorderConfig) -> Self {
        Self {
            name: name.into(),
            dir: PathBuf::from(&config.log_dir),
            max_records: config.max_records_per_file.max(1),
            max_files: config.max_files_to_keep.max(1),
            current: None,
            records_in_file: 0,
            files: VecDeque::new(),
            files_created: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files written so far that have not been pruned, oldest first
    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.iter()
    }

    async fn rotate(&mut self) -> Result<File> {
        fs::create_dir_all(&self.dir).await?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
        let path = self
            .dir
            .join(format!("telemetry_{}_{:04}.jsonl", stamp, self.files_created));
        let file = File::create(&path).await?;

        self.files_created += 1;
        self.records_in_file = 0;
        info!("Recording telemetry to {}", path.display());
        self.files.push_back(path);

        while self.files.len() > self.max_files {
            if let Some(old) = self.files.pop_front() {
                match fs::remove_file(&old).await {
                    Ok(()) => debug!("Removed old recording {}", old.display()),
                    Err(e) => warn!("Failed to remove old recording {}: {}", old.display(), e),
                }
            }
        }

        Ok(file)
    }
}

#[async_trait]
impl FrameSink for JsonlRecorder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&mut self, frame: TelemetryFrame) -> Result<()> {
        let record = FrameRecord::new(&frame, Utc::now());
        let mut line = serde_json::to_vec(&record).map_err(|e| RelayError::Sink {
            name: self.name.clone(),
            reason: e.to_string(),
        })?;
        line.push(b'\n');

        if self.records_in_file >= self.max_records {
            self.current = None;
        }
        let file = match self.current.take() {
            Some(file) => file,
            None => self.rotate().await?,
        };

        let file = self.current.insert(file);
        file.write_all(&line).await?;
        file.flush().await?;
        self.records_in_file += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mavlink::encoder::{encode_v2, FrameAddress};
    use crate::session::SessionId;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn config(dir: &TempDir, max_records: usize, max_files: usize) -> RecorderConfig {
        RecorderConfig {
            enabled: true,
            log_dir: dir.path().to_string_lossy().into_owned(),
            max_records_per_file: max_records,
            max_files_to_keep: max_files,
        }
    }

    fn heartbeat(seq: u64) -> TelemetryFrame {
        let payload = [0, 0, 0, 0, 2, 3, 0x81, 4, 3];
        let raw = encode_v2(FrameAddress::new(seq as u8, 1, 1), 0, &payload).unwrap();
        TelemetryFrame::new(SessionId::from_raw(0xabc), seq, Bytes::from(raw))
    }

    async fn lines(path: &Path) -> Vec<serde_json::Value> {
        let contents = fs::read_to_string(path).await.unwrap();
        contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_record_fields() {
        let record = FrameRecord::new(&heartbeat(5), Utc::now());
        assert_eq!(record.session, "0000000000000abc");
        assert_eq!(record.seq, 5);

        let mavlink = record.mavlink.unwrap();
        assert_eq!(mavlink.version, MavlinkVersion::V2);
        assert_eq!(mavlink.system_id, 1);
        assert_eq!(mavlink.message_id, 0);
        assert!(record.payload_hex.starts_with("fd09"));
        assert_eq!(record.payload_hex.len(), record.len * 2);
    }

    #[test]
    fn test_record_without_mavlink_header() {
        let frame = TelemetryFrame::new(SessionId::from_raw(1), 0, Bytes::from_static(&[0x01, 0x02]));
        let record = FrameRecord::new(&frame, Utc::now());
        assert!(record.mavlink.is_none());
        assert_eq!(record.payload_hex, "0102");
    }

    #[tokio::test]
    async fn test_writes_one_line_per_frame() {
        let dir = TempDir::new().unwrap();
        let mut recorder = JsonlRecorder::new("recorder", &config(&dir, 100, 5));

        for seq in 0..3 {
            recorder.deliver(heartbeat(seq)).await.unwrap();
        }

        let files: Vec<PathBuf> = recorder.files().cloned().collect();
        assert_eq!(files.len(), 1);

        let records = lines(&files[0]).await;
        assert_eq!(records.len(), 3);
        assert_eq!(records[2]["seq"], 2);
        assert_eq!(records[0]["session"], "0000000000000abc");
        assert_eq!(records[0]["mavlink"]["message_id"], 0);
    }

    #[tokio::test]
    async fn test_rotation_and_retention() {
        let dir = TempDir::new().unwrap();
        let mut recorder = JsonlRecorder::new("recorder", &config(&dir, 3, 2));

        for seq in 0..7 {
            recorder.deliver(heartbeat(seq)).await.unwrap();
        }

        let kept: Vec<PathBuf> = recorder.files().cloned().collect();
        assert_eq!(kept.len(), 2);

        let mut on_disk = Vec::new();
        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            on_disk.push(entry.path());
        }
        assert_eq!(on_disk.len(), 2);

        // Newest file holds the seventh record only
        let newest = lines(&kept[1]).await;
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0]["seq"], 6);
        assert_eq!(lines(&kept[0]).await.len(), 3);
    }

    #[tokio::test]
    async fn test_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir, 10, 2);
        cfg.log_dir = dir.path().join("nested/logs").to_string_lossy().into_owned();

        let mut recorder = JsonlRecorder::new("recorder", &cfg);
        recorder.deliver(heartbeat(0)).await.unwrap();
        assert!(recorder.dir().is_dir());
    }
}
