//! Per-session write-ahead log.
//!
//! One append-only file per session, length-prefixed bincode records. An
//! append is durable (written and fsynced) before the caller is
//! acknowledged; the projection into the session snapshot happens after.
//! Replay tolerates a truncated trailing record, the signature of a crash
//! mid-append.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::{CustodyError, Result};
use crate::metrics::{inc, METRICS};
use crate::protocol::EngineInit;
use crate::types::{ProtocolMessage, Session, SessionId, SessionResult};

/// One logged round event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RoundEvent {
    /// Session creation, with everything needed to rebuild its engine
    /// deterministically.
    Created { session: Session, init: EngineInit },
    /// An inbound protocol message accepted for delivery to the engine.
    MessageIn { message: ProtocolMessage },
    /// The engine moved past a round.
    RoundAdvanced { round: u32 },
    Completed { result: SessionResult },
    Failed { reason: String },
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalRecord {
    /// Per-session monotone sequence.
    pub sequence: u64,
    pub event: RoundEvent,
    pub recorded_at: DateTime<Utc>,
}

pub struct WriteAheadLog {
    dir: PathBuf,
}

impl WriteAheadLog {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(WriteAheadLog { dir })
    }

    fn path(&self, session_id: SessionId) -> PathBuf {
        self.dir.join(format!("{session_id}.wal"))
    }

    /// Append one record; returns only after the bytes are durable.
    pub async fn append(&self, session_id: SessionId, record: &WalRecord) -> Result<()> {
        let payload = bincode::serialize(record)
            .map_err(|e| CustodyError::internal(format!("encode WAL record: {e}")))?;
        let mut frame = Vec::with_capacity(payload.len() + 4);
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(session_id))
            .await?;
        file.write_all(&frame).await?;
        file.sync_all().await?;
        inc(&METRICS.wal_appends);
        Ok(())
    }

    /// Read every complete record of a session, oldest first.
    pub async fn replay(&self, session_id: SessionId) -> Result<Vec<WalRecord>> {
        let bytes = match tokio::fs::read(self.path(session_id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CustodyError::not_found(format!("no WAL for session {session_id}")))
            }
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        let mut offset = 0usize;
        while offset + 4 <= bytes.len() {
            let len = u32::from_be_bytes(
                bytes[offset..offset + 4].try_into().expect("4-byte slice"),
            ) as usize;
            if offset + 4 + len > bytes.len() {
                warn!(session = %session_id, "truncated trailing WAL record ignored");
                break;
            }
            let record: WalRecord = bincode::deserialize(&bytes[offset + 4..offset + 4 + len])
                .map_err(|e| CustodyError::internal(format!("corrupt WAL record: {e}")))?;
            records.push(record);
            offset += 4 + len;
        }
        Ok(records)
    }

    /// Ids of every session with a log file.
    pub async fn sessions(&self) -> Result<Vec<SessionId>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".wal") {
                if let Ok(uuid) = stem.parse::<uuid::Uuid>() {
                    ids.push(SessionId(uuid));
                }
            }
        }
        Ok(ids)
    }

    pub async fn remove(&self, session_id: SessionId) -> Result<()> {
        match tokio::fs::remove_file(self.path(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PartyIndex;

    fn record(sequence: u64) -> WalRecord {
        WalRecord {
            sequence,
            event: RoundEvent::MessageIn {
                message: ProtocolMessage {
                    session_id: SessionId::fresh(),
                    round: 1,
                    from: PartyIndex(1),
                    to: None,
                    sequence: sequence as u32,
                    payload: vec![1, 2, 3],
                    assertion: None,
                },
            },
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn append_and_replay_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path()).await.unwrap();
        let id = SessionId::fresh();

        for seq in 0..3 {
            wal.append(id, &record(seq)).await.unwrap();
        }
        let records = wal.replay(id).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].sequence, 2);
        assert_eq!(wal.sessions().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn truncated_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path()).await.unwrap();
        let id = SessionId::fresh();
        wal.append(id, &record(0)).await.unwrap();
        wal.append(id, &record(1)).await.unwrap();

        // Chop bytes off the final record to simulate a crash mid-append.
        let path = dir.path().join(format!("{id}.wal"));
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();

        let records = wal.replay(id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, 0);
    }

    #[tokio::test]
    async fn missing_session_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path()).await.unwrap();
        assert!(matches!(
            wal.replay(SessionId::fresh()).await,
            Err(CustodyError::NotFound(_))
        ));
    }
}
