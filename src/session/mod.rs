//! Session lifecycle management.
//!
//! Owns every local `Session`, serialises mutations per session id, appends
//! to the write-ahead log before projecting any state change, enforces
//! terminal-state immutability and absolute deadlines, and rebuilds
//! non-terminal sessions from the WAL on startup.

pub mod wal;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{CustodyError, Result};
use crate::metrics::{inc, METRICS};
use crate::protocol::EngineInit;
use crate::types::{ProtocolMessage, Session, SessionId, SessionResult, SessionStatus};

use wal::{RoundEvent, WalRecord, WriteAheadLog};

struct SessionEntry {
    session: Session,
    next_wal_sequence: u64,
    round_started: Instant,
}

/// A non-terminal session reconstructed from the WAL at startup. The engine
/// is rebuilt from `init` and fed `inbound` in order, which reproduces the
/// pre-crash engine state byte for byte.
pub struct RecoveredSession {
    pub session: Session,
    pub init: EngineInit,
    pub inbound: Vec<ProtocolMessage>,
}

pub struct SessionManager {
    wal: WriteAheadLog,
    sessions: Mutex<HashMap<SessionId, Arc<Mutex<SessionEntry>>>>,
}

impl SessionManager {
    pub async fn open(wal_dir: impl AsRef<Path>) -> Result<Self> {
        Ok(SessionManager {
            wal: WriteAheadLog::open(wal_dir).await?,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Create and persist a new session in `Pending`.
    pub async fn create(&self, session: Session, init: &EngineInit) -> Result<()> {
        let id = session.session_id;
        {
            let sessions = self.sessions.lock().await;
            if sessions.contains_key(&id) {
                return Err(CustodyError::invalid(format!("session {id} already exists")));
            }
        }

        self.wal
            .append(
                id,
                &WalRecord {
                    sequence: 0,
                    event: RoundEvent::Created { session: session.clone(), init: init.clone() },
                    recorded_at: Utc::now(),
                },
            )
            .await?;

        let entry = SessionEntry { session, next_wal_sequence: 1, round_started: Instant::now() };
        self.sessions.lock().await.insert(id, Arc::new(Mutex::new(entry)));
        inc(&METRICS.sessions_created);
        info!(session = %id, "session created");
        Ok(())
    }

    async fn entry(&self, id: SessionId) -> Result<Arc<Mutex<SessionEntry>>> {
        self.sessions
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CustodyError::not_found(format!("session {id}")))
    }

    async fn append_event(&self, entry: &mut SessionEntry, event: RoundEvent) -> Result<()> {
        let record = WalRecord {
            sequence: entry.next_wal_sequence,
            event,
            recorded_at: Utc::now(),
        };
        // Durable before any projection.
        self.wal.append(entry.session.session_id, &record).await?;
        entry.next_wal_sequence += 1;
        Ok(())
    }

    fn reject_terminal(entry: &SessionEntry) -> Result<()> {
        if entry.session.status.is_terminal() {
            return Err(CustodyError::invalid(format!(
                "session {} is terminal",
                entry.session.session_id
            )));
        }
        Ok(())
    }

    /// Record an accepted inbound message. Not acknowledged until durable.
    pub async fn record_inbound(&self, id: SessionId, message: &ProtocolMessage) -> Result<()> {
        let entry = self.entry(id).await?;
        let mut entry = entry.lock().await;
        Self::reject_terminal(&entry)?;
        self.append_event(&mut entry, RoundEvent::MessageIn { message: message.clone() })
            .await?;
        if entry.session.status == SessionStatus::Pending {
            entry.session.status = SessionStatus::Running;
        }
        Ok(())
    }

    /// Record that the engine moved past `round` and observe its duration.
    pub async fn advance_round(&self, id: SessionId, round: u32) -> Result<()> {
        let entry = self.entry(id).await?;
        let mut entry = entry.lock().await;
        Self::reject_terminal(&entry)?;
        if round > entry.session.total_rounds {
            return Err(CustodyError::internal(format!(
                "session {id} advanced past its declared total rounds"
            )));
        }
        self.append_event(&mut entry, RoundEvent::RoundAdvanced { round }).await?;
        METRICS.round_duration.observe(entry.round_started.elapsed());
        entry.round_started = Instant::now();
        entry.session.round = round;
        entry.session.status = SessionStatus::Running;
        Ok(())
    }

    pub async fn complete(&self, id: SessionId, result: SessionResult) -> Result<()> {
        let entry = self.entry(id).await?;
        let mut entry = entry.lock().await;
        Self::reject_terminal(&entry)?;
        self.append_event(&mut entry, RoundEvent::Completed { result: result.clone() })
            .await?;
        entry.session.status = SessionStatus::Completed;
        entry.session.result = Some(result);
        entry.session.completed_at = Some(Utc::now());
        inc(&METRICS.sessions_completed);
        info!(session = %id, "session completed");
        Ok(())
    }

    pub async fn fail(&self, id: SessionId, reason: String) -> Result<()> {
        let entry = self.entry(id).await?;
        let mut entry = entry.lock().await;
        Self::reject_terminal(&entry)?;
        self.append_event(&mut entry, RoundEvent::Failed { reason: reason.clone() }).await?;
        entry.session.status = SessionStatus::Failed;
        entry.session.error_reason = Some(reason.clone());
        entry.session.completed_at = Some(Utc::now());
        inc(&METRICS.sessions_failed);
        warn!(session = %id, reason = %reason, "session failed");
        Ok(())
    }

    /// Cooperative cancellation: terminal, partial results discarded.
    pub async fn cancel(&self, id: SessionId) -> Result<()> {
        let entry = self.entry(id).await?;
        let mut entry = entry.lock().await;
        Self::reject_terminal(&entry)?;
        self.append_event(&mut entry, RoundEvent::Cancelled).await?;
        entry.session.status = SessionStatus::Cancelled;
        entry.session.result = None;
        entry.session.completed_at = Some(Utc::now());
        inc(&METRICS.sessions_cancelled);
        info!(session = %id, "session cancelled");
        Ok(())
    }

    /// Snapshot read.
    pub async fn get(&self, id: SessionId) -> Result<Session> {
        let entry = self.entry(id).await?;
        let entry = entry.lock().await;
        Ok(entry.session.clone())
    }

    /// Fail the session if its absolute deadline has passed. Returns whether
    /// it expired.
    pub async fn fail_if_expired(&self, id: SessionId) -> Result<bool> {
        let expired = {
            let entry = self.entry(id).await?;
            let entry = entry.lock().await;
            !entry.session.status.is_terminal() && Utc::now() > entry.session.deadline
        };
        if expired {
            self.fail(id, "timeout: session deadline exceeded".to_string()).await?;
        }
        Ok(expired)
    }

    /// Scan the WAL and rebuild every non-terminal session. Terminal
    /// sessions are loaded back into the snapshot map but not returned.
    pub async fn recover(&self) -> Result<Vec<RecoveredSession>> {
        let mut recovered = Vec::new();
        for id in self.wal.sessions().await? {
            let records = self.wal.replay(id).await?;
            let mut session: Option<Session> = None;
            let mut init: Option<EngineInit> = None;
            let mut inbound = Vec::new();
            let mut next_sequence = 0u64;

            for record in records {
                next_sequence = record.sequence + 1;
                match record.event {
                    RoundEvent::Created { session: s, init: i } => {
                        session = Some(s);
                        init = Some(i);
                    }
                    RoundEvent::MessageIn { message } => inbound.push(message),
                    RoundEvent::RoundAdvanced { round } => {
                        if let Some(s) = session.as_mut() {
                            s.round = round;
                            s.status = SessionStatus::Running;
                        }
                    }
                    RoundEvent::Completed { result } => {
                        if let Some(s) = session.as_mut() {
                            s.status = SessionStatus::Completed;
                            s.result = Some(result);
                        }
                    }
                    RoundEvent::Failed { reason } => {
                        if let Some(s) = session.as_mut() {
                            s.status = SessionStatus::Failed;
                            s.error_reason = Some(reason);
                        }
                    }
                    RoundEvent::Cancelled => {
                        if let Some(s) = session.as_mut() {
                            s.status = SessionStatus::Cancelled;
                        }
                    }
                }
            }

            let (Some(session), Some(init)) = (session, init) else {
                warn!(session = %id, "WAL without a Created record; skipping");
                continue;
            };

            let entry = SessionEntry {
                session: session.clone(),
                next_wal_sequence: next_sequence,
                round_started: Instant::now(),
            };
            self.sessions.lock().await.insert(id, Arc::new(Mutex::new(entry)));

            if !session.status.is_terminal() {
                info!(session = %id, round = session.round, "recovered non-terminal session");
                recovered.push(RecoveredSession { session, init, inbound });
            }
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::types::{Curve, KeyId, PartyIndex, Scheme, SessionKind};

    fn sample_session(id: SessionId) -> Session {
        Session {
            session_id: id,
            key_id: KeyId::fresh(),
            kind: SessionKind::Sign,
            scheme: Scheme::Frost,
            curve: Curve::Ed25519,
            participants: vec![PartyIndex(1), PartyIndex(2)],
            round: 0,
            total_rounds: 2,
            status: SessionStatus::Pending,
            message_digest: Some(vec![0xab; 32]),
            derivation_path: None,
            result: None,
            created_at: Utc::now(),
            deadline: Utc::now() + ChronoDuration::seconds(300),
            completed_at: None,
            error_reason: None,
        }
    }

    fn init() -> EngineInit {
        EngineInit { seed: [1u8; 32], gg_pre_params: None }
    }

    fn message(id: SessionId, sequence: u32) -> ProtocolMessage {
        ProtocolMessage {
            session_id: id,
            round: 1,
            from: PartyIndex(2),
            to: None,
            sequence,
            payload: vec![7; 8],
            assertion: None,
        }
    }

    #[tokio::test]
    async fn terminal_sessions_reject_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::open(dir.path()).await.unwrap();
        let id = SessionId::fresh();
        mgr.create(sample_session(id), &init()).await.unwrap();
        mgr.complete(id, SessionResult::Signature(vec![1; 64])).await.unwrap();

        assert!(mgr.fail(id, "late".into()).await.is_err());
        assert!(mgr.cancel(id).await.is_err());
        assert!(mgr.record_inbound(id, &message(id, 0)).await.is_err());
        let snapshot = mgr.get(id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn total_rounds_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::open(dir.path()).await.unwrap();
        let id = SessionId::fresh();
        mgr.create(sample_session(id), &init()).await.unwrap();
        assert!(mgr.advance_round(id, 2).await.is_ok());
        assert!(mgr.advance_round(id, 3).await.is_err());
    }

    #[tokio::test]
    async fn recovery_replays_non_terminal_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let id = SessionId::fresh();
        {
            let mgr = SessionManager::open(dir.path()).await.unwrap();
            mgr.create(sample_session(id), &init()).await.unwrap();
            mgr.record_inbound(id, &message(id, 0)).await.unwrap();
            mgr.record_inbound(id, &message(id, 1)).await.unwrap();
            mgr.advance_round(id, 1).await.unwrap();
        }

        let mgr = SessionManager::open(dir.path()).await.unwrap();
        let recovered = mgr.recover().await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].session.session_id, id);
        assert_eq!(recovered[0].session.round, 1);
        assert_eq!(recovered[0].inbound.len(), 2);
        assert_eq!(recovered[0].init.seed, [1u8; 32]);
    }

    #[tokio::test]
    async fn completed_sessions_are_not_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let id = SessionId::fresh();
        {
            let mgr = SessionManager::open(dir.path()).await.unwrap();
            mgr.create(sample_session(id), &init()).await.unwrap();
            mgr.complete(id, SessionResult::Signature(vec![9; 64])).await.unwrap();
        }
        let mgr = SessionManager::open(dir.path()).await.unwrap();
        assert!(mgr.recover().await.unwrap().is_empty());
        // The snapshot is still readable.
        assert_eq!(mgr.get(id).await.unwrap().status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn expired_sessions_fail_with_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::open(dir.path()).await.unwrap();
        let id = SessionId::fresh();
        let mut session = sample_session(id);
        session.deadline = Utc::now() - ChronoDuration::seconds(1);
        mgr.create(session, &init()).await.unwrap();

        assert!(mgr.fail_if_expired(id).await.unwrap());
        let snapshot = mgr.get(id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Failed);
        assert!(snapshot.error_reason.unwrap().contains("timeout"));
    }
}
