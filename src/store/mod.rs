//! Key-share persistence.
//!
//! One envelope file per (key_id, participant_id). The store is owned by a
//! single participant process: it refuses to return a bundle for any other
//! participant id, writes are atomic (temp + rename) and files are created
//! owner-readable only.

pub mod envelope;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::config::{AeadAlgorithm, KdfAlgorithm};
use crate::error::{CustodyError, Result};
use crate::types::{KeyId, LocalShareBundle, PartyIndex};

pub use envelope::{EnvelopeParams, KekSource};

#[async_trait]
pub trait ShareStore: Send + Sync {
    async fn put(&self, key_id: KeyId, participant: PartyIndex, bundle: &LocalShareBundle)
        -> Result<()>;
    async fn get(&self, key_id: KeyId, participant: PartyIndex) -> Result<LocalShareBundle>;
    async fn delete(&self, key_id: KeyId, participant: PartyIndex) -> Result<()>;
}

pub struct FsShareStore {
    root: PathBuf,
    owner: PartyIndex,
    source: KekSource,
    params: EnvelopeParams,
}

impl FsShareStore {
    pub async fn open(
        root: impl AsRef<Path>,
        owner: PartyIndex,
        source: KekSource,
        aead: AeadAlgorithm,
        kdf: KdfAlgorithm,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(FsShareStore { root, owner, source, params: EnvelopeParams { aead, kdf } })
    }

    fn path(&self, key_id: KeyId, participant: PartyIndex) -> PathBuf {
        self.root.join(format!("{key_id}_p{participant}.share"))
    }

    fn check_owner(&self, participant: PartyIndex) -> Result<()> {
        if participant != self.owner {
            return Err(CustodyError::AuthDenied(format!(
                "share of participant {participant} is not owned by this process"
            )));
        }
        Ok(())
    }

    /// Rotate the KEK across every stored envelope; ciphertext untouched.
    pub async fn rotate_kek(&mut self, new_source: KekSource) -> Result<usize> {
        let mut rotated = 0usize;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("share") {
                continue;
            }
            let bytes = tokio::fs::read(entry.path()).await?;
            let rewrapped = envelope::rewrap(&bytes, &self.source, &new_source)?;
            write_atomic(&entry.path(), &rewrapped).await?;
            rotated += 1;
        }
        self.source = new_source;
        info!(count = rotated, "KEK rotated across share envelopes");
        Ok(rotated)
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("share.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
    }
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl ShareStore for FsShareStore {
    async fn put(
        &self,
        key_id: KeyId,
        participant: PartyIndex,
        bundle: &LocalShareBundle,
    ) -> Result<()> {
        self.check_owner(participant)?;
        let plaintext = bincode::serialize(bundle)
            .map_err(|e| CustodyError::internal(format!("encode share bundle: {e}")))?;
        let sealed = envelope::seal(&plaintext, &self.source, self.params)?;
        write_atomic(&self.path(key_id, participant), &sealed).await?;
        info!(key = %key_id, participant = participant.0, "share bundle sealed");
        Ok(())
    }

    async fn get(&self, key_id: KeyId, participant: PartyIndex) -> Result<LocalShareBundle> {
        self.check_owner(participant)?;
        let bytes = match tokio::fs::read(self.path(key_id, participant)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CustodyError::not_found(format!(
                    "share for key {key_id} participant {participant}"
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let plaintext = envelope::open(&bytes, &self.source)?;
        bincode::deserialize(&plaintext)
            .map_err(|e| CustodyError::internal(format!("decode share bundle: {e}")))
    }

    async fn delete(&self, key_id: KeyId, participant: PartyIndex) -> Result<()> {
        self.check_owner(participant)?;
        match tokio::fs::remove_file(self.path(key_id, participant)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for single-process tests and simulations.
#[derive(Default)]
pub struct MemoryShareStore {
    shares: std::sync::Mutex<std::collections::HashMap<(KeyId, u16), LocalShareBundle>>,
}

impl MemoryShareStore {
    pub fn new() -> Self {
        MemoryShareStore::default()
    }
}

#[async_trait]
impl ShareStore for MemoryShareStore {
    async fn put(
        &self,
        key_id: KeyId,
        participant: PartyIndex,
        bundle: &LocalShareBundle,
    ) -> Result<()> {
        self.shares
            .lock()
            .expect("share map lock")
            .insert((key_id, participant.0), bundle.clone());
        Ok(())
    }

    async fn get(&self, key_id: KeyId, participant: PartyIndex) -> Result<LocalShareBundle> {
        self.shares
            .lock()
            .expect("share map lock")
            .get(&(key_id, participant.0))
            .cloned()
            .ok_or_else(|| {
                CustodyError::not_found(format!("share for key {key_id} participant {participant}"))
            })
    }

    async fn delete(&self, key_id: KeyId, participant: PartyIndex) -> Result<()> {
        self.shares.lock().expect("share map lock").remove(&(key_id, participant.0));
        Ok(())
    }
}
