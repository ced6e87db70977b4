//! Environment-based configuration for the custody core.
//!
//! All knobs come from `CUSTODY_*` environment variables with conservative
//! defaults; nothing sensitive is ever hardcoded.
//!
//! # Recognised variables
//!
//! - `CUSTODY_NODE_ID` - stable node identifier (default: "custody-node")
//! - `CUSTODY_DKG_DEADLINE_SECS` - overall DKG session deadline (default 600)
//! - `CUSTODY_SIGN_DEADLINE_SECS` - overall sign session deadline (default 300)
//! - `CUSTODY_ROUND_DEADLINE_SECS` - per-round deadline (default 30)
//! - `CUSTODY_AEAD` - "aes-256-gcm" or "chacha20-poly1305"
//! - `CUSTODY_KDF` - "scrypt" or "argon2id"
//! - `CUSTODY_ENVELOPE_MODE` - "kms" or "password"
//! - `CUSTODY_RECEIVE_WINDOW` - per-session reorder window (default 64)
//! - `CUSTODY_OUTBOUND_QUEUE` - per-peer outbound queue bound (default 256)
//! - `CUSTODY_MAX_FUTURE_ROUND_MSGS` - engine-side future-round buffer (default 64)
//! - `CUSTODY_PAILLIER_BITS` - GG Paillier modulus size (default 2048)
//! - `CUSTODY_DISCOVERY_TTL_SECS` - directory cache staleness bound (default 15)
//! - `CUSTODY_UNREACHABLE_GRACE_SECS` - recovery grace before Failed(Unreachable) (default 60)

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// AEAD algorithm used by the share-store envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadAlgorithm {
    Aes256Gcm,
    ChaCha20Poly1305,
}

impl FromStr for AeadAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aes-256-gcm" | "aes256gcm" => Ok(AeadAlgorithm::Aes256Gcm),
            "chacha20-poly1305" | "chacha20poly1305" => Ok(AeadAlgorithm::ChaCha20Poly1305),
            other => Err(ConfigError::InvalidValue(
                "CUSTODY_AEAD".to_string(),
                format!("unknown AEAD: {other}"),
            )),
        }
    }
}

/// Key-derivation function for password-mode envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfAlgorithm {
    /// scrypt(N = 2^log_n, r, p)
    Scrypt { log_n: u8, r: u32, p: u32 },
    /// argon2id(m KiB, t, p)
    Argon2id { m_cost: u32, t_cost: u32, p_cost: u32 },
}

impl KdfAlgorithm {
    pub fn default_scrypt() -> Self {
        KdfAlgorithm::Scrypt { log_n: 15, r: 8, p: 1 }
    }

    pub fn default_argon2id() -> Self {
        KdfAlgorithm::Argon2id { m_cost: 64 * 1024, t_cost: 3, p_cost: 1 }
    }
}

impl FromStr for KdfAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scrypt" => Ok(KdfAlgorithm::default_scrypt()),
            "argon2id" | "argon2" => Ok(KdfAlgorithm::default_argon2id()),
            other => Err(ConfigError::InvalidValue(
                "CUSTODY_KDF".to_string(),
                format!("unknown KDF: {other}"),
            )),
        }
    }
}

/// How the envelope's data-encryption key is wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeMode {
    Kms,
    Password,
}

impl FromStr for EnvelopeMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kms" => Ok(EnvelopeMode::Kms),
            "password" => Ok(EnvelopeMode::Password),
            other => Err(ConfigError::InvalidValue(
                "CUSTODY_ENVELOPE_MODE".to_string(),
                format!("unknown envelope mode: {other}"),
            )),
        }
    }
}

/// Main configuration struct.
#[derive(Debug, Clone)]
pub struct CustodyConfig {
    pub node_id: String,
    /// Overall deadline for DKG sessions.
    pub dkg_deadline: Duration,
    /// Overall deadline for sign sessions.
    pub sign_deadline: Duration,
    /// Deadline for each protocol round.
    pub round_deadline: Duration,
    pub aead: AeadAlgorithm,
    pub kdf: KdfAlgorithm,
    pub envelope_mode: EnvelopeMode,
    /// Router reorder window per (session, sender).
    pub receive_window: u32,
    /// Bounded size of each per-peer outbound queue.
    pub outbound_queue: usize,
    /// Engine-side bound on buffered future-round messages.
    pub max_pending_future_round_messages: usize,
    /// Paillier modulus size for GG auxiliary keys.
    pub paillier_bits: usize,
    /// Directory cache staleness bound.
    pub discovery_ttl: Duration,
    /// Grace period before a recovered session with unreachable peers fails.
    pub unreachable_grace: Duration,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        CustodyConfig {
            node_id: "custody-node".to_string(),
            dkg_deadline: Duration::from_secs(600),
            sign_deadline: Duration::from_secs(300),
            round_deadline: Duration::from_secs(30),
            aead: AeadAlgorithm::Aes256Gcm,
            kdf: KdfAlgorithm::default_scrypt(),
            envelope_mode: EnvelopeMode::Password,
            receive_window: 64,
            outbound_queue: 256,
            max_pending_future_round_messages: 64,
            paillier_bits: 2048,
            discovery_ttl: Duration::from_secs(15),
            unreachable_grace: Duration::from_secs(60),
        }
    }
}

impl CustodyConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = CustodyConfig::default();

        if let Ok(id) = env::var("CUSTODY_NODE_ID") {
            cfg.node_id = id;
        }
        cfg.dkg_deadline = secs_var("CUSTODY_DKG_DEADLINE_SECS", cfg.dkg_deadline)?;
        cfg.sign_deadline = secs_var("CUSTODY_SIGN_DEADLINE_SECS", cfg.sign_deadline)?;
        cfg.round_deadline = secs_var("CUSTODY_ROUND_DEADLINE_SECS", cfg.round_deadline)?;
        if let Ok(v) = env::var("CUSTODY_AEAD") {
            cfg.aead = v.parse()?;
        }
        if let Ok(v) = env::var("CUSTODY_KDF") {
            cfg.kdf = v.parse()?;
        }
        if let Ok(v) = env::var("CUSTODY_ENVELOPE_MODE") {
            cfg.envelope_mode = v.parse()?;
        }
        cfg.receive_window = num_var("CUSTODY_RECEIVE_WINDOW", cfg.receive_window)?;
        cfg.outbound_queue = num_var("CUSTODY_OUTBOUND_QUEUE", cfg.outbound_queue)?;
        cfg.max_pending_future_round_messages = num_var(
            "CUSTODY_MAX_FUTURE_ROUND_MSGS",
            cfg.max_pending_future_round_messages,
        )?;
        cfg.paillier_bits = num_var("CUSTODY_PAILLIER_BITS", cfg.paillier_bits)?;
        cfg.discovery_ttl = secs_var("CUSTODY_DISCOVERY_TTL_SECS", cfg.discovery_ttl)?;
        cfg.unreachable_grace = secs_var("CUSTODY_UNREACHABLE_GRACE_SECS", cfg.unreachable_grace)?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.paillier_bits < 1024 {
            return Err(ConfigError::InvalidValue(
                "CUSTODY_PAILLIER_BITS".to_string(),
                "Paillier modulus must be at least 1024 bits".to_string(),
            ));
        }
        if self.receive_window == 0 || self.outbound_queue == 0 {
            return Err(ConfigError::InvalidValue(
                "CUSTODY_RECEIVE_WINDOW".to_string(),
                "window and queue bounds must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Overall deadline for a session of the given kind.
    pub fn session_deadline(&self, kind: crate::types::SessionKind) -> Duration {
        match kind {
            crate::types::SessionKind::Dkg => self.dkg_deadline,
            _ => self.sign_deadline,
        }
    }
}

fn secs_var(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(v) => v
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), "must be seconds".to_string())),
        Err(_) => Ok(default),
    }
}

fn num_var<T: FromStr + Copy>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), "must be a number".to_string())),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = CustodyConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.dkg_deadline, Duration::from_secs(600));
        assert_eq!(cfg.sign_deadline, Duration::from_secs(300));
    }

    #[test]
    fn aead_and_kdf_parsing() {
        assert_eq!(
            "chacha20-poly1305".parse::<AeadAlgorithm>().unwrap(),
            AeadAlgorithm::ChaCha20Poly1305
        );
        assert!(matches!(
            "argon2id".parse::<KdfAlgorithm>().unwrap(),
            KdfAlgorithm::Argon2id { .. }
        ));
        assert!("rot13".parse::<AeadAlgorithm>().is_err());
    }

    #[test]
    fn small_paillier_modulus_rejected() {
        let cfg = CustodyConfig { paillier_bits: 512, ..CustodyConfig::default() };
        assert!(cfg.validate().is_err());
    }
}
