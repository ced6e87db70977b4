//! MPCENC envelope format: header + KDF section + wrapped-DEK section +
//! AEAD section + ciphertext.
//!
//! Each file carries a unique data-encryption key wrapped by the
//! key-encryption key; KEK rotation re-wraps the DEK without touching the
//! ciphertext, which is why the AAD covers the header only up to and
//! including the KEK id. Reads fail loudly on any magic, version, AAD or
//! tag mismatch.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::config::{AeadAlgorithm, EnvelopeMode, KdfAlgorithm};
use crate::error::{CustodyError, Result};

const MAGIC: [u8; 8] = *b"MPCENC\0\0";
const VERSION: u16 = 1;
const CONTENT_SHARE_BUNDLE: u8 = 1;
const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 24;
const DEK_LEN: usize = 32;

/// Where the key-encryption key comes from.
#[derive(Clone)]
pub enum KekSource {
    /// KEK derived from a passphrase through the KDF section.
    Password(Zeroizing<String>),
    /// KEK held by an external KMS and injected by its id.
    Kms { kek_id: Vec<u8>, key: Zeroizing<[u8; 32]> },
}

impl KekSource {
    fn mode(&self) -> EnvelopeMode {
        match self {
            KekSource::Password(_) => EnvelopeMode::Password,
            KekSource::Kms { .. } => EnvelopeMode::Kms,
        }
    }

    fn kek_id(&self) -> Vec<u8> {
        match self {
            KekSource::Password(_) => b"password-v1".to_vec(),
            KekSource::Kms { kek_id, .. } => kek_id.clone(),
        }
    }

    fn resolve(&self, kdf: &KdfAlgorithm, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        match self {
            KekSource::Password(passphrase) => derive_kek(kdf, passphrase.as_bytes(), salt),
            KekSource::Kms { key, .. } => Ok(key.clone()),
        }
    }
}

#[derive(Clone, Copy)]
pub struct EnvelopeParams {
    pub aead: AeadAlgorithm,
    pub kdf: KdfAlgorithm,
}

fn kdf_fields(kdf: &KdfAlgorithm) -> (u8, u32, u32, u32) {
    match *kdf {
        KdfAlgorithm::Scrypt { log_n, r, p } => (1, log_n as u32, r, p),
        KdfAlgorithm::Argon2id { m_cost, t_cost, p_cost } => (2, m_cost, t_cost, p_cost),
    }
}

fn kdf_from_fields(alg: u8, p1: u32, p2: u32, p3: u32) -> Result<KdfAlgorithm> {
    match alg {
        1 => Ok(KdfAlgorithm::Scrypt { log_n: p1 as u8, r: p2, p: p3 }),
        2 => Ok(KdfAlgorithm::Argon2id { m_cost: p1, t_cost: p2, p_cost: p3 }),
        other => Err(CustodyError::internal(format!("unknown KDF id {other}"))),
    }
}

fn derive_kek(kdf: &KdfAlgorithm, password: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let mut kek = Zeroizing::new([0u8; 32]);
    match *kdf {
        KdfAlgorithm::Scrypt { log_n, r, p } => {
            let params = scrypt::Params::new(log_n, r, p, 32)
                .map_err(|e| CustodyError::internal(format!("scrypt params: {e}")))?;
            scrypt::scrypt(password, salt, &params, kek.as_mut())
                .map_err(|e| CustodyError::internal(format!("scrypt: {e}")))?;
        }
        KdfAlgorithm::Argon2id { m_cost, t_cost, p_cost } => {
            let params = argon2::Params::new(m_cost, t_cost, p_cost, Some(32))
                .map_err(|e| CustodyError::internal(format!("argon2 params: {e}")))?;
            let argon = argon2::Argon2::new(
                argon2::Algorithm::Argon2id,
                argon2::Version::V0x13,
                params,
            );
            argon
                .hash_password_into(password, salt, kek.as_mut())
                .map_err(|e| CustodyError::internal(format!("argon2: {e}")))?;
        }
    }
    Ok(kek)
}

fn aead_encrypt(
    alg: AeadAlgorithm,
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let payload = Payload { msg: plaintext, aad };
    let out = match alg {
        AeadAlgorithm::Aes256Gcm => Aes256Gcm::new(key.into())
            .encrypt(Nonce::from_slice(nonce), payload)
            .map_err(|_| CustodyError::internal("AEAD seal failed")),
        AeadAlgorithm::ChaCha20Poly1305 => ChaCha20Poly1305::new(key.into())
            .encrypt(Nonce::from_slice(nonce), payload)
            .map_err(|_| CustodyError::internal("AEAD seal failed")),
    }?;
    Ok(out)
}

fn aead_decrypt(
    alg: AeadAlgorithm,
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let payload = Payload { msg: ciphertext, aad };
    match alg {
        AeadAlgorithm::Aes256Gcm => Aes256Gcm::new(key.into())
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|_| CustodyError::internal("envelope authentication failed")),
        AeadAlgorithm::ChaCha20Poly1305 => ChaCha20Poly1305::new(key.into())
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|_| CustodyError::internal("envelope authentication failed")),
    }
}

fn aead_id(alg: AeadAlgorithm) -> u8 {
    match alg {
        AeadAlgorithm::Aes256Gcm => 1,
        AeadAlgorithm::ChaCha20Poly1305 => 2,
    }
}

fn aead_from_id(id: u8) -> Result<AeadAlgorithm> {
    match id {
        1 => Ok(AeadAlgorithm::Aes256Gcm),
        2 => Ok(AeadAlgorithm::ChaCha20Poly1305),
        other => Err(CustodyError::internal(format!("unknown AEAD id {other}"))),
    }
}

/// Seal `plaintext` into a fresh envelope.
pub fn seal(plaintext: &[u8], source: &KekSource, params: EnvelopeParams) -> Result<Vec<u8>> {
    let mut rng = rand::rngs::OsRng;

    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);
    let kek = source.resolve(&params.kdf, &salt)?;
    let kek_id = source.kek_id();

    let mut dek = Zeroizing::new([0u8; DEK_LEN]);
    rng.fill_bytes(dek.as_mut());

    // Wrap the DEK under the KEK with its own nonce.
    let mut wrap_nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut wrap_nonce);
    let wrapped = aead_encrypt(params.aead, &kek, &wrap_nonce, dek.as_ref(), &kek_id)?;
    let mut wrapped_dek = Vec::with_capacity(NONCE_LEN + wrapped.len());
    wrapped_dek.extend_from_slice(&wrap_nonce);
    wrapped_dek.extend_from_slice(&wrapped);

    // Header, accumulating the AAD boundary as we go.
    let mut out = Vec::with_capacity(plaintext.len() + 256);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes()); // flags
    out.push(CONTENT_SHARE_BUNDLE);
    let (kdf_alg, p1, p2, p3) = kdf_fields(&params.kdf);
    out.push(kdf_alg);
    out.extend_from_slice(&p1.to_be_bytes());
    out.extend_from_slice(&p2.to_be_bytes());
    out.extend_from_slice(&p3.to_be_bytes());
    out.extend_from_slice(&(salt.len() as u16).to_be_bytes());
    out.extend_from_slice(&salt);
    out.push(match source.mode() {
        EnvelopeMode::Kms => 1,
        EnvelopeMode::Password => 2,
    });
    out.extend_from_slice(&(kek_id.len() as u16).to_be_bytes());
    out.extend_from_slice(&kek_id);
    let aad_end = out.len();

    out.extend_from_slice(&(wrapped_dek.len() as u16).to_be_bytes());
    out.extend_from_slice(&wrapped_dek);
    out.push(aead_id(params.aead));

    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce);
    out.extend_from_slice(&nonce);

    let aad = out[..aad_end].to_vec();
    let ciphertext = aead_encrypt(params.aead, &dek, &nonce, plaintext, &aad)?;
    out.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

struct Parsed {
    kdf: KdfAlgorithm,
    salt: Vec<u8>,
    kek_id: Vec<u8>,
    wrapped_dek: Vec<u8>,
    aead: AeadAlgorithm,
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
    aad_end: usize,
    wrapped_dek_offset: usize,
}

fn parse(bytes: &[u8]) -> Result<Parsed> {
    let mut cursor = Cursor { bytes, offset: 0 };
    let magic = cursor.take(8)?;
    if magic != MAGIC {
        return Err(CustodyError::internal("bad envelope magic"));
    }
    let version = u16::from_be_bytes(cursor.take(2)?.try_into().expect("2 bytes"));
    if version != VERSION {
        return Err(CustodyError::internal(format!("unsupported envelope version {version}")));
    }
    let _flags = cursor.take(2)?;
    let content = cursor.take(1)?[0];
    if content != CONTENT_SHARE_BUNDLE {
        return Err(CustodyError::internal(format!("unknown content type {content}")));
    }
    let kdf_alg = cursor.take(1)?[0];
    let p1 = u32::from_be_bytes(cursor.take(4)?.try_into().expect("4 bytes"));
    let p2 = u32::from_be_bytes(cursor.take(4)?.try_into().expect("4 bytes"));
    let p3 = u32::from_be_bytes(cursor.take(4)?.try_into().expect("4 bytes"));
    let kdf = kdf_from_fields(kdf_alg, p1, p2, p3)?;
    let salt_len = u16::from_be_bytes(cursor.take(2)?.try_into().expect("2 bytes")) as usize;
    if salt_len < 16 {
        return Err(CustodyError::internal("envelope salt too short"));
    }
    let salt = cursor.take(salt_len)?.to_vec();
    let _mode = cursor.take(1)?[0];
    let kek_id_len = u16::from_be_bytes(cursor.take(2)?.try_into().expect("2 bytes")) as usize;
    let kek_id = cursor.take(kek_id_len)?.to_vec();
    let aad_end = cursor.offset;

    let wrapped_dek_offset = cursor.offset;
    let wrapped_len = u16::from_be_bytes(cursor.take(2)?.try_into().expect("2 bytes")) as usize;
    let wrapped_dek = cursor.take(wrapped_len)?.to_vec();
    let aead = aead_from_id(cursor.take(1)?[0])?;
    let nonce: [u8; NONCE_LEN] =
        cursor.take(NONCE_LEN)?.try_into().expect("nonce length checked");
    let ct_len = u32::from_be_bytes(cursor.take(4)?.try_into().expect("4 bytes")) as usize;
    let ciphertext = cursor.take(ct_len)?.to_vec();
    if cursor.offset != bytes.len() {
        return Err(CustodyError::internal("trailing bytes after envelope"));
    }

    Ok(Parsed { kdf, salt, kek_id, wrapped_dek, aead, nonce, ciphertext, aad_end, wrapped_dek_offset })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.offset + n > self.bytes.len() {
            return Err(CustodyError::internal("truncated envelope"));
        }
        let slice = &self.bytes[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }
}

fn unwrap_dek(parsed: &Parsed, source: &KekSource) -> Result<Zeroizing<[u8; DEK_LEN]>> {
    if parsed.kek_id != source.kek_id() {
        return Err(CustodyError::internal("envelope KEK id does not match keyring"));
    }
    let kek = source.resolve(&parsed.kdf, &parsed.salt)?;
    if parsed.wrapped_dek.len() <= NONCE_LEN {
        return Err(CustodyError::internal("truncated wrapped DEK"));
    }
    let (wrap_nonce, wrapped) = parsed.wrapped_dek.split_at(NONCE_LEN);
    let wrap_nonce: [u8; NONCE_LEN] = wrap_nonce.try_into().expect("checked length");
    let dek = aead_decrypt(parsed.aead, &kek, &wrap_nonce, wrapped, &parsed.kek_id)?;
    if dek.len() != DEK_LEN {
        return Err(CustodyError::internal("unwrapped DEK has wrong length"));
    }
    let mut out = Zeroizing::new([0u8; DEK_LEN]);
    out.copy_from_slice(&dek);
    Ok(out)
}

/// Open an envelope, failing loudly on any mismatch.
pub fn open(bytes: &[u8], source: &KekSource) -> Result<Vec<u8>> {
    let parsed = parse(bytes)?;
    let dek = unwrap_dek(&parsed, source)?;
    let aad = &bytes[..parsed.aad_end];
    aead_decrypt(parsed.aead, &dek, &parsed.nonce, &parsed.ciphertext, aad)
}

/// Re-wrap the DEK under a rotated KEK without touching the ciphertext.
/// The new source must resolve the same KEK id (rotation happens behind a
/// stable id), because the id is bound into the ciphertext AAD.
pub fn rewrap(bytes: &[u8], old: &KekSource, new: &KekSource) -> Result<Vec<u8>> {
    let parsed = parse(bytes)?;
    if new.kek_id() != parsed.kek_id {
        return Err(CustodyError::internal(
            "KEK rotation must preserve the KEK id bound into the AAD",
        ));
    }
    let dek = unwrap_dek(&parsed, old)?;

    let mut rng = rand::rngs::OsRng;
    let new_kek = new.resolve(&parsed.kdf, &parsed.salt)?;
    let mut wrap_nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut wrap_nonce);
    let wrapped = aead_encrypt(parsed.aead, &new_kek, &wrap_nonce, dek.as_ref(), &parsed.kek_id)?;
    let mut wrapped_dek = Vec::with_capacity(NONCE_LEN + wrapped.len());
    wrapped_dek.extend_from_slice(&wrap_nonce);
    wrapped_dek.extend_from_slice(&wrapped);

    // Splice the new wrapped-DEK section between the AAD and AEAD sections.
    let tail_offset = {
        let old_len = u16::from_be_bytes(
            bytes[parsed.wrapped_dek_offset..parsed.wrapped_dek_offset + 2]
                .try_into()
                .expect("2 bytes"),
        ) as usize;
        parsed.wrapped_dek_offset + 2 + old_len
    };
    let mut out = Vec::with_capacity(bytes.len());
    out.extend_from_slice(&bytes[..parsed.wrapped_dek_offset]);
    out.extend_from_slice(&(wrapped_dek.len() as u16).to_be_bytes());
    out.extend_from_slice(&wrapped_dek);
    out.extend_from_slice(&bytes[tail_offset..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn password_source() -> KekSource {
        KekSource::Password(Zeroizing::new("correct horse battery staple".to_string()))
    }

    fn fast_params() -> EnvelopeParams {
        EnvelopeParams {
            aead: AeadAlgorithm::Aes256Gcm,
            kdf: KdfAlgorithm::Scrypt { log_n: 4, r: 8, p: 1 },
        }
    }

    #[test]
    fn seal_open_round_trip() {
        let source = password_source();
        let sealed = seal(b"the share bundle", &source, fast_params()).unwrap();
        assert_eq!(open(&sealed, &source).unwrap(), b"the share bundle");
    }

    #[test]
    fn chacha_variant_round_trips() {
        let source = KekSource::Kms { kek_id: b"kms-key-7".to_vec(), key: Zeroizing::new([9u8; 32]) };
        let params = EnvelopeParams {
            aead: AeadAlgorithm::ChaCha20Poly1305,
            kdf: KdfAlgorithm::Scrypt { log_n: 4, r: 8, p: 1 },
        };
        let sealed = seal(b"bundle", &source, params).unwrap();
        assert_eq!(open(&sealed, &source).unwrap(), b"bundle");
    }

    /// Any single-byte modification anywhere in the envelope must fail the
    /// read loudly.
    #[test]
    fn every_byte_flip_is_detected() {
        let source = password_source();
        let sealed = seal(b"tamper target", &source, fast_params()).unwrap();

        for position in 0..sealed.len() {
            let mut corrupted = sealed.clone();
            corrupted[position] ^= 0x01;
            assert!(
                open(&corrupted, &source).is_err(),
                "byte flip at {position} went undetected"
            );
        }
    }

    #[test]
    fn wrong_passphrase_fails() {
        let sealed = seal(b"secret", &password_source(), fast_params()).unwrap();
        let wrong = KekSource::Password(Zeroizing::new("wrong".to_string()));
        assert!(open(&sealed, &wrong).is_err());
    }

    #[test]
    fn kek_rotation_preserves_ciphertext() {
        let old = KekSource::Kms { kek_id: b"slot-1".to_vec(), key: Zeroizing::new([1u8; 32]) };
        let new = KekSource::Kms { kek_id: b"slot-1".to_vec(), key: Zeroizing::new([2u8; 32]) };
        let sealed = seal(b"durable bundle", &old, fast_params()).unwrap();

        let rotated = rewrap(&sealed, &old, &new).unwrap();
        assert!(open(&rotated, &old).is_err());
        assert_eq!(open(&rotated, &new).unwrap(), b"durable bundle");

        // Ciphertext section is untouched byte for byte.
        let tail = |b: &[u8]| b[b.len() - 16..].to_vec();
        assert_eq!(tail(&sealed), tail(&rotated));
    }

    #[test]
    fn mismatched_kek_id_refuses_rotation() {
        let old = KekSource::Kms { kek_id: b"slot-1".to_vec(), key: Zeroizing::new([1u8; 32]) };
        let other = KekSource::Kms { kek_id: b"slot-2".to_vec(), key: Zeroizing::new([2u8; 32]) };
        let sealed = seal(b"bundle", &old, fast_params()).unwrap();
        assert!(rewrap(&sealed, &old, &other).is_err());
    }
}
