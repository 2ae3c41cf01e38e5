use super::DecryptionError;
use super::pkcs5;
use super::rc4::Rc4;
use crate::ObjectId;
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use md5::{Digest as _, Md5};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Cipher selected by a crypt filter's `/CFM` entry (or implied by `/V` for older handlers).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CryptMethod {
    /// `/None` or the `Identity` filter: data is stored in the clear.
    Identity,
    /// `/V2`: RC4.
    Rc4,
    /// `/AESV2`: AES-128 in CBC mode.
    Aes128,
    /// `/AESV3`: AES-256 in CBC mode.
    Aes256,
}

pub trait CryptFilter: std::fmt::Debug + Send + Sync {
    fn method(&self) -> CryptMethod;
    /// Derive the key for one object from the file encryption key.
    fn compute_key(&self, key: &[u8], obj_id: ObjectId) -> Vec<u8>;
    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, DecryptionError>;
}

#[derive(Clone, Copy, Debug)]
pub struct IdentityCryptFilter;

impl CryptFilter for IdentityCryptFilter {
    fn method(&self) -> CryptMethod {
        CryptMethod::Identity
    }

    fn compute_key(&self, key: &[u8], _obj_id: ObjectId) -> Vec<u8> {
        key.to_vec()
    }

    fn decrypt(&self, _key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        Ok(ciphertext.to_vec())
    }
}

/// Algorithm 1: MD5 over the file key, the low 3 bytes of the object number and the low 2
/// bytes of the generation (low-order byte first), plus `sAlT` for AES. The key is the first
/// `n + 5` bytes of the digest, at most 16.
fn object_key(key: &[u8], obj_id: ObjectId, aes: bool) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(key);
    hasher.update(&obj_id.0.to_le_bytes()[..3]);
    hasher.update(obj_id.1.to_le_bytes());
    if aes {
        hasher.update(b"sAlT");
    }
    let key_len = (key.len() + 5).min(16);
    hasher.finalize()[..key_len].to_vec()
}

#[derive(Clone, Copy, Debug)]
pub struct Rc4CryptFilter;

impl CryptFilter for Rc4CryptFilter {
    fn method(&self) -> CryptMethod {
        CryptMethod::Rc4
    }

    fn compute_key(&self, key: &[u8], obj_id: ObjectId) -> Vec<u8> {
        object_key(key, obj_id, false)
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        Ok(Rc4::new(key).apply(ciphertext))
    }
}

/// Split off the 16-byte IV and check the rest is whole blocks.
fn split_iv(ciphertext: &[u8]) -> Result<Option<([u8; 16], Vec<u8>)>, DecryptionError> {
    if ciphertext.len() % 16 != 0 {
        return Err(DecryptionError::InvalidCipherTextLength);
    }
    // Nothing to decrypt if there is at most the IV.
    if ciphertext.len() <= 16 {
        return Ok(None);
    }
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&ciphertext[..16]);
    Ok(Some((iv, ciphertext[16..].to_vec())))
}

#[derive(Clone, Copy, Debug)]
pub struct Aes128CryptFilter;

impl CryptFilter for Aes128CryptFilter {
    fn method(&self) -> CryptMethod {
        CryptMethod::Aes128
    }

    fn compute_key(&self, key: &[u8], obj_id: ObjectId) -> Vec<u8> {
        object_key(key, obj_id, true)
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        if key.len() != 16 {
            return Err(DecryptionError::InvalidKeyLength);
        }
        let Some((iv, mut data)) = split_iv(ciphertext)? else {
            return Ok(vec![]);
        };

        let mut decryptor = Aes128CbcDec::new(key.into(), &iv.into());
        for block in data.chunks_exact_mut(16) {
            decryptor.decrypt_block_mut(block.into());
        }
        Ok(pkcs5::unpad(&data).to_vec())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Aes256CryptFilter;

impl CryptFilter for Aes256CryptFilter {
    fn method(&self) -> CryptMethod {
        CryptMethod::Aes256
    }

    /// AES-256 uses the file key for every object.
    fn compute_key(&self, key: &[u8], _obj_id: ObjectId) -> Vec<u8> {
        key.to_vec()
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        if key.len() != 32 {
            return Err(DecryptionError::InvalidKeyLength);
        }
        let Some((iv, mut data)) = split_iv(ciphertext)? else {
            return Ok(vec![]);
        };

        let mut decryptor = Aes256CbcDec::new(key.into(), &iv.into());
        for block in data.chunks_exact_mut(16) {
            decryptor.decrypt_block_mut(block.into());
        }
        Ok(pkcs5::unpad(&data).to_vec())
    }
}
