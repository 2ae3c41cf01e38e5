use super::DecryptionError;
use super::Permissions;
use super::rc4::Rc4;
use crate::{Dictionary, Error, Object};
use aes::cipher::{BlockDecryptMut as _, BlockEncryptMut as _, KeyInit as _, KeyIvInit as _};
use encoding_rs::WINDOWS_1252;
use md5::{Digest as _, Md5};
use sha2::{Sha256, Sha384, Sha512};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256EcbDec = ecb::Decryptor<aes::Aes256>;

// Passwords shorter than 32 bytes are padded from the start of this string.
const PAD_BYTES: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08, 0x2E, 0x2E, 0x00,
    0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// The parameters of the standard security handler, read from the encryption dictionary.
#[derive(Clone, Debug, Default)]
pub struct PasswordAlgorithm {
    pub(crate) encrypt_metadata: bool,
    pub(crate) length: Option<usize>,
    pub(crate) version: i64,
    pub(crate) revision: i64,
    pub(crate) owner_value: Vec<u8>,
    pub(crate) owner_encrypted: Vec<u8>,
    pub(crate) user_value: Vec<u8>,
    pub(crate) user_encrypted: Vec<u8>,
    pub(crate) permissions: Permissions,
    pub(crate) permission_encrypted: Vec<u8>,
}

fn optional_bytes(dict: &Dictionary, key: &[u8]) -> Vec<u8> {
    dict.get(key).and_then(Object::as_str).map(<[u8]>::to_vec).unwrap_or_default()
}

fn required_bytes(dict: &Dictionary, key: &[u8], missing: DecryptionError) -> Result<Vec<u8>, DecryptionError> {
    dict.get(key)
        .map_err(|_| missing)?
        .as_str()
        .map(<[u8]>::to_vec)
        .map_err(|_| DecryptionError::InvalidType)
}

impl TryFrom<&Dictionary> for PasswordAlgorithm {
    type Error = Error;

    fn try_from(encrypted: &Dictionary) -> Result<Self, Self::Error> {
        let encrypt_metadata = match encrypted.get(b"EncryptMetadata") {
            Ok(value) => value.as_bool().map_err(|_| DecryptionError::InvalidType)?,
            Err(_) => true,
        };

        let length = match encrypted.get(b"Length") {
            Ok(value) => {
                let bits = value.as_i64().map_err(|_| DecryptionError::InvalidType)?;
                Some(usize::try_from(bits).map_err(|_| DecryptionError::InvalidKeyLength)?)
            }
            Err(_) => None,
        };

        let version = encrypted
            .get(b"V")
            .map_err(|_| DecryptionError::MissingVersion)?
            .as_i64()
            .map_err(|_| DecryptionError::InvalidType)?;

        match version {
            // 0 is undocumented and 3 is an unpublished algorithm; neither may appear in a conforming file.
            0 | 3 => return Err(DecryptionError::InvalidVersion.into()),
            1 | 2 | 4 | 5 => (),
            _ => return Err(DecryptionError::UnsupportedVersion.into()),
        }

        if let Some(length) = length {
            let valid = match version {
                // Optional for V1, but some writers store the implied 40.
                1 => length == 40,
                2 => length % 8 == 0 && (40..=128).contains(&length),
                4 => length == 128,
                _ => length == 256,
            };
            if !valid {
                return Err(DecryptionError::InvalidKeyLength.into());
            }
        }

        let revision = encrypted
            .get(b"R")
            .map_err(|_| DecryptionError::MissingRevision)?
            .as_i64()
            .map_err(|_| DecryptionError::InvalidType)?;
        if !(2..=6).contains(&revision) {
            return Err(DecryptionError::UnsupportedRevision.into());
        }

        let hash_len = if revision <= 4 { 32 } else { 48 };

        let owner_value = required_bytes(encrypted, b"O", DecryptionError::MissingOwnerPassword)?;
        let user_value = required_bytes(encrypted, b"U", DecryptionError::MissingUserPassword)?;
        // Some writers append junk past the hash; only a short value is unusable.
        if owner_value.len() < hash_len || user_value.len() < hash_len {
            return Err(DecryptionError::InvalidHashLength.into());
        }

        let owner_encrypted = optional_bytes(encrypted, b"OE");
        let user_encrypted = optional_bytes(encrypted, b"UE");
        let permission_encrypted = optional_bytes(encrypted, b"Perms");
        if revision >= 5 && (owner_encrypted.len() != 32 || user_encrypted.len() != 32 || permission_encrypted.len() != 16) {
            return Err(DecryptionError::InvalidCipherTextLength.into());
        }

        let permission_value = encrypted
            .get(b"P")
            .map_err(|_| DecryptionError::MissingPermissions)?
            .as_i64()
            .map_err(|_| DecryptionError::InvalidType)?;

        Ok(Self {
            encrypt_metadata,
            length,
            version,
            revision,
            owner_value,
            owner_encrypted,
            user_value,
            user_encrypted,
            permissions: Permissions::from_bits_retain(permission_value as u64),
            permission_encrypted,
        })
    }
}

impl PasswordAlgorithm {
    /// Sanitize the password (revision 4 and earlier).
    ///
    /// Passwords for these revisions are single-byte strings; Windows-1252 is used as the
    /// nearest codepage to PDFDocEncoding. Characters outside it become numeric references
    /// and will simply fail to authenticate.
    pub(crate) fn sanitize_password_r4(&self, password: &str) -> Vec<u8> {
        let (bytes, _, _) = WINDOWS_1252.encode(password);
        bytes.into_owned()
    }

    /// Sanitize the password (revision 5 and later): SASLprep, UTF-8, at most 127 bytes.
    pub(crate) fn sanitize_password_r6(&self, password: &str) -> Result<Vec<u8>, DecryptionError> {
        let mut password = stringprep::saslprep(password)?.as_bytes().to_vec();
        password.truncate(127);
        Ok(password)
    }

    /// Number of bytes in the file encryption key for revisions 2 to 4.
    fn key_length_r4(&self) -> Result<usize, DecryptionError> {
        let n = match (self.revision, self.length) {
            (2, _) => 5,
            (_, Some(bits)) => bits / 8,
            // V4 always uses 128-bit keys.
            (_, None) if self.version == 4 => 16,
            (_, None) => 5,
        };
        // MD5 limits the key to 16 bytes.
        if !(5..=16).contains(&n) {
            return Err(DecryptionError::InvalidKeyLength);
        }
        Ok(n)
    }

    /// The first 32 bytes of the password, padded with `PAD_BYTES`.
    fn padded_password(password: &[u8]) -> [u8; 32] {
        let len = password.len().min(32);
        let mut bytes = [0u8; 32];
        bytes[..len].copy_from_slice(&password[..len]);
        bytes[len..].copy_from_slice(&PAD_BYTES[..32 - len]);
        bytes
    }

    /// Compute a file encryption key from the user password (revision 4 and earlier).
    ///
    /// This implements Algorithm 2 as described in ISO 32000-2:2020 (PDF 2.0).
    pub(crate) fn compute_file_encryption_key_r4(&self, file_id: &[u8], password: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        let mut hasher = Md5::new();
        hasher.update(Self::padded_password(password));
        hasher.update(&self.owner_value[..32]);
        // P as a 32-bit unsigned value, low-order byte first.
        hasher.update((self.permissions.bits() as u32).to_le_bytes());
        hasher.update(file_id);
        if self.revision >= 4 && !self.encrypt_metadata {
            hasher.update(b"\xff\xff\xff\xff");
        }
        let mut hash = hasher.finalize();

        let n = self.key_length_r4()?;
        if self.revision >= 3 {
            for _ in 0..50 {
                hash = Md5::digest(&hash[..n]);
            }
        }
        Ok(hash[..n].to_vec())
    }

    /// The RC4 key derived from the owner password (steps a to d of Algorithm 3).
    fn owner_key_r4(&self, owner_password: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        let mut hash = Md5::digest(Self::padded_password(owner_password));
        if self.revision >= 3 {
            for _ in 0..50 {
                hash = Md5::digest(hash);
            }
        }
        Ok(hash[..self.key_length_r4()?].to_vec())
    }

    /// Recover the padded user password from `/O` using the owner password (Algorithm 7).
    fn recover_user_password_r4(&self, owner_password: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        let key = self.owner_key_r4(owner_password)?;
        let mut result = self.owner_value[..32].to_vec();

        if self.revision >= 3 {
            let mut round_key = vec![0u8; key.len()];
            for i in (1..=19).rev() {
                for (in_byte, out_byte) in key.iter().zip(round_key.iter_mut()) {
                    *out_byte = in_byte ^ i;
                }
                result = Rc4::new(&round_key).apply(&result);
            }
        }
        Ok(Rc4::new(&key).apply(&result))
    }

    /// Compute the `/U` value for a user password (Algorithms 4 and 5).
    ///
    /// For revisions 3 and 4 only the first 16 bytes are significant; the rest is zero here.
    pub(crate) fn compute_hashed_user_password_r4(&self, file_id: &[u8], user_password: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        let file_encryption_key = self.compute_file_encryption_key_r4(file_id, user_password)?;

        if self.revision == 2 {
            return Ok(Rc4::new(&file_encryption_key).apply(PAD_BYTES));
        }

        let mut hasher = Md5::new();
        hasher.update(PAD_BYTES);
        hasher.update(file_id);
        let mut result = Rc4::new(&file_encryption_key).apply(hasher.finalize());

        let mut key = vec![0u8; file_encryption_key.len()];
        for i in 1..=19 {
            for (in_byte, out_byte) in file_encryption_key.iter().zip(key.iter_mut()) {
                *out_byte = in_byte ^ i;
            }
            result = Rc4::new(&key).apply(&result);
        }
        result.resize(32, 0);
        Ok(result)
    }

    /// Algorithm 6.
    fn authenticate_user_password_r4(&self, file_id: &[u8], user_password: &[u8]) -> Result<(), DecryptionError> {
        let hashed = self.compute_hashed_user_password_r4(file_id, user_password)?;
        let len = if self.revision == 2 { 32 } else { 16 };
        if hashed[..len] != self.user_value[..len] {
            return Err(DecryptionError::IncorrectPassword);
        }
        Ok(())
    }

    /// Try `password` as the user password, then as the owner password. An owner password
    /// unlocks the file through the user password it recovers from `/O`.
    fn compute_file_encryption_key_from_r4(&self, file_id: &[u8], password: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        if self.authenticate_user_password_r4(file_id, password).is_ok() {
            return self.compute_file_encryption_key_r4(file_id, password);
        }
        let user_password = self.recover_user_password_r4(password)?;
        self.authenticate_user_password_r4(file_id, &user_password)?;
        self.compute_file_encryption_key_r4(file_id, &user_password)
    }

    /// Decrypt a 32-byte `/OE` or `/UE` value with an intermediate key (AES-256-CBC, zero IV, no padding).
    fn unwrap_file_key(key: &[u8], wrapped: &[u8]) -> Vec<u8> {
        let mut file_key = wrapped.to_vec();
        let mut decryptor = Aes256CbcDec::new(key.into(), &[0u8; 16].into());
        for block in file_key.chunks_exact_mut(16) {
            decryptor.decrypt_block_mut(block.into());
        }
        file_key
    }

    /// Compute a file encryption key (revision 5 and later).
    ///
    /// This implements Algorithm 2.A as described in ISO 32000-2:2020 (PDF 2.0).
    fn compute_file_encryption_key_r6(&self, password: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        let user_value = &self.user_value[..48];
        let (hashed_owner_password, owner_salts) = self.owner_value[..48].split_at(32);
        let (hashed_user_password, user_salts) = user_value.split_at(32);

        if self.compute_hash(password, &owner_salts[..8], Some(user_value))? == hashed_owner_password {
            let key = self.compute_hash(password, &owner_salts[8..], Some(user_value))?;
            return Ok(Self::unwrap_file_key(&key, &self.owner_encrypted));
        }

        if self.compute_hash(password, &user_salts[..8], None)? == hashed_user_password {
            let key = self.compute_hash(password, &user_salts[8..], None)?;
            let file_key = Self::unwrap_file_key(&key, &self.user_encrypted);
            self.validate_permissions(&file_key)?;
            return Ok(file_key);
        }

        Err(DecryptionError::IncorrectPassword)
    }

    /// Compute a hash (revision 5 and later).
    ///
    /// This implements Algorithm 2.B as described in ISO 32000-2:2020 (PDF 2.0). Revision 5
    /// stops after the initial SHA-256.
    fn compute_hash(&self, password: &[u8], salt: &[u8], user_key: Option<&[u8]>) -> Result<Vec<u8>, DecryptionError> {
        let mut hasher = Sha256::new();
        hasher.update(password);
        hasher.update(salt);
        if let Some(user_key) = user_key {
            hasher.update(user_key);
        }
        let mut k = hasher.finalize().to_vec();

        if self.revision == 5 {
            return Ok(k);
        }

        let user_key = user_key.unwrap_or_default();
        let mut k1 = Vec::with_capacity(64 * (password.len() + 64 + user_key.len()));

        // At least 64 rounds, until the last byte of E is at most (round - 32).
        for round in 1u32.. {
            // K1 is 64 repetitions of password || K || user key.
            k1.clear();
            for _ in 0..64 {
                k1.extend_from_slice(password);
                k1.extend_from_slice(&k);
                k1.extend_from_slice(user_key);
            }

            // E = AES-128-CBC(K1) keyed by K[0..16] with IV K[16..32], no padding.
            let (key, iv) = (&k[..16], &k[16..32]);
            let mut encryptor = Aes128CbcEnc::new(key.into(), iv.into());
            for block in k1.chunks_exact_mut(16) {
                encryptor.encrypt_block_mut(block.into());
            }
            let e = &k1;

            // The first 16 bytes of E as a big number, modulo 3, pick the next hash.
            k = match e[..16].iter().map(|v| *v as u32).sum::<u32>() % 3 {
                0 => Sha256::digest(e).to_vec(),
                1 => Sha384::digest(e).to_vec(),
                _ => Sha512::digest(e).to_vec(),
            };

            if round >= 64 && e.last().copied().unwrap_or(0) as u32 <= round - 32 {
                break;
            }
        }

        k.truncate(32);
        Ok(k)
    }

    /// Check the file key against `/Perms` (Algorithm 13).
    fn validate_permissions(&self, file_encryption_key: &[u8]) -> Result<(), DecryptionError> {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&self.permission_encrypted[..16]);

        let mut decryptor = Aes256EcbDec::new(file_encryption_key.into());
        for block in bytes.chunks_exact_mut(16) {
            decryptor.decrypt_block_mut(block.into());
        }

        if &bytes[9..12] != b"adb" || bytes[..4] != self.permissions.bits().to_le_bytes()[..4] {
            return Err(DecryptionError::IncorrectPassword);
        }
        Ok(())
    }

    /// Derive the file encryption key from a user or owner password.
    pub fn compute_file_encryption_key(&self, file_id: &[u8], password: &str) -> Result<Vec<u8>, DecryptionError> {
        match self.revision {
            2..=4 => self.compute_file_encryption_key_from_r4(file_id, &self.sanitize_password_r4(password)),
            5..=6 => self.compute_file_encryption_key_r6(&self.sanitize_password_r6(password)?),
            _ => Err(DecryptionError::UnsupportedRevision),
        }
    }
}

/// Producers of `/O`, `/U`, `/OE`, `/UE` and `/Perms`, for building encrypted test files.
#[cfg(test)]
impl PasswordAlgorithm {
    /// Algorithm 3.
    pub(crate) fn compute_hashed_owner_password_r4(&self, owner_password: &[u8], user_password: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        let key = self.owner_key_r4(owner_password)?;
        let mut result = Rc4::new(&key).apply(Self::padded_password(user_password));
        if self.revision >= 3 {
            let mut round_key = vec![0u8; key.len()];
            for i in 1..=19 {
                for (in_byte, out_byte) in key.iter().zip(round_key.iter_mut()) {
                    *out_byte = in_byte ^ i;
                }
                result = Rc4::new(&round_key).apply(&result);
            }
        }
        Ok(result)
    }

    fn wrap_file_key(key: &[u8], file_key: &[u8]) -> Vec<u8> {
        let mut wrapped = file_key.to_vec();
        let mut encryptor = cbc::Encryptor::<aes::Aes256>::new(key.into(), &[0u8; 16].into());
        for block in wrapped.chunks_exact_mut(16) {
            encryptor.encrypt_block_mut(block.into());
        }
        wrapped
    }

    /// Algorithm 8, with explicit validation and key salts.
    pub(crate) fn compute_hashed_user_password_r6(
        &self, file_encryption_key: &[u8], user_password: &[u8], salts: [u8; 16],
    ) -> Result<(Vec<u8>, Vec<u8>), DecryptionError> {
        let mut user_value = self.compute_hash(user_password, &salts[..8], None)?;
        user_value.extend_from_slice(&salts);
        let key = self.compute_hash(user_password, &salts[8..], None)?;
        Ok((user_value, Self::wrap_file_key(&key, file_encryption_key)))
    }

    /// Algorithm 9, with explicit salts. Needs `user_value` to be set already.
    pub(crate) fn compute_hashed_owner_password_r6(
        &self, file_encryption_key: &[u8], owner_password: &[u8], salts: [u8; 16],
    ) -> Result<(Vec<u8>, Vec<u8>), DecryptionError> {
        let mut owner_value = self.compute_hash(owner_password, &salts[..8], Some(&self.user_value))?;
        owner_value.extend_from_slice(&salts);
        let key = self.compute_hash(owner_password, &salts[8..], Some(&self.user_value))?;
        Ok((owner_value, Self::wrap_file_key(&key, file_encryption_key)))
    }

    /// Algorithm 10, with fixed filler bytes.
    pub(crate) fn compute_permissions(&self, file_encryption_key: &[u8]) -> Vec<u8> {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.permissions.bits().to_le_bytes());
        bytes[8] = if self.encrypt_metadata { b'T' } else { b'F' };
        bytes[9..12].copy_from_slice(b"adb");

        let mut encryptor = ecb::Encryptor::<aes::Aes256>::new(file_encryption_key.into());
        for block in bytes.chunks_exact_mut(16) {
            encryptor.encrypt_block_mut(block.into());
        }
        bytes.to_vec()
    }
}
