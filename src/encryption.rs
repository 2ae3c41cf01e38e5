//! Standard security handler: password checks, key derivation and per-object decryption.

mod algorithms;
pub mod crypt_filters;
mod pkcs5;
pub(crate) mod rc4;

use crate::{Dictionary, Error, Object, ObjectId, Result};
use bitflags::bitflags;
use crypt_filters::*;
use log::debug;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use algorithms::PasswordAlgorithm;
pub use crypt_filters::CryptMethod;

#[derive(Error, Debug)]
pub enum DecryptionError {
    #[error("missing encryption revision")]
    MissingRevision,
    #[error("missing encryption version")]
    MissingVersion,
    #[error("missing the owner password (/O)")]
    MissingOwnerPassword,
    #[error("missing the user password (/U)")]
    MissingUserPassword,
    #[error("missing the permissions field (/P)")]
    MissingPermissions,

    #[error("invalid key length")]
    InvalidKeyLength,
    #[error("invalid ciphertext length")]
    InvalidCipherTextLength,
    #[error("invalid password hash length")]
    InvalidHashLength,
    #[error("invalid encryption version")]
    InvalidVersion,
    // Used generically when an entry of the encryption dictionary has the wrong type
    #[error("unexpected type in the encryption dictionary")]
    InvalidType,

    #[error("the supplied password is incorrect")]
    IncorrectPassword,

    #[error("the document uses an encryption scheme that is not implemented")]
    UnsupportedEncryption,
    #[error("the encryption revision is not implemented")]
    UnsupportedRevision,
    #[error("the encryption version is not implemented")]
    UnsupportedVersion,
    #[error("unsupported security handler /{}", String::from_utf8_lossy(.0))]
    UnsupportedSecurityHandler(Vec<u8>),

    #[error(transparent)]
    StringPrep(#[from] stringprep::Error),
}

bitflags! {
    /// User access permissions from the `/P` entry.
    #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct Permissions: u64 {
        /// Print the document (possibly not at the highest quality level, depending on whether
        /// [`Permissions::PRINTABLE_IN_HIGH_QUALITY`] is also set).
        const PRINTABLE = 1 << 2;

        /// Modify the contents of the document by operations other than those controlled by
        /// [`Permissions::ANNOTABLE`], [`Permissions::FILLABLE`] and [`Permissions::ASSEMBLABLE`].
        const MODIFIABLE = 1 << 3;

        /// Copy or otherwise extract text and graphics from the document.
        const COPYABLE = 1 << 4;

        /// Add or modify text annotations and fill in interactive form fields.
        const ANNOTABLE = 1 << 5;

        /// Fill in existing interactive fields, even if [`Permissions::ANNOTABLE`] is clear.
        const FILLABLE = 1 << 8;

        /// Extract text and graphics for accessibility purposes.
        const COPYABLE_FOR_ACCESSIBILITY = 1 << 9;

        /// Insert, rotate or delete pages and create outline items or thumbnails.
        const ASSEMBLABLE = 1 << 10;

        /// Print at full fidelity.
        const PRINTABLE_IN_HIGH_QUALITY = 1 << 11;
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Permissions::empty()
    }
}

/// What a piece of ciphertext is, which selects between `/StrF` and `/StmF`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataKind {
    String,
    Stream,
}

/// Everything needed to decrypt the strings and streams of one document.
///
/// Built once from the trailer's `/Encrypt` dictionary and a password; immutable afterwards.
pub struct EncryptionContext {
    crypt_filters: BTreeMap<Vec<u8>, Arc<dyn CryptFilter>>,
    stream_filter: Arc<dyn CryptFilter>,
    string_filter: Arc<dyn CryptFilter>,
    file_encryption_key: Vec<u8>,
    permissions: Permissions,
    version: i64,
    revision: i64,
    encrypt_metadata: bool,
}

/// Map a `/CFM` name onto a crypt filter.
fn crypt_filter_for_method(method: &[u8]) -> Result<Arc<dyn CryptFilter>> {
    Ok(match method {
        b"None" => Arc::new(IdentityCryptFilter),
        b"V2" => Arc::new(Rc4CryptFilter),
        b"AESV2" => Arc::new(Aes128CryptFilter),
        b"AESV3" => Arc::new(Aes256CryptFilter),
        _ => return Err(DecryptionError::UnsupportedEncryption.into()),
    })
}

/// Read the `/CF` dictionary of a V4 or V5 handler.
fn read_crypt_filters(encrypted: &Dictionary) -> Result<BTreeMap<Vec<u8>, Arc<dyn CryptFilter>>> {
    let mut filters = BTreeMap::new();
    let Ok(cf) = encrypted.get(b"CF").and_then(Object::as_dict) else {
        return Ok(filters);
    };
    for (name, filter) in cf {
        let filter = filter.as_dict().map_err(|_| DecryptionError::InvalidType)?;
        let method = match filter.get(b"CFM") {
            Ok(method) => method.as_name().map_err(|_| DecryptionError::InvalidType)?,
            Err(_) => b"None".as_slice(),
        };
        filters.insert(name.clone(), crypt_filter_for_method(method)?);
    }
    Ok(filters)
}

impl EncryptionContext {
    /// Authenticate `password` against the encryption dictionary and derive the file key.
    ///
    /// `file_id` is the first element of the trailer's `/ID` array (empty if there is none).
    /// The password is tried as the user password first, then as the owner password.
    pub fn from_trailer(encrypted: &Dictionary, file_id: &[u8], password: &str) -> Result<Self> {
        let handler = encrypted
            .get(b"Filter")
            .and_then(Object::as_name)
            .map_err(|_| Error::DictKey("Filter".to_string()))?;
        if handler != b"Standard" {
            return Err(DecryptionError::UnsupportedSecurityHandler(handler.to_vec()).into());
        }

        let algorithm = PasswordAlgorithm::try_from(encrypted)?;
        let file_encryption_key = algorithm.compute_file_encryption_key(file_id, password)?;

        let crypt_filters = if algorithm.version >= 4 {
            read_crypt_filters(encrypted)?
        } else {
            BTreeMap::new()
        };

        let mut context = Self {
            crypt_filters,
            stream_filter: Arc::new(Rc4CryptFilter),
            string_filter: Arc::new(Rc4CryptFilter),
            file_encryption_key,
            permissions: algorithm.permissions,
            version: algorithm.version,
            revision: algorithm.revision,
            encrypt_metadata: algorithm.encrypt_metadata,
        };

        // V4 and later select the filters by name; a missing name means Identity.
        if algorithm.version >= 4 {
            let filter_named = |key: &[u8]| -> Result<Arc<dyn CryptFilter>> {
                match encrypted.get(key) {
                    Ok(name) => context.named_filter(name.as_name().map_err(|_| DecryptionError::InvalidType)?),
                    Err(_) => Ok(Arc::new(IdentityCryptFilter)),
                }
            };
            let stream_filter = filter_named(b"StmF")?;
            let string_filter = filter_named(b"StrF")?;
            context.stream_filter = stream_filter;
            context.string_filter = string_filter;
        }

        debug!(
            "encryption V{} R{}: streams {:?}, strings {:?}",
            context.version,
            context.revision,
            context.stream_filter.method(),
            context.string_filter.method()
        );
        Ok(context)
    }

    fn named_filter(&self, name: &[u8]) -> Result<Arc<dyn CryptFilter>> {
        if name == b"Identity" {
            return Ok(Arc::new(IdentityCryptFilter));
        }
        self.crypt_filters
            .get(name)
            .cloned()
            .ok_or_else(|| DecryptionError::UnsupportedEncryption.into())
    }

    fn decrypt_with(&self, filter: &dyn CryptFilter, id: ObjectId, data: &[u8]) -> Result<Vec<u8>> {
        let key = filter.compute_key(&self.file_encryption_key, id);
        Ok(filter.decrypt(&key, data)?)
    }

    /// Decrypt one string or stream payload of object `id` with the document's default filter.
    pub fn decrypt(&self, kind: DataKind, id: ObjectId, data: &[u8]) -> Result<Vec<u8>> {
        let filter = match kind {
            DataKind::String => &self.string_filter,
            DataKind::Stream => &self.stream_filter,
        };
        self.decrypt_with(filter.as_ref(), id, data)
    }

    /// Decrypt a stream payload, honouring a `/Crypt` entry in the stream's own filter chain.
    pub fn decrypt_stream(&self, id: ObjectId, dict: &Dictionary, data: &[u8]) -> Result<Vec<u8>> {
        match self.stream_crypt_filter(dict)? {
            Some(filter) => self.decrypt_with(filter.as_ref(), id, data),
            None => self.decrypt(DataKind::Stream, id, data),
        }
    }

    /// The filter named by a `/Crypt` stage's decode parameters, if the stream has one.
    fn stream_crypt_filter(&self, dict: &Dictionary) -> Result<Option<Arc<dyn CryptFilter>>> {
        let names: Vec<&[u8]> = match dict.get(b"Filter") {
            Ok(Object::Name(name)) => vec![name.as_slice()],
            Ok(Object::Array(names)) => names.iter().filter_map(|name| name.as_name().ok()).collect(),
            _ => return Ok(None),
        };
        let Some(index) = names.iter().position(|name| *name == b"Crypt") else {
            return Ok(None);
        };
        let params = match dict.get(b"DecodeParms") {
            Ok(Object::Dictionary(params)) if index == 0 => Some(params),
            Ok(Object::Array(params)) => params.get(index).and_then(|params| params.as_dict().ok()),
            _ => None,
        };
        let name = params
            .and_then(|params| params.get(b"Name").and_then(Object::as_name).ok())
            .unwrap_or(b"Identity".as_slice());
        self.named_filter(name).map(Some)
    }

    /// Whether a stream with this dictionary is stored in the clear even though the
    /// document is encrypted.
    pub fn is_exempt(&self, dict: &Dictionary) -> bool {
        dict.has_type(b"XRef") || (!self.encrypt_metadata && dict.has_type(b"Metadata"))
    }

    pub fn permissions(&self) -> Permissions {
        Permissions::from_bits_truncate(self.permissions.bits())
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn revision(&self) -> i64 {
        self.revision
    }

    /// Cipher used for streams without a `/Crypt` override.
    pub fn method(&self) -> CryptMethod {
        self.stream_filter.method()
    }

    /// Cipher used for strings.
    pub fn string_method(&self) -> CryptMethod {
        self.string_filter.method()
    }

    pub fn encrypt_metadata(&self) -> bool {
        self.encrypt_metadata
    }
}

impl fmt::Debug for EncryptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionContext")
            .field("version", &self.version)
            .field("revision", &self.revision)
            .field("method", &self.method())
            .field("permissions", &self.permissions())
            .finish_non_exhaustive()
    }
}
