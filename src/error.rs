use thiserror::Error;

use crate::ObjectId;
use crate::encryption::DecryptionError;

pub type Result<T> = std::result::Result<T, Error>;

/// The coarse classification every [`Error`] falls into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input at the character level.
    Lexical,
    /// Tokens that do not form a valid construct.
    Syntax,
    /// Recognized but not implemented.
    Unsupported,
    /// The supplied password opens neither the user nor the owner view.
    WrongPassword,
    /// Everything else, such as dangling references.
    Generic,
}

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed token.
    #[error("lexical error at offset {offset}: {reason}")]
    Lexical { offset: usize, reason: &'static str },
    /// The read window ended before the construct did.
    #[error("unexpected end of input at offset {0}")]
    EndOfInput(usize),
    /// Token stream does not match the grammar.
    #[error("syntax error at offset {offset}: {reason}")]
    Syntax { offset: usize, reason: String },
    /// Error while reading cross reference information.
    #[error("invalid cross-reference section: {0}")]
    Xref(#[from] XrefError),
    /// Dereferencing an object came back to an object still being resolved.
    #[error("reference cycle detected while resolving object {0:?}")]
    ReferenceCycle(ObjectId),
    /// Found Object ID does not match Expected Object ID.
    #[error("expected object {expected:?} but found {found:?}")]
    ObjectIdMismatch { expected: ObjectId, found: ObjectId },
    /// Dereferencing reached the configured depth limit.
    #[error("reference depth limit reached")]
    ReferenceLimit,
    /// The reference points at a free cross-reference entry.
    #[error("dangling reference to free object {0:?}")]
    FreeObject(ObjectId),
    /// The object number is not known to the cross-reference index.
    #[error("object {0:?} not found")]
    ObjectNotFound(ObjectId),
    /// An Object has the wrong type, e.g. the Object is an Array where a Name would be expected.
    #[error("object has wrong type; expected type {expected} but found type {found}")]
    ObjectType {
        expected: &'static str,
        found: &'static str,
    },
    /// Dictionary key was not found.
    #[error("missing required dictionary key \"{0}\"")]
    DictKey(String),
    /// A filter with this name cannot be decoded.
    #[error("unsupported filter /{0}")]
    UnsupportedFilter(String),
    /// Some other recognized construct is not implemented.
    #[error("unsupported feature: {0}")]
    Unsupported(&'static str),
    /// The stream couldn't be decompressed.
    #[error("couldn't decompress stream: {0}")]
    Decompress(#[from] DecompressError),
    /// Error when decrypting the contents of the file
    #[error("decryption error: {0}")]
    Decryption(#[from] DecryptionError),
    /// IO error
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Lexical { .. } | Error::EndOfInput(_) => ErrorKind::Lexical,
            Error::Syntax { .. } | Error::Xref(_) | Error::ReferenceCycle(_) | Error::ObjectIdMismatch { .. } => {
                ErrorKind::Syntax
            }
            Error::UnsupportedFilter(_) | Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::Decryption(err) => match err {
                DecryptionError::IncorrectPassword => ErrorKind::WrongPassword,
                DecryptionError::UnsupportedEncryption
                | DecryptionError::UnsupportedRevision
                | DecryptionError::UnsupportedVersion
                | DecryptionError::UnsupportedSecurityHandler(_) => ErrorKind::Unsupported,
                _ => ErrorKind::Generic,
            },
            Error::ReferenceLimit
            | Error::FreeObject(_)
            | Error::ObjectNotFound(_)
            | Error::ObjectType { .. }
            | Error::DictKey(_)
            | Error::Decompress(_)
            | Error::IO(_) => ErrorKind::Generic,
        }
    }

    pub(crate) fn syntax<S: Into<String>>(offset: usize, reason: S) -> Self {
        Error::Syntax {
            offset,
            reason: reason.into(),
        }
    }

    /// Whether reading more of the source could make this error go away.
    pub(crate) fn is_truncation(&self) -> bool {
        matches!(self, Error::EndOfInput(_))
    }
}

#[derive(Debug, Error)]
pub enum DecompressError {
    #[error("decoding ASCII85 failed: {0}")]
    Ascii85(&'static str),
    #[error("decoding ASCIIHex failed: invalid digit {0:#04x}")]
    AsciiHex(u8),
    #[error("inflating data failed: {0}")]
    Flate(std::io::Error),
    #[error("decoding LZW data failed: {0}")]
    Lzw(String),
    #[error("invalid PNG predictor row tag {0}")]
    PngFilter(u8),
    #[error("invalid predictor parameters: {0}")]
    Predictor(&'static str),
}

#[derive(Debug, Error)]
pub enum XrefError {
    /// Could not parse cross reference table.
    #[error("could not parse xref at offset {0}")]
    Parse(usize),
    /// Could not find start of cross reference table.
    #[error("invalid start value")]
    Start,
    /// The trailer's "Prev" field was invalid.
    #[error("invalid start value in Prev field")]
    PrevStart,
    /// The trailer's "XRefStm" field was invalid.
    #[error("invalid stream start value")]
    StreamStart,
    /// The trailer is missing or unusable.
    #[error("invalid trailer")]
    Trailer,
    /// The "Prev" chain revisits an offset.
    #[error("Prev chain loops back to offset {0}")]
    Cycle(usize),
}

impl XrefError {
    /// Errors the sequential scan must not paper over.
    pub(crate) fn is_fatal(&self) -> bool {
        matches!(self, XrefError::Cycle(_))
    }
}
