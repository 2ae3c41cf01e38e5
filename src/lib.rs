#![doc = include_str!("../README.md")]

#[macro_use]
mod object;
pub use crate::object::{Dictionary, IndirectObject, Object, ObjectId, Stream, StringFormat};

mod cache;
pub mod encryption;
pub use crate::encryption::{CryptMethod, DecryptionError, EncryptionContext, Permissions};
mod error;
pub use crate::error::{DecompressError, Error, ErrorKind, Result, XrefError};
pub mod filters;
pub mod lexer;
pub use crate::lexer::{Lexer, Token};
mod load_options;
pub use crate::load_options::{LoadOptions, LoadOptionsBuilder};
mod object_stream;
pub use crate::object_stream::{ObjectStream, ObjectStreamHeader};
pub mod parser;
pub use crate::parser::{Diagnostic, Parser, Resolve};
mod reader;
pub use crate::reader::Reader;
mod resolver;
pub use crate::resolver::{Mode, Objects, Resolver};
mod source;
pub use crate::source::{FileSource, Source};
pub mod xref;
pub use crate::xref::{Xref, XrefEntry, XrefSection};

#[cfg(test)]
mod testing;
