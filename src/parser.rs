//! Recursive-descent parser turning tokens into objects.
//!
//! A [`Parser`] walks a [`Lexer`] from a start position. Two tokens of lookahead tell
//! `1 0 R` from `1 0 2` and find the `obj` of an object header. Stream lengths given as
//! references go back through a [`Resolve`] implementation, normally the resolver that
//! asked for the object in the first place.

use crate::encryption::{DataKind, EncryptionContext};
use crate::lexer::{Delimiter, Keyword, Lexeme, Lexer, Token};
use crate::{Dictionary, Error, IndirectObject, Object, ObjectId, Result, Stream, StringFormat};
use log::debug;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Arrays and dictionaries nested deeper than this are rejected.
pub const MAX_NESTING: usize = 256;

const END_STREAM: &[u8] = b"endstream";

/// Something that can look up indirect objects while a parse is in progress.
pub trait Resolve {
    fn resolve(&self, id: ObjectId) -> Result<Arc<Object>>;
}

/// A recoverable inconsistency found while reading a file.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// A stream's `/Length` disagreed with its `endstream` marker, or was missing.
    /// The payload ends at the marker.
    LengthMismatch {
        id: ObjectId,
        declared: Option<i64>,
        actual: usize,
    },
    /// A dictionary key that is not a name was skipped together with its value.
    InvalidDictionaryKey { offset: usize },
    /// The cross-reference data could not be used and the file was scanned instead.
    XrefRecovered { reason: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::LengthMismatch {
                id,
                declared: Some(declared),
                actual,
            } => write!(
                f,
                "stream {} {} R declares /Length {declared} but holds {actual} bytes",
                id.0, id.1
            ),
            Diagnostic::LengthMismatch { id, declared: None, actual } => write!(
                f,
                "stream {} {} R has no usable /Length, found {actual} bytes",
                id.0, id.1
            ),
            Diagnostic::InvalidDictionaryKey { offset } => write!(f, "skipped invalid dictionary key at offset {offset}"),
            Diagnostic::XrefRecovered { reason } => write!(f, "rebuilt the object index by scanning the file: {reason}"),
        }
    }
}

pub struct Parser<'a, 'r> {
    lexer: Lexer<'a>,
    position: usize,
    lookahead: VecDeque<Lexeme>,
    resolver: Option<&'r dyn Resolve>,
    encryption: Option<Arc<EncryptionContext>>,
    // The encryption dictionary, whose strings are stored in the clear.
    exempt: Option<ObjectId>,
    // Object whose key decrypts the strings being parsed.
    current: Option<ObjectId>,
    depth: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'a, 'r> Parser<'a, 'r> {
    pub fn new(lexer: Lexer<'a>, position: usize) -> Self {
        Parser {
            lexer,
            position,
            lookahead: VecDeque::with_capacity(2),
            resolver: None,
            encryption: None,
            exempt: None,
            current: None,
            depth: 0,
            diagnostics: Vec::new(),
        }
    }

    /// Resolve indirect `/Length` values through `resolver`.
    pub fn with_resolver(mut self, resolver: &'r dyn Resolve) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Decrypt the strings and streams of indirect objects, except those of `exempt`.
    pub fn with_encryption(mut self, context: Arc<EncryptionContext>, exempt: Option<ObjectId>) -> Self {
        self.encryption = Some(context);
        self.exempt = exempt;
        self
    }

    /// Absolute position just past the last consumed token.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    fn fill(&mut self, n: usize) -> Result<()> {
        while self.lookahead.len() <= n {
            let from = self.lookahead.back().map_or(self.position, |lexeme| lexeme.end);
            let lexeme = self.lexer.next_lexeme(from)?;
            self.lookahead.push_back(lexeme);
        }
        Ok(())
    }

    /// The token `n` places ahead, without consuming anything.
    pub fn peek_token(&mut self, n: usize) -> Result<&Token> {
        self.fill(n)?;
        Ok(&self.lookahead[n].token)
    }

    fn next(&mut self) -> Result<Lexeme> {
        self.fill(0)?;
        let lexeme = self.lookahead.pop_front().ok_or(Error::EndOfInput(self.position))?;
        self.position = lexeme.end;
        Ok(lexeme)
    }

    pub fn next_token(&mut self) -> Result<Token> {
        self.next().map(|lexeme| lexeme.token)
    }

    fn describe(&self, lexeme: &Lexeme) -> String {
        String::from_utf8_lossy(self.lexer.slice(lexeme.start, lexeme.end).unwrap_or_default()).into_owned()
    }

    /// Parse one direct object.
    pub fn parse_object(&mut self) -> Result<Object> {
        let lexeme = self.next()?;
        let start = lexeme.start;
        match lexeme.token {
            Token::Integer(value) => self.integer_or_reference(value, start),
            Token::Real(value) => Ok(Object::Real(value)),
            Token::Name(name) => Ok(Object::Name(name)),
            Token::LiteralString(bytes) => self.string(bytes, StringFormat::Literal),
            Token::HexString(bytes) => self.string(bytes, StringFormat::Hexadecimal),
            Token::Keyword(Keyword::True) => Ok(Object::Boolean(true)),
            Token::Keyword(Keyword::False) => Ok(Object::Boolean(false)),
            Token::Keyword(Keyword::Null) => Ok(Object::Null),
            Token::Delimiter(Delimiter::ArrayStart) => self.nested(start, |parser| parser.array().map(Object::Array)),
            Token::Delimiter(Delimiter::DictStart) => {
                self.nested(start, |parser| parser.dictionary().map(Object::Dictionary))
            }
            Token::Eof => Err(Error::EndOfInput(start)),
            Token::Keyword(_) => Err(Error::syntax(start, format!("unexpected keyword `{}`", self.describe(&lexeme)))),
            Token::Operator(_) | Token::Delimiter(_) | Token::Comment(_) => {
                Err(Error::syntax(start, format!("unexpected `{}`", self.describe(&lexeme))))
            }
        }
    }

    /// Parse a dictionary, failing on any other kind of object.
    pub fn parse_dictionary(&mut self) -> Result<Dictionary> {
        match self.parse_object()? {
            Object::Dictionary(dict) => Ok(dict),
            other => Err(Error::ObjectType {
                expected: "Dictionary",
                found: other.enum_variant(),
            }),
        }
    }

    /// Parse `number generation obj ... endobj`.
    pub fn parse_indirect_object(&mut self) -> Result<IndirectObject> {
        let id = self.object_header()?;
        self.current = Some(id);
        let object = self.indirect_body(id);
        self.current = None;
        Ok(IndirectObject { id, object: object? })
    }

    fn object_header(&mut self) -> Result<ObjectId> {
        let number = self.next()?;
        let generation = self.next()?;
        let keyword = self.next()?;
        match (number.token, generation.token, keyword.token) {
            (Token::Integer(n), Token::Integer(g), Token::Keyword(Keyword::Obj)) => {
                match (u32::try_from(n), u16::try_from(g)) {
                    (Ok(n), Ok(g)) => Ok((n, g)),
                    _ => Err(Error::syntax(number.start, "object number out of range")),
                }
            }
            _ => Err(Error::syntax(number.start, "expected an object header")),
        }
    }

    fn indirect_body(&mut self, id: ObjectId) -> Result<Object> {
        let object = match self.parse_object()? {
            Object::Dictionary(dict) if *self.peek_token(0)? == Token::Keyword(Keyword::Stream) => {
                self.next()?;
                Object::Stream(self.stream(dict, id)?)
            }
            other => other,
        };
        let end = self.next()?;
        match end.token {
            Token::Keyword(Keyword::EndObj) => Ok(object),
            _ => Err(Error::syntax(end.start, format!("expected endobj, found `{}`", self.describe(&end)))),
        }
    }

    fn nested<T>(&mut self, offset: usize, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING {
            return Err(Error::syntax(offset, "objects nested too deeply"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn integer_or_reference(&mut self, number: i64, offset: usize) -> Result<Object> {
        let Some(generation) = self.reference_ahead()? else {
            return Ok(Object::Integer(number));
        };
        self.next()?;
        self.next()?;
        match (u32::try_from(number), u16::try_from(generation)) {
            (Ok(number), Ok(generation)) => Ok(Object::Reference((number, generation))),
            _ => Err(Error::syntax(offset, "reference out of range")),
        }
    }

    /// The generation number if the next two tokens complete a reference.
    fn reference_ahead(&mut self) -> Result<Option<i64>> {
        let generation = match self.peek_token(0) {
            Ok(Token::Integer(generation)) => *generation,
            Err(err) if err.is_truncation() => return Err(err),
            _ => return Ok(None),
        };
        match self.peek_token(1) {
            Ok(Token::Keyword(Keyword::R)) => Ok(Some(generation)),
            Err(err) if err.is_truncation() => Err(err),
            _ => Ok(None),
        }
    }

    fn string(&self, bytes: Vec<u8>, format: StringFormat) -> Result<Object> {
        let bytes = match (&self.encryption, self.current) {
            (Some(context), Some(id)) if Some(id) != self.exempt => context.decrypt(DataKind::String, id, &bytes)?,
            _ => bytes,
        };
        Ok(Object::String(bytes, format))
    }

    fn array(&mut self) -> Result<Vec<Object>> {
        let mut items = Vec::new();
        loop {
            if *self.peek_token(0)? == Token::Delimiter(Delimiter::ArrayEnd) {
                self.next()?;
                return Ok(items);
            }
            items.push(self.parse_object()?);
        }
    }

    fn dictionary(&mut self) -> Result<Dictionary> {
        let mut dict = Dictionary::new();
        loop {
            let lexeme = self.next()?;
            match lexeme.token {
                Token::Delimiter(Delimiter::DictEnd) => return Ok(dict),
                Token::Name(key) => {
                    let value = self.parse_object()?;
                    dict.set(key, value);
                }
                Token::Eof => return Err(Error::EndOfInput(lexeme.start)),
                _ => {
                    let offset = lexeme.start;
                    self.lookahead.push_front(lexeme);
                    self.skip_entry_part()?;
                    self.diagnostics.push(Diagnostic::InvalidDictionaryKey { offset });
                    if !matches!(self.peek_token(0)?, Token::Name(_) | Token::Delimiter(Delimiter::DictEnd)) {
                        self.skip_entry_part()?;
                    }
                }
            }
        }
    }

    /// Drop one token or direct object from a damaged dictionary entry.
    /// Bare words are consumed as they are; structural keywords still fail.
    fn skip_entry_part(&mut self) -> Result<()> {
        let bare = matches!(
            self.peek_token(0)?,
            Token::Operator(_) | Token::Comment(_) | Token::Keyword(Keyword::R)
        );
        if bare {
            self.next()?;
            return Ok(());
        }
        self.parse_object().map(drop)
    }

    /// The stream keyword has just been consumed.
    fn stream(&mut self, dict: Dictionary, id: ObjectId) -> Result<Stream> {
        let complete = self.lexer.is_complete();
        let mut start = self.position;
        match (self.lexer.byte_at(start), self.lexer.byte_at(start + 1)) {
            (Some(b'\r'), Some(b'\n')) => start += 2,
            (Some(b'\r'), None) | (None, _) if !complete => return Err(Error::EndOfInput(start)),
            (Some(b'\r' | b'\n'), _) => start += 1,
            _ => (),
        }

        let declared = self.declared_length(&dict)?;
        let exact = match declared.map(usize::try_from) {
            Some(Ok(length)) => self.data_end(start, length)?,
            _ => None,
        };
        let (end, marker) = match exact {
            Some(found) => found,
            None => {
                let marker = match self.lexer.find(END_STREAM, start) {
                    Some(marker) => marker,
                    None if !complete => return Err(Error::EndOfInput(self.lexer.end())),
                    None => return Err(Error::syntax(start, "missing endstream")),
                };
                let end = self.trim_eol(start, marker);
                self.diagnostics.push(Diagnostic::LengthMismatch {
                    id,
                    declared,
                    actual: end - start,
                });
                (end, marker)
            }
        };

        let content = self.lexer.slice(start, end).unwrap_or_default().to_vec();
        self.position = marker + END_STREAM.len();

        let mut dict = dict;
        self.inline_filter_entries(&mut dict);
        let mut stream = Stream::new(dict, content);
        if let Some(context) = &self.encryption {
            if Some(id) != self.exempt && !context.is_exempt(&stream.dict) {
                stream.set_decryption(context.clone(), id);
            }
        }
        Ok(stream)
    }

    /// Replace indirect `/Filter` and `/DecodeParms` values, and indirect items of their
    /// arrays, with their targets. Unresolvable ones are left for decoding to reject.
    fn inline_filter_entries(&self, dict: &mut Dictionary) {
        let Some(resolver) = self.resolver else {
            return;
        };
        let inline = |object: &mut Object| {
            if let Object::Reference(id) = *object {
                match resolver.resolve(id) {
                    Ok(target) => *object = (*target).clone(),
                    Err(err) => debug!("cannot resolve stream filter entry {} {} R: {err}", id.0, id.1),
                }
            }
        };
        for key in [&b"Filter"[..], b"DecodeParms"] {
            let Ok(value) = dict.get_mut(key) else {
                continue;
            };
            inline(&mut *value);
            if let Object::Array(items) = value {
                items.iter_mut().for_each(&inline);
            }
        }
    }

    fn declared_length(&self, dict: &Dictionary) -> Result<Option<i64>> {
        match dict.get(b"Length") {
            Ok(Object::Integer(length)) => Ok(Some(*length)),
            Ok(Object::Reference(id)) => {
                let Some(resolver) = self.resolver else {
                    return Ok(None);
                };
                match resolver.resolve(*id) {
                    Ok(length) => Ok(length.as_i64().ok()),
                    Err(err @ (Error::ReferenceCycle(_) | Error::ReferenceLimit)) => Err(err),
                    Err(err) => {
                        debug!("cannot resolve stream length {} {} R: {err}", id.0, id.1);
                        Ok(None)
                    }
                }
            }
            _ => Ok(None),
        }
    }

    /// End of the data and position of `endstream` if `length` bytes from `start` are
    /// followed by the marker.
    fn data_end(&self, start: usize, length: usize) -> Result<Option<(usize, usize)>> {
        let Some(end) = start.checked_add(length) else {
            return Ok(None);
        };
        let mut marker = end;
        while self.lexer.byte_at(marker).is_some_and(crate::lexer::is_whitespace) {
            marker += 1;
        }
        match self.lexer.slice(marker, marker + END_STREAM.len()) {
            Some(found) => Ok((found == END_STREAM).then_some((end, marker))),
            None if !self.lexer.is_complete() => Err(Error::EndOfInput(self.lexer.end())),
            None => Ok(None),
        }
    }

    /// Drop the end-of-line that precedes `endstream`.
    fn trim_eol(&self, start: usize, marker: usize) -> usize {
        let mut end = marker;
        if end > start && self.lexer.byte_at(end - 1) == Some(b'\n') {
            end -= 1;
        }
        if end > start && self.lexer.byte_at(end - 1) == Some(b'\r') {
            end -= 1;
        }
        end
    }
}
