//! Cross-reference entries and the merged object index.
//!
//! Each revision of a file contributes one [`XrefSection`], either a classic `xref`
//! table or a cross-reference stream. Sections are merged newest first into one
//! [`Xref`], where the first entry seen for an object number is final.

use crate::lexer::{Keyword, Lexer, Token, is_regular, is_whitespace};
use crate::parser::Parser;
use crate::{Dictionary, Error, Object, ObjectId, Result, Stream, XrefError};
use indexmap::IndexMap;
use log::{debug, trace, warn};
use std::str;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    /// Unused slot. `next` is the next free object number.
    Free { next: u32, generation: u16 },
    /// Object stored at a byte offset of the file.
    InUse { offset: usize, generation: u16 },
    /// Object number `index` inside object stream `container`.
    Compressed { container: u32, index: usize },
}

impl XrefEntry {
    pub fn is_free(&self) -> bool {
        matches!(self, XrefEntry::Free { .. })
    }

    /// Identifier of the object this entry locates. Compressed objects always have
    /// generation 0.
    pub fn object_id(&self, number: u32) -> Option<ObjectId> {
        match *self {
            XrefEntry::Free { .. } => None,
            XrefEntry::InUse { generation, .. } => Some((number, generation)),
            XrefEntry::Compressed { .. } => Some((number, 0)),
        }
    }
}

/// The cross-reference data of one revision.
#[derive(Debug, Clone, Default)]
pub struct XrefSection {
    pub entries: Vec<(u32, XrefEntry)>,
    pub trailer: Dictionary,
}

// Keys of a cross-reference stream dictionary that describe the stream, not the file.
const STREAM_KEYS: [&[u8]; 7] = [b"Type", b"Length", b"Filter", b"DecodeParms", b"W", b"Index", b"F"];

impl XrefSection {
    /// Parse the section starting at `offset`, a classic table or a stream object.
    pub fn parse(lexer: Lexer<'_>, offset: usize) -> Result<Self> {
        let mut parser = Parser::new(lexer, offset);
        let first = parser.peek_token(0)?.clone();
        match first {
            Token::Keyword(Keyword::Xref) => {
                parser.next_token()?;
                Self::parse_table(&mut parser, offset)
            }
            Token::Integer(_) => match parser.parse_indirect_object()?.object {
                Object::Stream(stream) if stream.dict.has_type(b"XRef") => Self::from_stream(&stream, offset),
                _ => Err(XrefError::Parse(offset).into()),
            },
            _ => Err(XrefError::Parse(offset).into()),
        }
    }

    /// Subsections of `first count` followed by `offset generation n|f` rows, then the
    /// trailer.
    fn parse_table(parser: &mut Parser<'_, '_>, offset: usize) -> Result<Self> {
        let malformed = || Error::from(XrefError::Parse(offset));
        let mut entries = Vec::new();
        loop {
            let first = match parser.next_token()? {
                Token::Keyword(Keyword::Trailer) => break,
                Token::Integer(first) => u32::try_from(first).map_err(|_| malformed())?,
                _ => return Err(malformed()),
            };
            let count = match parser.next_token()? {
                Token::Integer(count) => u32::try_from(count).map_err(|_| malformed())?,
                _ => return Err(malformed()),
            };
            for index in 0..count {
                let (field, generation, kind) = (parser.next_token()?, parser.next_token()?, parser.next_token()?);
                let (Token::Integer(field), Token::Integer(generation), Token::Operator(kind)) = (field, generation, kind)
                else {
                    return Err(malformed());
                };
                let number = first.checked_add(index).ok_or_else(malformed)?;
                let generation = u16::try_from(generation).map_err(|_| malformed())?;
                let entry = match kind.as_slice() {
                    b"n" => XrefEntry::InUse {
                        offset: usize::try_from(field).map_err(|_| malformed())?,
                        generation,
                    },
                    b"f" => XrefEntry::Free {
                        next: u32::try_from(field).map_err(|_| malformed())?,
                        generation,
                    },
                    _ => return Err(malformed()),
                };
                if number != 0 {
                    entries.push((number, entry));
                }
            }
        }

        let trailer = match parser.parse_dictionary() {
            Ok(trailer) => trailer,
            Err(err) if err.is_truncation() => return Err(err),
            Err(_) => return Err(XrefError::Trailer.into()),
        };
        Ok(XrefSection { entries, trailer })
    }

    /// Decode a cross-reference stream.
    pub fn from_stream(stream: &Stream, offset: usize) -> Result<Self> {
        let malformed = || Error::from(XrefError::Parse(offset));
        let dict = &stream.dict;
        let size = dict.get(b"Size").and_then(Object::as_i64).map_err(|_| malformed())?;
        let widths = integer_array(dict.get(b"W")?).ok_or_else(malformed)?;
        let [w0, w1, w2] = match widths.as_slice() {
            &[w0, w1, w2] => [w0, w1, w2].map(|width| usize::try_from(width).ok().filter(|width| *width <= 8)),
            _ => return Err(malformed()),
        };
        let (Some(w0), Some(w1), Some(w2)) = (w0, w1, w2) else {
            return Err(malformed());
        };
        let row_len = w0 + w1 + w2;
        if row_len == 0 {
            return Err(malformed());
        }
        let index = match dict.get(b"Index") {
            Ok(index) => integer_array(index).ok_or_else(malformed)?,
            Err(_) => vec![0, size],
        };

        let data = stream.decoded_content()?;
        let mut rows = data.chunks_exact(row_len);
        let mut entries = Vec::new();
        'sections: for section in index.chunks_exact(2) {
            let (Ok(start), Ok(count)) = (u32::try_from(section[0]), u32::try_from(section[1])) else {
                return Err(malformed());
            };
            for i in 0..count {
                let Some(row) = rows.next() else {
                    warn!("cross-reference stream at {offset} holds fewer rows than its /Index lists");
                    break 'sections;
                };
                let kind = if w0 == 0 { 1 } else { big_endian(&row[..w0]) };
                let field2 = big_endian(&row[w0..w0 + w1]);
                let field3 = big_endian(&row[w0 + w1..]);
                let entry = match kind {
                    0 => XrefEntry::Free {
                        next: u32::try_from(field2).map_err(|_| malformed())?,
                        generation: u16::try_from(field3).map_err(|_| malformed())?,
                    },
                    1 => XrefEntry::InUse {
                        offset: usize::try_from(field2).map_err(|_| malformed())?,
                        generation: u16::try_from(field3).map_err(|_| malformed())?,
                    },
                    2 => XrefEntry::Compressed {
                        container: u32::try_from(field2).map_err(|_| malformed())?,
                        index: usize::try_from(field3).map_err(|_| malformed())?,
                    },
                    // Reserved for future use; readers must ignore them.
                    _ => continue,
                };
                let number = start.checked_add(i).ok_or_else(malformed)?;
                if number != 0 {
                    entries.push((number, entry));
                }
            }
        }

        let mut trailer = dict.clone();
        for key in STREAM_KEYS {
            trailer.remove(key);
        }
        Ok(XrefSection { entries, trailer })
    }
}

fn integer_array(object: &Object) -> Option<Vec<i64>> {
    object.as_array().ok()?.iter().map(|item| item.as_i64().ok()).collect()
}

fn big_endian(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0, |value, &byte| (value << 8) | u64::from(byte))
}

/// Object number to location, with the authoritative trailer.
#[derive(Debug, Clone, Default)]
pub struct Xref {
    entries: IndexMap<u32, XrefEntry>,
    trailer: Dictionary,
}

impl Xref {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, number: u32) -> Option<&XrefEntry> {
        self.entries.get(&number)
    }

    /// Add `entry` unless `number` already has one. Returns whether it was added.
    pub fn insert_if_absent(&mut self, number: u32, entry: XrefEntry) -> bool {
        match self.entries.entry(number) {
            indexmap::map::Entry::Occupied(_) => false,
            indexmap::map::Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    /// Merge a section older than everything merged so far: it only fills in object
    /// numbers and trailer keys not seen yet.
    pub fn merge(&mut self, section: XrefSection) {
        for (number, entry) in section.entries {
            self.insert_if_absent(number, entry);
        }
        self.trailer.fill_from(&section.trailer);
    }

    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    pub(crate) fn trailer_mut(&mut self) -> &mut Dictionary {
        &mut self.trailer
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &XrefEntry)> {
        self.entries.iter().map(|(number, entry)| (*number, entry))
    }

    pub fn get_index(&self, index: usize) -> Option<(u32, XrefEntry)> {
        self.entries.get_index(index).map(|(number, entry)| (*number, *entry))
    }

    pub fn max_id(&self) -> u32 {
        self.entries.keys().copied().max().unwrap_or(0)
    }
}

/// What a sequential scan of a whole file found.
#[derive(Debug, Default)]
pub struct Scan {
    pub xref: Xref,
    /// Object streams whose contents still need to be indexed.
    pub object_streams: Vec<ObjectId>,
}

// Trailer keys a cross-reference stream can stand in for.
const TRAILER_KEYS: [&[u8]; 4] = [b"Root", b"Info", b"ID", b"Encrypt"];

/// Rebuild the index of a damaged file by scanning for `<int> <int> obj`.
///
/// A later definition of an object number replaces an earlier one. Trailer dictionaries
/// are merged with later keys winning; if none names a `/Root`, cross-reference stream
/// dictionaries and finally any `/Type /Catalog` object are used instead.
pub fn scan(buffer: &[u8]) -> Result<Scan> {
    let lexer = Lexer::new(buffer);
    let mut xref = Xref::new();

    let mut position = 0;
    while let Some(found) = lexer.find(b"obj", position) {
        position = found + 3;
        if lexer.byte_at(position).is_some_and(is_regular) {
            continue;
        }
        if let Some((offset, number, generation)) = object_header_before(buffer, found) {
            trace!("found object {number} {generation} at {offset}");
            xref.entries.insert(number, XrefEntry::InUse { offset, generation });
        }
    }
    if xref.is_empty() {
        return Err(Error::syntax(0, "no objects found"));
    }

    let mut trailer = Dictionary::new();
    let mut position = 0;
    while let Some(found) = lexer.find(b"trailer", position) {
        position = found + 7;
        if found > 0 && is_regular(buffer[found - 1]) || lexer.byte_at(position).is_some_and(is_regular) {
            continue;
        }
        match Parser::new(lexer, position).parse_dictionary() {
            Ok(dict) => {
                for (key, value) in &dict {
                    trailer.set(key.clone(), value.clone());
                }
            }
            Err(err) => debug!("unreadable trailer at {found}: {err}"),
        }
    }

    let mut object_streams = Vec::new();
    let mut xref_streams = Vec::new();
    let mut catalog = None;
    for (number, entry) in xref.iter() {
        let XrefEntry::InUse { offset, generation } = *entry else {
            continue;
        };
        let object = match Parser::new(lexer, offset).parse_indirect_object() {
            Ok(indirect) => indirect.object,
            Err(err) => {
                debug!("skipping object {number} {generation} at {offset}: {err}");
                continue;
            }
        };
        let Ok(dict) = object.dict() else {
            continue;
        };
        if dict.has_type(b"XRef") {
            xref_streams.push(dict.clone());
        } else if dict.has_type(b"ObjStm") && matches!(object, Object::Stream(_)) {
            object_streams.push((number, generation));
        } else if dict.has_type(b"Catalog") {
            catalog = Some((number, generation));
        }
    }

    if !trailer.has(b"Root") {
        for dict in &xref_streams {
            for key in TRAILER_KEYS {
                if let Ok(value) = dict.get(key) {
                    trailer.set(key, value.clone());
                }
            }
        }
    }
    if !trailer.has(b"Root") {
        if let Some(id) = catalog {
            trailer.set("Root", Object::Reference(id));
        }
    }

    xref.trailer = trailer;
    Ok(Scan { xref, object_streams })
}

/// Start, number and generation of an object header ending just before `keyword`.
fn object_header_before(buffer: &[u8], keyword: usize) -> Option<(usize, u32, u16)> {
    fn skip_space(buffer: &[u8], mut end: usize) -> usize {
        while end > 0 && is_whitespace(buffer[end - 1]) {
            end -= 1;
        }
        end
    }
    fn skip_digits(buffer: &[u8], mut end: usize) -> usize {
        while end > 0 && buffer[end - 1].is_ascii_digit() {
            end -= 1;
        }
        end
    }

    let generation_end = skip_space(buffer, keyword);
    let generation_start = skip_digits(buffer, generation_end);
    let number_end = skip_space(buffer, generation_start);
    let number_start = skip_digits(buffer, number_end);
    if generation_start == generation_end || number_end == generation_start || number_start == number_end {
        return None;
    }
    if number_start > 0 && is_regular(buffer[number_start - 1]) {
        return None;
    }

    let number = str::from_utf8(&buffer[number_start..number_end]).ok()?.parse().ok()?;
    let generation = str::from_utf8(&buffer[generation_start..generation_end]).ok()?.parse().ok()?;
    Some((number_start, number, generation))
}
