use crate::lexer::{Lexer, Token};
use crate::parser::Parser;
use crate::{Dictionary, Error, Object, Result, Stream};

use log::warn;
use std::sync::Arc;

/// Object numbers and offsets listed at the start of an object stream.
#[derive(Debug, PartialEq, Eq)]
pub struct ObjectStreamHeader {
    first: usize,
    entries: Vec<(u32, usize)>,
}

impl ObjectStreamHeader {
    fn parse(dict: &Dictionary, content: &[u8]) -> Result<ObjectStreamHeader> {
        let first = dict.get(b"First").and_then(Object::as_i64)?;
        let first = usize::try_from(first)
            .ok()
            .filter(|first| *first <= content.len())
            .ok_or_else(|| Error::syntax(0, "object stream /First lies outside its data"))?;

        let header = Lexer::new(&content[..first]);
        let mut position = 0;
        let mut numbers = Vec::new();
        loop {
            let (token, end) = header.next_token(position)?;
            match token {
                Token::Integer(value) if value >= 0 => numbers.push(value as u64),
                Token::Eof => break,
                _ => return Err(Error::syntax(position, "malformed object stream header")),
            }
            position = end;
        }
        if numbers.len() % 2 != 0 {
            warn!("object stream header has an odd number of integers, ignoring the last");
        }

        let mut entries = Vec::with_capacity(numbers.len() / 2);
        for pair in numbers.chunks_exact(2) {
            let (Ok(number), Ok(offset)) = (u32::try_from(pair[0]), usize::try_from(pair[1])) else {
                return Err(Error::syntax(0, "object stream header value out of range"));
            };
            entries.push((number, offset));
        }

        let n = dict.get(b"N").and_then(Object::as_i64)?;
        if usize::try_from(n).ok() != Some(entries.len()) {
            warn!("object stream declares /N {n} but lists {} objects", entries.len());
        }
        Ok(ObjectStreamHeader { first, entries })
    }
}

/// The decoded contents of a `/Type /ObjStm` stream.
///
/// The header of `N` pairs of object number and relative offset is parsed up front
/// and can be shared between several views of the same stream; objects themselves are
/// only parsed when asked for by index.
#[derive(Debug)]
pub struct ObjectStream<'a> {
    content: &'a [u8],
    header: Arc<ObjectStreamHeader>,
}

impl<'a> ObjectStream<'a> {
    pub fn new(stream: &'a Stream) -> Result<ObjectStream<'a>> {
        let content = stream.decoded_content()?;
        let header = ObjectStreamHeader::parse(&stream.dict, content)?;
        Ok(ObjectStream {
            content,
            header: Arc::new(header),
        })
    }

    /// Reuse a header parsed earlier from the same stream.
    pub fn with_header(stream: &'a Stream, header: Arc<ObjectStreamHeader>) -> Result<ObjectStream<'a>> {
        let content = stream.decoded_content()?;
        if header.first > content.len() {
            return Err(Error::syntax(0, "object stream /First lies outside its data"));
        }
        Ok(ObjectStream { content, header })
    }

    pub fn header(&self) -> &Arc<ObjectStreamHeader> {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.header.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.header.entries.is_empty()
    }

    /// Object numbers in the order they are stored.
    pub fn numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.header.entries.iter().map(|(number, _)| *number)
    }

    /// The object number and object at `index`.
    pub fn get(&self, index: usize) -> Result<(u32, Object)> {
        let &(number, offset) = self
            .header
            .entries
            .get(index)
            .ok_or_else(|| Error::syntax(0, format!("object stream has no object at index {index}")))?;
        let start = self
            .header
            .first
            .checked_add(offset)
            .filter(|start| *start < self.content.len())
            .ok_or_else(|| Error::syntax(offset, "object offset lies outside the object stream"))?;
        let object = Parser::new(Lexer::new(self.content), start).parse_object()?;
        Ok((number, object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;

    fn object_stream(header: &str, body: &str, n: i64) -> Stream {
        let content = format!("{header}{body}");
        let dict = dictionary! {
            "Type" => "ObjStm",
            "N" => n,
            "First" => header.len() as i64,
        };
        Stream::new(dict, content.into_bytes())
    }

    #[test]
    fn objects_by_index() {
        let stream = object_stream("11 0 12 3 ", "42 <</A 11 0 R>>", 2);
        let objects = ObjectStream::new(&stream).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects.numbers().collect::<Vec<_>>(), vec![11, 12]);
        assert_eq!(objects.get(0).unwrap(), (11, Object::Integer(42)));
        let (number, object) = objects.get(1).unwrap();
        assert_eq!(number, 12);
        assert_eq!(object.as_dict().unwrap().get(b"A").unwrap(), &Object::Reference((11, 0)));
        assert!(objects.get(2).is_err());
    }

    #[test]
    fn wrong_count_is_tolerated() {
        let stream = object_stream("5 0 ", "(five)", 3);
        let objects = ObjectStream::new(&stream).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects.get(0).unwrap().1, Object::string_literal("five"));
    }

    #[test]
    fn offsets_outside_the_data() {
        let stream = object_stream("5 40 ", "1", 1);
        let objects = ObjectStream::new(&stream).unwrap();
        assert!(objects.get(0).is_err());

        let mut stream = object_stream("5 0 ", "1", 1);
        stream.dict.set("First", 100);
        assert!(ObjectStream::new(&stream).is_err());
    }

    #[test]
    fn header_is_shared() {
        let stream = object_stream("11 0 12 3 ", "42 (twelve)", 2);
        let header = ObjectStream::new(&stream).unwrap().header().clone();
        let objects = ObjectStream::with_header(&stream, header.clone()).unwrap();
        assert!(Arc::ptr_eq(objects.header(), &header));
        assert_eq!(objects.get(1).unwrap(), (12, Object::string_literal("twelve")));

        let short = object_stream("", "", 0);
        assert!(ObjectStream::with_header(&short, header).is_err());
    }

    #[test]
    fn malformed_header() {
        let stream = object_stream("5 /Oops ", "1", 1);
        assert!(ObjectStream::new(&stream).is_err());
    }
}
