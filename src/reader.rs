use crate::lexer::{Lexer, Token};
use crate::source::{Source, read_range, windowed};
use crate::xref::{Xref, XrefSection};
use crate::{Error, Object, Result, XrefError};
use log::{debug, warn};
use std::collections::HashSet;

/// How far from the end of the file `startxref` is searched for.
const TAIL_SIZE: usize = 1024;
/// How far into the file the `%PDF-` header is searched for.
const HEAD_SIZE: usize = 1024;

/// Builds the cross-reference index of a file from its `startxref` pointer.
pub struct Reader<'a> {
    source: &'a dyn Source,
}

impl<'a> Reader<'a> {
    pub fn new(source: &'a dyn Source) -> Self {
        Reader { source }
    }

    /// Version from the `%PDF-x.y` header, if there is one.
    pub fn version(&self) -> Result<Option<String>> {
        let head = read_range(self.source, 0, HEAD_SIZE)?;
        let Some(start) = Lexer::new(&head).find(b"%PDF-", 0) else {
            return Ok(None);
        };
        let version: String = head[start + 5..]
            .iter()
            .take_while(|c| c.is_ascii_digit() || **c == b'.')
            .map(|&c| char::from(c))
            .collect();
        Ok(Some(version).filter(|version| !version.is_empty()))
    }

    /// Offset named by the last `startxref` keyword of the file.
    pub fn startxref(&self) -> Result<usize> {
        let total = self.source.len();
        let base = total.saturating_sub(TAIL_SIZE);
        let tail = read_range(self.source, base, TAIL_SIZE)?;
        let lexer = Lexer::with_window(&tail, base, true);

        let keyword = tail
            .windows(b"startxref".len())
            .rposition(|window| window == b"startxref")
            .ok_or(XrefError::Start)?;
        match lexer.next_token(base + keyword + b"startxref".len()) {
            Ok((Token::Integer(offset), _)) => usize::try_from(offset).map_err(|_| XrefError::Start.into()),
            _ => Err(XrefError::Start.into()),
        }
    }

    /// Parse the newest section and everything its `Prev` and `XRefStm` entries lead to,
    /// merged newest first.
    pub fn build(&self) -> Result<Xref> {
        let mut xref = Xref::new();
        let mut seen = HashSet::new();
        let mut next = Some(self.startxref()?);

        while let Some(offset) = next {
            if !seen.insert(offset) {
                return Err(XrefError::Cycle(offset).into());
            }
            let section = self.section(offset)?;
            debug!("cross-reference section at {offset} has {} entries", section.entries.len());
            next = trailer_offset(section.trailer.get(b"Prev").ok(), XrefError::PrevStart)?;
            let hybrid = trailer_offset(section.trailer.get(b"XRefStm").ok(), XrefError::StreamStart)?;
            xref.merge(section);

            // The stream of a hybrid file sits between its table and the previous revision.
            if let Some(stream_offset) = hybrid {
                if seen.insert(stream_offset) {
                    xref.merge(self.section(stream_offset)?);
                }
            }
        }

        let trailer = xref.trailer_mut();
        trailer.remove(b"Prev");
        trailer.remove(b"XRefStm");

        if let Ok(size) = xref.trailer().get(b"Size").and_then(Object::as_i64) {
            let needed = i64::from(xref.max_id()) + 1;
            if size < needed {
                warn!("trailer /Size {size} is smaller than the highest object number plus one ({needed})");
            }
        }
        Ok(xref)
    }

    fn section(&self, offset: usize) -> Result<XrefSection> {
        windowed(self.source, offset, |lexer| XrefSection::parse(lexer, offset))
    }
}

fn trailer_offset(value: Option<&Object>, invalid: XrefError) -> Result<Option<usize>> {
    match value {
        None => Ok(None),
        Some(Object::Integer(offset)) => usize::try_from(*offset).map(Some).map_err(|_| Error::Xref(invalid)),
        Some(_) => Err(invalid.into()),
    }
}
