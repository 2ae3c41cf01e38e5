#![allow(dead_code)]
//! Builder for synthetic PDF files with exact cross-reference offsets.

use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::collections::BTreeMap;
use std::io::Write;

/// One row of a cross-reference stream.
#[derive(Clone, Copy, Debug)]
pub enum Row {
    Free { next: u32, generation: u16 },
    InUse { offset: usize, generation: u16 },
    Compressed { container: u32, index: u32 },
}

pub struct PdfBuilder {
    buffer: Vec<u8>,
    offsets: BTreeMap<(u32, u16), usize>,
    // Objects written since the last cross-reference section.
    pending: Vec<(u32, u16, usize)>,
    tables: usize,
}

impl Default for PdfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self::with_version("1.7")
    }

    pub fn with_version(version: &str) -> Self {
        let mut buffer = format!("%PDF-{version}\n").into_bytes();
        buffer.extend_from_slice(b"%\xe2\xe3\xcf\xd3\n");
        PdfBuilder {
            buffer,
            offsets: BTreeMap::new(),
            pending: Vec::new(),
            tables: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(bytes);
        self
    }

    /// Offset at which object `id` (any generation) was last written.
    pub fn offset(&self, id: u32) -> usize {
        self.offsets
            .iter()
            .filter(|((number, _), _)| *number == id)
            .map(|(_, offset)| *offset)
            .max()
            .unwrap_or_else(|| panic!("object {id} was never written"))
    }

    pub fn object(&mut self, id: u32, body: &str) -> usize {
        self.object_gen(id, 0, body.as_bytes())
    }

    pub fn object_gen(&mut self, id: u32, generation: u16, body: &[u8]) -> usize {
        let offset = self.buffer.len();
        write!(self.buffer, "{id} {generation} obj\n").unwrap();
        self.buffer.extend_from_slice(body);
        self.buffer.extend_from_slice(b"\nendobj\n");
        self.offsets.insert((id, generation), offset);
        self.pending.push((id, generation, offset));
        offset
    }

    /// Write a stream object. `dict` holds the entries besides `/Length`.
    pub fn stream(&mut self, id: u32, dict: &str, data: &[u8]) -> usize {
        let mut body = format!("<<{dict} /Length {}>>\nstream\n", data.len()).into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        self.object_gen(id, 0, &body)
    }

    /// Write an object stream holding `objects`, flate compressed.
    pub fn object_stream(&mut self, id: u32, objects: &[(u32, &str)]) -> usize {
        let (first, data) = object_stream_data(objects);
        let dict = format!("/Type /ObjStm /N {} /First {first} /Filter /FlateDecode", objects.len());
        self.stream(id, &dict, &deflate(&data))
    }

    /// Classic `xref` table for the objects written since the last section, followed by
    /// `trailer << trailer >>`. Returns the offset of the `xref` keyword.
    pub fn xref_table(&mut self, trailer: &str) -> usize {
        let offset = self.buffer.len();
        let mut rows: Vec<(u32, String)> = self
            .pending
            .drain(..)
            .map(|(id, generation, offset)| (id, format!("{offset:010} {generation:05} n\r\n")))
            .collect();
        if self.tables == 0 {
            rows.push((0, "0000000000 65535 f\r\n".to_string()));
        }
        rows.sort_by_key(|(id, _)| *id);
        rows.dedup_by_key(|(id, _)| *id);

        self.buffer.extend_from_slice(b"xref\n");
        for run in contiguous(&rows.iter().map(|(id, _)| *id).collect::<Vec<_>>()) {
            write!(self.buffer, "{} {}\n", run.0, run.1).unwrap();
            for (_, line) in rows.iter().filter(|(id, _)| (run.0..run.0 + run.1).contains(id)) {
                self.buffer.extend_from_slice(line.as_bytes());
            }
        }
        write!(self.buffer, "trailer\n<<{trailer}>>\n").unwrap();
        self.tables += 1;
        offset
    }

    /// Cross-reference stream object `id` with the given rows and extra dictionary entries.
    /// Returns its offset.
    pub fn xref_stream(&mut self, id: u32, rows: &[(u32, Row)], trailer: &str) -> usize {
        let mut rows = rows.to_vec();
        rows.sort_by_key(|(number, _)| *number);
        let numbers: Vec<u32> = rows.iter().map(|(number, _)| *number).collect();

        let mut data = Vec::new();
        for (_, row) in &rows {
            let (kind, field2, field3): (u8, u32, u16) = match *row {
                Row::Free { next, generation } => (0, next, generation),
                Row::InUse { offset, generation } => (1, offset as u32, generation),
                Row::Compressed { container, index } => (2, container, index as u16),
            };
            data.push(kind);
            data.extend_from_slice(&field2.to_be_bytes());
            data.extend_from_slice(&field3.to_be_bytes());
        }

        let index: Vec<String> = contiguous(&numbers)
            .into_iter()
            .map(|(start, count)| format!("{start} {count}"))
            .collect();
        let size = numbers.iter().max().map_or(1, |max| max + 1);
        let dict = format!(
            "/Type /XRef /Size {size} /W [1 4 2] /Index [{}] /Filter /FlateDecode {trailer}",
            index.join(" ")
        );
        self.pending.clear();
        self.stream(id, &dict, &deflate(&data))
    }

    pub fn startxref(&mut self, offset: usize) -> &mut Self {
        write!(self.buffer, "startxref\n{offset}\n%%EOF\n").unwrap();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.buffer.clone()
    }
}

/// Runs of consecutive numbers as `(start, count)`.
fn contiguous(numbers: &[u32]) -> Vec<(u32, u32)> {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for &number in numbers {
        match runs.last_mut() {
            Some((start, count)) if *start + *count == number => *count += 1,
            _ => runs.push((number, 1)),
        }
    }
    runs
}

/// Header and body of an object stream, and the offset of the first object.
pub fn object_stream_data(objects: &[(u32, &str)]) -> (usize, Vec<u8>) {
    let mut header = String::new();
    let mut body = String::new();
    for (id, object) in objects {
        header.push_str(&format!("{id} {} ", body.len()));
        body.push_str(object);
        body.push('\n');
    }
    let first = header.len();
    (first, (header + &body).into_bytes())
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Base-85 encoding with the `~>` terminator.
pub fn ascii85(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in data.chunks(4) {
        let mut group = [0u8; 4];
        group[..chunk.len()].copy_from_slice(chunk);
        let mut value = u32::from_be_bytes(group);
        if chunk.len() == 4 && value == 0 {
            out.push(b'z');
            continue;
        }
        let mut digits = [0u8; 5];
        for digit in digits.iter_mut().rev() {
            *digit = (value % 85) as u8 + b'!';
            value /= 85;
        }
        out.extend_from_slice(&digits[..chunk.len() + 1]);
    }
    out.extend_from_slice(b"~>");
    out
}

/// `<...>` hexadecimal string syntax.
pub fn hex(data: &[u8]) -> String {
    let digits: String = data.iter().map(|b| format!("{b:02X}")).collect();
    format!("<{digits}>")
}
