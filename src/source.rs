//! Random-access byte sources the resolver reads from.

use crate::lexer::Lexer;
use crate::{Error, Result};
use log::trace;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Bytes read by the first attempt to parse at an offset.
pub(crate) const INITIAL_WINDOW: usize = 4096;

/// A seekable, read-only byte source.
///
/// Implementations are shared between threads, so `read_at` takes `&self` and must not
/// depend on a cursor another reader could move.
pub trait Source: Send + Sync {
    /// Total length in bytes.
    fn len(&self) -> usize;

    /// Read bytes starting at `offset` into `buf`, returning how many were read.
    /// Zero means `offset` is at or past the end.
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> io::Result<usize>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Source for Vec<u8> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.get(offset..).unwrap_or_default();
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        Ok(count)
    }
}

/// A file on disk. Seek and read happen under one lock.
#[derive(Debug)]
pub struct FileSource {
    file: Mutex<File>,
    len: usize,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(File::open(path)?)
    }

    pub fn new(file: File) -> Result<Self> {
        let len = usize::try_from(file.metadata()?.len())
            .map_err(|_| Error::Unsupported("file too large for this platform"))?;
        Ok(FileSource {
            file: Mutex::new(file),
            len,
        })
    }
}

impl Source for FileSource {
    fn len(&self) -> usize {
        self.len
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start(offset as u64))?;
        file.read(buf)
    }
}

/// Read up to `len` bytes at `offset`, fewer only at the end of the source.
pub(crate) fn read_range(source: &dyn Source, offset: usize, len: usize) -> Result<Vec<u8>> {
    let len = len.min(source.len().saturating_sub(offset));
    let mut buffer = vec![0; len];
    let mut filled = 0;
    while filled < len {
        match source.read_at(offset + filled, &mut buffer[filled..]) {
            Ok(0) => break,
            Ok(count) => filled += count,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    buffer.truncate(filled);
    Ok(buffer)
}

/// Run `parse` over a window of the source starting at `offset`, growing the window
/// fourfold each time the parse runs off its end.
pub(crate) fn windowed<T>(source: &dyn Source, offset: usize, mut parse: impl FnMut(Lexer<'_>) -> Result<T>) -> Result<T> {
    let total = source.len();
    if offset >= total {
        return Err(Error::syntax(offset, "offset lies beyond the end of the file"));
    }

    let mut size = INITIAL_WINDOW;
    loop {
        let window = read_range(source, offset, size)?;
        let complete = offset + window.len() >= total;
        match parse(Lexer::with_window(&window, offset, complete)) {
            Err(err) if err.is_truncation() && !complete => {
                size = size.saturating_mul(4);
                trace!("window at {offset} too small, retrying with {size} bytes");
            }
            result => return result,
        }
    }
}
