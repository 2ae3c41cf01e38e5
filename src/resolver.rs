//! Lazy, cached access to the objects of a document.
//!
//! Opening a document only reads its cross-reference data (and the encryption
//! dictionary, if any). Objects are parsed on first request and kept in an LRU cache
//! shared by every thread holding the [`Resolver`].

use crate::cache::{Claim, ObjectCache};
use crate::encryption::EncryptionContext;
use crate::object_stream::{ObjectStream, ObjectStreamHeader};
use crate::parser::{Diagnostic, Parser, Resolve};
use crate::reader::Reader;
use crate::source::{FileSource, Source, read_range, windowed};
use crate::xref::{self, Xref, XrefEntry};
use crate::{Dictionary, Error, IndirectObject, LoadOptions, Object, ObjectId, Result, Stream};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// How the object index of a document is obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Follow `startxref` and the cross-reference sections it leads to.
    #[default]
    Indexed,
    /// Scan the whole file for object headers.
    Sequential,
}

pub struct Resolver {
    source: Box<dyn Source>,
    xref: Xref,
    mode: Mode,
    fallback: bool,
    version: Option<String>,
    cache: ObjectCache,
    encryption: Option<Arc<EncryptionContext>>,
    // The encryption dictionary, stored in the clear.
    encrypt_id: Option<ObjectId>,
    // Index from a full scan, for objects the cross-reference data misplaces.
    recovered: OnceLock<Option<Xref>>,
    // Parsed object stream headers by container, kept across cache evictions.
    headers: Mutex<HashMap<ObjectId, Arc<ObjectStreamHeader>>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
    max_depth: usize,
}

impl Resolver {
    /// Open the file at `path` with default options.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Resolver> {
        Self::load_with(path, LoadOptions::default())
    }

    pub fn load_with<P: AsRef<Path>>(path: P, options: LoadOptions) -> Result<Resolver> {
        Self::from_source(Box::new(FileSource::open(path)?), options)
    }

    /// Open a document held in memory with default options.
    pub fn load_mem<B: Into<Vec<u8>>>(buffer: B) -> Result<Resolver> {
        Self::load_mem_with(buffer, LoadOptions::default())
    }

    pub fn load_mem_with<B: Into<Vec<u8>>>(buffer: B, options: LoadOptions) -> Result<Resolver> {
        Self::from_source(Box::new(buffer.into()), options)
    }

    pub fn from_source(source: Box<dyn Source>, options: LoadOptions) -> Result<Resolver> {
        let reader = Reader::new(source.as_ref());
        let version = reader.version()?;
        let mut diagnostics = Vec::new();

        let (mode, xref, object_streams) = match options.mode {
            Mode::Sequential => {
                let scan = scan_source(source.as_ref())?;
                (Mode::Sequential, scan.xref, scan.object_streams)
            }
            Mode::Indexed => match reader.build() {
                Ok(xref) => (Mode::Indexed, xref, Vec::new()),
                Err(Error::Xref(err)) if err.is_fatal() => return Err(err.into()),
                Err(err @ Error::IO(_)) => return Err(err),
                Err(err) if options.fallback => {
                    diagnostics.push(Diagnostic::XrefRecovered { reason: err.to_string() });
                    let scan = scan_source(source.as_ref())?;
                    (Mode::Sequential, scan.xref, scan.object_streams)
                }
                Err(err) => return Err(err),
            },
        };
        info!("indexed {} objects ({mode:?})", xref.len());

        let mut resolver = Resolver {
            source,
            xref,
            mode,
            fallback: options.fallback,
            version,
            cache: ObjectCache::new(options.cache_capacity, options.max_depth),
            encryption: None,
            encrypt_id: None,
            recovered: OnceLock::new(),
            headers: Mutex::new(HashMap::new()),
            diagnostics: Mutex::new(Vec::new()),
            max_depth: options.max_depth,
        };
        resolver.record(diagnostics);
        resolver.setup_encryption(&options.password)?;
        if resolver.mode == Mode::Sequential {
            resolver.index_object_streams(object_streams);
            resolver.find_catalog();
        }
        Ok(resolver)
    }

    fn setup_encryption(&mut self, password: &str) -> Result<()> {
        let Ok(encrypt) = self.xref.trailer().get(b"Encrypt") else {
            return Ok(());
        };
        let (dict, encrypt_id): (Dictionary, _) = match encrypt {
            Object::Reference(id) => {
                let id = *id;
                (self.resolve(id)?.as_dict()?.clone(), Some(id))
            }
            Object::Dictionary(dict) => (dict.clone(), None),
            other => {
                return Err(Error::ObjectType {
                    expected: "Dictionary",
                    found: other.enum_variant(),
                });
            }
        };
        let file_id = self
            .xref
            .trailer()
            .get(b"ID")
            .and_then(Object::as_array)
            .ok()
            .and_then(|ids| ids.first())
            .and_then(|id| id.as_str().ok())
            .unwrap_or_default()
            .to_vec();

        let context = EncryptionContext::from_trailer(&dict, &file_id, password)?;
        debug!("document encrypted with {:?}, revision {}", context.method(), context.revision());
        self.encryption = Some(Arc::new(context));
        self.encrypt_id = encrypt_id;
        Ok(())
    }

    /// Add the contents of object streams found by a scan, for numbers not seen yet.
    fn index_object_streams(&mut self, containers: Vec<ObjectId>) {
        for container in containers {
            let numbers = self.resolve(container).and_then(|object| {
                let objects = self.object_stream(container, object.as_stream()?)?;
                Ok(objects.numbers().collect::<Vec<_>>())
            });
            match numbers {
                Ok(numbers) => {
                    for (index, number) in numbers.into_iter().enumerate() {
                        let entry = XrefEntry::Compressed {
                            container: container.0,
                            index,
                        };
                        self.xref.insert_if_absent(number, entry);
                    }
                }
                Err(err) => warn!("skipping object stream {} {} R: {err}", container.0, container.1),
            }
        }
    }

    /// Point a trailer without `/Root` at the catalog, wherever it is stored.
    fn find_catalog(&mut self) {
        if self.xref.trailer().has(b"Root") {
            return;
        }
        let catalog = self
            .objects()
            .filter_map(Result::ok)
            .filter(|(_, object)| object.dict().is_ok_and(|dict| dict.has_type(b"Catalog")))
            .map(|(id, _)| id)
            .last();
        if let Some(id) = catalog {
            self.xref.trailer_mut().set("Root", Object::Reference(id));
        }
    }

    /// The object `id` refers to, parsing it on first use.
    pub fn resolve(&self, id: ObjectId) -> Result<Arc<Object>> {
        let loading = match self.cache.claim(id)? {
            Claim::Hit(object) => return Ok(object),
            Claim::Miss(loading) => loading,
        };
        let object = Arc::new(self.load_entry(id)?);
        loading.finish(object.clone());
        Ok(object)
    }

    /// Follow `object` through any chain of references.
    pub fn dereference(&self, object: &Object) -> Result<Arc<Object>> {
        let mut current = match object {
            Object::Reference(id) => self.resolve(*id)?,
            other => return Ok(Arc::new(other.clone())),
        };
        let mut hops = 1;
        while let Object::Reference(id) = *current {
            if hops >= self.max_depth {
                return Err(Error::ReferenceLimit);
            }
            current = self.resolve(id)?;
            hops += 1;
        }
        Ok(current)
    }

    fn load_entry(&self, id: ObjectId) -> Result<Object> {
        match self.xref.get(id.0) {
            None => Err(Error::ObjectNotFound(id)),
            Some(XrefEntry::Free { .. }) => Err(Error::FreeObject(id)),
            Some(&XrefEntry::InUse { offset, .. }) => self.load_at(offset, id),
            Some(&XrefEntry::Compressed { container, index }) => self.load_compressed(id, container, index),
        }
    }

    fn load_at(&self, offset: usize, id: ObjectId) -> Result<Object> {
        match self.parse_at(offset) {
            Ok(indirect) if indirect.id == id => Ok(indirect.object),
            Ok(indirect) => self.recover(
                id,
                Error::ObjectIdMismatch {
                    expected: id,
                    found: indirect.id,
                },
            ),
            Err(err @ (Error::Syntax { .. } | Error::Lexical { .. } | Error::EndOfInput(_))) => self.recover(id, err),
            Err(err) => Err(err),
        }
    }

    fn parse_at(&self, offset: usize) -> Result<IndirectObject> {
        windowed(self.source.as_ref(), offset, |lexer| {
            let mut parser = Parser::new(lexer, offset).with_resolver(self);
            if let Some(context) = &self.encryption {
                parser = parser.with_encryption(context.clone(), self.encrypt_id);
            }
            let indirect = parser.parse_indirect_object()?;
            self.record(parser.take_diagnostics());
            Ok(indirect)
        })
    }

    /// Second chance for an object its cross-reference entry misplaced: look it up in an
    /// index built by scanning the file.
    fn recover(&self, id: ObjectId, err: Error) -> Result<Object> {
        if self.mode == Mode::Sequential || !self.fallback {
            return Err(err);
        }
        let recovered = self.recovered.get_or_init(|| match scan_source(self.source.as_ref()) {
            Ok(scan) => Some(scan.xref),
            Err(err) => {
                debug!("scan for misplaced objects failed: {err}");
                None
            }
        });
        let Some(&XrefEntry::InUse { offset, generation }) = recovered.as_ref().and_then(|xref| xref.get(id.0)) else {
            return Err(err);
        };
        if generation != id.1 {
            return Err(err);
        }
        match self.parse_at(offset) {
            Ok(indirect) if indirect.id == id => {
                warn!("object {} {} R found at {offset} instead: {err}", id.0, id.1);
                Ok(indirect.object)
            }
            _ => Err(err),
        }
    }

    fn load_compressed(&self, id: ObjectId, container: u32, index: usize) -> Result<Object> {
        let container_id = match self.xref.get(container) {
            Some(&XrefEntry::InUse { generation, .. }) => (container, generation),
            Some(XrefEntry::Compressed { .. }) => {
                return Err(Error::syntax(0, format!("object stream {container} is itself compressed")));
            }
            Some(XrefEntry::Free { .. }) | None => return Err(Error::ObjectNotFound((container, 0))),
        };
        let object = self.resolve(container_id)?;
        let objects = self.object_stream(container_id, object.as_stream()?)?;
        let (number, object) = objects.get(index)?;
        if number != id.0 {
            return Err(Error::syntax(
                0,
                format!("object stream {container} holds object {number} at index {index}, not {}", id.0),
            ));
        }
        Ok(object)
    }

    /// View `stream` as object stream `id`, parsing its header only the first time.
    fn object_stream<'s>(&self, id: ObjectId, stream: &'s Stream) -> Result<ObjectStream<'s>> {
        let known = self.headers.lock().unwrap_or_else(PoisonError::into_inner).get(&id).cloned();
        if let Some(header) = known {
            return ObjectStream::with_header(stream, header);
        }
        let objects = ObjectStream::new(stream)?;
        self.headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, objects.header().clone());
        Ok(objects)
    }

    fn record(&self, diagnostics: Vec<Diagnostic>) {
        if diagnostics.is_empty() {
            return;
        }
        for diagnostic in &diagnostics {
            warn!("{diagnostic}");
        }
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(diagnostics);
    }

    /// Recoverable problems met so far.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn trailer(&self) -> &Dictionary {
        self.xref.trailer()
    }

    /// The document catalog named by the trailer's `/Root`.
    pub fn catalog(&self) -> Result<Arc<Object>> {
        let root = self.trailer().get(b"Root")?.as_reference()?;
        self.resolve(root)
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    pub fn encryption(&self) -> Option<&EncryptionContext> {
        self.encryption.as_deref()
    }

    /// Every object of the index, resolved one at a time. Calling this again starts over.
    pub fn objects(&self) -> Objects<'_> {
        Objects { resolver: self, next: 0 }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn xref(&self) -> &Xref {
        &self.xref
    }

    /// Version from the file header, like `1.7`.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

impl Resolve for Resolver {
    fn resolve(&self, id: ObjectId) -> Result<Arc<Object>> {
        Resolver::resolve(self, id)
    }
}

fn scan_source(source: &dyn Source) -> Result<xref::Scan> {
    let buffer = read_range(source, 0, source.len())?;
    xref::scan(&buffer)
}

/// Iterator over the objects of a [`Resolver`], skipping free entries.
pub struct Objects<'a> {
    resolver: &'a Resolver,
    next: usize,
}

impl Iterator for Objects<'_> {
    type Item = Result<(ObjectId, Arc<Object>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (number, entry) = self.resolver.xref.get_index(self.next)?;
            self.next += 1;
            if let Some(id) = entry.object_id(number) {
                return Some(self.resolver.resolve(id).map(|object| (id, object)));
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.resolver.xref.len().saturating_sub(self.next)))
    }
}
