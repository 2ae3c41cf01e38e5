use crate::encryption::EncryptionContext;
use crate::{Error, Result, filters};
use indexmap::IndexMap;
use std::borrow::Cow;
use std::fmt;
use std::str;
use std::sync::{Arc, OnceLock};

/// Object identifier consists of two parts: object number and generation number.
pub type ObjectId = (u32, u16);

/// Dictionary object.
///
/// Keys are unique. When a malformed file repeats a key the last value wins.
#[derive(Clone, Default, PartialEq)]
pub struct Dictionary(IndexMap<Vec<u8>, Object>);

/// Stream object.
///
/// `content` holds the bytes exactly as they appear in the file. Decryption and
/// filter decoding run on first call to [`Stream::decoded_content`] and the result
/// is kept for later calls.
#[derive(Clone)]
pub struct Stream {
    /// Associated stream dictionary
    pub dict: Dictionary,
    /// Raw contents of the stream in bytes
    pub content: Vec<u8>,
    crypt: Option<StreamCrypt>,
    decoded: OnceLock<Vec<u8>>,
}

#[derive(Clone)]
struct StreamCrypt {
    context: Arc<EncryptionContext>,
    id: ObjectId,
}

/// Basic PDF object types defined in an enum.
#[derive(Clone, PartialEq)]
pub enum Object {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Name(Vec<u8>),
    String(Vec<u8>, StringFormat),
    Array(Vec<Object>),
    Dictionary(Dictionary),
    Stream(Stream),
    Reference(ObjectId),
}

/// String objects can be written in two formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StringFormat {
    #[default]
    Literal,
    Hexadecimal,
}

/// An object together with the identifier it was defined under.
#[derive(Debug, Clone, PartialEq)]
pub struct IndirectObject {
    pub id: ObjectId,
    pub object: Object,
}

impl From<bool> for Object {
    fn from(value: bool) -> Self {
        Object::Boolean(value)
    }
}

impl From<i64> for Object {
    fn from(number: i64) -> Self {
        Object::Integer(number)
    }
}

macro_rules! from_smaller_ints {
	($( $Int: ty )+) => {
		$(
			impl From<$Int> for Object {
				fn from(number: $Int) -> Self {
					Object::Integer(i64::from(number))
				}
			}
		)+
	}
}

from_smaller_ints! {
    i8 i16 i32
    u8 u16 u32
}

impl From<f64> for Object {
    fn from(number: f64) -> Self {
        Object::Real(number)
    }
}

impl From<&str> for Object {
    fn from(name: &str) -> Self {
        Object::Name(name.as_bytes().to_vec())
    }
}

impl From<Vec<Object>> for Object {
    fn from(array: Vec<Object>) -> Self {
        Object::Array(array)
    }
}

impl From<Dictionary> for Object {
    fn from(dict: Dictionary) -> Self {
        Object::Dictionary(dict)
    }
}

impl From<Stream> for Object {
    fn from(stream: Stream) -> Self {
        Object::Stream(stream)
    }
}

impl From<ObjectId> for Object {
    fn from(id: ObjectId) -> Self {
        Object::Reference(id)
    }
}

impl Object {
    pub fn string_literal<S: Into<Vec<u8>>>(s: S) -> Self {
        Object::String(s.into(), StringFormat::Literal)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Object::Boolean(value) => Ok(*value),
            _ => Err(self.type_error("Boolean")),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Object::Integer(value) => Ok(*value),
            _ => Err(self.type_error("Integer")),
        }
    }

    /// Numeric value of either an integer or a real.
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Object::Integer(value) => Ok(*value as f64),
            Object::Real(value) => Ok(*value),
            _ => Err(self.type_error("Real")),
        }
    }

    pub fn as_name(&self) -> Result<&[u8]> {
        match self {
            Object::Name(name) => Ok(name),
            _ => Err(self.type_error("Name")),
        }
    }

    pub fn as_name_str(&self) -> Result<&str> {
        str::from_utf8(self.as_name()?).map_err(|_| Error::ObjectType {
            expected: "UTF-8 Name",
            found: "Name",
        })
    }

    pub fn as_str(&self) -> Result<&[u8]> {
        match self {
            Object::String(string, _) => Ok(string),
            _ => Err(self.type_error("String")),
        }
    }

    pub fn as_reference(&self) -> Result<ObjectId> {
        match self {
            Object::Reference(id) => Ok(*id),
            _ => Err(self.type_error("Reference")),
        }
    }

    pub fn as_array(&self) -> Result<&Vec<Object>> {
        match self {
            Object::Array(arr) => Ok(arr),
            _ => Err(self.type_error("Array")),
        }
    }

    pub fn as_dict(&self) -> Result<&Dictionary> {
        match self {
            Object::Dictionary(dict) => Ok(dict),
            _ => Err(self.type_error("Dictionary")),
        }
    }

    pub fn as_stream(&self) -> Result<&Stream> {
        match self {
            Object::Stream(stream) => Ok(stream),
            _ => Err(self.type_error("Stream")),
        }
    }

    /// The dictionary of a dictionary object or of a stream object.
    pub fn dict(&self) -> Result<&Dictionary> {
        match self {
            Object::Dictionary(dict) => Ok(dict),
            Object::Stream(stream) => Ok(&stream.dict),
            _ => Err(self.type_error("Dictionary or Stream")),
        }
    }

    pub fn enum_variant(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::Name(_) => "Name",
            Object::String(..) => "String",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream(_) => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    fn type_error(&self, expected: &'static str) -> Error {
        Error::ObjectType {
            expected,
            found: self.enum_variant(),
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Null => f.write_str("null"),
            Object::Boolean(value) => write!(f, "{value}"),
            Object::Integer(value) => write!(f, "{value}"),
            Object::Real(value) => write!(f, "{value}"),
            Object::Name(name) => write!(f, "/{}", String::from_utf8_lossy(name)),
            Object::String(text, StringFormat::Literal) => write!(f, "({})", String::from_utf8_lossy(text)),
            Object::String(text, StringFormat::Hexadecimal) => {
                f.write_str("<")?;
                for byte in text {
                    write!(f, "{byte:02X}")?;
                }
                f.write_str(">")
            }
            Object::Array(array) => {
                let items = array.iter().map(|item| format!("{item:?}")).collect::<Vec<String>>();
                write!(f, "[{}]", items.join(" "))
            }
            Object::Dictionary(dict) => write!(f, "{dict:?}"),
            Object::Stream(stream) => write!(f, "{stream:?}"),
            Object::Reference(id) => write!(f, "{} {} R", id.0, id.1),
        }
    }
}

impl Dictionary {
    pub fn new() -> Dictionary {
        Dictionary(IndexMap::new())
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &[u8]) -> Result<&Object> {
        self.0
            .get(key)
            .ok_or_else(|| Error::DictKey(String::from_utf8_lossy(key).into_owned()))
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Result<&mut Object> {
        self.0
            .get_mut(key)
            .ok_or_else(|| Error::DictKey(String::from_utf8_lossy(key).into_owned()))
    }

    /// Insert or replace the value under `key`.
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<Vec<u8>>,
        V: Into<Object>,
    {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Object> {
        self.0.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_type(&self, type_name: &[u8]) -> bool {
        self.get(b"Type").and_then(Object::as_name).ok() == Some(type_name)
    }

    /// Copy every entry of `other` whose key is not present yet.
    pub fn fill_from(&mut self, other: &Dictionary) {
        for (key, value) in other {
            if !self.0.contains_key(key) {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, Vec<u8>, Object> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> indexmap::map::IterMut<'_, Vec<u8>, Object> {
        self.0.iter_mut()
    }
}

#[macro_export]
macro_rules! dictionary {
	() => {
		$crate::Dictionary::new()
	};
	($( $key: expr => $value: expr ),+ ,) => {
		$crate::dictionary!( $($key => $value),+ )
	};
	($( $key: expr => $value: expr ),*) => {{
		let mut dict = $crate::Dictionary::new();
		$(
			dict.set($key, $value);
		)*
		dict
	}}
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .into_iter()
            .map(|(key, value)| format!("/{} {:?}", String::from_utf8_lossy(key), value))
            .collect::<Vec<String>>();
        write!(f, "<<{}>>", entries.join(" "))
    }
}

impl<'a> IntoIterator for &'a Dictionary {
    type Item = (&'a Vec<u8>, &'a Object);
    type IntoIter = indexmap::map::Iter<'a, Vec<u8>, Object>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<K: Into<Vec<u8>>> FromIterator<(K, Object)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (K, Object)>>(iter: I) -> Self {
        let mut dict = Dictionary::new();
        for (k, v) in iter {
            dict.set(k, v);
        }
        dict
    }
}

impl Stream {
    pub fn new(dict: Dictionary, content: Vec<u8>) -> Stream {
        Stream {
            dict,
            content,
            crypt: None,
            decoded: OnceLock::new(),
        }
    }

    /// Mark the raw content as encrypted under the key of object `id`.
    pub(crate) fn set_decryption(&mut self, context: Arc<EncryptionContext>, id: ObjectId) {
        self.crypt = Some(StreamCrypt { context, id });
    }

    pub fn is_encrypted(&self) -> bool {
        self.crypt.is_some()
    }

    /// Filter names in decoding order. A stream without `/Filter` has none.
    pub fn filters(&self) -> Result<Vec<&[u8]>> {
        match self.dict.get(b"Filter") {
            Err(_) => Ok(vec![]),
            Ok(Object::Name(name)) => Ok(vec![name.as_slice()]),
            Ok(Object::Array(names)) => names.iter().map(Object::as_name).collect(),
            Ok(other) => Err(Error::ObjectType {
                expected: "Name or Array",
                found: other.enum_variant(),
            }),
        }
    }

    /// Decode parameters aligned with [`Stream::filters`].
    pub fn decode_params(&self) -> Result<Vec<Option<&Dictionary>>> {
        match self.dict.get(b"DecodeParms") {
            Err(_) | Ok(Object::Null) => Ok(vec![]),
            Ok(Object::Dictionary(dict)) => Ok(vec![Some(dict)]),
            Ok(Object::Array(params)) => params
                .iter()
                .map(|param| match param {
                    Object::Null => Ok(None),
                    Object::Dictionary(dict) => Ok(Some(dict)),
                    other => Err(Error::ObjectType {
                        expected: "Dictionary or Null",
                        found: other.enum_variant(),
                    }),
                })
                .collect(),
            Ok(other) => Err(Error::ObjectType {
                expected: "Dictionary or Array",
                found: other.enum_variant(),
            }),
        }
    }

    /// Raw content with encryption removed but filters still applied.
    pub fn decrypted_content(&self) -> Result<Cow<'_, [u8]>> {
        match &self.crypt {
            Some(crypt) => Ok(Cow::Owned(crypt.context.decrypt_stream(
                crypt.id,
                &self.dict,
                &self.content,
            )?)),
            None => Ok(Cow::Borrowed(&self.content)),
        }
    }

    /// Fully decoded content. Computed once; later calls return the cached bytes.
    pub fn decoded_content(&self) -> Result<&[u8]> {
        if let Some(decoded) = self.decoded.get() {
            return Ok(decoded);
        }
        if self.dict.has(b"F") {
            return Err(Error::Unsupported("stream data in an external file"));
        }
        let decrypted = self.decrypted_content()?;
        let filters = self.filters()?;
        let decoded = filters::decode(&decrypted, &filters, &self.decode_params()?)?;
        Ok(self.decoded.get_or_init(|| decoded))
    }
}

impl PartialEq for Stream {
    fn eq(&self, other: &Self) -> bool {
        self.dict == other.dict && self.content == other.content
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}stream[{} bytes]endstream", self.dict, self.content.len())
    }
}
