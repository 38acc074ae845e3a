//! # Hostpack
//!
//! A small, bounded TLV format for the messages exchanged with remote inspectors.
//!
//! ## Format
//!
//! - **Scalars**: `[Tag: 1b][Data: 0 or 8b]`
//! - **Blobs**: `[Tag: 1b][Len: 4b][Data: Len]`
//! - **Containers**: `[Tag: 1b][Len: 4b][Body: Len]`
//!
//! Integers and floats are always 64 bits wide, Little-Endian. Narrower host
//! values are widened by the caller before they reach the wire.


/// Hostpack serialization and deserialization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Byte does not correspond to a valid `Tag`.
    InvalidTag(u8),
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Closing a scope that does not match the active scope.
    ScopeMismatch { expected: Scope, actual: Scope },
    /// Attempted to close a scope when only the Root remains.
    ScopeUnderflow,
    /// Attempted to finalize the buffer with open scopes.
    ScopeStillOpen,
    /// Blob or container length exceeds `u32::MAX`.
    BlobTooLarge(usize),
    /// Attempted to write a second payload into a field.
    TooManyItems,
    /// Attempted to close a field without a payload.
    EmptyField,
    /// Attempted to write something other than a field directly into a map.
    InvalidMapEntry,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "invalid tag byte: {:#04x}", b),
            Error::ScopeMismatch { expected, actual } => {
                write!(f, "scope mismatch: expected {:?}, found {:?}", expected, actual)
            }
            Error::BlobTooLarge(len) => write!(f, "blob of {} bytes exceeds u32 length", len),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Nil = 0x00,
    True = 0x01,
    False = 0x02,
    Int = 0x03,
    Float = 0x04,

    // Blob (Tag + u32 Len + UTF-8)
    Str = 0x10,

    // Containers (Tag + u32 Len + Body)
    List = 0x20,
    Map = 0x21,
    Field = 0x22,
}

impl Tag {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Tag::Nil),
            0x01 => Some(Tag::True),
            0x02 => Some(Tag::False),
            0x03 => Some(Tag::Int),
            0x04 => Some(Tag::Float),
            0x10 => Some(Tag::Str),
            0x20 => Some(Tag::List),
            0x21 => Some(Tag::Map),
            0x22 => Some(Tag::Field),
            _ => None,
        }
    }
}

/// Open container kinds tracked by the `Encoder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Root,
    List,
    /// Accepts only `Field` entries.
    Map,
    /// Holds exactly one payload after its name.
    Field,
}

struct Frame {
    start: usize,
    scope: Scope,
    count: usize,
}

/// Scope-checked encoder that back-patches container lengths on close.
pub struct Encoder {
    buf: Vec<u8>,
    /// Bottom is always `Scope::Root`.
    stack: Vec<Frame>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
            stack: vec![Frame { start: 0, scope: Scope::Root, count: 0 }],
        }
    }

    /// Consumes the encoder and returns the bytes.
    ///
    /// Fails with `Error::ScopeStillOpen` if any container was left open.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if self.stack.len() > 1 {
            return Err(Error::ScopeStillOpen);
        }
        Ok(self.buf)
    }

    fn top(&mut self) -> &mut Frame {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn check_write(&mut self, tag: Tag) -> Result<()> {
        let frame = self.top();
        match frame.scope {
            Scope::Root | Scope::List => Ok(()),
            Scope::Map if tag != Tag::Field => Err(Error::InvalidMapEntry),
            Scope::Map => Ok(()),
            Scope::Field if frame.count >= 1 => Err(Error::TooManyItems),
            Scope::Field => Ok(()),
        }
    }

    fn scalar(&mut self, tag: Tag, data: &[u8]) -> Result<()> {
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(data);
        self.top().count += 1;
        Ok(())
    }

    fn blob(&mut self, tag: Tag, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| Error::BlobTooLarge(data.len()))?;
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(data);
        self.top().count += 1;
        Ok(())
    }

    fn begin_scope(&mut self, tag: Tag, scope: Scope) -> Result<()> {
        self.check_write(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&[0, 0, 0, 0]);
        self.stack.push(Frame { start: self.buf.len(), scope, count: 0 });
        Ok(())
    }

    fn end_scope(&mut self, expected: Scope) -> Result<()> {
        if self.stack.len() <= 1 {
            return Err(Error::ScopeUnderflow);
        }

        let frame = self.top();
        if frame.scope != expected {
            return Err(Error::ScopeMismatch { expected, actual: frame.scope });
        }
        if frame.scope == Scope::Field && frame.count == 0 {
            return Err(Error::EmptyField);
        }

        let Some(frame) = self.stack.pop() else {
            return Err(Error::ScopeUnderflow);
        };
        let body_len = self.buf.len() - frame.start;
        let len = u32::try_from(body_len).map_err(|_| Error::BlobTooLarge(body_len))?;
        self.buf[frame.start - 4..frame.start].copy_from_slice(&len.to_le_bytes());

        self.top().count += 1;
        Ok(())
    }

    pub fn nil(&mut self) -> Result<()> { self.scalar(Tag::Nil, &[]) }
    pub fn bool(&mut self, v: bool) -> Result<()> { self.scalar(if v { Tag::True } else { Tag::False }, &[]) }
    pub fn int(&mut self, v: i64) -> Result<()> { self.scalar(Tag::Int, &v.to_le_bytes()) }
    pub fn float(&mut self, v: f64) -> Result<()> { self.scalar(Tag::Float, &v.to_le_bytes()) }
    pub fn str(&mut self, v: &str) -> Result<()> { self.blob(Tag::Str, v.as_bytes()) }

    pub fn list_begin(&mut self) -> Result<()> { self.begin_scope(Tag::List, Scope::List) }
    pub fn list_end(&mut self) -> Result<()> { self.end_scope(Scope::List) }

    /// Begins a map. Only `field_begin` may be written directly inside it.
    pub fn map_begin(&mut self) -> Result<()> { self.begin_scope(Tag::Map, Scope::Map) }
    pub fn map_end(&mut self) -> Result<()> { self.end_scope(Scope::Map) }

    /// Begins a named field. Exactly one payload item must follow before `field_end`.
    pub fn field_begin(&mut self, name: &str) -> Result<()> {
        self.begin_scope(Tag::Field, Scope::Field)?;
        self.str(name)?;
        // the name is metadata, not the payload
        self.top().count = 0;
        Ok(())
    }
    pub fn field_end(&mut self) -> Result<()> { self.end_scope(Scope::Field) }

    pub fn field_int(&mut self, name: &str, v: i64) -> Result<()> {
        self.field_begin(name)?;
        self.int(v)?;
        self.field_end()
    }

    pub fn field_str(&mut self, name: &str, v: &str) -> Result<()> {
        self.field_begin(name)?;
        self.str(v)?;
        self.field_end()
    }

    pub fn field_bool(&mut self, name: &str, v: bool) -> Result<()> {
        self.field_begin(name)?;
        self.bool(v)?;
        self.field_end()
    }

    /// Writes a field whose payload is `nil`, used for payload-less variants.
    pub fn field_unit(&mut self, name: &str) -> Result<()> {
        self.field_begin(name)?;
        self.nil()?;
        self.field_end()
    }
}

/// A zero-copy, bounds-checked cursor over a byte slice.
///
/// Container reads return new decoders restricted to the container's body.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn peek_tag(&self) -> Result<Tag> {
        let Some(&b) = self.buf.first() else {
            return Err(Error::UnexpectedEnd);
        };
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(Error::UnexpectedEnd);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn take_len(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.take_array()?) as usize)
    }

    fn expect_tag(&mut self, expected: Tag) -> Result<()> {
        let tag = self.peek_tag()?;
        if tag != expected {
            return Err(Error::InvalidTag(tag as u8));
        }
        self.take(1)?;
        Ok(())
    }

    /// Skips the next item and everything nested in it.
    pub fn skip(&mut self) -> Result<()> {
        let tag = self.peek_tag()?;
        self.take(1)?;
        match tag {
            Tag::Nil | Tag::True | Tag::False => {}
            Tag::Int | Tag::Float => { self.take(8)?; }
            Tag::Str | Tag::List | Tag::Map | Tag::Field => {
                let len = self.take_len()?;
                self.take(len)?;
            }
        }
        Ok(())
    }

    pub fn nil(&mut self) -> Result<()> { self.expect_tag(Tag::Nil) }

    pub fn bool(&mut self) -> Result<bool> {
        match self.peek_tag()? {
            Tag::True => { self.take(1)?; Ok(true) }
            Tag::False => { self.take(1)?; Ok(false) }
            other => Err(Error::InvalidTag(other as u8)),
        }
    }

    pub fn int(&mut self) -> Result<i64> {
        self.expect_tag(Tag::Int)?;
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn float(&mut self) -> Result<f64> {
        self.expect_tag(Tag::Float)?;
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    pub fn str(&mut self) -> Result<&'a str> {
        self.expect_tag(Tag::Str)?;
        let len = self.take_len()?;
        std::str::from_utf8(self.take(len)?).map_err(|_| Error::InvalidUtf8)
    }

    fn enter(&mut self, expected: Tag) -> Result<Decoder<'a>> {
        self.expect_tag(expected)?;
        let len = self.take_len()?;
        Ok(Decoder::new(self.take(len)?))
    }

    pub fn list(&mut self) -> Result<ListIter<'a>> {
        Ok(ListIter { dec: self.enter(Tag::List)? })
    }

    pub fn map(&mut self) -> Result<MapIter<'a>> {
        Ok(MapIter { dec: self.enter(Tag::Map)? })
    }

    /// Decodes a field, returning `(name, payload)`.
    pub fn field(&mut self) -> Result<(&'a str, Decoder<'a>)> {
        let mut inner = self.enter(Tag::Field)?;
        let name = inner.str()?;
        Ok((name, inner))
    }
}

/// Iterator over the items of a list; each item is yielded as its own decoder.
#[derive(Debug)]
pub struct ListIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = Result<Decoder<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.dec.remaining() == 0 {
            return None;
        }
        let mut probe = self.dec.clone();
        if let Err(e) = probe.skip() {
            // poison the iterator so a malformed tail is reported once
            self.dec = Decoder::new(&[]);
            return Some(Err(e));
        }
        let len = self.dec.remaining() - probe.remaining();
        Some(self.dec.take(len).map(Decoder::new))
    }
}

/// Iterator over the fields of a map.
#[derive(Debug)]
pub struct MapIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> MapIter<'a> {
    /// Returns the next `(name, payload)` pair, or `None` at the end of the map.
    pub fn next_field(&mut self) -> Result<Option<(&'a str, Decoder<'a>)>> {
        if self.dec.remaining() == 0 {
            return Ok(None);
        }
        let tag = self.dec.peek_tag()?;
        if tag != Tag::Field {
            return Err(Error::InvalidTag(tag as u8));
        }
        self.dec.field().map(Some)
    }
}
