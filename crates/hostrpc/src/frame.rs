//! # Protocol Frames
//!
//! The request and response envelopes.
//!
//! A frame is one top-level field, `req` or `res`, holding a map with an `id` and
//! a `body`. The body is itself a single field named after its variant.
//!
//! ## Invariants
//! - **Panic Safety**: All decoding paths return `Result`, never panicking on unknown data.
//! - **Forward Compatibility**: Unknown map fields are skipped.
//! - **Log Frames**: `LogStream` responses always carry `LOG_STREAM_ID`.

use hostpack::Decoder;
use hostpack::Encoder;

use crate::error::Error;
use crate::error::Result;
use crate::error::missing;
use crate::value::WireValue;
use crate::value::decode_values;
use crate::value::encode_values;

/// Id carried by unsolicited log-stream responses.
pub const LOG_STREAM_ID: i64 = -1;

// ============================================================================
//  REQUESTS
// ============================================================================

/// Where a member lookup starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Static members of a class, by dotted or slash-separated name.
    Class(String),
    /// Instance members of an object previously pinned by this session.
    Object(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    LoadedClasses,
    StaticFields { class_name: String },
    ObjectFields { object_id: i64 },
    FieldSignature { target: Target, field: String },
    /// `hints` are type descriptors, one per argument.
    MethodSignature { target: Target, method: String, hints: Vec<String> },
    ReadSequence { object_id: i64 },
    ProcessStatus,
    /// Turns the process-wide log stream on or off.
    SetLogStream { enabled: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: i64,
    pub body: RequestBody,
}

impl Request {
    pub fn new(id: i64, body: RequestBody) -> Self {
        Self { id, body }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        enc.field_begin("req")?;
        enc.map_begin()?;
        enc.field_int("id", self.id)?;
        enc.field_begin("body")?;
        encode_request_body(&mut enc, &self.body)?;
        enc.field_end()?;
        enc.map_end()?;
        enc.field_end()?;
        Ok(enc.into_bytes()?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut map = open_envelope(bytes, "req")?;
        let mut id = None;
        let mut body = None;
        while let Some((key, mut val)) = map.next_field()? {
            match key {
                "id" => id = Some(val.int()?),
                "body" => body = Some(decode_request_body(&mut val)?),
                _ => val.skip()?,
            }
        }
        Ok(Self {
            id: id.ok_or_else(|| missing("id"))?,
            body: body.ok_or_else(|| missing("body"))?,
        })
    }
}

fn encode_target(enc: &mut Encoder, target: &Target) -> Result<()> {
    match target {
        Target::Class(name) => enc.field_str("class", name)?,
        Target::Object(id) => enc.field_int("object", *id)?,
    }
    Ok(())
}

fn decode_target(dec: &mut Decoder<'_>) -> Result<Target> {
    let (kind, mut payload) = dec.field()?;
    match kind {
        "class" => Ok(Target::Class(payload.str()?.to_string())),
        "object" => Ok(Target::Object(payload.int()?)),
        other => Err(Error::UnknownVariant(format!("target: {}", other))),
    }
}

fn encode_request_body(enc: &mut Encoder, body: &RequestBody) -> Result<()> {
    match body {
        RequestBody::LoadedClasses => enc.field_unit("LoadedClasses")?,
        RequestBody::ProcessStatus => enc.field_unit("ProcessStatus")?,
        RequestBody::StaticFields { class_name } => {
            enc.field_begin("StaticFields")?;
            enc.map_begin()?;
            enc.field_str("class_name", class_name)?;
            enc.map_end()?;
            enc.field_end()?;
        }
        RequestBody::ObjectFields { object_id } => {
            enc.field_begin("ObjectFields")?;
            enc.map_begin()?;
            enc.field_int("object_id", *object_id)?;
            enc.map_end()?;
            enc.field_end()?;
        }
        RequestBody::FieldSignature { target, field } => {
            enc.field_begin("FieldSignature")?;
            enc.map_begin()?;
            enc.field_begin("target")?;
            encode_target(enc, target)?;
            enc.field_end()?;
            enc.field_str("field", field)?;
            enc.map_end()?;
            enc.field_end()?;
        }
        RequestBody::MethodSignature { target, method, hints } => {
            enc.field_begin("MethodSignature")?;
            enc.map_begin()?;
            enc.field_begin("target")?;
            encode_target(enc, target)?;
            enc.field_end()?;
            enc.field_str("method", method)?;
            enc.field_begin("hints")?;
            enc.list_begin()?;
            for hint in hints {
                enc.str(hint)?;
            }
            enc.list_end()?;
            enc.field_end()?;
            enc.map_end()?;
            enc.field_end()?;
        }
        RequestBody::ReadSequence { object_id } => {
            enc.field_begin("ReadSequence")?;
            enc.map_begin()?;
            enc.field_int("object_id", *object_id)?;
            enc.map_end()?;
            enc.field_end()?;
        }
        RequestBody::SetLogStream { enabled } => {
            enc.field_begin("SetLogStream")?;
            enc.map_begin()?;
            enc.field_bool("enabled", *enabled)?;
            enc.map_end()?;
            enc.field_end()?;
        }
    }
    Ok(())
}

fn decode_request_body(dec: &mut Decoder<'_>) -> Result<RequestBody> {
    let (variant, mut payload) = dec.field()?;
    match variant {
        "LoadedClasses" => {
            payload.nil()?;
            return Ok(RequestBody::LoadedClasses);
        }
        "ProcessStatus" => {
            payload.nil()?;
            return Ok(RequestBody::ProcessStatus);
        }
        "StaticFields" | "ObjectFields" | "FieldSignature" | "MethodSignature" | "ReadSequence"
        | "SetLogStream" => {}
        other => return Err(Error::UnknownVariant(format!("request: {}", other))),
    }

    let mut map = payload.map()?;
    let mut class_name = None;
    let mut object_id = None;
    let mut target = None;
    let mut member = None;
    let mut hints = None;
    let mut enabled = None;
    while let Some((key, mut val)) = map.next_field()? {
        match key {
            "class_name" => class_name = Some(val.str()?.to_string()),
            "object_id" => object_id = Some(val.int()?),
            "target" => target = Some(decode_target(&mut val)?),
            "field" | "method" => member = Some(val.str()?.to_string()),
            "hints" => {
                let mut list = Vec::new();
                for item in val.list()? {
                    list.push(item?.str()?.to_string());
                }
                hints = Some(list);
            }
            "enabled" => enabled = Some(val.bool()?),
            _ => val.skip()?,
        }
    }

    Ok(match variant {
        "StaticFields" => RequestBody::StaticFields {
            class_name: class_name.ok_or_else(|| missing("class_name"))?,
        },
        "ObjectFields" => RequestBody::ObjectFields {
            object_id: object_id.ok_or_else(|| missing("object_id"))?,
        },
        "ReadSequence" => RequestBody::ReadSequence {
            object_id: object_id.ok_or_else(|| missing("object_id"))?,
        },
        "FieldSignature" => RequestBody::FieldSignature {
            target: target.ok_or_else(|| missing("target"))?,
            field: member.ok_or_else(|| missing("field"))?,
        },
        "MethodSignature" => RequestBody::MethodSignature {
            target: target.ok_or_else(|| missing("target"))?,
            method: member.ok_or_else(|| missing("method"))?,
            hints: hints.unwrap_or_default(),
        },
        _ => RequestBody::SetLogStream {
            enabled: enabled.ok_or_else(|| missing("enabled"))?,
        },
    })
}

// ============================================================================
//  RESPONSES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassCategory {
    Class,
    Interface,
    Enum,
    Annotation,
    Unresolved,
}

impl ClassCategory {
    pub fn as_tag(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Enum => "enum",
            Self::Annotation => "annotation",
            Self::Unresolved => "unresolved",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self> {
        Ok(match tag {
            "class" => Self::Class,
            "interface" => Self::Interface,
            "enum" => Self::Enum,
            "annotation" => Self::Annotation,
            "unresolved" => Self::Unresolved,
            other => return Err(Error::UnknownVariant(format!("class category: {}", other))),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassEntry {
    pub name: String,
    pub category: ClassCategory,
    pub loaded: bool,
}

/// One field of a static or instance enumeration, with its current value.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEntry {
    pub name: String,
    /// Display form, e.g. `int[]`.
    pub type_name: String,
    pub descriptor: String,
    pub value: WireValue,
    /// Pinned id of the value when it is an object, else `NO_OBJECT`.
    pub object_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadEntry {
    pub name: String,
    pub daemon: bool,
    pub stack_trace: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    LoadedClasses(Vec<ClassEntry>),
    Fields(Vec<FieldEntry>),
    /// A field descriptor or method signature.
    Signature(String),
    /// The query was valid but matched no member.
    NotFound,
    Sequence { list_type: String, items: Vec<WireValue> },
    ProcessStatus { threads: Vec<ThreadEntry> },
    LogStream(String),
    Ack,
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: i64,
    pub body: ResponseBody,
}

impl Response {
    pub fn new(id: i64, body: ResponseBody) -> Self {
        Self { id, body }
    }

    /// An unsolicited log line.
    pub fn log_stream(text: impl Into<String>) -> Self {
        Self { id: LOG_STREAM_ID, body: ResponseBody::LogStream(text.into()) }
    }

    pub fn error(id: i64, message: impl Into<String>) -> Self {
        Self { id, body: ResponseBody::Error(message.into()) }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        enc.field_begin("res")?;
        enc.map_begin()?;
        enc.field_int("id", self.id)?;
        enc.field_begin("body")?;
        encode_response_body(&mut enc, &self.body)?;
        enc.field_end()?;
        enc.map_end()?;
        enc.field_end()?;
        Ok(enc.into_bytes()?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut map = open_envelope(bytes, "res")?;
        let mut id = None;
        let mut body = None;
        while let Some((key, mut val)) = map.next_field()? {
            match key {
                "id" => id = Some(val.int()?),
                "body" => body = Some(decode_response_body(&mut val)?),
                _ => val.skip()?,
            }
        }
        let response = Self {
            id: id.ok_or_else(|| missing("id"))?,
            body: body.ok_or_else(|| missing("body"))?,
        };
        if matches!(response.body, ResponseBody::LogStream(_)) && response.id != LOG_STREAM_ID {
            return Err(Error::ProtocolViolation(format!("log stream frame with id {}", response.id)));
        }
        Ok(response)
    }
}

fn encode_response_body(enc: &mut Encoder, body: &ResponseBody) -> Result<()> {
    match body {
        ResponseBody::NotFound => enc.field_unit("NotFound")?,
        ResponseBody::Ack => enc.field_unit("Ack")?,
        ResponseBody::Signature(sig) => enc.field_str("Signature", sig)?,
        ResponseBody::LogStream(text) => enc.field_str("LogStream", text)?,
        ResponseBody::Error(message) => enc.field_str("Error", message)?,
        ResponseBody::LoadedClasses(classes) => {
            enc.field_begin("LoadedClasses")?;
            enc.list_begin()?;
            for class in classes {
                enc.map_begin()?;
                enc.field_str("name", &class.name)?;
                enc.field_str("category", class.category.as_tag())?;
                enc.field_bool("loaded", class.loaded)?;
                enc.map_end()?;
            }
            enc.list_end()?;
            enc.field_end()?;
        }
        ResponseBody::Fields(fields) => {
            enc.field_begin("Fields")?;
            enc.list_begin()?;
            for field in fields {
                enc.map_begin()?;
                enc.field_str("name", &field.name)?;
                enc.field_str("type_name", &field.type_name)?;
                enc.field_str("descriptor", &field.descriptor)?;
                enc.field_begin("value")?;
                field.value.encode(enc)?;
                enc.field_end()?;
                enc.field_int("object_id", field.object_id)?;
                enc.map_end()?;
            }
            enc.list_end()?;
            enc.field_end()?;
        }
        ResponseBody::Sequence { list_type, items } => {
            enc.field_begin("Sequence")?;
            enc.map_begin()?;
            enc.field_str("list_type", list_type)?;
            enc.field_begin("items")?;
            encode_values(enc, items)?;
            enc.field_end()?;
            enc.map_end()?;
            enc.field_end()?;
        }
        ResponseBody::ProcessStatus { threads } => {
            enc.field_begin("ProcessStatus")?;
            enc.list_begin()?;
            for thread in threads {
                enc.map_begin()?;
                enc.field_str("name", &thread.name)?;
                enc.field_bool("daemon", thread.daemon)?;
                enc.field_str("stack_trace", &thread.stack_trace)?;
                enc.map_end()?;
            }
            enc.list_end()?;
            enc.field_end()?;
        }
    }
    Ok(())
}

fn decode_response_body(dec: &mut Decoder<'_>) -> Result<ResponseBody> {
    let (variant, mut payload) = dec.field()?;
    Ok(match variant {
        "NotFound" => { payload.nil()?; ResponseBody::NotFound }
        "Ack" => { payload.nil()?; ResponseBody::Ack }
        "Signature" => ResponseBody::Signature(payload.str()?.to_string()),
        "LogStream" => ResponseBody::LogStream(payload.str()?.to_string()),
        "Error" => ResponseBody::Error(payload.str()?.to_string()),
        "LoadedClasses" => {
            let mut classes = Vec::new();
            for item in payload.list()? {
                let mut map = item?.map()?;
                let (mut name, mut category, mut loaded) = (None, None, None);
                while let Some((key, mut val)) = map.next_field()? {
                    match key {
                        "name" => name = Some(val.str()?.to_string()),
                        "category" => category = Some(ClassCategory::from_tag(val.str()?)?),
                        "loaded" => loaded = Some(val.bool()?),
                        _ => val.skip()?,
                    }
                }
                classes.push(ClassEntry {
                    name: name.ok_or_else(|| missing("name"))?,
                    category: category.ok_or_else(|| missing("category"))?,
                    loaded: loaded.ok_or_else(|| missing("loaded"))?,
                });
            }
            ResponseBody::LoadedClasses(classes)
        }
        "Fields" => {
            let mut fields = Vec::new();
            for item in payload.list()? {
                let mut map = item?.map()?;
                let (mut name, mut type_name, mut descriptor, mut value, mut object_id) =
                    (None, None, None, None, None);
                while let Some((key, mut val)) = map.next_field()? {
                    match key {
                        "name" => name = Some(val.str()?.to_string()),
                        "type_name" => type_name = Some(val.str()?.to_string()),
                        "descriptor" => descriptor = Some(val.str()?.to_string()),
                        "value" => value = Some(WireValue::decode(&mut val)?),
                        "object_id" => object_id = Some(val.int()?),
                        _ => val.skip()?,
                    }
                }
                fields.push(FieldEntry {
                    name: name.ok_or_else(|| missing("name"))?,
                    type_name: type_name.ok_or_else(|| missing("type_name"))?,
                    descriptor: descriptor.ok_or_else(|| missing("descriptor"))?,
                    value: value.ok_or_else(|| missing("value"))?,
                    object_id: object_id.ok_or_else(|| missing("object_id"))?,
                });
            }
            ResponseBody::Fields(fields)
        }
        "Sequence" => {
            let mut map = payload.map()?;
            let (mut list_type, mut items) = (None, None);
            while let Some((key, mut val)) = map.next_field()? {
                match key {
                    "list_type" => list_type = Some(val.str()?.to_string()),
                    "items" => items = Some(decode_values(&mut val)?),
                    _ => val.skip()?,
                }
            }
            ResponseBody::Sequence {
                list_type: list_type.ok_or_else(|| missing("list_type"))?,
                items: items.ok_or_else(|| missing("items"))?,
            }
        }
        "ProcessStatus" => {
            let mut threads = Vec::new();
            for item in payload.list()? {
                let mut map = item?.map()?;
                let (mut name, mut daemon, mut stack_trace) = (None, None, None);
                while let Some((key, mut val)) = map.next_field()? {
                    match key {
                        "name" => name = Some(val.str()?.to_string()),
                        "daemon" => daemon = Some(val.bool()?),
                        "stack_trace" => stack_trace = Some(val.str()?.to_string()),
                        _ => val.skip()?,
                    }
                }
                threads.push(ThreadEntry {
                    name: name.ok_or_else(|| missing("name"))?,
                    daemon: daemon.ok_or_else(|| missing("daemon"))?,
                    stack_trace: stack_trace.ok_or_else(|| missing("stack_trace"))?,
                });
            }
            ResponseBody::ProcessStatus { threads }
        }
        other => return Err(Error::UnknownVariant(format!("response: {}", other))),
    })
}

// ============================================================================
//  ENVELOPE
// ============================================================================

fn open_envelope<'a>(bytes: &'a [u8], expected: &str) -> Result<hostpack::MapIter<'a>> {
    let mut dec = Decoder::new(bytes);
    let (kind, mut body) = dec.field()?;
    if kind != expected {
        return Err(Error::UnknownVariant(format!("Top-level frame: {}", kind)));
    }
    Ok(body.map()?)
}

/// Extracts the id of a request or response without decoding its body.
///
/// Used to correlate an error reply with a request whose body is malformed.
pub fn peek_id(bytes: &[u8]) -> Result<i64> {
    let mut dec = Decoder::new(bytes);
    let (kind, mut body) = dec.field()?;
    if kind != "req" && kind != "res" {
        return Err(Error::UnknownVariant(format!("Top-level frame: {}", kind)));
    }

    let mut map = body.map()?;
    while let Some((key, mut val)) = map.next_field()? {
        if key == "id" {
            return Ok(val.int()?);
        }
        val.skip()?;
    }
    Err(missing("id"))
}
