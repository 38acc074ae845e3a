//! # Wire Values
//!
//! Host values as seen by a remote inspector. Every value is a single hostpack
//! field whose name is the variant:
//!
//! | Variant      | Payload                                   |
//! |--------------|-------------------------------------------|
//! | `NotPresent` | nil                                       |
//! | `Null`       | nil                                       |
//! | `Int`        | int                                       |
//! | `Float`      | float                                     |
//! | `Bool`       | bool                                      |
//! | `Str`        | str                                       |
//! | `Object`     | map `{ class_name: str, object_id: int }` |
//! | `List`       | map `{ list_type: str, items: [value] }`  |

use hostpack::Decoder;
use hostpack::Encoder;

use crate::error::Error;
use crate::error::Result;
use crate::error::missing;

/// Maximum nesting of `List` values accepted by the decoder.
pub const MAX_VALUE_DEPTH: usize = 32;

/// Object id used when a value refers to no pinned object.
pub const NO_OBJECT: i64 = -1;

#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// The member exists but produced no value (e.g. `void`).
    NotPresent,
    Null,
    /// Every integral host value, including `char`, widened to 64 bits.
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    /// A reference the client can inspect further by `object_id`.
    Object { class_name: String, object_id: i64 },
    List { list_type: String, items: Vec<WireValue> },
}

impl WireValue {
    fn tag(&self) -> &'static str {
        match self {
            Self::NotPresent => "NotPresent",
            Self::Null => "Null",
            Self::Int(_) => "Int",
            Self::Float(_) => "Float",
            Self::Bool(_) => "Bool",
            Self::Str(_) => "Str",
            Self::Object { .. } => "Object",
            Self::List { .. } => "List",
        }
    }

    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.field_begin(self.tag())?;
        match self {
            Self::NotPresent | Self::Null => enc.nil()?,
            Self::Int(v) => enc.int(*v)?,
            Self::Float(v) => enc.float(*v)?,
            Self::Bool(v) => enc.bool(*v)?,
            Self::Str(v) => enc.str(v)?,
            Self::Object { class_name, object_id } => {
                enc.map_begin()?;
                enc.field_str("class_name", class_name)?;
                enc.field_int("object_id", *object_id)?;
                enc.map_end()?;
            }
            Self::List { list_type, items } => {
                enc.map_begin()?;
                enc.field_str("list_type", list_type)?;
                enc.field_begin("items")?;
                encode_values(enc, items)?;
                enc.field_end()?;
                enc.map_end()?;
            }
        }
        enc.field_end()?;
        Ok(())
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        Self::decode_at(dec, 0)
    }

    fn decode_at(dec: &mut Decoder<'_>, depth: usize) -> Result<Self> {
        if depth > MAX_VALUE_DEPTH {
            return Err(Error::RecursionLimitExceeded);
        }

        let (tag, mut payload) = dec.field()?;
        Ok(match tag {
            "NotPresent" => { payload.nil()?; Self::NotPresent }
            "Null" => { payload.nil()?; Self::Null }
            "Int" => Self::Int(payload.int()?),
            "Float" => Self::Float(payload.float()?),
            "Bool" => Self::Bool(payload.bool()?),
            "Str" => Self::Str(payload.str()?.to_string()),
            "Object" => {
                let mut map = payload.map()?;
                let mut class_name = None;
                let mut object_id = None;
                while let Some((key, mut val)) = map.next_field()? {
                    match key {
                        "class_name" => class_name = Some(val.str()?.to_string()),
                        "object_id" => object_id = Some(val.int()?),
                        _ => val.skip()?,
                    }
                }
                Self::Object {
                    class_name: class_name.ok_or_else(|| missing("class_name"))?,
                    object_id: object_id.ok_or_else(|| missing("object_id"))?,
                }
            }
            "List" => {
                let mut map = payload.map()?;
                let mut list_type = None;
                let mut items = None;
                while let Some((key, mut val)) = map.next_field()? {
                    match key {
                        "list_type" => list_type = Some(val.str()?.to_string()),
                        "items" => items = Some(decode_values_at(&mut val, depth + 1)?),
                        _ => val.skip()?,
                    }
                }
                Self::List {
                    list_type: list_type.ok_or_else(|| missing("list_type"))?,
                    items: items.ok_or_else(|| missing("items"))?,
                }
            }
            other => return Err(Error::UnknownVariant(format!("value: {}", other))),
        })
    }
}

/// Encodes a list of values.
pub fn encode_values(enc: &mut Encoder, values: &[WireValue]) -> Result<()> {
    enc.list_begin()?;
    for value in values {
        value.encode(enc)?;
    }
    enc.list_end()?;
    Ok(())
}

/// Decodes a list of values.
pub fn decode_values(dec: &mut Decoder<'_>) -> Result<Vec<WireValue>> {
    decode_values_at(dec, 0)
}

fn decode_values_at(dec: &mut Decoder<'_>, depth: usize) -> Result<Vec<WireValue>> {
    let mut values = Vec::new();
    for item in dec.list()? {
        values.push(WireValue::decode_at(&mut item?, depth)?);
    }
    Ok(values)
}
