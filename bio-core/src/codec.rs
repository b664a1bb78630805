//! Mapping between domain types and wire values
//!
//! Every type that crosses the bus implements [`Codec`]. Decoding is strict:
//! a value of the wrong shape is a `Decode` error, never a silent default.

use std::collections::BTreeMap;

use bio_protocol::{ObjectPath, Value};

use crate::data::{
    discriminant, Application, Percent, Point, Progress, Reason, Rectangle, TemplateId, User,
    Variant, Void,
};
use crate::error::{BiometryError, Result};

/// Sentinel string carried by the encoded `Void`
pub const VOID_SENTINEL: &str = "biometry::Void";

/// Bidirectional wire mapping
pub trait Codec: Sized {
    /// Name used in decode error messages
    const WIRE_NAME: &'static str;

    fn encode(&self) -> Value;
    fn decode(value: &Value) -> Result<Self>;
}

fn mismatch<T: Codec>(value: &Value) -> BiometryError {
    BiometryError::decode(T::WIRE_NAME, format!("unexpected {}", value.type_name()))
}

fn fields<'a, T: Codec>(value: &'a Value, arity: usize) -> Result<&'a [Value]> {
    value
        .as_struct(arity)
        .map_err(|reason| BiometryError::decode(T::WIRE_NAME, reason))
}

/// Decode the argument at `index` of a method call
pub fn arg<T: Codec>(args: &[Value], index: usize) -> Result<T> {
    let value = args.get(index).ok_or_else(|| {
        BiometryError::InvalidArguments(format!(
            "missing argument {} ({})",
            index,
            T::WIRE_NAME
        ))
    })?;
    T::decode(value).map_err(|e| BiometryError::InvalidArguments(e.to_string()))
}

/// Reject calls carrying a different number of arguments
pub fn expect_arity(args: &[Value], arity: usize) -> Result<()> {
    if args.len() != arity {
        return Err(BiometryError::InvalidArguments(format!(
            "expected {} arguments, got {}",
            arity,
            args.len()
        )));
    }
    Ok(())
}

// ============================================================================
// Primitives
// ============================================================================

impl Codec for bool {
    const WIRE_NAME: &'static str = "bool";

    fn encode(&self) -> Value {
        Value::Bool(*self)
    }

    fn decode(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl Codec for u32 {
    const WIRE_NAME: &'static str = "uint32";

    fn encode(&self) -> Value {
        Value::Uint32(*self)
    }

    fn decode(value: &Value) -> Result<Self> {
        match value {
            Value::Uint32(v) => Ok(*v),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl Codec for String {
    const WIRE_NAME: &'static str = "string";

    fn encode(&self) -> Value {
        Value::Str(self.clone())
    }

    fn decode(value: &Value) -> Result<Self> {
        match value {
            Value::Str(s) => Ok(s.clone()),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl Codec for ObjectPath {
    const WIRE_NAME: &'static str = "object path";

    fn encode(&self) -> Value {
        Value::ObjectPath(self.clone())
    }

    fn decode(value: &Value) -> Result<Self> {
        match value {
            Value::ObjectPath(p) => Ok(p.clone()),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl<T: Codec> Codec for Vec<T> {
    const WIRE_NAME: &'static str = "array";

    fn encode(&self) -> Value {
        Value::Array(self.iter().map(Codec::encode).collect())
    }

    fn decode(value: &Value) -> Result<Self> {
        match value {
            Value::Array(items) => items.iter().map(T::decode).collect(),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl<T: Codec> Codec for BTreeMap<String, T> {
    const WIRE_NAME: &'static str = "dictionary";

    fn encode(&self) -> Value {
        Value::Dict(self.iter().map(|(k, v)| (k.clone(), v.encode())).collect())
    }

    fn decode(value: &Value) -> Result<Self> {
        match value {
            Value::Dict(entries) => entries
                .iter()
                .map(|(k, v)| T::decode(v).map(|v| (k.clone(), v)))
                .collect(),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

// ============================================================================
// Domain types
// ============================================================================

impl Codec for Application {
    const WIRE_NAME: &'static str = "Application";

    fn encode(&self) -> Value {
        Value::Str(self.as_str().to_string())
    }

    fn decode(value: &Value) -> Result<Self> {
        match value {
            Value::Str(s) => Ok(Application::new(s.clone())),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl Codec for Reason {
    const WIRE_NAME: &'static str = "Reason";

    fn encode(&self) -> Value {
        Value::Str(self.as_str().to_string())
    }

    fn decode(value: &Value) -> Result<Self> {
        match value {
            Value::Str(s) => Ok(Reason::new(s.clone())),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl Codec for User {
    const WIRE_NAME: &'static str = "User";

    fn encode(&self) -> Value {
        // uids travel as int32; the bit pattern is preserved for large ids
        Value::Int32(self.id() as i32)
    }

    fn decode(value: &Value) -> Result<Self> {
        match value {
            Value::Int32(uid) => Ok(User::new(*uid as u32)),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl Codec for TemplateId {
    const WIRE_NAME: &'static str = "TemplateId";

    fn encode(&self) -> Value {
        Value::Uint64(self.value())
    }

    fn decode(value: &Value) -> Result<Self> {
        match value {
            Value::Uint64(id) => Ok(TemplateId::new(*id)),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl Codec for Void {
    const WIRE_NAME: &'static str = "Void";

    fn encode(&self) -> Value {
        Value::Struct(vec![Value::Str(VOID_SENTINEL.to_string())])
    }

    fn decode(value: &Value) -> Result<Self> {
        match fields::<Self>(value, 1)? {
            [Value::Str(s)] if s == VOID_SENTINEL => Ok(Void),
            _ => Err(BiometryError::decode(Self::WIRE_NAME, "missing sentinel")),
        }
    }
}

impl Codec for Point {
    const WIRE_NAME: &'static str = "Point";

    fn encode(&self) -> Value {
        Value::Struct(vec![Value::Uint32(self.x), Value::Uint32(self.y)])
    }

    fn decode(value: &Value) -> Result<Self> {
        match fields::<Self>(value, 2)? {
            [Value::Uint32(x), Value::Uint32(y)] => Ok(Point::new(*x, *y)),
            _ => Err(BiometryError::decode(Self::WIRE_NAME, "expected two uint32 coordinates")),
        }
    }
}

impl Codec for Rectangle {
    const WIRE_NAME: &'static str = "Rectangle";

    fn encode(&self) -> Value {
        Value::Struct(vec![self.top_left.encode(), self.bottom_right.encode()])
    }

    fn decode(value: &Value) -> Result<Self> {
        let f = fields::<Self>(value, 2)?;
        Ok(Rectangle::new(Point::decode(&f[0])?, Point::decode(&f[1])?))
    }
}

impl Codec for Percent {
    const WIRE_NAME: &'static str = "Percent";

    fn encode(&self) -> Value {
        Value::Double(self.value())
    }

    fn decode(value: &Value) -> Result<Self> {
        match value {
            // Range is re-checked so a peer cannot smuggle 1.5 past the type
            Value::Double(v) => Percent::from_raw_value(*v),
            other => Err(mismatch::<Self>(other)),
        }
    }
}

impl Codec for Progress {
    const WIRE_NAME: &'static str = "Progress";

    fn encode(&self) -> Value {
        Value::Struct(vec![self.percent.encode(), self.details.encode()])
    }

    fn decode(value: &Value) -> Result<Self> {
        let f = fields::<Self>(value, 2)?;
        Ok(Progress::with_details(
            Percent::decode(&f[0])?,
            BTreeMap::<String, Variant>::decode(&f[1])?,
        ))
    }
}

impl Codec for Variant {
    const WIRE_NAME: &'static str = "Variant";

    fn encode(&self) -> Value {
        let payload = match self {
            Variant::None => Void.encode(),
            Variant::Bool(b) => Value::Bool(*b),
            Variant::Int(i) => Value::Int64(*i),
            Variant::Double(d) => Value::Double(*d),
            Variant::Rectangle(r) => r.encode(),
            Variant::String(s) => Value::Str(s.clone()),
            Variant::Blob(bytes) => Value::Bytes(bytes.clone()),
            Variant::Vector(items) => Value::Array(items.iter().map(Codec::encode).collect()),
        };
        Value::Struct(vec![Value::Uint16(self.discriminant()), payload])
    }

    fn decode(value: &Value) -> Result<Self> {
        let f = fields::<Self>(value, 2)?;
        let tag = match &f[0] {
            Value::Uint16(tag) => *tag,
            other => {
                return Err(BiometryError::decode(
                    Self::WIRE_NAME,
                    format!("discriminant must be uint16, got {}", other.type_name()),
                ))
            }
        };

        let payload = &f[1];
        let bad_payload = || {
            BiometryError::decode(
                Self::WIRE_NAME,
                format!("payload {} does not match discriminant {}", payload.type_name(), tag),
            )
        };

        match (tag, payload) {
            (discriminant::NONE, _) => Void::decode(payload).map(|_| Variant::None),
            (discriminant::BOOL, Value::Bool(b)) => Ok(Variant::Bool(*b)),
            (discriminant::INT, Value::Int64(i)) => Ok(Variant::Int(*i)),
            (discriminant::DOUBLE, Value::Double(d)) => Ok(Variant::Double(*d)),
            (discriminant::RECTANGLE, _) => Rectangle::decode(payload).map(Variant::Rectangle),
            (discriminant::STRING, Value::Str(s)) => Ok(Variant::String(s.clone())),
            (discriminant::BLOB, Value::Bytes(bytes)) => Ok(Variant::Blob(bytes.clone())),
            (discriminant::VECTOR, Value::Array(items)) => items
                .iter()
                .map(Variant::decode)
                .collect::<Result<Vec<_>>>()
                .map(Variant::Vector),
            (discriminant::NONE..=discriminant::VECTOR, _) => Err(bad_payload()),
            _ => Err(BiometryError::decode(
                Self::WIRE_NAME,
                format!("unknown discriminant {}", tag),
            )),
        }
    }
}
