//! The runtime value domain the evaluator produces and consumes.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::time::{Duration, Timestamp};
use crate::types::TypeDecl;

/// Keys that would poison a host object's prototype chain if materialized
/// verbatim; dropped silently when building a map from a CEL map literal.
pub const UNSAFE_MAP_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// A map key. CEL permits string, bool, and either integer kind as keys;
/// `Hash`/`Eq` are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    String(Rc<str>),
    Bool(bool),
    Int(i64),
    Uint(u64),
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::String(s) => write!(f, "{s}"),
            MapKey::Bool(b) => write!(f, "{b}"),
            MapKey::Int(i) => write!(f, "{i}"),
            MapKey::Uint(u) => write!(f, "{u}"),
        }
    }
}

impl MapKey {
    pub fn is_unsafe(&self) -> bool {
        matches!(self, MapKey::String(s) if UNSAFE_MAP_KEYS.contains(&s.as_ref()))
    }

    pub fn from_value(v: &Value) -> Option<MapKey> {
        match v {
            Value::String(s) => Some(MapKey::String(s.clone())),
            Value::Bool(b) => Some(MapKey::Bool(*b)),
            Value::Int(i) => Some(MapKey::Int(*i)),
            Value::Uint(u) => Some(MapKey::Uint(*u)),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            MapKey::String(s) => Value::String(s),
            MapKey::Bool(b) => Value::Bool(b),
            MapKey::Int(i) => Value::Int(i),
            MapKey::Uint(u) => Value::Uint(u),
        }
    }
}

/// An ordered map preserving insertion order, per `spec` §3/§4.7
/// ("duplicate keys: last write wins", "maps yield keys in insertion
/// order").
pub type CelMap = IndexMap<MapKey, Value>;

/// A user message instance: a named type with a field table. Field typing
/// is enforced by the registry's declared-fields table, not here.
#[derive(Debug, Clone)]
pub struct Message {
    pub type_name: Rc<str>,
    pub fields: Rc<CelMap>,
}

/// `some v | none`, the result of `.?`/`[?]` chains and `optional.of`/`optional.none`.
#[derive(Debug, Clone)]
pub enum Optional {
    Some(Box<Value>),
    None,
}

impl Optional {
    pub fn has_value(&self) -> bool {
        matches!(self, Optional::Some(_))
    }
}

/// A runtime CEL value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    /// Signed 64-bit integer, always kept within `[i64::MIN, i64::MAX]`;
    /// arithmetic overflow is an evaluation error, never wraps.
    Int(i64),
    /// Unsigned 64-bit integer, a distinct runtime type from `Int` per the
    /// two-distinct-value-types design note.
    Uint(u64),
    Double(f64),
    String(Rc<str>),
    Bytes(Rc<[u8]>),
    List(Rc<Vec<Value>>),
    Map(Rc<CelMap>),
    Timestamp(Timestamp),
    Duration(Duration),
    Type(TypeDecl),
    Optional(Rc<Optional>),
    /// `dyn<T>` tag on a value boundary: wraps a value that was passed
    /// through `dyn()` or came from an unlisted variable, carried so
    /// overload resolution can distinguish `int == int` from
    /// `int == dyn<double>`.
    Dyn(Box<Value>),
    Message(Rc<Message>),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(items))
    }

    pub fn string(s: impl Into<Rc<str>>) -> Value {
        Value::String(s.into())
    }

    pub fn bytes(b: impl Into<Rc<[u8]>>) -> Value {
        Value::Bytes(b.into())
    }

    pub fn dyn_wrap(self) -> Value {
        match self {
            Value::Dyn(_) => self,
            other => Value::Dyn(Box::new(other)),
        }
    }

    pub fn untag(&self) -> &Value {
        match self {
            Value::Dyn(inner) => inner.untag(),
            other => other,
        }
    }

    pub fn is_dyn_tagged(&self) -> bool {
        matches!(self, Value::Dyn(_))
    }

    /// The runtime `Type` this value belongs to, per `type(v)`.
    pub fn runtime_type(&self) -> TypeDecl {
        use crate::types::TypeRegistry as T;
        match self.untag() {
            Value::Null => T::null(),
            Value::Bool(_) => T::bool_(),
            Value::Int(_) => T::int(),
            Value::Uint(_) => T::uint(),
            Value::Double(_) => T::double(),
            Value::String(_) => T::string(),
            Value::Bytes(_) => T::bytes(),
            Value::List(items) => {
                let elem = items.first().map(|v| v.runtime_type()).unwrap_or_else(T::dyn_type);
                T::list(elem)
            }
            Value::Map(m) => {
                let (k, v) = m
                    .iter()
                    .next()
                    .map(|(k, v)| (k.clone().into_value().runtime_type(), v.runtime_type()))
                    .unwrap_or_else(|| (T::dyn_type(), T::dyn_type()));
                T::map(k, v)
            }
            Value::Timestamp(_) => T::message("google.protobuf.Timestamp"),
            Value::Duration(_) => T::message("google.protobuf.Duration"),
            Value::Type(_) => T::type_(),
            Value::Optional(opt) => match opt.as_ref() {
                Optional::Some(v) => T::optional(v.runtime_type()),
                Optional::None => T::optional(T::dyn_type()),
            },
            Value::Message(m) => T::message(m.type_name.clone()),
            Value::Dyn(_) => unreachable!("untag() strips Dyn"),
        }
    }

    pub fn type_name(&self) -> String {
        self.runtime_type().canonical_name()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Uint(u) => write!(f, "{u}u"),
            Value::Double(d) => {
                if d.is_infinite() {
                    write!(f, "{}", if *d > 0.0 { "+Inf" } else { "-Inf" })
                } else {
                    write!(f, "{d}")
                }
            }
            Value::String(s) => write!(f, "{s}"),
            Value::Bytes(b) => {
                write!(f, "b\"")?;
                for byte in b.iter() {
                    write!(f, "\\x{byte:02x}")?;
                }
                write!(f, "\"")
            }
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Timestamp(t) => write!(f, "{t}"),
            Value::Duration(d) => write!(f, "{d}"),
            Value::Type(t) => write!(f, "type({t})"),
            Value::Optional(opt) => match opt.as_ref() {
                Optional::Some(v) => write!(f, "optional({v})"),
                Optional::None => write!(f, "optional.none()"),
            },
            Value::Dyn(inner) => write!(f, "{inner}"),
            Value::Message(m) => write!(f, "{}{{...}}", m.type_name),
        }
    }
}
