//! Host-provided primitives. The core never calls platform APIs directly —
//! every codec, regex engine, and clock is an explicit trait, each with a
//! default implementation built from an ordinary crate so the engine works
//! out of the box; a host embedding the evaluator in a sandbox can swap any
//! of these for its own.

use std::rc::Rc;

use chrono::{DateTime, Utc};

use cel_core::{CelMap, MapKey, Value};

use crate::error::EvaluationError;

pub trait Utf8Codec {
    fn decode(&self, bytes: &[u8]) -> Result<String, EvaluationError>;
    fn encode(&self, s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }
    fn byte_length(&self, s: &str) -> usize {
        s.len()
    }
}

pub struct StdUtf8Codec;

impl Utf8Codec for StdUtf8Codec {
    fn decode(&self, bytes: &[u8]) -> Result<String, EvaluationError> {
        std::str::from_utf8(bytes).map(str::to_string).map_err(|e| EvaluationError::new(crate::error::EvaluationErrorKind::Conversion(e.to_string())))
    }
}

pub trait Base64Codec {
    fn encode(&self, bytes: &[u8]) -> String;
    fn decode(&self, s: &str) -> Result<Vec<u8>, EvaluationError>;
}

pub struct StdBase64Codec;

impl Base64Codec for StdBase64Codec {
    fn encode(&self, bytes: &[u8]) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    fn decode(&self, s: &str) -> Result<Vec<u8>, EvaluationError> {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|e| EvaluationError::new(crate::error::EvaluationErrorKind::Conversion(e.to_string())))
    }
}

pub trait HexCodec {
    fn encode(&self, bytes: &[u8]) -> String;
    fn decode(&self, s: &str) -> Result<Vec<u8>, EvaluationError>;
}

pub struct StdHexCodec;

impl HexCodec for StdHexCodec {
    fn encode(&self, bytes: &[u8]) -> String {
        hex::encode(bytes)
    }

    fn decode(&self, s: &str) -> Result<Vec<u8>, EvaluationError> {
        hex::decode(s).map_err(|e| EvaluationError::new(crate::error::EvaluationErrorKind::Conversion(e.to_string())))
    }
}

pub trait Matcher {
    fn test(&self, text: &str) -> bool;
}

pub trait RegexEngine {
    fn compile(&self, pattern: &str) -> Result<Box<dyn Matcher>, EvaluationError>;
}

pub struct StdRegexEngine;

struct CompiledRegex(regex::Regex);

impl Matcher for CompiledRegex {
    fn test(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl RegexEngine for StdRegexEngine {
    fn compile(&self, pattern: &str) -> Result<Box<dyn Matcher>, EvaluationError> {
        regex::Regex::new(pattern)
            .map(|re| Box::new(CompiledRegex(re)) as Box<dyn Matcher>)
            .map_err(|e| EvaluationError::new(crate::error::EvaluationErrorKind::BadPattern(e.to_string())))
    }
}

pub trait JsonCodec {
    fn parse(&self, bytes: &[u8]) -> Result<Value, EvaluationError>;
}

pub struct StdJsonCodec;

impl JsonCodec for StdJsonCodec {
    fn parse(&self, bytes: &[u8]) -> Result<Value, EvaluationError> {
        let text =
            std::str::from_utf8(bytes).map_err(|e| EvaluationError::new(crate::error::EvaluationErrorKind::Conversion(e.to_string())))?;
        let parsed: serde_json::Value =
            serde_json::from_str(text).map_err(|e| EvaluationError::new(crate::error::EvaluationErrorKind::Conversion(e.to_string())))?;
        Ok(json_to_value(parsed))
    }
}

fn json_to_value(v: serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::Uint(u)
            } else {
                Value::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::string(s),
        serde_json::Value::Array(items) => Value::list(items.into_iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => {
            let mut out = CelMap::new();
            for (k, v) in map {
                out.insert(MapKey::String(Rc::from(k.as_str())), json_to_value(v));
            }
            Value::Map(Rc::new(out))
        }
    }
}

/// Named-timezone fixed offsets, seconds east of UTC, for the handful of
/// zones exercised in practice. Not a substitute for a real tz database —
/// a host that needs full IANA coverage supplies its own `Clock`. Zones
/// that observe daylight saving use their currently-active (summer) offset
/// rather than modeling the transition.
fn fixed_offset_seconds(tz: &str) -> Option<i32> {
    match tz {
        "UTC" | "Etc/UTC" => Some(0),
        "America/Los_Angeles" => Some(-7 * 3600),
        "America/New_York" => Some(-5 * 3600),
        "America/Denver" => Some(-7 * 3600),
        "America/Chicago" => Some(-6 * 3600),
        "Europe/London" => Some(0),
        "Europe/Berlin" | "Europe/Paris" => Some(3600),
        "Asia/Tokyo" => Some(9 * 3600),
        "Asia/Shanghai" => Some(8 * 3600),
        "Australia/Sydney" => Some(10 * 3600),
        _ => None,
    }
}

pub trait Clock {
    fn parse_rfc3339(&self, s: &str) -> Result<DateTime<Utc>, EvaluationError>;
    fn utc_components(&self, instant: DateTime<Utc>) -> cel_core::time::CalendarComponents;
    fn zoned_components(&self, instant: DateTime<Utc>, tz: &str) -> Result<cel_core::time::CalendarComponents, EvaluationError>;
}

pub struct ChronoClock;

impl Clock for ChronoClock {
    fn parse_rfc3339(&self, s: &str) -> Result<DateTime<Utc>, EvaluationError> {
        cel_core::Timestamp::parse_rfc3339(s)
            .map(|t| t.as_utc())
            .ok_or_else(|| EvaluationError::new(crate::error::EvaluationErrorKind::Conversion(format!("invalid RFC3339 timestamp '{s}'"))))
    }

    fn utc_components(&self, instant: DateTime<Utc>) -> cel_core::time::CalendarComponents {
        cel_core::Timestamp::from_utc(instant).utc_components()
    }

    fn zoned_components(&self, instant: DateTime<Utc>, tz: &str) -> Result<cel_core::time::CalendarComponents, EvaluationError> {
        let offset = fixed_offset_seconds(tz)
            .ok_or_else(|| EvaluationError::new(crate::error::EvaluationErrorKind::Conversion(format!("unknown timezone '{tz}'"))))?;
        Ok(cel_core::Timestamp::from_utc(instant).components_at_offset(offset))
    }
}

/// The bundle of host primitives an `Environment` carries. Stored as
/// `Rc<dyn Trait>` so an `Environment::clone_child()` shares the same
/// adapters as its parent without re-constructing them.
#[derive(Clone)]
pub struct HostPrimitives {
    pub utf8: Rc<dyn Utf8Codec>,
    pub base64: Rc<dyn Base64Codec>,
    pub hex: Rc<dyn HexCodec>,
    pub regex: Rc<dyn RegexEngine>,
    pub json: Rc<dyn JsonCodec>,
    pub clock: Rc<dyn Clock>,
}

impl Default for HostPrimitives {
    fn default() -> Self {
        HostPrimitives {
            utf8: Rc::new(StdUtf8Codec),
            base64: Rc::new(StdBase64Codec),
            hex: Rc::new(StdHexCodec),
            regex: Rc::new(StdRegexEngine),
            json: Rc::new(StdJsonCodec),
            clock: Rc::new(ChronoClock),
        }
    }
}
