//! The normative standard function and operator catalog (spec §4.5),
//! registered into a fresh [`Registry`]. `install` is called once by
//! `Environment::new`; every overload here is an ordinary registration,
//! nothing the registry treats specially.

use std::rc::Rc;

use cel_core::{CelMap, MapKey, Optional, TypeRegistry as T, Value};

use crate::compiler::registry::{FunctionSignature, OperatorKind, OperatorSignature, Registry};
use crate::error::{EvaluationError, EvaluationErrorKind};
use crate::host::HostPrimitives;

type EvalResult = Result<Value, EvaluationError>;

fn arith_err(msg: impl Into<String>) -> EvaluationError {
    EvaluationError::new(EvaluationErrorKind::Arithmetic(msg.into()))
}

fn conv_err(msg: impl Into<String>) -> EvaluationError {
    EvaluationError::new(EvaluationErrorKind::Conversion(msg.into()))
}

fn no_overload(msg: impl Into<String>) -> EvaluationError {
    EvaluationError::new(EvaluationErrorKind::NoMatchingOverload(msg.into()))
}

fn reg_fn(registry: &Registry, name: &str, receiver: Option<cel_core::TypeDecl>, params: Vec<cel_core::TypeDecl>, ret: cel_core::TypeDecl, handler: impl Fn(Option<&Value>, &[Value]) -> EvalResult + 'static) {
    let sig = FunctionSignature { name: Rc::from(name), receiver, params, return_type: ret };
    registry.register_function(sig, Rc::new(handler)).expect("standard library overloads never overlap");
}

fn reg_op(registry: &Registry, op: OperatorKind, left: cel_core::TypeDecl, right: Option<cel_core::TypeDecl>, ret: cel_core::TypeDecl, handler: impl Fn(&Value, Option<&Value>) -> EvalResult + 'static) {
    let sig = OperatorSignature { op, left, right, return_type: ret };
    registry.register_operator(sig, Rc::new(handler)).expect("standard library operators never overlap");
}

pub fn install(registry: &Registry, host: &HostPrimitives) {
    install_conversions(registry, host);
    install_size(registry);
    install_strings(registry, host);
    install_lists(registry);
    install_bytes(registry, host);
    install_time_getters(registry, host);
    install_optional_methods(registry);
    install_operators(registry);
}

fn install_conversions(registry: &Registry, host: &HostPrimitives) {
    reg_fn(registry, "dyn", None, vec![T::param('A')], T::dyn_tagged(T::param('A')), |_, args| Ok(args[0].clone().dyn_wrap()));
    reg_fn(registry, "type", None, vec![T::param('A')], T::type_(), |_, args| Ok(Value::Type(args[0].runtime_type())));

    reg_fn(registry, "bool", None, vec![T::bool_()], T::bool_(), |_, args| Ok(args[0].clone()));
    reg_fn(registry, "bool", None, vec![T::string()], T::bool_(), |_, args| {
        let s = as_string(&args[0])?;
        match s.as_ref() {
            "1" | "t" | "true" | "TRUE" | "True" => Ok(Value::Bool(true)),
            "0" | "f" | "false" | "FALSE" | "False" => Ok(Value::Bool(false)),
            other => Err(conv_err(format!("cannot convert '{other}' to bool"))),
        }
    });

    reg_fn(registry, "int", None, vec![T::int()], T::int(), |_, args| Ok(args[0].clone()));
    reg_fn(registry, "int", None, vec![T::double()], T::int(), |_, args| {
        let d = as_double(&args[0])?;
        if !d.is_finite() {
            return Err(conv_err("cannot convert non-finite double to int"));
        }
        let truncated = d.trunc();
        if truncated < i64::MIN as f64 || truncated > i64::MAX as f64 {
            return Err(arith_err("int overflow converting from double"));
        }
        Ok(Value::Int(truncated as i64))
    });
    reg_fn(registry, "int", None, vec![T::uint()], T::int(), |_, args| {
        let u = as_uint(&args[0])?;
        i64::try_from(u).map(Value::Int).map_err(|_| arith_err("int overflow converting from uint"))
    });
    reg_fn(registry, "int", None, vec![T::string()], T::int(), |_, args| {
        let s = as_string(&args[0])?;
        let trimmed = s.as_ref();
        if trimmed != trimmed.trim() || trimmed.len() > 20 || trimmed.starts_with("0x") || trimmed.starts_with("0X") {
            return Err(conv_err(format!("cannot convert '{trimmed}' to int")));
        }
        trimmed.parse::<i64>().map(Value::Int).map_err(|_| conv_err(format!("cannot convert '{trimmed}' to int")))
    });

    reg_fn(registry, "uint", None, vec![T::uint()], T::uint(), |_, args| Ok(args[0].clone()));
    reg_fn(registry, "uint", None, vec![T::double()], T::uint(), |_, args| {
        let d = as_double(&args[0])?;
        if !d.is_finite() || d < 0.0 || d.trunc() > u64::MAX as f64 {
            return Err(arith_err("uint overflow converting from double"));
        }
        Ok(Value::Uint(d.trunc() as u64))
    });
    reg_fn(registry, "uint", None, vec![T::string()], T::uint(), |_, args| {
        let s = as_string(&args[0])?;
        let trimmed = s.as_ref();
        if trimmed != trimmed.trim() || trimmed.len() > 20 || trimmed.starts_with("0x") || trimmed.starts_with("0X") {
            return Err(conv_err(format!("cannot convert '{trimmed}' to uint")));
        }
        trimmed.parse::<u64>().map(Value::Uint).map_err(|_| conv_err(format!("cannot convert '{trimmed}' to uint")))
    });

    for param_ty in [T::double(), T::int(), T::string()] {
        reg_fn(registry, "double", None, vec![param_ty.clone()], T::double(), |_, args| match &args[0] {
            Value::Double(d) => Ok(Value::Double(*d)),
            Value::Int(i) => Ok(Value::Double(*i as f64)),
            Value::String(s) => parse_double_token(s).ok_or_else(|| conv_err(format!("cannot convert '{s}' to double"))).map(Value::Double),
            other => Err(conv_err(format!("cannot convert {} to double", other.type_name()))),
        });
    }

    for param_ty in [T::string(), T::bool_(), T::int()] {
        reg_fn(registry, "string", None, vec![param_ty.clone()], T::string(), |_, args| Ok(Value::string(args[0].to_string())));
    }
    reg_fn(registry, "string", None, vec![T::double()], T::string(), |_, args| Ok(Value::string(args[0].to_string())));
    reg_fn(registry, "string", None, vec![T::bytes()], T::string(), |_, args| {
        let bytes = as_bytes(&args[0])?;
        String::from_utf8(bytes.to_vec()).map(Value::string).map_err(|e| conv_err(e.to_string()))
    });

    reg_fn(registry, "bytes", None, vec![T::string()], T::bytes(), |_, args| {
        let s = as_string(&args[0])?;
        Ok(Value::bytes(s.as_bytes().to_vec()))
    });
    reg_fn(registry, "bytes", None, vec![T::bytes()], T::bytes(), |_, args| Ok(args[0].clone()));

    let clock = host.clock.clone();
    reg_fn(registry, "timestamp", None, vec![T::string()], T::message("google.protobuf.Timestamp"), move |_, args| {
        let s = as_string(&args[0])?;
        clock.parse_rfc3339(&s).map(|instant| Value::Timestamp(cel_core::Timestamp::from_utc(instant)))
    });
    reg_fn(registry, "duration", None, vec![T::string()], T::message("google.protobuf.Duration"), |_, args| {
        let s = as_string(&args[0])?;
        cel_core::Duration::parse_go_form(&s).map(Value::Duration).ok_or_else(|| conv_err(format!("invalid duration '{s}'")))
    });
}

fn parse_double_token(s: &str) -> Option<f64> {
    match s.to_ascii_lowercase().as_str() {
        "inf" | "+inf" | "infinity" | "+infinity" => Some(f64::INFINITY),
        "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
        "nan" => Some(f64::NAN),
        _ => s.parse().ok(),
    }
}

fn install_size(registry: &Registry) {
    let sizeable = [T::string(), T::bytes(), T::list(T::dyn_type()), T::map(T::dyn_type(), T::dyn_type())];
    for ty in &sizeable {
        reg_fn(registry, "size", None, vec![ty.clone()], T::int(), |_, args| size_of(&args[0]));
        reg_fn(registry, "size", Some(ty.clone()), vec![], T::int(), |recv, _args| size_of(recv.unwrap()));
    }
}

fn size_of(value: &Value) -> EvalResult {
    let n = match value.untag() {
        Value::String(s) => s.chars().count(),
        Value::Bytes(b) => b.len(),
        Value::List(items) => items.len(),
        Value::Map(m) => m.len(),
        other => return Err(no_overload(format!("size({})", other.type_name()))),
    };
    Ok(Value::Int(n as i64))
}

fn as_string(v: &Value) -> Result<Rc<str>, EvaluationError> {
    match v.untag() {
        Value::String(s) => Ok(s.clone()),
        other => Err(no_overload(format!("expected string, got {}", other.type_name()))),
    }
}

fn as_bytes(v: &Value) -> Result<Rc<[u8]>, EvaluationError> {
    match v.untag() {
        Value::Bytes(b) => Ok(b.clone()),
        other => Err(no_overload(format!("expected bytes, got {}", other.type_name()))),
    }
}

fn as_double(v: &Value) -> Result<f64, EvaluationError> {
    match v.untag() {
        Value::Double(d) => Ok(*d),
        other => Err(no_overload(format!("expected double, got {}", other.type_name()))),
    }
}

fn as_uint(v: &Value) -> Result<u64, EvaluationError> {
    match v.untag() {
        Value::Uint(u) => Ok(*u),
        other => Err(no_overload(format!("expected uint, got {}", other.type_name()))),
    }
}

fn as_int(v: &Value) -> Result<i64, EvaluationError> {
    match v.untag() {
        Value::Int(i) => Ok(*i),
        other => Err(no_overload(format!("expected int, got {}", other.type_name()))),
    }
}

fn install_strings(registry: &Registry, host: &HostPrimitives) {
    let str_ty = T::string();

    reg_fn(registry, "startsWith", Some(str_ty.clone()), vec![T::string()], T::bool_(), |recv, args| {
        Ok(Value::Bool(as_string(recv.unwrap())?.starts_with(as_string(&args[0])?.as_ref())))
    });
    reg_fn(registry, "endsWith", Some(str_ty.clone()), vec![T::string()], T::bool_(), |recv, args| {
        Ok(Value::Bool(as_string(recv.unwrap())?.ends_with(as_string(&args[0])?.as_ref())))
    });
    reg_fn(registry, "contains", Some(str_ty.clone()), vec![T::string()], T::bool_(), |recv, args| {
        Ok(Value::Bool(as_string(recv.unwrap())?.contains(as_string(&args[0])?.as_ref())))
    });
    reg_fn(registry, "indexOf", Some(str_ty.clone()), vec![T::string()], T::int(), |recv, args| {
        let s = as_string(recv.unwrap())?;
        let needle = as_string(&args[0])?;
        Ok(Value::Int(s.find(needle.as_ref()).map(|b| byte_to_char_index(&s, b) as i64).unwrap_or(-1)))
    });
    reg_fn(registry, "indexOf", Some(str_ty.clone()), vec![T::string(), T::int()], T::int(), |recv, args| {
        let s = as_string(recv.unwrap())?;
        let needle = as_string(&args[0])?;
        let start = char_to_byte_index(&s, as_int(&args[1])? as usize);
        Ok(Value::Int(s[start..].find(needle.as_ref()).map(|b| byte_to_char_index(&s, start + b) as i64).unwrap_or(-1)))
    });
    reg_fn(registry, "lastIndexOf", Some(str_ty.clone()), vec![T::string()], T::int(), |recv, args| {
        let s = as_string(recv.unwrap())?;
        let needle = as_string(&args[0])?;
        Ok(Value::Int(s.rfind(needle.as_ref()).map(|b| byte_to_char_index(&s, b) as i64).unwrap_or(-1)))
    });

    reg_fn(registry, "substring", Some(str_ty.clone()), vec![T::int()], T::string(), |recv, args| {
        let s = as_string(recv.unwrap())?;
        let chars: Vec<char> = s.chars().collect();
        let start = as_int(&args[0])?;
        substring(&chars, start, chars.len() as i64)
    });
    reg_fn(registry, "substring", Some(str_ty.clone()), vec![T::int(), T::int()], T::string(), |recv, args| {
        let s = as_string(recv.unwrap())?;
        let chars: Vec<char> = s.chars().collect();
        substring(&chars, as_int(&args[0])?, as_int(&args[1])?)
    });

    let regex_host = host.regex.clone();
    reg_fn(registry, "matches", Some(str_ty.clone()), vec![T::string()], T::bool_(), move |recv, args| {
        let s = as_string(recv.unwrap())?;
        let pattern = as_string(&args[0])?;
        let matcher = regex_host.compile(&pattern)?;
        Ok(Value::Bool(matcher.test(&s)))
    });

    reg_fn(registry, "split", Some(str_ty.clone()), vec![T::string()], T::list(T::string()), |recv, args| {
        let s = as_string(recv.unwrap())?;
        let sep = as_string(&args[0])?;
        Ok(Value::list(s.split(sep.as_ref()).map(Value::string).collect()))
    });
    reg_fn(registry, "split", Some(str_ty.clone()), vec![T::string(), T::int()], T::list(T::string()), |recv, args| {
        let s = as_string(recv.unwrap())?;
        let sep = as_string(&args[0])?;
        let limit = as_int(&args[1])?;
        if limit <= 0 {
            return Ok(Value::list(vec![Value::string(s.as_ref())]));
        }
        Ok(Value::list(s.splitn(limit as usize, sep.as_ref()).map(Value::string).collect()))
    });
}

fn byte_to_char_index(s: &str, byte_index: usize) -> usize {
    s[..byte_index].chars().count()
}

fn char_to_byte_index(s: &str, char_index: usize) -> usize {
    s.char_indices().nth(char_index).map(|(b, _)| b).unwrap_or(s.len())
}

fn substring(chars: &[char], start: i64, end: i64) -> EvalResult {
    let len = chars.len() as i64;
    if start < 0 || end > len || start > end {
        return Err(EvaluationError::new(EvaluationErrorKind::IndexOutOfRange(format!("substring bounds [{start}, {end}) out of range for length {len}"))));
    }
    Ok(Value::string(chars[start as usize..end as usize].iter().collect::<String>()))
}

fn install_lists(registry: &Registry) {
    let list_string = T::list(T::string());
    reg_fn(registry, "join", Some(list_string.clone()), vec![], T::string(), |recv, _args| {
        let items = as_list(recv.unwrap())?;
        let mut out = String::new();
        for item in items.iter() {
            out.push_str(&as_string(item)?);
        }
        Ok(Value::string(out))
    });
    reg_fn(registry, "join", Some(list_string), vec![T::string()], T::string(), |recv, args| {
        let items = as_list(recv.unwrap())?;
        let sep = as_string(&args[0])?;
        let mut parts = Vec::with_capacity(items.len());
        for item in items.iter() {
            parts.push(as_string(item)?.to_string());
        }
        Ok(Value::string(parts.join(sep.as_ref())))
    });
}

fn as_list(v: &Value) -> Result<Rc<Vec<Value>>, EvaluationError> {
    match v.untag() {
        Value::List(items) => Ok(items.clone()),
        other => Err(no_overload(format!("expected list, got {}", other.type_name()))),
    }
}

fn install_bytes(registry: &Registry, host: &HostPrimitives) {
    let bytes_ty = T::bytes();

    let json_host = host.json.clone();
    reg_fn(registry, "json", Some(bytes_ty.clone()), vec![], T::map(T::string(), T::dyn_type()), move |recv, _args| {
        let bytes = as_bytes(recv.unwrap())?;
        json_host.parse(&bytes)
    });

    let hex_host = host.hex.clone();
    reg_fn(registry, "hex", Some(bytes_ty.clone()), vec![], T::string(), move |recv, _args| {
        let bytes = as_bytes(recv.unwrap())?;
        Ok(Value::string(hex_host.encode(&bytes)))
    });

    let base64_host = host.base64.clone();
    reg_fn(registry, "base64", Some(bytes_ty.clone()), vec![], T::string(), move |recv, _args| {
        let bytes = as_bytes(recv.unwrap())?;
        Ok(Value::string(base64_host.encode(&bytes)))
    });

    reg_fn(registry, "string", Some(bytes_ty.clone()), vec![], T::string(), |recv, _args| {
        let bytes = as_bytes(recv.unwrap())?;
        String::from_utf8(bytes.to_vec()).map(Value::string).map_err(|e| conv_err(e.to_string()))
    });

    reg_fn(registry, "at", Some(bytes_ty), vec![T::int()], T::int(), |recv, args| {
        let bytes = as_bytes(recv.unwrap())?;
        let idx = as_int(&args[0])?;
        if idx < 0 || idx as usize >= bytes.len() {
            return Err(EvaluationError::new(EvaluationErrorKind::IndexOutOfRange(format!("index {idx} out of range for bytes of length {}", bytes.len()))));
        }
        Ok(Value::Int(bytes[idx as usize] as i64))
    });
}

fn as_timestamp(v: &Value) -> Result<cel_core::Timestamp, EvaluationError> {
    match v.untag() {
        Value::Timestamp(t) => Ok(*t),
        other => Err(no_overload(format!("expected timestamp, got {}", other.type_name()))),
    }
}

fn as_duration(v: &Value) -> Result<cel_core::Duration, EvaluationError> {
    match v.untag() {
        Value::Duration(d) => Ok(*d),
        other => Err(no_overload(format!("expected duration, got {}", other.type_name()))),
    }
}

fn install_time_getters(registry: &Registry, host: &HostPrimitives) {
    let ts_ty = T::message("google.protobuf.Timestamp");
    type Getter = fn(&cel_core::time::CalendarComponents) -> i64;
    let getters: &[(&str, Getter)] = &[
        ("getDate", |c| c.day_of_month0 + 1),
        ("getDayOfMonth", |c| c.day_of_month0),
        ("getDayOfWeek", |c| c.day_of_week),
        ("getDayOfYear", |c| c.day_of_year0),
        ("getFullYear", |c| c.year as i64),
        ("getHours", |c| c.hour),
        ("getMilliseconds", |c| c.millisecond),
        ("getMinutes", |c| c.minute),
        ("getMonth", |c| c.month0),
        ("getSeconds", |c| c.second),
    ];
    for (name, getter) in getters.iter().copied() {
        let clock = host.clock.clone();
        reg_fn(registry, name, Some(ts_ty.clone()), vec![], T::int(), move |recv, _args| {
            let ts = as_timestamp(recv.unwrap())?;
            Ok(Value::Int(getter(&clock.utc_components(ts.as_utc()))))
        });
        let clock = host.clock.clone();
        reg_fn(registry, name, Some(ts_ty.clone()), vec![T::string()], T::int(), move |recv, args| {
            let ts = as_timestamp(recv.unwrap())?;
            let tz = as_string(&args[0])?;
            Ok(Value::Int(getter(&clock.zoned_components(ts.as_utc(), &tz)?)))
        });
    }

    let dur_ty = T::message("google.protobuf.Duration");
    reg_fn(registry, "getHours", Some(dur_ty.clone()), vec![], T::int(), |recv, _| Ok(Value::Int(as_duration(recv.unwrap())?.total_hours())));
    reg_fn(registry, "getMinutes", Some(dur_ty.clone()), vec![], T::int(), |recv, _| Ok(Value::Int(as_duration(recv.unwrap())?.total_minutes())));
    reg_fn(registry, "getSeconds", Some(dur_ty.clone()), vec![], T::int(), |recv, _| Ok(Value::Int(as_duration(recv.unwrap())?.total_seconds())));
    reg_fn(registry, "getMilliseconds", Some(dur_ty), vec![], T::int(), |recv, _| Ok(Value::Int(as_duration(recv.unwrap())?.total_milliseconds())));
}

fn install_optional_methods(registry: &Registry) {
    reg_fn(registry, "of", None, vec![T::param('A')], T::optional(T::param('A')), |_, args| {
        Ok(Value::Optional(Rc::new(Optional::Some(Box::new(args[0].clone())))))
    });
    reg_fn(registry, "none", None, vec![], T::optional(T::dyn_type()), |_, _| Ok(Value::Optional(Rc::new(Optional::None))));

    let opt_ty = T::optional(T::param('A'));
    reg_fn(registry, "hasValue", Some(opt_ty.clone()), vec![], T::bool_(), |recv, _| Ok(Value::Bool(as_optional(recv.unwrap())?.has_value())));
    reg_fn(registry, "value", Some(opt_ty.clone()), vec![], T::param('A'), |recv, _| match as_optional(recv.unwrap())?.as_ref() {
        Optional::Some(v) => Ok((**v).clone()),
        Optional::None => Err(EvaluationError::new(EvaluationErrorKind::NoSuchKey("optional.none() has no value".to_string()))),
    });
    reg_fn(registry, "orValue", Some(opt_ty), vec![T::param('A')], T::param('A'), |recv, args| match as_optional(recv.unwrap())?.as_ref() {
        Optional::Some(v) => Ok((**v).clone()),
        Optional::None => Ok(args[0].clone()),
    });
}

fn as_optional(v: &Value) -> Result<Rc<Optional>, EvaluationError> {
    match v.untag() {
        Value::Optional(o) => Ok(o.clone()),
        other => Err(no_overload(format!("expected optional, got {}", other.type_name()))),
    }
}

fn install_operators(registry: &Registry) {
    install_unary_operators(registry);
    install_additive_operators(registry);
    install_mul_div_mod_operators(registry);
    install_equality_operators(registry);
    install_relational_operators(registry);
    install_in_operator(registry);
}

fn install_unary_operators(registry: &Registry) {
    reg_op(registry, OperatorKind::Neg, T::int(), None, T::int(), |v, _| {
        as_int(v)?.checked_neg().map(Value::Int).ok_or_else(|| arith_err("int negation overflow"))
    });
    reg_op(registry, OperatorKind::Neg, T::double(), None, T::double(), |v, _| Ok(Value::Double(-as_double(v)?)));
    reg_op(registry, OperatorKind::Neg, T::message("google.protobuf.Duration"), None, T::message("google.protobuf.Duration"), |v, _| {
        let d = as_duration(v)?;
        Ok(Value::Duration(cel_core::Duration::new(-d.seconds, -d.nanos)))
    });
    reg_op(registry, OperatorKind::Not, T::bool_(), None, T::bool_(), |v, _| match v.untag() {
        Value::Bool(b) => Ok(Value::Bool(!b)),
        other => Err(no_overload(format!("!{}", other.type_name()))),
    });
}

fn install_additive_operators(registry: &Registry) {
    reg_op(registry, OperatorKind::Add, T::int(), Some(T::int()), T::int(), |l, r| {
        as_int(l)?.checked_add(as_int(r.unwrap())?).map(Value::Int).ok_or_else(|| arith_err("int addition overflow"))
    });
    reg_op(registry, OperatorKind::Add, T::uint(), Some(T::uint()), T::uint(), |l, r| {
        as_uint(l)?.checked_add(as_uint(r.unwrap())?).map(Value::Uint).ok_or_else(|| arith_err("uint addition overflow"))
    });
    reg_op(registry, OperatorKind::Add, T::double(), Some(T::double()), T::double(), |l, r| Ok(Value::Double(as_double(l)? + as_double(r.unwrap())?)));
    reg_op(registry, OperatorKind::Add, T::string(), Some(T::string()), T::string(), |l, r| {
        Ok(Value::string(format!("{}{}", as_string(l)?, as_string(r.unwrap())?)))
    });
    reg_op(registry, OperatorKind::Add, T::bytes(), Some(T::bytes()), T::bytes(), |l, r| {
        let mut out = as_bytes(l)?.to_vec();
        out.extend_from_slice(&as_bytes(r.unwrap())?);
        Ok(Value::bytes(out))
    });
    reg_op(registry, OperatorKind::Add, T::list(T::param('A')), Some(T::list(T::param('A'))), T::list(T::param('A')), |l, r| {
        let mut out = as_list(l)?.as_ref().clone();
        out.extend(as_list(r.unwrap())?.as_ref().clone());
        Ok(Value::list(out))
    });
    let dur = T::message("google.protobuf.Duration");
    let ts = T::message("google.protobuf.Timestamp");
    reg_op(registry, OperatorKind::Add, dur.clone(), Some(dur.clone()), dur.clone(), |l, r| {
        as_duration(l)?.checked_add(as_duration(r.unwrap())?).map(Value::Duration).ok_or_else(|| arith_err("duration addition overflow"))
    });
    reg_op(registry, OperatorKind::Add, ts.clone(), Some(dur.clone()), ts.clone(), |l, r| {
        as_timestamp(l)?.checked_add(as_duration(r.unwrap())?).map(Value::Timestamp).ok_or_else(|| arith_err("timestamp addition overflow"))
    });
    reg_op(registry, OperatorKind::Add, dur, Some(ts.clone()), ts.clone(), |l, r| {
        as_timestamp(r.unwrap())?.checked_add(as_duration(l)?).map(Value::Timestamp).ok_or_else(|| arith_err("timestamp addition overflow"))
    });

    reg_op(registry, OperatorKind::Sub, T::int(), Some(T::int()), T::int(), |l, r| {
        as_int(l)?.checked_sub(as_int(r.unwrap())?).map(Value::Int).ok_or_else(|| arith_err("int subtraction overflow"))
    });
    reg_op(registry, OperatorKind::Sub, T::uint(), Some(T::uint()), T::uint(), |l, r| {
        as_uint(l)?.checked_sub(as_uint(r.unwrap())?).map(Value::Uint).ok_or_else(|| arith_err("uint subtraction overflow"))
    });
    reg_op(registry, OperatorKind::Sub, T::double(), Some(T::double()), T::double(), |l, r| Ok(Value::Double(as_double(l)? - as_double(r.unwrap())?)));
    let dur = T::message("google.protobuf.Duration");
    reg_op(registry, OperatorKind::Sub, ts.clone(), Some(dur.clone()), ts.clone(), |l, r| {
        as_timestamp(l)?.checked_sub_duration(as_duration(r.unwrap())?).map(Value::Timestamp).ok_or_else(|| arith_err("timestamp subtraction overflow"))
    });
    reg_op(registry, OperatorKind::Sub, dur.clone(), Some(dur.clone()), dur, |l, r| {
        as_duration(l)?.checked_sub(as_duration(r.unwrap())?).map(Value::Duration).ok_or_else(|| arith_err("duration subtraction overflow"))
    });
    reg_op(registry, OperatorKind::Sub, ts.clone(), Some(ts.clone()), T::message("google.protobuf.Duration"), |l, r| {
        Ok(Value::Duration(as_timestamp(l)?.sub_timestamp(&as_timestamp(r.unwrap())?)))
    });
}

fn install_mul_div_mod_operators(registry: &Registry) {
    reg_op(registry, OperatorKind::Mul, T::int(), Some(T::int()), T::int(), |l, r| {
        as_int(l)?.checked_mul(as_int(r.unwrap())?).map(Value::Int).ok_or_else(|| arith_err("int multiplication overflow"))
    });
    reg_op(registry, OperatorKind::Mul, T::uint(), Some(T::uint()), T::uint(), |l, r| {
        as_uint(l)?.checked_mul(as_uint(r.unwrap())?).map(Value::Uint).ok_or_else(|| arith_err("uint multiplication overflow"))
    });
    reg_op(registry, OperatorKind::Mul, T::double(), Some(T::double()), T::double(), |l, r| Ok(Value::Double(as_double(l)? * as_double(r.unwrap())?)));

    reg_op(registry, OperatorKind::Div, T::int(), Some(T::int()), T::int(), |l, r| {
        let rhs = as_int(r.unwrap())?;
        if rhs == 0 {
            return Err(arith_err("division by zero"));
        }
        as_int(l)?.checked_div(rhs).ok_or_else(|| arith_err("int division overflow")).map(Value::Int)
    });
    reg_op(registry, OperatorKind::Div, T::uint(), Some(T::uint()), T::uint(), |l, r| {
        let rhs = as_uint(r.unwrap())?;
        if rhs == 0 {
            return Err(arith_err("division by zero"));
        }
        Ok(Value::Uint(as_uint(l)? / rhs))
    });
    reg_op(registry, OperatorKind::Div, T::double(), Some(T::double()), T::double(), |l, r| Ok(Value::Double(as_double(l)? / as_double(r.unwrap())?)));

    reg_op(registry, OperatorKind::Rem, T::int(), Some(T::int()), T::int(), |l, r| {
        let rhs = as_int(r.unwrap())?;
        if rhs == 0 {
            return Err(arith_err("modulo by zero"));
        }
        Ok(Value::Int(as_int(l)? % rhs))
    });
    reg_op(registry, OperatorKind::Rem, T::uint(), Some(T::uint()), T::uint(), |l, r| {
        let rhs = as_uint(r.unwrap())?;
        if rhs == 0 {
            return Err(arith_err("modulo by zero"));
        }
        Ok(Value::Uint(as_uint(l)? % rhs))
    });
}

/// `a == b` for every same-typed pair in the catalog; `register_operator`
/// synthesizes `!=` (and the swapped forms when the two sides differ).
fn install_equality_operators(registry: &Registry) {
    reg_op(registry, OperatorKind::Eq, T::int(), Some(T::int()), T::bool_(), |l, r| Ok(Value::Bool(as_int(l)? == as_int(r.unwrap())?)));
    reg_op(registry, OperatorKind::Eq, T::uint(), Some(T::uint()), T::bool_(), |l, r| Ok(Value::Bool(as_uint(l)? == as_uint(r.unwrap())?)));
    reg_op(registry, OperatorKind::Eq, T::double(), Some(T::double()), T::bool_(), |l, r| Ok(Value::Bool(as_double(l)? == as_double(r.unwrap())?)));
    reg_op(registry, OperatorKind::Eq, T::string(), Some(T::string()), T::bool_(), |l, r| Ok(Value::Bool(as_string(l)? == as_string(r.unwrap())?)));
    reg_op(registry, OperatorKind::Eq, T::bytes(), Some(T::bytes()), T::bool_(), |l, r| Ok(Value::Bool(as_bytes(l)? == as_bytes(r.unwrap())?)));
    reg_op(registry, OperatorKind::Eq, T::bool_(), Some(T::bool_()), T::bool_(), |l, r| match (l.untag(), r.unwrap().untag()) {
        (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a == b)),
        _ => Err(no_overload("bool == bool")),
    });
    reg_op(registry, OperatorKind::Eq, T::null(), Some(T::null()), T::bool_(), |_, _| Ok(Value::Bool(true)));
    reg_op(registry, OperatorKind::Eq, T::message("google.protobuf.Timestamp"), Some(T::message("google.protobuf.Timestamp")), T::bool_(), |l, r| {
        Ok(Value::Bool(as_timestamp(l)? == as_timestamp(r.unwrap())?))
    });
    reg_op(registry, OperatorKind::Eq, T::message("google.protobuf.Duration"), Some(T::message("google.protobuf.Duration")), T::bool_(), |l, r| {
        Ok(Value::Bool(as_duration(l)? == as_duration(r.unwrap())?))
    });
    reg_op(registry, OperatorKind::Eq, T::list(T::dyn_type()), Some(T::list(T::dyn_type())), T::bool_(), |l, r| {
        Ok(Value::Bool(values_equal(l, r.unwrap())))
    });
    reg_op(registry, OperatorKind::Eq, T::map(T::dyn_type(), T::dyn_type()), Some(T::map(T::dyn_type(), T::dyn_type())), T::bool_(), |l, r| {
        Ok(Value::Bool(values_equal(l, r.unwrap())))
    });
    reg_op(registry, OperatorKind::Eq, T::dyn_type(), Some(T::dyn_type()), T::bool_(), |l, r| Ok(Value::Bool(values_equal(l, r.unwrap()))));
}

/// The cross-type/structural equality algorithm (spec §4.7), used directly
/// by the evaluator's dispatch-miss fallback and by the container-equality
/// overloads registered above.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.untag(), b.untag()) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Uint(x), Value::Uint(y)) => x == y,
        (Value::Double(x), Value::Double(y)) => x == y,
        (Value::Int(x), Value::Double(y)) | (Value::Double(y), Value::Int(x)) if a.is_dyn_tagged() || b.is_dyn_tagged() => (*x as f64) == *y,
        (Value::Int(x), Value::Uint(y)) | (Value::Uint(y), Value::Int(x)) if a.is_dyn_tagged() || b.is_dyn_tagged() => *x >= 0 && (*x as u64) == *y,
        (Value::Uint(x), Value::Double(y)) | (Value::Double(y), Value::Uint(x)) if a.is_dyn_tagged() || b.is_dyn_tagged() => (*x as f64) == *y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (Value::Timestamp(x), Value::Timestamp(y)) => x == y,
        (Value::Duration(x), Value::Duration(y)) => x == y,
        (Value::List(x), Value::List(y)) => x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| values_equal(p, q)),
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).map(|other_v| values_equal(v, other_v)).unwrap_or(false))
        }
        (Value::Type(x), Value::Type(y)) => x == y,
        _ => false,
    }
}

/// Exact ordering between a signed and unsigned 64-bit value, without the
/// precision loss a round trip through `f64` would introduce.
fn cmp_int_uint(x: i64, y: u64) -> std::cmp::Ordering {
    if x < 0 {
        std::cmp::Ordering::Less
    } else {
        (x as u64).cmp(&y)
    }
}

fn install_relational_operators(registry: &Registry) {
    macro_rules! comparisons {
        ($ty:expr, $extract:expr) => {
            reg_op(registry, OperatorKind::Lt, $ty.clone(), Some($ty.clone()), T::bool_(), move |l, r| Ok(Value::Bool($extract(l)? < $extract(r.unwrap())?)));
            reg_op(registry, OperatorKind::Le, $ty.clone(), Some($ty.clone()), T::bool_(), move |l, r| Ok(Value::Bool($extract(l)? <= $extract(r.unwrap())?)));
            reg_op(registry, OperatorKind::Gt, $ty.clone(), Some($ty.clone()), T::bool_(), move |l, r| Ok(Value::Bool($extract(l)? > $extract(r.unwrap())?)));
            reg_op(registry, OperatorKind::Ge, $ty.clone(), Some($ty.clone()), T::bool_(), move |l, r| Ok(Value::Bool($extract(l)? >= $extract(r.unwrap())?)));
        };
    }
    comparisons!(T::int(), as_int);
    comparisons!(T::uint(), as_uint);
    comparisons!(T::double(), as_double);
    comparisons!(T::string(), as_string);

    // Mathematical comparison across the three numeric types, not just the
    // same-type overloads above.
    macro_rules! cross_comparisons {
        ($left_ty:expr, $right_ty:expr, $cmp:expr) => {
            reg_op(registry, OperatorKind::Lt, $left_ty.clone(), Some($right_ty.clone()), T::bool_(), move |l, r| {
                Ok(Value::Bool($cmp(l, r.unwrap())? == std::cmp::Ordering::Less))
            });
            reg_op(registry, OperatorKind::Le, $left_ty.clone(), Some($right_ty.clone()), T::bool_(), move |l, r| {
                Ok(Value::Bool($cmp(l, r.unwrap())? != std::cmp::Ordering::Greater))
            });
            reg_op(registry, OperatorKind::Gt, $left_ty.clone(), Some($right_ty.clone()), T::bool_(), move |l, r| {
                Ok(Value::Bool($cmp(l, r.unwrap())? == std::cmp::Ordering::Greater))
            });
            reg_op(registry, OperatorKind::Ge, $left_ty.clone(), Some($right_ty.clone()), T::bool_(), move |l, r| {
                Ok(Value::Bool($cmp(l, r.unwrap())? != std::cmp::Ordering::Less))
            });
        };
    }
    cross_comparisons!(T::int(), T::uint(), |l: &Value, r: &Value| -> Result<std::cmp::Ordering, EvaluationError> { Ok(cmp_int_uint(as_int(l)?, as_uint(r)?)) });
    cross_comparisons!(T::uint(), T::int(), |l: &Value, r: &Value| -> Result<std::cmp::Ordering, EvaluationError> { Ok(cmp_int_uint(as_int(r)?, as_uint(l)?).reverse()) });
    cross_comparisons!(T::int(), T::double(), |l: &Value, r: &Value| -> Result<std::cmp::Ordering, EvaluationError> {
        (as_int(l)? as f64).partial_cmp(&as_double(r)?).ok_or_else(|| no_overload("comparison with NaN"))
    });
    cross_comparisons!(T::double(), T::int(), |l: &Value, r: &Value| -> Result<std::cmp::Ordering, EvaluationError> {
        as_double(l)?.partial_cmp(&(as_int(r)? as f64)).ok_or_else(|| no_overload("comparison with NaN"))
    });
    cross_comparisons!(T::uint(), T::double(), |l: &Value, r: &Value| -> Result<std::cmp::Ordering, EvaluationError> {
        (as_uint(l)? as f64).partial_cmp(&as_double(r)?).ok_or_else(|| no_overload("comparison with NaN"))
    });
    cross_comparisons!(T::double(), T::uint(), |l: &Value, r: &Value| -> Result<std::cmp::Ordering, EvaluationError> {
        as_double(l)?.partial_cmp(&(as_uint(r)? as f64)).ok_or_else(|| no_overload("comparison with NaN"))
    });
    let ts = T::message("google.protobuf.Timestamp");
    reg_op(registry, OperatorKind::Lt, ts.clone(), Some(ts.clone()), T::bool_(), |l, r| Ok(Value::Bool(as_timestamp(l)? < as_timestamp(r.unwrap())?)));
    reg_op(registry, OperatorKind::Le, ts.clone(), Some(ts.clone()), T::bool_(), |l, r| Ok(Value::Bool(as_timestamp(l)? <= as_timestamp(r.unwrap())?)));
    reg_op(registry, OperatorKind::Gt, ts.clone(), Some(ts.clone()), T::bool_(), |l, r| Ok(Value::Bool(as_timestamp(l)? > as_timestamp(r.unwrap())?)));
    reg_op(registry, OperatorKind::Ge, ts, Some(T::message("google.protobuf.Timestamp")), T::bool_(), |l, r| Ok(Value::Bool(as_timestamp(l)? >= as_timestamp(r.unwrap())?)));
    let dur = T::message("google.protobuf.Duration");
    reg_op(registry, OperatorKind::Lt, dur.clone(), Some(dur.clone()), T::bool_(), |l, r| Ok(Value::Bool(as_duration(l)? < as_duration(r.unwrap())?)));
    reg_op(registry, OperatorKind::Le, dur.clone(), Some(dur.clone()), T::bool_(), |l, r| Ok(Value::Bool(as_duration(l)? <= as_duration(r.unwrap())?)));
    reg_op(registry, OperatorKind::Gt, dur.clone(), Some(dur.clone()), T::bool_(), |l, r| Ok(Value::Bool(as_duration(l)? > as_duration(r.unwrap())?)));
    reg_op(registry, OperatorKind::Ge, dur.clone(), Some(dur), T::bool_(), |l, r| Ok(Value::Bool(as_duration(l)? >= as_duration(r.unwrap())?)));
}

fn install_in_operator(registry: &Registry) {
    reg_op(registry, OperatorKind::In, T::param('A'), Some(T::list(T::param('A'))), T::bool_(), |item, container| {
        let items = as_list(container.unwrap())?;
        Ok(Value::Bool(items.iter().any(|v| values_equal(item, v))))
    });
    reg_op(registry, OperatorKind::In, T::param('A'), Some(T::map(T::param('A'), T::dyn_type())), T::bool_(), |item, container| {
        let map = as_map(container.unwrap())?;
        let key = MapKey::from_value(item.untag()).ok_or_else(|| no_overload("map key must be string, bool, int, or uint"))?;
        Ok(Value::Bool(map.contains_key(&key)))
    });
}

fn as_map(v: &Value) -> Result<Rc<CelMap>, EvaluationError> {
    match v.untag() {
        Value::Map(m) => Ok(m.clone()),
        other => Err(no_overload(format!("expected map, got {}", other.type_name()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::registry::FunctionCandidates;

    fn env() -> (Registry, HostPrimitives) {
        let registry = Registry::new();
        let host = HostPrimitives::default();
        install(&registry, &host);
        (registry, host)
    }

    fn call(registry: &Registry, name: &str, receiver: Option<Value>, args: Vec<Value>) -> EvalResult {
        let receiver_ty = receiver.as_ref().map(|v| v.runtime_type());
        let arg_types: Vec<_> = args.iter().map(|v| v.runtime_type()).collect();
        let candidates: FunctionCandidates = registry.function_candidates(name, receiver.is_some(), args.len());
        let (overload, _) = candidates.find_match(receiver_ty.as_ref(), &arg_types).unwrap();
        (overload.handler)(receiver.as_ref(), &args)
    }

    #[test]
    fn int_conversion_from_double_truncates_toward_zero() {
        let (registry, _) = env();
        let result = call(&registry, "int", None, vec![Value::Double(-4.9)]).unwrap();
        assert!(matches!(result, Value::Int(-4)));
    }

    #[test]
    fn bool_from_string_accepts_exact_tokens_only() {
        let (registry, _) = env();
        assert!(call(&registry, "bool", None, vec![Value::string("true")]).unwrap().to_string() == "true");
        assert!(call(&registry, "bool", None, vec![Value::string("yes")]).is_err());
    }

    #[test]
    fn string_size_counts_code_points_not_bytes() {
        let (registry, _) = env();
        let result = call(&registry, "size", None, vec![Value::string("héllo")]).unwrap();
        assert!(matches!(result, Value::Int(5)));
    }

    #[test]
    fn list_values_equal_checks_pairwise() {
        assert!(values_equal(&Value::list(vec![Value::Int(1), Value::Int(2)]), &Value::list(vec![Value::Int(1), Value::Int(2)])));
        assert!(!values_equal(&Value::list(vec![Value::Int(1)]), &Value::list(vec![Value::Int(2)])));
    }

    #[test]
    fn substring_rejects_out_of_bounds() {
        let (registry, _) = env();
        assert!(call(&registry, "substring", Some(Value::string("abc")), vec![Value::Int(1), Value::Int(10)]).is_err());
    }
}
