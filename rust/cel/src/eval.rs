//! Tree-walking evaluator. Operates directly on the immutable `Ast` plus the
//! `CheckTable` the checker produced, so call sites that resolved statically
//! (a non-dyn operator, say) skip overload resolution a second time; call
//! sites the checker left dynamic re-resolve against the actual runtime
//! types.

use std::rc::Rc;

use cel_core::{CelMap, MapKey, Optional, Value};

use crate::compiler::ast::{Arena, Ast, BinOp, ComprehensionSpec, ExprKind, Literal, NodeId};
use crate::compiler::registry::{ChainKey, ChainLinkKind, OperatorKind, Registry};
use crate::error::{EvaluationError, EvaluationErrorKind};
use crate::stdlib::values_equal;

pub type EvalResult = Result<Value, EvaluationError>;

/// Checked between comprehension iterations and short-circuit operator
/// sides; a host embedding the evaluator in a request-scoped budget wires
/// this to its own deadline.
pub trait CancellationToken {
    fn is_cancelled(&self) -> bool;
}

pub struct NeverCancelled;

impl CancellationToken for NeverCancelled {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A chained lookup scope: the comprehension accumulator and iteration
/// variable live at the front, the caller-supplied activation at the back.
enum Scope<'a> {
    Binding { name: &'a str, value: Value, parent: &'a Scope<'a> },
    Root(&'a dyn Fn(&str) -> Option<Value>),
}

impl<'a> Scope<'a> {
    fn lookup(&self, name: &str) -> Option<Value> {
        match self {
            Scope::Binding { name: n, value, parent } => {
                if *n == name {
                    Some(value.clone())
                } else {
                    parent.lookup(name)
                }
            }
            Scope::Root(f) => f(name),
        }
    }
}

pub struct Evaluator<'a> {
    ast: &'a Ast,
    table: &'a crate::compiler::ast::CheckTable,
    registry: &'a Registry,
    cancel: &'a dyn CancellationToken,
}

/// Evaluates `ast` (already checked against `table`) using `activation` to
/// resolve free variables not found in the registry's own constants.
pub fn evaluate(
    ast: &Ast,
    table: &crate::compiler::ast::CheckTable,
    registry: &Registry,
    activation: &dyn Fn(&str) -> Option<Value>,
    cancel: &dyn CancellationToken,
) -> EvalResult {
    let evaluator = Evaluator { ast, table, registry, cancel };
    let root_scope = Scope::Root(activation);
    evaluator.eval(evaluator.ast.root, &root_scope)
}

impl<'a> Evaluator<'a> {
    fn arena(&self) -> &Arena {
        &self.ast.arena
    }

    fn check_cancelled(&self) -> Result<(), EvaluationError> {
        if self.cancel.is_cancelled() {
            return Err(EvaluationError::new(EvaluationErrorKind::Cancelled));
        }
        Ok(())
    }

    fn eval(&self, id: NodeId, scope: &Scope) -> EvalResult {
        match &self.arena().get(id).kind {
            ExprKind::Value(lit) => Ok(literal_value(lit)),
            ExprKind::Id(name) => self.eval_id(name, scope),
            ExprKind::Field { receiver, field } => self.eval_field(*receiver, field, scope, false),
            ExprKind::OptField { receiver, field } => self.eval_field(*receiver, field, scope, true),
            ExprKind::Index { receiver, index } => self.eval_index(*receiver, *index, scope, false),
            ExprKind::OptIndex { receiver, index } => self.eval_index(*receiver, *index, scope, true),
            ExprKind::Call { name, args } => self.eval_call(id, name, None, args, scope),
            ExprKind::ReceiverCall { name, receiver, args } => {
                let recv = self.eval(*receiver, scope)?;
                self.eval_call(id, name, Some(recv), args, scope)
            }
            ExprKind::List(items) => self.eval_list(items, scope),
            ExprKind::Map(entries) => self.eval_map(entries, scope),
            ExprKind::Ternary { cond, then_branch, else_branch } => {
                match self.eval(*cond, scope)?.untag() {
                    Value::Bool(true) => self.eval(*then_branch, scope),
                    Value::Bool(false) => self.eval(*else_branch, scope),
                    _ => Err(EvaluationError::new(EvaluationErrorKind::PredicateNotBoolean)),
                }
            }
            ExprKind::And(left, right) => self.eval_and(*left, *right, scope),
            ExprKind::Or(left, right) => self.eval_or(*left, *right, scope),
            ExprKind::Not(inner) => match self.eval(*inner, scope)?.untag() {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(EvaluationError::new(EvaluationErrorKind::TypeMismatch(format!("! applied to {}", other.type_name())))),
            },
            ExprKind::Neg(inner) => self.eval_unary(id, OperatorKind::Neg, *inner, scope),
            ExprKind::Binary { op, left, right } => self.eval_binary(id, *op, *left, *right, scope),
            ExprKind::In { item, container } => self.eval_in(id, *item, *container, scope),
            ExprKind::Comprehension(spec) => self.eval_comprehension(spec, scope),
            ExprKind::HasChain(inner) => self.eval_has(*inner, scope),
            ExprKind::AccuValue => scope.lookup("@accu").ok_or_else(|| EvaluationError::new(EvaluationErrorKind::UnknownVariable("@accu".to_string()))),
            ExprKind::AccuInc => {
                let accu = scope.lookup("@accu").ok_or_else(|| EvaluationError::new(EvaluationErrorKind::UnknownVariable("@accu".to_string())))?;
                match accu.untag() {
                    Value::Int(n) => Ok(Value::Int(n + 1)),
                    other => Err(EvaluationError::new(EvaluationErrorKind::TypeMismatch(format!("accumulator increment on {}", other.type_name())))),
                }
            }
            ExprKind::AccuPush { value } => {
                let accu = scope.lookup("@accu").ok_or_else(|| EvaluationError::new(EvaluationErrorKind::UnknownVariable("@accu".to_string())))?;
                let pushed = self.eval(*value, scope)?;
                match accu.untag() {
                    Value::List(items) => {
                        let mut out = items.as_ref().clone();
                        out.push(pushed);
                        Ok(Value::list(out))
                    }
                    other => Err(EvaluationError::new(EvaluationErrorKind::TypeMismatch(format!("accumulator push on {}", other.type_name())))),
                }
            }
            ExprKind::PredicateGuard { macro_name, predicate } => match self.eval(*predicate, scope)?.untag() {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                other => Err(EvaluationError::new(EvaluationErrorKind::TypeMismatch(format!("{macro_name}() predicate must be bool, got {}", other.type_name())))),
            },
        }
    }

    fn eval_id(&self, name: &str, scope: &Scope) -> EvalResult {
        if let Some(v) = scope.lookup(name) {
            return Ok(v);
        }
        if let Some((_, value)) = self.registry.lookup_constant(name) {
            return Ok(value);
        }
        if let Some(entry) = self.registry.lookup_type(name) {
            let _ = entry;
            return Ok(Value::Type(cel_core::TypeRegistry::message(name)));
        }
        Err(EvaluationError::new(EvaluationErrorKind::UnknownVariable(name.to_string())))
    }

    fn eval_field(&self, receiver: NodeId, field: &str, scope: &Scope, optional: bool) -> EvalResult {
        let recv = self.eval(receiver, scope)?;
        match field_get(&recv, field) {
            Some(v) => Ok(if optional { wrap_optional(v) } else { v }),
            None if optional => Ok(Value::Optional(Rc::new(Optional::None))),
            None => Err(EvaluationError::new(EvaluationErrorKind::NoSuchKey(field.to_string()))),
        }
    }

    fn eval_index(&self, receiver: NodeId, index: NodeId, scope: &Scope, optional: bool) -> EvalResult {
        let recv = self.eval(receiver, scope)?;
        let idx = self.eval(index, scope)?;
        match index_get(&recv, &idx) {
            Ok(Some(v)) => Ok(if optional { wrap_optional(v) } else { v }),
            Ok(None) if optional => Ok(Value::Optional(Rc::new(Optional::None))),
            Ok(None) => Err(index_missing_error(&recv, &idx)),
            Err(e) => Err(e),
        }
    }

    fn eval_list(&self, items: &[NodeId], scope: &Scope) -> EvalResult {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(self.eval(*item, scope)?);
        }
        Ok(Value::list(out))
    }

    fn eval_map(&self, entries: &[(NodeId, NodeId)], scope: &Scope) -> EvalResult {
        let mut out = CelMap::new();
        for (k, v) in entries {
            let key_value = self.eval(*k, scope)?;
            let value = self.eval(*v, scope)?;
            let key = MapKey::from_value(key_value.untag())
                .ok_or_else(|| EvaluationError::new(EvaluationErrorKind::TypeMismatch(format!("map key must be string, bool, int, or uint, got {}", key_value.type_name()))))?;
            if key.is_unsafe() {
                continue;
            }
            out.insert(key, value);
        }
        Ok(Value::Map(Rc::new(out)))
    }

    /// `&&`: a definite `false` on either side wins even if the other side
    /// errored, unless that error is one the spec marks non-recoverable
    /// (`UnknownVariable`/`PredicateNotBoolean`), which always propagates.
    fn eval_and(&self, left: NodeId, right: NodeId, scope: &Scope) -> EvalResult {
        let left_result = self.eval(left, scope);
        if matches!(left_result.as_ref().map(|v| v.untag()), Ok(Value::Bool(false))) {
            return Ok(Value::Bool(false));
        }
        self.check_cancelled()?;
        let right_result = self.eval(right, scope);
        if matches!(right_result.as_ref().map(|v| v.untag()), Ok(Value::Bool(false))) {
            return match &left_result {
                Err(e) if !e.is_recoverable_in_short_circuit() => Err(e.clone()),
                _ => Ok(Value::Bool(false)),
            };
        }
        match (left_result, right_result) {
            (Ok(l), Ok(r)) => match (l.untag(), r.untag()) {
                (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a && *b)),
                _ => Err(EvaluationError::new(EvaluationErrorKind::PredicateNotBoolean)),
            },
            (Err(e), _) => Err(e),
            (_, Err(e)) => Err(e),
        }
    }

    /// `||`, mirroring `eval_and` with the roles of `true`/`false` swapped.
    fn eval_or(&self, left: NodeId, right: NodeId, scope: &Scope) -> EvalResult {
        let left_result = self.eval(left, scope);
        if matches!(left_result.as_ref().map(|v| v.untag()), Ok(Value::Bool(true))) {
            return Ok(Value::Bool(true));
        }
        self.check_cancelled()?;
        let right_result = self.eval(right, scope);
        if matches!(right_result.as_ref().map(|v| v.untag()), Ok(Value::Bool(true))) {
            return match &left_result {
                Err(e) if !e.is_recoverable_in_short_circuit() => Err(e.clone()),
                _ => Ok(Value::Bool(true)),
            };
        }
        match (left_result, right_result) {
            (Ok(l), Ok(r)) => match (l.untag(), r.untag()) {
                (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a || *b)),
                _ => Err(EvaluationError::new(EvaluationErrorKind::PredicateNotBoolean)),
            },
            (Err(e), _) => Err(e),
            (_, Err(e)) => Err(e),
        }
    }

    fn eval_unary(&self, id: NodeId, op: OperatorKind, operand: NodeId, scope: &Scope) -> EvalResult {
        let value = self.eval(operand, scope)?;
        if let Some(overload) = self.table.get(id).static_operator.clone() {
            return (overload.handler)(&value, None);
        }
        let ty = value.untag().runtime_type();
        let (overload, _) = self.registry.resolve_operator(op, &ty, None).map_err(|msg| EvaluationError::new(EvaluationErrorKind::NoMatchingOverload(msg)))?;
        (overload.handler)(&value, None)
    }

    fn eval_binary(&self, id: NodeId, op: BinOp, left: NodeId, right: NodeId, scope: &Scope) -> EvalResult {
        let op = binop_to_operator(op);
        let lv = self.eval(left, scope)?;
        let rv = self.eval(right, scope)?;
        if op == OperatorKind::Eq || op == OperatorKind::Ne {
            if let Some(result) = try_dispatch_operator(self.table, self.registry, id, op, &lv, Some(&rv)) {
                return result;
            }
            let eq = values_equal(&lv, &rv);
            return Ok(Value::Bool(if op == OperatorKind::Eq { eq } else { !eq }));
        }
        if let Some(overload) = self.table.get(id).static_operator.clone() {
            return (overload.handler)(&lv, Some(&rv));
        }
        let left_ty = lv.untag().runtime_type();
        let right_ty = rv.untag().runtime_type();
        let (overload, _) = self
            .registry
            .resolve_operator(op, &left_ty, Some(&right_ty))
            .map_err(|msg| EvaluationError::new(EvaluationErrorKind::NoMatchingOverload(msg)))?;
        (overload.handler)(&lv, Some(&rv))
    }

    fn eval_in(&self, id: NodeId, item: NodeId, container: NodeId, scope: &Scope) -> EvalResult {
        let item_value = self.eval(item, scope)?;
        let container_value = self.eval(container, scope)?;
        if let Some(overload) = self.table.get(id).static_operator.clone() {
            return (overload.handler)(&item_value, Some(&container_value));
        }
        let item_ty = item_value.untag().runtime_type();
        let container_ty = container_value.untag().runtime_type();
        let (overload, _) = self
            .registry
            .resolve_operator(OperatorKind::In, &item_ty, Some(&container_ty))
            .map_err(|msg| EvaluationError::new(EvaluationErrorKind::NoMatchingOverload(msg)))?;
        (overload.handler)(&item_value, Some(&container_value))
    }

    fn eval_call(&self, id: NodeId, name: &str, receiver: Option<Value>, args: &[NodeId], scope: &Scope) -> EvalResult {
        let mut arg_values = Vec::with_capacity(args.len());
        for arg in args {
            arg_values.push(self.eval(*arg, scope)?);
        }
        let info = self.table.get(id);
        if let Some(candidates) = &info.function_candidates {
            let receiver_ty = receiver.as_ref().map(|v| v.untag().runtime_type());
            let arg_types: Vec<_> = arg_values.iter().map(|v| v.untag().runtime_type()).collect();
            if let Ok((overload, _)) = candidates.find_match(receiver_ty.as_ref(), &arg_types) {
                return (overload.handler)(receiver.as_ref(), &arg_values);
            }
        }
        let receiver_ty = receiver.as_ref().map(|v| v.untag().runtime_type());
        let arg_types: Vec<_> = arg_values.iter().map(|v| v.untag().runtime_type()).collect();
        let candidates = self.registry.function_candidates(name, receiver.is_some(), args.len());
        let (overload, _) = candidates.find_match(receiver_ty.as_ref(), &arg_types).map_err(|msg| EvaluationError::new(EvaluationErrorKind::NoMatchingOverload(msg)))?;
        (overload.handler)(receiver.as_ref(), &arg_values)
    }

    fn eval_has(&self, chain: NodeId, scope: &Scope) -> EvalResult {
        self.eval_chain_link(chain, scope, true).map(Value::Bool)
    }

    /// Walks a `has()` field-selection chain: the field/index must exist at
    /// every link, starting from the innermost receiver. `terminal` marks
    /// the outermost link (the argument to `has()` itself) — a missing
    /// terminal link is `false`, but a missing *intermediate* non-optional
    /// link is a `NoSuchKey` error, since there's no value left to resolve
    /// the remaining chain against.
    fn eval_chain_link(&self, node: NodeId, scope: &Scope, terminal: bool) -> Result<bool, EvaluationError> {
        match &self.arena().get(node).kind {
            ExprKind::Field { receiver, field } => self.has_step(*receiver, ChainLinkKind::Field, &ChainKey::Field(field.clone()), scope, terminal),
            ExprKind::OptField { receiver, field } => self.has_step(*receiver, ChainLinkKind::OptField, &ChainKey::Field(field.clone()), scope, terminal),
            ExprKind::Index { receiver, index } => self.has_step(*receiver, ChainLinkKind::Index, &ChainKey::Index(*index), scope, terminal),
            ExprKind::OptIndex { receiver, index } => self.has_step(*receiver, ChainLinkKind::OptIndex, &ChainKey::Index(*index), scope, terminal),
            ExprKind::Id(_) => Ok(true),
            _ => Ok(true),
        }
    }

    fn has_step(&self, receiver: NodeId, kind: ChainLinkKind, key: &ChainKey, scope: &Scope, terminal: bool) -> Result<bool, EvaluationError> {
        if !self.eval_chain_link(receiver, scope, false)? {
            return Ok(false);
        }
        let recv = self.eval(receiver, scope)?;
        let optional = matches!(kind, ChainLinkKind::OptField | ChainLinkKind::OptIndex);
        match key {
            ChainKey::Field(name) => {
                let present = field_get(&recv, name).is_some();
                if !present && !terminal && !optional {
                    return Err(EvaluationError::new(EvaluationErrorKind::NoSuchKey(name.to_string())));
                }
                Ok(present)
            }
            ChainKey::Index(index_node) => {
                let idx = self.eval(*index_node, scope)?;
                match index_get(&recv, &idx) {
                    Ok(opt) => {
                        let present = opt.is_some();
                        if !present && !terminal && !optional {
                            return Err(index_missing_error(&recv, &idx));
                        }
                        Ok(present)
                    }
                    Err(_) if optional => Ok(false),
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn eval_comprehension(&self, spec: &ComprehensionSpec, scope: &Scope) -> EvalResult {
        let iterable = self.eval(spec.iterable, scope)?;
        let elements = comprehension_elements(&iterable)?;
        let mut accu = self.eval(spec.init, scope)?;
        let mut first_error: Option<EvaluationError> = None;
        for element in elements {
            self.check_cancelled()?;
            let accu_scope = Scope::Binding { name: "@accu", value: accu.clone(), parent: scope };
            let iter_scope = Scope::Binding { name: spec.iter_var_name.as_ref(), value: element, parent: &accu_scope };
            if let Some(cond) = spec.condition {
                match self.eval(cond, &iter_scope)?.untag() {
                    Value::Bool(true) => {}
                    Value::Bool(false) => break,
                    _ => return Err(EvaluationError::new(EvaluationErrorKind::PredicateNotBoolean)),
                }
            }
            match self.eval(spec.step, &iter_scope) {
                Ok(next) => accu = next,
                Err(e) if spec.errors_are_fatal || !e.is_recoverable_in_short_circuit() => return Err(e),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        let result_scope = Scope::Binding { name: "@accu", value: accu, parent: scope };
        match self.eval(spec.result, &result_scope) {
            Ok(v) => Ok(v),
            Err(e) => Err(first_error.unwrap_or(e)),
        }
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Uint(u) => Value::Uint(*u),
        Literal::Double(d) => Value::Double(*d),
        Literal::String(s) => Value::String(s.clone()),
        Literal::Bytes(b) => Value::Bytes(b.clone()),
    }
}

fn wrap_optional(v: Value) -> Value {
    Value::Optional(Rc::new(Optional::Some(Box::new(v))))
}

fn field_get(recv: &Value, field: &str) -> Option<Value> {
    match recv.untag() {
        Value::Map(m) => m.get(&MapKey::String(Rc::from(field))).cloned(),
        Value::Message(msg) => msg.fields.get(&MapKey::String(Rc::from(field))).cloned(),
        _ => None,
    }
}

fn index_get(recv: &Value, idx: &Value) -> Result<Option<Value>, EvaluationError> {
    match recv.untag() {
        Value::List(items) => {
            let i = match idx.untag() {
                Value::Int(n) => *n,
                Value::Uint(n) => *n as i64,
                other => return Err(EvaluationError::new(EvaluationErrorKind::TypeMismatch(format!("list index must be int/uint, got {}", other.type_name())))),
            };
            if i < 0 {
                return Err(EvaluationError::new(EvaluationErrorKind::IndexOutOfRange(format!("index out of bounds, index {i} < 0"))));
            }
            if i as usize >= items.len() {
                return Ok(None);
            }
            Ok(Some(items[i as usize].clone()))
        }
        Value::Map(m) => {
            let key = MapKey::from_value(idx.untag()).ok_or_else(|| EvaluationError::new(EvaluationErrorKind::TypeMismatch(format!("map key must be string, bool, int, or uint, got {}", idx.type_name()))))?;
            Ok(m.get(&key).cloned())
        }
        other => Err(EvaluationError::new(EvaluationErrorKind::TypeMismatch(format!("cannot index into {}", other.type_name())))),
    }
}

fn index_missing_error(recv: &Value, idx: &Value) -> EvaluationError {
    match recv.untag() {
        Value::List(items) => {
            let i = match idx.untag() {
                Value::Int(n) => *n,
                Value::Uint(n) => *n as i64,
                _ => 0,
            };
            EvaluationError::new(EvaluationErrorKind::IndexOutOfRange(format!("index out of bounds, index {i} >= size {}", items.len())))
        }
        _ => EvaluationError::new(EvaluationErrorKind::NoSuchKey(idx.to_string())),
    }
}

fn comprehension_elements(iterable: &Value) -> Result<Vec<Value>, EvaluationError> {
    match iterable.untag() {
        Value::List(items) => Ok(items.as_ref().clone()),
        Value::Map(m) => Ok(m.keys().cloned().map(MapKey::into_value).collect()),
        other => Err(EvaluationError::new(EvaluationErrorKind::TypeMismatch(format!("cannot iterate over {}", other.type_name())))),
    }
}

fn binop_to_operator(op: BinOp) -> OperatorKind {
    match op {
        BinOp::Eq => OperatorKind::Eq,
        BinOp::Ne => OperatorKind::Ne,
        BinOp::Lt => OperatorKind::Lt,
        BinOp::Le => OperatorKind::Le,
        BinOp::Gt => OperatorKind::Gt,
        BinOp::Ge => OperatorKind::Ge,
        BinOp::Add => OperatorKind::Add,
        BinOp::Sub => OperatorKind::Sub,
        BinOp::Mul => OperatorKind::Mul,
        BinOp::Div => OperatorKind::Div,
        BinOp::Rem => OperatorKind::Rem,
    }
}

fn try_dispatch_operator(
    table: &crate::compiler::ast::CheckTable,
    registry: &Registry,
    id: NodeId,
    op: OperatorKind,
    left: &Value,
    right: Option<&Value>,
) -> Option<EvalResult> {
    if let Some(overload) = table.get(id).static_operator.clone() {
        return Some((overload.handler)(left, right));
    }
    let left_ty = left.untag().runtime_type();
    let right_ty = right.map(|v| v.untag().runtime_type());
    registry.resolve_operator(op, &left_ty, right_ty.as_ref()).ok().map(|(overload, _)| (overload.handler)(left, right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::{parse, ParserLimits};
    use crate::compiler::registry::Registry;
    use crate::compiler::typecheck::{check, CheckerOptions};
    use crate::host::HostPrimitives;
    use crate::stdlib;

    fn run(expr: &str) -> EvalResult {
        let registry = Registry::new();
        stdlib::install(&registry, &HostPrimitives::default());
        crate::compiler::macros::install_standard_macros(&registry);
        let ast = parse(expr, &registry, true, ParserLimits::default()).unwrap();
        let (table, _) = check(&ast, &registry, &CheckerOptions::default()).unwrap();
        evaluate(&ast, &table, &registry, &|_| None, &NeverCancelled)
    }

    #[test]
    fn arithmetic_evaluates() {
        assert!(matches!(run("1 + 2 * 3").unwrap(), Value::Int(7)));
    }

    #[test]
    fn ternary_short_circuits_unevaluated_branch() {
        assert!(matches!(run("true ? 1 : (1/0)").unwrap(), Value::Int(1)));
    }

    #[test]
    fn logical_or_recovers_from_left_error_when_right_is_true() {
        assert!(matches!(run("(1/0 == 1) || true").unwrap(), Value::Bool(true)));
    }

    #[test]
    fn list_index_out_of_range_errors() {
        assert!(run("[1, 2, 3][5]").is_err());
    }

    #[test]
    fn optional_index_yields_none_instead_of_erroring() {
        let result = run("[1, 2, 3][?5]").unwrap();
        assert!(matches!(result, Value::Optional(_)));
    }

    #[test]
    fn all_macro_requires_every_element_to_satisfy_predicate() {
        assert!(matches!(run("[1, 2, 3].all(x, x > 0)").unwrap(), Value::Bool(true)));
        assert!(matches!(run("[1, 2, 3].all(x, x > 1)").unwrap(), Value::Bool(false)));
    }

    #[test]
    fn map_macro_transforms_each_element() {
        assert!(matches!(run("[1, 2, 3].map(x, x * 2) == [2, 4, 6]").unwrap(), Value::Bool(true)));
    }

    #[test]
    fn has_macro_checks_field_presence() {
        assert!(matches!(run("has({'a': 1}.a)").unwrap(), Value::Bool(true)));
        assert!(matches!(run("has({'a': 1}.b)").unwrap(), Value::Bool(false)));
    }
}
