//! The layered, clonable declaration registry: types, variables, constants,
//! operator overloads, function overloads, and macro definitions, plus the
//! cached overload-selection algorithm that both the checker and the
//! evaluator consult.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use cel_core::{TypeDecl, TypeRegistry, Value};

use crate::compiler::ast::NodeId;
use crate::error::{TypeCheckError, TypeCheckErrorKind};

/// A constructor hook for a registered user type: given a field map,
/// produces a runtime value (or rejects it). Stands in for the "generic
/// user-type registration hook" mentioned as the only proto-adjacent
/// surface in scope.
pub type UserTypeCtor = Rc<dyn Fn(&cel_core::CelMap) -> Result<Value, String>>;

pub struct UserTypeEntry {
    pub ctor: UserTypeCtor,
    pub fields: Option<HashMap<Rc<str>, TypeDecl>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Neg,
    Not,
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperatorKind::Add => "+",
            OperatorKind::Sub => "-",
            OperatorKind::Mul => "*",
            OperatorKind::Div => "/",
            OperatorKind::Rem => "%",
            OperatorKind::Eq => "==",
            OperatorKind::Ne => "!=",
            OperatorKind::Lt => "<",
            OperatorKind::Le => "<=",
            OperatorKind::Gt => ">",
            OperatorKind::Ge => ">=",
            OperatorKind::In => "in",
            OperatorKind::Neg => "-(unary)",
            OperatorKind::Not => "!",
        };
        f.write_str(s)
    }
}

pub type OperatorHandlerFn = dyn Fn(&Value, Option<&Value>) -> Result<Value, crate::error::EvaluationError>;

#[derive(Debug)]
pub struct OperatorSignature {
    pub op: OperatorKind,
    pub left: TypeDecl,
    /// `None` for unary operators.
    pub right: Option<TypeDecl>,
    pub return_type: TypeDecl,
}

pub struct OperatorOverload {
    pub signature: OperatorSignature,
    pub handler: Rc<OperatorHandlerFn>,
}

impl fmt::Debug for OperatorOverload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorOverload").field("signature", &self.signature).finish_non_exhaustive()
    }
}

pub type FunctionHandlerFn = dyn Fn(Option<&Value>, &[Value]) -> Result<Value, crate::error::EvaluationError>;

#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub name: Rc<str>,
    pub receiver: Option<TypeDecl>,
    pub params: Vec<TypeDecl>,
    pub return_type: TypeDecl,
}

pub struct FunctionOverload {
    pub signature: FunctionSignature,
    pub handler: Rc<FunctionHandlerFn>,
}

impl fmt::Debug for FunctionOverload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionOverload").field("signature", &self.signature).finish_non_exhaustive()
    }
}

/// The ordered, pre-tiered candidate list for one `(name, receiver-presence,
/// arity)` bucket, as produced by [`Registry::function_candidates`] and
/// cached on the call node's `CheckInfo` by the checker.
#[derive(Debug)]
pub struct FunctionCandidates {
    pub name: Rc<str>,
    pub candidates: Vec<Rc<FunctionOverload>>,
}

fn bind_or_match(declared: &TypeDecl, actual: &TypeDecl, bindings: &mut HashMap<char, TypeDecl>) -> bool {
    if declared.contains_placeholder() {
        declared.bind_placeholder(actual, bindings)
    } else if actual.untag().canonical_name() == "dyn" && declared.is_aggregate() {
        // "Aggregate actuals with name dyn are treated as shape-compatible
        // so that list<A> matches dyn."
        true
    } else {
        declared.matches(&actual.untag()) || declared.matches(actual)
    }
}

impl FunctionCandidates {
    pub fn find_match(&self, receiver: Option<&TypeDecl>, args: &[TypeDecl]) -> Result<(Rc<FunctionOverload>, TypeDecl), String> {
        'candidate: for candidate in &self.candidates {
            let sig = &candidate.signature;
            if sig.params.len() != args.len() {
                continue;
            }
            let mut bindings = HashMap::new();
            match (&sig.receiver, receiver) {
                (None, None) => {}
                (Some(declared), Some(actual)) => {
                    if !bind_or_match(declared, actual, &mut bindings) {
                        continue 'candidate;
                    }
                }
                _ => continue 'candidate,
            }
            for (declared, actual) in sig.params.iter().zip(args) {
                if !bind_or_match(declared, actual, &mut bindings) {
                    continue 'candidate;
                }
            }
            let ret = sig.return_type.template(&bindings);
            return Ok((candidate.clone(), ret));
        }
        Err(describe_no_match(&self.name, receiver, args))
    }
}

fn describe_no_match(name: &str, receiver: Option<&TypeDecl>, args: &[TypeDecl]) -> String {
    let arg_list = args.iter().map(|t| t.canonical_name()).collect::<Vec<_>>().join(", ");
    match receiver {
        Some(r) => format!("found no matching overload for '{}.{}({})'", r.canonical_name(), name, arg_list),
        None => format!("found no matching overload for '{name}({arg_list})'"),
    }
}

/// A built-in macro declaration: `(name, has_receiver, arg_count)` identify
/// it, and `expand` performs the parse-time AST-to-AST desugaring.
#[derive(Debug)]
pub struct MacroHandle {
    pub name: Rc<str>,
    pub has_receiver: bool,
    pub arg_count: usize,
}

type CacheKey = (OperatorKind, String, Option<String>);

#[derive(Default)]
struct Layer {
    locked: Cell<bool>,
    types: RefCell<HashMap<Rc<str>, Rc<UserTypeEntry>>>,
    variables: RefCell<HashMap<Rc<str>, TypeDecl>>,
    constants: RefCell<HashMap<Rc<str>, (TypeDecl, Value)>>,
    functions: RefCell<HashMap<(Rc<str>, bool, usize), Vec<Rc<FunctionOverload>>>>,
    operators: RefCell<HashMap<OperatorKind, Vec<Rc<OperatorOverload>>>>,
    macros: RefCell<HashMap<(Rc<str>, bool, usize), Rc<MacroHandle>>>,
    resolve_cache: RefCell<HashMap<CacheKey, Rc<OperatorOverload>>>,
    check_cache: RefCell<HashMap<CacheKey, TypeDecl>>,
}

/// Layered, clonable declaration store. `clone_child()` returns a new
/// registry that shares every parent entry by reference and may extend —
/// never shadow — them; the parent is locked against further mutation at
/// that point, since its cache results must stay valid for both registries.
#[derive(Clone)]
pub struct Registry {
    layer: Rc<Layer>,
    parent: Option<Rc<Registry>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { layer: Rc::new(Layer::default()), parent: None }
    }

    pub fn clone_child(&self) -> Registry {
        self.layer.locked.set(true);
        Registry { layer: Rc::new(Layer::default()), parent: Some(Rc::new(self.clone())) }
    }

    fn require_unlocked(&self) -> Result<(), TypeCheckError> {
        if self.layer.locked.get() {
            return Err(TypeCheckError::new(TypeCheckErrorKind::DuplicateDeclaration(
                "registry is locked after clone_child(); register on the child instead".to_string(),
            )));
        }
        Ok(())
    }

    pub fn register_type(&self, name: &str, ctor: UserTypeCtor, fields: Option<HashMap<Rc<str>, TypeDecl>>) -> Result<(), TypeCheckError> {
        self.require_unlocked()?;
        if self.lookup_type(name).is_some() {
            return Err(TypeCheckError::new(TypeCheckErrorKind::DuplicateDeclaration(name.to_string())));
        }
        self.layer.types.borrow_mut().insert(Rc::from(name), Rc::new(UserTypeEntry { ctor, fields }));
        Ok(())
    }

    pub fn lookup_type(&self, name: &str) -> Option<Rc<UserTypeEntry>> {
        if let Some(entry) = self.layer.types.borrow().get(name) {
            return Some(entry.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup_type(name))
    }

    pub fn register_variable(&self, name: &str, ty: TypeDecl) -> Result<(), TypeCheckError> {
        self.require_unlocked()?;
        if self.lookup_variable(name).is_some() || self.lookup_constant(name).is_some() {
            return Err(TypeCheckError::new(TypeCheckErrorKind::DuplicateDeclaration(name.to_string())));
        }
        self.layer.variables.borrow_mut().insert(Rc::from(name), ty);
        Ok(())
    }

    pub fn lookup_variable(&self, name: &str) -> Option<TypeDecl> {
        if let Some(ty) = self.layer.variables.borrow().get(name) {
            return Some(ty.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup_variable(name))
    }

    pub fn register_constant(&self, name: &str, ty: TypeDecl, value: Value) -> Result<(), TypeCheckError> {
        self.require_unlocked()?;
        if self.lookup_variable(name).is_some() || self.lookup_constant(name).is_some() {
            return Err(TypeCheckError::new(TypeCheckErrorKind::DuplicateDeclaration(name.to_string())));
        }
        self.layer.constants.borrow_mut().insert(Rc::from(name), (ty, value));
        Ok(())
    }

    pub fn lookup_constant(&self, name: &str) -> Option<(TypeDecl, Value)> {
        if let Some(entry) = self.layer.constants.borrow().get(name) {
            return Some(entry.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup_constant(name))
    }

    fn all_functions(&self, key: &(Rc<str>, bool, usize)) -> Vec<Rc<FunctionOverload>> {
        let mut out = Vec::new();
        if let Some(parent) = &self.parent {
            out.extend(parent.all_functions(key));
        }
        if let Some(bucket) = self.layer.functions.borrow().get(key) {
            out.extend(bucket.iter().cloned());
        }
        out
    }

    pub fn register_function(&self, sig: FunctionSignature, handler: Rc<FunctionHandlerFn>) -> Result<(), TypeCheckError> {
        self.require_unlocked()?;
        let key = (sig.name.clone(), sig.receiver.is_some(), sig.params.len());
        let overload = Rc::new(FunctionOverload { signature: sig, handler });
        for existing in self.all_functions(&key) {
            if signatures_overlap(&existing.signature, &overload.signature) {
                return Err(TypeCheckError::new(TypeCheckErrorKind::OverlappingOverload(overload.signature.name.to_string())));
            }
        }
        self.layer.functions.borrow_mut().entry(key).or_default().push(overload);
        self.layer.check_cache.borrow_mut().clear();
        self.layer.resolve_cache.borrow_mut().clear();
        Ok(())
    }

    /// Builds the tiered candidate bucket for a call site: exact receiver
    /// match, then base-aggregate match, then placeholder-bearing
    /// receivers, per the overload-selection algorithm.
    pub fn function_candidates(&self, name: &str, has_receiver: bool, arity: usize) -> FunctionCandidates {
        let key = (Rc::from(name), has_receiver, arity);
        let all = self.all_functions(&key);
        let (exact, rest): (Vec<_>, Vec<_>) = all.into_iter().partition(|o| match &o.signature.receiver {
            Some(t) => !t.contains_placeholder(),
            None => true,
        });
        let (aggregate, placeholder): (Vec<_>, Vec<_>) = rest.into_iter().partition(|o| {
            o.signature.receiver.as_ref().map(|t| t.is_aggregate()).unwrap_or(false)
        });
        let mut candidates = exact;
        candidates.extend(aggregate);
        candidates.extend(placeholder);
        FunctionCandidates { name: Rc::from(name), candidates }
    }

    fn all_operators(&self, op: OperatorKind) -> Vec<Rc<OperatorOverload>> {
        let mut out = Vec::new();
        if let Some(parent) = &self.parent {
            out.extend(parent.all_operators(op));
        }
        if let Some(bucket) = self.layer.operators.borrow().get(&op) {
            out.extend(bucket.iter().cloned());
        }
        out
    }

    pub fn register_operator(&self, sig: OperatorSignature, handler: Rc<OperatorHandlerFn>) -> Result<(), TypeCheckError> {
        self.require_unlocked()?;
        let op = sig.op;
        let mut to_register = vec![Rc::new(OperatorOverload { signature: sig, handler: handler.clone() })];
        if op == OperatorKind::Eq {
            let left = to_register[0].signature.left.clone();
            let right = to_register[0].signature.right.clone();
            let eq_handler = handler.clone();
            let ne_handler: Rc<OperatorHandlerFn> = Rc::new(move |l, r| {
                let v = eq_handler(l, r)?;
                Ok(Value::Bool(!matches!(v, Value::Bool(true))))
            });
            to_register.push(Rc::new(OperatorOverload {
                signature: OperatorSignature { op: OperatorKind::Ne, left: left.clone(), right: right.clone(), return_type: TypeRegistry::bool_() },
                handler: ne_handler,
            }));
            if let Some(right_ty) = &right {
                if right_ty != &left {
                    let swapped_eq = handler.clone();
                    to_register.push(Rc::new(OperatorOverload {
                        signature: OperatorSignature { op: OperatorKind::Eq, left: right_ty.clone(), right: Some(left.clone()), return_type: TypeRegistry::bool_() },
                        handler: Rc::new(move |l, r| swapped_eq(r.unwrap(), Some(l))),
                    }));
                    let swapped_ne = handler.clone();
                    to_register.push(Rc::new(OperatorOverload {
                        signature: OperatorSignature { op: OperatorKind::Ne, left: right_ty.clone(), right: Some(left.clone()), return_type: TypeRegistry::bool_() },
                        handler: Rc::new(move |l, r| {
                            let v = swapped_ne(r.unwrap(), Some(l))?;
                            Ok(Value::Bool(!matches!(v, Value::Bool(true))))
                        }),
                    }));
                }
            }
        }
        for overload in to_register {
            self.layer.operators.borrow_mut().entry(overload.signature.op).or_default().push(overload);
        }
        self.layer.check_cache.borrow_mut().clear();
        self.layer.resolve_cache.borrow_mut().clear();
        Ok(())
    }

    fn operator_cache_key(op: OperatorKind, left: &TypeDecl, right: Option<&TypeDecl>) -> CacheKey {
        (op, left.canonical_name(), right.map(|t| t.canonical_name()))
    }

    /// Finds the operator overload for `(op, left, right)`, consulting and
    /// populating the resolve cache.
    pub fn resolve_operator(&self, op: OperatorKind, left: &TypeDecl, right: Option<&TypeDecl>) -> Result<(Rc<OperatorOverload>, TypeDecl), String> {
        let key = Self::operator_cache_key(op, left, right);
        if let Some(hit) = self.layer.resolve_cache.borrow().get(&key) {
            return Ok((hit.clone(), hit.signature.return_type.clone()));
        }
        let candidates = self.all_operators(op);
        let mut bindings = HashMap::new();
        for candidate in &candidates {
            bindings.clear();
            if !bind_or_match(&candidate.signature.left, left, &mut bindings) {
                continue;
            }
            match (&candidate.signature.right, right) {
                (None, None) => {}
                (Some(declared), Some(actual)) => {
                    if !bind_or_match(declared, actual, &mut bindings) {
                        continue;
                    }
                }
                _ => continue,
            }
            let ret = candidate.signature.return_type.template(&bindings);
            self.layer.resolve_cache.borrow_mut().insert(key, candidate.clone());
            return Ok((candidate.clone(), ret));
        }
        let rhs = right.map(|t| t.canonical_name()).unwrap_or_default();
        Err(format!("no such overload: {} {} {}", left.canonical_name(), op, rhs))
    }

    pub fn check_operator(&self, op: OperatorKind, left: &TypeDecl, right: Option<&TypeDecl>) -> Result<TypeDecl, String> {
        let key = Self::operator_cache_key(op, left, right);
        if let Some(hit) = self.layer.check_cache.borrow().get(&key) {
            return Ok(hit.clone());
        }
        let (_, ret) = self.resolve_operator(op, left, right)?;
        self.layer.check_cache.borrow_mut().insert(key, ret.clone());
        Ok(ret)
    }

    pub(crate) fn register_macro(&self, handle: MacroHandle) {
        let key = (handle.name.clone(), handle.has_receiver, handle.arg_count);
        self.layer.macros.borrow_mut().insert(key, Rc::new(handle));
    }

    pub fn lookup_macro(&self, name: &str, has_receiver: bool, arg_count: usize) -> Option<Rc<MacroHandle>> {
        let key = (Rc::from(name), has_receiver, arg_count);
        if let Some(handle) = self.layer.macros.borrow().get(&key) {
            return Some(handle.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup_macro(name, has_receiver, arg_count))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

/// "A new function overload that overlaps another ... is rejected at
/// registration time." Two signatures overlap when a call could satisfy
/// both: same receiver-compatibility and, for every parameter position,
/// identical types or one side is `dyn`/`ast`/a placeholder.
fn signatures_overlap(a: &FunctionSignature, b: &FunctionSignature) -> bool {
    if a.params.len() != b.params.len() {
        return false;
    }
    let receiver_overlaps = match (&a.receiver, &b.receiver) {
        (None, None) => true,
        (Some(x), Some(y)) => type_overlaps(x, y),
        _ => false,
    };
    if !receiver_overlaps {
        return false;
    }
    a.params.iter().zip(&b.params).all(|(x, y)| type_overlaps(x, y))
}

fn type_overlaps(a: &TypeDecl, b: &TypeDecl) -> bool {
    a == b || a.is_bare_dyn() || b.is_bare_dyn() || a.is_param() || b.is_param() || a.canonical_name() == "ast" || b.canonical_name() == "ast"
}

/// A position the `has()` macro's chain walk passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainLinkKind {
    Field,
    OptField,
    Index,
    OptIndex,
}

#[derive(Debug, Clone)]
pub struct ChainLink {
    pub kind: ChainLinkKind,
    pub receiver: NodeId,
    /// Field name for `Field`/`OptField`, index expression node for
    /// `Index`/`OptIndex`.
    pub key: ChainKey,
}

#[derive(Debug, Clone)]
pub enum ChainKey {
    Field(Rc<str>),
    Index(NodeId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use cel_core::TypeRegistry as T;

    #[test]
    fn child_sees_parent_entries_but_parent_locks_on_clone() {
        let parent = Registry::new();
        parent.register_variable("x", T::int()).unwrap();
        let child = parent.clone_child();
        assert_eq!(child.lookup_variable("x"), Some(T::int()));
        assert!(parent.register_variable("y", T::int()).is_err());
        assert!(child.register_variable("y", T::int()).is_ok());
    }

    #[test]
    fn overlapping_function_overloads_are_rejected() {
        let reg = Registry::new();
        let sig_a = FunctionSignature { name: Rc::from("f"), receiver: None, params: vec![T::int()], return_type: T::bool_() };
        reg.register_function(sig_a, Rc::new(|_, _| Ok(Value::Bool(true)))).unwrap();
        let sig_b = FunctionSignature { name: Rc::from("f"), receiver: None, params: vec![T::int()], return_type: T::bool_() };
        assert!(reg.register_function(sig_b, Rc::new(|_, _| Ok(Value::Bool(true)))).is_err());
    }
}
