//! CEL expression engine: lex → parse (with macro expansion) → type-check →
//! evaluate, fronted by the [`Environment`]/[`Program`] facade.

pub mod compiler;
pub mod error;
pub mod eval;
pub mod host;
pub mod stdlib;

use std::collections::HashMap;
use std::rc::Rc;

use cel_core::{TypeDecl, Value};

use compiler::ast::Ast;
use compiler::parser::{self, ParserLimits};
use compiler::registry::{FunctionOverload, FunctionSignature, OperatorOverload, OperatorSignature, Registry, UserTypeCtor};
use compiler::typecheck::{self, CheckerOptions};
use error::{EvaluationError, ParseError, TypeCheckError};
use eval::{CancellationToken, NeverCancelled};
use host::HostPrimitives;

/// Options controlling parsing and checking behavior for an [`Environment`].
/// All fields default to the conservative, spec-normative settings.
#[derive(Debug, Clone)]
pub struct EnvironmentOptions {
    pub enable_optional_types: bool,
    pub parser_limits: ParserLimits,
    pub checker_options: CheckerOptions,
}

impl Default for EnvironmentOptions {
    fn default() -> Self {
        EnvironmentOptions { enable_optional_types: true, parser_limits: ParserLimits::default(), checker_options: CheckerOptions::default() }
    }
}

/// The declaration surface and host primitives an expression is parsed,
/// checked and evaluated against. Cheap to clone — `registry`/`host` are
/// both reference-counted — and `clone_child()` extends without mutating
/// the parent, so a request-scoped environment can layer local variables
/// over a process-wide base without re-registering the standard library.
#[derive(Clone)]
pub struct Environment {
    registry: Registry,
    host: HostPrimitives,
    options: EnvironmentOptions,
}

impl Environment {
    /// A fresh environment with the full standard function/operator/macro
    /// catalog already installed.
    pub fn new(options: EnvironmentOptions) -> Self {
        let registry = Registry::new();
        let host = HostPrimitives::default();
        stdlib::install(&registry, &host);
        compiler::macros::install_standard_macros(&registry);
        Environment { registry, host, options }
    }

    pub fn register_type(&self, name: &str, ctor: UserTypeCtor, fields: Option<HashMap<Rc<str>, TypeDecl>>) -> Result<(), TypeCheckError> {
        self.registry.register_type(name, ctor, fields)
    }

    pub fn register_variable(&self, name: &str, ty: TypeDecl) -> Result<(), TypeCheckError> {
        self.registry.register_variable(name, ty)
    }

    pub fn register_constant(&self, name: &str, ty: TypeDecl, value: Value) -> Result<(), TypeCheckError> {
        self.registry.register_constant(name, ty, value)
    }

    pub fn register_function(&self, sig: FunctionSignature, overload: FunctionOverload) -> Result<(), TypeCheckError> {
        self.registry.register_function(sig, overload.handler)
    }

    pub fn register_operator(&self, sig: OperatorSignature, overload: OperatorOverload) -> Result<(), TypeCheckError> {
        self.registry.register_operator(sig, overload.handler)
    }

    /// A child environment sharing this one's registry layer and host
    /// primitives; registrations on the child never affect the parent.
    pub fn clone_child(&self) -> Environment {
        Environment { registry: self.registry.clone_child(), host: self.host.clone(), options: self.options.clone() }
    }

    pub fn parse(&self, expr: &str) -> Result<Program, ParseError> {
        let ast = parser::parse(expr, &self.registry, self.options.enable_optional_types, self.options.parser_limits.clone())?;
        Ok(Program { ast, registry: self.registry.clone(), checker_options: self.options.checker_options.clone() })
    }

    pub fn check(&self, expr: &str) -> CheckOutcome {
        match self.parse(expr) {
            Ok(program) => program.check(),
            Err(e) => CheckOutcome { valid: false, ty: None, error: Some(TypeCheckError::new(error::TypeCheckErrorKind::UnknownType(e.to_string()))) },
        }
    }

    pub fn evaluate(&self, expr: &str, ctx: &EvalContext) -> Result<Value, EvaluationError> {
        let program = self.parse(expr).map_err(|e| EvaluationError::new(error::EvaluationErrorKind::Conversion(e.to_string())))?;
        program.evaluate(ctx)
    }
}

/// A parsed-but-not-yet-checked expression. `check`/`evaluate` both type
/// check on demand; callers that want to check once and evaluate many
/// times with different contexts should call `check()` once up front and
/// inspect the outcome before calling `evaluate`.
pub struct Program {
    ast: Ast,
    registry: Registry,
    checker_options: CheckerOptions,
}

/// Outcome of type-checking a [`Program`], matching the engine's external
/// `{valid, type?, error?}` contract.
pub struct CheckOutcome {
    pub valid: bool,
    pub ty: Option<TypeDecl>,
    pub error: Option<TypeCheckError>,
}

impl Program {
    pub fn check(&self) -> CheckOutcome {
        match typecheck::check(&self.ast, &self.registry, &self.checker_options) {
            Ok((_, ty)) => CheckOutcome { valid: true, ty: Some(ty), error: None },
            Err(e) => CheckOutcome { valid: false, ty: None, error: Some(e) },
        }
    }

    pub fn evaluate(&self, ctx: &EvalContext) -> Result<Value, EvaluationError> {
        let (table, _) = typecheck::check(&self.ast, &self.registry, &self.checker_options)
            .map_err(|e| EvaluationError::new(error::EvaluationErrorKind::TypeMismatch(e.to_string())))?;
        let cancel: &dyn CancellationToken = ctx.cancel.as_deref().unwrap_or(&NeverCancelled);
        eval::evaluate(&self.ast, &table, &self.registry, &|name| ctx.variables.get(name).cloned(), cancel)
    }
}

/// The per-evaluation activation: free-variable bindings plus an optional
/// cancellation token, kept separate from [`Environment`] since it varies
/// per request while the environment is typically process-lifetime.
#[derive(Default)]
pub struct EvalContext {
    variables: HashMap<String, Value>,
    cancel: Option<Box<dyn CancellationToken>>,
}

impl EvalContext {
    pub fn new() -> Self {
        EvalContext::default()
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn with_cancellation(mut self, cancel: Box<dyn CancellationToken>) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_checks_and_evaluates_a_simple_expression() {
        let env = Environment::new(EnvironmentOptions::default());
        let program = env.parse("1 + 2").unwrap();
        let outcome = program.check();
        assert!(outcome.valid);
        let ctx = EvalContext::new();
        assert!(matches!(program.evaluate(&ctx).unwrap(), Value::Int(3)));
    }

    #[test]
    fn registered_variable_is_visible_to_evaluation() {
        let env = Environment::new(EnvironmentOptions::default());
        env.register_variable("name", cel_core::TypeRegistry::string()).unwrap();
        let program = env.parse(r#"name == "cel""#).unwrap();
        let ctx = EvalContext::new().with_variable("name", Value::string("cel"));
        assert!(matches!(program.evaluate(&ctx).unwrap(), Value::Bool(true)));
    }

    #[test]
    fn clone_child_registers_without_mutating_parent() {
        let parent = Environment::new(EnvironmentOptions::default());
        let child = parent.clone_child();
        child.register_variable("x", cel_core::TypeRegistry::int()).unwrap();
        assert!(!parent.check("x").valid);
    }

    #[test]
    fn unknown_type_check_reports_invalid_outcome() {
        let env = Environment::new(EnvironmentOptions::default());
        let outcome = env.check("undeclared_name");
        assert!(!outcome.valid);
    }
}
