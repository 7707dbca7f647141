//! Bottom-up type checker. Walks the immutable AST once, writing its
//! findings into a parallel [`CheckTable`] rather than mutating nodes.

use std::rc::Rc;

use cel_core::{TypeDecl, TypeRegistry as T};

use crate::compiler::ast::{Arena, Ast, BinOp, CheckTable, ExprKind, Literal, NodeId};
use crate::compiler::registry::{OperatorKind, Registry};
use crate::error::{TypeCheckError, TypeCheckErrorKind};

/// Options that change checking (not parsing) behavior.
#[derive(Debug, Clone)]
pub struct CheckerOptions {
    /// Undeclared free variables type-check as `dyn` instead of erroring.
    pub unlisted_variables_are_dyn: bool,
    /// List/map literals with non-unifiable elements are a hard error
    /// instead of silently degrading to `dyn`.
    pub homogeneous_aggregate_literals: bool,
}

impl Default for CheckerOptions {
    fn default() -> Self {
        CheckerOptions { unlisted_variables_are_dyn: false, homogeneous_aggregate_literals: true }
    }
}

pub fn check(ast: &Ast, registry: &Registry, options: &CheckerOptions) -> Result<(CheckTable, TypeDecl), TypeCheckError> {
    let mut checker = Checker { registry, input: ast.input.clone(), table: CheckTable::for_arena(&ast.arena), scopes: Vec::new(), options };
    let result_type = checker.check_node(&ast.arena, ast.root)?;
    Ok((checker.table, result_type))
}

struct Checker<'a> {
    registry: &'a Registry,
    input: Rc<str>,
    table: CheckTable,
    scopes: Vec<(Rc<str>, TypeDecl)>,
    options: &'a CheckerOptions,
}

impl<'a> Checker<'a> {
    fn lookup_scope(&self, name: &str) -> Option<TypeDecl> {
        self.scopes.iter().rev().find(|(n, _)| n.as_ref() == name).map(|(_, t)| t.clone())
    }

    fn err(&self, kind: TypeCheckErrorKind, node: &Arena, at: NodeId) -> TypeCheckError {
        TypeCheckError::new(kind).with_ast(node.get(at).pos, self.input.clone())
    }

    fn record(&mut self, node: NodeId, ty: TypeDecl) -> TypeDecl {
        self.table.get_mut(node).checked_type = Some(ty.clone());
        ty
    }

    fn check_node(&mut self, arena: &Arena, node: NodeId) -> Result<TypeDecl, TypeCheckError> {
        let kind = arena.get(node).kind.clone();
        let ty = match kind {
            ExprKind::Value(lit) => literal_type(&lit),
            ExprKind::Id(name) => self.check_id(arena, node, &name)?,
            ExprKind::Field { receiver, field } => self.check_field(arena, node, receiver, &field, false)?,
            ExprKind::OptField { receiver, field } => self.check_field(arena, node, receiver, &field, true)?,
            ExprKind::Index { receiver, index } => self.check_index(arena, node, receiver, index, false)?,
            ExprKind::OptIndex { receiver, index } => self.check_index(arena, node, receiver, index, true)?,
            ExprKind::Call { name, args } => self.check_call(arena, node, None, &name, &args)?,
            ExprKind::ReceiverCall { name, receiver, args } => {
                let receiver_ty = self.check_node(arena, receiver)?;
                self.check_call(arena, node, Some(receiver_ty), &name, &args)?
            }
            ExprKind::List(elements) => self.check_list(arena, &elements)?,
            ExprKind::Map(entries) => self.check_map(arena, &entries)?,
            ExprKind::Ternary { cond, then_branch, else_branch } => self.check_ternary(arena, node, cond, then_branch, else_branch)?,
            ExprKind::And(left, right) | ExprKind::Or(left, right) => {
                self.check_node(arena, left)?;
                self.check_node(arena, right)?;
                T::bool_()
            }
            ExprKind::Not(operand) => {
                let operand_ty = self.check_node(arena, operand)?;
                self.check_operator(arena, node, OperatorKind::Not, operand_ty, None)?
            }
            ExprKind::Neg(operand) => {
                let operand_ty = self.check_node(arena, operand)?;
                self.check_operator(arena, node, OperatorKind::Neg, operand_ty, None)?
            }
            ExprKind::Binary { op, left, right } => {
                let left_ty = self.check_node(arena, left)?;
                let right_ty = self.check_node(arena, right)?;
                self.check_operator(arena, node, binop_to_operator(op), left_ty, Some(right_ty))?
            }
            ExprKind::In { item, container } => {
                let item_ty = self.check_node(arena, item)?;
                let container_ty = self.check_node(arena, container)?;
                self.check_operator(arena, node, OperatorKind::In, item_ty, Some(container_ty))?
            }
            ExprKind::Comprehension(spec) => self.check_comprehension(arena, node, &spec)?,
            ExprKind::HasChain(chain) => {
                self.check_node(arena, chain)?;
                T::bool_()
            }
            ExprKind::AccuValue => self
                .lookup_scope("@accu")
                .ok_or_else(|| self.err(TypeCheckErrorKind::BadMacroShape("@accu".to_string(), "used outside a comprehension".to_string()), arena, node))?,
            ExprKind::AccuInc => {
                let accu = self
                    .lookup_scope("@accu")
                    .ok_or_else(|| self.err(TypeCheckErrorKind::BadMacroShape("@accu".to_string(), "used outside a comprehension".to_string()), arena, node))?;
                if accu != T::int() {
                    return Err(self.err(TypeCheckErrorKind::BadMacroShape("exists_one".to_string(), "accumulator must be int".to_string()), arena, node));
                }
                T::int()
            }
            ExprKind::AccuPush { value } => {
                let value_ty = self.check_node(arena, value)?;
                let accu = self
                    .lookup_scope("@accu")
                    .ok_or_else(|| self.err(TypeCheckErrorKind::BadMacroShape("@accu".to_string(), "used outside a comprehension".to_string()), arena, node))?;
                let elem = accu.untag().unify(&value_ty).unwrap_or_else(T::dyn_type);
                T::list(elem)
            }
            ExprKind::PredicateGuard { macro_name, predicate } => {
                let predicate_ty = self.check_node(arena, predicate)?;
                if predicate_ty != T::bool_() && !predicate_ty.is_bare_dyn() {
                    return Err(self.err(
                        TypeCheckErrorKind::BadMacroShape(macro_name.to_string(), "predicate must evaluate to bool".to_string()),
                        arena,
                        node,
                    ));
                }
                T::bool_()
            }
        };
        Ok(self.record(node, ty))
    }

    fn check_id(&mut self, arena: &Arena, node: NodeId, name: &str) -> Result<TypeDecl, TypeCheckError> {
        if let Some(ty) = self.lookup_scope(name) {
            return Ok(ty);
        }
        if let Some(ty) = self.registry.lookup_variable(name) {
            return Ok(ty);
        }
        if let Some((ty, _)) = self.registry.lookup_constant(name) {
            return Ok(ty);
        }
        if self.registry.lookup_type(name).is_some() {
            return Ok(T::type_());
        }
        if self.options.unlisted_variables_are_dyn {
            return Ok(T::dyn_type());
        }
        Err(self.err(TypeCheckErrorKind::UnknownVariable(name.to_string()), arena, node))
    }

    fn check_field(&mut self, arena: &Arena, node: NodeId, receiver: NodeId, field: &str, optional: bool) -> Result<TypeDecl, TypeCheckError> {
        let receiver_ty = self.check_node(arena, receiver)?;
        let field_ty = self.resolve_field_type(&receiver_ty, field);
        if optional {
            Ok(T::optional(field_ty))
        } else {
            let _ = node;
            Ok(field_ty)
        }
    }

    fn resolve_field_type(&self, receiver_ty: &TypeDecl, field: &str) -> TypeDecl {
        if let Some(entry) = self.registry.lookup_type(&receiver_ty.canonical_name()) {
            if let Some(fields) = &entry.fields {
                if let Some(ty) = fields.get(field) {
                    return ty.clone();
                }
            }
        }
        T::dyn_type()
    }

    fn check_index(&mut self, arena: &Arena, node: NodeId, receiver: NodeId, index: NodeId, optional: bool) -> Result<TypeDecl, TypeCheckError> {
        let receiver_ty = self.check_node(arena, receiver)?;
        let _index_ty = self.check_node(arena, index)?;
        let elem_ty = element_type_of(&receiver_ty);
        let _ = node;
        if optional {
            Ok(T::optional(elem_ty))
        } else {
            Ok(elem_ty)
        }
    }

    fn check_call(&mut self, arena: &Arena, node: NodeId, receiver: Option<TypeDecl>, name: &str, args: &[NodeId]) -> Result<TypeDecl, TypeCheckError> {
        let mut arg_types = Vec::with_capacity(args.len());
        for &arg in args {
            arg_types.push(self.check_node(arena, arg)?);
        }
        let candidates = self.registry.function_candidates(name, receiver.is_some(), args.len());
        let (overload, ret) = candidates
            .find_match(receiver.as_ref(), &arg_types)
            .map_err(|msg| self.err(TypeCheckErrorKind::NoMatchingOverload(msg), arena, node))?;
        let info = self.table.get_mut(node);
        info.function_candidates = Some(Rc::new(candidates));
        info.arg_types = Some(arg_types);
        info.static_operator = None;
        let _ = overload;
        Ok(ret)
    }

    fn check_operator(&mut self, arena: &Arena, node: NodeId, op: OperatorKind, left: TypeDecl, right: Option<TypeDecl>) -> Result<TypeDecl, TypeCheckError> {
        let bears_dynamic = left.is_bare_dyn() || left.is_param() || right.as_ref().map(|t| t.is_bare_dyn() || t.is_param()).unwrap_or(false);
        let ret = self
            .registry
            .check_operator(op, &left, right.as_ref())
            .map_err(|msg| self.err(TypeCheckErrorKind::NoMatchingOverload(msg), arena, node))?;
        if !bears_dynamic {
            if let Ok((overload, _)) = self.registry.resolve_operator(op, &left, right.as_ref()) {
                self.table.get_mut(node).static_operator = Some(overload);
            }
        }
        Ok(ret)
    }

    fn check_list(&mut self, arena: &Arena, elements: &[NodeId]) -> Result<TypeDecl, TypeCheckError> {
        let mut elem_ty: Option<TypeDecl> = None;
        for &el in elements {
            let ty = self.check_node(arena, el)?;
            elem_ty = Some(match elem_ty {
                None => ty,
                Some(prev) => match prev.unify(&ty) {
                    Some(unified) => unified,
                    None if self.options.homogeneous_aggregate_literals => {
                        return Err(self.err(TypeCheckErrorKind::HomogeneityFailure, arena, el));
                    }
                    None => T::dyn_type(),
                },
            });
        }
        Ok(T::list(elem_ty.unwrap_or_else(T::dyn_type)))
    }

    fn check_map(&mut self, arena: &Arena, entries: &[(NodeId, NodeId)]) -> Result<TypeDecl, TypeCheckError> {
        let mut key_ty: Option<TypeDecl> = None;
        let mut value_ty: Option<TypeDecl> = None;
        for &(k, v) in entries {
            let kt = self.check_node(arena, k)?;
            let vt = self.check_node(arena, v)?;
            key_ty = Some(match key_ty {
                None => kt,
                Some(prev) => prev.unify(&kt).unwrap_or_else(T::dyn_type),
            });
            value_ty = Some(match value_ty {
                None => vt,
                Some(prev) => prev.unify(&vt).unwrap_or_else(T::dyn_type),
            });
        }
        Ok(T::map(key_ty.unwrap_or_else(T::dyn_type), value_ty.unwrap_or_else(T::dyn_type)))
    }

    fn check_ternary(&mut self, arena: &Arena, node: NodeId, cond: NodeId, then_branch: NodeId, else_branch: NodeId) -> Result<TypeDecl, TypeCheckError> {
        let cond_ty = self.check_node(arena, cond)?;
        if cond_ty != T::bool_() && !cond_ty.is_bare_dyn() {
            return Err(self.err(TypeCheckErrorKind::NoMatchingOverload("ternary condition must be bool".to_string()), arena, cond));
        }
        let then_ty = self.check_node(arena, then_branch)?;
        let else_ty = self.check_node(arena, else_branch)?;
        then_ty
            .unify(&else_ty)
            .ok_or_else(|| self.err(TypeCheckErrorKind::BranchUnificationFailure(then_ty.canonical_name(), else_ty.canonical_name()), arena, node))
    }

    fn check_comprehension(&mut self, arena: &Arena, node: NodeId, spec: &crate::compiler::ast::ComprehensionSpec) -> Result<TypeDecl, TypeCheckError> {
        let iterable_ty = self.check_node(arena, spec.iterable)?;
        let elem_ty = iterable_element_type(&iterable_ty)
            .ok_or_else(|| self.err(TypeCheckErrorKind::BadMacroShape("comprehension".to_string(), "iterable must be list or map".to_string()), arena, spec.iterable))?;
        let init_ty = self.check_node(arena, spec.init)?;

        self.scopes.push((spec.iter_var_name.clone(), elem_ty));
        self.scopes.push((Rc::from("@accu"), init_ty.clone()));
        let result = (|| -> Result<TypeDecl, TypeCheckError> {
            if let Some(cond) = spec.condition {
                self.check_node(arena, cond)?;
            }
            self.check_node(arena, spec.step)?;
            self.check_node(arena, spec.result)
        })();
        self.scopes.pop();
        self.scopes.pop();
        let result_ty = result?;
        let _ = node;
        Ok(result_ty)
    }
}

fn literal_type(lit: &Literal) -> TypeDecl {
    match lit {
        Literal::Null => T::null(),
        Literal::Bool(_) => T::bool_(),
        Literal::Int(_) => T::int(),
        Literal::Uint(_) => T::uint(),
        Literal::Double(_) => T::double(),
        Literal::String(_) => T::string(),
        Literal::Bytes(_) => T::bytes(),
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

fn element_type_of(receiver_ty: &TypeDecl) -> TypeDecl {
    use cel_core::Shape;
    match receiver_ty.untag().shape() {
        Shape::List(elem) => elem.clone(),
        Shape::Map(_, value) => value.clone(),
        _ => T::dyn_type(),
    }
}

/// Element type `toIterable` yields for a comprehension: list elements,
/// or map keys (§4.6's `toIterable` policy).
fn iterable_element_type(ty: &TypeDecl) -> Option<TypeDecl> {
    use cel_core::Shape;
    let untagged = ty.untag();
    match untagged.shape() {
        Shape::List(elem) => Some(elem.clone()),
        Shape::Map(key, _) => Some(key.clone()),
        Shape::Primitive(cel_core::Primitive::Dyn) => Some(T::dyn_type()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::{parse, ParserLimits};

    fn check_expr(src: &str, registry: &Registry, options: &CheckerOptions) -> Result<TypeDecl, TypeCheckError> {
        let ast = parse(src, registry, true, ParserLimits::default()).unwrap();
        check(&ast, registry, options).map(|(_, ty)| ty)
    }

    #[test]
    fn literal_int_checks_to_int() {
        let registry = Registry::new();
        assert_eq!(check_expr("1", &registry, &CheckerOptions::default()).unwrap(), T::int());
    }

    #[test]
    fn undeclared_variable_errors_by_default() {
        let registry = Registry::new();
        assert!(check_expr("x", &registry, &CheckerOptions::default()).is_err());
    }

    #[test]
    fn unlisted_variables_are_dyn_when_enabled() {
        let registry = Registry::new();
        let opts = CheckerOptions { unlisted_variables_are_dyn: true, ..CheckerOptions::default() };
        assert!(check_expr("x", &registry, &opts).unwrap().is_bare_dyn());
    }

    #[test]
    fn ternary_unifies_branch_types() {
        let registry = Registry::new();
        assert_eq!(check_expr("true ? 1 : 2", &registry, &CheckerOptions::default()).unwrap(), T::int());
    }

    #[test]
    fn mismatched_list_elements_error_when_homogeneous() {
        let registry = Registry::new();
        assert!(check_expr("[1, 'a']", &registry, &CheckerOptions::default()).is_err());
    }
}
