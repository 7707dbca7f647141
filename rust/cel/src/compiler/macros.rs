//! Macro expansion: desugars `has()` and the collection macros
//! (`all/exists/exists_one/map/filter`) into plain AST at parse time, so
//! the checker and evaluator never see a macro call as such — only a
//! `HasChain` or `Comprehension` node. See `registry::MacroHandle` for the
//! `(name, has_receiver, arg_count)` identity the parser looks up before
//! calling into this module.

use std::rc::Rc;

use crate::compiler::ast::{Arena, BinOp, ComprehensionSpec, ExprKind, Literal, NodeId};
use crate::compiler::registry::Registry;
use crate::compiler::tokens::Pos;
use crate::error::{ParseError, ParseErrorKind};

/// Registers the fixed catalog of built-in macro identities so the parser
/// can find `(name, has_receiver, arg_count)` before falling back to
/// ordinary call/overload resolution.
pub fn install_standard_macros(registry: &Registry) {
    use crate::compiler::registry::MacroHandle;
    // `has(e)` is a free function; the rest are always called on a receiver
    // (`list.all(v, p)`), with `arg_count` counting the parenthesized
    // macro arguments only, not the receiver itself.
    let entries: &[(&str, bool, usize)] = &[
        ("has", false, 1),
        ("all", true, 2),
        ("exists", true, 2),
        ("exists_one", true, 2),
        ("map", true, 2),
        ("map", true, 3),
        ("filter", true, 2),
    ];
    for (name, has_receiver, arg_count) in entries {
        registry.register_macro(MacroHandle { name: Rc::from(*name), has_receiver: *has_receiver, arg_count: *arg_count });
    }
}

/// Extracts the bound loop-variable name out of an already-parsed macro
/// argument node, which must be a bare identifier.
fn loop_var_name(arena: &Arena, node: NodeId, macro_name: &str, pos: Pos) -> Result<Rc<str>, ParseError> {
    match &arena.get(node).kind {
        ExprKind::Id(name) => Ok(name.clone()),
        _ => Err(ParseError::new(ParseErrorKind::BadMacroLoopVar(macro_name.to_string())).with_ast(pos, Rc::from(""))),
    }
}

/// `has(e)`: `e` must already have parsed as a field-selection chain
/// (`Field`/`OptField`/`Index`/`OptIndex`), terminated by an identifier
/// receiver at the bottom.
pub fn expand_has(arena: &mut Arena, arg: NodeId, pos: Pos) -> Result<NodeId, ParseError> {
    fn is_chain(arena: &Arena, node: NodeId) -> bool {
        match &arena.get(node).kind {
            ExprKind::Field { receiver, .. } | ExprKind::OptField { receiver, .. } => {
                matches!(arena.get(*receiver).kind, ExprKind::Id(_)) || is_chain(arena, *receiver)
            }
            ExprKind::Index { receiver, .. } | ExprKind::OptIndex { receiver, .. } => {
                matches!(arena.get(*receiver).kind, ExprKind::Id(_)) || is_chain(arena, *receiver)
            }
            _ => false,
        }
    }
    if !is_chain(arena, arg) {
        return Err(ParseError::new(ParseErrorKind::InvalidHasArgument));
    }
    Ok(arena.push(ExprKind::HasChain(arg), pos))
}

fn bool_lit(arena: &mut Arena, value: bool, pos: Pos) -> NodeId {
    arena.push(ExprKind::Value(Literal::Bool(value)), pos)
}

fn int_lit(arena: &mut Arena, value: i64, pos: Pos) -> NodeId {
    arena.push(ExprKind::Value(Literal::Int(value)), pos)
}

fn empty_list(arena: &mut Arena, pos: Pos) -> NodeId {
    arena.push(ExprKind::List(Vec::new()), pos)
}

fn accu(arena: &mut Arena, pos: Pos) -> NodeId {
    arena.push(ExprKind::AccuValue, pos)
}

fn guarded(arena: &mut Arena, predicate: NodeId, macro_name: &str, pos: Pos) -> NodeId {
    arena.push(ExprKind::PredicateGuard { macro_name: Rc::from(macro_name), predicate }, pos)
}

/// Shared builder for the five collection macros. `transform` is `None`
/// for `all/exists/exists_one/filter` (the predicate arg doubles as both
/// condition input and, for `filter`, the pushed value); `Some(t)` for the
/// two-arg form of `map`.
#[allow(clippy::too_many_arguments)]
fn build_comprehension(
    arena: &mut Arena,
    macro_name: &str,
    iterable: NodeId,
    iter_var_name: Rc<str>,
    init: NodeId,
    condition: Option<NodeId>,
    step: NodeId,
    result: NodeId,
    pos: Pos,
) -> NodeId {
    let spec = ComprehensionSpec { iterable, iter_var_name, init, condition, step, result, errors_are_fatal: false };
    let _ = macro_name;
    arena.push(ExprKind::Comprehension(Box::new(spec)), pos)
}

pub fn expand_all(arena: &mut Arena, iterable: NodeId, var_node: NodeId, predicate: NodeId, pos: Pos) -> Result<NodeId, ParseError> {
    let iter_var_name = loop_var_name(arena, var_node, "all", pos)?;
    let init = bool_lit(arena, true, pos);
    let cond = accu(arena, pos);
    let guarded_pred = guarded(arena, predicate, "all", pos);
    let true_lit = bool_lit(arena, true, pos);
    let false_lit = bool_lit(arena, false, pos);
    let step = arena.push(ExprKind::Ternary { cond: guarded_pred, then_branch: true_lit, else_branch: false_lit }, pos);
    let result = accu(arena, pos);
    Ok(build_comprehension(arena, "all", iterable, iter_var_name, init, Some(cond), step, result, pos))
}

pub fn expand_exists(arena: &mut Arena, iterable: NodeId, var_node: NodeId, predicate: NodeId, pos: Pos) -> Result<NodeId, ParseError> {
    let iter_var_name = loop_var_name(arena, var_node, "exists", pos)?;
    let init = bool_lit(arena, false, pos);
    let accu_for_cond = accu(arena, pos);
    let cond = arena.push(ExprKind::Not(accu_for_cond), pos);
    let guarded_pred = guarded(arena, predicate, "exists", pos);
    let true_lit = bool_lit(arena, true, pos);
    let false_lit = bool_lit(arena, false, pos);
    let step = arena.push(ExprKind::Ternary { cond: guarded_pred, then_branch: true_lit, else_branch: false_lit }, pos);
    let result = accu(arena, pos);
    Ok(build_comprehension(arena, "exists", iterable, iter_var_name, init, Some(cond), step, result, pos))
}

pub fn expand_exists_one(arena: &mut Arena, iterable: NodeId, var_node: NodeId, predicate: NodeId, pos: Pos) -> Result<NodeId, ParseError> {
    let iter_var_name = loop_var_name(arena, var_node, "exists_one", pos)?;
    let init = int_lit(arena, 0, pos);
    let guarded_pred = guarded(arena, predicate, "exists_one", pos);
    let inc = arena.push(ExprKind::AccuInc, pos);
    let accu_ref = accu(arena, pos);
    let step = arena.push(ExprKind::Ternary { cond: guarded_pred, then_branch: inc, else_branch: accu_ref }, pos);
    let one = int_lit(arena, 1, pos);
    let accu_for_result = accu(arena, pos);
    let result = arena.push(ExprKind::Binary { op: BinOp::Eq, left: accu_for_result, right: one }, pos);
    Ok(build_comprehension(arena, "exists_one", iterable, iter_var_name, init, None, step, result, pos))
}

pub fn expand_filter(arena: &mut Arena, iterable: NodeId, var_node: NodeId, predicate: NodeId, pos: Pos) -> Result<NodeId, ParseError> {
    let iter_var_name = loop_var_name(arena, var_node, "filter", pos)?;
    let init = empty_list(arena, pos);
    let guarded_pred = guarded(arena, predicate, "filter", pos);
    let iter_value = arena.push(ExprKind::Id(iter_var_name.clone()), pos);
    let pushed = arena.push(ExprKind::AccuPush { value: iter_value }, pos);
    let accu_ref = accu(arena, pos);
    let step = arena.push(ExprKind::Ternary { cond: guarded_pred, then_branch: pushed, else_branch: accu_ref }, pos);
    let result = accu(arena, pos);
    Ok(build_comprehension(arena, "filter", iterable, iter_var_name, init, None, step, result, pos))
}

/// `map(v, t)`: transforms every element. `map(v, f, t)`: filters by `f`
/// then transforms by `t`.
pub fn expand_map(
    arena: &mut Arena,
    iterable: NodeId,
    var_node: NodeId,
    filter_predicate: Option<NodeId>,
    transform: NodeId,
    pos: Pos,
) -> Result<NodeId, ParseError> {
    let iter_var_name = loop_var_name(arena, var_node, "map", pos)?;
    let init = empty_list(arena, pos);
    let pushed = arena.push(ExprKind::AccuPush { value: transform }, pos);
    let accu_ref = accu(arena, pos);
    let step = match filter_predicate {
        Some(pred) => {
            let guarded_pred = guarded(arena, pred, "map", pos);
            arena.push(ExprKind::Ternary { cond: guarded_pred, then_branch: pushed, else_branch: accu_ref }, pos)
        }
        None => pushed,
    };
    let result = accu(arena, pos);
    Ok(build_comprehension(arena, "map", iterable, iter_var_name, init, None, step, result, pos))
}
