//! The AST node model. Nodes are stored in a flat, append-only arena and
//! referenced by index (`NodeId`) rather than boxed pointers, so the parser
//! builds an immutable tree and the checker's results live in a *parallel*
//! check-info table keyed by node identity — the idiomatic-Rust reading of
//! the "mutable annotation slots on the node" design note: the AST itself
//! never needs interior mutability.

use std::rc::Rc;

use cel_core::TypeDecl;

use crate::compiler::registry::{FunctionCandidates, MacroHandle, OperatorOverload};
use crate::compiler::tokens::Pos;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(Rc<str>),
    Bytes(Rc<[u8]>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
        }
    }
}

/// The uniform iteration primitive behind `all/exists/exists_one/map/filter`.
#[derive(Debug, Clone)]
pub struct ComprehensionSpec {
    pub iterable: NodeId,
    pub iter_var_name: Rc<str>,
    pub init: NodeId,
    pub condition: Option<NodeId>,
    pub step: NodeId,
    pub result: NodeId,
    pub errors_are_fatal: bool,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Value(Literal),
    Id(Rc<str>),
    Field { receiver: NodeId, field: Rc<str> },
    OptField { receiver: NodeId, field: Rc<str> },
    Index { receiver: NodeId, index: NodeId },
    OptIndex { receiver: NodeId, index: NodeId },
    Call { name: Rc<str>, args: Vec<NodeId> },
    ReceiverCall { name: Rc<str>, receiver: NodeId, args: Vec<NodeId> },
    List(Vec<NodeId>),
    Map(Vec<(NodeId, NodeId)>),
    Ternary { cond: NodeId, then_branch: NodeId, else_branch: NodeId },
    And(NodeId, NodeId),
    Or(NodeId, NodeId),
    Not(NodeId),
    Neg(NodeId),
    Binary { op: BinOp, left: NodeId, right: NodeId },
    In { item: NodeId, container: NodeId },
    Comprehension(Box<ComprehensionSpec>),
    /// `has(e)`: `e` must be a field-selection chain node (itself built
    /// from `Field`/`OptField`/`Index`/`OptIndex`); evaluated by the
    /// lazy chain walk in `has()`'s dedicated macro logic, not by the
    /// ordinary field-access evaluator.
    HasChain(NodeId),
    /// Reference to the comprehension accumulator (`@accu` in the source CEL grammar).
    AccuValue,
    /// `accu + 1`, the `exists_one` step shorthand.
    AccuInc,
    /// Pushes a value computed in the iteration scope onto the accumulator list.
    AccuPush { value: NodeId },
    /// Wraps a macro predicate, converting a non-bool result into an
    /// evaluation error labeled with the owning macro's name.
    PredicateGuard { macro_name: Rc<str>, predicate: NodeId },
}

#[derive(Debug, Clone)]
pub struct NodeData {
    pub kind: ExprKind,
    pub pos: Pos,
}

/// Append-only node store. Parsing only ever pushes; nothing is ever
/// mutated or removed once built.
#[derive(Debug, Clone, Default)]
pub struct Arena {
    nodes: Vec<NodeData>,
}

impl Arena {
    pub fn push(&mut self, kind: ExprKind, pos: Pos) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeData { kind, pos });
        id
    }

    pub fn get(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Per-node annotations filled in by the checker: resolved overloads,
/// checked type, and (for macro call sites) the macro handle to dispatch
/// through instead of ordinary overload resolution.
#[derive(Debug, Clone, Default)]
pub struct CheckInfo {
    pub checked_type: Option<TypeDecl>,
    pub static_operator: Option<Rc<OperatorOverload>>,
    pub function_candidates: Option<Rc<FunctionCandidates>>,
    pub arg_types: Option<Vec<TypeDecl>>,
    pub macro_handle: Option<Rc<MacroHandle>>,
}

/// Parallel table of [`CheckInfo`], indexed by [`NodeId`]. Populated by the
/// checker, read by the evaluator; the arena it describes is never mutated.
#[derive(Debug, Clone, Default)]
pub struct CheckTable {
    slots: Vec<CheckInfo>,
}

impl CheckTable {
    pub fn for_arena(arena: &Arena) -> Self {
        CheckTable { slots: vec![CheckInfo::default(); arena.len()] }
    }

    pub fn get(&self, id: NodeId) -> &CheckInfo {
        &self.slots[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut CheckInfo {
        &mut self.slots[id.0 as usize]
    }
}

/// A parsed, unchecked expression: the arena plus the root node and the
/// original source it was parsed from (needed for error highlighting).
#[derive(Debug, Clone)]
pub struct Ast {
    pub arena: Arena,
    pub root: NodeId,
    pub input: Rc<str>,
}

impl Ast {
    pub fn node(&self, id: NodeId) -> &NodeData {
        self.arena.get(id)
    }
}
