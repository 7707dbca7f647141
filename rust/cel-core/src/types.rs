//! `TypeDecl` value objects: primitives, aggregates, `dyn`, and parametric
//! placeholders, with interning, assignability, unification and templating.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::strings::StringTable;

/// The fixed primitive kinds. `Dyn` here is the bare "unconstrained" type,
/// distinct from the `dyn<T>` tag kind below (see [`Shape::Dyn`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    String,
    Bool,
    Int,
    Uint,
    Double,
    Bytes,
    Null,
    Type,
    Dyn,
    /// Sentinel used only in function signatures to mark a macro-argument
    /// slot; never the type of a runtime value.
    Ast,
}

impl Primitive {
    fn name(self) -> &'static str {
        match self {
            Primitive::String => "string",
            Primitive::Bool => "bool",
            Primitive::Int => "int",
            Primitive::Uint => "uint",
            Primitive::Double => "double",
            Primitive::Bytes => "bytes",
            Primitive::Null => "null",
            Primitive::Type => "type",
            Primitive::Dyn => "dyn",
            Primitive::Ast => "ast",
        }
    }
}

/// The shape of a `TypeDecl`, interned by canonical name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shape {
    Primitive(Primitive),
    Message(Rc<str>),
    List(TypeDecl),
    Map(TypeDecl, TypeDecl),
    Optional(TypeDecl),
    /// `dyn<T>` tag: "the checker saw T, but the value passed through
    /// `dyn()` or came from an unlisted variable". A second dimension of
    /// the type, not a flag on the value.
    Dyn(TypeDecl),
    /// Single uppercase placeholder, e.g. `A`, bound during overload
    /// resolution.
    Param(char),
}

/// An interned, immutable type declaration. Cheap to clone (`Rc` handle).
#[derive(Debug, Clone, Eq)]
pub struct TypeDecl(Rc<Shape>);

impl PartialEq for TypeDecl {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl std::hash::Hash for TypeDecl {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Display for TypeDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_name())
    }
}

impl TypeDecl {
    pub fn shape(&self) -> &Shape {
        &self.0
    }

    pub fn canonical_name(&self) -> String {
        match &*self.0 {
            Shape::Primitive(p) => p.name().to_string(),
            Shape::Message(name) => name.to_string(),
            Shape::List(elem) => format!("list<{}>", elem.canonical_name()),
            Shape::Map(k, v) => format!("map<{},{}>", k.canonical_name(), v.canonical_name()),
            Shape::Optional(inner) => format!("optional<{}>", inner.canonical_name()),
            Shape::Dyn(inner) => format!("dyn<{}>", inner.canonical_name()),
            Shape::Param(letter) => letter.to_string(),
        }
    }

    pub fn is_primitive(&self, p: Primitive) -> bool {
        matches!(&*self.0, Shape::Primitive(q) if *q == p)
    }

    /// The bare, unconstrained `dyn` type — as opposed to the `dyn<T>` tag.
    pub fn is_bare_dyn(&self) -> bool {
        self.is_primitive(Primitive::Dyn)
    }

    pub fn is_param(&self) -> bool {
        matches!(&*self.0, Shape::Param(_))
    }

    pub fn is_dyn_tagged(&self) -> bool {
        matches!(&*self.0, Shape::Dyn(_))
    }

    /// The type a `dyn<T>` tag wraps, or `self` if untagged.
    pub fn untag(&self) -> TypeDecl {
        match &*self.0 {
            Shape::Dyn(inner) => inner.untag(),
            _ => self.clone(),
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(&*self.0, Shape::List(_) | Shape::Map(_, _) | Shape::Optional(_))
    }

    /// `self.matches(other)`: is a value declared `other` usable where
    /// `self` is expected? Identical, or `self` is `dyn`/a placeholder, or
    /// `other` is the bare `dyn` type, or same kind with component-wise
    /// `matches`.
    pub fn matches(&self, other: &TypeDecl) -> bool {
        if self == other {
            return true;
        }
        if self.is_bare_dyn() || self.is_param() {
            return true;
        }
        if other.is_bare_dyn() {
            return true;
        }
        match (&*self.0, &*other.0) {
            (Shape::List(a), Shape::List(b)) => a.matches(b),
            (Shape::Map(ak, av), Shape::Map(bk, bv)) => ak.matches(bk) && av.matches(bv),
            (Shape::Optional(a), Shape::Optional(b)) => a.matches(b),
            (Shape::Dyn(a), Shape::Dyn(b)) => a.matches(b),
            _ => false,
        }
    }

    pub fn matches_both(&self, other: &TypeDecl) -> bool {
        self.matches(other) && other.matches(self)
    }

    /// Narrowest common type of `self` and `other`, or `None` if there is
    /// none — used for ternary-branch unification and aggregate-literal
    /// homogenization.
    pub fn unify(&self, other: &TypeDecl) -> Option<TypeDecl> {
        if self == other {
            return Some(self.clone());
        }
        if self.is_bare_dyn() || other.is_bare_dyn() {
            return Some(TypeRegistry::dyn_type());
        }
        match (&*self.0, &*other.0) {
            (Shape::List(a), Shape::List(b)) => a.unify(b).map(TypeRegistry::list),
            (Shape::Map(ak, av), Shape::Map(bk, bv)) => {
                let k = ak.unify(bk)?;
                let v = av.unify(bv)?;
                Some(TypeRegistry::map(k, v))
            }
            (Shape::Optional(a), Shape::Optional(b)) => a.unify(b).map(TypeRegistry::optional),
            _ => None,
        }
    }

    /// Substitutes placeholder bindings into this type, recursively.
    pub fn template(&self, bindings: &HashMap<char, TypeDecl>) -> TypeDecl {
        match &*self.0 {
            Shape::Param(letter) => bindings.get(letter).cloned().unwrap_or_else(|| self.clone()),
            Shape::List(elem) => TypeRegistry::list(elem.template(bindings)),
            Shape::Map(k, v) => TypeRegistry::map(k.template(bindings), v.template(bindings)),
            Shape::Optional(inner) => TypeRegistry::optional(inner.template(bindings)),
            Shape::Dyn(inner) => TypeRegistry::dyn_tagged(inner.template(bindings)),
            Shape::Primitive(_) | Shape::Message(_) => self.clone(),
        }
    }

    /// Binds a single placeholder occurrence against an actual type,
    /// extending `bindings`. Returns `false` on an incompatible rebind.
    pub fn bind_placeholder(&self, actual: &TypeDecl, bindings: &mut HashMap<char, TypeDecl>) -> bool {
        match &*self.0 {
            Shape::Param(letter) => {
                let bound = if actual.is_dyn_tagged() { actual.clone() } else { actual.clone() };
                match bindings.get(letter) {
                    None => {
                        bindings.insert(*letter, bound);
                        true
                    }
                    Some(existing) => existing.matches_both(&bound) || existing.is_bare_dyn() || bound.is_bare_dyn(),
                }
            }
            Shape::List(elem) => match actual.untag().shape() {
                Shape::List(a) => elem.bind_placeholder(a, bindings),
                _ if actual.untag().is_bare_dyn() => true,
                _ => false,
            },
            Shape::Map(k, v) => match actual.untag().shape() {
                Shape::Map(ak, av) => k.bind_placeholder(ak, bindings) && v.bind_placeholder(av, bindings),
                _ if actual.untag().is_bare_dyn() => true,
                _ => false,
            },
            Shape::Optional(inner) => match actual.untag().shape() {
                Shape::Optional(a) => inner.bind_placeholder(a, bindings),
                _ if actual.untag().is_bare_dyn() => true,
                _ => false,
            },
            _ => self.matches(&actual.untag()) || self.matches(actual),
        }
    }

    pub fn contains_placeholder(&self) -> bool {
        match &*self.0 {
            Shape::Param(_) => true,
            Shape::List(e) => e.contains_placeholder(),
            Shape::Map(k, v) => k.contains_placeholder() || v.contains_placeholder(),
            Shape::Optional(i) | Shape::Dyn(i) => i.contains_placeholder(),
            Shape::Primitive(_) | Shape::Message(_) => false,
        }
    }
}

/// Thread-confined interning table. `TypeDecl` construction always routes
/// through here so repeated references to the same canonical name share one
/// allocation.
#[derive(Default)]
pub struct TypeRegistry {
    by_name: RefCell<HashMap<String, Rc<Shape>>>,
    names: StringTable,
}

thread_local! {
    static INTERNER: TypeRegistry = TypeRegistry::default();
}

impl TypeRegistry {
    fn intern(shape: Shape) -> TypeDecl {
        INTERNER.with(|reg| {
            let name = canonical_name_of(&shape);
            let key = reg.names.intern(&name).to_string();
            if let Some(existing) = reg.by_name.borrow().get(&key) {
                return TypeDecl(existing.clone());
            }
            let rc = Rc::new(shape);
            reg.by_name.borrow_mut().insert(key, rc.clone());
            TypeDecl(rc)
        })
    }

    pub fn primitive(p: Primitive) -> TypeDecl {
        Self::intern(Shape::Primitive(p))
    }
    pub fn string() -> TypeDecl {
        Self::primitive(Primitive::String)
    }
    pub fn bool_() -> TypeDecl {
        Self::primitive(Primitive::Bool)
    }
    pub fn int() -> TypeDecl {
        Self::primitive(Primitive::Int)
    }
    pub fn uint() -> TypeDecl {
        Self::primitive(Primitive::Uint)
    }
    pub fn double() -> TypeDecl {
        Self::primitive(Primitive::Double)
    }
    pub fn bytes() -> TypeDecl {
        Self::primitive(Primitive::Bytes)
    }
    pub fn null() -> TypeDecl {
        Self::primitive(Primitive::Null)
    }
    pub fn type_() -> TypeDecl {
        Self::primitive(Primitive::Type)
    }
    pub fn dyn_type() -> TypeDecl {
        Self::primitive(Primitive::Dyn)
    }
    pub fn ast() -> TypeDecl {
        Self::primitive(Primitive::Ast)
    }
    pub fn message(name: impl Into<Rc<str>>) -> TypeDecl {
        Self::intern(Shape::Message(name.into()))
    }
    pub fn list(elem: TypeDecl) -> TypeDecl {
        Self::intern(Shape::List(elem))
    }
    pub fn map(key: TypeDecl, value: TypeDecl) -> TypeDecl {
        Self::intern(Shape::Map(key, value))
    }
    pub fn optional(inner: TypeDecl) -> TypeDecl {
        Self::intern(Shape::Optional(inner))
    }
    pub fn dyn_tagged(inner: TypeDecl) -> TypeDecl {
        Self::intern(Shape::Dyn(inner))
    }
    pub fn param(letter: char) -> TypeDecl {
        Self::intern(Shape::Param(letter))
    }

    pub fn interned_count() -> usize {
        INTERNER.with(|reg| reg.by_name.borrow().len())
    }
}

fn canonical_name_of(shape: &Shape) -> String {
    match shape {
        Shape::Primitive(p) => p.name().to_string(),
        Shape::Message(n) => n.to_string(),
        Shape::List(e) => format!("list<{}>", e.canonical_name()),
        Shape::Map(k, v) => format!("map<{},{}>", k.canonical_name(), v.canonical_name()),
        Shape::Optional(i) => format!("optional<{}>", i.canonical_name()),
        Shape::Dyn(i) => format!("dyn<{}>", i.canonical_name()),
        Shape::Param(c) => c.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_canonical_name_interns_to_one_allocation() {
        let a = TypeRegistry::list(TypeRegistry::int());
        let b = TypeRegistry::list(TypeRegistry::int());
        assert_eq!(a, b);
        assert!(Rc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn dyn_matches_anything_and_is_matched_by_anything() {
        let dyn_t = TypeRegistry::dyn_type();
        let int_t = TypeRegistry::int();
        assert!(dyn_t.matches(&int_t));
        assert!(int_t.matches(&dyn_t));
        assert!(!int_t.matches(&TypeRegistry::string()));
    }

    #[test]
    fn param_matches_anything_but_is_not_matched_back() {
        let a = TypeRegistry::param('A');
        let int_t = TypeRegistry::int();
        assert!(a.matches(&int_t));
        assert!(!int_t.matches(&a));
    }

    #[test]
    fn list_matching_is_component_wise() {
        let list_int = TypeRegistry::list(TypeRegistry::int());
        let list_dyn = TypeRegistry::list(TypeRegistry::dyn_type());
        assert!(list_dyn.matches(&list_int));
        assert!(!list_int.matches(&TypeRegistry::list(TypeRegistry::string())));
    }

    #[test]
    fn unify_returns_narrowest_common_type_or_none() {
        let int_t = TypeRegistry::int();
        assert_eq!(int_t.unify(&int_t), Some(int_t.clone()));
        assert_eq!(int_t.unify(&TypeRegistry::string()), None);
        let dyn_t = TypeRegistry::dyn_type();
        assert_eq!(int_t.unify(&dyn_t), Some(dyn_t));
    }

    #[test]
    fn template_substitutes_placeholders_recursively() {
        let sig = TypeRegistry::list(TypeRegistry::param('A'));
        let mut bindings = HashMap::new();
        bindings.insert('A', TypeRegistry::int());
        assert_eq!(sig.template(&bindings), TypeRegistry::list(TypeRegistry::int()));
    }

    #[test]
    fn canonical_names_render_as_expected() {
        let t = TypeRegistry::map(TypeRegistry::string(), TypeRegistry::dyn_tagged(TypeRegistry::double()));
        assert_eq!(t.canonical_name(), "map<string,dyn<double>>");
    }
}
