//! Interning table for type canonical names, shared by the registry and checker.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Maps canonical names to a single shared allocation, so that two references
/// to `list<int>` are the same `Rc` and can be compared by pointer identity
/// as a fast path before falling back to structural equality.
#[derive(Debug, Default)]
pub struct StringTable {
    lookup: RefCell<HashMap<Rc<str>, Rc<str>>>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, s: &str) -> Rc<str> {
        if let Some(existing) = self.lookup.borrow().get(s) {
            return existing.clone();
        }
        let rc: Rc<str> = Rc::from(s);
        self.lookup.borrow_mut().insert(rc.clone(), rc.clone());
        rc
    }

    pub fn len(&self) -> usize {
        self.lookup.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_returns_the_same_allocation() {
        let table = StringTable::new();
        let a = table.intern("list<int>");
        let b = table.intern("list<int>");
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn distinct_names_stay_distinct() {
        let table = StringTable::new();
        let a = table.intern("int");
        let b = table.intern("uint");
        assert!(!Rc::ptr_eq(&a, &b));
        assert_eq!(table.len(), 2);
    }
}
