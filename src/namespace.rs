// SPDX-License-Identifier: MIT
//! Module namespace objects.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

/// Insertion-ordered export table. `serde_json`'s `preserve_order` feature
/// makes this iteration-stable in declaration order.
pub type ExportTable = serde_json::Map<String, Value>;

/// Handle to a module's exported bindings.
///
/// Cheaply cloneable — all clones share the same table, and the handle's
/// identity is stable for the lifetime of its load record. Values mutate in
/// place as live bindings are republished; read accessors return the current
/// state.
#[derive(Clone, Default)]
pub struct ModuleNamespace {
    table: Rc<RefCell<ExportTable>>,
}

impl ModuleNamespace {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Current value of the export `name`, if published.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.table.borrow().get(name).cloned()
    }

    /// Exported names, in first-publication order.
    pub fn keys(&self) -> Vec<String> {
        self.table.borrow().keys().cloned().collect()
    }

    /// Number of exported bindings.
    pub fn len(&self) -> usize {
        self.table.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.borrow().is_empty()
    }

    /// A point-in-time copy of the whole table.
    pub fn snapshot(&self) -> ExportTable {
        self.table.borrow().clone()
    }

    /// Whether two handles refer to the same underlying table.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.table, &b.table)
    }

    /// Apply `entries`, returning whether anything changed. An entry counts
    /// as changed when its key is absent or its value differs.
    pub(crate) fn apply(&self, entries: impl IntoIterator<Item = (String, Value)>) -> bool {
        let mut table = self.table.borrow_mut();
        let mut changed = false;
        for (name, value) in entries {
            match table.get(&name) {
                Some(current) if *current == value => {}
                _ => {
                    table.insert(name, value);
                    changed = true;
                }
            }
        }
        changed
    }
}

impl fmt::Debug for ModuleNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModuleNamespace")
            .field(&*self.table.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn apply_reports_changes_only() {
        let ns = ModuleNamespace::new();
        assert!(ns.apply([("a".to_owned(), json!(1))]));
        assert!(!ns.apply([("a".to_owned(), json!(1))]));
        assert!(ns.apply([("a".to_owned(), json!(2))]));
        assert_eq!(ns.get("a"), Some(json!(2)));
    }

    #[test]
    fn keys_keep_publication_order() {
        let ns = ModuleNamespace::new();
        ns.apply([("z".to_owned(), json!(1)), ("a".to_owned(), json!(2))]);
        ns.apply([("m".to_owned(), json!(3))]);
        assert_eq!(ns.keys(), vec!["z", "a", "m"]);
    }

    #[test]
    fn clones_share_identity() {
        let ns = ModuleNamespace::new();
        let other = ns.clone();
        ns.apply([("x".to_owned(), json!(true))]);
        assert_eq!(other.get("x"), Some(json!(true)));
        assert!(ModuleNamespace::ptr_eq(&ns, &other));
        assert!(!ModuleNamespace::ptr_eq(&ns, &ModuleNamespace::new()));
    }
}
