//! The value environment: bindings for node ids, `let`
//! names, and lambda parameters.
//!
//! `Env` is logically persistent, mirroring the container discipline in
//! [`crate::value`]: [`Env::bind`] returns a new environment that shares
//! structure with its parent via a clone-on-write `Arc`, so a closure that
//! captured an `Env` never observes bindings made after it captured it.
//! The CFG evaluator instead uses [`Env::set`], which mutates in place —
//! SSA targets are bound monotonically within one execution, so sharing
//! is not required there.

use crate::value::Value;
use compact_str::CompactString;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::rc::Rc;
use triomphe::Arc;

/// Named ref cells: a store distinct from `Env`,
/// addressed by the `target` name carried on `refCell`/`deref`/`assign`/
/// `assignRef`. A `Value::RefCell` can also travel as an ordinary value
/// (passed as an argument, stored in a list, …) independent of whether it
/// is registered here under a name.
pub type RefCellStore = IndexMap<CompactString, Rc<RefCell<Value>>>;

#[derive(Debug, Clone, Default)]
pub struct Env {
    vars: Arc<IndexMap<CompactString, Value>>,
}

impl Env {
    pub fn new() -> Self {
        Self { vars: Arc::new(IndexMap::new()) }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Returns a new environment with `name` bound to `v`, leaving `self`
    /// (and anything that shares its storage) unchanged. Used for `let`,
    /// lambda application, and anywhere else a binding must be scoped to
    /// a sub-evaluation only.
    pub fn bind(&self, name: impl Into<CompactString>, v: Value) -> Env {
        let mut vars = (*self.vars).clone();
        vars.insert(name.into(), v);
        Env { vars: Arc::new(vars) }
    }

    /// Mutates this environment in place, extending it monotonically.
    /// Used by the CFG evaluator and the document-level expression
    /// prepass, where every node id is bound exactly once and no prior
    /// reference needs isolating from later bindings.
    pub fn set(&mut self, name: impl Into<CompactString>, v: Value) {
        Arc::make_mut(&mut self.vars).insert(name.into(), v);
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_does_not_mutate_parent() {
        let base = Env::new().bind("x", Value::Int(1));
        let child = base.bind("y", Value::Int(2));
        assert_eq!(base.get("y"), None);
        assert_eq!(child.get("x"), Some(&Value::Int(1)));
        assert_eq!(child.get("y"), Some(&Value::Int(2)));
    }

    #[test]
    fn set_mutates_in_place() {
        let mut env = Env::new();
        env.set("x", Value::Int(1));
        env.set("x", Value::Int(2));
        assert_eq!(env.get("x"), Some(&Value::Int(2)));
    }
}
