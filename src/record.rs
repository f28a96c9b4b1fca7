// SPDX-License-Identifier: MIT
//! Per-module load records.
//!
//! One record exists per resolved module id per loader lifetime, tracking
//! the module through instantiate → link → execute. The record also hosts
//! the live-binding machinery: the namespace and the list of importer
//! setters that fan-out republications to dependents.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use futures_util::future::{LocalBoxFuture, Shared};
use serde_json::Value;

use crate::error::LoaderError;
use crate::namespace::ModuleNamespace;
use crate::registration::{ExecuteFn, Setter};

/// Memoized one-shot result of a pipeline phase. Cloning shares the
/// underlying future, so concurrent imports of the same id await the same
/// work and observe the same outcome.
pub(crate) type SharedPhase = Shared<LocalBoxFuture<'static, Result<(), LoaderError>>>;

/// Memoized top-level completion of an entry import.
pub(crate) type SharedCompletion =
    Shared<LocalBoxFuture<'static, Result<ModuleNamespace, LoaderError>>>;

/// The execute slot's three states. `Taken` is the sentinel distinguishing
/// "executing, executed, or failed" from "not yet executing"; the thunk is
/// removed the instant execution begins so re-entrant traversals skip it.
#[derive(Default)]
pub(crate) enum ExecSlot {
    /// Not yet instantiated.
    #[default]
    Pending,
    /// Instantiated, not yet executed.
    Ready(ExecuteFn),
    /// Executing, executed, or terminally failed.
    Taken,
}

/// Link-phase input captured at instantiation: dependency specifiers with
/// their positionally-aligned setters and metadata. Consumed exactly once by
/// the linker.
#[derive(Default)]
pub(crate) struct PendingLink {
    pub specifiers: Vec<String>,
    pub setters: Vec<Option<Setter>>,
    pub metas: Vec<Option<Value>>,
}

#[derive(Default)]
pub(crate) struct RecordState {
    /// One-shot instantiate phase. Cleared only when execution completes
    /// synchronously — the cleared slot is itself the linker's eager-setter
    /// signal for already-executed dependencies.
    pub instantiate: Option<SharedPhase>,
    /// One-shot link phase; cleared together with `instantiate`.
    pub link: Option<SharedPhase>,
    /// Captured by instantiation, drained by the linker.
    pub declared: Option<PendingLink>,
    /// Dependency records in declared order, present once linked.
    pub dependencies: Option<Vec<Rc<LoadRecord>>>,
    pub execute: ExecSlot,
    /// Terminal error; never cleared once set.
    pub error: Option<LoaderError>,
    /// In-flight deferred execution, `None` once settled.
    pub async_completion: Option<SharedPhase>,
    /// Top-level future, set only on records imported as an entry point.
    pub completion: Option<SharedCompletion>,
    /// Entry record attributed as this record's cause, for error tracing.
    pub parent: Option<Weak<LoadRecord>>,
}

/// Per-module bookkeeping node. See the module docs.
pub(crate) struct LoadRecord {
    pub id: String,
    /// Opaque per-edge metadata supplied by the first importer; immutable.
    pub meta: Option<Value>,
    pub namespace: ModuleNamespace,
    /// Setters registered by dependents; grows, never shrinks. `None` slots
    /// are permanent skips (a dependent declared no interest in this edge).
    pub importer_setters: RefCell<Vec<Option<Setter>>>,
    /// Set on the first export call, before any change detection.
    pub hoisted: Cell<bool>,
    pub state: RefCell<RecordState>,
}

impl LoadRecord {
    pub fn new(id: &str, meta: Option<Value>) -> Rc<Self> {
        Rc::new(Self {
            id: id.to_owned(),
            meta,
            namespace: ModuleNamespace::new(),
            importer_setters: RefCell::new(Vec::new()),
            hoisted: Cell::new(false),
            state: RefCell::new(RecordState::default()),
        })
    }

    /// Publish exports: update the namespace in place and, if anything
    /// changed, fan the new state out to every registered setter
    /// synchronously, in registration order.
    pub fn publish(&self, entries: impl IntoIterator<Item = (String, Value)>) -> bool {
        self.hoisted.set(true);
        let changed = self.namespace.apply(entries);
        if changed {
            self.notify_setters();
        }
        changed
    }

    /// Append a dependent's setter, returning its slot index.
    pub fn register_setter(&self, setter: Setter) -> usize {
        let mut slots = self.importer_setters.borrow_mut();
        slots.push(Some(setter));
        slots.len() - 1
    }

    /// Invoke the setter at `index` with the current namespace state.
    ///
    /// The setter is removed from its slot for the duration of the call and
    /// handed a snapshot, so re-entrant publishes never alias a live borrow.
    pub fn invoke_setter(&self, index: usize) {
        let taken = self.importer_setters.borrow_mut()[index].take();
        if let Some(mut setter) = taken {
            let snapshot = self.namespace.snapshot();
            setter(&snapshot);
            self.importer_setters.borrow_mut()[index] = Some(setter);
        }
    }

    /// Dependency ids in declared order, once linked.
    pub fn dependency_ids(&self) -> Option<Vec<String>> {
        self.state
            .borrow()
            .dependencies
            .as_ref()
            .map(|deps| deps.iter().map(|d| d.id.clone()).collect())
    }

    /// Whether this record could still run: no cached error and its thunk
    /// has not been taken. Governs parent-attribution reassignment.
    pub fn can_still_execute(&self) -> bool {
        let state = self.state.borrow();
        state.error.is_none() && !matches!(state.execute, ExecSlot::Taken)
    }

    fn notify_setters(&self) {
        // The slot list length is re-read every iteration: a setter may
        // register further setters mid-fan-out and those must be delivered
        // in the same round.
        let mut index = 0;
        while index < self.importer_setters.borrow().len() {
            self.invoke_setter(index);
            index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn publish_sets_hoisted_even_without_changes() {
        let record = LoadRecord::new("file:///a.js", None);
        assert!(!record.hoisted.get());
        assert!(!record.publish(Vec::new()));
        assert!(record.hoisted.get());
    }

    #[test]
    fn publish_fans_out_only_on_change() {
        let record = LoadRecord::new("file:///a.js", None);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        record.register_setter(Box::new(move |ns| {
            seen2.borrow_mut().push(ns.get("x").cloned());
        }));

        record.publish([("x".to_owned(), json!(1))]);
        record.publish([("x".to_owned(), json!(1))]); // no change, no fan-out
        record.publish([("x".to_owned(), json!(2))]);

        assert_eq!(*seen.borrow(), vec![Some(json!(1)), Some(json!(2))]);
    }

    #[test]
    fn none_slots_are_skipped() {
        let record = LoadRecord::new("file:///a.js", None);
        record.importer_setters.borrow_mut().push(None);
        let hits = Rc::new(Cell::new(0));
        let hits2 = hits.clone();
        record.register_setter(Box::new(move |_| hits2.set(hits2.get() + 1)));

        record.publish([("x".to_owned(), json!(1))]);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn setters_registered_during_fanout_are_delivered() {
        let record = LoadRecord::new("file:///a.js", None);
        let late_hits = Rc::new(Cell::new(0));
        {
            let record2 = record.clone();
            let late_hits2 = late_hits.clone();
            let registered = Cell::new(false);
            record.register_setter(Box::new(move |_| {
                if !registered.replace(true) {
                    let late_hits3 = late_hits2.clone();
                    record2.register_setter(Box::new(move |_| {
                        late_hits3.set(late_hits3.get() + 1);
                    }));
                }
            }));
        }
        record.publish([("x".to_owned(), json!(1))]);
        assert_eq!(late_hits.get(), 1, "late setter delivered in same round");
    }
}
