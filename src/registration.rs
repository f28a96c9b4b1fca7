// SPDX-License-Identifier: MIT
//! Module registrations — the product of instantiating a module id.
//!
//! A registration is the triple (dependency specifiers, declare function,
//! per-dependency metadata). The declare function runs exactly once per
//! record; it receives the record's live-binding [`Exports`] handle and a
//! [`ModuleContext`] and returns the module's execute thunk plus the setters
//! through which it observes its dependencies.
//!
//! [`Exports`]: crate::context::Exports
//! [`ModuleContext`]: crate::context::ModuleContext

use futures_util::future::LocalBoxFuture;
use serde_json::Value;

use crate::context::{Exports, ModuleContext};
use crate::namespace::ExportTable;

/// In-flight deferred completion of a module execution. Resolving it marks
/// the module executed; rejecting it fails the module terminally.
pub type AsyncCompletion = LocalBoxFuture<'static, anyhow::Result<()>>;

/// A module's execution thunk. `Ok(None)` is synchronous completion,
/// `Ok(Some(..))` defers completion, `Err` fails the module synchronously.
pub type ExecuteFn = Box<dyn FnOnce() -> anyhow::Result<Option<AsyncCompletion>>>;

/// Callback through which a dependent observes one dependency's namespace.
/// Invoked with the dependency's current exports on registration (when
/// eligible) and after every later change.
pub type Setter = Box<dyn FnMut(&ExportTable)>;

/// The declare function: wires a module's code to its export handle and
/// context, yielding its execution surface.
pub type DeclareFn = Box<dyn FnOnce(Exports, ModuleContext) -> Declared>;

/// What a declare function hands back to the loader.
#[derive(Default)]
pub struct Declared {
    /// Dependency setters, positionally aligned with the registration's
    /// dependency list. `None` slots (or a short list) skip delivery for
    /// that dependency.
    pub setters: Vec<Option<Setter>>,
    /// The execution thunk; `None` for modules with nothing to run.
    pub execute: Option<ExecuteFn>,
}

/// The (dependencies, declare, metas) triple produced by the instantiate
/// hook for one module id.
pub struct Registration {
    pub(crate) dependencies: Vec<String>,
    pub(crate) declare: DeclareFn,
    pub(crate) metas: Vec<Option<Value>>,
}

impl Registration {
    /// A registration with the given dependency specifiers and declare
    /// function, and no per-dependency metadata.
    pub fn new(
        dependencies: &[&str],
        declare: impl FnOnce(Exports, ModuleContext) -> Declared + 'static,
    ) -> Self {
        Self {
            dependencies: dependencies.iter().map(|s| (*s).to_owned()).collect(),
            declare: Box::new(declare),
            metas: Vec::new(),
        }
    }

    /// Attach per-dependency metadata, positionally aligned with the
    /// dependency list (a short list leaves trailing dependencies bare).
    pub fn with_metas(mut self, metas: impl IntoIterator<Item = Option<Value>>) -> Self {
        self.metas = metas.into_iter().collect();
        self
    }

    /// Declared dependency specifiers, in order.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("dependencies", &self.dependencies)
            .field("metas", &self.metas)
            .finish_non_exhaustive()
    }
}
