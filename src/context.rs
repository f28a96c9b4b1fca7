// SPDX-License-Identifier: MIT
//! Capabilities handed to a module's declare function.

use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::error::Result;
use crate::loader::Loader;
use crate::namespace::{ExportTable, ModuleNamespace};
use crate::record::LoadRecord;

/// The live-binding export handle bound to one load record.
///
/// Declared module code calls this to publish or update its exported
/// bindings. Every call marks the module as having hoisted exports; any call
/// that changes the namespace fans the new state out synchronously to all
/// registered dependents, which is how circular dependents observe each
/// other before execution completes.
#[derive(Clone)]
pub struct Exports {
    record: Rc<LoadRecord>,
}

impl Exports {
    pub(crate) fn new(record: Rc<LoadRecord>) -> Self {
        Self { record }
    }

    /// Publish a single binding, returning the value for expression-position
    /// use in declared code.
    pub fn set(&self, name: impl Into<String>, value: Value) -> Value {
        self.record.publish([(name.into(), value.clone())]);
        value
    }

    /// Publish several bindings at once; dependents are notified once if
    /// anything changed.
    pub fn set_many(&self, entries: ExportTable) {
        self.record.publish(entries);
    }
}

impl fmt::Debug for Exports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exports").field("id", &self.record.id).finish()
    }
}

/// Per-module context: the module's own id plus relative resolution and
/// dynamic import scoped to it.
#[derive(Clone)]
pub struct ModuleContext {
    loader: Loader,
    url: String,
}

impl ModuleContext {
    pub(crate) fn new(loader: Loader, url: String) -> Self {
        Self { loader, url }
    }

    /// The module's own resolved id.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Resolve a specifier, defaulting the parent to this module.
    pub async fn resolve(&self, specifier: &str, parent: Option<&str>) -> Result<String> {
        let parent = parent.unwrap_or(&self.url);
        self.loader.resolve(specifier, Some(parent)).await
    }

    /// Dynamic import scoped to this module: the specifier is resolved with
    /// this module as parent and the target graph is loaded and executed.
    pub async fn import(&self, specifier: &str, meta: Option<Value>) -> Result<ModuleNamespace> {
        self.loader.import(specifier, Some(&self.url), meta).await
    }
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext").field("url", &self.url).finish()
    }
}
