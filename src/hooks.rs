// SPDX-License-Identifier: MIT
//! External collaborator hooks.
//!
//! The engine owns the load/link/execute pipeline and nothing else; where a
//! module id comes from and what a module id *is* are delegated to these
//! capability traits. All hooks are `?Send` — the loader is single-threaded
//! and cooperatively scheduled.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{LoaderError, Result};
use crate::registration::Registration;

/// Maps a specifier to a resolved module id.
///
/// Invoked for the top-level entry specifier and for every declared
/// dependency edge during linking. Failures must be
/// [`LoaderError::Resolution`] naming the specifier and, when known, the
/// parent.
#[async_trait(?Send)]
pub trait ModuleResolver {
    async fn resolve(&self, specifier: &str, parent: Option<&str>) -> Result<String>;
}

/// Produces the registration for a resolved module id.
///
/// Invoked at most once per id per loader lifetime. `Ok(None)` means the id
/// yielded nothing to register and fails the load with
/// [`LoaderError::Instantiation`]; an `Err` is carried as that error's
/// source.
#[async_trait(?Send)]
pub trait ModuleInstantiator {
    async fn instantiate(
        &self,
        id: &str,
        parent: Option<&str>,
        meta: Option<&Value>,
    ) -> anyhow::Result<Option<Registration>>;
}

/// Tracing hook for diagnostics, hot-reload integration and test probes.
///
/// Called on every instantiate/link/execute failure and on every execute
/// completion. `originating` distinguishes the record where a failure
/// originated from records it propagated through; the engine (re)surfaces
/// the error after the call, so implementations only observe.
pub trait TraceHook {
    fn trace(
        &self,
        error: Option<&LoaderError>,
        id: &str,
        dependencies: Option<&[String]>,
        originating: bool,
    );
}

/// Default trace hook.
pub(crate) struct NoopTrace;

impl TraceHook for NoopTrace {
    fn trace(&self, _: Option<&LoaderError>, _: &str, _: Option<&[String]>, _: bool) {}
}

/// Adapts a synchronous closure into a [`ModuleResolver`].
pub struct ResolverFn<F>(F);

impl<F> ResolverFn<F>
where
    F: Fn(&str, Option<&str>) -> Result<String>,
{
    pub fn new(resolve: F) -> Self {
        Self(resolve)
    }
}

#[async_trait(?Send)]
impl<F> ModuleResolver for ResolverFn<F>
where
    F: Fn(&str, Option<&str>) -> Result<String>,
{
    async fn resolve(&self, specifier: &str, parent: Option<&str>) -> Result<String> {
        (self.0)(specifier, parent)
    }
}

/// Adapts a synchronous closure into a [`ModuleInstantiator`].
pub struct InstantiatorFn<F>(F);

impl<F> InstantiatorFn<F>
where
    F: Fn(&str, Option<&str>, Option<&Value>) -> anyhow::Result<Option<Registration>>,
{
    pub fn new(instantiate: F) -> Self {
        Self(instantiate)
    }
}

#[async_trait(?Send)]
impl<F> ModuleInstantiator for InstantiatorFn<F>
where
    F: Fn(&str, Option<&str>, Option<&Value>) -> anyhow::Result<Option<Registration>>,
{
    async fn instantiate(
        &self,
        id: &str,
        parent: Option<&str>,
        meta: Option<&Value>,
    ) -> anyhow::Result<Option<Registration>> {
        (self.0)(id, parent, meta)
    }
}
