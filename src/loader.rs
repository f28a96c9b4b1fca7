// SPDX-License-Identifier: MIT
//! The load/link/execute engine.
//!
//! A [`Loader`] owns the registry of load records and drives each module
//! through the pipeline:
//!
//! ```text
//! Created → Instantiating → {Errored | Instantiated}
//!         → Linking       → {Errored | Linked}
//!         → Executing     → {Errored | Executed(sync)
//!                          | Executed(async-pending) → Executed}
//! ```
//!
//! Errored and Executed are terminal; there are no retries. Every phase is a
//! memoized one-shot shared future, so concurrent imports of the same id
//! share the same work, and a failed id replays its cached failure without
//! re-invoking external hooks.
//!
//! The loader is single-threaded and cooperatively scheduled (`!Send`); the
//! only suspension points are the external hooks, dependency phase futures,
//! deferred execution completions, and queued import-map acquisitions.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;

use futures_util::future::{try_join_all, FutureExt, LocalBoxFuture};
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::{Exports, ModuleContext};
use crate::error::{LoaderError, Result};
use crate::hooks::{ModuleInstantiator, ModuleResolver, NoopTrace, TraceHook};
use crate::import_map::ImportMap;
use crate::namespace::ModuleNamespace;
use crate::record::{ExecSlot, LoadRecord, PendingLink, SharedCompletion, SharedPhase};
use crate::registration::ExecuteFn;
use crate::resolver::MapResolver;

/// A pending import-map acquisition: yields the map and an optional base URL
/// it should be normalized against (the loader base when absent).
pub type MapAcquisition = LocalBoxFuture<'static, anyhow::Result<(ImportMap, Option<String>)>>;

/// Builder for [`Loader`]. Entered via [`Loader::builder`].
pub struct LoaderBuilder {
    instantiator: Rc<dyn ModuleInstantiator>,
    resolver: Option<Rc<dyn ModuleResolver>>,
    trace: Option<Rc<dyn TraceHook>>,
    base_url: String,
    seed_map: Option<ImportMap>,
}

impl LoaderBuilder {
    /// Default parent URL for parentless resolution. Trailing slash
    /// significant. Default: `file:///`.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Replace the default import-map resolver.
    pub fn resolver(mut self, resolver: impl ModuleResolver + 'static) -> Self {
        self.resolver = Some(Rc::new(resolver));
        self
    }

    /// Install a tracing hook (default: no-op).
    pub fn trace_hook(mut self, trace: impl TraceHook + 'static) -> Self {
        self.trace = Some(Rc::new(trace));
        self
    }

    /// Seed the active import map, normalized against the base URL.
    pub fn import_map(mut self, map: ImportMap) -> Self {
        self.seed_map = Some(map);
        self
    }

    pub fn build(self) -> Loader {
        let import_map = Rc::new(RefCell::new(ImportMap::default()));
        if let Some(seed) = self.seed_map {
            import_map.borrow_mut().extend(seed, &self.base_url);
        }
        let resolver = self.resolver.unwrap_or_else(|| {
            Rc::new(MapResolver::new(import_map.clone(), self.base_url.clone()))
        });
        Loader {
            inner: Rc::new(LoaderInner {
                registry: RefCell::new(HashMap::new()),
                resolver,
                instantiator: self.instantiator,
                trace: self.trace.unwrap_or_else(|| Rc::new(NoopTrace)),
                import_map,
                base_url: self.base_url,
                pending_maps: RefCell::new(VecDeque::new()),
            }),
        }
    }
}

struct LoaderInner {
    /// Single source of truth: id → load record, never duplicated.
    registry: RefCell<HashMap<String, Rc<LoadRecord>>>,
    resolver: Rc<dyn ModuleResolver>,
    instantiator: Rc<dyn ModuleInstantiator>,
    trace: Rc<dyn TraceHook>,
    import_map: Rc<RefCell<ImportMap>>,
    base_url: String,
    pending_maps: RefCell<VecDeque<MapAcquisition>>,
}

/// The module-graph loader. Cheaply cloneable — clones share the registry.
#[derive(Clone)]
pub struct Loader {
    inner: Rc<LoaderInner>,
}

impl Loader {
    /// A loader with default resolution, no tracing and the default base URL.
    pub fn new(instantiator: impl ModuleInstantiator + 'static) -> Self {
        Self::builder(instantiator).build()
    }

    pub fn builder(instantiator: impl ModuleInstantiator + 'static) -> LoaderBuilder {
        LoaderBuilder {
            instantiator: Rc::new(instantiator),
            resolver: None,
            trace: None,
            base_url: "file:///".to_owned(),
            seed_map: None,
        }
    }

    // ─── Import maps ─────────────────────────────────────────────────────

    /// Merge a map into the active resolution table, normalized against
    /// `base` (the loader base URL when absent).
    pub fn add_import_map(&self, map: ImportMap, base: Option<&str>) {
        let base = base.unwrap_or(&self.inner.base_url);
        self.inner.import_map.borrow_mut().extend(map, base);
    }

    /// Register a pending acquisition to be merged by [`prepare_import`].
    /// Acquisitions merge in queue order.
    ///
    /// [`prepare_import`]: Loader::prepare_import
    pub fn queue_import_map<F>(&self, acquisition: F)
    where
        F: Future<Output = anyhow::Result<(ImportMap, Option<String>)>> + 'static,
    {
        self.inner
            .pending_maps
            .borrow_mut()
            .push_back(Box::pin(acquisition));
    }

    /// Settle every queued import-map acquisition, merging each in order.
    /// Resolution must not be trusted before this completes; [`import`]
    /// awaits it first. A failed acquisition is logged and skipped.
    ///
    /// [`import`]: Loader::import
    pub async fn prepare_import(&self) {
        loop {
            let next = self.inner.pending_maps.borrow_mut().pop_front();
            let Some(acquisition) = next else { break };
            match acquisition.await {
                Ok((map, base)) => {
                    let base = base.unwrap_or_else(|| self.inner.base_url.clone());
                    self.inner.import_map.borrow_mut().extend(map, &base);
                }
                Err(err) => {
                    warn!(error = %err, "skipping failed import-map acquisition");
                }
            }
        }
    }

    /// A point-in-time copy of the active import map.
    pub fn import_map_snapshot(&self) -> ImportMap {
        self.inner.import_map.borrow().clone()
    }

    // ─── Top-level entry ─────────────────────────────────────────────────

    /// Resolve a specifier through the resolver hook.
    pub async fn resolve(&self, specifier: &str, parent: Option<&str>) -> Result<String> {
        self.inner.resolver.resolve(specifier, parent).await
    }

    /// Load, link and execute the module graph rooted at `specifier`,
    /// yielding the entry module's namespace handle once fully executed.
    ///
    /// `meta` is opaque per-edge metadata handed to the instantiate hook if
    /// this import creates the record. Repeated imports of the same entry
    /// share one cached completion future.
    pub async fn import(
        &self,
        specifier: &str,
        parent: Option<&str>,
        meta: Option<Value>,
    ) -> Result<ModuleNamespace> {
        self.prepare_import().await;
        let id = self.resolve(specifier, parent).await?;
        let record = self.get_or_create_load(&id, parent, meta);
        let completion = record.state.borrow().completion.clone();
        match completion {
            Some(pending) => pending.await,
            None => self.top_level_load(record).await,
        }
    }

    // ─── Load record factory ─────────────────────────────────────────────

    /// Get or create the load record for `id`. Creation inserts the record
    /// into the registry before any suspension point, which is what lets
    /// cyclic graphs terminate: a dependency currently instantiating is
    /// found here and returned as-is.
    fn get_or_create_load(
        &self,
        id: &str,
        parent: Option<&str>,
        meta: Option<Value>,
    ) -> Rc<LoadRecord> {
        if let Some(existing) = self.inner.registry.borrow().get(id) {
            return existing.clone();
        }

        let record = LoadRecord::new(id, meta);
        self.inner
            .registry
            .borrow_mut()
            .insert(id.to_owned(), record.clone());
        debug!(id, "load record created");

        let instantiate = self.instantiate_phase(record.clone(), parent.map(str::to_owned));
        let link = self.link_phase(record.clone(), instantiate.clone());
        let mut state = record.state.borrow_mut();
        state.instantiate = Some(instantiate);
        state.link = Some(link);
        drop(state);
        record
    }

    /// The one-shot instantiate phase: run the hook, validate the
    /// registration, run its declare function, store the execution surface.
    fn instantiate_phase(&self, record: Rc<LoadRecord>, parent: Option<String>) -> SharedPhase {
        let loader = self.clone();
        async move {
            let outcome = loader
                .inner
                .instantiator
                .instantiate(&record.id, parent.as_deref(), record.meta.as_ref())
                .await;
            let registration = match outcome {
                Ok(Some(registration)) => registration,
                Ok(None) => return Err(loader.fail_instantiate(&record, None)),
                Err(err) => return Err(loader.fail_instantiate(&record, Some(err))),
            };

            let declared = (registration.declare)(
                Exports::new(record.clone()),
                ModuleContext::new(loader.clone(), record.id.clone()),
            );

            let dep_count = registration.dependencies.len();
            let mut setters = declared.setters;
            setters.resize_with(dep_count, || None);
            let mut metas = registration.metas;
            metas.resize(dep_count, None);

            let mut state = record.state.borrow_mut();
            state.execute = ExecSlot::Ready(
                declared.execute.unwrap_or_else(|| Box::new(|| Ok(None))),
            );
            state.declared = Some(PendingLink {
                specifiers: registration.dependencies,
                setters,
                metas,
            });
            drop(state);
            debug!(id = %record.id, deps = dep_count, "module instantiated");
            Ok(())
        }
        .boxed_local()
        .shared()
    }

    fn fail_instantiate(&self, record: &Rc<LoadRecord>, cause: Option<anyhow::Error>) -> LoaderError {
        let err = LoaderError::Instantiation {
            id: record.id.clone(),
            cause: cause.map(Arc::new),
        };
        let mut state = record.state.borrow_mut();
        state.error = Some(err.clone());
        state.execute = ExecSlot::Taken;
        drop(state);
        self.trigger_trace(Some(&err), record, true);
        err
    }

    // ─── Linker ──────────────────────────────────────────────────────────

    /// The one-shot link phase, chained off instantiation: materialize each
    /// dependency record in declared order and wire this record's setters
    /// into them.
    fn link_phase(&self, record: Rc<LoadRecord>, instantiate: SharedPhase) -> SharedPhase {
        let loader = self.clone();
        async move {
            instantiate.await?;

            let pending = record.state.borrow_mut().declared.take().unwrap_or_default();
            let mut dependencies = Vec::with_capacity(pending.specifiers.len());

            for ((specifier, setter), meta) in pending
                .specifiers
                .into_iter()
                .zip(pending.setters)
                .zip(pending.metas)
            {
                let dep_id = loader
                    .resolve(&specifier, Some(&record.id))
                    .await
                    .map_err(|err| LoaderError::Link {
                        id: record.id.clone(),
                        specifier: specifier.clone(),
                        cause: Box::new(err),
                    })?;

                let dep = loader.get_or_create_load(&dep_id, Some(&record.id), meta);

                // May already be settled (or cleared) for previously-seen
                // ids — this is what breaks recursion on cycles.
                let dep_instantiate = dep.state.borrow().instantiate.clone();
                if let Some(phase) = dep_instantiate.clone() {
                    phase.await?;
                }

                if let Some(setter) = setter {
                    let index = dep.register_setter(setter);
                    // Eager delivery iff the dependency has hoisted exports,
                    // or its instantiate slot is already cleared (it finished
                    // executing synchronously). Anything else waits for the
                    // dependency's own export calls to fan out.
                    if dep.hoisted.get() || dep_instantiate.is_none() {
                        dep.invoke_setter(index);
                    }
                }

                dependencies.push(dep);
            }

            record.state.borrow_mut().dependencies = Some(dependencies);
            debug!(id = %record.id, "module linked");
            Ok(())
        }
        .boxed_local()
        .shared()
    }

    // ─── Pre-execution traversal ─────────────────────────────────────────

    /// Depth-first over the graph rooted at `record`: ensure every reachable
    /// record has finished instantiate+link before execution starts. The
    /// visited set is scoped to one top-level import, bounding cyclic walks.
    fn instantiate_all(
        &self,
        record: Rc<LoadRecord>,
        entry: Rc<LoadRecord>,
        visited: Rc<RefCell<HashSet<String>>>,
    ) -> LocalBoxFuture<'static, Result<()>> {
        let loader = self.clone();
        Box::pin(async move {
            if !visited.borrow_mut().insert(record.id.clone()) {
                return Ok(());
            }

            let outcome: Result<()> = async {
                let link = record.state.borrow().link.clone();
                if let Some(phase) = link {
                    phase.await?;
                }

                // Re-attribute the record to this entry unless its current
                // parent is still live and could still run.
                let parent = record
                    .state
                    .borrow()
                    .parent
                    .as_ref()
                    .and_then(std::rc::Weak::upgrade);
                let keep = match &parent {
                    Some(p) if Rc::ptr_eq(p, &record) => record.can_still_execute(),
                    Some(p) => p.can_still_execute(),
                    None => false,
                };
                if !keep {
                    record.state.borrow_mut().parent = Some(Rc::downgrade(&entry));
                }

                let dependencies = record.state.borrow().dependencies.clone();
                if let Some(dependencies) = dependencies {
                    for dep in dependencies {
                        loader
                            .instantiate_all(dep, entry.clone(), visited.clone())
                            .await?;
                    }
                }
                Ok(())
            }
            .await;

            if let Err(err) = outcome {
                // If the failure originated here it was already reported as
                // originating; only rethrow.
                if record.state.borrow().error.is_some() {
                    return Err(err);
                }
                record.state.borrow_mut().execute = ExecSlot::Taken;
                loader.trigger_trace(Some(&err), &record, false);
                return Err(err);
            }
            Ok(())
        })
    }

    fn top_level_load(&self, record: Rc<LoadRecord>) -> SharedCompletion {
        let loader = self.clone();
        let entry = record.clone();
        let completion = async move {
            let visited = Rc::new(RefCell::new(HashSet::new()));
            loader
                .instantiate_all(entry.clone(), entry.clone(), visited)
                .await?;
            let mut seen = HashSet::new();
            if let Some(pending) = loader.post_order_exec(&entry, &mut seen)? {
                pending.await?;
            }
            Ok(entry.namespace.clone())
        }
        .boxed_local()
        .shared();
        record.state.borrow_mut().completion = Some(completion.clone());
        completion
    }

    // ─── Post-order executor ─────────────────────────────────────────────

    /// Execute `record` after its dependencies, cycle-safe. Returns a future
    /// iff a deferred completion is pending somewhere beneath this record;
    /// synchronous failures surface as `Err` through the same call.
    fn post_order_exec(
        &self,
        record: &Rc<LoadRecord>,
        seen: &mut HashSet<String>,
    ) -> Result<Option<SharedPhase>> {
        if !seen.insert(record.id.clone()) {
            return Ok(None);
        }

        // Take the thunk first: a `Taken` slot is how re-entrant traversals
        // observe "already executing or executed".
        let thunk = {
            let mut state = record.state.borrow_mut();
            match std::mem::replace(&mut state.execute, ExecSlot::Taken) {
                ExecSlot::Ready(thunk) => Some(thunk),
                other => {
                    state.execute = other;
                    None
                }
            }
        };
        let Some(thunk) = thunk else {
            let state = record.state.borrow();
            if let Some(err) = &state.error {
                return Err(err.clone());
            }
            if let Some(pending) = &state.async_completion {
                return Ok(Some(pending.clone()));
            }
            return Ok(None);
        };

        // Dependencies execute first, in declared order; deferred
        // completions are collected and joined, they are already in flight.
        let dependencies = record.state.borrow().dependencies.clone().unwrap_or_default();
        let mut pending_deps: Vec<SharedPhase> = Vec::new();
        for dep in &dependencies {
            match self.post_order_exec(dep, seen) {
                Ok(Some(pending)) => pending_deps.push(pending),
                Ok(None) => {}
                Err(err) => {
                    record.state.borrow_mut().error = Some(err.clone());
                    self.trigger_trace(Some(&err), record, false);
                    return Err(err);
                }
            }
        }

        if pending_deps.is_empty() {
            return self.run_thunk(record, thunk);
        }

        let loader = self.clone();
        let record = record.clone();
        Ok(Some(
            async move {
                try_join_all(pending_deps).await?;
                match loader.run_thunk(&record, thunk)? {
                    Some(pending) => pending.await,
                    None => Ok(()),
                }
            }
            .boxed_local()
            .shared(),
        ))
    }

    /// Invoke the execution thunk. Synchronous completion clears the phase
    /// futures (nothing left to retain); a deferred completion is stored as
    /// the record's in-flight execution and settled through here later.
    fn run_thunk(
        &self,
        record: &Rc<LoadRecord>,
        thunk: ExecuteFn,
    ) -> Result<Option<SharedPhase>> {
        debug!(id = %record.id, "executing module");
        match thunk() {
            Err(err) => {
                let err = LoaderError::Execution {
                    id: record.id.clone(),
                    cause: Arc::new(err),
                };
                record.state.borrow_mut().error = Some(err.clone());
                self.trigger_trace(Some(&err), record, true);
                Err(err)
            }
            Ok(None) => {
                let mut state = record.state.borrow_mut();
                state.instantiate = None;
                state.link = None;
                drop(state);
                debug!(id = %record.id, "module executed");
                self.trigger_trace(None, record, true);
                Ok(None)
            }
            Ok(Some(completion)) => {
                let loader = self.clone();
                let record2 = record.clone();
                let pending = async move {
                    match completion.await {
                        Ok(()) => {
                            record2.state.borrow_mut().async_completion = None;
                            debug!(id = %record2.id, "module executed (deferred)");
                            loader.trigger_trace(None, &record2, true);
                            Ok(())
                        }
                        Err(err) => {
                            let err = LoaderError::Execution {
                                id: record2.id.clone(),
                                cause: Arc::new(err),
                            };
                            let mut state = record2.state.borrow_mut();
                            state.error = Some(err.clone());
                            state.async_completion = None;
                            drop(state);
                            loader.trigger_trace(Some(&err), &record2, true);
                            Err(err)
                        }
                    }
                }
                .boxed_local()
                .shared();
                record.state.borrow_mut().async_completion = Some(pending.clone());
                Ok(Some(pending))
            }
        }
    }

    fn trigger_trace(&self, error: Option<&LoaderError>, record: &Rc<LoadRecord>, originating: bool) {
        let dependencies = record.dependency_ids();
        self.inner
            .trace
            .trace(error, &record.id, dependencies.as_deref(), originating);
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("modules", &self.inner.registry.borrow().len())
            .field("base_url", &self.inner.base_url)
            .finish()
    }
}
