// SPDX-License-Identifier: MIT
//! modlink — async module-graph loader, linker and executor.
//!
//! Given a module identifier, a [`Loader`] instantiates that module and its
//! transitive dependency graph, links cross-module exported bindings
//! (including through cycles, via live-binding setters), and executes
//! modules in dependency order, with support for deferred (asynchronous)
//! execution completion.
//!
//! Where module ids come from and what they denote is delegated to two
//! hooks: a [`ModuleResolver`] (specifier → id; a default import-map-backed
//! [`MapResolver`] is built in) and a [`ModuleInstantiator`] (id →
//! [`Registration`]). The engine guarantees each hook is invoked at most
//! once per id per loader lifetime, failures are cached terminally, and
//! concurrent imports share one in-flight pipeline per id.
//!
//! ```rust,ignore
//! use modlink::{Declared, Loader, InstantiatorFn, Registration};
//! use serde_json::json;
//!
//! let loader = Loader::new(InstantiatorFn::new(|_id, _parent, _meta| {
//!     Ok(Some(Registration::new(&[], |exports, _ctx| Declared {
//!         setters: vec![],
//!         execute: Some(Box::new(move || {
//!             exports.set("answer", json!(42));
//!             Ok(None)
//!         })),
//!     })))
//! }));
//! let ns = loader.import("./answer.js", None, None).await?;
//! assert_eq!(ns.get("answer"), Some(json!(42)));
//! ```

pub mod context;
pub mod error;
pub mod hooks;
pub mod import_map;
pub mod loader;
pub mod namespace;
pub mod registration;
pub mod resolver;
pub mod urls;

mod record;

pub use context::{Exports, ModuleContext};
pub use error::{HookError, LoaderError, Result};
pub use hooks::{InstantiatorFn, ModuleInstantiator, ModuleResolver, ResolverFn, TraceHook};
pub use import_map::ImportMap;
pub use loader::{Loader, LoaderBuilder, MapAcquisition};
pub use namespace::{ExportTable, ModuleNamespace};
pub use registration::{AsyncCompletion, Declared, DeclareFn, ExecuteFn, Registration, Setter};
pub use resolver::MapResolver;
