// SPDX-License-Identifier: MIT
//! Loader error taxonomy.
//!
//! Every failure the engine surfaces is a [`LoaderError`]. Errors are cached
//! on the originating load record for the registry's lifetime and replayed on
//! every later reference, so the type is cheaply cloneable — opaque payloads
//! from hooks and execute thunks are carried behind `Arc`.

use std::sync::Arc;

use thiserror::Error;

/// Shared handle to an opaque error produced by an external hook or an
/// execute thunk.
pub type HookError = Arc<anyhow::Error>;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// A terminal failure of the load / link / execute pipeline.
///
/// Once one of these is cached on a record it is never cleared; subsequent
/// imports touching that record replay the same error without re-invoking
/// external hooks.
#[derive(Debug, Clone, Error)]
pub enum LoaderError {
    /// A specifier could not be mapped to a module id.
    #[error("unable to resolve bare specifier '{specifier}'{}", fmt_parent(.parent))]
    Resolution {
        /// The specifier that failed to resolve.
        specifier: String,
        /// The importing module, when known.
        parent: Option<String>,
    },

    /// The instantiate hook rejected, or returned no registration.
    #[error("{}", fmt_instantiation(.id, .cause))]
    Instantiation {
        /// The module id that failed to instantiate.
        id: String,
        /// The hook's error, absent when the hook returned no registration.
        cause: Option<HookError>,
    },

    /// A declared dependency edge could not be resolved during linking.
    #[error("error linking '{specifier}' from {id}: {cause}")]
    Link {
        /// The importing module whose link phase failed.
        id: String,
        /// The dependency specifier that failed.
        specifier: String,
        /// The underlying resolution failure.
        #[source]
        cause: Box<LoaderError>,
    },

    /// The execute thunk threw synchronously, or its deferred completion
    /// rejected.
    #[error("module {id} failed to execute: {cause}")]
    Execution {
        /// The module whose execution failed.
        id: String,
        /// The thunk's error.
        cause: HookError,
    },
}

impl LoaderError {
    /// The module id (or specifier, for resolution failures) this error is
    /// attributed to.
    pub fn subject(&self) -> &str {
        match self {
            LoaderError::Resolution { specifier, .. } => specifier,
            LoaderError::Instantiation { id, .. } => id,
            LoaderError::Link { id, .. } => id,
            LoaderError::Execution { id, .. } => id,
        }
    }

    /// The innermost error of a `Link` chain; `self` otherwise.
    pub fn origin(&self) -> &LoaderError {
        match self {
            LoaderError::Link { cause, .. } => cause.origin(),
            other => other,
        }
    }
}

fn fmt_parent(parent: &Option<String>) -> String {
    match parent {
        Some(p) => format!(" from {p}"),
        None => String::new(),
    }
}

fn fmt_instantiation(id: &str, cause: &Option<HookError>) -> String {
    match cause {
        Some(err) => format!("error instantiating module {id}: {err}"),
        None => format!("module {id} did not instantiate"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_names_specifier_and_parent() {
        let err = LoaderError::Resolution {
            specifier: "left-pad".into(),
            parent: Some("file:///app/main.js".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("left-pad"));
        assert!(msg.contains("file:///app/main.js"));

        let bare = LoaderError::Resolution {
            specifier: "left-pad".into(),
            parent: None,
        };
        assert_eq!(
            bare.to_string(),
            "unable to resolve bare specifier 'left-pad'"
        );
    }

    #[test]
    fn null_registration_message() {
        let err = LoaderError::Instantiation {
            id: "file:///a.js".into(),
            cause: None,
        };
        assert_eq!(err.to_string(), "module file:///a.js did not instantiate");
    }

    #[test]
    fn link_origin_unwraps_to_innermost() {
        let inner = LoaderError::Resolution {
            specifier: "dep".into(),
            parent: Some("file:///a.js".into()),
        };
        let err = LoaderError::Link {
            id: "file:///a.js".into(),
            specifier: "dep".into(),
            cause: Box::new(inner),
        };
        assert!(matches!(err.origin(), LoaderError::Resolution { .. }));
        assert_eq!(err.subject(), "file:///a.js");
    }
}
