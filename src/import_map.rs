// SPDX-License-Identifier: MIT
//! Import-map data model: composition and lookup.
//!
//! An import map is the host-level table mapping specifiers (and scoped
//! specifier overrides) to resolved targets. Maps arrive from multiple
//! sources and are merged into one active table; keys and targets are
//! normalized against the contributing map's base URL at merge time, so
//! lookup never needs the original bases.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::urls::{resolve_if_not_plain_or_url, resolve_url};

/// The merged import-map table consulted by the default resolver.
///
/// Shape matches the wire format: `imports`, `scopes`, `depcache`,
/// `integrity`. Unknown fields are rejected by serde so malformed maps fail
/// loudly at deserialization rather than silently resolving nothing.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportMap {
    /// Top-level specifier → target table.
    pub imports: HashMap<String, String>,
    /// Scope URL → specifier → target overrides, applied by longest matching
    /// scope prefix with upward directory fallback.
    pub scopes: HashMap<String, HashMap<String, String>>,
    /// Module id → dependency list hints for external preloaders.
    pub depcache: HashMap<String, Vec<String>>,
    /// URL → integrity metadata.
    pub integrity: HashMap<String, String>,
}

impl ImportMap {
    /// Parse a map from JSON text.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Merge `new_map` into `self`, normalizing keys and targets against
    /// `base`. Later entries override earlier ones key-by-key; scope tables
    /// merge rather than replace.
    pub fn extend(&mut self, new_map: ImportMap, base: &str) {
        for (key, target) in new_map.imports {
            self.imports
                .insert(normalize_key(&key, base), resolve_url(&target, base));
        }
        for (scope, table) in new_map.scopes {
            let scope_key = resolve_url(&scope, base);
            let merged = self.scopes.entry(scope_key).or_default();
            for (key, target) in table {
                merged.insert(normalize_key(&key, base), resolve_url(&target, base));
            }
        }
        for (id, deps) in new_map.depcache {
            self.depcache.insert(resolve_url(&id, base), deps);
        }
        for (url, integrity) in new_map.integrity {
            self.integrity.insert(resolve_url(&url, base), integrity);
        }
    }

    /// Apply the map to an already-normalized (or plain) specifier.
    ///
    /// Scoped tables matching `parent` are consulted first, walking up one
    /// directory per step; then the top-level `imports`. Unmapped absolute
    /// URLs pass through; unmapped plain specifiers yield `None`.
    pub fn resolve_module(&self, resolved_or_plain: &str, parent: Option<&str>) -> Option<String> {
        let mut scope = parent.and_then(|p| self.match_scope(p));
        while let Some(scope_url) = scope {
            if let Some(table) = self.scopes.get(scope_url) {
                if let Some(target) = apply_packages(resolved_or_plain, table) {
                    return Some(target);
                }
            }
            let up = &scope_url[..scope_url.rfind('/').unwrap_or(0)];
            scope = self.match_scope(up);
        }
        if let Some(target) = apply_packages(resolved_or_plain, &self.imports) {
            return Some(target);
        }
        if resolved_or_plain.contains(':') {
            return Some(resolved_or_plain.to_owned());
        }
        None
    }

    /// Dependency hints recorded for `id`, if any.
    pub fn dep_hints(&self, id: &str) -> Option<&[String]> {
        self.depcache.get(id).map(Vec::as_slice)
    }

    /// Integrity metadata recorded for `url`, if any.
    pub fn integrity_for(&self, url: &str) -> Option<&str> {
        self.integrity.get(url).map(String::as_str)
    }

    /// Longest scope key that is an exact match or a trailing-slash prefix
    /// of `url`.
    fn match_scope(&self, url: &str) -> Option<&str> {
        if url.is_empty() {
            return None;
        }
        let mut best: Option<&str> = None;
        for key in self.scopes.keys() {
            let hit = key == url || (key.ends_with('/') && url.starts_with(key.as_str()));
            if hit && best.map_or(true, |b| key.len() > b.len()) {
                best = Some(key);
            }
        }
        best
    }
}

/// Exact-match lookup, falling back to the longest trailing-slash package
/// prefix: a key `pkg/` maps `pkg/lib/a.js` to `target + lib/a.js`.
fn apply_packages(id: &str, table: &HashMap<String, String>) -> Option<String> {
    if let Some(target) = table.get(id) {
        return Some(target.clone());
    }
    let mut best: Option<(&str, &str)> = None;
    for (key, target) in table {
        if key.ends_with('/') && id.starts_with(key.as_str()) {
            if best.map_or(true, |(bk, _)| key.len() > bk.len()) {
                best = Some((key, target));
            }
        }
    }
    best.map(|(key, target)| format!("{target}{}", &id[key.len()..]))
}

fn normalize_key(key: &str, base: &str) -> String {
    resolve_if_not_plain_or_url(key, base).unwrap_or_else(|| key.to_owned())
}
