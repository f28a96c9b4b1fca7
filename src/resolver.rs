// SPDX-License-Identifier: MIT
//! Default import-map-backed resolver.

use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;

use crate::error::{LoaderError, Result};
use crate::hooks::ModuleResolver;
use crate::import_map::ImportMap;
use crate::urls::resolve_if_not_plain_or_url;

/// The resolver a [`Loader`](crate::Loader) uses unless one is supplied:
/// URL-ish normalization against the parent (or the loader base URL),
/// followed by import-map application. Unmapped absolute URLs pass through;
/// unmapped bare specifiers fail with [`LoaderError::Resolution`].
///
/// Shares the loader's live import-map table, so maps merged after
/// construction are visible immediately.
pub struct MapResolver {
    map: Rc<RefCell<ImportMap>>,
    base_url: String,
}

impl MapResolver {
    pub(crate) fn new(map: Rc<RefCell<ImportMap>>, base_url: String) -> Self {
        Self { map, base_url }
    }
}

#[async_trait(?Send)]
impl ModuleResolver for MapResolver {
    async fn resolve(&self, specifier: &str, parent: Option<&str>) -> Result<String> {
        let parent_url = parent.unwrap_or(&self.base_url);
        let normalized = resolve_if_not_plain_or_url(specifier, parent_url);
        let candidate = normalized.as_deref().unwrap_or(specifier);
        self.map
            .borrow()
            .resolve_module(candidate, Some(parent_url))
            .ok_or_else(|| LoaderError::Resolution {
                specifier: specifier.to_owned(),
                parent: parent.map(str::to_owned),
            })
    }
}
