// SPDX-License-Identifier: MIT
//! URL-ish specifier normalization.
//!
//! The loader does not depend on a full URL parser; module ids are opaque
//! strings with URL shape, and only the forms that affect resolution are
//! interpreted: relative (`./`, `../`), root-relative (`/`),
//! protocol-relative (`//`) and absolute (`scheme:`) specifiers. Everything
//! else is a plain (bare) specifier and is left to the import map.

/// Resolve `specifier` against `parent` iff it is a relative, root-relative
/// or protocol-relative form. Returns `None` for plain specifiers and
/// absolute URLs — callers distinguish those by the presence of `:`.
pub fn resolve_if_not_plain_or_url(specifier: &str, parent: &str) -> Option<String> {
    let specifier = if specifier.contains('\\') {
        specifier.replace('\\', "/")
    } else {
        specifier.to_owned()
    };

    // Protocol-relative: adopt the parent's scheme.
    if specifier.starts_with("//") {
        let scheme_end = parent.find(':').map(|i| i + 1).unwrap_or(0);
        return Some(format!("{}{}", &parent[..scheme_end], specifier));
    }

    let relative = specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../");
    if relative || specifier.starts_with('/') {
        return Some(join_relative(&specifier, parent));
    }

    None
}

/// Resolve `specifier` against `parent`, treating plain specifiers as
/// path-relative. Used when normalizing import-map targets, which may be
/// plain paths.
pub fn resolve_url(specifier: &str, parent: &str) -> String {
    if let Some(resolved) = resolve_if_not_plain_or_url(specifier, parent) {
        return resolved;
    }
    if specifier.contains(':') {
        return specifier.to_owned();
    }
    join_relative(&format!("./{specifier}"), parent)
}

/// Byte offset where the parent URL's path component begins (after scheme
/// and authority, if any).
fn path_start(parent: &str) -> usize {
    let scheme_end = parent.find(':').map(|i| i + 1).unwrap_or(0);
    if parent[scheme_end..].starts_with("//") {
        let after_authority = scheme_end + 2;
        match parent[after_authority..].find('/') {
            Some(i) => after_authority + i,
            None => parent.len(),
        }
    } else {
        scheme_end
    }
}

fn join_relative(specifier: &str, parent: &str) -> String {
    // Query and fragment never participate in directory resolution.
    let parent = match parent.find(|c| c == '?' || c == '#') {
        Some(i) => &parent[..i],
        None => parent,
    };
    let ps = path_start(parent);
    let origin = &parent[..ps];

    if specifier.starts_with('/') {
        return format!("{origin}{}", collapse_segments(specifier));
    }

    let parent_path = &parent[ps..];
    let dir = match parent_path.rfind('/') {
        Some(i) => &parent_path[..=i],
        None => "/",
    };
    format!("{origin}{}", collapse_segments(&format!("{dir}{specifier}")))
}

/// Collapse `.` and `..` segments of an absolute path. `..` at the root is
/// dropped, matching URL semantics.
fn collapse_segments(path: &str) -> String {
    let trailing = path.ends_with('/')
        || path.ends_with("/.")
        || path.ends_with("/..")
        || path == "."
        || path == "..";

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut out = String::with_capacity(path.len());
    out.push('/');
    out.push_str(&segments.join("/"));
    if trailing && !segments.is_empty() {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sibling_file() {
        assert_eq!(
            resolve_if_not_plain_or_url("./b.js", "file:///app/a.js").as_deref(),
            Some("file:///app/b.js")
        );
    }

    #[test]
    fn parent_directory() {
        assert_eq!(
            resolve_if_not_plain_or_url("../x/y.js", "https://site.dev/a/b/c.js").as_deref(),
            Some("https://site.dev/a/x/y.js")
        );
    }

    #[test]
    fn root_relative() {
        assert_eq!(
            resolve_if_not_plain_or_url("/root.js", "https://site.dev/a/b.js").as_deref(),
            Some("https://site.dev/root.js")
        );
    }

    #[test]
    fn protocol_relative() {
        assert_eq!(
            resolve_if_not_plain_or_url("//cdn.dev/x.js", "https://site.dev/a.js").as_deref(),
            Some("https://cdn.dev/x.js")
        );
    }

    #[test]
    fn dotdot_clamps_at_root() {
        assert_eq!(
            resolve_if_not_plain_or_url("../../../x.js", "file:///a/b.js").as_deref(),
            Some("file:///x.js")
        );
    }

    #[test]
    fn plain_and_absolute_pass_through() {
        assert_eq!(resolve_if_not_plain_or_url("lodash", "file:///a.js"), None);
        assert_eq!(
            resolve_if_not_plain_or_url("https://cdn.dev/x.js", "file:///a.js"),
            None
        );
    }

    #[test]
    fn trailing_slash_preserved() {
        assert_eq!(
            resolve_if_not_plain_or_url("./pkg/", "file:///app/a.js").as_deref(),
            Some("file:///app/pkg/")
        );
    }

    #[test]
    fn bare_dot_resolves_to_directory() {
        assert_eq!(
            resolve_if_not_plain_or_url(".", "file:///app/a.js").as_deref(),
            Some("file:///app/")
        );
    }

    #[test]
    fn query_and_fragment_stripped_from_parent() {
        assert_eq!(
            resolve_if_not_plain_or_url("./b.js", "file:///app/a.js?v=1#frag").as_deref(),
            Some("file:///app/b.js")
        );
    }

    #[test]
    fn resolve_url_treats_plain_as_relative() {
        assert_eq!(resolve_url("pkg/mod.js", "file:///app/"), "file:///app/pkg/mod.js");
        assert_eq!(resolve_url("https://cdn.dev/x.js", "file:///app/"), "https://cdn.dev/x.js");
    }

    proptest! {
        // Resolution output never contains dot segments and always keeps the
        // parent's origin; resolving the result again is a no-op shape-wise.
        #[test]
        fn resolved_paths_are_normalized(
            segs in proptest::collection::vec("[a-z]{1,5}", 1..5),
            ups in 0usize..4,
        ) {
            let relative = format!("./{}{}", "../".repeat(ups), segs.join("/"));
            let resolved = resolve_if_not_plain_or_url(&relative, "file:///a/b/c/d.js")
                .expect("relative form must resolve");
            prop_assert!(resolved.starts_with("file:///"));
            prop_assert!(!resolved.contains("/./"));
            prop_assert!(!resolved.contains("/../"));
            prop_assert!(resolve_if_not_plain_or_url(&resolved, "file:///other.js").is_none());
        }
    }
}
