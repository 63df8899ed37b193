#![forbid(unsafe_code)]

//! Heuristic import resolution.
//!
//! Maps an import's module path to an existing file node id. The strategies are
//! tried in order and the first hit wins:
//!
//! 1. the path joined to the importer's directory, bare and then with each
//!    candidate extension appended;
//! 2. the same path as a directory holding an index file;
//! 3. a basename match anywhere in the project, as long as the two paths
//!    overlap.
//!
//! This is not a module resolver. Package imports, path aliases and re-exports
//! are left unresolved.

use std::collections::BTreeSet;

use crate::utils::{extension, file_stem, join_id, parent_id};

const STRIPPABLE_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "mjs", "cjs", "py", "rs"];

const CANDIDATE_EXTENSIONS: &[&str] = &[
    "", ".js", ".jsx", ".ts", ".tsx", ".mjs", ".cjs", ".py", ".rs", ".go", ".java", ".h", ".hpp",
    ".c", ".cpp",
];

const INDEX_FILES: &[&str] = &[
    "index.js",
    "index.ts",
    "index.jsx",
    "index.tsx",
    "__init__.py",
    "mod.rs",
];

/// Resolves `module_path`, imported from `importer_id`, against `file_ids`.
pub fn resolve_import(
    module_path: &str,
    importer_id: &str,
    file_ids: &BTreeSet<String>,
) -> Option<String> {
    let cleaned = strip_known_extension(module_path.trim());
    if cleaned.is_empty() {
        return None;
    }

    if let Some(base) = join_id(parent_id(importer_id), cleaned) {
        for ext in CANDIDATE_EXTENSIONS {
            let candidate = format!("{base}{ext}");
            if file_ids.contains(&candidate) {
                return Some(candidate);
            }
        }

        for index in INDEX_FILES {
            let candidate = format!("{base}/{index}");
            if file_ids.contains(&candidate) {
                return Some(candidate);
            }
        }
    }

    basename_fallback(cleaned, importer_id, file_ids)
}

fn basename_fallback(cleaned: &str, importer_id: &str, file_ids: &BTreeSet<String>) -> Option<String> {
    let wanted_stem = file_stem(cleaned);
    let tail = strip_relative_prefix(cleaned);
    if wanted_stem.is_empty() || tail.is_empty() || wanted_stem == "." || wanted_stem == ".." {
        return None;
    }

    file_ids
        .iter()
        .filter(|id| id.as_str() != importer_id)
        .find(|id| {
            if file_stem(id) != wanted_stem {
                return false;
            }
            let id_no_ext = without_extension(id);
            id_no_ext.contains(tail) || tail.contains(id_no_ext)
        })
        .cloned()
}

fn strip_known_extension(path: &str) -> &str {
    let ext = extension(path);
    if STRIPPABLE_EXTENSIONS.contains(&ext) {
        &path[..path.len() - ext.len() - 1]
    } else {
        path
    }
}

fn without_extension(id: &str) -> &str {
    let ext = extension(id);
    if ext.is_empty() {
        id
    } else {
        &id[..id.len() - ext.len() - 1]
    }
}

fn strip_relative_prefix(mut path: &str) -> &str {
    loop {
        if let Some(rest) = path.strip_prefix("./") {
            path = rest;
        } else if let Some(rest) = path.strip_prefix("../") {
            path = rest;
        } else {
            return path;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exact_and_extension_candidates() {
        let files = ids(&["src/a.js", "src/b.ts", "lib/c.py"]);
        assert_eq!(resolve_import("./a.js", "src/main.js", &files).as_deref(), Some("src/a.js"));
        assert_eq!(resolve_import("./b", "src/main.js", &files).as_deref(), Some("src/b.ts"));
        assert_eq!(resolve_import("../lib/c", "src/main.py", &files).as_deref(), Some("lib/c.py"));
    }

    #[test]
    fn test_stripped_extension_is_retried() {
        // TypeScript sources importing the compiled `.js` name
        let files = ids(&["src/util.ts"]);
        assert_eq!(resolve_import("./util.js", "src/app.ts", &files).as_deref(), Some("src/util.ts"));
    }

    #[test]
    fn test_index_files() {
        let files = ids(&["src/components/index.tsx", "pkg/__init__.py", "src/net/mod.rs"]);
        assert_eq!(
            resolve_import("./components", "src/app.tsx", &files).as_deref(),
            Some("src/components/index.tsx")
        );
        assert_eq!(resolve_import("./pkg", "main.py", &files).as_deref(), Some("pkg/__init__.py"));
        assert_eq!(resolve_import("net", "src/lib.rs", &files).as_deref(), Some("src/net/mod.rs"));
    }

    #[test]
    fn test_basename_fallback_requires_overlap() {
        let files = ids(&["packages/core/src/helpers.js", "other/helpers.js"]);
        assert_eq!(
            resolve_import("core/src/helpers", "app/main.js", &files).as_deref(),
            Some("packages/core/src/helpers.js")
        );
        assert_eq!(resolve_import("unrelated/thing/helpers-x", "app/main.js", &files), None);
    }

    #[test]
    fn test_bare_basename_picks_first_in_id_order() {
        let files = ids(&["b/config.js", "a/config.js"]);
        assert_eq!(resolve_import("config", "src/main.js", &files).as_deref(), Some("a/config.js"));
    }

    #[test]
    fn test_unresolvable_and_escaping() {
        let files = ids(&["src/a.js"]);
        assert_eq!(resolve_import("react", "src/main.js", &files), None);
        assert_eq!(resolve_import("", "src/main.js", &files), None);
        assert_eq!(resolve_import("../../../x", "src/main.js", &files), None);
    }

    proptest! {
        #[test]
        fn prop_resolution_is_pure(
            names in proptest::collection::vec("[a-c]{1,2}(/[a-c]{1,2})?\\.(js|ts|py)", 1..8),
            module in "(\\./|\\.\\./)?[a-c]{1,2}(\\.js)?",
            importer in "[a-c]{1,2}/main\\.js",
        ) {
            let files: BTreeSet<String> = names.into_iter().collect();
            let first = resolve_import(&module, &importer, &files);
            let second = resolve_import(&module, &importer, &files);
            prop_assert_eq!(&first, &second);
            if let Some(target) = first {
                prop_assert!(files.contains(&target));
            }
        }
    }
}
