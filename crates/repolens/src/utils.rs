#![forbid(unsafe_code)]

use std::path::{Component, Path, PathBuf};

pub fn hash_sha256(input: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(result)
}

/// Root-relative, forward-slash id for `path`. `None` when `path` is outside `root`.
pub fn relative_id(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Lexically resolves `.` and `..` segments without touching the file system.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Joins a slash-separated relative path onto a slash-separated directory id and
/// normalizes it. Returns `None` if the result escapes the project root.
pub fn join_id(dir: &str, relative: &str) -> Option<String> {
    let mut parts: Vec<&str> = dir.split('/').filter(|p| !p.is_empty()).collect();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Directory part of an id (`""` for files at the root).
pub fn parent_id(id: &str) -> &str {
    id.rsplit_once('/').map_or("", |(dir, _)| dir)
}

pub fn file_name(id: &str) -> &str {
    id.rsplit_once('/').map_or(id, |(_, name)| name)
}

pub fn extension(id: &str) -> &str {
    let name = file_name(id);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext,
        _ => "",
    }
}

pub fn file_stem(id: &str) -> &str {
    let name = file_name(id);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_id_is_posix() {
        let root = Path::new("/repo");
        assert_eq!(
            relative_id(root, Path::new("/repo/src/lib/a.js")).as_deref(),
            Some("src/lib/a.js")
        );
        assert_eq!(relative_id(root, Path::new("/other/a.js")), None);
        assert_eq!(relative_id(root, root), None);
    }

    #[test]
    fn test_join_id() {
        assert_eq!(join_id("src", "./a").as_deref(), Some("src/a"));
        assert_eq!(join_id("src/lib", "../a").as_deref(), Some("src/a"));
        assert_eq!(join_id("", "a/b").as_deref(), Some("a/b"));
        assert_eq!(join_id("", "../a"), None);
    }

    #[test]
    fn test_name_helpers() {
        assert_eq!(parent_id("src/a.js"), "src");
        assert_eq!(parent_id("a.js"), "");
        assert_eq!(file_name("src/a.js"), "a.js");
        assert_eq!(extension("src/a.test.js"), "js");
        assert_eq!(extension("Makefile"), "");
        assert_eq!(extension(".gitignore"), "");
        assert_eq!(file_stem("src/a.test.js"), "a.test");
        assert_eq!(file_stem(".gitignore"), ".gitignore");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/repo/src/../lib/./a.js")),
            PathBuf::from("/repo/lib/a.js")
        );
    }
}
