//! Slash-separated module paths.
//!
//! Bundle paths are virtual: they always use `/`, never start with `/` and
//! never climb above the bundle root. Only [`confine`] turns one into a real
//! filesystem path.

use decloak_utils::errors::UnpackError;
use std::path::{Path, PathBuf};

/// Resolves `.` and `..` segments. Returns `None` if the path climbs above
/// its root.
pub fn normalize(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

/// Directory part of a module path, without a trailing slash.
pub fn dirname(path: &str) -> &str {
    path.rfind('/').map_or("", |i| &path[..i])
}

/// Joins a request such as `./lib/a` onto the directory of `from`.
pub fn join(from: &str, request: &str) -> Option<String> {
    let dir = dirname(from);
    if dir.is_empty() {
        normalize(request)
    } else {
        normalize(&format!("{dir}/{request}"))
    }
}

/// Adds `.js` unless the path already names a script file.
pub fn with_js_extension(path: &str) -> String {
    let file = path.rsplit('/').next().unwrap_or(path);
    if [".js", ".mjs", ".cjs", ".jsx", ".json"]
        .iter()
        .any(|ext| file.ends_with(ext))
    {
        path.to_string()
    } else {
        format!("{path}.js")
    }
}

/// Inserts `-{suffix}` before the extension: `utils.js` → `utils-3.js`.
pub fn with_suffix(path: &str, suffix: &str) -> String {
    let file_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[file_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let dot = file_start + dot;
            format!("{}-{suffix}{}", &path[..dot], &path[dot..])
        }
        _ => format!("{path}-{suffix}"),
    }
}

/// Request string that leads from the file `from` to the file `to`.
///
/// ```rust,ignore
/// assert_eq!(relative("src/a.js", "lib/b.js"), "../lib/b.js");
/// ```
pub fn relative(from: &str, to: &str) -> String {
    let from_dir: Vec<&str> = dirname(from).split('/').filter(|s| !s.is_empty()).collect();
    let to_parts: Vec<&str> = to.split('/').filter(|s| !s.is_empty()).collect();
    let (to_file, to_dir) = to_parts.split_last().map_or(("", &[][..]), |(f, d)| (*f, d));

    let common = from_dir
        .iter()
        .zip(to_dir)
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<&str> = vec![".."; from_dir.len() - common];
    parts.extend(&to_dir[common..]);
    parts.push(to_file);

    let joined = parts.join("/");
    if joined.starts_with("..") {
        joined
    } else {
        format!("./{joined}")
    }
}

/// Places a bundle path under `root`, rejecting anything that would land
/// outside of it.
pub fn confine(root: &Path, path: &str) -> Result<PathBuf, UnpackError> {
    if path.starts_with('/') || path.contains('\\') || path.contains(':') {
        return Err(UnpackError::PathEscapes(path.to_string()));
    }
    let normalized = normalize(path)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| UnpackError::PathEscapes(path.to_string()))?;
    Ok(normalized.split('/').fold(root.to_path_buf(), |acc, part| acc.join(part)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("./a/./b/../c.js").as_deref(), Some("a/c.js"));
        assert_eq!(normalize("a/../../b"), None);
    }

    #[test]
    fn test_relative_paths() {
        assert_eq!(relative("index.js", "1.js"), "./1.js");
        assert_eq!(relative("src/a.js", "src/b.js"), "./b.js");
        assert_eq!(relative("src/a.js", "lib/b.js"), "../lib/b.js");
        assert_eq!(relative("a/b/c.js", "x.js"), "../../x.js");
        assert_eq!(relative("index.js", "node_modules/react/index.js"), "./node_modules/react/index.js");
    }

    #[test]
    fn test_relative_roundtrip() {
        for (from, to) in [("a/b.js", "c/d/e.js"), ("x.js", "y/z.js"), ("p/q/r.js", "p/s.js")] {
            assert_eq!(join(from, &relative(from, to)).as_deref(), Some(to));
        }
    }

    #[test]
    fn test_suffix_and_extension() {
        assert_eq!(with_suffix("lib/utils.js", "3"), "lib/utils-3.js");
        assert_eq!(with_suffix("README", "3"), "README-3");
        assert_eq!(with_js_extension("./foo"), "./foo.js");
        assert_eq!(with_js_extension("data.json"), "data.json");
    }

    #[test]
    fn test_confine_rejects_escapes() {
        let root = Path::new("/tmp/out");
        assert_eq!(confine(root, "a/b.js").unwrap(), Path::new("/tmp/out/a/b.js"));
        assert!(confine(root, "../etc/passwd").is_err());
        assert!(confine(root, "/etc/passwd").is_err());
        assert!(confine(root, "a/../../x").is_err());
    }
}
