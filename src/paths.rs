//! Anchored path values.
//!
//! A [`PathValue`] holds one or more filesystem paths together with the
//! directory they are relative to (the anchor, or "startdir"):
//! - the relative forms are the stored representation
//! - the absolute forms are computed lazily and cached
//! - moving the anchor keeps the absolute forms and recomputes the relative ones
//! - path strings are pure string manipulation (no filesystem I/O)

use std::cell::OnceCell;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Whether a value was declared as a single path or as a list of paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Single,
    List,
}

/// Ordered list of paths anchored at a start directory.
#[derive(Debug, Clone)]
pub struct PathValue {
    kind: PathKind,
    startdir: PathBuf,
    /// Paths relative to `startdir`, with forward slashes.
    rel: Vec<String>,
    abs: OnceCell<Vec<PathBuf>>,
}

impl PathValue {
    /// Create a value from paths given relative to `startdir` (or absolute).
    ///
    /// `startdir` itself is unfolded against the current directory when it
    /// is relative.
    pub fn new<I, S>(paths: I, startdir: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let startdir = unfold_path(startdir.as_ref(), &current_dir());
        let abs: Vec<PathBuf> = paths
            .into_iter()
            .map(|p| unfold_path(Path::new(p.as_ref()), &startdir))
            .collect();
        let rel = abs.iter().map(|p| relative_to(p, &startdir)).collect();
        let kind = if abs.len() == 1 {
            PathKind::Single
        } else {
            PathKind::List
        };
        Self {
            kind,
            startdir,
            rel,
            abs: OnceCell::from(abs),
        }
    }

    /// Create a single-path value.
    pub fn single(path: &str, startdir: impl AsRef<Path>) -> Self {
        let mut value = Self::new([path], startdir);
        value.kind = PathKind::Single;
        value
    }

    /// Create a list value even if it holds a single path.
    pub fn list<I, S>(paths: I, startdir: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut value = Self::new(paths, startdir);
        value.kind = PathKind::List;
        value
    }

    pub fn kind(&self) -> PathKind {
        self.kind
    }

    pub fn startdir(&self) -> &Path {
        &self.startdir
    }

    pub fn len(&self) -> usize {
        self.rel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rel.is_empty()
    }

    /// Paths relative to the current anchor.
    pub fn relative(&self) -> &[String] {
        &self.rel
    }

    /// Absolute paths; computed from the relative forms on first use.
    pub fn absolute(&self) -> &[PathBuf] {
        self.abs.get_or_init(|| {
            self.rel
                .iter()
                .map(|p| normalize_path_components(&self.startdir.join(p)))
                .collect()
        })
    }

    /// Move the anchor. Absolute paths are unchanged, relative ones follow.
    pub fn set_anchor(&mut self, startdir: impl AsRef<Path>) {
        let startdir = unfold_path(startdir.as_ref(), &current_dir());
        if startdir == self.startdir {
            return;
        }
        // Force the absolute cache before the anchor moves.
        let abs = self.absolute().to_vec();
        self.rel = abs.iter().map(|p| relative_to(p, &startdir)).collect();
        self.startdir = startdir;
    }

    /// Append a path given relative to `startdir` (or to the current anchor).
    pub fn push(&mut self, path: &str, startdir: Option<&Path>) {
        self.insert(self.rel.len(), path, startdir);
    }

    /// Append several paths given relative to `startdir` (or to the current anchor).
    pub fn extend<I, S>(&mut self, paths: I, startdir: Option<&Path>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for path in paths {
            self.push(path.as_ref(), startdir);
        }
    }

    /// Insert a path at `index`, resolved against `startdir` (or the current anchor).
    pub fn insert(&mut self, index: usize, path: &str, startdir: Option<&Path>) {
        let base = match startdir {
            Some(dir) => unfold_path(dir, &current_dir()),
            None => self.startdir.clone(),
        };
        let abs = unfold_path(Path::new(path), &base);
        let rel = relative_to(&abs, &self.startdir);
        let index = index.min(self.rel.len());
        if let Some(cache) = self.abs.get_mut() {
            cache.insert(index, abs);
        }
        self.rel.insert(index, rel);
        self.kind = PathKind::List;
    }
}

impl PartialEq for PathValue {
    fn eq(&self, other: &Self) -> bool {
        if self.startdir == other.startdir {
            self.rel == other.rel
        } else {
            self.absolute() == other.absolute()
        }
    }
}

impl fmt::Display for PathValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rel.join(" "))
    }
}

/// Expand `~`, join relative paths onto `cwd` and normalize `.`/`..`.
pub fn unfold_path(path: &Path, cwd: &Path) -> PathBuf {
    let expanded = expand_home(path);
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    };
    normalize_path_components(&joined)
}

fn expand_home(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => match dirs::home_dir() {
            Some(home) => home.join(components.as_path()),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))
}

/// Path of `path` relative to `base`, both expected absolute and normalized.
///
/// Paths on different roots (e.g. Windows drives) are returned absolute.
pub fn relative_to(path: &Path, base: &Path) -> String {
    let path_parts: Vec<Component> = path.components().collect();
    let base_parts: Vec<Component> = base.components().collect();

    if path_parts.first() != base_parts.first() {
        return path_to_forward_slashes(path);
    }

    let common = path_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..base_parts.len() {
        rel.push("..");
    }
    for part in &path_parts[common..] {
        rel.push(part.as_os_str());
    }

    if rel.as_os_str().is_empty() {
        ".".to_string()
    } else {
        path_to_forward_slashes(&rel)
    }
}

/// Normalize path components without requiring the file to exist.
/// Handles `.` and `..` components.
pub fn normalize_path_components(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::Prefix(p) => components.push(Component::Prefix(p)),
            Component::RootDir => components.push(Component::RootDir),
            Component::CurDir => {}
            Component::ParentDir => match components.last() {
                Some(Component::Normal(_)) => {
                    components.pop();
                }
                // `..` above the root stays at the root
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => components.push(Component::ParentDir),
            },
            Component::Normal(name) => components.push(Component::Normal(name)),
        }
    }

    components.iter().collect()
}

/// Convert path to string using forward slashes.
pub fn path_to_forward_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_relative_forms_are_stored() {
        let p = PathValue::new(["src/main.c", "../lib/util.c"], "/proj/app");
        assert_eq!(p.relative(), ["src/main.c", "../lib/util.c"]);
        assert_eq!(
            p.absolute(),
            [
                PathBuf::from("/proj/app/src/main.c"),
                PathBuf::from("/proj/lib/util.c")
            ]
        );
        assert_eq!(p.kind(), PathKind::List);
    }

    #[test]
    fn test_set_anchor_keeps_absolute() {
        let mut p = PathValue::single("src/main.c", "/proj/app");
        let before = p.absolute().to_vec();
        p.set_anchor("/proj/other");
        assert_eq!(p.absolute(), before.as_slice());
        assert_eq!(p.relative(), ["../app/src/main.c"]);
        assert_eq!(p.startdir(), Path::new("/proj/other"));
    }

    #[test]
    fn test_set_anchor_without_cached_absolute() {
        let mut p = PathValue::single("a/b", "/x");
        p.abs = OnceCell::new();
        p.set_anchor("/x/a");
        assert_eq!(p.relative(), ["b"]);
        assert_eq!(p.absolute(), [PathBuf::from("/x/a/b")]);
    }

    #[test]
    fn test_insert_against_other_startdir() {
        let mut p = PathValue::single("one", "/root/a");
        p.push("two", Some(Path::new("/root/b")));
        p.insert(0, "zero", None);
        assert_eq!(p.relative(), ["zero", "one", "../b/two"]);
        assert_eq!(
            p.absolute(),
            [
                PathBuf::from("/root/a/zero"),
                PathBuf::from("/root/a/one"),
                PathBuf::from("/root/b/two")
            ]
        );
    }

    #[test]
    fn test_insert_without_cache_stays_consistent() {
        let mut p = PathValue::single("one", "/r");
        p.abs = OnceCell::new();
        p.extend(["two", "/abs/three"], None);
        assert_eq!(p.relative(), ["one", "two", "../abs/three"]);
        assert_eq!(p.absolute()[2], PathBuf::from("/abs/three"));
    }

    #[test]
    fn test_equality_by_startdir() {
        let a = PathValue::single("lib", "/p");
        let b = PathValue::single("../p/lib", "/q");
        assert_eq!(a, b);
        let c = PathValue::single("lib", "/q");
        assert_ne!(a, c);
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(relative_to(Path::new("/a/b/c"), Path::new("/a")), "b/c");
        assert_eq!(relative_to(Path::new("/a"), Path::new("/a/b/c")), "../..");
        assert_eq!(relative_to(Path::new("/a/b"), Path::new("/a/b")), ".");
    }

    #[test]
    fn test_normalize_path_components() {
        let path = Path::new("/foo/bar/../baz/./qux");
        let normalized = normalize_path_components(path);
        assert_eq!(path_to_forward_slashes(&normalized), "/foo/baz/qux");
        assert_eq!(
            normalize_path_components(Path::new("/../foo")),
            PathBuf::from("/foo")
        );
    }

    #[test]
    fn test_path_to_forward_slashes() {
        let path = Path::new("foo\\bar\\baz");
        assert_eq!(path_to_forward_slashes(path), "foo/bar/baz");
    }

    #[test]
    fn test_unfold_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                unfold_path(Path::new("~/x"), Path::new("/tmp")),
                normalize_path_components(&home.join("x"))
            );
        }
    }
}
