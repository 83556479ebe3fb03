//! Target platform names and the process environment snapshot.

use std::collections::BTreeMap;
use std::fmt;

/// Platform names accepted in `platforms` and in rule conditions.
pub const KNOWN_PLATFORMS: &[&str] = &[
    "linux", "windows", "darwin", "freebsd", "openbsd", "sunos", "cygwin", "msys", "riscos",
    "atheos", "os2", "os2emx", "hp-ux", "hpux", "aix", "irix",
];

/// The platform configurations are resolved for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Platform(String);

impl Platform {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The platform of the running process, using the names of [`KNOWN_PLATFORMS`].
    pub fn current() -> Self {
        let name = match std::env::consts::OS {
            "macos" | "ios" => "darwin",
            "solaris" | "illumos" => "sunos",
            other => other,
        };
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_known(&self) -> bool {
        KNOWN_PLATFORMS.contains(&self.0.as_str())
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of environment variables.
///
/// Resolution reads variables only through this snapshot, so results are
/// reproducible for a fixed snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environ {
    vars: BTreeMap<String, String>,
}

impl Environ {
    /// Capture the environment of the running process.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// A variable that is set to a non-empty value.
    pub fn non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environ {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
