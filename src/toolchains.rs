//! Language and toolchain tables.
//!
//! Each language names the environment variable that selects its compiler,
//! the flag variables it honours from the environment, and the toolchain
//! kinds that can build it.

/// Static description of a supported language.
#[derive(Debug)]
pub struct Language {
    /// Task feature naming the language (`c`, `cxx`, ...).
    pub feature: &'static str,
    /// Environment variable that selects the compiler.
    pub toolchain_var: &'static str,
    /// Flag variables read from the environment.
    pub flag_vars: &'static [&'static str],
    /// Toolchain kinds that build this language, without the `auto-*` one.
    pub toolchains: &'static [&'static str],
}

pub const LANGUAGES: &[Language] = &[
    Language {
        feature: "c",
        toolchain_var: "CC",
        flag_vars: &["CFLAGS", "CPPFLAGS", "LDFLAGS", "LINKFLAGS"],
        toolchains: &["gcc", "clang", "msvc", "icc", "suncc", "xlc"],
    },
    Language {
        feature: "cxx",
        toolchain_var: "CXX",
        flag_vars: &["CXXFLAGS", "CPPFLAGS", "LDFLAGS", "LINKFLAGS"],
        toolchains: &["g++", "clang++", "msvc", "icpc", "sunc++", "xlc++"],
    },
    Language {
        feature: "asm",
        toolchain_var: "AS",
        flag_vars: &["ASFLAGS", "ASLINKFLAGS", "LDFLAGS"],
        toolchains: &["gas", "nasm"],
    },
    Language {
        feature: "d",
        toolchain_var: "DC",
        flag_vars: &["DFLAGS", "LINKFLAGS", "LDFLAGS"],
        toolchains: &["ldc2", "gdc", "dmd"],
    },
    Language {
        feature: "fc",
        toolchain_var: "FC",
        flag_vars: &["FCFLAGS", "LINKFLAGS", "LDFLAGS"],
        toolchains: &["gfortran", "ifort"],
    },
];

/// Target kinds a language feature can be suffixed with (`cxxprogram`, `cshlib`).
pub const TARGET_KINDS: &[&str] = &["program", "shlib", "stlib", "objects"];

/// Features that are not languages.
pub const EXTRA_FEATURES: &[&str] = &["runcmd", "test", "qt5"];

pub fn language(feature: &str) -> Option<&'static Language> {
    LANGUAGES.iter().find(|l| l.feature == feature)
}

/// The `auto-*` toolchain name of a language (`auto-c++` for `cxx`).
pub fn auto_toolchain(lang: &Language) -> String {
    format!("auto-{}", lang.feature.replace("xx", "++"))
}

/// All toolchain kinds known for any language, `auto-*` names included.
pub fn known_toolchains() -> Vec<String> {
    let mut names: Vec<String> = LANGUAGES
        .iter()
        .flat_map(|l| l.toolchains.iter().map(|t| t.to_string()))
        .chain(LANGUAGES.iter().map(auto_toolchain))
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Language names referenced by task features.
///
/// `cxxprogram` and `cxx` both yield `cxx`; unknown features are ignored.
pub fn languages_of<'a>(features: impl IntoIterator<Item = &'a str>) -> Vec<&'static Language> {
    let mut langs: Vec<&'static Language> = Vec::new();
    for feature in features {
        let base = TARGET_KINDS
            .iter()
            .find_map(|kind| feature.strip_suffix(kind).filter(|b| !b.is_empty()))
            .unwrap_or(feature);
        if let Some(lang) = language(base) {
            if !langs.iter().any(|l| l.feature == lang.feature) {
                langs.push(lang);
            }
        }
    }
    langs
}

/// Whether a feature word is a known task feature.
pub fn is_known_feature(feature: &str) -> bool {
    TARGET_KINDS.contains(&feature)
        || EXTRA_FEATURES.contains(&feature)
        || !languages_of([feature]).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_languages_of_strips_target_kind() {
        let langs = languages_of(["cxxprogram", "c", "cxx", "runcmd"]);
        let names: Vec<_> = langs.iter().map(|l| l.feature).collect();
        assert_eq!(names, ["cxx", "c"]);
    }

    #[test]
    fn test_auto_toolchain_names() {
        let names = known_toolchains();
        assert!(names.contains(&"auto-c++".to_string()));
        assert!(names.contains(&"auto-fc".to_string()));
        assert!(names.contains(&"gcc".to_string()));
    }

    #[test]
    fn test_known_features() {
        assert!(is_known_feature("cshlib"));
        assert!(is_known_feature("program"));
        assert!(is_known_feature("test"));
        assert!(!is_known_feature("cobolprogram"));
    }
}
