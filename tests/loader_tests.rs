//! Integration tests for loading buildconf files from disk.
//!
//! Covers discovery order, JSON and YAML documents, YAML variable
//! substitution in both modes, and how document errors are reported.

use buildconf::config::loader::{BUILDCONF_FILENAMES, SEARCH_PATH_VAR};
use buildconf::config::{ConfigLoader, load_config};
use buildconf::error::ErrorKind;
use buildconf::platform::Environ;
use serde_yaml::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn setup_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).expect("Failed to write buildconf");
}

fn str_at<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .try_fold(value, |v, k| v.get(*k))
        .and_then(Value::as_str)
}

#[test]
fn discovery_prefers_json_then_yaml_then_yml() {
    assert_eq!(
        BUILDCONF_FILENAMES,
        ["buildconf.json", "buildconf.yaml", "buildconf.yml"]
    );

    let temp = setup_dir();
    write(temp.path(), "buildconf.yml", "project: { name: from-yml }\n");
    write(temp.path(), "buildconf.yaml", "project: { name: from-yaml }\n");

    let loader = ConfigLoader::new(Environ::empty());
    let doc = loader.load(Some(temp.path()), None).unwrap();
    assert!(doc.path.ends_with("buildconf.yaml"));

    write(temp.path(), "buildconf.json", r#"{"project": {"name": "from-json"}}"#);
    let doc = loader.load(Some(temp.path()), None).unwrap();
    assert!(doc.path.ends_with("buildconf.json"));
    let conf = load_config(&doc).unwrap();
    assert_eq!(conf.project.name, "from-json");
}

#[test]
fn search_path_is_used_without_dir() {
    let first = setup_dir();
    let second = setup_dir();
    write(second.path(), "buildconf.yaml", "tasks: { app: { features: cprogram } }\n");

    let loader = ConfigLoader::new(Environ::empty())
        .with_search_path([first.path().to_path_buf(), second.path().to_path_buf()]);
    let doc = loader.load(None, None).unwrap();
    assert_eq!(doc.dir(), second.path());

    let joined = std::env::join_paths([first.path(), second.path()]).unwrap();
    let env: Environ = [(SEARCH_PATH_VAR, joined.to_string_lossy().into_owned())]
        .into_iter()
        .collect();
    assert_eq!(ConfigLoader::new(env).search_path().len(), 2);
}

#[test]
fn directory_without_buildconf_yields_defaults() {
    let temp = setup_dir();
    let project = temp.path().join("hello");
    fs::create_dir_all(&project).unwrap();

    let doc = ConfigLoader::new(Environ::empty())
        .load(Some(&project), None)
        .unwrap();
    let conf = load_config(&doc).unwrap();
    assert_eq!(conf.project.name, "hello");
    assert!(conf.tasks.is_empty());
    assert!(conf.features.autoconfig);
}

#[test]
fn yaml_substitution_from_header() {
    let temp = setup_dir();
    write(
        temp.path(),
        "buildconf.yaml",
        r#"
PATH_PART: /ddd
PATH_PART2: GBV
---
tasks:
  app:
    features: cprogram
    includes: /one${{PATH_PART}}/sss/${{ PATH_PART2 }}/two$PATH_PART/three
    defines: $UNKNOWN_VAR
"#,
    );
    let doc = ConfigLoader::new(Environ::empty())
        .load_file(&temp.path().join("buildconf.yaml"))
        .unwrap();
    let attrs = Value::Mapping(doc.attrs);
    assert_eq!(
        str_at(&attrs, &["tasks", "app", "includes"]),
        Some("/one/ddd/sss/GBV/two/ddd/three")
    );
    assert_eq!(str_at(&attrs, &["tasks", "app", "defines"]), Some("$UNKNOWN_VAR"));
}

#[test]
fn yaml_environment_wins_unless_noenv() {
    let temp = setup_dir();
    let env: Environ = [("OPT", "-O1")].into_iter().collect();
    let loader = ConfigLoader::new(env);

    write(temp.path(), "a.yaml", "OPT: -O2\n---\nbuildtypes: { debug: { cflags: $OPT } }\n");
    let doc = loader.load_file(&temp.path().join("a.yaml")).unwrap();
    let attrs = Value::Mapping(doc.attrs);
    assert_eq!(str_at(&attrs, &["buildtypes", "debug", "cflags"]), Some("-O1"));

    write(
        temp.path(),
        "b.yaml",
        "substmode: yaml-tag-noenv\nOPT: -O2\n---\nbuildtypes: { debug: { cflags: !subst $OPT } }\n",
    );
    let doc = loader.load_file(&temp.path().join("b.yaml")).unwrap();
    let attrs = Value::Mapping(doc.attrs);
    assert_eq!(str_at(&attrs, &["buildtypes", "debug", "cflags"]), Some("-O2"));
}

#[test]
fn yaml_preparse_inserts_multiline_fragment() {
    let temp = setup_dir();
    write(
        temp.path(),
        "buildconf.yaml",
        r#"substmode: preparse
fragment: |
  program
  end program
---
tasks:
  app:
    features: fcprogram
    configure:
      - do: check-code
        text: $fragment
"#,
    );
    let doc = ConfigLoader::new(Environ::empty())
        .load(Some(temp.path()), None)
        .unwrap();
    let conf = load_config(&doc).unwrap();
    let text = conf.tasks["app"].params["configure"][0]["text"].as_str();
    assert_eq!(text, Some("program\nend program\n"));
}

#[test]
fn empty_and_malformed_documents_are_config_errors() {
    let temp = setup_dir();
    let loader = ConfigLoader::new(Environ::empty());

    for (name, content) in [
        ("empty.yaml", ""),
        ("marker.yaml", "---\n"),
        ("list.yaml", "- a\n- b\n"),
        ("syntax.yaml", "tasks: [1, 2\n"),
        ("keys.yaml", "5: five\n"),
        ("three.yaml", "a: 1\n---\nb: 2\n---\nc: 3\n"),
        ("list.json", "[]"),
    ] {
        write(temp.path(), name, content);
        let err = loader.load_file(&temp.path().join(name)).unwrap_err();
        assert_eq!(err.root().kind(), ErrorKind::Config, "{name}");
        assert!(err.to_string().starts_with("Error in the file"), "{name}");
    }
}

#[test]
fn validation_errors_name_the_file_and_param() {
    let temp = setup_dir();
    write(
        temp.path(),
        "buildconf.yaml",
        "tasks:\n  app:\n    features: cprogram\n    toolchain: no-such-cc\n",
    );
    let doc = ConfigLoader::new(Environ::empty())
        .load(Some(temp.path()), None)
        .unwrap();
    let err = load_config(&doc).unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("Error in the file"));
    assert!(message.contains("buildconf.yaml"));
    assert!(message.contains("tasks.app.toolchain"));
    assert_eq!(err.root().kind(), ErrorKind::Value);
}
