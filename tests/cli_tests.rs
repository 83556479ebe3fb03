//! Integration tests for the command-line handlers.
//!
//! Arguments are parsed with clap exactly as the binary does, and the
//! handlers write into a buffer instead of stdout.

use buildconf::cli::tasks::{OutputFormat, run_tasks};
use buildconf::cli::{Cli, Command, run_buildtypes, run_check, run_toolchains};
use buildconf::platform::Environ;
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const BUILDCONF: &str = r#"
OPT: -O2
---
project: { name: demo, version: "1.0.2" }
buildtypes:
  debug: { cxxflags: -O0 }
  release: { cxxflags: $OPT }
  default: debug
toolchains:
  my-gcc: { kind: g++, CXX: bin/g++ }
tasks:
  app: { features: cxxprogram, toolchain: my-gcc }
  lib: { features: cstlib }
matrix:
  - for: { task: lib }
    set: { toolchain: clang }
"#;

fn setup_project() -> (TempDir, PathBuf) {
    let temp = TempDir::new().expect("Failed to create temp directory");
    let path = temp.path().join("buildconf.yaml");
    fs::write(&path, BUILDCONF).expect("Failed to write buildconf");
    (temp, path)
}

fn run(args: &[&str]) -> anyhow::Result<String> {
    let cli = Cli::try_parse_from(args)?;
    let conf = cli.load(Environ::empty())?;
    let mut out = Vec::new();
    match &cli.command {
        None | Some(Command::Check) => run_check(&conf, &mut out)?,
        Some(Command::Buildtypes) => run_buildtypes(&conf, &mut out)?,
        Some(Command::Tasks(args)) => run_tasks(&conf, args, &mut out)?,
        Some(Command::Toolchains) => run_toolchains(&conf, &mut out)?,
    }
    Ok(String::from_utf8(out)?)
}

#[test]
fn check_is_the_default_command() {
    let (temp, _) = setup_project();
    let dir = temp.path().to_string_lossy().into_owned();
    let output = run(&["buildconf", "--dir", &dir]).unwrap();
    assert!(output.ends_with(": ok (2 tasks, buildtype 'debug')\n"));
    assert!(output.contains("buildconf.yaml"));
}

#[test]
fn buildtypes_marks_the_default() {
    let (_temp, path) = setup_project();
    let file = path.to_string_lossy().into_owned();
    let output = run(&["buildconf", "buildtypes", "--file", &file]).unwrap();
    assert_eq!(output, "debug (default)\nrelease\n");
}

#[test]
fn tasks_are_printed_for_the_chosen_buildtype() {
    let (_temp, path) = setup_project();
    let file = path.to_string_lossy().into_owned();

    let output = run(&["buildconf", "-f", &file, "-b", "release", "tasks", "app", "--format", "json"])
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(parsed["app"]["cxxflags"], "-O2");
    assert!(parsed.get("lib").is_none());

    let output = run(&["buildconf", "-f", &file, "tasks"]).unwrap();
    let parsed: serde_yaml::Value = serde_yaml::from_str(&output).unwrap();
    assert_eq!(parsed["lib"]["toolchain"].as_str(), Some("clang"));
    assert_eq!(parsed["app"]["cxxflags"].as_str(), Some("-O0"));

    let err = run(&["buildconf", "-f", &file, "tasks", "nope"]).unwrap_err();
    assert!(err.to_string().contains("known tasks: app, lib"));
}

#[test]
fn toolchains_lists_used_and_custom_ones() {
    let (temp, path) = setup_project();
    let file = path.to_string_lossy().into_owned();
    let output = run(&["buildconf", "toolchains", "-f", &file]).unwrap();

    let mut lines = output.lines();
    assert_eq!(lines.next(), Some("clang"));
    assert_eq!(lines.next(), Some("my-gcc"));
    assert_eq!(lines.next(), Some("my-gcc: custom, kind g++"));
    let cxx = temp.path().join("bin").join("g++");
    assert_eq!(lines.next(), Some(format!("  CXX = {}", cxx.display()).as_str()));
}

#[test]
fn unsupported_buildtype_is_rejected() {
    let (_temp, path) = setup_project();
    let file = path.to_string_lossy().into_owned();
    let err = run(&["buildconf", "-f", &file, "-b", "profile"]).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("cannot select buildtype 'profile'"));
    assert!(message.contains("Choose from: ['debug', 'release']"));
}

#[test]
fn invalid_document_reports_the_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("buildconf.yaml");
    fs::write(&path, "tasks: { app: { features: cobol } }\n").unwrap();
    let file = path.to_string_lossy().into_owned();

    let err = run(&["buildconf", "check", "-f", &file]).unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("Error in the file"));
    assert!(message.contains("tasks.app.features"));
}

#[test]
fn format_flag_is_validated_by_clap() {
    assert!(Cli::try_parse_from(["buildconf", "tasks", "--format", "toml"]).is_err());
    let cli = Cli::try_parse_from(["buildconf", "tasks", "--format", "JSON"]).unwrap();
    match cli.command {
        Some(Command::Tasks(args)) => assert_eq!(args.format, OutputFormat::Json),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn check_covers_sub_configs() {
    let (temp, _) = setup_project();
    let sub = temp.path().join("tools");
    fs::create_dir_all(&sub).unwrap();
    fs::write(
        sub.join("buildconf.yaml"),
        "tasks: { gen: { features: cprogram, cflags.select: { linux: -DLINUX, default: -DOTHER } } }\n",
    )
    .unwrap();
    let root = fs::read_to_string(temp.path().join("buildconf.yaml")).unwrap();
    fs::write(temp.path().join("buildconf.yaml"), format!("{root}subdirs: [tools]\n")).unwrap();

    let dir = temp.path().to_string_lossy().into_owned();
    let cli = Cli::try_parse_from(["buildconf", "--dir", &dir, "-b", "release", "--platform", "linux"]).unwrap();
    let confs = cli.load_all(Environ::empty()).unwrap();
    assert_eq!(confs.len(), 2);

    let mut out = Vec::new();
    for conf in &confs {
        run_check(conf, &mut out).unwrap();
    }
    let output = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = output.lines().collect();
    assert!(lines[0].ends_with(": ok (2 tasks, buildtype 'release')"));
    assert!(lines[1].contains("tools"));
    assert!(lines[1].ends_with(": ok (1 tasks, buildtype 'release')"));

    let tasks = confs[1].tasks().unwrap();
    assert_eq!(tasks["gen"]["cflags"].as_str(), Some("-DLINUX"));
    assert_eq!(tasks["gen"]["cxxflags"].as_str(), Some("-O2"));
}
