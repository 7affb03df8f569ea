mod common;

use std::fs;

use argcov::codec::CodecRegistry;
use argcov::collector::{CollectorMode, RecordOutcome};
use argcov::config::Config;
use argcov::instrument::DiscardDeclarations;
use argcov::runtime::Runtime;
use argcov::store::Value;
use argcov::Error;
use common::*;

fn start(options: &str) -> Runtime {
    Runtime::start(Config::from_options(options).unwrap(), &CodecRegistry::with_defaults()).unwrap()
}

#[test]
fn session_writes_the_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("coverage.txt");
    let runtime = start(&format!("output={}", output.display()));
    let session = runtime.session();
    runtime.collector().record("com.acme.A", "m(I)V", "(I)V", vec![Value::Int(5)]);
    runtime.collector().declare("com.acme.A", "n(J)V");

    assert_eq!(session.finish().unwrap(), Some(output.clone()));
    assert!(runtime.is_saved());
    assert_eq!(fs::read_to_string(&output).unwrap(), "com.acme.A#m(I)V\n -> [5]\ncom.acme.A#n(J)V\n");
}

#[test]
fn dropping_an_unfinished_session_saves() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("coverage.txt");
    let runtime = start(&format!("output={},serializer=typed", output.display()));
    {
        let _session = runtime.session();
        runtime.collector().record("com.acme.A", "m(Z)V", "(Z)V", vec![Value::Boolean(true)]);
    }
    assert_eq!(fs::read_to_string(&output).unwrap(), "com.acme.A#m(Z)V\n -> [Z:true]\n");
}

#[test]
fn previous_coverage_is_merged_in_first() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("coverage.txt");
    fs::write(&path, "com.acme.A#m(I)V\n -> [I:1]\ncom.acme.A#old()V\n").unwrap();

    let options = format!("input={0},output={0},serializer=typed,deserializer=typed", path.display());
    let runtime = start(&options);
    assert_eq!(runtime.collector().record("com.acme.A", "m(I)V", "(I)V", vec![Value::Int(1)]), RecordOutcome::Duplicate);
    assert_eq!(runtime.collector().record("com.acme.A", "m(I)V", "(I)V", vec![Value::Int(2)]), RecordOutcome::Recorded);
    runtime.save().unwrap();

    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "com.acme.A#m(I)V\n -> [I:1]\n -> [I:2]\ncom.acme.A#old()V\n"
    );
}

#[test]
fn unused_input_still_reaches_the_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.txt");
    let output = dir.path().join("out.txt");
    fs::write(&input, "com.acme.A#m(I)V\n -> [7]\n").unwrap();

    let runtime = start(&format!("input={},output={}", input.display(), output.display()));
    runtime.save().unwrap();
    assert_eq!(fs::read_to_string(&output).unwrap(), "com.acme.A#m(I)V\n -> [7]\n");
}

#[test]
fn missing_input_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = start(&format!("input={}", dir.path().join("absent.txt").display()));
    assert!(runtime.collector().initialize().is_ok());
    assert_eq!(runtime.collector().record("a.B", "m(I)V", "(I)V", vec![Value::Int(1)]), RecordOutcome::Recorded);
}

#[test]
fn no_output_discards() {
    let runtime = start("");
    runtime.collector().record("a.B", "m(I)V", "(I)V", vec![Value::Int(1)]);
    assert_eq!(runtime.save().unwrap(), None);
    assert!(!runtime.is_saved());
}

#[test]
fn bad_configuration_fails_to_start() {
    let registry = CodecRegistry::with_defaults();
    let unknown = Runtime::start(Config::from_options("serializer=xml").unwrap(), &registry);
    assert!(matches!(unknown, Err(Error::CodecResolution(_))));
    let rule = Runtime::start(Config::from_options("include=size=3").unwrap(), &registry);
    assert!(matches!(rule, Err(Error::Config(_))));
}

#[test]
fn configured_rules_drive_the_instrumenter() {
    let runtime = start("include=prefix=com.acme.,mode=template,fields=on");
    assert_eq!(runtime.collector().mode(), CollectorMode::Template);
    assert!(runtime.instrumenter().field_coverage());
    assert_eq!(runtime.serializer().name(), "plain");

    let mut acme = ClassBuilder::new("com/acme/Service");
    acme.empty_method(ACC_PUBLIC | ACC_STATIC, "handle", "(I)V");
    let outcome = runtime.instrumenter().instrument_class(&acme.build(), &DiscardDeclarations).unwrap();
    assert!(outcome.bytes.is_some());

    let mut other = ClassBuilder::new("org/other/Service");
    other.empty_method(ACC_PUBLIC | ACC_STATIC, "handle", "(I)V");
    let outcome = runtime.instrumenter().instrument_class(&other.build(), &DiscardDeclarations).unwrap();
    assert!(outcome.bytes.is_none());
}

#[test]
fn platform_classes_are_never_instrumented() {
    let runtime = start("");
    let mut class = ClassBuilder::new("java/util/Thing");
    class.empty_method(ACC_PUBLIC | ACC_STATIC, "put", "(I)V");
    let outcome = runtime.instrumenter().instrument_class(&class.build(), &DiscardDeclarations).unwrap();
    assert!(outcome.bytes.is_none());
}

#[test]
fn replaying_a_plain_file_adds_no_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("coverage.txt");
    let previous = "com.acme.A#m(ILjava/lang/String;)V\n -> [5, x]\n";
    fs::write(&path, previous).unwrap();

    let runtime = start(&format!("input={0},output={0}", path.display()));
    let collector = runtime.collector();
    let args = vec![Value::Int(5), Value::Text("x".into())];
    assert_eq!(collector.record("com.acme.A", "m(ILjava/lang/String;)V", "(ILjava/lang/String;)V", args), RecordOutcome::Duplicate);
    runtime.save().unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), previous);

    // a second run over the same file is stable too
    let again = start(&format!("input={0},output={0}", path.display()));
    let args = vec![Value::Int(5), Value::Text("x".into())];
    assert_eq!(again.collector().record("com.acme.A", "m(ILjava/lang/String;)V", "(ILjava/lang/String;)V", args), RecordOutcome::Duplicate);
    again.save().unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), previous);
}

#[test]
fn typed_input_is_rewritten_in_the_plain_form() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.txt");
    let output = dir.path().join("out.txt");
    fs::write(&input, "com.acme.A#m(I)V\n -> [I:5]\n").unwrap();

    let runtime = start(&format!("input={},output={},deserializer=typed", input.display(), output.display()));
    assert_eq!(runtime.collector().record("com.acme.A", "m(I)V", "(I)V", vec![Value::Int(5)]), RecordOutcome::Duplicate);
    runtime.save().unwrap();
    assert_eq!(fs::read_to_string(&output).unwrap(), "com.acme.A#m(I)V\n -> [5]\n");
}

#[test]
fn unreadable_input_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("coverage.txt");
    let previous = " -> [orphan]\ncom.acme.A#m(I)V\n -> [1]\n";
    fs::write(&path, previous).unwrap();

    let runtime = start(&format!("input={0},output={0}", path.display()));
    assert_eq!(runtime.collector().record("com.acme.B", "n(I)V", "(I)V", vec![Value::Int(2)]), RecordOutcome::Recorded);
    assert!(matches!(runtime.save(), Err(Error::Initialization(_))));
    assert!(!runtime.is_saved());
    assert_eq!(fs::read_to_string(&path).unwrap(), previous);

    // saving before any record reports the parse failure itself
    let fresh = start(&format!("input={0},output={0}", path.display()));
    assert!(matches!(fresh.save(), Err(Error::Format { line: 1, .. })));
    assert_eq!(fs::read_to_string(&path).unwrap(), previous);
}
