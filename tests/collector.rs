use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use argcov::codec::{PlainCodec, TypedCodec};
use argcov::collector::{Collector, CollectorMode, RecordOutcome};
use argcov::guard;
use argcov::instrument::{Declaration, DeclarationSink};
use argcov::store::{CoverageStore, Observation, Value};
use argcov::Error;

const OWNER: &str = "com.acme.Service";
const MEMBER: &str = "handle(ILjava/lang/String;)V";
const SIG: &str = "(ILjava/lang/String;)V";

fn args(i: i32, s: &str) -> Vec<Value> {
    vec![Value::Int(i), Value::Text(s.to_string())]
}

fn declaration(member: &str, signature: &str) -> Declaration {
    Declaration { owner: OWNER.to_string(), member: member.to_string(), signature: signature.to_string() }
}

#[test]
fn records_distinct_tuples_once() {
    let collector = Collector::default();
    assert_eq!(collector.record(OWNER, MEMBER, SIG, args(5, "x")), RecordOutcome::Recorded);
    assert_eq!(collector.record(OWNER, MEMBER, SIG, args(5, "x")), RecordOutcome::Duplicate);
    assert_eq!(collector.record(OWNER, MEMBER, SIG, args(6, "y")), RecordOutcome::Recorded);

    let store = collector.snapshot();
    let list = store.lookup(OWNER, MEMBER).unwrap();
    assert_eq!(list.len(), 2);
    assert!(list.contains(&Observation::new(args(6, "y"))));

    let mut out = Vec::new();
    collector.write_to(&mut out, &PlainCodec).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        format!("{OWNER}#{MEMBER}\n -> [5, x]\n -> [6, y]\n")
    );
}

#[test]
fn template_mode_only_declares() {
    let collector = Collector::new(CoverageStore::new(), CollectorMode::Template);
    let captured = AtomicUsize::new(0);
    let outcome = collector.record_with(OWNER, MEMBER, SIG, || {
        captured.fetch_add(1, Ordering::SeqCst);
        args(1, "a")
    });
    assert_eq!(outcome, RecordOutcome::Declared);
    assert_eq!(captured.load(Ordering::SeqCst), 0);
    assert!(collector.snapshot().lookup(OWNER, MEMBER).unwrap().is_empty());
}

#[test]
fn nested_records_on_the_same_thread_are_skipped() {
    let collector = Collector::default();
    let outcome = collector.record_with(OWNER, MEMBER, SIG, || {
        // a toString() that calls back into instrumented code
        let nested = collector.record(OWNER, "toString()Ljava/lang/String;", "()Ljava/lang/String;", vec![]);
        assert_eq!(nested, RecordOutcome::Reentrant);
        args(1, "outer")
    });
    assert_eq!(outcome, RecordOutcome::Recorded);
    assert_eq!(guard::depth(), 0);

    let store = collector.snapshot();
    assert_eq!(store.member_count(), 1);
    assert!(!store.contains(OWNER, "toString()Ljava/lang/String;"));
}

#[test]
fn thread_already_collecting_is_turned_away() {
    let collector = Collector::default();
    let held = guard::ReentrancyGuard::enter().unwrap();
    assert_eq!(collector.record(OWNER, MEMBER, SIG, args(1, "a")), RecordOutcome::Reentrant);
    drop(held);
    assert_eq!(collector.record(OWNER, MEMBER, SIG, args(1, "a")), RecordOutcome::Recorded);
}

#[test]
fn concurrent_records_are_all_kept() {
    let collector = Arc::new(Collector::default());
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let collector = Arc::clone(&collector);
            thread::spawn(move || {
                for i in 0..50 {
                    collector.record(OWNER, MEMBER, SIG, args(i, &format!("t{t}")));
                    // every thread also repeats a shared tuple
                    collector.record(OWNER, MEMBER, SIG, args(-1, "shared"));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(collector.snapshot().lookup(OWNER, MEMBER).unwrap().len(), 8 * 50 + 1);
}

#[test]
fn initializer_runs_once_before_the_first_record() {
    let collector = Collector::default();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    collector.set_initializer(move |c| {
        counter.fetch_add(1, Ordering::SeqCst);
        let mut previous = CoverageStore::new();
        previous.add(OWNER, MEMBER, Observation::new(args(0, "old")));
        c.merge(previous);
        Ok(())
    });
    assert!(!collector.is_initialized());

    collector.record(OWNER, MEMBER, SIG, args(1, "new"));
    collector.record(OWNER, MEMBER, SIG, args(2, "new"));
    assert!(collector.is_initialized());
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let store = collector.snapshot();
    let first = store.lookup(OWNER, MEMBER).unwrap().iter().next().unwrap().clone();
    assert_eq!(first, Observation::new(args(0, "old")));
}

#[test]
fn declarations_reach_the_store() {
    let collector = Collector::default();
    let sink: &dyn DeclarationSink = &collector;
    sink.declare(&declaration(MEMBER, SIG));
    sink.declare(&declaration("retries:I", "I"));
    collector.record(OWNER, MEMBER, SIG, args(1, "a"));
    sink.declare(&declaration(MEMBER, SIG));

    let store = collector.snapshot();
    assert_eq!(store.member_count(), 2);
    assert_eq!(store.lookup(OWNER, MEMBER).unwrap().len(), 1);
}

#[test]
fn save_replace_and_reset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.txt");
    let collector = Collector::default();
    collector.record(OWNER, MEMBER, SIG, args(3, "z"));
    collector.save_to(&path, &PlainCodec).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), format!("{OWNER}#{MEMBER}\n -> [3, z]\n"));

    // the serializing flag is cleared once the write is done
    assert_eq!(collector.record(OWNER, MEMBER, SIG, args(4, "z")), RecordOutcome::Recorded);

    let previous = collector.replace(CoverageStore::new());
    assert_eq!(previous.observation_count(), 2);
    assert!(collector.snapshot().is_empty());

    collector.record(OWNER, MEMBER, SIG, args(5, "z"));
    collector.reset();
    assert!(collector.with_store(CoverageStore::is_empty));
}

#[test]
fn a_failed_initializer_keeps_failing() {
    let collector = Collector::default();
    collector.set_initializer(|_| Err(Error::Format { line: 1, message: "orphan observation".into() }));

    assert!(matches!(collector.initialize(), Err(Error::Format { line: 1, .. })));
    assert!(collector.is_initialized());
    // records still land, the failure is reported again on every call
    assert_eq!(collector.record(OWNER, MEMBER, SIG, args(1, "a")), RecordOutcome::Recorded);
    match collector.initialize() {
        Err(Error::Initialization(message)) => assert!(message.contains("orphan observation")),
        other => panic!("unexpected {other:?}"),
    }

    collector.set_initializer(|_| Ok(()));
    assert!(collector.initialize().is_ok());
}

#[test]
fn capture_runs_outside_the_store_lock() {
    let collector = Arc::new(Collector::default());
    // stands in for a Java monitor that a toString() and another
    // instrumented method both take
    let monitor = Arc::new(Mutex::new(()));
    let (holds_tx, holds_rx) = mpsc::channel();
    let (capturing_tx, capturing_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();

    let other = {
        let collector = Arc::clone(&collector);
        let monitor = Arc::clone(&monitor);
        let done_tx = done_tx.clone();
        thread::spawn(move || {
            let _held = monitor.lock().unwrap();
            holds_tx.send(()).unwrap();
            capturing_rx.recv().unwrap();
            let outcome = collector.record(OWNER, MEMBER, SIG, args(2, "other"));
            done_tx.send(outcome).unwrap();
        })
    };

    let capturing = {
        let collector = Arc::clone(&collector);
        let monitor = Arc::clone(&monitor);
        thread::spawn(move || {
            holds_rx.recv().unwrap();
            let outcome = collector.record_with(OWNER, MEMBER, SIG, || {
                capturing_tx.send(()).unwrap();
                let _synchronized = monitor.lock().unwrap();
                args(1, "capturing")
            });
            done_tx.send(outcome).unwrap();
        })
    };

    for _ in 0..2 {
        let outcome = done_rx.recv_timeout(Duration::from_secs(10)).expect("recording threads deadlocked");
        assert_eq!(outcome, RecordOutcome::Recorded);
    }
    other.join().unwrap();
    capturing.join().unwrap();
    assert_eq!(collector.snapshot().lookup(OWNER, MEMBER).unwrap().len(), 2);
}

#[test]
fn a_borrowed_store_is_busy_not_serializing() {
    let collector = Collector::default();
    let outcome = collector.with_store(|_| collector.record(OWNER, MEMBER, SIG, args(1, "a")));
    assert_eq!(outcome, RecordOutcome::Busy);

    let template = Collector::new(CoverageStore::new(), CollectorMode::Template);
    let outcome = template.with_store(|_| template.record(OWNER, MEMBER, SIG, args(1, "a")));
    assert_eq!(outcome, RecordOutcome::Busy);

    assert_eq!(collector.record(OWNER, MEMBER, SIG, args(1, "a")), RecordOutcome::Recorded);
}

#[test]
fn canonical_codec_dedups_on_the_written_form() {
    let collector = Collector::default().with_canonical_codec(Arc::new(PlainCodec));
    let mut previous = CoverageStore::new();
    previous.add(OWNER, MEMBER, Observation::new(vec!["5".into(), "x".into()]));
    collector.merge(previous);
    assert_eq!(collector.record(OWNER, MEMBER, SIG, args(5, "x")), RecordOutcome::Duplicate);
    assert_eq!(collector.record(OWNER, MEMBER, SIG, args(6, "x")), RecordOutcome::Recorded);

    let typed = Collector::default().with_canonical_codec(Arc::new(TypedCodec));
    assert_eq!(typed.record(OWNER, MEMBER, SIG, args(5, "x")), RecordOutcome::Recorded);
    assert!(typed.snapshot().lookup(OWNER, MEMBER).unwrap().contains(&Observation::new(args(5, "x"))));
}
