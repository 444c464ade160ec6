#![forbid(unsafe_code)]

//! End-to-end replays through the harness.
//!
//! Run:
//!   cargo test -p uscore-harness --test replay_script

use std::io::Write;
use std::path::PathBuf;

use proptest::prelude::*;
use uscore_harness::{HarnessError, Replay, Step, load_script, parse_script};
use uscore_history::{Action, HistoryConfig, NodeId};

fn sample_script() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scripts/sample.jsonl")
}

// ============================================================================
// Sample script
// ============================================================================

#[test]
fn sample_script_settles_with_restored_failure() {
    let steps = load_script(sample_script()).expect("sample script");
    let mut replay = Replay::default();
    let reports = replay.run(&steps);

    assert_eq!(reports.len(), steps.len());
    assert!(reports.iter().all(|r| r.accepted), "{reports:#?}");

    let last = reports.last().expect("reports");
    assert_eq!(last.status.undo, 5);
    assert_eq!(last.status.redo, 0);
    assert_eq!(last.status.tasks, 0);
    assert!(!last.status.recovering);

    let stats = replay.stats();
    assert_eq!(stats.commits, 5);
    assert_eq!(stats.recoveries_applied, 6);
    assert_eq!(stats.recoveries_failed, 1);

    // the failed reinsertion leaves the button deleted
    assert!(replay.session().document().get(&NodeId::from("us_btn:1")).is_none());
    assert_eq!(replay.settings()["css"], ".us_btn{color:red}");
}

#[test]
fn sample_script_walk_back_restores_the_page() {
    let steps = load_script(sample_script()).expect("sample script");
    let mut replay = Replay::default();
    let reports = replay.run(&steps);

    // report 6 is the page just before MOVE, report 17 the settle after
    // the third undo
    let before_move = &reports[6];
    let after_undos = &reports[17];
    assert_eq!(before_move.op, "set_text");
    assert_eq!(after_undos.op, "settle");
    assert_eq!(after_undos.status.redo, 3);
    assert_eq!(after_undos.page_hash, before_move.page_hash);
}

#[test]
fn replay_is_deterministic() {
    let steps = load_script(sample_script()).expect("sample script");
    let first = Replay::default().run(&steps);
    let second = Replay::default().run(&steps);
    assert_eq!(first, second);
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn config_file_is_applied() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(file, "max_history = 2\nfailed_recovery = \"drop\"").expect("write");

    let steps = parse_script(
        r#"{"op":"create","kind":"us_text"}
{"op":"commit","id":"us_text:1","action":"UPDATE"}
{"op":"set_text","id":"us_text:1","text":"a"}
{"op":"commit","id":"us_text:1","action":"UPDATE"}
{"op":"set_text","id":"us_text:1","text":"b"}
{"op":"commit","id":"us_text:1","action":"UPDATE"}"#,
    )
    .expect("parse");

    let mut replay = Replay::from_config_file(file.path()).expect("config");
    let reports = replay.run(&steps);
    assert_eq!(reports.last().map(|r| r.status.undo), Some(2));
    assert_eq!(replay.session().config().max_history, 2);
}

#[test]
fn invalid_config_is_reported() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(file, "max_history = 0").expect("write");
    assert!(matches!(
        Replay::from_config_file(file.path()),
        Err(HarnessError::Config(_))
    ));
}

#[test]
fn missing_script_is_io_error() {
    let err = load_script("/nonexistent/script.jsonl").unwrap_err();
    assert!(matches!(err, HarnessError::Io(_)));
}

// ============================================================================
// Random scripts
// ============================================================================

fn node(i: u8) -> NodeId {
    NodeId::from(format!("us_text:{}", i % 3 + 1).as_str())
}

fn step_strategy() -> impl Strategy<Value = Step> {
    let action = prop_oneof![
        Just(Action::Create),
        Just(Action::Move),
        Just(Action::Update),
        Just(Action::Remove),
    ];
    prop_oneof![
        3 => (any::<u8>(), action, any::<bool>()).prop_map(|(i, action, throttle)| Step::Commit {
            id: node(i),
            action,
            throttle,
            ext_data: None,
        }),
        2 => (any::<u8>(), "[a-z]{1,4}").prop_map(|(i, text)| Step::SetText { id: node(i), text }),
        1 => (any::<u8>(), 0usize..3).prop_map(|(i, index)| Step::Move {
            id: node(i),
            parent: NodeId::from("container"),
            index,
        }),
        2 => Just(Step::Undo),
        2 => Just(Step::Redo),
        1 => (0u64..2500).prop_map(|ms| Step::Advance { ms }),
        1 => Just(Step::Settle),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn random_scripts_are_deterministic_and_settle(
        body in prop::collection::vec(step_strategy(), 1..40),
    ) {
        let mut steps: Vec<Step> = (0..3)
            .map(|_| Step::Create { kind: "us_text".into(), parent: None, index: 0 })
            .collect();
        steps.extend(body);
        steps.push(Step::Settle);

        let config = HistoryConfig { max_history: 8, ..HistoryConfig::default() };
        let mut a = Replay::new(config.clone());
        let mut b = Replay::new(config);
        let first = a.run(&steps);
        let second = b.run(&steps);
        prop_assert_eq!(&first, &second);

        for report in &first {
            prop_assert!(report.status.undo <= 8);
            prop_assert!(report.status.redo <= 8);
        }
        let last = first.last().expect("reports");
        prop_assert_eq!(last.status.tasks, 0);
        prop_assert!(!last.status.recovering);
    }
}
