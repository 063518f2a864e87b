mod common;

use drift_runner::protocol::{EngineCommand, RenderMode};
use drift_runner::{DriftError, EngineLink, EngineSession, SessionOptions};
use std::fs;
use std::time::{Duration, Instant};

fn quick() -> SessionOptions {
    SessionOptions {
        read_timeout: Duration::from_millis(300),
        shutdown_timeout: Duration::from_millis(500),
    }
}

#[test]
fn missing_binary_is_a_spawn_error() {
    let dir = common::temp_dir("spawn");
    let err = EngineSession::start(&dir.join("no-such-engine"), None, quick())
        .err()
        .expect("spawn must fail");
    assert!(matches!(err, DriftError::Spawn { .. }), "{}", err);
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn mode_line_is_sent_first_and_replies_are_read_in_lockstep() {
    let dir = common::temp_dir("lockstep");
    let log = dir.join("received.log");
    let engine = common::write_engine(
        &dir,
        "engine.sh",
        &format!(
            r#"while IFS= read -r line; do
  echo "$line" >> '{}'
  case "$line" in
    printbounds) printf '0.5\t0.5\t2\t2\n' ;;
    printperf) printf '7\t0.1\n' ;;
    quit) exit 0 ;;
  esac
done"#,
            log.display()
        ),
    );

    let mut session = EngineSession::start(&engine, Some(RenderMode::Gpu), quick()).expect("start");
    assert_eq!(
        session.request(&EngineCommand::PrintBounds).expect("bounds"),
        "0.5\t0.5\t2\t2"
    );
    assert_eq!(session.request(&EngineCommand::PrintPerf).expect("perf"), "7\t0.1");
    session.shutdown();

    let received = fs::read_to_string(&log).expect("log");
    let lines: Vec<&str> = received.lines().collect();
    assert_eq!(lines, vec!["gpu", "printbounds", "printperf", "quit"]);
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn silent_engine_times_out_instead_of_hanging() {
    let dir = common::temp_dir("silent");
    let engine = common::write_engine(
        &dir,
        "engine.sh",
        "while IFS= read -r line; do\n  [ \"$line\" = quit ] && exit 0\ndone",
    );
    let mut session = EngineSession::start(&engine, None, quick()).expect("start");
    let started = Instant::now();
    let err = session
        .request(&EngineCommand::PrintBounds)
        .expect_err("no reply");
    assert!(matches!(err, DriftError::EngineUnresponsive { .. }), "{}", err);
    assert!(started.elapsed() < Duration::from_secs(5));
    drop(session);
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn exited_engine_reports_process_exited() {
    let dir = common::temp_dir("exited");
    let engine = common::write_engine(&dir, "engine.sh", "exit 0");
    let mut session = EngineSession::start(&engine, None, quick()).expect("start");
    let err = session.read_line().expect_err("stream closed");
    assert!(matches!(err, DriftError::ProcessExited), "{}", err);
    session.shutdown();
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn engine_ignoring_quit_is_killed_within_the_shutdown_timeout() {
    let dir = common::temp_dir("stubborn");
    let engine = common::write_engine(
        &dir,
        "engine.sh",
        "trap '' TERM\nwhile :; do sleep 0.05; done",
    );
    let mut session = EngineSession::start(&engine, None, quick()).expect("start");
    let started = Instant::now();
    session.shutdown();
    assert!(started.elapsed() < Duration::from_secs(5));
    // A second shutdown is a no-op.
    session.shutdown();
    let _ = fs::remove_dir_all(dir);
}
