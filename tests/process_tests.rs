// tests/process_tests.rs

mod common;

use std::collections::BTreeMap;
use std::path::Path;

use nix::sys::signal::kill;
use nix::unistd::Pid;
use tickpipe::errors::TickpipeError;
use tickpipe::reactor::Reactor;
use tickpipe::sink::Sink;
use tickpipe::stage::{Capability, Process, State};
use tickpipe::stream::pipe;

use crate::common::{Collector, TestResult, drive, init_tracing};

#[test]
fn cat_round_trip_delivers_bytes_then_eof() -> TestResult {
    init_tracing();
    let process = Process::spawn("cat")?;
    let (out_r, out_w) = pipe("out")?;
    process.read(Sink::Stream(out_w))?;

    let mut reactor = Reactor::new();
    process.with(&mut reactor, None);

    assert_eq!(process.write(b"abc"), 3);
    process.close(State::WRITABLE);
    assert_eq!(process.stat(), State::READABLE);

    drive(&mut reactor)?;

    assert_eq!(out_r.read_chunk(64)?, b"abc");
    assert!(out_r.read_chunk(64)?.is_empty());
    assert!(out_r.is_eof());
    assert_eq!(process.stat(), State::CLOSED);
    assert!(process.exit_status().is_some_and(|s| s.success()));
    Ok(())
}

#[test]
fn callback_sinks_receive_stdout_and_stderr() -> TestResult {
    init_tracing();
    let process = Process::spawn("printf out; printf err >&2")?;
    let out = Collector::new();
    let err = Collector::new();
    process.read(out.sink())?;
    process.error(err.sink())?;

    let mut reactor = Reactor::new();
    process.with(&mut reactor, None);
    drive(&mut reactor)?;

    assert_eq!(out.text(), "out");
    assert!(out.saw_eof());
    assert_eq!(err.text(), "err");
    Ok(())
}

#[test]
fn sinks_may_be_set_after_registration() -> TestResult {
    init_tracing();
    let process = Process::spawn("cat")?;
    let mut reactor = Reactor::new();
    process.with(&mut reactor, None);

    let out = Collector::new();
    process.read(out.sink())?;
    process.write(b"late");
    process.close(State::WRITABLE);
    drive(&mut reactor)?;

    assert_eq!(out.text(), "late");
    Ok(())
}

#[test]
fn exit_code_is_recorded() -> TestResult {
    init_tracing();
    let process = Process::spawn("exit 7")?;
    let mut reactor = Reactor::new();
    process.with(&mut reactor, None);
    drive(&mut reactor)?;

    assert_eq!(process.exit_status().and_then(|s| s.code()), Some(7));
    Ok(())
}

#[test]
fn spawn_in_missing_directory_fails_fast() {
    init_tracing();
    let result = Process::spawn_in("true", Some(Path::new("/no/such/dir/for/tickpipe")), None);
    match result {
        Err(TickpipeError::Spawn { command, .. }) => assert_eq!(command, "true"),
        Err(e) => panic!("expected Spawn error, got {e:?}"),
        Ok(_) => panic!("expected Spawn error, got a process"),
    }
}

#[test]
fn spawn_in_uses_cwd_and_replaces_environment() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let mut env = BTreeMap::new();
    env.insert("GREETING".to_string(), "hi".to_string());

    let process = Process::spawn_in(
        "printf '%s:%s' \"$GREETING\" \"${HOME:-unset}\"; pwd -P >&2",
        Some(dir.path()),
        Some(env),
    )?;
    let out = Collector::new();
    let err = Collector::new();
    process.read(out.sink())?;
    process.error(err.sink())?;

    let mut reactor = Reactor::new();
    process.with(&mut reactor, None);
    drive(&mut reactor)?;

    assert_eq!(out.text(), "hi:unset");
    assert_eq!(
        err.text().trim_end(),
        dir.path().canonicalize()?.to_string_lossy()
    );
    Ok(())
}

#[test]
fn close_is_idempotent() -> TestResult {
    init_tracing();
    let process = Process::spawn("sleep 5")?;
    process.close(State::CLOSED);
    process.close(State::CLOSED);
    process.close(State::WRITABLE);

    assert_eq!(process.stat(), State::CLOSED);
    assert_eq!(process.write(b"ignored"), 0);
    Ok(())
}

#[test]
fn closing_output_closes_stream_sink() -> TestResult {
    init_tracing();
    let process = Process::spawn("sleep 5")?;
    let (_out_r, out_w) = pipe("out")?;
    process.read(Sink::Stream(out_w.clone()))?;

    process.close(State::READABLE);
    assert!(!out_w.is_open());
    assert_eq!(process.stat(), State::CLOSED);
    Ok(())
}

#[test]
fn drop_kills_and_reaps_running_child() -> TestResult {
    init_tracing();
    let process = Process::spawn("sleep 30")?;
    let pid = Pid::from_raw(process.pid() as i32);
    assert!(kill(pid, None).is_ok());

    drop(process);
    assert!(kill(pid, None).is_err());
    Ok(())
}

#[test]
fn child_outliving_its_output_is_left_running_by_stat() -> TestResult {
    init_tracing();
    let process = Process::spawn("exec >&- 2>&-; sleep 30")?;
    let pid = Pid::from_raw(process.pid() as i32);

    let mut reactor = Reactor::new();
    process.with(&mut reactor, None);
    drive(&mut reactor)?;

    assert_eq!(process.stat(), State::CLOSED);
    assert!(kill(pid, None).is_ok());
    assert!(process.exit_status().is_none());

    process.close(State::CLOSED);
    assert!(kill(pid, None).is_ok());

    drop(process);
    assert!(kill(pid, None).is_err());
    Ok(())
}

#[test]
fn write_never_blocks_on_a_busy_child() -> TestResult {
    init_tracing();
    let process = Process::spawn("sleep 30")?;
    let chunk = vec![b'x'; 4096];

    let mut accepted = 0;
    loop {
        let n = process.write(&chunk);
        if n == 0 {
            break;
        }
        accepted += n;
        assert!(accepted < 16 * 1024 * 1024, "stdin never filled up");
    }
    assert!(accepted >= 4096);
    assert_eq!(process.stat(), State::READABLE | State::WRITABLE);
    Ok(())
}

#[test]
fn display_is_the_command() -> TestResult {
    let process = Process::spawn("true")?;
    assert_eq!(process.to_string(), "true");
    assert_eq!(process.command(), "true");
    Ok(())
}
