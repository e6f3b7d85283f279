// tests/endpoint_tests.rs

mod common;

use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::Write;
use std::process::{Command, Stdio};
use std::rc::Rc;

use tickpipe::endpoint::{Endpoint, Filter, ProcessEndpoint};
use tickpipe::errors::TickpipeError;
use tickpipe::reactor::Reactor;
use tickpipe::sink::Sink;
use tickpipe::stream::{Stream, pipe};
use tickpipe::types::FilterKind;

use crate::common::{
    Collector, TestResult, drive, init_tracing, noise, payload_file, reference_output,
};

fn reverse() -> tickpipe::errors::Result<Rc<Filter>> {
    Filter::new(|chunk, _| Ok(FilterKind::Reverse.apply(chunk)))
}

#[test]
fn reversing_filter_sees_whole_chunk() -> TestResult {
    init_tracing();
    let (source, feed) = pipe("source")?;
    feed.write_all(b"Hello World!\n")?;
    feed.close()?;

    let stages: Vec<Rc<dyn Endpoint>> = vec![reverse()?];
    let out = Collector::new();
    let mut reactor = Reactor::new();
    reactor.pipe_from(source, &stages, out.sink())?;
    drive(&mut reactor)?;

    assert_eq!(out.bytes(), b"\n!dlroW olleH");
    assert!(out.saw_eof());
    Ok(())
}

#[test]
fn gzip_base64_matches_shell_pipeline() -> TestResult {
    init_tracing();
    let input: Vec<u8> = (0..600)
        .flat_map(|i| format!("line {i}: the quick brown fox\n").into_bytes())
        .collect();

    let mut reference = Command::new("sh")
        .arg("-c")
        .arg("gzip -1 -n | base64")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()?;
    reference
        .stdin
        .take()
        .ok_or("reference stdin missing")?
        .write_all(&input)?;
    let expected = reference.wait_with_output()?.stdout;

    let (source, feed) = pipe("source")?;
    feed.write_all(&input)?;
    feed.close()?;

    let stages: Vec<Rc<dyn Endpoint>> = vec![
        ProcessEndpoint::spawn("gzip -1 -n")?,
        ProcessEndpoint::spawn("base64")?,
    ];
    let out = Collector::new();
    let mut reactor = Reactor::new();
    reactor.pipe_from(source, &stages, out.sink())?;
    drive(&mut reactor)?;

    assert!(!expected.is_empty());
    assert_eq!(out.bytes(), expected);
    Ok(())
}

#[test]
fn processes_and_filters_mix() -> TestResult {
    init_tracing();
    let (source, feed) = pipe("source")?;
    feed.write_all(b"abc\n")?;
    feed.close()?;

    let stages: Vec<Rc<dyn Endpoint>> = vec![ProcessEndpoint::spawn("tr a-z A-Z")?, reverse()?];
    let (out_r, out_w) = pipe("out")?;
    let mut reactor = Reactor::new();
    reactor.pipe_from(source, &stages, Sink::Stream(out_w))?;
    drive(&mut reactor)?;

    assert_eq!(out_r.read_chunk(64)?, b"\nCBA");
    assert!(out_r.read_chunk(64)?.is_empty());
    assert!(out_r.is_eof());
    Ok(())
}

#[test]
fn stderr_of_process_endpoints_is_drained() -> TestResult {
    init_tracing();
    let stages: Vec<Rc<dyn Endpoint>> =
        vec![ProcessEndpoint::spawn("echo oops >&2; echo out")?];
    stages[0].input().close()?;

    let out = Collector::new();
    let mut reactor = Reactor::new();
    reactor.pipe(&stages, out.sink())?;
    drive(&mut reactor)?;

    assert_eq!(out.text(), "out\n");
    Ok(())
}

#[test]
fn hooks_run_once_each() -> TestResult {
    init_tracing();
    let built = Rc::new(Cell::new(0));
    let destroyed = Rc::new(Cell::new(Vec::new()));

    let (b, d) = (Rc::clone(&built), Rc::clone(&destroyed));
    let filter = Filter::with_hooks(
        move || {
            b.set(b.get() + 1);
            0usize
        },
        |seen: &mut usize, chunk: &[u8], _| {
            *seen += chunk.len();
            Ok(chunk.to_vec())
        },
        move |seen| d.set(vec![seen]),
    )?;

    filter.input().write_all(b"12345")?;
    filter.input().close()?;
    filter.input().close()?;
    drop(filter);

    assert_eq!(built.get(), 1);
    assert_eq!(destroyed.take(), vec![5]);
    Ok(())
}

#[test]
fn transform_error_escapes_wait() -> TestResult {
    init_tracing();
    let (source, feed) = pipe("source")?;
    feed.write_all(b"bad")?;

    let filter = Filter::new(|_, _| Err(anyhow::anyhow!("cannot transform")))?;
    let stages: Vec<Rc<dyn Endpoint>> = vec![filter];
    let out = Collector::new();
    let mut reactor = Reactor::new();
    reactor.pipe_from(source, &stages, out.sink())?;

    match drive(&mut reactor) {
        Err(TickpipeError::Transform(e)) => assert!(e.to_string().contains("cannot transform")),
        other => panic!("expected Transform error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn pipe_rejects_empty_stage_list_and_closed_sink() -> TestResult {
    init_tracing();
    let mut reactor = Reactor::new();
    let out = Collector::new();
    assert!(matches!(
        reactor.pipe(&[], out.sink()),
        Err(TickpipeError::ConfigError(_))
    ));

    let (_r, w) = pipe("closed")?;
    w.close()?;
    let stages: Vec<Rc<dyn Endpoint>> = vec![reverse()?];
    assert!(matches!(
        reactor.pipe(&stages, Sink::Stream(w)),
        Err(TickpipeError::InvalidSink(_))
    ));
    Ok(())
}

#[test]
fn invoke_without_source_returns_output() -> TestResult {
    let filter = reverse()?;
    let output = filter.invoke(None)?;
    assert!(Rc::ptr_eq(&output, &filter.output()));
    Ok(())
}

#[test]
fn expanding_stage_fed_from_file_keeps_every_byte() -> TestResult {
    init_tracing();
    let input = payload_file(&noise(300 * 1024));
    let expected = reference_output("od -An -tx1 -v", &input);

    let source = Stream::from_fd("payload", File::open(input.path())?);
    let stages: Vec<Rc<dyn Endpoint>> = vec![ProcessEndpoint::spawn("od -An -tx1 -v")?];
    let out = Collector::new();
    let mut reactor = Reactor::new();
    reactor.pipe_from(source, &stages, out.sink())?;
    drive(&mut reactor)?;

    assert!(expected.len() > 3 * 300 * 1024);
    assert_eq!(out.bytes().len(), expected.len());
    assert!(out.bytes() == expected);
    Ok(())
}

#[test]
fn random_bytes_through_base64_and_filter_match_shell() -> TestResult {
    init_tracing();
    let input = payload_file(&noise(256 * 1024));
    let expected = reference_output("base64 | tr a-z A-Z", &input);

    let source = Stream::from_fd("payload", File::open(input.path())?);
    let stages: Vec<Rc<dyn Endpoint>> = vec![
        ProcessEndpoint::spawn("base64")?,
        Filter::new(|chunk, _| Ok(FilterKind::Uppercase.apply(chunk)))?,
    ];
    let (out_r, out_w) = pipe("out")?;
    out_r.set_nonblocking(true)?;
    out_w.set_nonblocking(true)?;

    let received = Rc::new(RefCell::new(Vec::new()));
    let collected = Rc::clone(&received);
    let mut reactor = Reactor::new();
    reactor.pipe_from(source, &stages, Sink::Stream(out_w))?;
    reactor.read(
        out_r,
        Box::new(move |ready| {
            collected.borrow_mut().extend(ready.read_chunk(4096)?);
            Ok(())
        }),
        None,
    );
    drive(&mut reactor)?;

    assert!(expected.len() > 128 * 1024);
    assert!(*received.borrow() == expected);
    Ok(())
}
