#![allow(dead_code)]

use std::io::Write;

use tempfile::NamedTempFile;

pub use tickpipe_test_utils::{Collector, MockStage, drive, init_tracing};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// `len` bytes from a fixed xorshift sequence: incompressible, repeatable.
pub fn noise(len: usize) -> Vec<u8> {
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

/// Write `bytes` to a fresh temporary file.
pub fn payload_file(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

/// stdout of `sh -c command` run with `input` on stdin.
pub fn reference_output(command: &str, input: &NamedTempFile) -> Vec<u8> {
    let output = std::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(input.reopen().unwrap())
        .output()
        .unwrap();
    assert!(output.status.success(), "reference `{command}` failed");
    output.stdout
}

/// Write `contents` to a fresh temporary `.toml` file.
pub fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    write!(file, "{contents}").unwrap();
    file
}
