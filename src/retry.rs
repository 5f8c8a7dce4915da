//! Bounded retry with linear or exponential backoff.
//!
//! Every waiting loop in the installer goes through this primitive:
//! preflight polls, SSH connectivity waits, and post-install verification.

use anyhow::Result;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    /// Sleep 1 second between attempts
    Linear,
    /// Sleep 2^k seconds before attempt k+1
    Backoff,
}

/// Retry `op` up to `retries` additional times with exponential backoff.
pub fn with_backoff<F>(op: F, retries: u32) -> Result<()>
where
    F: FnMut() -> Result<()>,
{
    retry(op, retries, Strategy::Backoff, std::thread::sleep)
}

/// Retry `op` up to `retries` additional times, sleeping 1 second in between.
pub fn linear<F>(op: F, retries: u32) -> Result<()>
where
    F: FnMut() -> Result<()>,
{
    retry(op, retries, Strategy::Linear, std::thread::sleep)
}

// The sleeper is injected so tests can observe the backoff schedule.
fn retry<F, S>(mut op: F, retries: u32, strategy: Strategy, mut sleep: S) -> Result<()>
where
    F: FnMut() -> Result<()>,
    S: FnMut(Duration),
{
    let mut attempt: u32 = 0;
    loop {
        let err = match op() {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        if attempt == retries {
            return Err(err);
        }
        let pause = match strategy {
            Strategy::Linear => Duration::from_secs(1),
            Strategy::Backoff => Duration::from_secs(1 << attempt),
        };
        sleep(pause);
        attempt += 1;
    }
}
