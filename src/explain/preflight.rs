//! Preflight-specific rendering: failed runner events carry the JSON
//! check results in stdout, so failures are shown per check instead of
//! as raw task output.

use colored::Colorize;
use std::io::Write;

use super::{EventExplainer, UpdatingExplainer, VerboseExplainer};
use crate::playbook::event::RunnerPayload;
use crate::playbook::Event;
use crate::preflight::CheckResult;

fn parse_check_results(payload: &RunnerPayload) -> Option<Vec<CheckResult>> {
    serde_json::from_str(&payload.result.stdout).ok()
}

fn failed_checks_block(host: &str, results: &[CheckResult]) -> String {
    let mut block = format!("=> The following checks failed on {host:?}:\n")
        .red()
        .to_string();
    for result in results.iter().filter(|r| !r.success) {
        let line = if result.error.is_empty() {
            format!("   - {}\n", result.name)
        } else {
            format!("   - {}: {}\n", result.name, result.error)
        };
        block.push_str(&line.red().to_string());
    }
    block
}

pub struct PreflightVerboseExplainer<W: Write + Send> {
    inner: VerboseExplainer<W>,
}

impl<W: Write + Send> PreflightVerboseExplainer<W> {
    pub fn new(out: W) -> Self {
        Self {
            inner: VerboseExplainer::new(out),
        }
    }
}

impl<W: Write + Send> EventExplainer for PreflightVerboseExplainer<W> {
    fn explain(&mut self, event: &Event) {
        match event {
            Event::RunnerFailed(payload) => match parse_check_results(payload) {
                Some(results) => {
                    let out = self.inner.writer();
                    let _ = write!(out, "{}", failed_checks_block(&payload.host, &results));
                    let _ = write!(out, "{}", "=> Successful pre-flight checks:\n".green());
                    for result in results.iter().filter(|r| r.success) {
                        let line = format!("   - {}\n", result.name).green();
                        let _ = write!(out, "{line}");
                    }
                }
                None => self.inner.explain(event),
            },
            other => self.inner.explain(other),
        }
    }
}

pub struct PreflightUpdatingExplainer {
    inner: UpdatingExplainer,
}

impl PreflightUpdatingExplainer {
    pub fn new() -> Self {
        Self {
            inner: UpdatingExplainer::new(),
        }
    }
}

impl Default for PreflightUpdatingExplainer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventExplainer for PreflightUpdatingExplainer {
    fn explain(&mut self, event: &Event) {
        match event {
            Event::RunnerFailed(payload) => match parse_check_results(payload) {
                Some(results) => {
                    let mut block = String::new();
                    if !self.inner.failure_occurred {
                        block.push_str(&self.inner.failure_header());
                        block.push('\n');
                    }
                    block.push_str(&failed_checks_block(&payload.host, &results));
                    self.inner.persist_block(block.trim_end());
                    self.inner.note_failure();
                }
                None => self.inner.explain(event),
            },
            other => self.inner.explain(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::event::RunnerResult;

    fn failed_payload() -> RunnerPayload {
        let results = vec![
            CheckResult {
                name: "docker-engine 1.11.2 is installed".to_string(),
                success: false,
                error: "install \"docker-engine\", as it was not found".to_string(),
            },
            CheckResult {
                name: "TCP port 6443 bindable".to_string(),
                success: true,
                error: String::new(),
            },
        ];
        RunnerPayload {
            host: "worker01".to_string(),
            result: RunnerResult {
                stdout: serde_json::to_string(&results).unwrap(),
                ..Default::default()
            },
            ignore_errors: false,
        }
    }

    fn render(events: &[Event]) -> String {
        let mut explainer = PreflightVerboseExplainer::new(Vec::new());
        for event in events {
            explainer.explain(event);
        }
        String::from_utf8(std::mem::take(explainer.inner.writer())).unwrap()
    }

    #[test]
    fn check_results_render_per_check() {
        let out = render(&[Event::RunnerFailed(failed_payload())]);
        assert!(out.contains("The following checks failed on \"worker01\""));
        assert!(out.contains("docker-engine 1.11.2 is installed"));
        assert!(out.contains("Successful pre-flight checks"));
        assert!(out.contains("TCP port 6443 bindable"));
    }

    #[test]
    fn non_json_stdout_falls_back_to_plain_rendering() {
        let payload = RunnerPayload {
            host: "worker01".to_string(),
            result: RunnerResult {
                msg: "task blew up".to_string(),
                stdout: "not json".to_string(),
                ..Default::default()
            },
            ignore_errors: false,
        };
        let out = render(&[Event::RunnerFailed(payload)]);
        assert!(out.contains("task blew up"));
    }
}
