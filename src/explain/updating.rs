//! Live single-line rendering for interactive runs.
//!
//! A spinner carries the current play and task; completed plays,
//! failures, and unreachable hosts are persisted above it.

use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write as _;
use std::time::Duration;

use super::EventExplainer;
use crate::playbook::event::RunnerPayload;
use crate::playbook::Event;
use crate::util;

pub struct UpdatingExplainer {
    bar: ProgressBar,
    current_play: String,
    current_task: String,
    pub(super) failure_occurred: bool,
    task_ran: bool,
}

impl UpdatingExplainer {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {wide_msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        Self {
            bar,
            current_play: String::new(),
            current_task: String::new(),
            failure_occurred: false,
            task_ran: false,
        }
    }

    fn persist(&self, line: &str) {
        self.bar.println(line);
    }

    pub(super) fn persist_block(&self, block: &str) {
        self.bar.println(block);
    }

    fn status(&self) {
        if self.current_task.is_empty() {
            self.bar.set_message(self.current_play.clone());
        } else {
            self.bar
                .set_message(format!("{}: {}", self.current_play, self.current_task));
        }
    }

    fn render_line(f: impl Fn(&mut dyn std::io::Write)) -> String {
        let mut buf = Vec::new();
        f(&mut buf);
        String::from_utf8_lossy(&buf).trim_end().to_string()
    }

    /// Render the failure block: a header naming the play and task on the
    /// first failure, then the per-host status and any captured output.
    pub(super) fn failure_block(&self, payload: &RunnerPayload, label: &str) -> String {
        let mut buf = Vec::new();
        let out: &mut dyn std::io::Write = &mut buf;
        if !self.failure_occurred {
            util::pretty_print_err(out, &self.current_play);
            let _ = writeln!(out, "- Task: {}", self.current_task);
        }
        if payload.ignore_errors {
            util::pretty_print_ignored(out, label);
        } else {
            util::pretty_print_err(out, &format!("{label}: {}", payload.result.msg));
        }
        util::print_captured_output(out, &payload.result.stdout, &payload.result.stderr);
        String::from_utf8_lossy(&buf).trim_end().to_string()
    }

    pub(super) fn failure_header(&self) -> String {
        let mut buf = Vec::new();
        let out: &mut dyn std::io::Write = &mut buf;
        util::pretty_print_err(out, &self.current_play);
        let _ = writeln!(out, "- Task: {}", self.current_task);
        String::from_utf8_lossy(&buf).trim_end().to_string()
    }

    pub(super) fn note_failure(&mut self) {
        self.failure_occurred = true;
    }
}

impl Default for UpdatingExplainer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventExplainer for UpdatingExplainer {
    fn explain(&mut self, event: &Event) {
        match event {
            Event::PlaybookStart(_) => {}
            Event::PlayStart(payload) => {
                if !self.current_play.is_empty() {
                    let play = self.current_play.clone();
                    if self.task_ran {
                        self.persist(&Self::render_line(|w| util::pretty_print_ok(w, &play)));
                    } else {
                        self.persist(&Self::render_line(|w| util::pretty_print_skipped(w, &play)));
                    }
                }
                self.task_ran = false;
                self.current_play = payload.name.clone();
                self.current_task.clear();
                self.status();
            }
            Event::PlaybookEnd(_) => {
                if !self.failure_occurred {
                    let play = self.current_play.clone();
                    self.persist(&Self::render_line(|w| util::pretty_print_ok(w, &play)));
                }
                self.bar.finish_and_clear();
            }
            Event::TaskStart(payload) => {
                self.current_task = payload.name.clone();
                self.status();
            }
            Event::HandlerTaskStart(payload) => {
                // The engine echoes handler events even after a failure;
                // suppress them so the failure block stays last.
                if !self.failure_occurred {
                    self.current_task = payload.name.clone();
                    self.status();
                }
            }
            Event::RunnerOk(payload) => {
                self.task_ran = true;
                self.bar.set_message(format!(
                    "{}: {} [{}]",
                    self.current_play, self.current_task, payload.host
                ));
            }
            Event::RunnerItemOk(payload) => {
                let mut message = format!(
                    "{}: {} [{}]",
                    self.current_play, self.current_task, payload.host
                );
                if !payload.result.item.is_empty() {
                    message.push_str(&format!(" with {:?}", payload.result.item));
                }
                self.bar.set_message(message);
            }
            Event::RunnerSkipped(payload) => {
                self.bar.set_message(format!(
                    "{}: {} [{} skipped]",
                    self.current_play, self.current_task, payload.host
                ));
            }
            Event::RunnerUnreachable(payload) => {
                let play = self.current_play.clone();
                let host = format!("  {}", payload.host);
                self.persist(&play);
                self.persist(&Self::render_line(|w| util::pretty_print_unreachable(w, &host)));
            }
            Event::RunnerFailed(payload) => {
                let block = self.failure_block(payload, &format!("  {}", payload.host));
                self.persist(&block);
                self.failure_occurred = true;
            }
            Event::RunnerItemFailed(payload) => {
                let mut label = format!("  {}", payload.host);
                if !payload.result.item.is_empty() {
                    label.push_str(&format!(" with {:?}", payload.result.item));
                }
                let block = self.failure_block(payload, &label);
                self.persist(&block);
                self.failure_occurred = true;
            }
            Event::RunnerItemRetry(payload) => {
                self.bar.set_message(format!(
                    "{}: Retrying {} [{}] ({}/{} attempts)",
                    self.current_play,
                    self.current_task,
                    payload.host,
                    payload.result.attempts,
                    payload.result.retries.saturating_sub(1),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::event::{NamedPayload, RunnerResult};

    #[test]
    fn first_failure_includes_play_and_task_header() {
        let mut explainer = UpdatingExplainer::new();
        explainer.explain(&Event::PlayStart(NamedPayload {
            name: "Install packages".to_string(),
        }));
        explainer.explain(&Event::TaskStart(NamedPayload {
            name: "install docker".to_string(),
        }));
        let payload = RunnerPayload {
            host: "worker01".to_string(),
            result: RunnerResult {
                msg: "boom".to_string(),
                ..Default::default()
            },
            ignore_errors: false,
        };
        let first = explainer.failure_block(&payload, "  worker01");
        assert!(first.contains("Install packages"));
        assert!(first.contains("- Task: install docker"));
        assert!(first.contains("worker01: boom"));

        explainer.note_failure();
        let second = explainer.failure_block(&payload, "  worker01");
        assert!(!second.contains("- Task:"));
        assert!(second.contains("worker01: boom"));
    }

    #[test]
    fn ignored_failure_renders_as_warning() {
        let mut explainer = UpdatingExplainer::new();
        explainer.explain(&Event::PlayStart(NamedPayload {
            name: "Install packages".to_string(),
        }));
        let payload = RunnerPayload {
            host: "worker01".to_string(),
            ignore_errors: true,
            ..Default::default()
        };
        let block = explainer.failure_block(&payload, "  worker01");
        assert!(block.contains("error ignored"));
    }
}
