//! Line-by-line event rendering for verbose runs and log files.

use std::io::Write;

use super::EventExplainer;
use crate::playbook::event::RunnerPayload;
use crate::playbook::Event;
use crate::util;

pub struct VerboseExplainer<W: Write + Send> {
    out: W,
    print_play_message: bool,
    print_play_status: bool,
    last_play: String,
    current_task: String,
}

impl<W: Write + Send> VerboseExplainer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            print_play_message: false,
            print_play_status: false,
            last_play: String::new(),
            current_task: String::new(),
        }
    }

    pub(super) fn writer(&mut self) -> &mut W {
        &mut self.out
    }

    // A play with no matching hosts runs zero tasks; that is a valid
    // outcome, not an error.
    fn write_play_status(&mut self) {
        if !self.print_play_message {
            return;
        }
        if self.print_play_status {
            let _ = writeln!(self.out);
            util::pretty_print_ok(&mut self.out, &format!("{} Finished With No Tasks", self.last_play));
        } else {
            util::pretty_print_ok(&mut self.out, &format!("{} Finished", self.last_play));
        }
    }

    fn break_before_first_task(&mut self) {
        if self.print_play_status {
            let _ = writeln!(self.out);
            self.print_play_status = false;
        }
    }

    fn explain_failure(&mut self, payload: &RunnerPayload, label: String) {
        self.break_before_first_task();
        if payload.ignore_errors {
            util::pretty_print_ignored(&mut self.out, &label);
        } else {
            util::pretty_print_err(&mut self.out, &format!("{label} {}", payload.result.msg));
        }
        util::print_captured_output(&mut self.out, &payload.result.stdout, &payload.result.stderr);
    }
}

fn item_label(payload: &RunnerPayload) -> String {
    if payload.result.item.is_empty() {
        format!("  {}", payload.host)
    } else {
        format!("  {} with {:?}", payload.host, payload.result.item)
    }
}

impl<W: Write + Send> EventExplainer for VerboseExplainer<W> {
    fn explain(&mut self, event: &Event) {
        match event {
            Event::PlaybookStart(_) => {}
            Event::PlayStart(payload) => {
                // The previous play ends when the next one starts
                self.write_play_status();
                let _ = write!(self.out, "{}", payload.name);
                self.last_play = payload.name.clone();
                self.print_play_status = true;
                self.print_play_message = true;
            }
            Event::PlaybookEnd(_) => {
                self.write_play_status();
            }
            Event::TaskStart(payload) | Event::HandlerTaskStart(payload) => {
                self.break_before_first_task();
                let _ = writeln!(self.out, "- Running task: {}", payload.name);
                self.current_task = payload.name.clone();
            }
            Event::RunnerOk(payload) => {
                util::pretty_print_ok(&mut self.out, &format!("  {}", payload.host));
            }
            Event::RunnerSkipped(payload) => {
                util::pretty_print_skipped(&mut self.out, &format!("  {}", payload.host));
            }
            Event::RunnerUnreachable(payload) => {
                self.break_before_first_task();
                util::pretty_print_unreachable(&mut self.out, &format!("  {}", payload.host));
            }
            Event::RunnerFailed(payload) => {
                self.explain_failure(payload, format!("  {}", payload.host));
            }
            Event::RunnerItemOk(payload) => {
                util::pretty_print_ok(&mut self.out, &item_label(payload));
            }
            Event::RunnerItemFailed(payload) => {
                let label = item_label(payload);
                self.explain_failure(payload, label);
            }
            Event::RunnerItemRetry(payload) => {
                let _ = writeln!(
                    self.out,
                    " {} Retrying: {} ({}/{} attempts)",
                    payload.host,
                    self.current_task,
                    payload.result.attempts,
                    payload.result.retries.saturating_sub(1),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::event::{NamedPayload, RunnerResult};

    fn named(name: &str) -> NamedPayload {
        NamedPayload { name: name.to_string() }
    }

    fn runner(host: &str) -> RunnerPayload {
        RunnerPayload {
            host: host.to_string(),
            ..Default::default()
        }
    }

    fn render(events: &[Event]) -> String {
        let mut explainer = VerboseExplainer::new(Vec::new());
        for event in events {
            explainer.explain(event);
        }
        String::from_utf8(explainer.out).unwrap()
    }

    #[test]
    fn play_with_tasks_prints_finished() {
        let out = render(&[
            Event::PlaybookStart(named("kubernetes.yaml")),
            Event::PlayStart(named("Configure etcd")),
            Event::TaskStart(named("install etcd")),
            Event::RunnerOk(runner("etcd01")),
            Event::PlaybookEnd(named("kubernetes.yaml")),
        ]);
        assert!(out.contains("Configure etcd"));
        assert!(out.contains("- Running task: install etcd"));
        assert!(out.contains("etcd01"));
        assert!(out.contains("Configure etcd Finished\n"));
        assert!(!out.contains("No Tasks"));
    }

    #[test]
    fn play_without_tasks_prints_no_tasks_status() {
        let out = render(&[
            Event::PlayStart(named("Configure ingress")),
            Event::PlaybookEnd(named("kubernetes.yaml")),
        ]);
        assert!(out.contains("Configure ingress Finished With No Tasks"));
    }

    #[test]
    fn failure_prints_message_and_captured_output() {
        let mut payload = runner("worker01");
        payload.result = RunnerResult {
            msg: "non-zero return code".to_string(),
            stdout: "some output".to_string(),
            stderr: "some error".to_string(),
            ..Default::default()
        };
        let out = render(&[
            Event::PlayStart(named("Install packages")),
            Event::TaskStart(named("install docker")),
            Event::RunnerFailed(payload),
        ]);
        assert!(out.contains("worker01 non-zero return code"));
        assert!(out.contains("---- STDOUT ----"));
        assert!(out.contains("some output"));
        assert!(out.contains("---- STDERR ----"));
        assert!(out.contains("some error"));
    }

    #[test]
    fn ignored_failure_is_a_soft_warning() {
        let mut payload = runner("worker01");
        payload.ignore_errors = true;
        let out = render(&[
            Event::PlayStart(named("Install packages")),
            Event::TaskStart(named("optional step")),
            Event::RunnerFailed(payload),
        ]);
        assert!(out.contains("error ignored"));
        assert!(!out.contains("✗"));
    }

    #[test]
    fn item_events_mention_the_item() {
        let mut payload = runner("master01");
        payload.result.item = "kubelet".to_string();
        let out = render(&[Event::RunnerItemOk(payload)]);
        assert!(out.contains("master01 with \"kubelet\""));
    }

    #[test]
    fn retry_reports_attempt_counts() {
        let mut payload = runner("master01");
        payload.result.attempts = 2;
        payload.result.retries = 5;
        let out = render(&[
            Event::PlayStart(named("Wait for API server")),
            Event::TaskStart(named("wait for healthz")),
            Event::RunnerItemRetry(payload),
        ]);
        assert!(out.contains("Retrying: wait for healthz (2/4 attempts)"));
    }
}
