//! Events emitted by the playbook engine while a playbook runs.
//!
//! The engine writes one JSON object per line into a named pipe. Each line
//! is an envelope carrying a type tag and a type-specific payload.

use serde::Deserialize;

/// A single event from a playbook run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    PlaybookStart(NamedPayload),
    PlaybookEnd(NamedPayload),
    PlayStart(NamedPayload),
    TaskStart(NamedPayload),
    HandlerTaskStart(NamedPayload),
    RunnerOk(RunnerPayload),
    RunnerFailed(RunnerPayload),
    RunnerSkipped(RunnerPayload),
    RunnerUnreachable(RunnerPayload),
    RunnerItemOk(RunnerPayload),
    RunnerItemRetry(RunnerPayload),
    RunnerItemFailed(RunnerPayload),
}

impl Event {
    /// Human-readable event type name, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::PlaybookStart(_) => "Playbook Start",
            Event::PlaybookEnd(_) => "Playbook End",
            Event::PlayStart(_) => "Play Start",
            Event::TaskStart(_) => "Task Start",
            Event::HandlerTaskStart(_) => "Handler Task Start",
            Event::RunnerOk(_) => "Runner OK",
            Event::RunnerFailed(_) => "Runner Failed",
            Event::RunnerSkipped(_) => "Runner Skipped",
            Event::RunnerUnreachable(_) => "Runner Unreachable",
            Event::RunnerItemOk(_) => "Runner Item OK",
            Event::RunnerItemRetry(_) => "Runner Item Retry",
            Event::RunnerItemFailed(_) => "Runner Item Failed",
        }
    }
}

/// Payload for playbook, play, and task lifecycle events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NamedPayload {
    #[serde(default)]
    pub name: String,
}

/// Payload for per-host runner outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RunnerPayload {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub result: RunnerResult,
    #[serde(default, rename = "ignoreErrors")]
    pub ignore_errors: bool,
}

/// The result dictionary the engine attaches to runner events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RunnerResult {
    #[serde(default)]
    pub cmd: CommandLine,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub item: String,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub retries: u32,
}

/// The engine reports commands either as a single string or as an argv
/// list depending on the module that ran.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    Line(String),
    Argv(Vec<String>),
}

impl Default for CommandLine {
    fn default() -> Self {
        CommandLine::Line(String::new())
    }
}

impl CommandLine {
    pub fn is_empty(&self) -> bool {
        match self {
            CommandLine::Line(line) => line.is_empty(),
            CommandLine::Argv(argv) => argv.is_empty(),
        }
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandLine::Line(line) => f.write_str(line),
            CommandLine::Argv(argv) => f.write_str(&argv.join(" ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_accepts_both_shapes() {
        let line: CommandLine = serde_json::from_str(r#""systemctl restart kubelet""#).unwrap();
        assert_eq!(line.to_string(), "systemctl restart kubelet");

        let argv: CommandLine = serde_json::from_str(r#"["systemctl", "restart", "kubelet"]"#).unwrap();
        assert_eq!(argv.to_string(), "systemctl restart kubelet");
    }

    #[test]
    fn runner_payload_defaults_missing_fields() {
        let payload: RunnerPayload =
            serde_json::from_str(r#"{"host": "worker01", "result": {}}"#).unwrap();
        assert_eq!(payload.host, "worker01");
        assert!(!payload.ignore_errors);
        assert!(payload.result.cmd.is_empty());
    }
}
