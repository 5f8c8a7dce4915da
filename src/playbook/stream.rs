//! Turns the JSON-lines pipe into a channel of typed events.

use serde::Deserialize;
use serde_json::value::RawValue;
use std::io::{BufRead, BufReader, Read};
use std::sync::mpsc::{self, Receiver};
use std::thread;

use super::event::{Event, NamedPayload, RunnerPayload};

#[derive(Deserialize)]
struct EventEnvelope<'a> {
    #[serde(rename = "eventType")]
    event_type: String,
    #[serde(rename = "eventData", borrow)]
    event_data: &'a RawValue,
}

/// Read JSON lines from `source` on a background thread, producing typed
/// events. Lines that fail to parse are logged and skipped. The channel
/// closes when the source reaches EOF.
pub fn event_stream<R: Read + Send + 'static>(source: R) -> Receiver<Event> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let reader = BufReader::new(source);
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    log::warn!("error reading event stream: {err}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match event_from_json_line(&line) {
                Ok(event) => {
                    if tx.send(event).is_err() {
                        // Receiver dropped; drain the rest of the pipe so
                        // the engine process is not blocked on a write.
                        continue;
                    }
                }
                Err(err) => {
                    log::warn!("skipping malformed event line: {err}");
                }
            }
        }
    });
    rx
}

fn event_from_json_line(line: &str) -> anyhow::Result<Event> {
    let envelope: EventEnvelope = serde_json::from_str(line)
        .map_err(|err| anyhow::anyhow!("error parsing event: {err}; line was: {line}"))?;

    let named = |data: &RawValue| -> anyhow::Result<NamedPayload> {
        Ok(serde_json::from_str(data.get())?)
    };
    let runner = |data: &RawValue| -> anyhow::Result<RunnerPayload> {
        Ok(serde_json::from_str(data.get())?)
    };

    let data = envelope.event_data;
    let event = match envelope.event_type.as_str() {
        "PLAYBOOK_START" => Event::PlaybookStart(named(data)?),
        "PLAYBOOK_END" => Event::PlaybookEnd(named(data)?),
        "PLAY_START" => Event::PlayStart(named(data)?),
        "TASK_START" => Event::TaskStart(named(data)?),
        "HANDLER_TASK_START" => Event::HandlerTaskStart(named(data)?),
        "RUNNER_OK" => Event::RunnerOk(runner(data)?),
        "RUNNER_FAILED" => Event::RunnerFailed(runner(data)?),
        "RUNNER_SKIPPED" => Event::RunnerSkipped(runner(data)?),
        "RUNNER_UNREACHABLE" => Event::RunnerUnreachable(runner(data)?),
        "RUNNER_ITEM_OK" => Event::RunnerItemOk(runner(data)?),
        "RUNNER_ITEM_RETRY" => Event::RunnerItemRetry(runner(data)?),
        "RUNNER_ITEM_FAILED" => Event::RunnerItemFailed(runner(data)?),
        other => anyhow::bail!("unhandled event type {other:?}; line was: {line}"),
    };
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_lifecycle_and_runner_events() {
        let lines = concat!(
            r#"{"eventType":"PLAYBOOK_START","eventData":{"name":"kubernetes.yaml"}}"#,
            "\n",
            r#"{"eventType":"TASK_START","eventData":{"name":"install kubelet","id":"abc"}}"#,
            "\n",
            r#"{"eventType":"RUNNER_OK","eventData":{"host":"worker01","result":{"cmd":["true"],"stdout":"ok"},"ignoreErrors":false}}"#,
            "\n",
        );
        let stream = event_stream(Cursor::new(lines.to_string()));
        let events: Vec<Event> = stream.iter().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], Event::PlaybookStart(p) if p.name == "kubernetes.yaml"));
        assert!(matches!(&events[1], Event::TaskStart(p) if p.name == "install kubelet"));
        assert!(matches!(&events[2], Event::RunnerOk(p) if p.host == "worker01"));
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let lines = concat!(
            "this is not json\n",
            r#"{"eventType":"NO_SUCH_EVENT","eventData":{}}"#,
            "\n",
            r#"{"eventType":"PLAY_START","eventData":{"name":"etcd"}}"#,
            "\n",
        );
        let stream = event_stream(Cursor::new(lines.to_string()));
        let events: Vec<Event> = stream.iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::PlayStart(p) if p.name == "etcd"));
    }

    #[test]
    fn channel_closes_at_eof() {
        let stream = event_stream(Cursor::new(String::new()));
        assert!(stream.recv().is_err());
    }
}
