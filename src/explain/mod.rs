//! Explainers turn the playbook event stream into operator-facing output.
//!
//! The verbose explainer prints every event as it arrives; the updating
//! explainer keeps a single live status line and only persists plays,
//! failures, and unreachable hosts.

mod preflight;
mod updating;
mod verbose;

pub use preflight::{PreflightUpdatingExplainer, PreflightVerboseExplainer};
pub use updating::UpdatingExplainer;
pub use verbose::VerboseExplainer;

use std::sync::mpsc::Receiver;

use crate::playbook::Event;

/// Explains a single playbook event.
pub trait EventExplainer: Send {
    fn explain(&mut self, event: &Event);
}

/// Drain the event stream through the explainer. Returns when the stream
/// closes, which happens when the engine finishes writing events.
pub fn explain_stream(events: &Receiver<Event>, explainer: &mut dyn EventExplainer) {
    for event in events.iter() {
        explainer.explain(&event);
    }
}

fn stdout_is_terminal() -> bool {
    console::Term::stdout().features().is_attended()
}

/// The explainer for regular playbook runs. Verbose output is also used
/// when stdout is not a terminal, so logs stay readable.
pub fn default_explainer(verbose: bool) -> Box<dyn EventExplainer> {
    if verbose || !stdout_is_terminal() {
        Box::new(VerboseExplainer::new(std::io::stdout()))
    } else {
        Box::new(UpdatingExplainer::new())
    }
}

/// The explainer for preflight runs, which renders per-check failures
/// instead of raw task output.
pub fn preflight_explainer(verbose: bool) -> Box<dyn EventExplainer> {
    if verbose || !stdout_is_terminal() {
        Box::new(PreflightVerboseExplainer::new(std::io::stdout()))
    } else {
        Box::new(PreflightUpdatingExplainer::new())
    }
}
