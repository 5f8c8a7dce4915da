//! Status-line printers shared by explainers and validation output.
//!
//! Every helper writes to an arbitrary writer so the same rendering works
//! for the console and for captured log files.

use colored::Colorize;
use std::io::Write;

/// Print a success line
pub fn pretty_print_ok(out: &mut dyn Write, msg: &str) {
    let _ = writeln!(out, "{} {}", "✓".green(), msg);
}

/// Print a failure line
pub fn pretty_print_err(out: &mut dyn Write, msg: &str) {
    let _ = writeln!(out, "{} {}", "✗".red(), msg);
}

/// Print a skipped line
pub fn pretty_print_skipped(out: &mut dyn Write, msg: &str) {
    let _ = writeln!(out, "{} {}", "⊘".dimmed(), msg);
}

/// Print a failure that the playbook chose to ignore
pub fn pretty_print_ignored(out: &mut dyn Write, msg: &str) {
    let _ = writeln!(out, "{} {} {}", "⚠".yellow(), msg, "(error ignored)".yellow());
}

/// Print an unreachable-host line
pub fn pretty_print_unreachable(out: &mut dyn Write, msg: &str) {
    let _ = writeln!(out, "{} {} {}", "✗".red(), msg, "(unreachable)".red());
}

/// Print a section header framed by a rule of the given character
pub fn print_header(out: &mut dyn Write, title: &str, rule: char) {
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", title.bold());
    let _ = writeln!(out, "{}", rule.to_string().repeat(title.len()).dimmed());
}

/// Frame captured remote output so it stands apart from driver output
pub fn print_captured_output(out: &mut dyn Write, stdout: &str, stderr: &str) {
    if !stdout.is_empty() {
        let _ = writeln!(out, "{}", "---- STDOUT ----".red());
        let _ = writeln!(out, "{}", stdout);
    }
    if !stderr.is_empty() {
        let _ = writeln!(out, "{}", "---- STDERR ----".red());
        let _ = writeln!(out, "{}", stderr);
    }
    if !stdout.is_empty() || !stderr.is_empty() {
        let _ = writeln!(out, "{}", "---------------".red());
    }
}
