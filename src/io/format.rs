//! Layout of the human-readable `smith-output` log stream.

use std::fmt;

use anyhow;
use log;

#[cfg(test)]
#[path = "format_tests.rs"]
mod format_tests;

/// The log target of the human-readable run report, routed separately from diagnostics.
pub(crate) const OUTPUT_TARGET: &str = "smith-output";

/// The minimum inner width of boxed titles and section markers.
const RULE_WIDTH: usize = 97;

/// Logs an error both as a diagnostic and to the run report.
macro_rules! smith_error {
    ($fmt:expr $(, $($arg:tt)*)?) => {
        log::error!($fmt, $($($arg)*)?);
        log::error!(target: $crate::io::format::OUTPUT_TARGET, $fmt, $($($arg)*)?);
    }
}

/// Logs a warning to the run report.
macro_rules! smith_warn {
    ($fmt:expr $(, $($arg:tt)*)?) => {
        log::warn!(target: $crate::io::format::OUTPUT_TARGET, $fmt, $($($arg)*)?);
    }
}

/// Logs a line of the run report.
macro_rules! smith_output {
    ($fmt:expr $(, $($arg:tt)*)?) => {
        log::info!(target: $crate::io::format::OUTPUT_TARGET, $fmt, $($($arg)*)?)
    }
}

pub(crate) use {smith_error, smith_output, smith_warn};

/// Returns the three lines of `title` centred in a box at least [`RULE_WIDTH`] wide.
pub(crate) fn boxed(title: &str) -> [String; 3] {
    let width = title.chars().count().max(RULE_WIDTH);
    let bar = "─".repeat(width + 2);
    [
        format!("┌{bar}┐"),
        format!("│ {title:^width$} │"),
        format!("└{bar}┘"),
    ]
}

/// Logs `title` in a box.
pub(crate) fn log_title(title: &str) {
    boxed(title).iter().for_each(|line| smith_output!("{line}"));
}

/// Logs `text` underlined by a double rule of the same length.
pub(crate) fn log_subtitle(text: &str) {
    smith_output!("{text}");
    smith_output!("{}", "═".repeat(text.chars().count()));
}

/// Returns the marker opening (`closing == false`) or closing a section named `title`, padded
/// to [`RULE_WIDTH`].
pub(crate) fn section_marker(title: &str, closing: bool) -> String {
    let (tag, fill) = if closing {
        ("[ End ]", '>')
    } else {
        ("[Begin]", '<')
    };
    let head = format!("{} {tag} {title} ", fill.to_string().repeat(3));
    let pad = RULE_WIDTH.saturating_sub(head.chars().count());
    format!("{head}{}", fill.to_string().repeat(pad))
}

/// Runs `body` between the opening and closing markers of the section `title`. If `body`
/// fails, the section is reported as aborted and the error is passed on.
pub(crate) fn log_section<T>(
    title: &str,
    body: impl FnOnce() -> Result<T, anyhow::Error>,
) -> Result<T, anyhow::Error> {
    smith_output!("{}", section_marker(title, false));
    match body() {
        Ok(value) => {
            smith_output!("{}", section_marker(title, true));
            Ok(value)
        }
        Err(err) => {
            smith_warn!("Section `{title}` aborted.");
            Err(err)
        }
    }
}

/// Renders a flag as `yes` or `no`.
pub(crate) fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Logs the `Display` rendering of `item` to the run report, line by line.
pub(crate) fn log_display(item: &impl fmt::Display) {
    item.to_string()
        .lines()
        .for_each(|line| smith_output!("{line}"));
}
