//! Parsing and rendering of React Native JavaScript stack traces.
//!
//! Two formats are understood:
//!
//! - The *native* format, as logged by the native side of the application. Every frame is a
//!   single line of the form `methodName@line:column`, or `methodName@-1` if the runtime could
//!   not resolve a location.
//!
//! - The *red screen* format, as displayed by the React Native error screen. Every frame spans
//!   two lines, the method name followed by `bundle:line:column`, or by `[native code]` for
//!   frames without a location.
//!
//! Any other text (error messages, indentation) is skipped.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::types::StackFrame;

static NATIVE_LOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.+)@(\d+):(\d+)").unwrap());
static NATIVE_NO_LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(.+)@-1").unwrap());
static LINE_BREAK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\r\n|\r|\n").unwrap());
static RED_SCREEN_FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(.+)\n.+:(\d+):(\d+)|(.+)\n.+\[native code\]").unwrap()
});

/// Parses frames from a stack trace in any of the supported formats.
///
/// The native format is tried first. If it does not yield any frame, the red screen format is
/// used instead. The result is empty if neither format matches.
pub fn parse_stacktrace(text: &str) -> Vec<StackFrame> {
    let frames = parse_native_stacktrace(text);
    if !frames.is_empty() {
        return frames;
    }
    parse_red_screen_stacktrace(text)
}

/// Parses a stack trace in the native format, one frame per line.
pub fn parse_native_stacktrace(text: &str) -> Vec<StackFrame> {
    LINE_BREAK_RE
        .split(text)
        .filter_map(|line| parse_native_frame(line.trim()))
        .collect()
}

fn parse_native_frame(line: &str) -> Option<StackFrame> {
    if let Some(captures) = NATIVE_LOCATION_RE.captures(line) {
        return Some(StackFrame::new(
            &captures[1],
            parse_number(captures.get(2)),
            parse_number(captures.get(3)),
        ));
    }

    NATIVE_NO_LOCATION_RE
        .captures(line)
        .map(|captures| StackFrame::new(&captures[1], None, None))
}

/// Parses a stack trace in the red screen format, two lines per frame.
pub fn parse_red_screen_stacktrace(text: &str) -> Vec<StackFrame> {
    RED_SCREEN_FRAME_RE
        .captures_iter(text)
        .filter_map(|captures| {
            let method_name = captures.get(1).or_else(|| captures.get(4))?;
            Some(StackFrame::new(
                method_name.as_str().trim(),
                parse_number(captures.get(2)),
                parse_number(captures.get(3)),
            ))
        })
        .collect()
}

/// Parses a captured line or column number.
///
/// Missing numbers and numbers that do not fit count as unknown.
fn parse_number(capture: Option<regex::Match<'_>>) -> Option<u32> {
    capture?.as_str().parse().ok()
}

/// Renders frames one per line, as `methodName@line:column [file]`.
///
/// Unknown values are rendered as `undefined`. There is no trailing line break.
pub fn render_stacktrace(frames: &[StackFrame]) -> String {
    let mut rendered = String::new();
    for (index, frame) in frames.iter().enumerate() {
        if index > 0 {
            rendered.push('\n');
        }
        rendered.push_str(&RenderedFrame(frame).to_string());
    }
    rendered
}

struct RenderedFrame<'a>(&'a StackFrame);

impl fmt::Display for RenderedFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frame = self.0;
        write!(
            f,
            "{}@{}:{} [{}]",
            frame.method_name,
            OrUndefined(frame.line.as_ref()),
            OrUndefined(frame.column.as_ref()),
            OrUndefined(frame.file.as_ref()),
        )
    }
}

struct OrUndefined<T>(Option<T>);

impl<T: fmt::Display> fmt::Display for OrUndefined<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(value) => value.fmt(f),
            None => f.write_str("undefined"),
        }
    }
}
