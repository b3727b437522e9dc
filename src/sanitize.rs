//! Response cleanup
//!
//! The backend's agent log leaks `<inference>` markers and hard line breaks
//! into the answer text. Strip them before anything is displayed or stored.

use regex::Regex;
use std::sync::OnceLock;

/// Marker the agent event logger prefixes onto inference output
pub const INFERENCE_MARKER: &str = "<inference>";

fn newline_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n+").expect("static regex"))
}

/// Turn a raw `response` payload into display text.
///
/// Removes every `<inference>` marker, collapses each run of newlines into a
/// single space, then trims surrounding whitespace.
pub fn sanitize_response(raw: &str) -> String {
    let stripped = raw.replace(INFERENCE_MARKER, "");
    newline_runs().replace_all(&stripped, " ").trim().to_string()
}
