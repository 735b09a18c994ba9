//! Text handling for applet-native commands.

use std::time::Duration;

/// Line-comment marker recognised in command text.
pub const COMMENT_MARKER: &str = "// ";

/// Cut `command` at the first comment marker and trim the remainder.
///
/// This is a plain textual cut: a marker inside a string literal still truncates.
pub fn strip_comment(command: &str) -> &str {
    let code = match command.find(COMMENT_MARKER) {
        Some(idx) => &command[..idx],
        None => command,
    };
    code.trim()
}

/// Split multi-line input into discrete commands, dropping comments and blank lines.
pub fn parse_command_block(text: &str) -> Vec<String> {
    text.lines()
        .map(strip_comment)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Offset from the batch call at which the `index`-th command is dispatched.
pub fn dispatch_offset(index: usize, spacing: Duration) -> Duration {
    spacing.saturating_mul(u32::try_from(index).unwrap_or(u32::MAX))
}
