static TOOL_MISSING_PATTERNS: &[&str] = &[
    "not installed",
    "not found",
    "no such file or directory",
    "is not recognized as an internal or external command",
];

pub fn is_tool_missing_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TOOL_MISSING_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

/// User-facing text for a failed spawn, with a hint when the program itself
/// looks absent.
pub fn describe_spawn_failure(program: &str, error: &std::io::Error) -> String {
    let reason = error.to_string();
    if error.kind() == std::io::ErrorKind::NotFound || is_tool_missing_message(&reason) {
        format!(
            "❌ Error: {} (is '{}' installed and on PATH?)",
            reason, program
        )
    } else {
        format!("❌ Error: {}", reason)
    }
}
