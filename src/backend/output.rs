/// Reserve inside the cap for context: the visible prefix is `cap - 50`
/// characters, then the truncation notice names both lengths.
const TRUNCATION_RESERVE: usize = 50;

/// Decode, right-trim, and cap exec stdout.
pub fn finish_exec_text(stdout: &[u8], max_output_length: Option<usize>) -> String {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim_end();
    cap_output(trimmed, max_output_length)
}

/// Apply the output cap: keep the first `cap - 50` characters and append a
/// notice stating the original and shown lengths. No-op when under the cap.
pub fn cap_output(text: &str, max_output_length: Option<usize>) -> String {
    let Some(cap) = max_output_length else {
        return text.to_string();
    };
    let total = text.chars().count();
    if total <= cap {
        return text.to_string();
    }
    let shown = cap.saturating_sub(TRUNCATION_RESERVE);
    let mut result: String = text.chars().take(shown).collect();
    result.push_str(&format!(
        "... [Output truncated. Full output was {total} characters, showing first {shown}]"
    ));
    result
}

/// Truncate a byte slice at a UTF-8 character boundary, never splitting a
/// multi-byte character.
pub fn truncate_at_utf8_boundary(data: &[u8], max: usize) -> &[u8] {
    if max >= data.len() {
        return data;
    }
    let mut end = max;
    while end > 0 && (data[end] & 0xC0) == 0x80 {
        end -= 1;
    }
    &data[..end]
}

/// Whether a payload is printable enough for debug traces: ASCII text and
/// whitespace only. Binary output is summarized instead of dumped.
pub fn is_loggable_text(data: &[u8]) -> bool {
    data.iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..0x7f).contains(&b))
}

/// Render a payload for debug traces, eliding binary content.
pub fn log_preview(data: &[u8]) -> String {
    if is_loggable_text(data) {
        String::from_utf8_lossy(data).into_owned()
    } else {
        format!("<binary: {} bytes>", data.len())
    }
}
