/// Heredoc masking.
///
/// Heredoc bodies are literal data: patterns that would otherwise read as
/// escapes (`cd`, `~/`, `$(...)`, backticks) must not fire inside them. The
/// mask replaces every body character except newlines with a space so that
/// token positions and line structure stay stable for the pattern layer.

/// Mask every heredoc body in `command`.
///
/// Recognizes `<<` (not `<<<`), an optional `-` (leading-tab strip), and a
/// quoted or unquoted delimiter. Bodies run from the line after the redirect
/// to a line containing only the delimiter. Multiple heredocs on one command
/// line queue up bodies in order, as the shell consumes them.
pub fn mask_heredocs(command: &str) -> String {
    let mut chars: Vec<char> = command.chars().collect();
    let len = chars.len();
    let mut i = 0;
    let mut in_single = false;
    let mut in_double = false;
    let mut pending: Vec<(String, bool)> = Vec::new();

    while i < len {
        let c = chars[i];

        if c == '\\' && !in_single {
            i += 2;
            continue;
        }
        if c == '\'' && !in_double {
            in_single = !in_single;
            i += 1;
            continue;
        }
        if c == '"' && !in_single {
            in_double = !in_double;
            i += 1;
            continue;
        }

        if !in_single && !in_double && c == '<' && i + 1 < len && chars[i + 1] == '<' {
            // `<<<` is a herestring, not a heredoc
            if i + 2 < len && chars[i + 2] == '<' {
                i += 3;
                continue;
            }
            let mut j = i + 2;
            let mut strip_tabs = false;
            if j < len && chars[j] == '-' {
                strip_tabs = true;
                j += 1;
            }
            while j < len && (chars[j] == ' ' || chars[j] == '\t') {
                j += 1;
            }
            let mut delim = String::new();
            if j < len && (chars[j] == '\'' || chars[j] == '"') {
                let quote = chars[j];
                j += 1;
                while j < len && chars[j] != quote {
                    delim.push(chars[j]);
                    j += 1;
                }
                if j < len {
                    j += 1;
                }
            } else {
                while j < len && (chars[j].is_ascii_alphanumeric() || chars[j] == '_') {
                    delim.push(chars[j]);
                    j += 1;
                }
            }
            if delim.is_empty() {
                i += 2;
                continue;
            }
            pending.push((delim, strip_tabs));
            i = j;
            continue;
        }

        if c == '\n' && !pending.is_empty() {
            let mut line_start = i + 1;
            for (delim, strip_tabs) in pending.drain(..) {
                let body_start = line_start;
                let mut body_end = len;
                let mut after_terminator = len;
                let mut cursor = line_start;
                while cursor < len {
                    let mut eol = cursor;
                    while eol < len && chars[eol] != '\n' {
                        eol += 1;
                    }
                    let mut content_start = cursor;
                    if strip_tabs {
                        while content_start < eol && chars[content_start] == '\t' {
                            content_start += 1;
                        }
                    }
                    let line: String = chars[content_start..eol].iter().collect();
                    if line == delim {
                        body_end = cursor;
                        after_terminator = if eol < len { eol + 1 } else { len };
                        break;
                    }
                    cursor = if eol < len { eol + 1 } else { len };
                }
                for k in body_start..body_end {
                    if chars[k] != '\n' {
                        chars[k] = ' ';
                    }
                }
                line_start = after_terminator;
            }
            i = line_start;
            in_single = false;
            in_double = false;
            continue;
        }

        i += 1;
    }

    chars.into_iter().collect()
}
