//! JSON-with-comments normalization.
//!
//! Connection configs are edited by humans and may carry `//` and `/* */`
//! comments plus trailing commas. [`normalize`] strips those while keeping the
//! document's layout and key order, then checks the result is strict JSON.

use serde_json::Value;

/// Strip comments and trailing commas, returning strict JSON text.
pub fn normalize(input: &str) -> Result<String, String> {
    let stripped = strip(input)?;
    serde_json::from_str::<Value>(&stripped).map_err(|e| e.to_string())?;
    Ok(stripped)
}

/// Normalize and parse in one step.
pub fn parse(input: &str) -> Result<(String, Value), String> {
    let stripped = strip(input)?;
    let value = serde_json::from_str::<Value>(&stripped).map_err(|e| e.to_string())?;
    Ok((stripped, value))
}

fn strip(input: &str) -> Result<String, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' => {
                out.push(c);
                i += 1;
                let mut closed = false;
                while i < chars.len() {
                    let s = chars[i];
                    out.push(s);
                    i += 1;
                    if s == '\\' {
                        if let Some(&escaped) = chars.get(i) {
                            out.push(escaped);
                            i += 1;
                        }
                    } else if s == '"' {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err("unterminated string literal".to_string());
                }
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                let mut closed = false;
                while i + 1 < chars.len() {
                    if chars[i] == '*' && chars[i + 1] == '/' {
                        i += 2;
                        closed = true;
                        break;
                    }
                    // keep line structure so parse errors point at the right line
                    if chars[i] == '\n' {
                        out.push('\n');
                    }
                    i += 1;
                }
                if !closed {
                    return Err("unterminated block comment".to_string());
                }
            }
            ',' => {
                if next_significant(&chars, i + 1).is_some_and(|n| n == '}' || n == ']') {
                    i += 1;
                } else {
                    out.push(c);
                    i += 1;
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok(out)
}

/// Next character that is neither whitespace nor inside a comment.
fn next_significant(chars: &[char], mut i: usize) -> Option<char> {
    while i < chars.len() {
        match chars[i] {
            c if c.is_whitespace() => i += 1,
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i += 2;
            }
            c => return Some(c),
        }
    }
    None
}
