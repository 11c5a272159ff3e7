//! Payload extraction from command output.
//!
//! Output that crosses the SSH channel can carry diagnostic lines around the
//! JSON body (host key notices, library warnings). The payload is the first
//! balanced `{...}` block in the text. Braces inside JSON string literals do
//! not count towards the balance.

use serde::de::DeserializeOwned;

/// Locate the first balanced `{...}` block in `text`.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = balanced_end(&bytes[start..]) {
            return Some(&text[start..start + end]);
        }
        search_from = start + 1;
    }

    None
}

/// Length of the balanced block starting at `bytes[0] == b'{'`
fn balanced_end(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// Extract and decode the first JSON object in `text`
pub fn parse_json_block<T: DeserializeOwned>(text: &str) -> Option<Result<T, serde_json::Error>> {
    extract_json_block(text).map(serde_json::from_str)
}
