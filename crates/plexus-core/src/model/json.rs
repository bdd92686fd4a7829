use serde_json::Value;

/// Pull the first JSON object or array out of a model reply.
///
/// Tolerates markdown code fences and prose around the payload.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() || value.is_array() {
            return Some(value);
        }
    }

    let bytes = trimmed.as_bytes();
    let mut start = 0;
    while let Some(offset) = trimmed[start..].find(['{', '[']) {
        let open = start + offset;
        if let Some(end) = matching_close(bytes, open) {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[open..=end]) {
                return Some(value);
            }
        }
        start = open + 1;
    }
    None
}

/// Index of the bracket closing the one at `open`, skipping string literals
fn matching_close(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
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
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        assert_eq!(extract_json(r#"[{"id": 1}]"#).unwrap()[0]["id"], 1);
    }

    #[test]
    fn strips_code_fences_and_prose() {
        let reply = "Here is the plan:\n```json\n{\"tasks\": [{\"id\": 1, \"note\": \"a } b\"}]}\n```\nDone.";
        let value = extract_json(reply).unwrap();
        assert_eq!(value["tasks"][0]["note"], "a } b");
    }

    #[test]
    fn skips_unbalanced_prefix() {
        let reply = "use [brackets carefully {\"ok\": true}";
        assert_eq!(extract_json(reply).unwrap()["ok"], true);
    }

    #[test]
    fn returns_none_without_json() {
        assert!(extract_json("I could not plan this.").is_none());
    }
}
