//! Markdown code-fence cleanup for generated code

/// Strip a leading fence line (```` ```javascript ````, ```` ```js ````,
/// or a bare ```` ``` ````) and a trailing ```` ``` ````
///
/// Text without fences is returned trimmed but otherwise unchanged.
#[must_use]
pub fn strip_code_fences(text: &str) -> String {
    let mut body = text.trim();

    if body.starts_with("```") {
        body = match body.find('\n') {
            Some(newline) => &body[newline + 1..],
            None => "",
        };
    }

    if let Some(inner) = body.trim_end().strip_suffix("```") {
        body = inner;
    }

    body.trim().to_string()
}
