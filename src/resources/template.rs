//! Placeholder substitution for the policy templates
//!
//! Templates are plain YAML with `{placeholder}` slots. Rendering is a
//! verbatim string substitution; nothing is escaped or validated here,
//! decoding the result is the deployer's job.

/// Substitute every `{key}` in `template` with its value.
///
/// Placeholders without a matching variable are left untouched, which makes
/// the rendered document fail to decode rather than silently drop a name.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}

/// Names of placeholders still present in a rendered document.
pub fn unresolved_placeholders(rendered: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = rendered;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let candidate = &after[..end];
                if !candidate.is_empty()
                    && candidate
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c == '_')
                {
                    found.push(candidate);
                }
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    found
}
