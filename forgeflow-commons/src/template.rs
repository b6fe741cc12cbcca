//! Brace-placeholder template rendering, shared by workflow step prompt
//! templates (`{var}`) and config environment-variable
//! substitution (`${NAME}` / `${NAME:-default}`).

use std::collections::HashMap;

/// Render `{var}` placeholders in `template` against `bindings`. Unknown
/// placeholders are left untouched (the caller decides whether that's an
/// error — the Workflow Executor treats an unresolved placeholder as a
/// validation failure before execution, invariant (ii)).
pub fn render_template(template: &str, bindings: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = template[i + 1..].find('}') {
                let name = &template[i + 1..i + 1 + end];
                if is_placeholder_name(name) {
                    if let Some(value) = bindings.get(name) {
                        out.push_str(value);
                    } else {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                    i = i + 1 + end + 1;
                    continue;
                }
            }
        }
        let ch = template[i..].chars().next().unwrap_or('\0');
        out.push(ch);
        i += ch.len_utf8();
    }
    let _ = &mut chars;
    out
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Extract the set of `{var}` placeholder names referenced by a template,
/// used by the executor to compute implicit dependencies from
/// `prompt_template` ("implicit references from ... prompt_template
/// placeholders").
pub fn placeholder_names(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = template[i + 1..].find('}') {
                let name = &template[i + 1..i + 1 + end];
                if is_placeholder_name(name) {
                    names.push(name.to_string());
                    i = i + 1 + end + 1;
                    continue;
                }
            }
        }
        i += 1;
    }
    names
}

/// Substitute `${NAME}` / `${NAME:-default}` placeholders by looking each
/// name up in `lookup` (typically `std::env::var`). Used once at config
/// load time.
pub fn substitute_env_placeholders(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(end_rel) = input[i + 2..].find('}') {
                let inner = &input[i + 2..i + 2 + end_rel];
                let (name, default) = match inner.split_once(":-") {
                    Some((n, d)) => (n, Some(d)),
                    None => (inner, None),
                };
                let resolved = lookup(name).or_else(|| default.map(str::to_string));
                match resolved {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("${");
                        out.push_str(inner);
                        out.push('}');
                    }
                }
                i = i + 2 + end_rel + 1;
                continue;
            }
        }
        let ch = input[i..].chars().next().unwrap_or('\0');
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_known_placeholders() {
        let mut bindings = HashMap::new();
        bindings.insert("topic".to_string(), "rust".to_string());
        assert_eq!(render_template("write about {topic}", &bindings), "write about rust");
    }

    #[test]
    fn leaves_unknown_placeholders() {
        let bindings = HashMap::new();
        assert_eq!(render_template("hi {name}", &bindings), "hi {name}");
    }

    #[test]
    fn extracts_placeholder_names() {
        let names = placeholder_names("{a} and {steps.b.out}");
        assert_eq!(names, vec!["a".to_string(), "steps.b.out".to_string()]);
    }

    #[test]
    fn env_substitution_with_default() {
        let out = substitute_env_placeholders("key=${MISSING:-fallback}", |_| None);
        assert_eq!(out, "key=fallback");
    }

    #[test]
    fn env_substitution_prefers_present_value() {
        let out = substitute_env_placeholders("${HOME}", |n| (n == "HOME").then(|| "/root".to_string()));
        assert_eq!(out, "/root");
    }
}
