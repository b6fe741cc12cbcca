//! Optional behavioral validation: a `feature + scenarios[]`
//! specification whose postconditions are checked against
//! `(inputs, outputs, metadata)` after execution. Applied at both
//! workflow- and (by callers embedding the same shape on a tool) tool-
//! granularity, note that they share one validator.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub given: Vec<String>,
    #[serde(default)]
    pub when: Vec<String>,
    pub then: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BddSpecification {
    pub feature: String,
    pub scenarios: Vec<Scenario>,
    /// Strict mode marks the workflow failed if any scenario fails
    /// ("Behavioral validation is advisory by default; strict
    /// mode marks the workflow failed if any scenario fails").
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario: String,
    pub passed: bool,
    pub failures: Vec<String>,
}

static AT_LEAST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?P<path>\S+)\s+should be at least\s+(?P<value>-?\d+(\.\d+)?)$").unwrap());
static LESS_THAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?P<path>\S+)\s+should be less than\s+(?P<value>-?\d+(\.\d+)?)$").unwrap());
static CONTAINS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^(?P<path>\S+)\s+should contain\s+['"](?P<value>.*)['"]$"#).unwrap());
static PRODUCED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?P<path>\S+)\s+should be produced$").unwrap());
static EQUALS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^(?P<path>\S+)\s+should (?:be|equal)\s+['"](?P<value>.*)['"]$"#).unwrap());

/// Resolve a dotted path like `outputs.word_count` or `metadata.steps.a.duration_ms`
/// against the evaluation context.
fn resolve<'a>(context: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = context;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn as_f64(value: &serde_json::Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn as_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Evaluate one `then` assertion line against the evaluation context.
/// `context` is expected to be `{"inputs": ..., "outputs": ..., "metadata": ...}`.
pub fn evaluate_assertion(context: &serde_json::Value, assertion: &str) -> Result<(), String> {
    let assertion = assertion.trim();

    if let Some(caps) = AT_LEAST.captures(assertion) {
        let path = &caps["path"];
        let expected: f64 = caps["value"].parse().unwrap();
        let actual = resolve(context, path).and_then(as_f64).ok_or_else(|| format!("'{path}' is not numeric or missing"))?;
        return if actual >= expected { Ok(()) } else { Err(format!("'{path}' = {actual}, expected at least {expected}")) };
    }
    if let Some(caps) = LESS_THAN.captures(assertion) {
        let path = &caps["path"];
        let expected: f64 = caps["value"].parse().unwrap();
        let actual = resolve(context, path).and_then(as_f64).ok_or_else(|| format!("'{path}' is not numeric or missing"))?;
        return if actual < expected { Ok(()) } else { Err(format!("'{path}' = {actual}, expected less than {expected}")) };
    }
    if let Some(caps) = CONTAINS.captures(assertion) {
        let path = &caps["path"];
        let expected = &caps["value"];
        let actual = resolve(context, path).map(as_text).ok_or_else(|| format!("'{path}' is missing"))?;
        return if actual.contains(expected) { Ok(()) } else { Err(format!("'{path}' did not contain '{expected}'")) };
    }
    if let Some(caps) = PRODUCED.captures(assertion) {
        let path = &caps["path"];
        return match resolve(context, path) {
            Some(serde_json::Value::Null) | None => Err(format!("'{path}' was not produced")),
            Some(_) => Ok(()),
        };
    }
    if let Some(caps) = EQUALS.captures(assertion) {
        let path = &caps["path"];
        let expected = &caps["value"];
        let actual = resolve(context, path).map(as_text).ok_or_else(|| format!("'{path}' is missing"))?;
        return if actual == expected { Ok(()) } else { Err(format!("'{path}' = '{actual}', expected '{expected}'")) };
    }

    Err(format!("unrecognized assertion pattern: '{assertion}'"))
}

pub fn evaluate_scenario(context: &serde_json::Value, scenario: &Scenario) -> ScenarioResult {
    let mut failures = Vec::new();
    for assertion in &scenario.then {
        if let Err(reason) = evaluate_assertion(context, assertion) {
            failures.push(reason);
        }
    }
    ScenarioResult { scenario: scenario.name.clone(), passed: failures.is_empty(), failures }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> serde_json::Value {
        json!({
            "inputs": {"topic": "rust"},
            "outputs": {"word_count": 150, "summary": "a guide to rust ownership", "language": "english"},
            "metadata": {}
        })
    }

    #[test]
    fn at_least_passes_and_fails() {
        assert!(evaluate_assertion(&ctx, "outputs.word_count should be at least 100").is_ok());
        assert!(evaluate_assertion(&ctx, "outputs.word_count should be at least 1000").is_err());
    }

    #[test]
    fn contains_checks_substring() {
        assert!(evaluate_assertion(&ctx, "outputs.summary should contain 'rust'").is_ok());
        assert!(evaluate_assertion(&ctx, "outputs.summary should contain 'python'").is_err());
    }

    #[test]
    fn produced_checks_presence() {
        assert!(evaluate_assertion(&ctx, "outputs.summary should be produced").is_ok());
        assert!(evaluate_assertion(&ctx, "outputs.missing should be produced").is_err());
    }

    #[test]
    fn equality_checks_exact_match() {
        assert!(evaluate_assertion(&ctx, "outputs.language should be 'english'").is_ok());
        assert!(evaluate_assertion(&ctx, "outputs.language should be 'french'").is_err());
    }

    #[test]
    fn scenario_aggregates_failures() {
        let scenario = Scenario {
            name: "s1".into(),
            given: vec![],
            when: vec![],
            then: vec!["outputs.word_count should be at least 100".into(), "outputs.word_count should be less than 50".into()],
        };
        let result = evaluate_scenario(&ctx, &scenario);
        assert!(!result.passed);
        assert_eq!(result.failures.len(), 1);
    }
}
