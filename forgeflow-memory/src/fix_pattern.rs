//! Fix patterns and their visibility scope (Fix Pattern, §4.4/§4.10).

use serde::{Deserialize, Serialize};

/// How broadly a fix pattern applies, from narrowest to widest. Narrower
/// scopes are checked first ("a fix scoped to a
/// single tool must never be applied outside it").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Tool,
    ToolSubtools,
    Hierarchy,
    Global,
}

impl Scope {
    /// Whether a pattern recorded for `recorded_in` (this scope, anchored
    /// at `anchor`) is visible to a failure occurring at `target`.
    pub fn visible_to(self, anchor: &str, target: &str) -> bool {
        match self {
            Scope::Tool => anchor == target,
            Scope::ToolSubtools | Scope::Hierarchy => target == anchor || target.starts_with(&format!("{anchor}.")),
            Scope::Global => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixPattern {
    pub pattern_id: String,
    /// Identifier the pattern is anchored at: a tool id, tool-family
    /// prefix, hierarchy root, or ignored for `Scope::Global`.
    pub anchor: String,
    pub scope: Scope,
    pub error_signature: String,
    pub fix_description: String,
    pub fix_content: String,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl FixPattern {
    pub fn new(
        anchor: impl Into<String>,
        scope: Scope,
        error_signature: impl Into<String>,
        fix_description: impl Into<String>,
        fix_content: impl Into<String>,
    ) -> Self {
        Self {
            pattern_id: uuid::Uuid::new_v4().to_string(),
            anchor: anchor.into(),
            scope,
            error_signature: error_signature.into(),
            fix_description: fix_description.into(),
            fix_content: fix_content.into(),
            success_count: 0,
            failure_count: 0,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn success_rate(&self) -> f32 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.5
        } else {
            self.success_count as f32 / total as f32
        }
    }

    pub fn record_outcome(&mut self, succeeded: bool) {
        if succeeded {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_scope_is_not_visible_to_other_tools() {
        let scope = Scope::Tool;
        assert!(scope.visible_to("tool.fetch", "tool.fetch"));
        assert!(!scope.visible_to("tool.fetch", "tool.write"));
    }

    #[test]
    fn hierarchy_scope_covers_descendants() {
        let scope = Scope::Hierarchy;
        assert!(scope.visible_to("tool.fetch", "tool.fetch.retry"));
        assert!(!scope.visible_to("tool.fetch", "tool.write"));
    }

    #[test]
    fn global_scope_is_always_visible() {
        assert!(Scope::Global.visible_to("anything", "tool.write"));
    }

    #[test]
    fn success_rate_defaults_to_half_with_no_history() {
        let pattern = FixPattern::new("tool.fetch", Scope::Tool, "sig", "desc", "content");
        assert_eq!(pattern.success_rate, 0.5);
    }
}
