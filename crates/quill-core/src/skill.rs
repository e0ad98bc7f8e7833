use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An atomic unit of work the skill executor can run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    #[serde(flatten)]
    pub kind: SkillKind,
    pub desc: String,
    #[serde(default)]
    pub status: SkillStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// The closed set of skill types, each with typed arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkillKind {
    SearchWeb { query: String, purpose: String },
    WriteText { instruction: String },
    GenerateImage { prompt: String, placement: String },
    CreateChart { chart_type: String, instruction: String },
    CreateUi { instruction: String },
}

impl SkillKind {
    pub fn name(&self) -> &'static str {
        match self {
            SkillKind::SearchWeb { .. } => "search_web",
            SkillKind::WriteText { .. } => "write_text",
            SkillKind::GenerateImage { .. } => "generate_image",
            SkillKind::CreateChart { .. } => "create_chart",
            SkillKind::CreateUi { .. } => "create_ui",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillStatus {
    #[default]
    Pending,
    Running,
    Completed,
}

impl Skill {
    pub fn new(id: impl Into<String>, kind: SkillKind, desc: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            desc: desc.into(),
            status: SkillStatus::Pending,
            result: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skill_kind_serializes_tagged() {
        let skill = Skill::new(
            "s1",
            SkillKind::SearchWeb {
                query: "rust async".into(),
                purpose: "background".into(),
            },
            "research the topic",
        );
        let value = serde_json::to_value(&skill).unwrap();
        assert_eq!(value["kind"], "search_web");
        assert_eq!(value["query"], "rust async");
        assert_eq!(value["status"], "pending");
    }

    #[test]
    fn status_defaults_to_pending_on_deserialize() {
        let skill: Skill = serde_json::from_str(
            r#"{"id":"s1","kind":"write_text","instruction":"intro","desc":"write intro"}"#,
        )
        .unwrap();
        assert_eq!(skill.status, SkillStatus::Pending);
        assert!(matches!(skill.kind, SkillKind::WriteText { .. }));
    }
}
