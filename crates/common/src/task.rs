use serde::{Deserialize, Serialize};

/// Task record as produced by the analysis pipeline.
///
/// Only the fields the node clients read are modelled; the record is
/// validated upstream before a task is ever scheduled.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub analysis_id: String,
    pub kind: String,
    pub number: u32,
    pub platform: String,
    #[serde(default)]
    pub os_version: String,
    #[serde(default)]
    pub machine_tags: Vec<String>,
    #[serde(default)]
    pub machine: String,
}

impl Task {
    pub fn new(id: impl Into<String>, analysis_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            analysis_id: analysis_id.into(),
            kind: "standard".to_string(),
            number: 1,
            platform: String::new(),
            os_version: String::new(),
            machine_tags: Vec::new(),
            machine: String::new(),
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }
}

/// Errors collected for a single task.
///
/// `fatal` entries are what made the task fail; `errors` are informational.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Errors {
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub fatal: Vec<String>,
}

impl Errors {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.fatal.is_empty()
    }

    pub fn merge(&mut self, other: Errors) {
        self.errors.extend(other.errors);
        self.fatal.extend(other.fatal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_optional_fields_default_when_absent() {
        let raw = r#"{
            "id": "20240101-ABCDEF_1",
            "analysis_id": "20240101-ABCDEF",
            "kind": "standard",
            "number": 1,
            "platform": "windows"
        }"#;
        let task: Task = serde_json::from_str(raw).unwrap();
        assert_eq!(task.analysis_id, "20240101-ABCDEF");
        assert!(task.machine.is_empty());
        assert!(task.machine_tags.is_empty());
    }

    #[test]
    fn merge_keeps_both_sides() {
        let mut left = Errors {
            errors: vec!["slow start".into()],
            fatal: vec![],
        };
        left.merge(Errors {
            errors: vec![],
            fatal: vec!["upload failed".into()],
        });
        assert_eq!(left.errors, vec!["slow start"]);
        assert_eq!(left.fatal, vec!["upload failed"]);
        assert!(!left.is_empty());
    }
}
