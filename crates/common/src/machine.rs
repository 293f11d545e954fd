use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    Poweroff,
    Running,
    Paused,
    Error,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A single analysis machine offered by a node.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Machine {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub ip: String,
    pub platform: String,
    #[serde(default)]
    pub os_version: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub state: MachineState,
    #[serde(default)]
    pub locked_by: Option<String>,
    #[serde(default)]
    pub reserved: bool,
}

impl Machine {
    pub fn new(name: impl Into<String>, platform: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            ip: String::new(),
            platform: platform.into(),
            os_version: String::new(),
            tags: Vec::new(),
            state: MachineState::Poweroff,
            locked_by: None,
            reserved: false,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// True when every requested tag is present on this machine.
    pub fn has_tags(&self, wanted: &[String]) -> bool {
        wanted.iter().all(|tag| self.tags.iter().any(|t| t == tag))
    }
}
