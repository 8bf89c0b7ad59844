use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// The list number exactly as the planner wrote it.
    pub ordinal: String,
    pub description: String,
    #[serde(default = "default_selected")]
    pub selected: bool,
}

fn default_selected() -> bool {
    true
}

impl Task {
    pub fn new(ordinal: impl Into<String>, description: impl Into<String>) -> Self {
        Task {
            ordinal: ordinal.into(),
            description: description.into(),
            selected: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Planned,
    Researching,
    Researched,
    Reported,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Idle => "idle",
            Phase::Planned => "planned",
            Phase::Researching => "researching",
            Phase::Researched => "researched",
            Phase::Reported => "reported",
        };
        f.write_str(label)
    }
}

/// One research effort. Fields fill strictly left to right; the phase is
/// always derived from which of them are present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchSession {
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub plan_text: Option<String>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub research_id: Option<String>,
    #[serde(default)]
    pub research_text: Option<String>,
    #[serde(default)]
    pub report_text: Option<String>,
    #[serde(default, with = "base64_bytes")]
    pub infographic: Option<Vec<u8>>,
}

impl ResearchSession {
    pub fn phase(&self) -> Phase {
        if self.report_text.is_some() {
            Phase::Reported
        } else if self.research_text.is_some() {
            Phase::Researched
        } else if self.research_id.is_some() {
            Phase::Researching
        } else if self.plan_id.is_some() {
            Phase::Planned
        } else {
            Phase::Idle
        }
    }

    pub fn reset(&mut self) {
        *self = ResearchSession::default();
    }

    /// Drops everything produced after the plan.
    pub(crate) fn clear_downstream(&mut self) {
        self.research_id = None;
        self.research_text = None;
        self.report_text = None;
        self.infographic = None;
    }

    /// Marks exactly the tasks whose ordinal is listed. Returns the ordinals
    /// that matched no task.
    pub fn set_selection(&mut self, ordinals: &[String]) -> Vec<String> {
        let wanted: HashSet<&str> = ordinals.iter().map(|ordinal| ordinal.trim()).collect();
        for task in &mut self.tasks {
            task.selected = wanted.contains(task.ordinal.as_str());
        }
        let known: HashSet<&str> = self.tasks.iter().map(|task| task.ordinal.as_str()).collect();
        wanted
            .into_iter()
            .filter(|ordinal| !known.contains(ordinal))
            .map(|ordinal| ordinal.to_string())
            .collect()
    }

    pub fn select_all(&mut self) {
        for task in &mut self.tasks {
            task.selected = true;
        }
    }

    pub fn selected_tasks(&self) -> Vec<Task> {
        self.tasks.iter().filter(|task| task.selected).cloned().collect()
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&general_purpose::STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        encoded
            .map(|value| general_purpose::STANDARD.decode(value).map_err(serde::de::Error::custom))
            .transpose()
    }
}
