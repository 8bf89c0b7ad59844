//! Client for the stateful Interactions API.
//!
//! An interaction is a stored model or agent turn that later turns can chain
//! onto by id. Long agent runs are started in the background and observed by
//! fetching the interaction until its status leaves the running states.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::llm::gemini::{
    api_url, generate_one_shot, get_json, post_json, truncate_for_log, OutputSegment,
};
use crate::utils::timing::log_llm_timing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionTool {
    GoogleSearch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateInteraction {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent: Option<String>,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_interaction_id: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub background: bool,
    pub store: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<InteractionTool>,
}

impl CreateInteraction {
    pub fn for_model(model: &str, input: impl Into<String>) -> Self {
        Self::new(Some(model.to_string()), None, input.into())
    }

    pub fn for_agent(agent: &str, input: impl Into<String>) -> Self {
        Self::new(None, Some(agent.to_string()), input.into())
    }

    fn new(model: Option<String>, agent: Option<String>, input: String) -> Self {
        CreateInteraction {
            model,
            agent,
            input,
            previous_interaction_id: None,
            background: false,
            store: true,
            tools: Vec::new(),
        }
    }

    pub fn chained_to(mut self, previous_id: &str) -> Self {
        self.previous_interaction_id = Some(previous_id.to_string());
        self
    }

    pub fn in_background(mut self) -> Self {
        self.background = true;
        self
    }

    pub fn with_tool(mut self, tool: InteractionTool) -> Self {
        self.tools.push(tool);
        self
    }

    /// The model or agent this turn is addressed to.
    pub fn target(&self) -> &str {
        self.model
            .as_deref()
            .or(self.agent.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Unknown(String),
}

impl InteractionStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" => InteractionStatus::Pending,
            "in_progress" | "processing" | "running" => InteractionStatus::InProgress,
            "completed" | "succeeded" => InteractionStatus::Completed,
            "failed" => InteractionStatus::Failed,
            "cancelled" | "canceled" => InteractionStatus::Cancelled,
            _ => InteractionStatus::Unknown(raw.to_string()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self,
            InteractionStatus::Pending | InteractionStatus::InProgress
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            InteractionStatus::Pending => "pending",
            InteractionStatus::InProgress => "in_progress",
            InteractionStatus::Completed => "completed",
            InteractionStatus::Failed => "failed",
            InteractionStatus::Cancelled => "cancelled",
            InteractionStatus::Unknown(raw) => raw,
        }
    }
}

impl std::fmt::Display for InteractionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub id: String,
    pub status: InteractionStatus,
    pub outputs: Vec<OutputSegment>,
    pub error: Option<String>,
}

impl Interaction {
    /// Non-blank text outputs, newline-separated.
    pub fn text(&self) -> String {
        crate::llm::gemini::join_text(&self.outputs)
    }
}

#[derive(Debug, Deserialize)]
struct RawInteraction {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    outputs: Option<Vec<RawOutput>>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawOutput {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    data: Option<String>,
    #[serde(default, alias = "mimeType")]
    mime_type: Option<String>,
}

impl RawOutput {
    fn into_segment(self) -> OutputSegment {
        match (self.kind.as_deref(), self.text, self.data) {
            (Some("text") | None, Some(text), _) => OutputSegment::Text(text),
            (Some("image"), _, Some(data)) => OutputSegment::decode_image(
                self.mime_type.as_deref().unwrap_or("image/png"),
                &data,
            ),
            _ => OutputSegment::Unknown,
        }
    }
}

fn error_message(error: Value) -> Option<String> {
    match error {
        Value::Null => None,
        Value::String(message) => Some(message),
        other => Some(
            other
                .get("message")
                .and_then(|value| value.as_str())
                .map(|value| value.to_string())
                .unwrap_or_else(|| truncate_for_log(&other.to_string(), 500)),
        ),
    }
}

impl From<RawInteraction> for Interaction {
    fn from(raw: RawInteraction) -> Self {
        Interaction {
            id: raw.id,
            status: InteractionStatus::parse(raw.status.as_deref().unwrap_or("unknown")),
            outputs: raw
                .outputs
                .unwrap_or_default()
                .into_iter()
                .map(RawOutput::into_segment)
                .collect(),
            error: raw.error.and_then(error_message),
        }
    }
}

pub(crate) fn decode_interaction(value: Value) -> Result<Interaction> {
    let raw: RawInteraction = serde_json::from_value(value)?;
    Ok(raw.into())
}

/// Remote operations the research workflow depends on.
#[async_trait]
pub trait InteractionBackend: Send + Sync {
    async fn create(&self, request: CreateInteraction) -> Result<Interaction>;

    async fn get(&self, id: &str) -> Result<Interaction>;

    /// Stateless one-shot generation, used for image output.
    async fn generate(&self, model: &str, prompt: &str) -> Result<Vec<OutputSegment>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GeminiInteractions;

#[async_trait]
impl InteractionBackend for GeminiInteractions {
    async fn create(&self, request: CreateInteraction) -> Result<Interaction> {
        let payload = serde_json::to_value(&request)?;
        let metadata = json!({
            "background": request.background,
            "chained": request.previous_interaction_id.is_some(),
        });
        let target = request.target().to_string();
        log_llm_timing("gemini", &target, "create_interaction", Some(metadata), || async {
            let value: Value = post_json("interaction create", &api_url("interactions"), &payload).await?;
            decode_interaction(value)
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Interaction> {
        let value: Value = get_json("interaction fetch", &api_url(&format!("interactions/{id}"))).await?;
        decode_interaction(value)
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<Vec<OutputSegment>> {
        generate_one_shot(model, prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_serializes_only_set_fields() {
        let plan = CreateInteraction::for_model("plan-model", "Create a plan")
            .with_tool(InteractionTool::GoogleSearch);
        let value = serde_json::to_value(&plan).expect("serializes");
        assert_eq!(
            value,
            json!({
                "model": "plan-model",
                "input": "Create a plan",
                "store": true,
                "tools": [{ "type": "google_search" }]
            })
        );

        let research = CreateInteraction::for_agent("deep-agent", "Research")
            .chained_to("plan-1")
            .in_background();
        let value = serde_json::to_value(&research).expect("serializes");
        assert_eq!(value["agent"], json!("deep-agent"));
        assert_eq!(value["previous_interaction_id"], json!("plan-1"));
        assert_eq!(value["background"], json!(true));
        assert!(value.get("model").is_none());
        assert_eq!(research.target(), "deep-agent");
    }

    #[test]
    fn status_parsing_covers_running_and_unknown_values() {
        assert!(InteractionStatus::parse("pending").is_running());
        assert!(InteractionStatus::parse("IN_PROGRESS").is_running());
        assert!(InteractionStatus::parse("processing").is_running());
        assert!(!InteractionStatus::parse("completed").is_running());
        assert_eq!(
            InteractionStatus::parse("requires_action"),
            InteractionStatus::Unknown("requires_action".to_string())
        );
        assert!(!InteractionStatus::parse("requires_action").is_running());
    }

    #[test]
    fn decodes_outputs_and_error_shapes() {
        let interaction = decode_interaction(json!({
            "id": "res-9",
            "status": "failed",
            "outputs": [
                { "type": "thought", "summary": "..." },
                { "type": "text", "text": "partial" },
                { "text": "untyped" }
            ],
            "error": { "code": 13, "message": "agent crashed" }
        }))
        .expect("decodes");

        assert_eq!(interaction.status, InteractionStatus::Failed);
        assert_eq!(interaction.outputs[0], OutputSegment::Unknown);
        assert_eq!(interaction.text(), "partial\nuntyped");
        assert_eq!(interaction.error.as_deref(), Some("agent crashed"));

        let plain = decode_interaction(json!({ "id": "x", "status": "failed", "error": "quota" }))
            .expect("decodes");
        assert_eq!(plain.error.as_deref(), Some("quota"));
        assert!(plain.outputs.is_empty());
    }
}
