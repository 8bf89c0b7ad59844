use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub gemini_api_key: String,
    pub gemini_api_base_url: String,
    pub gemini_request_timeout_seconds: u64,
    pub research_plan_model: String,
    pub research_agent: String,
    pub research_report_model: String,
    pub infographic_model: String,
    pub research_poll_interval_seconds: u64,
    pub research_timeout_seconds: u64,
    pub image_model: String,
    pub image_compare_models: Vec<String>,
    pub chat_model: String,
    pub chat_max_output_tokens: i32,
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,
    pub session_path: PathBuf,
}

pub static CONFIG: Lazy<Config> = Lazy::new(Config::load);

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_i32(name: &str, default: i32) -> i32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<i32>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_csv(name: &str, default: &str) -> Vec<String> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

fn normalize_base_url(value: String) -> String {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        warn!("GEMINI_API_BASE_URL is empty; using the public endpoint.");
        return "https://generativelanguage.googleapis.com".to_string();
    }
    trimmed.to_string()
}

impl Config {
    pub fn load() -> Self {
        let mut image_compare_models = env_csv(
            "IMAGE_COMPARE_MODELS",
            "gemini-3-pro-image-preview,gemini-2.5-flash-image",
        );
        image_compare_models.dedup();

        Config {
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            gemini_api_key: env_string("GEMINI_API_KEY", ""),
            gemini_api_base_url: normalize_base_url(env_string(
                "GEMINI_API_BASE_URL",
                "https://generativelanguage.googleapis.com",
            )),
            gemini_request_timeout_seconds: env_u64("GEMINI_REQUEST_TIMEOUT_SECONDS", 90).max(1),
            research_plan_model: env_string("RESEARCH_PLAN_MODEL", "gemini-3-flash-preview"),
            research_agent: env_string("RESEARCH_AGENT", "deep-research-pro-preview-12-2025"),
            research_report_model: env_string("RESEARCH_REPORT_MODEL", "gemini-3.1-pro-preview"),
            infographic_model: env_string("INFOGRAPHIC_MODEL", "gemini-3-pro-image-preview"),
            research_poll_interval_seconds: env_u64("RESEARCH_POLL_INTERVAL_SECONDS", 3).max(1),
            research_timeout_seconds: env_u64("RESEARCH_TIMEOUT_SECONDS", 300),
            image_model: env_string("IMAGE_MODEL", "gemini-3-pro-image-preview"),
            image_compare_models,
            chat_model: env_string("CHAT_MODEL", "gemini-3.1-pro-preview"),
            chat_max_output_tokens: env_i32("CHAT_MAX_OUTPUT_TOKENS", 8192),
            telegram_bot_token: env_string("TELEGRAM_BOT_TOKEN", ""),
            telegram_chat_id: env_string("TELEGRAM_CHAT_ID", ""),
            session_path: PathBuf::from(env_string("SESSION_PATH", "research_session.json")),
        }
    }

    pub fn require_gemini_api_key(&self) -> Result<()> {
        if self.gemini_api_key.trim().is_empty() {
            return Err(anyhow!(
                "GEMINI_API_KEY is not set. Export it or add it to .env before calling the model service."
            ));
        }
        Ok(())
    }

    pub fn telegram_audit_enabled(&self) -> bool {
        !self.telegram_bot_token.trim().is_empty() && !self.telegram_chat_id.trim().is_empty()
    }
}

pub const PROMPT_WOMEN: &str = "Keep the facial features of the person in the uploaded image exactly consistent. Dress her in a professional, **fitted black business suit (blazer) with a crisp white blouse**. Background: Place the subject against a clean, solid dark gray studio photography backdrop. The background should have a subtle gradient, slightly lighter behind the subject and darker towards the edges (vignette effect). There should be no other objects. Photography Style: Shot on a Sony A7III with an 85mm f/1.4 lens, creating a flattering portrait compression. Lighting: Use a classic three-point lighting setup. The main key light should create soft, defining shadows on the face. A subtle rim light should separate the subject's shoulders and hair from the dark background. Crucial Details: Render natural skin texture with visible pores, not an airbrushed look. Add natural catchlights to the eyes. The fabric of the suit should show a subtle wool texture. Final image should be an ultra-realistic, 8k professional headshot.";

pub const PROMPT_MEN: &str = "Keep the facial features of the person in the uploaded image exactly consistent. Dress them in a professional black business suit with a white shirt and a tie, similar to the reference image. Background: Place the subject against a clean, solid dark gray studio photography backdrop. The background should have a subtle gradient, slightly lighter behind the subject and darker towards the edges (vignette effect). There should be no other objects. Photography Style: Shot on a Sony A7III with an 85mm f/1.4 lens, creating a flattering portrait compression. Lighting: Use a classic three-point lighting setup. The main key light should create soft, defining shadows on the face. A subtle rim light should separate the subject's shoulders and hair from the dark background. Crucial Details: Render natural skin texture with visible pores, not an airbrushed look. Add natural catchlights to the eyes. The fabric of the suit should show a subtle wool texture. Final image should be an ultra-realistic, 8k professional headshot.";

pub const PROMPT_CUSTOM: &str = "Describe in detail what you want to generate. You can specify style, composition, colors, atmosphere and other details.";

pub const PROMPT_SLIDE: &str = r#"You are a Corporate Presentation Expert. Your task is to transform user-provided raw data into a professional corporate presentation slide.

Apply the following system configuration strictly:

{
  "system_config": {
    "role": "Corporate Presentation Expert",
    "output_language": "English (Level: Intermediate B1/B2)",
    "style_override": "STRICT: Ignore any user-provided formatting, fonts, or colors. Apply only the corporate identity.",
    "core_branding": {
      "marking": "Confidential",
      "color_palette": {
        "primary_turquoise": "Headers, shapes, plates",
        "accent_orange": "Numbers, percentages, key data points"
      },
      "navigation": "Every slide must have a number and a thesis-driven header."
    },
    "layout_rules": {
      "insight_requirement": "Mandatory analytical conclusion at the bottom of each slide.",
      "plan_compensation": "If Plan < 100%, must state: 'Will be compensated in [Month]'.",
      "visual_elements": "Use graphical schemes for processes and department-specific icons."
    },
    "department_logic": {
      "sales": {
        "metrics": ["Product Name", "Sales", "GR%", "EI", "MS%"],
        "charts": "Actual vs Plan LBE",
        "periods": ["Month", "MQT", "YTD", "MAT"]
      },
      "marketing": {
        "focus": "Product lines, Market Share",
        "visuals": "Digital Marketing icons, infographics",
        "messaging": "Leadership in specific segments"
      },
      "medical_rd": {
        "content": "Active ingredients, dosages, chemical formulas",
        "visuals": "Anatomical schemes, lab elements"
      },
      "hr_corporate": {
        "content": "Training progress, Jan-Dec timeline",
        "visuals": "Teamwork/Education icons"
      }
    }
  }
}

Output the slide using this exact structure:

[Slide Number] Slide [N]
[Header] [Thesis-driven header in English]
[Body] [Formatted content: table, bulleted list, or structured schema]
[Footer Left] Confidential
[Insight] Insight: [One-sentence analytical conclusion]

User Raw Data:
{{user_input}}

Identify the department from the data above, then transform it into a complete professional slide following all configuration guidelines. Ensure English is clear and concise (B1/B2 level)."#;

pub const RESEARCH_PLAN_PROMPT: &str =
    "Create a numbered research plan for: {goal}\n\nFormat: 1. [Task] - [Details]\n\nInclude 5-8 specific tasks.";

pub const RESEARCH_TASKS_PROMPT: &str = "Research these tasks thoroughly with sources:\n\n";

pub const RESEARCH_REPORT_PROMPT: &str =
    "Create executive report with Summary, Findings, Recommendations, Risks:\n\n";

pub const INFOGRAPHIC_PROMPT: &str =
    "Create a whiteboard summary infographic for the following: ";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_loses_trailing_slash_and_falls_back_when_blank() {
        assert_eq!(
            normalize_base_url("https://proxy.example/".to_string()),
            "https://proxy.example"
        );
        assert_eq!(
            normalize_base_url("   ".to_string()),
            "https://generativelanguage.googleapis.com"
        );
    }

    #[test]
    fn prompt_templates_carry_their_slots() {
        assert!(RESEARCH_PLAN_PROMPT.contains("{goal}"));
        assert!(PROMPT_SLIDE.contains("{{user_input}}"));
    }
}
