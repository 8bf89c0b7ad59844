use std::io::Write;

use anyhow::{anyhow, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::config::CONFIG;
use crate::llm::media::load_media;
use crate::llm::{stream_chat, upload_media_files, ChatMessage, ChatOptions, ChatRole, UploadedFile};
use crate::utils::api_errors::format_error_with_retry;
use crate::utils::telegram::send_text_log;
use crate::utils::timing::{complete_command_timer, start_command_timer};

const CHAT_LOG_TITLE: &str = "💬 Gemini Chat";
const THINKING_LEVELS: [&str; 2] = ["low", "high"];

#[derive(Debug, Clone)]
pub struct ChatArgs {
    pub model: Option<String>,
    pub thinking_level: String,
    pub temperature: f32,
    pub attachments: Vec<String>,
}

impl Default for ChatArgs {
    fn default() -> Self {
        ChatArgs {
            model: None,
            thinking_level: "low".to_string(),
            temperature: 0.7,
            attachments: Vec::new(),
        }
    }
}

/// Conversation history. A turn is opened with the user's message and either
/// completed with the reply or aborted, which removes the user's message again.
#[derive(Debug, Default)]
pub struct ChatSession {
    history: Vec<ChatMessage>,
    pending_attachments: Vec<UploadedFile>,
}

impl ChatSession {
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn attach(&mut self, files: Vec<UploadedFile>) {
        self.pending_attachments.extend(files);
    }

    /// Queued attachments ride on the next user message.
    pub fn begin_turn(&mut self, text: &str) {
        self.history.push(ChatMessage {
            role: ChatRole::User,
            content: text.to_string(),
            attachments: std::mem::take(&mut self.pending_attachments),
        });
    }

    pub fn complete_turn(&mut self, reply: String) {
        self.history.push(ChatMessage {
            role: ChatRole::Model,
            content: reply,
            attachments: Vec::new(),
        });
    }

    /// Drops the unanswered user message. Its attachments go back in the
    /// queue so a retry still carries them.
    pub fn abort_turn(&mut self) {
        if matches!(self.history.last(), Some(message) if message.role == ChatRole::User) {
            if let Some(message) = self.history.pop() {
                self.pending_attachments = message.attachments;
            }
        }
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.pending_attachments.clear();
    }
}

pub(crate) fn audit_text(user: &str, reply: &str) -> String {
    format!("User: {user}\n\nAssistant: {reply}")
}

async fn upload_paths(paths: &[String]) -> Result<Vec<UploadedFile>> {
    let mut files = Vec::new();
    for path in paths {
        files.push(load_media(path, "application/octet-stream").await?);
    }
    upload_media_files(&files).await
}

fn prompt_user() {
    print!("you> ");
    let _ = std::io::stdout().flush();
}

pub async fn chat_command(args: ChatArgs) -> Result<()> {
    CONFIG.require_gemini_api_key()?;
    let thinking_level = args.thinking_level.to_ascii_lowercase();
    if !THINKING_LEVELS.contains(&thinking_level.as_str()) {
        return Err(anyhow!("Thinking level must be low or high"));
    }
    if !(0.0..=2.0).contains(&args.temperature) {
        return Err(anyhow!("Temperature must be between 0.0 and 2.0"));
    }

    let model = args.model.clone().unwrap_or_else(|| CONFIG.chat_model.clone());
    let options = ChatOptions {
        thinking_level,
        temperature: args.temperature,
        max_output_tokens: CONFIG.chat_max_output_tokens,
    };
    let mut session = ChatSession::default();
    if !args.attachments.is_empty() {
        session.attach(upload_paths(&args.attachments).await?);
    }

    println!("Chatting with {model}. Commands: /attach <path>, /clear, /exit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt_user();

    while let Some(line) = lines.next_line().await? {
        let text = line.trim().to_string();
        if text.is_empty() {
            prompt_user();
            continue;
        }
        if text == "/exit" || text == "/quit" {
            break;
        }
        if text == "/clear" {
            session.clear();
            println!("History cleared.");
            prompt_user();
            continue;
        }
        if let Some(path) = text.strip_prefix("/attach ") {
            match upload_paths(&[path.trim().to_string()]).await {
                Ok(files) => {
                    println!("Attached {} file(s) to your next message.", files.len());
                    session.attach(files);
                }
                Err(err) => eprintln!("{}", format_error_with_retry(&err.to_string(), "the upload")),
            }
            prompt_user();
            continue;
        }

        run_turn(&mut session, &model, &options, &text).await;
        prompt_user();
    }

    info!("Chat ended after {} messages", session.history().len());
    Ok(())
}

async fn run_turn(session: &mut ChatSession, model: &str, options: &ChatOptions, text: &str) {
    let mut timer = start_command_timer("chat", Some(text));
    session.begin_turn(text);

    print!("gemini> ");
    let _ = std::io::stdout().flush();
    let outcome = tokio::select! {
        result = stream_chat(model, session.history(), options, |chunk| {
            print!("{chunk}");
            let _ = std::io::stdout().flush();
        }) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    println!();

    match outcome {
        Some(Ok(reply)) if !reply.trim().is_empty() => {
            session.complete_turn(reply.clone());
            complete_command_timer(&mut timer, "success", None);
            send_text_log(&audit_text(text, &reply), Some(CHAT_LOG_TITLE)).await;
        }
        Some(Ok(_)) => {
            session.abort_turn();
            warn!("Chat reply was empty");
            eprintln!("The model returned an empty reply. Try rephrasing.");
            complete_command_timer(&mut timer, "error", Some("empty_reply".to_string()));
        }
        Some(Err(err)) => {
            session.abort_turn();
            eprintln!("{}", format_error_with_retry(&err.to_string(), "your message"));
            complete_command_timer(&mut timer, "error", Some("stream_failed".to_string()));
        }
        None => {
            session.abort_turn();
            eprintln!("Reply cancelled.");
            complete_command_timer(&mut timer, "aborted", None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> UploadedFile {
        UploadedFile {
            display_name: name.to_string(),
            uri: format!("https://files/{name}"),
            mime_type: "application/pdf".to_string(),
        }
    }

    #[test]
    fn completed_turn_alternates_roles_and_consumes_attachments() {
        let mut session = ChatSession::default();
        session.attach(vec![file("brief.pdf")]);
        session.begin_turn("Summarize this");
        session.complete_turn("It is a brief.".to_string());
        session.begin_turn("Thanks");
        session.complete_turn("You're welcome.".to_string());

        let roles: Vec<ChatRole> = session.history().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![ChatRole::User, ChatRole::Model, ChatRole::User, ChatRole::Model]);
        assert_eq!(session.history()[0].attachments.len(), 1);
        assert!(session.history()[2].attachments.is_empty());
    }

    #[test]
    fn aborted_turn_removes_user_message_and_requeues_files() {
        let mut session = ChatSession::default();
        session.begin_turn("first");
        session.complete_turn("reply".to_string());
        session.attach(vec![file("data.pdf")]);
        session.begin_turn("second");
        session.abort_turn();

        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[1].role, ChatRole::Model);

        session.abort_turn();
        assert_eq!(session.history().len(), 2);

        session.begin_turn("second again");
        assert_eq!(session.history()[2].attachments, vec![file("data.pdf")]);
    }

    #[test]
    fn audit_text_pairs_question_and_answer() {
        assert_eq!(audit_text("hi", "hello"), "User: hi\n\nAssistant: hello");
    }
}
