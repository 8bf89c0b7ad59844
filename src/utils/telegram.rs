//! Best-effort audit notifications to a Telegram chat.
//!
//! Nothing here returns an error: a missing credential, network failure or
//! payload rejection is logged and dropped so the result already handed to
//! the user is never affected.

use teloxide::prelude::*;
use teloxide::types::{InputFile, InputMedia, InputMediaPhoto, ParseMode, Recipient};
use teloxide::utils::html;
use tracing::{info, warn};

use crate::config::CONFIG;

const CAPTION_LIMIT: usize = 1024;
const TEXT_LIMIT: usize = 4000;
const TITLE_LIMIT: usize = 200;
const MEDIA_GROUP_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct SourceImage {
    pub name: String,
    pub bytes: Vec<u8>,
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let kept: String = text.chars().take(limit.saturating_sub(3)).collect();
    format!("{kept}...")
}

fn parse_recipient(raw: &str) -> Recipient {
    let trimmed = raw.trim();
    match trimmed.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) => Recipient::ChannelUsername(trimmed.to_string()),
    }
}

fn audit_target() -> Option<(Bot, Recipient)> {
    if !CONFIG.telegram_audit_enabled() {
        warn!("TELEGRAM_BOT_TOKEN or TELEGRAM_CHAT_ID not set, skipping audit log");
        return None;
    }
    Some((
        Bot::new(CONFIG.telegram_bot_token.clone()),
        parse_recipient(&CONFIG.telegram_chat_id),
    ))
}

fn source_caption(sources: &[SourceImage]) -> String {
    let mut caption = "📸 Source images".to_string();
    for source in sources {
        caption.push_str(&format!("\n- {}", source.name));
    }
    truncate_chars(&caption, CAPTION_LIMIT)
}

fn generated_caption(prompt: &str, has_sources: bool) -> String {
    let mut caption = format!("🎨 Generated image\n\nPrompt:\n{prompt}");
    if !has_sources {
        caption = format!("⚠️ No references\n\n{caption}");
    }
    truncate_chars(&caption, CAPTION_LIMIT)
}

/// Escapes before measuring and cuts on raw characters, so an entity such as
/// `&amp;` is never split by the length cap.
fn build_text_message(text: &str, title: Option<&str>) -> String {
    let header = title
        .map(|title| format!("<b>{}</b>\n\n", html::escape(&truncate_chars(title, TITLE_LIMIT))))
        .unwrap_or_default();
    let header_len = header.chars().count();
    let body = html::escape(text);
    if header_len + body.chars().count() <= TEXT_LIMIT {
        return format!("{header}{body}");
    }

    let budget = TEXT_LIMIT.saturating_sub(header_len + 3);
    let mut kept = String::new();
    let mut used = 0;
    let mut buffer = [0u8; 4];
    for ch in text.chars() {
        let escaped = html::escape(ch.encode_utf8(&mut buffer));
        let width = escaped.chars().count();
        if used + width > budget {
            break;
        }
        used += width;
        kept.push_str(&escaped);
    }
    format!("{header}{kept}...")
}

fn build_media_group(sources: &[SourceImage], generated: &[u8], prompt: &str) -> Vec<InputMedia> {
    let mut media = Vec::new();
    for (index, source) in sources.iter().enumerate() {
        if source.bytes.is_empty() {
            warn!("Skipping empty source image {}", source.name);
            continue;
        }
        let mut photo = InputMediaPhoto::new(InputFile::memory(source.bytes.clone()));
        if index == 0 {
            photo = photo.caption(source_caption(sources));
        }
        media.push(InputMedia::Photo(photo));
    }
    // The generated image must survive the group size cap.
    media.truncate(MEDIA_GROUP_LIMIT - 1);
    media.push(InputMedia::Photo(
        InputMediaPhoto::new(InputFile::memory(generated.to_vec()))
            .caption(generated_caption(prompt, !sources.is_empty())),
    ));
    media
}

pub async fn send_image_log(sources: &[SourceImage], generated: &[u8], prompt: &str) {
    if generated.is_empty() {
        warn!("Generated image is empty, skipping audit log");
        return;
    }
    let Some((bot, recipient)) = audit_target() else {
        return;
    };

    let result = if sources.iter().any(|source| !source.bytes.is_empty()) {
        let media = build_media_group(sources, generated, prompt);
        let count = media.len();
        bot.send_media_group(recipient, media)
            .await
            .map(|_| info!("Sent {} images to the audit chat", count))
    } else {
        bot.send_photo(recipient, InputFile::memory(generated.to_vec()))
            .caption(generated_caption(prompt, false))
            .await
            .map(|_| info!("Sent generated image to the audit chat"))
    };

    if let Err(err) = result {
        warn!("Audit image log failed: {err}");
    }
}

pub async fn send_text_log(text: &str, title: Option<&str>) {
    let Some((bot, recipient)) = audit_target() else {
        return;
    };

    let message = build_text_message(text, title);
    match bot
        .send_message(recipient, message)
        .parse_mode(ParseMode::Html)
        .await
    {
        Ok(_) => info!("Sent text log to the audit chat"),
        Err(err) => warn!("Audit text log failed: {err}"),
    }
}
