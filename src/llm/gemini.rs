use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::llm::media::{detect_mime_type, MediaFile, MediaKind};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_llm_timing;

#[derive(Debug, thiserror::Error)]
#[error("Image generation failed: {0}")]
pub struct ImageGenerationError(pub String);

/// One decoded piece of model output. Remote payloads are mapped onto this
/// once, here, so callers never probe loosely-typed JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSegment {
    Text(String),
    Image { mime_type: String, bytes: Vec<u8> },
    Unknown,
}

impl OutputSegment {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            OutputSegment::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&[u8]> {
        match self {
            OutputSegment::Image { bytes, .. } => Some(bytes),
            _ => None,
        }
    }

    pub fn decode_image(mime_type: &str, data: &str) -> Self {
        if !mime_type.starts_with("image/") {
            return OutputSegment::Unknown;
        }
        match general_purpose::STANDARD.decode(data.trim()) {
            Ok(bytes) if !bytes.is_empty() => OutputSegment::Image {
                mime_type: mime_type.to_string(),
                bytes,
            },
            Ok(_) => OutputSegment::Unknown,
            Err(err) => {
                warn!("Dropping image segment with invalid base64 payload: {err}");
                OutputSegment::Unknown
            }
        }
    }
}

/// Non-blank text segments in emission order, newline-separated.
pub fn join_text(segments: &[OutputSegment]) -> String {
    segments
        .iter()
        .filter_map(OutputSegment::as_text)
        .filter(|text| !text.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone)]
pub struct GeminiImageConfig {
    pub aspect_ratio: Option<String>,
    pub image_size: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
        #[serde(default)]
        thought: bool,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    Other(IgnoredAny),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

impl GeminiResponse {
    pub(crate) fn into_segments(self) -> Vec<OutputSegment> {
        let mut segments = Vec::new();
        for candidate in self.candidates.unwrap_or_default() {
            let parts = candidate
                .content
                .and_then(|content| content.parts)
                .unwrap_or_default();
            for part in parts {
                segments.push(match part {
                    GeminiPart::Text { thought: true, .. } => OutputSegment::Unknown,
                    GeminiPart::Text { text, .. } => OutputSegment::Text(text),
                    GeminiPart::InlineData { inline_data } => {
                        OutputSegment::decode_image(&inline_data.mime_type, &inline_data.data)
                    }
                    GeminiPart::Other(_) => OutputSegment::Unknown,
                });
            }
        }
        segments
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiFileInfo {
    name: String,
    uri: String,
    mime_type: Option<String>,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiFileResponse {
    file: GeminiFileInfo,
}

/// A file already stored on the service, referenced by URI in later requests.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct UploadedFile {
    pub display_name: String,
    pub uri: String,
    pub mime_type: String,
}

const GEMINI_MAX_RETRY_ATTEMPTS: usize = 2;
const GEMINI_RETRY_BASE_DELAY_MS: u64 = 900;
const FILE_ACTIVE_POLL_ATTEMPTS: usize = 15;
const FILE_ACTIVE_POLL_INTERVAL: Duration = Duration::from_secs(2);
const STREAM_TIMEOUT: Duration = Duration::from_secs(600);

pub(crate) fn api_url(path: &str) -> String {
    format!("{}/v1beta/{}", CONFIG.gemini_api_base_url, path.trim_start_matches('/'))
}

fn redact_gemini_api_key(text: &str) -> String {
    let key = CONFIG.gemini_api_key.trim();
    if key.is_empty() {
        return text.to_string();
    }
    text.replace(key, "[redacted]")
}

fn gemini_should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn gemini_should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn gemini_retry_delay(attempt: usize) -> Duration {
    let attempt = attempt.max(1) as u64;
    Duration::from_millis(GEMINI_RETRY_BASE_DELAY_MS.saturating_mul(attempt))
}

fn build_image_config(config: Option<&GeminiImageConfig>) -> Option<Value> {
    let config = config?;
    let mut map = Map::new();

    if let Some(aspect_ratio) = config.aspect_ratio.as_deref() {
        let trimmed = aspect_ratio.trim();
        if !trimmed.is_empty() {
            map.insert("aspectRatio".to_string(), json!(trimmed));
        }
    }

    if let Some(image_size) = config.image_size.as_deref() {
        let trimmed = image_size.trim();
        if !trimmed.is_empty() {
            map.insert("imageSize".to_string(), json!(trimmed));
        }
    }

    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

pub(crate) fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_gemini_parts(parts: &[Value]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| {
            if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                json!({ "text": truncate_for_log(text, 200) })
            } else if let Some(inline_data) = part.get("inlineData") {
                let mime_type = inline_data
                    .get("mimeType")
                    .and_then(|value| value.as_str())
                    .unwrap_or("unknown");
                let data_len = inline_data
                    .get("data")
                    .and_then(|value| value.as_str())
                    .map(|value| value.len())
                    .unwrap_or(0);
                json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
            } else if let Some(file_data) = part.get("fileData") {
                let file_uri = file_data
                    .get("fileUri")
                    .and_then(|value| value.as_str())
                    .map(|value| truncate_for_log(value, 200));
                let mime_type = file_data
                    .get("mimeType")
                    .and_then(|value| value.as_str())
                    .map(|value| value.to_string());
                json!({ "fileData": { "fileUri": file_uri, "mimeType": mime_type } })
            } else {
                json!({ "unknownPart": true })
            }
        })
        .collect()
}

pub(crate) fn summarize_gemini_payload(payload: &Value) -> Value {
    let mut summary = Map::new();

    if let Some(contents) = payload.get("contents").and_then(|value| value.as_array()) {
        let mut summarized_contents = Vec::new();
        for content in contents {
            let role = content
                .get("role")
                .and_then(|value| value.as_str())
                .unwrap_or("user");
            let parts = content
                .get("parts")
                .and_then(|value| value.as_array())
                .map(|parts| summarize_gemini_parts(parts))
                .unwrap_or_default();
            summarized_contents.push(json!({ "role": role, "parts": parts }));
        }
        summary.insert("contents".to_string(), Value::Array(summarized_contents));
    }

    if let Some(input) = payload.get("input").and_then(|value| value.as_str()) {
        summary.insert("input".to_string(), json!(truncate_for_log(input, 200)));
    }

    for key in [
        "generationConfig",
        "tools",
        "model",
        "agent",
        "previous_interaction_id",
        "background",
    ] {
        if let Some(value) = payload.get(key) {
            summary.insert(key.to_string(), value.clone());
        }
    }

    if let Some(safety) = payload
        .get("safetySettings")
        .and_then(|value| value.as_array())
    {
        summary.insert("safetySettingsCount".to_string(), json!(safety.len()));
    }

    Value::Object(summary)
}

fn summarize_segments(segments: &[OutputSegment]) -> Value {
    let text_parts = segments.iter().filter(|s| s.as_text().is_some()).count();
    let image_parts = segments.iter().filter(|s| s.as_image().is_some()).count();
    let text_preview = segments
        .iter()
        .filter_map(OutputSegment::as_text)
        .find(|text| !text.trim().is_empty())
        .map(|text| truncate_for_log(text, 200));

    json!({
        "segments": segments.len(),
        "textParts": text_parts,
        "imageParts": image_parts,
        "textPreview": text_preview
    })
}

pub(crate) fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn authorized(builder: RequestBuilder) -> RequestBuilder {
    builder.header("x-goog-api-key", &CONFIG.gemini_api_key)
}

/// Sends the request built by `build`, retrying connect/timeout errors and
/// 408/429/5xx responses. Non-success responses become errors that carry the
/// status and the service's own message.
async fn send_with_retry<F>(operation: &str, build: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        let response = match build().send().await {
            Ok(response) => response,
            Err(err) => {
                let err_text = redact_gemini_api_key(&err.to_string());
                let url = err.url().map(|url| redact_gemini_api_key(url.as_str()));
                let should_retry =
                    gemini_should_retry_error(&err) && attempt < GEMINI_MAX_RETRY_ATTEMPTS;
                warn!(
                    "Gemini {} request failed to send: {} (timeout={}, connect={}, status={:?}, url={:?}, retrying={})",
                    operation,
                    err_text,
                    err.is_timeout(),
                    err.is_connect(),
                    err.status(),
                    url,
                    should_retry
                );
                if should_retry {
                    tokio::time::sleep(gemini_retry_delay(attempt)).await;
                    continue;
                }
                return Err(anyhow!("Gemini {} request failed: {}", operation, err_text));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            let should_retry =
                gemini_should_retry_status(status) && attempt < GEMINI_MAX_RETRY_ATTEMPTS;
            warn!(
                "Gemini {} API error: status={}, body={}, retrying={}",
                operation, status, body_summary, should_retry
            );
            if should_retry {
                tokio::time::sleep(gemini_retry_delay(attempt)).await;
                continue;
            }
            let detail = redact_gemini_api_key(&message.unwrap_or(body_summary));
            return Err(anyhow!(
                "Gemini {} failed with status {}: {}",
                operation,
                status,
                detail
            ));
        }

        return Ok(response);
    }
}

pub(crate) async fn post_json<T: DeserializeOwned>(
    operation: &str,
    url: &str,
    payload: &Value,
) -> Result<T> {
    if tracing::enabled!(tracing::Level::DEBUG) {
        debug!(target: "llm.gemini", operation = operation, payload = %summarize_gemini_payload(payload));
    }
    let client = get_http_client();
    let response = send_with_retry(operation, || authorized(client.post(url)).json(payload)).await?;
    response
        .json::<T>()
        .await
        .with_context(|| format!("Gemini {operation} returned an unreadable response"))
}

pub(crate) async fn get_json<T: DeserializeOwned>(operation: &str, url: &str) -> Result<T> {
    let client = get_http_client();
    let response = send_with_retry(operation, || authorized(client.get(url))).await?;
    response
        .json::<T>()
        .await
        .with_context(|| format!("Gemini {operation} returned an unreadable response"))
}

async fn upload_file_bytes(
    display_name: &str,
    mime_type: &str,
    bytes: &[u8],
) -> Result<GeminiFileInfo> {
    let client = get_http_client();
    let start_url = format!("{}/upload/v1beta/files", CONFIG.gemini_api_base_url);
    let start_response = send_with_retry("file upload start", || {
        authorized(client.post(&start_url))
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header(
                "X-Goog-Upload-Header-Content-Length",
                bytes.len().to_string(),
            )
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": display_name } }))
    })
    .await?;

    let upload_url = start_response
        .headers()
        .get("x-goog-upload-url")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .ok_or_else(|| anyhow!("Gemini file upload did not return an upload URL"))?;

    let finalize_response = send_with_retry("file upload", || {
        client
            .post(&upload_url)
            .header("X-Goog-Upload-Command", "upload, finalize")
            .header("X-Goog-Upload-Offset", "0")
            .header("Content-Length", bytes.len().to_string())
            .body(bytes.to_vec())
    })
    .await?;

    let payload = finalize_response.json::<GeminiFileResponse>().await?;
    Ok(payload.file)
}

async fn get_file_metadata(name: &str) -> Result<GeminiFileInfo> {
    let name = name.trim();
    let name = name.strip_prefix("files/").unwrap_or(name);
    get_json::<GeminiFileInfo>("file metadata fetch", &api_url(&format!("files/{name}"))).await
}

async fn wait_for_file_active(file: GeminiFileInfo) -> Result<GeminiFileInfo> {
    let name = file.name.clone();
    let mut latest = file;

    for _ in 0..FILE_ACTIVE_POLL_ATTEMPTS {
        match latest.state.as_deref().unwrap_or("PROCESSING") {
            "ACTIVE" => return Ok(latest),
            "FAILED" => return Err(anyhow!("Gemini file processing failed for {}", latest.uri)),
            _ => {}
        }

        tokio::time::sleep(FILE_ACTIVE_POLL_INTERVAL).await;
        latest = get_file_metadata(&name).await?;
    }

    Err(anyhow!(
        "Timed out waiting for Gemini file processing for {}",
        name
    ))
}

fn kind_label(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "image",
        MediaKind::Video => "video",
        MediaKind::Audio => "audio",
        MediaKind::Document => "document",
    }
}

pub async fn upload_media_files(files: &[MediaFile]) -> Result<Vec<UploadedFile>> {
    let mut uploaded = Vec::new();

    for (index, file) in files.iter().enumerate() {
        let display_name = file
            .display_name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", kind_label(file.kind), index + 1));
        if file.bytes.is_empty() {
            warn!("Skipping empty media file {}", display_name);
            continue;
        }
        let info = upload_file_bytes(&display_name, &file.mime_type, &file.bytes).await?;
        let info = wait_for_file_active(info).await?;
        let uri = if !info.uri.trim().is_empty() {
            info.uri
        } else if !info.name.trim().is_empty() {
            format!(
                "{}/v1beta/files/{}",
                CONFIG.gemini_api_base_url,
                info.name.trim_start_matches("files/")
            )
        } else {
            warn!("Gemini file upload response missing uri/name for {}", display_name);
            continue;
        };
        uploaded.push(UploadedFile {
            display_name,
            uri,
            mime_type: info.mime_type.unwrap_or_else(|| file.mime_type.clone()),
        });
    }

    Ok(uploaded)
}

fn file_part(file: &UploadedFile) -> Value {
    json!({
        "fileData": {
            "fileUri": file.uri,
            "mimeType": file.mime_type
        }
    })
}

pub(crate) async fn generate_content(model: &str, payload: &Value) -> Result<Vec<OutputSegment>> {
    let url = api_url(&format!("models/{model}:generateContent"));
    let response: GeminiResponse = post_json("generateContent", &url, payload).await?;
    let segments = response.into_segments();
    if tracing::enabled!(tracing::Level::DEBUG) {
        debug!(target: "llm.gemini", model = model, response = %summarize_segments(&segments));
    }
    Ok(segments)
}

/// One-shot call with text and image output enabled.
pub async fn generate_one_shot(model: &str, prompt: &str) -> Result<Vec<OutputSegment>> {
    let payload = json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
    });
    log_llm_timing("gemini", model, "generate_one_shot", None, || async {
        generate_content(model, &payload).await
    })
    .await
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub aspect_ratio: String,
    pub resolution: String,
    pub temperature: f32,
    pub thinking_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub image: Option<Vec<u8>>,
    pub mime_type: Option<String>,
    pub text: String,
}

fn is_flash_model(model: &str) -> bool {
    model.to_lowercase().contains("flash")
}

pub(crate) fn build_image_payload(
    model: &str,
    request: &ImageRequest,
    references: &[UploadedFile],
) -> Value {
    let mut parts: Vec<Value> = references.iter().map(file_part).collect();
    parts.push(json!({ "text": request.prompt }));

    let mut generation_config = json!({
        "responseModalities": ["TEXT", "IMAGE"],
        "temperature": request.temperature.clamp(0.0, 1.0),
    });
    let image_config = build_image_config(Some(&GeminiImageConfig {
        aspect_ratio: Some(request.aspect_ratio.clone()),
        image_size: Some(request.resolution.clone()),
    }));

    let mut payload = json!({
        "contents": [{ "role": "user", "parts": parts }],
    });

    if let Some(config_object) = generation_config.as_object_mut() {
        if let Some(image_config) = image_config {
            config_object.insert("imageConfig".to_string(), image_config);
        }
        if is_flash_model(model) {
            if let Some(level) = request.thinking_level.as_deref() {
                config_object.insert(
                    "thinkingConfig".to_string(),
                    json!({ "thinkingLevel": level, "includeThoughts": false }),
                );
            }
        }
    }

    if let Some(payload_object) = payload.as_object_mut() {
        payload_object.insert("generationConfig".to_string(), generation_config);
        if is_flash_model(model) {
            payload_object.insert(
                "safetySettings".to_string(),
                json!([{ "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_ONLY_HIGH" }]),
            );
        }
    }

    payload
}

/// Thinking models can emit drafts before the final render, so the last
/// image in the response wins.
pub(crate) fn assemble_generated_image(segments: Vec<OutputSegment>) -> GeneratedImage {
    let mut image = None;
    let mut mime_type = None;
    let mut text = String::new();
    for segment in segments {
        match segment {
            OutputSegment::Image {
                mime_type: mime,
                bytes,
            } => {
                image = Some(bytes);
                mime_type = Some(mime);
            }
            OutputSegment::Text(chunk) => text.push_str(&chunk),
            OutputSegment::Unknown => {}
        }
    }
    if mime_type.is_none() {
        mime_type = image.as_deref().and_then(detect_mime_type);
    }
    GeneratedImage {
        image,
        mime_type,
        text,
    }
}

pub async fn generate_image_with_gemini(
    model: &str,
    request: &ImageRequest,
    references: &[UploadedFile],
) -> Result<GeneratedImage, ImageGenerationError> {
    if request.prompt.trim().is_empty() {
        return Err(ImageGenerationError(
            "Prompt is required for image generation.".to_string(),
        ));
    }

    let payload = build_image_payload(model, request, references);
    let metadata = json!({
        "references": references.len(),
        "aspectRatio": request.aspect_ratio,
        "imageSize": request.resolution,
    });
    let segments = log_llm_timing("gemini", model, "generate_image", Some(metadata), || async {
        generate_content(model, &payload).await
    })
    .await
    .map_err(|err| ImageGenerationError(err.to_string()))?;

    Ok(assemble_generated_image(segments))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Debug, Clone, serde::Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<UploadedFile>,
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub thinking_level: String,
    pub temperature: f32,
    pub max_output_tokens: i32,
}

pub(crate) fn build_chat_payload(history: &[ChatMessage], options: &ChatOptions) -> Value {
    let contents: Vec<Value> = history
        .iter()
        .map(|message| {
            let mut parts: Vec<Value> = message.attachments.iter().map(file_part).collect();
            parts.push(json!({ "text": message.content }));
            json!({ "role": message.role, "parts": parts })
        })
        .collect();

    json!({
        "contents": contents,
        "generationConfig": {
            "temperature": options.temperature,
            "maxOutputTokens": options.max_output_tokens,
            "thinkingConfig": { "thinkingLevel": options.thinking_level },
        },
    })
}

/// Text carried by one server-sent event line, if any. Events without
/// candidates or parts (usage trailers, keep-alives) yield `None`.
pub(crate) fn parse_sse_text(line: &str) -> Option<String> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    let response = match serde_json::from_str::<GeminiResponse>(data) {
        Ok(response) => response,
        Err(err) => {
            warn!("Skipping unreadable stream event: {err}");
            return None;
        }
    };
    let text: String = response
        .into_segments()
        .iter()
        .filter_map(OutputSegment::as_text)
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Streams a reply, handing each text chunk to `on_text` as it arrives, and
/// returns the full reply.
pub async fn stream_chat<F>(
    model: &str,
    history: &[ChatMessage],
    options: &ChatOptions,
    on_text: F,
) -> Result<String>
where
    F: FnMut(&str),
{
    let payload = build_chat_payload(history, options);
    let url = api_url(&format!("models/{model}:streamGenerateContent?alt=sse"));
    let client = get_http_client();

    log_llm_timing("gemini", model, "stream_chat", None, move || async move {
        let mut on_text = on_text;
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(target: "llm.gemini", model = model, payload = %summarize_gemini_payload(&payload));
        }
        let mut response = send_with_retry("streamGenerateContent", || {
            authorized(client.post(&url))
                .timeout(STREAM_TIMEOUT)
                .json(&payload)
        })
        .await?;

        let mut buffer: Vec<u8> = Vec::new();
        let mut full = String::new();
        while let Some(chunk) = response.chunk().await? {
            buffer.extend_from_slice(&chunk);
            while let Some(newline) = buffer.iter().position(|byte| *byte == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line);
                if let Some(text) = parse_sse_text(line.trim_end()) {
                    on_text(&text);
                    full.push_str(&text);
                }
            }
        }
        if let Some(text) = parse_sse_text(String::from_utf8_lossy(&buffer).trim_end()) {
            on_text(&text);
            full.push_str(&text);
        }

        Ok(full)
    })
    .await
}
