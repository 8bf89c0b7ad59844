use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use futures_util::future::join_all;
use tracing::{info, warn};

use crate::config::{CONFIG, PROMPT_CUSTOM, PROMPT_MEN, PROMPT_SLIDE, PROMPT_WOMEN};
use crate::llm::gemini::ImageGenerationError;
use crate::llm::media::{load_media, MediaFile, MediaKind};
use crate::llm::{generate_image_with_gemini, upload_media_files, GeneratedImage, ImageRequest};
use crate::utils::api_errors::format_error_with_retry;
use crate::utils::progress::Progress;
use crate::utils::telegram::{send_image_log, SourceImage};
use crate::utils::timing::{complete_command_timer, start_command_timer};

pub const IMAGE_ASPECT_RATIO_OPTIONS: [&str; 5] = ["1:1", "16:9", "9:16", "4:3", "3:4"];
pub const IMAGE_RESOLUTION_OPTIONS: [&str; 3] = ["1K", "2K", "4K"];
const DEFAULT_THINKING_LEVEL: &str = "HIGH";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptPreset {
    Women,
    Men,
    Custom,
    Slide,
}

impl PromptPreset {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "women" => Ok(PromptPreset::Women),
            "men" => Ok(PromptPreset::Men),
            "custom" => Ok(PromptPreset::Custom),
            "slide" => Ok(PromptPreset::Slide),
            other => Err(anyhow!(
                "Unknown preset: {other}. Use women, men, custom or slide."
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageArgs {
    pub prompt: Option<String>,
    pub preset: Option<PromptPreset>,
    pub references: Vec<String>,
    pub aspect_ratio: String,
    pub resolution: String,
    pub temperature: f32,
    pub model: Option<String>,
    pub thinking_level: String,
    pub compare: bool,
    pub out: Option<PathBuf>,
}

impl Default for ImageArgs {
    fn default() -> Self {
        ImageArgs {
            prompt: None,
            preset: None,
            references: Vec::new(),
            aspect_ratio: "1:1".to_string(),
            resolution: "1K".to_string(),
            temperature: 1.0,
            model: None,
            thinking_level: DEFAULT_THINKING_LEVEL.to_string(),
            compare: false,
            out: None,
        }
    }
}

/// Final prompt text. The slide preset wraps the user text into its
/// template; the custom preset is only a placeholder and needs `--prompt`.
pub(crate) fn resolve_prompt(preset: Option<PromptPreset>, prompt: Option<&str>) -> Result<String> {
    let user_text = prompt.map(str::trim).filter(|text| !text.is_empty());
    let resolved = match (preset, user_text) {
        (Some(PromptPreset::Women), None) => PROMPT_WOMEN.to_string(),
        (Some(PromptPreset::Men), None) => PROMPT_MEN.to_string(),
        (Some(PromptPreset::Women | PromptPreset::Men), Some(text)) => text.to_string(),
        (Some(PromptPreset::Slide), Some(text)) => PROMPT_SLIDE.replace("{{user_input}}", text),
        (Some(PromptPreset::Slide), None) => {
            return Err(anyhow!("The slide preset needs --prompt with the slide content."))
        }
        (Some(PromptPreset::Custom) | None, Some(text)) => text.to_string(),
        (Some(PromptPreset::Custom) | None, None) => {
            return Err(anyhow!("A prompt is required. {PROMPT_CUSTOM}"))
        }
    };
    Ok(resolved)
}

pub(crate) fn validate_args(args: &ImageArgs) -> Result<()> {
    if !IMAGE_ASPECT_RATIO_OPTIONS.contains(&args.aspect_ratio.as_str()) {
        return Err(anyhow!(
            "Unsupported aspect ratio {}. Use one of: {}",
            args.aspect_ratio,
            IMAGE_ASPECT_RATIO_OPTIONS.join(", ")
        ));
    }
    if !IMAGE_RESOLUTION_OPTIONS.contains(&args.resolution.as_str()) {
        return Err(anyhow!(
            "Unsupported resolution {}. Use one of: {}",
            args.resolution,
            IMAGE_RESOLUTION_OPTIONS.join(", ")
        ));
    }
    if !(0.0..=1.0).contains(&args.temperature) {
        return Err(anyhow!("Temperature must be between 0.0 and 1.0"));
    }
    Ok(())
}

fn models_for(args: &ImageArgs) -> Vec<String> {
    if args.compare && !CONFIG.image_compare_models.is_empty() {
        return CONFIG.image_compare_models.clone();
    }
    vec![args
        .model
        .clone()
        .unwrap_or_else(|| CONFIG.image_model.clone())]
}

fn extension_for(mime_type: Option<&str>) -> &'static str {
    match mime_type {
        Some("image/jpeg") => "jpg",
        Some("image/webp") => "webp",
        _ => "png",
    }
}

/// Where one model's image is written. With several models each file gets
/// the model name appended so results never overwrite each other.
pub(crate) fn output_path(
    base: Option<&Path>,
    stamp: &str,
    model: &str,
    multiple: bool,
    mime_type: Option<&str>,
) -> PathBuf {
    let extension = extension_for(mime_type);
    let base = base
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(format!("generated_{stamp}.{extension}")));
    if !multiple {
        return base;
    }
    let stem = base
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("generated")
        .to_string();
    let extension = base
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or(extension)
        .to_string();
    let safe_model: String = model
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '.' { ch } else { '_' })
        .collect();
    base.with_file_name(format!("{stem}_{safe_model}.{extension}"))
}

async fn load_references(paths: &[String]) -> Result<Vec<MediaFile>> {
    let mut references = Vec::new();
    for path in paths {
        let file = load_media(path, "image/jpeg").await?;
        if file.kind != MediaKind::Image {
            return Err(anyhow!(
                "{} is not an image ({})",
                file.name(),
                file.mime_type
            ));
        }
        references.push(file);
    }
    Ok(references)
}

#[derive(Debug)]
enum ModelOutcome {
    Saved {
        path: PathBuf,
        bytes: Vec<u8>,
        text: String,
    },
    NoImage {
        text: String,
    },
    Failed(String),
}

/// Writes one model's image. Never fails as a whole, so a bad model or a
/// write error does not hide the other models' results.
async fn save_outcome(
    model: &str,
    result: Result<GeneratedImage, ImageGenerationError>,
    out: Option<&Path>,
    stamp: &str,
    multiple: bool,
) -> ModelOutcome {
    let generated = match result {
        Ok(generated) => generated,
        Err(err) => {
            warn!("{} image generation failed: {}", model, err);
            return ModelOutcome::Failed(format_error_with_retry(&err.to_string(), "the image"));
        }
    };
    let Some(bytes) = generated.image else {
        warn!("{} returned no image", model);
        return ModelOutcome::NoImage {
            text: generated.text,
        };
    };

    let path = output_path(out, stamp, model, multiple, generated.mime_type.as_deref());
    if let Err(err) = tokio::fs::write(&path, &bytes).await {
        warn!("Writing image from {} to {} failed: {}", model, path.display(), err);
        return ModelOutcome::Failed(format!("Could not write {}: {err}", path.display()));
    }
    info!("Image from {} written to {}", model, path.display());
    ModelOutcome::Saved {
        path,
        bytes,
        text: generated.text,
    }
}

pub async fn image_command(args: ImageArgs) -> Result<()> {
    CONFIG.require_gemini_api_key()?;
    validate_args(&args)?;
    let prompt = resolve_prompt(args.preset, args.prompt.as_deref())?;
    let mut timer = start_command_timer("image", Some(&prompt));

    let references = load_references(&args.references).await?;
    let progress = Progress::spinner("Uploading reference images...");
    let uploaded = match upload_media_files(&references).await {
        Ok(uploaded) => uploaded,
        Err(err) => {
            progress.finish_err("Upload failed");
            complete_command_timer(&mut timer, "error", Some("upload_failed".to_string()));
            return Err(anyhow!(format_error_with_retry(&err.to_string(), "the upload")));
        }
    };

    let models = models_for(&args);
    progress.set_message(&format!("Generating with {}...", models.join(", ")));
    let request = ImageRequest {
        prompt: prompt.clone(),
        aspect_ratio: args.aspect_ratio.clone(),
        resolution: args.resolution.clone(),
        temperature: args.temperature,
        thinking_level: Some(args.thinking_level.clone()),
    };

    // One task per model; each outcome is reported on its own.
    let results: Vec<(String, Result<GeneratedImage, ImageGenerationError>)> =
        join_all(models.iter().map(|model| {
            let request = &request;
            let uploaded = &uploaded;
            async move {
                let result = generate_image_with_gemini(model, request, uploaded).await;
                (model.clone(), result)
            }
        }))
        .await;
    progress.finish_clear();

    let sources: Vec<SourceImage> = references
        .iter()
        .map(|file| SourceImage {
            name: file.name().to_string(),
            bytes: file.bytes.clone(),
        })
        .collect();
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let multiple = results.len() > 1;
    let mut saved = 0usize;

    for (model, result) in results {
        match save_outcome(&model, result, args.out.as_deref(), &stamp, multiple).await {
            ModelOutcome::Saved { path, bytes, text } => {
                saved += 1;
                println!("[{model}] saved {}", path.display());
                if !text.trim().is_empty() {
                    println!("[{model}] {}", text.trim());
                }
                send_image_log(&sources, &bytes, &prompt).await;
            }
            ModelOutcome::NoImage { text } => {
                println!("[{model}] model returned no image");
                if !text.trim().is_empty() {
                    println!("[{model}] {}", text.trim());
                }
            }
            ModelOutcome::Failed(message) => println!("[{model}] {message}"),
        }
    }

    if saved == 0 {
        complete_command_timer(&mut timer, "error", Some("no_image".to_string()));
        return Err(anyhow!("No image was generated."));
    }
    complete_command_timer(&mut timer, "success", Some(format!("images={saved}")));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_resolve_to_templates() {
        assert_eq!(resolve_prompt(Some(PromptPreset::Women), None).unwrap(), PROMPT_WOMEN);
        assert_eq!(
            resolve_prompt(Some(PromptPreset::Men), Some("  tweed jacket  ")).unwrap(),
            "tweed jacket"
        );
        let slide = resolve_prompt(Some(PromptPreset::Slide), Some("Q3 revenue up 12%")).unwrap();
        assert!(slide.contains("Q3 revenue up 12%"));
        assert!(!slide.contains("{{user_input}}"));
    }

    #[test]
    fn missing_prompt_is_rejected() {
        assert!(resolve_prompt(None, Some("   ")).is_err());
        assert!(resolve_prompt(Some(PromptPreset::Custom), None).is_err());
        assert!(resolve_prompt(Some(PromptPreset::Slide), None).is_err());
        assert!(PromptPreset::parse("anime").is_err());
        assert_eq!(PromptPreset::parse(" Slide ").unwrap(), PromptPreset::Slide);
    }

    #[test]
    fn options_are_validated() {
        assert!(validate_args(&ImageArgs::default()).is_ok());
        let bad_ratio = ImageArgs {
            aspect_ratio: "21:9".to_string(),
            ..Default::default()
        };
        assert!(validate_args(&bad_ratio).is_err());
        let bad_size = ImageArgs {
            resolution: "8K".to_string(),
            ..Default::default()
        };
        assert!(validate_args(&bad_size).is_err());
        let hot = ImageArgs {
            temperature: 1.5,
            ..Default::default()
        };
        assert!(validate_args(&hot).is_err());
    }

    #[test]
    fn compare_outputs_do_not_collide() {
        let single = output_path(None, "20260101_120000", "m", false, Some("image/jpeg"));
        assert_eq!(single, PathBuf::from("generated_20260101_120000.jpg"));

        let a = output_path(Some(Path::new("out/pic.png")), "s", "gemini-3-pro-image-preview", true, None);
        let b = output_path(Some(Path::new("out/pic.png")), "s", "gemini-2.5-flash-image", true, None);
        assert_eq!(a, PathBuf::from("out/pic_gemini-3-pro-image-preview.png"));
        assert_eq!(b, PathBuf::from("out/pic_gemini-2.5-flash-image.png"));
    }

    fn generated(bytes: &[u8]) -> Result<GeneratedImage, ImageGenerationError> {
        Ok(GeneratedImage {
            image: Some(bytes.to_vec()),
            mime_type: Some("image/png".to_string()),
            text: "done".to_string(),
        })
    }

    #[tokio::test]
    async fn write_failure_for_one_model_keeps_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("pic.png");
        // A directory at the first model's target makes that write fail.
        std::fs::create_dir(dir.path().join("pic_model-a.png")).unwrap();

        let first = save_outcome("model-a", generated(&[1]), Some(&base), "s", true).await;
        let second = save_outcome("model-b", generated(&[2]), Some(&base), "s", true).await;

        assert!(matches!(first, ModelOutcome::Failed(ref m) if m.starts_with("Could not write")));
        match second {
            ModelOutcome::Saved { path, bytes, text } => {
                assert_eq!(path, dir.path().join("pic_model-b.png"));
                assert_eq!(bytes, vec![2]);
                assert_eq!(text, "done");
                assert_eq!(std::fs::read(&path).unwrap(), vec![2]);
            }
            other => panic!("expected a saved image, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_image_and_errors_are_reported_per_model() {
        let empty = Ok(GeneratedImage {
            image: None,
            mime_type: None,
            text: "refused".to_string(),
        });
        let outcome = save_outcome("m", empty, None, "s", false).await;
        assert!(matches!(outcome, ModelOutcome::NoImage { ref text } if text == "refused"));

        let failed = Err(ImageGenerationError("boom".to_string()));
        let outcome = save_outcome("m", failed, None, "s", false).await;
        assert!(matches!(outcome, ModelOutcome::Failed(_)));
    }
}
