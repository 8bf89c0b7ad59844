pub mod gemini;
pub mod interactions;
pub mod media;
#[cfg(test)]
pub mod mock;

pub use gemini::{
    generate_image_with_gemini, stream_chat, upload_media_files, ChatMessage, ChatOptions,
    ChatRole, GeneratedImage, ImageRequest, UploadedFile,
};
pub use interactions::GeminiInteractions;
