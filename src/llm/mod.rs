pub mod gemini;

pub use gemini::{GeminiClient, GeminiConfig, GenerationParams, InlineImage, LlmError};
