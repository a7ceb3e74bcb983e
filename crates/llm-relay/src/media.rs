//! Request and response types for the non-chat capabilities.
//!
//! Embeddings, moderation, image generation, transcription and model
//! listing share the same dispatch path as chat (registry, retry,
//! timeout) but have nothing to do with conversation history, so their
//! payloads live here.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::provider::Capability;
use crate::usage::Usage;

/// Input for [`Provider::embed`](crate::Provider::embed).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Model override; the provider's default when `None`.
    pub model: Option<String>,
    /// Texts to embed, one vector per entry.
    pub input: Vec<String>,
    /// Requested output dimensionality, if the model supports truncation.
    pub dimensions: Option<u32>,
}

impl EmbeddingRequest {
    /// A request embedding the given texts with the default model.
    pub fn new(input: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            input: input.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Output of an embedding call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    /// One vector per input, in input order.
    pub vectors: Vec<Vec<f32>>,
    /// The model that produced the vectors.
    pub model: String,
    /// Token counts, when reported.
    #[serde(default)]
    pub usage: Usage,
}

/// Input for [`Provider::moderate`](crate::Provider::moderate).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModerationRequest {
    /// Model override.
    pub model: Option<String>,
    /// The text to classify.
    pub input: String,
}

impl ModerationRequest {
    /// A request classifying `input` with the default model.
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            model: None,
            input: input.into(),
        }
    }
}

/// Output of a moderation call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Moderation {
    /// `true` if any category was flagged.
    pub flagged: bool,
    /// Per-category verdicts.
    pub categories: HashMap<String, bool>,
    /// Per-category confidence scores.
    pub scores: HashMap<String, f64>,
    /// The model that classified the input.
    pub model: String,
}

impl Moderation {
    /// Names of the flagged categories, sorted.
    pub fn flagged_categories(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .categories
            .iter()
            .filter(|(_, flagged)| **flagged)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

/// Input for [`Provider::paint`](crate::Provider::paint).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRequest {
    /// Model override.
    pub model: Option<String>,
    /// What to draw.
    pub prompt: String,
    /// Provider-specific size string, e.g. `"1024x1024"`.
    pub size: Option<String>,
    /// How many images to generate.
    pub count: u32,
}

impl ImageRequest {
    /// A request for one image with the default model and size.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            model: None,
            prompt: prompt.into(),
            size: None,
            count: 1,
        }
    }
}

/// One generated image. Exactly one of `url` or `data` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    /// Where the provider hosts the image.
    pub url: Option<String>,
    /// Base64-encoded bytes.
    pub data: Option<String>,
    /// MIME type of `data`.
    pub mime_type: Option<String>,
    /// The prompt after provider-side rewriting, if any.
    pub revised_prompt: Option<String>,
    /// The model that drew it.
    pub model: String,
}

/// Input for [`Provider::transcribe`](crate::Provider::transcribe).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionRequest {
    /// Model override.
    pub model: Option<String>,
    /// Raw audio bytes.
    #[serde(skip)]
    pub audio: Vec<u8>,
    /// MIME type of `audio`, e.g. `"audio/wav"`.
    pub mime_type: String,
    /// ISO-639-1 language hint.
    pub language: Option<String>,
    /// Text to condition the transcription on.
    pub prompt: Option<String>,
}

/// Output of a transcription call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    /// The recognized text.
    pub text: String,
    /// Detected or hinted language.
    pub language: Option<String>,
    /// Audio length in seconds, when reported.
    pub duration_secs: Option<f64>,
    /// The model that transcribed the audio.
    pub model: String,
}

/// One entry of [`Provider::list_models`](crate::Provider::list_models).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier as passed in requests.
    pub id: String,
    /// The provider that serves it.
    pub provider: String,
    /// Context window in tokens, when known.
    pub context_window: Option<u64>,
    /// What the model can do.
    #[serde(default)]
    pub capabilities: HashSet<Capability>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_request_new() {
        let req = EmbeddingRequest::new(["a", "b"]);
        assert_eq!(req.input, vec!["a".to_string(), "b".to_string()]);
        assert!(req.model.is_none());
    }

    #[test]
    fn test_flagged_categories_sorted() {
        let m = Moderation {
            flagged: true,
            categories: HashMap::from([
                ("violence".into(), true),
                ("hate".into(), true),
                ("spam".into(), false),
            ]),
            ..Moderation::default()
        };
        assert_eq!(m.flagged_categories(), vec!["hate", "violence"]);
    }

    #[test]
    fn test_image_request_defaults_to_one() {
        let req = ImageRequest::new("a lighthouse at dusk");
        assert_eq!(req.count, 1);
        assert!(req.size.is_none());
    }

    #[test]
    fn test_transcription_request_skips_audio_bytes() {
        let req = TranscriptionRequest {
            model: None,
            audio: vec![0, 1, 2, 3],
            mime_type: "audio/wav".into(),
            language: Some("en".into()),
            prompt: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("audio").is_none());
        assert_eq!(json["mime_type"], "audio/wav");
    }
}
