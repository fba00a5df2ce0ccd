//! Pipeline configuration.
//!
//! Constructed once at startup (defaults or environment) and passed by
//! reference into each component constructor — no ambient global state.

use serde::{Deserialize, Serialize};

/// Regex patterns applied by field-format validation, keyed by rule type.
/// The key doubles as a case-insensitive substring matched against field names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationPatterns {
    pub email: String,
    pub phone: String,
    pub date: String,
    pub amount: String,
}

impl Default for ValidationPatterns {
    fn default() -> Self {
        Self {
            email: r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$".into(),
            phone: r"^\+?[\d\s\-()]{10,}$".into(),
            date: r"^\d{1,2}[/-]\d{1,2}[/-]\d{2,4}$".into(),
            amount: r"^\$?\d+\.?\d{0,2}$".into(),
        }
    }
}

/// Complete configuration surface for the extraction pipeline.
/// Read at startup, never re-validated at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Base URL of the OpenAI-compatible vision API.
    pub api_base_url: String,
    pub api_key: String,
    /// Vision-capable model used for type detection and extraction.
    pub vision_model: String,
    /// Text model identifier (reserved for text-only fallbacks).
    pub text_model: String,
    pub request_timeout_secs: u64,
    /// Minimum per-field confidence for the `confidence_threshold` rule.
    pub min_field_confidence: f32,
    /// Minimum document-level confidence advertised to consumers.
    pub min_overall_confidence: f32,
    pub validation_patterns: ValidationPatterns,
    /// Accepted input extensions, lowercase, with leading dot.
    pub supported_extensions: Vec<String>,
    pub max_file_size_mb: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            vision_model: "gpt-4-vision-preview".into(),
            text_model: "gpt-4-turbo-preview".into(),
            request_timeout_secs: 120,
            min_field_confidence: 0.5,
            min_overall_confidence: 0.7,
            validation_patterns: ValidationPatterns::default(),
            supported_extensions: vec![
                ".pdf".into(),
                ".png".into(),
                ".jpg".into(),
                ".jpeg".into(),
            ],
            max_file_size_mb: 10,
        }
    }
}

impl ExtractionConfig {
    /// Build a config from environment variables, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.api_key = key;
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            config.vision_model = model;
        }
        if let Ok(model) = std::env::var("OPENAI_TEXT_MODEL") {
            config.text_model = model;
        }
        if let Some(v) = parse_env("MIN_FIELD_CONFIDENCE") {
            config.min_field_confidence = v;
        }
        if let Some(v) = parse_env("MIN_OVERALL_CONFIDENCE") {
            config.min_overall_confidence = v;
        }
        if let Some(v) = parse_env("MAX_FILE_SIZE_MB") {
            config.max_file_size_mb = v;
        }

        config
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    /// Check a filename against the supported extension list
    /// (case-insensitive).
    pub fn is_supported_file(&self, filename: &str) -> bool {
        let lower = filename.to_lowercase();
        self.supported_extensions
            .iter()
            .any(|ext| lower.ends_with(ext.as_str()))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
