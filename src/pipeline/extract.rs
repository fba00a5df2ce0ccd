//! Structured field extraction via the vision model.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::models::{DocumentType, ExtractedField, FieldSource};

use super::confidence::FieldScorer;
use super::ocr::OcrOutput;
use super::prompt::build_extraction_prompt;
use super::router::strip_code_fences;
use super::vision::VisionModel;
use super::PipelineError;

/// Sends the extraction prompt to the vision model and turns its JSON
/// reply into scored, source-attributed fields.
pub struct FieldExtractor {
    vision: Arc<dyn VisionModel + Send + Sync>,
    model: String,
    scorer: FieldScorer,
}

/// One entry of the model's `fields` object. Individual entries that fail
/// to deserialize are skipped rather than failing the whole reply.
#[derive(Deserialize)]
struct RawField {
    value: Option<Value>,
    extraction_confidence: Option<f32>,
    #[allow(dead_code)]
    reasoning: Option<String>,
}

#[derive(Deserialize)]
struct FieldsResponse {
    #[serde(default)]
    fields: serde_json::Map<String, Value>,
}

impl FieldExtractor {
    pub fn new(
        vision: Arc<dyn VisionModel + Send + Sync>,
        model: &str,
        scorer: FieldScorer,
    ) -> Self {
        Self {
            vision,
            model: model.to_string(),
            scorer,
        }
    }

    /// Run one extraction call for the page image.
    ///
    /// `custom_fields` are appended to the schema with a plain string
    /// hint, skipping names the schema already covers. Transport and
    /// response-parse failures propagate; a parseable reply with no
    /// usable fields yields an empty list.
    pub fn extract(
        &self,
        image_jpeg: &[u8],
        ocr: &OcrOutput,
        doc_type: DocumentType,
        schema: Vec<(String, String)>,
        custom_fields: &[String],
    ) -> Result<Vec<ExtractedField>, PipelineError> {
        let schema = merge_custom_fields(schema, custom_fields);
        let prompt = build_extraction_prompt(doc_type, &schema, &ocr.full_text);

        let reply = self
            .vision
            .complete_with_image(&self.model, &prompt, image_jpeg)?;

        let fields = self.parse_fields_response(&reply, ocr, doc_type)?;
        tracing::info!(
            doc_type = doc_type.as_str(),
            field_count = fields.len(),
            "Extraction complete"
        );
        Ok(fields)
    }

    fn parse_fields_response(
        &self,
        reply: &str,
        ocr: &OcrOutput,
        doc_type: DocumentType,
    ) -> Result<Vec<ExtractedField>, PipelineError> {
        let cleaned = strip_code_fences(reply);

        let parsed: FieldsResponse = serde_json::from_str(cleaned)
            .map_err(|e| PipelineError::JsonParsing(format!("Extraction response: {e}")))?;

        let mut fields = Vec::new();

        for (name, entry) in parsed.fields {
            let raw: RawField = match serde_json::from_value(entry) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(field = %name, error = %e, "Skipping malformed field entry");
                    continue;
                }
            };

            let Some(value) = stringify_value(raw.value) else {
                continue;
            };

            let confidence = self.scorer.field_confidence(
                &name,
                &value,
                raw.extraction_confidence,
                ocr,
                doc_type,
            );

            let source = find_field_source(&value, ocr);

            fields.push(ExtractedField {
                name,
                value,
                confidence,
                source,
                validation_passed: true,
                validation_notes: None,
            });
        }

        Ok(fields)
    }
}

/// Append custom field names not already present in the schema.
fn merge_custom_fields(
    mut schema: Vec<(String, String)>,
    custom_fields: &[String],
) -> Vec<(String, String)> {
    for custom in custom_fields {
        if !schema.iter().any(|(name, _)| name == custom) {
            schema.push((custom.clone(), "string".to_string()));
        }
    }
    schema
}

/// Render a JSON field value as a string, dropping nulls and empties.
fn stringify_value(value: Option<Value>) -> Option<String> {
    let text = match value? {
        Value::Null => return None,
        Value::String(s) => s,
        other => other.to_string(),
    };

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Find the word box best matching the value.
///
/// Substring match in either direction; the best match maximizes
/// box-text length relative to the value. Naive, but enough to point a
/// reviewer at the right region of the scan.
fn find_field_source(value: &str, ocr: &OcrOutput) -> Option<FieldSource> {
    if value.is_empty() || ocr.words.is_empty() {
        return None;
    }

    let value_lower = value.to_lowercase();
    let mut best: Option<(&super::ocr::OcrWord, f32)> = None;

    for word in &ocr.words {
        let box_lower = word.text.to_lowercase();
        if value_lower.contains(&box_lower) || box_lower.contains(&value_lower) {
            let score = word.text.len() as f32 / value.len() as f32;
            if best.map_or(true, |(_, prev)| score > prev) {
                best = Some((word, score));
            }
        }
    }

    best.map(|(word, _)| FieldSource {
        page: 1,
        bbox: word.bbox.clone(),
        ocr_confidence: Some(word.confidence),
    })
}
