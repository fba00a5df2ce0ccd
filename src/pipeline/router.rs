//! Document type detection and per-type extraction schemas.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::models::DocumentType;

use super::prompt::DETECTION_PROMPT;
use super::vision::VisionModel;
use super::PipelineError;

/// Classifies the first page image and owns the per-type field schemas.
pub struct DocumentRouter {
    vision: Arc<dyn VisionModel + Send + Sync>,
    model: String,
}

/// Model reply to the detection prompt.
#[derive(Deserialize)]
struct DetectionResponse {
    document_type: String,
    confidence: f32,
    reasoning: Option<String>,
    key_indicators: Option<Vec<String>>,
}

impl DocumentRouter {
    pub fn new(vision: Arc<dyn VisionModel + Send + Sync>, model: &str) -> Self {
        Self {
            vision,
            model: model.to_string(),
        }
    }

    /// Detect the document type from the first page image.
    ///
    /// Never fails: any model or parse error degrades to the invoice
    /// default with low confidence and the error recorded in metadata,
    /// so a misbehaving classifier cannot take down the pipeline.
    pub fn detect_document_type(
        &self,
        image_jpeg: &[u8],
    ) -> (DocumentType, f32, serde_json::Value) {
        match self.try_detect(image_jpeg) {
            Ok((doc_type, confidence, metadata)) => {
                tracing::info!(
                    doc_type = doc_type.as_str(),
                    confidence,
                    "Document type detected"
                );
                (doc_type, confidence, metadata)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Type detection failed, defaulting to invoice");
                (DocumentType::Invoice, 0.3, json!({ "error": e.to_string() }))
            }
        }
    }

    fn try_detect(
        &self,
        image_jpeg: &[u8],
    ) -> Result<(DocumentType, f32, serde_json::Value), PipelineError> {
        let reply = self
            .vision
            .complete_with_image(&self.model, DETECTION_PROMPT, image_jpeg)?;

        parse_detection_response(&reply)
    }
}

/// Parse the model's detection reply, tolerating markdown code fences.
fn parse_detection_response(
    reply: &str,
) -> Result<(DocumentType, f32, serde_json::Value), PipelineError> {
    let cleaned = strip_code_fences(reply);

    let parsed: DetectionResponse = serde_json::from_str(cleaned)
        .map_err(|e| PipelineError::JsonParsing(format!("Detection response: {e}")))?;

    let doc_type = match parsed.document_type.as_str() {
        "invoice" => DocumentType::Invoice,
        "medical_bill" => DocumentType::MedicalBill,
        "prescription" => DocumentType::Prescription,
        other => {
            return Err(PipelineError::MalformedResponse(format!(
                "Unknown document type: {other}"
            )));
        }
    };

    let confidence = parsed.confidence.clamp(0.0, 1.0);

    let metadata = json!({
        "reasoning": parsed.reasoning.unwrap_or_default(),
        "key_indicators": parsed.key_indicators.unwrap_or_default(),
    });

    Ok((doc_type, confidence, metadata))
}

/// Strip a surrounding markdown code fence if the model added one.
pub(crate) fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

/// Field name → type-hint schema for each document type.
pub fn extraction_schema(doc_type: DocumentType) -> Vec<(String, String)> {
    let pairs: &[(&str, &str)] = match doc_type {
        DocumentType::Invoice => &[
            ("invoice_number", "string"),
            ("date", "date (MM/DD/YYYY or DD/MM/YYYY)"),
            ("vendor_name", "string"),
            ("vendor_address", "string"),
            ("customer_name", "string"),
            ("customer_address", "string"),
            ("subtotal", "monetary amount"),
            ("tax", "monetary amount"),
            ("total", "monetary amount"),
            (
                "line_items",
                "array of {description, quantity, unit_price, total}",
            ),
        ],
        DocumentType::MedicalBill => &[
            ("patient_name", "string"),
            ("patient_id", "string"),
            ("date_of_service", "date"),
            ("provider_name", "string"),
            ("provider_address", "string"),
            ("diagnosis_codes", "array of ICD codes"),
            ("procedure_codes", "array of CPT codes"),
            ("charges", "monetary amount"),
            ("insurance_paid", "monetary amount"),
            ("patient_responsibility", "monetary amount"),
        ],
        DocumentType::Prescription => &[
            ("patient_name", "string"),
            ("prescriber_name", "string"),
            ("medication_name", "string"),
            ("dosage", "string with units"),
            ("quantity", "number"),
            ("refills", "number"),
            ("date_prescribed", "date"),
            ("pharmacy_name", "string"),
            ("rx_number", "string"),
        ],
    };

    pairs
        .iter()
        .map(|(name, hint)| (name.to_string(), hint.to_string()))
        .collect()
}
