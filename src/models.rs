use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Document classification driving which extraction schema and validation
/// rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Invoice,
    MedicalBill,
    Prescription,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "invoice",
            DocumentType::MedicalBill => "medical_bill",
            DocumentType::Prescription => "prescription",
        }
    }
}

/// Corner-coordinate bounding box for an OCR word or field source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Where in the document an extracted value was found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSource {
    pub page: u32,
    pub bbox: Option<BoundingBox>,
    pub ocr_confidence: Option<f32>,
}

/// A single extracted field with its combined confidence.
///
/// Created by the extraction stage; the field validator sets
/// `validation_passed` and `validation_notes` exactly once, after which the
/// value is immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedField {
    pub name: String,
    /// Empty string means "not found".
    pub value: String,
    pub confidence: f32,
    pub source: Option<FieldSource>,
    pub validation_passed: bool,
    pub validation_notes: Option<String>,
}

/// Aggregated validation results for one document.
///
/// Rule lists carry set semantics (de-duplicated, stable first-seen order).
/// `cross_validation_score` is passed / (passed + failed) over the raw rule
/// firings, and 0.0 when no rules were evaluated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityAssurance {
    pub passed_rules: Vec<String>,
    pub failed_rules: Vec<String>,
    pub notes: String,
    pub cross_validation_score: f32,
}

/// Terminal output of the processing pipeline for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentExtraction {
    pub doc_type: DocumentType,
    pub fields: Vec<ExtractedField>,
    pub overall_confidence: f32,
    pub qa: QualityAssurance,
    /// Wall-clock processing duration in seconds.
    pub processing_time: f64,
    pub metadata: BTreeMap<String, serde_json::Value>,
}
