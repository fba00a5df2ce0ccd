//! Confidence scoring: per-field and whole-document.
//!
//! Field confidence blends four signals with fixed weights: what the model
//! claimed, how well the value overlaps OCR word boxes, whether the value
//! matches the format its name implies, and how central the field is to
//! the document type.

use regex::Regex;

use crate::config::ValidationPatterns;
use crate::models::{DocumentType, ExtractedField, QualityAssurance};

use super::ocr::OcrOutput;
use super::PipelineError;

const WEIGHT_MODEL: f32 = 0.4;
const WEIGHT_OCR_OVERLAP: f32 = 0.3;
const WEIGHT_FORMAT: f32 = 0.2;
const WEIGHT_RELEVANCE: f32 = 0.1;

/// Scores individual fields. Patterns are compiled once at construction.
pub struct FieldScorer {
    /// (name-substring key, pattern) in match-priority order.
    rules: Vec<(&'static str, Regex)>,
    generic_amount: Regex,
    generic_date: Regex,
}

impl FieldScorer {
    pub fn new(patterns: &ValidationPatterns) -> Result<Self, PipelineError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|source| PipelineError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
        };

        Ok(Self {
            rules: vec![
                ("email", compile(&patterns.email)?),
                ("phone", compile(&patterns.phone)?),
                ("date", compile(&patterns.date)?),
                ("amount", compile(&patterns.amount)?),
            ],
            generic_amount: compile(r"^\$?\d+\.?\d{0,2}$")?,
            // Prefix-only: a date followed by a time still counts as date-like
            generic_date: compile(r"^\d{1,2}[/-]\d{1,2}[/-]\d{2,4}")?,
        })
    }

    /// Blend the four confidence signals for one extracted value.
    /// `model_confidence` defaults to 0.5 when the model gave none.
    pub fn field_confidence(
        &self,
        name: &str,
        value: &str,
        model_confidence: Option<f32>,
        ocr: &OcrOutput,
        doc_type: DocumentType,
    ) -> f32 {
        let model = model_confidence.unwrap_or(0.5);
        let overlap = ocr_overlap_confidence(value, ocr);
        let format = self.format_confidence(name, value);
        let relevance = relevance_confidence(name, doc_type);

        let combined = model * WEIGHT_MODEL
            + overlap * WEIGHT_OCR_OVERLAP
            + format * WEIGHT_FORMAT
            + relevance * WEIGHT_RELEVANCE;

        combined.clamp(0.0, 1.0)
    }

    /// Format validity from the field name.
    ///
    /// An explicit rule key in the name decides 0.9/0.3; otherwise
    /// amount-like and date-like names get a softer 0.8/0.4, and plain
    /// text fields sit at 0.6. Empty values score 0.0.
    fn format_confidence(&self, name: &str, value: &str) -> f32 {
        if value.is_empty() {
            return 0.0;
        }

        let name_lower = name.to_lowercase();

        for (key, pattern) in &self.rules {
            if name_lower.contains(key) {
                return if pattern.is_match(value) { 0.9 } else { 0.3 };
            }
        }

        if name_lower.contains("amount") || name_lower.contains("total") {
            return if self.generic_amount.is_match(value) { 0.8 } else { 0.4 };
        }

        if name_lower.contains("date") {
            return if self.generic_date.is_match(value) { 0.8 } else { 0.4 };
        }

        0.6
    }
}

/// Average OCR confidence of word boxes sharing a word with the value.
/// 0.5 neutral default when the value is empty, there are no boxes, or
/// nothing matches.
fn ocr_overlap_confidence(value: &str, ocr: &OcrOutput) -> f32 {
    if value.is_empty() || ocr.words.is_empty() {
        return 0.5;
    }

    let value_words: Vec<String> = value
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let matching: Vec<f32> = ocr
        .words
        .iter()
        .filter(|w| {
            let box_text = w.text.to_lowercase();
            value_words.iter().any(|vw| box_text.contains(vw.as_str()))
        })
        .map(|w| w.confidence)
        .collect();

    if matching.is_empty() {
        0.5
    } else {
        matching.iter().sum::<f32>() / matching.len() as f32
    }
}

/// 0.9 for fields central to the document type, 0.7 otherwise.
fn relevance_confidence(name: &str, doc_type: DocumentType) -> f32 {
    let important: &[&str] = match doc_type {
        DocumentType::Invoice => {
            &["invoice_number", "vendor_name", "total", "date", "customer_name"]
        }
        DocumentType::MedicalBill => {
            &["patient_name", "provider_name", "charges", "date_of_service"]
        }
        DocumentType::Prescription => {
            &["patient_name", "medication_name", "prescriber_name", "dosage"]
        }
    };

    if important.contains(&name) {
        0.9
    } else {
        0.7
    }
}

/// Whole-document confidence. Zero fields means zero confidence, no
/// matter how well detection or OCR went.
pub fn overall_confidence(
    fields: &[ExtractedField],
    type_confidence: f32,
    ocr_confidence: f32,
    qa: &QualityAssurance,
) -> f32 {
    if fields.is_empty() {
        return 0.0;
    }

    let avg_field =
        fields.iter().map(|f| f.confidence).sum::<f32>() / fields.len() as f32;

    // 8 extracted fields counts as a complete document
    let completeness = (fields.len() as f32 / 8.0).min(1.0);

    let combined = avg_field * 0.35
        + type_confidence * 0.20
        + ocr_confidence * 0.20
        + qa.cross_validation_score * 0.15
        + completeness * 0.10;

    combined.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ocr::OcrWord;

    fn scorer() -> FieldScorer {
        FieldScorer::new(&ValidationPatterns::default()).unwrap()
    }

    fn ocr_with_words(words: &[(&str, f32)]) -> OcrOutput {
        OcrOutput {
            full_text: words.iter().map(|(t, _)| *t).collect::<Vec<_>>().join(" "),
            words: words
                .iter()
                .map(|(t, c)| OcrWord {
                    text: t.to_string(),
                    confidence: *c,
                    bbox: None,
                })
                .collect(),
            average_confidence: 0.0,
        }
    }

    #[test]
    fn bad_pattern_is_rejected_at_construction() {
        let patterns = ValidationPatterns {
            email: "[unclosed".into(),
            ..ValidationPatterns::default()
        };
        assert!(matches!(
            FieldScorer::new(&patterns),
            Err(PipelineError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn result_is_clamped_for_out_of_range_model_confidence() {
        let s = scorer();
        let ocr = OcrOutput::empty();

        let high = s.field_confidence("vendor_name", "ACME", Some(5.0), &ocr, DocumentType::Invoice);
        assert!(high <= 1.0);

        let low = s.field_confidence("vendor_name", "ACME", Some(-3.0), &ocr, DocumentType::Invoice);
        assert!(low >= 0.0);
    }

    #[test]
    fn missing_model_confidence_defaults_to_half() {
        let s = scorer();
        let ocr = OcrOutput::empty();

        let with_default =
            s.field_confidence("vendor_name", "ACME", None, &ocr, DocumentType::Invoice);
        let explicit =
            s.field_confidence("vendor_name", "ACME", Some(0.5), &ocr, DocumentType::Invoice);
        assert!((with_default - explicit).abs() < f32::EPSILON);
    }

    #[test]
    fn ocr_overlap_averages_matching_boxes() {
        let ocr = ocr_with_words(&[("ACME", 0.9), ("Corp", 0.7), ("Total", 0.2)]);
        let overlap = ocr_overlap_confidence("acme corp", &ocr);
        assert!((overlap - 0.8).abs() < 1e-6);
    }

    #[test]
    fn ocr_overlap_defaults_when_no_match() {
        let ocr = ocr_with_words(&[("unrelated", 0.9)]);
        assert!((ocr_overlap_confidence("ACME", &ocr) - 0.5).abs() < f32::EPSILON);
        assert!((ocr_overlap_confidence("", &ocr) - 0.5).abs() < f32::EPSILON);
        assert!((ocr_overlap_confidence("ACME", &OcrOutput::empty()) - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn format_rule_key_beats_generic_checks() {
        let s = scorer();
        // "date" is a rule key: explicit 0.9/0.3, not the generic 0.8/0.4
        assert!((s.format_confidence("date", "12/31/2024") - 0.9).abs() < f32::EPSILON);
        assert!((s.format_confidence("date", "December 31") - 0.3).abs() < f32::EPSILON);
        assert!((s.format_confidence("email_address", "a@b.com") - 0.9).abs() < f32::EPSILON);
        assert!((s.format_confidence("email_address", "not-an-email") - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn format_generic_and_default_tiers() {
        let s = scorer();
        assert!((s.format_confidence("total", "$88.00") - 0.8).abs() < f32::EPSILON);
        assert!((s.format_confidence("total", "eighty-eight") - 0.4).abs() < f32::EPSILON);
        assert!((s.format_confidence("vendor_name", "ACME Corp") - 0.6).abs() < f32::EPSILON);
        assert!((s.format_confidence("vendor_name", "") - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn generic_date_pattern_is_prefix_only() {
        let s = scorer();
        assert!(s.generic_date.is_match("12/31/2024 10:30"));
        assert!(s.generic_date.is_match("12/31/2024"));
        assert!(!s.generic_date.is_match("on 12/31/2024"));
    }

    #[test]
    fn relevance_depends_on_document_type() {
        assert!((relevance_confidence("total", DocumentType::Invoice) - 0.9).abs() < f32::EPSILON);
        assert!(
            (relevance_confidence("total", DocumentType::Prescription) - 0.7).abs() < f32::EPSILON
        );
        assert!(
            (relevance_confidence("medication_name", DocumentType::Prescription) - 0.9).abs()
                < f32::EPSILON
        );
    }

    #[test]
    fn zero_fields_means_zero_overall_confidence() {
        let qa = QualityAssurance {
            cross_validation_score: 1.0,
            ..Default::default()
        };
        let result = overall_confidence(&[], 1.0, 1.0, &qa);
        assert!((result - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn overall_confidence_weighted_example() {
        let field = |confidence: f32| ExtractedField {
            name: "f".into(),
            value: "v".into(),
            confidence,
            source: None,
            validation_passed: true,
            validation_notes: None,
        };
        let fields = vec![field(0.8), field(0.6), field(1.0), field(0.6)];
        let qa = QualityAssurance {
            cross_validation_score: 0.5,
            ..Default::default()
        };

        // avg 0.75, type 0.9, ocr 0.8, qa 0.5, completeness 4/8
        let expected = 0.75 * 0.35 + 0.9 * 0.20 + 0.8 * 0.20 + 0.5 * 0.15 + 0.5 * 0.10;
        let actual = overall_confidence(&fields, 0.9, 0.8, &qa);
        assert!((actual - expected).abs() < 1e-6);
    }
}
