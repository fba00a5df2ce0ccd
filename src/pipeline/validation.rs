//! Field-level and cross-field validation, aggregated into a
//! `QualityAssurance` summary.

use std::collections::HashMap;

use regex::Regex;

use crate::config::ExtractionConfig;
use crate::models::{DocumentType, ExtractedField, QualityAssurance};

use super::PipelineError;

/// Absolute tolerance when comparing parsed monetary amounts.
const AMOUNT_TOLERANCE: f64 = 0.01;

/// Keywords marking a field as monetary for format validation.
const AMOUNT_KEYWORDS: &[&str] = &["amount", "total", "price", "cost", "charge"];

/// Validates extracted fields against format rules and per-type
/// cross-field consistency checks.
pub struct ExtractionValidator {
    email: Regex,
    phone: Regex,
    date: Regex,
    amount: Regex,
    min_field_confidence: f32,
}

struct FieldCheck {
    passed: bool,
    rules_passed: Vec<String>,
    rules_failed: Vec<String>,
    notes: String,
}

impl ExtractionValidator {
    pub fn new(config: &ExtractionConfig) -> Result<Self, PipelineError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|source| PipelineError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
        };

        let patterns = &config.validation_patterns;
        Ok(Self {
            email: compile(&patterns.email)?,
            phone: compile(&patterns.phone)?,
            date: compile(&patterns.date)?,
            amount: compile(&patterns.amount)?,
            min_field_confidence: config.min_field_confidence,
        })
    }

    /// Validate every field in place and build the document QA summary.
    ///
    /// Per-field outcomes are written onto the fields themselves; the
    /// returned summary aggregates rule firings. A passing field
    /// contributes its passed rules, a failing field only its failed
    /// rules. The score is computed over the raw firings before the rule
    /// lists are de-duplicated.
    pub fn validate_extraction(
        &self,
        fields: &mut [ExtractedField],
        doc_type: DocumentType,
    ) -> QualityAssurance {
        let mut passed_rules: Vec<String> = Vec::new();
        let mut failed_rules: Vec<String> = Vec::new();
        let mut notes: Vec<String> = Vec::new();

        for field in fields.iter_mut() {
            let check = self.validate_field(field);
            field.validation_passed = check.passed;
            field.validation_notes = Some(check.notes);

            if check.passed {
                passed_rules.extend(check.rules_passed);
            } else {
                failed_rules.extend(check.rules_failed);
            }
        }

        self.cross_validate(fields, doc_type, &mut passed_rules, &mut failed_rules, &mut notes);

        let total = passed_rules.len() + failed_rules.len();
        let cross_validation_score = if total > 0 {
            passed_rules.len() as f32 / total as f32
        } else {
            0.0
        };

        let low_confidence: Vec<&str> = fields
            .iter()
            .filter(|f| f.confidence < self.min_field_confidence)
            .map(|f| f.name.as_str())
            .collect();
        if !low_confidence.is_empty() {
            notes.push(format!(
                "{} low-confidence fields: {}",
                low_confidence.len(),
                low_confidence.join(", ")
            ));
        }

        let summary = if notes.is_empty() {
            "All validations passed".to_string()
        } else {
            notes.join("; ")
        };

        QualityAssurance {
            passed_rules: dedup_stable(passed_rules),
            failed_rules: dedup_stable(failed_rules),
            notes: summary,
            cross_validation_score,
        }
    }

    /// Apply name-keyed format rules and the confidence threshold to one
    /// field. An empty value short-circuits every other check.
    fn validate_field(&self, field: &ExtractedField) -> FieldCheck {
        if field.value.is_empty() {
            return FieldCheck {
                passed: false,
                rules_passed: Vec::new(),
                rules_failed: vec!["empty_value".to_string()],
                notes: "Field is empty".to_string(),
            };
        }

        let mut rules_passed = Vec::new();
        let mut rules_failed = Vec::new();
        let mut notes = Vec::new();

        let name_lower = field.name.to_lowercase();

        let mut apply = |applies: bool, pattern: &Regex, rule: &str, note: &str| {
            if !applies {
                return;
            }
            if pattern.is_match(&field.value) {
                rules_passed.push(rule.to_string());
            } else {
                rules_failed.push(rule.to_string());
                notes.push(note.to_string());
            }
        };

        apply(
            name_lower.contains("email"),
            &self.email,
            "email_format",
            "Invalid email format",
        );
        apply(
            name_lower.contains("phone"),
            &self.phone,
            "phone_format",
            "Invalid phone format",
        );
        apply(
            name_lower.contains("date"),
            &self.date,
            "date_format",
            "Invalid date format",
        );
        apply(
            AMOUNT_KEYWORDS.iter().any(|k| name_lower.contains(k)),
            &self.amount,
            "amount_format",
            "Invalid amount format",
        );

        if field.confidence >= self.min_field_confidence {
            rules_passed.push("confidence_threshold".to_string());
        } else {
            rules_failed.push("confidence_threshold".to_string());
            notes.push(format!("Low confidence: {:.2}", field.confidence));
        }

        FieldCheck {
            passed: rules_failed.is_empty(),
            rules_passed,
            rules_failed,
            notes: if notes.is_empty() {
                "Valid".to_string()
            } else {
                notes.join("; ")
            },
        }
    }

    fn cross_validate(
        &self,
        fields: &[ExtractedField],
        doc_type: DocumentType,
        passed: &mut Vec<String>,
        failed: &mut Vec<String>,
        notes: &mut Vec<String>,
    ) {
        // Name → value lookup, empty values excluded
        let values: HashMap<&str, &str> = fields
            .iter()
            .filter(|f| !f.value.is_empty())
            .map(|f| (f.name.as_str(), f.value.as_str()))
            .collect();

        match doc_type {
            DocumentType::Invoice => validate_invoice_totals(&values, passed, failed, notes),
            DocumentType::MedicalBill => validate_medical_amounts(&values, passed, failed, notes),
            DocumentType::Prescription => validate_prescription(&values, passed, failed, notes),
        }

        // Weak existence check: any non-empty field whose name mentions a date
        let has_date_field = values.keys().any(|k| k.to_lowercase().contains("date"));
        if has_date_field {
            passed.push("date_fields_present".to_string());
        } else {
            notes.push("No date fields found".to_string());
        }
    }
}

fn validate_invoice_totals(
    values: &HashMap<&str, &str>,
    passed: &mut Vec<String>,
    failed: &mut Vec<String>,
    notes: &mut Vec<String>,
) {
    let amounts = (
        parse_amount(values.get("subtotal").copied().unwrap_or("0")),
        parse_amount(values.get("tax").copied().unwrap_or("0")),
        parse_amount(values.get("total").copied().unwrap_or("0")),
    );

    let (Some(subtotal), Some(tax), Some(total)) = amounts else {
        failed.push("totals_calculation".to_string());
        notes.push("Could not parse amounts for total validation".to_string());
        return;
    };

    let expected = subtotal + tax;
    if (total - expected).abs() < AMOUNT_TOLERANCE {
        passed.push("totals_match".to_string());
    } else {
        failed.push("totals_match".to_string());
        notes.push(format!(
            "Total mismatch: {total:?} != {expected:?} (subtotal {subtotal:?} + tax {tax:?})"
        ));
    }
}

fn validate_medical_amounts(
    values: &HashMap<&str, &str>,
    passed: &mut Vec<String>,
    failed: &mut Vec<String>,
    notes: &mut Vec<String>,
) {
    let amounts = (
        parse_amount(values.get("charges").copied().unwrap_or("0")),
        parse_amount(values.get("insurance_paid").copied().unwrap_or("0")),
        parse_amount(values.get("patient_responsibility").copied().unwrap_or("0")),
    );

    let (Some(charges), Some(insurance), Some(patient)) = amounts else {
        failed.push("medical_amounts_calculation".to_string());
        notes.push("Could not parse medical amounts".to_string());
        return;
    };

    if (charges - (insurance + patient)).abs() < AMOUNT_TOLERANCE {
        passed.push("medical_amounts_match".to_string());
    } else {
        failed.push("medical_amounts_match".to_string());
        notes.push("Medical bill amounts do not balance".to_string());
    }
}

fn validate_prescription(
    values: &HashMap<&str, &str>,
    passed: &mut Vec<String>,
    failed: &mut Vec<String>,
    notes: &mut Vec<String>,
) {
    let required = ["patient_name", "medication_name", "prescriber_name"];
    let missing: Vec<&str> = required
        .iter()
        .filter(|name| !values.contains_key(**name))
        .copied()
        .collect();

    if missing.is_empty() {
        passed.push("prescription_required_fields".to_string());
    } else {
        failed.push("prescription_required_fields".to_string());
        notes.push(format!("Missing required fields: {}", missing.join(", ")));
    }

    if let Some(&refills) = values.get("refills") {
        if !refills.is_empty() && refills.chars().all(|c| c.is_ascii_digit()) {
            passed.push("refills_numeric".to_string());
        } else {
            failed.push("refills_numeric".to_string());
            notes.push("Refills should be numeric".to_string());
        }
    }
}

/// Parse a currency string by stripping everything outside `[0-9.-]`.
///
/// Empty and all-symbol inputs parse as 0.0; None only when the stripped
/// digits fail to parse as a number (e.g. "1.2.3").
pub fn parse_amount(raw: &str) -> Option<f64> {
    if raw.is_empty() {
        return Some(0.0);
    }

    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    if cleaned.is_empty() {
        return Some(0.0);
    }

    cleaned.parse().ok()
}

/// De-duplicate preserving first-seen order.
fn dedup_stable(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}
