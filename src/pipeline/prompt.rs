//! Prompt construction for type detection and field extraction.

use crate::models::DocumentType;

/// Cap on the OCR text excerpt included in the extraction prompt.
pub const MAX_OCR_EXCERPT_CHARS: usize = 2000;

/// Prompt asking the vision model to classify the document image.
pub const DETECTION_PROMPT: &str = r#"Analyze this document image and determine its type. Look for key visual indicators:

INVOICE indicators:
- "Invoice" header or title
- Invoice number
- Vendor/company information
- Line items with quantities and prices
- Subtotal, tax, total amounts
- Payment terms

MEDICAL_BILL indicators:
- Hospital/clinic letterhead
- Patient information
- Date of service
- Medical procedure codes (CPT codes)
- Diagnosis codes (ICD codes)
- Insurance information
- Charges and payments

PRESCRIPTION indicators:
- "Rx" symbol or "Prescription" header
- Prescriber/doctor information
- Patient name and DOB
- Medication names
- Dosage instructions
- DEA number
- Pharmacy information

Respond with ONLY a JSON object in this exact format:
{
    "document_type": "invoice|medical_bill|prescription",
    "confidence": 0.95,
    "reasoning": "Brief explanation of key indicators found",
    "key_indicators": ["list", "of", "visual", "clues"]
}"#;

/// Build the extraction prompt: document type, field schema, and an OCR
/// text excerpt for grounding.
pub fn build_extraction_prompt(
    doc_type: DocumentType,
    schema: &[(String, String)],
    ocr_text: &str,
) -> String {
    let excerpt: String = ocr_text.chars().take(MAX_OCR_EXCERPT_CHARS).collect();

    let mut schema_lines = String::new();
    for (name, type_hint) in schema {
        schema_lines.push_str(&format!("  \"{name}\": \"{type_hint}\"\n"));
    }

    format!(
        r#"You are an expert document extraction agent. Extract structured data from this {doc_type} document.

OCR Text (for reference):
{excerpt}

Extract the following fields according to the schema:
{{
{schema_lines}}}

IMPORTANT INSTRUCTIONS:
1. Look carefully at both the image and OCR text
2. For each field, provide the exact value found in the document
3. If a field is not found or unclear, set value to null
4. For monetary amounts, include currency symbol if present
5. For dates, preserve the original format found
6. For line items (if applicable), extract as structured array

Respond with ONLY a JSON object in this exact format:
{{
    "fields": {{
        "field_name": {{
            "value": "extracted_value_or_null",
            "extraction_confidence": 0.95,
            "reasoning": "brief explanation of how this was found"
        }}
    }}
}}

Be precise and conservative with confidence scores. Use 0.9+ only for clearly visible, unambiguous text."#,
        doc_type = doc_type.as_str(),
    )
}
