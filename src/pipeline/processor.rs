//! Pipeline orchestrator: decode → detect type → OCR → extract →
//! validate → score → package.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::info_span;

use crate::config::ExtractionConfig;
use crate::models::{DocumentExtraction, DocumentType, QualityAssurance};

use super::confidence::{overall_confidence, FieldScorer};
use super::decode::decode_pages;
use super::extract::FieldExtractor;
use super::ocr::{OcrEngine, OcrOutput};
use super::router::{extraction_schema, DocumentRouter};
use super::validation::ExtractionValidator;
use super::vision::VisionModel;
use super::PipelineError;

/// End-to-end document processor.
///
/// `process_document` never returns an error: any failure the stages do
/// not absorb locally is caught once here and packaged into a terminal
/// error result, so callers always get a `DocumentExtraction`.
pub struct DocumentProcessor {
    config: ExtractionConfig,
    router: DocumentRouter,
    ocr: Box<dyn OcrEngine + Send + Sync>,
    extractor: FieldExtractor,
    validator: ExtractionValidator,
}

impl DocumentProcessor {
    pub fn new(
        config: ExtractionConfig,
        vision: Arc<dyn VisionModel + Send + Sync>,
        ocr: Box<dyn OcrEngine + Send + Sync>,
    ) -> Result<Self, PipelineError> {
        let scorer = FieldScorer::new(&config.validation_patterns)?;
        let validator = ExtractionValidator::new(&config)?;
        let router = DocumentRouter::new(Arc::clone(&vision), &config.vision_model);
        let extractor = FieldExtractor::new(vision, &config.vision_model, scorer);

        Ok(Self {
            config,
            router,
            ocr,
            extractor,
            validator,
        })
    }

    /// Process one uploaded document end to end.
    pub fn process_document(
        &self,
        file_data: &[u8],
        filename: &str,
        custom_fields: &[String],
    ) -> DocumentExtraction {
        let _span = info_span!("process_document", filename).entered();
        let start = Instant::now();

        match self.run_pipeline(file_data, filename, custom_fields, start) {
            Ok(result) => {
                tracing::info!(
                    doc_type = result.doc_type.as_str(),
                    field_count = result.fields.len(),
                    overall_confidence = result.overall_confidence,
                    elapsed_secs = result.processing_time,
                    "Document processing completed"
                );
                result
            }
            Err(e) => {
                tracing::error!(error = %e, "Document processing failed");
                error_extraction(&e, filename, start)
            }
        }
    }

    fn run_pipeline(
        &self,
        file_data: &[u8],
        filename: &str,
        custom_fields: &[String],
        start: Instant,
    ) -> Result<DocumentExtraction, PipelineError> {
        if !self.config.is_supported_file(filename) {
            return Err(PipelineError::UnsupportedFormat(filename.to_string()));
        }

        let size = file_data.len() as u64;
        let limit = self.config.max_file_size_bytes();
        if size > limit {
            return Err(PipelineError::FileTooLarge { size, limit });
        }

        let pages = decode_pages(file_data, filename)?;
        let primary_page = &pages[0];

        let (doc_type, type_confidence, type_metadata) =
            self.router.detect_document_type(primary_page);

        // OCR failure degrades to an empty result: the vision model still
        // sees the page image.
        let ocr = match self.ocr.recognize(primary_page) {
            Ok(out) => out,
            Err(e) => {
                tracing::warn!(error = %e, "OCR failed, continuing without text layer");
                OcrOutput::empty()
            }
        };

        let schema = extraction_schema(doc_type);

        let mut fields =
            self.extractor
                .extract(primary_page, &ocr, doc_type, schema, custom_fields)?;

        let qa = self.validator.validate_extraction(&mut fields, doc_type);

        let confidence =
            overall_confidence(&fields, type_confidence, ocr.average_confidence, &qa);

        let mut metadata = BTreeMap::new();
        metadata.insert("filename".to_string(), json!(filename));
        metadata.insert("type_detection".to_string(), type_metadata);
        metadata.insert("ocr_confidence".to_string(), json!(ocr.average_confidence));
        metadata.insert("num_pages".to_string(), json!(pages.len()));

        Ok(DocumentExtraction {
            doc_type,
            fields,
            overall_confidence: confidence,
            qa,
            processing_time: start.elapsed().as_secs_f64(),
            metadata,
        })
    }
}

/// Terminal result for a failed pipeline run.
fn error_extraction(e: &PipelineError, filename: &str, start: Instant) -> DocumentExtraction {
    let mut metadata = BTreeMap::new();
    metadata.insert("error".to_string(), json!(e.to_string()));
    metadata.insert("filename".to_string(), json!(filename));

    DocumentExtraction {
        doc_type: DocumentType::Invoice,
        fields: Vec::new(),
        overall_confidence: 0.0,
        qa: QualityAssurance {
            passed_rules: Vec::new(),
            failed_rules: vec!["processing_error".to_string()],
            notes: format!("Processing failed: {e}"),
            cross_validation_score: 0.0,
        },
        processing_time: start.elapsed().as_secs_f64(),
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ocr::MockOcrEngine;
    use crate::pipeline::vision::ScriptedVisionModel;
    use image::ImageOutputFormat;

    fn test_png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(40, 40, image::Rgb([220u8, 220, 220]));
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageOutputFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    const DETECT_INVOICE: &str = r#"{"document_type": "invoice", "confidence": 0.95, "reasoning": "invoice header and totals", "key_indicators": ["Invoice", "Total"]}"#;

    const EXTRACT_TOTALS: &str = r#"{
        "fields": {
            "invoice_number": {"value": "INV-001", "extraction_confidence": 0.95},
            "subtotal": {"value": "$80.00", "extraction_confidence": 0.9},
            "tax": {"value": "$8.00", "extraction_confidence": 0.9},
            "total": {"value": "$88.00", "extraction_confidence": 0.9}
        }
    }"#;

    fn processor(replies: Vec<Result<String, String>>, ocr_text: &str) -> DocumentProcessor {
        DocumentProcessor::new(
            ExtractionConfig::default(),
            Arc::new(ScriptedVisionModel::new(replies)),
            Box::new(MockOcrEngine::new(ocr_text, 0.9)),
        )
        .unwrap()
    }

    /// Failing OCR engine for degradation tests.
    struct BrokenOcr;
    impl crate::pipeline::ocr::OcrEngine for BrokenOcr {
        fn recognize(&self, _image_bytes: &[u8]) -> Result<OcrOutput, PipelineError> {
            Err(PipelineError::OcrProcessing("engine crashed".into()))
        }
    }

    #[test]
    fn happy_path_invoice_end_to_end() {
        let p = processor(
            vec![Ok(DETECT_INVOICE.into()), Ok(EXTRACT_TOTALS.into())],
            "Invoice INV-001 Subtotal $80.00 Tax $8.00 Total $88.00",
        );

        let result = p.process_document(&test_png(), "invoice.png", &[]);

        assert_eq!(result.doc_type, DocumentType::Invoice);
        assert_eq!(result.fields.len(), 4);
        assert!(result.qa.passed_rules.contains(&"totals_match".to_string()));
        assert!(result.qa.failed_rules.is_empty());
        assert!(result.overall_confidence > 0.0 && result.overall_confidence <= 1.0);
        assert!(result.processing_time >= 0.0);

        assert_eq!(result.metadata["filename"], "invoice.png");
        assert_eq!(result.metadata["num_pages"], 1);
        assert_eq!(
            result.metadata["type_detection"]["reasoning"],
            "invoice header and totals"
        );
        let ocr_conf = result.metadata["ocr_confidence"].as_f64().unwrap();
        assert!((ocr_conf - 0.9).abs() < 1e-6);
    }

    #[test]
    fn extraction_failure_yields_terminal_error_shape() {
        let p = processor(
            vec![Ok(DETECT_INVOICE.into()), Err("vision api down".into())],
            "some text",
        );

        let result = p.process_document(&test_png(), "invoice.png", &[]);

        assert_eq!(result.doc_type, DocumentType::Invoice);
        assert!(result.fields.is_empty());
        assert!((result.overall_confidence - 0.0).abs() < f32::EPSILON);
        assert_eq!(result.qa.failed_rules, vec!["processing_error".to_string()]);
        assert!(result.qa.notes.starts_with("Processing failed:"));
        assert!(result.metadata["error"]
            .as_str()
            .unwrap()
            .contains("vision api down"));
        assert_eq!(result.metadata["filename"], "invoice.png");
    }

    #[test]
    fn undecodable_input_yields_terminal_error_shape() {
        let p = processor(vec![], "text");
        let result = p.process_document(b"not an image", "scan.jpg", &[]);

        assert!(result.fields.is_empty());
        assert_eq!(result.qa.failed_rules, vec!["processing_error".to_string()]);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let p = processor(vec![], "text");
        let result = p.process_document(&test_png(), "notes.txt", &[]);

        assert_eq!(result.qa.failed_rules, vec!["processing_error".to_string()]);
        assert!(result.metadata["error"]
            .as_str()
            .unwrap()
            .contains("notes.txt"));
    }

    #[test]
    fn oversize_input_is_rejected() {
        let mut config = ExtractionConfig::default();
        config.max_file_size_mb = 0;
        let p = DocumentProcessor::new(
            config,
            Arc::new(ScriptedVisionModel::new(vec![])),
            Box::new(MockOcrEngine::new("text", 0.9)),
        )
        .unwrap();

        let result = p.process_document(&test_png(), "scan.png", &[]);
        assert_eq!(result.qa.failed_rules, vec!["processing_error".to_string()]);
        assert!(result.metadata["error"].as_str().unwrap().contains("too large"));
    }

    #[test]
    fn detection_failure_degrades_but_pipeline_continues() {
        let p = processor(
            vec![Err("detector down".into()), Ok(EXTRACT_TOTALS.into())],
            "Invoice Total $88.00",
        );

        let result = p.process_document(&test_png(), "scan.png", &[]);

        // Fallback type with the error recorded, extraction still ran
        assert_eq!(result.doc_type, DocumentType::Invoice);
        assert_eq!(result.fields.len(), 4);
        assert!(result.metadata["type_detection"]["error"]
            .as_str()
            .unwrap()
            .contains("detector down"));
    }

    #[test]
    fn ocr_failure_degrades_to_empty_text_layer() {
        let p = DocumentProcessor::new(
            ExtractionConfig::default(),
            Arc::new(ScriptedVisionModel::new(vec![
                Ok(DETECT_INVOICE.into()),
                Ok(EXTRACT_TOTALS.into()),
            ])),
            Box::new(BrokenOcr),
        )
        .unwrap();

        let result = p.process_document(&test_png(), "scan.png", &[]);

        assert_eq!(result.fields.len(), 4);
        assert!(!result.qa.failed_rules.contains(&"processing_error".to_string()));
        let ocr_conf = result.metadata["ocr_confidence"].as_f64().unwrap();
        assert!((ocr_conf - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_fields_reply_gives_empty_list_not_error() {
        let p = processor(
            vec![Ok(DETECT_INVOICE.into()), Ok(r#"{"fields": {}}"#.into())],
            "text",
        );

        let result = p.process_document(&test_png(), "scan.png", &[]);

        assert!(result.fields.is_empty());
        assert!((result.overall_confidence - 0.0).abs() < f32::EPSILON);
        // This is the degraded-but-successful path, not the error shape
        assert!(!result.qa.failed_rules.contains(&"processing_error".to_string()));
    }
}
