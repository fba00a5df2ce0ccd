//! Structured field extraction from scanned documents.
//!
//! Combines OCR word confidences with a vision language model to pull
//! typed fields out of invoices, medical bills and prescriptions, then
//! cross-validates the fields and reports calibrated confidence scores.
//!
//! The entry point is [`DocumentProcessor::process_document`], which is
//! infallible: failures are packaged into the returned
//! [`DocumentExtraction`] rather than surfaced as errors.

pub mod config;
pub mod models;
pub mod pipeline;

pub use config::{ExtractionConfig, ValidationPatterns};
pub use models::{
    BoundingBox, DocumentExtraction, DocumentType, ExtractedField, FieldSource, QualityAssurance,
};
pub use pipeline::{
    DocumentProcessor, MockOcrEngine, MockVisionModel, OcrEngine, OcrOutput, OpenAiVision,
    PipelineError, ScriptedVisionModel, VisionModel,
};

#[cfg(feature = "ocr")]
pub use pipeline::BundledTesseract;
