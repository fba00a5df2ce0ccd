pub mod decode;
pub mod ocr;
pub mod vision;
pub mod prompt;
pub mod router;
pub mod extract;
pub mod confidence;
pub mod validation;
pub mod processor;

pub use decode::*;
pub use ocr::*;
pub use vision::*;
pub use prompt::*;
pub use router::*;
pub use extract::*;
pub use confidence::*;
pub use validation::*;
pub use processor::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("File too large ({size} bytes, limit {limit})")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Document contains no decodable pages")]
    NoPages,

    #[error("Tesseract OCR initialization failed: {0}")]
    OcrInit(String),

    #[error("Tesseract OCR configuration error: {0}")]
    OcrConfig(String),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("Vision API is not reachable at {0}")]
    VisionConnection(String),

    #[error("Vision API returned error (status {status}): {body}")]
    VisionApi { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("JSON parsing error: {0}")]
    JsonParsing(String),

    #[error("Invalid validation pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
