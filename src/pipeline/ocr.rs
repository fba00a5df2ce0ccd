//! OCR abstraction and Tesseract word-confidence parsing.
//!
//! The pipeline never depends on a concrete OCR engine: it consumes the
//! `OcrEngine` trait. The bundled Tesseract implementation is behind the
//! `ocr` cargo feature so the crate builds without libtesseract.

use serde::{Deserialize, Serialize};

use crate::models::BoundingBox;

use super::PipelineError;

/// Words at or below this Tesseract confidence (0-100 scale) are dropped.
const MIN_WORD_CONFIDENCE: i32 = 30;

/// A single recognized word with its confidence and position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    /// 0.0-1.0.
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
}

/// Page-level OCR output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrOutput {
    pub full_text: String,
    pub words: Vec<OcrWord>,
    /// Mean confidence over kept words, 0.0 when none.
    pub average_confidence: f32,
}

impl OcrOutput {
    /// The output used when OCR is unavailable or failed: the pipeline
    /// continues on the vision model alone.
    pub fn empty() -> Self {
        Self {
            full_text: String::new(),
            words: Vec::new(),
            average_confidence: 0.0,
        }
    }
}

pub trait OcrEngine {
    fn recognize(&self, image_bytes: &[u8]) -> Result<OcrOutput, PipelineError>;
}

/// Bundled Tesseract engine. Only available with the `ocr` feature.
#[cfg(feature = "ocr")]
pub struct BundledTesseract {
    tessdata_dir: std::path::PathBuf,
    lang: String,
}

#[cfg(feature = "ocr")]
impl BundledTesseract {
    pub fn new(tessdata_dir: &std::path::Path, lang: &str) -> Result<Self, PipelineError> {
        if !tessdata_dir.join(format!("{lang}.traineddata")).exists() {
            return Err(PipelineError::OcrConfig(format!(
                "No {lang}.traineddata at {}",
                tessdata_dir.display()
            )));
        }

        Ok(Self {
            tessdata_dir: tessdata_dir.to_path_buf(),
            lang: lang.to_string(),
        })
    }
}

#[cfg(feature = "ocr")]
impl OcrEngine for BundledTesseract {
    fn recognize(&self, image_bytes: &[u8]) -> Result<OcrOutput, PipelineError> {
        let tessdata_str = self
            .tessdata_dir
            .to_str()
            .ok_or_else(|| PipelineError::OcrInit("Invalid tessdata path".into()))?;

        let tess = tesseract::Tesseract::new(Some(tessdata_str), Some(&self.lang))
            .map_err(|e| PipelineError::OcrInit(format!("{e:?}")))?;

        let mut tess = tess
            .set_image_from_mem(image_bytes)
            .map_err(|e| PipelineError::OcrProcessing(format!("{e:?}")))?;

        let full_text = tess
            .get_text()
            .map_err(|e| PipelineError::OcrProcessing(format!("{e:?}")))?;

        // TSV columns: level page_num block_num par_num line_num word_num
        //              left top width height conf text. Level 5 = word.
        let words = match tess.get_tsv_text(0) {
            Ok(tsv) => parse_tsv_words(&tsv),
            Err(e) => {
                tracing::warn!(error = ?e, "Tesseract TSV output unavailable");
                Vec::new()
            }
        };

        let average_confidence = average_word_confidence(&words);

        Ok(OcrOutput {
            full_text,
            words,
            average_confidence,
        })
    }
}

/// Mock engine for tests without Tesseract. Splits the configured text on
/// whitespace and assigns every word the same confidence, no boxes.
pub struct MockOcrEngine {
    pub text: String,
    pub confidence: f32,
}

impl MockOcrEngine {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self {
            text: text.to_string(),
            confidence,
        }
    }
}

impl OcrEngine for MockOcrEngine {
    fn recognize(&self, _image_bytes: &[u8]) -> Result<OcrOutput, PipelineError> {
        let words: Vec<OcrWord> = self
            .text
            .split_whitespace()
            .map(|w| OcrWord {
                text: w.to_string(),
                confidence: self.confidence,
                bbox: None,
            })
            .collect();

        let average_confidence = if words.is_empty() { 0.0 } else { self.confidence };

        Ok(OcrOutput {
            full_text: self.text.clone(),
            words,
            average_confidence,
        })
    }
}

/// Parse Tesseract TSV output into word results.
///
/// Keeps level-5 (word) rows with confidence strictly above
/// `MIN_WORD_CONFIDENCE`; everything else is noise for field matching.
pub fn parse_tsv_words(tsv: &str) -> Vec<OcrWord> {
    let mut words = Vec::new();

    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        let level: i32 = match fields[0].parse() {
            Ok(l) => l,
            Err(_) => continue,
        };
        if level != 5 {
            continue;
        }

        let conf: i32 = match fields[10].parse() {
            Ok(c) => c,
            Err(_) => continue,
        };
        if conf <= MIN_WORD_CONFIDENCE {
            continue;
        }

        let text = fields[11].trim();
        if text.is_empty() {
            continue;
        }

        words.push(OcrWord {
            text: text.to_string(),
            confidence: conf as f32 / 100.0,
            bbox: parse_word_bbox(fields[6], fields[7], fields[8], fields[9]),
        });
    }

    words
}

/// Corner-coordinate box from the TSV left/top/width/height columns.
/// None when any coordinate fails to parse.
fn parse_word_bbox(left: &str, top: &str, width: &str, height: &str) -> Option<BoundingBox> {
    let left: f32 = left.parse().ok()?;
    let top: f32 = top.parse().ok()?;
    let width: f32 = width.parse().ok()?;
    let height: f32 = height.parse().ok()?;

    Some(BoundingBox {
        x1: left,
        y1: top,
        x2: left + width,
        y2: top + height,
    })
}

pub fn average_word_confidence(words: &[OcrWord]) -> f32 {
    if words.is_empty() {
        return 0.0;
    }
    words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    const TSV_HEADER: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn tsv_parser_extracts_words_and_confidences() {
        let tsv = format!(
            "{TSV_HEADER}\n\
             1\t1\t0\t0\t0\t0\t0\t0\t600\t800\t-1\t\n\
             5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t95\tInvoice\n\
             5\t1\t1\t1\t1\t2\t100\t20\t60\t30\t88\tTotal\n\
             5\t1\t1\t1\t2\t1\t10\t60\t120\t30\t72\t$88.00"
        );
        let words = parse_tsv_words(&tsv);
        assert_eq!(words.len(), 3);
        assert_eq!(words[0].text, "Invoice");
        assert!((words[0].confidence - 0.95).abs() < f32::EPSILON);
        assert_eq!(words[2].text, "$88.00");
        assert!((words[2].confidence - 0.72).abs() < f32::EPSILON);
    }

    #[test]
    fn tsv_parser_builds_corner_boxes() {
        let tsv = format!(
            "{TSV_HEADER}\n\
             5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t95\tInvoice"
        );
        let words = parse_tsv_words(&tsv);
        let bbox = words[0].bbox.as_ref().expect("should have bbox");
        assert!((bbox.x1 - 10.0).abs() < f32::EPSILON);
        assert!((bbox.y1 - 20.0).abs() < f32::EPSILON);
        assert!((bbox.x2 - 90.0).abs() < f32::EPSILON);
        assert!((bbox.y2 - 50.0).abs() < f32::EPSILON);
    }

    #[test]
    fn tsv_parser_skips_non_word_levels() {
        let tsv = format!(
            "{TSV_HEADER}\n\
             1\t1\t0\t0\t0\t0\t0\t0\t600\t800\t-1\t\n\
             2\t1\t1\t0\t0\t0\t10\t10\t580\t780\t-1\t\n\
             4\t1\t1\t1\t1\t0\t10\t20\t200\t30\t-1\t\n\
             5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t90\tVendor"
        );
        let words = parse_tsv_words(&tsv);
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].text, "Vendor");
    }

    #[test]
    fn tsv_parser_drops_low_confidence_words() {
        let tsv = format!(
            "{TSV_HEADER}\n\
             5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t30\tgarbled\n\
             5\t1\t1\t1\t1\t2\t100\t20\t80\t30\t-1\tnoise\n\
             5\t1\t1\t1\t1\t3\t200\t20\t80\t30\t31\tkept"
        );
        let words = parse_tsv_words(&tsv);
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].text, "kept");
    }

    #[test]
    fn tsv_parser_skips_empty_words_and_malformed_lines() {
        let tsv = format!(
            "{TSV_HEADER}\n\
             too\tfew\tfields\n\
             5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t90\t\n\
             notanumber\t1\t1\t1\t1\t1\t10\t20\t80\t30\t50\tbad\n\
             5\t1\t1\t1\t1\t2\t100\t20\t80\t30\t85\tvalid"
        );
        let words = parse_tsv_words(&tsv);
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].text, "valid");
    }

    #[test]
    fn tsv_parser_handles_empty_and_header_only_input() {
        assert!(parse_tsv_words("").is_empty());
        assert!(parse_tsv_words(TSV_HEADER).is_empty());
    }

    #[test]
    fn average_confidence_over_kept_words() {
        let words = vec![
            OcrWord {
                text: "a".into(),
                confidence: 0.8,
                bbox: None,
            },
            OcrWord {
                text: "b".into(),
                confidence: 0.6,
                bbox: None,
            },
        ];
        assert!((average_word_confidence(&words) - 0.7).abs() < 1e-6);
        assert!((average_word_confidence(&[]) - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn mock_engine_splits_words() {
        let engine = MockOcrEngine::new("Total $88.00 due", 0.9);
        let out = engine.recognize(b"fake").unwrap();
        assert_eq!(out.full_text, "Total $88.00 due");
        assert_eq!(out.words.len(), 3);
        assert!((out.average_confidence - 0.9).abs() < f32::EPSILON);
        assert!(out.words[0].bbox.is_none());
    }

    #[test]
    fn mock_engine_with_no_text_has_zero_confidence() {
        let engine = MockOcrEngine::new("", 0.9);
        let out = engine.recognize(b"fake").unwrap();
        assert!(out.words.is_empty());
        assert!((out.average_confidence - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn empty_output_shape() {
        let out = OcrOutput::empty();
        assert!(out.full_text.is_empty());
        assert!(out.words.is_empty());
        assert!((out.average_confidence - 0.0).abs() < f32::EPSILON);
    }
}
