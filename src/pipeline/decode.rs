//! Input decoding: PDF or image bytes → one JPEG per page.
//!
//! Scanned PDFs carry their page scans as image XObjects; we pull the
//! largest image off each page rather than rasterizing vector content.
//! Plain image files pass through a decode + JPEG re-encode so the rest
//! of the pipeline always sees the same format.

use image::ImageOutputFormat;
use lopdf::{Document, Object, ObjectId};

use super::PipelineError;

/// JPEG quality for re-encoded pages. High enough that OCR and the vision
/// model see no artifacts that matter.
const JPEG_QUALITY: u8 = 95;

/// Decode an uploaded document into JPEG-encoded page images.
///
/// Dispatches on the filename extension: `.pdf` goes through embedded-image
/// extraction, everything else is treated as a single-page image. Pages
/// whose image cannot be recovered are skipped with a warning; if every
/// page fails the whole document is rejected.
pub fn decode_pages(file_data: &[u8], filename: &str) -> Result<Vec<Vec<u8>>, PipelineError> {
    if filename.to_lowercase().ends_with(".pdf") {
        decode_pdf_pages(file_data)
    } else {
        Ok(vec![reencode_image(file_data)?])
    }
}

/// Decode a single image file and re-encode as RGB JPEG.
fn reencode_image(file_data: &[u8]) -> Result<Vec<u8>, PipelineError> {
    let img = image::load_from_memory(file_data)
        .map_err(|e| PipelineError::ImageProcessing(format!("Failed to decode image: {e}")))?;

    encode_jpeg(&image::DynamicImage::ImageRgb8(img.to_rgb8()))
}

fn encode_jpeg(img: &image::DynamicImage) -> Result<Vec<u8>, PipelineError> {
    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageOutputFormat::Jpeg(JPEG_QUALITY))
        .map_err(|e| PipelineError::ImageProcessing(format!("Failed to encode JPEG: {e}")))?;
    Ok(buf.into_inner())
}

/// Extract one image per PDF page.
fn decode_pdf_pages(pdf_bytes: &[u8]) -> Result<Vec<Vec<u8>>, PipelineError> {
    let doc = Document::load_mem(pdf_bytes)
        .map_err(|e| PipelineError::PdfParsing(format!("Failed to parse PDF: {e}")))?;

    let page_ids: Vec<ObjectId> = doc.page_iter().collect();
    let mut pages = Vec::with_capacity(page_ids.len());

    for (index, &page_id) in page_ids.iter().enumerate() {
        match extract_page_jpeg(&doc, page_id) {
            Ok(jpeg) => pages.push(jpeg),
            Err(e) => {
                tracing::warn!(page = index, error = %e, "Skipping undecodable PDF page");
            }
        }
    }

    if pages.is_empty() {
        return Err(PipelineError::NoPages);
    }

    tracing::debug!(
        total_pages = page_ids.len(),
        decoded_pages = pages.len(),
        "Decoded PDF pages"
    );

    Ok(pages)
}

/// Extract the largest image XObject from a page and normalize it to JPEG.
///
/// Walks: page dict → /Resources → /XObject → /Subtype /Image entries.
fn extract_page_jpeg(doc: &Document, page_id: ObjectId) -> Result<Vec<u8>, PipelineError> {
    let page_obj = doc
        .get_object(page_id)
        .map_err(|e| PipelineError::PdfParsing(format!("Page object error: {e}")))?;

    let page_dict = page_obj
        .as_dict()
        .map_err(|_| PipelineError::PdfParsing("Page is not a dictionary".into()))?;

    let resources = resolve_dict_entry(doc, page_dict, b"Resources")?;
    let xobjects = resolve_dict_entry(doc, resources, b"XObject")?;

    let mut largest: Option<Vec<u8>> = None;

    for (_name, obj_ref) in xobjects.iter() {
        let xobj = match obj_ref {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(obj) => obj,
                Err(_) => continue,
            },
            other => other,
        };

        let stream = match xobj {
            Object::Stream(ref s) => s,
            _ => continue,
        };

        if !is_image_subtype(&stream.dict) {
            continue;
        }

        let image_bytes = extract_image_bytes(doc, stream)?;

        // The main page scan is the largest image on the page
        if largest.as_ref().map_or(true, |prev| image_bytes.len() > prev.len()) {
            largest = Some(image_bytes);
        }
    }

    let raw = largest
        .ok_or_else(|| PipelineError::PdfParsing("No image XObjects found on this page".into()))?;

    let img = image::load_from_memory(&raw).map_err(|e| {
        PipelineError::ImageProcessing(format!("Failed to decode extracted image: {e}"))
    })?;

    encode_jpeg(&image::DynamicImage::ImageRgb8(img.to_rgb8()))
}

fn is_image_subtype(dict: &lopdf::Dictionary) -> bool {
    dict.get(b"Subtype")
        .map(|obj| matches!(obj, Object::Name(ref n) if n == b"Image"))
        .unwrap_or(false)
}

/// Pull image bytes out of a PDF stream, handling the common filters.
fn extract_image_bytes(doc: &Document, stream: &lopdf::Stream) -> Result<Vec<u8>, PipelineError> {
    let filter = stream.dict.get(b"Filter").ok();

    let is_dct = filter
        .map(|f| match f {
            Object::Name(n) => n == b"DCTDecode",
            Object::Array(arr) => arr
                .iter()
                .any(|o| matches!(o, Object::Name(ref n) if n == b"DCTDecode")),
            _ => false,
        })
        .unwrap_or(false);

    if is_dct {
        // DCTDecode = JPEG: the stream content IS the JPEG file.
        // Decompress first in case other filters sit in front of it.
        let content = stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone());
        return Ok(content);
    }

    let content = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());

    // Some streams contain full image files (TIFF, PNG)
    if image::load_from_memory(&content).is_ok() {
        return Ok(content);
    }

    reconstruct_raw_image(doc, &stream.dict, &content)
}

/// Rebuild an image from raw pixel data using /Width, /Height,
/// /BitsPerComponent and /ColorSpace.
fn reconstruct_raw_image(
    doc: &Document,
    dict: &lopdf::Dictionary,
    raw_pixels: &[u8],
) -> Result<Vec<u8>, PipelineError> {
    let width = get_dimension(dict, b"Width")?;
    let height = get_dimension(dict, b"Height")?;

    let bpc = get_int(dict, b"BitsPerComponent").unwrap_or(8);
    if !(1..=32).contains(&bpc) {
        return Err(PipelineError::ImageProcessing(format!(
            "Unsupported bits per component: {bpc}"
        )));
    }

    let channels = determine_channels(doc, dict);

    // Dimensions come from the PDF and cannot be trusted; a declared
    // 65536x65536 image must fail, not wrap around.
    let expected_size = (width as u64)
        .checked_mul(height as u64)
        .and_then(|v| v.checked_mul(channels as u64))
        .and_then(|v| v.checked_mul(bpc as u64))
        .map(|v| v / 8)
        .ok_or_else(|| {
            PipelineError::ImageProcessing(format!(
                "Declared image dimensions overflow: {width}x{height}x{channels}x{bpc}/8"
            ))
        })?;

    if (raw_pixels.len() as u64) < expected_size {
        return Err(PipelineError::ImageProcessing(format!(
            "Raw pixel buffer too small: {} bytes, expected {} ({}x{}x{}x{}/8)",
            raw_pixels.len(),
            expected_size,
            width,
            height,
            channels,
            bpc
        )));
    }

    let img = match channels {
        1 => {
            let gray = image::GrayImage::from_raw(width, height, raw_pixels.to_vec())
                .ok_or_else(|| {
                    PipelineError::ImageProcessing("Failed to create grayscale image".into())
                })?;
            image::DynamicImage::ImageLuma8(gray)
        }
        3 => {
            let rgb = image::RgbImage::from_raw(width, height, raw_pixels.to_vec())
                .ok_or_else(|| {
                    PipelineError::ImageProcessing("Failed to create RGB image".into())
                })?;
            image::DynamicImage::ImageRgb8(rgb)
        }
        4 => {
            // CMYK treated as RGBA; downstream only needs legible pixels
            let rgba = image::RgbaImage::from_raw(width, height, raw_pixels.to_vec())
                .ok_or_else(|| {
                    PipelineError::ImageProcessing("Failed to create RGBA image".into())
                })?;
            image::DynamicImage::ImageRgba8(rgba)
        }
        _ => {
            return Err(PipelineError::ImageProcessing(format!(
                "Unsupported channel count: {channels}"
            )));
        }
    };

    encode_jpeg(&image::DynamicImage::ImageRgb8(img.to_rgb8()))
}

/// Channel count from /ColorSpace, defaulting to RGB.
fn determine_channels(doc: &Document, dict: &lopdf::Dictionary) -> u32 {
    let cs = match dict.get(b"ColorSpace") {
        Ok(obj) => resolve_object(doc, obj),
        Err(_) => return 3,
    };

    match cs {
        Object::Name(ref n) => match n.as_slice() {
            b"DeviceGray" => 1,
            b"DeviceRGB" => 3,
            b"DeviceCMYK" => 4,
            _ => 3,
        },
        Object::Array(ref arr) if !arr.is_empty() => match &arr[0] {
            Object::Name(ref n) if n == b"ICCBased" => {
                // /N in the ICC stream is the channel count
                if arr.len() > 1 {
                    if let Object::Reference(id) = &arr[1] {
                        if let Ok(Object::Stream(ref s)) = doc.get_object(*id) {
                            return get_int(&s.dict, b"N").unwrap_or(3) as u32;
                        }
                    }
                }
                3
            }
            Object::Name(ref n) if n == b"Indexed" => 1,
            _ => 3,
        },
        _ => 3,
    }
}

fn resolve_object<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn resolve_dict_entry<'a>(
    doc: &'a Document,
    dict: &'a lopdf::Dictionary,
    key: &[u8],
) -> Result<&'a lopdf::Dictionary, PipelineError> {
    let obj = dict.get(key).map_err(|_| {
        PipelineError::PdfParsing(format!(
            "Missing /{} in dictionary",
            String::from_utf8_lossy(key)
        ))
    })?;

    let resolved = resolve_object(doc, obj);
    resolved.as_dict().map_err(|_| {
        PipelineError::PdfParsing(format!(
            "/{} is not a dictionary",
            String::from_utf8_lossy(key)
        ))
    })
}

/// Image dimension from the dictionary: positive and within u32 range.
fn get_dimension(dict: &lopdf::Dictionary, key: &[u8]) -> Result<u32, PipelineError> {
    let value = get_int(dict, key)?;
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| {
            PipelineError::PdfParsing(format!(
                "/{} out of range: {value}",
                String::from_utf8_lossy(key)
            ))
        })
}

fn get_int(dict: &lopdf::Dictionary, key: &[u8]) -> Result<i64, PipelineError> {
    dict.get(key)
        .map_err(|_| {
            PipelineError::PdfParsing(format!(
                "Missing /{} in image dictionary",
                String::from_utf8_lossy(key)
            ))
        })?
        .as_i64()
        .map_err(|_| {
            PipelineError::PdfParsing(format!(
                "/{} is not an integer",
                String::from_utf8_lossy(key)
            ))
        })
}

// ── Tests ────────────────────────────────────────────────────────────────
