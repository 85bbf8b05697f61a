//! PDF text and image extraction.
//!
//! Text comes from the first pages via `lopdf`, falling back to
//! `pdf-extract` for documents lopdf cannot decode. Images are the embedded
//! XObject streams: JPEG and JPEG 2000 streams are already complete files,
//! and 8-bit Flate streams in gray, RGB or CMYK are re-encoded as PNG. Each
//! is written out under a content-hash name.

use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::Path;

use flate2::read::ZlibDecoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use lopdf::{Dictionary, Document, Object, Stream};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::doi::find_doi_in_text;
use crate::error::{AppError, AppResult};
use crate::library::Library;
use crate::models::Paper;

/// Pages scanned for title and DOI.
const TEXT_PAGES: u32 = 3;
const SCRATCH_DIR: &str = "temp_extract";
/// Images at or below this size are icons and logos.
const MIN_COVER_BYTES: u64 = 30_000;
/// A first image smaller than this is usually a publisher banner.
const SMALL_FIRST_IMAGE_BYTES: u64 = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedImage {
    pub filename: String,
    pub url: String,
    pub size: u64,
}

/// Everything pulled out of an uploaded PDF in one pass.
#[derive(Debug, Clone, Serialize)]
pub struct PdfExtraction {
    pub text: String,
    pub doi: Option<String>,
    pub title_guess: Option<String>,
    pub images: Vec<ExtractedImage>,
}

// ============================================================================
// Text
// ============================================================================

/// Text of the first few pages.
pub fn extract_text(bytes: &[u8]) -> AppResult<String> {
    extract_pages(bytes, Some(TEXT_PAGES as usize)).map(|(text, _)| text)
}

/// Text of the whole document and its page count (0 when only the
/// fallback extractor could read it).
pub fn full_text(bytes: &[u8]) -> AppResult<(String, usize)> {
    extract_pages(bytes, None)
}

fn extract_pages(bytes: &[u8], limit: Option<usize>) -> AppResult<(String, usize)> {
    match Document::load_mem(bytes) {
        Ok(doc) => {
            let all = doc.get_pages();
            let pages: Vec<u32> = all
                .keys()
                .copied()
                .take(limit.unwrap_or(usize::MAX))
                .collect();
            match doc.extract_text(&pages) {
                Ok(text) if !text.trim().is_empty() => return Ok((text, all.len())),
                Ok(_) => tracing::debug!("lopdf returned no text, trying pdf-extract"),
                Err(e) => tracing::debug!(error = %e, "lopdf text extraction failed"),
            }
        }
        Err(e) => tracing::debug!(error = %e, "lopdf could not load PDF"),
    }

    pdf_extract::extract_text_from_mem(bytes)
        .map(|text| (text, 0))
        .map_err(|e| AppError::Validation(format!("Could not read PDF: {}", e)))
}

/// First plausible title line: long enough to be a sentence fragment and
/// not a header, page number or identifier line.
pub fn guess_title(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| (10..=200).contains(&line.chars().count()))
        .find(|line| {
            let lower = line.to_lowercase();
            !line.starts_with(|c: char| c.is_ascii_digit())
                && !lower.starts_with("arxiv")
                && !lower.starts_with("doi")
                && !lower.starts_with("http")
                && !lower.contains('@')
                && line.chars().any(|c| c.is_alphabetic())
        })
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
}

// ============================================================================
// Images
// ============================================================================

/// File extension and bytes of an image stream, or None for streams that
/// are not images or use an encoding we cannot turn into a file.
fn decode_image(doc: &Document, stream: &Stream) -> Option<(&'static str, Vec<u8>)> {
    let subtype = stream.dict.get(b"Subtype").ok()?.as_name().ok()?;
    if subtype != b"Image" {
        return None;
    }
    let filter: &[u8] = match stream.dict.get(b"Filter").ok()? {
        Object::Name(name) => name,
        Object::Array(filters) if filters.len() == 1 => filters[0].as_name().ok()?,
        _ => return None,
    };
    match filter {
        b"DCTDecode" => Some(("jpg", stream.content.clone())),
        b"JPXDecode" => Some(("jp2", stream.content.clone())),
        b"FlateDecode" => flate_to_png(doc, stream).map(|png| ("png", png)),
        _ => None,
    }
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Components per pixel of an image color space.
fn color_components(doc: &Document, space: &Object) -> Option<usize> {
    match resolve(doc, space)? {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" => Some(1),
            b"DeviceRGB" | b"CalRGB" => Some(3),
            b"DeviceCMYK" => Some(4),
            _ => None,
        },
        Object::Array(items) => match items.first()?.as_name().ok()? {
            b"CalGray" => Some(1),
            b"CalRGB" => Some(3),
            b"ICCBased" => {
                let profile = resolve(doc, items.get(1)?)?.as_stream().ok()?;
                let n = profile.dict.get(b"N").ok()?.as_i64().ok()?;
                usize::try_from(n).ok()
            }
            _ => None,
        },
        _ => None,
    }
}

fn int_entry(dict: &Dictionary, key: &[u8]) -> Option<i64> {
    dict.get(key).ok()?.as_i64().ok()
}

/// Inflate an 8-bit image stream and encode its pixels as PNG.
fn flate_to_png(doc: &Document, stream: &Stream) -> Option<Vec<u8>> {
    let dict = &stream.dict;
    let width = u32::try_from(int_entry(dict, b"Width")?).ok()?;
    let height = u32::try_from(int_entry(dict, b"Height")?).ok()?;
    let bits = int_entry(dict, b"BitsPerComponent").unwrap_or(8);
    if bits != 8 || width == 0 || height == 0 {
        return None;
    }
    let components = color_components(doc, dict.get(b"ColorSpace").ok()?)?;

    let mut raw = Vec::new();
    ZlibDecoder::new(stream.content.as_slice())
        .read_to_end(&mut raw)
        .ok()?;

    let row_len = (width as usize).checked_mul(components)?;
    let predictor = dict
        .get(b"DecodeParms")
        .ok()
        .and_then(|params| resolve(doc, params))
        .and_then(|params| params.as_dict().ok())
        .and_then(|params| int_entry(params, b"Predictor"))
        .unwrap_or(1);
    let mut pixels = match predictor {
        1 => raw,
        10..=15 => undo_png_predictor(&raw, row_len, components)?,
        _ => return None,
    };

    let expected = row_len.checked_mul(height as usize)?;
    if pixels.len() < expected {
        return None;
    }
    pixels.truncate(expected);

    let (pixels, color) = match components {
        1 => (pixels, ExtendedColorType::L8),
        3 => (pixels, ExtendedColorType::Rgb8),
        4 => (cmyk_to_rgb(&pixels), ExtendedColorType::Rgb8),
        _ => return None,
    };
    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(&pixels, width, height, color)
        .ok()?;
    Some(png)
}

/// Reverse the per-row PNG filters (predictors 10 to 15) of 8-bit samples.
fn undo_png_predictor(data: &[u8], row_len: usize, bpp: usize) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut prev = vec![0u8; row_len];
    for chunk in data.chunks(row_len + 1) {
        let (&kind, filtered) = chunk.split_first()?;
        if filtered.len() < row_len {
            break;
        }
        let mut row = filtered.to_vec();
        for i in 0..row_len {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let up = prev[i];
            let up_left = if i >= bpp { prev[i - bpp] } else { 0 };
            let delta = match kind {
                0 => 0,
                1 => left,
                2 => up,
                3 => ((u16::from(left) + u16::from(up)) / 2) as u8,
                4 => paeth(left, up, up_left),
                _ => return None,
            };
            row[i] = row[i].wrapping_add(delta);
        }
        out.extend_from_slice(&row);
        prev = row;
    }
    Some(out)
}

fn paeth(left: u8, up: u8, up_left: u8) -> u8 {
    let p = i16::from(left) + i16::from(up) - i16::from(up_left);
    let pa = (p - i16::from(left)).abs();
    let pb = (p - i16::from(up)).abs();
    let pc = (p - i16::from(up_left)).abs();
    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        up
    } else {
        up_left
    }
}

fn cmyk_to_rgb(cmyk: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(cmyk.len() / 4 * 3);
    for px in cmyk.chunks_exact(4) {
        let k = 255 - u16::from(px[3]);
        for &c in &px[..3] {
            rgb.push(((255 - u16::from(c)) * k / 255) as u8);
        }
    }
    rgb
}

/// Image files embedded in `doc` with their names, deduplicated by stream
/// content and in object order.
pub fn embedded_images(doc: &Document) -> Vec<(String, Vec<u8>)> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for object in doc.objects.values() {
        let Object::Stream(stream) = object else {
            continue;
        };
        let subtype = stream.dict.get(b"Subtype").and_then(Object::as_name).ok();
        if subtype != Some(&b"Image"[..]) {
            continue;
        }
        let digest = format!("{:x}", Sha256::digest(&stream.content));
        if seen.contains(&digest) {
            continue;
        }
        let Some((ext, bytes)) = decode_image(doc, stream) else {
            continue;
        };
        out.push((format!("img_{}.{}", &digest[..16], ext), bytes));
        seen.insert(digest);
    }
    out
}

/// Write embedded images into `out_dir`. `url_prefix` is prepended to each
/// file name to form its web path.
pub fn extract_images(bytes: &[u8], out_dir: &Path, url_prefix: &str) -> AppResult<Vec<ExtractedImage>> {
    let doc = Document::load_mem(bytes)
        .map_err(|e| AppError::Validation(format!("Could not read PDF: {}", e)))?;
    fs::create_dir_all(out_dir)?;

    let mut images = Vec::new();
    for (filename, content) in embedded_images(&doc) {
        let path = out_dir.join(&filename);
        if !path.exists() {
            fs::write(&path, &content)?;
        }
        images.push(ExtractedImage {
            url: format!("{}/{}", url_prefix.trim_end_matches('/'), filename),
            size: content.len() as u64,
            filename,
        });
    }
    tracing::debug!(count = images.len(), "Extracted PDF images");
    Ok(images)
}

/// Pick a cover: ignore small images; when the first remaining one is still
/// modest in size and there is another, prefer the second.
pub fn choose_cover(images: &[ExtractedImage]) -> Option<&ExtractedImage> {
    let large: Vec<&ExtractedImage> = images.iter().filter(|i| i.size > MIN_COVER_BYTES).collect();
    match large.as_slice() {
        [] => None,
        [first, second, ..] if first.size < SMALL_FIRST_IMAGE_BYTES => Some(*second),
        [first, ..] => Some(*first),
    }
}

/// Store `bytes` as the paper's PDF and derive a cover from its images.
/// Returns the cover's web path when one was chosen; a PDF whose images
/// cannot be read simply gets no cover.
pub fn store_with_cover(library: &Library, paper: &Paper, bytes: &[u8]) -> AppResult<Option<String>> {
    library.store_pdf(paper, bytes)?;
    let (_, dir) = library.ensure_folder(paper)?;
    let scratch = dir.join(SCRATCH_DIR);

    let cover = match extract_images(bytes, &scratch, "") {
        Ok(images) => match choose_cover(&images) {
            Some(image) => Some(library.cover_from_file(paper, &scratch.join(&image.filename))?),
            None => None,
        },
        Err(e) => {
            tracing::debug!(paper_id = paper.id, error = %e, "No cover extracted");
            None
        }
    };

    if scratch.exists() {
        if let Err(e) = fs::remove_dir_all(&scratch) {
            tracing::warn!(path = %scratch.display(), error = %e, "Could not remove scratch directory");
        }
    }
    Ok(cover)
}

/// Text, DOI, title guess and images of an uploaded PDF. Text failures are
/// fatal; image failures only leave the image list empty.
pub fn analyze(bytes: &[u8], images_dir: &Path, url_prefix: &str) -> AppResult<PdfExtraction> {
    let text = extract_text(bytes)?;
    let doi = find_doi_in_text(&text);
    let title_guess = guess_title(&text);
    let images = match extract_images(bytes, images_dir, url_prefix) {
        Ok(images) => images,
        Err(e) => {
            tracing::warn!(error = %e, "Image extraction failed");
            Vec::new()
        }
    };
    Ok(PdfExtraction {
        text,
        doi,
        title_guess,
        images,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn image(name: &str, size: u64) -> ExtractedImage {
        ExtractedImage {
            filename: name.to_string(),
            url: format!("/x/{}", name),
            size,
        }
    }

    fn image_stream(filter: Object, content: &[u8]) -> Object {
        let mut dict = Dictionary::new();
        dict.set("Type", Object::Name(b"XObject".to_vec()));
        dict.set("Subtype", Object::Name(b"Image".to_vec()));
        dict.set("Filter", filter);
        Object::Stream(Stream::new(dict, content.to_vec()))
    }

    #[test]
    fn test_choose_cover() {
        assert_eq!(choose_cover(&[]), None);
        assert_eq!(choose_cover(&[image("a", 10_000)]), None);

        let imgs = [image("logo", 5_000), image("big", 200_000), image("next", 50_000)];
        assert_eq!(choose_cover(&imgs).map(|i| i.filename.as_str()), Some("big"));

        let imgs = [image("banner", 60_000), image("figure", 150_000)];
        assert_eq!(choose_cover(&imgs).map(|i| i.filename.as_str()), Some("figure"));

        let imgs = [image("only", 60_000), image("tiny", 100)];
        assert_eq!(choose_cover(&imgs).map(|i| i.filename.as_str()), Some("only"));
    }

    #[test]
    fn test_guess_title_skips_noise() {
        let text = "1\narXiv:2101.00001v2 [cs.LG]\n\nLearning   to Rank with Graphs\nAda Lovelace\nada@example.org\n";
        assert_eq!(guess_title(text).as_deref(), Some("Learning to Rank with Graphs"));
        assert_eq!(guess_title("short\n12345678901234"), None);
    }

    #[test]
    fn test_embedded_images_filters_and_dedupes() {
        let mut doc = Document::with_version("1.5");
        doc.add_object(image_stream(Object::Name(b"DCTDecode".to_vec()), b"jpeg-bytes"));
        doc.add_object(image_stream(Object::Name(b"DCTDecode".to_vec()), b"jpeg-bytes"));
        doc.add_object(image_stream(
            Object::Array(vec![Object::Name(b"JPXDecode".to_vec())]),
            b"jp2-bytes",
        ));
        doc.add_object(image_stream(Object::Name(b"FlateDecode".to_vec()), b"raw"));
        doc.add_object(Object::Integer(7));

        let images = embedded_images(&doc);
        assert_eq!(images.len(), 2);
        assert!(images[0].0.starts_with("img_") && images[0].0.ends_with(".jpg"));
        assert_eq!(images[0].1, b"jpeg-bytes".to_vec());
        assert!(images[1].0.ends_with(".jp2"));
    }

    #[test]
    fn test_flate_images_become_png() {
        let mut doc = Document::with_version("1.5");
        let rgb = fixtures::noise(4 * 3 * 3, 1);
        doc.add_object(fixtures::flate_image(4, 3, "DeviceRGB", &rgb));
        doc.add_object(fixtures::flate_image(2, 2, "DeviceGray", &[0, 64, 128, 255]));
        doc.add_object(fixtures::flate_image(1, 1, "DeviceCMYK", &[0, 255, 255, 0]));
        // 16-bit samples are skipped
        let mut deep = fixtures::flate_image(1, 1, "DeviceGray", &[0, 0]);
        deep.dict.set("BitsPerComponent", 16);
        doc.add_object(deep);
        // truncated pixel data is skipped
        doc.add_object(fixtures::flate_image(10, 10, "DeviceRGB", &[1, 2, 3]));

        let images = embedded_images(&doc);
        assert_eq!(images.len(), 3);
        assert!(images.iter().all(|(name, _)| name.ends_with(".png")));

        let decoded: Vec<image::DynamicImage> = images
            .iter()
            .map(|(_, bytes)| image::load_from_memory_with_format(bytes, image::ImageFormat::Png).unwrap())
            .collect();
        assert_eq!((decoded[0].width(), decoded[0].height()), (4, 3));
        assert_eq!(decoded[0].to_rgb8().into_raw(), rgb);
        assert_eq!(decoded[1].to_luma8().into_raw(), vec![0, 64, 128, 255]);
        assert_eq!(decoded[2].to_rgb8().into_raw(), vec![255, 0, 0]);
    }

    #[test]
    fn test_flate_image_with_png_predictor() {
        let mut doc = Document::with_version("1.5");
        let rows: &[u8] = &[
            0, 10, 20, 30, 40, 50, 60, // None
            2, 1, 1, 1, 1, 1, 1, // Up
            1, 5, 5, 5, 1, 1, 1, // Sub
        ];
        let mut stream = fixtures::flate_image(2, 3, "DeviceRGB", rows);
        stream.dict.set("DecodeParms", dictionary! { "Predictor" => 15 });
        let color_space = doc.add_object(Object::Name(b"DeviceRGB".to_vec()));
        stream.dict.set("ColorSpace", color_space);
        doc.add_object(stream);

        let images = embedded_images(&doc);
        assert_eq!(images.len(), 1);
        let decoded =
            image::load_from_memory_with_format(&images[0].1, image::ImageFormat::Png).unwrap();
        assert_eq!(
            decoded.to_rgb8().into_raw(),
            vec![10, 20, 30, 40, 50, 60, 11, 21, 31, 41, 51, 61, 5, 5, 5, 6, 6, 6]
        );
    }

    #[test]
    fn test_analyze_real_document() {
        let bytes = fixtures::sample_pdf(
            &[
                "Verified Compilation of Streaming Programs",
                "Ada Lovelace",
                "doi:10.1145/3519939.3523707",
            ],
            120,
        );
        let dir = tempfile::tempdir().unwrap();
        let result = analyze(&bytes, dir.path(), "/api/extracted-images").unwrap();

        assert_eq!(result.doi.as_deref(), Some("10.1145/3519939.3523707"));
        assert_eq!(
            result.title_guess.as_deref(),
            Some("Verified Compilation of Streaming Programs")
        );
        assert_eq!(result.images.len(), 1);
        let image = &result.images[0];
        assert!(image.filename.ends_with(".png"));
        assert!(image.size > MIN_COVER_BYTES);
        assert_eq!(image.url, format!("/api/extracted-images/{}", image.filename));
        assert!(dir.path().join(&image.filename).is_file());
    }

    #[test]
    fn test_store_with_cover_tolerates_unreadable_images() {
        let tmp = tempfile::tempdir().unwrap();
        let library = Library::new(tmp.path().join("MyPapers"), tmp.path().join("uploads"));
        let paper = Paper::from_input(
            4,
            &crate::models::PaperInput {
                title: Some("Scanned".to_string()),
                authors: Some("A".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        let cover = store_with_cover(&library, &paper, b"not really a pdf").unwrap();
        assert_eq!(cover, None);
        assert!(library.pdf_path(&paper).is_some());
        assert!(!tmp.path().join("MyPapers/scanned_4").join(SCRATCH_DIR).exists());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            extract_text(b"definitely not a pdf"),
            Err(AppError::Validation(_))
        ));
        let dir = tempfile::tempdir().unwrap();
        assert!(extract_images(b"nope", dir.path(), "/api/extracted-images").is_err());
    }
}
