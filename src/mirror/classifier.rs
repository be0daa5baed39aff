//! Content-based media classification.
//!
//! Decides the true category and canonical extension of a downloaded file
//! from a bounded prefix of its bytes, independent of the URL or declared
//! extension. The signature table is ordered most-specific-first; ties are
//! broken by declaration order.

use std::io::Read;
use std::path::Path;

use crate::files;
use crate::mirror::models::{ClassificationResult, MediaCategory};

/// How much of the file prefix is inspected.
const SNIFF_LEN: usize = 512;

struct Signature {
    prefix: &'static [u8],
    category: MediaCategory,
    extension: &'static str,
}

/// Plain prefix signatures. RIFF and ISO-BMFF containers carry their
/// subtype at an offset and are handled separately before this table.
const SIGNATURES: &[Signature] = &[
    Signature { prefix: b"\x89PNG\r\n\x1a\n", category: MediaCategory::Image, extension: ".png" },
    Signature { prefix: b"\xff\xd8\xff", category: MediaCategory::Image, extension: ".jpg" },
    Signature { prefix: b"GIF87a", category: MediaCategory::Image, extension: ".gif" },
    Signature { prefix: b"GIF89a", category: MediaCategory::Image, extension: ".gif" },
    Signature { prefix: b"II*\x00", category: MediaCategory::Image, extension: ".tiff" },
    Signature { prefix: b"MM\x00*", category: MediaCategory::Image, extension: ".tiff" },
    Signature { prefix: b"\x00\x00\x01\x00", category: MediaCategory::Image, extension: ".ico" },
    Signature { prefix: b"BM", category: MediaCategory::Image, extension: ".bmp" },
    // EBML header shared by WebM and Matroska; .webm is the canonical
    // extension for media fetched from the platform.
    Signature { prefix: b"\x1a\x45\xdf\xa3", category: MediaCategory::Video, extension: ".webm" },
    Signature { prefix: b"fLaC", category: MediaCategory::Other, extension: ".flac" },
    Signature { prefix: b"OggS", category: MediaCategory::Other, extension: ".ogg" },
    Signature { prefix: b"ID3", category: MediaCategory::Other, extension: ".mp3" },
    Signature { prefix: b"\xff\xfb", category: MediaCategory::Other, extension: ".mp3" },
];

/// RIFF container subtypes at offset 8.
const RIFF_SIGNATURES: &[(&[u8; 4], MediaCategory, &str)] = &[
    (b"WEBP", MediaCategory::Image, ".webp"),
    (b"AVI ", MediaCategory::Video, ".avi"),
    (b"WAVE", MediaCategory::Other, ".wav"),
];

/// Match a file-prefix against the signature table.
///
/// Returns the detected category and canonical extension, or None when no
/// signature matches.
pub fn sniff(header: &[u8]) -> Option<(MediaCategory, &'static str)> {
    if header.is_empty() {
        return None;
    }

    if header.starts_with(b"RIFF") && header.len() >= 12 {
        let subtype = &header[8..12];
        for (riff, category, ext) in RIFF_SIGNATURES {
            if subtype == *riff {
                return Some((*category, ext));
            }
        }
    }

    // ISO-BMFF: brand follows the "ftyp" box marker at offset 4.
    if header.len() >= 12 && &header[4..8] == b"ftyp" {
        let brand = &header[8..12];
        if brand.starts_with(b"isom") || brand.starts_with(b"mp4") {
            return Some((MediaCategory::Video, ".mp4"));
        }
        if brand.starts_with(b"qt") {
            return Some((MediaCategory::Video, ".mov"));
        }
        if brand.starts_with(b"heic") {
            return Some((MediaCategory::Image, ".heic"));
        }
    }

    SIGNATURES
        .iter()
        .find(|s| header.starts_with(s.prefix))
        .map(|s| (s.category, s.extension))
}

/// Classify a file on disk by content.
///
/// Unmatched content keeps its declared extension and is categorised as
/// `other`.
pub fn classify(path: &Path, declared_filename: &str) -> std::io::Result<ClassificationResult> {
    let mut header = vec![0u8; SNIFF_LEN];
    let mut file = std::fs::File::open(path)?;
    let read = file.read(&mut header)?;
    header.truncate(read);

    let declared_extension = files::extension_of(declared_filename);

    let (detected_category, detected_extension) = match sniff(&header) {
        Some((category, ext)) => (category, ext.to_string()),
        None => (MediaCategory::Other, declared_extension.clone()),
    };

    let corrected = detected_extension != declared_extension;

    Ok(ClassificationResult {
        local_path: path.to_path_buf(),
        detected_category,
        detected_extension,
        declared_extension,
        corrected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const JPEG_HEADER: &[u8] = b"\xff\xd8\xff\xe0\x00\x10JFIF";

    fn write_file(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn test_sniff_common_signatures() {
        assert_eq!(sniff(JPEG_HEADER), Some((MediaCategory::Image, ".jpg")));
        assert_eq!(
            sniff(b"\x89PNG\r\n\x1a\n\x00\x00"),
            Some((MediaCategory::Image, ".png"))
        );
        assert_eq!(
            sniff(b"\x1a\x45\xdf\xa3\x42\x86"),
            Some((MediaCategory::Video, ".webm"))
        );
        assert_eq!(sniff(b"ID3\x04rest"), Some((MediaCategory::Other, ".mp3")));
        assert_eq!(sniff(b""), None);
        assert_eq!(sniff(b"garbage bytes here"), None);
    }

    #[test]
    fn test_sniff_riff_subtypes() {
        assert_eq!(
            sniff(b"RIFF\x00\x00\x00\x00WEBPVP8 "),
            Some((MediaCategory::Image, ".webp"))
        );
        assert_eq!(
            sniff(b"RIFF\x00\x00\x00\x00AVI LIST"),
            Some((MediaCategory::Video, ".avi"))
        );
        assert_eq!(
            sniff(b"RIFF\x00\x00\x00\x00WAVEfmt "),
            Some((MediaCategory::Other, ".wav"))
        );
        // RIFF with unknown subtype falls through to no match.
        assert_eq!(sniff(b"RIFF\x00\x00\x00\x00XXXXdata"), None);
    }

    #[test]
    fn test_sniff_ftyp_brands() {
        assert_eq!(
            sniff(b"\x00\x00\x00\x20ftypisom\x00\x00\x02\x00"),
            Some((MediaCategory::Video, ".mp4"))
        );
        assert_eq!(
            sniff(b"\x00\x00\x00\x20ftypmp42\x00\x00\x00\x00"),
            Some((MediaCategory::Video, ".mp4"))
        );
        assert_eq!(
            sniff(b"\x00\x00\x00\x14ftypqt  \x00\x00\x00\x00"),
            Some((MediaCategory::Video, ".mov"))
        );
        assert_eq!(
            sniff(b"\x00\x00\x00\x20ftypheic\x00\x00\x00\x00"),
            Some((MediaCategory::Image, ".heic"))
        );
    }

    #[test]
    fn test_classify_jpeg_named_as_mp4() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "clip.mp4", JPEG_HEADER);

        let result = classify(&path, "clip.mp4").unwrap();
        assert_eq!(result.detected_category, MediaCategory::Image);
        assert_eq!(result.detected_extension, ".jpg");
        assert_eq!(result.declared_extension, ".mp4");
        assert!(result.corrected);
    }

    #[test]
    fn test_classify_matching_extension_is_not_corrected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "pic.jpg", JPEG_HEADER);

        let result = classify(&path, "pic.jpg").unwrap();
        assert_eq!(result.detected_category, MediaCategory::Image);
        assert!(!result.corrected);
    }

    #[test]
    fn test_classify_unknown_content_preserves_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "blob.dat", b"not a known format at all");

        let result = classify(&path, "blob.dat").unwrap();
        assert_eq!(result.detected_category, MediaCategory::Other);
        assert_eq!(result.detected_extension, ".dat");
        assert!(!result.corrected);
    }
}
