//! On-disk layout for the mirror.
//!
//! One folder per creator under the output root, with `Images/`, `Videos/`
//! and `Other/` subfolders. Filenames come from the asset URL path,
//! sanitised for the filesystem. In-progress writes live in staging temp
//! files and reach their final name only through an atomic rename.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

use crate::mirror::models::MediaCategory;

/// Well-known report filenames at the output root.
pub const CORRUPT_REPORT_FILENAME: &str = "InvalidMedia.json";
pub const CORRECTIONS_REPORT_FILENAME: &str = "ExtensionCorrections.json";
const IGNORE_FILENAME: &str = "ignore.txt";

/// Maps URLs and categories to paths under the output root.
#[derive(Debug, Clone)]
pub struct FileLayout {
    output_root: PathBuf,
    image_extensions: Vec<String>,
    video_extensions: Vec<String>,
}

impl FileLayout {
    pub fn new(
        output_root: PathBuf,
        image_extensions: Vec<String>,
        video_extensions: Vec<String>,
    ) -> Self {
        Self {
            output_root,
            image_extensions,
            video_extensions,
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn creator_root(&self, creator: &str) -> PathBuf {
        self.output_root.join(creator)
    }

    pub fn category_dir(&self, creator: &str, category: MediaCategory) -> PathBuf {
        self.creator_root(creator).join(category.folder_name())
    }

    pub fn corrupt_report_path(&self) -> PathBuf {
        self.output_root.join(CORRUPT_REPORT_FILENAME)
    }

    pub fn corrections_report_path(&self) -> PathBuf {
        self.output_root.join(CORRECTIONS_REPORT_FILENAME)
    }

    pub fn metadata_export_path(&self, creator: &str) -> PathBuf {
        self.creator_root(creator)
            .join(format!("{creator}_all_data.json"))
    }

    /// Category implied by a filename's extension, per the configured
    /// extension lists. This governs inclusion only; content classification
    /// happens after download.
    pub fn declared_category(&self, filename: &str) -> MediaCategory {
        let ext = extension_of(filename);
        if self.image_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
            MediaCategory::Image
        } else if self.video_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
            MediaCategory::Video
        } else {
            MediaCategory::Other
        }
    }

    /// Load a creator's ignore list (newline-delimited filenames). A missing
    /// file is an empty list, not an error.
    pub fn load_ignore_list(&self, creator: &str) -> Result<HashSet<String>> {
        let path = self.creator_root(creator).join(IGNORE_FILENAME);
        if !path.exists() {
            return Ok(HashSet::new());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read ignore list {path:?}"))?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Base names (lowercased stems) of all files in a folder whose
    /// extension is recognised. Used for extension-agnostic existence
    /// checks, so a file corrected from `.mp4` to `.webm` in a prior run
    /// still counts as present.
    pub fn existing_base_names(&self, dir: &Path) -> HashSet<String> {
        let mut bases = HashSet::new();
        let Ok(entries) = std::fs::read_dir(dir) else {
            return bases;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                bases.insert(base_name(&entry.file_name().to_string_lossy()));
            }
        }
        bases
    }

    /// Create a staging file in the creator's root directory. Staging lives
    /// on the same filesystem as the final destination so promotion is a
    /// rename, never a copy.
    pub fn staging_file(&self, creator: &str) -> Result<NamedTempFile> {
        let root = self.creator_root(creator);
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create creator directory {root:?}"))?;
        NamedTempFile::new_in(&root).context("failed to create staging file")
    }

    /// Atomically promote a staging file to its final path.
    pub fn promote(&self, staged: NamedTempFile, final_path: &Path) -> Result<()> {
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {parent:?}"))?;
        }
        staged
            .persist(final_path)
            .with_context(|| format!("failed to promote staging file to {final_path:?}"))?;
        Ok(())
    }
}

/// Extract a filesystem-safe filename from a URL path.
pub fn filename_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    // Drop the scheme and host so a bare "https://host/" never yields the
    // host as a filename.
    let path = match without_query.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, p)| p).unwrap_or(""),
        None => without_query,
    };
    let raw = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    let mut name: String = raw
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect();
    if name.is_empty() {
        name = "file.bin".to_string();
    }
    name
}

/// Extension (with leading dot, lowercased) of a filename, or `.bin` when
/// there is none.
pub fn extension_of(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => format!(".{}", ext.to_lowercase()),
        _ => ".bin".to_string(),
    }
}

/// Lowercased stem of a filename, for extension-agnostic matching.
pub fn base_name(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_lowercase(),
        _ => filename.to_lowercase(),
    }
}

/// Swap a filename's extension, keeping the stem.
pub fn with_extension(filename: &str, new_ext: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{stem}{new_ext}"),
        _ => format!("{filename}{new_ext}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn layout(root: &Path) -> FileLayout {
        FileLayout::new(
            root.to_path_buf(),
            vec![".jpg".into(), ".jpeg".into(), ".png".into(), ".webp".into()],
            vec![".mp4".into(), ".webm".into()],
        )
    }

    #[test]
    fn test_filename_from_url_strips_query_and_sanitises() {
        assert_eq!(
            filename_from_url("https://cdn.example/abc/def.jpg?width=450"),
            "def.jpg"
        );
        assert_eq!(filename_from_url("https://cdn.example/a:b*c.mp4"), "a_b_c.mp4");
        assert_eq!(filename_from_url("https://cdn.example/"), "file.bin");
    }

    #[test]
    fn test_filename_from_url_never_returns_the_host() {
        assert_eq!(filename_from_url("https://cdn.example"), "file.bin");
        assert_eq!(filename_from_url("https://cdn.example/?width=450"), "file.bin");
        assert_eq!(filename_from_url("https://cdn.example/sub/"), "sub");
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("clip.MP4"), ".mp4");
        assert_eq!(extension_of("noext"), ".bin");
        assert_eq!(extension_of(".hidden"), ".bin");
    }

    #[test]
    fn test_base_name_ignores_extension_and_case() {
        assert_eq!(base_name("ABC-123.mp4"), "abc-123");
        assert_eq!(base_name("abc-123.webm"), "abc-123");
        assert_eq!(base_name("plain"), "plain");
    }

    #[test]
    fn test_with_extension() {
        assert_eq!(with_extension("clip.mp4", ".webm"), "clip.webm");
        assert_eq!(with_extension("noext", ".jpg"), "noext.jpg");
    }

    #[test]
    fn test_declared_category_by_extension_lists() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());

        assert_eq!(layout.declared_category("a.JPG"), MediaCategory::Image);
        assert_eq!(layout.declared_category("a.webm"), MediaCategory::Video);
        assert_eq!(layout.declared_category("a.zip"), MediaCategory::Other);
    }

    #[test]
    fn test_ignore_list_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        assert!(layout.load_ignore_list("alice").unwrap().is_empty());
    }

    #[test]
    fn test_ignore_list_parses_lines() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let creator_root = layout.creator_root("alice");
        std::fs::create_dir_all(&creator_root).unwrap();
        std::fs::write(creator_root.join("ignore.txt"), "a.jpg\n\n  b.mp4 \n").unwrap();

        let ignored = layout.load_ignore_list("alice").unwrap();
        assert_eq!(ignored.len(), 2);
        assert!(ignored.contains("a.jpg"));
        assert!(ignored.contains("b.mp4"));
    }

    #[test]
    fn test_promote_is_visible_under_final_name_only() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());

        let mut staged = layout.staging_file("alice").unwrap();
        staged.write_all(b"payload").unwrap();

        let final_path = layout.category_dir("alice", MediaCategory::Image).join("a.jpg");
        assert!(!final_path.exists());

        layout.promote(staged, &final_path).unwrap();
        assert_eq!(std::fs::read(&final_path).unwrap(), b"payload");

        // No staging leftovers in the creator root.
        let leftovers: Vec<_> = std::fs::read_dir(layout.creator_root("alice"))
            .unwrap()
            .flatten()
            .filter(|e| e.path().is_file())
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_existing_base_names_scan() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let images = layout.category_dir("alice", MediaCategory::Image);
        std::fs::create_dir_all(&images).unwrap();
        std::fs::write(images.join("Seen-1.webp"), b"x").unwrap();

        let bases = layout.existing_base_names(&images);
        assert!(bases.contains("seen-1"));
        assert!(!bases.contains("seen-2"));
    }
}
