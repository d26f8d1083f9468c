//! Utility functions for sds-qabot
//!
//! Filesystem helpers shared by ingestion, packaging and the registry.

use crate::error::Result;
use std::path::{Path, PathBuf};

/// Get file extension from path
pub fn get_file_extension<P: AsRef<Path>>(path: P) -> Option<String> {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Check if a file is a supported document format
pub fn is_supported_document<P: AsRef<Path>>(path: P) -> bool {
    match get_file_extension(path) {
        Some(ext) => matches!(ext.as_str(), "pdf" | "txt" | "md" | "markdown"),
        None => false,
    }
}

/// List the entries of a directory sorted by file name (non-recursive)
pub fn list_directory_sorted<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let mut entries = std::fs::read_dir(dir.as_ref())?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    entries.sort();
    Ok(entries)
}

/// Format file size in human readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Total size of all files below `path`
pub fn directory_size<P: AsRef<Path>>(path: P) -> Result<u64> {
    let path = path.as_ref();
    if path.is_file() {
        return Ok(std::fs::metadata(path)?.len());
    }
    let mut total = 0;
    for entry in std::fs::read_dir(path)? {
        total += directory_size(entry?.path())?;
    }
    Ok(total)
}

/// Create directory if it doesn't exist
pub fn ensure_directory<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    Ok(())
}

/// Remove a directory and everything in it, then recreate it empty
pub fn reset_directory<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        std::fs::remove_dir_all(path)?;
    }
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Copy a directory tree, creating `to` as needed
pub fn copy_dir_recursive<P: AsRef<Path>, Q: AsRef<Path>>(from: P, to: Q) -> Result<u64> {
    let (from, to) = (from.as_ref(), to.as_ref());
    ensure_directory(to)?;

    let mut copied = 0;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copied += copy_dir_recursive(entry.path(), &target)?;
        } else {
            copied += std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(copied)
}

/// Whether `path` is `base` or lies below it.
///
/// Both paths are resolved through their nearest existing ancestor, so
/// paths that do not exist yet compare correctly against ones that do.
pub fn is_within<P: AsRef<Path>, Q: AsRef<Path>>(path: P, base: Q) -> Result<bool> {
    let path = resolve_path(path.as_ref())?;
    let base = resolve_path(base.as_ref())?;
    Ok(path.starts_with(&base))
}

/// Whether either path contains the other
pub fn paths_overlap<P: AsRef<Path>, Q: AsRef<Path>>(a: P, b: Q) -> Result<bool> {
    let (a, b) = (a.as_ref(), b.as_ref());
    Ok(is_within(a, b)? || is_within(b, a)?)
}

fn resolve_path(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }

    let mut resolved = existing
        .canonicalize()
        .unwrap_or_else(|_| existing.to_path_buf());
    for name in missing.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

/// Escape special characters for safe file naming
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_extension() {
        assert_eq!(get_file_extension("test.pdf"), Some("pdf".to_string()));
        assert_eq!(get_file_extension("test.PDF"), Some("pdf".to_string()));
        assert_eq!(get_file_extension("test"), None);
        assert_eq!(get_file_extension("test.tar.gz"), Some("gz".to_string()));
    }

    #[test]
    fn test_supported_document() {
        assert!(is_supported_document("acetone.pdf"));
        assert!(is_supported_document("README.md"));
        assert!(is_supported_document("notes.txt"));
        assert!(!is_supported_document("image.jpg"));
        assert!(!is_supported_document("sheet.docx"));
    }

    #[test]
    fn test_file_size_formatting() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1024), "1.0 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(1048576), "1.0 MB");
        assert_eq!(format_file_size(1073741824), "1.0 GB");
    }

    #[test]
    fn test_sorted_listing() {
        let dir = TempDir::new().unwrap();
        for name in ["c.pdf", "a.pdf", "b.txt"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        let names: Vec<_> = list_directory_sorted(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.pdf", "b.txt", "c.pdf"]);
    }

    #[test]
    fn test_reset_and_copy() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("one.bin"), b"1234").unwrap();
        std::fs::write(src.join("nested/two.bin"), b"56").unwrap();

        let dst = dir.path().join("dst");
        assert_eq!(copy_dir_recursive(&src, &dst).unwrap(), 6);
        assert!(dst.join("nested/two.bin").exists());
        assert_eq!(directory_size(&dst).unwrap(), 6);

        reset_directory(&dst).unwrap();
        assert!(dst.exists());
        assert_eq!(std::fs::read_dir(&dst).unwrap().count(), 0);
    }

    #[test]
    fn test_path_overlap() {
        let dir = TempDir::new().unwrap();
        let index = dir.path().join("index");
        std::fs::create_dir_all(&index).unwrap();

        assert!(is_within(index.join("not-yet/created"), &index).unwrap());
        assert!(is_within(&index, &index).unwrap());
        assert!(!is_within(dir.path(), &index).unwrap());
        assert!(paths_overlap(dir.path(), &index).unwrap());
        assert!(paths_overlap(&index, index.join("..").join("index")).unwrap());
        assert!(!paths_overlap(&index, dir.path().join("artifact")).unwrap());
        assert!(!paths_overlap(&index, dir.path().join("index-copy")).unwrap());
    }

    #[test]
    fn test_filename_sanitization() {
        assert_eq!(sanitize_filename("mfg-llm-qabot"), "mfg-llm-qabot");
        assert_eq!(
            sanitize_filename("file/with\\bad:chars*?.txt"),
            "file_with_bad_chars__.txt"
        );
    }
}
