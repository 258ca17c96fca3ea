use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::Context;

/// Raster extensions a folder scan picks up (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "tiff"];

/// Check if a file name carries one of the supported image extensions
pub fn is_image_name(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Names of every regular file directly inside `dir`.
///
/// Non-UTF-8 names are skipped: they can be neither keyed nor renamed
/// reliably.
pub fn list_files(dir: &Path) -> anyhow::Result<HashSet<String>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("cannot read folder {}", dir.display()))?;
    let mut names = HashSet::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("cannot read folder {}", dir.display()))?;
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false)
            || entry.path().is_file();
        if !is_file {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            names.insert(name);
        }
    }
    Ok(names)
}

/// Supported image files directly inside `dir`, sorted by name.
pub fn list_images(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut images: Vec<String> = list_files(dir)?
        .into_iter()
        .filter(|name| is_image_name(name))
        .collect();
    images.sort();
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_is_image_name() {
        assert!(is_image_name("a.jpg"));
        assert!(is_image_name("B.JPEG"));
        assert!(is_image_name("scan.TiFf"));
        assert!(!is_image_name("scan.tif"));
        assert!(!is_image_name("notes.txt"));
        assert!(!is_image_name("png"));
    }

    #[test]
    fn test_list_images_filters_and_sorts() {
        let dir = tempdir().unwrap();
        for name in ["b.png", "a.JPG", "readme.md", "c.gif"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.png")).unwrap();

        let images = list_images(dir.path()).unwrap();
        assert_eq!(images, vec!["a.JPG", "b.png", "c.gif"]);
        assert_eq!(list_files(dir.path()).unwrap().len(), 4);
    }

    #[test]
    fn test_missing_folder_is_an_error() {
        let dir = tempdir().unwrap();
        let err = list_images(&dir.path().join("gone")).unwrap_err();
        assert!(err.to_string().contains("cannot read folder"));
    }
}
