// Attachment format policy
// The same list backs server-side enforcement and the /formats display endpoint

use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_IMAGE_FORMATS: [&str; 5] = [".jpg", ".jpeg", ".png", ".bmp", ".tiff"];

/// Set of accepted attachment extensions, stored lowercase with a leading dot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct AcceptedFormats {
    extensions: Vec<String>,
}

impl Default for AcceptedFormats {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_FORMATS)
    }
}

impl From<Vec<String>> for AcceptedFormats {
    fn from(extensions: Vec<String>) -> Self {
        Self::new(extensions)
    }
}

impl From<AcceptedFormats> for Vec<String> {
    fn from(formats: AcceptedFormats) -> Self {
        formats.extensions
    }
}

impl AcceptedFormats {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for ext in extensions {
            let ext = ext.as_ref().trim().to_ascii_lowercase();
            if ext.is_empty() || ext == "." {
                continue;
            }
            let ext = if ext.starts_with('.') { ext } else { format!(".{}", ext) };
            if !normalized.contains(&ext) {
                normalized.push(ext);
            }
        }
        Self { extensions: normalized }
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Lowercase extension of `name` (with dot), if any
    pub fn extension_of(name: &str) -> Option<String> {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
            .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
    }

    /// Returns the matched extension when `name` carries an accepted one
    pub fn matching_extension(&self, name: &str) -> Option<String> {
        Self::extension_of(name).filter(|ext| self.extensions.contains(ext))
    }

    pub fn accepts(&self, name: &str) -> bool {
        self.matching_extension(name).is_some()
    }

    /// Display string, e.g. "JPG, JPEG, PNG, BMP, TIFF"
    pub fn display_string(&self) -> String {
        self.extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_uppercase())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_display_string() {
        assert_eq!(
            AcceptedFormats::default().display_string(),
            "JPG, JPEG, PNG, BMP, TIFF"
        );
    }

    #[test]
    fn test_case_insensitive_match() {
        let formats = AcceptedFormats::default();
        assert!(formats.accepts("Photo.PNG"));
        assert_eq!(formats.matching_extension("a.JpEg"), Some(".jpeg".to_string()));
        assert!(!formats.accepts("notes.txt"));
        assert!(!formats.accepts("no_extension"));
    }

    #[test]
    fn test_new_normalizes_and_dedupes() {
        let formats = AcceptedFormats::new(["PNG", ".png", " .gif ", ""]);
        assert_eq!(formats.extensions(), [".png".to_string(), ".gif".to_string()]);
    }

    #[test]
    fn test_deserializes_from_plain_list() {
        let formats: AcceptedFormats = serde_json::from_str(r#"["webp", ".PNG"]"#).unwrap();
        assert_eq!(formats.display_string(), "WEBP, PNG");
    }
}
