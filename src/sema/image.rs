//! Session images: declarations persisted as source text.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::decl::DeclOrigin;
use super::error::{SemaError, SemaResult};

/// Where a persisted declaration's code lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageOrigin {
    /// Only the declaration survives; code must be regenerated.
    Image,
    /// Code is provided by the library artifact.
    Library,
}

impl From<ImageOrigin> for DeclOrigin {
    fn from(origin: ImageOrigin) -> Self {
        match origin {
            ImageOrigin::Image => DeclOrigin::Image,
            ImageOrigin::Library => DeclOrigin::Library,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub origin: ImageOrigin,
    pub source: String,
}

/// A persisted set of declarations, stored as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionImage {
    #[serde(default)]
    pub declarations: Vec<ImageEntry>,
}

impl SessionImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, origin: ImageOrigin, source: impl Into<String>) -> Self {
        self.declarations.push(ImageEntry {
            origin,
            source: source.into(),
        });
        self
    }

    pub fn from_json(text: &str) -> SemaResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> SemaResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> SemaResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| SemaError::ImageIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn save(&self, path: &Path) -> SemaResult<()> {
        fs::write(path, self.to_json()?).map_err(|source| SemaError::ImageIo {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn library_entries(&self) -> impl Iterator<Item = &ImageEntry> {
        self.declarations
            .iter()
            .filter(|e| e.origin == ImageOrigin::Library)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_format() {
        let image = SessionImage::from_json(
            r#"{"declarations":[
                {"origin":"library","source":"int lib_add(int a, int b) { return a + b; }"},
                {"origin":"image","source":"int twice(int v) { return v * 2; }"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(image.declarations.len(), 2);
        assert_eq!(image.library_entries().count(), 1);
        assert_eq!(DeclOrigin::from(image.declarations[1].origin), DeclOrigin::Image);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let image = SessionImage::new().with_entry(ImageOrigin::Image, "const int k = 4;");
        image.save(&path).unwrap();
        assert_eq!(SessionImage::load(&path).unwrap(), image);
    }

    #[test]
    fn test_malformed_image() {
        assert!(matches!(
            SessionImage::from_json("{\"declarations\": 3}"),
            Err(SemaError::ImageFormat(_))
        ));
        assert!(matches!(
            SessionImage::load(Path::new("/nonexistent/inkling.json")),
            Err(SemaError::ImageIo { .. })
        ));
    }
}
