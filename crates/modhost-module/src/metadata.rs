//! Module manifest (`metadata.json`) reading and validation.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::MetadataError;

/// Manifest filename at the module root.
pub const MANIFEST_FILE: &str = "metadata.json";

/// Languages sharing the host's compile-and-load strategy.
pub const SUPPORTED_LANGUAGES: &[&str] = &["rust"];

/// Validated module manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleMetadata {
    pub name: String,
    pub description: String,
    pub version: String,
    pub creator: String,
    pub contact: String,
    pub language: String,
}

/// Manifest as found on disk; every field may be absent.
#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    name: Option<String>,
    description: Option<String>,
    version: Option<String>,
    creator: Option<String>,
    contact: Option<String>,
    #[serde(alias = "lang")]
    language: Option<String>,
}

/// Read and validate the manifest in `module_dir`. No side effects.
pub fn read_metadata(module_dir: &Path) -> Result<ModuleMetadata, MetadataError> {
    let path = module_dir.join(MANIFEST_FILE);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MetadataError::Missing(path));
        }
        Err(source) => return Err(MetadataError::Read { path, source }),
    };
    let raw: RawMetadata = serde_json::from_str(&contents)
        .map_err(|source| MetadataError::Malformed { path, source })?;
    validate(raw)
}

fn validate(raw: RawMetadata) -> Result<ModuleMetadata, MetadataError> {
    fn required(value: Option<String>, field: &'static str) -> Result<String, MetadataError> {
        match value {
            Some(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(MetadataError::MissingField { field }),
        }
    }

    let metadata = ModuleMetadata {
        name: required(raw.name, "name")?,
        description: required(raw.description, "description")?,
        version: required(raw.version, "version")?,
        creator: required(raw.creator, "creator")?,
        contact: required(raw.contact, "contact")?,
        language: required(raw.language, "language")?,
    };

    let language = metadata.language.trim().to_ascii_lowercase();
    if !SUPPORTED_LANGUAGES.contains(&language.as_str()) {
        return Err(MetadataError::UnsupportedLanguage {
            language: metadata.language,
            supported: SUPPORTED_LANGUAGES.iter().map(|s| s.to_string()).collect(),
        });
    }

    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn full() -> Value {
        json!({
            "name": "demo",
            "description": "x",
            "version": "1.0",
            "creator": "a",
            "contact": "a@b.com",
            "language": "rust"
        })
    }

    fn write(dir: &Path, value: &Value) {
        std::fs::write(dir.join(MANIFEST_FILE), value.to_string()).unwrap();
    }

    #[test]
    fn test_valid_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), &full());
        let metadata = read_metadata(tmp.path()).unwrap();
        assert_eq!(metadata.name, "demo");
        assert_eq!(metadata.contact, "a@b.com");
        assert_eq!(metadata.language, "rust");
    }

    #[test]
    fn test_lang_alias() {
        let tmp = tempfile::tempdir().unwrap();
        let mut value = full();
        let lang = value.as_object_mut().unwrap().remove("language").unwrap();
        value["lang"] = lang;
        write(tmp.path(), &value);
        assert_eq!(read_metadata(tmp.path()).unwrap().language, "rust");
    }

    #[test]
    fn test_each_missing_field_is_named() {
        for field in ["name", "description", "version", "creator", "contact"] {
            let tmp = tempfile::tempdir().unwrap();
            let mut value = full();
            value.as_object_mut().unwrap().remove(field);
            write(tmp.path(), &value);
            let err = read_metadata(tmp.path()).unwrap_err();
            assert_eq!(err.field_name(), Some(field), "{err}");
            assert!(matches!(err, MetadataError::MissingField { .. }));
        }
    }

    #[test]
    fn test_empty_field_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut value = full();
        value["version"] = json!("  ");
        write(tmp.path(), &value);
        let err = read_metadata(tmp.path()).unwrap_err();
        assert_eq!(err.field_name(), Some("version"));
    }

    #[test]
    fn test_unsupported_language() {
        let tmp = tempfile::tempdir().unwrap();
        let mut value = full();
        value["language"] = json!("go");
        write(tmp.path(), &value);
        match read_metadata(tmp.path()).unwrap_err() {
            MetadataError::UnsupportedLanguage {
                language,
                supported,
            } => {
                assert_eq!(language, "go");
                assert_eq!(supported, vec!["rust".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_and_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_metadata(tmp.path()),
            Err(MetadataError::Missing(_))
        ));
        std::fs::write(tmp.path().join(MANIFEST_FILE), "{ not json").unwrap();
        assert!(matches!(
            read_metadata(tmp.path()),
            Err(MetadataError::Malformed { .. })
        ));
    }
}
