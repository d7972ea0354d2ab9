//! Upload policies
//!
//! One [`UploadPolicy`] per endpoint decides which file parts are accepted,
//! what the stored object is called and how success is reported. Three
//! presets cover the configured endpoint kinds:
//!
//! | Preset | Filename | Extensions | `FileName` field | Stored as |
//! |--------|----------|------------|------------------|-----------|
//! | `generic` | optional | any | ignored | `UserUpload_<name>` |
//! | `master_photo` | required | jpg, jpeg | required | `master-<v>.jpg` |
//! | `named` | ignored | any | required | `upload-<v>.<ext>` |

use super::gate::{MetadataGate, TARGET_NAME_FIELD};
use super::UploadError;
use crate::config::PolicyPreset;
use chrono::Utc;
use http::StatusCode;

/// Whether the file part must carry a filename
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilenameRule {
    Optional,
    Required,
}

/// Extension of the stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionRule {
    Fixed(String),
    /// `image/jpeg` maps to `jpg`, anything else to `fallback`
    FromContentType { fallback: String },
}

impl ExtensionRule {
    pub fn extension_for(&self, content_type: Option<&str>) -> &str {
        match self {
            ExtensionRule::Fixed(ext) => ext,
            ExtensionRule::FromContentType { fallback } => match content_type {
                Some(ct) if ct.eq_ignore_ascii_case("image/jpeg") => "jpg",
                _ => fallback,
            },
        }
    }
}

/// How the object name is derived
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamingScheme {
    /// Client filename, stored under `key_prefix`
    KeepOriginal { key_prefix: String },
    /// `<prefix><FileName field>.<extension>`
    FromTarget {
        prefix: String,
        extension: ExtensionRule,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessMessage {
    Received,
    SavedAs,
    UploadedAs,
}

/// Name chosen for an accepted file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    pub display_name: String,
    pub object_key: String,
}

#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub label: String,
    pub filename: FilenameRule,
    /// Lower-case, `None` allows every extension
    pub allowed_extensions: Option<Vec<String>>,
    pub extension_hint: String,
    pub target_field: Option<String>,
    pub naming: NamingScheme,
    pub default_content_type: String,
    pub success: SuccessMessage,
    /// Status for store and parse failures
    pub failure_status: StatusCode,
}

impl UploadPolicy {
    pub fn from_preset(preset: PolicyPreset) -> Self {
        match preset {
            PolicyPreset::Generic => Self::generic(),
            PolicyPreset::MasterPhoto => Self::master_photo(),
            PolicyPreset::Named => Self::named(),
        }
    }

    pub fn generic() -> Self {
        Self {
            label: "generic".into(),
            filename: FilenameRule::Optional,
            allowed_extensions: None,
            extension_hint: String::new(),
            target_field: None,
            naming: NamingScheme::KeepOriginal {
                key_prefix: "UserUpload_".into(),
            },
            default_content_type: "application/octet-stream".into(),
            success: SuccessMessage::Received,
            failure_status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn master_photo() -> Self {
        Self {
            label: "master_photo".into(),
            filename: FilenameRule::Required,
            allowed_extensions: Some(vec!["jpg".into(), "jpeg".into()]),
            extension_hint: "Only .jpg, .jpeg, or .JPG files are allowed".into(),
            target_field: Some(TARGET_NAME_FIELD.into()),
            naming: NamingScheme::FromTarget {
                prefix: "master-".into(),
                extension: ExtensionRule::Fixed("jpg".into()),
            },
            default_content_type: "image/jpeg".into(),
            success: SuccessMessage::SavedAs,
            failure_status: StatusCode::BAD_REQUEST,
        }
    }

    pub fn named() -> Self {
        Self {
            label: "named".into(),
            filename: FilenameRule::Optional,
            allowed_extensions: None,
            extension_hint: String::new(),
            target_field: Some(TARGET_NAME_FIELD.into()),
            naming: NamingScheme::FromTarget {
                prefix: "upload-".into(),
                extension: ExtensionRule::FromContentType {
                    fallback: "jpg".into(),
                },
            },
            default_content_type: "image/jpeg".into(),
            success: SuccessMessage::UploadedAs,
            failure_status: StatusCode::BAD_REQUEST,
        }
    }

    /// Check a file part against the policy.
    ///
    /// Order: filename, extension, then the target field.
    pub fn validate(&self, filename: Option<&str>, gate: &MetadataGate) -> Result<(), UploadError> {
        if self.filename == FilenameRule::Required && filename.is_none() {
            return Err(UploadError::InvalidFilename);
        }

        if let (Some(allowed), Some(name)) = (&self.allowed_extensions, filename) {
            let extension = extension_of(name);
            if !allowed.iter().any(|a| *a == extension) {
                return Err(UploadError::UnsupportedExtension {
                    extension,
                    hint: self.extension_hint.clone(),
                });
            }
        }

        if let Some(field) = &self.target_field {
            if gate.get_field().is_none() {
                return Err(UploadError::MissingField(field.clone()));
            }
        }

        Ok(())
    }

    /// Validate and name a file part
    pub fn resolve(
        &self,
        filename: Option<&str>,
        content_type: Option<&str>,
        gate: &MetadataGate,
    ) -> Result<ResolvedName, UploadError> {
        self.validate(filename, gate)?;

        Ok(match &self.naming {
            NamingScheme::KeepOriginal { key_prefix } => {
                let display_name = filename
                    .map(String::from)
                    .unwrap_or_else(|| format!("upload-{}", Utc::now().timestamp_millis()));
                ResolvedName {
                    object_key: format!("{}{}", key_prefix, display_name),
                    display_name,
                }
            }
            NamingScheme::FromTarget { prefix, extension } => {
                let target = gate.get_field().unwrap_or_default();
                let name = format!(
                    "{}{}.{}",
                    prefix,
                    target,
                    extension.extension_for(content_type)
                );
                ResolvedName {
                    display_name: name.clone(),
                    object_key: name,
                }
            }
        })
    }

    /// Declared part type, or the policy default
    pub fn content_type_for(&self, declared: Option<&str>) -> String {
        declared
            .map(String::from)
            .unwrap_or_else(|| self.default_content_type.clone())
    }

    pub fn success_body(&self, final_name: &str) -> String {
        match self.success {
            SuccessMessage::Received => format!("{} Received", final_name),
            SuccessMessage::SavedAs => format!("File saved as {}", final_name),
            SuccessMessage::UploadedAs => format!("File uploaded as {}", final_name),
        }
    }
}

/// Lower-cased text after the last `.`
fn extension_of(filename: &str) -> String {
    filename
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate_with(value: &str) -> MetadataGate {
        let mut gate = MetadataGate::default();
        gate.set_field(TARGET_NAME_FIELD, value);
        gate
    }

    #[test]
    fn test_generic_keeps_filename() {
        let policy = UploadPolicy::generic();
        let resolved = policy
            .resolve(Some("notes.txt"), Some("text/plain"), &MetadataGate::default())
            .unwrap();
        assert_eq!(resolved.display_name, "notes.txt");
        assert_eq!(resolved.object_key, "UserUpload_notes.txt");
        assert_eq!(policy.success_body(&resolved.display_name), "notes.txt Received");
    }

    #[test]
    fn test_generic_synthesizes_name() {
        let resolved = UploadPolicy::generic()
            .resolve(None, None, &MetadataGate::default())
            .unwrap();
        let millis = resolved.display_name.strip_prefix("upload-").unwrap();
        assert!(millis.parse::<i64>().unwrap() > 0);
        assert_eq!(resolved.object_key, format!("UserUpload_{}", resolved.display_name));
    }

    #[test]
    fn test_master_photo_accepts_upper_case_jpg() {
        let resolved = UploadPolicy::master_photo()
            .resolve(Some("photo.JPG"), Some("image/jpeg"), &gate_with("beach"))
            .unwrap();
        assert_eq!(resolved.display_name, "master-beach.jpg");
        assert_eq!(resolved.object_key, "master-beach.jpg");
    }

    #[test]
    fn test_master_photo_rejects_png() {
        let err = UploadPolicy::master_photo()
            .resolve(Some("photo.png"), None, &gate_with("beach"))
            .unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedExtension { ref extension, .. } if extension == "png"));
        assert_eq!(err.to_string(), "Only .jpg, .jpeg, or .JPG files are allowed");
    }

    #[test]
    fn test_master_photo_check_order() {
        let policy = UploadPolicy::master_photo();
        let empty = MetadataGate::default();

        assert!(matches!(
            policy.validate(None, &empty),
            Err(UploadError::InvalidFilename)
        ));
        assert!(matches!(
            policy.validate(Some("photo.gif"), &empty),
            Err(UploadError::UnsupportedExtension { .. })
        ));
        assert!(matches!(
            policy.validate(Some("photo.jpeg"), &empty),
            Err(UploadError::MissingField(ref f)) if f == "FileName"
        ));
    }

    #[test]
    fn test_named_extension_is_always_jpg() {
        let policy = UploadPolicy::named();
        let gate = gate_with("avatar");
        for content_type in [Some("image/jpeg"), Some("image/png"), None] {
            let resolved = policy.resolve(Some("a.png"), content_type, &gate).unwrap();
            assert_eq!(resolved.display_name, "upload-avatar.jpg");
        }
        assert_eq!(policy.success_body("upload-avatar.jpg"), "File uploaded as upload-avatar.jpg");
    }

    #[test]
    fn test_named_requires_field() {
        let err = UploadPolicy::named()
            .resolve(Some("a.jpg"), None, &MetadataGate::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing required field: FileName");
    }

    #[test]
    fn test_content_type_default() {
        let policy = UploadPolicy::master_photo();
        assert_eq!(policy.content_type_for(None), "image/jpeg");
        assert_eq!(policy.content_type_for(Some("image/png")), "image/png");
        assert_eq!(UploadPolicy::generic().content_type_for(None), "application/octet-stream");
    }

    #[test]
    fn test_from_preset() {
        assert_eq!(UploadPolicy::from_preset(PolicyPreset::Named).label, "named");
        assert_eq!(
            UploadPolicy::from_preset(PolicyPreset::Generic).failure_status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
