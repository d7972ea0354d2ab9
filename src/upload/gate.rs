//! Metadata gate
//!
//! Holds the one text field a request may use to name its file. The field
//! has to arrive before the file part it names.

/// Form field carrying the target name
pub const TARGET_NAME_FIELD: &str = "FileName";

#[derive(Debug, Clone)]
pub struct MetadataGate {
    field: String,
    value: Option<String>,
}

impl Default for MetadataGate {
    fn default() -> Self {
        Self::new(TARGET_NAME_FIELD)
    }
}

impl MetadataGate {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: None,
        }
    }

    /// Capture a field part. Other field names are ignored; a repeated
    /// field replaces the earlier value.
    pub fn set_field(&mut self, name: &str, value: &str) {
        if name == self.field {
            self.value = Some(value.trim().to_string());
        }
    }

    /// Captured value, `None` when never set or blank
    pub fn get_field(&self) -> Option<&str> {
        self.value.as_deref().filter(|v| !v.is_empty())
    }
}
