use serde::{Deserialize, Serialize};

/// A `Label: value` pair parsed from one of the bag's tag files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub tag_file: String,
    pub label: String,
    pub value: String,
}

impl Tag {
    pub fn new(tag_file: impl Into<String>, label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tag_file: tag_file.into(),
            label: label.into(),
            value: value.into(),
        }
    }
}
