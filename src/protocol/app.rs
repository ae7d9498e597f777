//! Public application summary: enabled vendors, their projects and models.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::protocol::canonical::VendorId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: String,
    #[serde(default, alias = "supported_file_mime_types")]
    pub supported_file_mime_types: Vec<String>,
    #[serde(default, alias = "supported_image_mime_types")]
    pub supported_image_mime_types: Vec<String>,
}

/// How an attached file is sent to a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    File,
    Image,
}

impl ModelInfo {
    /// File types win over image types when a MIME type is listed in both.
    #[must_use]
    pub fn attachment_kind(&self, mime_type: &str) -> Option<AttachmentKind> {
        if self.supported_file_mime_types.iter().any(|m| m == mime_type) {
            Some(AttachmentKind::File)
        } else if self.supported_image_mime_types.iter().any(|m| m == mime_type) {
            Some(AttachmentKind::Image)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorInfo {
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub name: String,
    pub body_size_limit_bytes: usize,
    #[serde(default)]
    pub vendors: BTreeMap<VendorId, VendorInfo>,
}

impl AppInfo {
    #[must_use]
    pub fn vendor(&self, vendor: VendorId) -> Option<&VendorInfo> {
        self.vendors.get(&vendor)
    }

    #[must_use]
    pub fn model(&self, vendor: VendorId, model_id: &str) -> Option<&ModelInfo> {
        self.vendor(vendor)?
            .models
            .iter()
            .find(|model| model.id == model_id)
    }
}
