use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const MAX_FILES_PER_REQUEST: usize = 10;

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConvertRequest {
    #[serde(default)]
    pub files: Vec<ImageFile>,
    pub time_zone: Option<String>,
    pub current_date: Option<String>,
    pub user_id: Option<String>,
}

/// One uploaded image, either inlined as a data URL or referenced by
/// remote URL.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageFile {
    pub data_url: Option<String>,
    pub url: Option<String>,
}

impl ImageFile {
    pub fn is_empty(&self) -> bool {
        let blank = |value: &Option<String>| {
            value.as_deref().map(str::trim).unwrap_or("").is_empty()
        };
        blank(&self.data_url) && blank(&self.url)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    pub success: bool,
    pub ics_content: String,
}
