use crate::dates::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{AsRefStr, Display, EnumString};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExtractionStatus {
    #[default]
    NotAttempted,
    Success,
    Failed,
    /// No local document to extract from.
    #[serde(alias = "missing_pdf")]
    #[strum(to_string = "missing_source", serialize = "missing_pdf")]
    MissingSource,
}

impl ExtractionStatus {
    pub fn is_attempted(&self) -> bool {
        *self != ExtractionStatus::NotAttempted
    }
}

/// Word counts attributed to one embedded font.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FontInfo {
    pub font_num: i64,
    pub name: String,
    pub basefont: String,
    pub resource_name: String,
    #[serde(rename = "type")]
    pub font_type: String,
    pub ext: String,
    pub encoding: String,
    pub referencer: Option<i64>,
    pub words: u64,
    pub script_word_counts: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LanguageInfo {
    pub inferred: String,
    pub script_word_counts: BTreeMap<String, u64>,
    pub total_words: u64,
}

impl Default for LanguageInfo {
    fn default() -> Self {
        Self {
            inferred: "unknown".to_string(),
            script_word_counts: BTreeMap::new(),
            total_words: 0,
        }
    }
}

/// Extraction result as seen by callers: status plus metrics.
///
/// Used both as the read view on [`Record`](crate::Record) and as the
/// extraction part of a [`RecordPatch`](crate::RecordPatch).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractionInfo {
    pub status: ExtractionStatus,
    pub error: Option<String>,
    pub file_size: Option<u64>,
    pub page_count: Option<u32>,
    pub pages_with_images: Option<u32>,
    pub has_any_page_image: Option<bool>,
    pub total_font_count: Option<u32>,
    /// Keyed by font number.
    pub fonts: Option<BTreeMap<String, FontInfo>>,
    pub unresolved_word_count: Option<u64>,
    pub language: Option<LanguageInfo>,
}

impl ExtractionInfo {
    pub fn with_status(status: ExtractionStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }
}

/// Stored extraction row (`pdfinfos/`).
///
/// Metric fields are only written when `status` is an attempted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractionRow {
    pub record_key: String,
    #[serde(default)]
    pub status: ExtractionStatus,
    pub created_at_utc: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at_utc: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages_with_images: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_any_page_image: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_font_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fonts: Option<BTreeMap<String, FontInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unresolved_word_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<LanguageInfo>,
}

impl ExtractionRow {
    /// Builds the stored row for `info`. A `not_attempted` status drops all
    /// metrics.
    pub fn from_info(
        record_key: &str,
        info: &ExtractionInfo,
        created_at: Timestamp,
        now: Timestamp,
    ) -> Self {
        let mut row = Self {
            record_key: record_key.to_string(),
            status: info.status,
            created_at_utc: created_at,
            updated_at_utc: None,
            error: None,
            file_size: None,
            page_count: None,
            pages_with_images: None,
            has_any_page_image: None,
            total_font_count: None,
            fonts: None,
            unresolved_word_count: None,
            language: None,
        };
        if !info.status.is_attempted() {
            return row;
        }

        row.updated_at_utc = Some(now);
        row.error = info.error.clone();
        row.file_size = info.file_size;
        row.page_count = info.page_count;
        row.pages_with_images = info.pages_with_images;
        row.has_any_page_image = info.has_any_page_image;
        row.total_font_count = info.total_font_count;
        row.fonts = info.fonts.clone();
        row.unresolved_word_count = info.unresolved_word_count;
        row.language = info.language.clone();
        row
    }

    pub fn info(&self) -> ExtractionInfo {
        if !self.status.is_attempted() {
            return ExtractionInfo::default();
        }
        ExtractionInfo {
            status: self.status,
            error: self.error.clone(),
            file_size: self.file_size,
            page_count: self.page_count,
            pages_with_images: self.pages_with_images,
            has_any_page_image: self.has_any_page_image,
            total_font_count: self.total_font_count,
            fonts: self.fonts.clone(),
            unresolved_word_count: self.unresolved_word_count,
            language: self.language.clone(),
        }
    }
}
