//! Core domain types: release notes and watermarks.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{RelnotesError, Result};

/// Long-form date layout used on the vendor release-notes page ("February 18, 2025").
pub const LONG_DATE_FORMAT: &str = "%B %d, %Y";

/// ISO date layout used by the structured source and HTTP parameters.
pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

// ---------------------------------------------------------------------------
// NoteType
// ---------------------------------------------------------------------------

/// Kind of change a release note describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteType {
    Feature,
    Changed,
    #[default]
    Unknown,
}

impl NoteType {
    /// Map a source label (`FEATURE`, `release-changed`, ...) onto the closed tag.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_ascii_lowercase();
        let label = label.strip_prefix("release-").unwrap_or(&label);
        match label {
            "feature" => Self::Feature,
            "changed" | "change" => Self::Changed,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Changed => "changed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for NoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Note
// ---------------------------------------------------------------------------

/// One release note, as extracted from either source.
///
/// Serialized field names follow the scrape shape; the structured-query
/// names (`published_at`, `product_name`, `release_note_type`, `description`)
/// are accepted as aliases when deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Release/publication date.
    #[serde(alias = "published_at")]
    pub release_at: NaiveDate,
    /// Product the note concerns.
    #[serde(alias = "product_name")]
    pub resource_name: String,
    /// Feature / changed / unknown.
    #[serde(rename = "type", alias = "release_note_type", default)]
    pub note_type: NoteType,
    /// Optional sub-heading; empty when the source has none.
    #[serde(default)]
    pub sub_title: String,
    /// Raw note body.
    #[serde(alias = "description", default)]
    pub content: String,
    /// Localized summary, set by the translation stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_description: Option<String>,
}

impl Note {
    pub fn new(
        release_at: NaiveDate,
        resource_name: impl Into<String>,
        note_type: NoteType,
        sub_title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            release_at,
            resource_name: resource_name.into(),
            note_type,
            sub_title: sub_title.into(),
            content: content.into(),
            translated_description: None,
        }
    }

    /// Key used to suppress duplicate emissions within one extraction.
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            release_at: self.release_at,
            resource_name: self.resource_name.clone(),
            sub_title: self.sub_title.clone(),
        }
    }

    /// Return the enriched copy of this note.
    pub fn with_translation(self, translated: impl Into<String>) -> Self {
        Self {
            translated_description: Some(translated.into()),
            ..self
        }
    }

    /// Text shown to readers: the translation if present, else the raw body.
    pub fn display_text(&self) -> &str {
        self.translated_description.as_deref().unwrap_or(&self.content)
    }
}

/// `(release_at, resource_name, sub_title)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub release_at: NaiveDate,
    pub resource_name: String,
    pub sub_title: String,
}

// ---------------------------------------------------------------------------
// Watermark
// ---------------------------------------------------------------------------

/// Date boundary: only items strictly after it count as new.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watermark(pub NaiveDate);

impl Watermark {
    /// Parse either `2025-02-18` or `February 18, 2025`.
    pub fn parse(input: &str) -> Result<Self> {
        parse_release_date(input)
            .map(Self)
            .ok_or_else(|| RelnotesError::validation(format!("unrecognized date '{input}'")))
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Whether `date` is strictly newer than this watermark.
    pub fn admits(&self, date: NaiveDate) -> bool {
        date > self.0
    }

    /// ISO label used in notification headers and query parameters.
    pub fn label(&self) -> String {
        self.0.format(ISO_DATE_FORMAT).to_string()
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(ISO_DATE_FORMAT))
    }
}

impl FromStr for Watermark {
    type Err = RelnotesError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<NaiveDate> for Watermark {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

/// Parse a release date in ISO or long form. Returns `None` for anything else.
pub fn parse_release_date(input: &str) -> Option<NaiveDate> {
    let trimmed = input.trim();
    NaiveDate::parse_from_str(trimmed, ISO_DATE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(trimmed, LONG_DATE_FORMAT))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn watermark_parses_both_layouts() {
        assert_eq!(Watermark::parse("2025-02-01").unwrap().date(), date(2025, 2, 1));
        assert_eq!(
            Watermark::parse("February 18, 2025").unwrap().date(),
            date(2025, 2, 18)
        );
        assert_eq!(Watermark::parse("  March 3, 2025 ").unwrap().date(), date(2025, 3, 3));
    }

    #[test]
    fn watermark_rejects_garbage() {
        let err = Watermark::parse("last tuesday").unwrap_err();
        assert!(err.is_client_error());
        assert!(Watermark::parse("").is_err());
    }

    #[test]
    fn watermark_admits_strictly_newer() {
        let wm = Watermark::parse("2025-02-18").unwrap();
        assert!(wm.admits(date(2025, 2, 19)));
        assert!(!wm.admits(date(2025, 2, 18)));
        assert!(!wm.admits(date(2025, 2, 17)));
    }

    #[test]
    fn note_type_from_label() {
        assert_eq!(NoteType::from_label("FEATURE"), NoteType::Feature);
        assert_eq!(NoteType::from_label("release-changed"), NoteType::Changed);
        assert_eq!(NoteType::from_label("Changed"), NoteType::Changed);
        assert_eq!(NoteType::from_label("FIXED"), NoteType::Unknown);
        assert_eq!(NoteType::from_label(""), NoteType::Unknown);
    }

    #[test]
    fn note_serializes_scrape_shape() {
        let note = Note::new(date(2025, 2, 3), "Cloud Run", NoteType::Feature, "", "GA now");
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["release_at"], "2025-02-03");
        assert_eq!(json["resource_name"], "Cloud Run");
        assert_eq!(json["type"], "feature");
        assert!(json.get("translated_description").is_none());
    }

    #[test]
    fn note_accepts_query_shape_aliases() {
        let json = r#"{
            "published_at": "2025-02-03",
            "product_name": "BigQuery",
            "release_note_type": "changed",
            "description": "Quota raised"
        }"#;
        let note: Note = serde_json::from_str(json).unwrap();
        assert_eq!(note.resource_name, "BigQuery");
        assert_eq!(note.note_type, NoteType::Changed);
        assert_eq!(note.content, "Quota raised");
        assert_eq!(note.sub_title, "");
    }

    #[test]
    fn with_translation_keeps_identity() {
        let note = Note::new(date(2025, 2, 3), "GKE", NoteType::Unknown, "Node pools", "body");
        let key = note.dedup_key();
        let enriched = note.with_translation("要約");
        assert_eq!(enriched.dedup_key(), key);
        assert_eq!(enriched.display_text(), "要約");
    }
}
