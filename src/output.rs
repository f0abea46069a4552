//! Data types flowing through and out of the analysis pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ── Input ────────────────────────────────────────────────────────────────

/// A file as handed over by a [`crate::source::FileSource`].
///
/// Lives for one pipeline invocation; the pipeline never keeps the bytes.
#[derive(Clone)]
pub struct RetrievedFile {
    pub id: String,
    pub name: String,
    pub media_type: String,
    pub size_bytes: u64,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for RetrievedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrievedFile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("media_type", &self.media_type)
            .field("size_bytes", &self.size_bytes)
            .finish()
    }
}

/// The single normalized raster image produced by conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    /// e.g. `image/png`
    pub mime_type: String,
    /// Base64 (standard alphabet, padded) image bytes.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl ImagePayload {
    /// `data:<mime>;base64,<data>`
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

// ── Analysis schema ──────────────────────────────────────────────────────

/// Kind of document the model recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Letter,
    Report,
    Photo,
    Newspaper,
    List,
    DiaryEntry,
    Book,
    Map,
    Biography,
}

impl DocumentType {
    pub const ALL: [DocumentType; 9] = [
        DocumentType::Letter,
        DocumentType::Report,
        DocumentType::Photo,
        DocumentType::Newspaper,
        DocumentType::List,
        DocumentType::DiaryEntry,
        DocumentType::Book,
        DocumentType::Map,
        DocumentType::Biography,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Letter => "letter",
            Self::Report => "report",
            Self::Photo => "photo",
            Self::Newspaper => "newspaper",
            Self::List => "list",
            Self::DiaryEntry => "diary_entry",
            Self::Book => "book",
            Self::Map => "map",
            Self::Biography => "biography",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a named entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Location,
    Organization,
    Event,
    Date,
    Unit,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        EntityType::Person,
        EntityType::Location,
        EntityType::Organization,
        EntityType::Event,
        EntityType::Date,
        EntityType::Unit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Location => "location",
            Self::Organization => "organization",
            Self::Event => "event",
            Self::Date => "date",
            Self::Unit => "unit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named entity mentioned in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    /// ISO-8601 calendar date (`YYYY-MM-DD`); only set for parseable `date` entities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// Validated, normalized model output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub document_type: DocumentType,
    pub title: String,
    pub content: String,
    pub entities: Vec<Entity>,
}

// ── Orchestration ────────────────────────────────────────────────────────

/// Per-call switches for [`crate::DocumentAnalyzer::process`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Skip the cache read (the result is still written back).
    pub force_refresh: bool,
    /// Hand the result to the configured [`crate::store::DocumentStore`].
    pub auto_save: bool,
}

/// What the analyzer returns (and caches) for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisEnvelope {
    pub file_id: String,
    pub file_name: String,
    pub analysis: AnalysisResult,
    pub image: ImagePayload,
    pub processed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_record: Option<SavedRecord>,
}

impl AnalysisEnvelope {
    /// The subset of the envelope that gets persisted.
    pub fn document_fields(&self) -> DocumentFields {
        DocumentFields {
            file_id: self.file_id.clone(),
            file_name: self.file_name.clone(),
            title: self.analysis.title.clone(),
            content: self.analysis.content.clone(),
            document_type: self.analysis.document_type,
            entities: self.analysis.entities.clone(),
        }
    }
}

/// Document fields handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFields {
    pub file_id: String,
    pub file_name: String,
    pub title: String,
    pub content: String,
    pub document_type: DocumentType,
    pub entities: Vec<Entity>,
}

/// A record created by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub fields: DocumentFields,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_round_trip_through_their_wire_names() {
        for t in DocumentType::ALL {
            assert_eq!(DocumentType::parse(t.as_str()), Some(t));
        }
        for t in EntityType::ALL {
            assert_eq!(EntityType::parse(t.as_str()), Some(t));
        }
        assert_eq!(DocumentType::parse("Letter"), None);
        assert_eq!(EntityType::parse("place"), None);
    }

    #[test]
    fn entity_serializes_type_field() {
        let e = Entity {
            name: "Oslo".into(),
            entity_type: EntityType::Location,
            date: None,
        };
        let json = serde_json::to_string(&e).unwrap();
        assert_eq!(json, r#"{"name":"Oslo","type":"location"}"#);
    }

    #[test]
    fn diary_entry_uses_snake_case() {
        let json = serde_json::to_string(&DocumentType::DiaryEntry).unwrap();
        assert_eq!(json, "\"diary_entry\"");
    }

    #[test]
    fn data_url_format() {
        let img = ImagePayload {
            mime_type: "image/png".into(),
            data: "AAAA".into(),
            width: None,
            height: None,
        };
        assert_eq!(img.to_data_url(), "data:image/png;base64,AAAA");
    }
}
