use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::ManuscriptStatus;

/// Classification of an upload derived from its MIME type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Audio,
    Binary,
    Document,
    Image,
    Video,
}

impl FileType {
    /// Derive a file type classification from a MIME type string.
    pub fn from_mime(mime_type: &str) -> Self {
        let primary = mime_type.split('/').next().unwrap_or("");
        match primary {
            "audio" => FileType::Audio,
            "image" => FileType::Image,
            "video" => FileType::Video,
            "text" | "application" => {
                let sub = mime_type.split('/').nth(1).unwrap_or("");
                match sub {
                    "pdf"
                    | "msword"
                    | "rtf"
                    | "vnd.openxmlformats-officedocument.wordprocessingml.document"
                    | "vnd.oasis.opendocument.text" => FileType::Document,
                    _ if primary == "text" => FileType::Document,
                    _ => FileType::Binary,
                }
            }
            _ => FileType::Binary,
        }
    }
}

/// Closed set of principal roles. Authorization decisions match on this
/// exhaustively, so a new role is a compile-time change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Author,
    Expert,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Author => "author",
            Role::Expert => "expert",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cover image stored next to the manuscript file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub file_id: String,
    pub content_type: String,
    pub byte_size: u64,
}

/// A manuscript record stored in redb
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manuscript {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,

    // Blob descriptors
    pub file_id: String,
    pub filename: String,
    pub content_type: String,
    pub byte_size: u64,
    #[serde(default)]
    pub thumbnail: Option<Thumbnail>,

    // Parties
    pub author_id: String,
    #[serde(default)]
    pub reviewer_id: Option<String>,

    // Workflow
    pub status: ManuscriptStatus,
    #[serde(default)]
    pub reviewer_comments: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub review_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl Manuscript {
    /// Filename offered to downloaders: the original name, with an extension
    /// derived from the content type when the original has none.
    pub fn download_name(&self) -> String {
        if Path::new(&self.filename).extension().is_some() {
            return self.filename.clone();
        }
        match mime_guess::get_mime_extensions_str(&self.content_type).and_then(|e| e.first()) {
            Some(ext) => format!("{}.{ext}", self.filename),
            None => self.filename.clone(),
        }
    }

    /// Every blob key owned by this record.
    pub fn blob_keys(&self) -> Vec<String> {
        let mut keys = vec![self.file_id.clone()];
        if let Some(ref thumb) = self.thumbnail {
            keys.push(thumb.file_id.clone());
        }
        keys
    }
}

/// In-app inbox entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// A principal stored in redb
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    /// Lowercased; unique via the `user_emails` index
    pub email: String,
    /// `None` for federation-only accounts
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub google_id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub reset_token_hash: Option<String>,
    #[serde(default)]
    pub reset_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpertRequestStatus {
    Approved,
    Pending,
    Rejected,
}

/// A user's application to become a reviewer. Immutable once decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertRequest {
    pub id: String,
    pub user_id: String,
    pub message: String,
    pub status: ExpertRequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
