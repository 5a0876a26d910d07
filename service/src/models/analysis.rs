//! The `Analysis` aggregate and the value types nested inside it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Requested,
    InProgress,
    Completed,
    Failed,
}

/// Options a caller may request at intake time.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub struct AnalysisOptions {
    #[serde(default = "default_true")]
    pub include_headings: bool,
    #[serde(default)]
    pub check_links: bool,
    #[serde(default = "default_true")]
    pub detect_forms: bool,
    pub timeout_sec: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            include_headings: true,
            check_links: false,
            detect_forms: true,
            timeout_sec: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum HtmlVersion {
    Html5,
    #[serde(rename = "HTML4.01")]
    Html401,
    #[serde(rename = "XHTML1.0")]
    Xhtml10,
    #[serde(rename = "XHTML1.1")]
    Xhtml11,
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct HeadingCounts {
    pub h1: u32,
    pub h2: u32,
    pub h3: u32,
    pub h4: u32,
    pub h5: u32,
    pub h6: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct InaccessibleLink {
    pub url: String,
    pub status_code: u16,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct LinkSummary {
    pub total: u32,
    pub internal_count: u32,
    pub external_count: u32,
    pub external_list: Vec<String>,
    pub inaccessible_list: Vec<InaccessibleLink>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct LoginFormDetails {
    pub method: String,
    pub action: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct FormSummary {
    pub total: u32,
    pub login_count: u32,
    pub login_details: Vec<LoginFormDetails>,
}

/// The structured report produced by a completed analysis.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnalysisReport {
    pub html_version: HtmlVersion,
    pub title: String,
    pub headings: HeadingCounts,
    pub links: LinkSummary,
    pub forms: FormSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub status_code: Option<u16>,
    pub details: Option<String>,
}

/// The durable analysis row: system of record for a requested page analysis.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Analysis {
    pub id: Uuid,
    pub url: String,
    pub url_normalized: String,
    pub version: i32,
    pub lock_version: i32,
    pub status: AnalysisStatus,
    pub content_hash: Option<String>,
    pub content_size: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    #[sqlx(json)]
    pub results: Option<AnalysisReport>,
    #[sqlx(json)]
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisEventType {
    Started,
    Progress,
    Completed,
    Failed,
}

/// A transient, read-path notification pushed to SSE subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisEvent {
    #[serde(rename = "type")]
    pub event_type: AnalysisEventType,
    pub event_id: Uuid,
    pub payload: Analysis,
}

impl AnalysisEvent {
    /// `is_first` distinguishes the producer's initial emission (`started`)
    /// from subsequent polling ticks (`progress`) for non-terminal states.
    pub fn from_status(analysis: Analysis, is_first: bool) -> Self {
        let event_type = match analysis.status {
            AnalysisStatus::Completed => AnalysisEventType::Completed,
            AnalysisStatus::Failed => AnalysisEventType::Failed,
            AnalysisStatus::Requested | AnalysisStatus::InProgress if is_first => {
                AnalysisEventType::Started
            }
            AnalysisStatus::Requested | AnalysisStatus::InProgress => AnalysisEventType::Progress,
        };
        Self {
            event_type,
            event_id: analysis.id,
            payload: analysis,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.event_type,
            AnalysisEventType::Completed | AnalysisEventType::Failed
        )
    }
}
