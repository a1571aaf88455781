use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ClientStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "Parcial")]
    Partial,
    #[serde(rename = "Inativa")]
    Inactive,
    #[serde(rename = "Sem Imagem")]
    NoImage,
    #[serde(rename = "Cancelada")]
    Cancelled,
}

impl ClientStatus {
    pub const ALL: [ClientStatus; 5] = [
        Self::Ok,
        Self::Partial,
        Self::Inactive,
        Self::NoImage,
        Self::Cancelled,
    ];

    /// Label used in storage, CSV files and operator output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Partial => "Parcial",
            Self::Inactive => "Inativa",
            Self::NoImage => "Sem Imagem",
            Self::Cancelled => "Cancelada",
        }
    }

    /// Statuses that put an account on the dispatcher's follow-up list.
    pub fn requires_follow_up(self) -> bool {
        match self {
            Self::Partial | Self::Inactive | Self::NoImage => true,
            Self::Ok | Self::Cancelled => false,
        }
    }

    /// Accepts the operator labels and the English variant names, ignoring case.
    pub fn from_label(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        match normalized.as_str() {
            "ok" => Some(Self::Ok),
            "parcial" | "partial" => Some(Self::Partial),
            "inativa" | "inactive" => Some(Self::Inactive),
            "sem imagem" | "sem-imagem" | "noimage" | "no-image" | "no image" => Some(Self::NoImage),
            "cancelada" | "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::from_label(raw).ok_or_else(|| format!("Unknown status '{}'", raw))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    pub account_id: String,
    pub client_name: String,
    pub total_cameras: u32,
    pub cameras_ok: u32,
    pub status: ClientStatus,
    pub billing: bool,
    pub notes: String,
    pub last_updated: DateTime<Utc>,
    /// Derived from `status` when the record is written; never recomputed on read.
    pub needs_follow_up: bool,
}

impl ClientRecord {
    pub fn needs_attention(&self) -> bool {
        self.needs_follow_up && self.status != ClientStatus::Cancelled
    }
}

/// Form input for creating or updating one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveClientPayload {
    pub account_id: String,
    pub client_name: String,
    pub total_cameras: u32,
    pub cameras_ok: u32,
    pub status: ClientStatus,
    pub billing: bool,
    #[serde(default)]
    pub notes: String,
}

impl SaveClientPayload {
    pub fn validate(&self) -> AppResult<()> {
        if self.account_id.trim().is_empty() {
            return Err(AppError::Validation("Account id cannot be empty".to_string()));
        }
        if self.client_name.trim().is_empty() {
            return Err(AppError::Validation("Client name cannot be empty".to_string()));
        }
        if self.total_cameras == 0 {
            return Err(AppError::Validation("Total cameras must be at least 1".to_string()));
        }
        if self.cameras_ok > self.total_cameras {
            return Err(AppError::Validation(format!(
                "Working cameras ({}) cannot exceed total cameras ({})",
                self.cameras_ok, self.total_cameras
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub record: ClientRecord,
    pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StatusFilter {
    #[default]
    All,
    NeedsFollowUp,
    Status(ClientStatus),
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("all") || trimmed.eq_ignore_ascii_case("todos") {
            return Ok(Self::All);
        }
        if trimmed.eq_ignore_ascii_case("needsfollowup")
            || trimmed.eq_ignore_ascii_case("needs-follow-up")
            || trimmed.eq_ignore_ascii_case("tratativa")
        {
            return Ok(Self::NeedsFollowUp);
        }
        ClientStatus::from_label(trimmed)
            .map(Self::Status)
            .ok_or_else(|| format!("Unknown status filter '{}'", raw))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts(BTreeMap<ClientStatus, usize>);

impl StatusCounts {
    pub fn zeroed() -> Self {
        Self(ClientStatus::ALL.iter().map(|status| (*status, 0)).collect())
    }

    pub fn increment(&mut self, status: ClientStatus) {
        *self.0.entry(status).or_insert(0) += 1;
    }

    pub fn get(&self, status: ClientStatus) -> usize {
        self.0.get(&status).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClientStatus, usize)> + '_ {
        self.0.iter().map(|(status, count)| (*status, *count))
    }
}

impl Default for StatusCounts {
    fn default() -> Self {
        Self::zeroed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Freshness {
    Fresh,
    Normal,
    Stale,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeskSummary {
    pub total: usize,
    pub follow_up: usize,
    pub updated_this_shift: usize,
    pub shift_start: DateTime<Utc>,
    pub status_counts: StatusCounts,
    pub last_write: Option<DateTime<Utc>>,
    pub freshness: Option<Freshness>,
    pub freshness_message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub decoded: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
    pub path: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub master_export_prefix: String,
    pub filtered_export_prefix: String,
    pub fresh_within_hours: u32,
    pub stale_after_hours: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            master_export_prefix: "VideoAlerta_Plantao_MASTER".to_string(),
            filtered_export_prefix: "VideoAlerta_Busca".to_string(),
            fresh_within_hours: 1,
            stale_after_hours: 12,
        }
    }
}
