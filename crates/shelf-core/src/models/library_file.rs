use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// A file stored in a library, as reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryFile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub origin_uri: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub chunks: Option<i64>,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processing_error_message: Option<String>,
    #[serde(default)]
    pub drop_error: Option<String>,
}

impl LibraryFile {
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some() && self.processing_error_message.is_none()
    }
}

/// One page of library files plus the total count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryFilesPage {
    pub files: Vec<LibraryFile>,
    pub total_count: i64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileSortColumn {
    #[default]
    Index,
    Name,
    Size,
    Chunks,
    ProcessedAt,
}

impl FileSortColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileSortColumn::Index => "index",
            FileSortColumn::Name => "name",
            FileSortColumn::Size => "size",
            FileSortColumn::Chunks => "chunks",
            FileSortColumn::ProcessedAt => "processedAt",
        }
    }
}

impl Display for FileSortColumn {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileSortColumn {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "index" => Ok(FileSortColumn::Index),
            "name" => Ok(FileSortColumn::Name),
            "size" => Ok(FileSortColumn::Size),
            "chunks" => Ok(FileSortColumn::Chunks),
            "processedAt" | "processed_at" => Ok(FileSortColumn::ProcessedAt),
            _ => Err(anyhow::anyhow!("Invalid sort column: {}", s)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

impl Display for SortDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            _ => Err(anyhow::anyhow!("Invalid sort direction: {}", s)),
        }
    }
}
