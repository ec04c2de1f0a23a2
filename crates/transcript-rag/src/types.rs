use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One retrieved transcript snippet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryQueryResult {
    /// `{videoId}-{HH_MM_SS}`
    pub id: String,
    pub text: String,
    pub description: String,
    pub external_source_name: String,
    pub additional_metadata: String,
    pub relevance: f64,
    pub created_at: Option<DateTime<Utc>>,
}

/// Recency window for retrieval, chosen by the sort classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortType {
    #[default]
    None,
    Recent,
    Month,
    Year,
}

impl SortType {
    pub const ALL: [SortType; 4] = [SortType::None, SortType::Recent, SortType::Month, SortType::Year];

    /// Length of the `CreatedAt` window, or `None` for no filter.
    pub fn window_days(self) -> Option<i64> {
        match self {
            SortType::None => None,
            SortType::Recent => Some(84),
            SortType::Month => Some(28),
            SortType::Year => Some(365),
        }
    }

    /// Maximum hits requested from the index.
    pub fn size_cap(self) -> usize {
        match self {
            SortType::None | SortType::Year => 10,
            SortType::Recent | SortType::Month => 25,
        }
    }

    /// Lower `CreatedAt` bound relative to `now`.
    pub fn created_after(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.window_days().map(|days| now - Duration::days(days))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortType::None => "NONE",
            SortType::Recent => "RECENT",
            SortType::Month => "MONTH",
            SortType::Year => "YEAR",
        }
    }
}

impl fmt::Display for SortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortType {
    type Err = String;

    /// Case-insensitive exact match on the variant name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SortType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown sort type '{}'", s))
    }
}
