//! Core domain types for LeadScout lead collection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// ListingRecord
// ---------------------------------------------------------------------------

/// One business discovered on the map surface. Immutable once extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Digits and hyphens only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// 0.0 to 5.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
}

/// Raw field values as read off the page, before normalization.
#[derive(Debug, Clone, Default)]
pub struct RawListing {
    pub name: String,
    pub url: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub rating: Option<f32>,
    pub review_count: Option<i64>,
    pub area: Option<String>,
}

impl ListingRecord {
    /// Normalize raw page values into a record.
    ///
    /// Returns `None` when the name is blank after trimming. A URL without an
    /// `http://`/`https://` scheme is dropped, the phone keeps only digits and
    /// hyphens, an out-of-range rating or negative review count is dropped.
    pub fn from_raw(raw: RawListing) -> Option<Self> {
        let name = raw.name.trim().to_string();
        if name.is_empty() {
            return None;
        }

        let url = raw
            .url
            .map(|u| u.trim().to_string())
            .filter(|u| u.starts_with("http://") || u.starts_with("https://"));

        let phone = raw
            .phone
            .map(|p| {
                p.chars()
                    .filter(|c| c.is_ascii_digit() || *c == '-')
                    .collect::<String>()
            })
            .filter(|p| !p.is_empty());

        let rating = raw.rating.filter(|r| (0.0..=5.0).contains(r));
        let review_count = raw.review_count.and_then(|n| u32::try_from(n).ok());

        let address = raw
            .address
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());

        Some(Self {
            name,
            url,
            address,
            phone,
            rating,
            review_count,
            area: raw.area.filter(|a| !a.is_empty()),
        })
    }

    /// Convenience constructor for a name-only record.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
            address: None,
            phone: None,
            rating: None,
            review_count: None,
            area: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// The reasoning service's opinion on one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationJudgment {
    /// `None` means the service could not tell.
    pub is_official_site: Option<bool>,
    pub is_major_chain: bool,
    pub normalized_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationJudgment {
    /// Unknown site status, not a chain. Used when the record passes unjudged.
    pub fn fail_open(name: &str, reason: impl Into<String>) -> Self {
        Self {
            is_official_site: None,
            is_major_chain: false,
            normalized_name: name.to_string(),
            reason: Some(reason.into()),
        }
    }

    /// Official site not ruled out and not a major chain.
    pub fn is_valid(&self) -> bool {
        self.is_official_site != Some(false) && !self.is_major_chain
    }
}

/// A record merged with its judgment. The unit handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedListing {
    #[serde(flatten)]
    pub record: ListingRecord,
    pub judgment: ValidationJudgment,
    pub is_valid: bool,
}

impl ValidatedListing {
    pub fn new(record: ListingRecord, judgment: ValidationJudgment) -> Self {
        let is_valid = judgment.is_valid();
        Self {
            record,
            judgment,
            is_valid,
        }
    }

    /// Pass the record through as valid with the given reason.
    pub fn fail_open(record: ListingRecord, reason: impl Into<String>) -> Self {
        let judgment = ValidationJudgment::fail_open(&record.name, reason);
        Self {
            record,
            judgment,
            is_valid: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Run reporting
// ---------------------------------------------------------------------------

/// Running totals accumulated across all regions of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub total_found: usize,
    pub total_excluded: usize,
    pub total_valid: usize,
    pub total_new: usize,
}

/// Typed progress stream emitted while a run is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Log {
        message: String,
    },
    Complete {
        #[serde(flatten)]
        totals: RunTotals,
        records: Vec<ValidatedListing>,
    },
    Error {
        message: String,
    },
}

impl ProgressEvent {
    pub fn log(message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Log { .. })
    }
}

/// Final status of a recorded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            "failed" => Self::Failed,
            _ => Self::Running,
        }
    }
}

/// One row of run history, stored in the local database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub regions: Vec<String>,
    pub suffix: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub totals: RunTotals,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str) -> RawListing {
        RawListing {
            name: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn blank_name_is_rejected() {
        assert!(ListingRecord::from_raw(raw("   ")).is_none());
        let rec = ListingRecord::from_raw(raw("  Aoyama Clinic ")).expect("record");
        assert_eq!(rec.name, "Aoyama Clinic");
    }

    #[test]
    fn url_without_scheme_is_dropped() {
        let mut r = raw("A");
        r.url = Some("www.example.jp".into());
        assert_eq!(ListingRecord::from_raw(r).expect("record").url, None);

        let mut r = raw("A");
        r.url = Some("https://example.jp/".into());
        assert_eq!(
            ListingRecord::from_raw(r).expect("record").url.as_deref(),
            Some("https://example.jp/")
        );
    }

    #[test]
    fn phone_keeps_digits_and_hyphens() {
        let mut r = raw("A");
        r.phone = Some("電話: 03-1234-5678 ".into());
        assert_eq!(
            ListingRecord::from_raw(r).expect("record").phone.as_deref(),
            Some("03-1234-5678")
        );
    }

    #[test]
    fn out_of_range_numbers_are_dropped() {
        let mut r = raw("A");
        r.rating = Some(7.5);
        r.review_count = Some(-3);
        let rec = ListingRecord::from_raw(r).expect("record");
        assert_eq!(rec.rating, None);
        assert_eq!(rec.review_count, None);
    }

    #[test]
    fn validity_derivation() {
        let judge = |site, chain| ValidationJudgment {
            is_official_site: site,
            is_major_chain: chain,
            normalized_name: "A".into(),
            reason: None,
        };
        assert!(judge(Some(true), false).is_valid());
        assert!(judge(None, false).is_valid());
        assert!(!judge(Some(false), false).is_valid());
        assert!(!judge(Some(true), true).is_valid());
        assert!(!judge(None, true).is_valid());
    }

    #[test]
    fn progress_event_wire_shape() {
        let json = serde_json::to_value(ProgressEvent::log("region A: 3 found")).expect("ser");
        assert_eq!(json["type"], "log");
        assert_eq!(json["message"], "region A: 3 found");

        let complete = ProgressEvent::Complete {
            totals: RunTotals {
                total_found: 3,
                total_excluded: 1,
                total_valid: 2,
                total_new: 2,
            },
            records: vec![],
        };
        let json = serde_json::to_value(&complete).expect("ser");
        assert_eq!(json["type"], "complete");
        assert_eq!(json["total_new"], 2);
        assert!(complete.is_terminal());
    }
}
