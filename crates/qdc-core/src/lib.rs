//! Core domain model for the quant data collector.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "qdc-core";

/// Latest persisted temporal key for one source, recomputed from the store on every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub source_id: String,
    pub last_key: Option<NaiveDate>,
}

impl SyncCheckpoint {
    pub fn empty(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            last_key: None,
        }
    }

    /// First date that has not been collected yet, if anything has been collected at all.
    pub fn next_start(&self) -> Option<NaiveDate> {
        self.last_key.and_then(|date| date.succ_opt())
    }
}

/// Closed date interval `[start, end]`; construction rejects `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl TimeWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn single_day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Inclusive number of calendar days covered.
    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Canonical field value: numeric text is coerced to `Number`, everything else stays `Text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Number(_) => None,
            Self::Text(value) => Some(value),
        }
    }
}

/// Upsert identity of a canonical record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NaturalKey {
    DateInstrument {
        date: NaiveDate,
        instrument_id: String,
    },
    Date(NaiveDate),
}

impl NaturalKey {
    pub fn date(&self) -> NaiveDate {
        match self {
            Self::Date(date) => *date,
            Self::DateInstrument { date, .. } => *date,
        }
    }

    pub fn instrument_id(&self) -> Option<&str> {
        match self {
            Self::Date(_) => None,
            Self::DateInstrument { instrument_id, .. } => Some(instrument_id),
        }
    }

    /// Flat string form used as the primary key inside a store collection.
    pub fn storage_key(&self) -> String {
        match self {
            Self::Date(date) => date.format("%Y-%m-%d").to_string(),
            Self::DateInstrument {
                date,
                instrument_id,
            } => format!("{}|{}", date.format("%Y-%m-%d"), instrument_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub natural_key: NaturalKey,
    pub fields: BTreeMap<String, FieldValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Numeric,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub source: String,
    pub canonical: String,
    pub kind: FieldKind,
}

/// Declares how one source's raw payload maps onto canonical records.
///
/// `date_field` and `instrument_field` name canonical fields, i.e. the value
/// after renaming. Source fields that are not declared are dropped when
/// `unmapped` is `None`, otherwise kept under their source name and treated
/// as the given kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMap {
    pub fields: Vec<FieldSpec>,
    pub date_field: String,
    pub instrument_field: Option<String>,
    pub exclude: Vec<String>,
    pub unmapped: Option<FieldKind>,
}

impl SchemaMap {
    pub fn new(date_field: impl Into<String>) -> Self {
        Self {
            fields: Vec::new(),
            date_field: date_field.into(),
            instrument_field: None,
            exclude: Vec::new(),
            unmapped: None,
        }
    }

    pub fn numeric(self, source: &str, canonical: &str) -> Self {
        self.field(source, canonical, FieldKind::Numeric)
    }

    pub fn text(self, source: &str, canonical: &str) -> Self {
        self.field(source, canonical, FieldKind::Text)
    }

    pub fn field(mut self, source: &str, canonical: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            source: source.to_string(),
            canonical: canonical.to_string(),
            kind,
        });
        self
    }

    pub fn instrument(mut self, canonical: &str) -> Self {
        self.instrument_field = Some(canonical.to_string());
        self
    }

    pub fn exclude(mut self, source: &str) -> Self {
        self.exclude.push(source.to_string());
        self
    }

    /// Keeps columns the schema does not declare, coerced as `kind`; without
    /// this they are dropped. `Numeric` rewrites undeclared columns, so it
    /// widens the normalizer's reach past the declared fields.
    pub fn retain_unmapped(mut self, kind: FieldKind) -> Self {
        self.unmapped = Some(kind);
        self
    }

    pub fn spec_for(&self, source: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.source == source)
    }

    pub fn is_excluded(&self, source: &str) -> bool {
        self.exclude.iter().any(|name| name == source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Company,
    Industry,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Company => "company",
            Self::Industry => "industry",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed sentinel describing how far a report document got through the content pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Summarized,
    SummaryFailed,
    NoUsableText,
    DownloadFailed,
    ExtractionFailed,
}

impl ContentStatus {
    pub fn has_text(&self) -> bool {
        matches!(self, Self::Summarized | Self::SummaryFailed)
    }
}

/// One analyst report, keyed by its document URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub document_url: String,
    pub publisher: String,
    pub title: String,
    pub subject_name: String,
    pub document_type: DocumentType,
    pub listing_date: NaiveDate,
    pub extracted_text: String,
    pub summary: String,
    pub status: ContentStatus,
    pub failure: Option<String>,
    pub content_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentifierMapping {
    pub source_id: String,
    pub resolved_symbol: String,
}
