//! Wire adapters: request construction and payload parsing for each upstream.
//!
//! Adapters never perform I/O. They turn a window (and optionally an
//! instrument) into a [`FetchRequest`] and turn response bytes back into
//! [`RawRecord`]s; the sync engine owns fetching, pacing and persistence.

use chrono::NaiveDate;
use qdc_core::{SchemaMap, TimeWindow};
use qdc_storage::FetchRequest;
use serde_json::Value as JsonValue;
use thiserror::Error;

pub mod kofia;
pub mod krx;
pub mod listing;
pub mod openfigi;
mod profile;
pub mod seibro;

pub use kofia::KofiaFundsSource;
pub use krx::{KrxEtfSource, KrxIndexSource};
pub use listing::{parse_report_listing, ListingRow};
pub use openfigi::{build_mapping_request, parse_mapping_response, MappingResult};
pub use profile::{DefaultStart, PolitenessRange, SourceKind, SourceProfile, UniverseSettings};
pub use seibro::SeibroSettlementSource;

pub const CRATE_NAME: &str = "qdc-adapters";

/// Untyped row as emitted by a source's wire format.
pub type RawRecord = serde_json::Map<String, JsonValue>;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("{0}")]
    Message(String),
}

/// Member of a source's instrument universe.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    pub code: String,
    pub short_code: String,
    pub name: String,
    pub market_cap: f64,
}

pub trait TabularSource: Send + Sync {
    fn profile(&self) -> &SourceProfile;

    fn schema(&self) -> &SchemaMap;

    fn max_span_days(&self) -> u32 {
        self.profile().max_span_days
    }

    /// Request listing the instruments to iterate; `None` for sources that
    /// return the whole market per window.
    fn universe_request(&self, _today: NaiveDate) -> Option<FetchRequest> {
        None
    }

    fn parse_universe(&self, _body: &[u8]) -> Result<Vec<Instrument>, AdapterError> {
        Ok(Vec::new())
    }

    fn window_request(&self, window: &TimeWindow, instrument: Option<&Instrument>) -> FetchRequest;

    fn parse_window(
        &self,
        body: &[u8],
        window: &TimeWindow,
        instrument: Option<&Instrument>,
    ) -> Result<Vec<RawRecord>, AdapterError>;
}

pub fn tabular_source_for(profile: SourceProfile) -> Box<dyn TabularSource> {
    match profile.kind {
        SourceKind::KrxIndex => Box::new(KrxIndexSource::new(profile)),
        SourceKind::KrxEtf => Box::new(KrxEtfSource::new(profile)),
        SourceKind::KofiaFunds => Box::new(KofiaFundsSource::new(profile)),
        SourceKind::SeibroSettlement => Box::new(SeibroSettlementSource::new(profile)),
    }
}

/// Rows under `key` of a JSON object body. A missing or null key is an empty page.
pub(crate) fn json_rows(body: &[u8], key: &str) -> Result<Vec<RawRecord>, AdapterError> {
    let payload: JsonValue =
        serde_json::from_slice(body).map_err(|e| AdapterError::Malformed(e.to_string()))?;
    let rows = match payload.get(key) {
        None | Some(JsonValue::Null) => return Ok(Vec::new()),
        Some(JsonValue::Array(rows)) => rows,
        Some(other) => {
            return Err(AdapterError::Malformed(format!(
                "`{key}` is not an array: {other}"
            )))
        }
    };

    rows.iter()
        .map(|row| match row {
            JsonValue::Object(map) => Ok(map.clone()),
            other => Err(AdapterError::Malformed(format!(
                "`{key}` entry is not an object: {other}"
            ))),
        })
        .collect()
}

pub(crate) fn compact_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_rows_treats_missing_key_as_empty() {
        assert!(json_rows(br#"{"CURRENT_DATETIME":"x"}"#, "output").unwrap().is_empty());
        assert!(json_rows(br#"{"output":null}"#, "output").unwrap().is_empty());
        assert_eq!(
            json_rows(br#"{"output":[{"TRD_DD":"2024/01/02"}]}"#, "output")
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn json_rows_rejects_unexpected_shapes() {
        assert!(matches!(
            json_rows(b"<html>", "output"),
            Err(AdapterError::Malformed(_))
        ));
        assert!(matches!(
            json_rows(br#"{"output":"busy"}"#, "output"),
            Err(AdapterError::Malformed(_))
        ));
        assert!(matches!(
            json_rows(br#"{"output":[1,2]}"#, "output"),
            Err(AdapterError::Malformed(_))
        ));
    }
}
