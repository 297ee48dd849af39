//! KRX market data portal: KOSPI index history and ETF daily prices.

use std::cmp::Ordering;

use chrono::NaiveDate;
use qdc_core::{FieldKind, SchemaMap, TimeWindow};
use qdc_storage::FetchRequest;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{
    compact_date, json_rows, AdapterError, Instrument, RawRecord, SourceProfile, TabularSource,
    UniverseSettings,
};

const INDEX_HISTORY_BLD: &str = "dbms/MDC/STAT/standard/MDCSTAT00301";
const ETF_LISTING_BLD: &str = "dbms/MDC/STAT/standard/MDCSTAT04301";
const ETF_HISTORY_BLD: &str = "dbms/MDC/STAT/standard/MDCSTAT04501";

pub struct KrxIndexSource {
    profile: SourceProfile,
    schema: SchemaMap,
}

impl KrxIndexSource {
    pub fn new(profile: SourceProfile) -> Self {
        let schema = SchemaMap::new("date")
            .text("TRD_DD", "date")
            .numeric("CLSPRC_IDX", "close")
            .numeric("OPNPRC_IDX", "open")
            .numeric("HGPRC_IDX", "high")
            .numeric("LWPRC_IDX", "low")
            .numeric("ACC_TRDVAL", "tvolWon")
            .numeric("MKTCAP", "mktcapWon");
        Self { profile, schema }
    }
}

impl TabularSource for KrxIndexSource {
    fn profile(&self) -> &SourceProfile {
        &self.profile
    }

    fn schema(&self) -> &SchemaMap {
        &self.schema
    }

    fn window_request(&self, window: &TimeWindow, _instrument: Option<&Instrument>) -> FetchRequest {
        FetchRequest::post_form(
            &self.profile.endpoint,
            [
                ("bld", INDEX_HISTORY_BLD.to_string()),
                ("locale", "ko_KR".to_string()),
                ("tboxindIdx_finder_equidx0_2", "코스피".to_string()),
                ("indIdx", "1".to_string()),
                ("indIdx2", "001".to_string()),
                ("codeNmindIdx_finder_equidx0_2", "코스피".to_string()),
                ("param1indIdx_finder_equidx0_2", String::new()),
                ("strtDd", compact_date(window.start())),
                ("endDd", compact_date(window.end())),
                ("share", "2".to_string()),
                ("money", "1".to_string()),
                ("csvxls_isNo", "false".to_string()),
            ],
        )
        .with_headers(self.profile.header_pairs())
    }

    fn parse_window(
        &self,
        body: &[u8],
        _window: &TimeWindow,
        _instrument: Option<&Instrument>,
    ) -> Result<Vec<RawRecord>, AdapterError> {
        json_rows(body, "output")
    }
}

/// ETF daily OHLCV, iterated per instrument over a ranked universe.
pub struct KrxEtfSource {
    profile: SourceProfile,
    schema: SchemaMap,
    universe: UniverseSettings,
}

impl KrxEtfSource {
    pub fn new(profile: SourceProfile) -> Self {
        let schema = SchemaMap::new("TRD_DD")
            .text("TRD_DD", "TRD_DD")
            .text("ISU_CD", "ISU_CD")
            .text("ISU_ABBRV", "ISU_ABBRV")
            .text("IDX_IND_NM", "IDX_IND_NM")
            .numeric("TDD_CLSPRC", "TDD_CLSPRC")
            .numeric("TDD_OPNPRC", "TDD_OPNPRC")
            .numeric("TDD_HGPRC", "TDD_HGPRC")
            .numeric("TDD_LWPRC", "TDD_LWPRC")
            .numeric("ACC_TRDVOL", "ACC_TRDVOL")
            .numeric("ACC_TRDVAL", "ACC_TRDVAL")
            .numeric("MKTCAP", "MKTCAP")
            .numeric("LST_NAV", "LST_NAV")
            .instrument("ISU_CD")
            // Undeclared ETF columns are kept and coerced to numbers on purpose.
            .retain_unmapped(FieldKind::Numeric);
        let universe = profile.universe.clone().unwrap_or_default();
        Self {
            profile,
            schema,
            universe,
        }
    }
}

impl TabularSource for KrxEtfSource {
    fn profile(&self) -> &SourceProfile {
        &self.profile
    }

    fn schema(&self) -> &SchemaMap {
        &self.schema
    }

    fn universe_request(&self, today: NaiveDate) -> Option<FetchRequest> {
        let request = FetchRequest::post_form(
            &self.profile.endpoint,
            [
                ("bld", ETF_LISTING_BLD.to_string()),
                ("locale", "ko_KR".to_string()),
                ("trdDd", compact_date(today)),
                ("share", "1".to_string()),
                ("money", "1".to_string()),
                ("csvxls_isNo", "false".to_string()),
            ],
        )
        .with_headers(self.profile.header_pairs());
        Some(request)
    }

    fn parse_universe(&self, body: &[u8]) -> Result<Vec<Instrument>, AdapterError> {
        let mut listed: Vec<Instrument> = json_rows(body, "output")?
            .iter()
            .filter_map(|row| {
                let code = text_field(row, "ISU_CD")?;
                Some(Instrument {
                    short_code: text_field(row, "ISU_SRT_CD").unwrap_or_default(),
                    name: text_field(row, "ISU_ABBRV").unwrap_or_default(),
                    market_cap: text_field(row, "MKTCAP")
                        .and_then(|v| v.replace(',', "").trim().parse::<f64>().ok())
                        .unwrap_or(0.0),
                    code,
                })
            })
            .collect();

        listed.sort_by(|a, b| {
            b.market_cap
                .partial_cmp(&a.market_cap)
                .unwrap_or(Ordering::Equal)
        });
        listed.truncate(self.universe.limit);
        let ranked = listed.len();
        listed.retain(|instrument| {
            !self
                .universe
                .exclude_name_keywords
                .iter()
                .any(|keyword| instrument.name.contains(keyword.as_str()))
        });
        debug!(
            source_id = %self.profile.source_id,
            ranked,
            kept = listed.len(),
            "etf universe filtered"
        );
        Ok(listed)
    }

    fn window_request(&self, window: &TimeWindow, instrument: Option<&Instrument>) -> FetchRequest {
        let code = instrument.map(|i| i.code.clone()).unwrap_or_default();
        FetchRequest::post_form(
            &self.profile.endpoint,
            [
                ("bld", ETF_HISTORY_BLD.to_string()),
                ("locale", "ko_KR".to_string()),
                ("param1isuCd_finder_secuprodisu1_1", String::new()),
                ("isuCd", code),
                ("strtDd", compact_date(window.start())),
                ("endDd", compact_date(window.end())),
                ("share", "1".to_string()),
                ("money", "1".to_string()),
                ("csvxls_isNo", "false".to_string()),
            ],
        )
        .with_headers(self.profile.header_pairs())
    }

    fn parse_window(
        &self,
        body: &[u8],
        _window: &TimeWindow,
        instrument: Option<&Instrument>,
    ) -> Result<Vec<RawRecord>, AdapterError> {
        let instrument = instrument.ok_or_else(|| {
            AdapterError::Message("ETF history is requested per instrument".to_string())
        })?;
        let mut rows = json_rows(body, "output")?;
        for row in &mut rows {
            row.insert("ISU_CD".into(), JsonValue::String(instrument.code.clone()));
            row.insert("ISU_ABBRV".into(), JsonValue::String(instrument.name.clone()));
        }
        Ok(rows)
    }
}

fn text_field(row: &RawRecord, key: &str) -> Option<String> {
    match row.get(key)? {
        JsonValue::String(value) => Some(value.trim().to_string()),
        JsonValue::Number(value) => Some(value.to_string()),
        _ => None,
    }
}
