//! SEIBRO: daily settlement amounts of US equities held through Korean custody.
//!
//! The endpoint speaks an XML request/response dialect and only answers for a
//! single day at a time. Days without data come back as `<vector result="0">`.

use chrono::NaiveDate;
use qdc_core::{FieldKind, SchemaMap, TimeWindow};
use qdc_storage::FetchRequest;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::Value as JsonValue;

use crate::{compact_date, AdapterError, Instrument, RawRecord, SourceProfile, TabularSource};

const DEFAULT_INSTRUMENT_FIELD: &str = "ISIN";

pub struct SeibroSettlementSource {
    profile: SourceProfile,
    schema: SchemaMap,
}

impl SeibroSettlementSource {
    pub fn new(profile: SourceProfile) -> Self {
        let instrument = profile
            .instrument_field
            .clone()
            .unwrap_or_else(|| DEFAULT_INSTRUMENT_FIELD.to_string());
        let schema = SchemaMap::new("DATE")
            .text("DATE", "DATE")
            .text(&instrument, &instrument)
            .instrument(&instrument)
            .exclude("RNUM")
            .exclude("NATION_NM")
            // Settlement figures arrive as undeclared columns; coerced on purpose.
            .retain_unmapped(FieldKind::Numeric);
        Self { profile, schema }
    }
}

impl TabularSource for SeibroSettlementSource {
    fn profile(&self) -> &SourceProfile {
        &self.profile
    }

    fn schema(&self) -> &SchemaMap {
        &self.schema
    }

    fn max_span_days(&self) -> u32 {
        1
    }

    fn window_request(&self, window: &TimeWindow, _instrument: Option<&Instrument>) -> FetchRequest {
        FetchRequest::post_text(
            &self.profile.endpoint,
            "application/xml; charset=UTF-8",
            settlement_payload(window.start()),
        )
        .with_headers(
            self.profile
                .header_pairs()
                .filter(|(name, _)| !name.eq_ignore_ascii_case("content-type")),
        )
    }

    fn parse_window(
        &self,
        body: &[u8],
        window: &TimeWindow,
        _instrument: Option<&Instrument>,
    ) -> Result<Vec<RawRecord>, AdapterError> {
        let xml = std::str::from_utf8(body).map_err(|e| AdapterError::Malformed(e.to_string()))?;
        parse_settlement_xml(xml, window.start())
    }
}

fn settlement_payload(date: NaiveDate) -> String {
    let day = compact_date(date);
    format!(
        r#"<reqParam action="getImptFrcurStkSetlAmtList" task="ksd.safe.bip.cnts.OvsSec.process.OvsSecIsinPTask">
<MENU_NO value="921"/>
<CMM_BTN_ABBR_NM value="total_search,openall,print,hwp,word,pdf,seach,xls,"/>
<W2XPATH value="/IPORTAL/user/ovsSec/BIP_CNTS10013V.xml"/>
<PG_START value="1"/>
<PG_END value="10"/>
<START_DT value="{day}"/>
<END_DT value="{day}"/>
<S_TYPE value="2"/>
<S_COUNTRY value="US"/>
<D_TYPE value="4"/>
</reqParam>"#
    )
}

/// Rows are `<data><result><FIELD value=".."/>...</result></data>`; each gets a
/// `DATE` field for the queried day.
pub fn parse_settlement_xml(xml: &str, date: NaiveDate) -> Result<Vec<RawRecord>, AdapterError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut rows = Vec::new();
    let mut root_seen = false;
    let mut data_depth = 0usize;
    let mut current: Option<RawRecord> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if !root_seen {
                    root_seen = true;
                    if is_empty_result(&e)? {
                        return Ok(Vec::new());
                    }
                }
                if let Some(row) = current.as_mut() {
                    insert_value(row, &e)?;
                    continue;
                }
                match e.local_name().as_ref() {
                    b"data" => data_depth += 1,
                    b"result" if data_depth > 0 => current = Some(RawRecord::new()),
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if !root_seen {
                    root_seen = true;
                    if is_empty_result(&e)? {
                        return Ok(Vec::new());
                    }
                }
                if let Some(row) = current.as_mut() {
                    insert_value(row, &e)?;
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"result" => {
                    if let Some(mut row) = current.take() {
                        row.insert(
                            "DATE".into(),
                            JsonValue::String(date.format("%Y-%m-%d").to_string()),
                        );
                        rows.push(row);
                    }
                }
                b"data" => data_depth = data_depth.saturating_sub(1),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(AdapterError::Malformed(err.to_string())),
            _ => {}
        }
    }

    Ok(rows)
}

fn is_empty_result(root: &BytesStart<'_>) -> Result<bool, AdapterError> {
    Ok(root.local_name().as_ref() == b"vector"
        && attribute(root, b"result")?.as_deref() == Some("0"))
}

fn insert_value(row: &mut RawRecord, element: &BytesStart<'_>) -> Result<(), AdapterError> {
    let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
    let value = attribute(element, b"value")?.unwrap_or_default();
    row.insert(name, JsonValue::String(value));
    Ok(())
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, AdapterError> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| AdapterError::Malformed(e.to_string()))?;
        if attr.key.as_ref() == key {
            let value = attr
                .unescape_value()
                .map_err(|e| AdapterError::Malformed(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}
