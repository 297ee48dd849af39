//! KOFIA FreeSIS: daily stock market fund flows.

use qdc_core::{SchemaMap, TimeWindow};
use qdc_storage::FetchRequest;
use serde_json::json;

use crate::{compact_date, json_rows, AdapterError, Instrument, RawRecord, SourceProfile, TabularSource};

const FUNDS_OBJECT: &str = "STATSCU0100000060BO";

pub struct KofiaFundsSource {
    profile: SourceProfile,
    schema: SchemaMap,
}

impl KofiaFundsSource {
    pub fn new(profile: SourceProfile) -> Self {
        let schema = SchemaMap::new("DATE")
            .text("TMPV1", "DATE")
            .numeric("TMPV2", "투자자예탁금")
            .numeric("TMPV3", "장내파생상품 거래 예수금")
            .numeric("TMPV4", "RP 매도잔고")
            .numeric("TMPV5", "위탁매매 미수금")
            .numeric("TMPV6", "위탁매매 미수금 대비 실제 반대매매금액")
            .numeric("TMPV7", "미수금 대비 반대매매비중");
        Self { profile, schema }
    }
}

impl TabularSource for KofiaFundsSource {
    fn profile(&self) -> &SourceProfile {
        &self.profile
    }

    fn schema(&self) -> &SchemaMap {
        &self.schema
    }

    fn window_request(&self, window: &TimeWindow, _instrument: Option<&Instrument>) -> FetchRequest {
        let body = json!({
            "dmSearch": {
                "tmpV40": "1",
                "tmpV41": "1",
                "tmpV1": "D",
                "tmpV45": compact_date(window.start()),
                "tmpV46": compact_date(window.end()),
                "OBJ_NM": FUNDS_OBJECT,
            }
        });
        FetchRequest::post_json(&self.profile.endpoint, body).with_headers(self.profile.header_pairs())
    }

    fn parse_window(
        &self,
        body: &[u8],
        _window: &TimeWindow,
        _instrument: Option<&Instrument>,
    ) -> Result<Vec<RawRecord>, AdapterError> {
        json_rows(body, "ds1")
    }
}
