//! OpenFIGI mapping API codec (ISIN to exchange ticker).

use qdc_storage::FetchRequest;
use serde_json::{json, Value as JsonValue};

use crate::AdapterError;

pub const API_KEY_HEADER: &str = "X-OPENFIGI-APIKEY";

/// Outcome for one identifier, positionally aligned with the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingResult {
    Matched(String),
    Warning(String),
    Error(String),
    Empty,
}

pub fn build_mapping_request(base_url: &str, isins: &[String], api_key: Option<&str>) -> FetchRequest {
    let jobs = isins
        .iter()
        .map(|isin| json!({ "idType": "ID_ISIN", "idValue": isin }))
        .collect();
    let request = FetchRequest::post_json(
        format!("{}/v3/mapping", base_url.trim_end_matches('/')),
        JsonValue::Array(jobs),
    );
    match api_key {
        Some(key) => request.with_header(API_KEY_HEADER, key),
        None => request,
    }
}

pub fn parse_mapping_response(body: &[u8]) -> Result<Vec<MappingResult>, AdapterError> {
    let entries: Vec<JsonValue> =
        serde_json::from_slice(body).map_err(|e| AdapterError::Malformed(e.to_string()))?;
    Ok(entries.iter().map(classify_entry).collect())
}

fn classify_entry(entry: &JsonValue) -> MappingResult {
    if let Some(candidates) = entry.get("data").and_then(JsonValue::as_array) {
        return candidates
            .first()
            .and_then(|first| first.get("ticker"))
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|ticker| !ticker.is_empty())
            .map(|ticker| MappingResult::Matched(ticker.to_string()))
            .unwrap_or(MappingResult::Empty);
    }
    if let Some(warning) = entry.get("warning") {
        return MappingResult::Warning(message(warning));
    }
    if let Some(error) = entry.get("error") {
        return MappingResult::Error(message(error));
    }
    MappingResult::Empty
}

fn message(value: &JsonValue) -> String {
    value
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use qdc_storage::RequestBody;

    use super::*;

    #[test]
    fn request_lists_isin_jobs_and_optional_key() {
        let isins = vec!["US0378331005".to_string(), "US5949181045".to_string()];
        let request = build_mapping_request("https://api.openfigi.com/", &isins, Some("secret"));

        assert_eq!(request.url, "https://api.openfigi.com/v3/mapping");
        assert_eq!(
            request.headers,
            vec![(API_KEY_HEADER.to_string(), "secret".to_string())]
        );
        let RequestBody::Json(body) = &request.body else {
            panic!("expected json body");
        };
        assert_eq!(body[1]["idType"], "ID_ISIN");
        assert_eq!(body[1]["idValue"], "US5949181045");

        let anonymous = build_mapping_request("https://api.openfigi.com", &isins, None);
        assert!(anonymous.headers.is_empty());
    }

    #[test]
    fn entries_classify_by_shape() {
        let body = br#"[
            {"data":[{"figi":"BBG000B9XRY4","ticker":"AAPL"},{"ticker":"AAPL1"}]},
            {"warning":"No identifier found."},
            {"error":"Invalid idValue format"},
            {"data":[{"figi":"BBG000000000","ticker":""}]},
            {"data":[]}
        ]"#;

        let results = parse_mapping_response(body).unwrap();
        assert_eq!(
            results,
            vec![
                MappingResult::Matched("AAPL".into()),
                MappingResult::Warning("No identifier found.".into()),
                MappingResult::Error("Invalid idValue format".into()),
                MappingResult::Empty,
                MappingResult::Empty,
            ]
        );
        assert!(parse_mapping_response(b"{\"error\":\"bad\"}").is_err());
    }
}
