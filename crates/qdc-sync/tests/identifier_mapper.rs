mod common;

use std::time::Duration;

use common::{ok, ScriptedFetch};
use qdc_storage::{FetchError, RequestBody};
use qdc_sync::{IdentifierBatchMapper, InterruptFlag, MapperSettings};
use serde_json::{json, Value as JsonValue};

fn fast_settings(api_key: Option<&str>, batch_size: usize) -> MapperSettings {
    MapperSettings {
        base_url: "http://figi.test".into(),
        api_key: api_key.map(str::to_string),
        batch_size,
        cooldown: Duration::ZERO,
        authenticated_pause: Duration::ZERO,
        anonymous_pause: Duration::ZERO,
        failure_pause: Duration::ZERO,
    }
}

fn isins(codes: &[&str]) -> Vec<String> {
    codes.iter().map(|c| c.to_string()).collect()
}

fn requested_ids(body: &RequestBody) -> Vec<String> {
    let RequestBody::Json(JsonValue::Array(jobs)) = body else {
        panic!("expected a json array body");
    };
    jobs.iter()
        .map(|job| job["idValue"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn warnings_are_skipped_and_matches_recorded() {
    let fetch = ScriptedFetch::new(|request, _| {
        ok(
            request,
            json!([
                {"warning": "No identifier found."},
                {"data": [{"figi": "BBG000B9XRY4", "ticker": "AAPL"}]}
            ])
            .to_string(),
        )
    });
    let mapper = IdentifierBatchMapper::new(fetch.clone(), fast_settings(Some("key"), 10), InterruptFlag::new());

    let report = mapper.map(&isins(&["US0000000000", "US0378331005"])).await;
    assert_eq!(report.mappings.len(), 1);
    assert_eq!(report.mappings["US0378331005"], "AAPL");
    assert_eq!(report.warnings, 1);
    assert_eq!(report.batches, 1);
    assert!(fetch.calls()[0]
        .headers
        .contains(&("X-OPENFIGI-APIKEY".to_string(), "key".to_string())));
}

#[tokio::test]
async fn rate_limited_batch_is_resent_before_advancing() {
    let fetch = ScriptedFetch::new(|request, index| {
        if index == 1 {
            return Err(FetchError::RateLimited {
                url: request.url.clone(),
            });
        }
        let jobs: Vec<JsonValue> = requested_ids(&request.body)
            .iter()
            .map(|isin| json!({"data": [{"ticker": format!("T{}", &isin[isin.len() - 2..])}]}))
            .collect();
        ok(request, JsonValue::Array(jobs).to_string())
    });
    let mapper = IdentifierBatchMapper::new(fetch.clone(), fast_settings(None, 10), InterruptFlag::new());
    let identifiers: Vec<String> = (0..12).map(|i| format!("US00000000{i:02}")).collect();

    let report = mapper.map(&identifiers).await;
    assert_eq!(report.mappings.len(), 12);
    assert_eq!(report.batches, 3);
    assert_eq!(report.mappings["US0000000011"], "T11");

    let sent: Vec<Vec<String>> = fetch.calls().iter().map(|c| requested_ids(&c.body)).collect();
    assert_eq!(sent.len(), 4);
    assert_eq!(sent[0].len(), 5);
    assert_eq!(sent[1], sent[2]);
    assert_eq!(sent[3].len(), 2);
    assert!(fetch.calls()[0].headers.is_empty());
}

#[tokio::test]
async fn failed_batches_keep_earlier_results() {
    let fetch = ScriptedFetch::new(|request, index| match index {
        0 => ok(request, json!([{"data": [{"ticker": "AAPL"}]}, {"error": "Invalid idValue"}]).to_string()),
        1 => Err(FetchError::Permanent {
            url: request.url.clone(),
            status: Some(400),
            detail: "bad request".into(),
        }),
        _ => ok(request, "not json"),
    });
    let mapper = IdentifierBatchMapper::new(fetch, fast_settings(Some("key"), 2), InterruptFlag::new());

    let report = mapper
        .map(&isins(&["US0378331005", "BAD", "US5949181045", "US02079K3059", "US88160R1014"]))
        .await;
    assert_eq!(report.mappings.len(), 1);
    assert_eq!(report.errors, 1);
    assert_eq!(report.failed_batches, 2);
    assert_eq!(report.batches, 1);
}

#[tokio::test]
async fn short_responses_align_by_position() {
    let fetch = ScriptedFetch::new(|request, _| ok(request, json!([{"data": [{"ticker": "AAPL"}]}]).to_string()));
    let mapper = IdentifierBatchMapper::new(fetch, fast_settings(Some("key"), 10), InterruptFlag::new());

    let report = mapper.map(&isins(&["US0378331005", "US5949181045"])).await;
    assert_eq!(report.mappings.len(), 1);
    assert_eq!(report.mappings["US0378331005"], "AAPL");
}

#[tokio::test]
async fn interrupt_returns_the_partial_mapping() {
    let interrupt = InterruptFlag::new();
    let trigger = interrupt.clone();
    let fetch = ScriptedFetch::new(move |request, _| {
        trigger.trigger();
        ok(request, json!([{"data": [{"ticker": "AAPL"}]}]).to_string())
    });
    let mapper = IdentifierBatchMapper::new(fetch.clone(), fast_settings(Some("key"), 1), interrupt);

    let report = mapper.map(&isins(&["US0378331005", "US5949181045"])).await;
    assert!(report.interrupted);
    assert_eq!(fetch.call_count(), 1);
    assert_eq!(report.mappings.len(), 1);
}
