mod common;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use chrono::NaiveDate;
use common::{memory_store, ok, FakeExtractor, FakeSummarizer, ScriptedFetch};
use qdc_adapters::PolitenessRange;
use qdc_storage::{DocumentArchive, FetchError, HttpFetcher, RecordStore, SqliteStore};
use qdc_sync::{InterruptFlag, OpenAiSummarizer, ReportContentPipeline, ReportSettings, SyncConfig};

const REPORT_DOC: &str = "Memory prices keep recovering. HBM share gains continue.\u{c}2023 2024 2025 12,345 23,456\u{c}Compliance notice for all readers.";

fn settings() -> ReportSettings {
    ReportSettings {
        collection: "naver_reports".into(),
        company_listing_url: "https://finance.test/research/company_list?page={page}".into(),
        industry_listing_url: "https://finance.test/research/industry_list".into(),
        document_host: "https://stock.test".into(),
        excluded_publishers: vec!["신한투자증권".into()],
        start_page: 1,
        end_page: 2,
        headers: BTreeMap::from([("user-agent".to_string(), "qdc-test".to_string())]),
        listing_politeness: PolitenessRange::default(),
        document_politeness: PolitenessRange::default(),
    }
}

fn listing(rows: &[(&str, &str, &str, Option<&str>, &str)]) -> String {
    let body: String = rows
        .iter()
        .map(|(subject, title, publisher, pdf, date)| {
            let link = pdf
                .map(|href| format!(r#"<a href="{href}">PDF</a>"#))
                .unwrap_or_default();
            format!(
                "<tr><td>{subject}</td><td>{title}</td><td>{publisher}</td><td class=\"file\">{link}</td><td class=\"date\">{date}</td><td>10</td></tr>"
            )
        })
        .collect();
    format!(r#"<html><body><table class="type_1"><tr><th>종목명</th></tr>{body}</table></body></html>"#)
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 17).unwrap()
}

fn pipeline(fetch: Arc<ScriptedFetch>, store: Arc<SqliteStore>, fail_summary: bool) -> ReportContentPipeline {
    ReportContentPipeline::new(
        fetch,
        Arc::new(FakeExtractor),
        Arc::new(FakeSummarizer { fail: fail_summary }),
        store,
        settings(),
        InterruptFlag::new(),
    )
}

fn company_page() -> String {
    listing(&[
        ("SK하이닉스", "실적 점검", "신한투자증권", Some("/research/excluded.pdf"), "24.05.17"),
        ("삼성전자", "HBM 공급 확대", "키움증권", Some("/research/company/report1.pdf"), "24.05.17"),
    ])
}

#[tokio::test]
async fn one_matching_row_is_persisted_and_rerun_inserts_nothing() {
    let store = memory_store().await;
    let fetch = ScriptedFetch::new(|request, _| {
        if request.url.ends_with(".pdf") {
            ok(request, REPORT_DOC)
        } else {
            ok(request, company_page())
        }
    });
    let pipeline = pipeline(fetch.clone(), store.clone(), false);

    let first = pipeline.run_company(1, 1, today()).await;
    assert_eq!(first.pages_requested, 1);
    assert_eq!(first.rows_seen, 2);
    assert_eq!(first.skipped_excluded_publisher, 1);
    assert_eq!(first.rows_matched, 1);
    assert_eq!(first.summarized, 1);
    assert_eq!(first.outcome.inserted, 1);
    assert_eq!(store.count("naver_reports").await.unwrap(), 1);
    assert!(fetch
        .calls()
        .iter()
        .all(|call| !call.url.contains("excluded")));
    assert!(fetch.calls()[0]
        .headers
        .contains(&("user-agent".to_string(), "qdc-test".to_string())));

    let url = "https://stock.test/research/company/report1.pdf";
    let body = store.fetch_body("naver_reports", url).await.unwrap().unwrap();
    assert_eq!(body["publisher"], "키움증권");
    assert_eq!(body["document_type"], "company");
    assert_eq!(body["status"], "summarized");
    assert_eq!(body["listing_date"], "2024-05-17");
    assert_eq!(
        body["extracted_text"],
        "Memory prices keep recovering. HBM share gains continue.\nCompliance notice for all readers."
    );
    assert_eq!(body["summary"], "[company] Memory prices keep recovering.");
    assert_eq!(
        body["content_hash"],
        DocumentArchive::content_hash(REPORT_DOC.as_bytes())
    );

    let second = pipeline.run_company(1, 1, today()).await;
    assert_eq!(second.outcome.inserted, 0);
    assert_eq!(second.outcome.updated + second.outcome.unchanged, 1);
    assert_eq!(store.count("naver_reports").await.unwrap(), 1);
}

#[tokio::test]
async fn stage_failures_are_recorded_on_the_document() {
    let store = memory_store().await;
    let fetch = ScriptedFetch::new(|request, _| {
        if request.url.ends_with("broken.pdf") {
            return Err(FetchError::Permanent {
                url: request.url.clone(),
                status: Some(404),
                detail: "not found".into(),
            });
        }
        if request.url.ends_with("tables.pdf") {
            return ok(request, "1 2 3 4 5\u{c}2023 2024");
        }
        if request.url.ends_with(".pdf") {
            return ok(request, REPORT_DOC);
        }
        ok(
            request,
            listing(&[
                ("현대차", "목표가 상향", "대신증권", Some("/r/broken.pdf"), "24.05.17"),
                ("기아", "수익성 점검", "대신증권", Some("/r/tables.pdf"), "24.05.17"),
                ("LG화학", "업황 바닥", "대신증권", Some("/r/ok.pdf"), "24.05.17"),
                ("POSCO홀딩스", "전일 리포트", "대신증권", Some("/r/old.pdf"), "24.05.16"),
                ("NAVER", "첨부 없음", "대신증권", None, "24.05.17"),
            ]),
        )
    });
    let pipeline = pipeline(fetch, store.clone(), true);

    let summary = pipeline.run_company(1, 1, today()).await;
    assert_eq!(summary.rows_seen, 5);
    assert_eq!(summary.rows_matched, 3);
    assert_eq!(summary.skipped_not_reference_date, 1);
    assert_eq!(summary.skipped_no_document, 1);
    assert_eq!(summary.download_failures, 1);
    assert_eq!(summary.no_text, 1);
    assert_eq!(summary.summary_failures, 1);
    assert_eq!(summary.outcome.inserted, 3);

    let broken = store
        .fetch_body("naver_reports", "https://stock.test/r/broken.pdf")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(broken["status"], "download_failed");
    assert_eq!(broken["extracted_text"], "");
    assert_eq!(broken["summary"], "");
    assert!(broken["content_hash"].is_null());

    let tables = store
        .fetch_body("naver_reports", "https://stock.test/r/tables.pdf")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tables["status"], "no_usable_text");

    let unsummarized = store
        .fetch_body("naver_reports", "https://stock.test/r/ok.pdf")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unsummarized["status"], "summary_failed");
    assert!(unsummarized["summary"]
        .as_str()
        .unwrap()
        .starts_with("summary failed:"));
    assert!(!unsummarized["extracted_text"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn industry_reports_drop_the_last_page_and_are_archived() {
    let store = memory_store().await;
    let archive_dir = tempfile::tempdir().unwrap();
    let fetch = ScriptedFetch::new(|request, _| {
        if request.url.ends_with(".pdf") {
            ok(request, REPORT_DOC)
        } else {
            ok(
                request,
                listing(&[("반도체", "업황 회복 초입", "키움증권", Some("/r/industry1.pdf"), "24.05.17")]),
            )
        }
    });
    let pipeline = pipeline(fetch.clone(), store.clone(), false)
        .with_archive(DocumentArchive::new(archive_dir.path()));

    let summary = pipeline.run_industry(today()).await;
    assert_eq!(summary.pages_requested, 1);
    assert_eq!(summary.summarized, 1);
    assert_eq!(fetch.calls()[0].url, "https://finance.test/research/industry_list");

    let body = store
        .fetch_body("naver_reports", "https://stock.test/r/industry1.pdf")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body["document_type"], "industry");
    assert_eq!(
        body["extracted_text"],
        "Memory prices keep recovering. HBM share gains continue."
    );

    let hash = DocumentArchive::content_hash(REPORT_DOC.as_bytes());
    let archived = archive_dir
        .path()
        .join(DocumentArchive::relative_path_for(today(), &hash, "pdf"));
    assert_eq!(std::fs::read(archived).unwrap(), REPORT_DOC.as_bytes());
}

#[tokio::test]
async fn failed_listing_pages_do_not_stop_the_crawl() {
    let store = memory_store().await;
    let fetch = ScriptedFetch::new(|request, _| {
        if request.url.ends_with("page=1") {
            return Err(FetchError::Transient {
                url: request.url.clone(),
                detail: "timed out".into(),
            });
        }
        if request.url.ends_with(".pdf") {
            return ok(request, REPORT_DOC);
        }
        ok(request, company_page())
    });
    let pipeline = pipeline(fetch.clone(), store.clone(), false);

    let summary = pipeline.run_company(1, 2, today()).await;
    assert_eq!(summary.pages_requested, 2);
    assert_eq!(summary.pages_failed, 1);
    assert_eq!(summary.outcome.inserted, 1);
    assert_eq!(fetch.calls()[1].url, "https://finance.test/research/company_list?page=2");
}

#[tokio::test]
async fn interrupt_stops_the_crawl_but_keeps_processed_rows() {
    let store = memory_store().await;
    let interrupt = InterruptFlag::new();
    let trigger = interrupt.clone();
    let fetch = ScriptedFetch::new(move |request, _| {
        if request.url.ends_with(".pdf") {
            trigger.trigger();
            return ok(request, REPORT_DOC);
        }
        ok(
            request,
            listing(&[
                ("삼성전자", "HBM", "키움증권", Some("/r/a.pdf"), "24.05.17"),
                ("LG전자", "가전", "키움증권", Some("/r/b.pdf"), "24.05.17"),
            ]),
        )
    });
    let pipeline = ReportContentPipeline::new(
        fetch.clone(),
        Arc::new(FakeExtractor),
        Arc::new(FakeSummarizer { fail: false }),
        store.clone(),
        settings(),
        interrupt,
    );

    let summary = pipeline.run_company(1, 2, today()).await;
    assert!(summary.interrupted);
    assert_eq!(summary.pages_requested, 1);
    assert_eq!(summary.rows_matched, 1);
    assert_eq!(summary.outcome.inserted, 1);
    assert_eq!(fetch.call_count(), 2);
    assert_eq!(store.count("naver_reports").await.unwrap(), 1);
}

type Refusals = (Arc<AtomicUsize>, StatusCode);

async fn refuse(State((hits, status)): State<Refusals>) -> StatusCode {
    hits.fetch_add(1, Ordering::SeqCst);
    status
}

async fn summary_api(status: StatusCode) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/v1/responses", post(refuse))
        .with_state((hits.clone(), status));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/v1"), hits)
}

fn cli_config() -> SyncConfig {
    SyncConfig {
        database_path: PathBuf::from(":memory:"),
        archive_dir: None,
        workspace_root: PathBuf::from("."),
        user_agent: Some("qdc-test".into()),
        http_timeout_secs: 5,
        rate_limit_cooldown_secs: 60,
        openai_api_key: Some("sk-test".into()),
        summary_model: "gpt-4.1".into(),
        openfigi_api_key: None,
    }
}

#[tokio::test]
async fn refused_summary_requests_are_sent_once_and_recorded_as_failed() {
    for status in [StatusCode::TOO_MANY_REQUESTS, StatusCode::SERVICE_UNAVAILABLE] {
        let (base_url, hits) = summary_api(status).await;
        let config = cli_config();
        let summarizer = OpenAiSummarizer::new(
            Arc::new(HttpFetcher::new(config.summary_http_config()).unwrap()),
            "sk-test",
            config.summary_model.clone(),
        )
        .with_base_url(base_url);

        let store = memory_store().await;
        let fetch = ScriptedFetch::new(|request, _| {
            if request.url.ends_with(".pdf") {
                ok(request, REPORT_DOC)
            } else {
                ok(request, company_page())
            }
        });
        let pipeline = ReportContentPipeline::new(
            fetch,
            Arc::new(FakeExtractor),
            Arc::new(summarizer),
            store.clone(),
            settings(),
            InterruptFlag::new(),
        );

        let summary = tokio::time::timeout(Duration::from_secs(15), pipeline.run_company(1, 1, today()))
            .await
            .unwrap();
        assert_eq!(summary.summary_failures, 1, "status {status}");
        assert_eq!(hits.load(Ordering::SeqCst), 1, "status {status}");

        let body = store
            .fetch_body("naver_reports", "https://stock.test/research/company/report1.pdf")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body["status"], "summary_failed");
        assert!(body["summary"].as_str().unwrap().starts_with("summary failed:"));
        assert!(!body["extracted_text"].as_str().unwrap().is_empty());
    }
}
