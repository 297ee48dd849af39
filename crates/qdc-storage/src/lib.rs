//! HTTP fetching, the SQLite record store and the document archive for qdc.

pub mod archive;
pub mod http;
pub mod store;

pub use archive::{ArchivedDocument, DocumentArchive};
pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FailureClass, FetchError,
    FetchRequest, FetchedResponse, HttpClientConfig, HttpFetcher, HttpMethod, PolitenessDelay,
    RateLimitHandling, RateLimitPolicy, RemoteFetch, RequestBody,
};
pub use reqwest::StatusCode;
pub use store::{PersistOutcome, RecordStore, SqliteStore, StoredRecord};

pub const CRATE_NAME: &str = "qdc-storage";
