//! The HTTP roster adapter against a local stand-in for the spreadsheet export.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::task::JoinHandle;

use enrollgate::roster::{RawTable, RosterCache, RosterError, RosterSource, SheetSource};

const ROSTER_CSV: &str = "Código ,Nombres,Carrera\n00123,ANA PAREDES,Minas\n2022000001,,Geología\n";

struct Export {
    base: String,
    handle: JoinHandle<()>,
}

impl Drop for Export {
    fn drop(&mut self) { self.handle.abort(); }
}

async fn start_export() -> Export {
    let app = Router::new()
        .route("/csv", get(|| async { ([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], ROSTER_CSV) }))
        .route("/forbidden", get(|| async { (StatusCode::FORBIDDEN, "no access").into_response() }))
        .route("/broken", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response() }))
        .route(
            "/signin",
            get(|| async { ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], "<html><body>Sign in</body></html>") }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                ROSTER_CSV
            }),
        );
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.expect("bind 127.0.0.1:0");
    let addr = listener.local_addr().expect("local addr");
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("export server task error: {e:?}");
        }
    });
    Export { base: format!("http://{}", addr), handle }
}

async fn fetch(url: String, timeout: Duration) -> Result<RawTable, RosterError> {
    tokio::task::spawn_blocking(move || SheetSource::new(url, timeout).fetch())
        .await
        .expect("fetch task")
}

fn unavailable(res: Result<RawTable, RosterError>) -> String {
    match res {
        Err(RosterError::SourceUnavailable(msg)) => msg,
        other => panic!("expected SourceUnavailable, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn csv_body_becomes_a_text_table() {
    let export = start_export().await;
    let table = fetch(format!("{}/csv", export.base), Duration::from_secs(5)).await.unwrap();
    assert_eq!(table.headers, vec!["Código ", "Nombres", "Carrera"]);
    assert_eq!(table.rows.len(), 2);
    // leading zeros survive and empty cells come back empty
    assert_eq!(table.rows[0], vec!["00123", "ANA PAREDES", "Minas"]);
    assert_eq!(table.rows[1], vec!["2022000001", "", "Geología"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_success_status_is_unavailable() {
    let export = start_export().await;
    let msg = unavailable(fetch(format!("{}/forbidden", export.base), Duration::from_secs(5)).await);
    assert!(msg.contains("403"), "{msg}");
    let msg = unavailable(fetch(format!("{}/broken", export.base), Duration::from_secs(5)).await);
    assert!(msg.contains("500"), "{msg}");
    let msg = unavailable(fetch(format!("{}/missing", export.base), Duration::from_secs(5)).await);
    assert!(msg.contains("404"), "{msg}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sign_in_page_is_not_a_roster() {
    let export = start_export().await;
    let msg = unavailable(fetch(format!("{}/signin", export.base), Duration::from_secs(5)).await);
    assert!(msg.contains("HTML"), "{msg}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_export_times_out() {
    let export = start_export().await;
    let msg = unavailable(fetch(format!("{}/slow", export.base), Duration::from_millis(200)).await);
    assert!(msg.contains("request failed"), "{msg}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cache_over_http_source_normalizes_or_degrades() {
    let export = start_export().await;

    let ok: Arc<dyn RosterSource> = Arc::new(SheetSource::new(format!("{}/csv", export.base), Duration::from_secs(5)));
    let cache = Arc::new(RosterCache::new(ok, Duration::from_secs(600)));
    let roster = {
        let cache = cache.clone();
        tokio::task::spawn_blocking(move || cache.load()).await.unwrap()
    };
    assert!(roster.is_valid());
    assert_eq!(roster.len(), 2);
    assert_eq!(roster.records()[0].identifier, "00123");

    let denied: Arc<dyn RosterSource> = Arc::new(SheetSource::new(format!("{}/forbidden", export.base), Duration::from_secs(5)));
    let cache = Arc::new(RosterCache::new(denied, Duration::from_secs(600)));
    let roster = tokio::task::spawn_blocking(move || cache.load()).await.unwrap();
    assert!(!roster.is_valid());
    assert!(roster.is_empty());
    assert!(matches!(roster.degradation(), Some(RosterError::SourceUnavailable(_))));
}
