use crawler::{CrawlerConfig, FetchError, Fetcher};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_config() -> CrawlerConfig {
    CrawlerConfig::default()
        .with_per_host_delay(Duration::from_millis(10))
        .with_retry_base_delay(Duration::from_millis(10))
}

async fn allow_all_robots(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

#[tokio::test]
async fn fetch_success_reports_status_and_body() {
    let server = MockServer::start().await;
    allow_all_robots(&server).await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html><body>hello</body></html>"),
        )
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(fast_config()).unwrap();
    let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
    let outcome = fetcher.fetch(&url, &CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.http_status, 200);
    assert_eq!(outcome.content_type(), Some("text/html"));
    assert!(String::from_utf8_lossy(&outcome.body).contains("hello"));
    assert!(!outcome.truncated);
}

#[tokio::test]
async fn redirect_reports_final_url() {
    let server = MockServer::start().await;
    allow_all_robots(&server).await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(fast_config()).unwrap();
    let url = Url::parse(&format!("{}/old", server.uri())).unwrap();
    let outcome = fetcher.fetch(&url, &CancellationToken::new()).await.unwrap();

    assert!(outcome.final_url.path().ends_with("/new"));
}

#[tokio::test]
async fn not_found_fails_without_retry() {
    let server = MockServer::start().await;
    allow_all_robots(&server).await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(fast_config()).unwrap();
    let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
    let err = fetcher
        .fetch(&url, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::HttpStatus(404)));
}

#[tokio::test]
async fn server_errors_exhaust_retry_schedule() {
    let server = MockServer::start().await;
    allow_all_robots(&server).await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4) // initial attempt plus three retries
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(fast_config()).unwrap();
    let url = Url::parse(&format!("{}/flaky", server.uri())).unwrap();
    let err = fetcher
        .fetch(&url, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::HttpStatus(500)));
}

#[tokio::test]
async fn too_many_requests_retried_once() {
    let server = MockServer::start().await;
    allow_all_robots(&server).await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .expect(2)
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(fast_config()).unwrap();
    let url = Url::parse(&format!("{}/busy", server.uri())).unwrap();
    let err = fetcher
        .fetch(&url, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::HttpStatus(429)));
}

#[tokio::test]
async fn robots_disallow_blocks_before_any_page_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(fast_config()).unwrap();
    let url = Url::parse(&format!("{}/private", server.uri())).unwrap();
    let err = fetcher
        .fetch(&url, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::RobotsDenied(_)));
}

#[tokio::test]
async fn robots_fetch_failure_fails_open() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(fast_config()).unwrap();
    let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
    let outcome = fetcher.fetch(&url, &CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.http_status, 200);
}

#[tokio::test]
async fn cancelled_token_aborts_fetch() {
    let server = MockServer::start().await;
    allow_all_robots(&server).await;

    let fetcher = Fetcher::new(fast_config()).unwrap();
    let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = fetcher.fetch(&url, &cancel).await.unwrap_err();
    assert!(matches!(err, FetchError::Cancelled));
}
