//! HTTP-level tests for the authenticated client against a mock Kiwoom server.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use nonzero_ext::nonzero;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use trade_gate_core::ManualClock;
use trade_gate_kiwoom::{
    ids, AppCredentials, HttpMethod, KiwoomClient, KiwoomClientConfig, KiwoomError,
    OperationDescriptor, OperationRegistry, Params,
};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const STOCK_INFO_PATH: &str = "/api/dostk/stkinfo";

/// 09:30 in Seoul.
fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 0, 30, 0).unwrap()
}

fn params(value: Value) -> Params {
    value.as_object().cloned().unwrap_or_default()
}

fn stock_info_params() -> Params {
    params(json!({"stk_cd": "005930"}))
}

fn client_with(server: &MockServer, clock: Arc<ManualClock>, registry: OperationRegistry) -> KiwoomClient {
    let config = KiwoomClientConfig::paper()
        .with_base_url(server.uri())
        .with_backoff_base(Duration::from_millis(10))
        .with_rate_limit(nonzero!(1000u32));
    KiwoomClient::new(
        config,
        AppCredentials::new("test-app-key", "test-app-secret"),
        Arc::new(registry),
        clock,
    )
    .unwrap()
}

fn client(server: &MockServer, clock: Arc<ManualClock>) -> KiwoomClient {
    client_with(server, clock, OperationRegistry::builtin())
}

fn token_response(token: &str, expires_dt: Option<&str>) -> ResponseTemplate {
    let mut body = json!({
        "token": token,
        "token_type": "bearer",
        "return_code": 0,
        "return_msg": "OK",
    });
    if let Some(expires) = expires_dt {
        body["expires_dt"] = json!(expires);
    }
    ResponseTemplate::new(200).set_body_json(body)
}

/// Token endpoint answering `token` up to `times` times (unbounded when `None`).
async fn mount_token(server: &MockServer, token: &str, expires_dt: Option<&str>, times: Option<u64>) {
    let mock = Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(token_response(token, expires_dt));
    let mock = match times {
        Some(n) => mock.up_to_n_times(n),
        None => mock,
    };
    mock.mount(server).await;
}

async fn requests_to(server: &MockServer, target: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == target)
        .collect()
}

fn auth_header(request: &Request) -> String {
    request
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

// ==================== Credential Lifecycle ====================

#[tokio::test]
async fn test_token_reused_until_refresh_margin() {
    let server = MockServer::start().await;
    // First token expires 10:30 Seoul time, one hour after start.
    mount_token(&server, "tok-1", Some("20250314103000"), Some(1)).await;
    mount_token(&server, "tok-2", Some("20250315093000"), None).await;
    Mock::given(method("POST"))
        .and(path(STOCK_INFO_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"return_code": 0})))
        .mount(&server)
        .await;

    let clock = Arc::new(ManualClock::new(start()));
    let client = client(&server, clock.clone());

    client.call(ids::STOCK_INFO, stock_info_params()).await.unwrap();
    assert_eq!(client.credentials().exchange_count(), 1);

    // 50 minutes in: 10 minutes left, outside the 5 minute margin.
    clock.advance_secs(3000);
    client.call(ids::STOCK_INFO, stock_info_params()).await.unwrap();
    assert_eq!(client.credentials().exchange_count(), 1);

    // 57.5 minutes in: inside the margin.
    clock.advance_secs(450);
    client.call(ids::STOCK_INFO, stock_info_params()).await.unwrap();
    assert_eq!(client.credentials().exchange_count(), 2);

    assert_eq!(requests_to(&server, "/oauth2/token").await.len(), 2);
    let calls = requests_to(&server, STOCK_INFO_PATH).await;
    assert_eq!(calls.len(), 3);
    assert_eq!(auth_header(&calls[1]), "Bearer tok-1");
    assert_eq!(auth_header(&calls[2]), "Bearer tok-2");
}

#[tokio::test]
async fn test_token_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_json(json!({
            "grant_type": "client_credentials",
            "appkey": "test-app-key",
            "secretkey": "test-app-secret",
        })))
        .respond_with(token_response("tok-1", Some("20250315093000")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(ManualClock::new(start())));
    assert_eq!(client.access_token().await.unwrap(), "tok-1");
    assert_eq!(client.access_token().await.unwrap(), "tok-1");
}

#[tokio::test]
async fn test_missing_expiry_defaults_to_one_day() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", None, None).await;

    let client = client(&server, Arc::new(ManualClock::new(start())));
    client.access_token().await.unwrap();

    assert_eq!(
        client.credentials().expires_at().await,
        Some(start() + ChronoDuration::hours(24))
    );
}

#[tokio::test]
async fn test_failed_token_exchange_is_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(ManualClock::new(start())));
    let err = client.call(ids::STOCK_INFO, stock_info_params()).await.unwrap_err();

    assert!(matches!(err, KiwoomError::Authentication(_)), "{err:?}");
    assert!(requests_to(&server, STOCK_INFO_PATH).await.is_empty());
}

#[tokio::test]
async fn test_token_missing_from_response_quotes_server_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"return_code": 3, "return_msg": "invalid appkey"})),
        )
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(ManualClock::new(start())));
    match client.access_token().await.unwrap_err() {
        KiwoomError::Authentication(msg) => assert!(msg.contains("invalid appkey")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_callers_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(token_response("tok-1", Some("20250315093000")).set_delay(Duration::from_millis(100)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(STOCK_INFO_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"return_code": 0})))
        .mount(&server)
        .await;

    let client = Arc::new(client(&server, Arc::new(ManualClock::new(start()))));
    let handles: Vec<_> = (0..10)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.call(ids::STOCK_INFO, stock_info_params()).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(client.credentials().exchange_count(), 1);
    assert_eq!(requests_to(&server, "/oauth2/token").await.len(), 1);
    assert_eq!(requests_to(&server, STOCK_INFO_PATH).await.len(), 10);
}

// ==================== Retry Behavior ====================

#[tokio::test]
async fn test_transient_failures_exhaust_three_attempts() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", Some("20250315093000"), None).await;
    Mock::given(method("POST"))
        .and(path(STOCK_INFO_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(ManualClock::new(start())));
    let started = Instant::now();
    let err = client.call(ids::STOCK_INFO, stock_info_params()).await.unwrap_err();

    match err {
        KiwoomError::RequestFailed {
            operation_id,
            endpoint,
            last_error,
            attempts,
        } => {
            assert_eq!(operation_id, "ka10001");
            assert_eq!(attempts, 3);
            assert!(endpoint.ends_with(STOCK_INFO_PATH));
            assert!(last_error.contains("503"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // Slept 10ms after attempt 1 and 20ms after attempt 2.
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert_eq!(requests_to(&server, STOCK_INFO_PATH).await.len(), 3);
}

#[tokio::test]
async fn test_transient_failure_then_success() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", Some("20250315093000"), None).await;
    Mock::given(method("POST"))
        .and(path(STOCK_INFO_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(STOCK_INFO_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"stk_nm": "Samsung"})))
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(ManualClock::new(start())));
    let body = client.call(ids::STOCK_INFO, stock_info_params()).await.unwrap();

    assert_eq!(body, json!({"stk_nm": "Samsung"}));
    assert_eq!(requests_to(&server, STOCK_INFO_PATH).await.len(), 2);
}

#[tokio::test]
async fn test_rate_limited_response_is_retried() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", Some("20250315093000"), None).await;
    Mock::given(method("POST"))
        .and(path(STOCK_INFO_PATH))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(STOCK_INFO_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"return_code": 0})))
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(ManualClock::new(start())));
    client.call(ids::STOCK_INFO, stock_info_params()).await.unwrap();
    assert_eq!(requests_to(&server, STOCK_INFO_PATH).await.len(), 3);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", Some("20250315093000"), None).await;
    Mock::given(method("POST"))
        .and(path(STOCK_INFO_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad stk_cd"))
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(ManualClock::new(start())));
    let err = client.call(ids::STOCK_INFO, stock_info_params()).await.unwrap_err();

    assert!(matches!(err, KiwoomError::RequestFailed { attempts: 1, .. }), "{err:?}");
    assert_eq!(requests_to(&server, STOCK_INFO_PATH).await.len(), 1);
}

// ==================== Authentication Failure Recovery ====================

#[tokio::test]
async fn test_rejected_token_is_refreshed_once() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", Some("20250315093000"), Some(1)).await;
    mount_token(&server, "tok-2", Some("20250315093000"), None).await;
    Mock::given(method("POST"))
        .and(path(STOCK_INFO_PATH))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(STOCK_INFO_PATH))
        .and(header("authorization", "Bearer tok-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"return_code": 0})))
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(ManualClock::new(start())));
    let body = client.call(ids::STOCK_INFO, stock_info_params()).await.unwrap();

    assert_eq!(body["return_code"], 0);
    assert_eq!(client.credentials().exchange_count(), 2);
    assert_eq!(requests_to(&server, STOCK_INFO_PATH).await.len(), 2);
}

#[tokio::test]
async fn test_refresh_does_not_consume_an_attempt() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", Some("20250315093000"), Some(1)).await;
    mount_token(&server, "tok-2", Some("20250315093000"), None).await;
    Mock::given(method("POST"))
        .and(path(STOCK_INFO_PATH))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(STOCK_INFO_PATH))
        .and(header("authorization", "Bearer tok-2"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(ManualClock::new(start())));
    let err = client.call(ids::STOCK_INFO, stock_info_params()).await.unwrap_err();

    assert!(matches!(err, KiwoomError::RequestFailed { attempts: 3, .. }), "{err:?}");
    // One rejected request plus three attempts with the new token.
    assert_eq!(requests_to(&server, STOCK_INFO_PATH).await.len(), 4);
}

#[tokio::test]
async fn test_persistent_rejection_surfaces_authentication_error() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", Some("20250315093000"), Some(1)).await;
    mount_token(&server, "tok-2", Some("20250315093000"), None).await;
    Mock::given(method("POST"))
        .and(path(STOCK_INFO_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(ManualClock::new(start())));
    let err = client.call(ids::STOCK_INFO, stock_info_params()).await.unwrap_err();

    assert!(matches!(err, KiwoomError::Authentication(_)), "{err:?}");
    assert_eq!(client.credentials().exchange_count(), 2);
    assert_eq!(requests_to(&server, STOCK_INFO_PATH).await.len(), 2);
}

// ==================== Request Construction ====================

#[tokio::test]
async fn test_missing_params_fail_without_network() {
    let server = MockServer::start().await;
    let registry = {
        let mut registry = OperationRegistry::new();
        registry.insert(
            OperationDescriptor::new("tt00001", "Test", HttpMethod::Get, "/api/test")
                .with_required(["a", "b"]),
        );
        registry
    };

    let client = client_with(&server, Arc::new(ManualClock::new(start())), registry);
    let err = client.call("tt00001", params(json!({"a": 1}))).await.unwrap_err();

    match err {
        KiwoomError::InvalidParams { missing, .. } => assert_eq!(missing, vec!["b".to_string()]),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_unknown_operation_fails_without_network() {
    let server = MockServer::start().await;
    let client = client(&server, Arc::new(ManualClock::new(start())));

    let err = client.call("zz99999", Params::new()).await.unwrap_err();

    assert!(matches!(err, KiwoomError::UnknownOperation { .. }));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_standard_headers_and_json_body() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", Some("20250315093000"), None).await;
    Mock::given(method("POST"))
        .and(path("/api/dostk/ordr"))
        .and(header("api-id", "kt10000"))
        .and(header("authorization", "Bearer tok-1"))
        .and(header("appkey", "test-app-key"))
        .and(header("appsecret", "test-app-secret"))
        .and(header("content-type", "application/json; charset=utf-8"))
        .and(header("custtype", "P"))
        .and(body_json(json!({
            "dmst_stex_tp": "KRX",
            "stk_cd": "005930",
            "ord_qty": "10",
            "trde_tp": "01",
            "ord_uv": "70000",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ord_no": "0000001"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(ManualClock::new(start())));
    let body = client
        .call(
            ids::STOCK_BUY_ORDER,
            params(json!({"stk_cd": "005930", "ord_qty": "10", "trde_tp": "01", "ord_uv": "70000"})),
        )
        .await
        .unwrap();

    assert_eq!(body["ord_no"], "0000001");
}

#[tokio::test]
async fn test_extra_headers_override_standard_ones() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", Some("20250315093000"), None).await;
    Mock::given(method("POST"))
        .and(path(STOCK_INFO_PATH))
        .and(header("custtype", "B"))
        .and(header("cont-yn", "Y"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"return_code": 0})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(ManualClock::new(start())));
    client
        .call_with_headers(
            ids::STOCK_INFO,
            stock_info_params(),
            &[("custtype".into(), "B".into()), ("cont-yn".into(), "Y".into())],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_get_sends_params_as_query_string() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", Some("20250315093000"), None).await;
    Mock::given(method("GET"))
        .and(path("/api/test"))
        .and(query_param("stk_cd", "005930"))
        .and(query_param("count", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2, 3])))
        .expect(1)
        .mount(&server)
        .await;

    let mut registry = OperationRegistry::new();
    registry.insert(
        OperationDescriptor::new("tt00002", "Query test", HttpMethod::Get, "/api/test")
            .with_required(["stk_cd"]),
    );
    let client = client_with(&server, Arc::new(ManualClock::new(start())), registry);

    let body = client
        .call("tt00002", params(json!({"stk_cd": "005930", "count": 5})))
        .await
        .unwrap();
    assert_eq!(body, json!([1, 2, 3]));
}

#[tokio::test]
async fn test_empty_body_decodes_to_null() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", Some("20250315093000"), None).await;
    Mock::given(method("POST"))
        .and(path(STOCK_INFO_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(ManualClock::new(start())));
    let body = client.call(ids::STOCK_INFO, stock_info_params()).await.unwrap();
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn test_revoke_token() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", Some("20250315093000"), None).await;
    Mock::given(method("POST"))
        .and(path("/oauth2/revoke"))
        .and(body_json(json!({
            "appkey": "test-app-key",
            "secretkey": "test-app-secret",
            "token": "tok-1",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"return_code": 0})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(ManualClock::new(start())));
    client.access_token().await.unwrap();
    client.revoke_token().await.unwrap();

    assert_eq!(client.credentials().expires_at().await, None);
    // Nothing cached, so a second revoke is a no-op.
    assert_eq!(client.revoke_token().await.unwrap(), Value::Null);
}

#[tokio::test]
async fn test_revoke_issued_token_from_empty_store() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", Some("20250315093000"), Some(1)).await;
    Mock::given(method("POST"))
        .and(path("/oauth2/revoke"))
        .and(body_json(json!({
            "appkey": "test-app-key",
            "secretkey": "test-app-secret",
            "token": "tok-1",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"return_code": 0})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(ManualClock::new(start())));
    let body = client.revoke_issued_token().await.unwrap();

    assert_eq!(body, json!({"return_code": 0}));
    assert_eq!(client.credentials().exchange_count(), 1);
    assert_eq!(client.credentials().expires_at().await, None);
}
