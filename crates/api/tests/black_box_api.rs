use std::sync::Arc;

use purse_api::app::{build_app, AppServices};
use purse_infra::EngineConfig;
use reqwest::StatusCode;
use serde_json::{json, Value};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod over a freshly seeded in-memory store, on an ephemeral port.
        let services = AppServices::in_memory(EngineConfig::default())
            .await
            .expect("failed to seed store");
        let app = build_app(Arc::new(services));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn post(client: &reqwest::Client, url: String, body: Value) -> (StatusCode, Value) {
    let res = client.post(url).json(&body).send().await.unwrap();
    let status = res.status();
    (status, res.json().await.unwrap())
}

async fn balance_of(client: &reqwest::Client, srv: &TestServer, id: i64) -> String {
    let res = client
        .get(srv.url(&format!("/api/v1/accounts/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    body["balance"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn ping_and_health() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/ping")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "message": "Pong" }));

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn topup_credits_the_account() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (status, body) = post(
        &client,
        srv.url("/api/v1/topup"),
        json!({ "user_id": 1, "amount": 100 }),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "success");
    assert_eq!(body["balance"], "1100.00");
    assert_eq!(body["transaction"]["kind"], "CREDIT");
    assert_eq!(body["transaction"]["status"], "COMPLETED");
    assert_eq!(body["transaction"]["amount"], "100.00");
    assert_eq!(balance_of(&client, &srv, 1).await, "1100.00");
}

#[tokio::test]
async fn withdrawal_debits_the_account() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (status, body) = post(
        &client,
        srv.url("/api/v1/withdrawal"),
        json!({ "account_id": 2, "amount": "125.50" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["balance"], "374.50");
    assert_eq!(body["transaction"]["kind"], "DEBIT");

    let res = client
        .get(srv.url("/api/v1/accounts/2/transactions"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let log: Value = res.json().await.unwrap();
    assert_eq!(log["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn large_numeric_amount_is_applied_exactly() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    // Raw text: a `json!` float literal would already be rounded to f64.
    let res = client
        .post(srv.url("/api/v1/topup"))
        .header("content-type", "application/json")
        .body(r#"{"user_id": 1, "amount": 1234567890123456.78}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["transaction"]["amount"], "1234567890123456.78");
    assert_eq!(balance_of(&client, &srv, 1).await, "1234567890124456.78");
}

#[tokio::test]
async fn credit_past_the_balance_limit_is_unprocessable() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (status, body) = post(
        &client,
        srv.url("/api/v1/topup"),
        json!({ "user_id": 3, "amount": "999999999999999999.99" }),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
    assert_eq!(body["error"], "balance_limit_exceeded");
    assert!(body.get("retryable").is_none());
    assert_eq!(balance_of(&client, &srv, 3).await, "200.00");
}

#[tokio::test]
async fn overdraft_is_unprocessable_and_changes_nothing() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (status, body) = post(
        &client,
        srv.url("/api/v1/withdrawal"),
        json!({ "user_id": 2, "amount": 9999999999u64 }),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "insufficient_balance");
    assert_eq!(body["message"], "insufficient balance");
    assert_eq!(balance_of(&client, &srv, 2).await, "500.00");
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/v1/topup"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_request_body");
    assert_eq!(body["message"], "Invalid request body");

    for amount in [json!(0), json!(-10)] {
        let (status, body) = post(
            &client,
            srv.url("/api/v1/topup"),
            json!({ "user_id": 1, "amount": amount }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_amount");
        assert_eq!(body["message"], "Amount must be greater than zero");
    }

    let (status, _) = post(
        &client,
        srv.url("/api/v1/topup"),
        json!({ "user_id": 1, "amount": "ten" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(balance_of(&client, &srv, 1).await, "1000.00");
}

#[tokio::test]
async fn unknown_account_is_not_found() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (status, body) = post(
        &client,
        srv.url("/api/v1/topup"),
        json!({ "user_id": 999, "amount": 10 }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "account_not_found");

    let res = client.get(srv.url("/api/v1/accounts/999")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client.get(srv.url("/api/v1/accounts/abc")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn lists_the_seeded_accounts() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/api/v1/accounts")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let names: Vec<&str> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Ahmadhi", "Prananta", "Hastiputra"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_withdrawals_never_overdraw() {
    let srv = Arc::new(TestServer::spawn().await);
    let client = reqwest::Client::new();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let client = client.clone();
        let url = srv.url("/api/v1/withdrawal");
        handles.push(tokio::spawn(async move {
            post(&client, url, json!({ "user_id": 2, "amount": 100 })).await.0
        }));
    }

    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::UNPROCESSABLE_ENTITY => {}
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(ok, 5);
    assert_eq!(balance_of(&client, &srv, 2).await, "0.00");

    let res = client.get(srv.url("/api/v1/accounts/2/audit")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let audit: Value = res.json().await.unwrap();
    assert_eq!(audit["consistent"], true);
    assert_eq!(audit["replayed"]["record_count"], 5);
}
