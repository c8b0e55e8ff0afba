//! Black-box tests against the real router on an ephemeral port, driving the
//! in-memory backend end to end (including the outbox executor).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

use comptoir_api::app::build_app_with_store;
use comptoir_catalog::{Client, Product, Service};
use comptoir_store::{MemoryStore, Store};

const JWT_SECRET: &str = "black-box-secret";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    _jobs: comptoir_store::jobs::JobExecutorHandle,
}

impl TestServer {
    async fn spawn(store: Arc<MemoryStore>) -> Self {
        let document_dir =
            std::env::temp_dir().join(format!("comptoir-black-box-{}", Uuid::now_v7()));
        let app = build_app_with_store(store, JWT_SECRET.to_string(), document_dir);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let router = app.router;
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url,
            handle,
            _jobs: app.jobs,
        }
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

#[derive(Serialize)]
struct WireClaims {
    sub: Uuid,
    roles: Vec<String>,
    iat: i64,
    exp: i64,
}

fn mint_jwt(roles: &[&str]) -> String {
    let now = Utc::now();
    let claims = WireClaims {
        sub: Uuid::now_v7(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        iat: now.timestamp() - 10,
        exp: now.timestamp() + 3600,
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

async fn seed_catalog(store: &MemoryStore) -> (Product, Service, Client) {
    let product = Product::new("Clavier", None, 100.0, 10).unwrap();
    store.insert_product(&product).await.unwrap();
    let service = Service::new("Installation", None, 50.0).unwrap();
    store.insert_service(&service).await.unwrap();
    let client = Client::new("Ada", Some("ada@example.test".to_string()), None).unwrap();
    store.insert_client(&client).await.unwrap();
    (product, service, client)
}

#[tokio::test]
async fn health_is_public() {
    let server = TestServer::spawn(Arc::new(MemoryStore::new())).await;
    let response = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let server = TestServer::spawn(Arc::new(MemoryStore::new())).await;
    let response = reqwest::Client::new()
        .get(server.url("/orders"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn full_order_lifecycle_over_http() {
    let store = Arc::new(MemoryStore::new());
    let (product, service, client) = seed_catalog(&store).await;
    let server = TestServer::spawn(store.clone()).await;

    let http = reqwest::Client::new();
    let token = mint_jwt(&["admin"]);

    // Create: product x3 @100 + service x1 @50 = 350; stock untouched.
    let response = http
        .post(server.url("/orders"))
        .bearer_auth(&token)
        .json(&json!({
            "clientId": client.id,
            "produits": [{ "productId": product.id, "quantity": 3 }],
            "services": [{ "serviceId": service.id, "quantity": 1 }],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    let order = &body["data"]["order"];
    assert_eq!(order["total"], 350.0);
    assert_eq!(order["status"], "PENDING");
    let order_id = order["id"].as_str().unwrap().to_string();

    let stored = store.get_product(product.id).await.unwrap().unwrap();
    assert_eq!(stored.stock, 10, "creation must not touch stock");

    // Finalize: stock decremented once.
    let response = http
        .put(server.url(&format!("/orders/{order_id}")))
        .bearer_auth(&token)
        .json(&json!({ "status": "CONFIRMED" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stored = store.get_product(product.id).await.unwrap().unwrap();
    assert_eq!(stored.stock, 7);

    // Partial payment.
    let response = http
        .post(server.url(&format!("/orders/{order_id}/payments")))
        .bearer_auth(&token)
        .json(&json!({ "amount": 200.0, "mode": "cash" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["paidTotal"], 200.0);
    assert_eq!(body["data"]["remaining"], 150.0);
    assert_eq!(body["data"]["settlementStatus"], "PARTIAL");

    // Overpayment is rejected with the stable error envelope.
    let response = http
        .post(server.url(&format!("/orders/{order_id}/payments")))
        .bearer_auth(&token)
        .json(&json!({ "amount": 400.0, "mode": "cash" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("exceeds remaining due")
    );

    // An unknown payment mode is refused.
    let response = http
        .post(server.url(&format!("/orders/{order_id}/payments")))
        .bearer_auth(&token)
        .json(&json!({ "amount": 10.0, "mode": "bitcoin" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Settle in full.
    let response = http
        .post(server.url(&format!("/orders/{order_id}/payments")))
        .bearer_auth(&token)
        .json(&json!({ "amount": 150.0, "mode": "mobile_money" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["remaining"], 0.0);
    assert_eq!(body["data"]["settlementStatus"], "PAID");

    // Stock was decremented exactly once over the whole lifecycle.
    let stored = store.get_product(product.id).await.unwrap().unwrap();
    assert_eq!(stored.stock, 7);

    // Payment listing carries the summary.
    let response = http
        .get(server.url(&format!("/orders/{order_id}/payments")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["payments"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["summary"]["settlementStatus"], "PAID");

    // The outbox generates the invoice asynchronously; HEAD probes until it
    // is downloadable.
    let mut invoice_ready = false;
    for _ in 0..100 {
        let response = http
            .head(server.url(&format!("/orders/{order_id}/invoice/download")))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        if response.status() == StatusCode::OK {
            invoice_ready = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(invoice_ready, "invoice must become downloadable");

    let response = http
        .get(server.url(&format!(
            "/orders/{order_id}/invoice/download?inline=true"
        )))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("inline"));
    assert!(!response.bytes().await.unwrap().is_empty());

    // Receipts follow payments through the same pipeline.
    let mut receipt_ready = false;
    for _ in 0..100 {
        let response = http
            .head(server.url(&format!("/orders/{order_id}/receipt/download")))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        if response.status() == StatusCode::OK {
            receipt_ready = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(receipt_ready, "receipt must become downloadable");

    // The explicit invoice endpoint is idempotent.
    let response = http
        .post(server.url(&format!("/orders/{order_id}/invoice")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "invoice already generated for this order");
}

#[tokio::test]
async fn line_edits_are_rejected_after_a_payment() {
    let store = Arc::new(MemoryStore::new());
    let (product, _, _) = seed_catalog(&store).await;
    let server = TestServer::spawn(store.clone()).await;

    let http = reqwest::Client::new();
    let token = mint_jwt(&["manager"]);

    let body: Value = http
        .post(server.url("/orders"))
        .bearer_auth(&token)
        .json(&json!({ "produits": [{ "productId": product.id, "quantity": 2 }] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let order_id = body["data"]["order"]["id"].as_str().unwrap().to_string();

    let response = http
        .post(server.url(&format!("/orders/{order_id}/payments")))
        .bearer_auth(&token)
        .json(&json!({ "amount": 50.0, "mode": "card" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = http
        .put(server.url(&format!("/orders/{order_id}")))
        .bearer_auth(&token)
        .json(&json!({ "produits": [{ "productId": product.id, "quantity": 5 }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn role_boundaries_are_enforced() {
    let store = Arc::new(MemoryStore::new());
    let (product, _, _) = seed_catalog(&store).await;
    let server = TestServer::spawn(store.clone()).await;

    let http = reqwest::Client::new();
    let employee = mint_jwt(&["employee"]);
    let admin = mint_jwt(&["admin"]);

    let body: Value = http
        .post(server.url("/orders"))
        .bearer_auth(&employee)
        .json(&json!({ "produits": [{ "productId": product.id, "quantity": 1 }] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let order_id = body["data"]["order"]["id"].as_str().unwrap().to_string();

    // Employees cannot delete orders or adjust stock.
    let response = http
        .delete(server.url(&format!("/orders/{order_id}")))
        .bearer_auth(&employee)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = http
        .post(server.url(&format!("/products/{}/stock", product.id)))
        .bearer_auth(&employee)
        .json(&json!({ "quantity": 5, "mode": "ADD" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Admin can do both.
    let response = http
        .post(server.url(&format!("/products/{}/stock", product.id)))
        .bearer_auth(&admin)
        .json(&json!({ "quantity": 5, "mode": "ADD" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["product"]["stock"], 15);

    let response = http
        .delete(server.url(&format!("/orders/{order_id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Soft-deleted orders vanish from the read path and show up in history.
    let response = http
        .get(server.url(&format!("/orders/{order_id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body: Value = http
        .get(server.url("/orders/deleted"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["orders"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn stock_endpoint_enforces_the_ledger_rules() {
    let store = Arc::new(MemoryStore::new());
    let (product, _, _) = seed_catalog(&store).await;
    let server = TestServer::spawn(store.clone()).await;

    let http = reqwest::Client::new();
    let token = mint_jwt(&["admin"]);

    // Subtracting below zero is refused.
    let response = http
        .post(server.url(&format!("/products/{}/stock", product.id)))
        .bearer_auth(&token)
        .json(&json!({ "quantity": 11, "mode": "SUBTRACT" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["details"]["available"], 10);

    // A legal subtract lands in the movement log.
    let response = http
        .post(server.url(&format!("/products/{}/stock", product.id)))
        .bearer_auth(&token)
        .json(&json!({ "quantity": 3, "mode": "SUBTRACT", "note": "casse" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = http
        .get(server.url("/inventory/movements?direction=OUT"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let movements = body["data"]["movements"].as_array().unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0]["quantity"], 3);
    assert_eq!(movements[0]["source"], "MANUAL");
}
