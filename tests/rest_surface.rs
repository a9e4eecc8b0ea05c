//! REST surface tests: the real router served on an ephemeral port,
//! backed by the in-memory store and the sandbox authority client.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use factus_bridge::authority::SandboxAuthorityClient;
use factus_bridge::config::FactusConfig;
use factus_bridge::invoice::{CompanyProfile, Customer, Invoice, LineItem};
use factus_bridge::lifecycle::{InvoiceLifecycle, StaticCompanyProvider};
use factus_bridge::rest::{self, AppState};
use factus_bridge::store::{InvoiceStore, MemoryInvoiceStore};

fn sample_invoice(id: &str) -> Invoice {
    Invoice {
        id: id.to_string(),
        number: 42,
        year: 2026,
        currency: "COP".to_string(),
        sub_total: 50_000.0,
        tax_total: 9_500.0,
        total: 59_500.0,
        client: Customer {
            document_type: "NIT".to_string(),
            document_number: "901234567".to_string(),
            name: "Distribuidora La Ceiba".to_string(),
            ..Default::default()
        },
        items: vec![LineItem {
            description: "Licencia anual".to_string(),
            quantity: 1.0,
            unit_price: 50_000.0,
            tax_rate: 19.0,
            total: 50_000.0,
            ..Default::default()
        }],
        ..Default::default()
    }
}

async fn start_server() -> SocketAddr {
    let store = Arc::new(MemoryInvoiceStore::new());
    store.insert(sample_invoice("inv-1")).await.unwrap();

    let authority = Arc::new(SandboxAuthorityClient::new(FactusConfig {
        base_url: "https://api-sandbox.factus.com.co".to_string(),
        client_id: "id".to_string(),
        client_secret: "secret".to_string(),
        email: "e@x.co".to_string(),
        password: "p".to_string(),
    }));

    let lifecycle = Arc::new(InvoiceLifecycle::new(
        store,
        authority.clone(),
        Arc::new(StaticCompanyProvider(CompanyProfile::default())),
    ));

    let state = Arc::new(AppState {
        lifecycle,
        authority,
    });

    let app = rest::router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn create_without_body_defaults_to_non_forced() {
    let addr = start_server().await;
    let http = reqwest::Client::new();

    let resp = http
        .post(format!("http://{addr}/factus/create/inv-1"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["result"]["invoice_id"], "inv-1");
    assert_eq!(body["result"]["factus"]["status"], "created");
    assert!(body["result"]["factus"]["factus_id"]
        .as_str()
        .unwrap()
        .starts_with("SETP-"));
}

#[tokio::test]
async fn resubmit_is_refused_with_details() {
    let addr = start_server().await;
    let http = reqwest::Client::new();

    http.post(format!("http://{addr}/factus/create/inv-1"))
        .send()
        .await
        .unwrap();
    let resp = http
        .post(format!("http://{addr}/factus/create/inv-1"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
    assert!(body["details"]["factus_id"]
        .as_str()
        .unwrap()
        .starts_with("SETP-"));
}

#[tokio::test]
async fn forced_resubmit_succeeds_over_http() {
    let addr = start_server().await;
    let http = reqwest::Client::new();

    http.post(format!("http://{addr}/factus/create/inv-1"))
        .send()
        .await
        .unwrap();
    let resp = http
        .post(format!("http://{addr}/factus/create/inv-1"))
        .json(&serde_json::json!({ "force": true }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn unknown_invoice_is_404_with_envelope() {
    let addr = start_server().await;
    let http = reqwest::Client::new();

    let resp = http
        .post(format!("http://{addr}/factus/create/ghost"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn pdf_download_streams_binary_with_headers() {
    let addr = start_server().await;
    let http = reqwest::Client::new();

    http.post(format!("http://{addr}/factus/create/inv-1"))
        .send()
        .await
        .unwrap();
    let resp = http
        .get(format!("http://{addr}/factus/download/pdf/inv-1"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "application/pdf"
    );
    assert!(resp.headers()["content-disposition"]
        .to_str()
        .unwrap()
        .contains("factura-inv-1.pdf"));
    let bytes = resp.bytes().await.unwrap();
    assert!(bytes.starts_with(b"%PDF"));
}

#[tokio::test]
async fn pdf_download_before_submission_fails_with_envelope() {
    let addr = start_server().await;
    let http = reqwest::Client::new();

    let resp = http
        .get(format!("http://{addr}/factus/download/pdf/inv-1"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn cancel_with_reason_round_trips() {
    let addr = start_server().await;
    let http = reqwest::Client::new();

    http.post(format!("http://{addr}/factus/create/inv-1"))
        .send()
        .await
        .unwrap();
    let resp = http
        .post(format!("http://{addr}/factus/cancel/inv-1"))
        .json(&serde_json::json!({ "reason": "Error en los datos del cliente" }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["factus"]["status"], "cancelled");
    assert_eq!(
        body["result"]["factus"]["cancellation_reason"],
        "Error en los datos del cliente"
    );
}

#[tokio::test]
async fn master_data_routes_use_the_envelope() {
    let addr = start_server().await;
    let http = reqwest::Client::new();

    let resp = http
        .get(format!("http://{addr}/factus/municipios"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert!(body["result"].as_array().map(|a| !a.is_empty()).unwrap());
}

#[tokio::test]
async fn validate_config_reports_sandbox() {
    let addr = start_server().await;
    let http = reqwest::Client::new();

    let resp = http
        .get(format!("http://{addr}/factus/validate-config"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["sandbox"], true);
    assert_eq!(body["result"]["authenticated"], true);
}

#[tokio::test]
async fn health_is_plain_ok() {
    let addr = start_server().await;
    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
}
