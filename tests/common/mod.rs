use std::sync::Arc;

use repair_hub::{
    api, config::Deadlines, db::memory::MemoryStore, http, metrics, ticket,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

/// Serves the router over `store` on an ephemeral local port.
pub async fn spawn(store: &MemoryStore, deadlines: Deadlines) -> Client {
    let state = Arc::new(http::AppState {
        writer: ticket::Writer::new(
            Arc::new(store.clone()),
            deadlines.create_ticket,
        ),
        metrics: metrics::Aggregator::new(
            Arc::new(store.clone()),
            deadlines.metrics,
        ),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind a listener");
    let addr = listener.local_addr().expect("no local address");
    tokio::spawn(async move {
        axum::serve(listener, http::router(state))
            .await
            .expect("server failed");
    });

    Client {
        inner: reqwest::Client::new(),
        base_url: format!("http://{addr}/api/v1"),
    }
}

pub async fn spawn_default(store: &MemoryStore) -> Client {
    spawn(store, Deadlines::default()).await
}

/// Minimal valid payload with the given line items.
pub fn ticket_with(line_items: Value) -> Value {
    json!({
        "customer": { "name": "A", "phone": "9876543210" },
        "device": { "type": "laptop" },
        "ticket": {
            "type": "Diagnostics Call",
            "issueDescription": "Does not boot",
            "dataBackup": "request_backup",
        },
        "lineItems": line_items,
    })
}

pub fn laptop_ticket() -> Value {
    ticket_with(json!([
        { "name": "Diagnostic", "rate": 500, "discountPercent": 0 },
        { "name": "Screen", "rate": 1000, "discountPercent": 10 },
    ]))
}

#[derive(Debug)]
pub struct Failure {
    pub status: StatusCode,
    pub body: api::Failure,
}

pub struct Client {
    inner: reqwest::Client,
    base_url: String,
}

impl Client {
    pub async fn health(&self) -> StatusCode {
        self.inner
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .expect("failed to send a request")
            .status()
    }

    pub async fn create_ticket(
        &self,
        payload: &Value,
    ) -> Result<api::ticket::Created, Failure> {
        let res = self
            .inner
            .post(format!("{}/tickets", self.base_url))
            .json(payload)
            .send()
            .await
            .expect("failed to send a request");
        if res.status().is_success() {
            assert_eq!(res.status(), StatusCode::CREATED);
        }
        Self::parse(res).await
    }

    pub async fn create_ticket_raw(&self, body: &'static str) -> Failure {
        let res = self
            .inner
            .post(format!("{}/tickets", self.base_url))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .expect("failed to send a request");
        Self::parse::<api::ticket::Created>(res)
            .await
            .expect_err("request unexpectedly succeeded")
    }

    pub async fn metrics(&self) -> Result<api::Metrics, Failure> {
        let res = self
            .inner
            .get(format!("{}/dashboard/metrics", self.base_url))
            .send()
            .await
            .expect("failed to send a request");
        Self::parse(res).await
    }

    async fn parse<T: DeserializeOwned>(
        res: reqwest::Response,
    ) -> Result<T, Failure> {
        let status = res.status();
        if status.is_success() {
            Ok(res.json::<T>().await.expect("failed to get a response"))
        } else {
            Err(Failure {
                status,
                body: res
                    .json::<api::Failure>()
                    .await
                    .expect("failed to get an error body"),
            })
        }
    }
}
