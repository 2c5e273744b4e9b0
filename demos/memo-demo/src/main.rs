//! Demo of the resilient client against a simulated SQLite tool server.
//!
//! Run with: cargo run -p memo-demo
//!
//! The first query hangs past its deadline and is retried, and its rows are
//! turned into an insight note. Set `RUST_LOG=debug` to see every attempt.

use std::{
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use mcp_resilience_client::{
    AppendOptions, Arguments, ClientConfig, OperationInfo, ResilientClient, Transport,
    TransportError,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// In-process stand-in for a SQLite tool server.
#[derive(Default)]
struct SimulatedServer {
    stalled_once: AtomicBool,
    insights: Mutex<Vec<String>>,
}

fn text(payload: &str) -> Value {
    json!({"content": [{"type": "text", "text": payload}]})
}

impl SimulatedServer {
    fn memo(&self) -> String {
        let insights = self.insights.lock().unwrap_or_else(PoisonError::into_inner);
        let bullets: Vec<String> = insights.iter().map(|i| format!("- {i}")).collect();
        format!("Business Insights (server copy)\n\n{}", bullets.join("\n"))
    }
}

#[async_trait]
impl Transport for SimulatedServer {
    async fn initialize(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn list_operations(&self) -> Result<Vec<OperationInfo>, TransportError> {
        let tools = [
            ("read_query", "Execute a SELECT query"),
            ("list_tables", "List all tables"),
            ("append_insight", "Add a business insight to the memo"),
        ];
        Ok(tools
            .iter()
            .map(|(name, description)| OperationInfo {
                name: (*name).to_string(),
                description: (*description).to_string(),
                input_schema: json!({"type": "object"}),
            })
            .collect())
    }

    async fn call_operation(
        &self,
        name: &str,
        arguments: &Arguments,
        cancel: CancellationToken,
    ) -> Result<Value, TransportError> {
        match name {
            "read_query" => {
                if !self.stalled_once.swap(true, Ordering::SeqCst) {
                    cancel.cancelled().await;
                    return Err(TransportError::Cancelled);
                }
                Ok(text("[{'region': 'north', 'sales': 1200}, {'region': 'south', 'sales': 1320}]"))
            }
            "list_tables" => Ok(text("[{'name': 'orders'}]")),
            "append_insight" => {
                let insight = arguments
                    .get("insight")
                    .and_then(Value::as_str)
                    .ok_or_else(|| TransportError::Remote("missing insight".into()))?;
                self.insights
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(insight.to_string());
                Ok(text("Insight added to memo"))
            }
            other => Err(TransportError::Remote(format!("unknown tool: {other}"))),
        }
    }

    async fn read_resource(
        &self,
        uri: &str,
        _cancel: CancellationToken,
    ) -> Result<Value, TransportError> {
        match uri {
            "memo://insights" => Ok(json!({"content": {"text": self.memo()}})),
            other => Err(TransportError::Remote(format!("unknown resource: {other}"))),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        tracing::info!("Simulated server closed");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ClientConfig::load()?
        .with_default_timeout(Duration::from_secs(2))
        .with_retries(3, Duration::from_millis(500));

    let client = ResilientClient::connect(SimulatedServer::default(), config).await?;

    let tables = client.list_tables().await?;
    println!("Tables: {tables:?}");

    let sql = "SELECT region, sales FROM orders GROUP BY region";
    let rows = client.read_query(sql).await?;
    println!("Rows: {rows:?}");

    let note = client
        .record_query_insights(sql, &rows, Some("Regional Sales"), AppendOptions::default())
        .await;
    println!("Stored insight {} ({:?})", note.id, note.origin);

    if let Err(e) = client.read_query("SELECT * FROM orders; DROP TABLE orders").await {
        println!("Rejected: {e}");
    }

    client.settle_notes().await;
    for note in client.read_notes("insight").await {
        println!("Note: {} [{:?}]", note.text, note.origin);
    }

    println!("\n{}\n", client.insights_memo().await);

    let report = client.shutdown().await;
    if !report.is_clean() {
        for failure in &report.failures {
            tracing::warn!("{failure}");
        }
    }
    Ok(())
}
