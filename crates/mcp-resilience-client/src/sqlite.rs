//! Typed helpers for SQLite tool servers.
//!
//! Each helper calls the operation of the same name and coerces the
//! normalized result. A result of the wrong shape yields an empty value
//! rather than an error. Statements are validated before they are sent.

use mcp_resilience_core::{Arguments, NormalizedResult, Transport};
use serde_json::{Map, Value};

use crate::{
    client::{InvokeOptions, ResilientClient},
    error::ClientError,
    query::{QueryType, expect_kind},
};

/// One result row, keyed by column name.
pub type Row = Map<String, Value>;

impl<T: Transport + 'static> ResilientClient<T> {
    /// Run a `SELECT` and return its rows.
    ///
    /// # Errors
    /// Returns [`ClientError::InvalidQuery`] unless `sql` is a valid
    /// `SELECT`, otherwise the [`ClientError`] of the underlying call.
    pub async fn read_query(&self, sql: &str) -> Result<Vec<Row>, ClientError> {
        expect_kind(sql, "SELECT", |kind| kind == QueryType::Select)?;
        tracing::info!(query = sql, "Executing read query");
        let result = self.call("read_query", query_args(sql)).await?;
        Ok(rows(&result))
    }

    /// Run an `INSERT`, `UPDATE` or `DELETE` and return the affected row count.
    ///
    /// # Errors
    /// Returns [`ClientError::InvalidQuery`] unless `sql` is a valid
    /// `INSERT`, `UPDATE` or `DELETE`, otherwise the [`ClientError`] of the
    /// underlying call.
    pub async fn write_query(&self, sql: &str) -> Result<u64, ClientError> {
        expect_kind(sql, "INSERT, UPDATE or DELETE", QueryType::is_write)?;
        tracing::info!(query = sql, "Executing write query");
        let result = self.call("write_query", query_args(sql)).await?;
        let summary = match result.as_value() {
            Some(Value::Array(items)) => items.first(),
            Some(other) => Some(other),
            None => None,
        };
        Ok(summary
            .and_then(|v| v.get("affected_rows"))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    /// Run a `CREATE TABLE` and return the server's confirmation.
    ///
    /// # Errors
    /// Returns [`ClientError::InvalidQuery`] unless `sql` is a valid
    /// `CREATE TABLE`, otherwise the [`ClientError`] of the underlying call.
    pub async fn create_table(&self, sql: &str) -> Result<String, ClientError> {
        expect_kind(sql, "CREATE TABLE", |kind| kind == QueryType::Create)?;
        tracing::info!(query = sql, "Creating table");
        let result = self.call("create_table", query_args(sql)).await?;
        Ok(match result {
            NormalizedResult::Empty => String::new(),
            NormalizedResult::Opaque(text) => text,
            other => match other.into_value() {
                Value::String(text) => text,
                value => value.to_string(),
            },
        })
    }

    /// Names of all tables.
    ///
    /// # Errors
    /// Returns the [`ClientError`] of the underlying call.
    pub async fn list_tables(&self) -> Result<Vec<String>, ClientError> {
        tracing::info!("Listing tables");
        let result = self.call("list_tables", Arguments::new()).await?;
        Ok(rows(&result)
            .into_iter()
            .filter_map(|row| row.get("name").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    /// Column definitions of a table.
    ///
    /// # Errors
    /// Returns the [`ClientError`] of the underlying call.
    pub async fn describe_table(&self, table: &str) -> Result<Vec<Row>, ClientError> {
        tracing::info!(table, "Describing table");
        let mut args = Arguments::new();
        args.insert("table_name".to_string(), Value::from(table));
        let result = self.call("describe_table", args).await?;
        Ok(rows(&result))
    }

    async fn call(&self, operation: &str, args: Arguments) -> Result<NormalizedResult, ClientError> {
        self.invoke(operation, args, InvokeOptions::default()).await
    }
}

fn query_args(sql: &str) -> Arguments {
    let mut args = Arguments::new();
    args.insert("query".to_string(), Value::from(sql));
    args
}

fn rows(result: &NormalizedResult) -> Vec<Row> {
    match result.as_value() {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_object().cloned())
            .collect(),
        _ => Vec::new(),
    }
}
