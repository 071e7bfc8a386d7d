// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Database client for SurrealDB embedded operations.
//!
//! All repositories go through this thin wrapper. Results are taken as JSON
//! values first and deserialized with serde_json, which sidesteps SurrealDB
//! SDK serialization quirks around record ids and enums.

use anyhow::Result;
use surrealdb::{
    engine::local::{Db, RocksDb},
    Surreal,
};
use tracing::{debug, error, info, instrument};

/// Database client for the engine's collections.
pub struct DBClient {
    pub db: Surreal<Db>,
}

impl DBClient {
    /// Creates a new client and connects to the given path.
    #[instrument(name = "db_client_new", skip_all, fields(db_path = %path))]
    pub async fn new(path: &str) -> Result<Self> {
        info!("Initializing SurrealDB connection");

        let db = Surreal::new::<RocksDb>(path).await.map_err(|e| {
            error!(error = %e, "Failed to connect to SurrealDB");
            e
        })?;

        db.use_ns("braid").use_db("engine").await.map_err(|e| {
            error!(error = %e, "Failed to select namespace/database");
            e
        })?;

        info!("SurrealDB connection established");
        Ok(Self { db })
    }

    /// Initializes the database schema.
    #[instrument(name = "db_initialize_schema", skip(self))]
    pub async fn initialize_schema(&self) -> Result<()> {
        use super::schema::SCHEMA_SQL;

        info!("Initializing database schema");

        self.db.query(SCHEMA_SQL).await.map_err(|e| {
            error!(error = %e, "Failed to initialize schema");
            e
        })?;

        info!("Database schema initialized successfully");
        Ok(())
    }

    /// Executes a parameterized query and returns results as JSON values.
    #[instrument(name = "db_query_json", skip(self, params), fields(query_len = query.len()))]
    pub async fn query_json(
        &self,
        query: &str,
        params: Vec<(String, serde_json::Value)>,
    ) -> Result<Vec<serde_json::Value>> {
        debug!(query_preview = %query.chars().take(100).collect::<String>(), "Executing query");

        let mut query_builder = self.db.query(query);
        for (name, value) in params {
            query_builder = query_builder.bind((name, value));
        }

        let mut result = query_builder.await.map_err(|e| {
            error!(error = %e, "Query execution failed");
            e
        })?;

        let data: Vec<serde_json::Value> = result.take(0).map_err(|e| {
            error!(error = %e, "Failed to extract query results");
            e
        })?;

        debug!(result_count = data.len(), "Query completed");
        Ok(data)
    }

    /// Executes a parameterized query, deserializing rows into `T`.
    pub async fn query_typed<T>(
        &self,
        query: &str,
        params: Vec<(String, serde_json::Value)>,
    ) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let rows = self.query_json(query, params).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(serde_json::from_value(row).map_err(|e| {
                error!(error = %e, "Failed to deserialize query results");
                anyhow::anyhow!("Deserialization error: {}", e)
            })?);
        }
        Ok(out)
    }

    /// Executes a parameterized mutation without returning results.
    #[instrument(name = "db_execute", skip(self, params), fields(query_len = query.len()))]
    pub async fn execute(
        &self,
        query: &str,
        params: Vec<(String, serde_json::Value)>,
    ) -> Result<()> {
        debug!(query_preview = %query.chars().take(100).collect::<String>(), "Executing mutation");

        let mut query_builder = self.db.query(query);
        for (name, value) in params {
            query_builder = query_builder.bind((name, value));
        }

        query_builder.await.map_err(|e| {
            error!(error = %e, "Mutation execution failed");
            e
        })?;

        debug!("Mutation executed successfully");
        Ok(())
    }

    /// Creates a record in `table` with explicit content.
    ///
    /// The record id is generated by the database; our collections carry
    /// their own application-level id fields, so the record id is never read
    /// back. The insert is verified against silent schema rejection.
    #[instrument(name = "db_create", skip(self, data), fields(table = %table))]
    pub async fn create<T>(&self, table: &str, data: T) -> Result<()>
    where
        T: serde::Serialize + Send + Sync + 'static,
    {
        let json_data = serde_json::to_value(&data).map_err(|e| {
            error!(error = %e, "Failed to serialize data to JSON");
            anyhow::anyhow!("Serialization error: {}", e)
        })?;

        let query = format!("CREATE {} CONTENT $data RETURN meta::id(id) AS created_id", table);
        let mut result = self
            .db
            .query(&query)
            .bind(("data", json_data))
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to create record");
                e
            })?;

        let created: Option<serde_json::Value> = result.take(0).map_err(|e| {
            error!(error = %e, "Failed to get create result");
            anyhow::anyhow!("Failed to get create result: {}", e)
        })?;

        match created {
            Some(_) => Ok(()),
            None => {
                error!(table = %table, "Record was NOT created - possible schema rejection");
                Err(anyhow::anyhow!(
                    "Failed to create record in {}: record was silently rejected",
                    table
                ))
            }
        }
    }
}
