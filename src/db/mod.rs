// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

//! Database layer: SurrealDB client, schema, and repositories.

pub mod client;
pub mod ids;
pub mod queue;
pub mod recovery;
pub mod repos;
pub mod schema;

pub use client::DBClient;
pub use queue::TaskQueue;
pub use recovery::RecoveryInfo;
pub use repos::{
    BranchRepository, EventRepository, EventWrite, RunRepository, StateRepository, SyncCounts,
    VersionRepository,
};

use anyhow::Result;
use std::sync::Arc;

/// Aggregate handle bundling the client and all repositories. Cheap to
/// clone; everything shares one embedded connection.
#[derive(Clone)]
pub struct Database {
    pub client: Arc<DBClient>,
    pub events: EventRepository,
    pub branches: BranchRepository,
    pub runs: RunRepository,
    pub state: StateRepository,
    pub versions: VersionRepository,
    pub queue: TaskQueue,
}

impl Database {
    /// Opens (or creates) the store at `path` and initializes the schema.
    pub async fn open(path: &str) -> Result<Self> {
        let client = Arc::new(DBClient::new(path).await?);
        client.initialize_schema().await?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Arc<DBClient>) -> Self {
        Self {
            events: EventRepository::new(client.clone()),
            branches: BranchRepository::new(client.clone()),
            runs: RunRepository::new(client.clone()),
            state: StateRepository::new(client.clone()),
            versions: VersionRepository::new(client.clone()),
            queue: TaskQueue::new(client.clone()),
            client,
        }
    }

    /// Purges a run entirely: events, branches, then the run row.
    pub async fn purge_workflow(&self, workflow_run_id: &str) -> Result<()> {
        self.events.delete_workflow_events(workflow_run_id).await?;
        self.branches
            .delete_workflow_branches(workflow_run_id)
            .await?;
        self.runs.delete_workflow(workflow_run_id).await
    }
}
