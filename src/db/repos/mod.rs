// Copyright 2025 Braid Contributors
// SPDX-License-Identifier: Apache-2.0

pub mod branch;
pub mod event;
pub mod run;
pub mod state;
pub mod version;

pub use branch::BranchRepository;
pub use event::{EventRepository, EventWrite};
pub use run::RunRepository;
pub use state::StateRepository;
pub use version::{SyncCounts, VersionRepository};
