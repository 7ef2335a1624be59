//! # Carebook Sync Engine
//!
//! Staged editing and synchronization of the Carebook clinic catalog.
//!
//! This crate provides:
//! - Staged collections of service items and groups (current vs. baseline)
//! - Association maps for practitioner eligibility, billing scenarios and
//!   resource requirements
//! - Lazy, concurrent loading of association data
//! - Delta computation between staged and confirmed state
//! - A synchronizer that persists everything in one pass
//!
//! ## Architecture
//!
//! An operator edits a [`StagingSession`]. Nothing is sent until a
//! [`Synchronizer`] pass runs:
//! 1. Owners (groups, then service items) are persisted first
//! 2. Server-assigned ids replace temporary ones everywhere in the session
//! 3. Dependent records are persisted against real ids, concurrently
//!
//! ## Key Invariants
//!
//! - No dependent request ever carries a temporary owner id
//! - A key that was never loaded is never treated as "delete everything"
//! - One failing request never cancels its siblings
//! - A failed change stays pending; retrying is calling save again

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod associations;
mod config;
mod diff;
mod error;
mod kinds;
mod loader;
mod remap;
mod remote;
mod session;
mod staged;
mod synchronizer;

pub use associations::{
    AssignmentBook, AssociationKey, AssociationMap, AssociationValue, ChildRecord,
};
pub use config::SyncConfig;
pub use diff::{
    affected_practitioners, diff_collection, diff_records, roster_change, CollectionDelta,
    RecordDelta, RosterChange,
};
pub use error::{RemoteError, RemoteResult, SyncError, SyncResult};
pub use loader::{LazyLoader, LoadStart, LoadStatus, LoadTicket, LoadTracker};
pub use remap::{IdRemap, Remap};
pub use remote::{
    BillingScenarioRemote, GroupRemote, PractitionerAssignmentRemote, RemoteCatalog,
    ResourceRequirementRemote, ServiceItemRemote,
};
pub use session::{AssociationSnapshot, StagingSession};
pub use staged::{StagedCollection, StagedRecord};
pub use synchronizer::{SaveOutcome, SaveStatus, SyncState, SyncStats, Synchronizer};
