//! # Cloudlift – VM Migration Orchestration
//!
//! Replication orchestration and reconciliation for migrating on-premises
//! VMware machines to Azure through Site Recovery.
//!
//! ## Features
//!
//! - **OAuth2 Authentication** – client credentials flow against the ARM management scope
//! - **Topology Discovery** – vault, fabric, container, policy mapping, run-as accounts, staging storage, target region
//! - **Enablement** – batch enable-replication with inventory-authoritative disks and per-machine error isolation
//! - **Reconciliation** – periodic remote-truth sync, orphan materialization, per-vault failure isolation
//! - **Lifecycle** – test migrate, cleanup, migrate, complete, resync, cancel, all status-guarded
//! - **Jobs** – inspect and restart Site Recovery jobs

pub mod types;
pub mod error;
pub mod remote;
pub mod auth;
pub mod client;
pub mod api;
pub mod inventory;
pub mod store;
pub mod topology;
pub mod enablement;
pub mod reconcile;
pub mod lifecycle;
pub mod service;
