//! # Harvest Agent
//!
//! Harvests metadata records from remote datasources into a metadata
//! repository, grouping records into granules and merging each new record
//! into the repository record for its granule.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────────┐   ┌────────────┐
//! │ Collector  │──▶│ Pipeline                 │──▶│ Repository │
//! │ OPeNDAP    │   │ discover → fetch → commit│   │ DataCite   │
//! └────────────┘   └────────────┬─────────────┘   └────────────┘
//!                               │
//!                          ┌────▼─────┐
//!                          │  SQLite  │
//!                          │  ledger  │
//!                          └──────────┘
//! ```
//!
//! Pure harvesting logic lives in `harvest-agent-core`; this crate adds
//! the SQLite stores, HTTP clients, the invocation entry point, the HTTP
//! API and the CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! agentctl init
//! agentctl invoke h-1 --repository-url https://repo.example.org \
//!     --username agent --password secret --institution SAEON
//! agentctl records --frozen
//! agentctl serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`agent`] | `invoke_harvester` entry point and invocation lease |
//! | [`cms`] | CMS client for harvester configuration |
//! | [`collector_opendap`] | OPeNDAP-NetCDF collector |
//! | [`curator_datacite`] | DataCite repository sink |
//! | [`registry`] | Collector and sink registries |
//! | [`sqlite_ledger`] | SQLite ledger store |
//! | [`entities`] | Harvester, datasource and repository rows |
//! | [`server`] | HTTP API |
//! | [`config`] | TOML configuration |

pub mod agent;
pub mod cms;
pub mod collector_opendap;
pub mod config;
pub mod curator_datacite;
pub mod db;
pub mod entities;
pub mod logging;
pub mod migrate;
pub mod polygons;
pub mod records;
pub mod registry;
pub mod server;
pub mod sqlite_ledger;
