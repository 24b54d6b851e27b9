//! # Harvest Agent Core
//!
//! Pure harvesting logic for the Harvest Agent: granularity rules, granule
//! derivation, candidate matching and merge, the per-record ledger model, and
//! the three-phase harvest pipeline.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. Remote
//! datastores, destination repositories and durable storage are reached
//! through the [`collector::Collector`], [`sink::RepositorySink`] and
//! [`ledger::LedgerStore`] traits; the `harvest-agent` crate supplies the
//! SQLite and HTTP implementations.
//!
//! ```text
//! ┌───────────┐  discover/fetch  ┌──────────┐   commit   ┌────────────────┐
//! │ Collector │────────────────▶│  Ledger  │──────────▶│ Curator + Sink │
//! └───────────┘                  └──────────┘            └────────────────┘
//!                                                        granule → match → merge
//! ```

pub mod collector;
pub mod curator;
pub mod datacite;
pub mod error;
pub mod geometry;
pub mod granularity;
pub mod granule;
pub mod harvester;
pub mod ledger;
pub mod matching;
pub mod metadata;
pub mod pipeline;
pub mod sink;

pub use error::HarvestError;
