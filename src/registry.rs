//! Collector and repository-sink registries.
//!
//! ```text
//! ┌────────────────────────────────┐   ┌────────────────────────────┐
//! │       CollectorRegistry        │   │        SinkRegistry        │
//! │ (protocol, schema) → factory   │   │     schema → factory       │
//! │ OPeNDAP-NetCDF/DataCite        │   │     DataCite               │
//! └───────────────┬────────────────┘   └─────────────┬──────────────┘
//!                 └──────────────┬──────────────────┘
//!                                ▼
//!                  invoke_harvester() → pipeline
//! ```
//!
//! Factories build a fresh instance per invocation from the harvester's
//! [`HarvestTarget`]. A missing entry is a [`HarvestError::Lookup`].

use std::collections::HashMap;
use std::time::Duration;

use harvest_agent_core::collector::Collector;
use harvest_agent_core::datacite;
use harvest_agent_core::harvester::Harvester;
use harvest_agent_core::sink::RepositorySink;
use harvest_agent_core::HarvestError;

use crate::collector_opendap::{self, OpendapCollector};
use crate::curator_datacite::{DataCiteRepository, RepositoryEndpoint};
use crate::entities::{Datasource, Repository};

/// Everything a factory may need to build a collector or sink.
pub struct HarvestTarget<'a> {
    pub harvester: &'a Harvester,
    pub datasource: &'a Datasource,
    pub repository: &'a Repository,
    pub http_timeout: Duration,
}

pub type CollectorFactory =
    Box<dyn Fn(&HarvestTarget<'_>) -> Result<Box<dyn Collector>, HarvestError> + Send + Sync>;

pub type SinkFactory =
    Box<dyn Fn(&HarvestTarget<'_>) -> Result<Box<dyn RepositorySink>, HarvestError> + Send + Sync>;

pub struct CollectorRegistry {
    factories: HashMap<(String, String), CollectorFactory>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry holding the built-in collectors.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            collector_opendap::PROTOCOL,
            datacite::SCHEMA,
            Box::new(|target: &HarvestTarget<'_>| {
                let collector = OpendapCollector::new(
                    &target.datasource.url,
                    target.datasource.username.clone(),
                    target.datasource.password.clone(),
                    target.http_timeout,
                )?;
                Ok(Box::new(collector) as Box<dyn Collector>)
            }),
        );
        registry
    }

    /// A later registration for the same pair replaces the earlier one.
    pub fn register(&mut self, protocol: &str, schema: &str, factory: CollectorFactory) {
        self.factories
            .insert((protocol.to_string(), schema.to_string()), factory);
    }

    pub fn build(&self, target: &HarvestTarget<'_>) -> Result<Box<dyn Collector>, HarvestError> {
        let harvester = target.harvester;
        let key = (harvester.protocol.clone(), harvester.schema.clone());
        let factory = self.factories.get(&key).ok_or_else(|| {
            HarvestError::Lookup(format!(
                "No collector for protocol '{}' and schema '{}'",
                harvester.protocol, harvester.schema
            ))
        })?;
        factory(target)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

pub struct SinkRegistry {
    factories: HashMap<String, SinkFactory>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            datacite::SCHEMA,
            Box::new(|target: &HarvestTarget<'_>| {
                let repository = target.repository;
                let endpoint = RepositoryEndpoint {
                    repository_url: repository.url.clone(),
                    search_url: target.harvester.search_url.clone(),
                    commit_url: target.harvester.commit_url.clone(),
                    username: repository.username.clone().unwrap_or_default(),
                    password: repository.password.clone().unwrap_or_default(),
                    institution: repository.institution.clone().unwrap_or_default(),
                };
                let sink = DataCiteRepository::new(endpoint, target.http_timeout)?;
                Ok(Box::new(sink) as Box<dyn RepositorySink>)
            }),
        );
        registry
    }

    pub fn register(&mut self, schema: &str, factory: SinkFactory) {
        self.factories.insert(schema.to_string(), factory);
    }

    pub fn build(&self, target: &HarvestTarget<'_>) -> Result<Box<dyn RepositorySink>, HarvestError> {
        let schema = &target.harvester.schema;
        let factory = self.factories.get(schema).ok_or_else(|| {
            HarvestError::Lookup(format!("No repository sink for schema '{}'", schema))
        })?;
        factory(target)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for SinkRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
