//! Committing harvested metadata to a repository.
//!
//! [`Curator::commit_metadata`] is the per-record commit step of the harvest
//! pipeline:
//!
//! 1. stamp the record with its source identifiers,
//! 2. fill in harvester default and supplementary values,
//! 3. derive its granule and look for an existing match,
//! 4. merge into the match and submit an update, or submit a create.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::HarvestError;
use crate::geometry::{Containment, PlanarContainment};
use crate::granularity::Granularity;
use crate::granule::Granule;
use crate::matching::find_match;
use crate::metadata::Metadata;
use crate::sink::{RepositorySink, SubmitMethod};

pub struct Curator {
    granularity: Granularity,
    default_values: Map<String, Value>,
    supplementary_values: Map<String, Value>,
    containment: Box<dyn Containment>,
}

impl Curator {
    pub fn new(
        granularity: Granularity,
        default_values: Map<String, Value>,
        supplementary_values: Map<String, Value>,
    ) -> Self {
        Self {
            granularity,
            default_values,
            supplementary_values,
            containment: Box::new(PlanarContainment),
        }
    }

    /// Replace the spatial containment implementation.
    pub fn with_containment(mut self, containment: Box<dyn Containment>) -> Self {
        self.containment = containment;
        self
    }

    /// Create or update the record in the repository; returns its repository id.
    pub async fn commit_metadata(
        &self,
        sink: &dyn RepositorySink,
        metadata: Value,
        datasource_id: &str,
        record_id: &str,
    ) -> Result<String, HarvestError> {
        let mut new_metadata = sink.decode(metadata)?;
        new_metadata.set_source_identifiers(datasource_id, record_id);
        self.apply_default_supplementary_values(new_metadata.as_mut());

        let granule = Granule::derive(
            &self.granularity,
            new_metadata.as_ref(),
            self.containment.as_ref(),
        )?;

        match find_match(&granule, sink, self.containment.as_ref()).await? {
            Some(mut existing) => {
                debug!(record_id, "Merging into existing repository record");
                existing.merge_from(new_metadata.as_ref())?;
                sink.submit(existing.as_ref(), SubmitMethod::Update).await
            }
            None => {
                debug!(record_id, "No matching repository record; creating");
                sink.submit(new_metadata.as_ref(), SubmitMethod::Create).await
            }
        }
    }

    /// Defaults fill absent fields. Supplementary values fill absent fields
    /// too, and are appended when both sides hold a list.
    pub fn apply_default_supplementary_values(&self, metadata: &mut dyn Metadata) {
        let fields = metadata.fields_mut();
        for (key, value) in &self.default_values {
            if !fields.contains_key(key) {
                fields.insert(key.clone(), value.clone());
            }
        }

        for (key, value) in &self.supplementary_values {
            match (fields.get_mut(key), value) {
                (Some(Value::Array(existing)), Value::Array(extra)) => {
                    existing.extend(extra.iter().cloned());
                }
                (Some(_), _) => {}
                (None, _) => {
                    fields.insert(key.clone(), value.clone());
                }
            }
        }
    }
}
