//! Harvester configuration and scheduling.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::HarvestError;
use crate::geometry::PolygonSet;
use crate::granularity::{Granularity, GranularityRule};

/// How often a harvester is due. Names match the registry's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frequency {
    Never,
    Seconds60,
    Hours12,
    Days1,
    Days2,
    Days7,
    Days14,
    Days30,
    Months6,
    Months12,
}

impl Frequency {
    pub const ALL: [Frequency; 10] = [
        Frequency::Never,
        Frequency::Seconds60,
        Frequency::Hours12,
        Frequency::Days1,
        Frequency::Days2,
        Frequency::Days7,
        Frequency::Days14,
        Frequency::Days30,
        Frequency::Months6,
        Frequency::Months12,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Never => "Never",
            Frequency::Seconds60 => "60 Seconds",
            Frequency::Hours12 => "12 Hours",
            Frequency::Days1 => "1 Days",
            Frequency::Days2 => "2 Days",
            Frequency::Days7 => "7 Days",
            Frequency::Days14 => "14 Days",
            Frequency::Days30 => "30 Days",
            Frequency::Months6 => "6 Months",
            Frequency::Months12 => "12 Months",
        }
    }

    /// `None` for [`Frequency::Never`]. Months count as 30 days.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Frequency::Never => None,
            Frequency::Seconds60 => Some(Duration::seconds(60)),
            Frequency::Hours12 => Some(Duration::hours(12)),
            Frequency::Days1 => Some(Duration::days(1)),
            Frequency::Days2 => Some(Duration::days(2)),
            Frequency::Days7 => Some(Duration::days(7)),
            Frequency::Days14 => Some(Duration::days(14)),
            Frequency::Days30 => Some(Duration::days(30)),
            Frequency::Months6 => Some(Duration::days(180)),
            Frequency::Months12 => Some(Duration::days(360)),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, HarvestError> {
        Frequency::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| HarvestError::Configuration(format!("Unknown harvest frequency '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HarvesterStatus {
    Active,
    Inactive,
    Deleted,
}

impl HarvesterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HarvesterStatus::Active => "Active",
            HarvesterStatus::Inactive => "Inactive",
            HarvesterStatus::Deleted => "Deleted",
        }
    }
}

impl fmt::Display for HarvesterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HarvesterStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Active" => Ok(HarvesterStatus::Active),
            "Inactive" => Ok(HarvesterStatus::Inactive),
            "Deleted" => Ok(HarvesterStatus::Deleted),
            _ => bail!("Unknown harvester status '{}'", s),
        }
    }
}

/// A configured harvester: which datasource feeds which repository, how,
/// and how often.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Harvester {
    pub uid: String,
    pub datasource_uid: String,
    pub repository_uid: String,
    pub protocol: String,
    pub schema: String,
    pub default_values: Map<String, Value>,
    pub supplementary_values: Map<String, Value>,
    /// Raw granularity rule as configured.
    pub granularity: Map<String, Value>,
    pub search_url: String,
    pub commit_url: String,
    pub frequency: Frequency,
    pub status: HarvesterStatus,
    pub lastrun: Option<DateTime<Utc>>,
}

impl Harvester {
    /// True when the harvester is Active, has a frequency, and either never
    /// ran or last ran more than one interval before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.status != HarvesterStatus::Active {
            return false;
        }
        let Some(interval) = self.frequency.interval() else {
            return false;
        };
        match self.lastrun {
            None => true,
            Some(lastrun) => now > lastrun + interval,
        }
    }

    /// Harvesting is refused unless the harvester is Active.
    pub fn ensure_active(&self) -> Result<(), HarvestError> {
        if self.status != HarvesterStatus::Active {
            return Err(HarvestError::Inactive(self.status.to_string()));
        }
        Ok(())
    }

    pub fn granularity_rule(&self) -> Result<GranularityRule, HarvestError> {
        GranularityRule::from_json(&self.granularity)
    }

    /// Build the granularity once the rule's polygon source (if any) is loaded.
    pub fn granularity_with(
        &self,
        polygons: Option<PolygonSet>,
    ) -> Result<Granularity, HarvestError> {
        Granularity::new(self.granularity_rule()?, polygons)
    }
}
