//! Granularity rules.
//!
//! A rule is the harvester's description of what makes two records "the same
//! granule": any combination of key field values, a time period bucket and
//! a spatial polygon. It arrives as a JSON object:
//!
//! ```json
//! {
//!   "key_fields": ["title", "publisher"],
//!   "temporal_extent": "month",
//!   "spatial_extent": "https://example.org/regions.geojson"
//! }
//! ```
//!
//! Every key is optional; an empty object matches purely on datasource.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::HarvestError;
use crate::geometry::PolygonSet;

/// Temporal bucket size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Hour,
    Day,
    Month,
    Year,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Hour => "hour",
            Period::Day => "day",
            Period::Month => "month",
            Period::Year => "year",
        }
    }

    /// The `[start, end)` bucket containing `time`.
    pub fn bucket(&self, time: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
        let date = time.date();
        match self {
            Period::Hour => {
                let start = midnight(date) + Duration::hours(i64::from(time.hour()));
                (start, start + Duration::hours(1))
            }
            Period::Day => {
                let start = midnight(date);
                (start, start + Duration::days(1))
            }
            Period::Month => {
                let start = first_of_month(date.year(), date.month());
                let end = if date.month() == 12 {
                    first_of_month(date.year() + 1, 1)
                } else {
                    first_of_month(date.year(), date.month() + 1)
                };
                (start, end)
            }
            Period::Year => (
                first_of_month(date.year(), 1),
                first_of_month(date.year() + 1, 1),
            ),
        }
    }
}

impl FromStr for Period {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(Period::Hour),
            "day" => Ok(Period::Day),
            "month" => Ok(Period::Month),
            "year" => Ok(Period::Year),
            other => Err(HarvestError::Configuration(format!(
                "Invalid value for granularity 'temporal_extent' element: '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(chrono::NaiveTime::MIN)
}

fn first_of_month(year: i32, month: u32) -> NaiveDateTime {
    // Day 1 exists in every month of every representable year.
    midnight(NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN))
}

/// The parsed granularity rule of a harvester.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GranularityRule {
    pub key_fields: Option<Vec<String>>,
    pub period: Option<Period>,
    /// URL of a GeoJSON document holding the bounding polygons.
    pub spatial_extent: Option<String>,
}

impl GranularityRule {
    /// Build a rule from the harvester's `granularity` JSON object.
    pub fn from_json(value: &Map<String, Value>) -> Result<Self, HarvestError> {
        let key_fields = match value.get("key_fields") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .map(|item| {
                        item.as_str().map(str::to_string).ok_or_else(|| {
                            HarvestError::Configuration(
                                "Invalid granularity 'key_fields' element; expecting list of strings"
                                    .to_string(),
                            )
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Some(_) => {
                return Err(HarvestError::Configuration(
                    "Invalid granularity 'key_fields' element; expecting list".to_string(),
                ))
            }
        };

        let period = match value.get("temporal_extent") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.parse()?),
            Some(_) => {
                return Err(HarvestError::Configuration(
                    "Invalid value for granularity 'temporal_extent' element".to_string(),
                ))
            }
        };

        let spatial_extent = match value.get("spatial_extent") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                return Err(HarvestError::Configuration(
                    "Invalid value for granularity 'spatial_extent' element; expecting URL"
                        .to_string(),
                ))
            }
        };

        Ok(Self {
            key_fields,
            period,
            spatial_extent,
        })
    }

    /// The `[start, end)` bucket that contains every given time.
    ///
    /// Fails when the times fall in different buckets: a record may not span
    /// more than one granularity period.
    pub fn timeframe(
        &self,
        times: &[NaiveDateTime],
    ) -> Result<(NaiveDateTime, NaiveDateTime), HarvestError> {
        let period = self.period.ok_or_else(|| {
            HarvestError::Configuration("Granularity period has not been set".to_string())
        })?;

        let mut buckets = times.iter().map(|t| period.bucket(*t));
        let first = buckets.next().ok_or_else(|| {
            HarvestError::InvalidMetadata("No datetime values given".to_string())
        })?;
        if buckets.any(|bucket| bucket != first) {
            return Err(HarvestError::Granularity(
                "Metadata dates span multiple granularity periods".to_string(),
            ));
        }
        Ok(first)
    }
}

/// A rule together with its resolved polygon source.
#[derive(Debug, Clone, Default)]
pub struct Granularity {
    pub rule: GranularityRule,
    pub polygons: Option<PolygonSet>,
}

impl Granularity {
    /// Pair a rule with the polygons loaded from its `spatial_extent`.
    ///
    /// The polygons must be present exactly when the rule names a spatial extent.
    pub fn new(rule: GranularityRule, polygons: Option<PolygonSet>) -> Result<Self, HarvestError> {
        match (&rule.spatial_extent, &polygons) {
            (Some(url), None) => Err(HarvestError::Configuration(format!(
                "Polygons from {} have not been loaded",
                url
            ))),
            (None, Some(_)) => Err(HarvestError::Configuration(
                "Polygons supplied for a granularity rule without a spatial extent".to_string(),
            )),
            _ => Ok(Self { rule, polygons }),
        }
    }
}
