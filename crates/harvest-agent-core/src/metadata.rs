//! Metadata adapter contract.
//!
//! A metadata record is a schema-specific JSON object. The harvesting core
//! never looks at schema field names directly; it goes through the
//! [`Metadata`] trait, which each schema adapter (see [`crate::datacite`])
//! implements. Merge and geometry derivation are provided methods built on
//! top of the adapter's accessors.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};
use std::fmt::Debug;

use crate::error::HarvestError;
use crate::geometry::{Geometry, Point};

/// A location carried by a metadata record.
#[derive(Debug, Clone, PartialEq)]
pub enum Geolocation {
    Point {
        place: Option<String>,
        lat: f64,
        lon: f64,
    },
    Box {
        place: Option<String>,
        lat1: f64,
        lon1: f64,
        lat2: f64,
        lon2: f64,
    },
}

impl Geolocation {
    pub fn point(lat: f64, lon: f64) -> Self {
        Geolocation::Point {
            place: None,
            lat,
            lon,
        }
    }

    pub fn geometry(&self) -> Geometry {
        match *self {
            Geolocation::Point { lat, lon, .. } => Geometry::Point(Point::new(lon, lat)),
            Geolocation::Box {
                lat1,
                lon1,
                lat2,
                lon2,
                ..
            } => Geometry::rect(lon1, lat1, lon2, lat2),
        }
    }
}

/// The "collected" time range of a record: always a start/end pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectedRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl CollectedRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    /// A single instant widens to `[t, t]`.
    pub fn instant(time: NaiveDateTime) -> Self {
        Self {
            start: time,
            end: time,
        }
    }

    /// Smallest range covering both.
    pub fn union(&self, other: &CollectedRange) -> CollectedRange {
        CollectedRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn times(&self) -> [NaiveDateTime; 2] {
        [self.start, self.end]
    }
}

/// Schema adapter over a metadata record.
pub trait Metadata: Send + Sync + Debug {
    fn fields(&self) -> &Map<String, Value>;

    fn fields_mut(&mut self) -> &mut Map<String, Value>;

    /// Stamp the originating datasource id and the record's id within it.
    ///
    /// Existing identifiers of the same type are overwritten, not duplicated.
    fn set_source_identifiers(&mut self, datasource_id: &str, record_id: &str);

    /// Primary identifier and its type.
    fn metadata_id(&self) -> (String, String);

    /// The datasource id previously stamped by [`set_source_identifiers`](Metadata::set_source_identifiers).
    fn datasource_id(&self) -> Result<String, HarvestError>;

    fn collected_dates(&self) -> Result<CollectedRange, HarvestError>;

    fn set_collected_dates(&mut self, range: CollectedRange) -> Result<(), HarvestError>;

    fn geolocations(&self) -> Result<Vec<Geolocation>, HarvestError>;

    fn set_geolocations(&mut self, geolocations: &[Geolocation]);

    /// Strict top-level lookup: a missing or null field is an error.
    fn value(&self, key: &str) -> Result<&Value, HarvestError> {
        match self.fields().get(key) {
            Some(Value::Null) | None => Err(HarvestError::InvalidMetadata(format!(
                "Metadata contains no '{}' element",
                key
            ))),
            Some(v) => Ok(v),
        }
    }

    /// Location geometries for spatial tests. A record with no locations is an error.
    fn location_geometries(&self) -> Result<Vec<Geometry>, HarvestError> {
        let geometries: Vec<Geometry> = self
            .geolocations()
            .map_err(|e| {
                HarvestError::InvalidMetadata(format!(
                    "Error parsing geolocation info from metadata: {}",
                    e
                ))
            })?
            .iter()
            .map(Geolocation::geometry)
            .collect();
        if geometries.is_empty() {
            return Err(HarvestError::InvalidMetadata(
                "Metadata contains no geolocation info".to_string(),
            ));
        }
        Ok(geometries)
    }

    /// Fold a newer record of the same granule into this one.
    ///
    /// Only granularity-related values are merged: the collected range widens
    /// to cover both records, and geolocations not already present are
    /// appended after the existing ones. Everything else is left as is.
    fn merge_from(&mut self, other: &dyn Metadata) -> Result<(), HarvestError> {
        let merged = self.collected_dates()?.union(&other.collected_dates()?);
        self.set_collected_dates(merged)?;

        let mut geolocations = self.geolocations()?;
        let mut changed = false;
        for geolocation in other.geolocations()? {
            if !geolocations.contains(&geolocation) {
                geolocations.push(geolocation);
                changed = true;
            }
        }
        if changed {
            self.set_geolocations(&geolocations);
        }
        Ok(())
    }

    fn to_value(&self) -> Value {
        Value::Object(self.fields().clone())
    }
}

/// Parse an ISO 8601 timestamp as wall-clock time.
///
/// Offsets are accepted but dropped: buckets are cut on the timestamp's own
/// local fields. Date-only values mean midnight.
pub fn parse_datetime(s: &str) -> Result<NaiveDateTime, HarvestError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_local());
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN));
    }
    Err(HarvestError::InvalidMetadata(format!(
        "Invalid ISO 8601 date/time: '{}'",
        s
    )))
}

pub fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_datetime_variants() {
        let expected = NaiveDateTime::parse_from_str("2017-01-02T03:04:05", "%Y-%m-%dT%H:%M:%S").unwrap();
        assert_eq!(parse_datetime("2017-01-02T03:04:05").unwrap(), expected);
        assert_eq!(parse_datetime("2017-01-02T03:04:05Z").unwrap(), expected);
        assert_eq!(parse_datetime("2017-01-02T03:04:05+02:00").unwrap(), expected);
        assert_eq!(
            parse_datetime("2017-01-02").unwrap(),
            NaiveDateTime::parse_from_str("2017-01-02T00:00:00", "%Y-%m-%dT%H:%M:%S").unwrap()
        );
        assert!(parse_datetime("yesterday").is_err());
    }

    #[test]
    fn test_parse_datetime_space_separated_minutes() {
        let expected = NaiveDateTime::parse_from_str("2017-04-03T10:00:00", "%Y-%m-%dT%H:%M:%S").unwrap();
        assert_eq!(parse_datetime("2017-04-03 10:00").unwrap(), expected);
        assert_eq!(parse_datetime("2017-04-03 10:00:00").unwrap(), expected);
    }

    #[test]
    fn test_format_datetime_keeps_fractional_seconds() {
        let dt = parse_datetime("2017-04-03T10:00:00.250").unwrap();
        assert_eq!(format_datetime(&dt), "2017-04-03T10:00:00.250");
        assert_eq!(parse_datetime(&format_datetime(&dt)).unwrap(), dt);

        let whole = parse_datetime("2017-04-03T10:00:00").unwrap();
        assert_eq!(format_datetime(&whole), "2017-04-03T10:00:00");
    }

    #[test]
    fn test_range_union_is_idempotent() {
        let a = CollectedRange::new(
            parse_datetime("2017-01-05").unwrap(),
            parse_datetime("2017-01-10").unwrap(),
        );
        let b = CollectedRange::new(
            parse_datetime("2017-01-01").unwrap(),
            parse_datetime("2017-01-07").unwrap(),
        );
        let once = a.union(&b);
        assert_eq!(once.start, b.start);
        assert_eq!(once.end, a.end);
        assert_eq!(once.union(&b), once);
    }

    #[test]
    fn test_box_geolocation_geometry_is_normalised() {
        let g = Geolocation::Box {
            place: None,
            lat1: -30.0,
            lon1: 25.0,
            lat2: -34.0,
            lon2: 18.0,
        };
        assert_eq!(g.geometry(), Geometry::rect(18.0, -34.0, 25.0, -30.0));
    }
}
