//! DataCite schema adapter.
//!
//! Field conventions follow the repository's DataCite JSON dialect:
//!
//! | Concern | Field |
//! |---------|-------|
//! | source identifiers | `alternateIdentifiers[]` typed `DatasourceID` / `RecordID` |
//! | primary identifier | `identifier.identifier` + `identifier.identifierType` |
//! | collected range | `dates[]` entry with `dateType = "Collected"`, `"start/end"` |
//! | locations | `geoLocations[]` with `geoLocationPoint` / `geoLocationBox` / `geoLocationPlace` |
//!
//! The alternate identifier type key is spelled `alternateIdentiferType`
//! by the remote API and must be kept that way.

use serde_json::{json, Map, Value};

use crate::error::HarvestError;
use crate::metadata::{format_datetime, parse_datetime, CollectedRange, Geolocation, Metadata};

pub const SCHEMA: &str = "DataCite";

const ALT_IDS: &str = "alternateIdentifiers";
const ALT_ID: &str = "alternateIdentifier";
const ALT_ID_TYPE: &str = "alternateIdentiferType";
const DATASOURCE_ID_TYPE: &str = "DatasourceID";
const RECORD_ID_TYPE: &str = "RecordID";
const COLLECTED: &str = "Collected";

#[derive(Debug, Clone, PartialEq)]
pub struct DataCiteMetadata {
    fields: Map<String, Value>,
}

impl DataCiteMetadata {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Wrap a JSON value; anything but an object is rejected.
    pub fn from_value(value: Value) -> Result<Self, HarvestError> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(HarvestError::InvalidMetadata(format!(
                "DataCite metadata must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    fn upsert_alternate_identifier(&mut self, id_type: &str, id: &str) {
        let entry = self
            .fields
            .entry(ALT_IDS)
            .or_insert_with(|| Value::Array(Vec::new()));
        if !entry.is_array() {
            *entry = Value::Array(Vec::new());
        }
        if let Value::Array(alt_ids) = entry {
            let existing = alt_ids
                .iter_mut()
                .find(|alt| alt.get(ALT_ID_TYPE).and_then(Value::as_str) == Some(id_type));
            match existing {
                Some(Value::Object(alt)) => {
                    alt.insert(ALT_ID.to_string(), Value::String(id.to_string()));
                }
                _ => alt_ids.push(json!({ ALT_ID: id, ALT_ID_TYPE: id_type })),
            }
        }
    }

    fn collected_entries(&self) -> Vec<&Value> {
        self.fields
            .get("dates")
            .and_then(Value::as_array)
            .map(|dates| {
                dates
                    .iter()
                    .filter(|d| d.get("dateType").and_then(Value::as_str) == Some(COLLECTED))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Metadata for DataCiteMetadata {
    fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }

    fn set_source_identifiers(&mut self, datasource_id: &str, record_id: &str) {
        self.upsert_alternate_identifier(DATASOURCE_ID_TYPE, datasource_id);
        self.upsert_alternate_identifier(RECORD_ID_TYPE, record_id);
    }

    fn metadata_id(&self) -> (String, String) {
        match self.fields.get("identifier") {
            Some(Value::Object(id)) => (
                id.get("identifier")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                id.get("identifierType")
                    .and_then(Value::as_str)
                    .unwrap_or("DOI")
                    .to_string(),
            ),
            _ => (String::new(), "DOI".to_string()),
        }
    }

    fn datasource_id(&self) -> Result<String, HarvestError> {
        self.fields
            .get(ALT_IDS)
            .and_then(Value::as_array)
            .and_then(|alt_ids| {
                alt_ids.iter().find(|alt| {
                    alt.get(ALT_ID_TYPE).and_then(Value::as_str) == Some(DATASOURCE_ID_TYPE)
                })
            })
            .and_then(|alt| alt.get(ALT_ID))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                HarvestError::InvalidMetadata(
                    "Metadata contains no alternate identifier of type 'DatasourceID'".to_string(),
                )
            })
    }

    fn collected_dates(&self) -> Result<CollectedRange, HarvestError> {
        let entries = self.collected_entries();
        let entry = match entries.as_slice() {
            [] => {
                return Err(HarvestError::InvalidMetadata(
                    "Metadata contains no collected date element".to_string(),
                ))
            }
            [one] => *one,
            _ => {
                return Err(HarvestError::InvalidMetadata(
                    "Metadata contains too many collected date elements".to_string(),
                ))
            }
        };
        let text = entry.get("date").and_then(Value::as_str).ok_or_else(|| {
            HarvestError::InvalidMetadata("Collected date element has no date".to_string())
        })?;

        let parts: Vec<&str> = text.split('/').collect();
        match parts.as_slice() {
            [single] => Ok(CollectedRange::instant(parse_datetime(single)?)),
            [start, end] => Ok(CollectedRange::new(
                parse_datetime(start)?,
                parse_datetime(end)?,
            )),
            _ => Err(HarvestError::InvalidMetadata(
                "Collected date element contains too many parts".to_string(),
            )),
        }
    }

    fn set_collected_dates(&mut self, range: CollectedRange) -> Result<(), HarvestError> {
        let formatted = format!(
            "{}/{}",
            format_datetime(&range.start),
            format_datetime(&range.end)
        );
        let entry = self
            .fields
            .get_mut("dates")
            .and_then(Value::as_array_mut)
            .and_then(|dates| {
                dates
                    .iter_mut()
                    .find(|d| d.get("dateType").and_then(Value::as_str) == Some(COLLECTED))
            })
            .and_then(Value::as_object_mut)
            .ok_or_else(|| {
                HarvestError::InvalidMetadata(
                    "Metadata contains no collected date element".to_string(),
                )
            })?;
        entry.insert("date".to_string(), Value::String(formatted));
        Ok(())
    }

    fn geolocations(&self) -> Result<Vec<Geolocation>, HarvestError> {
        let mut geolocations = Vec::new();
        let elements = match self.fields.get("geoLocations") {
            Some(Value::Array(elements)) => elements,
            _ => return Ok(geolocations),
        };

        for element in elements {
            let place = element
                .get("geoLocationPlace")
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(point) = element.get("geoLocationPoint").and_then(Value::as_str) {
                match parse_coords(point)?.as_slice() {
                    [lat, lon] => geolocations.push(Geolocation::Point {
                        place: place.clone(),
                        lat: *lat,
                        lon: *lon,
                    }),
                    _ => {
                        return Err(HarvestError::InvalidMetadata(format!(
                            "geoLocationPoint must have 2 values: '{}'",
                            point
                        )))
                    }
                }
            }
            if let Some(bbox) = element.get("geoLocationBox").and_then(Value::as_str) {
                match parse_coords(bbox)?.as_slice() {
                    [lat1, lon1, lat2, lon2] => geolocations.push(Geolocation::Box {
                        place: place.clone(),
                        lat1: *lat1,
                        lon1: *lon1,
                        lat2: *lat2,
                        lon2: *lon2,
                    }),
                    _ => {
                        return Err(HarvestError::InvalidMetadata(format!(
                            "geoLocationBox must have 4 values: '{}'",
                            bbox
                        )))
                    }
                }
            }
        }
        Ok(geolocations)
    }

    fn set_geolocations(&mut self, geolocations: &[Geolocation]) {
        let elements = geolocations
            .iter()
            .map(|g| {
                let (mut element, place) = match g {
                    Geolocation::Point { place, lat, lon } => {
                        let mut m = Map::new();
                        m.insert(
                            "geoLocationPoint".to_string(),
                            Value::String(format!("{} {}", lat, lon)),
                        );
                        (m, place)
                    }
                    Geolocation::Box {
                        place,
                        lat1,
                        lon1,
                        lat2,
                        lon2,
                    } => {
                        let mut m = Map::new();
                        m.insert(
                            "geoLocationBox".to_string(),
                            Value::String(format!("{} {} {} {}", lat1, lon1, lat2, lon2)),
                        );
                        (m, place)
                    }
                };
                if let Some(place) = place.as_ref().filter(|p| !p.is_empty()) {
                    element.insert(
                        "geoLocationPlace".to_string(),
                        Value::String(place.clone()),
                    );
                }
                Value::Object(element)
            })
            .collect();
        self.fields
            .insert("geoLocations".to_string(), Value::Array(elements));
    }
}

fn parse_coords(text: &str) -> Result<Vec<f64>, HarvestError> {
    text.split_whitespace()
        .map(|part| {
            part.parse::<f64>().map_err(|_| {
                HarvestError::InvalidMetadata(format!("Invalid coordinate '{}' in '{}'", part, text))
            })
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;

    fn record(value: Value) -> DataCiteMetadata {
        DataCiteMetadata::from_value(value).unwrap()
    }

    #[test]
    fn test_source_identifiers_are_upserted_not_duplicated() {
        let mut md = record(json!({
            "alternateIdentifiers": [
                {"alternateIdentifier": "old-ds", "alternateIdentiferType": "DatasourceID"},
                {"alternateIdentifier": "x", "alternateIdentiferType": "DatasetID"}
            ]
        }));
        md.set_source_identifiers("ds-1", "rec-1");
        md.set_source_identifiers("ds-1", "rec-1");

        let alt_ids = md.fields()["alternateIdentifiers"].as_array().unwrap();
        assert_eq!(alt_ids.len(), 3);
        assert_eq!(md.datasource_id().unwrap(), "ds-1");
        assert!(alt_ids.iter().any(|a| a["alternateIdentiferType"] == "RecordID"
            && a["alternateIdentifier"] == "rec-1"));
    }

    #[test]
    fn test_missing_datasource_id() {
        let md = record(json!({}));
        assert!(matches!(
            md.datasource_id(),
            Err(HarvestError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_metadata_id_defaults_to_empty_doi() {
        assert_eq!(record(json!({})).metadata_id(), (String::new(), "DOI".to_string()));
        let md = record(json!({"identifier": {"identifier": "10.1/abc", "identifierType": "DOI"}}));
        assert_eq!(md.metadata_id(), ("10.1/abc".to_string(), "DOI".to_string()));
    }

    #[test]
    fn test_collected_single_date_widens_to_pair() {
        let md = record(json!({"dates": [{"date": "2017-01-02T00:00:00", "dateType": "Collected"}]}));
        let range = md.collected_dates().unwrap();
        assert_eq!(range.start, range.end);
    }

    #[test]
    fn test_collected_dates_errors() {
        assert!(record(json!({"dates": []})).collected_dates().is_err());
        let two = record(json!({"dates": [
            {"date": "2017-01-02", "dateType": "Collected"},
            {"date": "2017-01-03", "dateType": "Collected"}
        ]}));
        assert!(two.collected_dates().is_err());
        let three_parts = record(json!({"dates": [
            {"date": "2017-01-02/2017-01-03/2017-01-04", "dateType": "Collected"}
        ]}));
        assert!(three_parts.collected_dates().is_err());
    }

    #[test]
    fn test_set_collected_dates_rewrites_entry() {
        let mut md = record(json!({"dates": [
            {"date": "2017", "dateType": "Issued"},
            {"date": "2017-01-02", "dateType": "Collected"}
        ]}));
        let range = CollectedRange::new(
            parse_datetime("2017-01-01").unwrap(),
            parse_datetime("2017-01-31T12:00:00").unwrap(),
        );
        md.set_collected_dates(range).unwrap();
        assert_eq!(
            md.fields()["dates"][1]["date"],
            "2017-01-01T00:00:00/2017-01-31T12:00:00"
        );
        assert_eq!(md.collected_dates().unwrap(), range);
    }

    #[test]
    fn test_geolocations_roundtrip_with_place() {
        let mut md = record(json!({"geoLocations": [
            {"geoLocationPoint": "-33.9 18.4", "geoLocationPlace": "Cape Town"},
            {"geoLocationBox": "-34 18 -33 19"}
        ]}));
        let geos = md.geolocations().unwrap();
        assert_eq!(geos.len(), 2);
        md.set_geolocations(&geos);
        assert_eq!(md.geolocations().unwrap(), geos);
        assert_eq!(md.fields()["geoLocations"][0]["geoLocationPlace"], "Cape Town");

        let geoms = md.location_geometries().unwrap();
        assert_eq!(geoms[1], Geometry::rect(18.0, -34.0, 19.0, -33.0));
    }

    #[test]
    fn test_malformed_point_is_an_error() {
        let md = record(json!({"geoLocations": [{"geoLocationPoint": "north"}]}));
        assert!(md.geolocations().is_err());
        assert!(md.location_geometries().is_err());
    }

    #[test]
    fn test_no_geolocations_has_no_geometries() {
        let md = record(json!({"titles": []}));
        assert!(md.geolocations().unwrap().is_empty());
        let err = md.location_geometries().unwrap_err();
        assert!(err.to_string().contains("no geolocation info"));
    }

    fn granule_record(date: &str, points: &[&str]) -> DataCiteMetadata {
        let geos: Vec<Value> = points
            .iter()
            .map(|p| json!({"geoLocationPoint": p}))
            .collect();
        record(json!({
            "dates": [{"date": date, "dateType": "Collected"}],
            "geoLocations": geos,
        }))
    }

    #[test]
    fn test_merge_widens_range_and_appends_new_locations() {
        let mut target = granule_record("2017-01-10/2017-01-12", &["1 1", "2 2"]);
        let source = granule_record("2017-01-05/2017-01-11", &["2 2", "3 3"]);
        target.merge_from(&source).unwrap();

        let range = target.collected_dates().unwrap();
        assert_eq!(range.start, parse_datetime("2017-01-05").unwrap());
        assert_eq!(range.end, parse_datetime("2017-01-12").unwrap());

        let geos = target.geolocations().unwrap();
        assert_eq!(
            geos,
            vec![
                Geolocation::point(1.0, 1.0),
                Geolocation::point(2.0, 2.0),
                Geolocation::point(3.0, 3.0)
            ]
        );
    }

    #[test]
    fn test_merge_identical_point_is_not_duplicated() {
        let mut target = granule_record("2017-01-10", &["1 1"]);
        let source = granule_record("2017-01-10", &["1 1"]);
        target.merge_from(&source).unwrap();
        assert_eq!(target.geolocations().unwrap(), vec![Geolocation::point(1.0, 1.0)]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let source = granule_record("2017-02-01/2017-02-03", &["5 5", "6 6"]);
        let mut once = granule_record("2017-02-02", &["1 1"]);
        once.merge_from(&source).unwrap();
        let mut twice = once.clone();
        twice.merge_from(&source).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(DataCiteMetadata::from_value(json!([1, 2])).is_err());
    }
}
