//! Granule derivation.
//!
//! A [`Granule`] is the matching key of one metadata record under a
//! [`Granularity`]: its datasource, plus one dimension for each component the
//! rule declares (key field values, a time bucket, a bounding polygon).

use chrono::NaiveDateTime;
use serde_json::{Map, Value};

use crate::error::HarvestError;
use crate::geometry::{Containment, Polygon};
use crate::granularity::Granularity;
use crate::metadata::Metadata;

#[derive(Debug, Clone, PartialEq)]
pub struct Granule {
    pub datasource_id: String,
    /// Present iff the rule declares key fields.
    pub values: Option<Map<String, Value>>,
    /// `[start, end)`; present iff the rule declares a period.
    pub timeframe: Option<(NaiveDateTime, NaiveDateTime)>,
    /// Present iff the rule declares a spatial extent.
    pub polygon: Option<Polygon>,
}

impl Granule {
    /// Derive the granule a record belongs to.
    ///
    /// The record must already carry its source identifiers.
    pub fn derive(
        granularity: &Granularity,
        metadata: &dyn Metadata,
        containment: &dyn Containment,
    ) -> Result<Self, HarvestError> {
        let rule = &granularity.rule;
        let datasource_id = metadata.datasource_id()?;

        let values = match &rule.key_fields {
            Some(keys) => {
                let mut values = Map::new();
                for key in keys {
                    values.insert(key.clone(), metadata.value(key)?.clone());
                }
                Some(values)
            }
            None => None,
        };

        let timeframe = match rule.period {
            Some(_) => Some(rule.timeframe(&metadata.collected_dates()?.times())?),
            None => None,
        };

        let polygon = match &granularity.polygons {
            Some(polygons) => {
                let locations = metadata.location_geometries()?;
                Some(polygons.enclosing(&locations, containment)?.clone())
            }
            None => None,
        };

        Ok(Self {
            datasource_id,
            values,
            timeframe,
            polygon,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datacite::DataCiteMetadata;
    use crate::geometry::{PlanarContainment, Point, PolygonSet};
    use crate::granularity::{GranularityRule, Period};
    use serde_json::json;

    fn record() -> DataCiteMetadata {
        let mut md = DataCiteMetadata::from_value(json!({
            "publisher": "SAEON",
            "dates": [{"date": "2017-03-02T10:00:00/2017-03-02T11:30:00", "dateType": "Collected"}],
            "geoLocations": [{"geoLocationPoint": "5 5"}, {"geoLocationBox": "1 1 2 2"}]
        }))
        .unwrap();
        md.set_source_identifiers("ds-1", "file.nc");
        md
    }

    fn region() -> Polygon {
        Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ])
    }

    #[test]
    fn test_empty_rule_gives_datasource_only_granule() {
        let g = Granule::derive(&Granularity::default(), &record(), &PlanarContainment).unwrap();
        assert_eq!(g.datasource_id, "ds-1");
        assert!(g.values.is_none());
        assert!(g.timeframe.is_none());
        assert!(g.polygon.is_none());
    }

    #[test]
    fn test_full_rule() {
        let rule = GranularityRule {
            key_fields: Some(vec!["publisher".to_string()]),
            period: Some(Period::Day),
            spatial_extent: Some("http://example.org/r.geojson".to_string()),
        };
        let granularity =
            Granularity::new(rule, Some(PolygonSet::new(vec![region()]))).unwrap();
        let g = Granule::derive(&granularity, &record(), &PlanarContainment).unwrap();

        assert_eq!(g.values.unwrap()["publisher"], "SAEON");
        let (start, end) = g.timeframe.unwrap();
        assert_eq!(start.to_string(), "2017-03-02 00:00:00");
        assert_eq!(end.to_string(), "2017-03-03 00:00:00");
        assert_eq!(g.polygon.unwrap(), region());
    }

    #[test]
    fn test_missing_key_field_fails() {
        let rule = GranularityRule {
            key_fields: Some(vec!["title".to_string()]),
            ..Default::default()
        };
        let granularity = Granularity::new(rule, None).unwrap();
        let err = Granule::derive(&granularity, &record(), &PlanarContainment).unwrap_err();
        assert!(err.to_string().contains("'title'"));
    }

    #[test]
    fn test_dates_spanning_periods_fail() {
        let rule = GranularityRule {
            period: Some(Period::Hour),
            ..Default::default()
        };
        let granularity = Granularity::new(rule, None).unwrap();
        let err = Granule::derive(&granularity, &record(), &PlanarContainment).unwrap_err();
        assert!(matches!(err, HarvestError::Granularity(_)));
    }

    #[test]
    fn test_unstamped_record_fails() {
        let md = DataCiteMetadata::from_value(json!({})).unwrap();
        assert!(Granule::derive(&Granularity::default(), &md, &PlanarContainment).is_err());
    }
}
