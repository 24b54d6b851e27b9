//! Granule matching engine.
//!
//! Decides whether an incoming record is new or an update of an existing
//! repository record: ask the sink for candidates sharing the granule's
//! datasource, key values and time bucket, then keep only those whose
//! locations lie inside the granule's polygon. Zero survivors means create,
//! one means update, more than one is an upstream integrity problem and is
//! never resolved by picking one.

use tracing::debug;

use crate::error::HarvestError;
use crate::geometry::Containment;
use crate::granule::Granule;
use crate::metadata::Metadata;
use crate::sink::{CandidateQuery, RepositorySink};

/// Find the existing record the granule matches, if any.
pub async fn find_match(
    granule: &Granule,
    sink: &dyn RepositorySink,
    containment: &dyn Containment,
) -> Result<Option<Box<dyn Metadata>>, HarvestError> {
    let candidates = sink.search_candidates(&CandidateQuery::from(granule)).await?;
    debug!(
        datasource_id = %granule.datasource_id,
        candidates = candidates.len(),
        "Candidate search returned"
    );
    spatial_match(granule, candidates, containment)
}

/// Local spatial filter over coarse candidates.
///
/// Candidates whose locations cannot be derived are dropped, not propagated.
pub fn spatial_match(
    granule: &Granule,
    candidates: Vec<Box<dyn Metadata>>,
    containment: &dyn Containment,
) -> Result<Option<Box<dyn Metadata>>, HarvestError> {
    let mut matches: Vec<Box<dyn Metadata>> = match &granule.polygon {
        None => candidates,
        Some(polygon) => candidates
            .into_iter()
            .filter(|candidate| match candidate.location_geometries() {
                Ok(locations) => locations.iter().all(|l| containment.within(l, polygon)),
                Err(_) => false,
            })
            .collect(),
    };

    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.pop()),
        n => Err(HarvestError::Ambiguity(format!(
            "Multiple matching metadata records found ({} candidates for datasource {})",
            n, granule.datasource_id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datacite::DataCiteMetadata;
    use crate::geometry::{PlanarContainment, Point, Polygon};
    use serde_json::json;

    fn candidate(point: &str) -> Box<dyn Metadata> {
        Box::new(
            DataCiteMetadata::from_value(json!({
                "titles": [{"title": point}],
                "geoLocations": [{"geoLocationPoint": point}]
            }))
            .unwrap(),
        )
    }

    fn granule(polygon: Option<Polygon>) -> Granule {
        Granule {
            datasource_id: "ds".to_string(),
            values: None,
            timeframe: None,
            polygon,
        }
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
    fn test_no_candidates_is_no_match() {
        let m = spatial_match(&granule(Some(region())), vec![], &PlanarContainment).unwrap();
        assert!(m.is_none());
    }

    #[test]
    fn test_single_contained_candidate_matches() {
        let m = spatial_match(
            &granule(Some(region())),
            vec![candidate("5 5"), candidate("50 50")],
            &PlanarContainment,
        )
        .unwrap()
        .unwrap();
        assert_eq!(m.fields()["titles"][0]["title"], "5 5");
    }

    #[test]
    fn test_two_contained_candidates_is_ambiguous() {
        let err = spatial_match(
            &granule(Some(region())),
            vec![candidate("5 5"), candidate("6 6")],
            &PlanarContainment,
        )
        .unwrap_err();
        assert!(matches!(err, HarvestError::Ambiguity(_)));
    }

    #[test]
    fn test_candidates_without_locations_are_dropped() {
        let broken: Box<dyn Metadata> =
            Box::new(DataCiteMetadata::from_value(json!({"titles": []})).unwrap());
        let m = spatial_match(
            &granule(Some(region())),
            vec![broken, candidate("5 5")],
            &PlanarContainment,
        )
        .unwrap();
        assert!(m.is_some());
    }

    #[test]
    fn test_without_polygon_every_candidate_counts() {
        let err = spatial_match(
            &granule(None),
            vec![candidate("5 5"), candidate("50 50")],
            &PlanarContainment,
        )
        .unwrap_err();
        assert!(matches!(err, HarvestError::Ambiguity(_)));
    }
}
