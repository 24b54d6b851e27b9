//! Planar geometry for spatial granules.
//!
//! Locations derived from metadata are points or lon/lat boxes; granule
//! boundaries are polygons loaded from a GeoJSON source. The "is this
//! location inside that polygon" test is the [`Containment`] capability so
//! the matching logic does not depend on one spatial library.
//! [`PlanarContainment`] is the built-in implementation.

use serde_json::Value;

use crate::error::HarvestError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub lon: f64,
    pub lat: f64,
}

impl Point {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

/// A location geometry derived from a metadata geolocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Geometry {
    Point(Point),
    /// Axis-aligned box; corners are normalised so `west <= east`, `south <= north`.
    Box {
        west: f64,
        south: f64,
        east: f64,
        north: f64,
    },
}

impl Geometry {
    pub fn rect(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> Self {
        Geometry::Box {
            west: lon1.min(lon2),
            south: lat1.min(lat2),
            east: lon1.max(lon2),
            north: lat1.max(lat2),
        }
    }
}

/// A polygon with one outer ring and zero or more holes.
///
/// Rings are stored as given; a closing vertex equal to the first is allowed
/// but not required.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub exterior: Vec<Point>,
    pub holes: Vec<Vec<Point>>,
    /// Optional feature name carried from the GeoJSON `properties.name`.
    pub name: Option<String>,
}

impl Polygon {
    pub fn new(exterior: Vec<Point>) -> Self {
        Self {
            exterior,
            holes: Vec::new(),
            name: None,
        }
    }

    fn rings(&self) -> impl Iterator<Item = &Vec<Point>> {
        std::iter::once(&self.exterior).chain(self.holes.iter())
    }

    fn edges(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        self.rings().flat_map(|ring| ring_edges(ring))
    }
}

/// Spatial containment capability: is `location` entirely within `polygon`?
pub trait Containment: Send + Sync {
    fn within(&self, location: &Geometry, polygon: &Polygon) -> bool;
}

/// Planar (lon/lat treated as x/y) containment.
///
/// Boundaries are exclusive: a point on a polygon edge is not within it.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanarContainment;

impl Containment for PlanarContainment {
    fn within(&self, location: &Geometry, polygon: &Polygon) -> bool {
        match *location {
            Geometry::Point(p) => point_in_polygon(p, polygon),
            Geometry::Box {
                west,
                south,
                east,
                north,
            } => {
                let corners = [
                    Point::new(west, south),
                    Point::new(east, south),
                    Point::new(east, north),
                    Point::new(west, north),
                ];
                if !corners.iter().all(|c| point_in_polygon(*c, polygon)) {
                    return false;
                }
                // A degenerate box is just its corners.
                if west == east || south == north {
                    return true;
                }
                let vertex_inside_box = polygon.rings().flatten().any(|v| {
                    v.lon > west && v.lon < east && v.lat > south && v.lat < north
                });
                if vertex_inside_box {
                    return false;
                }
                let box_edges = ring_edges(&corners).collect::<Vec<_>>();
                !polygon.edges().any(|(a, b)| {
                    box_edges
                        .iter()
                        .any(|(c, d)| segments_cross(a, b, *c, *d))
                })
            }
        }
    }
}

fn ring_edges(ring: &[Point]) -> impl Iterator<Item = (Point, Point)> + '_ {
    let n = ring.len();
    (0..n).filter_map(move |i| {
        let a = ring[i];
        let b = ring[(i + 1) % n];
        if a == b {
            None
        } else {
            Some((a, b))
        }
    })
}

fn point_in_polygon(p: Point, polygon: &Polygon) -> bool {
    if polygon.exterior.len() < 3 {
        return false;
    }
    if polygon.edges().any(|(a, b)| on_segment(p, a, b)) {
        return false;
    }
    if !point_in_ring(p, &polygon.exterior) {
        return false;
    }
    !polygon.holes.iter().any(|hole| point_in_ring(p, hole))
}

/// Even-odd ray casting. Callers exclude boundary points first.
fn point_in_ring(p: Point, ring: &[Point]) -> bool {
    let mut inside = false;
    for (a, b) in ring_edges(ring) {
        if (a.lat > p.lat) != (b.lat > p.lat) {
            let x = a.lon + (p.lat - a.lat) * (b.lon - a.lon) / (b.lat - a.lat);
            if p.lon < x {
                inside = !inside;
            }
        }
    }
    inside
}

fn cross(o: Point, a: Point, b: Point) -> f64 {
    (a.lon - o.lon) * (b.lat - o.lat) - (a.lat - o.lat) * (b.lon - o.lon)
}

fn on_segment(p: Point, a: Point, b: Point) -> bool {
    cross(a, b, p).abs() <= f64::EPSILON * (1.0 + a.lon.abs().max(a.lat.abs()))
        && p.lon >= a.lon.min(b.lon)
        && p.lon <= a.lon.max(b.lon)
        && p.lat >= a.lat.min(b.lat)
        && p.lat <= a.lat.max(b.lat)
}

/// Proper crossing: the segments intersect at a single interior point of both.
fn segments_cross(a: Point, b: Point, c: Point, d: Point) -> bool {
    let d1 = cross(c, d, a);
    let d2 = cross(c, d, b);
    let d3 = cross(a, b, c);
    let d4 = cross(a, b, d);
    d1 * d2 < 0.0 && d3 * d4 < 0.0
}

/// The polygons of a granularity rule's spatial extent.
#[derive(Debug, Clone, Default)]
pub struct PolygonSet {
    polygons: Vec<Polygon>,
}

impl PolygonSet {
    pub fn new(polygons: Vec<Polygon>) -> Self {
        Self { polygons }
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    /// Parse a GeoJSON `FeatureCollection` (or a single `Feature`).
    ///
    /// Only `Polygon` geometries are kept; other geometry types are skipped.
    pub fn from_geojson(doc: &Value) -> Result<Self, HarvestError> {
        let features: Vec<&Value> = match doc.get("type").and_then(Value::as_str) {
            Some("FeatureCollection") => doc
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    HarvestError::response_format("GeoJSON FeatureCollection has no features array")
                })?
                .iter()
                .collect(),
            Some("Feature") => vec![doc],
            _ => {
                return Err(HarvestError::response_format(
                    "Expected a GeoJSON FeatureCollection or Feature",
                ))
            }
        };

        let mut polygons = Vec::new();
        for feature in features {
            let geometry = match feature.get("geometry") {
                Some(g) if g.get("type").and_then(Value::as_str) == Some("Polygon") => g,
                _ => continue,
            };
            let rings = geometry
                .get("coordinates")
                .and_then(Value::as_array)
                .ok_or_else(|| HarvestError::response_format("Polygon has no coordinates"))?;
            let mut parsed = rings.iter().map(parse_ring).collect::<Result<Vec<_>, _>>()?;
            if parsed.is_empty() {
                continue;
            }
            let exterior = parsed.remove(0);
            polygons.push(Polygon {
                exterior,
                holes: parsed,
                name: feature
                    .get("properties")
                    .and_then(|p| p.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }

        Ok(Self { polygons })
    }

    /// Find the single polygon that encloses every location.
    ///
    /// Fails when no polygon encloses them all, or when more than one does.
    pub fn enclosing(
        &self,
        locations: &[Geometry],
        containment: &dyn Containment,
    ) -> Result<&Polygon, HarvestError> {
        let first = locations.first().ok_or_else(|| {
            HarvestError::Granularity("No location(s) given for spatial granularity".to_string())
        })?;

        let mut matches = self
            .polygons
            .iter()
            .filter(|polygon| locations.iter().all(|l| containment.within(l, polygon)));

        match (matches.next(), matches.next()) {
            (Some(polygon), None) => Ok(polygon),
            (Some(_), Some(_)) => Err(HarvestError::Granularity(
                "Locations fall within more than one bounding polygon".to_string(),
            )),
            (None, _) => {
                let partial = self.polygons.iter().any(|p| containment.within(first, p));
                if partial {
                    Err(HarvestError::Granularity(
                        "Locations do not all fall within one polygon".to_string(),
                    ))
                } else {
                    Err(HarvestError::Granularity(
                        "Could not find bounding polygon for the given location(s)".to_string(),
                    ))
                }
            }
        }
    }
}

fn parse_ring(ring: &Value) -> Result<Vec<Point>, HarvestError> {
    let invalid = || HarvestError::response_format("Invalid GeoJSON polygon ring");
    ring.as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|pos| {
            let pos = pos.as_array().ok_or_else(invalid)?;
            let lon = pos.first().and_then(Value::as_f64).ok_or_else(invalid)?;
            let lat = pos.get(1).and_then(Value::as_f64).ok_or_else(invalid)?;
            Ok(Point::new(lon, lat))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon {
        Polygon::new(vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
            Point::new(x0, y0),
        ])
    }

    #[test]
    fn test_point_inside_and_outside() {
        let poly = square(0.0, 0.0, 10.0, 10.0);
        let c = PlanarContainment;
        assert!(c.within(&Geometry::Point(Point::new(5.0, 5.0)), &poly));
        assert!(!c.within(&Geometry::Point(Point::new(15.0, 5.0)), &poly));
    }

    #[test]
    fn test_point_on_boundary_is_not_within() {
        let poly = square(0.0, 0.0, 10.0, 10.0);
        assert!(!PlanarContainment.within(&Geometry::Point(Point::new(0.0, 5.0)), &poly));
    }

    #[test]
    fn test_point_in_hole_is_not_within() {
        let mut poly = square(0.0, 0.0, 10.0, 10.0);
        poly.holes.push(square(4.0, 4.0, 6.0, 6.0).exterior);
        assert!(!PlanarContainment.within(&Geometry::Point(Point::new(5.0, 5.0)), &poly));
        assert!(PlanarContainment.within(&Geometry::Point(Point::new(2.0, 2.0)), &poly));
    }

    #[test]
    fn test_box_within() {
        let poly = square(0.0, 0.0, 10.0, 10.0);
        assert!(PlanarContainment.within(&Geometry::rect(1.0, 1.0, 3.0, 3.0), &poly));
        assert!(!PlanarContainment.within(&Geometry::rect(8.0, 8.0, 12.0, 12.0), &poly));
    }

    #[test]
    fn test_box_cut_by_notch_is_not_within() {
        // A U shape: the notch runs down from the top through x in (4, 6).
        let poly = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(6.0, 10.0),
            Point::new(6.0, 2.0),
            Point::new(4.0, 2.0),
            Point::new(4.0, 10.0),
            Point::new(0.0, 10.0),
        ]);
        // All four corners are inside the U but the notch crosses the box.
        assert!(!PlanarContainment.within(&Geometry::rect(1.0, 3.0, 9.0, 5.0), &poly));
        assert!(PlanarContainment.within(&Geometry::rect(1.0, 0.5, 9.0, 1.5), &poly));
    }

    #[test]
    fn test_polygon_set_from_geojson_skips_non_polygons() {
        let doc = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"name": "west"},
                 "geometry": {"type": "Polygon", "coordinates": [[[0,0],[10,0],[10,10],[0,10],[0,0]]]}},
                {"type": "Feature", "properties": {},
                 "geometry": {"type": "Point", "coordinates": [1, 1]}},
                {"type": "Feature", "properties": {"name": "east"},
                 "geometry": {"type": "Polygon", "coordinates": [[[10,0],[20,0],[20,10],[10,10],[10,0]]]}}
            ]
        });
        let set = PolygonSet::from_geojson(&doc).unwrap();
        assert_eq!(set.polygons().len(), 2);
        assert_eq!(set.polygons()[0].name.as_deref(), Some("west"));
    }

    #[test]
    fn test_enclosing_polygon() {
        let set = PolygonSet::new(vec![square(0.0, 0.0, 10.0, 10.0), square(10.0, 0.0, 20.0, 10.0)]);
        let c = PlanarContainment;

        let inside_east = [Geometry::Point(Point::new(15.0, 5.0)), Geometry::rect(11.0, 1.0, 12.0, 2.0)];
        let found = set.enclosing(&inside_east, &c).unwrap();
        assert_eq!(found.exterior[0], Point::new(10.0, 0.0));

        let split = [Geometry::Point(Point::new(5.0, 5.0)), Geometry::Point(Point::new(15.0, 5.0))];
        let err = set.enclosing(&split, &c).unwrap_err();
        assert!(err.to_string().contains("do not all fall within one polygon"));

        let nowhere = [Geometry::Point(Point::new(50.0, 50.0))];
        let err = set.enclosing(&nowhere, &c).unwrap_err();
        assert!(err.to_string().contains("Could not find bounding polygon"));
    }

    #[test]
    fn test_enclosing_overlapping_polygons_is_an_error() {
        let set = PolygonSet::new(vec![square(0.0, 0.0, 10.0, 10.0), square(-5.0, -5.0, 15.0, 15.0)]);
        let err = set
            .enclosing(&[Geometry::Point(Point::new(5.0, 5.0))], &PlanarContainment)
            .unwrap_err();
        assert!(matches!(err, HarvestError::Granularity(_)));
    }
}
