use crate::types::{InsarError, InsarResult, LatLon, Polygon};
use geo::{Distance, Geodesic, Intersects, LineString, Point};
use ndarray::{Array, ArrayView, Dimension, Zip};

/// Geodesic distance in metres between two points given in degrees.
///
/// Karney's algorithm on the WGS84 ellipsoid; converges for every pair of
/// points, antipodal ones included.
pub fn geodesic_distance_meters(p1: LatLon, p2: LatLon) -> f64 {
    Geodesic.distance(Point::new(p1.lon, p1.lat), Point::new(p2.lon, p2.lat))
}

/// Boundary-inclusive point-in-polygon test on raw (x, y) vertices.
///
/// Points on an edge or vertex count as inside; non-convex rings are
/// handled. Fewer than three vertices never contain anything.
pub fn point_in_polygon(query: (f64, f64), vertices: &[(f64, f64)]) -> bool {
    if vertices.len() < 3 {
        return false;
    }
    ring_contains(&to_geo_polygon(vertices), query.0, query.1)
}

fn to_geo_polygon(vertices: &[(f64, f64)]) -> geo::Polygon<f64> {
    geo::Polygon::new(LineString::from(vertices.to_vec()), Vec::new())
}

fn ring_contains(shape: &geo::Polygon<f64>, x: f64, y: f64) -> bool {
    // Non-finite queries are outside everything
    if !(x.is_finite() && y.is_finite()) {
        return false;
    }
    shape.intersects(&Point::new(x, y))
}

impl Polygon {
    /// Whether (x, y) = (lon, lat) lies inside or on the ring
    pub fn contains(&self, x: f64, y: f64) -> bool {
        ring_contains(&self.to_geo(), x, y)
    }

    /// The ring as a `geo` polygon, closed and without holes
    pub fn to_geo(&self) -> geo::Polygon<f64> {
        to_geo_polygon(self.vertices())
    }

    /// Containment test reusing one `geo` polygon for many queries
    pub fn contains_fn(&self) -> impl Fn(f64, f64) -> bool {
        let shape = self.to_geo();
        move |x, y| ring_contains(&shape, x, y)
    }
}

/// Containment mask for a grid of query points of any shape.
///
/// `xq` and `yq` must share a shape; the mask comes back in that same shape.
pub fn contains_points<D: Dimension>(
    xq: ArrayView<'_, f64, D>,
    yq: ArrayView<'_, f64, D>,
    polygon: &Polygon,
) -> InsarResult<Array<bool, D>> {
    if xq.shape() != yq.shape() {
        return Err(InsarError::InvalidFormat(format!(
            "query coordinate arrays differ in shape: {:?} vs {:?}",
            xq.shape(),
            yq.shape()
        )));
    }

    let contains = polygon.contains_fn();
    Ok(Zip::from(xq).and(yq).map_collect(|&x, &y| contains(x, y)))
}

/// Containment mask for a flat list of (x, y) points
pub fn points_in_polygon(points: &[(f64, f64)], polygon: &Polygon) -> Vec<bool> {
    let contains = polygon.contains_fn();
    points.iter().map(|&(x, y)| contains(x, y)).collect()
}
