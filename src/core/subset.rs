use crate::core::line_segment::BoxSegmentation;
use crate::types::{InsarError, InsarResult, PointCloudDataset, Polygon};
use serde::{Deserialize, Serialize};

/// Tolerance used when extracting a pixel series, in degrees
pub const EXTRACTION_TOLERANCE_DEG: f64 = 0.5;
/// Looser tolerance used when picking a pixel for display, in degrees
pub const PLOTTING_TOLERANCE_DEG: f64 = 1.0;

/// Parameters for nearest-pixel lookup
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NearestParams {
    /// A match must be strictly closer than this, in degrees
    pub tolerance_degrees: f64,
}

impl NearestParams {
    pub fn extraction() -> Self {
        Self { tolerance_degrees: EXTRACTION_TOLERANCE_DEG }
    }

    pub fn plotting() -> Self {
        Self { tolerance_degrees: PLOTTING_TOLERANCE_DEG }
    }
}

impl Default for NearestParams {
    fn default() -> Self {
        Self::extraction()
    }
}

/// Record picked by `nearest_record`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestMatch {
    pub index: usize,
    /// Euclidean distance in degree space
    pub distance: f64,
}

/// Records whose (longitude, latitude) falls inside or on the polygon
pub fn filter_by_polygon(dataset: &PointCloudDataset, polygon: &Polygon) -> PointCloudDataset {
    let contains = polygon.contains_fn();
    let filtered = dataset.select(|r| contains(r.longitude, r.latitude));
    log::info!(
        "Polygon filter kept {} of {} pixels",
        filtered.len(),
        dataset.len()
    );
    filtered
}

/// Polygon filter taking raw vertex sequences.
///
/// Fewer than three vertices is degenerate rather than an error: nothing is
/// inside, so the result is empty.
pub fn extract_from_polygon(
    dataset: &PointCloudDataset,
    poly_lons: &[f64],
    poly_lats: &[f64],
) -> InsarResult<PointCloudDataset> {
    match Polygon::from_lon_lat(poly_lons, poly_lats) {
        Ok(polygon) => Ok(filter_by_polygon(dataset, &polygon)),
        Err(InsarError::DegenerateGeometry(msg)) => {
            log::warn!("{}; returning empty selection", msg);
            Ok(dataset.empty_like())
        }
        Err(e) => Err(e),
    }
}

/// Record closest to (lat, lon) in degree space.
///
/// The first record wins ties; records with non-finite coordinates are
/// skipped. Fails with `NoNearbyPoint` when even the
/// closest record is at or beyond the tolerance, or the dataset is empty.
pub fn nearest_record(
    dataset: &PointCloudDataset,
    lat: f64,
    lon: f64,
    params: &NearestParams,
) -> InsarResult<NearestMatch> {
    let mut best: Option<NearestMatch> = None;
    for (index, record) in dataset.records.iter().enumerate() {
        let distance = ((record.latitude - lat).powi(2) + (record.longitude - lon).powi(2)).sqrt();
        // Records without usable coordinates can never be nearest
        if !distance.is_finite() {
            continue;
        }
        match best {
            Some(current) if distance >= current.distance => {}
            _ => best = Some(NearestMatch { index, distance }),
        }
    }

    match best {
        Some(found) if found.distance < params.tolerance_degrees => {
            log::debug!(
                "Nearest pixel to ({}, {}) is #{} at {:.5} deg",
                lat,
                lon,
                found.index,
                found.distance
            );
            Ok(found)
        }
        Some(found) => Err(InsarError::NoNearbyPoint {
            distance: found.distance,
            tolerance: params.tolerance_degrees,
        }),
        None => Err(InsarError::NoNearbyPoint {
            distance: f64::INFINITY,
            tolerance: params.tolerance_degrees,
        }),
    }
}

/// One sub-dataset per sampling box, in box order
pub fn extract_from_boxes(
    dataset: &PointCloudDataset,
    segmentation: &BoxSegmentation,
) -> InsarResult<Vec<PointCloudDataset>> {
    segmentation
        .boxes()
        .iter()
        .map(|sampling_box| {
            let polygon = sampling_box.to_polygon()?;
            let contains = polygon.contains_fn();
            Ok(dataset.select(|r| contains(r.longitude, r.latitude)))
        })
        .collect()
}

/// Drop records whose every value column is zero
pub fn remove_all_zero_rows(dataset: &PointCloudDataset) -> PointCloudDataset {
    let filtered = dataset.select(|r| r.values.iter().any(|&v| v != 0.0));
    log::info!(
        "Removed {} all-zero pixels",
        dataset.len() - filtered.len()
    );
    filtered
}
