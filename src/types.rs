use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Conversion factor from feet to millimetres
pub const FEET_TO_MM: f64 = 304.8;

/// Geographic coordinate in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// A single InSAR pixel: location plus one value per dataset column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub latitude: f64,
    pub longitude: f64,
    /// Values aligned to `PointCloudDataset::columns`
    pub values: Vec<f64>,
}

/// Tabular InSAR point cloud.
///
/// `columns` holds the labels of every value column after Latitude and
/// Longitude have been pulled out (typically a few attribute columns such as
/// ID or velocity followed by one column per acquisition date, labelled
/// `YYYYMMDD`). Every record carries exactly one value per column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloudDataset {
    pub columns: Vec<String>,
    pub records: Vec<PointRecord>,
}

impl PointCloudDataset {
    /// Build a dataset, checking that every record matches the column axis
    pub fn new(columns: Vec<String>, records: Vec<PointRecord>) -> InsarResult<Self> {
        let dataset = Self { columns, records };
        dataset.validate_axis()?;
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Empty dataset sharing this dataset's column axis
    pub fn empty_like(&self) -> Self {
        Self {
            columns: self.columns.clone(),
            records: Vec::new(),
        }
    }

    /// Copy of the records selected by `keep`, original order preserved
    pub fn select<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&PointRecord) -> bool,
    {
        Self {
            columns: self.columns.clone(),
            records: self.records.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }

    /// Fails with `MismatchedAxis` when a record does not carry one value per column
    pub fn validate_axis(&self) -> InsarResult<()> {
        let expected = self.columns.len();
        for (idx, record) in self.records.iter().enumerate() {
            if record.values.len() != expected {
                return Err(InsarError::MismatchedAxis(format!(
                    "record {} has {} values but the dataset has {} columns",
                    idx,
                    record.values.len(),
                    expected
                )));
            }
        }
        Ok(())
    }
}

/// Closed polygon of (longitude, latitude) vertices.
///
/// The ring is implicitly closed; a repeated closing vertex is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    vertices: Vec<(f64, f64)>,
}

impl Polygon {
    pub fn new(vertices: Vec<(f64, f64)>) -> InsarResult<Self> {
        if vertices.len() < 3 {
            return Err(InsarError::DegenerateGeometry(format!(
                "polygon needs at least 3 vertices, got {}",
                vertices.len()
            )));
        }
        Ok(Self { vertices })
    }

    /// Build from parallel longitude and latitude sequences
    pub fn from_lon_lat(lons: &[f64], lats: &[f64]) -> InsarResult<Self> {
        if lons.len() != lats.len() {
            return Err(InsarError::InvalidFormat(format!(
                "polygon has {} longitudes but {} latitudes",
                lons.len(),
                lats.len()
            )));
        }
        Self::new(lons.iter().copied().zip(lats.iter().copied()).collect())
    }

    pub fn vertices(&self) -> &[(f64, f64)] {
        &self.vertices
    }
}

/// Directed line from (lon0, lat0) to (lon1, lat1)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transect {
    pub lon0: f64,
    pub lat0: f64,
    pub lon1: f64,
    pub lat1: f64,
}

impl Transect {
    pub fn new(lon0: f64, lat0: f64, lon1: f64, lat1: f64) -> Self {
        Self { lon0, lat0, lon1, lat1 }
    }

    pub fn start(&self) -> LatLon {
        LatLon::new(self.lat0, self.lon0)
    }

    pub fn end(&self) -> LatLon {
        LatLon::new(self.lat1, self.lon1)
    }
}

/// Rectangle sampled along a transect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingBox {
    /// Position along the transect, 0 at the start endpoint
    pub index: usize,
    /// Closed ring of (lon, lat) corners, first point == last point
    pub ring: [(f64, f64); 5],
    /// Midpoint between the two sample points bounding the box
    pub center: LatLon,
}

impl SamplingBox {
    pub fn to_polygon(&self) -> InsarResult<Polygon> {
        Polygon::new(self.ring.to_vec())
    }
}

/// Dated series of values, dates strictly increasing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(dates: Vec<NaiveDate>, values: Vec<f64>) -> InsarResult<Self> {
        if dates.len() != values.len() {
            return Err(InsarError::InvalidFormat(format!(
                "series has {} dates but {} values",
                dates.len(),
                values.len()
            )));
        }
        if let Some(pos) = dates.windows(2).position(|w| w[0] >= w[1]) {
            return Err(InsarError::InvalidFormat(format!(
                "series dates are not strictly increasing at {} -> {}",
                dates[pos],
                dates[pos + 1]
            )));
        }
        Ok(Self { dates, values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Days elapsed since the first date
    pub fn day_offsets(&self) -> Vec<f64> {
        match self.dates.first() {
            Some(&t0) => self
                .dates
                .iter()
                .map(|d| (*d - t0).num_days() as f64)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Same dates, every value multiplied by `factor`
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            dates: self.dates.clone(),
            values: self.values.iter().map(|v| v * factor).collect(),
        }
    }
}

/// Outcome of a curve fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FitResult {
    /// `slope * (t - t0) + intercept`, slope in units per day
    LinearFit {
        slope: f64,
        intercept: f64,
        misfit: f64,
        rmse: f64,
        iterations: usize,
    },
    /// `amplitude * sin(2π (t - t0 - phase) / period) + mean`, period and phase in days
    SinusoidalFit {
        amplitude: f64,
        period: f64,
        phase: f64,
        mean: f64,
        misfit: f64,
        rmse: f64,
        iterations: usize,
    },
}

impl FitResult {
    pub fn misfit(&self) -> f64 {
        match self {
            FitResult::LinearFit { misfit, .. } | FitResult::SinusoidalFit { misfit, .. } => *misfit,
        }
    }

    pub fn rmse(&self) -> f64 {
        match self {
            FitResult::LinearFit { rmse, .. } | FitResult::SinusoidalFit { rmse, .. } => *rmse,
        }
    }
}

/// Error types for InSAR post-processing
#[derive(Debug, thiserror::Error)]
pub enum InsarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Dataset contains no records")]
    EmptyDataset,

    #[error("No pixel within {tolerance} degrees of the query (nearest at {distance} degrees)")]
    NoNearbyPoint { distance: f64, tolerance: f64 },

    #[error("Mismatched date axis: {0}")]
    MismatchedAxis(String),

    #[error("No downturn found in series; cannot derive an initial phase")]
    NoDownturnFound,

    #[error("Fit did not converge after {iterations} iterations: {reason}")]
    FitDidNotConverge { iterations: usize, reason: String },

    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),
}

/// Result type for InSAR post-processing operations
pub type InsarResult<T> = Result<T, InsarError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_polygon_requires_three_vertices() {
        let result = Polygon::new(vec![(0.0, 0.0), (1.0, 0.0)]);
        assert!(matches!(result, Err(InsarError::DegenerateGeometry(_))));
        assert!(Polygon::new(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)]).is_ok());
    }

    #[test]
    fn test_time_series_rejects_unordered_dates() {
        let result = TimeSeries::new(vec![day(2018, 1, 2), day(2018, 1, 1)], vec![0.0, 1.0]);
        assert!(matches!(result, Err(InsarError::InvalidFormat(_))));

        let result = TimeSeries::new(vec![day(2018, 1, 1)], vec![0.0, 1.0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_day_offsets() {
        let series = TimeSeries::new(
            vec![day(2018, 1, 1), day(2018, 1, 13), day(2018, 2, 1)],
            vec![1.0, 2.0, 3.0],
        )
        .unwrap();
        assert_eq!(series.day_offsets(), vec![0.0, 12.0, 31.0]);
        assert_eq!(series.scaled(2.0).values, vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_dataset_axis_validation() {
        let columns = vec!["20180101".to_string(), "20180113".to_string()];
        let bad = vec![PointRecord { latitude: 36.0, longitude: -119.0, values: vec![1.0] }];
        assert!(matches!(
            PointCloudDataset::new(columns, bad),
            Err(InsarError::MismatchedAxis(_))
        ));
    }
}
