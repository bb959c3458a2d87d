use crate::core::line_segment::BoxSegmentation;
use crate::core::subset::{extract_from_boxes, nearest_record, NearestParams};
use crate::types::{InsarError, InsarResult, PointCloudDataset, TimeSeries};
use chrono::NaiveDate;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Label prefix marking the first acquisition-date column in portal exports.
/// Specific to datasets whose dates all fall in the 2000s.
pub const LEGACY_DATE_PREFIX: &str = "20";

/// Format of acquisition-date column labels
pub const DEFAULT_DATE_FORMAT: &str = "%Y%m%d";

/// How to locate the first date column; every column from there on is a date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateColumns {
    /// Position within `PointCloudDataset::columns`
    Index(usize),
    /// Exact column label
    Key(String),
    /// First label starting with `LEGACY_DATE_PREFIX`
    LegacyPrefix,
}

impl Default for DateColumns {
    fn default() -> Self {
        DateColumns::LegacyPrefix
    }
}

/// Series extraction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesParams {
    pub date_columns: DateColumns,
    /// Applied to every extracted value (e.g. LOS to vertical, or `FEET_TO_MM`)
    pub scale_factor: f64,
    /// chrono format of the date column labels
    pub date_format: String,
    /// Remove each record's linear trend before mean/median reduction
    pub detrend_records: bool,
}

impl Default for SeriesParams {
    fn default() -> Self {
        Self {
            date_columns: DateColumns::LegacyPrefix,
            scale_factor: 1.0,
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            detrend_records: false,
        }
    }
}

/// Resolved date axis of a dataset
#[derive(Debug, Clone, PartialEq)]
pub struct DateAxis {
    /// Index of the first date column
    pub first_index: usize,
    pub dates: Vec<NaiveDate>,
}

/// Series reduced across several records
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSeries {
    pub series: TimeSeries,
    /// Number of records reduced
    pub count: usize,
}

/// Locate and parse the date columns of a dataset
pub fn resolve_date_axis(
    columns: &[String],
    date_columns: &DateColumns,
    date_format: &str,
) -> InsarResult<DateAxis> {
    let first_index = match date_columns {
        DateColumns::Index(i) => {
            if *i >= columns.len() {
                return Err(InsarError::InvalidFormat(format!(
                    "date column index {} out of range for {} columns",
                    i,
                    columns.len()
                )));
            }
            *i
        }
        DateColumns::Key(key) => columns.iter().position(|c| c == key).ok_or_else(|| {
            InsarError::InvalidFormat(format!("date column '{}' not found", key))
        })?,
        DateColumns::LegacyPrefix => columns
            .iter()
            .position(|c| c.starts_with(LEGACY_DATE_PREFIX))
            .ok_or_else(|| {
                InsarError::InvalidFormat(format!(
                    "no column label starts with '{}'",
                    LEGACY_DATE_PREFIX
                ))
            })?,
    };
    log::debug!("First date is found in column {}", first_index);

    let dates = columns[first_index..]
        .iter()
        .map(|label| {
            NaiveDate::parse_from_str(label.trim(), date_format).map_err(|e| {
                InsarError::DateParse(format!("column '{}' with format '{}': {}", label, date_format, e))
            })
        })
        .collect::<InsarResult<Vec<_>>>()?;

    Ok(DateAxis { first_index, dates })
}

/// Turns dataset rows into dated series
pub struct SeriesExtractor {
    params: SeriesParams,
}

impl SeriesExtractor {
    pub fn new(params: SeriesParams) -> Self {
        Self { params }
    }

    /// Extractor using the legacy date-column heuristic and no scaling
    pub fn standard() -> Self {
        Self::new(SeriesParams::default())
    }

    pub fn params(&self) -> &SeriesParams {
        &self.params
    }

    pub fn date_axis(&self, dataset: &PointCloudDataset) -> InsarResult<DateAxis> {
        resolve_date_axis(&dataset.columns, &self.params.date_columns, &self.params.date_format)
    }

    /// Series of the record at `index`
    pub fn extract(&self, dataset: &PointCloudDataset, index: usize) -> InsarResult<TimeSeries> {
        let record = dataset.records.get(index).ok_or_else(|| {
            InsarError::InvalidFormat(format!(
                "record index {} out of range for {} records",
                index,
                dataset.len()
            ))
        })?;
        if record.values.len() != dataset.columns.len() {
            return Err(InsarError::MismatchedAxis(format!(
                "record {} has {} values but the dataset has {} columns",
                index,
                record.values.len(),
                dataset.columns.len()
            )));
        }

        let axis = self.date_axis(dataset)?;
        let values = record.values[axis.first_index..]
            .iter()
            .map(|v| v * self.params.scale_factor)
            .collect();
        TimeSeries::new(axis.dates, values)
    }

    /// Series of the pixel nearest to (lat, lon)
    pub fn extract_nearest(
        &self,
        dataset: &PointCloudDataset,
        lat: f64,
        lon: f64,
        nearest: &NearestParams,
    ) -> InsarResult<TimeSeries> {
        let found = nearest_record(dataset, lat, lon, nearest)?;
        self.extract(dataset, found.index)
    }

    /// Pointwise arithmetic mean across all records
    pub fn mean_series(&self, dataset: &PointCloudDataset) -> InsarResult<AggregateSeries> {
        self.aggregate(dataset, mean_columns)
    }

    /// Pointwise median across all records
    pub fn median_series(&self, dataset: &PointCloudDataset) -> InsarResult<AggregateSeries> {
        self.aggregate(dataset, median_columns)
    }

    /// Mean series of every box along a transect, `None` for boxes with no pixels
    pub fn transect_profile(
        &self,
        dataset: &PointCloudDataset,
        segmentation: &BoxSegmentation,
    ) -> InsarResult<Vec<Option<AggregateSeries>>> {
        let subsets = extract_from_boxes(dataset, segmentation)?;
        log::info!("Building transect profile over {} boxes", subsets.len());
        subsets
            .iter()
            .map(|subset| {
                if subset.is_empty() {
                    Ok(None)
                } else {
                    self.mean_series(subset).map(Some)
                }
            })
            .collect()
    }

    fn aggregate(
        &self,
        dataset: &PointCloudDataset,
        reduce: fn(ArrayView2<'_, f64>) -> Option<Array1<f64>>,
    ) -> InsarResult<AggregateSeries> {
        if dataset.is_empty() {
            return Err(InsarError::EmptyDataset);
        }
        dataset.validate_axis()?;

        let axis = self.date_axis(dataset)?;
        let block = self.date_block(dataset, axis.first_index)?;
        let reduced = reduce(block.view()).ok_or(InsarError::EmptyDataset)?;
        let values = reduced.iter().map(|v| v * self.params.scale_factor).collect();

        Ok(AggregateSeries {
            series: TimeSeries::new(axis.dates, values)?,
            count: dataset.len(),
        })
    }

    /// Records x dates matrix of the date columns
    fn date_block(&self, dataset: &PointCloudDataset, first_index: usize) -> InsarResult<Array2<f64>> {
        let num_dates = dataset.columns.len() - first_index;
        if self.params.detrend_records {
            log::debug!("Detrending {} records before reduction", dataset.len());
        }

        let mut flat = Vec::with_capacity(dataset.len() * num_dates);
        for record in &dataset.records {
            let row = &record.values[first_index..];
            if self.params.detrend_records {
                flat.extend(linear_residuals(row));
            } else {
                flat.extend_from_slice(row);
            }
        }

        Array2::from_shape_vec((dataset.len(), num_dates), flat)
            .map_err(|e| InsarError::MismatchedAxis(e.to_string()))
    }
}

fn mean_columns(block: ArrayView2<'_, f64>) -> Option<Array1<f64>> {
    block.mean_axis(Axis(0))
}

fn median_columns(block: ArrayView2<'_, f64>) -> Option<Array1<f64>> {
    if block.nrows() == 0 {
        return None;
    }
    Some(
        block
            .axis_iter(Axis(1))
            .map(|column| median(&mut column.to_vec()))
            .collect(),
    )
}

/// Median of a non-empty slice; NaN if any element is NaN
fn median(values: &mut [f64]) -> f64 {
    if values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}

/// Shift a series so it is zero at the date nearest `reference`.
///
/// The first of several equally near dates is used.
pub fn rezero(series: &TimeSeries, reference: NaiveDate) -> TimeSeries {
    let nearest = series
        .dates
        .iter()
        .enumerate()
        .min_by_key(|(_, d)| (**d - reference).num_days().abs())
        .map(|(i, _)| i);

    match nearest {
        Some(idx) => {
            let offset = series.values[idx];
            log::debug!("Rezeroing series at {} (offset {})", series.dates[idx], offset);
            TimeSeries {
                dates: series.dates.clone(),
                values: series.values.iter().map(|v| v - offset).collect(),
            }
        }
        None => series.clone(),
    }
}

/// `rezero` at the first day of a month given as e.g. `Jan-2018`
pub fn rezero_at_month(series: &TimeSeries, month: &str) -> InsarResult<TimeSeries> {
    let reference = NaiveDate::parse_from_str(&format!("01-{}", month.trim()), "%d-%b-%Y")
        .map_err(|e| InsarError::DateParse(format!("month '{}': {}", month, e)))?;
    Ok(rezero(series, reference))
}

/// Remove the least-squares straight line fitted against sample index
pub fn detrend(series: &TimeSeries) -> TimeSeries {
    TimeSeries {
        dates: series.dates.clone(),
        values: linear_residuals(&series.values),
    }
}

/// Residuals of `values` about their least-squares line over sample index
fn linear_residuals(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n < 2 {
        return vec![0.0; n];
    }

    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / nf;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }
    let slope = sxy / sxx;

    values
        .iter()
        .enumerate()
        .map(|(i, y)| y - (mean_y + slope * (i as f64 - mean_x)))
        .collect()
}
