//! Python bindings, built with the `python` feature
//!
//! Dates cross the boundary as day numbers (days since 1970-01-01, as
//! produced by matplotlib's `date2num`); fractional days are rounded.

use crate::core::{fitting::CurveFitter, line_segment, series};
use crate::types::{FitResult, InsarError, LatLon, TimeSeries};
use chrono::{Duration, NaiveDate};
use numpy::{IntoPyArray, PyArray1, PyArray2, PyReadonlyArray1};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

fn to_py_err(e: InsarError) -> PyErr {
    match e {
        InsarError::Io(_) | InsarError::FitDidNotConverge { .. } => {
            PyRuntimeError::new_err(e.to_string())
        }
        _ => PyValueError::new_err(e.to_string()),
    }
}

fn epoch() -> PyResult<NaiveDate> {
    NaiveDate::from_ymd_opt(1970, 1, 1).ok_or_else(|| PyRuntimeError::new_err("invalid epoch"))
}

fn series_from_arrays(
    values: &PyReadonlyArray1<f64>,
    dates: &PyReadonlyArray1<f64>,
) -> PyResult<TimeSeries> {
    let values = values
        .as_slice()
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    let dates = dates
        .as_slice()
        .map_err(|e| PyValueError::new_err(e.to_string()))?;

    let epoch = epoch()?;
    let dates = dates
        .iter()
        .map(|d| epoch + Duration::days(d.round() as i64))
        .collect();
    TimeSeries::new(dates, values.to_vec()).map_err(to_py_err)
}

/// Geodesic distance in metres between two (lat, lon) points
#[pyfunction]
fn geodesic_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    crate::core::geodesic_distance_meters(LatLon::new(lat1, lon1), LatLon::new(lat2, lon2))
}

/// Returns (boxes_x, boxes_y, lats, lons) for a line from (x0, y0) to (x1, y1)
#[pyfunction]
fn segment_line_to_boxes<'py>(
    py: Python<'py>,
    x0: f64,
    x1: f64,
    y0: f64,
    y1: f64,
    spacing: f64,
    width: f64,
) -> PyResult<(
    &'py PyArray2<f64>,
    &'py PyArray2<f64>,
    &'py PyArray1<f64>,
    &'py PyArray1<f64>,
)> {
    let segmentation =
        line_segment::segment_line_to_boxes(x0, y0, x1, y1, spacing, width).map_err(to_py_err)?;
    Ok((
        segmentation.boxes_x.into_pyarray(py),
        segmentation.boxes_y.into_pyarray(py),
        segmentation.lats.into_pyarray(py),
        segmentation.lons.into_pyarray(py),
    ))
}

/// Returns (misfit, slope, intercept)
#[pyfunction]
fn fit_straight_line_to_series(
    series: PyReadonlyArray1<f64>,
    dates: PyReadonlyArray1<f64>,
) -> PyResult<(f64, f64, f64)> {
    let series = series_from_arrays(&series, &dates)?;
    match CurveFitter::standard().fit_linear(&series).map_err(to_py_err)? {
        FitResult::LinearFit { slope, intercept, misfit, .. } => Ok((misfit, slope, intercept)),
        _ => Err(PyRuntimeError::new_err("unexpected fit kind")),
    }
}

/// Returns (misfit, amplitude, period, phase, mean)
#[pyfunction]
fn fit_sinusoid_to_series(
    series: PyReadonlyArray1<f64>,
    dates: PyReadonlyArray1<f64>,
) -> PyResult<(f64, f64, f64, f64, f64)> {
    let series = series_from_arrays(&series, &dates)?;
    match CurveFitter::standard().fit_sinusoid(&series).map_err(to_py_err)? {
        FitResult::SinusoidalFit { amplitude, period, phase, mean, misfit, .. } => {
            Ok((misfit, amplitude, period, phase, mean))
        }
        _ => Err(PyRuntimeError::new_err("unexpected fit kind")),
    }
}

/// Series shifted to zero at the date nearest `zero_date` (a day number)
#[pyfunction]
fn rezero_series<'py>(
    py: Python<'py>,
    series: PyReadonlyArray1<f64>,
    dates: PyReadonlyArray1<f64>,
    zero_date: f64,
) -> PyResult<&'py PyArray1<f64>> {
    let series = series_from_arrays(&series, &dates)?;
    let reference = epoch()? + Duration::days(zero_date.round() as i64);
    Ok(series::rezero(&series, reference).values.into_pyarray(py))
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(geodesic_distance, m)?)?;
    m.add_function(wrap_pyfunction!(segment_line_to_boxes, m)?)?;
    m.add_function(wrap_pyfunction!(fit_straight_line_to_series, m)?)?;
    m.add_function(wrap_pyfunction!(fit_sinusoid_to_series, m)?)?;
    m.add_function(wrap_pyfunction!(rezero_series, m)?)?;
    Ok(())
}
