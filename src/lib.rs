//! insarpost: post-processing for InSAR ground-deformation point clouds
//!
//! Subsets point clouds by polygon or along a transect, extracts per-pixel
//! and aggregate displacement time series, and fits linear trends and
//! seasonal sinusoids to them. Results are plain in-memory values meant to
//! be handed on to plotting and reporting code.

pub mod types;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    PointCloudDataset, PointRecord, Polygon, Transect, SamplingBox, TimeSeries, FitResult,
    LatLon, InsarError, InsarResult, FEET_TO_MM
};

pub use core::{
    CurveFitter, FitModel, FitParams, LineSegmenter, SegmentParams, SeriesExtractor, SeriesParams,
    NearestParams, DateColumns
};
