//! Core subsetting, extraction and fitting modules

pub mod geometry;
pub mod line_segment;
pub mod subset;
pub mod series;
pub mod fitting;

// Re-export main types
pub use geometry::{geodesic_distance_meters, point_in_polygon, contains_points, points_in_polygon};
pub use line_segment::{LineSegmenter, SegmentParams, BoxSegmentation, segment_line_to_boxes};
pub use subset::{filter_by_polygon, extract_from_polygon, nearest_record, extract_from_boxes, remove_all_zero_rows, NearestParams, NearestMatch};
pub use series::{SeriesExtractor, SeriesParams, DateColumns, DateAxis, AggregateSeries, rezero, rezero_at_month, detrend};
pub use fitting::{CurveFitter, FitParams, FitModel, SinusoidBounds};
