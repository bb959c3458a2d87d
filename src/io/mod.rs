//! I/O modules for importing InSAR point clouds and geometry, and exporting series

pub mod insar_csv;
pub mod kml;

pub use insar_csv::{read_insar_csv, write_series_csv};
pub use kml::{read_kml_line, read_kml_polygon};
