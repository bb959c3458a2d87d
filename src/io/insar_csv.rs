use crate::types::{InsarError, InsarResult, PointCloudDataset, PointRecord, TimeSeries};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Canonical label of the latitude column
pub const LATITUDE_COLUMN: &str = "Latitude";
/// Canonical label of the longitude column
pub const LONGITUDE_COLUMN: &str = "Longitude";

/// Read a portal CSV export into a point cloud
pub fn read_insar_csv<P: AsRef<Path>>(path: P) -> InsarResult<PointCloudDataset> {
    let path = path.as_ref();
    log::info!("Importing InSAR data from: {}", path.display());
    let file = File::open(path)?;
    log::debug!("File size: {} bytes", file.metadata()?.len());
    read_insar_csv_from_reader(file)
}

/// Parse portal CSV from any reader.
///
/// Header whitespace is trimmed and the coordinate columns are normalised:
/// `X`/`longitude` become `Longitude`, `Y`/`latitude` become `Latitude`.
/// Every other column is kept, in file order, as a numeric value column;
/// cells that do not parse as numbers are stored as NaN.
pub fn read_insar_csv_from_reader<R: Read>(reader: R) -> InsarResult<PointCloudDataset> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(canonical_column).collect();
    let lat_idx = column_index(&headers, LATITUDE_COLUMN)?;
    let lon_idx = column_index(&headers, LONGITUDE_COLUMN)?;

    let value_idx: Vec<usize> = (0..headers.len())
        .filter(|&i| i != lat_idx && i != lon_idx)
        .collect();
    let columns: Vec<String> = value_idx.iter().map(|&i| headers[i].clone()).collect();

    let mut records = Vec::new();
    let mut unparsed = 0usize;
    for (row, result) in rdr.records().enumerate() {
        let record = result?;
        let latitude = parse_coordinate(&record, lat_idx, row)?;
        let longitude = parse_coordinate(&record, lon_idx, row)?;

        let values = value_idx
            .iter()
            .map(|&i| match record.get(i).and_then(|cell| cell.parse::<f64>().ok()) {
                Some(v) => v,
                None => {
                    unparsed += 1;
                    f64::NAN
                }
            })
            .collect();

        records.push(PointRecord { latitude, longitude, values });
    }

    if unparsed > 0 {
        log::debug!("{} non-numeric cells stored as NaN", unparsed);
    }
    log::info!(
        "Successfully imported data of size {}x{}",
        records.len(),
        headers.len()
    );

    PointCloudDataset::new(columns, records)
}

/// Write a series as `Date,Value` rows, dates as `YYYY-MM-DD`
pub fn write_series_csv<P: AsRef<Path>>(path: P, series: &TimeSeries) -> InsarResult<()> {
    let file = File::create(path.as_ref())?;
    write_series_csv_to_writer(file, series)?;
    log::info!("Wrote {} samples to {}", series.len(), path.as_ref().display());
    Ok(())
}

pub fn write_series_csv_to_writer<W: Write>(writer: W, series: &TimeSeries) -> InsarResult<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["Date", "Value"])?;
    for (date, value) in series.dates.iter().zip(&series.values) {
        wtr.write_record(&[date.format("%Y-%m-%d").to_string(), value.to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}

fn canonical_column(label: &str) -> String {
    match label.trim() {
        "X" | "longitude" => LONGITUDE_COLUMN.to_string(),
        "Y" | "latitude" => LATITUDE_COLUMN.to_string(),
        other => other.to_string(),
    }
}

fn column_index(headers: &[String], name: &str) -> InsarResult<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| InsarError::InvalidFormat(format!("missing '{}' column", name)))
}

fn parse_coordinate(record: &csv::StringRecord, idx: usize, row: usize) -> InsarResult<f64> {
    let cell = record.get(idx).unwrap_or("");
    cell.parse::<f64>().map_err(|_| {
        InsarError::InvalidFormat(format!("row {}: invalid coordinate '{}'", row + 1, cell))
    })
}
