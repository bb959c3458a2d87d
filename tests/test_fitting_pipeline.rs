use approx::assert_relative_eq;
use chrono::{Duration, NaiveDate};
use insarpost::core::{detrend, rezero_at_month, SinusoidBounds};
use insarpost::{
    CurveFitter, DateColumns, FitModel, FitParams, FitResult, InsarError, PointCloudDataset,
    PointRecord, SeriesExtractor, SeriesParams, TimeSeries, FEET_TO_MM,
};
use std::f64::consts::PI;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2018, 1, 1).unwrap()
}

/// Pixels sampled every 12 days for two years around an annual cycle,
/// with per-pixel offsets of -1, 0 and +1
fn seasonal_dataset() -> PointCloudDataset {
    let dates: Vec<NaiveDate> = (0..61).map(|k| start_date() + Duration::days(12 * k)).collect();
    let mut columns = vec!["ID".to_string()];
    columns.extend(dates.iter().map(|d| d.format("%Y%m%d").to_string()));

    let records = (0..3)
        .map(|id| {
            let offset = id as f64 - 1.0;
            let mut values = vec![id as f64];
            values.extend(dates.iter().map(|d| {
                let t = (*d - start_date()).num_days() as f64;
                10.0 * (2.0 * PI * t / 365.0).sin() + 20.0 + offset
            }));
            PointRecord {
                latitude: 36.2 + 0.001 * id as f64,
                longitude: -119.7,
                values,
            }
        })
        .collect();

    PointCloudDataset::new(columns, records).unwrap()
}

#[test]
fn test_median_series_sinusoid_fit() {
    init_logging();

    let aggregate = SeriesExtractor::standard()
        .median_series(&seasonal_dataset())
        .unwrap();
    assert_eq!(aggregate.count, 3);
    assert_relative_eq!(aggregate.series.values[0], 20.0, epsilon = 1e-9);

    match CurveFitter::standard().fit_sinusoid(&aggregate.series).unwrap() {
        FitResult::SinusoidalFit { amplitude, period, mean, rmse, .. } => {
            assert_relative_eq!(amplitude, 10.0, epsilon = 0.1);
            assert_relative_eq!(period, 365.0, epsilon = 1.0);
            assert_relative_eq!(mean, 20.0, epsilon = 0.1);
            assert!(rmse < 0.1);
        }
        other => panic!("expected a sinusoidal fit, got {:?}", other),
    }
}

#[test]
fn test_fit_many_over_pixels() {
    init_logging();

    let dataset = seasonal_dataset();
    let extractor = SeriesExtractor::standard();
    let series: Vec<TimeSeries> = (0..dataset.len())
        .map(|i| extractor.extract(&dataset, i).unwrap())
        .collect();

    let results = CurveFitter::standard().fit_many(&series, FitModel::Sinusoidal);
    assert_eq!(results.len(), 3);
    for (i, result) in results.iter().enumerate() {
        match result {
            Ok(FitResult::SinusoidalFit { mean, .. }) => {
                assert_relative_eq!(*mean, 19.0 + i as f64, epsilon = 0.1);
            }
            other => panic!("pixel {} did not fit: {:?}", i, other),
        }
    }
}

#[test]
fn test_explicit_date_column_and_unit_scaling() {
    init_logging();

    let dataset = seasonal_dataset();
    let params = SeriesParams {
        date_columns: DateColumns::Key("20180101".to_string()),
        scale_factor: FEET_TO_MM,
        ..SeriesParams::default()
    };
    let series = SeriesExtractor::new(params).extract(&dataset, 1).unwrap();
    assert_eq!(series.len(), 61);
    assert_relative_eq!(series.values[0], 20.0 * FEET_TO_MM, epsilon = 1e-6);

    let rezeroed = rezero_at_month(&series, "Jan-2018").unwrap();
    assert_eq!(rezeroed.values[0], 0.0);
    assert!(matches!(
        rezero_at_month(&series, "Smarch-2018"),
        Err(InsarError::DateParse(_))
    ));
}

#[test]
fn test_subsiding_series_has_no_downturn() {
    init_logging();

    // Monotonic uplift never turns over, so no phase guess exists
    let dates: Vec<NaiveDate> = (0..30).map(|k| start_date() + Duration::days(12 * k)).collect();
    let values: Vec<f64> = (0..30).map(|k| 0.5 * k as f64).collect();
    let series = TimeSeries::new(dates, values).unwrap();

    assert!(matches!(
        CurveFitter::standard().fit(&series, FitModel::Sinusoidal),
        Err(InsarError::NoDownturnFound)
    ));

    // The trend is still recoverable, and detrending flattens it
    match CurveFitter::standard().fit(&series, FitModel::Linear).unwrap() {
        FitResult::LinearFit { slope, .. } => assert_relative_eq!(slope, 0.5 / 12.0, epsilon = 1e-6),
        other => panic!("expected a linear fit, got {:?}", other),
    }
    assert!(detrend(&series).values.iter().all(|v| v.abs() < 1e-9));
}

#[test]
fn test_tight_bounds_pin_parameters() {
    init_logging();

    let params = FitParams {
        sinusoid_bounds: SinusoidBounds {
            amplitude: (0.0, 5.0),
            ..SinusoidBounds::default()
        },
        ..FitParams::default()
    };
    let aggregate = SeriesExtractor::standard()
        .median_series(&seasonal_dataset())
        .unwrap();

    match CurveFitter::new(params).fit_sinusoid(&aggregate.series).unwrap() {
        FitResult::SinusoidalFit { amplitude, .. } => assert!(amplitude <= 5.0),
        other => panic!("expected a sinusoidal fit, got {:?}", other),
    }
}
