use crate::core::geometry::geodesic_distance_meters;
use crate::types::{InsarError, InsarResult, LatLon, SamplingBox, Transect};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Parameters for cutting a transect into sampling boxes
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SegmentParams {
    /// Distance between consecutive sample points in metres
    pub spacing: f64,
    /// Half-width of each box either side of the line, in metres
    pub width: f64,
}

impl Default for SegmentParams {
    fn default() -> Self {
        Self {
            spacing: 1000.0, // 1 km boxes
            width: 500.0,
        }
    }
}

/// Boxes laid along a transect.
///
/// Row `i` of `boxes_x`/`boxes_y` is the closed 5-point ring of box `i`
/// (longitudes and latitudes respectively). `lats`/`lons` are the sample
/// points the boxes were cut between, ordered from the transect start.
#[derive(Debug, Clone)]
pub struct BoxSegmentation {
    pub boxes_x: Array2<f64>,
    pub boxes_y: Array2<f64>,
    pub lats: Vec<f64>,
    pub lons: Vec<f64>,
}

impl BoxSegmentation {
    pub fn num_boxes(&self) -> usize {
        self.boxes_x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.num_boxes() == 0
    }

    /// Label position of box `i`, halfway between its two sample points
    pub fn centerpoint(&self, i: usize) -> Option<LatLon> {
        if i + 1 >= self.lats.len() {
            return None;
        }
        Some(LatLon::new(
            self.lats[i] + 0.5 * (self.lats[i + 1] - self.lats[i]),
            self.lons[i] + 0.5 * (self.lons[i + 1] - self.lons[i]),
        ))
    }

    /// Boxes as standalone records, index 0 at the transect start
    pub fn boxes(&self) -> Vec<SamplingBox> {
        (0..self.num_boxes())
            .filter_map(|i| {
                let center = self.centerpoint(i)?;
                let mut ring = [(0.0, 0.0); 5];
                for (k, corner) in ring.iter_mut().enumerate() {
                    *corner = (self.boxes_x[[i, k]], self.boxes_y[[i, k]]);
                }
                Some(SamplingBox { index: i, ring, center })
            })
            .collect()
    }
}

/// Cuts transects into equally spaced rectangular sampling boxes
pub struct LineSegmenter {
    params: SegmentParams,
}

impl LineSegmenter {
    pub fn new(params: SegmentParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SegmentParams {
        &self.params
    }

    /// Segment a transect into boxes.
    ///
    /// The line is sampled at `floor(L / spacing)` points, `L` being its
    /// geodesic length; consecutive sample points bound one box, so a line
    /// yielding fewer than two points produces no boxes. Sample points are
    /// interpolated linearly in degree space.
    ///
    /// The perpendicular offset is a degree-space vector scaled by the
    /// geodesic length of that same vector read as a (lat, lon) displacement
    /// from the origin, which makes `width` act as metres. This mixes units
    /// and is only a regional approximation; existing box outputs depend on
    /// it, so it is kept as is.
    pub fn segment(&self, transect: &Transect) -> InsarResult<BoxSegmentation> {
        let SegmentParams { spacing, width } = self.params;
        if !(spacing.is_finite() && spacing > 0.0) {
            return Err(InsarError::InvalidFormat(format!(
                "box spacing must be positive, got {}",
                spacing
            )));
        }
        if !(width.is_finite() && width >= 0.0) {
            return Err(InsarError::InvalidFormat(format!(
                "box width must be non-negative, got {}",
                width
            )));
        }

        let length = geodesic_distance_meters(transect.start(), transect.end());
        let num_points = (length / spacing).floor() as usize;
        log::info!(
            "Segmenting {:.1} m transect into {} m boxes ({} sample points)",
            length,
            spacing,
            num_points
        );

        let lats = linspace(transect.lat0, transect.lat1, num_points);
        let lons = linspace(transect.lon0, transect.lon1, num_points);

        if num_points < 2 {
            log::warn!(
                "Transect of {:.1} m is shorter than two box spacings; no boxes generated",
                length
            );
            return Ok(BoxSegmentation {
                boxes_x: Array2::zeros((0, 5)),
                boxes_y: Array2::zeros((0, 5)),
                lats,
                lons,
            });
        }

        let (ux, uy) = unit_normal(transect);
        log::debug!("Unit normal (deg/m): ({:.3e}, {:.3e})", ux, uy);

        let num_boxes = num_points - 1;
        let mut boxes_x = Array2::<f64>::zeros((num_boxes, 5));
        let mut boxes_y = Array2::<f64>::zeros((num_boxes, 5));

        for i in 0..num_boxes {
            let top_right = (lons[i] - ux * width, lats[i] - uy * width);
            let top_left = (lons[i + 1] - ux * width, lats[i + 1] - uy * width);
            let bot_right = (lons[i] + ux * width, lats[i] + uy * width);
            let bot_left = (lons[i + 1] + ux * width, lats[i + 1] + uy * width);

            let ring = [top_right, top_left, bot_left, bot_right, top_right];
            for (k, (x, y)) in ring.iter().enumerate() {
                boxes_x[[i, k]] = *x;
                boxes_y[[i, k]] = *y;
            }
        }

        Ok(BoxSegmentation { boxes_x, boxes_y, lats, lons })
    }
}

/// Convenience wrapper taking the line endpoints and box sizes directly
pub fn segment_line_to_boxes(
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
    spacing: f64,
    width: f64,
) -> InsarResult<BoxSegmentation> {
    LineSegmenter::new(SegmentParams { spacing, width }).segment(&Transect::new(x0, y0, x1, y1))
}

/// Perpendicular to the transect, in degrees per metre
fn unit_normal(transect: &Transect) -> (f64, f64) {
    let line = (transect.lon1 - transect.lon0, transect.lat1 - transect.lat0);
    let perp = (-line.1, line.0);
    let norm_len = geodesic_distance_meters(LatLon::new(0.0, 0.0), LatLon::new(perp.0, perp.1));
    (perp.0 / norm_len, perp.1 / norm_len)
}

fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num)
                .map(|i| if i == num - 1 { stop } else { start + step * i as f64 })
                .collect()
        }
    }
}
