use crate::types::{InsarError, InsarResult, Polygon, Transect};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::path::Path;

/// Read the first line drawn in a KML file (e.g. exported from Google Earth).
///
/// Only the first two nodes of the first LineString are used.
pub fn read_kml_line<P: AsRef<Path>>(path: P) -> InsarResult<Transect> {
    log::info!("Reading KML line from: {}", path.as_ref().display());
    let xml = std::fs::read_to_string(path)?;
    parse_kml_line(&xml)
}

/// Read the outer ring of the first polygon in a KML file
pub fn read_kml_polygon<P: AsRef<Path>>(path: P) -> InsarResult<Polygon> {
    log::info!("Reading KML polygon from: {}", path.as_ref().display());
    let xml = std::fs::read_to_string(path)?;
    parse_kml_polygon(&xml)
}

pub fn parse_kml_line(xml: &str) -> InsarResult<Transect> {
    let nodes = first_coordinates(xml, b"LineString")?
        .ok_or_else(|| InsarError::InvalidFormat("no LineString found in KML".to_string()))?;
    if nodes.len() < 2 {
        return Err(InsarError::InvalidFormat(format!(
            "LineString has {} nodes, need at least 2",
            nodes.len()
        )));
    }
    if nodes.len() > 2 {
        log::debug!("LineString has {} nodes; using the first two", nodes.len());
    }
    let (lon0, lat0) = nodes[0];
    let (lon1, lat1) = nodes[1];
    Ok(Transect::new(lon0, lat0, lon1, lat1))
}

pub fn parse_kml_polygon(xml: &str) -> InsarResult<Polygon> {
    let ring = first_coordinates(xml, b"outerBoundaryIs")?
        .ok_or_else(|| InsarError::InvalidFormat("no Polygon outer boundary found in KML".to_string()))?;
    log::debug!("Polygon outer ring has {} vertices", ring.len());
    Polygon::new(ring)
}

/// Text of the first `<coordinates>` element nested anywhere below `parent`
fn first_coordinates(xml: &str, parent: &[u8]) -> InsarResult<Option<Vec<(f64, f64)>>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<Vec<u8>> = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(e.local_name().as_ref().to_vec()),
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(text)) => {
                let in_coordinates = stack.last().map(|n| n.as_slice()) == Some(&b"coordinates"[..]);
                if in_coordinates && stack.iter().any(|n| n.as_slice() == parent) {
                    let text = text
                        .unescape()
                        .map_err(|e| InsarError::XmlParsing(e.to_string()))?;
                    return parse_coordinates(&text).map(Some);
                }
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => {
                return Err(InsarError::XmlParsing(format!(
                    "error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }
}

/// Parse whitespace-separated `lon,lat[,alt]` tuples
fn parse_coordinates(text: &str) -> InsarResult<Vec<(f64, f64)>> {
    text.split_whitespace()
        .map(|tuple| {
            let mut parts = tuple.split(',');
            let lon = parts.next().and_then(|s| s.parse::<f64>().ok());
            let lat = parts.next().and_then(|s| s.parse::<f64>().ok());
            match (lon, lat) {
                (Some(lon), Some(lat)) => Ok((lon, lat)),
                _ => Err(InsarError::InvalidFormat(format!(
                    "invalid KML coordinate tuple '{}'",
                    tuple
                ))),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE_KML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <name>transect.kml</name>
    <Placemark>
      <name>Corcoran transect</name>
      <LineString>
        <tessellate>1</tessellate>
        <coordinates>
          -119.8,36.2,0 -119.3,36.4,0 -119.1,36.5,0
        </coordinates>
      </LineString>
    </Placemark>
  </Document>
</kml>"#;

    const POLYGON_KML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <Folder>
      <Placemark>
        <Point><coordinates>-120.0,35.0,0</coordinates></Point>
      </Placemark>
      <Placemark>
        <Polygon>
          <outerBoundaryIs>
            <LinearRing>
              <coordinates>-119.9,36.1,0 -119.5,36.1,0 -119.5,36.4,0 -119.9,36.4,0 -119.9,36.1,0</coordinates>
            </LinearRing>
          </outerBoundaryIs>
        </Polygon>
      </Placemark>
    </Folder>
  </Document>
</kml>"#;

    #[test]
    fn test_parse_line_uses_first_two_nodes() {
        let transect = parse_kml_line(LINE_KML).unwrap();
        assert_eq!(transect, Transect::new(-119.8, 36.2, -119.3, 36.4));
    }

    #[test]
    fn test_parse_polygon_skips_points() {
        let polygon = parse_kml_polygon(POLYGON_KML).unwrap();
        assert_eq!(polygon.vertices().len(), 5);
        assert_eq!(polygon.vertices()[0], (-119.9, 36.1));
        assert!(polygon.contains(-119.7, 36.25));
    }

    #[test]
    fn test_missing_geometry() {
        assert!(parse_kml_polygon(LINE_KML).is_err());
        assert!(parse_kml_line(POLYGON_KML).is_err());
    }

    #[test]
    fn test_bad_coordinates() {
        assert!(parse_coordinates("-119.8,abc,0").is_err());
        assert_eq!(parse_coordinates("1,2 3,4,5").unwrap(), vec![(1.0, 2.0), (3.0, 4.0)]);
    }
}
