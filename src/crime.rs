//! An immutable set of crime-point coordinates with a k-nearest-with-distance
//! query, loaded from a tabular (CSV or XLSX) source.

use std::path::Path;

use calamine::{open_workbook_auto, DataType, Reader};
use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::error::RouterError;
use crate::geo::Coordinate;

#[derive(Clone, Copy, Debug)]
struct CrimePoint(Coordinate);

impl RTreeObject for CrimePoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.0.lon, self.0.lat])
    }
}

impl PointDistance for CrimePoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.0.lon - point[0];
        let dy = self.0.lat - point[1];
        dx * dx + dy * dy
    }
}

/// A crime point paired with its great-circle distance from a query point.
#[derive(Clone, Copy, Debug)]
pub struct CrimePointDistance {
    pub coord: Coordinate,
    pub distance_m: f64,
}

/// Spatial index over crime-point locations, built once at process start and
/// shared read-only across requests.
pub struct CrimePointIndex {
    rtree: RTree<CrimePoint>,
}

impl CrimePointIndex {
    pub fn new(points: Vec<Coordinate>) -> Self {
        CrimePointIndex {
            rtree: RTree::bulk_load(points.into_iter().map(CrimePoint).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.rtree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.rtree.size() == 0
    }

    /// Returns the `k` crime points nearest to `from`, sorted by ascending
    /// great-circle distance.
    pub fn k_nearest(&self, from: Coordinate, k: usize) -> Vec<CrimePointDistance> {
        let query = [from.lon, from.lat];
        self.rtree
            .nearest_neighbor_iter(&query)
            .take(k)
            .map(|p| CrimePointDistance {
                coord: p.0,
                distance_m: from.haversine_distance(&p.0),
            })
            .collect()
    }

    /// Loads crime points from a CSV or XLSX file with `latitude`/
    /// `longitude` columns. XLSX sheets are merged, matching the "accepts a
    /// single sheet or merges all sheets" contract.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RouterError> {
        let path = path.as_ref();
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);

        let points = if is_csv {
            Self::load_csv(path)?
        } else {
            Self::load_xlsx(path)?
        };
        Ok(Self::new(points))
    }

    fn load_csv(path: &Path) -> Result<Vec<Coordinate>, RouterError> {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| RouterError::InputValidation(format!("cannot open crime CSV: {e}")))?;
        let headers = reader
            .headers()
            .map_err(|e| RouterError::InputValidation(format!("malformed crime CSV: {e}")))?
            .clone();
        let lat_index = column_index(&headers, "latitude")?;
        let lon_index = column_index(&headers, "longitude")?;

        let mut points = Vec::new();
        for record in reader.records() {
            let record =
                record.map_err(|e| RouterError::InputValidation(format!("malformed row: {e}")))?;
            let lat: f64 = record
                .get(lat_index)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| RouterError::InputValidation("invalid latitude".into()))?;
            let lon: f64 = record
                .get(lon_index)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| RouterError::InputValidation("invalid longitude".into()))?;
            points.push(Coordinate::new(lat, lon));
        }
        Ok(points)
    }

    fn load_xlsx(path: &Path) -> Result<Vec<Coordinate>, RouterError> {
        let mut workbook = open_workbook_auto(path)
            .map_err(|e| RouterError::InputValidation(format!("cannot open crime workbook: {e}")))?;

        let mut points = Vec::new();
        for sheet_name in workbook.sheet_names().to_owned() {
            let range = match workbook.worksheet_range(&sheet_name) {
                Ok(range) => range,
                Err(_) => continue,
            };
            let mut rows = range.rows();
            let Some(header_row) = rows.next() else {
                continue;
            };
            let header: Vec<String> = header_row
                .iter()
                .map(|cell| cell.to_string().to_lowercase())
                .collect();
            let Some(lat_index) = header.iter().position(|h| h == "latitude") else {
                continue;
            };
            let Some(lon_index) = header.iter().position(|h| h == "longitude") else {
                continue;
            };

            for row in rows {
                let (Some(lat), Some(lon)) = (row.get(lat_index), row.get(lon_index)) else {
                    continue;
                };
                if let (Some(lat), Some(lon)) = (lat.get_float(), lon.get_float()) {
                    points.push(Coordinate::new(lat, lon));
                }
            }
        }
        Ok(points)
    }
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize, RouterError> {
    headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name))
        .ok_or_else(|| RouterError::InputValidation(format!("missing '{name}' column")))
}
