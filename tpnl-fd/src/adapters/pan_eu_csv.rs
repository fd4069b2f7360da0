//! Pan-European research CSV adapter
//!
//! Input is a semicolon-delimited text table (fields may be quoted) with a
//! header row. Column positions are resolved by fuzzy name matching:
//! case-insensitive substring match on "lat", "lon", "country", "category",
//! "area", "name". Rows with unparseable latitude/longitude are dropped and
//! counted as errors, never fatal.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use tpnl_common::model::{Classification, GeoPoint, SourceKind, SourceRecord};

use super::{AdapterError, DocumentError, ParseOutcome};

#[derive(Debug, Default)]
struct Columns {
    id: Option<usize>,
    lat: Option<usize>,
    lon: Option<usize>,
    country: Option<usize>,
    category: Option<usize>,
    area: Option<usize>,
    name: Option<usize>,
}

/// Parse the CSV table. Fails as a document only when the header row cannot
/// be read or lacks latitude/longitude columns entirely.
pub fn parse(raw: &[u8], fetched_at: DateTime<Utc>) -> Result<ParseOutcome, DocumentError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .from_reader(raw);

    let headers = reader
        .headers()
        .map_err(|e| DocumentError::Csv(e.to_string()))?
        .clone();
    let columns = resolve_columns(&headers);

    let (Some(lat_col), Some(lon_col)) = (columns.lat, columns.lon) else {
        return Err(DocumentError::Csv(format!(
            "no latitude/longitude columns in header: {:?}",
            headers
        )));
    };

    let mut outcome = ParseOutcome::default();

    for (index, row) in reader.records().enumerate() {
        let row_number = index + 1;
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                outcome.errors.push(AdapterError::MalformedRow {
                    row_id: format!("row {}", row_number),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let lat = parse_coordinate(row.get(lat_col));
        let lon = parse_coordinate(row.get(lon_col));
        let (Some(lat), Some(lon)) = (lat, lon) else {
            outcome.errors.push(AdapterError::BadCoordinates {
                row_id: format!("row {}", row_number),
                reason: format!(
                    "lat={:?} lon={:?}",
                    row.get(lat_col).unwrap_or(""),
                    row.get(lon_col).unwrap_or("")
                ),
            });
            continue;
        };

        let field = |col: Option<usize>| -> Option<String> {
            col.and_then(|i| row.get(i))
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let source_id = field(columns.id).unwrap_or_else(|| format!("row_{}", row_number));
        let category = field(columns.category);

        let mut raw_tags = BTreeMap::new();
        if let Some(country) = field(columns.country) {
            raw_tags.insert("country".to_string(), country);
        }
        if let Some(category) = &category {
            raw_tags.insert("category".to_string(), category.clone());
        }

        outcome.records.push(SourceRecord {
            source_id,
            source_kind: SourceKind::PanEuCsv,
            point: Some(GeoPoint::new(lat, lon)),
            polygon: None,
            area_m2: field(columns.area).and_then(|a| a.replace(',', ".").parse().ok()),
            raw_name: field(columns.name),
            raw_capacity: BTreeMap::new(),
            raw_tags,
            classification: classify(category.as_deref()),
            fetched_at,
        });
    }

    Ok(outcome)
}

fn resolve_columns(headers: &csv::StringRecord) -> Columns {
    let mut columns = Columns::default();
    for (index, header) in headers.iter().enumerate() {
        let header = header.trim().to_lowercase();
        // First match wins per target; "lon" is tested before "lat" so a
        // combined "lat/lon" header cannot shadow the longitude column
        if columns.lon.is_none() && header.contains("lon") {
            columns.lon = Some(index);
        } else if columns.lat.is_none() && header.contains("lat") {
            columns.lat = Some(index);
        } else if columns.country.is_none() && header.contains("country") {
            columns.country = Some(index);
        } else if columns.category.is_none() && header.contains("category") {
            columns.category = Some(index);
        } else if columns.area.is_none() && header.contains("area") {
            columns.area = Some(index);
        } else if columns.name.is_none() && header.contains("name") {
            columns.name = Some(index);
        } else if columns.id.is_none() && (header == "id" || header.ends_with("_id") || header.contains("key")) {
            columns.id = Some(index);
        }
    }
    columns
}

fn parse_coordinate(value: Option<&str>) -> Option<f64> {
    // Some national datasets use decimal commas
    let value = value?.trim().replace(',', ".");
    value.parse().ok().filter(|v: &f64| v.is_finite())
}

fn classify(category: Option<&str>) -> Classification {
    let Some(category) = category else {
        return Classification {
            is_truck_parking: true,
            ..Default::default()
        };
    };
    let category = category.to_lowercase();
    Classification {
        is_truck_parking: category.contains("truck") || category.contains("parking"),
        is_rest_area: category.contains("rest"),
        is_service_area: category.contains("service"),
    }
}
