//! DATEX-II static table adapter
//!
//! Input is the facility-table XML publication: nested `parkingRecord`
//! elements carrying a name, a `parkingLocation`/`pointByCoordinates` point,
//! an operator, and `groupOfParkingSpaces` entries with vehicle-type-coded
//! space counts. Counts are summed per vehicle-type code; codes outside the
//! recognized set {lorry, refrigeratedGoods, heavyHaul} accumulate into an
//! `unrecognized` bucket (mapped to the truck bucket downstream) and flag the
//! record unknown-subtype.
//!
//! Namespaces vary between publishers, so all element matching is on local
//! names.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;

use tpnl_common::model::{Classification, GeoPoint, SourceKind, SourceRecord};

use super::{AdapterError, DocumentError, ParseOutcome};

/// Vehicle-type codes this feed is known to use
pub const RECOGNIZED_CODES: [&str; 3] = ["lorry", "refrigeratedGoods", "heavyHaul"];

/// Synthetic capacity key for summed unrecognized vehicle-type codes
pub const UNRECOGNIZED_CODE: &str = "unrecognized";

#[derive(Debug, Default)]
struct RecordBuilder {
    id: Option<String>,
    name: Option<String>,
    latitude: Option<String>,
    longitude: Option<String>,
    operator: Option<String>,
    /// Summed spaces per raw vehicle-type code
    spaces: BTreeMap<String, u32>,
    unknown_subtype: bool,
}

#[derive(Debug, Default)]
struct GroupBuilder {
    vehicle_type: Option<String>,
    spaces: Option<u32>,
}

/// Parse the static table. A record missing its id is reported and skipped;
/// records missing coordinates are passed through for the normalizer to
/// reject. Invalid XML framing fails the document.
pub fn parse(raw: &[u8], fetched_at: DateTime<Utc>) -> Result<ParseOutcome, DocumentError> {
    let text = std::str::from_utf8(raw).map_err(|e| DocumentError::Encoding(e.to_string()))?;
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut outcome = ParseOutcome::default();
    let mut path: Vec<String> = Vec::new();
    let mut record: Option<RecordBuilder> = None;
    let mut group: Option<GroupBuilder> = None;
    let mut record_index = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                match name.as_str() {
                    "parkingRecord" => {
                        record_index += 1;
                        let mut builder = RecordBuilder::default();
                        builder.id = attribute(&e, "id");
                        record = Some(builder);
                    }
                    "groupOfParkingSpaces" if record.is_some() => {
                        group = Some(GroupBuilder::default());
                    }
                    _ => {}
                }
                path.push(name);
            }
            // Self-closing elements carry no text; nothing to capture
            Ok(Event::Empty(_)) => {}
            Ok(Event::Text(t)) => {
                let value = match t.unescape() {
                    Ok(v) => v.trim().to_string(),
                    Err(_) => continue,
                };
                if value.is_empty() {
                    continue;
                }
                capture_text(&path, &value, &mut record, &mut group);
            }
            Ok(Event::End(e)) => {
                let name = local_name_end(e.local_name().as_ref());
                path.pop();
                match name.as_str() {
                    "groupOfParkingSpaces" => {
                        if let (Some(builder), Some(g)) = (record.as_mut(), group.take()) {
                            finish_group(builder, g);
                        }
                    }
                    "parkingRecord" => {
                        if let Some(builder) = record.take() {
                            match finish_record(builder, record_index, fetched_at) {
                                Ok(rec) => outcome.records.push(rec),
                                Err(err) => outcome.errors.push(err),
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(DocumentError::Xml(e.to_string())),
        }
    }

    Ok(outcome)
}

fn local_name(e: &BytesStart<'_>) -> String {
    local_name_end(e.local_name().as_ref())
}

fn local_name_end(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Option<String> {
    for attr in e.attributes().flatten() {
        if attr.key.local_name().as_ref() == key.as_bytes() {
            if let Ok(value) = attr.unescape_value() {
                return Some(value.into_owned());
            }
        }
    }
    None
}

fn in_context(path: &[String], name: &str) -> bool {
    path.iter().any(|p| p == name)
}

fn capture_text(
    path: &[String],
    value: &str,
    record: &mut Option<RecordBuilder>,
    group: &mut Option<GroupBuilder>,
) {
    let Some(builder) = record.as_mut() else {
        return;
    };
    let Some(current) = path.last() else {
        return;
    };

    if let Some(g) = group.as_mut() {
        match current.as_str() {
            "vehicleType" => g.vehicle_type = Some(value.to_string()),
            "parkingNumberOfSpaces" | "numberOfSpaces" => {
                g.spaces = value.parse().ok();
            }
            _ => {}
        }
        return;
    }

    match current.as_str() {
        "id" if builder.id.is_none() => builder.id = Some(value.to_string()),
        "latitude" if in_context(path, "parkingLocation") => {
            builder.latitude = Some(value.to_string());
        }
        "longitude" if in_context(path, "parkingLocation") => {
            builder.longitude = Some(value.to_string());
        }
        _ if in_context(path, "parkingName") && builder.name.is_none() => {
            builder.name = Some(value.to_string());
        }
        _ if in_context(path, "operator") && builder.operator.is_none() => {
            builder.operator = Some(value.to_string());
        }
        _ => {}
    }
}

fn finish_group(builder: &mut RecordBuilder, group: GroupBuilder) {
    let Some(spaces) = group.spaces else {
        return;
    };
    let code = group.vehicle_type.unwrap_or_default();
    let key = if RECOGNIZED_CODES.contains(&code.as_str()) {
        code
    } else {
        builder.unknown_subtype = true;
        UNRECOGNIZED_CODE.to_string()
    };
    *builder.spaces.entry(key).or_insert(0) += spaces;
}

fn finish_record(
    builder: RecordBuilder,
    index: usize,
    fetched_at: DateTime<Utc>,
) -> Result<SourceRecord, AdapterError> {
    let source_id = builder.id.ok_or_else(|| AdapterError::MalformedRow {
        row_id: format!("parkingRecord {}", index),
        reason: "missing record id".to_string(),
    })?;

    let point = match (
        builder.latitude.as_deref().and_then(|v| v.parse::<f64>().ok()),
        builder.longitude.as_deref().and_then(|v| v.parse::<f64>().ok()),
    ) {
        (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
        _ => None,
    };

    let raw_capacity = builder
        .spaces
        .into_iter()
        .map(|(code, count)| (code, count.to_string()))
        .collect();

    let mut raw_tags = BTreeMap::new();
    // The static table is the official truck-parking inventory
    raw_tags.insert("hgv".to_string(), "designated".to_string());
    if let Some(operator) = builder.operator {
        raw_tags.insert("operator".to_string(), operator);
    }
    if builder.unknown_subtype {
        raw_tags.insert("unknown_subtype".to_string(), "true".to_string());
    }

    Ok(SourceRecord {
        source_id,
        source_kind: SourceKind::DatexStatic,
        point,
        polygon: None,
        area_m2: None,
        raw_name: builder.name,
        raw_capacity,
        raw_tags,
        classification: Classification {
            is_truck_parking: true,
            ..Default::default()
        },
        fetched_at,
    })
}
