//! DATEX-II dynamic status adapter
//!
//! Input is the occupancy publication keyed by the same record ids as the
//! static table: `parkingRecordStatus` elements referencing a
//! `parkingRecordReference` id and carrying vacant/occupied counts, an
//! occupancy percentage, and a site status. The adapter yields `LiveStatus`
//! values keyed by `source_id` — it never creates facilities.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use tpnl_common::model::{LiveStatus, OccupancyStatus};

use super::{AdapterError, DocumentError, StatusOutcome};

#[derive(Debug, Default)]
struct StatusBuilder {
    reference_id: Option<String>,
    vacant: Option<u32>,
    occupied: Option<u32>,
    occupancy_percent: Option<f64>,
    status: Option<String>,
    origin_time: Option<String>,
}

/// Parse the dynamic feed. A status element without a usable reference id or
/// without any occupancy figure is reported and skipped.
pub fn parse(raw: &[u8], fetched_at: DateTime<Utc>) -> Result<StatusOutcome, DocumentError> {
    let text = std::str::from_utf8(raw).map_err(|e| DocumentError::Encoding(e.to_string()))?;
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut outcome = StatusOutcome::default();
    let mut path: Vec<String> = Vec::new();
    let mut status: Option<StatusBuilder> = None;
    let mut status_index = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                match name.as_str() {
                    "parkingRecordStatus" => {
                        status_index += 1;
                        status = Some(StatusBuilder::default());
                    }
                    "parkingRecordReference" => {
                        if let Some(builder) = status.as_mut() {
                            builder.reference_id = attribute(&e, "id");
                        }
                    }
                    _ => {}
                }
                path.push(name);
            }
            Ok(Event::Empty(e)) => {
                // The reference is commonly a self-closing element
                if local_name(&e) == "parkingRecordReference" {
                    if let Some(builder) = status.as_mut() {
                        builder.reference_id = attribute(&e, "id");
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let value = match t.unescape() {
                    Ok(v) => v.trim().to_string(),
                    Err(_) => continue,
                };
                if value.is_empty() {
                    continue;
                }
                if let (Some(builder), Some(current)) = (status.as_mut(), path.last()) {
                    capture_text(builder, current, &value);
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                path.pop();
                if name == "parkingRecordStatus" {
                    if let Some(builder) = status.take() {
                        match finish_status(builder, status_index, fetched_at) {
                            Ok(entry) => outcome.statuses.push(entry),
                            Err(err) => outcome.errors.push(err),
                        }
                    }
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
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
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

fn capture_text(builder: &mut StatusBuilder, current: &str, value: &str) {
    match current {
        "parkingNumberOfVacantSpaces" => builder.vacant = value.parse().ok(),
        "parkingNumberOfOccupiedSpaces" => builder.occupied = value.parse().ok(),
        "parkingOccupancy" => builder.occupancy_percent = value.parse().ok(),
        "parkingSiteStatus" => builder.status = Some(value.to_string()),
        "parkingStatusOriginTime" => builder.origin_time = Some(value.to_string()),
        _ => {}
    }
}

fn finish_status(
    builder: StatusBuilder,
    index: usize,
    fetched_at: DateTime<Utc>,
) -> Result<(String, LiveStatus), AdapterError> {
    let reference_id = builder
        .reference_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AdapterError::MalformedRow {
            row_id: format!("parkingRecordStatus {}", index),
            reason: "missing parkingRecordReference id".to_string(),
        })?;

    if builder.vacant.is_none() && builder.occupied.is_none() && builder.occupancy_percent.is_none()
    {
        return Err(AdapterError::MalformedRow {
            row_id: reference_id,
            reason: "no occupancy figures".to_string(),
        });
    }

    let vacant = builder.vacant.unwrap_or(0);
    let occupied = builder.occupied.unwrap_or(0);

    // Provided percentage wins; otherwise derive it from the counts
    let occupancy_percent = builder
        .occupancy_percent
        .or_else(|| {
            let total = vacant + occupied;
            (total > 0).then(|| occupied as f64 / total as f64 * 100.0)
        })
        .unwrap_or(0.0)
        .clamp(0.0, 100.0);

    let status = match builder.status.as_deref() {
        Some("spacesAvailable") => OccupancyStatus::SpacesAvailable,
        Some("full") | Some("carParkFull") => OccupancyStatus::Full,
        _ => OccupancyStatus::Unknown,
    };

    let observed_at = builder
        .origin_time
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(fetched_at);

    Ok((
        reference_id,
        LiveStatus {
            vacant_spaces: vacant,
            occupied_spaces: occupied,
            occupancy_percent,
            status,
            observed_at,
        },
    ))
}
