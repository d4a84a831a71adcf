//! `/api/*` JSON handlers, grounded on `Source/Tracking/Statistics.h`'s
//! counter JSON (already implemented by [`crate::vessel::stats::MessageStatistics::to_json`])
//! and `VesselDb::for_each`/`with_vessel` for the vessel listings.
//!
//! `/api/path.json` and `/api/message` both take a raw, non-key-value query
//! string (`?<mmsi>,<mmsi>,...` and `?<mmsi>` respectively), matching
//! spec.md \S6 exactly rather than the usual `?mmsi=...` form, so both use
//! axum's [`axum::extract::RawQuery`] instead of `Query`.

use std::sync::Arc;

use axum::extract::{RawQuery, State};
use axum::response::Json;
use serde_json::{Value, json};

use crate::vessel::vessel::Vessel;

use super::AppState;

/// `GET /api/path.json?<mmsi>,<mmsi>,...`: at most this many mmsi per
/// request, per spec.md \S6.
const MAX_PATH_MMSI: usize = 100;

fn vessel_summary_json(v: &Vessel) -> Value {
    json!({
        "mmsi": v.mmsi,
        "lat": nullable_f32(v.lat),
        "lon": nullable_f32(v.lon),
        "cog": nullable_f32(v.cog),
        "sog": nullable_f32(v.sog),
        "heading": nullable_f32(v.heading),
        "nav_status": v.nav_status,
        "ship_type": v.ship_type,
        "name": v.name,
        "callsign": v.callsign,
        "destination": v.destination,
        "last_seen_us": v.last_seen_us,
        "message_count": v.message_count,
    })
}

fn vessel_full_json(v: &Vessel) -> Value {
    let mut obj = vessel_summary_json(v);
    if let Value::Object(ref mut map) = obj {
        map.insert("first_seen_us".into(), json!(v.first_seen_us));
        map.insert("msg_history".into(), json!(v.msg_history.0));
        map.insert("group_mask".into(), json!(v.group_mask));
        map.insert("distance".into(), nullable_f32(v.distance));
        map.insert("angle".into(), nullable_f32(v.angle));
        map.insert("nmea_history".into(), json!(v.nmea_history.iter().collect::<Vec<_>>()));
    }
    obj
}

fn nullable_f32(v: f32) -> Value {
    if v == crate::frame::UNDEFINED { Value::Null } else { json!(v) }
}

/// `GET /api/stat.json`: the all-time counter plus basic process info.
pub async fn stat_json(State(state): State<Arc<AppState>>) -> Json<Value> {
    let counters = state.snapshot.with_snapshot(|snap| snap.counter.to_json(false));
    Json(json!({
        "station_id": state.station_id,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "stat": counters,
    }))
}

/// `GET /api/ships.json`: vessels keyed by mmsi.
pub async fn ships_json(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut map = serde_json::Map::new();
    state.snapshot.with_snapshot(|snap| {
        snap.db.for_each(|v| {
            map.insert(v.mmsi.to_string(), vessel_summary_json(v));
        });
    });
    Json(Value::Object(map))
}

/// `GET /api/ships_array.json`: the same vessels as a flat array.
pub async fn ships_array_json(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut out = Vec::new();
    state.snapshot.with_snapshot(|snap| {
        snap.db.for_each(|v| out.push(vessel_summary_json(v)));
    });
    Json(Value::Array(out))
}

/// `GET /api/ships_full.json`: every tracked field, including history rings.
pub async fn ships_full_json(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut out = Vec::new();
    state.snapshot.with_snapshot(|snap| {
        snap.db.for_each(|v| out.push(vessel_full_json(v)));
    });
    Json(Value::Array(out))
}

fn parse_mmsi_list(raw: &str) -> Vec<u32> {
    raw.split(',')
        .filter_map(|s| s.trim().parse::<u32>().ok())
        .take(MAX_PATH_MMSI)
        .collect()
}

/// `GET /api/path.json?<mmsi>,<mmsi>,...`: per-mmsi position breadcrumb.
pub async fn path_json(State(state): State<Arc<AppState>>, RawQuery(query): RawQuery) -> Json<Value> {
    let mmsis = parse_mmsi_list(&query.unwrap_or_default());
    let mut out = serde_json::Map::new();
    state.snapshot.with_snapshot(|snap| {
        for mmsi in mmsis {
            if let Some(points) = snap.db.with_vessel(mmsi, |v| v.path.iter().copied().collect::<Vec<_>>()) {
                out.insert(mmsi.to_string(), json!(points));
            }
        }
    });
    Json(Value::Object(out))
}

/// `GET /api/message?<mmsi>`: last raw NMEA sentence seen for that mmsi.
pub async fn message_json(State(state): State<Arc<AppState>>, RawQuery(query): RawQuery) -> Json<Value> {
    let Some(mmsi) = query.as_deref().and_then(|s| s.trim().parse::<u32>().ok()) else {
        return Json(json!({ "error": "missing or invalid mmsi" }));
    };
    let result = state
        .snapshot
        .with_snapshot(|snap| snap.db.with_vessel(mmsi, |v| v.nmea_history.iter().last().cloned()));
    match result.flatten() {
        Some(nmea) => Json(json!({ "mmsi": mmsi, "nmea": nmea })),
        None => Json(json!({ "mmsi": mmsi, "nmea": null })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Tag;
    use crate::message::Message;
    use crate::vessel::persist::SnapshotHandle;
    use std::time::Instant;

    fn sample_message(mmsi: u32) -> Message {
        let mut m = Message::new();
        m.set_uint(0, 6, 1).unwrap();
        m.set_uint(8, 30, mmsi).unwrap();
        m
    }

    fn test_state() -> Arc<AppState> {
        let snapshot = Arc::new(SnapshotHandle::new(0, 16));
        crate::stream::Receiver::accept(&*snapshot, &sample_message(123), &Tag::default()).unwrap();
        Arc::new(AppState {
            snapshot,
            logger: Box::leak(Box::new(crate::logger::Logger::for_test())),
            station_id: 1,
            started_at: Instant::now(),
            sse: Arc::new(super::super::sse::SseHub::new()),
        })
    }

    #[tokio::test]
    async fn ships_array_lists_the_inserted_vessel() {
        let state = test_state();
        let Json(value) = ships_array_json(State(state)).await;
        let arr = value.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["mmsi"], json!(123));
    }

    #[tokio::test]
    async fn path_json_filters_to_requested_and_capped_mmsi_list() {
        let state = test_state();
        let Json(value) = path_json(State(state), RawQuery(Some("123,456".to_string()))).await;
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("123"));
        assert!(!obj.contains_key("456"));
    }

    #[tokio::test]
    async fn message_json_reports_missing_mmsi_as_error() {
        let state = test_state();
        let Json(value) = message_json(State(state), RawQuery(None)).await;
        assert!(value["error"].is_string());
    }
}
