//! Typed records for the five schedule tables, plus the per-operator
//! [Dataset] aggregate they are indexed into. Everything here is immutable
//! once a load completes.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Mode of transport for a route, reduced to the handful of values the
/// rider-facing layer distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RouteType {
    Tram,
    Metro,
    Rail,
    #[default]
    Bus,
    Ferry,
}

impl RouteType {
    /// Maps a `route_type` code from the routes table. Unknown and extended
    /// codes fall back to [RouteType::Bus].
    pub fn from_gtfs(code: u32) -> Self {
        match code {
            0 => RouteType::Tram,
            1 => RouteType::Metro,
            2 => RouteType::Rail,
            4 => RouteType::Ferry,
            _ => RouteType::Bus,
        }
    }
}

/// A published line with its display metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRecord {
    pub route_id: String,
    /// Short label riders know the line by, like "42" or "Grön linje"
    pub short_name: String,
    pub long_name: String,
    /// Hex color like `#0ea5e9`
    pub color: String,
    pub text_color: String,
    pub route_type: RouteType,
}

/// A single scheduled vehicle run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripRecord {
    pub trip_id: String,
    pub route_id: String,
    pub shape_id: Option<String>,
    pub headsign: Option<String>,
    /// 0/1 per the schedule tables
    pub direction_id: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopRecord {
    pub stop_id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub platform_code: Option<String>,
}

/// One scheduled visit of a trip to a stop. The arrival time is kept as
/// the raw feed string; nothing downstream does arithmetic on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopTimeRecord {
    pub stop_id: String,
    pub sequence: u32,
    pub arrival: Option<String>,
}

/// An ordered polyline describing the physical path a trip follows.
/// Invariant: at least 2 points, or the shape is treated as absent.
#[derive(Debug, Clone, Serialize)]
pub struct ShapePolyline {
    pub shape_id: String,
    /// `(lat, lon)` pairs in point-sequence order
    pub points: Vec<(f64, f64)>,
}

/// Geographic position, WGS84.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLng {
    pub fn from_lat_lng(lat: f64, lng: f64) -> Self {
        Self {
            latitude: lat,
            longitude: lng,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn contains(&self, p: LatLng) -> bool {
        (self.min_lat..=self.max_lat).contains(&p.latitude)
            && (self.min_lon..=self.max_lon).contains(&p.longitude)
    }
}

/// All indices for one operator: trip, route and stop by id, stop-time
/// sequences by trip, coordinate polylines by shape id.
///
/// Lookups are O(1) average and entries are never removed. A dataset with
/// an empty `shapes` map but populated routes/trips/stops is valid: shapes
/// is the largest table and may be absent from the archive entirely.
#[derive(Debug, Default)]
pub struct Dataset {
    pub routes: FxHashMap<String, RouteRecord>,
    pub trips: FxHashMap<String, TripRecord>,
    pub stops: FxHashMap<String, StopRecord>,
    /// Sorted ascending by `sequence` at build time; consumers rely on the
    /// ordering and never re-sort.
    pub trip_stops: FxHashMap<String, Vec<StopTimeRecord>>,
    pub shapes: FxHashMap<String, Vec<(f64, f64)>>,
}
