//! Walks the fallback chains that turn a live vehicle's partial identifiers
//! into rider-facing facts: line label, destination, path polyline and next
//! stop. No step here fails hard; every miss degrades to a diagnostic note
//! on the result.

use std::sync::Arc;

use serde::Serialize;

use crate::inference;
use crate::records::{Dataset, LatLng, RouteRecord, ShapePolyline, TripRecord};
use crate::store::DatasetStore;

/// Identifiers and realtime hints from one decoded vehicle-position record.
/// Every field is optional; the engine falls back through whatever is there.
#[derive(Debug, Clone, Default)]
pub struct VehicleQuery {
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub stop_id: Option<String>,
    pub stop_sequence: Option<u32>,
    /// Headsign reported by the live feed; trusted over the static one.
    pub realtime_headsign: Option<String>,
    pub position: Option<LatLng>,
}

/// One scheduled stop along the resolved trip, joined with the stop index.
#[derive(Debug, Clone, Serialize)]
pub struct JourneyStop {
    pub stop_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub arrival: Option<String>,
    pub platform: Option<String>,
    pub sequence: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct NextStop {
    pub name: String,
    pub platform: Option<String>,
}

/// The consolidated answer for one vehicle. Fields resolve independently;
/// `notes` records which fallbacks were exhausted along the way.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionResult {
    pub route: Option<RouteRecord>,
    /// Rider-facing line label, from the route's short name
    pub line: Option<String>,
    pub destination: Option<String>,
    pub direction: Option<u8>,
    pub shape: Option<Arc<ShapePolyline>>,
    pub next_stop: Option<NextStop>,
    pub journey: Vec<JourneyStop>,
    pub notes: Vec<String>,
}

/// Route label, headsign and colors for a trip/route pair, the narrow
/// surface a map icon needs.
#[derive(Debug, Clone, Serialize)]
pub struct RouteSummary {
    pub line: Option<String>,
    pub headsign: Option<String>,
    pub color: Option<String>,
    pub text_color: Option<String>,
}

/// Cache-only resolution. Never suspends and never triggers a load; `None`
/// means the operator's dataset is not loaded yet.
pub fn resolve_cached(
    store: &DatasetStore,
    operator: &str,
    query: &VehicleQuery,
) -> Option<ResolutionResult> {
    let dataset = store.dataset(operator)?;
    Some(resolve_with(store, &dataset, query))
}

/// Resolution that first ensures the operator's dataset is loaded, awaiting
/// an in-flight load if one is running. `None` only when the load itself
/// failed; resolution misses degrade to notes instead.
pub async fn resolve(
    store: &DatasetStore,
    operator: &str,
    query: &VehicleQuery,
) -> Option<ResolutionResult> {
    let dataset = store.preload(operator).await?;
    Some(resolve_with(store, &dataset, query))
}

/// Route label, headsign and colors for a trip/route pair from whatever is
/// currently cached. `None` when the operator is not loaded.
pub fn route_summary(
    store: &DatasetStore,
    operator: &str,
    trip_id: Option<&str>,
    route_id: Option<&str>,
) -> Option<RouteSummary> {
    let dataset = store.dataset(operator)?;
    let trip = trip_id.and_then(|id| dataset.trips.get(id));
    let route_key = trip
        .map(|t| t.route_id.as_str())
        .filter(|id| !id.is_empty())
        .or(route_id);
    let route = route_key.and_then(|id| dataset.routes.get(id));

    let line = route
        .map(|r| r.short_name.clone())
        .filter(|s| !s.is_empty())
        // An unresolved route id may still serve as the label, but an
        // internal machine identifier is never shown to riders.
        .or_else(|| {
            route_key
                .filter(|id| !inference::is_raw_identifier(id))
                .map(str::to_string)
        });

    Some(RouteSummary {
        line,
        headsign: trip.and_then(|t| t.headsign.clone()),
        color: route.map(|r| r.color.clone()),
        text_color: route.map(|r| r.text_color.clone()),
    })
}

fn resolve_with(store: &DatasetStore, dataset: &Dataset, query: &VehicleQuery) -> ResolutionResult {
    let mut notes = Vec::new();

    // Step 1: route identification. A trip match carries route, shape,
    // headsign and direction; a bare route id is the fallback key.
    let trip = lookup_trip(dataset, query, &mut notes);
    let route_key = trip
        .map(|t| t.route_id.as_str())
        .filter(|id| !id.is_empty())
        .or(query.route_id.as_deref());
    let route = lookup_route(dataset, route_key, &mut notes);
    let line = route
        .as_ref()
        .map(|r| r.short_name.clone())
        .filter(|s| !s.is_empty());
    let direction = trip.and_then(|t| t.direction_id);

    // Step 2: journey assembly, keyed by the queried trip id directly (the
    // stop-time table can know a trip the trip table does not). Stop-time
    // rows whose stop is unknown are dropped outright, so the sequence may
    // be shorter than the raw list.
    let journey = assemble_journey(dataset, query.trip_id.as_deref());
    let terminal_name = journey.last().map(|stop| stop.name.clone());

    // Step 3: destination, in trust order. Live data beats static schedule
    // data beats topological inference beats generic route labeling.
    let destination = [
        query.realtime_headsign.clone(),
        trip.and_then(|t| t.headsign.clone()),
        terminal_name,
        route.as_ref().map(|r| r.long_name.clone()),
        route.as_ref().map(|r| r.short_name.clone()),
    ]
    .into_iter()
    .flatten()
    .find(|candidate| !candidate.is_empty());

    // Step 4: shape, through the cache first.
    let shape = match trip.and_then(|t| t.shape_id.as_deref()) {
        Some(shape_id) => resolve_shape(store, dataset, shape_id, &mut notes),
        None => None,
    };

    // Step 5: next stop, first success wins.
    let next_stop = resolve_next_stop(dataset, query, &journey);
    let wanted_next_stop =
        query.stop_id.is_some() || query.stop_sequence.is_some() || query.position.is_some();
    if next_stop.is_none() && wanted_next_stop {
        notes.push("next stop could not be resolved".to_string());
    }

    ResolutionResult {
        route,
        line,
        destination,
        direction,
        shape,
        next_stop,
        journey,
        notes,
    }
}

fn lookup_trip<'a>(
    dataset: &'a Dataset,
    query: &VehicleQuery,
    notes: &mut Vec<String>,
) -> Option<&'a TripRecord> {
    let trip_id = query.trip_id.as_deref()?;
    let trip = dataset.trips.get(trip_id);
    if trip.is_none() {
        notes.push(format!("trip '{trip_id}' not found in trip index"));
    }
    trip
}

fn lookup_route(
    dataset: &Dataset,
    route_key: Option<&str>,
    notes: &mut Vec<String>,
) -> Option<RouteRecord> {
    let route_id = route_key?;
    let route = dataset.routes.get(route_id);
    if route.is_none() {
        notes.push(format!("route '{route_id}' not found in route index"));
    }
    route.cloned()
}

fn assemble_journey(dataset: &Dataset, trip_id: Option<&str>) -> Vec<JourneyStop> {
    let Some(stop_times) = trip_id.and_then(|id| dataset.trip_stops.get(id)) else {
        return Vec::new();
    };
    stop_times
        .iter()
        .filter_map(|st| {
            dataset.stops.get(&st.stop_id).map(|stop| JourneyStop {
                stop_id: stop.stop_id.clone(),
                name: stop.name.clone(),
                latitude: stop.lat,
                longitude: stop.lon,
                arrival: st.arrival.clone(),
                platform: stop.platform_code.clone(),
                sequence: st.sequence,
            })
        })
        .collect()
}

fn resolve_shape(
    store: &DatasetStore,
    dataset: &Dataset,
    shape_id: &str,
    notes: &mut Vec<String>,
) -> Option<Arc<ShapePolyline>> {
    if let Some(shape) = store.cached_shape(shape_id) {
        return Some(shape);
    }
    match dataset.shapes.get(shape_id) {
        Some(points) if points.len() >= 2 => {
            let shape = Arc::new(ShapePolyline {
                shape_id: shape_id.to_string(),
                points: points.clone(),
            });
            store.cache_shape(shape.clone());
            Some(shape)
        }
        _ => {
            notes.push(format!("shape '{shape_id}' not found or too short"));
            None
        }
    }
}

fn resolve_next_stop(
    dataset: &Dataset,
    query: &VehicleQuery,
    journey: &[JourneyStop],
) -> Option<NextStop> {
    // (a) A reported stop id is trusted directly.
    if let Some(stop) = query.stop_id.as_deref().and_then(|id| dataset.stops.get(id)) {
        return Some(NextStop {
            name: stop.name.clone(),
            platform: stop.platform_code.clone(),
        });
    }

    // (b) A reported sequence number selects the first journey stop at or
    // past it.
    if let Some(sequence) = query.stop_sequence {
        if let Some(stop) = journey.iter().find(|stop| stop.sequence >= sequence) {
            return Some(NextStop {
                name: stop.name.clone(),
                platform: stop.platform.clone(),
            });
        }
    }

    // (c) Otherwise the journey stop nearest the vehicle. Squared planar
    // distance is sufficient at city scale.
    if let Some(position) = query.position {
        let nearest = journey.iter().min_by(|a, b| {
            squared_distance(a, position).total_cmp(&squared_distance(b, position))
        });
        if let Some(stop) = nearest {
            return Some(NextStop {
                name: stop.name.clone(),
                platform: stop.platform.clone(),
            });
        }
    }

    None
}

fn squared_distance(stop: &JourneyStop, position: LatLng) -> f64 {
    let dlat = stop.latitude - position.latitude;
    let dlon = stop.longitude - position.longitude;
    dlat * dlat + dlon * dlon
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{RouteType, StopRecord, StopTimeRecord};
    use crate::store::test_support::store_with;

    fn trip(trip_id: &str, route_id: &str, shape_id: Option<&str>, headsign: Option<&str>) -> TripRecord {
        TripRecord {
            trip_id: trip_id.to_string(),
            route_id: route_id.to_string(),
            shape_id: shape_id.map(str::to_string),
            headsign: headsign.map(str::to_string),
            direction_id: Some(0),
        }
    }

    fn stop(stop_id: &str, name: &str, lat: f64, lon: f64) -> StopRecord {
        StopRecord {
            stop_id: stop_id.to_string(),
            name: name.to_string(),
            lat,
            lon,
            platform_code: None,
        }
    }

    fn stop_time(stop_id: &str, sequence: u32) -> StopTimeRecord {
        StopTimeRecord {
            stop_id: stop_id.to_string(),
            sequence,
            arrival: Some(format!("08:0{sequence}:00")),
        }
    }

    /// Minimal dataset: one trip, one route, one two-point shape.
    fn scenario_dataset() -> Dataset {
        let mut dataset = Dataset::default();
        dataset
            .trips
            .insert("T1".to_string(), trip("T1", "R1", Some("S1"), Some("Downtown")));
        dataset.routes.insert(
            "R1".to_string(),
            RouteRecord {
                route_id: "R1".to_string(),
                short_name: "42".to_string(),
                long_name: "Downtown Express".to_string(),
                color: "#0ea5e9".to_string(),
                text_color: "#FFFFFF".to_string(),
                route_type: RouteType::Bus,
            },
        );
        dataset
            .shapes
            .insert("S1".to_string(), vec![(57.70, 11.97), (57.71, 11.98)]);
        dataset
    }

    fn query_for_trip(trip_id: &str) -> VehicleQuery {
        VehicleQuery {
            trip_id: Some(trip_id.to_string()),
            ..VehicleQuery::default()
        }
    }

    #[test]
    fn resolves_a_fully_described_trip() {
        let store = store_with(vec![("X", scenario_dataset())]);

        let result = resolve_cached(&store, "X", &query_for_trip("T1")).unwrap();
        assert_eq!(result.line.as_deref(), Some("42"));
        // The static headsign wins over the absent realtime one.
        assert_eq!(result.destination.as_deref(), Some("Downtown"));
        assert_eq!(
            result.shape.as_ref().unwrap().points,
            vec![(57.70, 11.97), (57.71, 11.98)]
        );
        assert_eq!(result.direction, Some(0));
        assert!(result.notes.is_empty());
    }

    #[test]
    fn unknown_trip_degrades_with_note() {
        let store = store_with(vec![("X", scenario_dataset())]);

        let result = resolve_cached(&store, "X", &query_for_trip("T9")).unwrap();
        assert!(result.route.is_none());
        assert!(result.line.is_none());
        assert!(result.notes.iter().any(|n| n.contains("T9")));
    }

    #[test]
    fn unknown_route_degrades_with_note() {
        let store = store_with(vec![("X", scenario_dataset())]);

        let query = VehicleQuery {
            route_id: Some("R404".to_string()),
            ..VehicleQuery::default()
        };
        let result = resolve_cached(&store, "X", &query).unwrap();
        assert!(result.route.is_none());
        assert!(result.line.is_none());
        assert!(result.notes.iter().any(|n| n.contains("R404")));
    }

    #[test]
    fn resolve_cached_is_none_for_unloaded_operator() {
        let store = store_with(vec![]);
        assert!(resolve_cached(&store, "X", &query_for_trip("T1")).is_none());
    }

    #[test]
    fn realtime_headsign_beats_static_headsign() {
        let store = store_with(vec![("X", scenario_dataset())]);

        let mut query = query_for_trip("T1");
        query.realtime_headsign = Some("Depot".to_string());
        let result = resolve_cached(&store, "X", &query).unwrap();
        assert_eq!(result.destination.as_deref(), Some("Depot"));

        query.realtime_headsign = None;
        let result = resolve_cached(&store, "X", &query).unwrap();
        assert_eq!(result.destination.as_deref(), Some("Downtown"));
    }

    #[test]
    fn destination_falls_back_to_terminal_then_route_names() {
        let mut dataset = scenario_dataset();
        // A trip with no static headsign but with stop times.
        dataset
            .trips
            .insert("T2".to_string(), trip("T2", "R1", None, None));
        dataset
            .stops
            .insert("A".to_string(), stop("A", "First stop", 57.70, 11.97));
        dataset
            .stops
            .insert("B".to_string(), stop("B", "Last stop", 57.72, 11.99));
        dataset
            .trip_stops
            .insert("T2".to_string(), vec![stop_time("A", 1), stop_time("B", 2)]);
        // And one with neither headsign nor stop times.
        dataset
            .trips
            .insert("T3".to_string(), trip("T3", "R1", None, None));
        let store = store_with(vec![("X", dataset)]);

        let result = resolve_cached(&store, "X", &query_for_trip("T2")).unwrap();
        assert_eq!(result.destination.as_deref(), Some("Last stop"));

        let result = resolve_cached(&store, "X", &query_for_trip("T3")).unwrap();
        assert_eq!(result.destination.as_deref(), Some("Downtown Express"));
    }

    #[test]
    fn journey_is_sorted_and_drops_unknown_stops() {
        let mut dataset = scenario_dataset();
        dataset
            .stops
            .insert("A".to_string(), stop("A", "First stop", 57.70, 11.97));
        dataset
            .stops
            .insert("C".to_string(), stop("C", "Third stop", 57.72, 11.99));
        // "B" has no stop record and must be dropped, not nulled.
        dataset.trip_stops.insert(
            "T1".to_string(),
            vec![stop_time("A", 1), stop_time("B", 2), stop_time("C", 3)],
        );
        let store = store_with(vec![("X", dataset)]);

        let result = resolve_cached(&store, "X", &query_for_trip("T1")).unwrap();
        assert_eq!(result.journey.len(), 2);
        assert!(result
            .journey
            .windows(2)
            .all(|pair| pair[0].sequence <= pair[1].sequence));
        assert_eq!(result.journey[1].stop_id, "C");
    }

    #[test]
    fn one_point_shape_is_invalid() {
        let mut dataset = scenario_dataset();
        dataset.shapes.insert("S1".to_string(), vec![(57.70, 11.97)]);
        let store = store_with(vec![("X", dataset)]);

        let result = resolve_cached(&store, "X", &query_for_trip("T1")).unwrap();
        assert!(result.shape.is_none());
        assert!(result.notes.iter().any(|n| n.contains("S1")));
    }

    #[test]
    fn repeated_resolution_hits_the_shape_cache() {
        let store = store_with(vec![("X", scenario_dataset())]);

        let first = resolve_cached(&store, "X", &query_for_trip("T1")).unwrap();
        let second = resolve_cached(&store, "X", &query_for_trip("T1")).unwrap();
        assert!(Arc::ptr_eq(
            first.shape.as_ref().unwrap(),
            second.shape.as_ref().unwrap()
        ));
    }

    #[test]
    fn next_stop_prefers_reported_stop_id() {
        let mut dataset = scenario_dataset();
        dataset
            .stops
            .insert("A".to_string(), stop("A", "Reported stop", 57.70, 11.97));
        let store = store_with(vec![("X", dataset)]);

        let mut query = query_for_trip("T1");
        query.stop_id = Some("A".to_string());
        query.stop_sequence = Some(99);
        let result = resolve_cached(&store, "X", &query).unwrap();
        assert_eq!(result.next_stop.unwrap().name, "Reported stop");
    }

    #[test]
    fn next_stop_by_sequence_picks_first_at_or_past() {
        let mut dataset = scenario_dataset();
        for (id, name) in [("A", "One"), ("B", "Two"), ("C", "Three")] {
            dataset.stops.insert(id.to_string(), stop(id, name, 57.70, 11.97));
        }
        dataset.trip_stops.insert(
            "T1".to_string(),
            vec![stop_time("A", 1), stop_time("B", 3), stop_time("C", 5)],
        );
        let store = store_with(vec![("X", dataset)]);

        let mut query = query_for_trip("T1");
        query.stop_sequence = Some(2);
        let result = resolve_cached(&store, "X", &query).unwrap();
        assert_eq!(result.next_stop.unwrap().name, "Two");
    }

    #[test]
    fn next_stop_by_position_picks_nearest() {
        let mut dataset = scenario_dataset();
        dataset
            .stops
            .insert("A".to_string(), stop("A", "One", 57.70, 11.90));
        dataset
            .stops
            .insert("B".to_string(), stop("B", "Two", 57.70, 11.95));
        dataset
            .stops
            .insert("C".to_string(), stop("C", "Three", 57.70, 12.00));
        dataset.trip_stops.insert(
            "T1".to_string(),
            vec![stop_time("A", 1), stop_time("B", 2), stop_time("C", 3)],
        );
        let store = store_with(vec![("X", dataset)]);

        let mut query = query_for_trip("T1");
        query.position = Some(LatLng::from_lat_lng(57.70, 11.94));
        let result = resolve_cached(&store, "X", &query).unwrap();
        assert_eq!(result.next_stop.unwrap().name, "Two");
    }

    #[test]
    fn exhausted_next_stop_hints_leave_a_note() {
        let store = store_with(vec![("X", scenario_dataset())]);

        let mut query = query_for_trip("T1");
        query.stop_sequence = Some(7);
        let result = resolve_cached(&store, "X", &query).unwrap();
        assert!(result.next_stop.is_none());
        assert!(result.notes.iter().any(|n| n.contains("next stop")));
    }

    #[test]
    fn route_summary_reads_the_cache_only() {
        let store = store_with(vec![("X", scenario_dataset())]);

        let summary = route_summary(&store, "X", Some("T1"), None).unwrap();
        assert_eq!(summary.line.as_deref(), Some("42"));
        assert_eq!(summary.headsign.as_deref(), Some("Downtown"));
        assert_eq!(summary.color.as_deref(), Some("#0ea5e9"));

        assert!(route_summary(&store, "Y", Some("T1"), None).is_none());
    }

    #[test]
    fn route_summary_never_shows_a_raw_identifier_as_line() {
        let store = store_with(vec![("X", scenario_dataset())]);

        // A short alphanumeric route key can stand in as the label.
        let summary = route_summary(&store, "X", None, Some("42X")).unwrap();
        assert_eq!(summary.line.as_deref(), Some("42X"));

        // A long numeric internal id cannot.
        let summary = route_summary(&store, "X", None, Some("9011014001300000")).unwrap();
        assert!(summary.line.is_none());
    }

    #[test]
    fn result_serializes_for_downstream_consumers() {
        let store = store_with(vec![("X", scenario_dataset())]);
        let result = resolve_cached(&store, "X", &query_for_trip("T1")).unwrap();

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["line"], "42");
        assert_eq!(value["shape"]["shape_id"], "S1");
    }
}
