/*! Resolution engine for live transit vehicles.

Loads per-operator schedule bundles (routes, trips, stops, stop times,
shapes), builds O(1) lookup indices over them, and answers per-vehicle
queries through an ordered chain of fallbacks: exact key match, then
cross-reference match, then geographic nearest neighbor, then textual
default. One [resolver::resolve] call yields everything rider-facing a map
layer needs for a vehicle (line label, destination, path polyline, next
stop), with diagnostic notes for each fallback that was exhausted along the
way. Rendering, feed transport and anything else visual belongs to the
caller.

Datasets load once per operator ([store::DatasetStore::preload], deduplicated
across concurrent callers) and are immutable afterwards, so resolution is a
lock-free read apart from the shape cache. [resolver::resolve_cached] is the
non-suspending variant for callers that prefer absent data over latency.
*/

pub mod config;
pub mod error;
pub mod inference;
pub mod loader;
pub mod records;
pub mod resolver;
pub mod store;

pub use config::EngineConfig;
pub use error::Error;
pub use records::{
    BoundingBox, Dataset, LatLng, RouteRecord, RouteType, ShapePolyline, StopRecord,
    StopTimeRecord, TripRecord,
};
pub use resolver::{
    resolve, resolve_cached, route_summary, JourneyStop, NextStop, ResolutionResult, RouteSummary,
    VehicleQuery,
};
pub use store::DatasetStore;
