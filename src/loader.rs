//! Fetches an operator's schedule archive and parses the five tabular
//! files into a [Dataset], building every index in the same pass.

use std::io::{Cursor, Read};
use std::ops::RangeInclusive;

use futures::future::BoxFuture;
use lazy_static::lazy_static;
use log::{debug, info};
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::config::EngineConfig;
use crate::error::Error;
use crate::records::{Dataset, RouteRecord, RouteType, StopRecord, StopTimeRecord, TripRecord};

/// Produces the raw zip bytes for an operator's schedule bundle.
///
/// The HTTP implementation is the production path; tests substitute their
/// own source so fetch counts are observable.
pub trait ArchiveSource: Send + Sync + 'static {
    fn fetch(&self, operator: &str) -> BoxFuture<'static, Result<Vec<u8>, Error>>;
}

/// Fetches archives from the deterministic per-operator location
/// `{base_url}/{operator}/{operator}.zip`.
pub struct HttpArchiveSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpArchiveSource {
    pub fn new(config: &EngineConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()?;
        Ok(HttpArchiveSource {
            client,
            base_url: config.base_url.clone(),
        })
    }
}

impl ArchiveSource for HttpArchiveSource {
    fn fetch(&self, operator: &str) -> BoxFuture<'static, Result<Vec<u8>, Error>> {
        let url = format!("{}/{op}/{op}.zip", self.base_url, op = operator);
        let client = self.client.clone();
        let operator = operator.to_string();
        Box::pin(async move {
            let wrap = |source| Error::Fetch {
                operator: operator.clone(),
                source,
            };
            let response = client.get(&url).send().await.map_err(wrap)?;
            let response = response.error_for_status().map_err(wrap)?;
            let body = response.bytes().await.map_err(wrap)?;
            Ok(body.to_vec())
        })
    }
}

// Raw rows as they appear in the feed. Optional columns deserialize to
// `None`; unknown columns are ignored.

#[derive(Deserialize)]
struct RawRoute {
    route_id: String,
    #[serde(default)]
    route_short_name: String,
    #[serde(default)]
    route_long_name: String,
    #[serde(default)]
    route_type: Option<u32>,
    #[serde(default)]
    route_color: Option<String>,
    #[serde(default)]
    route_text_color: Option<String>,
}

#[derive(Deserialize)]
struct RawTrip {
    trip_id: String,
    #[serde(default)]
    route_id: String,
    #[serde(default)]
    shape_id: Option<String>,
    #[serde(default)]
    trip_headsign: Option<String>,
    #[serde(default)]
    direction_id: Option<u8>,
}

#[derive(Deserialize)]
struct RawStop {
    stop_id: String,
    #[serde(default)]
    stop_name: String,
    stop_lat: f64,
    stop_lon: f64,
    #[serde(default)]
    platform_code: Option<String>,
}

#[derive(Deserialize)]
struct RawStopTime {
    trip_id: String,
    stop_id: String,
    stop_sequence: u32,
    #[serde(default)]
    arrival_time: Option<String>,
}

#[derive(Deserialize)]
struct RawShapePoint {
    shape_id: String,
    shape_pt_lat: f64,
    shape_pt_lon: f64,
    shape_pt_sequence: u32,
}

/// Color override for routes of one operator, matched on mode and numeric
/// line number. Extending coverage to another operator means adding rows
/// here, not touching the parse loop.
struct ColorRule {
    mode: Option<RouteType>,
    lines: Option<RangeInclusive<u32>>,
    color: &'static str,
    text_color: &'static str,
}

impl ColorRule {
    fn matches(&self, mode: RouteType, line: Option<u32>) -> bool {
        if let Some(m) = self.mode {
            if m != mode {
                return false;
            }
        }
        match (&self.lines, line) {
            (Some(range), Some(line)) => range.contains(&line),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

lazy_static! {
    static ref COLOR_OVERRIDES: FxHashMap<&'static str, Vec<ColorRule>> = {
        let mut map: FxHashMap<&'static str, Vec<ColorRule>> = FxHashMap::default();
        // Stockholm brands its metro lines by color group; the feed ships a
        // single generic color for all of them.
        map.insert(
            "sl",
            vec![
                ColorRule { mode: Some(RouteType::Metro), lines: Some(10..=11), color: "#0077C8", text_color: "#FFFFFF" },
                ColorRule { mode: Some(RouteType::Metro), lines: Some(13..=14), color: "#D71D24", text_color: "#FFFFFF" },
                ColorRule { mode: Some(RouteType::Metro), lines: Some(17..=19), color: "#148541", text_color: "#FFFFFF" },
                ColorRule { mode: Some(RouteType::Rail), lines: None, color: "#EC619F", text_color: "#FFFFFF" },
            ],
        );
        // Gothenburg trams and river ferries carry the house colors.
        map.insert(
            "vasttrafik",
            vec![
                ColorRule { mode: Some(RouteType::Tram), lines: Some(1..=13), color: "#009FDA", text_color: "#FFFFFF" },
                ColorRule { mode: Some(RouteType::Ferry), lines: None, color: "#00394D", text_color: "#FFFFFF" },
            ],
        );
        map
    };
}

fn normalize_color(raw: Option<String>, fallback: &str) -> String {
    match raw.filter(|c| !c.is_empty()) {
        Some(c) if c.starts_with('#') => c,
        Some(c) => format!("#{c}"),
        None => fallback.to_string(),
    }
}

fn route_record(operator: &str, raw: RawRoute) -> RouteRecord {
    let route_type = raw.route_type.map(RouteType::from_gtfs).unwrap_or_default();
    let mut color = normalize_color(raw.route_color, "#FFFFFF");
    let mut text_color = normalize_color(raw.route_text_color, "#000000");

    if let Some(rules) = COLOR_OVERRIDES.get(operator) {
        let line = raw.route_short_name.parse::<u32>().ok();
        if let Some(rule) = rules.iter().find(|rule| rule.matches(route_type, line)) {
            color = rule.color.to_string();
            text_color = rule.text_color.to_string();
        }
    }

    RouteRecord {
        route_id: raw.route_id,
        short_name: raw.route_short_name,
        long_name: raw.route_long_name,
        color,
        text_color,
        route_type,
    }
}

/// Parses one operator's archive into an indexed [Dataset].
///
/// A table missing from the archive is an empty table, not an error; a row
/// that fails to deserialize is skipped.
pub fn parse_dataset(operator: &str, bytes: &[u8]) -> Result<Dataset, Error> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

    let mut routes = FxHashMap::default();
    for raw in read_table::<RawRoute>(&mut archive, "routes.txt")? {
        let record = route_record(operator, raw);
        routes.insert(record.route_id.clone(), record);
    }

    let mut trips = FxHashMap::default();
    for raw in read_table::<RawTrip>(&mut archive, "trips.txt")? {
        trips.insert(
            raw.trip_id.clone(),
            TripRecord {
                trip_id: raw.trip_id,
                route_id: raw.route_id,
                shape_id: raw.shape_id.filter(|s| !s.is_empty()),
                headsign: raw.trip_headsign.filter(|s| !s.is_empty()),
                direction_id: raw.direction_id,
            },
        );
    }

    let mut stops = FxHashMap::default();
    for raw in read_table::<RawStop>(&mut archive, "stops.txt")? {
        stops.insert(
            raw.stop_id.clone(),
            StopRecord {
                stop_id: raw.stop_id,
                name: raw.stop_name,
                lat: raw.stop_lat,
                lon: raw.stop_lon,
                platform_code: raw.platform_code.filter(|s| !s.is_empty()),
            },
        );
    }

    // Grouped by trip while parsing, each group sorted once at the end.
    let mut trip_stops: FxHashMap<String, Vec<StopTimeRecord>> = FxHashMap::default();
    for raw in read_table::<RawStopTime>(&mut archive, "stop_times.txt")? {
        trip_stops.entry(raw.trip_id).or_default().push(StopTimeRecord {
            stop_id: raw.stop_id,
            sequence: raw.stop_sequence,
            arrival: raw.arrival_time.filter(|s| !s.is_empty()),
        });
    }
    for sequence in trip_stops.values_mut() {
        sequence.sort_by_key(|st| st.sequence);
    }

    // Shapes are the largest and slowest table; parsed last so the cheap
    // tables are never held up behind it.
    let mut shape_points: FxHashMap<String, Vec<RawShapePoint>> = FxHashMap::default();
    for raw in read_table::<RawShapePoint>(&mut archive, "shapes.txt")? {
        shape_points.entry(raw.shape_id.clone()).or_default().push(raw);
    }
    let mut shapes = FxHashMap::default();
    for (shape_id, mut points) in shape_points {
        points.sort_by_key(|p| p.shape_pt_sequence);
        if points.len() < 2 {
            debug!("dropping shape {shape_id}: fewer than 2 points");
            continue;
        }
        let polyline: Vec<(f64, f64)> = points
            .into_iter()
            .map(|p| (p.shape_pt_lat, p.shape_pt_lon))
            .collect();
        shapes.insert(shape_id, polyline);
    }

    info!(
        "parsed dataset for {operator}: {} routes, {} trips, {} stops, {} shapes",
        routes.len(),
        trips.len(),
        stops.len(),
        shapes.len()
    );

    Ok(Dataset {
        routes,
        trips,
        stops,
        trip_stops,
        shapes,
    })
}

fn read_table<O>(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    file_name: &str,
) -> Result<Vec<O>, Error>
where
    for<'de> O: Deserialize<'de>,
{
    let entry = match archive.by_name(file_name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    read_rows(entry, file_name)
}

fn read_rows<O, T>(mut reader: T, file_name: &str) -> Result<Vec<O>, Error>
where
    for<'de> O: Deserialize<'de>,
    T: Read,
{
    let mut bom = [0u8; 3];
    if reader.read_exact(&mut bom).is_err() {
        // Shorter than a BOM means no header line either.
        return Ok(Vec::new());
    }
    let chained: Box<dyn Read> = if bom == [0xefu8, 0xbbu8, 0xbfu8] {
        Box::new(reader)
    } else {
        Box::new(Cursor::new(bom).chain(reader))
    };

    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(chained);

    let headers = rdr
        .headers()
        .map_err(|e| Error::Table {
            file_name: file_name.to_string(),
            source: e,
        })?
        .clone();

    let mut rec = csv::StringRecord::new();
    let mut rows = Vec::new();
    loop {
        let more = rdr.read_record(&mut rec).map_err(|e| Error::Table {
            file_name: file_name.to_string(),
            source: e,
        })?;
        if !more {
            break;
        }
        match rec.deserialize(Some(&headers)) {
            Ok(row) => rows.push(row),
            Err(e) => debug!("skipping malformed row in {file_name}: {e}"),
        }
    }
    Ok(rows)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::{Cursor, Write};
    use zip::write::FileOptions;

    pub(crate) fn fixture_zip(files: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            for (name, body) in files {
                writer.start_file(*name, FileOptions::default()).unwrap();
                writer.write_all(body.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    pub(crate) fn basic_archive() -> Vec<u8> {
        fixture_zip(&[
            (
                "routes.txt",
                "route_id,route_short_name,route_long_name,route_type,route_color,route_text_color\n\
                 R1,42,Downtown Express,3,0ea5e9,FFFFFF\n",
            ),
            (
                "trips.txt",
                "route_id,service_id,trip_id,trip_headsign,direction_id,shape_id\n\
                 R1,weekday,T1,Downtown,0,S1\n",
            ),
            (
                "stops.txt",
                "stop_id,stop_name,stop_lat,stop_lon,platform_code\n\
                 ST1,Central,57.70,11.97,A\n\
                 ST2,Harbor,57.71,11.98,\n",
            ),
            (
                "stop_times.txt",
                "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
                 T1,08:05:00,08:05:00,ST2,2\n\
                 T1,08:00:00,08:00:00,ST1,1\n",
            ),
            (
                "shapes.txt",
                "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence\n\
                 S1,57.71,11.98,2\n\
                 S1,57.70,11.97,1\n",
            ),
        ])
    }
}
