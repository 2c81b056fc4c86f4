//! Loading the pipeline inputs from a source data directory.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::info;

use crate::error::InputError;
use crate::flood::FloodDepths;
use crate::model::{Coordinate, OdPoint, Way};
use crate::traffic::TrafficRecord;

/// Well-known file locations inside a source directory.
#[derive(Debug, Clone)]
pub struct SourceFiles {
    pub od: PathBuf,
    pub osrm: PathBuf,
    pub ways: PathBuf,
    pub flood_depths: PathBuf,
    pub traffic: PathBuf,
}

impl SourceFiles {
    pub fn new(source_dir: &Path) -> Self {
        Self {
            od: source_dir.join("od.geojson"),
            osrm: source_dir.join("osrm"),
            ways: source_dir.join("roadnetwork-osm-ways.json"),
            flood_depths: source_dir.join("flood-depths-current.json"),
            traffic: source_dir.join("traffic.json"),
        }
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, InputError> {
    let file = File::open(path).map_err(|source| InputError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| InputError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<serde_json::Value>,
}

/// Reads the OD point features; their order defines the OD indices.
pub fn load_od_points(path: &Path) -> Result<Vec<OdPoint>, InputError> {
    let collection: FeatureCollection = read_json(path)?;
    let points = od_points_from_features(collection.features)?;
    info!(path = %path.display(), count = points.len(), "Using OD Pairs");
    Ok(points)
}

pub fn od_points_from_features(features: Vec<serde_json::Value>) -> Result<Vec<OdPoint>, InputError> {
    features
        .into_iter()
        .enumerate()
        .map(|(index, feature)| {
            let coordinates = &feature["geometry"]["coordinates"];
            let (Some(lon), Some(lat)) = (coordinates[0].as_f64(), coordinates[1].as_f64()) else {
                return Err(InputError::BadFeature { index });
            };
            let object_id = feature["properties"]["OBJECTID"].as_i64();
            Ok(OdPoint {
                index,
                coordinate: Coordinate::new(lon, lat),
                object_id,
                feature,
            })
        })
        .collect()
}

pub fn load_ways(path: &Path) -> Result<Vec<Way>, InputError> {
    let ways: Vec<Way> = read_json(path)?;
    info!(path = %path.display(), count = ways.len(), "Using RN Ways");
    Ok(ways)
}

pub fn load_flood_depths(path: &Path) -> Result<FloodDepths, InputError> {
    let depths: FloodDepths = read_json(path)?;
    info!(path = %path.display(), ways = depths.len(), "Using Flood depth");
    Ok(depths)
}

/// Traffic records, or `None` when the file does not exist.
pub fn load_traffic(path: &Path) -> Result<Option<Vec<TrafficRecord>>, InputError> {
    if !path.exists() {
        info!(path = %path.display(), "No traffic file, OD pairs weigh 1");
        return Ok(None);
    }
    let records: Vec<TrafficRecord> = read_json(path)?;
    info!(path = %path.display(), records = records.len(), "Using Traffic");
    Ok(Some(records))
}

/// Keeps the ways whose id is listed, all of them when `ids` is `None`.
pub fn select_ways(ways: &[Way], ids: Option<&[String]>) -> Vec<Way> {
    match ids {
        Some(ids) => ways
            .iter()
            .filter(|way| ids.iter().any(|id| *id == way.id))
            .cloned()
            .collect(),
        None => ways.to_vec(),
    }
}
