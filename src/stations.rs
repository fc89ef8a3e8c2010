/// Station registry and spatial neighbor index.
///
/// Station coordinates are projected to a local tangent plane in kilometers
/// (equirectangular, centered on the mean latitude/longitude of the current
/// station set) and held in an R-tree for k-nearest-neighbor queries. The
/// projection is accurate at the scale of a few hundred kilometers, which is
/// all a regional deployment needs.
///
/// The index is rebuilt wholesale from `RecordStore::all_stations` on a
/// periodic cadence. `rebuild` takes `&mut self`, so a rebuild can never
/// interleave with a query from the same tick.

use rstar::RTree;
use rstar::primitives::GeomWithData;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::logging::{self, Component};
use crate::model::{Result, Station};

/// Kilometers per degree of latitude.
const KM_PER_DEG: f64 = 111.32;

type IndexedPoint = GeomWithData<[f64; 2], usize>;

// ---------------------------------------------------------------------------
// Neighbor types
// ---------------------------------------------------------------------------

/// A nearby station and its planar distance.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub station_id: String,
    pub distance_km: f64,
}

/// station_id → nearest neighbors, ascending by distance.
pub type NeighborMap = HashMap<String, Vec<Neighbor>>;

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Project (lat, lon) pairs to local planar (x, y) km about their mean.
pub fn project_to_km(coords: &[(f64, f64)]) -> Vec<[f64; 2]> {
    if coords.is_empty() {
        return Vec::new();
    }
    let n = coords.len() as f64;
    let lat0 = coords.iter().map(|c| c.0).sum::<f64>() / n;
    let lon0 = coords.iter().map(|c| c.1).sum::<f64>() / n;
    let kx = lat0.to_radians().cos() * KM_PER_DEG;

    coords
        .iter()
        .map(|(lat, lon)| [(lon - lon0) * kx, (lat - lat0) * KM_PER_DEG])
        .collect()
}

// ---------------------------------------------------------------------------
// Spatial index
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct SpatialIndex {
    stations: Vec<Station>,
    coords_km: Vec<[f64; 2]>,
    id_to_idx: HashMap<String, usize>,
    tree: RTree<IndexedPoint>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from a station list.
    pub fn from_stations(stations: &[Station]) -> Self {
        let mut index = Self::new();
        index.rebuild(stations);
        index
    }

    /// Replace the whole index. Stations without coordinates are skipped.
    pub fn rebuild(&mut self, stations: &[Station]) {
        let located: Vec<Station> = stations
            .iter()
            .filter(|s| s.coordinates().is_some())
            .cloned()
            .collect();
        let coords: Vec<(f64, f64)> = located.iter().filter_map(|s| s.coordinates()).collect();

        self.coords_km = project_to_km(&coords);
        self.id_to_idx = located
            .iter()
            .enumerate()
            .map(|(i, s)| (s.station_id.clone(), i))
            .collect();
        self.tree = RTree::bulk_load(
            self.coords_km
                .iter()
                .enumerate()
                .map(|(i, p)| IndexedPoint::new(*p, i))
                .collect(),
        );
        self.stations = located;

        let skipped = stations.len() - self.stations.len();
        let mut message = format!("Neighbor index built for {} stations", self.stations.len());
        if skipped > 0 {
            message.push_str(&format!(" ({} without coordinates skipped)", skipped));
        }
        logging::info(Component::Stations, None, &message);
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Neighbor queries need at least two stations.
    pub fn is_ready(&self) -> bool {
        self.stations.len() >= 2
    }

    /// Up to `k` nearest other stations, ascending by distance in km.
    ///
    /// Empty when the index holds fewer than two stations or the station is
    /// unknown. Never includes the station itself.
    pub fn neighbors(&self, station_id: &str, k: usize) -> Vec<Neighbor> {
        if !self.is_ready() || k == 0 {
            return Vec::new();
        }
        let Some(&idx) = self.id_to_idx.get(station_id) else {
            return Vec::new();
        };

        self.tree
            .nearest_neighbor_iter_with_distance_2(&self.coords_km[idx])
            .filter(|(p, _)| p.data != idx)
            .take(k)
            .map(|(p, d2)| Neighbor {
                station_id: self.stations[p.data].station_id.clone(),
                distance_km: d2.sqrt(),
            })
            .collect()
    }

    /// Neighbor map for every listed station.
    pub fn neighbor_map<'a, I>(&self, station_ids: I, k: usize) -> NeighborMap
    where
        I: IntoIterator<Item = &'a str>,
    {
        station_ids
            .into_iter()
            .map(|sid| (sid.to_string(), self.neighbors(sid, k)))
            .collect()
    }

    /// Human-readable name, or the id itself when unknown.
    pub fn name<'a>(&'a self, station_id: &'a str) -> &'a str {
        match self.id_to_idx.get(station_id) {
            Some(&i) if !self.stations[i].name.is_empty() => &self.stations[i].name,
            _ => station_id,
        }
    }

    pub fn info(&self, station_id: &str) -> Option<&Station> {
        self.id_to_idx.get(station_id).map(|&i| &self.stations[i])
    }
}

// ---------------------------------------------------------------------------
// Station file loading
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StationFile {
    stations: Vec<StationEntry>,
}

#[derive(Debug, Deserialize)]
struct StationEntry {
    id: String,
    name: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Load seed stations from a TOML `[[stations]]` file.
///
/// Entries without both coordinates are skipped; the name defaults to the id.
pub fn load_station_file<P: AsRef<Path>>(path: P) -> Result<Vec<Station>> {
    let content = fs::read_to_string(path)?;
    parse_station_file(&content)
}

pub fn parse_station_file(content: &str) -> Result<Vec<Station>> {
    let file: StationFile = toml::from_str(content)?;
    let stations = file
        .stations
        .into_iter()
        .filter_map(|e| match (e.lat, e.lon) {
            (Some(lat), Some(lon)) => {
                let name = e.name.unwrap_or_else(|| e.id.clone());
                Some(Station::new(&e.id, &name, lat, lon))
            }
            _ => {
                logging::warn(Component::Stations, Some(&e.id), "station entry has no coordinates, skipped");
                None
            }
        })
        .collect();
    Ok(stations)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
