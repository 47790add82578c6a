//! Station to grid cell mapping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use archive_common::StationLocation;
use grib2_parser::{GridCoordinates, GridDefinition};
use projection::normalize_longitude;
use rayon::prelude::*;

/// Grid cell `(row, col)` minimizing the Chebyshev distance
/// `max(|dlat|, |dlon|)` in raw degrees.
///
/// Longitudes are compared in `[-180, 180)` without wrapping across the
/// antimeridian. Ties go to the lowest scan index. Returns `None` when the
/// grid has no finite coordinates.
pub fn nearest_cell(coords: &GridCoordinates, lat: f64, lon: f64) -> Option<(usize, usize)> {
    let lon = normalize_longitude(lon);

    coords
        .lats
        .par_iter()
        .zip(coords.lons.par_iter())
        .enumerate()
        .filter(|(_, (la, lo))| la.is_finite() && lo.is_finite())
        .map(|(i, (la, lo))| ((la - lat).abs().max((lo - lon).abs()), i))
        .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
        .map(|(_, i)| coords.row_col(i))
}

/// Statistics about the grid index cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Cache hit rate (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Run-scoped cache of `(station_id, grid definition) -> (row, col)`.
///
/// Shared by reference across extraction tasks. Concurrent misses for the
/// same key may both compute; they compute the same cell, so the later
/// insert is a no-op in effect.
#[derive(Default)]
pub struct GridIndexCache {
    cells: RwLock<HashMap<GridDefinition, HashMap<String, (usize, usize)>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl GridIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cell for `station` on `grid`, computing it from `coords` on a miss.
    pub fn lookup(
        &self,
        station: &StationLocation,
        grid: &GridDefinition,
        coords: &GridCoordinates,
    ) -> Option<(usize, usize)> {
        let cached = self
            .cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(grid)
            .and_then(|stations| stations.get(&station.station_id).copied());
        if let Some(cell) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(cell);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let cell = nearest_cell(coords, station.lat, station.lon)?;

        let mut cells = self.cells.write().unwrap_or_else(PoisonError::into_inner);
        let stations = cells.entry(grid.clone()).or_default();
        Some(*stations.entry(station.station_id.clone()).or_insert(cell))
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self
            .cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(HashMap::len)
            .sum();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
        }
    }
}
