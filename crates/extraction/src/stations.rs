//! Station metadata from the Synoptic stations API, with a local cache.

use std::path::Path;

use archive_common::{ArchiveError, ArchiveResult, StationLocation};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::http::HttpClient;

pub const DEFAULT_METADATA_URL: &str = "https://api.synopticdata.com/v2/stations/metadata";

/// Station selection sent to the metadata service.
#[derive(Debug, Clone)]
pub struct SynopticQuery {
    pub token: String,
    pub state: String,
    /// Comma-separated network ids
    pub network: String,
    /// Observed variables a station must report
    pub vars: Vec<String>,
    /// Select precipitation-reporting stations instead of `vars`
    pub precip: bool,
    /// Observation period, `YYYYMMDDhhmm,YYYYMMDDhhmm`
    pub obrange: Option<String>,
}

impl SynopticQuery {
    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("token", self.token.clone()),
            ("state", self.state.clone()),
            ("network", self.network.clone()),
            ("output", "json".to_string()),
        ];
        if self.precip {
            params.push(("precip", "1".to_string()));
        } else if !self.vars.is_empty() {
            params.push(("vars", self.vars.join(",")));
        }
        if let Some(obrange) = &self.obrange {
            params.push(("obrange", obrange.clone()));
        }
        params
    }
}

/// Client for the station metadata endpoint.
pub struct SynopticClient {
    http: HttpClient,
    base_url: String,
}

impl SynopticClient {
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    #[instrument(skip(self, query), fields(state = %query.state, network = %query.network))]
    pub async fn fetch(&self, query: &SynopticQuery) -> ArchiveResult<Vec<StationLocation>> {
        let params = query.params();
        let body = self.http.get_json(&self.base_url, &params).await?;
        parse_stations(&body)
    }
}

/// Map a metadata response to stations; entries without an id or valid
/// coordinates are dropped.
pub fn parse_stations(body: &Value) -> ArchiveResult<Vec<StationLocation>> {
    if let Some(code) = body.pointer("/SUMMARY/RESPONSE_CODE").and_then(number) {
        if code != 1.0 {
            let message = body
                .pointer("/SUMMARY/RESPONSE_MESSAGE")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(ArchiveError::Configuration(format!(
                "station metadata request rejected: {}",
                message
            )));
        }
    }

    let entries = body
        .get("STATION")
        .and_then(Value::as_array)
        .ok_or_else(|| ArchiveError::Decode("metadata response has no STATION list".to_string()))?;

    let mut stations = Vec::with_capacity(entries.len());
    for entry in entries {
        let id = entry.get("STID").and_then(Value::as_str);
        let lat = entry.get("LATITUDE").and_then(number);
        let lon = entry.get("LONGITUDE").and_then(number);
        let (Some(id), Some(lat), Some(lon)) = (id, lat, lon) else {
            warn!(entry = %entry, "Skipping station without id or coordinates");
            continue;
        };

        let mut station = StationLocation::new(id, lat, lon);
        station.name = entry.get("NAME").and_then(Value::as_str).map(str::to_string);
        station.elevation = entry.get("ELEVATION").and_then(number);
        station.zone = entry
            .get("NWSZONE")
            .and_then(Value::as_str)
            .filter(|z| !z.is_empty())
            .map(str::to_string);
        stations.push(station);
    }
    Ok(stations)
}

/// The service sends numbers either as JSON numbers or as strings.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// Stations for one run.
#[derive(Debug, Clone, Default)]
pub struct StationCatalog {
    pub stations: Vec<StationLocation>,
}

impl StationCatalog {
    /// Read the JSON cache at `path`, or fetch and write it when absent.
    pub async fn load_or_fetch(
        path: &Path,
        client: &SynopticClient,
        query: &SynopticQuery,
    ) -> ArchiveResult<Self> {
        if tokio::fs::try_exists(path).await? {
            let catalog = Self::load(path).await?;
            info!(path = %path.display(), stations = catalog.stations.len(), "Loaded cached station metadata");
            return Ok(catalog);
        }

        let catalog = Self {
            stations: client.fetch(query).await?,
        };
        catalog.save(path).await?;
        info!(path = %path.display(), stations = catalog.stations.len(), "Fetched station metadata");
        Ok(catalog)
    }

    pub async fn load(path: &Path) -> ArchiveResult<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        let stations = serde_json::from_str(&text).map_err(|e| {
            ArchiveError::Configuration(format!("invalid station file {}: {}", path.display(), e))
        })?;
        Ok(Self { stations })
    }

    pub async fn save(&self, path: &Path) -> ArchiveResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let text = serde_json::to_string_pretty(&self.stations)
            .map_err(|e| ArchiveError::Storage(format!("failed to encode stations: {}", e)))?;
        tokio::fs::write(path, text).await?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}
