//! Bounded-concurrency driver of the per-file pipeline.
//!
//! Each located file becomes one task: match index, download, decode,
//! extract. Tasks run `workers` at a time and are isolated from each
//! other; a failed or timed-out task contributes no records and is
//! counted in the [`RunSummary`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use archive_common::{
    ArchiveError, ArchiveResult, Element, ExtractedRecord, ForecastFileRef, StationLocation,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use metrics::counter;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{DownloadPlan, ModelAdapter};
use crate::decode::{Grib2Decoder, GridDataset, GridDecoder};
use crate::download::RangeDownloader;
use crate::elements::{element_spec, ElementSpec};
use crate::http::HttpClient;
use crate::locator::{FileLocator, LocateRequest};
use crate::normalize::round_to;
use crate::spatial::{CacheStats, GridIndexCache};

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Files processed concurrently
    pub workers: usize,
    /// Upper bound on one file's download, decode and extraction
    pub task_timeout: Duration,
    /// Where downloaded subsets are written
    pub download_dir: PathBuf,
    /// Keep local files after extraction
    pub keep_downloads: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            task_timeout: Duration::from_secs(900),
            download_dir: std::env::temp_dir().join("model-archiver"),
            keep_downloads: false,
        }
    }
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub candidates: usize,
    pub located: usize,
    pub downloaded: usize,
    pub extracted: usize,
    pub records: usize,
    /// Failed files by error kind
    pub failures: BTreeMap<&'static str, usize>,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.failures.values().sum()
    }

    fn log(&self, request: &LocateRequest, element: Element) {
        info!(
            model = %request.model,
            element = %element,
            candidates = self.candidates,
            located = self.located,
            downloaded = self.downloaded,
            extracted = self.extracted,
            records = self.records,
            failed = self.failed(),
            failures = ?self.failures,
            "Extraction run complete"
        );
    }
}

/// Records and counts from one run.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub records: Vec<ExtractedRecord>,
    pub summary: RunSummary,
}

struct FileOutcome {
    downloaded: bool,
    result: ArchiveResult<Vec<ExtractedRecord>>,
}

/// Runs locate, download, decode and extract for one model.
///
/// Owns the run's [`GridIndexCache`]; tasks borrow it.
pub struct Orchestrator {
    config: OrchestratorConfig,
    http: HttpClient,
    adapter: Arc<dyn ModelAdapter>,
    decoder: Arc<dyn GridDecoder>,
    downloader: RangeDownloader,
    locator: FileLocator,
    cache: Arc<GridIndexCache>,
}

impl Orchestrator {
    pub fn new(http: HttpClient, adapter: Arc<dyn ModelAdapter>, config: OrchestratorConfig) -> Self {
        let workers = config.workers.max(1);
        Self {
            downloader: RangeDownloader::new(http.clone(), config.download_dir.clone()),
            locator: FileLocator::new(http.clone(), adapter.clone(), workers * 4),
            decoder: Arc::new(Grib2Decoder::new()),
            cache: Arc::new(GridIndexCache::new()),
            config: OrchestratorConfig { workers, ..config },
            http,
            adapter,
        }
    }

    /// Replace the grid decoding backend.
    pub fn with_decoder(mut self, decoder: Arc<dyn GridDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Clear partial downloads left in the download directory.
    pub async fn remove_stale_downloads(&self) -> ArchiveResult<usize> {
        self.downloader.remove_stale_partials().await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Archive `element` for every located file in `request`.
    ///
    /// Configuration problems fail before any request is made. Per-file
    /// failures are logged and counted, never returned. An empty
    /// `request.forecast_hours` uses the element's default hours.
    #[instrument(skip(self, request, stations), fields(model = %request.model, element = %element))]
    pub async fn run(
        &self,
        request: &LocateRequest,
        element: Element,
        stations: &[StationLocation],
    ) -> ArchiveResult<RunOutput> {
        let spec = element_spec(request.model, element)?;
        if request.model != self.adapter.model() {
            return Err(ArchiveError::Configuration(format!(
                "orchestrator for '{}' cannot run '{}'",
                self.adapter.model(),
                request.model
            )));
        }
        if stations.is_empty() {
            return Err(ArchiveError::Configuration("no stations to extract".to_string()));
        }

        let mut request = request.clone();
        if request.forecast_hours.is_empty() {
            request.forecast_hours = spec.forecast_hours.to_vec();
        }

        let located = self.locator.locate(&request).await?;
        let mut output = self.process_files(&spec, located.files, stations).await;
        output.summary.candidates = located.candidates;

        if let Some(rule) = spec.interval {
            derive_intervals(&mut output.records, rule.total, rule.output, rule.hours);
        }

        output.summary.log(&request, element);
        Ok(output)
    }

    /// Process already-located files concurrently.
    pub async fn process_files(
        &self,
        spec: &ElementSpec,
        files: Vec<ForecastFileRef>,
        stations: &[StationLocation],
    ) -> RunOutput {
        let total = files.len();
        let spec = Arc::new(spec.clone());
        let stations: Arc<[StationLocation]> = stations.into();
        let mut output = RunOutput {
            records: Vec::new(),
            summary: RunSummary {
                candidates: total,
                located: total,
                ..RunSummary::default()
            },
        };

        let (spec, stations) = (&spec, &stations);
        let mut tasks = stream::iter(files)
            .map(|file| async move {
                let outcome = match tokio::time::timeout(
                    self.config.task_timeout,
                    self.process_file(spec, &file, stations),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => FileOutcome {
                        downloaded: false,
                        result: Err(ArchiveError::TransientNetwork {
                            url: file.url.clone(),
                            message: format!("task timed out after {:?}", self.config.task_timeout),
                        }),
                    },
                };
                (file, outcome)
            })
            .buffer_unordered(self.config.workers);

        let mut completed = 0;
        while let Some((file, outcome)) = tasks.next().await {
            completed += 1;
            if outcome.downloaded {
                output.summary.downloaded += 1;
            }
            match outcome.result {
                Ok(records) => {
                    counter!("archiver_files_processed_total", "status" => "ok").increment(1);
                    info!(
                        url = %file.url,
                        records = records.len(),
                        completed = completed,
                        total = total,
                        "File extracted"
                    );
                    output.summary.extracted += 1;
                    output.records.extend(records);
                }
                Err(e) => {
                    counter!("archiver_files_processed_total", "status" => e.kind()).increment(1);
                    warn!(
                        url = %file.url,
                        kind = e.kind(),
                        error = %e,
                        completed = completed,
                        total = total,
                        "File skipped"
                    );
                    *output.summary.failures.entry(e.kind()).or_default() += 1;
                }
            }
        }

        output.summary.records = output.records.len();
        counter!("archiver_records_extracted_total").increment(output.records.len() as u64);
        output
    }

    async fn process_file(
        &self,
        spec: &Arc<ElementSpec>,
        file: &ForecastFileRef,
        stations: &Arc<[StationLocation]>,
    ) -> FileOutcome {
        let path = match self.fetch(spec, file).await {
            Ok(path) => path,
            Err(e) => {
                return FileOutcome {
                    downloaded: false,
                    result: Err(e),
                }
            }
        };

        let decoded = self
            .decoder
            .decode(&path, &self.adapter.decode_request(spec))
            .await;
        if !self.config.keep_downloads {
            self.remove_local(&path).await;
        }

        let result = match decoded {
            Ok(dataset) => self.extract(spec, file, stations, dataset).await,
            Err(e) => Err(e),
        };

        FileOutcome {
            downloaded: true,
            result,
        }
    }

    /// Cell lookup and value extraction for every station.
    ///
    /// A cold cache scans the whole grid, so this runs on the blocking pool.
    async fn extract(
        &self,
        spec: &Arc<ElementSpec>,
        file: &ForecastFileRef,
        stations: &Arc<[StationLocation]>,
        dataset: GridDataset,
    ) -> ArchiveResult<Vec<ExtractedRecord>> {
        let cache = self.cache.clone();
        let adapter = self.adapter.clone();
        let spec = spec.clone();
        let stations = stations.clone();
        let file = file.clone();

        tokio::task::spawn_blocking(move || {
            stations
                .iter()
                .filter_map(|station| {
                    let cell = cache.lookup(station, &dataset.grid, &dataset.coords)?;
                    let values = adapter.extract_values(&spec, &dataset, cell);
                    if values.is_empty() {
                        debug!(station = %station.station_id, url = %file.url, "No values at station cell");
                        return None;
                    }
                    let mut record = ExtractedRecord::new(station.station_id.clone(), &file, spec.element);
                    record.values = values;
                    Some(record)
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| ArchiveError::Decode(format!("extraction task failed: {}", e)))
    }

    async fn fetch(&self, spec: &ElementSpec, file: &ForecastFileRef) -> ArchiveResult<PathBuf> {
        match self.adapter.download_plan(spec) {
            DownloadPlan::Ranges(matcher) => {
                let ranges = matcher.resolve(&self.http, file).await?;
                self.downloader.download_ranges(file, &ranges).await
            }
            DownloadPlan::WholeFile => self.downloader.download_whole(file).await,
        }
    }

    async fn remove_local(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "Failed to remove downloaded file");
        }
    }
}

/// Fill `output` with the increase of run-total column `total` over the
/// preceding `hours`, per station and init time.
///
/// Negative differences clip to zero. Records without a predecessor in the
/// batch, or without a total, are left unchanged.
pub fn derive_intervals(records: &mut [ExtractedRecord], total: &str, output: &str, hours: u32) {
    let totals: HashMap<(String, DateTime<Utc>, DateTime<Utc>), f64> = records
        .iter()
        .filter_map(|r| {
            r.value(total)
                .map(|v| ((r.station_id.clone(), r.init_time, r.valid_time), v))
        })
        .collect();

    let step = chrono::Duration::hours(hours as i64);
    for record in records.iter_mut() {
        let Some(current) = record.value(total) else {
            continue;
        };
        let previous_key = (
            record.station_id.clone(),
            record.init_time,
            record.valid_time - step,
        );
        if let Some(previous) = totals.get(&previous_key) {
            let interval = round_to((current - previous).max(0.0), 2);
            record.values.insert(output.to_string(), interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archive_common::{Domain, Model};
    use test_utils::init_time;

    fn record(station: &str, fh: u32, total: Option<f64>) -> ExtractedRecord {
        let file = ForecastFileRef {
            model: Model::Hrrr,
            init_time: init_time(),
            forecast_hour: fh,
            domain: Domain::Alaska,
            url: String::new(),
        };
        let mut record = ExtractedRecord::new(station, &file, Element::Precip6hr);
        if let Some(total) = total {
            record.values.insert("precip_accum".to_string(), total);
        }
        record
    }

    #[test]
    fn test_intervals_from_run_totals() {
        let mut records = vec![
            record("PAJN", 12, Some(0.5)),
            record("PAJN", 0, Some(0.0)),
            record("PAJN", 6, Some(0.2)),
            record("PAFA", 6, Some(0.1)),
        ];
        derive_intervals(&mut records, "precip_accum", "precip_6h", 6);

        assert_eq!(records[0].value("precip_6h"), Some(0.3));
        assert_eq!(records[1].value("precip_6h"), None);
        assert_eq!(records[2].value("precip_6h"), Some(0.2));
        // No PAFA predecessor in the batch
        assert_eq!(records[3].value("precip_6h"), None);
    }

    #[test]
    fn test_negative_interval_clipped() {
        let mut records = vec![record("PAJN", 6, Some(0.4)), record("PAJN", 12, Some(0.35))];
        derive_intervals(&mut records, "precip_accum", "precip_6h", 6);
        assert_eq!(records[1].value("precip_6h"), Some(0.0));
    }

    #[test]
    fn test_gap_leaves_total_only() {
        let mut records = vec![record("PAJN", 6, Some(0.4)), record("PAJN", 18, Some(0.9)), record("PAJN", 24, None)];
        derive_intervals(&mut records, "precip_accum", "precip_6h", 6);
        assert_eq!(records[1].value("precip_6h"), None);
        assert_eq!(records[1].value("precip_accum"), Some(0.9));
        assert!(records[2].values.is_empty());
    }

    #[test]
    fn test_summary_failed_count() {
        let mut summary = RunSummary::default();
        summary.failures.insert("missing_file", 2);
        summary.failures.insert("decode", 1);
        assert_eq!(summary.failed(), 3);
    }
}
