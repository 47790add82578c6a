//! Candidate file enumeration and existence probing.

use std::sync::Arc;

use archive_common::{init_times, ArchiveError, ArchiveResult, Domain, ForecastFileRef, Model};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use metrics::counter;
use tracing::{debug, info, instrument, warn};

use crate::adapters::ModelAdapter;
use crate::http::HttpClient;

/// Model, init-time range and forecast hours to look for.
#[derive(Debug, Clone)]
pub struct LocateRequest {
    pub model: Model,
    pub domain: Domain,
    /// First init time considered, inclusive
    pub start: DateTime<Utc>,
    /// End of the init-time range, exclusive
    pub end: DateTime<Utc>,
    pub forecast_hours: Vec<u32>,
}

/// Probe outcome for a batch of candidates.
#[derive(Debug, Clone, Default)]
pub struct Located {
    pub candidates: usize,
    /// Confirmed files, ordered by init time then forecast hour
    pub files: Vec<ForecastFileRef>,
}

/// Builds candidate URLs from a model adapter and probes them.
pub struct FileLocator {
    http: HttpClient,
    adapter: Arc<dyn ModelAdapter>,
    concurrency: usize,
}

impl FileLocator {
    pub fn new(http: HttpClient, adapter: Arc<dyn ModelAdapter>, concurrency: usize) -> Self {
        Self {
            http,
            adapter,
            concurrency: concurrency.max(1),
        }
    }

    /// Every (init time, forecast hour) candidate in the request.
    pub fn candidates(&self, request: &LocateRequest) -> ArchiveResult<Vec<ForecastFileRef>> {
        if request.model != self.adapter.model() {
            return Err(ArchiveError::Configuration(format!(
                "locator for '{}' cannot serve '{}'",
                self.adapter.model(),
                request.model
            )));
        }

        let hours: &[u32] = if request.model.has_forecast_hours() {
            &request.forecast_hours
        } else {
            &[0]
        };

        let files = init_times(request.start, request.end, request.model.cycle_hours())
            .into_iter()
            .flat_map(|init_time| {
                hours.iter().map(move |&forecast_hour| ForecastFileRef {
                    model: request.model,
                    init_time,
                    forecast_hour,
                    domain: request.domain,
                    url: self.adapter.build_url(init_time, forecast_hour, request.domain),
                })
            })
            .collect();
        Ok(files)
    }

    /// Probe every candidate once; missing files are logged and skipped.
    #[instrument(skip(self, request), fields(model = %request.model, domain = %request.domain))]
    pub async fn locate(&self, request: &LocateRequest) -> ArchiveResult<Located> {
        let candidates = self.candidates(request)?;
        let total = candidates.len();

        let mut files: Vec<ForecastFileRef> = stream::iter(candidates)
            .map(|file| async move {
                let probe_url = self.adapter.probe_url(&file);
                match self.http.probe(&probe_url).await {
                    Ok(()) => Some(file),
                    Err(ArchiveError::MissingFile(_)) => {
                        debug!(url = %probe_url, "Candidate file not available");
                        counter!("archiver_files_missing_total").increment(1);
                        None
                    }
                    Err(e) => {
                        warn!(url = %probe_url, error = %e, kind = e.kind(), "Probe failed, skipping file");
                        counter!("archiver_files_missing_total").increment(1);
                        None
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|file| async move { file })
            .collect()
            .await;

        files.sort_by(|a, b| {
            (a.init_time, a.forecast_hour).cmp(&(b.init_time, b.forecast_hour))
        });

        info!(
            candidates = total,
            located = files.len(),
            missing = total - files.len(),
            "Located forecast files"
        );

        Ok(Located {
            candidates: total,
            files,
        })
    }
}
