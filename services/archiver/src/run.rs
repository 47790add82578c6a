//! Monthly archive loop.

use anyhow::{Context, Result};
use archive_common::{month_chunks, Domain, Element, Model, MonthChunk, StationLocation};
use archive_store::ArchiveWriter;
use chrono::NaiveDate;
use extraction::{LocateRequest, Orchestrator, SynopticQuery};
use tracing::{info, warn};

/// One archiving job: a model/element pair over a date range.
pub struct ArchiveRun {
    pub model: Model,
    pub element: Element,
    pub domain: Domain,
    pub forecast_hours: Vec<u32>,
    pub orchestrator: Orchestrator,
    pub writer: ArchiveWriter,
}

/// Totals across all chunks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunTotals {
    pub chunks: usize,
    pub skipped: usize,
    pub records: usize,
    pub rows_added: usize,
}

impl ArchiveRun {
    /// Archive every month chunk of `[start, end]` in order.
    ///
    /// Stops early on Ctrl-C. Partitions written before the signal stay valid.
    pub async fn run(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        stations: &[StationLocation],
    ) -> Result<RunTotals> {
        let mut totals = RunTotals::default();
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        for chunk in month_chunks(start, end) {
            tokio::select! {
                result = self.run_chunk(&chunk, stations, &mut totals) => result?,
                _ = &mut shutdown => {
                    warn!(year = chunk.year, month = chunk.month, "Received shutdown signal, stopping");
                    // Dropped transfers leave their partial files behind
                    if let Err(e) = self.orchestrator.remove_stale_downloads().await {
                        warn!(error = %e, "Failed to clear partial downloads");
                    }
                    break;
                }
            }
        }

        info!(
            model = %self.model,
            element = %self.element,
            chunks = totals.chunks,
            skipped = totals.skipped,
            records = totals.records,
            rows_added = totals.rows_added,
            "Archive run complete"
        );
        Ok(totals)
    }

    async fn run_chunk(
        &self,
        chunk: &MonthChunk,
        stations: &[StationLocation],
        totals: &mut RunTotals,
    ) -> Result<()> {
        info!(
            year = chunk.year,
            month = chunk.month,
            start = %chunk.start,
            end = %chunk.end,
            "Processing month"
        );

        let request = LocateRequest {
            model: self.model,
            domain: self.domain,
            start: chunk.start,
            end: chunk.end,
            forecast_hours: self.forecast_hours.clone(),
        };
        let output = self
            .orchestrator
            .run(&request, self.element, stations)
            .await
            .context("Extraction failed")?;
        totals.chunks += 1;

        if output.records.is_empty() {
            info!(year = chunk.year, month = chunk.month, "No records for month, skipping write");
            totals.skipped += 1;
            return Ok(());
        }

        totals.records += output.records.len();
        let summaries = self
            .writer
            .write_partitioned(self.model, self.element, output.records)
            .await
            .with_context(|| format!("Failed to write archive for {}-{:02}", chunk.year, chunk.month))?;
        totals.rows_added += summaries.iter().map(|s| s.stats.added()).sum::<usize>();
        Ok(())
    }
}

/// Station selection for an element.
pub fn station_query(
    token: String,
    state: &str,
    network: &str,
    element: Element,
) -> SynopticQuery {
    let (vars, precip) = match element {
        Element::Wind | Element::Gust => (vec!["wind_speed", "wind_direction", "wind_gust"], false),
        Element::MaxT | Element::MinT => (vec!["air_temp"], false),
        Element::Precip6hr | Element::Precip24hr => (Vec::new(), true),
        Element::Snow6hr | Element::Snow24hr => (vec!["snow_depth", "snow_accum"], false),
    };
    SynopticQuery {
        token,
        state: state.to_string(),
        network: network.to_string(),
        vars: vars.into_iter().map(str::to_string).collect(),
        precip,
        obrange: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archive_store::ArchiveStore;
    use extraction::{adapter_for, HttpClient, HttpSettings, OrchestratorConfig, RetryPolicy};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_precip_stations_use_precip_flag() {
        let query = station_query("t".to_string(), "AK", "1", Element::Precip24hr);
        assert!(query.precip);
        assert!(query.vars.is_empty());

        let query = station_query("t".to_string(), "AK", "1", Element::Wind);
        assert!(!query.precip);
        assert!(query.vars.contains(&"wind_gust".to_string()));
    }

    #[tokio::test]
    async fn test_months_without_files_write_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let downloads = tempfile::tempdir().unwrap();
        let archive = tempfile::tempdir().unwrap();
        let http = HttpClient::new(HttpSettings::default(), RetryPolicy::default()).unwrap();
        let config = OrchestratorConfig {
            workers: 2,
            download_dir: downloads.path().to_path_buf(),
            ..OrchestratorConfig::default()
        };
        let run = ArchiveRun {
            model: Model::Urma,
            element: Element::Wind,
            domain: Domain::Alaska,
            forecast_hours: Vec::new(),
            orchestrator: Orchestrator::new(http, adapter_for(Model::Urma, Some(server.uri())), config),
            writer: ArchiveWriter::new(ArchiveStore::local(archive.path())),
        };

        let start = NaiveDate::from_ymd_opt(2024, 1, 30).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let totals = run
            .run(start, end, &test_utils::alaska_stations())
            .await
            .unwrap();

        assert_eq!(totals.chunks, 2);
        assert_eq!(totals.skipped, 2);
        assert_eq!(totals.records, 0);
        assert_eq!(std::fs::read_dir(archive.path()).unwrap().count(), 0);
    }
}
