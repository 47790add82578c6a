//! End-to-end extraction against a mock forecast bucket.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use archive_common::{Domain, Element, ExtractedRecord, ForecastFileRef, Model};
use chrono::{DateTime, Utc};
use extraction::{
    adapter_for, DecodeRequest, DownloadPlan, ElementSpec, GridDataset, HttpClient, HttpSettings,
    LocateRequest, ModelAdapter, Orchestrator, OrchestratorConfig, RetryPolicy,
};
use test_utils::fixtures::stations;
use test_utils::{alaska_quarter_degree, alaska_stations, init_time, utc, Grib2Builder, IndexedFile};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Serves `Range: bytes=a-b` / `bytes=a-` requests from an in-memory file.
struct RangeResponder(Vec<u8>);

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="));
        let Some((start, end)) = range.and_then(|r| r.split_once('-')) else {
            return ResponseTemplate::new(200).set_body_bytes(self.0.clone());
        };

        let start: usize = start.parse().unwrap();
        let end: usize = if end.is_empty() {
            self.0.len() - 1
        } else {
            end.parse().unwrap()
        };
        ResponseTemplate::new(206).set_body_bytes(self.0[start..=end].to_vec())
    }
}

fn wind_file(with_gust: bool) -> IndexedFile {
    wind_file_at(5, with_gust)
}

fn wind_file_at(forecast_hour: u32, with_gust: bool) -> IndexedFile {
    let grid = alaska_quarter_degree();
    let field = |category, number, value| {
        Grib2Builder::new()
            .with_grid(grid)
            .with_parameter(0, category, number)
            .with_level(103, 10)
            .with_forecast_hour(forecast_hour)
            .with_constant_value(value)
    };
    let line = |name: &str| format!("{}:10 m above ground:{} hour fcst:", name, forecast_hour);

    let tmp = Grib2Builder::new().with_grid(grid).with_forecast_hour(forecast_hour);
    let mut file = IndexedFile::new()
        .push_built(init_time(), &format!("TMP:2 m above ground:{} hour fcst:", forecast_hour), &tmp)
        .push_built(init_time(), &line("WIND"), &field(2, 1, 10.0))
        .push_built(init_time(), &line("WDIR"), &field(2, 0, 225.0));
    if with_gust {
        file = file.push_built(init_time(), &line("GUST"), &field(2, 22, 15.0));
    }
    file
}

async fn serve(file: &IndexedFile) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/blend.20240115/12/core/blend.t12z.core.f005.ak.grib2.idx"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .with_priority(10)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"\.grib2\.idx$"))
        .respond_with(ResponseTemplate::new(200).set_body_string(file.index_text()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"\.grib2$"))
        .respond_with(RangeResponder(file.bytes.clone()))
        .mount(&server)
        .await;
    server
}

fn orchestrator(server: &MockServer, dir: &std::path::Path, model: Model) -> Orchestrator {
    let http = HttpClient::new(
        HttpSettings::default(),
        RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        },
    )
    .unwrap();
    let config = OrchestratorConfig {
        workers: 2,
        download_dir: dir.to_path_buf(),
        ..OrchestratorConfig::default()
    };
    Orchestrator::new(http, adapter_for(model, Some(server.uri())), config)
}

fn nbm_request() -> LocateRequest {
    LocateRequest {
        model: Model::Nbm,
        domain: Domain::Alaska,
        start: utc(2024, 1, 15, 12),
        end: utc(2024, 1, 16, 0),
        forecast_hours: vec![5],
    }
}

fn sorted(mut records: Vec<ExtractedRecord>) -> Vec<ExtractedRecord> {
    records.sort_by_key(|r| r.key());
    records
}

#[tokio::test]
async fn test_wind_records_for_every_station() {
    let file = wind_file(true);
    let server = serve(&file).await;
    let dir = tempfile::tempdir().unwrap();

    let output = orchestrator(&server, dir.path(), Model::Nbm)
        .run(&nbm_request(), Element::Wind, &alaska_stations())
        .await
        .unwrap();

    let summary = &output.summary;
    assert_eq!(summary.candidates, 2);
    assert_eq!(summary.located, 1);
    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.records, 3);
    assert_eq!(summary.failed(), 0);

    let records = sorted(output.records);
    let pajn = records.iter().find(|r| r.station_id == stations::PAJN.0).unwrap();
    assert_eq!(pajn.model, Model::Nbm);
    assert_eq!(pajn.forecast_hour, 5);
    assert_eq!(pajn.valid_time, utc(2024, 1, 15, 17));
    assert_eq!(pajn.value("wind_speed_kt"), Some(19.44));
    assert_eq!(pajn.value("wind_dir_deg"), Some(225.0));
    assert_eq!(pajn.value("wind_gust_kt"), Some(29.16));

    // Downloaded subsets are removed after extraction
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_rerun_is_idempotent_and_reuses_cells() {
    let file = wind_file(true);
    let server = serve(&file).await;
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(&server, dir.path(), Model::Nbm);

    let first = orchestrator
        .run(&nbm_request(), Element::Wind, &alaska_stations())
        .await
        .unwrap();
    let second = orchestrator
        .run(&nbm_request(), Element::Wind, &alaska_stations())
        .await
        .unwrap();

    assert_eq!(sorted(first.records), sorted(second.records));
    let stats = orchestrator.cache_stats();
    assert_eq!((stats.misses, stats.hits, stats.entries), (3, 3, 3));
}

#[tokio::test]
async fn test_incomplete_index_rejects_file_before_download() {
    let file = wind_file(false);
    let server = serve(&file).await;
    let dir = tempfile::tempdir().unwrap();

    let output = orchestrator(&server, dir.path(), Model::Nbm)
        .run(&nbm_request(), Element::Wind, &alaska_stations())
        .await
        .unwrap();

    assert!(output.records.is_empty());
    assert_eq!(output.summary.downloaded, 0);
    assert_eq!(output.summary.failures.get("field_not_found"), Some(&1));

    let downloads = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path().ends_with(".grib2"))
        .count();
    assert_eq!(downloads, 0);
}

#[tokio::test]
async fn test_unavailable_element_fails_before_network() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let err = orchestrator(&server, dir.path(), Model::Nbm)
        .run(&nbm_request(), Element::Precip24hr, &alaska_stations())
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_qmd_percentiles_for_day_boundary() {
    let grid = alaska_quarter_degree();
    let member = |percentile, mm| {
        Grib2Builder::new()
            .with_grid(grid)
            .with_parameter(0, 1, 8)
            .with_level(1, 0)
            .with_forecast_hour(24)
            .with_interval(24, 1)
            .with_percentile(percentile)
            .with_constant_value(mm)
    };
    let six_hour = Grib2Builder::new()
        .with_grid(grid)
        .with_parameter(0, 1, 8)
        .with_level(1, 0)
        .with_forecast_hour(24)
        .with_interval(6, 1)
        .with_percentile(50);

    let file = IndexedFile::new()
        .push_built(init_time(), "APCP:surface:18-24 hour acc fcst:50% level", &six_hour)
        .push_built(init_time(), "APCP:surface:0-1 day acc fcst:10% level", &member(10, 0.0))
        .push_built(init_time(), "APCP:surface:0-1 day acc fcst:ens std dev", &member(50, 9.0))
        .push_built(init_time(), "APCP:surface:0-1 day acc fcst:50% level", &member(50, 12.7))
        .push_built(init_time(), "APCP:surface:0-1 day acc fcst:90% level", &member(90, 25.4));

    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"\.grib2\.idx$"))
        .respond_with(ResponseTemplate::new(200).set_body_string(file.index_text()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"\.grib2$"))
        .respond_with(RangeResponder(file.bytes.clone()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let request = LocateRequest {
        model: Model::NbmQmd,
        domain: Domain::Alaska,
        start: utc(2024, 1, 15, 12),
        end: utc(2024, 1, 15, 13),
        forecast_hours: vec![24],
    };
    let output = orchestrator(&server, dir.path(), Model::NbmQmd)
        .run(&request, Element::Precip24hr, &[test_utils::station(stations::PAFA)])
        .await
        .unwrap();

    assert_eq!(output.records.len(), 1);
    let record = &output.records[0];
    assert_eq!(record.values.len(), 3);
    assert_eq!(record.value("qpf_p10"), Some(0.0));
    assert_eq!(record.value("qpf_p50"), Some(0.5));
    assert_eq!(record.value("qpf_p90"), Some(1.0));
}

/// Serves every HEAD and two NBM files at f005 and f006 of the 12Z cycle.
async fn serve_pair(f005: &IndexedFile, f006: &IndexedFile) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    for (hour, file) in [("f005", f005), ("f006", f006)] {
        Mock::given(method("GET"))
            .and(path_regex(format!(r"\.{}\.ak\.grib2\.idx$", hour)))
            .respond_with(ResponseTemplate::new(200).set_body_string(file.index_text()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(format!(r"\.{}\.ak\.grib2$", hour)))
            .respond_with(RangeResponder(file.bytes.clone()))
            .mount(&server)
            .await;
    }
    server
}

fn two_hour_request() -> LocateRequest {
    LocateRequest {
        forecast_hours: vec![5, 6],
        end: utc(2024, 1, 15, 13),
        ..nbm_request()
    }
}

#[tokio::test]
async fn test_failed_download_does_not_stop_sibling_file() {
    let good = wind_file_at(5, true);
    let server = serve_pair(&good, &wind_file_at(6, true)).await;
    Mock::given(method("GET"))
        .and(path_regex(r"\.f006\.ak\.grib2$"))
        .respond_with(ResponseTemplate::new(404))
        .with_priority(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let output = orchestrator(&server, dir.path(), Model::Nbm)
        .run(&two_hour_request(), Element::Wind, &alaska_stations())
        .await
        .unwrap();

    let summary = &output.summary;
    assert_eq!(summary.located, 2);
    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.failures.get("missing_file"), Some(&1));
    assert_eq!(summary.failed(), 1);

    assert_eq!(output.records.len(), 3);
    assert!(output.records.iter().all(|r| r.forecast_hour == 5));
    let pafa = output
        .records
        .iter()
        .find(|r| r.station_id == stations::PAFA.0)
        .unwrap();
    assert_eq!(pafa.value("wind_speed_kt"), Some(19.44));

    // The aborted subset leaves nothing behind
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

/// NBM adapter whose value extraction panics on six-hour grids.
struct FailingAdapter(Arc<dyn ModelAdapter>);

impl ModelAdapter for FailingAdapter {
    fn model(&self) -> Model {
        self.0.model()
    }

    fn build_url(&self, init_time: DateTime<Utc>, forecast_hour: u32, domain: Domain) -> String {
        self.0.build_url(init_time, forecast_hour, domain)
    }

    fn probe_url(&self, file: &ForecastFileRef) -> String {
        self.0.probe_url(file)
    }

    fn download_plan(&self, spec: &ElementSpec) -> DownloadPlan {
        self.0.download_plan(spec)
    }

    fn decode_request(&self, spec: &ElementSpec) -> DecodeRequest {
        self.0.decode_request(spec)
    }

    fn extract_values(
        &self,
        spec: &ElementSpec,
        dataset: &GridDataset,
        cell: (usize, usize),
    ) -> BTreeMap<String, f64> {
        if dataset.forecast_steps.contains(&6) {
            panic!("bad cell {:?}", cell);
        }
        self.0.extract_values(spec, dataset, cell)
    }
}

#[tokio::test]
async fn test_panicking_extraction_is_a_file_failure() {
    let server = serve_pair(&wind_file_at(5, true), &wind_file_at(6, true)).await;
    let dir = tempfile::tempdir().unwrap();
    let http = HttpClient::new(HttpSettings::default(), RetryPolicy::default()).unwrap();
    let adapter = Arc::new(FailingAdapter(adapter_for(Model::Nbm, Some(server.uri()))));
    let config = OrchestratorConfig {
        workers: 2,
        download_dir: dir.path().to_path_buf(),
        ..OrchestratorConfig::default()
    };

    let output = Orchestrator::new(http, adapter, config)
        .run(&two_hour_request(), Element::Wind, &alaska_stations())
        .await
        .unwrap();

    assert_eq!(output.summary.downloaded, 2);
    assert_eq!(output.summary.extracted, 1);
    assert_eq!(output.summary.failures.get("decode"), Some(&1));
    assert_eq!(output.records.len(), 3);
    assert!(output.records.iter().all(|r| r.forecast_hour == 5));
}

fn hrrr_precip_file(forecast_hour: u32, total_mm: f32) -> IndexedFile {
    let builder = Grib2Builder::new()
        .with_grid(alaska_quarter_degree())
        .with_parameter(0, 1, 8)
        .with_level(1, 0)
        .with_forecast_hour(forecast_hour)
        .with_interval(forecast_hour, 1)
        .with_constant_value(total_mm);
    let tmp = Grib2Builder::new()
        .with_grid(alaska_quarter_degree())
        .with_forecast_hour(forecast_hour);
    IndexedFile::new()
        .push_built(init_time(), &format!("TMP:2 m above ground:{} hour fcst:", forecast_hour), &tmp)
        .push_built(
            init_time(),
            &format!("APCP:surface:0-{} hour acc fcst:", forecast_hour),
            &builder,
        )
}

#[tokio::test]
async fn test_hrrr_run_totals_become_six_hour_intervals() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    for (hour, total_mm) in [(6u32, 2.54f32), (12, 12.7)] {
        let file = hrrr_precip_file(hour, total_mm);
        Mock::given(method("GET"))
            .and(path(format!("/hrrr.20240115/alaska/hrrr.t12z.wrfsfcf{:02}.ak.grib2.idx", hour)))
            .respond_with(ResponseTemplate::new(200).set_body_string(file.index_text()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/hrrr.20240115/alaska/hrrr.t12z.wrfsfcf{:02}.ak.grib2", hour)))
            .respond_with(RangeResponder(file.bytes.clone()))
            .mount(&server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let request = LocateRequest {
        model: Model::Hrrr,
        domain: Domain::Alaska,
        start: utc(2024, 1, 15, 12),
        end: utc(2024, 1, 15, 13),
        forecast_hours: vec![6, 12],
    };
    let output = orchestrator(&server, dir.path(), Model::Hrrr)
        .run(&request, Element::Precip6hr, &[test_utils::station(stations::PAJN)])
        .await
        .unwrap();

    assert_eq!(output.summary.extracted, 2);
    let records = sorted(output.records);
    assert_eq!(records.len(), 2);

    let first = &records[0];
    assert_eq!(first.forecast_hour, 6);
    assert_eq!(first.value("precip_accum"), Some(0.1));
    // f006 has no predecessor in the batch
    assert_eq!(first.value("precip_6h"), None);

    let second = &records[1];
    assert_eq!(second.forecast_hour, 12);
    assert_eq!(second.valid_time, utc(2024, 1, 16, 0));
    assert_eq!(second.value("precip_accum"), Some(0.5));
    assert_eq!(second.value("precip_6h"), Some(0.4));
}
