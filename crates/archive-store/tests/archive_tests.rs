//! Read-merge-write behaviour against local and in-memory object stores.

use std::sync::Arc;

use archive_common::{Domain, Element, ExtractedRecord, ForecastFileRef, Model};
use archive_store::{ArchiveStore, ArchiveWriter, Partition};
use object_store::memory::InMemory;
use test_utils::utc;

fn file(init_hour: u32, forecast_hour: u32) -> ForecastFileRef {
    ForecastFileRef {
        model: Model::Nbm,
        init_time: utc(2024, 1, 15, init_hour),
        forecast_hour,
        domain: Domain::Alaska,
        url: String::new(),
    }
}

fn maxt(station: &str, file: &ForecastFileRef, value: f64) -> ExtractedRecord {
    let mut record = ExtractedRecord::new(station, file, Element::MaxT);
    record.values.insert("max_temp".to_string(), value);
    record
}

fn january() -> Partition {
    Partition::new(Model::Nbm, Element::MaxT, 2024, 1)
}

fn sorted(mut records: Vec<ExtractedRecord>) -> Vec<ExtractedRecord> {
    records.sort_by_key(|r| r.key());
    records
}

#[tokio::test]
async fn test_two_runs_with_same_key_keep_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let writer = ArchiveWriter::new(ArchiveStore::local(dir.path()));
    let f18 = file(0, 18);

    writer
        .write(&january(), vec![maxt("PAFA", &f18, -12.3)])
        .await
        .unwrap();
    let summary = writer
        .write(&january(), vec![maxt("PAFA", &f18, -11.0)])
        .await
        .unwrap();

    assert_eq!(summary.stats.duplicates, 1);
    let rows = writer.read(&january()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].station_id, "PAFA");
    assert_eq!(rows[0].valid_time, utc(2024, 1, 15, 18));
    assert_eq!(rows[0].value("max_temp"), Some(-12.3));
}

#[tokio::test]
async fn test_rerun_leaves_partition_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let writer = ArchiveWriter::new(ArchiveStore::local(dir.path()));
    let batch = vec![
        maxt("PAJN", &file(0, 18), 35.6),
        maxt("PAFA", &file(0, 18), -12.3),
        maxt("PAFA", &file(6, 18), -14.1),
    ];

    writer.write(&january(), batch.clone()).await.unwrap();
    let path = dir.path().join("nbm/maxt/2024_01_archive.parquet");
    let first = std::fs::read(&path).unwrap();

    let summary = writer.write(&january(), batch.clone()).await.unwrap();
    assert_eq!(summary.stats.added(), 0);
    assert_eq!(std::fs::read(&path).unwrap(), first);
    assert_eq!(writer.read(&january()).await.unwrap(), sorted(batch));
}

#[tokio::test]
async fn test_new_value_columns_extend_schema() {
    let store = ArchiveStore::object(Arc::new(InMemory::new()), "verification");
    let writer = ArchiveWriter::new(store);
    let partition = Partition::new(Model::Hrrr, Element::Precip6hr, 2024, 1);
    let hrrr = |fh| ForecastFileRef {
        model: Model::Hrrr,
        ..file(0, fh)
    };

    let mut first = ExtractedRecord::new("PAFA", &hrrr(6), Element::Precip6hr);
    first.values.insert("precip_accum".to_string(), 0.12);
    writer.write(&partition, vec![first]).await.unwrap();

    let mut second = ExtractedRecord::new("PAFA", &hrrr(12), Element::Precip6hr);
    second.values.insert("precip_accum".to_string(), 0.30);
    second.values.insert("precip_6h".to_string(), 0.18);
    let summary = writer.write(&partition, vec![second]).await.unwrap();
    assert_eq!(summary.stats.total, 2);
    assert_eq!(
        summary.location.to_string(),
        "object://verification/hrrr/2024_01_hrrr_precip6hr_archive.parquet"
    );

    let rows = writer.read(&partition).await.unwrap();
    assert_eq!(rows[0].value("precip_6h"), None);
    assert_eq!(rows[1].value("precip_6h"), Some(0.18));
    assert_eq!(rows[1].value("precip_accum"), Some(0.30));
}

#[tokio::test]
async fn test_partitioned_write_follows_valid_month() {
    let dir = tempfile::tempdir().unwrap();
    let writer = ArchiveWriter::new(ArchiveStore::local(dir.path()));
    let late = ForecastFileRef {
        init_time: utc(2024, 1, 31, 12),
        ..file(0, 18)
    };
    let records = vec![
        maxt("PAFA", &file(0, 18), -12.3),
        maxt("PAFA", &late, -20.0),
    ];

    let summaries = writer
        .write_partitioned(Model::Nbm, Element::MaxT, records)
        .await
        .unwrap();

    let months: Vec<_> = summaries
        .iter()
        .map(|s| (s.partition.year, s.partition.month, s.stats.total))
        .collect();
    assert_eq!(months, vec![(2024, 1, 1), (2024, 2, 1)]);
    assert!(dir.path().join("nbm/maxt/2024_02_archive.parquet").exists());
}

#[tokio::test]
async fn test_record_from_other_element_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let writer = ArchiveWriter::new(ArchiveStore::local(dir.path()));
    let mut record = maxt("PAFA", &file(0, 18), 1.0);
    record.element = Element::MinT;

    let err = writer.write(&january(), vec![record]).await.unwrap_err();
    assert!(err.is_fatal());
}
