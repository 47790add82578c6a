//! Selective download of matched byte ranges.
//!
//! Ranges are fetched in order and appended to `{name}.partial`; the file is
//! renamed to its final name only once every range has arrived. Any failed
//! range discards the partial file, so a local file either holds every
//! requested message or does not exist.

use std::path::{Path, PathBuf};

use archive_common::{ArchiveResult, ForecastFileRef, MatchedRange};
use futures::StreamExt;
use metrics::counter;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::http::{transport_error, HttpClient};

/// Fetches matched ranges (or whole files) into a local directory.
#[derive(Clone)]
pub struct RangeDownloader {
    http: HttpClient,
    dir: PathBuf,
}

impl RangeDownloader {
    pub fn new(http: HttpClient, dir: impl Into<PathBuf>) -> Self {
        Self {
            http,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Delete `*.partial` files left by transfers that never finished,
    /// such as those dropped by an interrupted run. Returns how many were
    /// removed.
    pub async fn remove_stale_partials(&self) -> ArchiveResult<usize> {
        let mut entries = match fs::read_dir(self.dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "partial") && entry.file_type().await?.is_file() {
                fs::remove_file(&path).await?;
                debug!(path = %path.display(), "Removed stale partial download");
                removed += 1;
            }
        }
        if removed > 0 {
            info!(dir = %self.dir().display(), removed = removed, "Removed stale partial downloads");
        }
        Ok(removed)
    }

    /// Download `ranges` of `file` in order into one local file.
    #[instrument(skip(self, file, ranges), fields(url = %file.url, ranges = ranges.len()))]
    pub async fn download_ranges(
        &self,
        file: &ForecastFileRef,
        ranges: &[MatchedRange],
    ) -> ArchiveResult<PathBuf> {
        let (temp_path, final_path) = self.paths(file).await?;

        let result = self.write_ranges(&file.url, ranges, &temp_path).await;
        self.finish(result, &temp_path, &final_path).await
    }

    /// Download the entire file, for models without an index.
    #[instrument(skip(self, file), fields(url = %file.url))]
    pub async fn download_whole(&self, file: &ForecastFileRef) -> ArchiveResult<PathBuf> {
        let (temp_path, final_path) = self.paths(file).await?;
        let url = file.url.as_str();
        let http = &self.http;
        let temp = temp_path.as_path();

        // Each attempt restarts the transfer into a truncated file
        let result = http
            .retry_policy()
            .run(url, move || async move {
                let response = http.get_stream(url).await?;
                let mut out = File::create(temp).await?;
                let mut stream = response.bytes_stream();
                let mut written = 0u64;
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| transport_error(url, e))?;
                    out.write_all(&chunk).await?;
                    written += chunk.len() as u64;
                }
                out.flush().await?;
                Ok(written)
            })
            .await;

        self.finish(result, &temp_path, &final_path).await
    }

    async fn paths(&self, file: &ForecastFileRef) -> ArchiveResult<(PathBuf, PathBuf)> {
        fs::create_dir_all(&self.dir).await?;
        let name = file.local_file_name();
        Ok((
            self.dir.join(format!("{}.partial", name)),
            self.dir.join(name),
        ))
    }

    async fn write_ranges(
        &self,
        url: &str,
        ranges: &[MatchedRange],
        temp_path: &Path,
    ) -> ArchiveResult<u64> {
        let mut out = File::create(temp_path).await?;
        let mut written = 0u64;
        for range in ranges {
            let body = self.http.get_range(url, range).await?;
            out.write_all(&body).await?;
            written += body.len() as u64;
            debug!(range = %range.range_header(), field = %range.field_description, "Wrote range");
        }
        out.flush().await?;
        Ok(written)
    }

    async fn finish(
        &self,
        result: ArchiveResult<u64>,
        temp_path: &Path,
        final_path: &Path,
    ) -> ArchiveResult<PathBuf> {
        match result {
            Ok(bytes) => {
                fs::rename(temp_path, final_path).await?;
                counter!("archiver_downloaded_bytes_total").increment(bytes);
                info!(path = %final_path.display(), bytes = bytes, "Download completed");
                Ok(final_path.to_path_buf())
            }
            Err(e) => {
                if let Err(remove_err) = fs::remove_file(temp_path).await {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %temp_path.display(), error = %remove_err, "Failed to remove partial file");
                    }
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpSettings, RetryPolicy};
    use archive_common::{ArchiveError, Domain, Model};
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_stale_partials_removed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blend.t12z.f006.grib2.partial"), b"half").unwrap();
        std::fs::write(dir.path().join("blend.t12z.f005.grib2"), b"done").unwrap();

        let cleaner = downloader(dir.path());
        assert_eq!(cleaner.remove_stale_partials().await.unwrap(), 1);

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec!["blend.t12z.f005.grib2"]);

        let missing = downloader(&dir.path().join("absent"));
        assert_eq!(missing.remove_stale_partials().await.unwrap(), 0);
    }

    fn downloader(dir: &Path) -> RangeDownloader {
        let http = HttpClient::new(
            HttpSettings::default(),
            RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        )
        .unwrap();
        RangeDownloader::new(http, dir)
    }

    fn file_ref(server: &MockServer) -> ForecastFileRef {
        ForecastFileRef {
            model: Model::Nbm,
            init_time: test_utils::init_time(),
            forecast_hour: 6,
            domain: Domain::Alaska,
            url: format!("{}/blend.grib2", server.uri()),
        }
    }

    fn range(start: u64, end: Option<u64>) -> MatchedRange {
        MatchedRange {
            byte_start: start,
            byte_end: end,
            field_description: String::new(),
        }
    }

    #[tokio::test]
    async fn test_ranges_written_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blend.grib2"))
            .and(header("range", "bytes=0-3"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"GRIB".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/blend.grib2"))
            .and(header("range", "bytes=10-"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"7777".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = file_ref(&server);
        let local = downloader(dir.path())
            .download_ranges(&file, &[range(0, Some(3)), range(10, None)])
            .await
            .unwrap();

        assert_eq!(std::fs::read(&local).unwrap(), b"GRIB7777");
        assert_eq!(local.file_name().unwrap(), file.local_file_name().as_str());
    }

    #[tokio::test]
    async fn test_failed_range_discards_partial_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("range", "bytes=0-3"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"GRIB".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("range", "bytes=4-7"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = downloader(dir.path())
            .download_ranges(&file_ref(&server), &[range(0, Some(3)), range(4, Some(7))])
            .await
            .unwrap_err();

        assert!(matches!(err, ArchiveError::MissingFile(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_whole_file_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blend.grib2"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let local = downloader(dir.path())
            .download_whole(&file_ref(&server))
            .await
            .unwrap();
        assert_eq!(std::fs::metadata(&local).unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn test_whole_file_server_error_leaves_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = downloader(dir.path())
            .download_whole(&file_ref(&server))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
