//! Side-car index parsing and field matching.
//!
//! An index is one line per GRIB2 message:
//!
//! ```text
//! 1:0:d=2024011512:APCP:surface:0-1 day acc fcst:
//! 2:48213:d=2024011512:APCP:surface:0-1 day acc fcst:90% level
//! ```
//!
//! The byte range of message `i` runs from its offset to one byte before the
//! offset of message `i + 1`; the last message is open-ended.

use std::collections::{BTreeSet, HashSet};

use archive_common::{ArchiveError, ArchiveResult, ForecastFileRef, IndexEntry, MatchedRange};
use tracing::{debug, instrument};

use crate::http::HttpClient;

/// Percentile members archived from probabilistic products.
pub const PERCENTILES: [u8; 7] = [5, 10, 25, 50, 75, 90, 95];

/// Parse index text into entries, in file order.
pub fn parse_index(text: &str) -> ArchiveResult<Vec<IndexEntry>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut parts = line.splitn(3, ':');
            let malformed = || ArchiveError::Decode(format!("malformed index line: {}", line));

            let sequence_no = parts
                .next()
                .and_then(|s| s.trim().parse::<u32>().ok())
                .ok_or_else(malformed)?;
            let byte_offset = parts
                .next()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .ok_or_else(malformed)?;
            let field_description = parts.next().unwrap_or("").to_string();

            Ok(IndexEntry {
                sequence_no,
                byte_offset,
                field_description,
            })
        })
        .collect()
}

/// Byte ranges of the entries at `positions`, derived from the next entry's offset.
pub fn byte_ranges(entries: &[IndexEntry], positions: &[usize]) -> ArchiveResult<Vec<MatchedRange>> {
    positions
        .iter()
        .map(|&i| {
            let entry = entries.get(i).ok_or_else(|| {
                ArchiveError::Decode(format!("index position {} out of bounds", i))
            })?;
            let byte_end = match entries.get(i + 1) {
                Some(next) => Some(
                    next.byte_offset
                        .checked_sub(1)
                        .filter(|end| *end >= entry.byte_offset)
                        .ok_or_else(|| {
                            ArchiveError::Decode(format!(
                                "index offsets not increasing at entry {}",
                                entry.sequence_no
                            ))
                        })?,
                ),
                None => None,
            };
            Ok(MatchedRange {
                byte_start: entry.byte_offset,
                byte_end,
                field_description: entry.field_description.clone(),
            })
        })
        .collect()
}

/// Labels of a 24-hour accumulation ending at `forecast_hour`.
///
/// Empty at hour 0, where no 24-hour window exists. At multiples of 24 the
/// day form comes first, followed by the hour form.
pub fn accumulation_labels_24h(forecast_hour: u32) -> Vec<String> {
    if forecast_hour == 0 {
        return Vec::new();
    }

    let start = forecast_hour.saturating_sub(24);
    let mut labels = vec![format!("{}-{} hour acc fcst", start, forecast_hour)];
    if forecast_hour % 24 == 0 {
        let day = forecast_hour / 24;
        labels.insert(0, format!("{}-{} day acc fcst", day - 1, day));
    }
    labels
}

/// Statistic named in a window label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Accumulation,
    Maximum,
    Minimum,
}

impl WindowKind {
    fn suffix(&self) -> &'static str {
        match self {
            WindowKind::Accumulation => "acc",
            WindowKind::Maximum => "max",
            WindowKind::Minimum => "min",
        }
    }
}

/// Time-range qualification a matched line must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowRule {
    /// No time-range requirement
    None,
    /// 24-hour accumulation with day-form alternatives
    Accumulation24h,
    /// `"{fh-hours}-{fh} hour {acc|max|min} fcst"`
    Trailing { hours: u32, kind: WindowKind },
    /// `"{fh} hour fcst"`
    Instant,
    /// Accumulation since initialization, `"0-{fh} hour acc fcst"`
    RunTotal,
}

impl WindowRule {
    /// Acceptable labels at `forecast_hour`; `None` means any line qualifies
    /// and an empty list means none does.
    pub fn labels(&self, forecast_hour: u32) -> Option<Vec<String>> {
        let fh = forecast_hour;
        match self {
            WindowRule::None => None,
            WindowRule::Accumulation24h => Some(accumulation_labels_24h(fh)),
            WindowRule::Trailing { hours, kind } => Some(vec![format!(
                "{}-{} hour {} fcst",
                fh.saturating_sub(*hours),
                fh,
                kind.suffix()
            )]),
            WindowRule::Instant => Some(vec![format!("{} hour fcst", fh)]),
            WindowRule::RunTotal => Some(match fh {
                0 => vec!["0-0 day acc fcst".to_string()],
                fh if fh % 24 == 0 => vec![
                    format!("0-{} day acc fcst", fh / 24),
                    format!("0-{} hour acc fcst", fh),
                ],
                fh => vec![format!("0-{} hour acc fcst", fh)],
            }),
        }
    }
}

/// Selection rules for the messages of one (model, element).
#[derive(Debug, Clone)]
pub struct FieldMatcher {
    /// A line matches when it contains any of these
    pub search_phrases: Vec<String>,
    /// Every matched line must contain all of these
    pub required_phrases: Vec<String>,
    /// Lines containing any of these are dropped first
    pub excluded_phrases: Vec<String>,
    /// Reject the file unless every search phrase matched some line
    pub require_all_matches: bool,
    pub window: WindowRule,
    /// Accepted percentile members; `None` for deterministic products
    pub percentiles: Option<BTreeSet<u8>>,
}

impl FieldMatcher {
    pub fn new<S: AsRef<str>>(search_phrases: &[S]) -> Self {
        Self {
            search_phrases: search_phrases.iter().map(|s| s.as_ref().to_string()).collect(),
            required_phrases: Vec::new(),
            excluded_phrases: Vec::new(),
            require_all_matches: false,
            window: WindowRule::None,
            percentiles: None,
        }
    }

    pub fn required<S: AsRef<str>>(mut self, phrases: &[S]) -> Self {
        self.required_phrases = phrases.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn excluded<S: AsRef<str>>(mut self, phrases: &[S]) -> Self {
        self.excluded_phrases = phrases.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn require_all(mut self) -> Self {
        self.require_all_matches = true;
        self
    }

    pub fn window(mut self, window: WindowRule) -> Self {
        self.window = window;
        self
    }

    /// Restrict to the standard percentile members.
    pub fn percentiles(mut self) -> Self {
        self.percentiles = Some(PERCENTILES.into_iter().collect());
        self
    }

    /// Select entries and compute their byte ranges.
    ///
    /// Fails with [`ArchiveError::FieldNotFound`] when nothing matches, or when
    /// `require_all_matches` is set and some search phrase matched no line.
    pub fn match_entries(
        &self,
        url: &str,
        forecast_hour: u32,
        entries: &[IndexEntry],
    ) -> ArchiveResult<Vec<MatchedRange>> {
        let labels = self.window.labels(forecast_hour);
        let mut positions = Vec::new();
        let mut matched_phrases = HashSet::new();

        for (i, entry) in entries.iter().enumerate() {
            let line = entry.field_description.as_str();

            if self.excluded_phrases.iter().any(|p| line.contains(p.as_str())) {
                continue;
            }
            let Some(phrase) = self.search_phrases.iter().find(|p| line.contains(p.as_str())) else {
                continue;
            };
            if !self.required_phrases.iter().all(|p| line.contains(p.as_str())) {
                continue;
            }
            if let Some(labels) = &labels {
                if !has_token(line, labels) {
                    continue;
                }
            }
            if let Some(accepted) = &self.percentiles {
                match percentile_of(entry.trailing_token()) {
                    Some(p) if accepted.contains(&p) => {}
                    _ => continue,
                }
            }

            matched_phrases.insert(phrase.as_str());
            positions.push(i);
        }

        let missing: Vec<&str> = self
            .search_phrases
            .iter()
            .map(String::as_str)
            .filter(|p| !matched_phrases.contains(p))
            .collect();

        if positions.is_empty() || (self.require_all_matches && !missing.is_empty()) {
            let window = labels
                .map(|l| format!(" with window {:?}", l))
                .unwrap_or_default();
            return Err(ArchiveError::FieldNotFound {
                url: url.to_string(),
                detail: format!(
                    "matched {} of {} search phrases{} (unmatched: {})",
                    self.search_phrases.len() - missing.len(),
                    self.search_phrases.len(),
                    window,
                    missing.join(", ")
                ),
            });
        }

        byte_ranges(entries, &positions)
    }

    /// Fetch the file's index and match it.
    #[instrument(skip(self, http, file), fields(url = %file.url, forecast_hour = file.forecast_hour))]
    pub async fn resolve(&self, http: &HttpClient, file: &ForecastFileRef) -> ArchiveResult<Vec<MatchedRange>> {
        let text = http.get_text(&file.index_url()).await?;
        let entries = parse_index(&text)?;
        let ranges = self.match_entries(&file.url, file.forecast_hour, &entries)?;
        debug!(entries = entries.len(), matched = ranges.len(), "Matched index entries");
        Ok(ranges)
    }
}

/// Whether any colon-separated token of `line` equals one of `labels`.
fn has_token(line: &str, labels: &[String]) -> bool {
    line.split(':')
        .map(str::trim)
        .any(|token| labels.iter().any(|l| l == token))
}

/// `"90% level"` to 90.
fn percentile_of(token: &str) -> Option<u8> {
    token.strip_suffix("% level")?.trim().parse().ok()
}
