//! Forecast point extraction.
//!
//! Drives the per-file pipeline that turns remote gridded forecast files into
//! station records:
//!
//! - [`FileLocator`] enumerates and probes candidate file URLs
//! - [`FieldMatcher`] selects messages from a file's side-car index
//! - [`RangeDownloader`] fetches only the matched byte ranges
//! - [`Grib2Decoder`] turns the local subset into a [`GridDataset`]
//! - [`GridIndexCache`] maps stations to their nearest grid cell
//! - [`ModelAdapter`]s normalize values per model and element
//! - [`Orchestrator`] runs all of the above across many files concurrently

pub mod adapters;
pub mod decode;
pub mod download;
pub mod elements;
pub mod http;
pub mod idx;
pub mod locator;
pub mod normalize;
pub mod orchestrator;
pub mod spatial;
pub mod stations;

pub use adapters::{adapter_for, DownloadPlan, ModelAdapter};
pub use decode::{DecodeMode, DecodeRequest, FieldKey, Grib2Decoder, GridDataset, GridDecoder};
pub use download::RangeDownloader;
pub use elements::{element_spec, ElementSpec, IntervalRule, OutputRule};
pub use http::{HttpClient, HttpSettings, RetryPolicy};
pub use idx::{accumulation_labels_24h, byte_ranges, parse_index, FieldMatcher, WindowRule};
pub use locator::{FileLocator, LocateRequest, Located};
pub use normalize::{round_to, Conversion, FieldRule};
pub use orchestrator::{derive_intervals, Orchestrator, OrchestratorConfig, RunOutput, RunSummary};
pub use spatial::{nearest_cell, CacheStats, GridIndexCache};
pub use stations::{StationCatalog, SynopticClient, SynopticQuery};
