//! Per-model behaviour: file naming, download strategy, decoding and value
//! extraction.

use std::collections::BTreeMap;
use std::sync::Arc;

use archive_common::{Domain, ForecastFileRef, Model};
use chrono::{DateTime, Utc};

use crate::decode::{DecodeRequest, FieldKey, GridDataset};
use crate::elements::{ElementSpec, OutputRule};
use crate::idx::FieldMatcher;
use crate::normalize::{normalize_value, precision_for, round_to, wind_from_components};

/// How a located file is brought to local disk.
#[derive(Debug, Clone)]
pub enum DownloadPlan {
    /// Match the side-car index and fetch only those byte ranges
    Ranges(FieldMatcher),
    /// Fetch the entire file
    WholeFile,
}

/// One variant per supported model family.
///
/// The provided methods cover index-driven products; models that differ
/// override them.
pub trait ModelAdapter: Send + Sync {
    fn model(&self) -> Model;

    /// Remote URL of the file for one init time and forecast hour.
    fn build_url(&self, init_time: DateTime<Utc>, forecast_hour: u32, domain: Domain) -> String;

    /// URL probed to confirm the file exists.
    fn probe_url(&self, file: &ForecastFileRef) -> String {
        file.index_url()
    }

    fn download_plan(&self, spec: &ElementSpec) -> DownloadPlan {
        DownloadPlan::Ranges(spec.matcher())
    }

    fn decode_request(&self, spec: &ElementSpec) -> DecodeRequest {
        match spec.output {
            OutputRule::Percentiles { .. } => DecodeRequest::percentiles(),
            _ => DecodeRequest::stacked(&spec.source_fields()),
        }
    }

    /// Canonical, converted and rounded values at `cell`.
    fn extract_values(
        &self,
        spec: &ElementSpec,
        dataset: &GridDataset,
        cell: (usize, usize),
    ) -> BTreeMap<String, f64> {
        extract_with_rule(&spec.output, dataset, cell)
    }
}

/// Apply an element's output rule to one grid cell.
pub fn extract_with_rule(
    output: &OutputRule,
    dataset: &GridDataset,
    (row, col): (usize, usize),
) -> BTreeMap<String, f64> {
    let mut values = BTreeMap::new();

    match output {
        OutputRule::Fields(rules) => {
            for rule in rules {
                let raw = dataset.value_at(&FieldKey::new(rule.source), row, col);
                if let Some(v) = raw.and_then(|raw| rule.normalize(raw)) {
                    values.insert(rule.output.to_string(), v);
                }
            }
        }
        OutputRule::Percentiles { prefix, conversion } => {
            for key in dataset.percentile_keys() {
                let Some(p) = key.percentile else { continue };
                let column = format!("{}_p{}", prefix, p);
                let raw = dataset.value_at(key, row, col);
                if let Some(v) = raw.and_then(|raw| normalize_value(&column, *conversion, raw)) {
                    values.insert(column, v);
                }
            }
        }
        OutputRule::WindComponents { u, v, extra } => {
            let u = dataset.value_at(&FieldKey::new(*u), row, col);
            let v = dataset.value_at(&FieldKey::new(*v), row, col);
            if let (Some(u), Some(v)) = (u, v) {
                let (speed, direction) = wind_from_components(u, v);
                for (column, value) in [("wind_speed_kt", speed), ("wind_dir_deg", direction)] {
                    let rounded = round_to(value, precision_for(column));
                    // 359.6 rounds to a full circle
                    let rounded = if column == "wind_dir_deg" { rounded % 360.0 } else { rounded };
                    values.insert(column.to_string(), rounded);
                }
            }
            for rule in extra {
                let raw = dataset.value_at(&FieldKey::new(rule.source), row, col);
                if let Some(value) = raw.and_then(|raw| rule.normalize(raw)) {
                    values.insert(rule.output.to_string(), value);
                }
            }
        }
    }

    values
}

fn blend_url(base: &str, product: &str, init_time: DateTime<Utc>, forecast_hour: u32, domain: Domain) -> String {
    let hh = init_time.format("%H");
    format!(
        "{}/blend.{}/{}/{}/blend.t{}z.{}.f{:03}.{}.grib2",
        base.trim_end_matches('/'),
        init_time.format("%Y%m%d"),
        hh,
        product,
        hh,
        product,
        forecast_hour,
        domain.code()
    )
}

/// National Blend of Models, deterministic core product.
pub struct NbmCore {
    base_url: String,
}

impl ModelAdapter for NbmCore {
    fn model(&self) -> Model {
        Model::Nbm
    }

    fn build_url(&self, init_time: DateTime<Utc>, forecast_hour: u32, domain: Domain) -> String {
        blend_url(&self.base_url, "core", init_time, forecast_hour, domain)
    }
}

/// National Blend quantile-mapped percentile product.
pub struct NbmQmd {
    base_url: String,
    experimental: bool,
}

impl ModelAdapter for NbmQmd {
    fn model(&self) -> Model {
        if self.experimental {
            Model::NbmQmdExp
        } else {
            Model::NbmQmd
        }
    }

    fn build_url(&self, init_time: DateTime<Utc>, forecast_hour: u32, domain: Domain) -> String {
        blend_url(&self.base_url, "qmd", init_time, forecast_hour, domain)
    }
}

/// High-Resolution Rapid Refresh surface files.
pub struct Hrrr {
    base_url: String,
}

impl ModelAdapter for Hrrr {
    fn model(&self) -> Model {
        Model::Hrrr
    }

    fn build_url(&self, init_time: DateTime<Utc>, forecast_hour: u32, domain: Domain) -> String {
        let suffix = match domain {
            Domain::Conus => String::new(),
            other => format!(".{}", other.code()),
        };
        format!(
            "{}/hrrr.{}/{}/hrrr.t{}z.wrfsfcf{:02}{}.grib2",
            self.base_url.trim_end_matches('/'),
            init_time.format("%Y%m%d"),
            domain.region_name(),
            init_time.format("%H"),
            forecast_hour,
            suffix
        )
    }
}

/// Unrestricted Mesoscale Analysis; one analysis file per cycle, no index.
pub struct Urma {
    base_url: String,
}

impl ModelAdapter for Urma {
    fn model(&self) -> Model {
        Model::Urma
    }

    fn build_url(&self, init_time: DateTime<Utc>, _forecast_hour: u32, domain: Domain) -> String {
        let (prefix, grid) = match domain {
            Domain::Conus => ("urma2p5".to_string(), "2p5"),
            other => (format!("{}urma", other.code()), "3p0"),
        };
        format!(
            "{}/{prefix}.{}/{prefix}.t{}z.2dvaranl_ndfd_{grid}.grb2",
            self.base_url.trim_end_matches('/'),
            init_time.format("%Y%m%d"),
            init_time.format("%H"),
            prefix = prefix,
            grid = grid
        )
    }

    fn probe_url(&self, file: &ForecastFileRef) -> String {
        file.url.clone()
    }

    fn download_plan(&self, _spec: &ElementSpec) -> DownloadPlan {
        DownloadPlan::WholeFile
    }

    fn decode_request(&self, spec: &ElementSpec) -> DecodeRequest {
        // Analysis files hold winds at several heights
        DecodeRequest::stacked(&spec.source_fields()).at_level(103, 10.0)
    }
}

/// Adapter for `model`, serving from `base_url` or the model's public bucket.
pub fn adapter_for(model: Model, base_url: Option<String>) -> Arc<dyn ModelAdapter> {
    let base_url = base_url.unwrap_or_else(|| model.default_base_url().to_string());
    match model {
        Model::Nbm => Arc::new(NbmCore { base_url }),
        Model::NbmQmd => Arc::new(NbmQmd {
            base_url,
            experimental: false,
        }),
        Model::NbmQmdExp => Arc::new(NbmQmd {
            base_url,
            experimental: true,
        }),
        Model::Hrrr => Arc::new(Hrrr { base_url }),
        Model::Urma => Arc::new(Urma { base_url }),
    }
}
