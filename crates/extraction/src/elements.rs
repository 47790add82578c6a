//! Per (model, element) extraction tables.
//!
//! Each entry names the index phrases that select the element's messages,
//! the forecast hours archived, and how decoded fields become archive
//! columns.

use archive_common::{ArchiveError, ArchiveResult, Element, Model};

use crate::idx::{FieldMatcher, WindowKind, WindowRule};
use crate::normalize::{Conversion, FieldRule};

const WIND_HOURS_NBM: &[u32] = &[
    5, 11, 17, 23, 29, 35, 41, 47, 53, 59, 65, 71, 83, 95, 107, 119, 131, 143, 155, 167,
];
const TEMP_HOURS: &[u32] = &[18, 30, 42, 54, 66, 78, 90, 102, 114, 126, 138, 150, 162, 174];
const ACC_24H_HOURS: &[u32] = &[24, 30, 36, 48, 60, 72, 84, 96, 108, 120, 132, 144, 156, 168];
const ACC_6H_HOURS: &[u32] = &[
    6, 12, 18, 24, 30, 36, 42, 48, 54, 60, 66, 72, 78, 84, 90, 96, 102, 108, 114, 120,
];
const WIND_HOURS_QMD: &[u32] = &[
    12, 18, 24, 30, 36, 42, 48, 54, 60, 66, 72, 84, 96, 108, 120, 132, 144, 156, 168,
];
const WIND_HOURS_HRRR: &[u32] = &[12, 18, 24, 30, 36, 42, 48];
const ACC_HOURS_HRRR: &[u32] = &[0, 6, 12, 18, 24, 30, 36, 42, 48];
const ANALYSIS_ONLY: &[u32] = &[0];

const ENS_STD_DEV: &[&str] = &["ens std dev"];

/// How decoded fields become archive columns.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputRule {
    /// One column per deterministic field
    Fields(Vec<FieldRule>),
    /// `{prefix}_p{N}` per percentile member
    Percentiles {
        prefix: &'static str,
        conversion: Conversion,
    },
    /// Speed and direction from u/v components plus other fields
    WindComponents {
        u: &'static str,
        v: &'static str,
        extra: Vec<FieldRule>,
    },
}

/// Interval column derived from a run-total column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalRule {
    pub total: &'static str,
    pub output: &'static str,
    pub hours: u32,
}

/// Everything needed to extract one element from one model.
#[derive(Debug, Clone)]
pub struct ElementSpec {
    pub model: Model,
    pub element: Element,
    pub search_phrases: &'static [&'static str],
    pub required_phrases: &'static [&'static str],
    pub excluded_phrases: &'static [&'static str],
    pub require_all_matches: bool,
    pub window: WindowRule,
    pub percentiles: bool,
    pub forecast_hours: &'static [u32],
    pub output: OutputRule,
    pub interval: Option<IntervalRule>,
}

impl ElementSpec {
    /// Matcher for this element's index lines.
    pub fn matcher(&self) -> FieldMatcher {
        let mut matcher = FieldMatcher::new(self.search_phrases)
            .required(self.required_phrases)
            .excluded(self.excluded_phrases)
            .window(self.window);
        if self.require_all_matches {
            matcher = matcher.require_all();
        }
        if self.percentiles {
            matcher = matcher.percentiles();
        }
        matcher
    }

    /// Decoded parameter names this element reads; empty means all.
    pub fn source_fields(&self) -> Vec<String> {
        match &self.output {
            OutputRule::Fields(rules) => rules.iter().map(|r| r.source.to_string()).collect(),
            OutputRule::Percentiles { .. } => Vec::new(),
            OutputRule::WindComponents { u, v, extra } => [*u, *v]
                .into_iter()
                .chain(extra.iter().map(|r| r.source))
                .map(str::to_string)
                .collect(),
        }
    }
}

fn spec(model: Model, element: Element) -> ElementSpec {
    ElementSpec {
        model,
        element,
        search_phrases: &[],
        required_phrases: &[],
        excluded_phrases: ENS_STD_DEV,
        require_all_matches: false,
        window: WindowRule::None,
        percentiles: false,
        forecast_hours: &[],
        output: OutputRule::Fields(Vec::new()),
        interval: None,
    }
}

fn deterministic_wind() -> Vec<FieldRule> {
    vec![
        FieldRule::new("WIND", "wind_speed_kt", Conversion::MetersPerSecondToKnots),
        FieldRule::new("WDIR", "wind_dir_deg", Conversion::Identity),
        FieldRule::new("GUST", "wind_gust_kt", Conversion::MetersPerSecondToKnots),
    ]
}

fn qmd_spec(model: Model, element: Element) -> Option<ElementSpec> {
    let base = ElementSpec {
        percentiles: true,
        ..spec(model, element)
    };
    let trailing = |hours, kind| WindowRule::Trailing { hours, kind };

    let spec = match element {
        Element::Precip24hr => ElementSpec {
            search_phrases: &[":APCP:surface:"],
            window: WindowRule::Accumulation24h,
            forecast_hours: ACC_24H_HOURS,
            output: OutputRule::Percentiles {
                prefix: "qpf",
                conversion: Conversion::MillimetersToInches,
            },
            ..base
        },
        Element::Precip6hr => ElementSpec {
            search_phrases: &[":APCP:surface:"],
            window: trailing(6, WindowKind::Accumulation),
            forecast_hours: ACC_6H_HOURS,
            output: OutputRule::Percentiles {
                prefix: "qpf",
                conversion: Conversion::MillimetersToInches,
            },
            ..base
        },
        Element::Snow24hr => ElementSpec {
            search_phrases: &[":ASNOW:surface:"],
            window: WindowRule::Accumulation24h,
            forecast_hours: ACC_24H_HOURS,
            output: OutputRule::Percentiles {
                prefix: "snow",
                conversion: Conversion::MetersToInches,
            },
            ..base
        },
        Element::Snow6hr => ElementSpec {
            search_phrases: &[":ASNOW:surface:"],
            window: trailing(6, WindowKind::Accumulation),
            forecast_hours: ACC_6H_HOURS,
            output: OutputRule::Percentiles {
                prefix: "snow",
                conversion: Conversion::MetersToInches,
            },
            ..base
        },
        Element::MaxT => ElementSpec {
            search_phrases: &[":TMP:2 m above ground:"],
            window: trailing(18, WindowKind::Maximum),
            forecast_hours: TEMP_HOURS,
            output: OutputRule::Percentiles {
                prefix: "maxt",
                conversion: Conversion::KelvinToFahrenheit,
            },
            ..base
        },
        Element::MinT => ElementSpec {
            search_phrases: &[":TMP:2 m above ground:"],
            window: trailing(18, WindowKind::Minimum),
            forecast_hours: TEMP_HOURS,
            output: OutputRule::Percentiles {
                prefix: "mint",
                conversion: Conversion::KelvinToFahrenheit,
            },
            ..base
        },
        Element::Wind if model == Model::NbmQmdExp => ElementSpec {
            search_phrases: &[":WIND:10 m above"],
            window: WindowRule::Instant,
            forecast_hours: WIND_HOURS_QMD,
            output: OutputRule::Percentiles {
                prefix: "wind",
                conversion: Conversion::MetersPerSecondToKnots,
            },
            ..base
        },
        Element::Gust if model == Model::NbmQmdExp => ElementSpec {
            search_phrases: &[":GUST:10 m above"],
            window: WindowRule::Instant,
            forecast_hours: WIND_HOURS_QMD,
            output: OutputRule::Percentiles {
                prefix: "gust",
                conversion: Conversion::MetersPerSecondToKnots,
            },
            ..base
        },
        _ => return None,
    };
    Some(spec)
}

/// Extraction table entry for `(model, element)`.
///
/// Fails with [`ArchiveError::Configuration`] for pairs the archiver does
/// not support.
pub fn element_spec(model: Model, element: Element) -> ArchiveResult<ElementSpec> {
    model.validate_element(element)?;

    let found = match (model, element) {
        (Model::Nbm, Element::Wind) => Some(ElementSpec {
            search_phrases: &[":WIND:10 m above", ":WDIR:10 m above", ":GUST:10 m above"],
            required_phrases: &["10 m above ground"],
            require_all_matches: true,
            forecast_hours: WIND_HOURS_NBM,
            output: OutputRule::Fields(deterministic_wind()),
            ..spec(model, element)
        }),
        (Model::Nbm, Element::MaxT) | (Model::Nbm, Element::MinT) => {
            let (kind, column) = if element == Element::MaxT {
                (WindowKind::Maximum, "max_temp")
            } else {
                (WindowKind::Minimum, "min_temp")
            };
            Some(ElementSpec {
                search_phrases: &[":TMP:2 m above ground:"],
                required_phrases: &[":TMP:2 m above ground:"],
                require_all_matches: true,
                window: WindowRule::Trailing { hours: 18, kind },
                forecast_hours: TEMP_HOURS,
                output: OutputRule::Fields(vec![FieldRule::new(
                    "TMP",
                    column,
                    Conversion::KelvinToFahrenheit,
                )]),
                ..spec(model, element)
            })
        }
        (Model::NbmQmd, _) | (Model::NbmQmdExp, _) => qmd_spec(model, element),
        (Model::Hrrr, Element::Wind) => Some(ElementSpec {
            // GUST is a surface field, so no level phrase is required
            search_phrases: &[":UGRD:10 m above", ":VGRD:10 m above", ":GUST:surface"],
            require_all_matches: true,
            forecast_hours: WIND_HOURS_HRRR,
            output: OutputRule::WindComponents {
                u: "UGRD",
                v: "VGRD",
                extra: vec![FieldRule::new(
                    "GUST",
                    "wind_gust_kt",
                    Conversion::MetersPerSecondToKnots,
                )],
            },
            ..spec(model, element)
        }),
        (Model::Hrrr, Element::Precip6hr) => Some(ElementSpec {
            search_phrases: &[":APCP:surface"],
            required_phrases: &["APCP:surface"],
            require_all_matches: true,
            window: WindowRule::RunTotal,
            forecast_hours: ACC_HOURS_HRRR,
            output: OutputRule::Fields(vec![FieldRule::new(
                "APCP",
                "precip_accum",
                Conversion::MillimetersToInches,
            )]),
            interval: Some(IntervalRule {
                total: "precip_accum",
                output: "precip_6h",
                hours: 6,
            }),
            ..spec(model, element)
        }),
        (Model::Hrrr, Element::Snow6hr) => Some(ElementSpec {
            search_phrases: &[":ASNOW:surface"],
            required_phrases: &["ASNOW:surface"],
            require_all_matches: true,
            window: WindowRule::RunTotal,
            forecast_hours: ACC_HOURS_HRRR,
            output: OutputRule::Fields(vec![FieldRule::new(
                "ASNOW",
                "snow_accum",
                Conversion::MetersToInches,
            )]),
            interval: Some(IntervalRule {
                total: "snow_accum",
                output: "snow_6h",
                hours: 6,
            }),
            ..spec(model, element)
        }),
        (Model::Urma, Element::Wind) => Some(ElementSpec {
            forecast_hours: ANALYSIS_ONLY,
            output: OutputRule::Fields(deterministic_wind()),
            ..spec(model, element)
        }),
        _ => None,
    };

    found.ok_or_else(|| {
        ArchiveError::Configuration(format!(
            "no extraction table for model '{}' element '{}'",
            model, element
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_available_element_has_a_spec() {
        for model in Model::ALL {
            for element in model.available_elements() {
                let spec = element_spec(model, *element)
                    .unwrap_or_else(|e| panic!("{} {}: {}", model, element, e));
                assert!(!spec.forecast_hours.is_empty());
                if model != Model::Urma {
                    assert!(!spec.search_phrases.is_empty(), "{} {}", model, element);
                }
            }
        }
    }

    #[test]
    fn test_unsupported_pair_is_configuration_error() {
        let err = element_spec(Model::Hrrr, Element::MaxT).unwrap_err();
        assert!(err.is_fatal());
        let err = element_spec(Model::Urma, Element::Precip6hr).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_qmd_specs_are_percentile_products() {
        let spec = element_spec(Model::NbmQmd, Element::Precip24hr).unwrap();
        assert!(spec.percentiles);
        assert_eq!(spec.window, WindowRule::Accumulation24h);
        assert!(spec.matcher().percentiles.is_some());
        assert_eq!(spec.excluded_phrases, &["ens std dev"]);
    }

    #[test]
    fn test_mint_excludes_spread_not_temperature() {
        let spec = element_spec(Model::NbmQmd, Element::MinT).unwrap();
        assert_eq!(spec.excluded_phrases, &["ens std dev"]);
        assert_eq!(
            spec.window.labels(30).unwrap(),
            vec!["12-30 hour min fcst".to_string()]
        );
    }

    #[test]
    fn test_hrrr_wind_sources() {
        let spec = element_spec(Model::Hrrr, Element::Wind).unwrap();
        assert_eq!(spec.source_fields(), vec!["UGRD", "VGRD", "GUST"]);
        assert!(spec.interval.is_none());
        let precip = element_spec(Model::Hrrr, Element::Precip6hr).unwrap();
        assert_eq!(precip.interval.unwrap().output, "precip_6h");
    }
}
