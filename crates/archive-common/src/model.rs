//! Forecast models, elements and domains known to the archiver.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ArchiveError, ArchiveResult};

/// A forecast model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Model {
    #[serde(rename = "nbm")]
    Nbm,
    #[serde(rename = "nbmqmd")]
    NbmQmd,
    #[serde(rename = "nbmqmd_exp")]
    NbmQmdExp,
    #[serde(rename = "hrrr")]
    Hrrr,
    #[serde(rename = "urma")]
    Urma,
}

impl Model {
    pub const ALL: [Model; 5] = [
        Model::Nbm,
        Model::NbmQmd,
        Model::NbmQmdExp,
        Model::Hrrr,
        Model::Urma,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Nbm => "nbm",
            Model::NbmQmd => "nbmqmd",
            Model::NbmQmdExp => "nbmqmd_exp",
            Model::Hrrr => "hrrr",
            Model::Urma => "urma",
        }
    }

    /// Hours between consecutive model cycles.
    pub fn cycle_hours(&self) -> u32 {
        match self {
            Model::Nbm | Model::Hrrr => 6,
            Model::NbmQmd | Model::NbmQmdExp => 12,
            Model::Urma => 3,
        }
    }

    /// Public bucket the model's files are served from.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Model::Nbm | Model::NbmQmd => "https://noaa-nbm-grib2-pds.s3.amazonaws.com",
            Model::NbmQmdExp => "https://noaa-nbm-para-pds.s3.amazonaws.com",
            Model::Hrrr => "https://noaa-hrrr-bdp-pds.s3.amazonaws.com",
            Model::Urma => "https://noaa-urma-pds.s3.amazonaws.com",
        }
    }

    /// Elements that can be archived for this model.
    pub fn available_elements(&self) -> &'static [Element] {
        use Element::*;
        match self {
            Model::Nbm => &[Wind, MaxT, MinT],
            Model::NbmQmd => &[Precip24hr, Precip6hr, MaxT, MinT, Snow6hr, Snow24hr],
            Model::NbmQmdExp => &[
                Precip24hr, Precip6hr, MaxT, MinT, Snow6hr, Snow24hr, Wind, Gust,
            ],
            Model::Hrrr => &[Wind, Precip6hr, Snow6hr],
            Model::Urma => &[Wind],
        }
    }

    /// Reject model/element pairs before any network activity starts.
    pub fn validate_element(&self, element: Element) -> ArchiveResult<()> {
        if self.available_elements().contains(&element) {
            Ok(())
        } else {
            Err(ArchiveError::Configuration(format!(
                "element '{}' is not available for model '{}' (available: {})",
                element,
                self,
                self.available_elements()
                    .iter()
                    .map(|e| e.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )))
        }
    }

    /// Whether the model's files carry a forecast-hour dimension.
    pub fn has_forecast_hours(&self) -> bool {
        !matches!(self, Model::Urma)
    }

    /// Whether the model produces percentile members.
    pub fn is_percentile_product(&self) -> bool {
        matches!(self, Model::NbmQmd | Model::NbmQmdExp)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Model {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Model::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| ArchiveError::Configuration(format!("unknown model '{}'", s)))
    }
}

/// A verification element (one archive per model/element pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Element {
    #[serde(rename = "Wind")]
    Wind,
    #[serde(rename = "Gust")]
    Gust,
    #[serde(rename = "precip6hr")]
    Precip6hr,
    #[serde(rename = "precip24hr")]
    Precip24hr,
    #[serde(rename = "snow6hr")]
    Snow6hr,
    #[serde(rename = "snow24hr")]
    Snow24hr,
    #[serde(rename = "maxt")]
    MaxT,
    #[serde(rename = "mint")]
    MinT,
}

impl Element {
    pub const ALL: [Element; 8] = [
        Element::Wind,
        Element::Gust,
        Element::Precip6hr,
        Element::Precip24hr,
        Element::Snow6hr,
        Element::Snow24hr,
        Element::MaxT,
        Element::MinT,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Element::Wind => "Wind",
            Element::Gust => "Gust",
            Element::Precip6hr => "precip6hr",
            Element::Precip24hr => "precip24hr",
            Element::Snow6hr => "snow6hr",
            Element::Snow24hr => "snow24hr",
            Element::MaxT => "maxt",
            Element::MinT => "mint",
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Element {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Element::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ArchiveError::Configuration(format!("unknown element '{}'", s)))
    }
}

/// Geographic domain of a model run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Alaska,
    Conus,
    Hawaii,
}

impl Domain {
    /// Short code used in file names ("ak", "co", "hi").
    pub fn code(&self) -> &'static str {
        match self {
            Domain::Alaska => "ak",
            Domain::Conus => "co",
            Domain::Hawaii => "hi",
        }
    }

    /// Long name used in directory names ("alaska", "conus", "hawaii").
    pub fn region_name(&self) -> &'static str {
        match self {
            Domain::Alaska => "alaska",
            Domain::Conus => "conus",
            Domain::Hawaii => "hawaii",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Domain {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ak" | "alaska" => Ok(Domain::Alaska),
            "co" | "conus" => Ok(Domain::Conus),
            "hi" | "hawaii" => Ok(Domain::Hawaii),
            other => Err(ArchiveError::Configuration(format!("unknown domain '{}'", other))),
        }
    }
}
