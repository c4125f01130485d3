//! Diameter tiers mapping a measured rebar diameter to a concrete mix.
//!
//! Tiers are stored sorted ascending by their lower bound so lookup order never
//! depends on how the configuration file happened to list them.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::MixRatio;

/// Named half-open diameter bracket `[min_mm, max_mm)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Tier {
    pub name: String,
    pub ratio: MixRatio,
    pub min_mm: f64,
    pub max_mm: f64,
}

impl Tier {
    pub fn new(name: impl Into<String>, ratio: MixRatio, min_mm: f64, max_mm: f64) -> Self {
        Self {
            name: name.into(),
            ratio,
            min_mm,
            max_mm,
        }
    }

    pub fn contains(&self, diameter_mm: f64) -> bool {
        self.min_mm <= diameter_mm && diameter_mm < self.max_mm
    }
}

#[derive(Debug, Error)]
pub enum TierError {
    #[error("tier set must contain at least one tier")]
    Empty,
    #[error("tier {name:?} has invalid diameter range [{min}, {max})")]
    InvalidRange { name: String, min: f64, max: f64 },
    #[error("tiers {lower:?} and {upper:?} have overlapping diameter ranges")]
    Overlap { lower: String, upper: String },
    #[error("failed to read tier file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse tier definitions")]
    Parse(#[from] serde_json::Error),
}

/// On-disk shape of one tier: `{"cement":1,"sand":2,"aggregate":3,"diameter_range":[6,12]}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct TierEntry {
    cement: u32,
    sand: u32,
    aggregate: u32,
    diameter_range: [f64; 2],
}

/// Validated, ordered set of tiers.
#[derive(Clone, Debug, PartialEq)]
pub struct TierSet {
    tiers: Vec<Tier>,
}

impl TierSet {
    /// Validate and sort tiers ascending by `min_mm`.
    pub fn new(mut tiers: Vec<Tier>) -> Result<Self, TierError> {
        if tiers.is_empty() {
            return Err(TierError::Empty);
        }
        for tier in &tiers {
            if !tier.min_mm.is_finite() || !tier.max_mm.is_finite() || tier.min_mm >= tier.max_mm {
                return Err(TierError::InvalidRange {
                    name: tier.name.clone(),
                    min: tier.min_mm,
                    max: tier.max_mm,
                });
            }
        }
        tiers.sort_by(|a, b| a.min_mm.total_cmp(&b.min_mm));
        for pair in tiers.windows(2) {
            if pair[0].max_mm > pair[1].min_mm {
                return Err(TierError::Overlap {
                    lower: pair[0].name.clone(),
                    upper: pair[1].name.clone(),
                });
            }
        }
        for pair in tiers.windows(2) {
            if pair[0].max_mm < pair[1].min_mm {
                tracing::debug!(
                    "diameters in [{}, {}) fall between tiers {:?} and {:?}",
                    pair[0].max_mm,
                    pair[1].min_mm,
                    pair[0].name,
                    pair[1].name
                );
            }
        }
        Ok(Self { tiers })
    }

    /// First tier containing `diameter_mm`, falling back to the smallest tier.
    pub fn classify(&self, diameter_mm: f64) -> &Tier {
        self.tiers
            .iter()
            .find(|tier| tier.contains(diameter_mm))
            .unwrap_or_else(|| self.smallest())
    }

    pub fn smallest(&self) -> &Tier {
        &self.tiers[0]
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub fn from_json_str(json: &str) -> Result<Self, TierError> {
        let entries: BTreeMap<String, TierEntry> = serde_json::from_str(json)?;
        let tiers = entries
            .into_iter()
            .map(|(name, entry)| {
                Tier::new(
                    name,
                    MixRatio::new(entry.cement, entry.sand, entry.aggregate),
                    entry.diameter_range[0],
                    entry.diameter_range[1],
                )
            })
            .collect();
        Self::new(tiers)
    }

    pub fn load(path: &Path) -> Result<Self, TierError> {
        let contents = fs::read_to_string(path).map_err(|source| TierError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn to_json_pretty(&self) -> Result<String, TierError> {
        let entries: BTreeMap<&str, TierEntry> = self
            .tiers
            .iter()
            .map(|tier| {
                (
                    tier.name.as_str(),
                    TierEntry {
                        cement: tier.ratio.cement,
                        sand: tier.ratio.sand,
                        aggregate: tier.ratio.aggregate,
                        diameter_range: [tier.min_mm, tier.max_mm],
                    },
                )
            })
            .collect();
        Ok(serde_json::to_string_pretty(&entries)?)
    }
}

impl Default for TierSet {
    /// small [6,12) 1:2:3, medium [12,20) 1:2:4, large [20,50) 1:3:5.
    fn default() -> Self {
        Self {
            tiers: vec![
                Tier::new("small", MixRatio::new(1, 2, 3), 6.0, 12.0),
                Tier::new("medium", MixRatio::new(1, 2, 4), 12.0, 20.0),
                Tier::new("large", MixRatio::new(1, 3, 5), 20.0, 50.0),
            ],
        }
    }
}
