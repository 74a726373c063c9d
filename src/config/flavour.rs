//! Cluster flavours
//!
//! A flavour is the deployment topology assets are generated for. Every
//! entry of the composition model carries a [`FlavourSet`] and only fires
//! when the requested flavour is a member.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Deployment topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterFlavour {
    /// Control plane and driver run in the same cluster
    Standalone,
    /// Control plane runs in a management cluster, node plugin in the guest
    HyperShift,
}

impl ClusterFlavour {
    pub const ALL: [ClusterFlavour; 2] = [ClusterFlavour::Standalone, ClusterFlavour::HyperShift];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterFlavour::Standalone => "standalone",
            ClusterFlavour::HyperShift => "hypershift",
        }
    }
}

impl std::fmt::Display for ClusterFlavour {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterFlavour {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standalone" => Ok(ClusterFlavour::Standalone),
            "hypershift" => Ok(ClusterFlavour::HyperShift),
            other => Err(Error::Configuration(format!(
                "Unknown cluster flavour: {} (expected standalone or hypershift)",
                other
            ))),
        }
    }
}

/// Set of flavours an entry applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlavourSet(BTreeSet<ClusterFlavour>);

impl FlavourSet {
    /// Set containing the given flavours
    pub fn new(flavours: impl IntoIterator<Item = ClusterFlavour>) -> Self {
        Self(flavours.into_iter().collect())
    }

    /// Every known flavour
    pub fn all() -> Self {
        Self::new(ClusterFlavour::ALL)
    }

    /// Exactly one flavour
    pub fn only(flavour: ClusterFlavour) -> Self {
        Self::new([flavour])
    }

    /// Standalone clusters only
    pub fn standalone() -> Self {
        Self::only(ClusterFlavour::Standalone)
    }

    /// Hosted control planes only
    pub fn hypershift() -> Self {
        Self::only(ClusterFlavour::HyperShift)
    }

    pub fn contains(&self, flavour: ClusterFlavour) -> bool {
        self.0.contains(&flavour)
    }

    /// An empty set never matches anything
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ClusterFlavour> + '_ {
        self.0.iter().copied()
    }
}

impl Default for FlavourSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<ClusterFlavour> for FlavourSet {
    fn from_iter<I: IntoIterator<Item = ClusterFlavour>>(iter: I) -> Self {
        Self::new(iter)
    }
}
