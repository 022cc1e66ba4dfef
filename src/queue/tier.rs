//! Subscription-derived priority tiers.
//!
//! Callers map their own plan model onto one of these four tiers before
//! enqueueing; the queue only knows the tier name and its rank offset.

use std::fmt;
use std::str::FromStr;

/// Coarse caller classification used to order waiting jobs.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PriorityTier {
    #[default]
    Free,
    Starter,
    Professional,
    Enterprise,
}

impl PriorityTier {
    pub const ALL: [PriorityTier; 4] = [
        PriorityTier::Free,
        PriorityTier::Starter,
        PriorityTier::Professional,
        PriorityTier::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityTier::Free => "free",
            PriorityTier::Starter => "starter",
            PriorityTier::Professional => "professional",
            PriorityTier::Enterprise => "enterprise",
        }
    }

    /// Parse a tier name, falling back to [`PriorityTier::Free`] for anything
    /// unrecognised so unknown plans never outrank paying ones.
    pub fn parse_lenient(s: &str) -> Self {
        s.parse().unwrap_or(PriorityTier::Free)
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown priority tier '{0}' (expected free, starter, professional or enterprise)")]
pub struct UnknownTier(pub String);

impl FromStr for PriorityTier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(PriorityTier::Free),
            "starter" => Ok(PriorityTier::Starter),
            "professional" => Ok(PriorityTier::Professional),
            "enterprise" => Ok(PriorityTier::Enterprise),
            _ => Err(UnknownTier(s.to_string())),
        }
    }
}
