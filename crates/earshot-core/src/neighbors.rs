//! Partner resolution.
//!
//! A candidate qualifies as a partner when it is linked and its distance to
//! the mover is strictly below the limit. A candidate sitting exactly on the
//! limit does not qualify.

use crate::error::{Error, Result};
use crate::geometry::DistanceMetric;
use crate::ids::{IdentityId, PlayerKey};
use crate::registry::{PlayerRecord, Registry};
use std::str::FromStr;

/// How to choose among several qualifying candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartnerStrategy {
    /// First qualifying candidate in registry order (ascending key).
    FirstFound,
    /// Closest qualifying candidate; equal distances go to the smaller key.
    #[default]
    Nearest,
}

impl FromStr for PartnerStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first-found" | "first_found" | "first" => Ok(Self::FirstFound),
            "nearest" => Ok(Self::Nearest),
            other => Err(Error::UnknownOption {
                option: "partner strategy",
                value: other.to_string(),
            }),
        }
    }
}

/// A qualifying partner for a mover.
#[derive(Debug, Clone, PartialEq)]
pub struct Partner {
    pub key: PlayerKey,
    pub identity: IdentityId,
    pub distance: f64,
}

/// Finds a partner for a mover among the linked players in the registry.
#[derive(Debug, Clone)]
pub struct NeighborResolver {
    limit: f64,
    metric: DistanceMetric,
    strategy: PartnerStrategy,
}

impl NeighborResolver {
    pub fn new(limit: f64, metric: DistanceMetric, strategy: PartnerStrategy) -> Result<Self> {
        if !limit.is_finite() || limit <= 0.0 {
            return Err(Error::InvalidDistanceLimit(limit));
        }
        Ok(Self { limit, metric, strategy })
    }

    pub fn limit(&self) -> f64 {
        self.limit
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn strategy(&self) -> PartnerStrategy {
        self.strategy
    }

    /// Distance between two records if it is strictly within the limit.
    pub fn within_limit(&self, a: &PlayerRecord, b: &PlayerRecord) -> Option<f64> {
        let distance = self.metric.distance(&a.position, &b.position);
        // NaN compares false and never qualifies
        (distance < self.limit).then_some(distance)
    }

    /// Pick a partner for `mover` among `candidates`.
    ///
    /// The mover itself and unlinked candidates are skipped. Candidates are
    /// expected in registry order.
    pub fn find_partner<'a, I>(&self, mover: &PlayerRecord, candidates: I) -> Option<Partner>
    where
        I: IntoIterator<Item = &'a PlayerRecord>,
    {
        let mut qualifying = candidates.into_iter().filter_map(|candidate| {
            if candidate.key == mover.key {
                return None;
            }
            let identity = candidate.identity.as_ref()?;
            let distance = self.within_limit(mover, candidate)?;
            Some(Partner {
                key: candidate.key.clone(),
                identity: identity.clone(),
                distance,
            })
        });

        match self.strategy {
            PartnerStrategy::FirstFound => qualifying.next(),
            PartnerStrategy::Nearest => {
                qualifying.fold(None, |best: Option<Partner>, next| match best {
                    Some(best) if best.distance < next.distance => Some(best),
                    Some(best) if best.distance == next.distance && best.key <= next.key => {
                        Some(best)
                    }
                    _ => Some(next),
                })
            }
        }
    }

    /// Look up `mover` in the registry and find its partner.
    pub fn resolve(&self, registry: &Registry, mover: &PlayerKey) -> Option<Partner> {
        let (mover, others) = registry.neighborhood(mover)?;
        self.find_partner(&mover, &others)
    }
}
