//! Weighted Instance Selection
//!
//! Picks one instance of a service with probability proportional to its
//! weight. When any instance is unweighted, or all weights are zero, every
//! instance is equally likely.
//!
//! Properties:
//! - Canonical order: instances are walked in node-name order, the iteration
//!   order of the snapshot's `BTreeMap`
//! - Deterministic: a given draw `r` always maps to the same instance for the
//!   same snapshot, so seeded RNGs give reproducible picks
//! - Single pass over one snapshot for both summing and picking

use crate::instance::InstanceConfig;
use crate::registry::ServiceInstances;
use rand::Rng;

/// Range a draw is taken from for a given instance set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawRange {
    /// `r` in `[0, total_weight)`
    Weighted { total_weight: u64 },
    /// `r` in `[0, count)`
    Uniform { count: u64 },
}

impl DrawRange {
    pub fn upper_bound(&self) -> u64 {
        match *self {
            DrawRange::Weighted { total_weight } => total_weight,
            DrawRange::Uniform { count } => count,
        }
    }
}

/// Weight-proportional selector over one service's instances
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedSelector;

impl WeightedSelector {
    /// Which range a draw must come from, `None` for an empty set.
    pub fn draw_range(instances: &ServiceInstances) -> Option<DrawRange> {
        if instances.is_empty() {
            return None;
        }

        let total_weight = instances
            .values()
            .map(|config| config.weight.map(u64::from))
            .sum::<Option<u64>>();

        match total_weight {
            Some(total_weight) if total_weight > 0 => Some(DrawRange::Weighted { total_weight }),
            _ => Some(DrawRange::Uniform {
                count: instances.len() as u64,
            }),
        }
    }

    /// Map a draw `r` onto an instance.
    ///
    /// `r` must lie in the range reported by [`draw_range`](Self::draw_range);
    /// out-of-range draws return `None`.
    pub fn pick(instances: &ServiceInstances, r: u64) -> Option<(&String, &InstanceConfig)> {
        match Self::draw_range(instances)? {
            DrawRange::Weighted { .. } => {
                let mut cumulative = 0u64;
                for (node, config) in instances {
                    let weight = u64::from(config.weight.unwrap_or(0));
                    if r < cumulative + weight {
                        return Some((node, config));
                    }
                    cumulative += weight;
                }
                None
            }
            DrawRange::Uniform { .. } => {
                let index = usize::try_from(r).ok()?;
                instances.iter().nth(index)
            }
        }
    }

    /// Draw from `rng` and pick an instance.
    pub fn select<'a, R: Rng + ?Sized>(
        instances: &'a ServiceInstances,
        rng: &mut R,
    ) -> Option<(&'a String, &'a InstanceConfig)> {
        let range = Self::draw_range(instances)?;
        let r = rng.gen_range(0..range.upper_bound());
        Self::pick(instances, r)
    }
}
