//! Balancers - pick one node from a router's candidate set
//!
//! Strategies are interchangeable behind a single trait. The weighted
//! variants honor node weights maintained by the policy daemon; the static
//! variants exist for tests and fixed-upstream deployments.

use std::collections::HashMap;
use std::sync::Mutex;

use dashmap::DashMap;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::cluster::NodeInfo;

/// Errors from node selection
///
/// Distinct from "no route": `NoEligibleNode` means candidates existed but
/// none could be chosen (empty set or every weight at 0), so callers can
/// tell "nothing registered" from "registered but unhealthy".
#[derive(Error, Debug)]
pub enum BalancerError {
    #[error("No eligible node among {0} candidate(s)")]
    NoEligibleNode(usize),
}

/// Weight-selection contract
pub trait Balancer: Send + Sync {
    /// Choose one node from the candidates
    fn select(&self, candidates: &[NodeInfo]) -> Result<NodeInfo, BalancerError>;

    /// The strategy name, for logs
    fn name(&self) -> &'static str;
}

/// Draws a node with probability proportional to its weight
///
/// Zero-weight candidates are never drawn. Equal weights degenerate to a
/// uniform choice by construction.
pub struct WeightedRandomBalancer {
    rng: Mutex<SmallRng>,
}

impl WeightedRandomBalancer {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(SmallRng::from_entropy()),
        }
    }

    /// Deterministic variant for reproducible selection sequences
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }
}

impl Default for WeightedRandomBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl Balancer for WeightedRandomBalancer {
    fn select(&self, candidates: &[NodeInfo]) -> Result<NodeInfo, BalancerError> {
        let eligible: Vec<&NodeInfo> = candidates.iter().filter(|n| n.weight > 0.0).collect();
        if eligible.is_empty() {
            return Err(BalancerError::NoEligibleNode(candidates.len()));
        }

        let total: f64 = eligible.iter().map(|n| n.weight).sum();
        let draw = {
            let mut rng = self.rng.lock().expect("balancer rng poisoned");
            rng.gen_range(0.0..total)
        };

        let mut cumulative = 0.0;
        for node in &eligible {
            cumulative += node.weight;
            if draw < cumulative {
                return Ok((*node).clone());
            }
        }

        // Float rounding can leave the draw a hair past the last bucket
        Ok((*eligible.last().expect("eligible set checked nonempty")).clone())
    }

    fn name(&self) -> &'static str {
        "weighted_random"
    }
}

/// Deficit round robin: weight-proportional selection without bursts
///
/// Each candidate set (keyed by its node ids) keeps a credit balance per
/// node. When no credit is positive, every node gains its current weight;
/// the highest positive balance wins and pays 1. Deficits carry over, so
/// long-run selection frequency tracks weight exactly while interleaving
/// nodes instead of repeating the heaviest one back-to-back.
#[derive(Default)]
pub struct WeightedRoundRobinBalancer {
    credits: DashMap<String, HashMap<String, f64>>,
}

impl WeightedRoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            credits: DashMap::new(),
        }
    }

    /// Stable key for one candidate set
    fn set_key(candidates: &[NodeInfo]) -> String {
        let mut ids: Vec<&str> = candidates.iter().map(|n| n.node_id.as_str()).collect();
        ids.sort_unstable();
        ids.join(",")
    }
}

impl Balancer for WeightedRoundRobinBalancer {
    fn select(&self, candidates: &[NodeInfo]) -> Result<NodeInfo, BalancerError> {
        let eligible: Vec<&NodeInfo> = candidates.iter().filter(|n| n.weight > 0.0).collect();
        if eligible.is_empty() {
            return Err(BalancerError::NoEligibleNode(candidates.len()));
        }

        let key = Self::set_key(candidates);
        let mut credits = self.credits.entry(key).or_default();

        // Replenish until someone can pay. Every eligible weight is > 0,
        // so this terminates; the guard bounds pathological tiny weights.
        let mut rounds = 0;
        while !eligible
            .iter()
            .any(|n| credits.get(&n.node_id).copied().unwrap_or(0.0) > 0.0)
        {
            for node in &eligible {
                *credits.entry(node.node_id.clone()).or_insert(0.0) += node.weight;
            }
            rounds += 1;
            if rounds > 10_000 {
                return Err(BalancerError::NoEligibleNode(candidates.len()));
            }
        }

        // Highest positive balance wins; ties go to candidate order
        let mut chosen: Option<(&NodeInfo, f64)> = None;
        for &node in &eligible {
            let balance = credits.get(&node.node_id).copied().unwrap_or(0.0);
            if balance <= 0.0 {
                continue;
            }
            match chosen {
                Some((_, best)) if balance <= best => {}
                _ => chosen = Some((node, balance)),
            }
        }

        let (node, balance) = chosen.expect("replenish loop guarantees a positive balance");
        credits.insert(node.node_id.clone(), balance - 1.0);
        Ok(node.clone())
    }

    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }
}

/// Always returns one pre-configured target, weights ignored
pub struct StaticHostBalancer {
    target: NodeInfo,
}

impl StaticHostBalancer {
    pub fn new(target: NodeInfo) -> Self {
        Self { target }
    }
}

impl Balancer for StaticHostBalancer {
    fn select(&self, candidates: &[NodeInfo]) -> Result<NodeInfo, BalancerError> {
        if candidates.is_empty() {
            return Err(BalancerError::NoEligibleNode(0));
        }
        Ok(self.target.clone())
    }

    fn name(&self) -> &'static str {
        "static_host"
    }
}

/// Fixed loopback target on a configured port
pub struct StaticLocalhostBalancer {
    target: NodeInfo,
}

impl StaticLocalhostBalancer {
    pub fn new(port: u16) -> Self {
        Self {
            target: NodeInfo::new("localhost", "127.0.0.1", port)
                .with_status(crate::cluster::NodeState::Active),
        }
    }
}

impl Balancer for StaticLocalhostBalancer {
    fn select(&self, candidates: &[NodeInfo]) -> Result<NodeInfo, BalancerError> {
        if candidates.is_empty() {
            return Err(BalancerError::NoEligibleNode(0));
        }
        Ok(self.target.clone())
    }

    fn name(&self) -> &'static str {
        "static_localhost"
    }
}
