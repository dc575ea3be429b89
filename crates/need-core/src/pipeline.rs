//! Pipeline orchestrator: runs all redistribution stages in order.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::config::{Apportionment, RedistributionConfig};
use crate::error::{NeedError, Result};
use crate::matcher::{MatchOutcome, NearestClusterMatcher};
use crate::need_index::{median, NeedIndex, NeedIndexBuilder};
use crate::redistribute::{Allocator, BucketSummary};
use crate::tables::{AuditRow, ClusterSite, CovariateTable, FacilityRoster, VisitTable, LATITUDE};

/// Everything a run consumes, already loaded and validated at the boundary.
#[derive(Debug, Clone, Default)]
pub struct RunInputs {
    pub facilities: FacilityRoster,
    pub visits: VisitTable,
    pub covariates: CovariateTable,
    /// `None` when no coordinate source was available.
    pub clusters: Option<Vec<ClusterSite>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightMode {
    /// Weights come from the need index of each facility's nearest cluster.
    Spatial,
    /// Every facility weighs 1.0.
    Uniform,
}

/// Per-facility redistribution weights with a fallback for unknown ids.
#[derive(Debug, Clone, PartialEq)]
pub struct FacilityWeights {
    pub by_facility: HashMap<String, f64>,
    pub fallback: f64,
}

impl FacilityWeights {
    pub fn uniform() -> Self {
        Self { by_facility: HashMap::new(), fallback: 1.0 }
    }

    pub fn get(&self, facility_id: &str) -> f64 {
        self.by_facility.get(facility_id).copied().unwrap_or(self.fallback)
    }
}

/// Counts and warnings collected over a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: WeightMode,
    pub apportionment: Apportionment,
    pub facilities: usize,
    pub facilities_without_coordinates: usize,
    pub facilities_matched: usize,
    pub facilities_unmatched: usize,
    pub clusters_eligible: usize,
    pub degenerate_covariates: Vec<String>,
    pub need_index_uniform: bool,
    pub rows: usize,
    pub buckets: usize,
    pub max_abs_drift: u64,
    /// Buckets whose rounded total differs from the input total.
    pub drifted_buckets: Vec<BucketSummary>,
    pub conservation_violations: Vec<BucketSummary>,
    pub audit_rows: usize,
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub visits: VisitTable,
    pub audit: Vec<AuditRow>,
    pub weights: FacilityWeights,
    pub report: RunReport,
}

/// Matching stage output carried into the report.
#[derive(Default)]
struct SpatialStats {
    dropped: usize,
    matched: usize,
    unmatched: usize,
    clusters: usize,
}

pub struct Pipeline {
    config: RedistributionConfig,
}

impl Pipeline {
    pub fn new(config: RedistributionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RedistributionConfig {
        &self.config
    }

    /// Run the full pipeline.
    ///
    /// Stage order:
    ///   1. Need index over the covariate table
    ///   2. Nearest-cluster matching (when coordinates exist)
    ///   3. Facility weights, with median / uniform fallbacks
    ///   4. Per-bucket redistribution and audit sample
    pub fn run(&self, inputs: &RunInputs) -> Result<RunOutput> {
        let cfg = &self.config;

        // ── 1. Need index ───────────────────────────────────────────────────
        let index = NeedIndexBuilder::new(&cfg.covariates).build(&inputs.covariates);

        // ── 2–3. Matching and weights ───────────────────────────────────────
        let (weights, mode, stats) = match &inputs.clusters {
            Some(clusters) => self.spatial_weights(inputs, clusters, &index)?,
            None => {
                tracing::warn!("no cluster coordinates; applying uniform redistribution");
                (FacilityWeights::uniform(), WeightMode::Uniform, SpatialStats::default())
            }
        };

        // ── 4. Redistribution ───────────────────────────────────────────────
        let allocator = Allocator {
            method: cfg.apportionment,
            weight_floor: cfg.weight_floor,
            audit_rows: cfg.audit_rows,
        };
        let result = allocator.redistribute(&inputs.visits, |id| weights.get(id));

        let report = RunReport {
            mode,
            apportionment: cfg.apportionment,
            facilities: inputs.facilities.facilities.len(),
            facilities_without_coordinates: stats.dropped,
            facilities_matched: stats.matched,
            facilities_unmatched: stats.unmatched,
            clusters_eligible: stats.clusters,
            degenerate_covariates: index.degenerate.clone(),
            need_index_uniform: index.uniform,
            rows: result.table.len(),
            buckets: result.buckets.len(),
            max_abs_drift: result
                .buckets
                .iter()
                .map(|b| b.drift().unsigned_abs())
                .max()
                .unwrap_or(0),
            drifted_buckets: result.buckets.iter().filter(|b| b.drift() != 0).cloned().collect(),
            conservation_violations: result.violations,
            audit_rows: result.audit.len(),
        };

        Ok(RunOutput { visits: result.table, audit: result.audit, weights, report })
    }

    fn spatial_weights(
        &self,
        inputs: &RunInputs,
        clusters: &[ClusterSite],
        index: &NeedIndex,
    ) -> Result<(FacilityWeights, WeightMode, SpatialStats)> {
        if !inputs.facilities.has_coordinates {
            return Err(NeedError::missing_column("facilities", LATITUDE));
        }

        let known: HashSet<&str> = index.cluster_ids.iter().map(String::as_str).collect();
        let eligible: Vec<ClusterSite> = clusters
            .iter()
            .filter(|c| c.position.is_some() && known.contains(c.cluster_id.as_str()))
            .cloned()
            .collect();
        if eligible.is_empty() {
            tracing::warn!(
                "cluster coordinates share no ids with the covariate table; \
                 applying uniform redistribution"
            );
            return Ok((FacilityWeights::uniform(), WeightMode::Uniform, SpatialStats::default()));
        }

        let matcher = NearestClusterMatcher::new(self.config.max_match_km, self.config.batch_size);
        let outcome = matcher.assign(&inputs.facilities.facilities, &eligible);
        let weights = weights_from_matches(&outcome, index);

        let stats = SpatialStats {
            dropped: outcome.dropped.len(),
            matched: outcome.assignments.len() - outcome.unmatched,
            unmatched: outcome.unmatched,
            clusters: eligible.len(),
        };
        Ok((weights, WeightMode::Spatial, stats))
    }
}

/// Join assignments to the need index. Unmatched facilities take the median
/// of matched weights; ids absent from the roster take the median of all
/// facility weights. Either median falls back to 1.0 when empty.
pub fn weights_from_matches(outcome: &MatchOutcome, index: &NeedIndex) -> FacilityWeights {
    let lookup = index.lookup();
    let joined: Vec<(&str, Option<f64>)> = outcome
        .assignments
        .iter()
        .map(|a| {
            let w = a.cluster_id.as_deref().and_then(|c| lookup.get(c).copied());
            (a.facility_id.as_str(), w)
        })
        .collect();

    let matched_median = median(joined.iter().filter_map(|(_, w)| *w)).unwrap_or(1.0);
    let mut by_facility = HashMap::with_capacity(joined.len());
    for (id, w) in joined {
        by_facility.entry(id.to_string()).or_insert(w.unwrap_or(matched_median));
    }
    let fallback = median(by_facility.values().copied()).unwrap_or(1.0);
    FacilityWeights { by_facility, fallback }
}
