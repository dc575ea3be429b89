//! Nearest-cluster assignment for facilities.

use crate::coords::LatLon;
use crate::distance::DistanceEngine;
use crate::tables::{ClusterSite, Facility};

/// One facility's nearest cluster. `cluster_id` is `None` when the closest
/// valid cluster is farther than the cutoff or no valid cluster exists.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub facility_id: String,
    pub cluster_id: Option<String>,
    /// Distance to the closest valid cluster, even when it was cut off.
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    /// One entry per facility that had a position, in roster order.
    pub assignments: Vec<Assignment>,
    /// Facilities skipped because they lack a position.
    pub dropped: Vec<String>,
    /// Facilities whose nearest cluster was beyond the cutoff.
    pub unmatched: usize,
}

/// Index and distance of the smallest finite entry. `NaN` counts as
/// infinitely far; ties keep the first index.
pub fn argmin_finite(row: &[f64]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (j, &d) in row.iter().enumerate() {
        if d.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if d >= b => {}
            _ => best = Some((j, d)),
        }
    }
    best
}

#[derive(Debug, Clone, Copy)]
pub struct NearestClusterMatcher {
    pub max_distance_km: f64,
    engine: DistanceEngine,
}

impl NearestClusterMatcher {
    pub fn new(max_distance_km: f64, batch_size: usize) -> Self {
        Self { max_distance_km, engine: DistanceEngine::new(batch_size) }
    }

    pub fn assign(&self, facilities: &[Facility], clusters: &[ClusterSite]) -> MatchOutcome {
        let (located, dropped): (Vec<&Facility>, Vec<&Facility>) =
            facilities.iter().partition(|f| f.position.is_some());
        let dropped: Vec<String> = dropped.into_iter().map(|f| f.facility_id.clone()).collect();
        if !dropped.is_empty() {
            tracing::warn!(
                count = dropped.len(),
                "facilities without coordinates excluded from matching"
            );
        }

        let targets: Vec<(&str, LatLon)> = clusters
            .iter()
            .filter_map(|c| c.position.map(|p| (c.cluster_id.as_str(), p)))
            .collect();
        let target_points: Vec<LatLon> = targets.iter().map(|(_, p)| *p).collect();
        let origins: Vec<LatLon> = located.iter().filter_map(|f| f.position).collect();

        let nearest = self.engine.map_rows(&origins, &target_points, argmin_finite);

        let mut unmatched = 0usize;
        let assignments = located
            .iter()
            .zip(nearest)
            .map(|(fac, best)| {
                let cluster_id = match best {
                    Some((j, d)) if d <= self.max_distance_km => Some(targets[j].0.to_string()),
                    _ => {
                        unmatched += 1;
                        None
                    }
                };
                Assignment {
                    facility_id: fac.facility_id.clone(),
                    cluster_id,
                    distance_km: best.map(|(_, d)| d),
                }
            })
            .collect();

        if unmatched > 0 {
            tracing::warn!(
                unmatched,
                cutoff_km = self.max_distance_km,
                "facilities left without a cluster assignment"
            );
        }
        tracing::info!(
            facilities = origins.len(),
            clusters = target_points.len(),
            batch_size = self.engine.batch_size(),
            unmatched,
            "nearest-cluster matching done"
        );

        MatchOutcome { assignments, dropped, unmatched }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fac(id: &str, pos: Option<(f64, f64)>) -> Facility {
        Facility { facility_id: id.into(), position: pos.map(|(a, b)| LatLon::new(a, b)) }
    }

    fn site(id: &str, pos: Option<(f64, f64)>) -> ClusterSite {
        ClusterSite { cluster_id: id.into(), position: pos.map(|(a, b)| LatLon::new(a, b)) }
    }

    #[test]
    fn argmin_skips_nan_and_keeps_first_tie() {
        assert_eq!(argmin_finite(&[f64::NAN, 3.0, 1.0, 1.0]), Some((2, 1.0)));
        assert_eq!(argmin_finite(&[f64::NAN, f64::NAN]), None);
        assert_eq!(argmin_finite(&[]), None);
    }

    #[test]
    fn picks_nearest_cluster() {
        let facilities = vec![fac("F1", Some((6.0, 3.0))), fac("F2", Some((12.0, 8.0)))];
        let clusters = vec![site("C_lagos", Some((6.1, 3.1))), site("C_kano", Some((12.1, 8.1)))];
        let out = NearestClusterMatcher::new(25_000.0, 1).assign(&facilities, &clusters);
        assert_eq!(out.assignments[0].cluster_id.as_deref(), Some("C_lagos"));
        assert_eq!(out.assignments[1].cluster_id.as_deref(), Some("C_kano"));
        assert_eq!(out.unmatched, 0);
        assert!(out.dropped.is_empty());
    }

    #[test]
    fn drops_facilities_without_position() {
        let facilities = vec![fac("F1", None), fac("F2", Some((0.0, 0.0)))];
        let clusters = vec![site("C1", Some((0.0, 0.5)))];
        let out = NearestClusterMatcher::new(25_000.0, 2000).assign(&facilities, &clusters);
        assert_eq!(out.dropped, vec!["F1".to_string()]);
        assert_eq!(out.assignments.len(), 1);
        assert_eq!(out.assignments[0].facility_id, "F2");
    }

    #[test]
    fn zero_cutoff_without_colocation_matches_nothing() {
        let facilities = vec![fac("F1", Some((1.0, 1.0))), fac("F2", Some((2.0, 2.0)))];
        let clusters = vec![site("C1", Some((1.5, 1.5)))];
        let out = NearestClusterMatcher::new(0.0, 2000).assign(&facilities, &clusters);
        assert!(out.assignments.iter().all(|a| a.cluster_id.is_none()));
        assert!(out.assignments.iter().all(|a| a.distance_km.unwrap() > 0.0));
        assert_eq!(out.unmatched, 2);
    }

    #[test]
    fn zero_cutoff_keeps_colocated_match() {
        let facilities = vec![fac("F1", Some((1.0, 1.0)))];
        let clusters = vec![site("C1", Some((1.0, 1.0)))];
        let out = NearestClusterMatcher::new(0.0, 2000).assign(&facilities, &clusters);
        assert_eq!(out.assignments[0].cluster_id.as_deref(), Some("C1"));
    }

    #[test]
    fn clusters_without_valid_position_are_ignored() {
        let facilities = vec![fac("F1", Some((0.0, 0.0)))];
        let clusters = vec![
            site("C_none", None),
            site("C_bad", Some((95.0, 0.0))),
            site("C_far", Some((40.0, 40.0))),
        ];
        let out = NearestClusterMatcher::new(25_000.0, 2000).assign(&facilities, &clusters);
        assert_eq!(out.assignments[0].cluster_id.as_deref(), Some("C_far"));
    }

    #[test]
    fn no_clusters_means_no_assignment() {
        let facilities = vec![fac("F1", Some((0.0, 0.0)))];
        let out = NearestClusterMatcher::new(25_000.0, 2000).assign(&facilities, &[]);
        assert_eq!(out.assignments[0].cluster_id, None);
        assert_eq!(out.assignments[0].distance_km, None);
        assert_eq!(out.unmatched, 1);
    }
}
