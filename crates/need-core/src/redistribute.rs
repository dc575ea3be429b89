//! Conservative redistribution of per-bucket visit totals.
//!
//! Within each time bucket the bucket total `T` is split across the rows
//! present in proportion to their weights. With largest-remainder
//! apportionment the split sums to `T` exactly.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::Apportionment;
use crate::tables::{AuditRow, VisitRecord, VisitTable};

/// Split `total` into integer parts proportional to `weights`.
/// Weights must be positive; the caller applies the floor.
pub fn apportion(total: u64, weights: &[f64], method: Apportionment) -> Vec<u64> {
    if weights.is_empty() {
        return Vec::new();
    }
    let sum: f64 = weights.iter().sum();
    let shares: Vec<f64> = weights.iter().map(|w| total as f64 * (w / sum)).collect();
    match method {
        Apportionment::Nearest => {
            shares.iter().map(|s| s.round_ties_even().max(0.0) as u64).collect()
        }
        Apportionment::LargestRemainder => largest_remainder(total, &shares, weights),
    }
}

/// Hare-quota largest remainder over precomputed real-valued shares.
fn largest_remainder(total: u64, shares: &[f64], weights: &[f64]) -> Vec<u64> {
    let mut alloc: Vec<u64> =
        shares.iter().map(|s| (s.floor().max(0.0) as u64).min(total)).collect();
    let remainders: Vec<f64> = shares.iter().zip(&alloc).map(|(s, &f)| s - f as f64).collect();

    // Ranking: remainder desc, weight desc, row order asc.
    let mut ranking: Vec<usize> = (0..shares.len()).collect();
    ranking.sort_by(|&a, &b| {
        remainders[b]
            .total_cmp(&remainders[a])
            .then_with(|| weights[b].total_cmp(&weights[a]))
            .then_with(|| a.cmp(&b))
    });

    let assigned: u64 = alloc.iter().sum();
    if assigned < total {
        for &i in ranking.iter().cycle().take((total - assigned) as usize) {
            alloc[i] += 1;
        }
    } else if assigned > total {
        // Float error on floors; take back from the smallest remainders.
        let mut excess = assigned - total;
        for &i in ranking.iter().rev() {
            if excess == 0 {
                break;
            }
            if alloc[i] > 0 {
                alloc[i] -= 1;
                excess -= 1;
            }
        }
    }
    alloc
}

/// Before/after totals for one time bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketSummary {
    pub time_bucket: String,
    pub entities: usize,
    pub total_before: u64,
    pub total_after: u64,
}

impl BucketSummary {
    pub fn drift(&self) -> i64 {
        self.total_after as i64 - self.total_before as i64
    }
}

#[derive(Debug, Clone)]
pub struct Redistribution {
    pub table: VisitTable,
    pub audit: Vec<AuditRow>,
    pub buckets: Vec<BucketSummary>,
    /// Buckets whose drift exceeded the tolerance for the chosen method.
    pub violations: Vec<BucketSummary>,
}

#[derive(Debug, Clone, Copy)]
pub struct Allocator {
    pub method: Apportionment,
    pub weight_floor: f64,
    pub audit_rows: usize,
}

impl Allocator {
    fn weight<F: Fn(&str) -> f64>(&self, weight_of: &F, facility_id: &str) -> f64 {
        weight_of(facility_id).max(self.weight_floor)
    }

    /// Allowed |drift| for a bucket with `entities` rows.
    pub fn tolerance(&self, entities: usize) -> u64 {
        match self.method {
            Apportionment::LargestRemainder => 0,
            Apportionment::Nearest => entities as u64,
        }
    }

    /// Produce a new table with counts reallocated by `weight_of(facility_id)`.
    /// Row order and passthrough columns are unchanged; the input is not touched.
    pub fn redistribute<F>(&self, table: &VisitTable, weight_of: F) -> Redistribution
    where
        F: Fn(&str) -> f64,
    {
        let records = &table.records;

        let mut order: Vec<(&str, Vec<usize>)> = Vec::new();
        let mut slot: HashMap<&str, usize> = HashMap::new();
        for (i, rec) in records.iter().enumerate() {
            let k = *slot.entry(rec.time_bucket.as_str()).or_insert_with(|| {
                order.push((rec.time_bucket.as_str(), Vec::new()));
                order.len() - 1
            });
            order[k].1.push(i);
        }

        let mut new_counts = vec![0u64; records.len()];
        let mut buckets = Vec::with_capacity(order.len());
        let mut violations = Vec::new();
        for (bucket, rows) in &order {
            let total: u64 = rows.iter().map(|&i| records[i].total_count).sum();
            let weights: Vec<f64> =
                rows.iter().map(|&i| self.weight(&weight_of, &records[i].facility_id)).collect();
            let parts = apportion(total, &weights, self.method);
            for (&i, part) in rows.iter().zip(parts) {
                new_counts[i] = part;
            }

            let summary = BucketSummary {
                time_bucket: bucket.to_string(),
                entities: rows.len(),
                total_before: total,
                total_after: rows.iter().map(|&i| new_counts[i]).sum(),
            };
            if summary.drift().unsigned_abs() > self.tolerance(rows.len()) {
                tracing::warn!(
                    bucket = %summary.time_bucket,
                    before = summary.total_before,
                    after = summary.total_after,
                    "bucket total not conserved"
                );
                violations.push(summary.clone());
            } else if summary.drift() != 0 {
                tracing::debug!(
                    bucket = %summary.time_bucket,
                    drift = summary.drift(),
                    "rounding drift"
                );
            }
            buckets.push(summary);
        }

        let out: Vec<VisitRecord> = records
            .iter()
            .zip(&new_counts)
            .map(|(rec, &count)| VisitRecord { total_count: count, ..rec.clone() })
            .collect();

        let audit = records
            .iter()
            .zip(&new_counts)
            .take(self.audit_rows)
            .map(|(rec, &after)| AuditRow {
                facility_id: rec.facility_id.clone(),
                time_bucket: rec.time_bucket.clone(),
                total_count_before: rec.total_count,
                total_count_after: after,
            })
            .collect();

        tracing::info!(rows = records.len(), buckets = buckets.len(), "redistribution done");
        Redistribution { table: table.with_records(out), audit, buckets, violations }
    }
}
