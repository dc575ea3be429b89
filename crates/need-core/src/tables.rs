//! Tabular records and their CSV boundary.
//!
//! Column presence is checked once, here, when a table is read. Everything
//! downstream works on typed records and never looks at headers again.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use serde::Serialize;

use crate::coords::{coerce_f64, LatLon};
use crate::error::{NeedError, Result};

pub const FACILITY_ID: &str = "facility_id";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const TIME_BUCKET: &str = "time_bucket";
pub const TOTAL_COUNT: &str = "total_count";
pub const CLUSTER_ID: &str = "cluster_id";

// ── Records ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Facility {
    pub facility_id: String,
    /// `None` when either coordinate is absent or not numeric.
    pub position: Option<LatLon>,
}

#[derive(Debug, Clone, Default)]
pub struct FacilityRoster {
    pub facilities: Vec<Facility>,
    /// False when the roster file carries no latitude/longitude columns.
    pub has_coordinates: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSite {
    pub cluster_id: String,
    pub position: Option<LatLon>,
}

/// Cluster-level covariates, one row per unique `cluster_id`.
#[derive(Debug, Clone, Default)]
pub struct CovariateTable {
    pub cluster_ids: Vec<String>,
    columns: Vec<String>,
    values: HashMap<String, Vec<Option<f64>>>,
}

impl CovariateTable {
    /// Build from named columns. Every column must have one entry per cluster.
    pub fn new(cluster_ids: Vec<String>, columns: Vec<(String, Vec<Option<f64>>)>) -> Self {
        let names = columns.iter().map(|(n, _)| n.clone()).collect();
        let values = columns
            .into_iter()
            .map(|(name, col)| {
                debug_assert_eq!(col.len(), cluster_ids.len(), "column {name} has wrong length");
                (name, col)
            })
            .collect();
        Self { cluster_ids, columns: names, values }
    }

    pub fn len(&self) -> usize {
        self.cluster_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cluster_ids.is_empty()
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.values.get(name).map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisitRecord {
    pub facility_id: String,
    pub time_bucket: String,
    pub total_count: u64,
    /// Passthrough cells, aligned with `VisitTable::extra_columns`.
    pub extra: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitField {
    FacilityId,
    TimeBucket,
    TotalCount,
    Extra(usize),
}

/// Visit table with its original column layout, so it can be written back
/// with an identical schema.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitTable {
    layout: Vec<VisitField>,
    header: Vec<String>,
    pub records: Vec<VisitRecord>,
}

impl Default for VisitTable {
    fn default() -> Self {
        Self::from_records(Vec::new())
    }
}

impl VisitTable {
    /// Table with only the three required columns.
    pub fn from_records(records: Vec<VisitRecord>) -> Self {
        Self {
            layout: vec![VisitField::FacilityId, VisitField::TimeBucket, VisitField::TotalCount],
            header: vec![FACILITY_ID.into(), TIME_BUCKET.into(), TOTAL_COUNT.into()],
            records,
        }
    }

    pub fn extra_columns(&self) -> Vec<&str> {
        self.layout
            .iter()
            .zip(&self.header)
            .filter(|(f, _)| matches!(f, VisitField::Extra(_)))
            .map(|(_, h)| h.as_str())
            .collect()
    }

    /// Same layout, new rows.
    pub fn with_records(&self, records: Vec<VisitRecord>) -> Self {
        Self { layout: self.layout.clone(), header: self.header.clone(), records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn row<'a>(&'a self, rec: &'a VisitRecord, count: &'a str) -> Vec<&'a str> {
        self.layout
            .iter()
            .map(|f| match f {
                VisitField::FacilityId => rec.facility_id.as_str(),
                VisitField::TimeBucket => rec.time_bucket.as_str(),
                VisitField::TotalCount => count,
                VisitField::Extra(i) => rec.extra.get(*i).map(String::as_str).unwrap_or(""),
            })
            .collect()
    }
}

/// Before/after counts for one visit row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRow {
    pub facility_id: String,
    pub time_bucket: String,
    pub total_count_before: u64,
    pub total_count_after: u64,
}

// ── Readers ──────────────────────────────────────────────────────────────────

fn open(table: &'static str, path: &Path) -> Result<File> {
    if !path.exists() {
        return Err(NeedError::MissingInput { table, path: path.to_path_buf() });
    }
    Ok(File::open(path)?)
}

fn headers<R: Read>(rdr: &mut csv::Reader<R>) -> Result<Vec<String>> {
    Ok(rdr.headers()?.iter().map(|h| h.trim().to_string()).collect())
}

fn require(header: &[String], table: &str, column: &str) -> Result<usize> {
    header
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| NeedError::missing_column(table, column))
}

pub(crate) fn find_alias(header: &[String], aliases: &[&str]) -> Option<usize> {
    header.iter().position(|h| aliases.iter().any(|a| h.eq_ignore_ascii_case(a)))
}

fn reader<R: Read>(input: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(input)
}

/// Parse a visit count. Integral float text (`"12.0"`) is accepted.
fn parse_count(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<u64>() {
        return Some(n);
    }
    let v = trimmed.parse::<f64>().ok()?;
    (v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64).then_some(v as u64)
}

pub fn read_facilities<R: Read>(input: R) -> Result<FacilityRoster> {
    const TABLE: &str = "facilities";
    let mut rdr = reader(input);
    let header = headers(&mut rdr)?;
    let id_col = require(&header, TABLE, FACILITY_ID)?;
    let lat_col = header.iter().position(|h| h == LATITUDE);
    let lon_col = header.iter().position(|h| h == LONGITUDE);

    let mut facilities = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        let cell = |i: Option<usize>| i.and_then(|i| rec.get(i)).and_then(coerce_f64);
        facilities.push(Facility {
            facility_id: rec.get(id_col).unwrap_or("").trim().to_string(),
            position: LatLon::from_parts(cell(lat_col), cell(lon_col)),
        });
    }
    Ok(FacilityRoster { facilities, has_coordinates: lat_col.is_some() && lon_col.is_some() })
}

pub fn read_visits<R: Read>(input: R) -> Result<VisitTable> {
    const TABLE: &str = "visits";
    let mut rdr = reader(input);
    let header = headers(&mut rdr)?;
    let id_col = require(&header, TABLE, FACILITY_ID)?;
    let bucket_col = require(&header, TABLE, TIME_BUCKET)?;
    let count_col = require(&header, TABLE, TOTAL_COUNT)?;

    let mut extra_cols = Vec::new();
    let layout = (0..header.len())
        .map(|i| {
            if i == id_col {
                VisitField::FacilityId
            } else if i == bucket_col {
                VisitField::TimeBucket
            } else if i == count_col {
                VisitField::TotalCount
            } else {
                extra_cols.push(i);
                VisitField::Extra(extra_cols.len() - 1)
            }
        })
        .collect();

    let mut records = Vec::new();
    for (row, rec) in rdr.records().enumerate() {
        let rec = rec?;
        let raw = rec.get(count_col).unwrap_or("");
        let total_count = parse_count(raw).ok_or_else(|| NeedError::InvalidValue {
            table: TABLE.into(),
            row: row + 1,
            column: TOTAL_COUNT.into(),
            value: raw.to_string(),
        })?;
        records.push(VisitRecord {
            facility_id: rec.get(id_col).unwrap_or("").trim().to_string(),
            time_bucket: rec.get(bucket_col).unwrap_or("").trim().to_string(),
            total_count,
            extra: extra_cols.iter().map(|&i| rec.get(i).unwrap_or("").to_string()).collect(),
        });
    }
    Ok(VisitTable { layout, header, records })
}

pub fn read_covariates<R: Read>(input: R) -> Result<CovariateTable> {
    const TABLE: &str = "covariates";
    let mut rdr = reader(input);
    let header = headers(&mut rdr)?;
    let id_col = require(&header, TABLE, CLUSTER_ID)?;
    let cov_cols: Vec<usize> = (0..header.len()).filter(|&i| i != id_col).collect();

    let mut seen = HashSet::new();
    let mut cluster_ids = Vec::new();
    let mut columns: Vec<Vec<Option<f64>>> = vec![Vec::new(); cov_cols.len()];
    let mut duplicates = 0usize;
    for rec in rdr.records() {
        let rec = rec?;
        let id = rec.get(id_col).unwrap_or("").trim().to_string();
        if !seen.insert(id.clone()) {
            duplicates += 1;
            continue;
        }
        cluster_ids.push(id);
        for (col, &i) in columns.iter_mut().zip(&cov_cols) {
            col.push(rec.get(i).and_then(coerce_f64));
        }
    }
    if duplicates > 0 {
        tracing::warn!(duplicates, "dropped duplicate cluster rows from covariate table");
    }
    let named = cov_cols.iter().map(|&i| header[i].clone()).zip(columns).collect();
    Ok(CovariateTable::new(cluster_ids, named))
}

pub fn load_facilities(path: &Path) -> Result<FacilityRoster> {
    read_facilities(open("facilities", path)?)
}

pub fn load_visits(path: &Path) -> Result<VisitTable> {
    read_visits(open("visits", path)?)
}

pub fn load_covariates(path: &Path) -> Result<CovariateTable> {
    read_covariates(open("covariates", path)?)
}

// ── Writers ──────────────────────────────────────────────────────────────────

pub fn write_visits<W: Write>(table: &VisitTable, out: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(&table.header)?;
    for rec in &table.records {
        let count = rec.total_count.to_string();
        wtr.write_record(table.row(rec, &count))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_audit<W: Write>(rows: &[AuditRow], out: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    if rows.is_empty() {
        wtr.write_record([FACILITY_ID, TIME_BUCKET, "total_count_before", "total_count_after"])?;
    }
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn create(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(File::create(path)?)
}

pub fn save_visits(table: &VisitTable, path: &Path) -> Result<()> {
    write_visits(table, create(path)?)
}

pub fn save_audit(rows: &[AuditRow], path: &Path) -> Result<()> {
    write_audit(rows, create(path)?)
}
