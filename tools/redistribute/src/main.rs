//! Redistribute per-bucket facility visit totals by a spatial need index.
//! Reads the facility roster, visit table, cluster covariates and (when
//! available) cluster coordinates; writes the replacement visit table, an
//! audit sample and a JSON run summary.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use need_core::source;
use need_core::tables;
use need_core::{Apportionment, Pipeline, RedistributionConfig, RunInputs, RunReport};
use tracing_subscriber::EnvFilter;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ApportionArg {
    LargestRemainder,
    Nearest,
}

impl From<ApportionArg> for Apportionment {
    fn from(a: ApportionArg) -> Self {
        match a {
            ApportionArg::LargestRemainder => Apportionment::LargestRemainder,
            ApportionArg::Nearest => Apportionment::Nearest,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "redistribute",
    about = "Reallocate monthly facility visits by cluster need while preserving bucket totals"
)]
struct Args {
    /// Facility roster CSV (facility_id, latitude, longitude)
    #[arg(long, default_value = "data/raw/_manual/facilities.csv")]
    facilities: PathBuf,

    /// Baseline visit CSV (facility_id, time_bucket, total_count)
    #[arg(long, default_value = "data/raw/_manual/visits.csv")]
    visits: PathBuf,

    /// Cluster covariate CSV (cluster_id + numeric covariates)
    #[arg(long, default_value = "data/raw/clusters/covariates.csv")]
    covariates: PathBuf,

    /// Cluster coordinate CSV (cluster_id, lat, lon); preferred when present
    #[arg(long, default_value = "data/raw/clusters/coordinates.csv")]
    coordinates: PathBuf,

    /// Cluster GeoJSON point/polygon file, used when the coordinate CSV is absent
    #[arg(long, default_value = "data/raw/clusters/clusters.geojson")]
    cluster_points: PathBuf,

    /// Output path for the redistributed visit table
    #[arg(short, long, default_value = "data/processed/visits_redistributed.csv")]
    output: PathBuf,

    /// Output path for the before/after audit sample
    #[arg(long, default_value = "data/processed/visits_diff_sample.csv")]
    audit: PathBuf,

    /// Optional JSON run summary
    #[arg(long)]
    summary: Option<PathBuf>,

    /// JSON configuration file (any field may be omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override: maximum nearest-cluster distance in km
    #[arg(long)]
    max_match_km: Option<f64>,

    /// Override: facilities per distance chunk
    #[arg(long)]
    batch_size: Option<usize>,

    /// Override: rounding method for integer shares
    #[arg(long, value_enum)]
    apportionment: Option<ApportionArg>,

    /// Override: rows kept in the audit sample
    #[arg(long)]
    audit_rows: Option<usize>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Config file (or defaults) with CLI overrides applied, then validated.
fn resolve_config(args: &Args) -> Result<RedistributionConfig> {
    let mut cfg = match &args.config {
        Some(path) => RedistributionConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RedistributionConfig::default(),
    };
    if let Some(km) = args.max_match_km {
        cfg.max_match_km = km;
    }
    if let Some(n) = args.batch_size {
        cfg.batch_size = n;
    }
    if let Some(a) = args.apportionment {
        cfg.apportionment = a.into();
    }
    if let Some(n) = args.audit_rows {
        cfg.audit_rows = n;
    }
    cfg.validate().context("validating configuration")?;
    Ok(cfg)
}

fn load_inputs(args: &Args) -> Result<RunInputs> {
    let facilities = tables::load_facilities(&args.facilities)
        .with_context(|| format!("reading {}", args.facilities.display()))?;
    let visits = tables::load_visits(&args.visits)
        .with_context(|| format!("reading {}", args.visits.display()))?;
    let covariates = tables::load_covariates(&args.covariates)
        .with_context(|| format!("reading {}", args.covariates.display()))?;

    let clusters = match source::discover(Some(&args.coordinates), Some(&args.cluster_points)) {
        Some(src) => {
            let sites = src.load().with_context(|| format!("reading {}", src.describe()))?;
            tracing::info!(
                source = %src.describe(),
                clusters = sites.len(),
                "cluster coordinates loaded"
            );
            Some(sites)
        }
        None => None,
    };

    tracing::info!(
        facilities = facilities.facilities.len(),
        visit_rows = visits.len(),
        passthrough_columns = ?visits.extra_columns(),
        clusters_with_covariates = covariates.len(),
        "inputs loaded"
    );
    Ok(RunInputs { facilities, visits, covariates, clusters })
}

fn write_summary(report: &RunReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(report)?)?;
    Ok(())
}

fn run(args: &Args) -> Result<RunReport> {
    let cfg = resolve_config(args)?;
    let inputs = load_inputs(args)?;
    let pipeline = Pipeline::new(cfg)?;
    tracing::info!(
        apportionment = ?pipeline.config().apportionment,
        max_match_km = pipeline.config().max_match_km,
        batch_size = pipeline.config().batch_size,
        "running redistribution"
    );
    let out = pipeline.run(&inputs)?;

    tables::save_visits(&out.visits, &args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;
    tables::save_audit(&out.audit, &args.audit)
        .with_context(|| format!("writing {}", args.audit.display()))?;
    if let Some(path) = &args.summary {
        write_summary(&out.report, path).with_context(|| format!("writing {}", path.display()))?;
    }

    tracing::info!(
        output = %args.output.display(),
        audit = %args.audit.display(),
        mode = ?out.report.mode,
        max_abs_drift = out.report.max_abs_drift,
        "redistributed visits written"
    );
    Ok(out.report)
}

// ── main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    run(&args)?;
    Ok(())
}

// ── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use need_core::WeightMode;

    fn args_in(dir: &Path, extra: &[&str]) -> Args {
        let p = |name: &str| dir.join(name).display().to_string();
        let mut argv = vec![
            "redistribute".to_string(),
            "--facilities".into(),
            p("facilities.csv"),
            "--visits".into(),
            p("visits.csv"),
            "--covariates".into(),
            p("covariates.csv"),
            "--coordinates".into(),
            p("coordinates.csv"),
            "--cluster-points".into(),
            p("clusters.geojson"),
            "--output".into(),
            p("out/visits.csv"),
            "--audit".into(),
            p("out/audit.csv"),
            "--summary".into(),
            p("out/summary.json"),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));
        Args::parse_from(argv)
    }

    fn write_fixture(dir: &Path, with_coordinates: bool) {
        let facilities = "facility_id,name,latitude,longitude\n\
                          A,Alpha,0.0,0.0\n\
                          B,Beta,10.0,10.0\n";
        fs::write(dir.join("facilities.csv"), facilities).unwrap();
        let visits = "facility_id,time_bucket,total_count,note\n\
                      A,2024-01,100,x\nB,2024-01,0,y\n\
                      A,2024-02,30,x\nB,2024-02,50,y\n";
        fs::write(dir.join("visits.csv"), visits).unwrap();
        fs::write(dir.join("covariates.csv"), "cluster_id,pop\nCA,10\nCB,30\nCX,0\n").unwrap();
        if with_coordinates {
            let coords = "cluster_id,LATNUM,LONGNUM\nCA,0.1,0.1\nCB,10.1,10.1\nCX,50,50\n";
            fs::write(dir.join("coordinates.csv"), coords).unwrap();
        }
    }

    fn write_config(dir: &Path) -> String {
        let path = dir.join("config.json");
        fs::write(&path, r#"{ "covariates": [{ "name": "pop", "weight": 1.0 }] }"#).unwrap();
        path.display().to_string()
    }

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let args = Args::parse_from([
            "redistribute",
            "--max-match-km",
            "50",
            "--batch-size",
            "16",
            "--apportionment",
            "nearest",
            "--audit-rows",
            "5",
        ]);
        let cfg = resolve_config(&args).unwrap();
        assert_eq!(cfg.max_match_km, 50.0);
        assert_eq!(cfg.batch_size, 16);
        assert_eq!(cfg.apportionment, Apportionment::Nearest);
        assert_eq!(cfg.audit_rows, 5);
    }

    #[test]
    fn invalid_override_is_rejected() {
        let args = Args::parse_from(["redistribute", "--batch-size", "0"]);
        assert!(resolve_config(&args).is_err());
    }

    #[test]
    fn spatial_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path(), true);
        let cfg = write_config(dir.path());
        let report = run(&args_in(dir.path(), &["--config", &cfg])).unwrap();
        assert_eq!(report.mode, WeightMode::Spatial);

        let out = fs::read_to_string(dir.path().join("out/visits.csv")).unwrap();
        assert_eq!(
            out,
            "facility_id,time_bucket,total_count,note\n\
             A,2024-01,25,x\nB,2024-01,75,y\n\
             A,2024-02,20,x\nB,2024-02,60,y\n"
        );
        let audit = fs::read_to_string(dir.path().join("out/audit.csv")).unwrap();
        assert!(audit.starts_with(
            "facility_id,time_bucket,total_count_before,total_count_after\nA,2024-01,100,25\n"
        ));
        let raw = fs::read_to_string(dir.path().join("out/summary.json")).unwrap();
        let summary: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(summary["mode"], "spatial");
        assert_eq!(summary["max_abs_drift"], 0);
    }

    #[test]
    fn uniform_when_no_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path(), false);
        let cfg = write_config(dir.path());
        let report = run(&args_in(dir.path(), &["--config", &cfg])).unwrap();
        assert_eq!(report.mode, WeightMode::Uniform);
        let out = fs::read_to_string(dir.path().join("out/visits.csv")).unwrap();
        assert_eq!(
            out,
            "facility_id,time_bucket,total_count,note\n\
             A,2024-01,50,x\nB,2024-01,50,y\n\
             A,2024-02,40,x\nB,2024-02,40,y\n"
        );
    }

    #[test]
    fn missing_visits_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path(), false);
        fs::remove_file(dir.path().join("visits.csv")).unwrap();
        let err = run(&args_in(dir.path(), &[])).unwrap_err();
        assert!(format!("{err:#}").contains("visits"));
    }
}
