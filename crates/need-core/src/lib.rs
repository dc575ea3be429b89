//! Spatial need index and conservative visit redistribution.
//!
//! Facilities are matched to their nearest survey cluster, clusters are
//! scored from their covariates, and each time bucket's visit total is
//! reallocated across facilities in proportion to that score.

pub mod config;
pub mod coords;
pub mod distance;
pub mod error;
pub mod matcher;
pub mod need_index;
pub mod pipeline;
pub mod redistribute;
pub mod source;
pub mod sphere;
pub mod tables;

pub use config::{Apportionment, CovariateSpec, Polarity, RedistributionConfig};
pub use error::{NeedError, Result};
pub use pipeline::{FacilityWeights, Pipeline, RunInputs, RunOutput, RunReport, WeightMode};
