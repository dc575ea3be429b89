//! Chunked great-circle distance engine.
//!
//! Origins are processed `batch_size` rows at a time, so peak memory is
//! `batch_size × targets` distances instead of the full matrix. With the
//! `threading` feature chunks are computed on the rayon pool.

#[cfg(feature = "threading")]
use rayon::prelude::*;

use crate::coords::LatLon;
use crate::sphere::haversine_rad;

pub const DEFAULT_BATCH_SIZE: usize = 2000;

/// Target points converted to radians once, shared by every chunk.
struct Prepared {
    lat: Vec<f64>,
    lon: Vec<f64>,
    cos_lat: Vec<f64>,
    valid: Vec<bool>,
}

impl Prepared {
    fn new(points: &[LatLon]) -> Self {
        let mut p = Prepared {
            lat: Vec::with_capacity(points.len()),
            lon: Vec::with_capacity(points.len()),
            cos_lat: Vec::with_capacity(points.len()),
            valid: Vec::with_capacity(points.len()),
        };
        for &pt in points {
            let (lat, lon) = pt.to_radians();
            p.lat.push(lat);
            p.lon.push(lon);
            p.cos_lat.push(lat.cos());
            p.valid.push(pt.is_valid());
        }
        p
    }

    fn len(&self) -> usize {
        self.lat.len()
    }
}

/// Row-major distances (km) from a contiguous run of origins to every target.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceBlock {
    /// Index of the block's first row within the full origin set.
    pub row_offset: usize,
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl DistanceBlock {
    fn compute(origins: &[LatLon], row_offset: usize, targets: &Prepared) -> Self {
        let cols = targets.len();
        let mut data = Vec::with_capacity(origins.len() * cols);
        for &o in origins {
            if !o.is_valid() {
                data.extend(std::iter::repeat(f64::NAN).take(cols));
                continue;
            }
            let (lat1, lon1) = o.to_radians();
            let cos1 = lat1.cos();
            for j in 0..cols {
                let d = if targets.valid[j] {
                    let (lat2, lon2) = (targets.lat[j], targets.lon[j]);
                    haversine_rad(lat1, lon1, cos1, lat2, lon2, targets.cos_lat[j])
                } else {
                    f64::NAN
                };
                data.push(d);
            }
        }
        Self { row_offset, rows: origins.len(), cols, data }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DistanceEngine {
    batch_size: usize,
}

impl Default for DistanceEngine {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl DistanceEngine {
    /// A batch size of 0 is treated as 1.
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size: batch_size.max(1) }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Lazily yield one block per origin chunk, in order.
    pub fn blocks<'a>(
        &self,
        origins: &'a [LatLon],
        targets: &[LatLon],
    ) -> impl Iterator<Item = DistanceBlock> + 'a {
        let prepared = Prepared::new(targets);
        let batch = self.batch_size;
        origins
            .chunks(batch)
            .enumerate()
            .map(move |(i, chunk)| DistanceBlock::compute(chunk, i * batch, &prepared))
    }

    /// Full `origins × targets` matrix. Only sensible for small inputs.
    pub fn matrix(&self, origins: &[LatLon], targets: &[LatLon]) -> DistanceBlock {
        DistanceBlock::compute(origins, 0, &Prepared::new(targets))
    }

    /// Reduce every origin's distance row with `f`, one chunk at a time.
    /// Results come back in origin order regardless of scheduling.
    pub fn map_rows<T, F>(&self, origins: &[LatLon], targets: &[LatLon], f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(&[f64]) -> T + Sync,
    {
        let prepared = Prepared::new(targets);
        let reduce_chunk = |(i, chunk): (usize, &[LatLon])| {
            let block = DistanceBlock::compute(chunk, i * self.batch_size, &prepared);
            tracing::debug!(
                offset = block.row_offset,
                rows = block.rows,
                cols = block.cols,
                "distance chunk"
            );
            (0..block.rows).map(|r| f(block.row(r))).collect::<Vec<T>>()
        };

        #[cfg(feature = "threading")]
        let per_chunk: Vec<Vec<T>> =
            origins.par_chunks(self.batch_size).enumerate().map(reduce_chunk).collect();
        #[cfg(not(feature = "threading"))]
        let per_chunk: Vec<Vec<T>> =
            origins.chunks(self.batch_size).enumerate().map(reduce_chunk).collect();

        per_chunk.into_iter().flatten().collect()
    }
}
