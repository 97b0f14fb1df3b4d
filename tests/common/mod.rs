//! Shared helpers for integration tests
//!
//! The oracle computes the same products directly, with the crate's own
//! fixed-width arithmetic so overflow behaviour matches bit for bit.

#![allow(dead_code)]

use tpu_sim::arith;
use tpu_sim::{ExternalBus, Quantized, TileStore, VecHostMemory, WeightTile};

pub fn bus<'a>(
    host: &'a mut VecHostMemory<i8>,
    weights: &'a TileStore<i8>,
) -> ExternalBus<'a, Quantized> {
    ExternalBus::new(host, weights)
}

/// Deterministic data source (xorshift64)
pub struct DataGen(u64);

impl DataGen {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// Uniform in `-range..range`
    pub fn value(&mut self, range: i8) -> i8 {
        let span = 2 * range as i64;
        ((self.next() % span as u64) as i64 - range as i64) as i8
    }

    pub fn vectors(&mut self, count: usize, width: usize, range: i8) -> Vec<Vec<i8>> {
        (0..count)
            .map(|_| (0..width).map(|_| self.value(range)).collect())
            .collect()
    }

    pub fn tile(&mut self, size: usize, range: i8) -> WeightTile<i8> {
        WeightTile::from_rows(self.vectors(size, size, range)).unwrap()
    }
}

/// `x · W` per vector, summed top row first like the array
pub fn matmul(x: &[Vec<i8>], w: &WeightTile<i8>) -> Vec<Vec<i32>> {
    x.iter()
        .map(|row| {
            (0..w.size())
                .map(|j| {
                    (0..w.size()).fold(0i32, |acc, i| arith::mac_i8(acc, row[i], w.get(i, j)))
                })
                .collect()
        })
        .collect()
}

pub fn accumulate(a: &[Vec<i32>], b: &[Vec<i32>]) -> Vec<Vec<i32>> {
    a.iter()
        .zip(b)
        .map(|(ra, rb)| ra.iter().zip(rb).map(|(&x, &y)| arith::sat_add_i32(x, y)).collect())
        .collect()
}

pub fn relu(acc: &[Vec<i32>]) -> Vec<Vec<i8>> {
    acc.iter()
        .map(|r| r.iter().map(|&v| arith::sat_narrow_i32_to_i8(v.max(0))).collect())
        .collect()
}

pub fn identity(acc: &[Vec<i32>]) -> Vec<Vec<i8>> {
    acc.iter()
        .map(|r| r.iter().map(|&v| arith::sat_narrow_i32_to_i8(v)).collect())
        .collect()
}

/// Host image with `inputs` at address 0 followed by `spare` zero vectors
pub fn host_with(inputs: &[Vec<i8>], spare: usize) -> VecHostMemory<i8> {
    let width = inputs.first().map_or(0, Vec::len);
    let mut vectors = inputs.to_vec();
    vectors.resize(inputs.len() + spare, vec![0; width]);
    VecHostMemory::from_vectors(width, vectors).unwrap()
}
