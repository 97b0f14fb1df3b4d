//! Host memory interface
//!
//! Host memory lives outside the core. The scheduler moves one vector per
//! cycle through this trait during RHM and WHM.

use serde::{Deserialize, Serialize};

use crate::error::{Fault, Memory};

/// Flat store of width-`S` vectors owned by the host
pub trait HostMemory<T> {
    /// Number of vectors
    fn capacity(&self) -> usize;

    /// Lanes per vector
    fn width(&self) -> usize;

    fn read(&self, addr: u64, count: usize) -> Result<Vec<Vec<T>>, Fault>;

    fn write(&mut self, addr: u64, vectors: &[Vec<T>]) -> Result<(), Fault>;
}

/// Host memory backed by a `Vec`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VecHostMemory<T> {
    width: usize,
    vectors: Vec<Vec<T>>,
}

impl<T: Copy + Default> VecHostMemory<T> {
    /// Zero-filled memory of `capacity` vectors
    pub fn new(capacity: usize, width: usize) -> Self {
        Self {
            width,
            vectors: vec![vec![T::default(); width]; capacity],
        }
    }

    /// Wrap existing vectors, which must all be `width` lanes wide
    pub fn from_vectors(width: usize, vectors: Vec<Vec<T>>) -> Result<Self, Fault> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != width) {
            return Err(Fault::width(Memory::HostMemory, width, bad.len()));
        }
        Ok(Self { width, vectors })
    }

    /// Grow to at least `capacity` vectors
    pub fn ensure_capacity(&mut self, capacity: usize) {
        if self.vectors.len() < capacity {
            self.vectors.resize(capacity, vec![T::default(); self.width]);
        }
    }

    pub fn vectors(&self) -> &[Vec<T>] {
        &self.vectors
    }

    fn range(&self, addr: u64, count: usize) -> Result<std::ops::Range<usize>, Fault> {
        let start = usize::try_from(addr).ok();
        match start.and_then(|s| s.checked_add(count).map(|e| (s, e))) {
            Some((s, e)) if e <= self.vectors.len() => Ok(s..e),
            _ => Err(Fault::out_of_range(
                Memory::HostMemory,
                addr,
                count,
                self.vectors.len(),
            )),
        }
    }
}

impl<T: Copy + Default> HostMemory<T> for VecHostMemory<T> {
    fn capacity(&self) -> usize {
        self.vectors.len()
    }

    fn width(&self) -> usize {
        self.width
    }

    fn read(&self, addr: u64, count: usize) -> Result<Vec<Vec<T>>, Fault> {
        let range = self.range(addr, count)?;
        Ok(self.vectors[range].to_vec())
    }

    fn write(&mut self, addr: u64, vectors: &[Vec<T>]) -> Result<(), Fault> {
        let range = self.range(addr, vectors.len())?;
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.width) {
            return Err(Fault::width(Memory::HostMemory, self.width, bad.len()));
        }
        for (slot, v) in self.vectors[range].iter_mut().zip(vectors) {
            slot.copy_from_slice(v);
        }
        Ok(())
    }
}
