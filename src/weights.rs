//! Weight tiles, the external weight store and the on-chip weight FIFO

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{Fault, HazardError, Memory};

/// Square weight matrix, row-major; `get(i, j)` lives in MAC(i, j)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightTile<W> {
    size: usize,
    data: Vec<W>,
}

impl<W: Copy + Default> WeightTile<W> {
    pub fn zeros(size: usize) -> Self {
        Self {
            size,
            data: vec![W::default(); size * size],
        }
    }

    /// Build from `size` rows of `size` weights
    pub fn from_rows(rows: Vec<Vec<W>>) -> Result<Self, Fault> {
        let size = rows.len();
        let mut data = Vec::with_capacity(size * size);
        for row in rows {
            if row.len() != size {
                return Err(Fault::width(Memory::WeightStore, size, row.len()));
            }
            data.extend(row);
        }
        Ok(Self { size, data })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn get(&self, row: usize, col: usize) -> W {
        self.data[row * self.size + col]
    }

    pub fn row(&self, row: usize) -> &[W] {
        &self.data[row * self.size..(row + 1) * self.size]
    }

    pub fn rows(&self) -> Vec<Vec<W>> {
        self.data.chunks(self.size.max(1)).map(<[W]>::to_vec).collect()
    }
}

/// External source of weight tiles
pub trait WeightStore<W> {
    /// Read the tile at `addr`; tiles must match the array dimension
    fn read_tile(&self, addr: u64, size: usize) -> Result<WeightTile<W>, Fault>;
}

/// In-memory weight store addressed by tile index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TileStore<W> {
    tiles: Vec<WeightTile<W>>,
}

impl<W: Copy + Default> TileStore<W> {
    pub fn new() -> Self {
        Self { tiles: Vec::new() }
    }

    /// Append a tile and return its address
    pub fn push(&mut self, tile: WeightTile<W>) -> u64 {
        self.tiles.push(tile);
        (self.tiles.len() - 1) as u64
    }

    /// Build from nested rows, one `Vec<Vec<W>>` per tile
    pub fn from_rows(tiles: Vec<Vec<Vec<W>>>) -> Result<Self, Fault> {
        let tiles = tiles
            .into_iter()
            .map(WeightTile::from_rows)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { tiles })
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

impl<W: Copy + Default> WeightStore<W> for TileStore<W> {
    fn read_tile(&self, addr: u64, size: usize) -> Result<WeightTile<W>, Fault> {
        let tile = usize::try_from(addr)
            .ok()
            .and_then(|i| self.tiles.get(i))
            .ok_or_else(|| Fault::out_of_range(Memory::WeightStore, addr, 1, self.tiles.len()))?;
        if tile.size() != size {
            return Err(Fault::width(Memory::WeightStore, size, tile.size()));
        }
        Ok(tile.clone())
    }
}

/// A tile travelling from the weight store into the FIFO
#[derive(Debug, Clone, PartialEq)]
pub struct FifoEntry<W> {
    pub tile: WeightTile<W>,
    /// First cycle at which the tile may be switched into the array
    pub ready_at: u64,
}

/// Bounded queue of tiles between the weight store and the array
///
/// A slot is reserved when the read is issued, not when the data lands.
#[derive(Debug, Clone)]
pub struct WeightFifo<W> {
    depth: usize,
    entries: VecDeque<FifoEntry<W>>,
}

impl<W> WeightFifo<W> {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            entries: VecDeque::with_capacity(depth),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.depth
    }

    pub fn push(&mut self, tile: WeightTile<W>, ready_at: u64) -> Result<(), HazardError> {
        if self.is_full() {
            return Err(HazardError::FifoFull {
                capacity: self.depth,
            });
        }
        self.entries.push_back(FifoEntry { tile, ready_at });
        Ok(())
    }

    /// Remove the head tile for a switch issued at cycle `now`
    pub fn pop(&mut self, now: u64) -> Result<WeightTile<W>, HazardError> {
        match self.entries.front() {
            None => Err(HazardError::FifoEmpty),
            Some(head) if head.ready_at > now => Err(HazardError::TileNotReady {
                ready_at: head.ready_at,
            }),
            Some(_) => self
                .entries
                .pop_front()
                .map(|e| e.tile)
                .ok_or(HazardError::FifoEmpty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_layout() {
        let tile = WeightTile::from_rows(vec![vec![1i8, 2], vec![3, 4]]).unwrap();
        assert_eq!(tile.get(0, 1), 2);
        assert_eq!(tile.get(1, 0), 3);
        assert_eq!(tile.row(1), &[3, 4]);
        assert_eq!(tile.rows(), vec![vec![1, 2], vec![3, 4]]);
        assert!(WeightTile::from_rows(vec![vec![1i8, 2], vec![3]]).is_err());
    }

    #[test]
    fn test_store_bounds_and_size() {
        let mut store = TileStore::new();
        let addr = store.push(WeightTile::<i8>::zeros(4));
        assert_eq!(addr, 0);
        assert!(store.read_tile(0, 4).is_ok());
        assert_eq!(
            store.read_tile(1, 4),
            Err(Fault::out_of_range(Memory::WeightStore, 1, 1, 1))
        );
        assert_eq!(store.read_tile(0, 8), Err(Fault::width(Memory::WeightStore, 8, 4)));
        assert!(store.read_tile(u64::MAX, 4).is_err());
    }

    #[test]
    fn test_fifo_capacity() {
        let mut fifo = WeightFifo::new(2);
        fifo.push(WeightTile::<i8>::zeros(2), 0).unwrap();
        fifo.push(WeightTile::zeros(2), 0).unwrap();
        assert!(fifo.is_full());
        assert_eq!(
            fifo.push(WeightTile::zeros(2), 0),
            Err(HazardError::FifoFull { capacity: 2 })
        );
    }

    #[test]
    fn test_fifo_pop_respects_landing_cycle() {
        let mut fifo = WeightFifo::new(4);
        assert_eq!(fifo.pop(0), Err(HazardError::FifoEmpty));

        let tile = WeightTile::from_rows(vec![vec![9i8]]).unwrap();
        fifo.push(tile.clone(), 13).unwrap();
        assert_eq!(fifo.pop(12), Err(HazardError::TileNotReady { ready_at: 13 }));
        assert_eq!(fifo.len(), 1);
        assert_eq!(fifo.pop(13), Ok(tile));
        assert!(fifo.is_empty());
    }
}
