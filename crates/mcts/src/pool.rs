//! Depth-indexed storage of latent states and recurrent memory.
//!
//! Each depth holds one immutable snapshot of `searches * num` rows in
//! lane-major order (`row = lane * num + batch`). Depth 0 is the root
//! latents replicated across lanes; depth `d > 0` is what the oracle
//! produced in round `d`. Snapshots are never modified after `append`.

use crate::node::LatentIndex;
use ez_core::{EzError, LatentBatch, RecurrentMemory, Result};
use ndarray::Array2;

#[derive(Debug)]
pub struct HiddenStatePool {
    searches: usize,
    num: usize,
    snapshots: Vec<LatentBatch>,
}

impl HiddenStatePool {
    /// Seed depth 0 by replicating the `num` root latents across lanes.
    ///
    /// # Errors
    /// Returns `EzError::ShapeMismatch` if `searches` is zero.
    pub fn new(roots: &LatentBatch, searches: usize) -> Result<Self> {
        if searches == 0 {
            return Err(EzError::ShapeMismatch {
                what: "pool lanes",
                expected: 1,
                actual: 0,
            });
        }
        let num = roots.rows();
        let views: Vec<_> = (0..searches).map(|_| roots.hidden_states.view()).collect();
        let hidden_states = ndarray::concatenate(ndarray::Axis(0), &views).map_err(|_| {
            EzError::ShapeMismatch {
                what: "root hidden states",
                expected: num,
                actual: roots.hidden_states.nrows(),
            }
        })?;
        let seeded = LatentBatch::new(hidden_states, roots.memory.tile(searches))?;

        Ok(Self {
            searches,
            num,
            snapshots: vec![seeded],
        })
    }

    /// Number of published depths, which is also the next depth to append.
    pub fn depth(&self) -> usize {
        self.snapshots.len()
    }

    pub fn rows_per_depth(&self) -> usize {
        self.searches * self.num
    }

    pub fn hidden_width(&self) -> usize {
        self.snapshots[0].hidden_width()
    }

    pub fn memory_width(&self) -> usize {
        self.snapshots[0].memory_width()
    }

    pub fn row(&self, lane: usize, batch: usize) -> usize {
        lane * self.num + batch
    }

    pub fn snapshot(&self, depth: usize) -> Option<&LatentBatch> {
        self.snapshots.get(depth)
    }

    /// Copy the entries at `coords`, in the given order, into one batch.
    ///
    /// # Errors
    /// Returns `EzError::PoolIndexOutOfRange` for an unknown coordinate.
    pub fn gather(&self, coords: &[LatentIndex]) -> Result<LatentBatch> {
        let mut hidden = Array2::zeros((coords.len(), self.hidden_width()));
        let mut memory = RecurrentMemory::zeros(coords.len(), self.memory_width());

        for (i, coord) in coords.iter().enumerate() {
            let snapshot = self
                .snapshots
                .get(coord.depth)
                .filter(|s| coord.row < s.rows())
                .ok_or(EzError::PoolIndexOutOfRange {
                    depth: coord.depth,
                    row: coord.row,
                })?;
            hidden
                .row_mut(i)
                .assign(&snapshot.hidden_states.row(coord.row));
            memory
                .cell
                .row_mut(i)
                .assign(&snapshot.memory.cell.row(coord.row));
            memory
                .hidden
                .row_mut(i)
                .assign(&snapshot.memory.hidden.row(coord.row));
        }

        LatentBatch::new(hidden, memory)
    }

    /// Publish the snapshot for `depth`, which must be the next depth.
    ///
    /// # Errors
    /// `EzError::PoolDepthMismatch` when appended out of order,
    /// `EzError::ShapeMismatch` when the snapshot has the wrong shape.
    pub fn append(&mut self, depth: usize, latents: LatentBatch) -> Result<()> {
        if depth != self.depth() {
            return Err(EzError::PoolDepthMismatch {
                expected: self.depth(),
                actual: depth,
            });
        }
        if latents.rows() != self.rows_per_depth() {
            return Err(EzError::ShapeMismatch {
                what: "pool snapshot rows",
                expected: self.rows_per_depth(),
                actual: latents.rows(),
            });
        }
        if latents.hidden_width() != self.hidden_width() {
            return Err(EzError::ShapeMismatch {
                what: "pool hidden width",
                expected: self.hidden_width(),
                actual: latents.hidden_width(),
            });
        }
        if latents.memory_width() != self.memory_width() {
            return Err(EzError::ShapeMismatch {
                what: "pool memory width",
                expected: self.memory_width(),
                actual: latents.memory_width(),
            });
        }

        self.snapshots.push(latents);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn roots() -> LatentBatch {
        let memory =
            RecurrentMemory::new(array![[0.1], [0.2]], array![[0.3], [0.4]]).unwrap();
        LatentBatch::new(array![[1.0, 1.5], [2.0, 2.5]], memory).unwrap()
    }

    fn snapshot(rows: usize, fill: f32) -> LatentBatch {
        LatentBatch::new(
            Array2::from_elem((rows, 2), fill),
            RecurrentMemory::zeros(rows, 1),
        )
        .unwrap()
    }

    #[test]
    fn test_depth_zero_is_replicated_per_lane() {
        let pool = HiddenStatePool::new(&roots(), 3).unwrap();
        assert_eq!(pool.depth(), 1);
        assert_eq!(pool.rows_per_depth(), 6);

        for lane in 0..3 {
            let row = pool.row(lane, 1);
            let got = pool.gather(&[LatentIndex { depth: 0, row }]).unwrap();
            assert_eq!(got.hidden_states.row(0).to_vec(), vec![2.0, 2.5]);
            assert_eq!(got.memory.cell[[0, 0]], 0.2);
            assert_eq!(got.memory.hidden[[0, 0]], 0.4);
        }
    }

    #[test]
    fn test_append_then_gather_round_trip() {
        let mut pool = HiddenStatePool::new(&roots(), 2).unwrap();
        let mut published = snapshot(4, 0.0);
        published.hidden_states.row_mut(3).assign(&array![7.0, 8.0]);
        published.memory.cell[[3, 0]] = 9.0;
        pool.append(1, published.clone()).unwrap();

        let got = pool
            .gather(&[
                LatentIndex { depth: 1, row: 3 },
                LatentIndex { depth: 0, row: 0 },
            ])
            .unwrap();
        assert_eq!(got.hidden_states.row(0).to_vec(), vec![7.0, 8.0]);
        assert_eq!(got.memory.cell[[0, 0]], 9.0);
        assert_eq!(got.hidden_states.row(1).to_vec(), vec![1.0, 1.5]);
        assert_eq!(pool.snapshot(1), Some(&published));
    }

    #[test]
    fn test_append_out_of_order() {
        let mut pool = HiddenStatePool::new(&roots(), 2).unwrap();
        let err = pool.append(2, snapshot(4, 0.0)).unwrap_err();
        assert!(matches!(
            err,
            EzError::PoolDepthMismatch {
                expected: 1,
                actual: 2
            }
        ));
        let err = pool.append(0, snapshot(4, 0.0)).unwrap_err();
        assert!(matches!(err, EzError::PoolDepthMismatch { .. }));
    }

    #[test]
    fn test_append_wrong_rows() {
        let mut pool = HiddenStatePool::new(&roots(), 2).unwrap();
        let err = pool.append(1, snapshot(3, 0.0)).unwrap_err();
        assert!(matches!(err, EzError::ShapeMismatch { .. }));
        assert_eq!(pool.depth(), 1);
    }

    #[test]
    fn test_gather_unknown_coordinate() {
        let pool = HiddenStatePool::new(&roots(), 2).unwrap();
        let err = pool.gather(&[LatentIndex { depth: 1, row: 0 }]).unwrap_err();
        assert!(matches!(err, EzError::PoolIndexOutOfRange { depth: 1, row: 0 }));
        let err = pool.gather(&[LatentIndex { depth: 0, row: 4 }]).unwrap_err();
        assert!(matches!(err, EzError::PoolIndexOutOfRange { .. }));
    }
}
