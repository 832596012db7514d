//! Pairwise-distance cache over the unlabeled pool.
//!
//! The matrix is computed once and then re-indexed as examples leave the
//! pool: rows are never recomputed, only hidden behind an alive map, and
//! each survivor's accumulated distance is corrected by subtracting its
//! distance to every removed example.
//!
//! Large pools can keep the matrix in an anonymous temporary file instead of
//! memory; rows are stored as little-endian `f64` and read back with a seek.

use crate::dataset::{validate_indices, Dataset, DatasetError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use thiserror::Error;

/// Errors raised by the similarity cache
#[derive(Error, Debug)]
pub enum SimilarityError {
    #[error("Position {index} out of bounds for cache of size {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Invalid removal: {0}")]
    InvalidRemoval(#[from] DatasetError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Distance between two feature vectors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceFunction {
    /// L2 distance
    #[default]
    Euclidean,
    /// L1 distance
    Manhattan,
    /// `1 - cosine similarity`; zero vectors are at distance 1
    Cosine,
}

impl DistanceFunction {
    /// Distance between `a` and `b`
    #[must_use]
    pub fn distance(self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            Self::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y).powi(2))
                .sum::<f64>()
                .sqrt(),
            Self::Manhattan => a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum(),
            Self::Cosine => {
                let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
                let nb = b.iter().map(|y| y * y).sum::<f64>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (na * nb)
                }
            }
        }
    }
}

#[derive(Debug)]
enum Backing {
    Memory(Vec<f64>),
    File(File),
}

/// Distance matrix over the rows of one dataset, re-indexed on removal
#[derive(Debug)]
pub struct SimilarityCache {
    backing: Backing,
    /// Number of rows when the matrix was built
    rows: usize,
    /// Current position to original row
    alive: Vec<usize>,
    /// Current position to summed distance to every other alive row
    accumulated: Vec<f64>,
}

impl SimilarityCache {
    /// Build the cache in memory
    #[must_use]
    pub fn in_memory(data: &Dataset, function: DistanceFunction) -> Self {
        let n = data.len();
        let mut matrix = vec![0.0; n * n];
        let mut accumulated = vec![0.0; n];

        for i in 0..n {
            for j in (i + 1)..n {
                let d = pair_distance(data, function, i, j);
                matrix[i * n + j] = d;
                matrix[j * n + i] = d;
                accumulated[i] += d;
                accumulated[j] += d;
            }
        }

        Self {
            backing: Backing::Memory(matrix),
            rows: n,
            alive: (0..n).collect(),
            accumulated,
        }
    }

    /// Build the cache in an anonymous temporary file
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be created or written.
    pub fn on_disk(data: &Dataset, function: DistanceFunction) -> Result<Self, SimilarityError> {
        let n = data.len();
        let mut writer = BufWriter::new(tempfile::tempfile()?);
        let mut accumulated = vec![0.0; n];

        for i in 0..n {
            for j in 0..n {
                let d = if i == j {
                    0.0
                } else {
                    pair_distance(data, function, i, j)
                };
                accumulated[i] += d;
                writer.write_all(&d.to_le_bytes())?;
            }
        }

        let file = writer.into_inner().map_err(|e| e.into_error())?;

        Ok(Self {
            backing: Backing::File(file),
            rows: n,
            alive: (0..n).collect(),
            accumulated,
        })
    }

    /// Build in memory or on disk
    ///
    /// # Errors
    ///
    /// Returns an error if the on-disk build fails.
    pub fn build(
        data: &Dataset,
        function: DistanceFunction,
        on_disk: bool,
    ) -> Result<Self, SimilarityError> {
        if on_disk {
            Self::on_disk(data, function)
        } else {
            Ok(Self::in_memory(data, function))
        }
    }

    /// Number of live positions
    #[must_use]
    pub fn len(&self) -> usize {
        self.alive.len()
    }

    /// Whether every row has been removed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alive.is_empty()
    }

    /// Whether the matrix lives in a temporary file
    #[must_use]
    pub const fn is_on_disk(&self) -> bool {
        matches!(self.backing, Backing::File(_))
    }

    /// Sum of distances from position `i` to every other live position
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` past the live size.
    pub fn accumulated(&self, i: usize) -> Result<f64, SimilarityError> {
        self.accumulated
            .get(i)
            .copied()
            .ok_or(SimilarityError::IndexOutOfBounds {
                index: i,
                len: self.alive.len(),
            })
    }

    /// Distance between live positions `i` and `j`
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` past the live size, or an I/O error for
    /// file-backed caches.
    pub fn distance(&self, i: usize, j: usize) -> Result<f64, SimilarityError> {
        let ri = self.original(i)?;
        let rj = self.original(j)?;
        self.read(ri, rj)
    }

    /// Drop the given live positions and renumber the survivors
    ///
    /// # Errors
    ///
    /// Returns an error on out-of-bounds or repeated positions (the cache
    /// is left unchanged), or an I/O error for file-backed caches.
    pub fn remove(&mut self, positions: &[usize]) -> Result<(), SimilarityError> {
        validate_indices(positions, self.alive.len())?;

        let mut removed = vec![false; self.alive.len()];
        for &p in positions {
            removed[p] = true;
        }

        for &p in positions {
            let row = self.row(self.alive[p])?;
            for (q, &orig) in self.alive.iter().enumerate() {
                if !removed[q] {
                    self.accumulated[q] -= row[orig];
                }
            }
        }

        let mut descending = positions.to_vec();
        descending.sort_unstable_by(|a, b| b.cmp(a));
        for p in descending {
            self.alive.remove(p);
            self.accumulated.remove(p);
        }
        Ok(())
    }

    fn original(&self, position: usize) -> Result<usize, SimilarityError> {
        self.alive
            .get(position)
            .copied()
            .ok_or(SimilarityError::IndexOutOfBounds {
                index: position,
                len: self.alive.len(),
            })
    }

    fn read(&self, row: usize, col: usize) -> Result<f64, SimilarityError> {
        match &self.backing {
            Backing::Memory(matrix) => Ok(matrix[row * self.rows + col]),
            Backing::File(file) => {
                let mut handle = file;
                handle.seek(SeekFrom::Start(((row * self.rows + col) * 8) as u64))?;
                let mut buf = [0u8; 8];
                handle.read_exact(&mut buf)?;
                Ok(f64::from_le_bytes(buf))
            }
        }
    }

    fn row(&self, row: usize) -> Result<Vec<f64>, SimilarityError> {
        match &self.backing {
            Backing::Memory(matrix) => {
                Ok(matrix[row * self.rows..(row + 1) * self.rows].to_vec())
            }
            Backing::File(file) => {
                let mut handle = file;
                handle.seek(SeekFrom::Start((row * self.rows * 8) as u64))?;
                let mut bytes = vec![0u8; self.rows * 8];
                handle.read_exact(&mut bytes)?;
                Ok(bytes
                    .chunks_exact(8)
                    .map(|chunk| {
                        let mut buf = [0u8; 8];
                        buf.copy_from_slice(chunk);
                        f64::from_le_bytes(buf)
                    })
                    .collect())
            }
        }
    }
}

fn pair_distance(data: &Dataset, function: DistanceFunction, i: usize, j: usize) -> f64 {
    match (data.get(i), data.get(j)) {
        (Some(a), Some(b)) => function.distance(&a.features, &b.features),
        _ => 0.0,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dataset::{Example, Schema};

    fn points(xs: &[f64]) -> Dataset {
        let schema = Schema::single_label(1, vec!["a".to_string()]);
        let examples = xs.iter().map(|x| Example::single(vec![*x], 0)).collect();
        Dataset::from_examples(schema, examples).unwrap()
    }

    fn brute_force(xs: &[f64]) -> Vec<f64> {
        xs.iter()
            .map(|a| xs.iter().map(|b| (a - b).abs()).sum())
            .collect()
    }

    #[test]
    fn test_distance_functions() {
        let a = [0.0, 3.0];
        let b = [4.0, 0.0];
        assert!((DistanceFunction::Euclidean.distance(&a, &b) - 5.0).abs() < 1e-12);
        assert!((DistanceFunction::Manhattan.distance(&a, &b) - 7.0).abs() < 1e-12);
        assert!((DistanceFunction::Cosine.distance(&a, &b) - 1.0).abs() < 1e-12);
        assert!(DistanceFunction::Cosine.distance(&[1.0, 1.0], &[2.0, 2.0]).abs() < 1e-12);
        assert!((DistanceFunction::Cosine.distance(&[0.0], &[1.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_accumulated_matches_brute_force() {
        let xs = [0.0, 1.0, 3.0, 7.0];
        let cache = SimilarityCache::in_memory(&points(&xs), DistanceFunction::Euclidean);
        for (i, expected) in brute_force(&xs).iter().enumerate() {
            assert!((cache.accumulated(i).unwrap() - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_remove_reindexes() {
        let xs = [0.0, 1.0, 3.0, 7.0, 12.0];
        let mut cache = SimilarityCache::in_memory(&points(&xs), DistanceFunction::Euclidean);
        cache.remove(&[3, 1]).unwrap();

        let survivors = [0.0, 3.0, 12.0];
        assert_eq!(cache.len(), 3);
        for (i, expected) in brute_force(&survivors).iter().enumerate() {
            assert!((cache.accumulated(i).unwrap() - expected).abs() < 1e-9);
        }
        assert!((cache.distance(1, 2).unwrap() - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_remove_rejects_bad_positions() {
        let mut cache = SimilarityCache::in_memory(&points(&[0.0, 1.0]), DistanceFunction::Euclidean);
        assert!(cache.remove(&[2]).is_err());
        assert!(cache.remove(&[0, 0]).is_err());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_out_of_bounds_lookup() {
        let cache = SimilarityCache::in_memory(&points(&[0.0, 1.0]), DistanceFunction::Euclidean);
        assert!(matches!(
            cache.accumulated(2),
            Err(SimilarityError::IndexOutOfBounds { index: 2, len: 2 })
        ));
        assert!(cache.distance(0, 5).is_err());
    }

    #[test]
    fn test_on_disk_matches_memory() {
        let xs = [0.5, 2.0, 2.5, 9.0, 4.0, 6.5];
        let data = points(&xs);
        let mut memory = SimilarityCache::in_memory(&data, DistanceFunction::Manhattan);
        let mut disk = SimilarityCache::on_disk(&data, DistanceFunction::Manhattan).unwrap();
        assert!(disk.is_on_disk());
        assert!(!memory.is_on_disk());

        for i in 0..xs.len() {
            for j in 0..xs.len() {
                assert!((memory.distance(i, j).unwrap() - disk.distance(i, j).unwrap()).abs() < 1e-12);
            }
        }

        memory.remove(&[0, 4]).unwrap();
        disk.remove(&[4, 0]).unwrap();
        for i in 0..memory.len() {
            assert!((memory.accumulated(i).unwrap() - disk.accumulated(i).unwrap()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_remove_everything() {
        let mut cache = SimilarityCache::in_memory(&points(&[1.0, 2.0]), DistanceFunction::Euclidean);
        cache.remove(&[0, 1]).unwrap();
        assert!(cache.is_empty());
    }
}
