//! Cluster assignment seam
//!
//! Choosing a cluster for each vector is not done here; `Index::extend`
//! consumes labels from whatever `ClusterAssigner` the caller provides.

use rayon::prelude::*;

use crate::error::{Error, Result};

/// Maps a `[n, dim]` row-major batch to one cluster label per row.
pub trait ClusterAssigner<T>: Sync {
    fn assign(&self, vectors: &[T], dim: u32) -> Result<Vec<u32>>;
}

/// Labels computed ahead of time, one per row.
#[derive(Debug, Clone, Copy)]
pub struct PrecomputedLabels<'a>(pub &'a [u32]);

impl<T> ClusterAssigner<T> for PrecomputedLabels<'_> {
    fn assign(&self, vectors: &[T], dim: u32) -> Result<Vec<u32>> {
        let rows = vectors.len() / dim.max(1) as usize;
        if self.0.len() != rows {
            return Err(Error::InvalidParameter(format!(
                "{} labels for {rows} vectors",
                self.0.len()
            )));
        }
        Ok(self.0.to_vec())
    }
}

/// Assignment by a per-vector function, evaluated in parallel.
#[derive(Debug, Clone, Copy)]
pub struct PerVector<F>(pub F);

impl<T, F> ClusterAssigner<T> for PerVector<F>
where
    T: Sync,
    F: Fn(&[T]) -> u32 + Sync,
{
    fn assign(&self, vectors: &[T], dim: u32) -> Result<Vec<u32>> {
        if dim == 0 {
            return Err(Error::InvalidParameter("dim must be positive".to_string()));
        }
        Ok(vectors.par_chunks(dim as usize).map(|v| (self.0)(v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precomputed_labels() {
        let labels = [0u32, 2, 1];
        let assigner = PrecomputedLabels(&labels);
        assert_eq!(assigner.assign(&[0f32; 12], 4).unwrap(), vec![0, 2, 1]);
        assert!(matches!(
            ClusterAssigner::<f32>::assign(&assigner, &[0f32; 8], 4),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_per_vector() {
        let assigner = PerVector(|v: &[f32]| if v[0] < 0.0 { 0 } else { 1 });
        let vectors = [-1.0, 0.0, 1.0, 0.0, -3.0, 2.0];
        assert_eq!(assigner.assign(&vectors, 2).unwrap(), vec![0, 1, 0]);
    }
}
