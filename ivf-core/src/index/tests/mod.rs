mod persistence;

use rand::prelude::*;

use crate::index::{Index, IndexParams, PrecomputedLabels};
use crate::resources::Resources;

/// Random `[n, dim]` batch with labels in `[0, n_lists)`
fn random_batch(seed: u64, n: usize, dim: usize, n_lists: u32) -> (Vec<f32>, Vec<u32>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let vectors = (0..n * dim).map(|_| rng.random_range(-1.0..1.0)).collect();
    let labels = (0..n).map(|_| rng.random_range(0..n_lists)).collect();
    (vectors, labels)
}

/// Index with `n` random vectors added in one batch
fn build_index(
    res: &Resources,
    params: IndexParams,
    dim: u32,
    n: usize,
) -> (Index<f32, i64>, Vec<f32>, Vec<u32>) {
    let index = Index::new(params.clone(), dim).unwrap();
    let (vectors, labels) = random_batch(42, n, dim as usize, params.n_lists);
    index
        .extend(res, &vectors, None, &PrecomputedLabels(&labels))
        .unwrap();
    (index, vectors, labels)
}

/// All `(id, vector)` pairs of `index`, sorted by id
fn dump(res: &Resources, index: &Index<f32, i64>) -> Vec<(i64, Vec<f32>)> {
    let dim = index.dim() as usize;
    let mut out = Vec::new();
    for label in 0..index.n_lists() {
        let list = index.list(label).unwrap();
        let view = list.view();
        let mut codes = vec![0f32; view.size() as usize * dim];
        view.unpack(res, 0, &mut codes).unwrap();
        for (id, code) in view.indices().iter().zip(codes.chunks(dim)) {
            out.push((*id, code.to_vec()));
        }
    }
    out.sort_by_key(|(id, _)| *id);
    out
}
