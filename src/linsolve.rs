use faer::prelude::SpSolver;
use faer::sparse::linalg::solvers::{Lu, SymbolicLu};
use faer::sparse::SparseColMat;
use faer::Mat;
use log::debug;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinearSolveError {
    /// The matrix is numerically singular or near-singular: an empty or
    /// below-threshold row/column, a failed factorization, or a non-finite
    /// solution. Surfaced, never retried with a different ordering.
    #[error("coefficient matrix is singular")]
    Singular,
    /// The triplets did not describe a well-formed sparse matrix.
    #[error("bad matrix structure: {0}")]
    Structure(String),
}

/// Sparse LU engine with symbolic factorization reuse.
///
/// The fill-reducing ordering and symbolic structure are computed once per
/// sparsity pattern and reused across Newton iterations and across
/// consecutive solves with unchanged topology. The pattern is identified by
/// an explicit generation counter supplied by the caller (see
/// [`crate::GridModel::pattern_generation`]) rather than by re-hashing the
/// structure; numeric factorization is redone on every call since the
/// values change each iteration.
pub struct FactorizedSolver {
    pivot_threshold: f64,
    symbolic: Option<SymbolicCache>,
}

struct SymbolicCache {
    pattern_generation: u64,
    dim: usize,
    lu: SymbolicLu<usize>,
}

impl FactorizedSolver {
    pub fn new(pivot_threshold: f64) -> Self {
        Self {
            pivot_threshold,
            symbolic: None,
        }
    }

    /// Drops the cached symbolic structure. The next solve recomputes it.
    pub fn invalidate(&mut self) {
        self.symbolic = None;
    }

    /// Pattern generation of the cached symbolic factorization, if any.
    pub fn cached_pattern(&self) -> Option<u64> {
        self.symbolic.as_ref().map(|c| c.pattern_generation)
    }

    /// Factorizes the `dim x dim` matrix given as triplets and solves
    /// `A * x = rhs`.
    pub fn solve(
        &mut self,
        pattern_generation: u64,
        dim: usize,
        triplets: &[(usize, usize, f64)],
        rhs: &[f64],
    ) -> Result<Vec<f64>, LinearSolveError> {
        debug_assert_eq!(rhs.len(), dim);

        // Structural singularity check: every equation must couple to at
        // least one variable above the pivot threshold, and vice versa.
        let mut row_max = vec![0.0f64; dim];
        let mut col_max = vec![0.0f64; dim];
        for &(i, j, a) in triplets {
            if i >= dim || j >= dim {
                return Err(LinearSolveError::Structure(format!(
                    "entry ({i}, {j}) outside {dim} x {dim} matrix"
                )));
            }
            row_max[i] = row_max[i].max(a.abs());
            col_max[j] = col_max[j].max(a.abs());
        }
        if row_max
            .iter()
            .chain(col_max.iter())
            .any(|&m| m <= self.pivot_threshold)
        {
            return Err(LinearSolveError::Singular);
        }

        let a = SparseColMat::<usize, f64>::try_new_from_triplets(dim, dim, triplets)
            .map_err(|e| LinearSolveError::Structure(format!("{e:?}")))?;

        let symbolic = match &self.symbolic {
            Some(c) if c.pattern_generation == pattern_generation && c.dim == dim => c.lu.clone(),
            _ => {
                let lu = SymbolicLu::try_new(a.symbolic())
                    .map_err(|_| LinearSolveError::Singular)?;
                debug!(
                    "symbolic factorization computed for pattern generation {pattern_generation}"
                );
                self.symbolic = Some(SymbolicCache {
                    pattern_generation,
                    dim,
                    lu: lu.clone(),
                });
                lu
            }
        };

        let lu = Lu::try_new_with_symbolic(symbolic, a.as_ref())
            .map_err(|_| LinearSolveError::Singular)?;

        let b = Mat::from_fn(dim, 1, |i, _| rhs[i]);
        let x = lu.solve(&b);

        let mut out = vec![0.0; dim];
        for (i, out_i) in out.iter_mut().enumerate() {
            *out_i = x.read(i, 0);
            if !out_i.is_finite() {
                return Err(LinearSolveError::Singular);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_small_system() {
        let mut solver = FactorizedSolver::new(1e-12);
        // [4 1; 1 3] x = [1, 2]  =>  x = [1/11, 7/11]
        let triplets = [(0, 0, 4.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)];
        let x = solver.solve(0, 2, &triplets, &[1.0, 2.0]).unwrap();
        assert!((x[0] - 1.0 / 11.0).abs() < 1e-12);
        assert!((x[1] - 7.0 / 11.0).abs() < 1e-12);
    }

    #[test]
    fn empty_row_is_singular() {
        let mut solver = FactorizedSolver::new(1e-12);
        let triplets = [(0, 0, 1.0), (1, 0, 2.0)]; // row 1 couples, col 1 empty
        assert_eq!(
            solver.solve(0, 2, &triplets, &[1.0, 1.0]).unwrap_err(),
            LinearSolveError::Singular
        );
    }

    #[test]
    fn below_threshold_pivot_is_singular() {
        let mut solver = FactorizedSolver::new(1e-6);
        let triplets = [(0, 0, 1.0), (0, 1, 1.0), (1, 0, 1e-9), (1, 1, 1e-9)];
        assert_eq!(
            solver.solve(0, 2, &triplets, &[1.0, 1.0]).unwrap_err(),
            LinearSolveError::Singular
        );
    }

    #[test]
    fn symbolic_reuse_follows_pattern_generation() {
        let mut solver = FactorizedSolver::new(1e-12);
        let triplets = [(0, 0, 2.0), (1, 1, 3.0)];
        solver.solve(5, 2, &triplets, &[2.0, 3.0]).unwrap();
        assert_eq!(solver.cached_pattern(), Some(5));

        // same pattern: cache kept; changed values are fine
        let triplets = [(0, 0, 4.0), (1, 1, 6.0)];
        let x = solver.solve(5, 2, &triplets, &[4.0, 6.0]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12 && (x[1] - 1.0).abs() < 1e-12);
        assert_eq!(solver.cached_pattern(), Some(5));

        // new generation: recomputed
        solver.solve(6, 2, &triplets, &[4.0, 6.0]).unwrap();
        assert_eq!(solver.cached_pattern(), Some(6));

        solver.invalidate();
        assert_eq!(solver.cached_pattern(), None);
    }
}
