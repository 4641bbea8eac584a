//! Dense factor storage and the small linear-algebra surface the
//! update strategies need. Matrices are row-major `f32`; products and
//! inverses go through faer.

use faer::linalg::solvers::Solve;
use faer::{linalg::matmul::matmul, Accum, MatRef, Par, Side};

use crate::common::{dot, XorShift64};
use crate::error::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl DenseMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// 0 x 0 placeholder for model slots a strategy does not use.
    pub fn empty() -> Self {
        Self::zeros(0, 0)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> f32 {
        self.bounds(r, c);
        self.data[r * self.cols + c]
    }

    #[inline]
    pub fn set(&mut self, r: usize, c: usize, v: f32) {
        self.bounds(r, c);
        self.data[r * self.cols + c] = v;
    }

    #[inline]
    pub fn add(&mut self, r: usize, c: usize, delta: f32) {
        self.bounds(r, c);
        self.data[r * self.cols + c] += delta;
    }

    #[inline]
    pub fn row(&self, r: usize) -> &[f32] {
        assert!(r < self.rows, "row index {r} out of range ({} rows)", self.rows);
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    #[inline]
    pub fn row_mut(&mut self, r: usize) -> &mut [f32] {
        assert!(r < self.rows, "row index {r} out of range ({} rows)", self.rows);
        &mut self.data[r * self.cols..(r + 1) * self.cols]
    }

    pub fn set_row(&mut self, r: usize, values: &[f32]) {
        assert_eq!(values.len(), self.cols);
        self.row_mut(r).copy_from_slice(values);
    }

    /// Dot product of row `ra` of `a` with row `rb` of `b`.
    #[inline]
    pub fn row_mult(a: &DenseMatrix, ra: usize, b: &DenseMatrix, rb: usize) -> f32 {
        dot(a.row(ra), b.row(rb))
    }

    pub fn init_gaussian(&mut self, rng: &mut XorShift64, mean: f32, std: f32) {
        for v in self.data.iter_mut() {
            *v = mean + std * rng.next_gaussian();
        }
    }

    pub fn init_uniform(&mut self, rng: &mut XorShift64, range: f32) {
        for v in self.data.iter_mut() {
            *v = rng.next_f32() * range;
        }
    }

    pub fn scale(&mut self, factor: f32) {
        for v in self.data.iter_mut() {
            *v *= factor;
        }
    }

    /// self += alpha * other, shapes must match.
    pub fn axpy(&mut self, alpha: f32, other: &DenseMatrix) {
        assert_eq!(self.rows, other.rows);
        assert_eq!(self.cols, other.cols);
        crate::common::axpy(alpha, &other.data, &mut self.data);
    }

    pub fn fill(&mut self, v: f32) {
        self.data.fill(v);
    }

    pub fn transpose(&self) -> DenseMatrix {
        let mut out = DenseMatrix::zeros(self.cols, self.rows);
        for r in 0..self.rows {
            for c in 0..self.cols {
                out.data[c * self.rows + r] = self.data[r * self.cols + c];
            }
        }
        out
    }

    pub fn matmul(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.cols, other.rows, "shape mismatch in matmul");
        let a = MatRef::from_row_major_slice(&self.data, self.rows, self.cols);
        let b = MatRef::from_row_major_slice(&other.data, other.rows, other.cols);
        let mut g = faer::Mat::<f32>::zeros(self.rows, other.cols);
        matmul(g.as_mut(), Accum::Replace, a, b, 1.0f32, Par::rayon(0));

        let mut out = DenseMatrix::zeros(self.rows, other.cols);
        for r in 0..self.rows {
            for c in 0..other.cols {
                out.data[r * other.cols + c] = g[(r, c)];
            }
        }
        out
    }

    /// AᵗA of this matrix, the K x K Gramian the ALS sweeps start from.
    pub fn gramian(&self) -> DenseMatrix {
        let a = MatRef::from_row_major_slice(&self.data, self.rows, self.cols);
        let mut g = faer::Mat::<f32>::zeros(self.cols, self.cols);
        matmul(g.as_mut(), Accum::Replace, a.transpose(), a, 1.0f32, Par::rayon(0));

        let mut out = DenseMatrix::zeros(self.cols, self.cols);
        for r in 0..self.cols {
            for c in 0..self.cols {
                out.data[r * self.cols + c] = g[(r, c)];
            }
        }
        out
    }

    /// Inverse of a symmetric positive-definite matrix via Cholesky.
    pub fn inverse(&self) -> Result<DenseMatrix, Error> {
        assert_eq!(self.rows, self.cols, "inverse of a non-square matrix");
        let n = self.rows;
        let a = MatRef::from_row_major_slice(&self.data, n, n);
        let llt = a.llt(Side::Lower).map_err(|_| Error::SingularSystem {
            side: "matrix",
            index: 0,
        })?;
        let eye = faer::Mat::<f32>::from_fn(n, n, |r, c| if r == c { 1.0 } else { 0.0 });
        let x = llt.solve(eye.as_ref());

        let mut out = DenseMatrix::zeros(n, n);
        for r in 0..n {
            for c in 0..n {
                out.data[r * n + c] = x[(r, c)];
            }
        }
        Ok(out)
    }

    #[inline(always)]
    fn bounds(&self, r: usize, c: usize) {
        assert!(r < self.rows, "row index {r} out of range ({} rows)", self.rows);
        assert!(c < self.cols, "column index {c} out of range ({} columns)", self.cols);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DenseVector {
    data: Vec<f32>,
}

impl DenseVector {
    pub fn zeros(n: usize) -> Self {
        Self { data: vec![0.0; n] }
    }

    pub fn empty() -> Self {
        Self::zeros(0)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn get(&self, i: usize) -> f32 {
        assert!(i < self.data.len(), "index {i} out of range ({} entries)", self.data.len());
        self.data[i]
    }

    #[inline]
    pub fn set(&mut self, i: usize, v: f32) {
        assert!(i < self.data.len(), "index {i} out of range ({} entries)", self.data.len());
        self.data[i] = v;
    }

    #[inline]
    pub fn add(&mut self, i: usize, delta: f32) {
        assert!(i < self.data.len(), "index {i} out of range ({} entries)", self.data.len());
        self.data[i] += delta;
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn init_gaussian(&mut self, rng: &mut XorShift64, mean: f32, std: f32) {
        for v in self.data.iter_mut() {
            *v = mean + std * rng.next_gaussian();
        }
    }

    pub fn init_uniform(&mut self, rng: &mut XorShift64, range: f32) {
        for v in self.data.iter_mut() {
            *v = rng.next_f32() * range;
        }
    }
}

/// Diagonal matrix as its diagonal vector; O(1) access, O(n) inverse.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagMatrix {
    diag: Vec<f32>,
}

impl DiagMatrix {
    pub fn eye(n: usize) -> Self {
        Self { diag: vec![1.0; n] }
    }

    pub fn len(&self) -> usize {
        self.diag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diag.is_empty()
    }

    #[inline]
    pub fn get(&self, i: usize) -> f32 {
        self.diag[i]
    }

    #[inline]
    pub fn set(&mut self, i: usize, v: f32) {
        self.diag[i] = v;
    }

    #[inline]
    pub fn add(&mut self, i: usize, delta: f32) {
        self.diag[i] += delta;
    }

    pub fn minus(&self, other: &DiagMatrix) -> DiagMatrix {
        assert_eq!(self.diag.len(), other.diag.len());
        DiagMatrix {
            diag: self
                .diag
                .iter()
                .zip(&other.diag)
                .map(|(a, b)| a - b)
                .collect(),
        }
    }

    pub fn inv(&self) -> DiagMatrix {
        DiagMatrix {
            diag: self.diag.iter().map(|d| 1.0 / d).collect(),
        }
    }
}

/// Symmetric N x N matrix stored as its packed upper triangle.
#[derive(Debug, Clone, PartialEq)]
pub struct SymmMatrix {
    n: usize,
    data: Vec<f32>,
}

impl SymmMatrix {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![0.0; n * (n + 1) / 2],
        }
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    #[inline(always)]
    fn idx(&self, i: usize, j: usize) -> usize {
        assert!(i < self.n && j < self.n, "index ({i}, {j}) out of range (dim {})", self.n);
        let (a, b) = if i <= j { (i, j) } else { (j, i) };
        a * self.n - a * a.saturating_sub(1) / 2 + (b - a)
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.data[self.idx(i, j)]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, v: f32) {
        let idx = self.idx(i, j);
        self.data[idx] = v;
    }

    #[inline]
    pub fn add(&mut self, i: usize, j: usize, delta: f32) {
        let idx = self.idx(i, j);
        self.data[idx] += delta;
    }
}
