//! Sparse rating-matrix substrate: CSR and CSC indexes over one
//! canonical value array, plus a hash index for O(1) entry lookup.
//!
//! Rows and columns are enumerable in O(degree); a value written
//! through `set`/`add` is visible through both the row and the column
//! view because the CSC side stores positions into the CSR data array
//! instead of copying it.

use ahash::AHashMap;

use crate::error::Error;

#[inline(always)]
fn key(row: u32, col: u32) -> u64 {
    ((row as u64) << 32) | col as u64
}

#[derive(Debug, Clone)]
pub struct SparseMatrix {
    n_rows: usize,
    n_cols: usize,
    // CSR
    indptr: Vec<usize>,
    indices: Vec<u32>,
    data: Vec<f32>,
    // CSC; csr_pos maps each CSC slot to its index into `data`
    indptr_t: Vec<usize>,
    indices_t: Vec<u32>,
    csr_pos: Vec<usize>,
    // (row, col) -> index into `data`
    pos: AHashMap<u64, usize>,
}

impl SparseMatrix {
    /// Build from (row, col, value) triples. Values <= 0 are dropped
    /// (unobserved); duplicate (row, col) keys are an error.
    pub fn from_triples(
        n_rows: usize,
        n_cols: usize,
        triples: &[(u32, u32, f32)],
    ) -> Result<Self, Error> {
        let mut kept: Vec<(u32, u32, f32)> = Vec::with_capacity(triples.len());
        for &(r, c, v) in triples {
            assert!(
                (r as usize) < n_rows,
                "row index {r} out of range ({n_rows} rows)"
            );
            assert!(
                (c as usize) < n_cols,
                "column index {c} out of range ({n_cols} columns)"
            );
            if v > 0.0 {
                kept.push((r, c, v));
            }
        }
        kept.sort_unstable_by_key(|&(r, c, _)| (r, c));

        let nnz = kept.len();
        let mut indptr = vec![0usize; n_rows + 1];
        let mut indices = Vec::with_capacity(nnz);
        let mut data = Vec::with_capacity(nnz);
        let mut pos = AHashMap::with_capacity(nnz);

        for (idx, &(r, c, v)) in kept.iter().enumerate() {
            if idx > 0 {
                let (pr, pc, _) = kept[idx - 1];
                if pr == r && pc == c {
                    return Err(Error::DuplicateEntry { row: r, col: c });
                }
            }
            indptr[r as usize + 1] += 1;
            indices.push(c);
            data.push(v);
            pos.insert(key(r, c), idx);
        }
        for r in 0..n_rows {
            indptr[r + 1] += indptr[r];
        }

        // column-major index via a counting pass
        let mut col_counts = vec![0usize; n_cols];
        for &c in &indices {
            col_counts[c as usize] += 1;
        }
        let mut indptr_t = vec![0usize; n_cols + 1];
        for c in 0..n_cols {
            indptr_t[c + 1] = indptr_t[c] + col_counts[c];
        }
        let mut indices_t = vec![0u32; nnz];
        let mut csr_pos = vec![0usize; nnz];
        let mut cursor = indptr_t[..n_cols].to_vec();
        for r in 0..n_rows {
            for idx in indptr[r]..indptr[r + 1] {
                let c = indices[idx] as usize;
                let slot = cursor[c];
                indices_t[slot] = r as u32;
                csr_pos[slot] = idx;
                cursor[c] += 1;
            }
        }

        Ok(Self {
            n_rows,
            n_cols,
            indptr,
            indices,
            data,
            indptr_t,
            indices_t,
            csr_pos,
            pos,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    /// Number of observed entries.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn row_size(&self, r: usize) -> usize {
        assert!(r < self.n_rows, "row index {r} out of range ({} rows)", self.n_rows);
        self.indptr[r + 1] - self.indptr[r]
    }

    pub fn column_size(&self, c: usize) -> usize {
        assert!(c < self.n_cols, "column index {c} out of range ({} columns)", self.n_cols);
        self.indptr_t[c + 1] - self.indptr_t[c]
    }

    #[inline]
    pub fn contains(&self, r: usize, c: usize) -> bool {
        self.in_bounds(r, c);
        self.pos.contains_key(&key(r as u32, c as u32))
    }

    /// Value at (r, c), 0.0 when unobserved.
    #[inline]
    pub fn get(&self, r: usize, c: usize) -> f32 {
        self.in_bounds(r, c);
        match self.pos.get(&key(r as u32, c as u32)) {
            Some(&idx) => self.data[idx],
            None => 0.0,
        }
    }

    /// Overwrite an observed entry in place. Writing an unobserved slot
    /// would change the structure and is rejected.
    pub fn set(&mut self, r: usize, c: usize, v: f32) {
        self.in_bounds(r, c);
        let idx = *self
            .pos
            .get(&key(r as u32, c as u32))
            .unwrap_or_else(|| panic!("entry ({r}, {c}) is not observed"));
        self.data[idx] = v;
    }

    pub fn add(&mut self, r: usize, c: usize, delta: f32) {
        self.in_bounds(r, c);
        let idx = *self
            .pos
            .get(&key(r as u32, c as u32))
            .unwrap_or_else(|| panic!("entry ({r}, {c}) is not observed"));
        self.data[idx] += delta;
    }

    /// Replace every observed value with 1.0 (implicit-feedback
    /// preprocessing).
    pub fn binarize(&mut self) {
        for v in self.data.iter_mut() {
            *v = 1.0;
        }
    }

    pub fn row(&self, r: usize) -> RowRef<'_> {
        assert!(r < self.n_rows, "row index {r} out of range ({} rows)", self.n_rows);
        let span = self.indptr[r]..self.indptr[r + 1];
        RowRef {
            cols: &self.indices[span.clone()],
            vals: &self.data[span],
        }
    }

    /// Row view with one column left out, for leave-one-out updates.
    pub fn row_excluding(
        &self,
        r: usize,
        skip: usize,
    ) -> impl Iterator<Item = (u32, f32)> + '_ {
        let skip = skip as u32;
        self.row(r).iter().filter(move |&(c, _)| c != skip)
    }

    pub fn column(&self, c: usize) -> ColRef<'_> {
        assert!(c < self.n_cols, "column index {c} out of range ({} columns)", self.n_cols);
        let span = self.indptr_t[c]..self.indptr_t[c + 1];
        ColRef {
            rows: &self.indices_t[span.clone()],
            pos: &self.csr_pos[span],
            data: &self.data,
        }
    }

    /// All observed entries as (row, col, value), row-major. The order
    /// is stable across calls.
    pub fn entries(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        (0..self.n_rows).flat_map(move |r| {
            (self.indptr[r]..self.indptr[r + 1])
                .map(move |idx| (r, self.indices[idx] as usize, self.data[idx]))
        })
    }

    #[inline(always)]
    fn in_bounds(&self, r: usize, c: usize) {
        assert!(r < self.n_rows, "row index {r} out of range ({} rows)", self.n_rows);
        assert!(c < self.n_cols, "column index {c} out of range ({} columns)", self.n_cols);
    }
}

// ── Borrowed views ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    cols: &'a [u32],
    vals: &'a [f32],
}

impl<'a> RowRef<'a> {
    pub fn len(&self) -> usize {
        self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    pub fn indices(&self) -> &'a [u32] {
        self.cols
    }

    pub fn values(&self) -> &'a [f32] {
        self.vals
    }

    #[inline]
    pub fn contains(&self, col: usize) -> bool {
        self.cols.binary_search(&(col as u32)).is_ok()
    }

    /// Value at `col` within this row, 0.0 when unobserved.
    #[inline]
    pub fn get(&self, col: usize) -> f32 {
        match self.cols.binary_search(&(col as u32)) {
            Ok(i) => self.vals[i],
            Err(_) => 0.0,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, f32)> + 'a {
        self.cols.iter().copied().zip(self.vals.iter().copied())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ColRef<'a> {
    rows: &'a [u32],
    pos: &'a [usize],
    data: &'a [f32],
}

impl<'a> ColRef<'a> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn indices(&self) -> &'a [u32] {
        self.rows
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, f32)> + 'a {
        let data = self.data;
        self.rows
            .iter()
            .copied()
            .zip(self.pos.iter().map(move |&p| data[p]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SparseMatrix {
        // 3 users x 4 items
        //      i0   i1   i2   i3
        // u0  5.0        3.0
        // u1       4.0        2.0
        // u2  1.0   2.0
        SparseMatrix::from_triples(
            3,
            4,
            &[
                (0, 0, 5.0),
                (0, 2, 3.0),
                (1, 1, 4.0),
                (1, 3, 2.0),
                (2, 0, 1.0),
                (2, 1, 2.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn sizes_and_degrees() {
        let m = sample();
        assert_eq!(m.size(), 6);
        assert_eq!(m.row_size(0), 2);
        assert_eq!(m.row_size(1), 2);
        assert_eq!(m.column_size(0), 2);
        assert_eq!(m.column_size(1), 2);
        assert_eq!(m.column_size(2), 1);
        assert_eq!(m.column_size(3), 1);
    }

    #[test]
    fn get_and_contains() {
        let m = sample();
        assert!(m.contains(0, 0));
        assert!(!m.contains(0, 1));
        assert_eq!(m.get(0, 2), 3.0);
        assert_eq!(m.get(2, 3), 0.0);
    }

    #[test]
    fn row_and_column_views() {
        let m = sample();
        let r0: Vec<_> = m.row(0).iter().collect();
        assert_eq!(r0, vec![(0, 5.0), (2, 3.0)]);

        let c1: Vec<_> = m.column(1).iter().collect();
        assert_eq!(c1, vec![(1, 4.0), (2, 2.0)]);

        assert_eq!(m.row(0).get(2), 3.0);
        assert_eq!(m.row(0).get(1), 0.0);
    }

    #[test]
    fn row_excluding_drops_one_column() {
        let m = sample();
        let r: Vec<_> = m.row_excluding(0, 2).collect();
        assert_eq!(r, vec![(0, 5.0)]);
        // excluding an absent column is a no-op
        let r: Vec<_> = m.row_excluding(0, 3).collect();
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn writes_are_visible_through_both_views() {
        let mut m = sample();
        m.set(1, 1, 9.0);
        m.add(2, 1, 0.5);
        assert_eq!(m.row(1).get(1), 9.0);
        let c1: Vec<_> = m.column(1).iter().collect();
        assert_eq!(c1, vec![(1, 9.0), (2, 2.5)]);
    }

    #[test]
    fn binarize_flattens_values() {
        let mut m = sample();
        m.binarize();
        assert!(m.entries().all(|(_, _, v)| v == 1.0));
        assert_eq!(m.size(), 6);
    }

    #[test]
    fn nonpositive_values_are_dropped() {
        let m = SparseMatrix::from_triples(2, 2, &[(0, 0, 1.0), (1, 1, 0.0)]).unwrap();
        assert_eq!(m.size(), 1);
        assert!(!m.contains(1, 1));
    }

    #[test]
    fn duplicate_entries_are_rejected() {
        let err = SparseMatrix::from_triples(2, 2, &[(0, 1, 1.0), (0, 1, 2.0)]);
        assert!(matches!(
            err,
            Err(Error::DuplicateEntry { row: 0, col: 1 })
        ));
    }

    #[test]
    fn entry_order_is_stable_row_major() {
        let m = sample();
        let a: Vec<_> = m.entries().collect();
        let b: Vec<_> = m.entries().collect();
        assert_eq!(a, b);
        assert_eq!(a[0], (0, 0, 5.0));
        assert_eq!(a[5], (2, 1, 2.0));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn row_out_of_range_panics() {
        sample().row(3);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn column_out_of_range_panics() {
        sample().column(4);
    }

    #[test]
    #[should_panic(expected = "not observed")]
    fn set_on_unobserved_entry_panics() {
        sample().set(0, 1, 1.0);
    }
}
