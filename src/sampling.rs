//! Negative sampling for implicit-feedback ranking objectives: uniform
//! draws from the complement of a user's rated set, and an
//! item-popularity-proportional sampler.

use ahash::AHashSet;

use crate::common::XorShift64;
use crate::sparse::{RowRef, SparseMatrix};

/// Outcome of a negative-sampling request. When the complement of the
/// rated set is smaller than the requested count, the sample shrinks
/// instead of failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sampled {
    Complete(Vec<u32>),
    Exhausted(Vec<u32>),
}

impl Sampled {
    pub fn items(&self) -> &[u32] {
        match self {
            Sampled::Complete(v) | Sampled::Exhausted(v) => v,
        }
    }

    pub fn into_items(self) -> Vec<u32> {
        match self {
            Sampled::Complete(v) | Sampled::Exhausted(v) => v,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Sampled::Exhausted(_))
    }
}

/// Draw up to `rho` distinct items the user has not rated, uniformly
/// and without replacement from the complement of `row`.
pub fn sample_unrated(
    n_items: usize,
    row: RowRef<'_>,
    rho: usize,
    rng: &mut XorShift64,
) -> Sampled {
    let unrated = n_items - row.len();
    if unrated == 0 {
        return Sampled::Exhausted(Vec::new());
    }
    if rho == 0 {
        return Sampled::Complete(Vec::new());
    }
    let count = rho.min(unrated);

    // distinct positions into the complement, sorted ascending
    let mut positions: Vec<usize> = if count * 2 >= unrated {
        let mut all: Vec<usize> = (0..unrated).collect();
        for i in 0..count {
            let j = i + rng.next_usize(unrated - i);
            all.swap(i, j);
        }
        all.truncate(count);
        all
    } else {
        let mut seen = AHashSet::with_capacity(count);
        while seen.len() < count {
            seen.insert(rng.next_usize(unrated));
        }
        seen.into_iter().collect()
    };
    positions.sort_unstable();

    // one sweep over the item universe, skipping rated items
    let mut items = Vec::with_capacity(count);
    let mut cursor = 0;
    let mut nth_unrated = 0;
    for j in 0..n_items as u32 {
        if row.contains(j as usize) {
            continue;
        }
        if nth_unrated == positions[cursor] {
            items.push(j);
            cursor += 1;
            if cursor >= positions.len() {
                break;
            }
        }
        nth_unrated += 1;
    }

    if count < rho {
        Sampled::Exhausted(items)
    } else {
        Sampled::Complete(items)
    }
}

/// Item sampler with draw probability proportional to popularity
/// (column degree / total observations), inverted against a uniform
/// draw over the cumulative table.
#[derive(Debug, Clone)]
pub struct PopularitySampler {
    // (item, probability), ascending by probability; zero-degree items
    // are never sampled and are left out entirely
    probs: Vec<(u32, f64)>,
}

impl PopularitySampler {
    pub fn from_columns(matrix: &SparseMatrix) -> Self {
        let total = matrix.size() as f64;
        let mut probs: Vec<(u32, f64)> = (0..matrix.n_cols())
            .filter_map(|j| {
                let degree = matrix.column_size(j);
                (degree > 0).then(|| (j as u32, degree as f64 / total))
            })
            .collect();
        probs.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        Self { probs }
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }

    /// One popularity-proportional draw.
    pub fn draw(&self, rng: &mut XorShift64) -> u32 {
        let rand = rng.next_f64();
        let mut sum = 0.0;
        for &(item, prob) in &self.probs {
            sum += prob;
            if sum >= rand {
                return item;
            }
        }
        // cumulative rounding can leave a sliver above the last entry
        self.probs.last().map(|&(item, _)| item).unwrap()
    }

    /// Draw an item the user has not rated, retrying up to
    /// `max_retries` times before giving up.
    pub fn draw_unrated(
        &self,
        row: RowRef<'_>,
        rng: &mut XorShift64,
        max_retries: usize,
    ) -> Option<u32> {
        if self.probs.is_empty() {
            return None;
        }
        for _ in 0..max_retries {
            let j = self.draw(rng);
            if !row.contains(j as usize) {
                return Some(j);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::SparseMatrix;

    fn nearly_full_row() -> SparseMatrix {
        // user 0 rated items 0..9 except item 6
        let triples: Vec<(u32, u32, f32)> = (0..10u32)
            .filter(|&j| j != 6)
            .map(|j| (0, j, 1.0))
            .collect();
        SparseMatrix::from_triples(1, 10, &triples).unwrap()
    }

    #[test]
    fn shrinks_to_the_single_unrated_item() {
        let m = nearly_full_row();
        let mut rng = XorShift64::new(1);
        let s = sample_unrated(10, m.row(0), 5, &mut rng);
        assert!(s.is_exhausted());
        assert_eq!(s.items(), &[6]);
    }

    #[test]
    fn complete_sample_is_distinct_and_unrated() {
        let m = SparseMatrix::from_triples(1, 50, &[(0, 3, 1.0), (0, 17, 1.0)]).unwrap();
        let mut rng = XorShift64::new(9);
        for _ in 0..20 {
            let s = sample_unrated(50, m.row(0), 5, &mut rng);
            assert!(!s.is_exhausted());
            let items = s.items();
            assert_eq!(items.len(), 5);
            let distinct: AHashSet<u32> = items.iter().copied().collect();
            assert_eq!(distinct.len(), 5);
            assert!(!items.contains(&3));
            assert!(!items.contains(&17));
        }
    }

    #[test]
    fn fully_rated_user_yields_empty_sample() {
        let triples: Vec<(u32, u32, f32)> = (0..4u32).map(|j| (0, j, 1.0)).collect();
        let m = SparseMatrix::from_triples(1, 4, &triples).unwrap();
        let mut rng = XorShift64::new(2);
        let s = sample_unrated(4, m.row(0), 3, &mut rng);
        assert_eq!(s, Sampled::Exhausted(Vec::new()));
    }

    #[test]
    fn popularity_sampler_skips_zero_degree_items() {
        // item 2 has no ratings
        let m = SparseMatrix::from_triples(
            3,
            4,
            &[(0, 0, 1.0), (1, 0, 1.0), (2, 0, 1.0), (0, 1, 1.0), (1, 3, 1.0)],
        )
        .unwrap();
        let sampler = PopularitySampler::from_columns(&m);
        let mut rng = XorShift64::new(4);
        for _ in 0..200 {
            assert_ne!(sampler.draw(&mut rng), 2);
        }
    }

    #[test]
    fn popular_items_are_drawn_more_often() {
        // item 0 rated by 8 users, item 1 by 1
        let mut triples: Vec<(u32, u32, f32)> = (0..8u32).map(|u| (u, 0, 1.0)).collect();
        triples.push((0, 1, 1.0));
        let m = SparseMatrix::from_triples(8, 2, &triples).unwrap();
        let sampler = PopularitySampler::from_columns(&m);
        let mut rng = XorShift64::new(5);
        let hits = (0..1000).filter(|_| sampler.draw(&mut rng) == 0).count();
        assert!(hits > 800, "item 0 drawn {hits}/1000 times");
    }

    #[test]
    fn draw_unrated_respects_the_rated_set() {
        let m = SparseMatrix::from_triples(
            2,
            3,
            &[(0, 0, 1.0), (0, 1, 1.0), (1, 2, 1.0)],
        )
        .unwrap();
        let sampler = PopularitySampler::from_columns(&m);
        let mut rng = XorShift64::new(6);
        for _ in 0..50 {
            let j = sampler.draw_unrated(m.row(0), &mut rng, 100).unwrap();
            assert_eq!(j, 2);
        }
    }

    #[test]
    fn draw_unrated_gives_up_after_bounded_retries() {
        // the only sampled item is also the only rated one
        let m = SparseMatrix::from_triples(1, 2, &[(0, 0, 1.0)]).unwrap();
        let sampler = PopularitySampler::from_columns(&m);
        let mut rng = XorShift64::new(7);
        assert_eq!(sampler.draw_unrated(m.row(0), &mut rng, 10), None);
    }
}
