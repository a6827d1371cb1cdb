//! Black-box tests driving the index through its public API only.

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use roadster_core::{Error, Index, Key};
    use std::collections::HashSet;

    /// Distinct random keys drawn from `[0, 2 * count)`, in insertion order.
    fn generate_random_keys(count: usize, seed: u64) -> Vec<Key> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut existing = HashSet::new();
        let mut keys = Vec::with_capacity(count);
        while keys.len() < count {
            let key = rng.gen_range(0..2 * count as Key);
            if existing.insert(key) {
                keys.push(key);
            }
        }
        keys
    }

    fn sequential_inserts(keys: &[Key]) -> Index<i64> {
        let mut index = Index::new();
        for (insertion_order, &key) in keys.iter().enumerate() {
            index
                .insert(key, insertion_order as i64)
                .unwrap_or_else(|error| panic!("insert of {key} failed: {error}"));
        }
        index
    }

    fn sequential_lookups(index: &mut Index<i64>, keys: &[Key]) {
        for (insertion_order, &key) in keys.iter().enumerate() {
            assert_eq!(
                index.find(key),
                Some(insertion_order as i64),
                "retrieval error for key {key}"
            );
        }
    }

    #[test]
    fn random_inserts_1k() {
        let keys = generate_random_keys(1_000, 42);
        let mut index = sequential_inserts(&keys);
        sequential_lookups(&mut index, &keys);
    }

    #[test]
    fn random_inserts_10k() {
        let keys = generate_random_keys(10_000, 42);
        let mut index = sequential_inserts(&keys);
        sequential_lookups(&mut index, &keys);
    }

    #[test]
    fn random_inserts_100k() {
        let keys = generate_random_keys(100_000, 42);
        let mut index = sequential_inserts(&keys);
        sequential_lookups(&mut index, &keys);
    }

    #[test]
    fn absent_keys_probe_as_missing() {
        let keys = generate_random_keys(10_000, 42);
        let present: HashSet<Key> = keys.iter().copied().collect();
        let mut index = sequential_inserts(&keys);
        for probe in 0..20_000 {
            let expected_present = present.contains(&probe);
            assert_eq!(index.find(probe).is_some(), expected_present, "probe {probe}");
        }
    }

    #[test]
    fn shuffled_permutation_roundtrip() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut keys: Vec<Key> = (0..10_000).collect();
        keys.shuffle(&mut rng);
        let mut index = sequential_inserts(&keys);
        sequential_lookups(&mut index, &keys);
    }

    #[test]
    fn iteration_is_sorted_and_complete() {
        let keys = generate_random_keys(5_000, 9);
        let index = sequential_inserts(&keys);

        let walked: Vec<Key> = index.iter().map(|(key, _)| key).collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(walked, sorted);
    }

    #[test]
    fn min_and_max_track_extremes() {
        let keys = generate_random_keys(2_000, 3);
        let index = sequential_inserts(&keys);
        assert_eq!(index.get_min_key(), keys.iter().min().copied());
        assert_eq!(index.get_max_key(), keys.iter().max().copied());
    }

    #[test]
    fn duplicates_are_rejected_and_harmless() {
        let keys = generate_random_keys(1_000, 5);
        let mut index = sequential_inserts(&keys);
        for &key in keys.iter().step_by(7) {
            assert_eq!(index.insert(key, -1), Err(Error::NoInsertion));
        }
        sequential_lookups(&mut index, &keys);
        assert_eq!(index.len(), keys.len());
    }

    #[test]
    fn sparse_keys_with_wide_gaps() {
        let mut rng = StdRng::seed_from_u64(17);
        let mut keys: Vec<Key> = (0..5_000).map(|i| i * 1_000_003).collect();
        keys.shuffle(&mut rng);
        let mut index = sequential_inserts(&keys);
        sequential_lookups(&mut index, &keys);
        assert_eq!(index.find(500_001), None);
    }
}
