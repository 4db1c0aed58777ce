//! Shard placement for batches of records.
//!
//! Placement is discovered, not computed: a key that already lives in some
//! shard stays there, and a new key goes to whichever shard currently holds
//! the fewest documents. There is no hash function, so where a record lands
//! depends on insertion history rather than on the key's value. Existing
//! data is never rebalanced.
//!
//! The load counters are a [`LoadSnapshot`] value read once per batch and
//! threaded through that batch only. Concurrent batches each take their own
//! snapshot and may pick the same "least loaded" shard; shards still end up
//! roughly balanced over time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, warn};

use crate::errors::RepositoryError;
use crate::interfaces::Shard;
use fund_store_shared::Record;

/// Per-shard document counts for the duration of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSnapshot {
    counts: Vec<u64>,
}

impl LoadSnapshot {
    /// Create a snapshot from per-shard counts. Must not be empty.
    pub fn new(counts: Vec<u64>) -> Self {
        Self { counts }
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Index of the shard with the fewest documents, lowest index on ties.
    pub fn least_loaded(&self) -> usize {
        self.counts
            .iter()
            .enumerate()
            .min_by_key(|(i, count)| (**count, *i))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Pick the least loaded shard for a new key and count the key against it.
    pub fn assign_new(&mut self) -> usize {
        let shard = self.least_loaded();
        if let Some(count) = self.counts.get_mut(shard) {
            *count += 1;
        }
        shard
    }
}

/// Decides which shard each record of a batch belongs to.
pub struct ShardRouter<'a> {
    shards: &'a [Arc<dyn Shard>],
}

impl<'a> ShardRouter<'a> {
    pub fn new(shards: &'a [Arc<dyn Shard>]) -> Self {
        Self { shards }
    }

    /// Read the current count of every shard, in parallel.
    pub async fn snapshot(&self) -> Result<LoadSnapshot, RepositoryError> {
        let results = join_all(self.shards.iter().map(|shard| shard.count())).await;

        let mut counts = Vec::with_capacity(results.len());
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(count) => counts.push(count),
                Err(e) => {
                    error!(shard = i, error = %e, "Failed to count shard documents");
                    return Err(RepositoryError::shard(i, "count", e));
                }
            }
        }
        Ok(LoadSnapshot::new(counts))
    }

    /// For every shard, the subset of `keys` it already stores.
    pub async fn probe(&self, keys: &[String]) -> Result<Vec<HashSet<String>>, RepositoryError> {
        let results =
            join_all(self.shards.iter().map(|shard| shard.find_existing_keys(keys))).await;

        let mut existing = Vec::with_capacity(results.len());
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(found) => existing.push(found),
                Err(e) => {
                    error!(
                        shard = i,
                        keys = ?keys,
                        error = %e,
                        "Failed to probe shard for existing keys"
                    );
                    return Err(RepositoryError::shard(i, "find_existing_keys", e));
                }
            }
        }
        Ok(existing)
    }

    /// Partition a batch into per-shard buckets.
    ///
    /// Fails if any shard cannot be counted or probed: placing a record
    /// without knowing where its key already lives could duplicate it.
    pub async fn route<R: Record>(&self, records: Vec<R>) -> Result<Vec<Vec<R>>, RepositoryError> {
        if self.shards.is_empty() {
            return Err(RepositoryError::NoShards);
        }

        let mut keys: Vec<String> = records.iter().map(|r| r.key().to_string()).collect();
        keys.sort();
        keys.dedup();

        let (snapshot, existing) = futures::try_join!(self.snapshot(), self.probe(&keys))?;
        let mut load = snapshot;

        debug!(
            batch = records.len(),
            counts = ?load.counts(),
            "Routing batch across shards"
        );

        assign(records, &existing, &mut load)
    }
}

/// Assign each record to a shard, in input order.
///
/// A key present in `existing[i]` goes to shard `i`. Any other key goes to
/// `load.assign_new()`. Repeats of a key within the batch follow its first
/// placement and do not count against the load again.
///
/// `existing` and `load` must both describe the same, non-empty, set of
/// shards.
pub(crate) fn assign<R: Record>(
    records: Vec<R>,
    existing: &[HashSet<String>],
    load: &mut LoadSnapshot,
) -> Result<Vec<Vec<R>>, RepositoryError> {
    let shard_count = load.counts().len();
    if shard_count == 0 {
        return Err(RepositoryError::NoShards);
    }
    if existing.len() != shard_count {
        return Err(RepositoryError::validation(format!(
            "probed {} shards but counted {}",
            existing.len(),
            shard_count
        )));
    }
    let mut buckets: Vec<Vec<R>> = (0..shard_count).map(|_| Vec::new()).collect();
    let mut placed: HashMap<String, usize> = HashMap::new();

    for record in records {
        let key = record.key();
        let shard = match placed.get(key) {
            Some(shard) => *shard,
            None => {
                let mut holders = existing
                    .iter()
                    .enumerate()
                    .filter(|(_, keys)| keys.contains(key))
                    .map(|(i, _)| i);
                let shard = match holders.next() {
                    Some(first) => {
                        if let Some(other) = holders.next() {
                            warn!(key = %key, first, other, "Key stored in more than one shard");
                        }
                        first
                    }
                    None => load.assign_new(),
                };
                placed.insert(key.to_string(), shard);
                shard
            }
        };
        buckets[shard].push(record);
    }

    Ok(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fund_store_shared::Fund;

    fn fund(isin: &str) -> Fund {
        Fund::new(isin).with_name(format!("Fund {isin}"))
    }

    fn keys(bucket: &[Fund]) -> Vec<&str> {
        bucket.iter().map(|f| f.isin.as_str()).collect()
    }

    #[test]
    fn test_least_loaded_breaks_ties_by_lowest_index() {
        let snapshot = LoadSnapshot::new(vec![4, 2, 2]);
        assert_eq!(snapshot.least_loaded(), 1);
    }

    #[test]
    fn test_new_keys_fill_to_parity_then_alternate() {
        // shard 0 holds 3, shard 1 holds 5
        let mut load = LoadSnapshot::new(vec![3, 5]);
        let existing = vec![HashSet::new(), HashSet::new()];
        let batch = vec![fund("N1"), fund("N2"), fund("N3"), fund("N4")];

        let buckets = assign(batch, &existing, &mut load).unwrap();

        assert_eq!(keys(&buckets[0]), vec!["N1", "N2", "N3"]);
        assert_eq!(keys(&buckets[1]), vec!["N4"]);
        assert_eq!(load.counts(), &[6, 6]);
    }

    #[test]
    fn test_existing_keys_stay_on_their_shard() {
        let mut load = LoadSnapshot::new(vec![10, 0]);
        let existing = vec![HashSet::from(["OLD".to_string()]), HashSet::new()];
        let batch = vec![fund("OLD"), fund("NEW")];

        let buckets = assign(batch, &existing, &mut load).unwrap();

        assert_eq!(keys(&buckets[0]), vec!["OLD"]);
        assert_eq!(keys(&buckets[1]), vec!["NEW"]);
        assert_eq!(load.counts(), &[10, 1]);
    }

    #[test]
    fn test_repeated_key_in_batch_follows_first_placement() {
        let mut load = LoadSnapshot::new(vec![0, 0]);
        let existing = vec![HashSet::new(), HashSet::new()];
        let batch = vec![fund("A"), fund("B"), fund("A")];

        let buckets = assign(batch, &existing, &mut load).unwrap();

        assert_eq!(keys(&buckets[0]), vec!["A", "A"]);
        assert_eq!(keys(&buckets[1]), vec!["B"]);
        assert_eq!(load.counts(), &[1, 1]);
    }

    #[test]
    fn test_key_in_two_shards_goes_to_lowest_index() {
        let mut load = LoadSnapshot::new(vec![1, 1]);
        let dup = HashSet::from(["DUP".to_string()]);
        let buckets = assign(vec![fund("DUP")], &[dup.clone(), dup], &mut load).unwrap();

        assert_eq!(keys(&buckets[0]), vec!["DUP"]);
        assert!(buckets[1].is_empty());
    }

    #[test]
    fn test_spread_of_new_keys_grows_by_at_most_one() {
        let mut load = LoadSnapshot::new(vec![7, 2, 4]);
        let existing = vec![HashSet::new(); 3];
        let initial_spread = 7 - 2;

        let batch: Vec<Fund> = (0..20).map(|i| fund(&format!("K{i}"))).collect();
        for (n, record) in batch.into_iter().enumerate() {
            assign(vec![record], &existing, &mut load).unwrap();
            let max = *load.counts().iter().max().unwrap();
            let min = *load.counts().iter().min().unwrap();
            assert!(
                max - min <= initial_spread.max(1),
                "after {} keys: {:?}",
                n + 1,
                load.counts()
            );
        }
        assert_eq!(load.counts().iter().sum::<u64>(), 13 + 20);
    }

    #[test]
    fn test_assign_rejects_mismatched_shard_views() {
        let mut empty = LoadSnapshot::new(vec![]);
        assert!(matches!(
            assign(vec![fund("A")], &[], &mut empty),
            Err(RepositoryError::NoShards)
        ));

        let mut load = LoadSnapshot::new(vec![0]);
        let existing = vec![HashSet::new(), HashSet::from(["A".to_string()])];
        assert!(matches!(
            assign(vec![fund("A")], &existing, &mut load),
            Err(RepositoryError::ValidationError(_))
        ));
        assert_eq!(load.counts(), &[0]);
    }
}
