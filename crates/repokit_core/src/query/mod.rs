//! Store-independent query description and in-process evaluation.
//!
//! # Responsibility
//! - Describe reads as filter + optional sort + offset/limit window.
//! - Provide the reference in-process evaluator every store can fall back to.
//!
//! # Invariants
//! - Evaluation order is always filter, then sort, then window.
//! - Without an explicit sort, results are ordered by entity key ascending.
//! - Sort ties are broken by entity key ascending.

pub mod filter;
pub mod sort;

use crate::query::filter::Filter;
use crate::query::sort::SortKey;
use serde_json::Value;

/// One read request against a store.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filter: Option<Filter>,
    pub sort: Option<SortKey>,
    pub offset: usize,
    /// `None` means unbounded.
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn sort(mut self, sort: SortKey) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Builds a query from the repository-style `(offset, limit)` pair where
    /// `usize::MAX` means "no limit".
    pub(crate) fn windowed(offset: usize, limit: usize, filter: Option<&Filter>) -> Self {
        Self {
            filter: filter.cloned(),
            sort: None,
            offset,
            limit: (limit != usize::MAX).then_some(limit),
        }
    }
}

/// Skips `offset` items and keeps at most `limit` of the rest.
pub fn window<T>(items: impl IntoIterator<Item = T>, offset: usize, limit: Option<usize>) -> Vec<T> {
    let remaining = items.into_iter().skip(offset);
    match limit {
        Some(limit) => remaining.take(limit).collect(),
        None => remaining.collect(),
    }
}

/// Runs `query` over keyed documents entirely in process.
pub(crate) fn run_in_process<K: Ord>(mut rows: Vec<(K, Value)>, query: &Query) -> Vec<(K, Value)> {
    if let Some(filter) = &query.filter {
        rows.retain(|(_, document)| filter.evaluate(document));
    }

    match &query.sort {
        Some(sort) => rows.sort_by(|(left_key, left), (right_key, right)| {
            sort.compare(left, right)
                .then_with(|| left_key.cmp(right_key))
        }),
        None => rows.sort_by(|(left_key, _), (right_key, _)| left_key.cmp(right_key)),
    }

    window(rows, query.offset, query.limit)
}

/// Counts documents matching an optional filter.
pub(crate) fn count_in_process<'a>(
    documents: impl IntoIterator<Item = &'a Value>,
    filter: Option<&Filter>,
) -> u64 {
    let count = match filter {
        Some(filter) => documents
            .into_iter()
            .filter(|document| filter.evaluate(document))
            .count(),
        None => documents.into_iter().count(),
    };
    count as u64
}

#[cfg(test)]
mod tests {
    use super::{run_in_process, window, Query};
    use crate::query::filter::Filter;
    use crate::query::sort::SortKey;
    use serde_json::json;

    fn rows() -> Vec<(i64, serde_json::Value)> {
        vec![
            (3, json!({ "name": "c", "rank": 1 })),
            (1, json!({ "name": "a", "rank": 2 })),
            (2, json!({ "name": "b", "rank": 1 })),
            (4, json!({ "name": "d", "rank": 3 })),
        ]
    }

    #[test]
    fn window_handles_offset_past_end() {
        assert!(window(vec![1, 2, 3], 5, Some(2)).is_empty());
        assert_eq!(window(vec![1, 2, 3], 1, None), vec![2, 3]);
        assert_eq!(window(vec![1, 2, 3], 0, Some(0)), Vec::<i32>::new());
    }

    #[test]
    fn default_order_is_key_ascending() {
        let keys: Vec<_> = run_in_process(rows(), &Query::new())
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec![1, 2, 3, 4]);
    }

    #[test]
    fn sort_ties_fall_back_to_key_order_and_window_applies_last() {
        let query = Query::new()
            .sort(SortKey::descending("rank"))
            .offset(1)
            .limit(2);
        let keys: Vec<_> = run_in_process(rows(), &query)
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        // rank desc: 4(3), 1(2), 2(1), 3(1)
        assert_eq!(keys, vec![1, 2]);
    }

    #[test]
    fn filter_runs_before_window() {
        let query = Query::new().filter(Filter::eq("rank", 1)).limit(1).offset(1);
        let keys: Vec<_> = run_in_process(rows(), &query)
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec![3]);
    }

    #[test]
    fn windowed_treats_max_limit_as_unbounded() {
        assert_eq!(Query::windowed(0, usize::MAX, None).limit, None);
        assert_eq!(Query::windowed(2, 5, None).limit, Some(5));
    }
}
