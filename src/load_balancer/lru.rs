//! Least-recently-used instance ordering.

use std::cmp::Ordering;

use crate::repository::BackendInstance;

/// Sort order applied by the store when picking an instance to claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionOrder {
    /// Ascending last connection time; ties go to the higher request count.
    #[default]
    LeastRecentlyUsed,
}

impl SelectionOrder {
    /// Compare two instances; `Less` means `a` is claimed before `b`.
    pub fn compare(&self, a: &BackendInstance, b: &BackendInstance) -> Ordering {
        match self {
            // The tie-break favours the busier instance. Kept as stored
            // behaviour until the intent is confirmed.
            SelectionOrder::LeastRecentlyUsed => a
                .last_connection_ts
                .cmp(&b.last_connection_ts)
                .then_with(|| b.request_count.cmp(&a.request_count)),
        }
    }

    /// Pick the first instance in this order.
    pub fn first<'a, I>(&self, instances: I) -> Option<&'a BackendInstance>
    where
        I: IntoIterator<Item = &'a BackendInstance>,
    {
        // min_by keeps the first of equal elements, so iteration order breaks
        // full ties.
        instances.into_iter().min_by(|a, b| self.compare(a, b))
    }
}
