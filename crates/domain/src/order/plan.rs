//! Stock delta planning.
//!
//! A [`StockPlan`] holds one signed ledger delta per stock pool. Negative
//! deltas consume stock, positive deltas return it. Pools are kept in a
//! `BTreeMap` so that iterating a plan yields the lock acquisition order.

use std::collections::{BTreeMap, HashMap};

use common::ItemId;
use store::OrderLine;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockPlan {
    deltas: BTreeMap<String, i64>,
}

impl StockPlan {
    /// Consumes the full quantity of every line.
    pub fn for_place(lines: &[OrderLine]) -> Self {
        let mut plan = Self::default();
        for line in lines {
            plan.add(&line.stock_name, -i64::from(line.quantity));
        }
        plan.prune();
        plan
    }

    /// Diffs old against new quantities per item and pool.
    ///
    /// Lines are keyed by `(item_id, stock_name)` so that an item whose pool
    /// changed since it was ordered returns stock to the old pool and draws
    /// from the new one. Items whose quantity did not change produce nothing.
    pub fn for_update(old_lines: &[OrderLine], new_lines: &[OrderLine]) -> Self {
        let mut per_item: HashMap<(ItemId, &str), i64> = HashMap::new();
        for line in old_lines {
            *per_item
                .entry((line.item_id, line.stock_name.as_str()))
                .or_insert(0) += i64::from(line.quantity);
        }
        for line in new_lines {
            *per_item
                .entry((line.item_id, line.stock_name.as_str()))
                .or_insert(0) -= i64::from(line.quantity);
        }

        let mut plan = Self::default();
        for ((_, stock_name), delta) in per_item {
            if delta != 0 {
                plan.add(stock_name, delta);
            }
        }
        plan.prune();
        plan
    }

    /// Returns the full quantity of every line.
    pub fn for_cancel(lines: &[OrderLine]) -> Self {
        let mut plan = Self::default();
        for line in lines {
            plan.add(&line.stock_name, i64::from(line.quantity));
        }
        plan.prune();
        plan
    }

    /// Iterates `(stock_name, delta)` in ascending stock name order.
    pub fn deltas(&self) -> impl Iterator<Item = (&str, i64)> {
        self.deltas.iter().map(|(name, delta)| (name.as_str(), *delta))
    }

    pub fn delta(&self, stock_name: &str) -> i64 {
        self.deltas.get(stock_name).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    fn add(&mut self, stock_name: &str, delta: i64) {
        *self.deltas.entry(stock_name.to_string()).or_insert(0) += delta;
    }

    // Pools whose contributions cancel out are not locked at all.
    fn prune(&mut self) {
        self.deltas.retain(|_, delta| *delta != 0);
    }
}
