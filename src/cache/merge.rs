//! Merge strategies reconciling a cached base collection with a delta.
//!
//! Every function here is pure: no I/O and no cache access. The result keeps
//! the base order, appends new entities, and drops tombstoned ids. A delta
//! entry for an id the base does not know is an insert, never an error.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;

use super::traits::{Grouped, MonthKeyed, Patchable, Syncable};

/// Normalize a month reference to `YYYY-MM-01`.
///
/// Accepts `YYYY-MM` and any full `YYYY-MM-DD` date.
pub fn normalize_month(raw: &str) -> Option<String> {
  let raw = raw.trim();
  let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
    .or_else(|_| NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d"))
    .ok()?;
  Some(date.format("%Y-%m-01").to_string())
}

fn merge_keyed<T, K, U>(base: &[T], delta: &[T], key: K, upsert: U) -> Vec<T>
where
  T: Syncable,
  K: Fn(&T) -> String,
  U: Fn(&mut T, &T),
{
  let mut order: Vec<String> = Vec::with_capacity(base.len() + delta.len());
  let mut seen: HashSet<String> = HashSet::with_capacity(base.len() + delta.len());
  let mut index: HashMap<String, T> = HashMap::with_capacity(base.len() + delta.len());

  for item in base {
    let k = key(item);
    if seen.insert(k.clone()) {
      order.push(k.clone());
    }
    index.insert(k, item.clone());
  }

  for item in delta {
    let k = key(item);
    if item.is_deleted() {
      index.remove(&k);
      continue;
    }
    match index.get_mut(&k) {
      Some(existing) => upsert(existing, item),
      None => {
        index.insert(k.clone(), item.clone());
        if seen.insert(k.clone()) {
          order.push(k);
        }
      }
    }
  }

  order.iter().filter_map(|k| index.remove(k)).collect()
}

/// Flat id-keyed merge (accounts, payees, budgets).
pub fn merge_flat<T: Syncable>(base: &[T], delta: &[T]) -> Vec<T> {
  merge_keyed(base, delta, T::sync_key, |existing, newer| {
    *existing = newer.clone()
  })
}

/// Id-keyed merge where a thinner delta entry only updates what it carries.
pub fn merge_patched<T: Patchable>(base: &[T], delta: &[T]) -> Vec<T> {
  merge_keyed(base, delta, T::sync_key, |existing, newer| {
    existing.apply_patch(newer)
  })
}

/// Merge keyed by the normalized `YYYY-MM-01` month instead of an id.
pub fn merge_by_month<T: MonthKeyed>(base: &[T], delta: &[T]) -> Vec<T> {
  merge_keyed(
    base,
    delta,
    |item| normalize_month(item.month()).unwrap_or_else(|| item.month().to_string()),
    |existing, newer| *existing = newer.clone(),
  )
}

/// Merge nested collections (categories inside category groups).
///
/// Each delta item is routed to its owning group by the group id it records,
/// falling back to the delta group that carried it. Groups missing from the
/// base are created; a group emptied by deletions is dropped.
pub fn merge_grouped<G: Grouped>(base: &[G], delta: &[G]) -> Vec<G> {
  let mut groups: Vec<G> = base.to_vec();
  let mut emptied_by_delete: HashSet<String> = HashSet::new();

  for delta_group in delta {
    let group_key = delta_group.sync_key();

    if delta_group.is_deleted() {
      groups.retain(|group| group.sync_key() != group_key);
      continue;
    }

    match groups.iter().position(|group| group.sync_key() == group_key) {
      Some(pos) => {
        let items = std::mem::take(groups[pos].items_mut());
        let mut updated = delta_group.without_items();
        *updated.items_mut() = items;
        groups[pos] = updated;
      }
      None => groups.push(delta_group.without_items()),
    }

    for item in delta_group.items() {
      let item_key = item.sync_key();
      let target = G::owning_group(item)
        .filter(|owner| groups.iter().any(|group| &group.sync_key() == owner))
        .unwrap_or_else(|| group_key.clone());

      for group in groups.iter_mut() {
        if !item.is_deleted() && group.sync_key() == target {
          continue;
        }
        let before = group.items().len();
        group.items_mut().retain(|existing| existing.sync_key() != item_key);
        if item.is_deleted() && group.items().len() < before {
          emptied_by_delete.insert(group.sync_key());
        }
      }

      if item.is_deleted() {
        continue;
      }

      if let Some(group) = groups.iter_mut().find(|group| group.sync_key() == target) {
        let items = group.items_mut();
        match items.iter().position(|existing| existing.sync_key() == item_key) {
          Some(pos) => items[pos] = item.clone(),
          None => items.push(item.clone()),
        }
      }
    }
  }

  groups.retain(|group| !(group.items().is_empty() && emptied_by_delete.contains(&group.sync_key())));
  groups
}
