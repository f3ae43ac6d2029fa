//! Map fan-out bookkeeping.
//!
//! The parent execution keeps a `MapProgress` while its Map state is active.
//! Items start in index order up to the concurrency bound; results are
//! stored by item index so the aggregate keeps item order regardless of
//! completion order. The first failure fails the Map at once: queued items
//! never start and items still in flight are left to finish on their own.

use std::collections::BTreeMap;

use idprov_types::error::ErrorInfo;
use idprov_types::execution::{ItemFailure, MapProgress};
use idprov_types::path::PathError;
use idprov_types::workflow::MapState;
use serde_json::Value;
use uuid::Uuid;

use super::document::{self, DocumentError};

/// Aggregate state of a fan-out.
#[derive(Debug, Clone, PartialEq)]
pub enum MapStatus {
    Running,
    /// Every item succeeded; results in item order.
    Succeeded(Vec<Value>),
    Failed(ItemFailure),
}

/// How one item execution ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Succeeded(Value),
    Failed(ErrorInfo),
}

/// Build the seed document of every item.
pub fn seed_items(map: &MapState, doc: &Value) -> Result<Vec<Value>, DocumentError> {
    let items = document::read(doc, &map.items_path)?;
    let Value::Array(items) = items else {
        return Err(PathError::TypeMismatch {
            path: map.items_path.to_string(),
            expected: "array",
            found: match items {
                Value::Object(_) => "object",
                Value::String(_) => "string",
                Value::Number(_) => "number",
                Value::Bool(_) => "boolean",
                _ => "null",
            },
        }
        .into());
    };

    items
        .iter()
        .map(|item| match &map.item_selector {
            Some(selector) => document::render(selector, doc, Some(item)),
            None => Ok(item.clone()),
        })
        .collect()
}

/// Fresh progress for one entry into `state`.
pub fn plan(state: &str, items: Vec<Value>, concurrency: usize) -> MapProgress {
    let results = vec![None; items.len()];
    MapProgress {
        instance: Uuid::now_v7(),
        state: state.to_string(),
        items,
        concurrency,
        next_index: 0,
        in_flight: BTreeMap::new(),
        results,
        failure: None,
    }
}

/// Items that may start now, as `(index, seed)`. Advances `next_index`.
///
/// Returns nothing once the Map has failed.
pub fn take_startable(progress: &mut MapProgress) -> Vec<(usize, Value)> {
    if progress.failure.is_some() {
        return Vec::new();
    }
    let limit = if progress.concurrency == 0 {
        usize::MAX
    } else {
        progress.concurrency
    };
    let mut out = Vec::new();
    while progress.in_flight.len() + out.len() < limit && progress.next_index < progress.items.len() {
        let index = progress.next_index;
        out.push((index, progress.items[index].clone()));
        progress.next_index += 1;
    }
    out
}

pub fn record_started(progress: &mut MapProgress, index: usize, execution_id: Uuid) {
    progress.in_flight.insert(index, execution_id);
}

/// Fold a finished item into the progress.
///
/// Returns false when the item was not in flight (a duplicate or late
/// completion), in which case nothing changes.
pub fn record_finished(progress: &mut MapProgress, index: usize, outcome: ItemOutcome) -> bool {
    if progress.in_flight.remove(&index).is_none() {
        return false;
    }
    match outcome {
        ItemOutcome::Succeeded(doc) => {
            if let Some(slot) = progress.results.get_mut(index) {
                *slot = Some(doc);
            }
        }
        ItemOutcome::Failed(error) => {
            if progress.failure.is_none() {
                progress.failure = Some(ItemFailure {
                    item_index: index,
                    error,
                });
            }
        }
    }
    true
}

pub fn status(progress: &MapProgress) -> MapStatus {
    if let Some(failure) = &progress.failure {
        return MapStatus::Failed(failure.clone());
    }
    if progress.next_index < progress.items.len() || !progress.in_flight.is_empty() {
        return MapStatus::Running;
    }
    let results = progress
        .results
        .iter()
        .map(|r| r.clone().unwrap_or(Value::Null))
        .collect();
    MapStatus::Succeeded(results)
}
