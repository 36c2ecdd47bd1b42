//! Category-tree flattening.
//!
//! The operator describes number categories as a small tree (a handful of
//! top-level tariffs, some with sub-items). The search endpoint wants a flat
//! id list, with each parent id appearing before its children — the first id
//! of a node's span is treated upstream as the "whole category" id, so the
//! ordering is part of the wire contract, not cosmetics.

use std::collections::{HashMap, HashSet};

use crate::error::HarvestError;
use crate::models::CategoryDef;

/// Read-only view derived from the configured tree. Built once at startup.
#[derive(Debug, Clone, Default)]
pub struct CategoryIndex {
    /// All ids, depth-first, parent before children.
    pub id_set: Vec<u32>,
    /// Known tariff per id. Only local bookkeeping; never sent on the wire.
    pub price_by_id: HashMap<u32, u32>,
}

impl CategoryIndex {
    pub fn price(&self, id: u32) -> Option<u32> {
        self.price_by_id.get(&id).copied()
    }
}

/// Flatten the configured tree into a [`CategoryIndex`].
///
/// Fails when any id appears twice anywhere in the tree. A blank or
/// non-numeric price is not an error — the node just has no price entry.
pub fn build(defs: &[CategoryDef]) -> Result<CategoryIndex, HarvestError> {
    let mut index = CategoryIndex::default();
    let mut seen = HashSet::new();

    for def in defs {
        flatten(def, &mut index, &mut seen)?;
    }

    Ok(index)
}

fn flatten(
    def: &CategoryDef,
    index: &mut CategoryIndex,
    seen: &mut HashSet<u32>,
) -> Result<(), HarvestError> {
    if !seen.insert(def.id) {
        return Err(HarvestError::Config(format!(
            "duplicate category id {} ({})",
            def.id, def.name
        )));
    }

    index.id_set.push(def.id);

    if def.items.is_empty() {
        if let Some(price) = def.price.as_deref().and_then(parse_price) {
            index.price_by_id.insert(def.id, price);
        }
    } else {
        // A node with children prices through its children, not itself.
        for item in &def.items {
            if let Some(price) = item.price.as_deref().and_then(parse_price) {
                index.price_by_id.insert(item.id, price);
            }
        }
    }

    for item in &def.items {
        flatten(item, index, seen)?;
    }

    Ok(())
}

/// Parse a tariff string: plain integer, or integer with space / NBSP group
/// separators ("30 000"). Anything else is "no price".
pub fn parse_price(s: &str) -> Option<u32> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(n) = trimmed.parse::<u32>() {
        return Some(n);
    }

    let normalized: String = trimmed
        .chars()
        .filter(|c| *c != ' ' && *c != '\u{00A0}')
        .collect();

    // Only accept it if stripping separators leaves pure digits; "1 000 som"
    // must not silently become 1000.
    let stripped_only_separators = trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || c == ' ' || c == '\u{00A0}');

    if stripped_only_separators {
        normalized.parse().ok()
    } else {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
