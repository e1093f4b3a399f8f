//! Deterministic merging of repeated observations.
//!
//! Chunks may finish in any order, so precedence is decided by where an
//! observation sits in the document, never by when it arrived.

use std::collections::HashMap;

use okg_core::{PropertyMap, SourceLocation, NAME_PROPERTY};
use serde::{Deserialize, Serialize};

/// Position of an observation in document order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentOrder {
    pub chunk_index: usize,
    pub position: usize,
}

impl DocumentOrder {
    pub fn new(chunk_index: usize, position: usize) -> Self {
        Self {
            chunk_index,
            position,
        }
    }
}

/// Properties together with the document order of whoever wrote each value
#[derive(Debug, Clone, Default)]
pub(crate) struct RankedProperties {
    writers: HashMap<String, DocumentOrder>,
}

impl RankedProperties {
    /// Merge `incoming` into `target`; the earliest writer of a key wins.
    ///
    /// Returns the number of keys added or overwritten.
    pub(crate) fn merge(
        &mut self,
        target: &mut PropertyMap,
        incoming: &PropertyMap,
        order: DocumentOrder,
    ) -> usize {
        let mut changed = 0;

        for (key, value) in incoming {
            match self.writers.get(key) {
                Some(writer) if *writer <= order => {}
                _ => {
                    self.writers.insert(key.clone(), order);
                    if target.get(key) != Some(value) {
                        target.insert(key.clone(), value.clone());
                        changed += 1;
                    }
                }
            }
        }

        // Name first, then keys in the document order of their writers
        let writers = &self.writers;
        target.sort_by(|a, _, b, _| {
            let rank = |key: &String| (key != NAME_PROPERTY, writers.get(key).copied());
            rank(a).cmp(&rank(b))
        });

        changed
    }
}

/// Record a location once, keeping the list sorted
pub(crate) fn add_location(locations: &mut Vec<SourceLocation>, location: SourceLocation) -> bool {
    match locations.binary_search(&location) {
        Ok(_) => false,
        Err(pos) => {
            locations.insert(pos, location);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(pairs: &[(&str, serde_json::Value)]) -> PropertyMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_earliest_writer_wins_regardless_of_arrival() {
        let mut ranked = RankedProperties::default();
        let mut target = PropertyMap::new();

        // Chunk 2 arrives first
        ranked.merge(
            &mut target,
            &props(&[("name", json!("ist")), ("city", json!("Istanbul"))]),
            DocumentOrder::new(2, 0),
        );
        ranked.merge(
            &mut target,
            &props(&[("name", json!("IST")), ("country", json!("Turkey"))]),
            DocumentOrder::new(0, 1),
        );
        // A later writer never overrides
        let changed = ranked.merge(
            &mut target,
            &props(&[("name", json!("Ist"))]),
            DocumentOrder::new(5, 0),
        );

        assert_eq!(changed, 0);
        assert_eq!(target["name"], json!("IST"));
        assert_eq!(target["city"], json!("Istanbul"));
        let keys: Vec<&str> = target.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["name", "country", "city"]);
    }

    #[test]
    fn test_add_location_dedups_and_sorts() {
        let loc = |chunk_index, start_offset| SourceLocation {
            chunk_index,
            start_offset,
            end_offset: start_offset + 3,
        };
        let mut locations = Vec::new();

        assert!(add_location(&mut locations, loc(1, 20)));
        assert!(add_location(&mut locations, loc(0, 0)));
        assert!(!add_location(&mut locations, loc(1, 20)));

        assert_eq!(locations, vec![loc(0, 0), loc(1, 20)]);
    }
}
