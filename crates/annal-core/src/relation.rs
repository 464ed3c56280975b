//! Relation descriptors and the name→relation index the query planner
//! consults.
//!
//! The index is an explicit extension point: the planner rebuilds it lazily
//! and repeatedly, and every contributor — reverse foreign keys and the
//! retrofitted history relation alike — registers entries if absent, so a
//! rebuild reapplies deterministically without clobbering earlier entries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One traversable relation: joins `source` rows to `target` rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescriptor {
  /// Model on which the lookup name is usable.
  pub source:        String,
  /// Related model reached through the join.
  pub target:        String,
  /// Join column on the source model's table.
  pub source_column: String,
  /// Join column on the target model's table.
  pub target_column: String,
}

/// Per-model lookup index.
#[derive(Debug, Default, Clone)]
pub struct RelationIndex {
  entries: BTreeMap<String, RelationDescriptor>,
}

impl RelationIndex {
  pub fn new() -> Self { Self::default() }

  /// Register `descriptor` under `name` unless the name is already mapped.
  pub fn register(&mut self, name: &str, descriptor: RelationDescriptor) {
    self.entries.entry(name.to_owned()).or_insert(descriptor);
  }

  pub fn get(&self, name: &str) -> Option<&RelationDescriptor> {
    self.entries.get(name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn descriptor(target: &str) -> RelationDescriptor {
    RelationDescriptor {
      source:        "A".to_owned(),
      target:        target.to_owned(),
      source_column: "id".to_owned(),
      target_column: "a_id".to_owned(),
    }
  }

  #[test]
  fn register_is_first_writer_wins() {
    let mut index = RelationIndex::new();
    index.register("rel", descriptor("B"));
    index.register("rel", descriptor("C"));
    assert_eq!(index.get("rel").map(|d| d.target.as_str()), Some("B"));
  }
}
