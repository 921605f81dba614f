//! Parent-chain index over a build timeline
//!
//! Timeline records arrive as a flat list where each record may point at its
//! parent through `parentId`. `TimelineGraph` indexes them by id so that
//! - a record can be looked up in O(1)
//! - parent chains can be walked in O(depth), even when the data contains a cycle
//! - the leaves of any subset of records can be computed in O(|subset|)

use std::collections::{HashMap, HashSet};

use crate::models::TimelineRecord;

/// Id → position index over a timeline's records.
#[derive(Debug)]
pub struct TimelineGraph<'a> {
    records: &'a [TimelineRecord],
    index: HashMap<&'a str, usize>,
}

impl<'a> TimelineGraph<'a> {
    /// Index `records` by id. Records without an id are not indexed; for
    /// duplicate ids the first occurrence wins.
    pub fn new(records: &'a [TimelineRecord]) -> Self {
        let mut index = HashMap::with_capacity(records.len());

        for (position, record) in records.iter().enumerate() {
            let Some(id) = record.id.as_deref() else {
                tracing::debug!(position, "Timeline record without id, not indexed");
                continue;
            };
            if let Some(&first) = index.get(id) {
                tracing::warn!(
                    id,
                    first,
                    duplicate = position,
                    "Duplicate timeline record id, keeping first occurrence"
                );
                continue;
            }
            index.insert(id, position);
        }

        Self { records, index }
    }

    pub fn records(&self) -> &'a [TimelineRecord] {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record with the given id, if indexed.
    pub fn lookup(&self, id: &str) -> Option<&'a TimelineRecord> {
        self.index_of(id).map(|position| &self.records[position])
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Position of the parent of the record at `position`.
    pub fn parent_of(&self, position: usize) -> Option<usize> {
        let parent_id = self.records.get(position)?.parent_id.as_deref()?;
        self.index_of(parent_id)
    }

    /// Strict ancestors of `position`, nearest first.
    ///
    /// Stops at the first revisited record, so cyclic parent links terminate.
    pub fn ancestors(&self, position: usize) -> Ancestors<'_, 'a> {
        let mut seen = HashSet::new();
        seen.insert(position);
        Ancestors {
            graph: self,
            current: position,
            seen,
        }
    }

    /// Members of `subset` that are not the parent of any other member.
    ///
    /// The returned positions keep the order of `subset`.
    pub fn leaves_of(&self, subset: &[usize]) -> Vec<usize> {
        let parent_ids: HashSet<&str> = subset
            .iter()
            .filter_map(|&position| self.records.get(position)?.parent_id.as_deref())
            .collect();

        subset
            .iter()
            .copied()
            .filter(|&position| match self.records.get(position) {
                Some(record) => record
                    .id
                    .as_deref()
                    .map_or(true, |id| !parent_ids.contains(id)),
                None => false,
            })
            .collect()
    }

    /// Leaves of the whole timeline.
    pub fn leaves(&self) -> Vec<usize> {
        let all: Vec<usize> = (0..self.records.len()).collect();
        self.leaves_of(&all)
    }
}

/// Iterator over a record's ancestors, see [`TimelineGraph::ancestors`].
pub struct Ancestors<'g, 'a> {
    graph: &'g TimelineGraph<'a>,
    current: usize,
    seen: HashSet<usize>,
}

impl Iterator for Ancestors<'_, '_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let parent = self.graph.parent_of(self.current)?;
        if !self.seen.insert(parent) {
            tracing::warn!(
                position = parent,
                "Cycle in timeline parent links, stopping walk"
            );
            return None;
        }
        self.current = parent;
        Some(parent)
    }
}
