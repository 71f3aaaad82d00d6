use std::collections::HashMap;

use tracing::trace;

use crate::engine::LineId;
use crate::geometry::Geometry;

/// Line id bookkeeping of one edit session.
///
/// A rewrite gives a line a new id. Ids are always tracked back to the
/// original id the line had when the session started, so that undo and diff
/// tooling can pair the current state with the pre-edit state:
///
/// * `old_to_new` maps an original id to the current id of the line,
/// * `new_to_old` is its inverse,
/// * `old_geometries` holds the pre-edit geometry of every original line
///   that was rewritten or deleted, captured before the first change.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EditLedger {
    old_to_new: HashMap<LineId, LineId>,
    new_to_old: HashMap<LineId, LineId>,
    old_geometries: HashMap<LineId, Geometry>,
}

impl EditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.old_to_new.clear();
        self.new_to_old.clear();
        self.old_geometries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.old_to_new.is_empty() && self.old_geometries.is_empty()
    }

    /// Original id of the line currently known as `lid`.
    pub fn original_id(&self, lid: LineId) -> LineId {
        self.new_to_old.get(&lid).copied().unwrap_or(lid)
    }

    /// Current id of the line originally known as `lid`, `None` when the line
    /// was deleted or never touched.
    pub fn current_id(&self, original: LineId) -> Option<LineId> {
        self.old_to_new.get(&original).copied()
    }

    pub fn old_to_new(&self) -> &HashMap<LineId, LineId> {
        &self.old_to_new
    }

    pub fn new_to_old(&self) -> &HashMap<LineId, LineId> {
        &self.new_to_old
    }

    pub fn old_geometries(&self) -> &HashMap<LineId, Geometry> {
        &self.old_geometries
    }

    pub fn old_geometry(&self, original: LineId) -> Option<&Geometry> {
        self.old_geometries.get(&original)
    }

    /// Whether the pre-edit geometry of the line currently known as `lid`
    /// still needs to be captured.
    pub fn needs_old_geometry(&self, lid: LineId) -> bool {
        !self.old_geometries.contains_key(&self.original_id(lid))
    }

    /// Keep the pre-edit geometry of the line currently known as `lid`. Only
    /// the first capture per original line is kept.
    pub fn capture_old_geometry(&mut self, lid: LineId, geometry: Geometry) {
        let original = self.original_id(lid);
        self.old_geometries.entry(original).or_insert(geometry);
    }

    /// Record that the line known as `old_lid` is now known as `new_lid`.
    pub fn record_rewrite(&mut self, old_lid: LineId, new_lid: LineId) {
        let original = self.original_id(old_lid);
        self.new_to_old.remove(&old_lid);
        self.old_to_new.insert(original, new_lid);
        self.new_to_old.insert(new_lid, original);
        trace!(old_lid, new_lid, original, "Recorded line rewrite");
    }

    /// Record that the line known as `lid` was deleted.
    pub fn record_delete(&mut self, lid: LineId) {
        let original = self.original_id(lid);
        self.new_to_old.remove(&lid);
        self.old_to_new.remove(&original);
        trace!(lid, original, "Recorded line delete");
    }

    /// Whether `old_to_new` and `new_to_old` are inverse of each other.
    pub fn is_consistent(&self) -> bool {
        self.old_to_new.len() == self.new_to_old.len()
            && self
                .old_to_new
                .iter()
                .all(|(old, new)| self.new_to_old.get(new) == Some(old))
    }
}
