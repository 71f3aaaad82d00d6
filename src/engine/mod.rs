//! Contract with the geometry/topology engine that owns the physical dataset.
//!
//! The map core never touches dataset files itself. Everything it knows about
//! geometry and topology comes through a [`MapHandle`] obtained from a
//! [`GeometryEngine`]. [`MemoryEngine`] is a complete in-process engine, useful
//! for embedding and testing.

use crate::errors::Result;
use crate::geometry::Geometry;
use crate::identity::DatasetIdentity;
use crate::options::{FeatureType, OpenMode};
use crate::topology::{TopoElement, TopologyInfo};

pub use self::memory::{MemoryDataset, MemoryEngine};

mod memory;

pub type LineId = u32;
pub type NodeId = u32;
pub type AreaId = i32;
/// Attribute link (layer) number.
pub type Field = i32;
pub type Category = i32;

/// What kind of element an id passed to [`MapHandle::read_geometry`] refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Line,
    Node,
    Area,
}

/// Type of an attribute column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Double,
    Text,
    Date,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

/// Link between a field and an attribute table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DbLink {
    pub field: Field,
    pub table: String,
    pub key: String,
    pub columns: Vec<Column>,
}

/// Summary of one field as seen by the engine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LayerInfo {
    pub link: Option<DbLink>,
    /// Types of features having at least one category in the field.
    pub feature_types: FeatureType,
    pub category_count: usize,
}

/// A line to be written by an edit session.
#[derive(Clone, Debug, PartialEq)]
pub struct LineRecord {
    pub feature_type: FeatureType,
    pub geometry: Geometry,
    pub cats: Vec<(Field, Category)>,
}

impl LineRecord {
    pub fn new(feature_type: FeatureType, geometry: impl Into<Geometry>) -> Self {
        LineRecord {
            feature_type,
            geometry: geometry.into(),
            cats: Vec::new(),
        }
    }

    pub fn with_cat(mut self, field: Field, cat: Category) -> Self {
        self.cats.push((field, cat));
        self
    }
}

/// Opens datasets. Implementations must be shareable across threads.
pub trait GeometryEngine: Send + Sync {
    fn open(&self, identity: &DatasetIdentity, mode: OpenMode) -> Result<Box<dyn MapHandle>>;
}

/// An open dataset.
///
/// Reads may be issued from several threads at once. While an edit session is
/// active the map core serializes writes against reads going through the map,
/// but a read which started just before the session may still overlap the
/// first write. Implementations must keep their state consistent under
/// concurrent reads and writes, [`MemoryEngine`] handles use a `RwLock`.
pub trait MapHandle: Send + Sync {
    fn is_3d(&self) -> bool;

    /// Number of line slots, dead (deleted or rewritten) slots included.
    fn line_count(&self) -> usize;

    fn node_count(&self) -> usize;

    /// Type of a live line, `None` for dead or unknown ids.
    fn line_type(&self, lid: LineId) -> Option<FeatureType>;

    /// Geometry of a line, node or area. `None` if the id does not exist or
    /// is not of the requested kind.
    fn read_geometry(&self, id: u32, kind: ElementKind) -> Option<Geometry>;

    fn topology(&self, element: TopoElement) -> Option<TopologyInfo>;

    /// Fields which have a link or categories.
    fn fields(&self) -> Vec<Field>;

    fn layer_info(&self, field: Field) -> Option<LayerInfo>;

    /// Switch the dataset to update mode for an edit session.
    fn begin_update(&self) -> Result<()>;

    fn write_line(&self, record: &LineRecord) -> Result<LineId>;

    /// Replace a line. The returned id may differ from `lid`.
    fn rewrite_line(&self, lid: LineId, record: &LineRecord) -> Result<LineId>;

    fn delete_line(&self, lid: LineId) -> Result<()>;

    /// Rebuild topology and persist pending changes.
    fn build(&self) -> Result<()>;

    /// Release the dataset. The handle is unusable afterwards even when an
    /// error is reported.
    fn close(&self) -> Result<()>;
}
