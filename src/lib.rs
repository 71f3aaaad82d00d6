//! Shared, concurrent access to topological vector maps.
//!
//! A [`VectorMapStore`] hands out one [`VectorMap`] per dataset identity to
//! every consumer in the process. The map owns the open dataset (through a
//! [`engine::GeometryEngine`]), serializes structural operations, stops
//! running iterators before changing what they read, and tracks line ids
//! across edit sessions in an [`EditLedger`]. Consumers work through
//! field-scoped [`VectorMapLayer`]s.
//!
//! ## Use
//!
//! ```
//! use std::sync::Arc;
//! use geo_types::line_string;
//! use vmap::engine::{LineRecord, MemoryDataset, MemoryEngine};
//! use vmap::{DatasetIdentity, FeatureType, MapOptions, VectorMapStore};
//!
//! let identity = DatasetIdentity::new("world", "PERMANENT", "roads");
//! let mut dataset = MemoryDataset::new();
//! dataset.add_line(
//!     LineRecord::new(FeatureType::LINE, line_string![(x: 0., y: 0.), (x: 1., y: 1.)])
//!         .with_cat(1, 1),
//! );
//! let engine = Arc::new(MemoryEngine::new());
//! engine.insert(identity.clone(), dataset);
//!
//! let store = VectorMapStore::new(engine, MapOptions::default());
//! let map = store.open_map(&identity);
//! let layer = map.open_layer(1);
//! assert!(layer.is_valid());
//!
//! let token = map.register_iterator();
//! if let Some(_reading) = token.enter() {
//!     assert!(map.line_geometry(1).is_some());
//! }
//!
//! map.close_layer(&layer);
//! assert!(!map.is_valid());
//! ```

#![crate_name = "vmap"]
#![crate_type = "lib"]

mod broadcast;
pub mod config;
pub mod engine;
pub mod errors;
mod geometry;
mod identity;
mod layer;
mod ledger;
mod map;
mod options;
mod store;
mod topology;

pub use broadcast::{ForcedClose, IteratorBroadcast, IteratorId, IteratorToken, ReadSection};
pub use errors::{Result, VmapError};
pub use geometry::Geometry;
pub use identity::DatasetIdentity;
pub use layer::{LayerMetadata, VectorMapLayer};
pub use ledger::EditLedger;
pub use map::VectorMap;
pub use options::{FeatureType, MapOptions, OpenMode};
pub use store::VectorMapStore;
pub use topology::{TopoElement, TopoSymbol, TopologyInfo};

#[cfg(test)]
mod test_utils;
