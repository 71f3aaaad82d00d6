use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use crate::engine::{Column, DbLink, Field, MapHandle};
use crate::options::FeatureType;

/// Field scoped view of a [`crate::VectorMap`].
///
/// A layer holds attribute and type metadata only, geometry is always read
/// through the owning map. Layers are shared by every consumer of the same
/// field and live as long as somebody uses them, see
/// [`crate::VectorMap::open_layer`] and [`crate::VectorMap::close_layer`].
#[derive(Debug)]
pub struct VectorMapLayer {
    field: Field,
    users: AtomicUsize,
    metadata: RwLock<LayerMetadata>,
}

/// Metadata loaded from the engine for one field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LayerMetadata {
    /// The field exists in the map and the map was open when loading.
    pub valid: bool,
    pub link: Option<DbLink>,
    pub feature_types: FeatureType,
    pub category_count: usize,
}

impl VectorMapLayer {
    pub(crate) fn new(field: Field) -> Self {
        VectorMapLayer {
            field,
            users: AtomicUsize::new(0),
            metadata: RwLock::new(LayerMetadata::default()),
        }
    }

    pub fn field(&self) -> Field {
        self.field
    }

    pub fn user_count(&self) -> usize {
        self.users.load(Ordering::SeqCst)
    }

    pub fn is_valid(&self) -> bool {
        self.metadata.read().valid
    }

    pub fn metadata(&self) -> LayerMetadata {
        self.metadata.read().clone()
    }

    pub fn has_table(&self) -> bool {
        self.metadata.read().link.is_some()
    }

    pub fn table_name(&self) -> Option<String> {
        self.metadata.read().link.as_ref().map(|l| l.table.clone())
    }

    pub fn key_column(&self) -> Option<String> {
        self.metadata.read().link.as_ref().map(|l| l.key.clone())
    }

    pub fn columns(&self) -> Vec<Column> {
        self.metadata
            .read()
            .link
            .as_ref()
            .map(|l| l.columns.clone())
            .unwrap_or_default()
    }

    pub fn feature_types(&self) -> FeatureType {
        self.metadata.read().feature_types
    }

    pub(crate) fn add_user(&self) -> usize {
        self.users.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the remaining number of users.
    pub(crate) fn remove_user(&self) -> usize {
        let previous = self
            .users
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// (Re)load metadata, keeping the field. Without a handle the layer
    /// becomes invalid.
    pub(crate) fn load(&self, handle: Option<&dyn MapHandle>) {
        let metadata = match handle.and_then(|h| h.layer_info(self.field)) {
            Some(info) => LayerMetadata {
                valid: true,
                link: info.link,
                feature_types: info.feature_types,
                category_count: info.category_count,
            },
            None => LayerMetadata::default(),
        };
        debug!(
            field = self.field,
            valid = metadata.valid,
            categories = metadata.category_count,
            "Loaded layer"
        );
        *self.metadata.write() = metadata;
    }

    pub(crate) fn clear(&self) {
        *self.metadata.write() = LayerMetadata::default();
    }
}
