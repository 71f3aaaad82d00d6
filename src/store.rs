use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::engine::GeometryEngine;
use crate::errors::Result;
use crate::identity::DatasetIdentity;
use crate::map::VectorMap;
use crate::options::MapOptions;

/// Registry holding at most one [`VectorMap`] per dataset identity.
///
/// The store is meant to live as long as the process (or the part of it
/// working with maps) and to be passed to whoever needs maps. Entries are
/// never evicted. Dropping the store closes every map it created.
///
/// ```
/// use std::sync::Arc;
/// use vmap::engine::{MemoryDataset, MemoryEngine};
/// use vmap::{DatasetIdentity, MapOptions, VectorMapStore};
///
/// let engine = Arc::new(MemoryEngine::new());
/// let identity = DatasetIdentity::new("world", "PERMANENT", "rivers");
/// engine.insert(identity.clone(), MemoryDataset::new());
///
/// let store = VectorMapStore::new(engine, MapOptions::default());
/// let map = store.open_map(&identity);
/// assert!(Arc::ptr_eq(&map, &store.open_map(&identity)));
///
/// map.open().unwrap();
/// assert!(map.is_valid());
/// ```
pub struct VectorMapStore {
    engine: Arc<dyn GeometryEngine>,
    options: MapOptions,
    maps: Mutex<HashMap<DatasetIdentity, Arc<VectorMap>>>,
}

impl VectorMapStore {
    pub fn new(engine: Arc<dyn GeometryEngine>, options: MapOptions) -> Self {
        VectorMapStore {
            engine,
            options,
            maps: Mutex::new(HashMap::new()),
        }
    }

    /// Store with options taken from the runtime configuration.
    pub fn from_config(engine: Arc<dyn GeometryEngine>) -> Result<Self> {
        Ok(Self::new(engine, MapOptions::from_config()?))
    }

    pub fn options(&self) -> &MapOptions {
        &self.options
    }

    /// Get the map of `identity`, creating it if needed.
    ///
    /// A new map is not opened. An existing map is returned as is and may be
    /// invalid, check [`VectorMap::is_valid`].
    pub fn open_map(&self, identity: &DatasetIdentity) -> Arc<VectorMap> {
        let mut maps = self.maps.lock();
        if let Some(map) = maps.get(identity) {
            debug!(map = %identity, "Map found in store");
            return Arc::clone(map);
        }
        debug!(map = %identity, "Creating new map");
        let map = Arc::new(VectorMap::new(
            identity.clone(),
            Arc::clone(&self.engine),
            &self.options,
        ));
        maps.insert(identity.clone(), Arc::clone(&map));
        map
    }

    /// The map of `identity` if it was created already.
    pub fn get(&self, identity: &DatasetIdentity) -> Option<Arc<VectorMap>> {
        self.maps.lock().get(identity).cloned()
    }

    pub fn maps(&self) -> Vec<Arc<VectorMap>> {
        self.maps.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.maps.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.lock().is_empty()
    }
}

impl Drop for VectorMapStore {
    fn drop(&mut self) {
        for (identity, map) in self.maps.get_mut().drain() {
            debug!(map = %identity, "Releasing map");
            map.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::engine::MemoryEngine;
    use crate::test_utils::{roads_dataset, roads_identity};

    #[test]
    fn test_same_identity_same_map() {
        let store = VectorMapStore::new(Arc::new(MemoryEngine::new()), MapOptions::default());
        let a = store.open_map(&roads_identity());
        let b = store.open_map(&DatasetIdentity::new("spearfish", "PERMANENT", "roads"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);

        let other = store.open_map(&DatasetIdentity::new("spearfish", "user1", "roads"));
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_new_map_is_not_opened() {
        let engine = Arc::new(MemoryEngine::new());
        engine.insert(roads_identity(), roads_dataset());
        let store = VectorMapStore::new(engine.clone(), MapOptions::default());
        let map = store.open_map(&roads_identity());
        assert!(!map.is_valid());
        assert!(!map.is_open());
        assert_eq!(engine.open_count(&roads_identity()), 0);
    }

    #[test]
    fn test_concurrent_open_map() {
        let store = Arc::new(VectorMapStore::new(
            Arc::new(MemoryEngine::new()),
            MapOptions::default(),
        ));
        let maps: Vec<Arc<VectorMap>> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.open_map(&roads_identity()))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();
        assert!(maps.iter().all(|map| Arc::ptr_eq(map, &maps[0])));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_drop_closes_maps() {
        let engine = Arc::new(MemoryEngine::new());
        engine.insert(roads_identity(), roads_dataset());
        let store = VectorMapStore::new(engine.clone(), MapOptions::default());
        let map = store.open_map(&roads_identity());
        map.open().unwrap();
        assert_eq!(engine.open_handles(&roads_identity()), 1);

        drop(store);
        assert!(!map.is_valid());
        assert_eq!(engine.open_handles(&roads_identity()), 0);
    }

    #[test]
    fn test_start_frozen_option() {
        let options = MapOptions {
            start_frozen: true,
            ..MapOptions::default()
        };
        let store = VectorMapStore::new(Arc::new(MemoryEngine::new()), options);
        assert!(store.open_map(&roads_identity()).is_frozen());
        assert!(store.get(&roads_identity()).is_some());
        assert_eq!(store.maps().len(), 1);
    }
}
