use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use geo_types::{Coord, Point, Polygon};
use parking_lot::{Mutex, RwLock};

use super::{
    AreaId, DbLink, ElementKind, Field, GeometryEngine, LayerInfo, LineId, LineRecord, MapHandle,
    NodeId,
};
use crate::errors::{Result, VmapError};
use crate::geometry::Geometry;
use crate::identity::DatasetIdentity;
use crate::options::{FeatureType, OpenMode};
use crate::topology::{TopoElement, TopologyInfo};

#[derive(Clone, Debug)]
struct MemoryLine {
    record: LineRecord,
    left: AreaId,
    right: AreaId,
    centroid_area: AreaId,
}

#[derive(Clone, Debug)]
struct MemoryArea {
    polygon: Polygon<f64>,
    centroid: LineId,
}

/// Topological dataset kept in memory.
///
/// Line, node and area ids are 1-based. Deleted and rewritten lines leave a
/// dead slot behind, a rewritten line gets a new id at the end.
#[derive(Clone, Debug, Default)]
pub struct MemoryDataset {
    is_3d: bool,
    lines: Vec<Option<MemoryLine>>,
    nodes: Vec<Coord<f64>>,
    areas: Vec<Option<MemoryArea>>,
    links: Vec<DbLink>,
}

fn slot(id: u32) -> Option<usize> {
    (id as usize).checked_sub(1)
}

fn next_id(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

impl MemoryDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_3d(&mut self, is_3d: bool) {
        self.is_3d = is_3d;
    }

    pub fn add_line(&mut self, record: LineRecord) -> LineId {
        self.add_nodes(&record.geometry, record.feature_type);
        self.lines.push(Some(MemoryLine {
            record,
            left: 0,
            right: 0,
            centroid_area: 0,
        }));
        next_id(self.lines.len())
    }

    /// Add a node without any line attached.
    pub fn add_node(&mut self, point: Point<f64>) -> NodeId {
        self.node_at(point.0)
    }

    /// Add an area bounded by `boundaries`. Each boundary gets the area on its
    /// left side if that side is still free, on its right side otherwise.
    pub fn add_area(&mut self, polygon: Polygon<f64>, boundaries: &[LineId]) -> AreaId {
        self.areas.push(Some(MemoryArea {
            polygon,
            centroid: 0,
        }));
        let area = AreaId::try_from(self.areas.len()).unwrap_or(AreaId::MAX);
        for &lid in boundaries {
            if let Some(line) = self.line_mut(lid) {
                if line.left == 0 {
                    line.left = area;
                } else {
                    line.right = area;
                }
            }
        }
        area
    }

    /// Put `centroid` into `area`. A second centroid in the same area is
    /// recorded as a duplicate.
    pub fn attach_centroid(&mut self, centroid: LineId, area: AreaId) {
        let free = match self.area_mut(area) {
            Some(a) if a.centroid == 0 => {
                a.centroid = centroid;
                true
            }
            Some(_) => false,
            None => return,
        };
        if let Some(line) = self.line_mut(centroid) {
            line.centroid_area = if free { area } else { -area };
        }
    }

    pub fn add_link(&mut self, link: DbLink) {
        self.links.retain(|l| l.field != link.field);
        self.links.push(link);
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn line(&self, lid: LineId) -> Option<&LineRecord> {
        slot(lid)
            .and_then(|i| self.lines.get(i))
            .and_then(Option::as_ref)
            .map(|line| &line.record)
    }

    fn line_mut(&mut self, lid: LineId) -> Option<&mut MemoryLine> {
        slot(lid)
            .and_then(|i| self.lines.get_mut(i))
            .and_then(Option::as_mut)
    }

    fn area_mut(&mut self, area: AreaId) -> Option<&mut MemoryArea> {
        u32::try_from(area)
            .ok()
            .and_then(slot)
            .and_then(|i| self.areas.get_mut(i))
            .and_then(Option::as_mut)
    }

    fn node_at(&mut self, coord: Coord<f64>) -> NodeId {
        if let Some(i) = self.nodes.iter().position(|&n| n == coord) {
            return next_id(i + 1);
        }
        self.nodes.push(coord);
        next_id(self.nodes.len())
    }

    fn add_nodes(&mut self, geometry: &Geometry, feature_type: FeatureType) {
        if !feature_type.intersects(FeatureType::LINES) {
            return;
        }
        if let Geometry::Line(line) = geometry {
            if let (Some(&first), Some(&last)) = (line.0.first(), line.0.last()) {
                self.node_at(first);
                self.node_at(last);
            }
        }
    }

    fn rewrite(&mut self, lid: LineId, record: LineRecord) -> Result<LineId> {
        let old = slot(lid)
            .and_then(|i| self.lines.get_mut(i))
            .and_then(Option::take)
            .ok_or(VmapError::UnknownLine(lid))?;
        self.add_nodes(&record.geometry, record.feature_type);
        self.lines.push(Some(MemoryLine { record, ..old }));
        let new_lid = next_id(self.lines.len());
        if old.centroid_area > 0 {
            if let Some(area) = self.area_mut(old.centroid_area) {
                area.centroid = new_lid;
            }
        }
        Ok(new_lid)
    }

    fn delete(&mut self, lid: LineId) -> Result<()> {
        let old = slot(lid)
            .and_then(|i| self.lines.get_mut(i))
            .and_then(Option::take)
            .ok_or(VmapError::UnknownLine(lid))?;
        if old.centroid_area > 0 {
            if let Some(area) = self.area_mut(old.centroid_area) {
                area.centroid = 0;
            }
        }
        Ok(())
    }

    fn node_lines(&self, coord: Coord<f64>) -> usize {
        self.lines
            .iter()
            .flatten()
            .filter(|line| line.record.feature_type.intersects(FeatureType::LINES))
            .filter_map(|line| line.record.geometry.as_line())
            .map(|ls| {
                let ends = [ls.0.first(), ls.0.last()];
                ends.iter().filter(|end| **end == Some(&coord)).count()
            })
            .sum()
    }

    fn topology(&self, element: TopoElement) -> Option<TopologyInfo> {
        match element {
            TopoElement::Line(lid) => {
                let line = slot(lid).and_then(|i| self.lines.get(i))?.as_ref()?;
                let ty = line.record.feature_type;
                if ty == FeatureType::POINT {
                    Some(TopologyInfo::Point)
                } else if ty == FeatureType::LINE {
                    Some(TopologyInfo::Line)
                } else if ty == FeatureType::BOUNDARY {
                    Some(TopologyInfo::Boundary {
                        left: line.left,
                        right: line.right,
                    })
                } else if ty == FeatureType::CENTROID {
                    Some(TopologyInfo::Centroid {
                        area: line.centroid_area,
                    })
                } else {
                    None
                }
            }
            TopoElement::Node(nid) => {
                let coord = *slot(nid).and_then(|i| self.nodes.get(i))?;
                Some(TopologyInfo::Node {
                    lines: self.node_lines(coord),
                })
            }
        }
    }

    fn read_geometry(&self, id: u32, kind: ElementKind) -> Option<Geometry> {
        let i = slot(id)?;
        match kind {
            ElementKind::Line => self
                .lines
                .get(i)?
                .as_ref()
                .map(|line| line.record.geometry.clone()),
            ElementKind::Node => self.nodes.get(i).map(|&c| Geometry::Point(Point(c))),
            ElementKind::Area => self
                .areas
                .get(i)?
                .as_ref()
                .map(|area| Geometry::Polygon(area.polygon.clone())),
        }
    }

    fn fields(&self) -> Vec<Field> {
        let mut fields: BTreeSet<Field> = self.links.iter().map(|l| l.field).collect();
        fields.extend(
            self.lines
                .iter()
                .flatten()
                .flat_map(|line| line.record.cats.iter().map(|&(field, _)| field)),
        );
        fields.into_iter().collect()
    }

    fn layer_info(&self, field: Field) -> Option<LayerInfo> {
        let link = self.links.iter().find(|l| l.field == field).cloned();
        let mut feature_types = FeatureType::empty();
        let mut cats = BTreeSet::new();
        for line in self.lines.iter().flatten() {
            for &(f, cat) in &line.record.cats {
                if f == field {
                    feature_types |= line.record.feature_type;
                    cats.insert(cat);
                }
            }
        }
        if link.is_none() && cats.is_empty() {
            return None;
        }
        Some(LayerInfo {
            link,
            feature_types,
            category_count: cats.len(),
        })
    }
}

/// State shared by the engine and every handle open on one dataset.
#[derive(Debug, Default)]
struct DatasetEntry {
    persisted: RwLock<MemoryDataset>,
    open_error: Mutex<Option<String>>,
    close_error: Mutex<Option<String>>,
    open_handles: AtomicUsize,
    open_count: AtomicUsize,
}

/// Engine serving [`MemoryDataset`]s registered by identity.
///
/// Every handle works on its own snapshot of the dataset, taken at open time,
/// so changes made through [`MemoryEngine::modify`] are only seen after a
/// reopen, like changes made by an external process to files on disk.
/// [`MapHandle::build`] publishes the edits of an update handle.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    entries: Mutex<HashMap<DatasetIdentity, Arc<DatasetEntry>>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `dataset`, replacing any dataset with the same identity.
    pub fn insert(&self, identity: DatasetIdentity, dataset: MemoryDataset) {
        let entry = Arc::clone(self.entries.lock().entry(identity).or_default());
        *entry.persisted.write() = dataset;
    }

    /// Change a registered dataset behind the back of open handles.
    pub fn modify<F>(&self, identity: &DatasetIdentity, f: F) -> bool
    where
        F: FnOnce(&mut MemoryDataset),
    {
        match self.entry(identity) {
            Some(entry) => {
                f(&mut entry.persisted.write());
                true
            }
            None => false,
        }
    }

    /// Persisted state of a dataset.
    pub fn dataset(&self, identity: &DatasetIdentity) -> Option<MemoryDataset> {
        self.entry(identity)
            .map(|entry| entry.persisted.read().clone())
    }

    /// Make subsequent opens of `identity` fail with `msg`, `None` to clear.
    pub fn fail_open(&self, identity: &DatasetIdentity, msg: Option<&str>) {
        if let Some(entry) = self.entry(identity) {
            *entry.open_error.lock() = msg.map(str::to_string);
        }
    }

    /// Make closes of `identity` report `msg`, `None` to clear.
    pub fn fail_close(&self, identity: &DatasetIdentity, msg: Option<&str>) {
        if let Some(entry) = self.entry(identity) {
            *entry.close_error.lock() = msg.map(str::to_string);
        }
    }

    /// Number of handles currently open on `identity`.
    pub fn open_handles(&self, identity: &DatasetIdentity) -> usize {
        self.entry(identity)
            .map_or(0, |entry| entry.open_handles.load(Ordering::SeqCst))
    }

    /// Number of successful opens of `identity` so far.
    pub fn open_count(&self, identity: &DatasetIdentity) -> usize {
        self.entry(identity)
            .map_or(0, |entry| entry.open_count.load(Ordering::SeqCst))
    }

    fn entry(&self, identity: &DatasetIdentity) -> Option<Arc<DatasetEntry>> {
        self.entries.lock().get(identity).cloned()
    }
}

impl GeometryEngine for MemoryEngine {
    fn open(&self, identity: &DatasetIdentity, mode: OpenMode) -> Result<Box<dyn MapHandle>> {
        let entry = self.entry(identity).ok_or_else(|| VmapError::OpenFailure {
            identity: identity.to_string(),
            msg: "dataset does not exist".to_string(),
        })?;
        if let Some(msg) = entry.open_error.lock().clone() {
            return Err(VmapError::OpenFailure {
                identity: identity.to_string(),
                msg,
            });
        }
        let working = entry.persisted.read().clone();
        entry.open_handles.fetch_add(1, Ordering::SeqCst);
        entry.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryHandle {
            entry,
            working: RwLock::new(working),
            mode: Mutex::new(mode),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryHandle {
    entry: Arc<DatasetEntry>,
    working: RwLock<MemoryDataset>,
    mode: Mutex<OpenMode>,
    closed: AtomicBool,
}

impl MemoryHandle {
    fn check_writable(&self, method_name: &'static str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VmapError::engine(method_name, "handle is closed"));
        }
        if *self.mode.lock() != OpenMode::Update {
            return Err(VmapError::engine(method_name, "dataset is open read-only"));
        }
        Ok(())
    }
}

impl MapHandle for MemoryHandle {
    fn is_3d(&self) -> bool {
        self.working.read().is_3d
    }

    fn line_count(&self) -> usize {
        self.working.read().lines.len()
    }

    fn node_count(&self) -> usize {
        self.working.read().nodes.len()
    }

    fn line_type(&self, lid: LineId) -> Option<FeatureType> {
        self.working.read().line(lid).map(|record| record.feature_type)
    }

    fn read_geometry(&self, id: u32, kind: ElementKind) -> Option<Geometry> {
        self.working.read().read_geometry(id, kind)
    }

    fn topology(&self, element: TopoElement) -> Option<TopologyInfo> {
        self.working.read().topology(element)
    }

    fn fields(&self) -> Vec<Field> {
        self.working.read().fields()
    }

    fn layer_info(&self, field: Field) -> Option<LayerInfo> {
        self.working.read().layer_info(field)
    }

    fn begin_update(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VmapError::engine("begin_update", "handle is closed"));
        }
        *self.mode.lock() = OpenMode::Update;
        Ok(())
    }

    fn write_line(&self, record: &LineRecord) -> Result<LineId> {
        self.check_writable("write_line")?;
        Ok(self.working.write().add_line(record.clone()))
    }

    fn rewrite_line(&self, lid: LineId, record: &LineRecord) -> Result<LineId> {
        self.check_writable("rewrite_line")?;
        self.working.write().rewrite(lid, record.clone())
    }

    fn delete_line(&self, lid: LineId) -> Result<()> {
        self.check_writable("delete_line")?;
        self.working.write().delete(lid)
    }

    fn build(&self) -> Result<()> {
        self.check_writable("build")?;
        *self.entry.persisted.write() = self.working.read().clone();
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.entry.open_handles.fetch_sub(1, Ordering::SeqCst);
        match self.entry.close_error.lock().clone() {
            Some(msg) => Err(VmapError::engine("close", msg)),
            None => Ok(()),
        }
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        // A handle dropped without close still gives its slot back.
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.entry.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use geo_types::{line_string, point, polygon};

    use super::*;
    use crate::engine::{Column, ColumnType};

    fn identity() -> DatasetIdentity {
        DatasetIdentity::new("loc", "PERMANENT", "roads")
    }

    fn two_roads() -> MemoryDataset {
        let mut dataset = MemoryDataset::new();
        dataset.add_line(
            LineRecord::new(
                FeatureType::LINE,
                line_string![(x: 0., y: 0.), (x: 1., y: 0.)],
            )
            .with_cat(1, 10),
        );
        dataset.add_line(
            LineRecord::new(
                FeatureType::LINE,
                line_string![(x: 1., y: 0.), (x: 2., y: 0.)],
            )
            .with_cat(1, 11),
        );
        dataset.add_link(DbLink {
            field: 1,
            table: "roads".to_string(),
            key: "cat".to_string(),
            columns: vec![Column {
                name: "label".to_string(),
                ty: ColumnType::Text,
            }],
        });
        dataset
    }

    #[test]
    fn test_open_unknown_dataset() {
        let engine = MemoryEngine::new();
        let err = engine.open(&identity(), OpenMode::ReadOnly).err().unwrap();
        assert!(matches!(err, VmapError::OpenFailure { .. }));
    }

    #[test]
    fn test_shared_node_topology() {
        let engine = MemoryEngine::new();
        engine.insert(identity(), two_roads());
        let handle = engine.open(&identity(), OpenMode::ReadOnly).unwrap();
        assert_eq!(handle.node_count(), 3);
        assert_eq!(
            handle.topology(TopoElement::Node(2)),
            Some(TopologyInfo::Node { lines: 2 })
        );
        assert_eq!(
            handle.topology(TopoElement::Node(1)),
            Some(TopologyInfo::Node { lines: 1 })
        );
        assert_eq!(handle.topology(TopoElement::Node(9)), None);
        assert_eq!(
            handle.read_geometry(2, ElementKind::Node),
            Some(Geometry::Point(point!(x: 1., y: 0.)))
        );
        handle.close().unwrap();
    }

    #[test]
    fn test_read_only_handle_rejects_writes() {
        let engine = MemoryEngine::new();
        engine.insert(identity(), two_roads());
        let handle = engine.open(&identity(), OpenMode::ReadOnly).unwrap();
        let record = LineRecord::new(FeatureType::POINT, point!(x: 5., y: 5.));
        assert!(handle.write_line(&record).is_err());
        handle.begin_update().unwrap();
        assert_eq!(handle.write_line(&record).unwrap(), 3);
    }

    #[test]
    fn test_rewrite_appends_new_id() {
        let engine = MemoryEngine::new();
        engine.insert(identity(), two_roads());
        let handle = engine.open(&identity(), OpenMode::Update).unwrap();
        let record = LineRecord::new(
            FeatureType::LINE,
            line_string![(x: 0., y: 0.), (x: 0., y: 1.)],
        );
        let new_lid = handle.rewrite_line(1, &record).unwrap();
        assert_eq!(new_lid, 3);
        assert_eq!(handle.read_geometry(1, ElementKind::Line), None);
        assert_eq!(handle.line_count(), 3);
        assert_eq!(
            handle.rewrite_line(1, &record),
            Err(VmapError::UnknownLine(1))
        );

        // not published before build
        assert_eq!(engine.dataset(&identity()).unwrap().line_count(), 2);
        handle.build().unwrap();
        assert_eq!(engine.dataset(&identity()).unwrap().line_count(), 3);
    }

    #[test]
    fn test_areas_and_centroids() {
        let mut dataset = MemoryDataset::new();
        let boundary = dataset.add_line(LineRecord::new(
            FeatureType::BOUNDARY,
            line_string![(x: 0., y: 0.), (x: 4., y: 0.), (x: 4., y: 4.), (x: 0., y: 0.)],
        ));
        let area = dataset.add_area(
            polygon![(x: 0., y: 0.), (x: 4., y: 0.), (x: 4., y: 4.)],
            &[boundary],
        );
        let first = dataset.add_line(LineRecord::new(FeatureType::CENTROID, point!(x: 3., y: 1.)));
        let second = dataset.add_line(LineRecord::new(FeatureType::CENTROID, point!(x: 3., y: 2.)));
        dataset.attach_centroid(first, area);
        dataset.attach_centroid(second, area);

        assert_eq!(
            dataset.topology(TopoElement::Line(boundary)),
            Some(TopologyInfo::Boundary { left: 1, right: 0 })
        );
        assert_eq!(
            dataset.topology(TopoElement::Line(first)),
            Some(TopologyInfo::Centroid { area: 1 })
        );
        assert_eq!(
            dataset.topology(TopoElement::Line(second)),
            Some(TopologyInfo::Centroid { area: -1 })
        );
        assert!(dataset.read_geometry(1, ElementKind::Area).is_some());
        assert_eq!(dataset.read_geometry(2, ElementKind::Area), None);
    }

    #[test]
    fn test_layer_info() {
        let dataset = two_roads();
        assert_eq!(dataset.fields(), vec![1]);
        let info = dataset.layer_info(1).unwrap();
        assert_eq!(info.category_count, 2);
        assert_eq!(info.feature_types, FeatureType::LINE);
        assert_eq!(info.link.unwrap().table, "roads");
        assert!(dataset.layer_info(2).is_none());
    }

    #[test]
    fn test_handle_accounting() {
        let engine = MemoryEngine::new();
        engine.insert(identity(), two_roads());
        engine.fail_close(&identity(), Some("disk gone"));
        let handle = engine.open(&identity(), OpenMode::ReadOnly).unwrap();
        assert_eq!(engine.open_handles(&identity()), 1);
        assert!(handle.close().is_err());
        assert_eq!(engine.open_handles(&identity()), 0);
        drop(handle);
        assert_eq!(engine.open_handles(&identity()), 0);
        assert_eq!(engine.open_count(&identity()), 1);
    }

    #[test]
    fn test_reads_overlapping_writes() {
        let engine = MemoryEngine::new();
        engine.insert(identity(), two_roads());
        let handle = engine.open(&identity(), OpenMode::Update).unwrap();
        let record = LineRecord::new(FeatureType::POINT, point!(x: 5., y: 5.));

        std::thread::scope(|scope| {
            let readers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        let mut last = 0;
                        for _ in 0..200 {
                            let count = handle.line_count();
                            assert!(count >= last);
                            last = count;
                            assert!(handle.read_geometry(1, ElementKind::Line).is_some());
                        }
                    })
                })
                .collect();
            for _ in 0..100 {
                handle.write_line(&record).unwrap();
            }
            for reader in readers {
                reader.join().unwrap();
            }
        });
        assert_eq!(handle.line_count(), 102);
    }
}
