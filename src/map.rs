use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::broadcast::{IteratorBroadcast, IteratorToken};
use crate::engine::{
    ElementKind, Field, GeometryEngine, LineId, LineRecord, MapHandle, NodeId,
};
use crate::errors::{Result, VmapError};
use crate::geometry::Geometry;
use crate::identity::DatasetIdentity;
use crate::layer::VectorMapLayer;
use crate::ledger::EditLedger;
use crate::options::{MapOptions, OpenMode};
use crate::topology::{TopoElement, TopoSymbol};

/// The open engine handle. Swapped as a whole by structural operations, so
/// readers never need the open/close lock to reach it.
struct Backing {
    handle: Box<dyn MapHandle>,
}

/// Timestamps and diagnostics. Leaf lock: nothing else is acquired while it
/// is held.
#[derive(Debug, Default)]
struct MapStatus {
    last_modified: Option<DateTime<Utc>>,
    last_attributes_modified: Option<DateTime<Utc>>,
    last_error: Option<VmapError>,
}

fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// One in-memory vector map, shared by every consumer of a dataset.
///
/// Obtained from [`crate::VectorMapStore::open_map`]. The map is a state
/// machine `closed -> open -> (editing) -> closed` with an orthogonal frozen
/// flag. Three locks are used:
///
/// * the open/close lock serializes every structural operation (open, close,
///   update, edit start/close, freeze/thaw), flags and `version` only change
///   while it is held,
/// * the open/close-layer lock guards the set of layers,
/// * the read/write lock is taken by geometry reads only while an edit session
///   is active, and by every edit write. It also guards the [`EditLedger`].
///
/// Lock order is open/close, then open/close-layer, then read/write. Before
/// changing or releasing the backing handle, structural operations run the
/// iterator broadcast without holding the read/write lock.
pub struct VectorMap {
    identity: DatasetIdentity,
    engine: Arc<dyn GeometryEngine>,
    dataset_dir: PathBuf,
    attribute_link: PathBuf,

    open_close: Mutex<()>,
    open_close_layer: Mutex<Vec<Arc<VectorMapLayer>>>,
    read_write: Mutex<EditLedger>,
    status: Mutex<MapStatus>,

    backing: ArcSwapOption<Backing>,
    valid: AtomicBool,
    open: AtomicBool,
    frozen: AtomicBool,
    editing: AtomicBool,
    is_3d: AtomicBool,
    version: AtomicU64,
    old_num_lines: AtomicUsize,
    direct_users: AtomicUsize,

    broadcast: IteratorBroadcast,
}

impl VectorMap {
    pub(crate) fn new(
        identity: DatasetIdentity,
        engine: Arc<dyn GeometryEngine>,
        options: &MapOptions,
    ) -> Self {
        let dataset_dir = identity.dataset_dir(&options.gisdbase);
        let attribute_link = dataset_dir.join(&options.attribute_link_file);
        VectorMap {
            identity,
            engine,
            dataset_dir,
            attribute_link,
            open_close: Mutex::new(()),
            open_close_layer: Mutex::new(Vec::new()),
            read_write: Mutex::new(EditLedger::new()),
            status: Mutex::new(MapStatus::default()),
            backing: ArcSwapOption::empty(),
            valid: AtomicBool::new(false),
            open: AtomicBool::new(false),
            frozen: AtomicBool::new(options.start_frozen),
            editing: AtomicBool::new(false),
            is_3d: AtomicBool::new(false),
            version: AtomicU64::new(0),
            old_num_lines: AtomicUsize::new(0),
            direct_users: AtomicUsize::new(0),
            broadcast: IteratorBroadcast::new(),
        }
    }

    pub fn identity(&self) -> &DatasetIdentity {
        &self.identity
    }

    /// Directory whose modification time tells whether the map is outdated.
    pub fn dataset_dir(&self) -> &Path {
        &self.dataset_dir
    }

    /// File whose modification time tells whether the attributes are outdated.
    pub fn attribute_link(&self) -> &Path {
        &self.attribute_link
    }

    /// The backing dataset is open and usable.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// An open was attempted (and not followed by a close), it may have failed.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    pub fn is_edited(&self) -> bool {
        self.editing.load(Ordering::SeqCst)
    }

    pub fn is_3d(&self) -> bool {
        self.is_3d.load(Ordering::SeqCst)
    }

    /// Generation of the in-memory state, increased by each
    /// [`close_edit`](Self::close_edit), [`update`](Self::update) and
    /// [`thaw`](Self::thaw).
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Number of lines when the current (or last) edit session started.
    pub fn old_num_lines(&self) -> usize {
        self.old_num_lines.load(Ordering::SeqCst)
    }

    pub fn num_lines(&self) -> usize {
        self.read(|handle| Some(handle.line_count())).unwrap_or(0)
    }

    /// Error of the last failed open, cleared by a successful one.
    pub fn last_error(&self) -> Option<VmapError> {
        self.status.lock().last_error.clone()
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.status.lock().last_modified
    }

    pub fn last_attributes_modified(&self) -> Option<DateTime<Utc>> {
        self.status.lock().last_attributes_modified
    }

    /// Channel used to stop iterators before structural changes.
    pub fn broadcast(&self) -> &IteratorBroadcast {
        &self.broadcast
    }

    /// Register an iterator reading this map.
    pub fn register_iterator(&self) -> IteratorToken {
        self.broadcast.register()
    }

    /// Number of consumers: users of all layers plus direct users.
    pub fn user_count(&self) -> usize {
        let layers = self.open_close_layer.lock();
        self.users(&layers)
    }

    fn users(&self, layers: &[Arc<VectorMapLayer>]) -> usize {
        layers.iter().map(|layer| layer.user_count()).sum::<usize>()
            + self.direct_users.load(Ordering::SeqCst)
    }

    /// Register a consumer which does not go through a layer.
    pub fn add_user(&self) {
        self.direct_users.fetch_add(1, Ordering::SeqCst);
    }

    /// Counterpart of [`add_user`](Self::add_user). Does not close the map.
    pub fn remove_user(&self) {
        let _ = self
            .direct_users
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
    }

    /// Layers currently in use.
    pub fn layers(&self) -> Vec<Arc<VectorMapLayer>> {
        self.open_close_layer.lock().clone()
    }

    /// Open the map if not yet open.
    ///
    /// Succeeds without doing anything if the map is already valid or frozen.
    /// A failure leaves the map invalid, the error stays available through
    /// [`last_error`](Self::last_error).
    pub fn open(&self) -> Result<()> {
        let _open_close = self.open_close.lock();
        self.open_locked()
    }

    fn open_locked(&self) -> Result<()> {
        if self.is_valid() {
            return Ok(());
        }
        if self.is_frozen() {
            debug!(map = %self.identity, "Map is frozen, open skipped");
            return Ok(());
        }
        let result = self.open_map();
        self.open.store(true, Ordering::SeqCst);
        self.reload_layers();
        result
    }

    /// Close the map. All iterators are closed first.
    ///
    /// Never fails, a close error of the engine is logged and the map is
    /// invalid afterwards anyway. An active edit session is abandoned.
    pub fn close(&self) {
        let _open_close = self.open_close.lock();
        self.close_locked();
    }

    fn close_locked(&self) {
        if self.is_frozen() {
            debug!(map = %self.identity, "Map is frozen, close skipped");
            return;
        }
        if !self.is_open() && self.backing.load().is_none() {
            return;
        }
        let _forced = self.broadcast.close_all_iterators();
        if self.editing.swap(false, Ordering::SeqCst) {
            warn!(map = %self.identity, "Closing map with an active edit session");
            self.read_write.lock().clear();
        }
        self.close_map();
        self.open.store(false, Ordering::SeqCst);
        for layer in self.open_close_layer.lock().iter() {
            layer.clear();
        }
        debug!(map = %self.identity, "Map closed");
    }

    /// Open the backing dataset, the caller holds the open/close lock.
    fn open_map(&self) -> Result<()> {
        let mode = if self.is_edited() {
            OpenMode::Update
        } else {
            OpenMode::ReadOnly
        };
        match self.engine.open(&self.identity, mode) {
            Ok(handle) => {
                self.is_3d.store(handle.is_3d(), Ordering::SeqCst);
                self.backing.store(Some(Arc::new(Backing { handle })));
                self.valid.store(true, Ordering::SeqCst);
                let mut status = self.status.lock();
                status.last_modified = modified_time(&self.dataset_dir);
                status.last_attributes_modified = modified_time(&self.attribute_link);
                status.last_error = None;
                debug!(map = %self.identity, is_3d = self.is_3d(), "Map opened");
                Ok(())
            }
            Err(err) => {
                let err = match err {
                    VmapError::OpenFailure { .. } => err,
                    other => VmapError::OpenFailure {
                        identity: self.identity.to_string(),
                        msg: other.to_string(),
                    },
                };
                self.valid.store(false, Ordering::SeqCst);
                warn!(map = %self.identity, error = %err, "Cannot open map");
                self.status.lock().last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Release the backing dataset, the caller holds the open/close lock and
    /// has closed all iterators.
    fn close_map(&self) {
        self.valid.store(false, Ordering::SeqCst);
        if let Some(backing) = self.backing.swap(None) {
            if let Err(err) = backing.handle.close() {
                warn!(map = %self.identity, error = %err, "Error while closing map");
            }
        }
    }

    /// Reload layers from the (reopened) map, layers keep their field.
    ///
    /// Runs under the open/close-layer lock.
    pub fn reload_layers(&self) {
        let layers = self.open_close_layer.lock();
        let backing = self.backing.load_full();
        for layer in layers.iter() {
            layer.load(backing.as_ref().map(|b| b.handle.as_ref()));
        }
    }

    /// Start an edit session.
    pub fn start_edit(&self) -> Result<()> {
        let _open_close = self.open_close.lock();
        if self.is_frozen() {
            return Err(VmapError::Frozen {
                method_name: "start_edit",
            });
        }
        if self.is_edited() {
            return Err(VmapError::InvalidOperation {
                method_name: "start_edit",
                reason: "an edit session is already active",
            });
        }
        let backing = self
            .backing
            .load_full()
            .filter(|_| self.is_valid())
            .ok_or(VmapError::NotValid {
                method_name: "start_edit",
            })?;

        let _forced = self.broadcast.close_all_iterators();
        backing.handle.begin_update()?;
        let mut ledger = self.read_write.lock();
        self.old_num_lines
            .store(backing.handle.line_count(), Ordering::SeqCst);
        ledger.clear();
        self.editing.store(true, Ordering::SeqCst);
        debug!(
            map = %self.identity,
            lines = self.old_num_lines(),
            "Edit session started"
        );
        Ok(())
    }

    /// Close the edit session and hand its ledger to the caller.
    ///
    /// With `force_full_reopen` the dataset is closed and reopened, needed
    /// when line ids could not be kept stable during the session. Returns
    /// `Ok(None)` without doing anything if the map is frozen.
    ///
    /// The session ends and `version` moves in every case. A build error or a
    /// failed reopen is returned and the ledger is dropped, the map is left
    /// invalid after a failed reopen.
    pub fn close_edit(&self, force_full_reopen: bool) -> Result<Option<EditLedger>> {
        let _open_close = self.open_close.lock();
        if self.is_frozen() {
            debug!(map = %self.identity, "Map is frozen, close_edit skipped");
            return Ok(None);
        }
        if !self.is_edited() {
            return Err(VmapError::InvalidOperation {
                method_name: "close_edit",
                reason: "no edit session is active",
            });
        }

        let _forced = self.broadcast.close_all_iterators();
        let (ledger, built) = {
            let mut ledger = self.read_write.lock();
            let built = match self.backing.load_full() {
                Some(backing) => backing.handle.build(),
                None => Err(VmapError::NotValid {
                    method_name: "close_edit",
                }),
            };
            self.editing.store(false, Ordering::SeqCst);
            (std::mem::take(&mut *ledger), built)
        };
        if let Err(err) = &built {
            warn!(map = %self.identity, error = %err, "Cannot build map after editing");
        }

        let reopened = if force_full_reopen || built.is_err() {
            self.close_map();
            self.open_map()
        } else {
            let mut status = self.status.lock();
            status.last_modified = modified_time(&self.dataset_dir);
            status.last_attributes_modified = modified_time(&self.attribute_link);
            Ok(())
        };
        self.reload_layers();
        self.version.fetch_add(1, Ordering::SeqCst);
        debug!(
            map = %self.identity,
            version = self.version(),
            reopened = force_full_reopen,
            "Edit session closed"
        );
        built.and(reopened).map(|_| Some(ledger))
    }

    /// Close and reopen the dataset, refresh layers and bump the version.
    ///
    /// Used when the dataset was changed outside of this process. Providers
    /// caching map data must refresh themselves when they see a new version.
    pub fn update(&self) -> Result<()> {
        let _open_close = self.open_close.lock();
        if self.is_frozen() {
            debug!(map = %self.identity, "Map is frozen, update skipped");
            return Ok(());
        }
        if self.is_edited() {
            return Err(VmapError::InvalidOperation {
                method_name: "update",
                reason: "an edit session is active",
            });
        }
        let _forced = self.broadcast.close_all_iterators();
        self.close_map();
        let result = self.open_map();
        self.open.store(true, Ordering::SeqCst);
        self.reload_layers();
        self.version.fetch_add(1, Ordering::SeqCst);
        debug!(map = %self.identity, version = self.version(), "Map updated");
        result
    }

    /// Reload layer attribute metadata after an outside change of the
    /// attribute link, without touching geometry or the version.
    pub fn update_attributes(&self) {
        let _open_close = self.open_close.lock();
        self.reload_layers();
        self.status.lock().last_attributes_modified = modified_time(&self.attribute_link);
    }

    /// The dataset directory changed since the map was opened.
    pub fn map_outdated(&self) -> bool {
        let stored = self.status.lock().last_modified;
        modified_time(&self.dataset_dir) > stored
    }

    /// The attribute link file changed since the map was opened or the
    /// attributes were last updated.
    pub fn attributes_outdated(&self) -> bool {
        let stored = self.status.lock().last_attributes_modified;
        modified_time(&self.attribute_link) > stored
    }

    /// Suspend the map. Iterators are closed and the dataset is released, the
    /// map remembers whether it was open.
    pub fn freeze(&self) -> Result<()> {
        let _open_close = self.open_close.lock();
        if self.is_frozen() {
            return Ok(());
        }
        if self.is_edited() {
            return Err(VmapError::InvalidOperation {
                method_name: "freeze",
                reason: "an edit session is active",
            });
        }
        let _forced = self.broadcast.close_all_iterators();
        self.close_map();
        self.frozen.store(true, Ordering::SeqCst);
        debug!(map = %self.identity, "Map frozen");
        Ok(())
    }

    /// Leave the frozen mode, reopening the dataset if the map was open or
    /// layers were opened while frozen.
    pub fn thaw(&self) -> Result<()> {
        let _open_close = self.open_close.lock();
        if !self.is_frozen() {
            return Ok(());
        }
        self.frozen.store(false, Ordering::SeqCst);
        debug!(map = %self.identity, "Map thawed");
        if !self.is_open() && self.user_count() == 0 {
            return Ok(());
        }
        let _forced = self.broadcast.close_all_iterators();
        let result = self.open_map();
        self.open.store(true, Ordering::SeqCst);
        self.reload_layers();
        self.version.fetch_add(1, Ordering::SeqCst);
        result
    }

    /// Get the layer of `field`, creating it if needed, and register a user
    /// of it. The map is opened if it is not yet.
    pub fn open_layer(&self, field: Field) -> Arc<VectorMapLayer> {
        if !self.is_open() {
            if let Err(err) = self.open() {
                debug!(map = %self.identity, field, error = %err, "Layer of invalid map");
            }
        }
        let layer = {
            let mut layers = self.open_close_layer.lock();
            let layer = match layers.iter().find(|layer| layer.field() == field) {
                Some(layer) => Arc::clone(layer),
                None => {
                    let layer = Arc::new(VectorMapLayer::new(field));
                    let backing = self.backing.load_full();
                    layer.load(backing.as_ref().map(|b| b.handle.as_ref()));
                    layers.push(Arc::clone(&layer));
                    layer
                }
            };
            layer.add_user();
            layer
        };
        // The map may have been closed by a concurrent close_layer between the
        // open above and the registration. Now that the layer counts as a
        // user, nothing can close it again.
        let _open_close = self.open_close.lock();
        if !self.is_open() && !self.is_frozen() {
            if let Err(err) = self.open_locked() {
                debug!(map = %self.identity, field, error = %err, "Layer of invalid map");
            }
        }
        layer
    }

    /// Unregister a user of `layer`. The layer is dropped when it has no more
    /// users, the map is closed when it has no more users.
    pub fn close_layer(&self, layer: &Arc<VectorMapLayer>) {
        let remaining = {
            let mut layers = self.open_close_layer.lock();
            if layer.remove_user() == 0 {
                layers.retain(|l| !Arc::ptr_eq(l, layer));
                layer.clear();
                debug!(map = %self.identity, field = layer.field(), "Layer released");
            }
            self.users(&layers)
        };
        if remaining == 0 {
            self.close_if_unused();
        }
    }

    fn close_if_unused(&self) {
        let _open_close = self.open_close.lock();
        if self.user_count() > 0 {
            return;
        }
        self.close_locked();
    }

    /// Run `f` on the backing handle, honouring the read/write lock while
    /// editing. `None` if the map is not valid.
    fn read<T>(&self, f: impl FnOnce(&dyn MapHandle) -> Option<T>) -> Option<T> {
        if !self.is_valid() {
            return None;
        }
        let backing = self.backing.load_full()?;
        let _read_write = self.is_edited().then(|| self.read_write.lock());
        f(backing.handle.as_ref())
    }

    /// Geometry of a line: a point, a line or a polygon for faces.
    pub fn line_geometry(&self, lid: LineId) -> Option<Geometry> {
        self.read(|handle| handle.read_geometry(lid, ElementKind::Line))
    }

    pub fn node_geometry(&self, nid: NodeId) -> Option<Geometry> {
        self.read(|handle| handle.read_geometry(nid, ElementKind::Node))
    }

    pub fn area_geometry(&self, area: u32) -> Option<Geometry> {
        self.read(|handle| handle.read_geometry(area, ElementKind::Area))
    }

    pub fn topo_symbol(&self, element: TopoElement) -> TopoSymbol {
        TopoSymbol::from_topology(self.read(|handle| handle.topology(element)))
    }

    /// The handle for an edit write, the caller holds the read/write lock.
    fn edit_backing(&self, method_name: &'static str) -> Result<Arc<Backing>> {
        if !self.is_edited() {
            return Err(VmapError::InvalidOperation {
                method_name,
                reason: "no edit session is active",
            });
        }
        self.backing
            .load_full()
            .ok_or(VmapError::NotValid { method_name })
    }

    /// Capture the pre-edit geometry of `lid` if it existed before the session.
    fn capture_old_geometry(&self, ledger: &mut EditLedger, backing: &Backing, lid: LineId) {
        let original = ledger.original_id(lid);
        if original as usize > self.old_num_lines() || !ledger.needs_old_geometry(lid) {
            return;
        }
        if let Some(geometry) = backing.handle.read_geometry(lid, ElementKind::Line) {
            ledger.capture_old_geometry(lid, geometry);
        }
    }

    /// Write a new line during an edit session.
    pub fn write_line(&self, record: &LineRecord) -> Result<LineId> {
        let _ledger = self.read_write.lock();
        let backing = self.edit_backing("write_line")?;
        backing.handle.write_line(record)
    }

    /// Replace line `lid` during an edit session, returns its new id.
    pub fn rewrite_line(&self, lid: LineId, record: &LineRecord) -> Result<LineId> {
        let mut ledger = self.read_write.lock();
        let backing = self.edit_backing("rewrite_line")?;
        if backing.handle.line_type(lid).is_none() {
            return Err(VmapError::UnknownLine(lid));
        }
        self.capture_old_geometry(&mut ledger, &backing, lid);
        let new_lid = backing.handle.rewrite_line(lid, record)?;
        ledger.record_rewrite(lid, new_lid);
        Ok(new_lid)
    }

    /// Delete line `lid` during an edit session.
    pub fn delete_line(&self, lid: LineId) -> Result<()> {
        let mut ledger = self.read_write.lock();
        let backing = self.edit_backing("delete_line")?;
        if backing.handle.line_type(lid).is_none() {
            return Err(VmapError::UnknownLine(lid));
        }
        self.capture_old_geometry(&mut ledger, &backing, lid);
        backing.handle.delete_line(lid)?;
        ledger.record_delete(lid);
        Ok(())
    }

    /// Snapshot of the ledger of the active session.
    pub fn edit_ledger(&self) -> EditLedger {
        self.read_write.lock().clone()
    }

    /// Original ids of rewritten lines, keyed by current id.
    pub fn old_lids(&self) -> HashMap<LineId, LineId> {
        self.read_write.lock().new_to_old().clone()
    }

    /// Current ids of rewritten lines, keyed by original id.
    pub fn new_lids(&self) -> HashMap<LineId, LineId> {
        self.read_write.lock().old_to_new().clone()
    }
}

impl fmt::Display for VectorMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} : valid={} open={} frozen={} edited={} version={} users={}",
            self.identity,
            self.is_valid(),
            self.is_open(),
            self.is_frozen(),
            self.is_edited(),
            self.version(),
            self.user_count()
        )
    }
}

impl fmt::Debug for VectorMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorMap")
            .field("identity", &self.identity)
            .field("valid", &self.is_valid())
            .field("open", &self.is_open())
            .field("frozen", &self.is_frozen())
            .field("edited", &self.is_edited())
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}
