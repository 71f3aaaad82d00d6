use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use geo_types::{line_string, point, polygon};

use crate::engine::{Column, ColumnType, DbLink, LineRecord, MemoryDataset, MemoryEngine};
use crate::identity::DatasetIdentity;
use crate::options::{FeatureType, MapOptions};

pub fn roads_identity() -> DatasetIdentity {
    DatasetIdentity::new("spearfish", "PERMANENT", "roads")
}

/// Small dataset with every kind of element.
///
/// | id | line                                 | field/cat |
/// |----|--------------------------------------|-----------|
/// | 1  | line (0 0, 1 0)                      | 1/1       |
/// | 2  | line (1 0, 2 0)                      | 1/2       |
/// | 3  | point (5 5)                          | 1/3       |
/// | 4  | closed boundary of area 1            |           |
/// | 5  | centroid (11 11) in area 1           | 2/1       |
///
/// Nodes: 1 (0 0), 2 (1 0) shared by lines 1 and 2, 3 (2 0), 4 (10 10) and
/// the isolated node 5 (20 20).
pub fn roads_dataset() -> MemoryDataset {
    let mut dataset = MemoryDataset::new();
    dataset.add_line(
        LineRecord::new(FeatureType::LINE, line_string![(x: 0., y: 0.), (x: 1., y: 0.)])
            .with_cat(1, 1),
    );
    dataset.add_line(
        LineRecord::new(FeatureType::LINE, line_string![(x: 1., y: 0.), (x: 2., y: 0.)])
            .with_cat(1, 2),
    );
    dataset.add_line(LineRecord::new(FeatureType::POINT, point!(x: 5., y: 5.)).with_cat(1, 3));
    let boundary = dataset.add_line(LineRecord::new(
        FeatureType::BOUNDARY,
        line_string![
            (x: 10., y: 10.),
            (x: 14., y: 10.),
            (x: 14., y: 14.),
            (x: 10., y: 14.),
            (x: 10., y: 10.),
        ],
    ));
    let area = dataset.add_area(
        polygon![
            (x: 10., y: 10.),
            (x: 14., y: 10.),
            (x: 14., y: 14.),
            (x: 10., y: 14.),
        ],
        &[boundary],
    );
    let centroid = dataset
        .add_line(LineRecord::new(FeatureType::CENTROID, point!(x: 11., y: 11.)).with_cat(2, 1));
    dataset.attach_centroid(centroid, area);
    dataset.add_node(point!(x: 20., y: 20.));
    dataset.add_link(DbLink {
        field: 1,
        table: "roads".to_string(),
        key: "cat".to_string(),
        columns: vec![
            Column {
                name: "cat".to_string(),
                ty: ColumnType::Integer,
            },
            Column {
                name: "label".to_string(),
                ty: ColumnType::Text,
            },
        ],
    });
    dataset
}

/// Engine serving [`roads_dataset`] as [`roads_identity`].
pub fn roads_engine() -> Arc<MemoryEngine> {
    let engine = Arc::new(MemoryEngine::new());
    engine.insert(roads_identity(), roads_dataset());
    engine
}

/// A temporary gisdbase with the directory and attribute link file of
/// [`roads_identity`], for tests looking at modification times.
pub struct TempLocation {
    _temp_dir: tempfile::TempDir,
    gisdbase: PathBuf,
    dataset_dir: PathBuf,
}

impl TempLocation {
    pub fn new() -> Self {
        let _temp_dir = tempfile::tempdir().unwrap();
        let gisdbase = _temp_dir.path().to_path_buf();
        let dataset_dir = roads_identity().dataset_dir(&gisdbase);
        std::fs::create_dir_all(&dataset_dir).unwrap();
        std::fs::write(dataset_dir.join("dbln"), "1 roads cat\n").unwrap();
        Self {
            _temp_dir,
            gisdbase,
            dataset_dir,
        }
    }

    pub fn gisdbase(&self) -> &Path {
        &self.gisdbase
    }

    pub fn options(&self) -> MapOptions {
        MapOptions {
            gisdbase: self.gisdbase.clone(),
            ..MapOptions::default()
        }
    }

    /// Pretend an outside process rewrote the dataset.
    pub fn touch_dataset(&self) {
        touch(&self.dataset_dir);
    }

    /// Pretend an outside process changed the attribute links.
    pub fn touch_attributes(&self) {
        touch(&self.dataset_dir.join("dbln"));
    }
}

/// Move the modification time of `path` well past any time recorded so far.
fn touch(path: &Path) {
    let future = SystemTime::now() + Duration::from_secs(60);
    File::open(path).unwrap().set_modified(future).unwrap();
}
