use std::fmt;
use std::path::{Path, PathBuf};

/// Identity of a vector dataset, `name@mapset` inside a location.
///
/// Two identities are the same dataset if and only if all three parts are equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetIdentity {
    location: String,
    mapset: String,
    name: String,
}

impl DatasetIdentity {
    pub fn new(
        location: impl Into<String>,
        mapset: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        DatasetIdentity {
            location: location.into(),
            mapset: mapset.into(),
            name: name.into(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn mapset(&self) -> &str {
        &self.mapset
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory of the mapset, `gisdbase/location/mapset`.
    pub fn mapset_path(&self, gisdbase: &Path) -> PathBuf {
        gisdbase.join(&self.location).join(&self.mapset)
    }

    /// Directory holding the dataset files, `gisdbase/location/mapset/vector/name`.
    pub fn dataset_dir(&self, gisdbase: &Path) -> PathBuf {
        self.mapset_path(gisdbase).join("vector").join(&self.name)
    }
}

impl fmt::Display for DatasetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.location, self.name, self.mapset)
    }
}
