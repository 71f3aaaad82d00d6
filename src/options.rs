use std::path::PathBuf;

use bitflags::bitflags;

use crate::config;
use crate::errors::Result;

/// Options shared by every map created by a [`crate::VectorMapStore`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapOptions {
    /// Directory holding the `location/mapset/vector/name` hierarchy.
    pub gisdbase: PathBuf,
    /// Start new maps in the frozen mode.
    pub start_frozen: bool,
    /// Attribute link file name, relative to the dataset directory.
    pub attribute_link_file: String,
}

impl Default for MapOptions {
    fn default() -> MapOptions {
        MapOptions {
            gisdbase: PathBuf::from("."),
            start_frozen: false,
            attribute_link_file: "dbln".to_string(),
        }
    }
}

impl MapOptions {
    /// Build options from the runtime configuration, see [`crate::config`].
    pub fn from_config() -> Result<MapOptions> {
        let defaults = MapOptions::default();
        let gisdbase = config::get_config_option(config::GISDBASE, "");
        let attribute_link_file = config::get_config_option(config::ATTRIBUTE_LINK_FILE, "");
        Ok(MapOptions {
            gisdbase: if gisdbase.is_empty() {
                defaults.gisdbase
            } else {
                PathBuf::from(gisdbase)
            },
            start_frozen: config::get_config_option_bool(config::START_FROZEN, false)?,
            attribute_link_file: if attribute_link_file.is_empty() {
                defaults.attribute_link_file
            } else {
                attribute_link_file
            },
        })
    }
}

/// Access mode requested from the geometry engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OpenMode {
    #[default]
    ReadOnly,
    Update,
}

bitflags! {
    /// Feature types of the topological model.
    ///
    /// Masks are passed through to engines unchanged.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct FeatureType: u32 {
        const POINT = 0x01;
        const LINE = 0x02;
        const BOUNDARY = 0x04;
        const CENTROID = 0x08;
        const FACE = 0x10;
        const KERNEL = 0x20;
        const AREA = 0x40;
        const VOLUME = 0x80;

        const POINTS = Self::POINT.bits() | Self::CENTROID.bits();
        const LINES = Self::LINE.bits() | Self::BOUNDARY.bits();
    }
}

impl Default for FeatureType {
    fn default() -> FeatureType {
        FeatureType::empty()
    }
}
