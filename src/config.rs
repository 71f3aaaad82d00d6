//! Runtime Configuration Options
//!
//! The crate can be configured at runtime using environment variables or
//! by using functions in this module. Options set by calling functions in this
//! module override options set in environment variables, and thread local
//! options override process wide ones.
//!
//! ```
//! use vmap::config::*;
//!
//! // Keep new maps suspended until the host application thaws them
//! set_config_option(START_FROZEN, "YES").unwrap();
//!
//! assert_eq!(get_config_option(START_FROZEN, "NO"), "YES");
//!
//! // Back to the default
//! clear_config_option(START_FROZEN).unwrap();
//!
//! assert_eq!(get_config_option(START_FROZEN, "NO"), "NO");
//! ```

use std::cell::RefCell;
use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::errors::{Result, VmapError};

/// Root directory of the `location/mapset/vector/name` hierarchy.
pub const GISDBASE: &str = "VMAP_GISDBASE";
/// `YES`/`NO`, new maps start in the frozen (suspended) mode.
pub const START_FROZEN: &str = "VMAP_START_FROZEN";
/// Name of the attribute link file inside a dataset directory.
pub const ATTRIBUTE_LINK_FILE: &str = "VMAP_ATTRIBUTE_LINK_FILE";

/// Process wide options, set with [`set_config_option`]
static CONFIG_OPTIONS: Lazy<Mutex<HashMap<String, String>>> = Lazy::new(Default::default);

thread_local! {
    static THREAD_LOCAL_OPTIONS: RefCell<HashMap<String, String>> = RefCell::new(HashMap::new());
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains(['=', '\0']) {
        return Err(VmapError::BadConfigValue {
            key: key.to_string(),
            value: String::new(),
        });
    }
    Ok(())
}

/// Set a configuration option
pub fn set_config_option(key: &str, value: &str) -> Result<()> {
    check_key(key)?;
    CONFIG_OPTIONS
        .lock()
        .insert(key.to_string(), value.to_string());
    Ok(())
}

/// Get the value of a configuration option
///
/// Lookup order is thread local options, process wide options, then the
/// environment. If the option is not found anywhere, `default` is returned.
pub fn get_config_option(key: &str, default: &str) -> String {
    if let Some(value) = THREAD_LOCAL_OPTIONS.with(|options| options.borrow().get(key).cloned()) {
        return value;
    }
    if let Some(value) = CONFIG_OPTIONS.lock().get(key).cloned() {
        return value;
    }
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Clear the value of a configuration option
pub fn clear_config_option(key: &str) -> Result<()> {
    check_key(key)?;
    CONFIG_OPTIONS.lock().remove(key);
    Ok(())
}

/// Set a configuration option
/// with **thread local** scope
pub fn set_thread_local_config_option(key: &str, value: &str) -> Result<()> {
    check_key(key)?;
    THREAD_LOCAL_OPTIONS.with(|options| {
        options
            .borrow_mut()
            .insert(key.to_string(), value.to_string())
    });
    Ok(())
}

/// Get the value of a configuration option
/// with **thread local** scope
pub fn get_thread_local_config_option(key: &str, default: &str) -> String {
    THREAD_LOCAL_OPTIONS
        .with(|options| options.borrow().get(key).cloned())
        .unwrap_or_else(|| default.to_string())
}

/// Clear the value of a configuration option
/// with **thread local** scope
pub fn clear_thread_local_config_option(key: &str) -> Result<()> {
    check_key(key)?;
    THREAD_LOCAL_OPTIONS.with(|options| options.borrow_mut().remove(key));
    Ok(())
}

/// Interpret a configuration option as a boolean.
///
/// Accepts `YES`/`NO`, `TRUE`/`FALSE`, `ON`/`OFF` and `1`/`0`, case insensitive.
pub fn get_config_option_bool(key: &str, default: bool) -> Result<bool> {
    let value = get_config_option(key, if default { "YES" } else { "NO" });
    match value.to_ascii_uppercase().as_str() {
        "YES" | "TRUE" | "ON" | "1" => Ok(true),
        "NO" | "FALSE" | "OFF" | "0" => Ok(false),
        _ => Err(VmapError::BadConfigValue {
            key: key.to_string(),
            value,
        }),
    }
}
