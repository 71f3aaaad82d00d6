use thiserror::Error;

use crate::engine::LineId;

pub type Result<T> = std::result::Result<T, VmapError>;

#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum VmapError {
    #[error("Cannot open vector map '{identity}': {msg}")]
    OpenFailure { identity: String, msg: String },
    #[error("Method '{method_name}' cannot be called: {reason}")]
    InvalidOperation {
        method_name: &'static str,
        reason: &'static str,
    },
    #[error("Method '{method_name}' rejected, the map is frozen")]
    Frozen { method_name: &'static str },
    #[error("Method '{method_name}' requires a valid (open) map")]
    NotValid { method_name: &'static str },
    #[error("Engine method '{method_name}' failed: '{msg}'")]
    EngineError {
        method_name: &'static str,
        msg: String,
    },
    #[error("Line {0} does not exist")]
    UnknownLine(LineId),
    #[error("Unsupported geometry type: '{0}'")]
    UnsupportedGeometry(&'static str),
    #[error("Bad value '{value}' for config option '{key}'")]
    BadConfigValue { key: String, value: String },
}

impl VmapError {
    pub(crate) fn engine(method_name: &'static str, msg: impl Into<String>) -> Self {
        VmapError::EngineError {
            method_name,
            msg: msg.into(),
        }
    }
}
