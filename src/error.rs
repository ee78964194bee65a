use std::any::Any;
use std::fmt;

use thiserror::Error;

use crate::crs::Crs;
use crate::feature::Side;

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Load,
    Reconcile,
    SpatialJoin,
    AttributeJoin,
    Export,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Reconcile => "reconcile",
            Stage::SpatialJoin => "spatial join",
            Stage::AttributeJoin => "attribute join",
            Stage::Export => "export",
        };
        f.write_str(name)
    }
}

/// Flat discriminant of [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    CorruptArchive,
    MissingGeometryHeader,
    UnreadableContainer,
    EmptyContainer,
    CrsMismatch,
    UnsupportedPredicate,
    UnsupportedCardinality,
    SpatialJoinFailed,
    KeyNotFound,
    AttributeJoinFailed,
    Reprojection,
    ExportFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CorruptArchive => "CorruptArchive",
            ErrorKind::MissingGeometryHeader => "MissingGeometryHeader",
            ErrorKind::UnreadableContainer => "UnreadableContainer",
            ErrorKind::EmptyContainer => "EmptyContainer",
            ErrorKind::CrsMismatch => "CRSMismatch",
            ErrorKind::UnsupportedPredicate => "UnsupportedPredicate",
            ErrorKind::UnsupportedCardinality => "UnsupportedCardinality",
            ErrorKind::SpatialJoinFailed => "SpatialJoinFailed",
            ErrorKind::KeyNotFound => "KeyNotFound",
            ErrorKind::AttributeJoinFailed => "AttributeJoinFailed",
            ErrorKind::Reprojection => "Reprojection",
            ErrorKind::ExportFailed => "ExportFailed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join pipeline errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Upload bytes are not a readable zip archive.
    #[error("upload is not a valid zip archive: {0}")]
    CorruptArchive(String),

    /// Archive extracted fine but holds no `.shp` file.
    #[error("archive contains no .shp geometry file")]
    MissingGeometryHeader,

    /// Container could not be decoded; carries the underlying cause.
    #[error("could not read container: {0}")]
    UnreadableContainer(String),

    /// Container decoded to zero features.
    #[error("container holds no features")]
    EmptyContainer,

    /// Geometric comparison requested between collections in different CRSs.
    #[error("CRS mismatch: primary is {primary}, secondary is {secondary}")]
    CrsMismatch { primary: Crs, secondary: Crs },

    #[error("unsupported spatial predicate '{0}'")]
    UnsupportedPredicate(String),

    #[error("unsupported join cardinality '{value}'")]
    UnsupportedCardinality { value: String, stage: Stage },

    /// Geometry engine fault during predicate evaluation.
    #[error("spatial join failed: {0}")]
    SpatialJoinFailed(String),

    #[error("key field '{key}' not found in {side} collection")]
    KeyNotFound { key: String, side: Side },

    #[error("attribute join failed: {0}")]
    AttributeJoinFailed(String),

    /// A coordinate transformation could not be built or applied.
    #[error("cannot reproject from {from} to {to}: {reason}")]
    Reprojection {
        stage: Stage,
        from: Crs,
        to: Crs,
        reason: String,
    },

    #[error("export failed: {0}")]
    ExportFailed(String),
}

impl PipelineError {
    pub(crate) fn unreadable(cause: impl fmt::Display) -> Self {
        PipelineError::UnreadableContainer(cause.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::CorruptArchive(_) => ErrorKind::CorruptArchive,
            PipelineError::MissingGeometryHeader => ErrorKind::MissingGeometryHeader,
            PipelineError::UnreadableContainer(_) => ErrorKind::UnreadableContainer,
            PipelineError::EmptyContainer => ErrorKind::EmptyContainer,
            PipelineError::CrsMismatch { .. } => ErrorKind::CrsMismatch,
            PipelineError::UnsupportedPredicate(_) => ErrorKind::UnsupportedPredicate,
            PipelineError::UnsupportedCardinality { .. } => ErrorKind::UnsupportedCardinality,
            PipelineError::SpatialJoinFailed(_) => ErrorKind::SpatialJoinFailed,
            PipelineError::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            PipelineError::AttributeJoinFailed(_) => ErrorKind::AttributeJoinFailed,
            PipelineError::Reprojection { .. } => ErrorKind::Reprojection,
            PipelineError::ExportFailed(_) => ErrorKind::ExportFailed,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::CorruptArchive(_)
            | PipelineError::MissingGeometryHeader
            | PipelineError::UnreadableContainer(_)
            | PipelineError::EmptyContainer => Stage::Load,
            PipelineError::CrsMismatch { .. }
            | PipelineError::UnsupportedPredicate(_)
            | PipelineError::SpatialJoinFailed(_) => Stage::SpatialJoin,
            PipelineError::KeyNotFound { .. } | PipelineError::AttributeJoinFailed(_) => {
                Stage::AttributeJoin
            }
            PipelineError::UnsupportedCardinality { stage, .. } => *stage,
            PipelineError::Reprojection { stage, .. } => *stage,
            PipelineError::ExportFailed(_) => Stage::Export,
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "geometry engine panicked".to_string()
    }
}
