use std::path::{Path, PathBuf};

use crate::crs::Crs;

/// Rows shown in the tabular preview by default.
pub const DEFAULT_PREVIEW_ROWS: usize = 5;

/// Name suffixes for fields present on both sides of a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suffixes {
    pub left: String,
    pub right: String,
}

impl Default for Suffixes {
    fn default() -> Self {
        Self {
            left: "_left".to_string(),
            right: "_right".to_string(),
        }
    }
}

/// Settings for one [`Pipeline`](crate::Pipeline).
///
/// # Example
///
/// ```
/// use geojoin::{Crs, PipelineConfig};
///
/// let config = PipelineConfig::default()
///     .with_default_crs(Crs::epsg(25833))
///     .with_preview_rows(10);
/// assert_eq!(config.preview_rows(), 10);
/// assert!(config.output_crs().is_wgs84());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Assumed for collections that declare no CRS
    default_crs: Crs,
    /// CRS of exported bytes
    output_crs: Crs,
    preview_rows: usize,
    suffixes: Suffixes,
    pretty_output: bool,
    /// Parent directory for archive extraction (system temp dir if unset)
    scratch_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_crs: Crs::wgs84(),
            output_crs: Crs::wgs84(),
            preview_rows: DEFAULT_PREVIEW_ROWS,
            suffixes: Suffixes::default(),
            pretty_output: false,
            scratch_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_default_crs(mut self, crs: Crs) -> Self {
        self.default_crs = crs;
        self
    }

    pub fn with_output_crs(mut self, crs: Crs) -> Self {
        self.output_crs = crs;
        self
    }

    pub fn with_preview_rows(mut self, rows: usize) -> Self {
        self.preview_rows = rows;
        self
    }

    pub fn with_suffixes(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.suffixes = Suffixes {
            left: left.into(),
            right: right.into(),
        };
        self
    }

    pub fn with_pretty_output(mut self, pretty: bool) -> Self {
        self.pretty_output = pretty;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn default_crs(&self) -> &Crs {
        &self.default_crs
    }

    pub fn output_crs(&self) -> &Crs {
        &self.output_crs
    }

    pub fn preview_rows(&self) -> usize {
        self.preview_rows
    }

    pub fn suffixes(&self) -> &Suffixes {
        &self.suffixes
    }

    pub fn pretty_output(&self) -> bool {
        self.pretty_output
    }

    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch_dir.as_deref()
    }
}
