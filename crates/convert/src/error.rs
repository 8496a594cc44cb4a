//! Conversion errors

use thiserror::Error;

/// Conversion result type
pub type Result<T> = std::result::Result<T, Error>;

/// Conversion errors
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown unit '{0}'")]
    UnknownUnit(String),

    #[error("cannot convert between '{from}' and '{to}': incompatible dimensions")]
    IncompatibleUnits { from: String, to: String },

    #[error("specs '{src}' and '{sink}' do not share the same dimensions")]
    DimMismatch { src: String, sink: String },

    #[error("no registered region set matches the coordinates of dimension '{dim}'")]
    MissingRegionSet { dim: String },

    #[error("no registered interval set matches the coordinates of dimension '{dim}'")]
    MissingIntervalSet { dim: String },

    #[error(
        "dimension '{dim}': no conversion registered between the source and sink coordinates"
    )]
    UnknownDimension { dim: String },

    #[error("conversion on '{dim}' covers only {coverage:.6} of '{name}'")]
    PartialCoverage {
        dim: String,
        name: String,
        coverage: f64,
    },

    #[error("coefficient matrix is {rows}x{cols}, expected {expected_rows}x{expected_cols}")]
    CoefficientShape {
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },

    #[error(transparent)]
    Metadata(#[from] smif_metadata::Error),
}
