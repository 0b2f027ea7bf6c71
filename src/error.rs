use thiserror::Error;

use crate::field::FieldId;

/// The full error taxonomy. Every non-fatal variant is absorbed at its
/// component boundary and counted on [`crate::stats::Stats`]; nothing is
/// surfaced back to a packet worker. `Fatal` is the one variant a caller of
/// [`crate::table::FlowTable::observe`] must not absorb: it marks a real
/// key-to-index aliasing bug in the table, not a runtime condition, and the
/// caller is expected to `panic!` on it (see `src/bin/demo.rs`'s match on
/// `table.observe(...)`).
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("malformed IPv4 header: {0}")]
    ParseError(String),

    #[error("flow table full, dropping packet")]
    TableFull,

    #[error("encoder error: {0}")]
    EncoderError(#[from] EncoderError),

    #[error("egress error: {0}")]
    EgressError(#[from] EgressError),

    #[error("fatal inconsistency: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("unknown information element identifier: {0}")]
    UnknownField(u16),

    #[error("field {0:?} size mismatch: expected {1} bytes, got {2}")]
    SizeMismatch(FieldId, u16, u16),

    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

#[derive(Error, Debug)]
pub enum EgressError {
    #[error("send failed: {0}")]
    SendFailed(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
