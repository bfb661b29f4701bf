//! Error taxonomy shared across the federation layer, its backends, and the
//! C FFI boundary.
//!
//! Every fallible public entry point in this crate returns [`Result`]. The
//! teacher crate this one is adapted from gets away with a single
//! `std::io::Result` because a syscall wrapper only ever fails with
//! `-errno`; this crate's federation layer can fail in many more shapes
//! (unknown names, domain mismatches, lifecycle misuse, malformed config)
//! that a caller needs to match on, so those shapes are named explicitly
//! here instead of folded into `ErrorKind`.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown signal or control name: {0}")]
    UnknownName(String),

    #[error("domain mismatch for {name}: requested {requested:?}, native {native:?}")]
    DomainMismatch {
        name: String,
        requested: crate::topo::Domain,
        native: crate::topo::Domain,
    },

    #[error("domain index {idx} out of range for {domain:?} (0..{count})")]
    DomainIndexOutOfRange {
        domain: crate::topo::Domain,
        idx: usize,
        count: usize,
    },

    #[error("{0}: sample requested before the first read_batch, or derivative needs more points")]
    NotReady(String),

    #[error("push_{kind} called after read_batch/adjust: {name}")]
    PushAfterStart { kind: &'static str, name: String },

    #[error("write_batch called before control was adjusted: {0}")]
    UnsetControl(String),

    #[error("{0} is not writable")]
    NotWritable(String),

    #[error("malformed config, offending key `{key}`: {detail}")]
    MalformedConfig { key: String, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("missing OS capability: {0}")]
    Capability(String),

    #[error("GPU-to-CPU affinity solver could not assign every CPU")]
    AffinityStarvation,

    #[error("buffer too small, need at least {needed} bytes")]
    BufferTooSmall { needed: usize },

    #[error("field `{field}` exceeds the NAME_MAX bound ({len} > {max})")]
    NameTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{0} is not supported on this platform")]
    Unsupported(String),

    #[error("internal invariant violation: {0}")]
    Logic(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::MalformedConfig {
            key: format!("line {} column {}", e.line(), e.column()),
            detail: e.to_string(),
        }
    }
}

impl Error {
    /// Stable negative integer code for the C FFI boundary (§9: "every FFI
    /// entry point must translate all internal errors into the
    /// negative-integer taxonomy").
    pub fn code(&self) -> i32 {
        match self {
            Error::UnknownName(_) => -1,
            Error::DomainMismatch { .. } => -2,
            Error::DomainIndexOutOfRange { .. } => -3,
            Error::NotReady(_) => -4,
            Error::PushAfterStart { .. } => -5,
            Error::UnsetControl(_) => -6,
            Error::NotWritable(_) => -7,
            Error::MalformedConfig { .. } => -8,
            Error::Io(_) => -9,
            Error::Capability(_) => -10,
            Error::AffinityStarvation => -11,
            Error::BufferTooSmall { .. } => -12,
            Error::NameTooLong { .. } => -13,
            Error::Unsupported(_) => -14,
            Error::Logic(_) => -15,
        }
    }

    /// Human-readable string for a code returned by [`Error::code`], for use
    /// at the C boundary where the `Error` value itself does not cross.
    pub fn describe_code(code: i32) -> &'static str {
        match code {
            -1 => "unknown signal or control name",
            -2 => "domain mismatch",
            -3 => "domain index out of range",
            -4 => "sample not ready",
            -5 => "push after batch start",
            -6 => "control not set before write_batch",
            -7 => "not writable",
            -8 => "malformed config",
            -9 => "I/O error",
            -10 => "missing capability",
            -11 => "GPU affinity starvation",
            -12 => "buffer too small",
            -13 => "name too long",
            -14 => "unsupported",
            -15 => "internal logic error",
            _ => "unknown error",
        }
    }
}

/// The platform's explicit invalid-sample sentinel (distinct from `NaN`,
/// which a derived signal may also produce for e.g. a zero-denominator
/// ratio). StatsCollector treats both as "skip, don't count" per spec.
pub const INVALID_VALUE: f64 = f64::NEG_INFINITY;

pub fn is_valid_value(value: f64) -> bool {
    !value.is_nan() && value != INVALID_VALUE
}
