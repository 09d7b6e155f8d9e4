//! Task envelope protocol.
//!
//! Envelopes are Avro-binary encoded unions around a fixed record schema:
//!
//! - **RTaskMsg / JuliaTaskMsg**: `{uuid, function, data}`
//! - **ResultsMsg**: `{uuid, value}`
//! - **ShutdownMsg**: `{command}`
//!
//! Every union defined today has exactly one branch, so the leading index
//! must be `0`. Any other index is [`DecodeError::UnknownUnionVariant`].
//!
//! # Modules
//!
//! - **wire**: Avro primitives (varints, length-prefixed strings)
//! - **schema**: record types and out-of-band field-order resolution
//! - **frame**: length-delimited stream codec for envelope traffic

pub mod frame;
pub mod schema;
pub mod wire;

use std::fmt;
use std::str::FromStr;

use tokio_util::bytes::Bytes;

pub use schema::{FieldOrder, Record, ShutdownSignal, TaskResult, TaskSpec};
use wire::{Reader, Writer};

/// Malformed wire data. Never defaulted or coerced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of envelope")]
    UnexpectedEof,
    #[error("varint exceeds 10 bytes")]
    VarintOverflow,
    #[error("negative length prefix: {0}")]
    NegativeLength(i64),
    #[error("int out of range: {0}")]
    IntOutOfRange(i64),
    #[error("field '{field}' is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },
    #[error("union index {index} out of range (union has {variants} variant(s))")]
    UnknownUnionVariant { index: i64, variants: usize },
    #[error("{0} trailing byte(s) after envelope")]
    TrailingBytes(usize),
    #[error("writer field '{field}' is unknown to {record}")]
    UnknownField { record: &'static str, field: String },
    #[error("writer field '{field}' appears more than once")]
    DuplicateField { field: String },
    #[error("invalid writer schema: {0}")]
    InvalidSchema(String),
}

/// A union envelope: a closed set of branches, each wrapping `Self::Record`.
pub trait Envelope: Sized {
    type Record: Record;
    /// Number of union branches.
    const VARIANTS: usize;

    fn branch(&self) -> (usize, &Self::Record);

    fn from_branch(index: usize, record: Self::Record) -> Option<Self>;
}

macro_rules! single_branch_envelope {
    ($(#[$meta:meta])* $name:ident :: $variant:ident ( $record:ty )) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum $name {
            $variant($record),
        }

        impl Envelope for $name {
            type Record = $record;
            const VARIANTS: usize = 1;

            fn branch(&self) -> (usize, &$record) {
                match self {
                    Self::$variant(record) => (0, record),
                }
            }

            fn from_branch(index: usize, record: $record) -> Option<Self> {
                match index {
                    0 => Some(Self::$variant(record)),
                    _ => None,
                }
            }
        }
    };
}

single_branch_envelope!(
    /// Wire form of an R task request.
    RTaskEnvelope::RTaskMsg(TaskSpec)
);
single_branch_envelope!(
    /// Wire form of a Julia task request.
    JuliaTaskEnvelope::JuliaTaskMsg(TaskSpec)
);
single_branch_envelope!(
    /// Wire form of a task result (shared by R and Julia results).
    ResultEnvelope::ResultsMsg(TaskResult)
);
single_branch_envelope!(
    /// Wire form of a shutdown signal.
    ShutdownEnvelope::ShutdownMsg(ShutdownSignal)
);

fn encode_branch<R: Record>(index: usize, record: &R) -> Bytes {
    let mut w = Writer::new();
    w.put_union_index(index);
    record.encode(&mut w);
    w.finish()
}

pub fn encode<E: Envelope>(envelope: &E) -> Bytes {
    let (index, record) = envelope.branch();
    encode_branch(index, record)
}

/// Positional decode: fields in the reader's declared order.
pub fn decode<E: Envelope>(bytes: &[u8]) -> Result<E, DecodeError> {
    decode_with(bytes, |r| E::Record::decode(r))
}

/// Resolving decode: fields in the writer's order, as described by `order`.
pub fn decode_resolving<E: Envelope>(
    bytes: &[u8],
    order: &FieldOrder<E::Record>,
) -> Result<E, DecodeError> {
    decode_with(bytes, |r| E::Record::decode_resolving(r, order))
}

fn decode_with<E, F>(bytes: &[u8], decode_record: F) -> Result<E, DecodeError>
where
    E: Envelope,
    F: FnOnce(&mut Reader<'_>) -> Result<E::Record, DecodeError>,
{
    let mut r = Reader::new(bytes);
    // Index is validated before any field is read.
    let index = r.get_union_index(E::VARIANTS)?;
    let record = decode_record(&mut r)?;
    r.finish()?;
    E::from_branch(index, record).ok_or(DecodeError::UnknownUnionVariant {
        index: index as i64,
        variants: E::VARIANTS,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task kind '{0}' (expected 'R' or 'Julia')")]
pub struct UnknownTaskKind(pub String);

/// Script language a task runs in. Selects the submit entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    R,
    Julia,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::R => "R",
            Self::Julia => "Julia",
        }
    }

    /// Numeric code used by the C ABI.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::R),
            1 => Some(Self::Julia),
            _ => None,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = UnknownTaskKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("r") {
            Ok(Self::R)
        } else if s.eq_ignore_ascii_case("julia") {
            Ok(Self::Julia)
        } else {
            Err(UnknownTaskKind(s.to_string()))
        }
    }
}

/// A task request, one variant per task kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRequest {
    R(TaskSpec),
    Julia(TaskSpec),
}

impl TaskRequest {
    pub fn new(kind: TaskKind, spec: TaskSpec) -> Self {
        match kind {
            TaskKind::R => Self::R(spec),
            TaskKind::Julia => Self::Julia(spec),
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            Self::R(_) => TaskKind::R,
            Self::Julia(_) => TaskKind::Julia,
        }
    }

    pub fn spec(&self) -> &TaskSpec {
        match self {
            Self::R(spec) | Self::Julia(spec) => spec,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.spec().uuid
    }

    pub fn encode(&self) -> Bytes {
        // Both kinds travel as branch 0 of their own single-branch union.
        encode_branch(0, self.spec())
    }

    pub fn decode(kind: TaskKind, bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(match kind {
            TaskKind::R => {
                let RTaskEnvelope::RTaskMsg(spec) = decode::<RTaskEnvelope>(bytes)?;
                Self::R(spec)
            }
            TaskKind::Julia => {
                let JuliaTaskEnvelope::JuliaTaskMsg(spec) = decode::<JuliaTaskEnvelope>(bytes)?;
                Self::Julia(spec)
            }
        })
    }

    pub fn decode_resolving(
        kind: TaskKind,
        bytes: &[u8],
        order: &FieldOrder<TaskSpec>,
    ) -> Result<Self, DecodeError> {
        Ok(match kind {
            TaskKind::R => {
                let RTaskEnvelope::RTaskMsg(spec) = decode_resolving::<RTaskEnvelope>(bytes, order)?;
                Self::R(spec)
            }
            TaskKind::Julia => {
                let JuliaTaskEnvelope::JuliaTaskMsg(spec) =
                    decode_resolving::<JuliaTaskEnvelope>(bytes, order)?;
                Self::Julia(spec)
            }
        })
    }
}

impl TaskResult {
    pub fn encode(&self) -> Bytes {
        encode_branch(0, self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let ResultEnvelope::ResultsMsg(result) = decode::<ResultEnvelope>(bytes)?;
        Ok(result)
    }

    pub fn decode_resolving(
        bytes: &[u8],
        order: &FieldOrder<TaskResult>,
    ) -> Result<Self, DecodeError> {
        let ResultEnvelope::ResultsMsg(result) = decode_resolving::<ResultEnvelope>(bytes, order)?;
        Ok(result)
    }
}

impl ShutdownSignal {
    pub fn new(command: i32) -> Self {
        Self { command }
    }

    pub fn encode(&self) -> Bytes {
        encode(&ShutdownEnvelope::ShutdownMsg(*self))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let ShutdownEnvelope::ShutdownMsg(signal) = decode::<ShutdownEnvelope>(bytes)?;
        Ok(signal)
    }
}
