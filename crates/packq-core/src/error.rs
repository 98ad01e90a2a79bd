//! Core error types.

use thiserror::Error;

/// Engine errors.
///
/// A compiler that cannot handle a shape does not return one of these; it
/// returns `Ok(None)` and the caller falls back to a less restrictive tier.
/// Errors are reserved for invalid queries, unsound reads and data faults.
#[derive(Debug, Error)]
pub enum Error {
    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] packq_proto::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The declared model does not match the physical schema.
    #[error("schema error: {0}")]
    Schema(String),

    /// No entity type with this name.
    #[error("unknown entity type `{0}`")]
    UnknownEntity(String),

    /// No table with this name.
    #[error("unknown table `{0}`")]
    UnknownTable(String),

    /// Member access on a member that does not exist.
    #[error("`{entity}` has no member `{member}`")]
    UnknownMember { entity: String, member: String },

    /// Query operator the pipeline does not support.
    #[error("unsupported query operator `{0}`")]
    UnsupportedOperator(String),

    /// Operator argument of the wrong shape.
    #[error("invalid argument to `{operator}`: expected {expected}")]
    InvalidArgument { operator: String, expected: String },

    /// A reducer followed by more operators.
    #[error("`{0}` must be the last operator of a query")]
    ReducerNotLast(String),

    /// `Include` applied after the element type changed.
    #[error("`Include` cannot follow a `Select` that changes the element type")]
    IncludeAfterSelect,

    /// `ThenInclude` without a preceding `Include`.
    #[error("`ThenInclude` must follow `Include` or `ThenInclude`")]
    DetachedThenInclude,

    /// Collection navigation declared with an unsupported shape.
    #[error("navigation `{entity}.{navigation}` must be declared as {expected}")]
    InvalidNavigationShape {
        entity: String,
        navigation: String,
        expected: String,
    },

    /// Expression the engine cannot interpret at all.
    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    /// A virtual column used as a join key.
    #[error("foreign key `{entity}.{field}` is virtual and cannot be used as a join key")]
    VirtualForeignKey { entity: String, field: String },

    /// A virtual string column read through a row handle.
    #[error("string field `{field}` is virtual and cannot be read from a row")]
    VirtualStringRead { field: String },

    /// A string array member declared through a collection interface.
    #[error("string array `{member}` cannot be read as a collection; declare it as an array")]
    StringArrayCollection { member: String },

    /// Row handle that does not belong to the table.
    #[error("row {0} not found")]
    RowNotFound(i64),

    /// Key outside the range of row ids.
    #[error("id {0} is outside the row id range")]
    IdOutOfRange(i64),

    /// Column read with a kind it does not hold.
    #[error("column {column} cannot be read as {requested}")]
    FieldType { column: usize, requested: String },

    /// Column index past the end of the row.
    #[error("column {0} out of range")]
    ColumnOutOfRange(usize),

    /// Member access on a null value.
    #[error("null reference reading `{0}`")]
    NullReference(String),

    /// Operand of the wrong type.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Division by zero or similar.
    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    /// `First` or `Single` over an empty sequence.
    #[error("sequence contains no elements")]
    SequenceEmpty,

    /// `Single` over a sequence with several elements.
    #[error("sequence contains more than one element")]
    SequenceMoreThanOne,
}

impl Error {
    pub(crate) fn type_mismatch(message: impl Into<String>) -> Self {
        Error::TypeMismatch(message.into())
    }
}
