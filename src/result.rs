use thiserror::Error;

pub type Result<A, E = Error> = std::result::Result<A, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected end of input")]
    Eof,
    #[error("could not resolve type `{0}`")]
    ResolveError(String),
    #[error("definition error at line {line}: {message}")]
    ParserError { line: u32, message: String },
    #[error("invalid expression: {0}")]
    ExpressionTokenizerError(String),
    #[error("invalid expression: {0}")]
    ExpressionParserError(String),
    #[error("array length mismatch: expected {expected}, got {actual}")]
    ArraySizeError { expected: usize, actual: usize },
    #[error("dereferenced a null pointer")]
    NullPointerDereference,
    #[error("value {value} does not fit in {width}-byte field")]
    OverflowError { value: i128, width: u32 },
    #[error("bitfield of {bits} bits straddles the {storage}-byte storage unit")]
    BitfieldStraddle { bits: u32, storage: u32 },
    #[error("field `{0}` not found")]
    NoSuchField(String),
    #[error("type `{0}` is already registered with a different definition")]
    DuplicateType(String),
}
