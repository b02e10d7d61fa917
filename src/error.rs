use thiserror::Error;

/// Failures of the assignment engine and the tables feeding it.
///
/// `MalformedRecord` is recoverable: loaders skip the record and count it.
/// Everything else is structural and aborts the run.
#[derive(Debug, Error)]
pub enum AssignError {
    #[error("cannot resolve nearest site: site table is empty")]
    EmptySiteTable,

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("duplicate key {key} in table '{table}'")]
    KeyCollision { table: String, key: String },

    #[error("column '{column}' not found in table '{table}'")]
    MissingColumn { table: String, column: String },

    #[error("cannot merge '{left}' with '{right}': key columns {left_key:?} and {right_key:?} differ")]
    KeyMismatch {
        left: String,
        right: String,
        left_key: Vec<String>,
        right_key: Vec<String>,
    },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("coordinates out of range: lat {latitude}, lon {longitude}")]
    InvalidPoint { latitude: f64, longitude: f64 },

    #[error("row has {got} values but table '{table}' has {expected} columns")]
    RowArity {
        table: String,
        expected: usize,
        got: usize,
    },
}
