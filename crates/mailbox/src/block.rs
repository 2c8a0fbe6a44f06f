use std::collections::BTreeMap;
use std::fmt;

use floe_common::DataBlock;

/// Error code attached to failures raised while executing a stage.
pub const QUERY_EXECUTION_ERROR_CODE: i32 = 200;

/// Exceptions reported by an upstream stage, keyed by error code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorPayload {
    exceptions: BTreeMap<i32, String>,
}

impl ErrorPayload {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        let mut payload = Self::default();
        payload.add_exception(code, message);
        payload
    }

    /// Shorthand for a payload carrying one [`QUERY_EXECUTION_ERROR_CODE`] exception.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(QUERY_EXECUTION_ERROR_CODE, message)
    }

    pub fn add_exception(&mut self, code: i32, message: impl Into<String>) {
        self.exceptions.insert(code, message.into());
    }

    pub fn exceptions(&self) -> &BTreeMap<i32, String> {
        &self.exceptions
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (code, message)) in self.exceptions.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{code}={message}")?;
        }
        f.write_str("}")
    }
}

/// One unit flowing through a mailbox.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferableBlock {
    Data(DataBlock),
    /// Heartbeat with no payload; receivers skip it.
    NoOp,
    /// Last block of a stream. A stream that failed ends with `error` set.
    EndOfStream { error: Option<ErrorPayload> },
}

impl TransferableBlock {
    pub fn end_of_stream() -> Self {
        TransferableBlock::EndOfStream { error: None }
    }

    pub fn error(payload: ErrorPayload) -> Self {
        TransferableBlock::EndOfStream {
            error: Some(payload),
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, TransferableBlock::EndOfStream { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TransferableBlock::EndOfStream { error: Some(_) })
    }

    pub fn is_no_op(&self) -> bool {
        matches!(self, TransferableBlock::NoOp)
    }
}

impl From<DataBlock> for TransferableBlock {
    fn from(block: DataBlock) -> Self {
        TransferableBlock::Data(block)
    }
}
