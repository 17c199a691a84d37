use thiserror::Error;

/// Failure taxonomy for every trading operation.
///
/// These are reported back to the requesting session as `error` or
/// `execution{success:false}` frames; they never tear down a connection.
#[derive(Debug, Error)]
pub enum TradeError {
    #[error("broker session is not connected")]
    NotConnected,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("no quote available for {0}")]
    QuoteUnavailable(String),

    #[error("position #{0} not found")]
    PositionNotFound(u64),

    #[error("order #{0} not found")]
    OrderNotFound(u64),

    /// The broker accepted the request syntactically but declined it
    /// (requote, insufficient margin, market closed, ...).
    #[error("broker rejected request: {code} {comment}")]
    BrokerRejected { code: u32, comment: String },

    /// No response inside the bounded wait, or a transport failure.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),
}
