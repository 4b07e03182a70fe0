use thiserror::Error;

/// Typed error kinds matching the error-handling design table: transient errors
/// stay local, business errors drive state-machine transitions, anything that
/// compromises the delta-neutral invariant escalates.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("subscription failed: {0}")]
    Subscription(String),

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("order not found: {0}")]
    NotFound(String),

    #[error("position query failed: {0}")]
    Query(String),

    #[error("stream gapped: {0}")]
    StreamGap(String),

    #[error("safety invariant violated: |net|={net} > 2*order_qty={bound}")]
    SafetyViolation {
        net: rust_decimal::Decimal,
        bound: rust_decimal::Decimal,
    },

    #[error("configuration error: {0}")]
    Config(String),
}
