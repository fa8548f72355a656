use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
    #[display("invalid operator \"{value}\", expected \"greater_than\" or \"less_than\"")]
    InvalidOperator { value: String },
    #[display("invalid threshold \"{value}\", expected an exact decimal string")]
    InvalidThreshold { value: String },
}

#[derive(Debug, Display, Error)]
pub enum FetchError {
    #[display("request to {exchange} failed")]
    Network { exchange: String },
    #[display("{exchange} response has no ticker for {pair}")]
    NotFound { exchange: String, pair: String },
    #[display("malformed ticker data from {exchange}")]
    MalformedData { exchange: String },
}

#[derive(Debug, Display, Error)]
pub enum NotifyError {
    #[display("failed to deliver notification via {channel}")]
    Delivery { channel: String },
}
