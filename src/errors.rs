//! Error types and failure categorization.
//!
//! Per-query failures never surface as `Err` values: they become failed
//! samples and are classified here into an [`ErrorCategory`] for logs and
//! metrics. Infrastructure failures (management API, result log) use the
//! `thiserror` enums below.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Categories of failed search queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// HTTP 4xx errors (client errors)
    ClientError,

    /// HTTP 5xx errors (server errors, throttling from an overloaded replica)
    ServerError,

    /// Network connectivity errors (DNS, connection refused, etc.)
    NetworkError,

    /// Request timeout errors
    TimeoutError,

    /// TLS/SSL certificate errors
    TlsError,

    /// Response arrived but the server-side latency header was missing or unparseable
    MissingLatencyHeader,

    /// Other/unknown errors
    OtherError,
}

impl ErrorCategory {
    /// Categorize an HTTP status code against the expected success code.
    ///
    /// Returns None when the status matches `success_code`.
    pub fn from_status_code(status_code: u16, success_code: u16) -> Option<Self> {
        if status_code == success_code {
            return None;
        }
        match status_code {
            400..=499 => Some(ErrorCategory::ClientError),
            500..=599 => Some(ErrorCategory::ServerError),
            _ => Some(ErrorCategory::OtherError),
        }
    }

    /// Categorize a reqwest transport error.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            ErrorCategory::TimeoutError
        } else if error.is_connect() || error.is_request() || error.is_body() || error.is_decode()
        {
            ErrorCategory::NetworkError
        } else if error.is_redirect() {
            ErrorCategory::ClientError
        } else {
            let error_msg = error.to_string().to_lowercase();

            if error_msg.contains("certificate")
                || error_msg.contains("tls")
                || error_msg.contains("ssl")
            {
                ErrorCategory::TlsError
            } else if error_msg.contains("timeout") {
                ErrorCategory::TimeoutError
            } else if error_msg.contains("dns")
                || error_msg.contains("resolve")
                || error_msg.contains("connect")
            {
                ErrorCategory::NetworkError
            } else {
                ErrorCategory::OtherError
            }
        }
    }

    /// Get the Prometheus label for this error category.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::MissingLatencyHeader => "missing_latency_header",
            ErrorCategory::OtherError => "other_error",
        }
    }

    /// Get a human-readable description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "HTTP 4xx Client Errors",
            ErrorCategory::ServerError => "HTTP 5xx Server Errors",
            ErrorCategory::NetworkError => "Network/Connection Errors",
            ErrorCategory::TimeoutError => "Request Timeout Errors",
            ErrorCategory::TlsError => "TLS/SSL Certificate Errors",
            ErrorCategory::MissingLatencyHeader => "Missing Server Latency Header",
            ErrorCategory::OtherError => "Other/Unknown Errors",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors from computing run statistics.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("no samples were collected; statistics are undefined")]
    NoData,

    #[error("percentile {0} is outside [0, 1]")]
    InvalidPercentile(f64),
}

/// Errors from the resource-management API.
#[derive(Error, Debug)]
pub enum ManagementError {
    #[error("management request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("management API returned HTTP {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("unrecognized service status '{0}'")]
    UnknownStatus(String),

    #[error("management response is missing '{0}'")]
    MissingField(&'static str),
}

/// Errors from writing the results log.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to write results log: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode results row: {0}")]
    Csv(#[from] csv::Error),
}

/// Errors that end a ramp early.
#[derive(Error, Debug)]
pub enum RampError {
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Errors that end a sweep.
#[derive(Error, Debug)]
pub enum ScaleError {
    #[error("service did not converge to {replicas} replicas / {partitions} partitions within {waited:?}")]
    ConvergenceTimeout {
        replicas: u32,
        partitions: u32,
        waited: Duration,
    },

    #[error(transparent)]
    Ramp(#[from] RampError),
}
