//! Error types for telemetry operations.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use prometheus::Error as PrometheusError;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors raised by telemetry helpers.
#[derive(Debug)]
pub enum TelemetryError {
    /// Installing the tracing subscriber failed.
    SubscriberInstall {
        /// Underlying tracing subscriber error.
        source: tracing_subscriber::util::TryInitError,
    },
    /// Building a Prometheus collector failed.
    MetricsCollector {
        /// Metric identifier tied to the failure.
        name: &'static str,
        /// Underlying Prometheus error.
        source: PrometheusError,
    },
    /// Registering a Prometheus collector failed.
    MetricsRegister {
        /// Metric identifier tied to the failure.
        name: &'static str,
        /// Underlying Prometheus error.
        source: PrometheusError,
    },
    /// Encoding Prometheus metrics failed.
    MetricsEncode {
        /// Underlying Prometheus error.
        source: PrometheusError,
    },
    /// Rendered metrics output was not valid UTF-8.
    MetricsUtf8 {
        /// Underlying UTF-8 conversion error.
        source: std::string::FromUtf8Error,
    },
    /// The push gateway URL could not be parsed.
    GatewayUrl {
        /// Offending URL.
        url: String,
        /// Underlying parse error.
        source: url::ParseError,
    },
    /// Building the HTTP client failed.
    HttpClient {
        /// Underlying reqwest error.
        source: reqwest::Error,
    },
}

impl Display for TelemetryError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::SubscriberInstall { .. } => "tracing subscriber already installed",
            Self::MetricsCollector { .. } => "transfer metric could not be created",
            Self::MetricsRegister { .. } => "transfer metric could not be registered",
            Self::MetricsEncode { .. } => "transfer metrics could not be encoded",
            Self::MetricsUtf8 { .. } => "encoded metrics were not utf-8",
            Self::GatewayUrl { .. } => "push gateway url is invalid",
            Self::HttpClient { .. } => "push gateway client could not be built",
        };
        formatter.write_str(message)
    }
}

impl Error for TelemetryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::SubscriberInstall { source } => Some(source),
            Self::MetricsCollector { source, .. }
            | Self::MetricsRegister { source, .. }
            | Self::MetricsEncode { source } => Some(source),
            Self::MetricsUtf8 { source } => Some(source),
            Self::GatewayUrl { source, .. } => Some(source),
            Self::HttpClient { source } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_constant_and_keep_their_source() {
        let registry = TelemetryError::MetricsRegister {
            name: "transfer_total_bytes",
            source: PrometheusError::AlreadyReg,
        };
        assert_eq!(registry.to_string(), "transfer metric could not be registered");
        assert!(registry.source().is_some());

        let gateway = url::Url::parse("not a url").map_err(|source| TelemetryError::GatewayUrl {
            url: "not a url".to_string(),
            source,
        });
        let Err(gateway) = gateway else {
            panic!("relative url parsed without a base");
        };
        assert_eq!(gateway.to_string(), "push gateway url is invalid");
        assert!(gateway.source().is_some());
    }
}
