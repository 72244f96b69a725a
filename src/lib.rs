pub mod config;
pub mod db;
pub mod http;
pub mod id;
pub mod metrics;
pub mod pricing;
pub mod ticket;

pub use self::config::Config;

/// Wire types of the HTTP boundary.
pub mod api {
    pub mod metrics;
    pub mod ticket;

    use serde::{Deserialize, Serialize};

    pub use self::{metrics::Metrics, ticket::NewTicket};

    /// Body of every non-2xx response.
    #[derive(Clone, Debug, Deserialize, Serialize)]
    pub struct Failure {
        pub error: String,

        /// Write step that failed, for diagnostics.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub stage: Option<String>,
    }
}
