//! Connection configuration.

use std::time::Duration;

/// How the client authenticates after key exchange.
#[derive(Debug, Clone)]
pub enum Auth {
    /// PIN login for the standard panel families.
    Pin(String),
    /// Username/password login for the extended (x700) family.
    Account {
        /// Panel user name (up to 32 ASCII characters)
        username: String,
        /// Panel user password (up to 32 ASCII characters)
        password: String,
    },
}

/// Everything needed to open one panel connection.
///
/// The timing knobs exist for tests and unusual links; the defaults match
/// the panels' expectations and rarely need touching.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Panel host name or address.
    pub host: String,
    /// Panel TCP port.
    pub port: u16,
    /// The 24/36/48-character encryption password configured on the panel.
    pub encryption_key: String,
    /// Login credentials.
    pub auth: Auth,
    /// Per-call response timeout.
    pub call_timeout: Duration,
    /// Delay between control-session status polls while arming.
    pub arm_poll_interval: Duration,
    /// Number of status polls before an arm attempt times out.
    pub arm_poll_ticks: u32,
    /// Extra polls granted after a force action.
    pub force_poll_ticks: u32,
    /// Settle delay between a COS notification and the change-bitmap query.
    pub cos_settle: Duration,
    /// Keep-alive ping interval once logged in.
    pub keepalive_interval: Duration,
}

impl ClientConfig {
    /// Configuration with default timings for `host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, encryption_key: impl Into<String>, auth: Auth) -> Self {
        Self {
            host: host.into(),
            port,
            encryption_key: encryption_key.into(),
            auth,
            call_timeout: Duration::from_secs(5),
            arm_poll_interval: Duration::from_millis(300),
            arm_poll_ticks: 60,
            force_poll_ticks: 10,
            cos_settle: Duration::from_millis(50),
            keepalive_interval: Duration::from_secs(30),
        }
    }

    /// `host:port` for connecting and diagnostics.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
