//! Session configuration: target endpoint, reconnect backoff and the
//! optional `auth` handshake payload.

use serde_json::{json, Value};
use std::time::Duration;

/// Configuration of a [`Ros`][crate::Ros] session.
///
/// Builder-style setters; only `host` is mandatory.
///
/// # Example
///
/// ```rust
/// use roswire_client::ConnectionOptions;
/// use std::time::Duration;
///
/// let opts = ConnectionOptions::new("robot.local")
///     .with_port(9090)
///     .with_max_retries(5)
///     .with_default_timeout(Duration::from_secs(3));
/// assert_eq!(opts.url(), "ws://robot.local:9090");
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Host name or IP address of the rosbridge server.
    pub host: String,
    /// rosbridge port, conventionally 9090.
    pub port: u16,
    /// `true` for `wss://`.
    pub secure: bool,
    /// First reconnect delay after an unexpected close.
    pub initial_delay: Duration,
    /// Ceiling for the exponential backoff.
    pub max_delay: Duration,
    /// Maximum reconnect attempts; `0` means unlimited.
    pub max_retries: u32,
    /// Default deadline for blocking calls and the `run` readiness wait.
    pub default_timeout: Duration,
    /// Credentials sent as an `auth` frame right after the socket opens.
    pub authentication: Option<AuthCredentials>,
}

impl ConnectionOptions {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 9090,
            secure: false,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_retries: 0,
            default_timeout: Duration::from_secs(10),
            authentication: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_authentication(mut self, auth: AuthCredentials) -> Self {
        self.authentication = Some(auth);
        self
    }

    /// The WebSocket endpoint URL.
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Payload of the rosbridge `auth` op, as issued by a trusted rosauth
/// source.
#[derive(Debug, Clone)]
pub struct AuthCredentials {
    /// MAC (hash) string given by the trusted source.
    pub mac: String,
    /// IP of the client.
    pub client: String,
    /// IP of the destination.
    pub dest: String,
    /// Random string given by the trusted source.
    pub rand: String,
    /// Time of the authorization request.
    pub t: f64,
    /// User access level.
    pub level: String,
    /// End time of the session.
    pub end: f64,
}

impl AuthCredentials {
    pub(crate) fn to_frame(&self) -> Value {
        json!({
            "op": "auth",
            "mac": self.mac,
            "client": self.client,
            "dest": self.dest,
            "rand": self.rand,
            "t": self.t,
            "level": self.level,
            "end": self.end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_scheme_follows_secure_flag() {
        let opts = ConnectionOptions::new("localhost");
        assert_eq!(opts.url(), "ws://localhost:9090");

        let opts = ConnectionOptions::new("localhost").with_secure(true).with_port(443);
        assert_eq!(opts.url(), "wss://localhost:443");
    }

    #[test]
    fn defaults_match_protocol_conventions() {
        let opts = ConnectionOptions::new("localhost");
        assert_eq!(opts.port, 9090);
        assert_eq!(opts.initial_delay, Duration::from_secs(1));
        assert_eq!(opts.max_delay, Duration::from_secs(60));
        assert_eq!(opts.max_retries, 0, "zero means retry forever");
        assert_eq!(opts.default_timeout, Duration::from_secs(10));
        assert!(opts.authentication.is_none());
    }

    #[test]
    fn auth_frame_carries_all_fields() {
        let auth = AuthCredentials {
            mac: "abc".into(),
            client: "192.168.0.2".into(),
            dest: "192.168.0.3".into(),
            rand: "xyz".into(),
            t: 1.5,
            level: "admin".into(),
            end: 99.0,
        };
        let frame = auth.to_frame();
        assert_eq!(frame["op"], "auth");
        assert_eq!(frame["mac"], "abc");
        assert_eq!(frame["level"], "admin");
    }
}
