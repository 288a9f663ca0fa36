//! Connection parameters for the native client.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::capabilities::{
    CLIENT_CONNECT_ATTRS, CLIENT_CONNECT_WITH_DB, CLIENT_SSL, CLIENT_SSL_VERIFY_SERVER_CERT,
    DEFAULT_CLIENT_FLAGS, UNSUPPORTED_CLIENT_FLAGS,
};

/// MySQL connection configuration.
#[derive(Debug, Clone)]
pub struct MySqlConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Schema selected at connect time
    pub database: Option<String>,
    /// Collation id sent in the handshake response
    pub charset: u8,
    pub connect_timeout: Duration,
    /// Unix socket path; when set the host and port are not dialed
    pub socket: Option<PathBuf>,
    /// Extra `CLIENT_*` bits requested by the caller
    pub client_flags: u32,
    /// Statement run right after authentication
    pub init_command: Option<String>,
    /// Connection attributes (CLIENT_CONNECT_ATTRS)
    pub attributes: HashMap<String, String>,
    pub max_packet_size: u32,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: String::new(),
            password: None,
            database: None,
            charset: crate::protocol::charset::DEFAULT_CHARSET,
            connect_timeout: Duration::from_secs(30),
            socket: None,
            client_flags: 0,
            init_command: None,
            attributes: HashMap::new(),
            max_packet_size: 64 * 1024 * 1024,
        }
    }
}

impl MySqlConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn charset(mut self, charset: u8) -> Self {
        self.charset = charset;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket = Some(path.into());
        self
    }

    /// Request extra capability bits, e.g. `CLIENT_SSL`.
    pub fn client_flags(mut self, flags: u32) -> Self {
        self.client_flags = flags;
        self
    }

    pub fn init_command(mut self, sql: impl Into<String>) -> Self {
        self.init_command = Some(sql.into());
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn max_packet_size(mut self, size: u32) -> Self {
        self.max_packet_size = size;
        self
    }

    /// `host:port`, for dialing and diagnostics.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn wants_tls(&self) -> bool {
        self.client_flags & CLIENT_SSL != 0
    }

    pub fn verify_server_cert(&self) -> bool {
        self.client_flags & CLIENT_SSL_VERIFY_SERVER_CERT != 0
    }

    /// Capabilities to offer the server, before intersecting with its own.
    pub fn capability_flags(&self) -> u32 {
        let requested = self.client_flags & !(UNSUPPORTED_CLIENT_FLAGS | CLIENT_SSL_VERIFY_SERVER_CERT);
        let mut flags = DEFAULT_CLIENT_FLAGS | requested;
        if self.database.is_some() {
            flags |= CLIENT_CONNECT_WITH_DB;
        }
        if !self.attributes.is_empty() {
            flags |= CLIENT_CONNECT_ATTRS;
        }
        flags
    }
}
