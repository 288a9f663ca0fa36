//! Synchronous MySQL client for sqldao.
//!
//! The wire protocol is implemented directly over `std::net`:
//!
//! - Packet framing with sequence numbers
//! - Authentication (mysql_native_password, caching_sha2_password, sha256_password)
//! - Text protocol queries and server-side prepared statements
//! - TLS via rustls (`tls` feature) and unix sockets
//! - Escaping for SQL string literals
//!
//! # Example
//!
//! ```rust,ignore
//! use sqldao_core::Driver;
//! use sqldao_mysql::{MySqlConfig, MySqlConnection};
//!
//! let config = MySqlConfig::new()
//!     .host("127.0.0.1")
//!     .port(3306)
//!     .user("root")
//!     .password("pwd")
//!     .database("main");
//!
//! let mut conn = MySqlConnection::connect(config)?;
//! let rows = conn.query("SELECT 1")?;
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod stream;
pub mod tls;
pub mod types;

pub use config::MySqlConfig;
pub use connection::{MySqlConnection, ServerGreeting};
pub use protocol::capabilities::{CLIENT_SSL, CLIENT_SSL_VERIFY_SERVER_CERT};
pub use types::escape_string;
