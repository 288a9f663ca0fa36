//! A blocking MySQL session.
//!
//! The session owns one socket and runs the whole protocol on it:
//!
//! 1. Server greeting, optional TLS upgrade, handshake response
//! 2. Authentication, including plugin switches and the caching_sha2 full path
//! 3. COM_QUERY with text rows, COM_STMT_* with binary rows
//! 4. Draining of trailing results so the next command starts in sync

#![allow(clippy::cast_possible_truncation)]

use sqldao_core::error::{ConnectionError, ConnectionErrorKind, ProtocolError, codes};
use sqldao_core::{Driver, DriverError, DriverResult, PreparedStatement, ResultSet, Value};

use crate::auth::{self, caching_sha2, plugins};
use crate::config::MySqlConfig;
use crate::protocol::server_status::{SERVER_MORE_RESULTS_EXISTS, SERVER_STATUS_IN_TRANS};
use crate::protocol::writer::build_command_packet;
use crate::protocol::{
    Command, MAX_PACKET_SIZE, OkPacket, PacketReader, PacketWriter, build_stmt_close_packet,
    build_stmt_execute_packet, build_stmt_prepare_packet, capabilities, parse_stmt_prepare_ok,
};
use crate::stream::{PacketStream, Stream};
use crate::tls::{build_ssl_request_packet, tls_error};
use crate::types::{ColumnDef, decode_text_value, read_binary_value};

/// What the server announced in its initial handshake packet.
#[derive(Debug, Clone)]
pub struct ServerGreeting {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub capabilities: u32,
    pub charset: u8,
    pub status_flags: u16,
    /// Scramble, without the trailing NUL
    pub auth_data: Vec<u8>,
    pub auth_plugin: String,
}

impl ServerGreeting {
    /// Parse a Protocol::HandshakeV10 payload.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut reader = PacketReader::new(data);
        let protocol_version = reader.read_u8()?;
        if protocol_version != 10 {
            return None;
        }
        let server_version = reader.read_null_string()?;
        let connection_id = reader.read_u32_le()?;
        let mut auth_data = reader.read_bytes(8)?.to_vec();
        reader.skip(1);
        let mut caps = u32::from(reader.read_u16_le()?);

        let mut greeting = Self {
            protocol_version,
            server_version,
            connection_id,
            capabilities: caps,
            charset: 0,
            status_flags: 0,
            auth_data: Vec::new(),
            auth_plugin: plugins::MYSQL_NATIVE_PASSWORD.to_string(),
        };
        if reader.is_empty() {
            greeting.auth_data = auth_data;
            return Some(greeting);
        }

        greeting.charset = reader.read_u8()?;
        greeting.status_flags = reader.read_u16_le()?;
        caps |= u32::from(reader.read_u16_le()?) << 16;
        greeting.capabilities = caps;
        let auth_data_len = reader.read_u8()?;
        reader.skip(10);

        if caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            let part2_len = usize::from(auth_data_len).saturating_sub(8).max(13);
            let part2 = reader.read_bytes(part2_len.min(reader.remaining()))?;
            auth_data.extend_from_slice(part2.strip_suffix(&[0]).unwrap_or(part2));
        }
        greeting.auth_data = auth_data;

        if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            let plugin = reader.read_null_string()?;
            if !plugin.is_empty() {
                greeting.auth_plugin = plugin;
            }
        }
        Some(greeting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Ready,
    /// A socket read or write failed; only a new session can recover.
    Broken,
    Closed,
}

/// A connected, authenticated MySQL session.
#[derive(Debug)]
pub struct MySqlConnection {
    io: PacketStream,
    config: MySqlConfig,
    greeting: ServerGreeting,
    client_caps: u32,
    status_flags: u16,
    affected_rows: u64,
    last_insert_id: u64,
    warnings: u16,
    state: SessionState,
}

fn protocol_error(message: impl Into<String>) -> DriverError {
    DriverError::Protocol(ProtocolError {
        message: message.into(),
        source: None,
    })
}

fn truncated_row() -> DriverError {
    protocol_error("truncated row packet")
}

fn server_error(payload: &[u8]) -> DriverError {
    match PacketReader::new(payload).parse_err_packet() {
        Some(err) => DriverError::Server(err.into()),
        None => protocol_error("malformed error packet"),
    }
}

fn gone_away(reason: &str) -> DriverError {
    DriverError::Connection(ConnectionError {
        kind: ConnectionErrorKind::Disconnected,
        code: codes::CR_SERVER_GONE_ERROR,
        message: format!("MySQL server has gone away ({})", reason),
        source: None,
    })
}

/// An ERR packet while logging in is a connect-time failure, not a query error.
fn login_error(payload: &[u8], kind: ConnectionErrorKind) -> DriverError {
    match PacketReader::new(payload).parse_err_packet() {
        Some(err) => DriverError::Connection(ConnectionError {
            kind,
            code: err.error_code,
            message: err.error_message,
            source: None,
        }),
        None => protocol_error("malformed error packet during login"),
    }
}

fn parse_text_row(payload: &[u8], columns: &[ColumnDef]) -> DriverResult<Vec<Value>> {
    let mut reader = PacketReader::new(payload);
    columns
        .iter()
        .map(|col| {
            if reader.peek() == Some(0xFB) {
                reader.skip(1);
                return Ok(Value::Null);
            }
            let bytes = reader.read_lenenc_bytes().ok_or_else(truncated_row)?;
            Ok(decode_text_value(col, Some(&bytes)))
        })
        .collect()
}

/// Binary row: `0x00`, NULL bitmap with a 2-bit offset, then the non-NULL cells.
fn parse_binary_row(payload: &[u8], columns: &[ColumnDef]) -> DriverResult<Vec<Value>> {
    let mut reader = PacketReader::new(payload);
    reader.skip(1);
    let bitmap = reader
        .read_bytes((columns.len() + 2).div_ceil(8))
        .ok_or_else(truncated_row)?;
    columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            let bit = i + 2;
            if bitmap[bit / 8] & (1 << (bit % 8)) != 0 {
                return Ok(Value::Null);
            }
            read_binary_value(&mut reader, col).ok_or_else(truncated_row)
        })
        .collect()
}

impl MySqlConnection {
    /// Open a socket, log in, and run the configured init command.
    #[tracing::instrument(level = "debug", skip(config), fields(host = %config.host, port = config.port))]
    pub fn connect(config: MySqlConfig) -> DriverResult<Self> {
        let mut io = PacketStream::new(Stream::open(&config)?);

        let payload = io.read_packet()?;
        if payload.first() == Some(&0xFF) {
            return Err(login_error(&payload, ConnectionErrorKind::Connect));
        }
        let greeting =
            ServerGreeting::parse(&payload).ok_or_else(|| protocol_error("malformed server handshake"))?;
        let client_caps = config.capability_flags() & greeting.capabilities;

        if config.wants_tls() {
            if greeting.capabilities & capabilities::CLIENT_SSL == 0 {
                return Err(tls_error("SSL connection error: SSL is required but the server doesn't support it"));
            }
            let request =
                build_ssl_request_packet(client_caps, config.max_packet_size, config.charset, 1);
            io.write_framed(&request, 2)?;
            io = io.upgrade(&config.host, config.verify_server_cert())?;
            tracing::debug!("TLS established");
        }

        let status_flags = greeting.status_flags;
        let mut conn = Self {
            io,
            config,
            greeting,
            client_caps,
            status_flags,
            affected_rows: 0,
            last_insert_id: 0,
            warnings: 0,
            state: SessionState::Ready,
        };
        conn.send_handshake_response()?;
        conn.authenticate()?;

        if let Some(sql) = conn.config.init_command.clone() {
            conn.query(&sql)?;
        }
        tracing::debug!(
            thread_id = conn.greeting.connection_id,
            server_version = %conn.greeting.server_version,
            "connected"
        );
        Ok(conn)
    }

    pub fn server_version(&self) -> &str {
        &self.greeting.server_version
    }

    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    pub fn in_transaction(&self) -> bool {
        self.status_flags & SERVER_STATUS_IN_TRANS != 0
    }

    /// Send COM_QUIT if the session is usable, then shut the socket down.
    ///
    /// Idempotent. A failed quit is logged; the socket is closed either way.
    pub fn quit(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if self.state == SessionState::Ready {
            let quit = build_command_packet(Command::Quit, &[]);
            if let Err(err) = self.io.write_framed(&quit, 1) {
                tracing::debug!(error = %err, "COM_QUIT failed");
            }
        }
        self.io.shutdown();
        self.state = SessionState::Closed;
        tracing::debug!(thread_id = self.greeting.connection_id, "closed");
    }

    fn deprecate_eof(&self) -> bool {
        self.client_caps & capabilities::CLIENT_DEPRECATE_EOF != 0
    }

    fn password(&self) -> &str {
        self.config.password.as_deref().unwrap_or("")
    }

    fn auth_response(&self, plugin: &str, seed: &[u8]) -> Vec<u8> {
        if plugin == plugins::SHA256_PASSWORD && self.io.is_secure() && !self.password().is_empty() {
            return auth::cleartext_password(self.password());
        }
        auth::scramble_for_plugin(plugin, self.password(), seed)
    }

    fn send_handshake_response(&mut self) -> DriverResult<()> {
        let caps = self.client_caps;
        let auth_response = self.auth_response(&self.greeting.auth_plugin, &self.greeting.auth_data);

        let mut writer = PacketWriter::with_capacity(128);
        writer.write_u32_le(caps);
        writer.write_u32_le(self.config.max_packet_size);
        writer.write_u8(self.config.charset);
        writer.write_zeros(23);
        writer.write_null_string(&self.config.user);

        if caps & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            writer.write_lenenc_bytes(&auth_response);
        } else {
            // scrambles are 20 or 32 bytes
            writer.write_u8(auth_response.len() as u8);
            writer.write_bytes(&auth_response);
        }

        if caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
            writer.write_null_string(self.config.database.as_deref().unwrap_or(""));
        }
        if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            writer.write_null_string(&self.greeting.auth_plugin);
        }
        if caps & capabilities::CLIENT_CONNECT_ATTRS != 0 {
            let mut attrs = PacketWriter::new();
            for (key, value) in &self.config.attributes {
                attrs.write_lenenc_string(key);
                attrs.write_lenenc_string(value);
            }
            writer.write_lenenc_bytes(attrs.as_bytes());
        }

        self.io.write_packet(writer.as_bytes())
    }

    /// Follow the server through the login exchange until OK or ERR.
    fn authenticate(&mut self) -> DriverResult<()> {
        let mut plugin = self.greeting.auth_plugin.clone();
        let mut seed = self.greeting.auth_data.clone();
        let mut awaiting_key = false;

        loop {
            let payload = self.io.read_packet()?;
            match payload.first().copied() {
                Some(0x00) => {
                    if let Some(ok) = PacketReader::new(&payload).parse_ok_packet() {
                        self.status_flags = ok.status_flags;
                    }
                    tracing::trace!(plugin = %plugin, "authenticated");
                    return Ok(());
                }
                Some(0xFF) => {
                    return Err(login_error(&payload, ConnectionErrorKind::Authentication));
                }
                Some(0xFE) => {
                    let mut reader = PacketReader::new(&payload[1..]);
                    plugin = reader.read_null_string().unwrap_or_default();
                    let rest = reader.read_rest();
                    seed = rest.strip_suffix(&[0]).unwrap_or(rest).to_vec();
                    tracing::trace!(plugin = %plugin, "auth switch");
                    let response = self.auth_response(&plugin, &seed);
                    self.io.write_packet(&response)?;
                    awaiting_key = false;
                }
                Some(0x01) => {
                    let data = &payload[1..];
                    if awaiting_key || plugin == plugins::SHA256_PASSWORD {
                        let encrypted = auth::sha256_password_rsa(self.password(), &seed, data, true)?;
                        self.io.write_packet(&encrypted)?;
                        awaiting_key = false;
                        continue;
                    }
                    match data.first().copied() {
                        Some(caching_sha2::FAST_AUTH_SUCCESS) => {}
                        Some(caching_sha2::PERFORM_FULL_AUTH) => {
                            if self.io.is_secure() {
                                let clear = auth::cleartext_password(self.password());
                                self.io.write_packet(&clear)?;
                            } else {
                                self.io.write_packet(&[caching_sha2::REQUEST_PUBLIC_KEY])?;
                                awaiting_key = true;
                            }
                        }
                        _ => return Err(protocol_error("unexpected auth-more-data packet")),
                    }
                }
                _ => return Err(protocol_error("unexpected packet during authentication")),
            }
        }
    }

    fn ensure_ready(&self) -> DriverResult<()> {
        match self.state {
            SessionState::Ready => Ok(()),
            SessionState::Broken => Err(gone_away("connection was lost")),
            SessionState::Closed => Err(gone_away("connection is closed")),
        }
    }

    /// Mark the session broken when a call lost the socket.
    fn track<T>(&mut self, result: DriverResult<T>) -> DriverResult<T> {
        if let Err(err) = &result {
            if err.is_connection_lost() && self.state == SessionState::Ready {
                tracing::debug!(code = err.code(), "session broken");
                self.state = SessionState::Broken;
            }
        }
        result
    }

    fn send_command(&mut self, packet: &[u8]) -> DriverResult<()> {
        self.ensure_ready()?;
        self.io.write_framed(packet, 1)
    }

    fn apply_ok(&mut self, ok: &OkPacket) {
        self.affected_rows = ok.affected_rows;
        self.last_insert_id = ok.last_insert_id;
        self.status_flags = ok.status_flags;
        self.warnings = ok.warnings;
    }

    /// Read the first result of a command and discard any that follow.
    fn read_results(&mut self, binary: bool) -> DriverResult<Option<ResultSet>> {
        let first = self.read_result(binary)?;
        let (affected_rows, last_insert_id) = (self.affected_rows, self.last_insert_id);
        let mut drained = 0usize;
        while self.status_flags & SERVER_MORE_RESULTS_EXISTS != 0 {
            self.read_result(binary)?;
            drained += 1;
        }
        if drained > 0 {
            tracing::trace!(drained, "discarded trailing results");
        }
        self.affected_rows = affected_rows;
        self.last_insert_id = last_insert_id;
        Ok(first)
    }

    fn read_result(&mut self, binary: bool) -> DriverResult<Option<ResultSet>> {
        let payload = self.io.read_packet()?;
        match payload.first().copied() {
            None => Err(protocol_error("empty response packet")),
            Some(0x00) => {
                let ok = PacketReader::new(&payload)
                    .parse_ok_packet()
                    .ok_or_else(|| protocol_error("malformed OK packet"))?;
                self.apply_ok(&ok);
                Ok(None)
            }
            Some(0xFF) => {
                self.status_flags &= !SERVER_MORE_RESULTS_EXISTS;
                Err(server_error(&payload))
            }
            Some(0xFB) => {
                // decline the file request so the session stays usable
                self.io.write_packet(&[])?;
                let reply = self.io.read_packet()?;
                match PacketReader::new(&reply).parse_ok_packet() {
                    Some(ok) if reply.first() == Some(&0x00) => self.status_flags = ok.status_flags,
                    _ => self.status_flags &= !SERVER_MORE_RESULTS_EXISTS,
                }
                Err(DriverError::Unsupported(
                    "LOAD DATA LOCAL INFILE is not supported".to_string(),
                ))
            }
            Some(_) => self.read_result_set(&payload, binary).map(Some),
        }
    }

    fn read_definitions(&mut self, count: u64) -> DriverResult<Vec<ColumnDef>> {
        let count = usize::try_from(count).map_err(|_| protocol_error("column count overflow"))?;
        let mut defs = Vec::with_capacity(count);
        for _ in 0..count {
            let payload = self.io.read_packet()?;
            defs.push(ColumnDef::parse(&payload).ok_or_else(|| protocol_error("malformed column definition"))?);
        }
        if count > 0 && !self.deprecate_eof() {
            self.io.read_packet()?;
        }
        Ok(defs)
    }

    fn read_result_set(&mut self, header: &[u8], binary: bool) -> DriverResult<ResultSet> {
        let column_count = PacketReader::new(header)
            .read_lenenc_int()
            .ok_or_else(|| protocol_error("malformed column count"))?;
        let columns = self.read_definitions(column_count)?;

        let mut rows = Vec::new();
        loop {
            let payload = self.io.read_packet()?;
            match payload.first().copied() {
                // a row can only start with 0xFE when it spans packets
                Some(0xFE) if payload.len() < MAX_PACKET_SIZE => {
                    let mut reader = PacketReader::new(&payload);
                    if self.deprecate_eof() {
                        let ok = reader
                            .parse_ok_packet()
                            .ok_or_else(|| protocol_error("malformed result set terminator"))?;
                        self.status_flags = ok.status_flags;
                        self.warnings = ok.warnings;
                    } else {
                        let eof = reader
                            .parse_eof_packet()
                            .ok_or_else(|| protocol_error("malformed EOF packet"))?;
                        self.status_flags = eof.status_flags;
                        self.warnings = eof.warnings;
                    }
                    break;
                }
                Some(0xFF) => {
                    self.status_flags &= !SERVER_MORE_RESULTS_EXISTS;
                    return Err(server_error(&payload));
                }
                _ if binary => rows.push(parse_binary_row(&payload, &columns)?),
                _ => rows.push(parse_text_row(&payload, &columns)?),
            }
        }

        self.affected_rows = rows.len() as u64;
        let names = columns.into_iter().map(|c| c.name).collect();
        Ok(ResultSet::from_values(names, rows))
    }

    fn run_query(&mut self, sql: &str) -> DriverResult<Option<ResultSet>> {
        tracing::trace!(sql = %sql, "COM_QUERY");
        self.send_command(&build_command_packet(Command::Query, sql.as_bytes()))?;
        self.read_results(false)
    }

    fn run_prepare(&mut self, sql: &str) -> DriverResult<PreparedStatement> {
        tracing::trace!(sql = %sql, "COM_STMT_PREPARE");
        self.send_command(&build_stmt_prepare_packet(sql))?;
        let payload = self.io.read_packet()?;
        if payload.first() == Some(&0xFF) {
            return Err(server_error(&payload));
        }
        let ok = parse_stmt_prepare_ok(&payload)
            .ok_or_else(|| protocol_error("malformed COM_STMT_PREPARE response"))?;
        self.read_definitions(u64::from(ok.num_params))?;
        let columns = self.read_definitions(u64::from(ok.num_columns))?;
        Ok(PreparedStatement::with_columns(
            u64::from(ok.statement_id),
            sql.to_string(),
            usize::from(ok.num_params),
            columns.into_iter().map(|c| c.name).collect(),
        ))
    }

    fn run_execute(&mut self, stmt: &PreparedStatement, params: &[Value]) -> DriverResult<Option<ResultSet>> {
        let id = u32::try_from(stmt.id()).map_err(|_| protocol_error("statement id out of range"))?;
        if !stmt.validate_params(params) {
            return Err(protocol_error(format!(
                "statement expects {} parameters, got {}",
                stmt.param_count(),
                params.len()
            )));
        }
        self.send_command(&build_stmt_execute_packet(id, params))?;
        self.read_results(true)
    }

    fn run_ping(&mut self) -> DriverResult<()> {
        self.send_command(&build_command_packet(Command::Ping, &[]))?;
        let payload = self.io.read_packet()?;
        match payload.first() {
            Some(0x00) => Ok(()),
            Some(0xFF) => Err(server_error(&payload)),
            _ => Err(protocol_error("unexpected reply to COM_PING")),
        }
    }
}

impl Driver for MySqlConnection {
    fn thread_id(&self) -> u32 {
        self.greeting.connection_id
    }

    fn query(&mut self, sql: &str) -> DriverResult<Option<ResultSet>> {
        let result = self.run_query(sql);
        self.track(result)
    }

    fn prepare(&mut self, sql: &str) -> DriverResult<PreparedStatement> {
        let result = self.run_prepare(sql);
        self.track(result)
    }

    fn execute(&mut self, stmt: &PreparedStatement, params: &[Value]) -> DriverResult<Option<ResultSet>> {
        let result = self.run_execute(stmt, params);
        self.track(result)
    }

    fn close_statement(&mut self, stmt: &PreparedStatement) {
        let Ok(id) = u32::try_from(stmt.id()) else {
            return;
        };
        // COM_STMT_CLOSE has no reply
        let result = self.send_command(&build_stmt_close_packet(id));
        if let Err(err) = self.track(result) {
            tracing::debug!(statement_id = id, error = %err, "statement close failed");
        }
    }

    fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    fn ping(&mut self) -> DriverResult<()> {
        let result = self.run_ping();
        self.track(result)
    }

    fn close(&mut self) -> DriverResult<()> {
        self.quit();
        Ok(())
    }
}

impl Drop for MySqlConnection {
    fn drop(&mut self) {
        self.quit();
    }
}
