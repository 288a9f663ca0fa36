//! Transport under a session: TCP, unix socket, or TLS over TCP, plus the
//! packet framing on top of it.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use sqldao_core::DriverError;
use sqldao_core::error::{ConnectionError, ConnectionErrorKind, codes};

use crate::config::MySqlConfig;
use crate::protocol::writer::frame_payload;
use crate::protocol::{MAX_PACKET_SIZE, PacketHeader};

#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
    #[cfg(feature = "tls")]
    Tls(Box<crate::tls::TlsStream<TcpStream>>),
}

fn connect_error(code: u16, message: String, err: io::Error) -> DriverError {
    let kind = if err.kind() == io::ErrorKind::ConnectionRefused {
        ConnectionErrorKind::Refused
    } else {
        ConnectionErrorKind::Connect
    };
    DriverError::Connection(ConnectionError {
        kind,
        code,
        message,
        source: Some(Box::new(err)),
    })
}

impl Stream {
    /// Dial the unix socket when one is configured, TCP otherwise.
    pub fn open(config: &MySqlConfig) -> Result<Self, DriverError> {
        #[cfg(unix)]
        {
            if let Some(path) = &config.socket {
                let stream = UnixStream::connect(path).map_err(|e| {
                    connect_error(
                        codes::CR_CONNECTION_ERROR,
                        format!(
                            "Can't connect to local MySQL server through socket '{}': {}",
                            path.display(),
                            e
                        ),
                        e,
                    )
                })?;
                return Ok(Stream::Unix(stream));
            }
        }
        Self::open_tcp(config)
    }

    fn open_tcp(config: &MySqlConfig) -> Result<Self, DriverError> {
        let host_error = |e: io::Error| {
            connect_error(
                codes::CR_CONN_HOST_ERROR,
                format!("Can't connect to MySQL server on '{}': {}", config.socket_addr(), e),
                e,
            )
        };
        let addrs = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(host_error)?;

        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "host resolved to no address");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true).map_err(host_error)?;
                    return Ok(Stream::Tcp(stream));
                }
                Err(e) => last_err = e,
            }
        }
        Err(host_error(last_err))
    }

    /// Connections over a local socket or TLS may carry a cleartext password.
    pub fn is_secure(&self) -> bool {
        !matches!(self, Stream::Tcp(_))
    }

    /// Best-effort teardown of the transport.
    pub fn shutdown(&mut self) {
        let result = match self {
            Stream::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Stream::Unix(s) => s.shutdown(Shutdown::Both),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.shutdown(),
        };
        if let Err(err) = result {
            tracing::trace!(error = %err, "socket shutdown failed");
        }
    }

    /// Wrap the TCP stream in TLS.
    #[cfg(feature = "tls")]
    pub fn upgrade(self, server_name: &str, verify: bool) -> Result<Self, DriverError> {
        match self {
            Stream::Tcp(tcp) => Ok(Stream::Tls(Box::new(crate::tls::TlsStream::connect(
                tcp,
                server_name,
                verify,
            )?))),
            other => Ok(other),
        }
    }

    #[cfg(not(feature = "tls"))]
    pub fn upgrade(self, _server_name: &str, _verify: bool) -> Result<Self, DriverError> {
        match self {
            Stream::Tcp(_) => Err(DriverError::Unsupported(
                "TLS requested but sqldao-mysql was built without the `tls` feature".to_string(),
            )),
            #[allow(unreachable_patterns)]
            other => Ok(other),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.read(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.write(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Stream::Unix(s) => s.flush(),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.flush(),
        }
    }
}

/// Framed packet I/O with sequence tracking.
///
/// Every failed socket read or write surfaces as a lost-connection error.
#[derive(Debug)]
pub struct PacketStream {
    stream: Stream,
    sequence_id: u8,
}

impl PacketStream {
    pub fn new(stream: Stream) -> Self {
        Self {
            stream,
            sequence_id: 0,
        }
    }

    pub fn is_secure(&self) -> bool {
        self.stream.is_secure()
    }

    /// Swap the transport for its TLS-wrapped form; the sequence carries over.
    pub fn upgrade(self, server_name: &str, verify: bool) -> Result<Self, DriverError> {
        Ok(Self {
            stream: self.stream.upgrade(server_name, verify)?,
            sequence_id: self.sequence_id,
        })
    }

    /// Read one logical packet, joining continuation packets.
    pub fn read_packet(&mut self) -> Result<Vec<u8>, DriverError> {
        let mut payload = Vec::new();
        loop {
            let mut header = [0u8; PacketHeader::SIZE];
            self.stream
                .read_exact(&mut header)
                .map_err(DriverError::lost_on_read)?;
            let header = PacketHeader::from_bytes(&header);
            let len = header.payload_length as usize;
            self.sequence_id = header.sequence_id.wrapping_add(1);

            let start = payload.len();
            payload.resize(start + len, 0);
            self.stream
                .read_exact(&mut payload[start..])
                .map_err(DriverError::lost_on_read)?;
            if len < MAX_PACKET_SIZE {
                return Ok(payload);
            }
        }
    }

    /// Frame `payload` with the current sequence number and send it.
    pub fn write_packet(&mut self, payload: &[u8]) -> Result<(), DriverError> {
        let packet = frame_payload(payload, self.sequence_id);
        let chunks = payload.len() / MAX_PACKET_SIZE + 1;
        self.sequence_id = self.sequence_id.wrapping_add(chunks as u8);
        self.send(&packet)
    }

    /// Send a packet that is already framed; `next_sequence` is what the
    /// following client packet must carry.
    pub fn write_framed(&mut self, packet: &[u8], next_sequence: u8) -> Result<(), DriverError> {
        self.sequence_id = next_sequence;
        self.send(packet)
    }

    fn send(&mut self, packet: &[u8]) -> Result<(), DriverError> {
        self.stream
            .write_all(packet)
            .and_then(|()| self.stream.flush())
            .map_err(DriverError::lost_on_write)
    }

    pub fn shutdown(&mut self) {
        self.stream.shutdown();
    }
}
