//! Line-oriented TCP relay in front of a [`LogStore`].
//!
//! Remote producers send one JSON object per line:
//!
//! ```text
//! {"sensor_id": "T01", "timestamp": "2026-10-19T12:00:00", "value": 21.5, "unit": "°C"}
//! ```
//!
//! The server ingests every valid message and answers `ACK\n`. Malformed
//! lines are logged and get no reply, so a client waiting for its ACK times
//! out and retries. Blank lines are skipped.
//!
//! Uses `std::net` with one thread per connection; the accept loop polls a
//! non-blocking listener so [`ShutdownHandle::shutdown`] takes effect within
//! [`ACCEPT_POLL_INTERVAL`].

use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entry::{LogEntry, format_timestamp, parse_timestamp};
use crate::error::RelayError;
use crate::store::LogStore;

/// Reply sent for every ingested message.
pub const ACK: &str = "ACK";

/// How often the accept loop checks for shutdown.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One reading on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    /// Identifier of the sensor.
    pub sensor_id: String,
    /// ISO-8601 timestamp.
    pub timestamp: String,
    /// The measured value.
    pub value: f64,
    /// Unit of the value.
    pub unit: String,
}

impl RelayMessage {
    /// Builds the wire form of an entry.
    pub fn from_entry(entry: &LogEntry) -> Self {
        Self {
            sensor_id: entry.sensor_id.clone(),
            timestamp: format_timestamp(&entry.timestamp),
            value: entry.value,
            unit: entry.unit.clone(),
        }
    }

    /// Parses one line of JSON.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Json`] for malformed JSON or missing fields.
    pub fn decode(line: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(line)?)
    }

    /// Serializes the message as one line, newline included.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Json`] if the value cannot be represented
    /// (non-finite floats).
    pub fn encode(&self) -> Result<String, RelayError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Converts the message into a log entry.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Timestamp`] if the timestamp is not ISO-8601.
    pub fn into_entry(self) -> Result<LogEntry, RelayError> {
        let timestamp = parse_timestamp(&self.timestamp).ok_or_else(|| RelayError::Timestamp {
            value: self.timestamp.clone(),
        })?;
        Ok(LogEntry::new(self.sensor_id, timestamp, self.value, self.unit))
    }
}

/// Stops a running [`RelayServer`] from another thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Asks the accept loop to exit. Open connections finish on their own.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// TCP server feeding received readings into a store.
#[derive(Debug)]
pub struct RelayServer {
    listener: TcpListener,
    store: Arc<LogStore>,
    running: Arc<AtomicBool>,
}

impl RelayServer {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Bind`] if the address cannot be bound.
    pub fn bind<A: ToSocketAddrs + std::fmt::Display>(
        addr: A,
        store: Arc<LogStore>,
    ) -> Result<Self, RelayError> {
        let bind_error = |source| RelayError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(&addr).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;

        Ok(Self {
            listener,
            store,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Address the server is listening on.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle that stops [`run`](Self::run).
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            running: Arc::clone(&self.running),
        }
    }

    /// Accepts connections until shut down, one thread per connection.
    ///
    /// Blocks the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] on an unrecoverable accept error.
    pub fn run(&self) -> Result<(), RelayError> {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(%addr, "relay server listening");
        }

        while self.running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let store = Arc::clone(&self.store);
                    thread::spawn(move || {
                        tracing::info!(%peer, "relay connection opened");
                        if let Err(e) = handle_connection(stream, &store) {
                            tracing::warn!(%peer, "relay connection error: {e}");
                        }
                        tracing::info!(%peer, "relay connection closed");
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::error!("relay accept failed: {e}");
                    return Err(e.into());
                }
            }
        }

        tracing::info!("relay server stopped");
        Ok(())
    }
}

fn handle_connection(stream: TcpStream, store: &LogStore) -> io::Result<()> {
    // Accepted sockets may inherit the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    let mut writer = stream.try_clone()?;
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let entry = match RelayMessage::decode(line).and_then(RelayMessage::into_entry) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("rejected relay message: {e}");
                continue;
            }
        };

        tracing::debug!(sensor_id = %entry.sensor_id, value = entry.value, "relay reading");
        if let Err(e) = store.ingest_entry(entry) {
            tracing::warn!("failed to ingest relayed reading: {e}");
        }
        writer.write_all(format!("{ACK}\n").as_bytes())?;
    }

    Ok(())
}

/// Client sending readings to a [`RelayServer`] and waiting for each ACK.
#[derive(Debug)]
pub struct RelayClient {
    addr: String,
    timeout: Duration,
    retries: u32,
    conn: Option<(TcpStream, BufReader<TcpStream>)>,
}

impl RelayClient {
    /// Default connect and read timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default number of send attempts.
    pub const DEFAULT_RETRIES: u32 = 3;

    /// Creates a client for `addr` (`host:port`). Connects lazily.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: Self::DEFAULT_TIMEOUT,
            retries: Self::DEFAULT_RETRIES,
            conn: None,
        }
    }

    /// Sets the connect and read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the number of send attempts.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Opens the connection if it is not open yet.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] if the address does not resolve or no
    /// resolved address accepts the connection.
    pub fn connect(&mut self) -> Result<(), RelayError> {
        if self.conn.is_some() {
            return Ok(());
        }

        let mut last_error = None;
        for addr in self.addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    let reader = BufReader::new(stream.try_clone()?);
                    tracing::debug!(%addr, "relay client connected");
                    self.conn = Some((stream, reader));
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "address did not resolve"))
            .into())
    }

    /// Sends one reading and waits for its acknowledgement.
    ///
    /// Connection and I/O failures close the connection and count as a failed
    /// attempt. Returns `Ok(true)` once acknowledged and `Ok(false)` when
    /// every attempt failed.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Json`] if the entry cannot be serialized.
    pub fn send(&mut self, entry: &LogEntry) -> Result<bool, RelayError> {
        let line = RelayMessage::from_entry(entry).encode()?;

        for attempt in 1..=self.retries {
            match self.send_line(&line) {
                Ok(true) => return Ok(true),
                Ok(false) => {
                    tracing::warn!(attempt, "relay server did not acknowledge");
                }
                Err(e) => {
                    tracing::warn!(attempt, addr = %self.addr, "relay send failed: {e}");
                    self.close();
                }
            }
        }

        Ok(false)
    }

    fn send_line(&mut self, line: &str) -> Result<bool, RelayError> {
        self.connect()?;
        let Some((stream, reader)) = self.conn.as_mut() else {
            return Ok(false);
        };

        stream.write_all(line.as_bytes())?;
        stream.flush()?;

        let mut reply = String::new();
        if reader.read_line(&mut reply)? == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        Ok(reply.trim() == ACK)
    }

    /// Closes the connection, if open.
    pub fn close(&mut self) {
        if let Some((stream, _reader)) = self.conn.take() {
            let _ = stream.shutdown(Shutdown::Both);
            tracing::debug!(addr = %self.addr, "relay client closed");
        }
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_decode_message() {
        let msg = RelayMessage::decode(
            r#"{"sensor_id":"T01","timestamp":"2026-10-19T12:00:00","value":21.5,"unit":"°C","extra":1}"#,
        )
        .unwrap();
        let entry = msg.into_entry().unwrap();
        assert_eq!(entry.sensor_id, "T01");
        assert_eq!(entry.value, 21.5);
        assert_eq!(
            entry.timestamp,
            NaiveDate::from_ymd_opt(2026, 10, 19)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_decode_rejects_missing_field() {
        assert!(matches!(
            RelayMessage::decode(r#"{"sensor_id":"T01","value":1.0}"#),
            Err(RelayError::Json(_))
        ));
    }

    #[test]
    fn test_bad_timestamp() {
        let msg = RelayMessage {
            sensor_id: "T01".to_string(),
            timestamp: "yesterday".to_string(),
            value: 1.0,
            unit: "°C".to_string(),
        };
        assert!(matches!(
            msg.into_entry(),
            Err(RelayError::Timestamp { value }) if value == "yesterday"
        ));
    }

    #[test]
    fn test_encode_is_one_line() {
        let ts = NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let line = RelayMessage::from_entry(&LogEntry::new("H1", ts, 40.0, "%"))
            .encode()
            .unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.contains(r#""timestamp":"2026-10-19T08:00:00""#));
    }

    #[test]
    fn test_client_gives_up_without_server() {
        // Bind then drop to get a port nobody listens on.
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let mut client = RelayClient::new(addr.to_string())
            .with_timeout(Duration::from_millis(200))
            .with_retries(2);

        let ts = NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        assert!(!client.send(&LogEntry::new("T01", ts, 1.0, "°C")).unwrap());
        assert!(!client.is_connected());
    }
}
