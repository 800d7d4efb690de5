//! External Redis-compatible keyspace
//!
//! Keeps the usual Redis graph-module layout bit-for-bit: one hash per
//! node, fields named after neighbours, empty field values. Graphs written by
//! either side can be traversed by the other.
//!
//! Every call is bounded by the configured timeout, measured across all reads
//! of the call rather than per socket read. A connection that failed
//! mid-exchange may be out of sync with the server, so it is dropped and a new
//! one is opened on the next call.

use super::{AdjacencyStore, KeyShape, Keyspace, StoreError, StoreResult};
use crate::graph::NodeName;
use crate::protocol::resp::{RespDecoder, RespValue};
use bytes::Bytes;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Attempts at an optimistic edge write before giving up
const MAX_WATCH_RETRIES: usize = 8;

struct Connection {
    stream: TcpStream,
    decoder: RespDecoder,
}

impl Connection {
    fn open(address: &str, timeout: Duration) -> StoreResult<Self> {
        let addr = address
            .to_socket_addrs()
            .map_err(io_error)?
            .next()
            .ok_or_else(|| StoreError::Unavailable(format!("cannot resolve '{}'", address)))?;

        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(io_error)?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;

        info!("Connected to Redis store at {}", addr);
        Ok(Self {
            stream,
            decoder: RespDecoder::new(),
        })
    }

    /// Send a pipeline of commands and read one reply per command
    fn round_trip(
        &mut self,
        commands: &[RespValue],
        deadline: Instant,
    ) -> StoreResult<Vec<RespValue>> {
        let mut out = Vec::new();
        for command in commands {
            command.encode(&mut out)?;
        }
        self.stream.write_all(&out).map_err(io_error)?;

        let mut replies = Vec::with_capacity(commands.len());
        while replies.len() < commands.len() {
            replies.push(self.read_reply(deadline)?);
        }
        Ok(replies)
    }

    /// Read one reply, giving up once `deadline` passes even if bytes keep arriving
    fn read_reply(&mut self, deadline: Instant) -> StoreResult<RespValue> {
        loop {
            if let Some(value) = self
                .decoder
                .next_value()
                .map_err(|e| StoreError::Protocol(e.to_string()))?
            {
                return Ok(value);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(StoreError::Timeout);
            }
            self.stream.set_read_timeout(Some(remaining))?;

            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).map_err(io_error)?;
            if n == 0 {
                return Err(StoreError::Unavailable("connection closed by store".to_string()));
            }
            self.decoder.extend_from_slice(&chunk[..n]);
        }
    }
}

fn io_error(e: io::Error) -> StoreError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => StoreError::Timeout,
        _ => StoreError::Io(e),
    }
}

/// Map an error reply to a store error
fn reply_error(message: &str) -> StoreError {
    if message.starts_with("WRONGTYPE") {
        StoreError::WrongType
    } else {
        StoreError::Unavailable(message.to_string())
    }
}

/// Reject error replies, pass everything else through
fn check(reply: RespValue) -> StoreResult<RespValue> {
    match reply {
        RespValue::Error(message) => Err(reply_error(&message)),
        other => Ok(other),
    }
}

fn unexpected(what: &str, reply: &RespValue) -> StoreError {
    StoreError::Protocol(format!("unexpected reply to {}: {:?}", what, reply))
}

/// Keyspace hosted by an external Redis-compatible server
pub struct RedisStore {
    address: String,
    timeout: Duration,
    connection: Mutex<Option<Connection>>,
}

impl RedisStore {
    /// Create a store for `address` (`host:port`). The connection is opened lazily.
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            connection: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        // A poisoned guard may hold a half-read stream; start from scratch
        self.connection.lock().unwrap_or_else(|e| {
            let mut guard = e.into_inner();
            *guard = None;
            guard
        })
    }

    /// Run `exchange` against a live connection, dropping it on transport failure.
    ///
    /// The whole exchange shares one deadline of `timeout` from now.
    fn with_connection<T>(
        &self,
        exchange: impl FnOnce(&mut Connection, Instant) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let deadline = Instant::now() + self.timeout;
        let mut guard = self.lock();
        if guard.is_none() {
            *guard = Some(Connection::open(&self.address, self.timeout)?);
        }
        let Some(connection) = guard.as_mut() else {
            return Err(StoreError::Unavailable("no connection".to_string()));
        };

        let result = exchange(connection, deadline);
        if let Err(e) = &result {
            if !matches!(e, StoreError::WrongType) {
                warn!("Dropping Redis connection to {} after error: {}", self.address, e);
                *guard = None;
            }
        }
        result
    }

    fn call(&self, command: RespValue) -> StoreResult<RespValue> {
        let mut replies = self.with_connection(|conn, deadline| {
            conn.round_trip(std::slice::from_ref(&command), deadline)
        })?;
        let reply = replies
            .pop()
            .ok_or_else(|| StoreError::Protocol("missing reply".to_string()))?;
        check(reply)
    }

    fn parse_shape(reply: &RespValue) -> StoreResult<KeyShape> {
        match reply {
            RespValue::SimpleString(kind) => Ok(match kind.as_str() {
                "none" => KeyShape::Absent,
                "hash" => KeyShape::Hash,
                _ => KeyShape::Other,
            }),
            RespValue::Error(message) => Err(reply_error(message)),
            other => Err(unexpected("TYPE", other)),
        }
    }

    /// One optimistic attempt: WATCH + TYPE the keys, then MULTI/HSET/EXEC.
    ///
    /// Returns `Ok(false)` when a watched key changed in between and the
    /// transaction was discarded by the server.
    fn try_put_edge_fields(
        conn: &mut Connection,
        deadline: Instant,
        keys: &[Bytes],
        fields: &[(NodeName, NodeName)],
    ) -> StoreResult<bool> {
        let mut watch = vec![Bytes::from_static(b"WATCH")];
        watch.extend(keys.iter().cloned());

        let mut probe = vec![RespValue::command(watch)];
        for key in keys {
            probe.push(RespValue::command([Bytes::from_static(b"TYPE"), key.clone()]));
        }
        let replies = conn.round_trip(&probe, deadline)?;

        check(replies[0].clone())?;
        for reply in &replies[1..] {
            if !Self::parse_shape(reply)?.accepts_adjacency() {
                conn.round_trip(&[RespValue::command(["UNWATCH"])], deadline)?;
                return Err(StoreError::WrongType);
            }
        }

        let mut transaction = vec![RespValue::command(["MULTI"])];
        for (node, neighbor) in fields {
            transaction.push(RespValue::command([
                Bytes::from_static(b"HSET"),
                node.to_bytes(),
                neighbor.to_bytes(),
                Bytes::new(),
            ]));
        }
        transaction.push(RespValue::command(["EXEC"]));

        let mut replies = conn.round_trip(&transaction, deadline)?;
        let exec = replies
            .pop()
            .ok_or_else(|| StoreError::Protocol("missing EXEC reply".to_string()))?;
        for queued in replies {
            check(queued)?;
        }

        match exec {
            RespValue::Null | RespValue::BulkString(None) => Ok(false),
            RespValue::Array(results) => {
                for result in results {
                    check(result)?;
                }
                Ok(true)
            }
            RespValue::Error(message) => Err(reply_error(&message)),
            other => Err(unexpected("EXEC", &other)),
        }
    }
}

impl AdjacencyStore for RedisStore {
    fn adjacency(&self, node: &NodeName) -> StoreResult<Vec<NodeName>> {
        let reply = self.call(RespValue::command([Bytes::from_static(b"HKEYS"), node.to_bytes()]))?;
        match reply {
            RespValue::Array(fields) => fields
                .into_iter()
                .map(|field| match field {
                    RespValue::BulkString(Some(name)) => Ok(NodeName::new(name)),
                    other => Err(unexpected("HKEYS", &other)),
                })
                .collect(),
            RespValue::Null => Ok(Vec::new()),
            other => Err(unexpected("HKEYS", &other)),
        }
    }

    fn key_shape(&self, node: &NodeName) -> StoreResult<KeyShape> {
        let reply = self.call(RespValue::command([Bytes::from_static(b"TYPE"), node.to_bytes()]))?;
        Self::parse_shape(&reply)
    }

    fn put_edge_fields(&self, fields: &[(NodeName, NodeName)]) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut keys: Vec<Bytes> = fields.iter().map(|(node, _)| node.to_bytes()).collect();
        keys.sort();
        keys.dedup();

        self.with_connection(|conn, deadline| {
            for attempt in 1..=MAX_WATCH_RETRIES {
                if Self::try_put_edge_fields(conn, deadline, &keys, fields)? {
                    debug!("Applied {} edge fields (attempt {})", fields.len(), attempt);
                    return Ok(());
                }
                debug!("Watched keys changed, retrying edge write");
            }
            Err(StoreError::Unavailable(
                "edge write kept conflicting with concurrent writers".to_string(),
            ))
        })
    }
}

impl Keyspace for RedisStore {
    fn set_string(&self, key: &NodeName, value: Bytes) -> StoreResult<()> {
        self.call(RespValue::command([Bytes::from_static(b"SET"), key.to_bytes(), value]))?;
        Ok(())
    }

    fn get_string(&self, key: &NodeName) -> StoreResult<Option<Bytes>> {
        match self.call(RespValue::command([Bytes::from_static(b"GET"), key.to_bytes()]))? {
            RespValue::BulkString(value) => Ok(value),
            RespValue::Null => Ok(None),
            other => Err(unexpected("GET", &other)),
        }
    }

    fn delete(&self, key: &NodeName) -> StoreResult<bool> {
        match self.call(RespValue::command([Bytes::from_static(b"DEL"), key.to_bytes()]))? {
            RespValue::Integer(n) => Ok(n > 0),
            other => Err(unexpected("DEL", &other)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
