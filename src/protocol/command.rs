//! Command handler for GRAPHZ.* and keyspace commands
//!
//! Replies use the usual Redis module conventions:
//! - `GRAPHZ.ADDEDGE n1 n2` answers `+OK`
//! - `GRAPHZ.DFS n` answers a flat `[node, degree, ...]` array of bulk strings
//! - a key of the wrong shape answers the standard `WRONGTYPE` error

use crate::graph::{EdgeWriter, GraphError, KeyLocks, NodeName, TraversalEngine};
use crate::protocol::resp::RespValue;
use crate::store::{Keyspace, StoreError};
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// Command handler for processing GRAPHZ.* commands
pub struct CommandHandler {
    store: Arc<dyn Keyspace>,
    locks: Arc<KeyLocks>,
    commands_processed: AtomicU64,
}

fn arity_error(command: &str) -> RespValue {
    RespValue::error(format!(
        "ERR wrong number of arguments for '{}' command",
        command.to_lowercase()
    ))
}

fn store_error_reply(e: StoreError) -> RespValue {
    match e {
        StoreError::WrongType => RespValue::error(WRONGTYPE),
        other => {
            error!("Store error: {}", other);
            RespValue::error(format!("ERR {}", other))
        }
    }
}

fn graph_error_reply(e: GraphError) -> RespValue {
    match e {
        GraphError::WrongType { key } => {
            debug!("Rejected key {} of the wrong type", key);
            RespValue::error(WRONGTYPE)
        }
        GraphError::Store(e) => store_error_reply(e),
    }
}

/// Extract a key argument as a node name
fn key_arg(arg: &RespValue) -> Result<NodeName, RespValue> {
    match arg.as_bulk_string() {
        Ok(Some(bytes)) => Ok(NodeName::new(bytes.clone())),
        Ok(None) => Err(RespValue::error("ERR null key")),
        Err(e) => Err(RespValue::error(format!("ERR {}", e))),
    }
}

impl CommandHandler {
    /// Create a new command handler over `store`
    pub fn new(store: Arc<dyn Keyspace>, locks: Arc<KeyLocks>) -> Self {
        Self {
            store,
            locks,
            commands_processed: AtomicU64::new(0),
        }
    }

    /// Handle a RESP command
    pub async fn handle_command(&self, value: &RespValue) -> RespValue {
        // Parse command from RESP array
        let args = match value.as_array() {
            Ok(arr) => arr,
            Err(e) => {
                return RespValue::error(format!("ERR {}", e));
            }
        };

        if args.is_empty() {
            return RespValue::error("ERR empty command");
        }

        // Extract command name
        let cmd_name = match args[0].as_string() {
            Ok(Some(s)) => s.to_uppercase(),
            Ok(None) => {
                return RespValue::error("ERR null command");
            }
            Err(e) => {
                return RespValue::error(format!("ERR {}", e));
            }
        };

        debug!("Received command: {}", cmd_name);
        self.commands_processed.fetch_add(1, Ordering::Relaxed);

        // Route to appropriate handler
        match cmd_name.as_str() {
            "GRAPHZ.ADDEDGE" => self.handle_add_edge(args).await,
            "GRAPHZ.DFS" => self.handle_dfs(args).await,
            "SET" => self.handle_set(args).await,
            "GET" => self.handle_get(args).await,
            "DEL" => self.handle_del(args).await,
            "TYPE" => self.handle_type(args).await,
            "HKEYS" => self.handle_hkeys(args).await,
            "PING" => self.handle_ping(args),
            "ECHO" => self.handle_echo(args),
            "INFO" => self.handle_info(args),
            _ => RespValue::error(format!("ERR unknown command '{}'", cmd_name)),
        }
    }

    /// Run blocking store work off the async executor
    async fn blocking<F>(&self, work: F) -> RespValue
    where
        F: FnOnce(&dyn Keyspace, &KeyLocks) -> RespValue + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let locks = Arc::clone(&self.locks);

        match tokio::task::spawn_blocking(move || work(&*store, &*locks)).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Command task failed: {}", e);
                RespValue::error(format!("ERR {}", e))
            }
        }
    }

    /// Handle GRAPHZ.ADDEDGE command
    /// Format: GRAPHZ.ADDEDGE n1 n2
    async fn handle_add_edge(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 3 {
            return arity_error("graphz.addedge");
        }
        let (a, b) = match (key_arg(&args[1]), key_arg(&args[2])) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(reply), _) | (_, Err(reply)) => return reply,
        };

        self.blocking(move |store, locks| {
            match EdgeWriter::new(store, locks).add_edge(&a, &b) {
                Ok(()) => RespValue::ok(),
                Err(e) => graph_error_reply(e),
            }
        })
        .await
    }

    /// Handle GRAPHZ.DFS command
    /// Format: GRAPHZ.DFS n
    async fn handle_dfs(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return arity_error("graphz.dfs");
        }
        let start = match key_arg(&args[1]) {
            Ok(start) => start,
            Err(reply) => return reply,
        };

        self.blocking(move |store, _| match TraversalEngine::new(store).run(&start) {
            Ok(visited) => {
                let mut reply = Vec::with_capacity(visited.len() * 2);
                for (node, degree) in visited.into_sorted_vec() {
                    reply.push(RespValue::bulk(node.to_bytes()));
                    reply.push(RespValue::bulk(degree.to_string()));
                }
                RespValue::Array(reply)
            }
            Err(e) => graph_error_reply(e),
        })
        .await
    }

    /// Handle SET command
    async fn handle_set(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 3 {
            return arity_error("set");
        }
        let key = match key_arg(&args[1]) {
            Ok(key) => key,
            Err(reply) => return reply,
        };
        let value = match args[2].as_bulk_string() {
            Ok(Some(data)) => data.clone(),
            Ok(None) => Bytes::new(),
            Err(e) => return RespValue::error(format!("ERR {}", e)),
        };

        self.blocking(move |store, locks| {
            let _guard = locks.lock(&[&key]);
            match store.set_string(&key, value) {
                Ok(()) => RespValue::ok(),
                Err(e) => store_error_reply(e),
            }
        })
        .await
    }

    /// Handle GET command
    async fn handle_get(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return arity_error("get");
        }
        let key = match key_arg(&args[1]) {
            Ok(key) => key,
            Err(reply) => return reply,
        };

        self.blocking(move |store, _| match store.get_string(&key) {
            Ok(value) => RespValue::BulkString(value),
            Err(e) => store_error_reply(e),
        })
        .await
    }

    /// Handle DEL command
    async fn handle_del(&self, args: &[RespValue]) -> RespValue {
        if args.len() < 2 {
            return arity_error("del");
        }
        let mut keys = Vec::with_capacity(args.len() - 1);
        for arg in &args[1..] {
            match key_arg(arg) {
                Ok(key) => keys.push(key),
                Err(reply) => return reply,
            }
        }

        self.blocking(move |store, locks| {
            let refs: Vec<&NodeName> = keys.iter().collect();
            let _guard = locks.lock(&refs);

            let mut removed = 0;
            for key in &keys {
                match store.delete(key) {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => return store_error_reply(e),
                }
            }
            RespValue::Integer(removed)
        })
        .await
    }

    /// Handle TYPE command
    async fn handle_type(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return arity_error("type");
        }
        let key = match key_arg(&args[1]) {
            Ok(key) => key,
            Err(reply) => return reply,
        };

        self.blocking(move |store, _| match store.key_shape(&key) {
            Ok(shape) => RespValue::SimpleString(shape.type_name().to_string()),
            Err(e) => store_error_reply(e),
        })
        .await
    }

    /// Handle HKEYS command
    async fn handle_hkeys(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return arity_error("hkeys");
        }
        let key = match key_arg(&args[1]) {
            Ok(key) => key,
            Err(reply) => return reply,
        };

        self.blocking(move |store, _| match store.adjacency(&key) {
            Ok(mut fields) => {
                fields.sort();
                RespValue::Array(
                    fields
                        .into_iter()
                        .map(|field| RespValue::bulk(field.to_bytes()))
                        .collect(),
                )
            }
            Err(e) => store_error_reply(e),
        })
        .await
    }

    /// Handle PING command
    fn handle_ping(&self, args: &[RespValue]) -> RespValue {
        match args.len() {
            1 => RespValue::SimpleString("PONG".to_string()),
            2 => match args[1].as_bulk_string() {
                Ok(Some(data)) => RespValue::BulkString(Some(data.clone())),
                Ok(None) => RespValue::BulkString(None),
                Err(e) => RespValue::error(format!("ERR {}", e)),
            },
            _ => arity_error("ping"),
        }
    }

    /// Handle ECHO command
    fn handle_echo(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return arity_error("echo");
        }

        match args[1].as_bulk_string() {
            Ok(data) => RespValue::BulkString(data.cloned()),
            Err(e) => RespValue::error(format!("ERR {}", e)),
        }
    }

    /// Handle INFO command
    fn handle_info(&self, _args: &[RespValue]) -> RespValue {
        let info = format!(
            "# Server\r\n\
             graphz_version:{}\r\n\
             redis_mode:standalone\r\n\
             # Store\r\n\
             backend:{}\r\n\
             lock_stripes:{}\r\n\
             # Stats\r\n\
             total_commands_processed:{}\r\n",
            crate::VERSION,
            self.store.backend_name(),
            self.locks.stripe_count(),
            self.commands_processed.load(Ordering::Relaxed),
        );
        RespValue::bulk(info)
    }
}
