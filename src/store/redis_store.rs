//! Redis-backed store
//!
//! Each group is sent as one `MULTI`/`EXEC` pipeline over a synchronous
//! connection, so the commands of a group are applied without interleaving.

use super::{Store, StoreCommand, StoreError, StoreValue};
use tracing::debug;

pub struct RedisStore {
    connection: redis::Connection,
}

impl RedisStore {
    /// Connect to a server, e.g. `redis://127.0.0.1/9`
    pub fn open(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_connection()?;
        debug!(url, "connected to redis");
        Ok(RedisStore { connection })
    }

    pub fn new(connection: redis::Connection) -> Self {
        RedisStore { connection }
    }

    pub fn connection_mut(&mut self) -> &mut redis::Connection {
        &mut self.connection
    }
}

fn convert(value: redis::Value) -> StoreValue {
    match value {
        redis::Value::Nil => StoreValue::Nil,
        redis::Value::Int(n) => StoreValue::Integer(n),
        redis::Value::BulkString(bytes) => StoreValue::Bulk(bytes),
        redis::Value::SimpleString(s) => StoreValue::Status(s),
        redis::Value::Okay => StoreValue::Status("OK".to_string()),
        redis::Value::Array(items) | redis::Value::Set(items) => {
            StoreValue::Array(items.into_iter().map(convert).collect())
        }
        redis::Value::Double(d) => StoreValue::Bulk(d.to_string().into_bytes()),
        other => StoreValue::Status(format!("{:?}", other)),
    }
}

impl Store for RedisStore {
    fn execute_grouped(&mut self, commands: &[StoreCommand]) -> Result<Vec<StoreValue>, StoreError> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for cmd in commands {
            let c = pipe.cmd(cmd.name());
            match cmd {
                StoreCommand::HIncrBy {
                    key,
                    field,
                    increment,
                } => {
                    c.arg(key).arg(field).arg(*increment);
                }
                StoreCommand::HIncrByFloat {
                    key,
                    field,
                    increment,
                } => {
                    c.arg(key).arg(field).arg(*increment);
                }
                StoreCommand::Expire { key, seconds } => {
                    c.arg(key).arg(*seconds);
                }
                StoreCommand::HGet { key, field } => {
                    c.arg(key).arg(field);
                }
                StoreCommand::Keys { pattern } => {
                    c.arg(pattern);
                }
            }
        }

        let replies: Vec<redis::Value> = pipe.query(&mut self.connection)?;
        debug!(commands = commands.len(), "redis group executed");

        if replies.len() != commands.len() {
            return Err(StoreError::Protocol(format!(
                "expected {} replies, got {}",
                commands.len(),
                replies.len()
            )));
        }
        Ok(replies.into_iter().map(convert).collect())
    }
}
