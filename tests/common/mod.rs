//! Shared test utilities.

#![allow(dead_code, unused_imports)]

use std::sync::Arc;

use ministore::persist::{Encryption, Serializer};
use ministore::{ActionCall, Middleware, MiddlewareContext, Next, StoreDefinition, Value};
use parking_lot::Mutex;
use serde_json::json;

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

/// `state.count += 1`.
pub fn increment_count(state: &ministore::ReactiveNode) {
    state.update("count", |n| {
        Value::from(n.and_then(|n| n.as_i64()).unwrap_or(0) + 1)
    });
}

/// `{count: 5}` with a `doubleCount` getter and an `increment` action.
pub fn counter() -> StoreDefinition {
    StoreDefinition::new(|| json!({"count": 5}))
        .getter("doubleCount", |s| {
            Ok(Value::from(s.get_i64("count").unwrap_or(0) * 2))
        })
        .action_fn("increment", |state, _| {
            increment_count(state);
            Ok(Value::Null)
        })
}

/// Middleware that records `{tag}-before` / `{tag}-after` around `next`.
pub fn tracer(tag: &'static str, log: &Log) -> impl Middleware + 'static {
    let log = log.clone();
    move |_: &MiddlewareContext, call: ActionCall, next: Next| {
        log.lock().push(format!("{tag}-before"));
        let log = log.clone();
        next.run(call).map(move |result| {
            log.lock().push(format!("{tag}-after"));
            result
        })
    }
}

/// Single-byte XOR over the text, hex encoded.
pub struct XorCipher(pub u8);

impl Encryption for XorCipher {
    fn encrypt(&self, plain: &str) -> anyhow::Result<String> {
        Ok(plain
            .bytes()
            .map(|b| format!("{:02x}", b ^ self.0))
            .collect())
    }

    fn decrypt(&self, cipher: &str) -> anyhow::Result<String> {
        anyhow::ensure!(cipher.len() % 2 == 0, "odd cipher length");
        let bytes = (0..cipher.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&cipher[i..i + 2], 16).map(|b| b ^ self.0))
            .collect::<Result<Vec<u8>, _>>()?;
        Ok(String::from_utf8(bytes)?)
    }
}

/// Pretty-printed JSON with a version prefix.
pub struct VersionedSerializer;

impl Serializer for VersionedSerializer {
    fn serialize(&self, state: &serde_json::Value) -> anyhow::Result<String> {
        Ok(format!("v1:{}", serde_json::to_string_pretty(state)?))
    }

    fn deserialize(&self, raw: &str) -> anyhow::Result<serde_json::Value> {
        let body = raw
            .strip_prefix("v1:")
            .ok_or_else(|| anyhow::anyhow!("unknown payload version"))?;
        Ok(serde_json::from_str(body)?)
    }
}
