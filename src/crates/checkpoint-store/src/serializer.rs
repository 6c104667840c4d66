//! Wire encoding for fast-tier checkpoint payloads

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Protocol for turning checkpoint records into fast-tier bytes and back
///
/// The encoded length is what the payload-size ceiling is measured against,
/// so `dumps` must produce exactly the bytes that will be stored.
pub trait SerializerProtocol: Send + Sync {
    /// Serialize a value to bytes
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize a value from bytes
    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T>;

    /// Parse bytes into an untyped JSON tree, for validation before typing
    fn loads_value(&self, data: &[u8]) -> Result<serde_json::Value> {
        self.loads(data)
    }
}

/// Compact UTF-8 JSON (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for JsonSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}
