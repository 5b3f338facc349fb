//! Channel store (§4.5).
//!
//! `send` is fire-and-forget at the expression level (§4.4): the calling
//! task never suspends to perform it, even on a zero-capacity (rendezvous)
//! channel. `recv` genuinely blocks the calling thread until a value
//! arrives, optionally bounded by a timeout. `crossbeam_channel::unbounded`
//! gives exactly this split for free — a non-blocking `send` and a
//! `recv`/`recv_timeout` that parks the thread — so the declared capacity
//! is tracked for bookkeeping only, never enforced as backpressure on the
//! sender.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::error::RuntimeError;
use crate::value::{ChannelHandle, Value};

struct ChannelEntry {
    declared_type: Option<String>,
    capacity: usize,
    tx: Sender<Value>,
    rx: Receiver<Value>,
}

/// Owns every channel created by an evaluation, keyed by id. Shared across
/// task threads behind a single mutex, matching the "single active
/// evaluation at a time" discipline described in §5 even though multiple
/// OS threads may exist.
pub struct ChannelStore {
    next_id: AtomicU64,
    channels: Mutex<HashMap<u64, ChannelEntry>>,
}

impl ChannelStore {
    pub fn new() -> Self {
        ChannelStore {
            next_id: AtomicU64::new(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn create(&self, declared_type: Option<String>, capacity: usize) -> ChannelHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = crossbeam_channel::unbounded();
        self.channels.lock().expect("channel store poisoned").insert(
            id,
            ChannelEntry {
                declared_type: declared_type.clone(),
                capacity,
                tx,
                rx,
            },
        );
        ChannelHandle { id, declared_type }
    }

    /// Fire-and-forget: never blocks the caller, regardless of `capacity`.
    pub fn send(&self, handle: &ChannelHandle, value: Value) -> Result<(), RuntimeError> {
        let channels = self.channels.lock().expect("channel store poisoned");
        let entry = channels
            .get(&handle.id)
            .ok_or_else(|| RuntimeError::DomainError {
                message: format!("send on unknown channel {}", handle.id),
            })?;
        entry
            .tx
            .send(value)
            .map_err(|_| RuntimeError::DomainError {
                message: format!("channel {} is closed", handle.id),
            })
    }

    fn receiver(&self, handle: &ChannelHandle) -> Result<Receiver<Value>, RuntimeError> {
        let channels = self.channels.lock().expect("channel store poisoned");
        channels
            .get(&handle.id)
            .map(|e| e.rx.clone())
            .ok_or_else(|| RuntimeError::DomainError {
                message: format!("recv on unknown channel {}", handle.id),
            })
    }

    /// Blocks until a value is available.
    pub fn recv(&self, handle: &ChannelHandle) -> Result<Value, RuntimeError> {
        let rx = self.receiver(handle)?;
        rx.recv().map_err(|_| RuntimeError::DomainError {
            message: format!("channel {} is closed", handle.id),
        })
    }

    /// Same as `recv` but bounded; used by `await`/`select` style timeout
    /// plumbing even though `recv` itself has no `timeout` parameter in
    /// the language surface.
    pub fn recv_timeout(
        &self,
        handle: &ChannelHandle,
        timeout: Duration,
    ) -> Result<Option<Value>, RuntimeError> {
        let rx = self.receiver(handle)?;
        match rx.recv_timeout(timeout) {
            Ok(v) => Ok(Some(v)),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Ok(None),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Err(RuntimeError::DomainError {
                    message: format!("channel {} is closed", handle.id),
                })
            }
        }
    }

    pub fn declared_capacity(&self, handle: &ChannelHandle) -> Option<usize> {
        self.channels
            .lock()
            .expect("channel store poisoned")
            .get(&handle.id)
            .map(|e| e.capacity)
    }

    #[allow(dead_code)]
    pub fn declared_type(&self, handle: &ChannelHandle) -> Option<String> {
        self.channels
            .lock()
            .expect("channel store poisoned")
            .get(&handle.id)
            .and_then(|e| e.declared_type.clone())
    }
}

impl Default for ChannelStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rendezvous_send_then_recv() {
        let store = ChannelStore::new();
        let handle = store.create(None, 0);
        store.send(&handle, Value::Int(42)).unwrap();
        assert_eq!(store.recv(&handle).unwrap(), Value::Int(42));
    }

    #[test]
    fn recv_blocks_until_a_concurrent_send_arrives() {
        let store = Arc::new(ChannelStore::new());
        let handle = store.create(None, 0);
        let producer_store = store.clone();
        let producer_handle = handle.clone();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer_store.send(&producer_handle, Value::Int(7)).unwrap();
        });
        assert_eq!(store.recv(&handle).unwrap(), Value::Int(7));
        producer.join().unwrap();
    }

    #[test]
    fn recv_timeout_with_no_producer() {
        let store = ChannelStore::new();
        let handle = store.create(None, 0);
        let result = store.recv_timeout(&handle, Duration::from_millis(10)).unwrap();
        assert!(result.is_none());
    }
}
