//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{oneshot, Semaphore};

use crate::cache::{MemoryStore, RecordStore, Snapshot, Transport};
use crate::error::{StorageError, TransportError};
use crate::key::{EntityKey, EntityRef};
use crate::view::{CachedAttribute, EntityHandle, Model};

/// Transport serving canned payloads, counting calls.
///
/// A gated transport holds every call until `release` hands out a permit.
pub struct FakeTransport {
  responses: Mutex<HashMap<EntityKey, Value>>,
  failing: AtomicBool,
  calls: AtomicUsize,
  gate: Option<Semaphore>,
}

impl FakeTransport {
  pub fn new() -> Self {
    Self {
      responses: Mutex::new(HashMap::new()),
      failing: AtomicBool::new(false),
      calls: AtomicUsize::new(0),
      gate: None,
    }
  }

  pub fn gated() -> Self {
    Self {
      gate: Some(Semaphore::new(0)),
      ..Self::new()
    }
  }

  pub fn respond(&self, key: &EntityKey, payload: Value) {
    self.responses.lock().unwrap().insert(key.clone(), payload);
  }

  pub fn fail(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn release(&self, n: usize) {
    if let Some(gate) = &self.gate {
      gate.add_permits(n);
    }
  }

  pub async fn wait_for_calls(&self, n: usize) {
    while self.calls() < n {
      tokio::task::yield_now().await;
    }
  }
}

#[async_trait]
impl Transport for FakeTransport {
  async fn fetch(&self, key: &EntityKey) -> Result<Value, TransportError> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    // Decided when the request is made, not when the gate opens
    let outcome = if self.failing.load(Ordering::SeqCst) {
      Err(TransportError::new("connection refused"))
    } else {
      self
        .responses
        .lock()
        .unwrap()
        .get(key)
        .cloned()
        .ok_or_else(|| TransportError::new(format!("404 for {}", key)))
    };

    if let Some(gate) = &self.gate {
      gate
        .acquire()
        .await
        .map_err(|e| TransportError::new(e.to_string()))?
        .forget();
    }

    outcome
  }
}

/// Transport whose calls complete in an order chosen by the test.
///
/// Each call takes the next queued reply and waits until its sender fires.
pub struct ScriptedTransport {
  replies: Mutex<VecDeque<oneshot::Receiver<Value>>>,
  calls: AtomicUsize,
}

impl ScriptedTransport {
  pub fn new() -> Self {
    Self {
      replies: Mutex::new(VecDeque::new()),
      calls: AtomicUsize::new(0),
    }
  }

  /// Queue a reply for the next call; send on the returned half to complete it.
  pub fn queue(&self) -> oneshot::Sender<Value> {
    let (tx, rx) = oneshot::channel();
    self.replies.lock().unwrap().push_back(rx);
    tx
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub async fn wait_for_calls(&self, n: usize) {
    while self.calls() < n {
      tokio::task::yield_now().await;
    }
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn fetch(&self, key: &EntityKey) -> Result<Value, TransportError> {
    let reply = self.replies.lock().unwrap().pop_front();
    self.calls.fetch_add(1, Ordering::SeqCst);
    match reply {
      Some(reply) => reply
        .await
        .map_err(|_| TransportError::new(format!("reply for {} dropped", key))),
      None => Err(TransportError::new(format!("no reply queued for {}", key))),
    }
  }
}

/// Memory store with call counters and switchable failures.
pub struct TestStore {
  inner: MemoryStore,
  reads: AtomicUsize,
  writes: AtomicUsize,
  fail_reads: AtomicBool,
  fail_writes: AtomicBool,
  slow_reads: AtomicBool,
}

impl TestStore {
  pub fn new() -> Self {
    Self {
      inner: MemoryStore::new(),
      reads: AtomicUsize::new(0),
      writes: AtomicUsize::new(0),
      fail_reads: AtomicBool::new(false),
      fail_writes: AtomicBool::new(false),
      slow_reads: AtomicBool::new(false),
    }
  }

  pub fn fail_reads(&self, fail: bool) {
    self.fail_reads.store(fail, Ordering::SeqCst);
  }

  pub fn fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }

  /// Make reads yield to the scheduler repeatedly before answering.
  pub fn slow_reads(&self, slow: bool) {
    self.slow_reads.store(slow, Ordering::SeqCst);
  }

  pub fn reads(&self) -> usize {
    self.reads.load(Ordering::SeqCst)
  }

  /// Successful writes only.
  pub fn writes(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }

  pub async fn wait_for_writes(&self, n: usize) {
    while self.writes() < n {
      tokio::task::yield_now().await;
    }
  }
}

#[async_trait]
impl RecordStore for TestStore {
  async fn read(&self, key: &EntityKey) -> Result<Option<Snapshot>, StorageError> {
    self.reads.fetch_add(1, Ordering::SeqCst);
    if self.fail_reads.load(Ordering::SeqCst) {
      return Err(StorageError::new("disk I/O error"));
    }
    if self.slow_reads.load(Ordering::SeqCst) {
      for _ in 0..50 {
        tokio::task::yield_now().await;
      }
    }
    self.inner.read(key).await
  }

  async fn write(&self, key: &EntityKey, snapshot: &Snapshot) -> Result<(), StorageError> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(StorageError::new("database is locked"));
    }
    self.inner.write(key, snapshot).await?;
    self.writes.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

pub struct User {
  pub key: EntityKey,
  pub name: CachedAttribute<String>,
  pub email: CachedAttribute<Option<String>>,
  pub age: CachedAttribute<u32>,
}

impl Model for User {
  const KIND: &'static str = "user";

  fn bind(entity: &EntityHandle) -> Self {
    Self {
      key: entity.key().clone(),
      name: entity.attribute("name"),
      email: entity.attribute("email"),
      age: entity.attribute("age"),
    }
  }
}

pub struct Post {
  pub title: CachedAttribute<String>,
  pub author: CachedAttribute<EntityRef<User>>,
  pub likes: CachedAttribute<Vec<EntityRef<User>>>,
}

impl Model for Post {
  const KIND: &'static str = "post";

  fn bind(entity: &EntityHandle) -> Self {
    Self {
      title: entity.attribute("title"),
      author: entity.attribute("author"),
      likes: entity.attribute("likes"),
    }
  }
}
