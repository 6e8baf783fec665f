//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use tempfile::TempDir;

use taskrelay::{
    Endpoint, FrameworkId, MasterTransport, StatusUpdate, TaskId, TaskState, UpdateId,
};

pub fn framework(name: &str) -> FrameworkId {
    FrameworkId::new(name).expect("framework id")
}

pub fn task(name: &str) -> TaskId {
    TaskId::new(name).expect("task id")
}

pub fn update(framework_name: &str, task_name: &str, seq: u8, state: TaskState) -> StatusUpdate {
    StatusUpdate {
        framework_id: framework(framework_name),
        task_id: task(task_name),
        uuid: UpdateId::from_bytes([seq; 16]),
        state,
        message: None,
        data: Bytes::from_static(b"payload"),
        timestamp_ms: 1_700_000_000_000 + u64::from(seq),
    }
}

pub fn log_path(dir: &TempDir, framework_name: &str, task_name: &str) -> PathBuf {
    dir.path()
        .join("updates")
        .join(framework_name)
        .join(task_name)
}

/// Transport that records every send and forwards it on a channel so tests
/// can block until the manager's state thread has sent something.
#[derive(Clone)]
pub struct RecordingTransport {
    sends: Arc<Mutex<Vec<(Endpoint, UpdateId)>>>,
    tx: Sender<(Endpoint, UpdateId)>,
}

impl RecordingTransport {
    pub fn new() -> (Self, Receiver<(Endpoint, UpdateId)>) {
        let (tx, rx) = channel::unbounded();
        (
            Self {
                sends: Arc::new(Mutex::new(Vec::new())),
                tx,
            },
            rx,
        )
    }

    pub fn sent(&self) -> Vec<(Endpoint, UpdateId)> {
        self.sends.lock().expect("sends lock").clone()
    }
}

impl MasterTransport for RecordingTransport {
    fn send(&self, master: &Endpoint, _from: &Endpoint, update: &StatusUpdate) {
        self.sends
            .lock()
            .expect("sends lock")
            .push((master.clone(), update.uuid));
        let _ = self.tx.send((master.clone(), update.uuid));
    }
}
