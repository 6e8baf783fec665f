//! Status update manager.
//!
//! Routes updates and acknowledgements to per-task streams and drives
//! retransmission to the master. The manager owns a dedicated state thread;
//! public entry points post commands over a channel and return a
//! [`Completion`] that resolves when the serial handler finishes. All
//! stream mutation, master endpoint changes, and timer decisions happen on
//! that one thread, which is what gives per-stream operations their
//! ordering and exclusion guarantees.

use std::collections::HashMap;
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::{FrameworkId, Limits, StatusUpdate, TaskId, UpdateId};
use crate::stream::{StreamError, UpdateOutcome, UpdateStream};
use crate::transport::{Endpoint, MasterTransport};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ManagerError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("no update stream for task {task} of framework {framework}")]
    UnknownStream { task: TaskId, framework: FrameworkId },

    #[error("unexpected acknowledgement {uuid} for task {task} (pending head: {head:?})")]
    UnexpectedAcknowledgement {
        task: TaskId,
        uuid: UpdateId,
        head: Option<UpdateId>,
    },

    #[error("checkpointing requested for task {task} without a log path")]
    MissingPath { task: TaskId },

    #[error("status update manager is shut down")]
    Closed,
}

/// Completion handle for an asynchronous manager call.
///
/// Resolves once the state thread has fully processed the command,
/// including any durable append.
pub struct Completion {
    rx: Receiver<Result<(), ManagerError>>,
}

impl Completion {
    pub fn wait(self) -> Result<(), ManagerError> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(ManagerError::Closed),
        }
    }

    pub fn wait_timeout(self, timeout: Duration) -> Option<Result<(), ManagerError>> {
        self.rx.recv_timeout(timeout).ok()
    }

    fn closed() -> Self {
        let (tx, rx) = channel::bounded(1);
        let _ = tx.send(Err(ManagerError::Closed));
        Self { rx }
    }
}

enum Command {
    Initialize {
        local: Endpoint,
    },
    Update {
        update: Box<StatusUpdate>,
        checkpoint: bool,
        path: Option<PathBuf>,
        respond: Sender<Result<(), ManagerError>>,
    },
    Acknowledgement {
        task: TaskId,
        framework: FrameworkId,
        uuid: UpdateId,
        respond: Sender<Result<(), ManagerError>>,
    },
    Recover {
        task: TaskId,
        framework: FrameworkId,
        path: PathBuf,
        respond: Sender<Result<(), ManagerError>>,
    },
    NewMaster {
        master: Endpoint,
    },
    Cleanup {
        framework: FrameworkId,
        respond: Sender<Result<(), ManagerError>>,
    },
}

/// Public handle to the manager's state thread.
///
/// Cheap to use from any thread; dropping (or calling [`shutdown`]) closes
/// the command channel and joins the thread.
///
/// [`shutdown`]: StatusUpdateManager::shutdown
pub struct StatusUpdateManager {
    tx: Option<Sender<Command>>,
    join: Option<JoinHandle<()>>,
}

impl StatusUpdateManager {
    pub fn spawn<T>(transport: T, config: Config) -> Self
    where
        T: MasterTransport + Send + 'static,
    {
        let (tx, rx) = channel::unbounded();
        let state = ManagerState::new(transport, config);
        let join = std::thread::spawn(move || run_manager_loop(state, rx));
        Self {
            tx: Some(tx),
            join: Some(join),
        }
    }

    /// Record the agent's own endpoint, handed to the transport as the
    /// reply-to address on every outward send.
    pub fn initialize(&self, local: Endpoint) {
        self.send(Command::Initialize { local });
    }

    /// Enqueue a status update for reliable delivery to the master.
    ///
    /// With `checkpoint` set the update is durably appended to the log at
    /// `path` before the completion resolves; without it the stream is
    /// in-memory only and `path` is ignored.
    pub fn update(
        &self,
        update: StatusUpdate,
        checkpoint: bool,
        path: Option<PathBuf>,
    ) -> Completion {
        self.post(|respond| Command::Update {
            update: Box::new(update),
            checkpoint,
            path,
            respond,
        })
    }

    /// Record the framework's acknowledgement of its task's head update
    /// and, if more updates are pending, send the next one.
    pub fn acknowledgement(
        &self,
        task: TaskId,
        framework: FrameworkId,
        uuid: UpdateId,
    ) -> Completion {
        self.post(|respond| Command::Acknowledgement {
            task,
            framework,
            uuid,
            respond,
        })
    }

    /// Rebuild a stream from its checkpoint log after an agent restart and
    /// resume transmission of whatever is still unacknowledged.
    pub fn recover(&self, task: TaskId, framework: FrameworkId, path: PathBuf) -> Completion {
        self.post(|respond| Command::Recover {
            task,
            framework,
            path,
            respond,
        })
    }

    /// Leader change: every stream with pending updates re-sends its head
    /// to the new master.
    pub fn new_master_detected(&self, master: Endpoint) {
        self.send(Command::NewMaster { master });
    }

    /// Close every stream of the framework and stop retrying its updates.
    pub fn cleanup(&self, framework: FrameworkId) -> Completion {
        self.post(|respond| Command::Cleanup { framework, respond })
    }

    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn send(&self, command: Command) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(command);
        }
    }

    fn post(&self, build: impl FnOnce(Sender<Result<(), ManagerError>>) -> Command) -> Completion {
        let Some(tx) = &self.tx else {
            return Completion::closed();
        };
        let (respond, rx) = channel::bounded(1);
        if tx.send(build(respond)).is_err() {
            return Completion::closed();
        }
        Completion { rx }
    }

    fn shutdown_inner(&mut self) {
        self.tx.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for StatusUpdateManager {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

#[derive(Clone, Copy, Debug)]
struct BackoffPolicy {
    base: Duration,
    max: Duration,
}

struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(policy: BackoffPolicy) -> Self {
        Self {
            base: policy.base,
            max: policy.max,
            current: policy.base,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = self.current.checked_mul(2).unwrap_or(self.max);
        self.current = std::cmp::min(next, self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.base;
    }
}

struct StreamEntry {
    stream: UpdateStream,
    deadline: Option<Instant>,
    backoff: Backoff,
}

struct ManagerState<T> {
    streams: HashMap<(FrameworkId, TaskId), StreamEntry>,
    master: Option<Endpoint>,
    local: Option<Endpoint>,
    transport: T,
    limits: Limits,
    policy: BackoffPolicy,
}

fn run_manager_loop<T: MasterTransport>(mut state: ManagerState<T>, rx: Receiver<Command>) {
    loop {
        let tick = match state.next_deadline() {
            Some(deadline) => channel::after(deadline.saturating_duration_since(Instant::now())),
            None => channel::never(),
        };

        crossbeam::select! {
            recv(rx) -> msg => match msg {
                Ok(command) => state.handle(command),
                Err(_) => break,
            },
            recv(tick) -> _ => state.retransmit_due(Instant::now()),
        }
    }
    debug!("status update manager state thread exiting");
}

impl<T: MasterTransport> ManagerState<T> {
    fn new(transport: T, config: Config) -> Self {
        Self {
            streams: HashMap::new(),
            master: None,
            local: None,
            transport,
            limits: config.limits,
            policy: BackoffPolicy {
                base: config.retry.initial(),
                max: config.retry.max(),
            },
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.streams
            .values()
            .filter_map(|entry| entry.deadline)
            .min()
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Initialize { local } => {
                debug!(%local, "status update manager initialized");
                self.local = Some(local);
            }
            Command::Update {
                update,
                checkpoint,
                path,
                respond,
            } => {
                let result = self.handle_update(*update, checkpoint, path);
                let _ = respond.send(result);
            }
            Command::Acknowledgement {
                task,
                framework,
                uuid,
                respond,
            } => {
                let result = self.handle_acknowledgement(task, framework, uuid);
                let _ = respond.send(result);
            }
            Command::Recover {
                task,
                framework,
                path,
                respond,
            } => {
                let result = self.handle_recover(task, framework, path);
                let _ = respond.send(result);
            }
            Command::NewMaster { master } => self.handle_new_master(master),
            Command::Cleanup { framework, respond } => {
                self.handle_cleanup(&framework);
                let _ = respond.send(Ok(()));
            }
        }
    }

    fn handle_update(
        &mut self,
        update: StatusUpdate,
        checkpoint: bool,
        path: Option<PathBuf>,
    ) -> Result<(), ManagerError> {
        let log_path = if checkpoint {
            match path {
                Some(path) => Some(path),
                None => {
                    return Err(ManagerError::MissingPath {
                        task: update.task_id.clone(),
                    });
                }
            }
        } else {
            None
        };

        let limits = self.limits.clone();
        let policy = self.policy;
        let key = (update.framework_id.clone(), update.task_id.clone());
        let entry = self.streams.entry(key).or_insert_with(|| {
            debug!(
                task = %update.task_id,
                framework = %update.framework_id,
                checkpoint,
                "creating status update stream"
            );
            StreamEntry {
                stream: UpdateStream::create(
                    update.task_id.clone(),
                    update.framework_id.clone(),
                    log_path.as_deref(),
                    limits,
                ),
                deadline: None,
                backoff: Backoff::new(policy),
            }
        });

        let outcome = match entry.stream.update(&update) {
            Ok(outcome) => outcome,
            Err(err) => {
                entry.deadline = None;
                return Err(err.into());
            }
        };

        // Only a newly recorded head goes out now; anything behind it waits
        // for the head's acknowledgement.
        if outcome == UpdateOutcome::Recorded
            && entry.stream.pending_len() == 1
            && let Ok(Some(head)) = entry.stream.next()
        {
            send_update(&self.transport, self.master.as_ref(), self.local.as_ref(), head);
            entry.backoff.reset();
            entry.deadline = Some(Instant::now() + entry.backoff.next_delay());
        }

        Ok(())
    }

    fn handle_acknowledgement(
        &mut self,
        task: TaskId,
        framework: FrameworkId,
        uuid: UpdateId,
    ) -> Result<(), ManagerError> {
        let key = (framework.clone(), task.clone());
        let Some(entry) = self.streams.get_mut(&key) else {
            return Err(ManagerError::UnknownStream { task, framework });
        };

        let head = match entry.stream.next() {
            Ok(head) => head.cloned(),
            Err(err) => {
                entry.deadline = None;
                return Err(err.into());
            }
        };
        let Some(head) = head else {
            return Err(ManagerError::UnexpectedAcknowledgement {
                task,
                uuid,
                head: None,
            });
        };
        if head.uuid != uuid {
            return Err(ManagerError::UnexpectedAcknowledgement {
                task,
                uuid,
                head: Some(head.uuid),
            });
        }

        if let Err(err) = entry.stream.acknowledgement(uuid, &head) {
            entry.deadline = None;
            return Err(err.into());
        }

        entry.deadline = None;
        entry.backoff.reset();

        if let Ok(Some(next)) = entry.stream.next() {
            send_update(&self.transport, self.master.as_ref(), self.local.as_ref(), next);
            entry.deadline = Some(Instant::now() + entry.backoff.next_delay());
        }

        Ok(())
    }

    fn handle_recover(
        &mut self,
        task: TaskId,
        framework: FrameworkId,
        path: PathBuf,
    ) -> Result<(), ManagerError> {
        let key = (framework.clone(), task.clone());
        let stream = UpdateStream::recover(task, framework, &path, self.limits.clone());
        let error = stream.error().cloned();

        let mut entry = StreamEntry {
            stream,
            deadline: None,
            backoff: Backoff::new(self.policy),
        };

        if error.is_none()
            && let Ok(Some(head)) = entry.stream.next()
        {
            send_update(&self.transport, self.master.as_ref(), self.local.as_ref(), head);
            entry.deadline = Some(Instant::now() + entry.backoff.next_delay());
        }

        self.streams.insert(key, entry);

        match error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn handle_new_master(&mut self, master: Endpoint) {
        info!(%master, "new master detected");
        self.master = Some(master);

        let now = Instant::now();
        for entry in self.streams.values_mut() {
            if entry.stream.error().is_some() {
                continue;
            }
            let Ok(Some(head)) = entry.stream.next() else {
                continue;
            };
            send_update(&self.transport, self.master.as_ref(), self.local.as_ref(), head);
            entry.backoff.reset();
            entry.deadline = Some(now + entry.backoff.next_delay());
        }
    }

    fn handle_cleanup(&mut self, framework: &FrameworkId) {
        let before = self.streams.len();
        self.streams.retain(|(owner, _), _| owner != framework);
        info!(
            %framework,
            removed = before - self.streams.len(),
            "cleaned up status update streams"
        );
    }

    fn retransmit_due(&mut self, now: Instant) {
        for ((framework, task), entry) in self.streams.iter_mut() {
            let Some(deadline) = entry.deadline else {
                continue;
            };
            if deadline > now {
                continue;
            }
            if entry.stream.error().is_some() {
                entry.deadline = None;
                continue;
            }
            match entry.stream.next() {
                Ok(Some(head)) => {
                    warn!(
                        uuid = %head.uuid,
                        task = %task,
                        framework = %framework,
                        "retransmitting unacknowledged status update"
                    );
                    send_update(&self.transport, self.master.as_ref(), self.local.as_ref(), head);
                    entry.deadline = Some(now + entry.backoff.next_delay());
                }
                _ => entry.deadline = None,
            }
        }
    }
}

fn send_update<T: MasterTransport>(
    transport: &T,
    master: Option<&Endpoint>,
    local: Option<&Endpoint>,
    update: &StatusUpdate,
) {
    let Some(master) = master else {
        debug!(uuid = %update.uuid, "no master known, holding status update");
        return;
    };
    let Some(local) = local else {
        debug!(uuid = %update.uuid, "manager not initialized, holding status update");
        return;
    };
    debug!(
        uuid = %update.uuid,
        task = %update.task_id,
        %master,
        "forwarding status update to master"
    );
    transport.send(master, local, update);
}
