//! Manager end-to-end flows: routing, retransmission, failover, cleanup.

mod fixtures;

use std::fs;
use std::io::Cursor;
use std::time::Duration;

use tempfile::TempDir;

use taskrelay::core::Limits;
use taskrelay::manager::{ManagerError, StatusUpdateManager};
use taskrelay::stream::{StreamError, UpdateStream};
use taskrelay::wal::replay_records;
use taskrelay::{Config, Endpoint, RetryConfig, TaskState};

use fixtures::{RecordingTransport, framework, log_path, task, update};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

fn fast_retry() -> Config {
    Config {
        retry: RetryConfig {
            initial_backoff_ms: 50,
            max_backoff_ms: 100,
        },
        ..Config::default()
    }
}

fn spawn_ready(config: Config) -> (
    StatusUpdateManager,
    crossbeam::channel::Receiver<(Endpoint, taskrelay::UpdateId)>,
    Endpoint,
) {
    let (transport, rx) = RecordingTransport::new();
    let manager = StatusUpdateManager::spawn(transport, config);
    manager.initialize(Endpoint::new("slave@192.0.2.1:5051"));
    let master = Endpoint::new("master@192.0.2.10:5050");
    manager.new_master_detected(master.clone());
    (manager, rx, master)
}

#[test]
fn happy_path_with_checkpointing() {
    let temp = TempDir::new().unwrap();
    let path = log_path(&temp, "marathon", "web-1");
    let (manager, rx, master) = spawn_ready(Config::default());
    let u1 = update("marathon", "web-1", 1, TaskState::Running);

    manager
        .update(u1.clone(), true, Some(path.clone()))
        .wait()
        .unwrap();
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), (master, u1.uuid));

    manager
        .acknowledgement(task("web-1"), framework("marathon"), u1.uuid)
        .wait()
        .unwrap();

    let state = replay_records(Cursor::new(fs::read(&path).unwrap()), &Limits::default()).unwrap();
    assert!(state.received.contains(&u1.uuid));
    assert!(state.acknowledged.contains(&u1.uuid));
    assert!(state.pending.is_empty());

    // exactly one outbound send
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    manager.shutdown();
}

#[test]
fn only_the_head_is_in_flight() {
    let (manager, rx, _master) = spawn_ready(Config::default());
    let u1 = update("marathon", "web-1", 1, TaskState::Starting);
    let u2 = update("marathon", "web-1", 2, TaskState::Running);

    manager.update(u1.clone(), false, None).wait().unwrap();
    manager.update(u2.clone(), false, None).wait().unwrap();

    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().1, u1.uuid);
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    manager
        .acknowledgement(task("web-1"), framework("marathon"), u1.uuid)
        .wait()
        .unwrap();
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().1, u2.uuid);
    manager.shutdown();
}

#[test]
fn failover_resends_the_head_to_the_new_master() {
    let (transport, rx) = RecordingTransport::new();
    let manager = StatusUpdateManager::spawn(transport.clone(), Config::default());
    manager.initialize(Endpoint::new("slave@192.0.2.1:5051"));
    let m1 = Endpoint::new("master@192.0.2.10:5050");
    manager.new_master_detected(m1.clone());

    let u1 = update("marathon", "web-1", 1, TaskState::Starting);
    let u2 = update("marathon", "web-1", 2, TaskState::Running);

    manager.update(u1.clone(), false, None).wait().unwrap();
    manager.update(u2.clone(), false, None).wait().unwrap();
    assert_eq!(
        rx.recv_timeout(RECV_TIMEOUT).unwrap(),
        (m1.clone(), u1.uuid)
    );

    let m2 = Endpoint::new("master@192.0.2.11:5050");
    manager.new_master_detected(m2.clone());
    assert_eq!(
        rx.recv_timeout(RECV_TIMEOUT).unwrap(),
        (m2.clone(), u1.uuid)
    );

    manager
        .acknowledgement(task("web-1"), framework("marathon"), u1.uuid)
        .wait()
        .unwrap();
    assert_eq!(
        rx.recv_timeout(RECV_TIMEOUT).unwrap(),
        (m2.clone(), u2.uuid)
    );

    // the recorded history observes the same global order the channel did:
    // u1 to the old master, u1 again to the new one, u2 only after the ack
    assert_eq!(
        transport.sent(),
        vec![(m1, u1.uuid), (m2.clone(), u1.uuid), (m2, u2.uuid)]
    );
    manager.shutdown();
}

#[test]
fn retransmits_until_acknowledged() {
    let (manager, rx, _master) = spawn_ready(fast_retry());
    let u1 = update("marathon", "web-1", 1, TaskState::Running);

    manager.update(u1.clone(), false, None).wait().unwrap();

    for _ in 0..3 {
        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().1, u1.uuid);
    }

    manager
        .acknowledgement(task("web-1"), framework("marathon"), u1.uuid)
        .wait()
        .unwrap();
    // drain retransmits already in flight when the ack landed; the loop
    // only exits once the channel has been quiet for a full window
    while rx.recv_timeout(Duration::from_millis(300)).is_ok() {}
    manager.shutdown();
}

#[test]
fn cleanup_stops_retries() {
    let (manager, rx, _master) = spawn_ready(fast_retry());
    let u1 = update("marathon", "web-1", 1, TaskState::Running);

    manager.update(u1.clone(), false, None).wait().unwrap();
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().1, u1.uuid);

    manager.cleanup(framework("marathon")).wait().unwrap();
    // drain sends that raced the cleanup; the loop only exits once the
    // channel has been quiet for a full window
    while rx.recv_timeout(Duration::from_millis(300)).is_ok() {}

    // the stream is gone entirely
    let err = manager
        .acknowledgement(task("web-1"), framework("marathon"), u1.uuid)
        .wait()
        .unwrap_err();
    assert!(matches!(err, ManagerError::UnknownStream { .. }));
    manager.shutdown();
}

#[test]
fn acknowledgement_without_a_stream_fails() {
    let (manager, _rx, _master) = spawn_ready(Config::default());
    let u1 = update("marathon", "web-1", 1, TaskState::Running);

    let err = manager
        .acknowledgement(task("web-1"), framework("marathon"), u1.uuid)
        .wait()
        .unwrap_err();
    assert!(matches!(err, ManagerError::UnknownStream { .. }));
    manager.shutdown();
}

#[test]
fn acknowledgement_must_match_the_head() {
    let (manager, _rx, _master) = spawn_ready(Config::default());
    let u1 = update("marathon", "web-1", 1, TaskState::Starting);
    let u2 = update("marathon", "web-1", 2, TaskState::Running);

    manager.update(u1.clone(), false, None).wait().unwrap();
    manager.update(u2.clone(), false, None).wait().unwrap();

    let err = manager
        .acknowledgement(task("web-1"), framework("marathon"), u2.uuid)
        .wait()
        .unwrap_err();
    assert_eq!(
        err,
        ManagerError::UnexpectedAcknowledgement {
            task: task("web-1"),
            uuid: u2.uuid,
            head: Some(u1.uuid),
        }
    );

    // the stream is unharmed: the correct acknowledgement still works
    manager
        .acknowledgement(task("web-1"), framework("marathon"), u1.uuid)
        .wait()
        .unwrap();
    manager.shutdown();
}

#[test]
fn checkpointing_requires_a_path() {
    let (manager, _rx, _master) = spawn_ready(Config::default());
    let u1 = update("marathon", "web-1", 1, TaskState::Running);

    let err = manager.update(u1, true, None).wait().unwrap_err();
    assert!(matches!(err, ManagerError::MissingPath { .. }));
    manager.shutdown();
}

#[test]
fn updates_are_held_until_a_master_is_known() {
    let (transport, rx) = RecordingTransport::new();
    let manager = StatusUpdateManager::spawn(transport, Config::default());
    manager.initialize(Endpoint::new("slave@192.0.2.1:5051"));
    let u1 = update("marathon", "web-1", 1, TaskState::Running);

    manager
        .update(u1.clone(), false, None)
        .wait_timeout(RECV_TIMEOUT)
        .expect("state thread replies before the timeout")
        .unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    let master = Endpoint::new("master@192.0.2.10:5050");
    manager.new_master_detected(master.clone());
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), (master, u1.uuid));
    manager.shutdown();
}

#[test]
fn duplicate_updates_resolve_ok_without_resending() {
    let (manager, rx, _master) = spawn_ready(Config::default());
    let u1 = update("marathon", "web-1", 1, TaskState::Running);

    manager.update(u1.clone(), false, None).wait().unwrap();
    manager.update(u1.clone(), false, None).wait().unwrap();

    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().1, u1.uuid);
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    manager.shutdown();
}

#[test]
fn fatal_stream_error_is_sticky_and_stops_sends() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("blocker");
    fs::write(&blocker, b"not a directory").unwrap();
    let path = blocker.join("web-1");

    let (manager, rx, _master) = spawn_ready(Config::default());
    let u1 = update("marathon", "web-1", 1, TaskState::Starting);
    let u2 = update("marathon", "web-1", 2, TaskState::Running);

    let first = manager
        .update(u1, true, Some(path.clone()))
        .wait()
        .unwrap_err();
    assert!(matches!(
        first,
        ManagerError::Stream(StreamError::CreateDir { .. })
    ));

    let second = manager.update(u2, true, Some(path)).wait().unwrap_err();
    assert_eq!(first, second);

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    manager.shutdown();
}

#[test]
fn recover_resumes_transmission_of_pending_updates() {
    let temp = TempDir::new().unwrap();
    let path = log_path(&temp, "marathon", "web-1");
    let u1 = update("marathon", "web-1", 1, TaskState::Running);

    {
        let mut stream = UpdateStream::create(
            task("web-1"),
            framework("marathon"),
            Some(&path),
            Limits::default(),
        );
        stream.update(&u1).unwrap();
    }

    let (manager, rx, master) = spawn_ready(Config::default());
    manager
        .recover(task("web-1"), framework("marathon"), path)
        .wait()
        .unwrap();
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), (master, u1.uuid));

    manager
        .acknowledgement(task("web-1"), framework("marathon"), u1.uuid)
        .wait()
        .unwrap();
    manager.shutdown();
}

#[test]
fn recover_of_a_missing_log_fails() {
    let temp = TempDir::new().unwrap();
    let (manager, _rx, _master) = spawn_ready(Config::default());

    let err = manager
        .recover(
            task("web-1"),
            framework("marathon"),
            temp.path().join("missing"),
        )
        .wait()
        .unwrap_err();
    assert!(matches!(
        err,
        ManagerError::Stream(StreamError::Open { .. })
    ));
    manager.shutdown();
}

#[test]
fn streams_are_isolated_across_tasks() {
    let (manager, rx, _master) = spawn_ready(Config::default());
    let web = update("marathon", "web-1", 1, TaskState::Running);
    let db = update("marathon", "db-1", 2, TaskState::Running);

    manager.update(web.clone(), false, None).wait().unwrap();
    manager.update(db.clone(), false, None).wait().unwrap();

    let mut sent = vec![
        rx.recv_timeout(RECV_TIMEOUT).unwrap().1,
        rx.recv_timeout(RECV_TIMEOUT).unwrap().1,
    ];
    sent.sort_by_key(|uuid| *uuid.as_bytes());
    assert_eq!(sent, vec![web.uuid, db.uuid]);
    manager.shutdown();
}
