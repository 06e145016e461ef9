mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use loopkv_client::{Client, ClientConfig, ConnectionState, Reply, RespValue, Status};

use common::{spawn_server, wait_for};

fn connected_with(port: u16, config: ClientConfig) -> Client {
    let client = Client::with_config(config);
    assert!(client.connect("127.0.0.1", port), "connect to mock server");
    client
}

#[test]
fn loop_command_repeats_until_released() {
    let server = spawn_server();
    let client = connected_with(server.port, ClientConfig::default());
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();

    let handle = client.submit_loop(
        ["PING"],
        move |reply: &Reply<String>| {
            assert_eq!(reply.value().map(String::as_str), Some("PONG"));
            counter.fetch_add(1, Ordering::SeqCst);
        },
        Duration::from_millis(10),
        Duration::ZERO,
    );
    thread::sleep(Duration::from_millis(300));
    // 300 ms at a 10 ms period is 30 firings; leave a little room for jitter.
    assert!(fired.load(Ordering::SeqCst) >= 25, "fired {}", fired.load(Ordering::SeqCst));
    assert!(handle.completions() >= 25);
    assert_eq!(handle.reply().map(|reply| reply.status()), Some(Status::Ok));

    handle.release();
    thread::sleep(Duration::from_millis(50));
    let after_release = fired.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(fired.load(Ordering::SeqCst), after_release);

    client.disconnect();
    assert_eq!(client.stats().live(), 0);
}

#[test]
fn delayed_command_waits_before_sending() {
    let server = spawn_server();
    let client = connected_with(server.port, ClientConfig::default());
    let (tx, rx) = mpsc::channel();
    let start = Instant::now();

    client.submit_delayed(
        ["SET", "occupation", "carpenter"],
        move |reply: &Reply<RespValue>| {
            let _ = tx.send((reply.status(), Instant::now()));
        },
        Duration::from_millis(100),
    );
    assert_eq!(client.get("occupation").unwrap(), None);

    let (status, at) = rx.recv_timeout(Duration::from_secs(2)).expect("delayed reply");
    assert_eq!(status, Status::Ok);
    assert!(at.duration_since(start) >= Duration::from_millis(100));
    assert_eq!(client.get("occupation").unwrap(), Some(b"carpenter".to_vec()));
}

#[test]
fn slow_replies_skip_overlapping_fires() {
    let server = spawn_server();
    let client = connected_with(server.port, ClientConfig::default());
    let replies = Arc::new(AtomicUsize::new(0));
    let counter = replies.clone();

    let handle = client.submit_loop(
        ["SLEEP", "40"],
        move |_: &Reply<RespValue>| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        Duration::from_millis(5),
        Duration::ZERO,
    );
    assert!(wait_for(Duration::from_secs(2), || replies.load(Ordering::SeqCst) >= 3));
    drop(handle);

    assert!(client.stats().overlapped_fires > 0);
    client.disconnect();
    assert_eq!(client.stats().live(), 0);
}

#[test]
fn no_wait_toggle_neither_drops_nor_duplicates() {
    let server = spawn_server();
    let client = connected_with(server.port, ClientConfig::default());
    let values = Arc::new(Mutex::new(Vec::new()));

    for round in 0..500 {
        if round == 100 {
            client.no_wait(true);
        }
        if round == 400 {
            client.no_wait(false);
        }
        let values = values.clone();
        client.submit_with(["INCR", "hits"], move |reply: &Reply<i64>| {
            if let Some(value) = reply.value() {
                values.lock().unwrap().push(*value);
            }
        });
    }
    assert!(wait_for(Duration::from_secs(5), || values.lock().unwrap().len() == 500));

    client.disconnect();
    assert_eq!(*values.lock().unwrap(), (1..=500).collect::<Vec<i64>>());
}

#[test]
fn server_close_reports_disconnect_error() {
    let server = spawn_server();
    let states = Arc::new(Mutex::new(Vec::new()));
    let seen = states.clone();
    let client = Client::new();
    client.on_state_change(move |state| seen.lock().unwrap().push(state));
    assert!(client.connect("127.0.0.1", server.port));

    let (tx, rx) = mpsc::channel();
    client.submit_with(["KILL"], move |reply: &Reply<RespValue>| {
        let _ = tx.send(reply.status());
    });
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), Status::SendError);
    assert!(wait_for(Duration::from_secs(2), || {
        client.state() == ConnectionState::DisconnectError
    }));
    assert!(!client.submit_ok(["PING"]));

    client.disconnect();
    assert_eq!(
        *states.lock().unwrap(),
        vec![ConnectionState::Connected, ConnectionState::DisconnectError]
    );
    assert_eq!(client.stats().live(), 0);
}

#[test]
fn stalled_reply_times_out_at_shutdown() {
    let server = spawn_server();
    let config = ClientConfig {
        shutdown_grace: Duration::from_millis(50),
        ..ClientConfig::default()
    };
    let client = connected_with(server.port, config);

    let (tx, rx) = mpsc::channel();
    client.submit_with(["STALL"], move |reply: &Reply<RespValue>| {
        let _ = tx.send(reply.status());
    });
    thread::sleep(Duration::from_millis(20));

    let start = Instant::now();
    client.disconnect();
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Status::TimeoutError);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.stats().live(), 0);
}

#[test]
fn pending_delayed_commands_fail_at_shutdown() {
    let server = spawn_server();
    let client = connected_with(server.port, ClientConfig::default());
    let (tx, rx) = mpsc::channel();

    client.submit_delayed(
        ["PING"],
        move |reply: &Reply<RespValue>| {
            let _ = tx.send(reply.status());
        },
        Duration::from_secs(60),
    );
    client.disconnect();
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Status::SendError);
    assert_eq!(client.stats().live(), 0);
}

#[test]
fn sync_submit_inside_callback_does_not_block() {
    let server = spawn_server();
    let client = Arc::new(connected_with(server.port, ClientConfig::default()));
    let (tx, rx) = mpsc::channel();

    let inner = client.clone();
    client.submit_with(["PING"], move |_: &Reply<RespValue>| {
        let nested = inner.submit_sync::<RespValue>(["PING"]);
        let _ = tx.send(nested.status());
    });
    let status = rx.recv_timeout(Duration::from_secs(2)).expect("callback returned");
    assert!(!status.is_terminal());

    assert!(client.submit_ok(["PING"]));
    client.disconnect();
    assert_eq!(client.stats().live(), 0);
}
