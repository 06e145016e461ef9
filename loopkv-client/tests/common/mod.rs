#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;

pub type Store = Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>;
pub type Published = Arc<Mutex<Vec<(Vec<u8>, Vec<u8>)>>>;

/// In-memory RESP2 server speaking just enough commands for the tests.
///
/// Besides the usual GET/SET/DEL/INCR/PING/PUBLISH it understands:
/// - `STALL`: never replies.
/// - `KILL`: closes the connection without replying.
/// - `SLEEP ms`: replies `+OK` after sleeping.
pub struct MockServer {
    pub port: u16,
    pub store: Store,
    pub published: Published,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn spawn_server() -> MockServer {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let store = Store::default();
    let published = Published::default();

    let (conn_store, conn_published) = (store.clone(), published.clone());
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let reader = BufReader::new(stream.try_clone().expect("clone"));
            let (store, published) = (conn_store.clone(), conn_published.clone());
            thread::spawn(move || serve(reader, stream, store, published));
        }
    });

    MockServer {
        port,
        store,
        published,
    }
}

#[cfg(unix)]
pub fn spawn_unix_server(path: &std::path::Path) -> MockServer {
    use std::os::unix::net::UnixListener;

    init_tracing();
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path).expect("bind unix");
    let store = Store::default();
    let published = Published::default();

    let (conn_store, conn_published) = (store.clone(), published.clone());
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let reader = BufReader::new(stream.try_clone().expect("clone"));
            let (store, published) = (conn_store.clone(), conn_published.clone());
            thread::spawn(move || serve(reader, stream, store, published));
        }
    });

    MockServer {
        port: 0,
        store,
        published,
    }
}

/// A port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr").port()
}

/// Polls `cond` until it holds or `limit` passes.
pub fn wait_for(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

fn serve<R: Read, W: Write>(mut reader: BufReader<R>, mut writer: W, store: Store, published: Published) {
    loop {
        let Ok(args) = read_command(&mut reader) else {
            return;
        };
        let Some(name) = args.first() else {
            write_error(&mut writer, "ERR empty command");
            continue;
        };
        match name.to_ascii_uppercase().as_slice() {
            b"PING" => write_simple(&mut writer, "PONG"),
            b"SET" if args.len() == 3 => {
                store.lock().unwrap().insert(args[1].clone(), args[2].clone());
                write_simple(&mut writer, "OK");
            }
            b"GET" if args.len() == 2 => match store.lock().unwrap().get(&args[1]) {
                Some(value) => write_bulk(&mut writer, value),
                None => write_nil(&mut writer),
            },
            b"DEL" => {
                let mut store = store.lock().unwrap();
                let removed = args[1..].iter().filter(|key| store.remove(*key).is_some()).count();
                write_integer(&mut writer, removed as i64);
            }
            b"INCR" if args.len() == 2 => {
                let mut store = store.lock().unwrap();
                let current = store.get(&args[1]).cloned().unwrap_or_else(|| b"0".to_vec());
                match std::str::from_utf8(&current).ok().and_then(|raw| raw.parse::<i64>().ok()) {
                    Some(value) => {
                        store.insert(args[1].clone(), (value + 1).to_string().into_bytes());
                        write_integer(&mut writer, value + 1);
                    }
                    None => write_error(&mut writer, "ERR value is not an integer or out of range"),
                }
            }
            b"PUBLISH" if args.len() == 3 => {
                published.lock().unwrap().push((args[1].clone(), args[2].clone()));
                write_integer(&mut writer, 0);
            }
            b"SLEEP" if args.len() == 2 => {
                let millis = std::str::from_utf8(&args[1]).ok().and_then(|raw| raw.parse().ok()).unwrap_or(0);
                thread::sleep(Duration::from_millis(millis));
                write_simple(&mut writer, "OK");
            }
            b"STALL" => {}
            b"KILL" => return,
            _ => write_error(&mut writer, "ERR unknown command"),
        }
    }
}

fn read_command<R: Read>(reader: &mut BufReader<R>) -> std::io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
    if line.first() != Some(&b'*') {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
        if line.first() != Some(&b'$') {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "missing crlf"));
        }
        args.push(data);
    }
    Ok(args)
}

fn read_line<R: Read>(reader: &mut BufReader<R>, buf: &mut Vec<u8>) -> std::io::Result<Option<()>> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Ok(None);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(()))
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "digit"))
}

fn write_simple<W: Write>(stream: &mut W, msg: &str) {
    let _ = stream.write_all(format!("+{msg}\r\n").as_bytes());
    let _ = stream.flush();
}

fn write_error<W: Write>(stream: &mut W, msg: &str) {
    let _ = stream.write_all(format!("-{msg}\r\n").as_bytes());
    let _ = stream.flush();
}

fn write_bulk<W: Write>(stream: &mut W, data: &[u8]) {
    let _ = stream.write_all(format!("${}\r\n", data.len()).as_bytes());
    let _ = stream.write_all(data);
    let _ = stream.write_all(b"\r\n");
    let _ = stream.flush();
}

fn write_nil<W: Write>(stream: &mut W) {
    let _ = stream.write_all(b"$-1\r\n");
    let _ = stream.flush();
}

fn write_integer<W: Write>(stream: &mut W, value: i64) {
    let _ = stream.write_all(format!(":{value}\r\n").as_bytes());
    let _ = stream.flush();
}
