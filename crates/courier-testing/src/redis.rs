//! In-process stand-in for a Redis server.
//!
//! Speaks enough RESP for the queue backend: `LPUSH`, `BRPOP`, `LLEN`, and
//! `+OK` for anything else (the client's connection handshake included).
//! Tests can make the server drop a connection on `BRPOP` or leave new
//! connections unanswered, to drive the backend's recovery paths.

use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

const BLOCKING_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
struct ServerState {
    lists: HashMap<String, VecDeque<String>>,
    command_counts: HashMap<String, usize>,
    pops_to_drop: usize,
    connections_to_stall: usize,
    connections_accepted: usize,
}

type SharedState = Arc<Mutex<ServerState>>;

fn lock(state: &SharedState) -> std::sync::MutexGuard<'_, ServerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fake Redis listening on a local port.
///
/// Every connection task is aborted when the server is dropped.
#[derive(Debug)]
pub struct FakeRedis {
    addr: SocketAddr,
    state: SharedState,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl FakeRedis {
    /// Binds to an ephemeral port and starts accepting connections.
    ///
    /// # Panics
    ///
    /// Panics if no local port can be bound.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|e| panic!("fake redis should bind: {e}"));
        let addr = listener.local_addr().unwrap_or_else(|e| panic!("local addr: {e}"));

        let state = SharedState::default();
        let tasks: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::default();

        let accept_loop = {
            let state = state.clone();
            let tasks = tasks.clone();
            tokio::spawn(async move {
                let mut stalled = Vec::new();
                while let Ok((socket, _)) = listener.accept().await {
                    let stall = {
                        let mut state = lock(&state);
                        state.connections_accepted += 1;
                        let stall = state.connections_to_stall > 0;
                        state.connections_to_stall = state.connections_to_stall.saturating_sub(1);
                        stall
                    };

                    if stall {
                        stalled.push(socket);
                        continue;
                    }

                    let handle = tokio::spawn(serve_connection(socket, state.clone()));
                    tasks.lock().unwrap_or_else(PoisonError::into_inner).push(handle);
                }
            })
        };
        tasks.lock().unwrap_or_else(PoisonError::into_inner).push(accept_loop);

        Self { addr, state, tasks }
    }

    /// Connection URL for this server.
    pub fn url(&self) -> String {
        format!("redis://{}/0", self.addr)
    }

    /// Pushes `entry` onto the head of `key`, as `LPUSH` would.
    pub fn seed(&self, key: &str, entry: impl Into<String>) {
        lock(&self.state).lists.entry(key.to_string()).or_default().push_front(entry.into());
    }

    /// Entries stored under `key`, head first.
    pub fn entries(&self, key: &str) -> Vec<String> {
        lock(&self.state).lists.get(key).map(|list| list.iter().cloned().collect()).unwrap_or_default()
    }

    /// Closes the connection instead of answering the next `count` pops.
    pub fn drop_next_pops(&self, count: usize) {
        lock(&self.state).pops_to_drop += count;
    }

    /// Accepts the next `count` connections but never answers on them.
    pub fn stall_next_connections(&self, count: usize) {
        lock(&self.state).connections_to_stall += count;
    }

    /// How many times `command` was received.
    pub fn command_count(&self, command: &str) -> usize {
        lock(&self.state).command_counts.get(&command.to_ascii_uppercase()).copied().unwrap_or(0)
    }

    /// Connections accepted so far, stalled ones included.
    pub fn connections_accepted(&self) -> usize {
        lock(&self.state).connections_accepted
    }
}

impl Drop for FakeRedis {
    fn drop(&mut self) {
        for handle in self.tasks.lock().unwrap_or_else(PoisonError::into_inner).drain(..) {
            handle.abort();
        }
    }
}

async fn serve_connection(mut socket: TcpStream, state: SharedState) {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];

    loop {
        while let Some((command, consumed)) = parse_command(&buffer) {
            buffer.drain(..consumed);
            let Some(reply) = respond(&command, &state).await else {
                return;
            };
            if socket.write_all(&reply).await.is_err() {
                return;
            }
        }

        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(read) => buffer.extend_from_slice(&chunk[..read]),
        }
    }
}

/// Reply to one command, or `None` to close the connection.
async fn respond(command: &[String], state: &SharedState) -> Option<Vec<u8>> {
    let name = command.first().map(|name| name.to_ascii_uppercase()).unwrap_or_default();
    let key = command.get(1).cloned().unwrap_or_default();

    {
        let mut state = lock(state);
        *state.command_counts.entry(name.clone()).or_default() += 1;
    }

    match name.as_str() {
        "LPUSH" => {
            let mut state = lock(state);
            let list = state.lists.entry(key).or_default();
            for value in command.iter().skip(2) {
                list.push_front(value.clone());
            }
            Some(integer(list.len()))
        },
        "LLEN" => Some(integer(lock(state).lists.get(&key).map_or(0, VecDeque::len))),
        "BRPOP" => {
            {
                let mut state = lock(state);
                if state.pops_to_drop > 0 {
                    state.pops_to_drop -= 1;
                    return None;
                }
            }
            loop {
                let popped = lock(state).lists.get_mut(&key).and_then(VecDeque::pop_back);
                if let Some(value) = popped {
                    return Some(array(&[key.as_str(), value.as_str()]));
                }
                tokio::time::sleep(BLOCKING_POLL_INTERVAL).await;
            }
        },
        "PING" => Some(b"+PONG\r\n".to_vec()),
        _ => Some(b"+OK\r\n".to_vec()),
    }
}

fn integer(value: usize) -> Vec<u8> {
    format!(":{value}\r\n").into_bytes()
}

fn array(items: &[&str]) -> Vec<u8> {
    let mut reply = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        reply.extend_from_slice(format!("${}\r\n", item.len()).as_bytes());
        reply.extend_from_slice(item.as_bytes());
        reply.extend_from_slice(b"\r\n");
    }
    reply
}

/// Parses one RESP array of bulk strings from the front of `buffer`.
///
/// Returns the arguments and the number of bytes consumed, or `None` until
/// the whole command has arrived.
fn parse_command(buffer: &[u8]) -> Option<(Vec<String>, usize)> {
    let (header, mut position) = read_line(buffer, 0)?;
    let count: usize = header.strip_prefix('*')?.parse().ok()?;

    let mut arguments = Vec::with_capacity(count);
    for _ in 0..count {
        let (length_line, start) = read_line(buffer, position)?;
        let length: usize = length_line.strip_prefix('$')?.parse().ok()?;
        let end = start + length;
        if buffer.len() < end + 2 {
            return None;
        }
        arguments.push(String::from_utf8_lossy(&buffer[start..end]).into_owned());
        position = end + 2;
    }

    Some((arguments, position))
}

fn read_line(buffer: &[u8], start: usize) -> Option<(String, usize)> {
    let rest = buffer.get(start..)?;
    let end = rest.windows(2).position(|window| window == b"\r\n")?;
    Some((String::from_utf8_lossy(&rest[..end]).into_owned(), start + end + 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pipelined_commands() {
        let wire = b"*2\r\n$4\r\nLLEN\r\n$1\r\nq\r\n*1\r\n$4\r\nPING\r\n";

        let (first, used) = parse_command(wire).unwrap();
        assert_eq!(first, vec!["LLEN", "q"]);

        let (second, rest) = parse_command(&wire[used..]).unwrap();
        assert_eq!(second, vec!["PING"]);
        assert_eq!(used + rest, wire.len());
    }

    #[test]
    fn incomplete_command_waits_for_more_bytes() {
        assert!(parse_command(b"*2\r\n$4\r\nLLEN\r\n$1\r\n").is_none());
        assert!(parse_command(b"*1\r\n$4\r\nPI").is_none());
    }

    #[test]
    fn pop_reply_is_a_two_element_array() {
        assert_eq!(array(&["q", "{}"]), b"*2\r\n$1\r\nq\r\n$2\r\n{}\r\n".to_vec());
    }
}
