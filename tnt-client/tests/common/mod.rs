//! In-process mock tuple-store server speaking the binary protocol.
//!
//! Spaces 1 and 10 exist. Index 0 is a unique primary key on field 0,
//! index 1 a non-unique key on field 1.

#![allow(dead_code)]

use bytes::BytesMut;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tnt_client::Connection;
use tnt_protocol::{
    CompletionStatus, Decoder, Encoder, ErrorCode, Frame, Operation, Request, Response, Tuple,
    UpdateOpKind,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};

pub const SPACES: [u32; 2] = [1, 10];

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Default)]
struct Store {
    spaces: HashMap<u32, Vec<Tuple>>,
}

impl Store {
    fn new() -> Self {
        Self {
            spaces: SPACES.iter().map(|space| (*space, Vec::new())).collect(),
        }
    }

    fn handle(&mut self, request: Request) -> Response {
        match request {
            Request::Ping => Response::default(),
            Request::Select(select) => {
                let Some(rows) = self.spaces.get(&select.space) else {
                    return no_such_space(select.space);
                };
                if select.index > 1 {
                    return error(
                        ErrorCode::NoSuchIndex,
                        format!(
                            "No index #{} is defined in space {}",
                            select.index, select.space
                        ),
                    );
                }

                let field = select.index as usize;
                let matched = rows
                    .iter()
                    .filter(|row| {
                        select
                            .keys
                            .iter()
                            .any(|key| key.get(0).is_some() && row.get(field) == key.get(0))
                    })
                    .skip(select.offset as usize)
                    .take(select.limit.unwrap_or(u32::MAX) as usize)
                    .cloned()
                    .collect();
                Response::ok(matched)
            }
            Request::Insert(insert) => {
                let Some(rows) = self.spaces.get_mut(&insert.space) else {
                    return no_such_space(insert.space);
                };
                let Some(key) = insert.tuple.get(0).cloned() else {
                    return error(ErrorCode::IllegalParams, "Illegal parameters, tuple is empty");
                };

                let existing = rows.iter().position(|row| row.get(0) == Some(&key));
                match existing {
                    Some(_) if insert.flags.is_add() => {
                        return error(ErrorCode::TupleFound, "Duplicate key exists in unique index 0")
                    }
                    None if insert.flags.is_replace() => {
                        return error(ErrorCode::TupleNotFound, "Tuple doesn't exist in index 0")
                    }
                    Some(pos) => rows[pos] = insert.tuple.clone(),
                    None => rows.push(insert.tuple.clone()),
                }

                if insert.flags.returns_tuple() {
                    Response::ok(vec![insert.tuple])
                } else {
                    Response::affected(1)
                }
            }
            Request::Delete(delete) => {
                let Some(rows) = self.spaces.get_mut(&delete.space) else {
                    return no_such_space(delete.space);
                };
                let position = rows.iter().position(|row| row.get(0) == delete.key.get(0));
                let removed: Vec<Tuple> = position.map(|pos| rows.remove(pos)).into_iter().collect();

                if delete.flags.returns_tuple() {
                    Response::ok(removed)
                } else {
                    Response::affected(removed.len() as u32)
                }
            }
            Request::Update(update) => {
                let Some(rows) = self.spaces.get_mut(&update.space) else {
                    return no_such_space(update.space);
                };
                let Some(row) = rows.iter_mut().find(|row| row.get(0) == update.key.get(0)) else {
                    return if update.flags.returns_tuple() {
                        Response::ok(vec![])
                    } else {
                        Response::affected(0)
                    };
                };

                let mut fields = row.clone().into_fields();
                for op in update.ops {
                    let at = op.field_no as usize;
                    match op.kind {
                        UpdateOpKind::Set if at < fields.len() => fields[at] = op.arg,
                        UpdateOpKind::Set if at == fields.len() => fields.push(op.arg),
                        UpdateOpKind::Delete if at < fields.len() => {
                            fields.remove(at);
                        }
                        _ => {
                            return error(
                                ErrorCode::NoSuchField,
                                format!("Field {at} was not found in the tuple"),
                            )
                        }
                    }
                }
                *row = Tuple::new(fields);

                if update.flags.returns_tuple() {
                    Response::ok(vec![row.clone()])
                } else {
                    Response::affected(1)
                }
            }
            Request::Call(call) => error(
                ErrorCode::NoSuchProc,
                format!("Procedure '{}' is not defined", call.proc_name),
            ),
        }
    }
}

fn error(code: ErrorCode, message: impl Into<String>) -> Response {
    Response::error(CompletionStatus::Error, code, message)
}

fn no_such_space(space: u32) -> Response {
    error(ErrorCode::NoSuchSpace, format!("Space {space} does not exist"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Respond,
    /// Reads requests, never answers.
    Silent,
    /// Accepts connections, never reads from them.
    Stalled,
}

/// A running mock server. Dropping it stops the server and all its sessions.
pub struct MockServer {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Starts a server that answers every request.
    pub async fn start() -> Self {
        Self::spawn(Mode::Respond).await
    }

    /// Starts a server that reads requests but never answers.
    pub async fn start_silent() -> Self {
        Self::spawn(Mode::Silent).await
    }

    /// Starts a server that accepts connections but never reads, so client
    /// writes stall once the socket buffers fill.
    pub async fn start_stalled() -> Self {
        Self::spawn(Mode::Stalled).await
    }

    async fn spawn(mode: Mode) -> Self {
        init_tracing();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let store = Arc::new(Mutex::new(Store::new()));

        let task = tokio::spawn(async move {
            // Dropping the set on abort tears down every session.
            let mut sessions = JoinSet::new();
            let mut stalled = Vec::new();
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                match mode {
                    Mode::Stalled => stalled.push(stream),
                    _ => {
                        sessions.spawn(serve(stream, store.clone(), mode == Mode::Respond));
                    }
                }
            }
        });

        Self { addr, task }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// `127.0.0.1:port`, optionally with `/suffix` appended.
    pub fn url(&self, suffix: Option<u32>) -> String {
        match suffix {
            Some(space) => format!("{}/{}", self.addr, space),
            None => self.addr.to_string(),
        }
    }

    /// Stops accepting and drops every open session.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut stream: TcpStream, store: Arc<Mutex<Store>>, respond: bool) {
    let mut buf = BytesMut::with_capacity(8192);

    loop {
        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }

        while let Some(frame) = Frame::decode(&mut buf).unwrap() {
            if !respond {
                continue;
            }

            let operation = Operation::from_code(frame.header.op_code).unwrap();
            let request = Decoder::decode_request(operation, &frame.body).unwrap();
            let shape = request.response_shape();
            let response = store.lock().handle(request);

            let encoded =
                Encoder::encode_response(operation, frame.header.request_id, shape, &response)
                    .unwrap();
            if stream.write_all(&encoded).await.is_err() {
                return;
            }
        }
    }
}

/// Waits until `conn` has `count` requests in flight.
pub async fn wait_for_pending(conn: &Connection, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while conn.pending_count() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("requests never became pending");
}
