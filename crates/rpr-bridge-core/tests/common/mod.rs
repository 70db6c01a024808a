//! Shared helpers for server integration tests.
//!
//! The [`Server`] is not `Send`, so it stays on the test thread and is ticked
//! there while client code runs on a spawned thread.

#![allow(dead_code)]

use rpr_bridge_core::protocol::{read_frame, write_frame};
use rpr_bridge_core::{CallError, FunctionTable, Server, ServerConfig, TickReport};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::net::TcpStream;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

pub const DRIVE_TIMEOUT: Duration = Duration::from_secs(20);

/// A registry with one function per marshalling shape plus a stateful marker
/// list.
pub fn test_registry() -> FunctionTable {
    let markers: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let mut table = FunctionTable::new();

    table
        .register("Nothing", |_| Ok(Vec::new()))
        .register("One", |args| Ok(vec![Some(args.get(0).cloned().unwrap_or(json!(42)))]))
        .register("Three", |_| {
            Ok(vec![Some(json!(1)), Some(json!("two")), Some(json!([3.5]))])
        })
        .register("Arity", |args| Ok(vec![Some(json!(args.len()))]))
        .register("Fail", |_| Err(CallError::new("host refused")))
        .register("Panic", |_| panic!("host crashed"));

    let add = Rc::clone(&markers);
    table.register("AddMarker", move |args| {
        let name = args.str(0)?.to_string();
        let mut markers = add.borrow_mut();
        markers.push(name);
        Ok(vec![Some(json!(markers.len() - 1))])
    });

    let count = Rc::clone(&markers);
    table.register("CountMarkers", move |_| Ok(vec![Some(json!(count.borrow().len()))]));

    table
}

pub fn start_server() -> Server {
    start_server_with(ServerConfig::new("127.0.0.1", 0))
}

pub fn start_server_with(config: ServerConfig) -> Server {
    Server::new(config, Box::new(test_registry())).expect("server should bind")
}

/// Run `client` on its own thread, ticking `server` until it finishes.
///
/// Returns the client's result and every non-empty tick report.
pub fn drive<T, F>(server: &mut Server, client: F) -> (T, Vec<TickReport>)
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let handle = thread::spawn(client);
    let deadline = Instant::now() + DRIVE_TIMEOUT;
    let mut reports = Vec::new();

    while !handle.is_finished() {
        assert!(Instant::now() < deadline, "client did not finish in time");
        let report = server.tick();
        if report != TickReport::default() {
            reports.push(report);
        }
        thread::sleep(Duration::from_millis(1));
    }

    (handle.join().expect("client thread panicked"), reports)
}

/// Tick until `done` holds or the timeout expires.
pub fn tick_until(server: &mut Server, mut done: impl FnMut(&Server) -> bool) {
    let deadline = Instant::now() + DRIVE_TIMEOUT;
    while !done(server) {
        assert!(Instant::now() < deadline, "condition not reached in time");
        server.tick();
        thread::sleep(Duration::from_millis(1));
    }
}

pub fn raw_connect(server: &Server) -> TcpStream {
    let stream = TcpStream::connect(server.local_addr()).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("set timeout");
    stream
}

pub fn send_json(stream: &mut TcpStream, value: &Value) {
    write_frame(stream, &serde_json::to_vec(value).unwrap()).expect("write frame");
}

pub fn recv_json(stream: &mut TcpStream) -> Option<Value> {
    read_frame(stream, 1 << 20)
        .expect("read frame")
        .map(|body| serde_json::from_slice(&body).expect("response is JSON"))
}
