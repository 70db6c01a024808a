//! Integration tests for the tick-driven server over real loopback sockets.

mod common;

use common::*;
use rpr_bridge_core::{BridgeClient, BridgeError, HoldState, ServerConfig};
use serde_json::{json, Value};
use std::io::Write;
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_call_marshalling_over_tcp() {
    let mut server = start_server();
    let addr = server.local_addr();

    let (results, _) = drive(&mut server, move || {
        let mut client = BridgeClient::new(addr);
        vec![
            client.call("Nothing", vec![]).unwrap(),
            client.call("One", vec![json!({"nested": [1, null]})]).unwrap(),
            client.call("Three", vec![]).unwrap(),
        ]
    });

    assert_eq!(results[0], Value::Null);
    assert_eq!(results[1], json!({"nested": [1, null]}));
    assert_eq!(results[2], json!([1, "two", [3.5]]));
}

#[test]
fn test_trailing_null_argument_binds_like_omitted() {
    let mut server = start_server();
    let addr = server.local_addr();

    let (results, _) = drive(&mut server, move || {
        let mut client = BridgeClient::new(addr);
        (
            client.call("Arity", vec![json!(0), json!("x")]).unwrap(),
            client.call("Arity", vec![json!(0), json!("x"), Value::Null]).unwrap(),
        )
    });

    assert_eq!(results.0, json!(2));
    assert_eq!(results.1, results.0);
}

#[test]
fn test_unknown_function_preserves_id() {
    let mut server = start_server();

    let mut stream = raw_connect(&server);
    send_json(
        &mut stream,
        &json!({"id": "req-9", "type": "call", "name": "DoesNotExist", "args": []}),
    );

    let (response, _) = drive(&mut server, move || recv_json(&mut stream).unwrap());

    assert_eq!(response["id"], json!("req-9"));
    assert_eq!(response["type"], json!("error"));
    assert!(response["traceback"].as_str().unwrap().contains("DoesNotExist"));
}

#[test]
fn test_host_failures_keep_connection_open() {
    let mut server = start_server();
    let addr = server.local_addr();

    let (outcome, reports) = drive(&mut server, move || {
        let mut client = BridgeClient::new(addr);
        let failed = client.call("Fail", vec![]);
        let panicked = client.call("Panic", vec![]);
        let after = client.call("One", vec![json!(5)]);
        (failed, panicked, after)
    });

    match outcome.0 {
        Err(BridgeError::Remote { traceback }) => assert!(traceback.contains("host refused")),
        other => panic!("expected remote error, got {:?}", other),
    }
    match outcome.1 {
        Err(BridgeError::Remote { traceback }) => assert!(traceback.contains("host crashed")),
        other => panic!("expected remote error, got {:?}", other),
    }
    assert_eq!(outcome.2.unwrap(), json!(5));
    assert!(reports.iter().all(|r| !r.disconnected || r.messages_handled == 0));
}

#[test]
fn test_pipelined_requests_answered_in_order() {
    let mut server = start_server();
    let mut stream = raw_connect(&server);

    let mut batch = Vec::new();
    for body in [
        br#"{"id": 1, "type": "call", "name": "AddMarker", "args": ["a"]}"#.to_vec(),
        b"{not json".to_vec(),
        br#"{"id": 3, "type": "call", "name": "AddMarker", "args": ["b"]}"#.to_vec(),
        br#"{"id": 4, "type": "call", "name": "CountMarkers"}"#.to_vec(),
    ] {
        batch.extend_from_slice(&(body.len() as u32).to_le_bytes());
        batch.extend_from_slice(&body);
    }
    stream.write_all(&batch).unwrap();

    let (responses, _) = drive(&mut server, move || {
        (0..4).map(|_| recv_json(&mut stream).unwrap()).collect::<Vec<_>>()
    });

    assert_eq!(responses[0], json!({"id": 1, "type": "result", "value": 0}));
    assert_eq!(responses[1]["id"], Value::Null);
    assert_eq!(responses[1]["type"], json!("error"));
    assert_eq!(responses[2], json!({"id": 3, "type": "result", "value": 1}));
    assert_eq!(responses[3], json!({"id": 4, "type": "result", "value": 2}));
}

#[test]
fn test_hold_batch_is_served_inside_one_tick() {
    let mut server = start_server();
    let addr = server.local_addr();

    let (values, reports) = drive(&mut server, move || {
        let mut client = BridgeClient::new(addr);
        client.connect().unwrap();
        let mut values = Vec::new();
        {
            let mut held = client.hold().unwrap();
            for i in 0..100 {
                values.push(held.call("AddMarker", vec![json!(format!("m{}", i))]).unwrap());
            }
            held.release().unwrap();
        }
        values
    });

    let expected: Vec<Value> = (0..100).map(|i| json!(i)).collect();
    assert_eq!(values, expected);

    let held: Vec<_> = reports.iter().filter(|r| r.held).collect();
    assert_eq!(held.len(), 1);
    // HOLD ack + 100 calls + RELEASE ack, without returning to the caller.
    assert_eq!(held[0].messages_handled, 102);
    assert_eq!(server.hold_state(), HoldState::Idle);
}

#[test]
fn test_hold_responses_keep_request_order() {
    let mut server = start_server();
    let mut stream = raw_connect(&server);

    let (responses, _) = drive(&mut server, move || {
        send_json(&mut stream, &json!({"id": 0, "type": "control", "cmd": "HOLD"}));
        let mut responses = vec![recv_json(&mut stream).unwrap()];
        // Pipeline everything at once; the hold loop must still answer in order.
        for i in 1..=100 {
            send_json(
                &mut stream,
                &json!({"id": i, "type": "call", "name": "One", "args": [i * 10]}),
            );
        }
        send_json(&mut stream, &json!({"id": 101, "type": "control", "cmd": "RELEASE"}));
        for _ in 0..101 {
            responses.push(recv_json(&mut stream).unwrap());
        }
        responses
    });

    assert_eq!(responses.len(), 102);
    for (i, response) in responses.iter().enumerate() {
        assert_eq!(response["id"], json!(i));
        assert_eq!(response["type"], json!("result"));
    }
    assert_eq!(responses[0]["value"], Value::Null);
    assert_eq!(responses[50]["value"], json!(500));
    assert_eq!(responses[101]["value"], Value::Null);
}

#[test]
fn test_disconnect_during_hold_falls_back_to_idle() {
    let mut server = start_server();
    let addr = server.local_addr();

    let (_, reports) = drive(&mut server, move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        send_json(&mut stream, &json!({"id": 1, "type": "control", "cmd": "HOLD"}));
        assert!(recv_json(&mut stream).is_some());
        // Half a request, then gone.
        stream.write_all(&[200, 0, 0, 0, b'{']).unwrap();
    });

    tick_until(&mut server, |s| !s.is_connected());
    let held_disconnect = reports.iter().any(|r| r.held && r.disconnected);
    assert!(held_disconnect || !server.is_connected());
    assert_eq!(server.hold_state(), HoldState::Idle);

    let (value, _) = drive(&mut server, move || {
        BridgeClient::new(addr).call("One", vec![json!("fresh")]).unwrap()
    });
    assert_eq!(value, json!("fresh"));
}

#[test]
fn test_reset_on_disconnect_mid_message() {
    let mut server = start_server();
    let addr = server.local_addr();

    {
        let mut stream = raw_connect(&server);
        tick_until(&mut server, |s| s.is_connected());
        // Length prefix plus a partial body.
        stream.write_all(&[64, 0, 0, 0, b'{', b'"']).unwrap();
        for _ in 0..20 {
            server.tick();
        }
    }
    tick_until(&mut server, |s| !s.is_connected());

    let (value, _) = drive(&mut server, move || {
        BridgeClient::new(addr).call("Three", vec![]).unwrap()
    });
    assert_eq!(value, json!([1, "two", [3.5]]));
}

#[test]
fn test_second_client_waits_for_first_to_leave() {
    let mut server = start_server();
    let addr = server.local_addr();

    let mut first = raw_connect(&server);
    tick_until(&mut server, |s| s.is_connected());

    let second = thread::spawn(move || {
        BridgeClient::new(addr)
            .with_timeout(Some(Duration::from_secs(15)))
            .call("One", vec![json!("second")])
    });

    // The second client sits in the backlog while the first stays attached.
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(300) {
        server.tick();
        thread::sleep(Duration::from_millis(1));
    }
    assert!(!second.is_finished());

    // The first client finishes its call and disconnects when its thread ends.
    let (first_result, _) = drive(&mut server, move || {
        send_json(&mut first, &json!({"id": 1, "type": "call", "name": "Nothing"}));
        recv_json(&mut first)
    });
    assert_eq!(first_result.unwrap()["id"], json!(1));

    let deadline = Instant::now() + DRIVE_TIMEOUT;
    while !second.is_finished() {
        assert!(Instant::now() < deadline);
        server.tick();
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(second.join().unwrap().unwrap(), json!("second"));
}

#[test]
fn test_oversized_frame_is_rejected_and_connection_reset() {
    let mut server = start_server_with(ServerConfig::new("127.0.0.1", 0).with_max_message_size(64));
    let mut stream = raw_connect(&server);
    stream.write_all(&1000u32.to_le_bytes()).unwrap();

    let (responses, reports) = drive(&mut server, move || {
        let rejection = recv_json(&mut stream);
        let after = recv_json(&mut stream);
        (rejection, after)
    });

    let rejection = responses.0.expect("rejection response");
    assert_eq!(rejection["id"], Value::Null);
    assert!(rejection["traceback"].as_str().unwrap().contains("exceeds maximum 64"));
    assert!(responses.1.is_none());
    assert!(reports.iter().any(|r| r.disconnected));
}

#[test]
fn test_shutdown_signal_interrupts_hold() {
    let mut server = start_server();
    let addr = server.local_addr();
    let signal = server.shutdown_signal();

    let client = thread::spawn(move || {
        let mut client = BridgeClient::new(addr).with_timeout(Some(Duration::from_secs(10)));
        let guard = client.hold().unwrap();
        thread::sleep(Duration::from_millis(2000));
        drop(guard);
    });
    let trigger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        signal.trigger();
    });

    let start = Instant::now();
    let mut held = None;
    while start.elapsed() < DRIVE_TIMEOUT {
        let report = server.tick();
        if report.held {
            held = Some(report);
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }

    let report = held.expect("server should have entered hold mode");
    assert!(report.disconnected);
    assert!(start.elapsed() < Duration::from_millis(2000));

    server.tick();
    assert!(server.is_shut_down());
    assert!(!server.is_connected());

    trigger.join().unwrap();
    client.join().unwrap();
}

#[test]
fn test_shutdown_closes_listener() {
    let mut server = start_server();
    let addr = server.local_addr();

    server.shutdown();
    server.shutdown();

    assert!(server.is_shut_down());
    assert_eq!(server.tick(), Default::default());
    assert!(TcpStream::connect(addr).is_err());
}
