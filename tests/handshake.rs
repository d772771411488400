use h2_engine::{Config, Connection, ErrorCode, Event};

fn pump(client: &mut Connection, server: &mut Connection) {
    loop {
        let from_client = client.data_to_send();
        let from_server = server.data_to_send();
        if from_client.is_empty() && from_server.is_empty() {
            break;
        }
        if !from_client.is_empty() {
            server.receive_data(&from_client).unwrap();
        }
        if !from_server.is_empty() {
            client.receive_data(&from_server).unwrap();
        }
    }
}

#[test]
fn client_get_with_end_stream_round_trips_to_a_server_response() {
    let mut client = Connection::new(Config::client());
    let mut server = Connection::new(Config::server());
    client.initiate_connection().unwrap();
    pump(&mut client, &mut server);

    let request = vec![
        (":method".to_string(), "GET".to_string()),
        (":scheme".to_string(), "https".to_string()),
        (":authority".to_string(), "example.com".to_string()),
        (":path".to_string(), "/".to_string()),
    ];
    let stream_id = client.send_headers(None, &request, true).unwrap();
    assert_eq!(stream_id, 1);
    let bytes = client.data_to_send();
    server.receive_data(&bytes).unwrap();

    let response = vec![(":status".to_string(), "200".to_string())];
    server.send_headers(Some(stream_id), &response, false).unwrap();
    server.send_data(stream_id, b"hello", true).unwrap();
    let reply = server.data_to_send();
    let events = client.receive_data(&reply).unwrap();

    let data_event = events
        .iter()
        .find(|e| matches!(e, Event::DataReceived { .. }))
        .expect("client observes the response body");
    match data_event {
        Event::DataReceived { data, end_stream, .. } => {
            assert_eq!(data, b"hello");
            assert!(*end_stream);
        }
        _ => unreachable!(),
    }
}

#[test]
fn server_receives_get_and_can_respond_with_body() {
    let mut client = Connection::new(Config::client());
    let mut server = Connection::new(Config::server());
    client.initiate_connection().unwrap();

    let request = vec![
        (":method".to_string(), "GET".to_string()),
        (":scheme".to_string(), "https".to_string()),
        (":authority".to_string(), "example.com".to_string()),
        (":path".to_string(), "/".to_string()),
    ];
    let stream_id = client.send_headers(None, &request, true).unwrap();

    let bytes = client.data_to_send();
    let events = server.receive_data(&bytes).unwrap();
    let headers_event = events
        .into_iter()
        .find(|e| matches!(e, Event::RequestReceived { .. }))
        .expect("server observes the request headers");
    match headers_event {
        Event::RequestReceived { stream_id: sid, headers, end_stream } => {
            assert_eq!(sid, stream_id);
            assert!(end_stream);
            assert!(headers.iter().any(|(k, v)| k == ":method" && v == "GET"));
        }
        _ => unreachable!(),
    }

    let response = vec![(":status".to_string(), "200".to_string())];
    server.send_headers(Some(stream_id), &response, true).unwrap();
    let reply = server.data_to_send();
    let client_events = client.receive_data(&reply).unwrap();
    assert!(client_events
        .iter()
        .any(|e| matches!(e, Event::ResponseReceived { end_stream: true, .. })));
}

#[test]
fn flow_control_blocks_data_past_the_window_until_replenished() {
    let mut client = Connection::new(Config::client());
    let mut server = Connection::new(Config::server());
    client.initiate_connection().unwrap();

    let request = vec![(":method".to_string(), "POST".to_string())];
    let stream_id = client.send_headers(None, &request, false).unwrap();
    let bytes = client.data_to_send();
    server.receive_data(&bytes).unwrap();

    // client's remote (server-advertised) window starts at 65535, larger
    // than this payload, so the whole thing should go out in one frame.
    let payload = vec![0u8; 1024];
    let sent = client.send_data(stream_id, &payload, true).unwrap();
    assert_eq!(sent, payload.len());
}

#[test]
fn mismatched_content_length_is_a_stream_error() {
    let mut client = Connection::new(Config::client());
    let mut server = Connection::new(Config::server());
    client.initiate_connection().unwrap();

    let request = vec![
        (":method".to_string(), "POST".to_string()),
        ("content-length".to_string(), "10".to_string()),
    ];
    let stream_id = client.send_headers(None, &request, false).unwrap();
    let bytes = client.data_to_send();
    server.receive_data(&bytes).unwrap();

    // only 3 of the declared 10 bytes actually show up before END_STREAM.
    client.send_data(stream_id, b"abc", true).unwrap();
    let bytes = client.data_to_send();
    let events = server.receive_data(&bytes).unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::StreamReset { stream_id: sid, error_code: ErrorCode::ProtocolError, remote_reset: false } if *sid == stream_id
    )));
}

#[test]
fn continuation_without_a_preceding_header_block_is_a_connection_error() {
    let mut server = Connection::new(Config::server());
    let mut preface_and_continuation = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n".to_vec();
    // a bare CONTINUATION frame: length 0, type 0x9, no flags, stream 1
    preface_and_continuation.extend_from_slice(&[0, 0, 0, 0x9, 0x0, 0, 0, 0, 1]);
    let result = server.receive_data(&preface_and_continuation);
    assert!(result.is_err());
}

#[test]
fn invalid_settings_value_is_a_connection_error() {
    let mut server = Connection::new(Config::server());
    let mut bytes = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n".to_vec();
    // SETTINGS frame: length 6, type 0x4, flags 0, stream 0, one param:
    // ENABLE_PUSH (0x2) = 7, which is out of the {0,1} range.
    bytes.extend_from_slice(&[0, 0, 6, 0x4, 0x0, 0, 0, 0, 0]);
    bytes.extend_from_slice(&[0, 2, 0, 0, 0, 7]);
    let result = server.receive_data(&bytes);
    assert!(result.is_err());
}

#[test]
fn exceeding_the_peers_max_concurrent_streams_is_rejected_locally() {
    let mut client = Connection::new(Config::client());
    let mut server = Connection::new(Config::server());
    client.initiate_connection().unwrap();
    pump(&mut client, &mut server);

    // drive the server's advertised MAX_CONCURRENT_STREAMS down to 1 and
    // let the client learn about it before opening any streams; a remote
    // SETTINGS value takes effect as soon as it's received, independent of
    // the ACK the receiving host owes back.
    server.update_settings(vec![(h2_engine::SettingsParameter::MaxConcurrentStreams, 1)]);
    pump(&mut client, &mut server);

    let request = vec![(":method".to_string(), "GET".to_string())];
    client.send_headers(None, &request, false).unwrap();
    let second = client.send_headers(None, &request, false);
    assert!(second.is_err());
}

#[test]
fn reset_stream_is_scoped_to_the_stream_not_the_connection() {
    let mut client = Connection::new(Config::client());
    let mut server = Connection::new(Config::server());
    client.initiate_connection().unwrap();

    let request = vec![(":method".to_string(), "GET".to_string())];
    let first = client.send_headers(None, &request, true).unwrap();
    let second = client.send_headers(None, &request, true).unwrap();
    let bytes = client.data_to_send();
    server.receive_data(&bytes).unwrap();

    server.reset_stream(first, ErrorCode::Cancel).unwrap();
    let reply = server.data_to_send();
    let events = client.receive_data(&reply).unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::StreamReset { stream_id, error_code: ErrorCode::Cancel, remote_reset: true } if *stream_id == first
    )));

    // the other stream and the connection itself are unaffected
    let response = vec![(":status".to_string(), "200".to_string())];
    server.send_headers(Some(second), &response, true).unwrap();
    let reply = server.data_to_send();
    let events = client.receive_data(&reply).unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ResponseReceived { stream_id, end_stream: true, .. } if *stream_id == second
    )));
}
