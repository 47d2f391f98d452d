//! Session state machine tests against an in-memory transport.

mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pxgrid_stomp::{
    ErrorPolicy, FrameError, ServerError, Session, SessionError, SessionObserver, SessionState,
    TransportError,
};
use tokio_util::sync::CancellationToken;

use support::{MockConnector, MockHandle, config, mock, refusing};

async fn open_session() -> (Session<MockConnector>, MockHandle) {
    let (connector, mut handle) = mock();
    let mut session = Session::with_connector(config(), connector);
    session.connect().await.expect("connect");
    let connect = handle.next_frame().await;
    assert_eq!(connect.command, "CONNECT");
    (session, handle)
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl SessionObserver for Recorder {
    fn on_connected(&self, version: Option<&str>) {
        self.events
            .lock()
            .unwrap()
            .push(format!("connected {}", version.unwrap_or("-")));
    }
    fn on_receipt(&self, receipt_id: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("receipt {}", receipt_id));
    }
    fn on_error(&self, error: &ServerError) {
        self.events
            .lock()
            .unwrap()
            .push(format!("error {}", error.message));
    }
}

// =============================================================================
// Connect
// =============================================================================

#[tokio::test]
async fn connect_writes_connect_frame_first() {
    let (connector, mut handle) = mock();
    let config = config().with_host("ise.example.com");
    let mut session = Session::with_connector(config, connector);
    assert_eq!(session.state(), SessionState::Idle);

    session.connect().await.unwrap();
    assert_eq!(session.state(), SessionState::Open);

    let frame = handle.next_frame().await;
    assert_eq!(frame.command, "CONNECT");
    assert_eq!(frame.get_header("host"), Some("ise.example.com"));
    assert_eq!(frame.get_header("accept-version"), Some("1.2"));
    assert!(frame.body.is_empty());
}

#[tokio::test]
async fn connect_authenticates_the_handshake() {
    let (connector, handle) = mock();
    let mut session = Session::with_connector(config(), connector);
    session.connect().await.unwrap();

    let request = handle.request();
    assert_eq!(request.url.as_str(), support::URL);
    assert_eq!(
        request.headers,
        vec![(
            "Authorization".to_string(),
            "Basic dXNlcjpwYXNz".to_string()
        )]
    );
    assert_eq!(request.ping_interval, Some(Duration::from_secs(20)));
    assert!(request.tls.is_none());
}

#[tokio::test]
async fn host_defaults_to_url_host() {
    let (connector, mut handle) = mock();
    let mut session = Session::with_connector(config(), connector);
    session.connect().await.unwrap();
    assert_eq!(
        handle.next_frame().await.get_header("host"),
        Some("ise.example.com")
    );
}

#[tokio::test]
async fn failed_open_leaves_session_unusable() {
    let mut session = Session::with_connector(config(), refusing());

    match session.connect().await {
        Err(SessionError::Transport(TransportError::Closed(_))) => {}
        other => panic!("expected transport error, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Connecting);

    assert!(matches!(
        session.connect().await,
        Err(SessionError::InvalidState {
            operation: "connect",
            state: SessionState::Connecting
        })
    ));
    assert!(matches!(
        session.subscribe("/topic/a").await,
        Err(SessionError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn operations_require_connect() {
    let (connector, _handle) = mock();
    let mut session = Session::with_connector(config(), connector);

    assert!(matches!(
        session.subscribe("/topic/a").await,
        Err(SessionError::InvalidState {
            operation: "subscribe",
            state: SessionState::Idle
        })
    ));
    assert!(matches!(
        session.send("/topic/a", "x").await,
        Err(SessionError::InvalidState { .. })
    ));
    assert!(matches!(
        session.read_message().await,
        Err(SessionError::InvalidState { .. })
    ));
    assert!(matches!(
        session.disconnect(None).await,
        Err(SessionError::InvalidState { .. })
    ));
}

// =============================================================================
// Subscribe / Send
// =============================================================================

#[tokio::test]
async fn subscribe_sends_destination() {
    let (mut session, mut handle) = open_session().await;

    let id = session.subscribe("/topic/sessionTopic").await.unwrap();
    assert_eq!(id, "sub-0");

    let frame = handle.next_frame().await;
    assert_eq!(frame.command, "SUBSCRIBE");
    assert_eq!(frame.get_header("destination"), Some("/topic/sessionTopic"));
    assert_eq!(frame.get_header("id"), Some("sub-0"));
}

#[tokio::test]
async fn each_topic_gets_its_own_id() {
    let (mut session, mut handle) = open_session().await;

    assert_eq!(session.subscribe("/topic/a").await.unwrap(), "sub-0");
    assert_eq!(session.subscribe("/topic/b").await.unwrap(), "sub-1");
    handle.next_frame().await;
    handle.next_frame().await;

    // already subscribed: same id, nothing on the wire
    assert_eq!(session.subscribe("/topic/a").await.unwrap(), "sub-0");
    assert!(handle.nothing_written());

    assert_eq!(session.subscription_id("/topic/b"), Some("sub-1"));
    assert_eq!(session.subscription_id("/topic/c"), None);
}

#[tokio::test]
async fn unsubscribe_uses_the_topic_id() {
    let (mut session, mut handle) = open_session().await;
    session.subscribe("/topic/a").await.unwrap();
    session.subscribe("/topic/b").await.unwrap();
    handle.next_frame().await;
    handle.next_frame().await;

    session.unsubscribe("/topic/b").await.unwrap();
    let frame = handle.next_frame().await;
    assert_eq!(frame.command, "UNSUBSCRIBE");
    assert_eq!(frame.get_header("id"), Some("sub-1"));
    assert_eq!(session.subscription_id("/topic/b"), None);

    match session.unsubscribe("/topic/b").await {
        Err(SessionError::UnknownSubscription(topic)) => assert_eq!(topic, "/topic/b"),
        other => panic!("expected UnknownSubscription, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn send_sets_content_length() {
    let (mut session, mut handle) = open_session().await;

    session.send("/topic/x", "abc").await.unwrap();

    let frame = handle.next_frame().await;
    assert_eq!(frame.command, "SEND");
    assert_eq!(frame.get_header("destination"), Some("/topic/x"));
    assert_eq!(frame.get_header("content-length"), Some("3"));
    assert_eq!(frame.body, b"abc");
}

#[tokio::test]
async fn unencodable_frame_keeps_session_open() {
    let (mut session, _handle) = open_session().await;

    assert!(matches!(
        session.send("/topic/a\nb", "x").await,
        Err(SessionError::Frame(FrameError::Encoding(_)))
    ));
    assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn write_failure_closes_session() {
    let (mut session, handle) = open_session().await;
    handle.fail_writes();

    assert!(matches!(
        session.send("/topic/x", "abc").await,
        Err(SessionError::ConnectionLost(_))
    ));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(
        session.send("/topic/x", "abc").await,
        Err(SessionError::InvalidState {
            state: SessionState::Closed,
            ..
        })
    ));
}

#[tokio::test]
async fn send_on_a_silently_closed_transport_is_connection_lost() {
    let (mut session, handle) = open_session().await;
    handle.mark_closed();

    match session.send("/topic/x", "abc").await {
        Err(SessionError::ConnectionLost(reason)) => assert!(reason.contains("already closed")),
        other => panic!("expected ConnectionLost, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Closed);
}

// =============================================================================
// Receive loop
// =============================================================================

#[tokio::test]
async fn read_message_skips_housekeeping_frames() {
    let (mut session, handle) = open_session().await;

    handle.push(b"CONNECTED\nversion:1.2\n\n\0");
    handle.push(b"RECEIPT\nreceipt-id:77\n\n\0");
    handle.push(b"MESSAGE\ndestination:/topic/a\ncontent-length:5\n\nhello\0");

    let payload = session.read_message().await.unwrap();
    assert_eq!(&payload[..], b"hello");
    assert_eq!(session.negotiated_version().as_deref(), Some("1.2"));
}

#[tokio::test]
async fn messages_arrive_in_broker_order() {
    let (mut session, handle) = open_session().await;

    handle.push(b"MESSAGE\n\none\0");
    handle.push(b"\n");
    handle.push(b"NOTICE\nx:y\n\n\0");
    handle.push(b"MESSAGE\n\ntwo\0");
    handle.push(b"MESSAGE\n\nthree\0");

    for expected in ["one", "two", "three"] {
        let payload = session.read_message().await.unwrap();
        assert_eq!(&payload[..], expected.as_bytes());
    }
}

#[tokio::test]
async fn error_then_close_is_connection_lost() {
    let (mut session, mut handle) = open_session().await;

    handle.push(b"ERROR\nmessage:bad subscription\n\ndetails\0");
    handle.hang_up();

    match session.read_message().await {
        Err(SessionError::ConnectionLost(_)) => {}
        other => panic!("expected ConnectionLost, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn state_reports_closed_once_the_connection_drops() {
    let (mut session, mut handle) = open_session().await;
    assert_eq!(session.state(), SessionState::Open);

    handle.hang_up();
    for _ in 0..100 {
        if session.state() == SessionState::Closed {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(session.state(), SessionState::Closed);
    assert!(handle.is_closed());

    // the reason is still handed to the next reader
    match session.read_message().await {
        Err(SessionError::ConnectionLost(_)) => {}
        other => panic!("expected ConnectionLost, got {:?}", other),
    }
}

#[tokio::test]
async fn ping_timeout_is_connection_lost() {
    let (mut session, handle) = open_session().await;

    handle.push_result(Err(TransportError::PingTimeout(Duration::from_secs(20))));

    match session.read_message().await {
        Err(SessionError::ConnectionLost(reason)) => assert!(reason.contains("no pong")),
        other => panic!("expected ConnectionLost, got {:?}", other),
    }
    assert!(matches!(
        session.send("/topic/x", "late").await,
        Err(SessionError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn malformed_frame_is_fatal() {
    let (mut session, handle) = open_session().await;

    handle.push(b"MESSAGE\nno separator\n\nbody\0");

    assert!(matches!(
        session.read_message().await,
        Err(SessionError::Frame(FrameError::Malformed(_)))
    ));
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn error_frames_are_logged_by_default() {
    let recorder = Arc::new(Recorder::default());
    let (connector, handle) = mock();
    let config = config().with_observer(recorder.clone());
    let mut session = Session::with_connector(config, connector);
    session.connect().await.unwrap();

    handle.push(b"CONNECTED\nversion:1.2\n\n\0");
    handle.push(b"ERROR\nmessage:denied\n\n\0");
    handle.push(b"MESSAGE\n\nstill here\0");

    assert_eq!(&session.read_message().await.unwrap()[..], b"still here");
    assert_eq!(recorder.events(), vec!["connected 1.2", "error denied"]);
}

#[tokio::test]
async fn fail_policy_surfaces_error_frames() {
    let (connector, handle) = mock();
    let config = config().with_error_policy(ErrorPolicy::Fail);
    let mut session = Session::with_connector(config, connector);
    session.connect().await.unwrap();

    handle.push(b"ERROR\nmessage:not authorized\n\ntopic denied\0");
    handle.push(b"MESSAGE\n\nnever\0");

    match session.read_message().await {
        Err(SessionError::Server(err)) => {
            assert_eq!(err.message, "not authorized");
            assert_eq!(err.body.as_deref(), Some("topic denied"));
        }
        other => panic!("expected Server error, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Closed);
}

// =============================================================================
// Disconnect
// =============================================================================

#[tokio::test]
async fn writes_after_disconnect_fail() {
    let (mut session, mut handle) = open_session().await;

    session.disconnect(None).await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);

    let frame = handle.next_frame().await;
    assert_eq!(frame.command, "DISCONNECT");
    assert_eq!(frame.get_header("receipt"), None);
    assert!(handle.is_closed());

    assert!(matches!(
        session.send("/topic/x", "abc").await,
        Err(SessionError::InvalidState {
            operation: "send",
            state: SessionState::Closed
        })
    ));
    assert!(matches!(
        session.subscribe("/topic/x").await,
        Err(SessionError::InvalidState { .. })
    ));
    assert!(matches!(
        session.disconnect(None).await,
        Err(SessionError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn disconnect_waits_for_receipt() {
    let recorder = Arc::new(Recorder::default());
    let (connector, mut handle) = mock();
    let config = config().with_observer(recorder.clone());
    let mut session = Session::with_connector(config, connector);
    session.connect().await.unwrap();
    handle.next_frame().await;

    let broker = async {
        let frame = handle.next_frame().await;
        assert_eq!(frame.command, "DISCONNECT");
        assert_eq!(frame.get_header("receipt"), Some("bye"));
        handle.push(b"RECEIPT\nreceipt-id:bye\n\n\0");
    };
    let (result, ()) = tokio::join!(session.disconnect(Some("bye")), broker);

    result.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert!(handle.is_closed());
    assert_eq!(recorder.events(), vec!["receipt bye"]);
}

#[tokio::test(start_paused = true)]
async fn missing_receipt_times_out_quietly() {
    let (connector, mut handle) = mock();
    let config = config().with_receipt_timeout(Duration::from_secs(2));
    let mut session = Session::with_connector(config, connector);
    session.connect().await.unwrap();

    let started = tokio::time::Instant::now();
    session.disconnect(Some("bye")).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(session.state(), SessionState::Closed);

    handle.next_frame().await;
    let frame = handle.next_frame().await;
    assert_eq!(frame.get_header("receipt"), Some("bye"));
    assert!(handle.is_closed());
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn cancellation_unblocks_read_message() {
    let (mut session, _handle) = open_session().await;
    let token = session.cancellation_token();

    let cancel = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
    };
    let (result, ()) = tokio::join!(session.read_message(), cancel);

    assert!(matches!(result, Err(SessionError::Cancelled)));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(
        session.read_message().await,
        Err(SessionError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn cancellation_unblocks_a_stalled_send() {
    let (mut session, handle) = open_session().await;
    handle.stall_writes();
    let token = session.cancellation_token();

    let cancel = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
    };
    let (result, ()) = tokio::join!(session.send("/topic/x", "abc"), cancel);

    assert!(matches!(result, Err(SessionError::Cancelled)));
    assert_eq!(session.state(), SessionState::Closed);
    for _ in 0..100 {
        if handle.is_closed() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(handle.is_closed());
}

#[tokio::test]
async fn parent_token_ends_the_session() {
    let parent = CancellationToken::new();
    let (connector, handle) = mock();
    let config = config().with_cancellation(parent.clone());
    let mut session = Session::with_connector(config, connector);
    session.connect().await.unwrap();

    parent.cancel();
    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(
        session.send("/topic/x", "abc").await,
        Err(SessionError::InvalidState { .. })
    ));

    // the driver closes the transport once it observes the token
    for _ in 0..100 {
        if handle.is_closed() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(handle.is_closed());
}
