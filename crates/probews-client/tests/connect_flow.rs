//! End-to-end connection manager behavior: port scanning, channel socket
//! bring-up with the session hello, push dispatch and status transitions.

use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt as _;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use probews_client::{ConnectionStatus, ProbeConfig, ProbeWebClient};
use probews_protocol::{ChannelEvent, SessionInfo};

/// What the loopback server observed from a channel connection.
#[derive(Debug)]
enum Seen {
    Auth(Option<String>),
    Hello(Value),
}

/// A server answering plain HTTP on `/` (the liveness probe) and upgrading
/// everything that asks for a WebSocket. Each socket expects the session
/// hello, pushes one event, then closes.
async fn spawn_combo_server() -> (u16, mpsc::UnboundedReceiver<Seen>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let seen_tx = seen_tx.clone();
            tokio::spawn(async move {
                // Peek the request head to tell the liveness probe apart
                // from an upgrade without consuming either.
                let mut buf = vec![0u8; 1024];
                let mut n = 0;
                for _ in 0..100 {
                    n = stream.peek(&mut buf).await.unwrap_or(0);
                    if buf[..n].windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                    sleep(Duration::from_millis(2)).await;
                }
                let head = String::from_utf8_lossy(&buf[..n]).to_ascii_lowercase();

                if !head.contains("upgrade: websocket") {
                    let _ = stream
                        .write_all(
                            b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                        )
                        .await;
                    let _ = stream.shutdown().await;
                    return;
                }

                let callback = {
                    let seen_tx = seen_tx.clone();
                    move |req: &Request, resp: Response| {
                        let auth = req
                            .headers()
                            .get("authorization")
                            .and_then(|value| value.to_str().ok())
                            .map(str::to_string);
                        let _ = seen_tx.send(Seen::Auth(auth));
                        Ok(resp)
                    }
                };
                let mut ws = accept_hdr_async(stream, callback).await.unwrap();

                if let Some(Ok(Message::Text(text))) = ws.next().await {
                    let hello: Value = serde_json::from_str(text.as_str()).unwrap();
                    let _ = seen_tx.send(Seen::Hello(hello));
                }

                let push = json!({
                    "type": "before_scripts_loaded",
                    "payload": {"type": "server_scripts"},
                });
                ws.send(Message::text(push.to_string())).await.unwrap();
                sleep(Duration::from_millis(100)).await;
                let _ = ws.close(None).await;
            });
        }
    });

    (port, seen_rx)
}

#[tokio::test]
async fn connect_opens_channels_and_dispatches_pushes() {
    let (port, mut seen_rx) = spawn_combo_server().await;
    let config = ProbeConfig {
        enabled: true,
        port,
        auth: Some("Bearer secret".to_string()),
    };
    let (client, mut status) = ProbeWebClient::new(&config);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    for tag in ["one", "two"] {
        let event_tx = event_tx.clone();
        client.register_handler("api/updates", move |event| {
            let event_tx = event_tx.clone();
            async move {
                let _ = event_tx.send((tag, event));
            }
        });
    }
    client.register_initializer(
        "api/updates",
        SessionInfo::new("probews-tests", ["after_scripts_loaded"]),
    );

    let (hook_tx, mut hook_rx) = mpsc::unbounded_channel();
    client.on_connected(move |_, port| {
        let hook_tx = hook_tx.clone();
        async move {
            let _ = hook_tx.send(port);
        }
    });

    assert!(client.try_connect(false).await);
    assert_eq!(*status.borrow(), ConnectionStatus::Connected);
    assert_eq!(client.connected_port(), Some(port));
    assert_eq!(hook_rx.recv().await, Some(port));

    // The handshake carried the auth header and the hello frame.
    match timeout(Duration::from_secs(2), seen_rx.recv()).await.unwrap() {
        Some(Seen::Auth(auth)) => assert_eq!(auth.as_deref(), Some("Bearer secret")),
        other => panic!("expected auth, got {other:?}"),
    }
    match timeout(Duration::from_secs(2), seen_rx.recv()).await.unwrap() {
        Some(Seen::Hello(hello)) => {
            assert_eq!(hello["type"], "$");
            assert_eq!(hello["payload"]["source"], "probews-tests");
            assert_eq!(hello["payload"]["tags"], json!(["after_scripts_loaded"]));
        }
        other => panic!("expected hello, got {other:?}"),
    }

    // The push arrives typed, once per handler, in registration order.
    for expected_tag in ["one", "two"] {
        let (tag, event) = timeout(Duration::from_secs(2), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tag, expected_tag);
        assert_eq!(
            event,
            ChannelEvent::BeforeScriptsLoaded {
                script_type: "server_scripts".to_string(),
            }
        );
    }

    // The server closes its side; a clean close reports Disconnected.
    timeout(
        Duration::from_secs(2),
        status.wait_for(|s| *s == ConnectionStatus::Disconnected),
    )
    .await
    .expect("disconnect status")
    .unwrap();
    assert!(!client.is_connected());
    assert_eq!(client.connected_port(), None);
}

#[tokio::test]
async fn scan_finds_a_server_shifted_inside_the_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/probejs/list-supported-recipes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["minecraft:crafting"])))
        .mount(&server)
        .await;

    let actual_port = server.address().port();
    // The configured port is dead; the server sits three ports up.
    let config = ProbeConfig {
        enabled: true,
        port: actual_port - 3,
        auth: None,
    };
    let (client, status) = ProbeWebClient::new(&config);

    assert!(client.try_connect(false).await);
    assert_eq!(client.connected_port(), Some(actual_port));
    assert_eq!(*status.borrow(), ConnectionStatus::Connected);

    // Follow-up HTTP goes to the resolved port, not the configured one.
    let types = client.supported_recipe_types().await.expect("recipe types");
    assert_eq!(types, ["minecraft:crafting"]);
}

#[tokio::test]
async fn exhausted_scan_reports_a_sticky_error() {
    // Nothing listens anywhere near the privileged low ports.
    let config = ProbeConfig {
        enabled: true,
        port: 1,
        auth: None,
    };
    let (client, status) = ProbeWebClient::new(&config);

    assert!(!client.try_connect(false).await);
    assert_eq!(*status.borrow(), ConnectionStatus::Error);
    assert!(!client.is_connected());
    assert_eq!(client.connected_port(), None);

    // An ordinary disconnect does not mask the error.
    client.disconnect();
    assert_eq!(*status.borrow(), ConnectionStatus::Error);
}
