//! Integration tests: transports against real servers on localhost,
//! shutdown behaviour, and the whole pipeline down to an in-memory
//! display.

use std::io::Cursor;
use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use pixfeed_core::{
    ImageCodec, MemoryDisplay, Payload, PlaybackOptions, Player, PushClient, PushCodec,
    PushMessage, Transport, TransportOptions, from_url, relay,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

// ── Helpers ──────────────────────────────────────────────────────

fn options() -> TransportOptions {
    TransportOptions {
        request_timeout: Duration::from_secs(5),
        max_backoff: Duration::from_secs(1),
        min_poll_interval: Duration::from_millis(10),
    }
}

async fn ephemeral_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

fn http_response(status: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n", body.len());
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    let mut out = out.into_bytes();
    out.extend_from_slice(body);
    out
}

/// A 200 whose body runs until the connection closes.
fn unframed_response(body: &[u8]) -> Vec<u8> {
    let mut out = b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n".to_vec();
    out.extend_from_slice(body);
    out
}

/// Answer one request per connection with the given responses in order.
/// The client may hang up early, so write errors are ignored.
async fn serve_http(listener: TcpListener, responses: Vec<Vec<u8>>) {
    for response in responses {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..n]);
        }
        assert!(request.starts_with(b"GET /next"));
        let _ = stream.write_all(&response).await;
        let _ = stream.shutdown().await;
    }
}

async fn accept_push(listener: &TcpListener) -> Framed<TcpStream, PushCodec> {
    let (stream, _) = listener.accept().await.unwrap();
    Framed::new(stream, PushCodec)
}

fn red_png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([255, 0, 0, 255]));
    let mut out = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

// ── Polling ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_poller_relays_body_and_headers() {
    let (listener, addr) = ephemeral_listener().await;
    tokio::spawn(serve_http(
        listener,
        vec![http_response(
            "200 OK",
            &[("Tronbyt-Brightness", "40"), ("Tronbyt-Dwell-Secs", "5")],
            b"WEBPDATA",
        )],
    ));

    let cancel = CancellationToken::new();
    let (tx, rx) = relay(cancel.clone());
    let transport = from_url(&format!("http://{addr}/next"), options()).unwrap();
    let worker = tokio::spawn(transport.run(tx, cancel.clone()));

    let payload = tokio::time::timeout(Duration::from_secs(5), rx.pop())
        .await
        .expect("timeout")
        .expect("relay closed");
    assert_eq!(payload.content, Bytes::from_static(b"WEBPDATA"));
    assert_eq!(payload.brightness, Some(40));
    assert_eq!(payload.dwell, Some(Duration::from_secs(5)));

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("poller did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_poller_retries_after_server_error() {
    let (listener, addr) = ephemeral_listener().await;
    tokio::spawn(serve_http(
        listener,
        vec![
            http_response("500 Internal Server Error", &[], b"oops"),
            http_response("200 OK", &[("Tronbyt-Brightness", "dim")], b"second"),
        ],
    ));

    let cancel = CancellationToken::new();
    let (tx, rx) = relay(cancel.clone());
    let transport = from_url(&format!("http://{addr}/next"), options()).unwrap();
    let worker = tokio::spawn(transport.run(tx, cancel.clone()));

    let payload = tokio::time::timeout(Duration::from_secs(10), rx.pop())
        .await
        .expect("timeout")
        .expect("relay closed");
    // The 500 body never reaches the relay.
    assert_eq!(payload.content, Bytes::from_static(b"second"));
    assert_eq!(payload.brightness, None);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("poller did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_poller_rejects_oversized_body() {
    let (listener, addr) = ephemeral_listener().await;
    let oversized = vec![0u8; pixfeed_core::codec::MAX_MESSAGE_SIZE + 1];
    tokio::spawn(serve_http(
        listener,
        vec![unframed_response(&oversized), http_response("200 OK", &[], b"ok")],
    ));

    let cancel = CancellationToken::new();
    let (tx, rx) = relay(cancel.clone());
    let transport = from_url(&format!("http://{addr}/next"), options()).unwrap();
    let worker = tokio::spawn(transport.run(tx, cancel.clone()));

    let payload = tokio::time::timeout(Duration::from_secs(10), rx.pop())
        .await
        .expect("timeout")
        .expect("relay closed");
    assert_eq!(payload.content, Bytes::from_static(b"ok"));

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("poller did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_poller_spaces_out_successful_polls() {
    let (listener, addr) = ephemeral_listener().await;
    tokio::spawn(serve_http(
        listener,
        (0..3).map(|_| http_response("200 OK", &[], b"")).collect(),
    ));

    let cancel = CancellationToken::new();
    let (tx, rx) = relay(cancel.clone());
    let opts = TransportOptions {
        min_poll_interval: Duration::from_millis(200),
        ..options()
    };
    let transport = from_url(&format!("http://{addr}/next"), opts).unwrap();
    let started = std::time::Instant::now();
    let worker = tokio::spawn(transport.run(tx, cancel.clone()));

    for _ in 0..3 {
        let payload = tokio::time::timeout(Duration::from_secs(5), rx.pop())
            .await
            .expect("timeout")
            .expect("relay closed");
        assert!(payload.content.is_empty());
    }
    assert!(started.elapsed() >= Duration::from_millis(400));

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("poller did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_poller_stops_while_relay_is_full() {
    let (listener, addr) = ephemeral_listener().await;
    tokio::spawn(serve_http(
        listener,
        vec![
            http_response("200 OK", &[], b"one"),
            http_response("200 OK", &[], b"two"),
        ],
    ));

    let cancel = CancellationToken::new();
    let (tx, rx) = relay(cancel.clone());
    let transport = from_url(&format!("http://{addr}/next"), options()).unwrap();
    let worker = tokio::spawn(transport.run(tx, cancel.clone()));

    // Slot fills with "one"; the second push blocks behind it.
    tokio::time::timeout(Duration::from_secs(5), async {
        while !rx.has_pending() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first payload never arrived");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("blocked poller did not stop")
        .unwrap();
    assert_eq!(rx.pop().await, None);
}

// ── Push ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_push_client_relays_messages_in_order() {
    let (listener, addr) = ephemeral_listener().await;
    let server = tokio::spawn(async move {
        let mut frames = accept_push(&listener).await;
        frames.send(PushMessage::text(r#"{"dwell_secs": 15}"#)).await.unwrap();
        frames
            .send(PushMessage::Binary(Bytes::from_static(b"img")))
            .await
            .unwrap();
        frames.send(PushMessage::text("not json")).await.unwrap();
        frames
            .send(PushMessage::text(r#"{"status":"error","message":"no apps"}"#))
            .await
            .unwrap();
        frames.send(PushMessage::text(r#"{"brightness": 40}"#)).await.unwrap();
        frames
    });

    let cancel = CancellationToken::new();
    let (tx, rx) = relay(cancel.clone());
    let client = Box::new(PushClient::new(addr, options()));
    let worker = tokio::spawn(client.run(tx, cancel.clone()));

    let first = tokio::time::timeout(Duration::from_secs(5), rx.pop())
        .await
        .expect("timeout")
        .expect("relay closed");
    assert_eq!(
        first,
        Payload::new(Bytes::from_static(b"img")).with_dwell(Some(Duration::from_secs(15)))
    );

    let second = tokio::time::timeout(Duration::from_secs(5), rx.pop())
        .await
        .expect("timeout")
        .expect("relay closed");
    assert_eq!(second, Payload::brightness_only(40));

    let _frames = server.await.unwrap();
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("push client did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_push_client_reconnects_after_drop() {
    let (listener, addr) = ephemeral_listener().await;
    tokio::spawn(async move {
        let mut frames = accept_push(&listener).await;
        frames
            .send(PushMessage::Binary(Bytes::from_static(b"before")))
            .await
            .unwrap();
        drop(frames);

        let mut frames = accept_push(&listener).await;
        frames
            .send(PushMessage::Binary(Bytes::from_static(b"after")))
            .await
            .unwrap();
        // Keep the second connection open until the test ends.
        std::future::pending::<()>().await;
    });

    let cancel = CancellationToken::new();
    let (tx, rx) = relay(cancel.clone());
    let client = Box::new(PushClient::new(addr, options()));
    let worker = tokio::spawn(client.run(tx, cancel.clone()));

    for expected in [&b"before"[..], &b"after"[..]] {
        let payload = tokio::time::timeout(Duration::from_secs(10), rx.pop())
            .await
            .expect("timeout")
            .expect("relay closed");
        assert_eq!(payload.content, Bytes::copy_from_slice(expected));
    }

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("push client did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_push_client_closes_socket_on_shutdown() {
    let (listener, addr) = ephemeral_listener().await;

    let cancel = CancellationToken::new();
    let (tx, _rx) = relay(cancel.clone());
    let client = Box::new(PushClient::new(addr, options()));
    let worker = tokio::spawn(client.run(tx, cancel.clone()));

    let (mut stream, _) = listener.accept().await.unwrap();
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("push client did not stop")
        .unwrap();

    // The client half-closed its side: the server reads EOF.
    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("timeout")
        .unwrap();
    assert_eq!(n, 0);
}

// ── Full pipeline ────────────────────────────────────────────────

#[tokio::test]
async fn test_pipeline_paints_pushed_image() {
    let (listener, addr) = ephemeral_listener().await;
    let png = red_png(4, 4);
    let (sent_tx, sent_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let mut frames = accept_push(&listener).await;
        frames.send(PushMessage::text(r#"{"brightness": 40}"#)).await.unwrap();
        frames.send(PushMessage::Binary(png.into())).await.unwrap();
        let _ = sent_tx.send(());
        std::future::pending::<()>().await;
    });

    let cancel = CancellationToken::new();
    let (tx, rx) = relay(cancel.clone());
    let client = Box::new(PushClient::new(addr, options()));
    let worker = tokio::spawn(client.run(tx, cancel.clone()));

    let mut player = Player::new(
        MemoryDisplay::new(64, 32),
        Box::new(ImageCodec::new()),
        PlaybackOptions {
            default_dwell: None,
            ..PlaybackOptions::default()
        },
    )
    .with_initial_brightness(30);

    let stopper = async {
        sent_rx.await.unwrap();
        // Give the player time to decode and present.
        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
    };
    tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(player.run(&rx), stopper);
    })
    .await
    .expect("pipeline did not stop");

    let display = player.display();
    assert_eq!(display.brightness_writes(), &[40]);
    assert_eq!(display.presents().len(), 1);
    assert_eq!(display.front().pixel(0, 0), Some([255, 0, 0]));
    assert_eq!(display.front().pixel(3, 3), Some([255, 0, 0]));
    assert_eq!(display.front().pixel(4, 0), Some([0, 0, 0]));

    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("push client did not stop")
        .unwrap();
}
