// Streaming client tests against a scripted SSE server
// Author: kelexine (https://github.com/kelexine)

use deepchat::cache::{compute_key, CacheStore};
use deepchat::client::{ChatClient, NullSink};
use deepchat::config::ApiConfig;
use deepchat::models::{Message, Usage};
use mockito::Matcher;
use serde_json::json;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const PATH: &str = "/v1/chat/completions";

fn sse_body(lines: &[&str]) -> String {
    lines.iter().map(|line| format!("{}\n\n", line)).collect()
}

fn script() -> String {
    sse_body(&[
        r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#,
        r#"data: {"usage":{"prompt_tokens":5,"completion_tokens":2}}"#,
        "data: [DONE]",
    ])
}

fn client_for(url: String, cache_dir: &std::path::Path) -> ChatClient {
    let config = ApiConfig {
        api_key: "sk-test".to_string(),
        url,
        ..ApiConfig::default()
    };
    ChatClient::new(&config, CacheStore::new(cache_dir))
}

/// Body whose comment line is not valid UTF-8.
fn script_with_invalid_utf8() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n");
    body.extend_from_slice(b": comment \xff\n\n");
    body.extend_from_slice(b"data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n");
    body.extend_from_slice(b"data: [DONE]\n\n");
    body
}

/// Serves one frame, then holds the connection open without sending more.
fn stalled_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = [0u8; 4096];
        let _ = stream.read(&mut request);
        let _ = stream.write_all(
            b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
        );
        let _ = stream.write_all(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n");
        let _ = stream.flush();
        thread::sleep(Duration::from_secs(30));
    });

    format!("http://{}{}", addr, PATH)
}

fn expected_usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 5,
        completion_tokens: 2,
    })
}

#[test]
fn test_blocking_stream_reconstruction() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", PATH)
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::PartialJson(json!({
            "model": "deepseek-chat",
            "stream": true,
            "messages": [
                {"role": "user", "content": "before"},
                {"role": "user", "content": "Say hello"}
            ]
        })))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(script())
        .create();

    let dir = tempfile::tempdir().unwrap();
    let client = client_for(format!("{}{}", server.url(), PATH), dir.path());

    let mut printed = String::new();
    let reply = client
        .send_blocking(&[Message::user("before")], "Say hello", false, &mut printed)
        .unwrap();

    mock.assert();
    assert_eq!(reply.reply, "Hello");
    assert_eq!(reply.usage, expected_usage());
    assert!(!reply.cached);
    assert_eq!(printed, "Hello");
    client.close();
}

#[test]
fn test_blocking_malformed_line_is_skipped() {
    let mut server = mockito::Server::new();
    let body = sse_body(&[
        r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
        "data: {not-json",
        r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#,
        r#"data: {"usage":{"prompt_tokens":5,"completion_tokens":2}}"#,
        "data: [DONE]",
    ]);
    server
        .mock("POST", PATH)
        .with_status(200)
        .with_body(body)
        .create();

    let dir = tempfile::tempdir().unwrap();
    let client = client_for(format!("{}{}", server.url(), PATH), dir.path());

    let reply = client
        .send_blocking(&[], "Say hello", false, &mut NullSink)
        .unwrap();
    assert_eq!(reply.reply, "Hello");
    assert_eq!(reply.usage, expected_usage());
}

#[test]
fn test_second_identical_turn_is_served_from_cache() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", PATH)
        .with_status(200)
        .with_body(script())
        .expect(1)
        .create();

    let dir = tempfile::tempdir().unwrap();
    let client = client_for(format!("{}{}", server.url(), PATH), dir.path());

    let first = client.send_blocking(&[], "Say hello", true, &mut NullSink).unwrap();
    let mut printed = String::new();
    let second = client.send_blocking(&[], "Say hello", true, &mut printed).unwrap();

    mock.assert();
    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(second.reply, "Hello");
    assert_eq!(second.usage, expected_usage());
    assert_eq!(printed, "Hello");

    let key = compute_key(&[], "Say hello", "deepseek-chat");
    assert!(dir.path().join(key).exists());
}

#[test]
fn test_http_error_degrades_to_empty_reply() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", PATH)
        .with_status(401)
        .with_body(r#"{"error":{"message":"Incorrect API key provided: sk-test"}}"#)
        .create();

    let dir = tempfile::tempdir().unwrap();
    let client = client_for(format!("{}{}", server.url(), PATH), dir.path());

    let reply = client.send_blocking(&[], "hi", true, &mut NullSink).unwrap();
    assert!(reply.reply.is_empty());
    assert_eq!(reply.usage, None);

    // Empty replies are never cached
    assert_eq!(client.cache().stats().writes, 0);
}

#[test]
fn test_connection_failure_degrades_to_empty_reply() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_for(format!("http://127.0.0.1:1{}", PATH), dir.path());

    let reply = client.send_blocking(&[], "hi", true, &mut NullSink).unwrap();
    assert!(reply.reply.is_empty());
    assert_eq!(reply.usage, None);
}

#[test]
fn test_stream_without_done_keeps_partial_reply() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", PATH)
        .with_status(200)
        .with_body(r#"data: {"choices":[{"delta":{"content":"partial"}}]}"#)
        .create();

    let dir = tempfile::tempdir().unwrap();
    let client = client_for(format!("{}{}", server.url(), PATH), dir.path());

    let reply = client.send_blocking(&[], "hi", true, &mut NullSink).unwrap();
    assert_eq!(reply.reply, "partial");
    assert_eq!(reply.usage, None);
    assert_eq!(client.cache().stats().writes, 1);
}

#[test]
fn test_blocking_interrupt_ends_stalled_stream() {
    let dir = tempfile::tempdir().unwrap();
    let flag = Arc::new(AtomicBool::new(false));
    let client = client_for(stalled_server(), dir.path()).with_interrupt(flag.clone());

    let setter = flag.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(500));
        setter.store(true, Ordering::SeqCst);
    });

    let started = Instant::now();
    let mut printed = String::new();
    let err = client
        .send_blocking(&[], "hi", true, &mut printed)
        .unwrap_err();

    assert!(err.is_interrupt());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(printed, "Hel");
    // Interrupted replies are never cached
    assert_eq!(client.cache().stats().writes, 0);
}

#[test]
fn test_blocking_invalid_utf8_line_is_skipped() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", PATH)
        .with_status(200)
        .with_body(script_with_invalid_utf8())
        .create();

    let dir = tempfile::tempdir().unwrap();
    let client = client_for(format!("{}{}", server.url(), PATH), dir.path());

    let reply = client.send_blocking(&[], "hi", false, &mut NullSink).unwrap();
    assert_eq!(reply.reply, "Hello");
}

#[tokio::test]
async fn test_async_invalid_utf8_line_is_skipped() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", PATH)
        .with_status(200)
        .with_body(script_with_invalid_utf8())
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = client_for(format!("{}{}", server.url(), PATH), dir.path());

    let reply = client.send(&[], "hi", false, &mut NullSink).await.unwrap();
    assert_eq!(reply.reply, "Hello");
}

#[tokio::test]
async fn test_async_stream_reconstruction() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", PATH)
        .match_header("authorization", "Bearer sk-test")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(script())
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = client_for(format!("{}{}", server.url(), PATH), dir.path());

    let mut printed = String::new();
    let reply = client
        .send(&[], "Say hello", true, &mut printed)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(reply.reply, "Hello");
    assert_eq!(reply.usage, expected_usage());
    assert_eq!(printed, "Hello");
}

#[tokio::test]
async fn test_async_and_blocking_share_cache() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", PATH)
        .with_status(200)
        .with_body(script())
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = client_for(format!("{}{}", server.url(), PATH), dir.path());

    client.send(&[], "Say hello", true, &mut NullSink).await.unwrap();
    let again = client.send(&[], "Say hello", true, &mut NullSink).await.unwrap();

    assert!(again.cached);
    assert_eq!(again.reply, "Hello");
}

#[tokio::test]
async fn test_async_connection_failure_degrades() {
    let dir = tempfile::tempdir().unwrap();
    let client = client_for(format!("http://127.0.0.1:1{}", PATH), dir.path());

    let reply = client.send(&[], "hi", false, &mut NullSink).await.unwrap();
    assert!(reply.reply.is_empty());
    assert_eq!(reply.usage, None);
}
