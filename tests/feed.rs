use std::time::Duration;

use anyhow::{Result, anyhow};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};

use burrow_feed::models::common::Config;
use burrow_feed::models::events::NormalizedEvent;
use burrow_feed::stream::{FeedHandle, FeedSession, Visibility};

const WAIT: Duration = Duration::from_secs(5);

type ServerSocket = WebSocketStream<TcpStream>;

/// Local event-stream stand-in. Every accepted connection is handed to the test.
async fn start_server() -> Result<(String, mpsc::UnboundedReceiver<ServerSocket>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws) = accept_async(stream).await {
                if tx.send(ws).is_err() {
                    break;
                }
            }
        }
    });

    Ok((format!("ws://{}/ws", addr), rx))
}

fn test_config(endpoint: &str) -> Config {
    let mut config = Config::default();
    config.stream.endpoint = endpoint.to_string();
    config.stream.hidden_retry_delay_ms = 300;
    config.filter.debounce_ms = 100;
    config
}

async fn next_connection(rx: &mut mpsc::UnboundedReceiver<ServerSocket>) -> Result<ServerSocket> {
    timeout(WAIT, rx.recv())
        .await?
        .ok_or_else(|| anyhow!("server stopped"))
}

async fn read_subscription(ws: &mut ServerSocket) -> Result<Value> {
    loop {
        match timeout(WAIT, ws.next()).await? {
            Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
            Some(Ok(_)) => continue,
            other => return Err(anyhow!("expected subscription, got {:?}", other)),
        }
    }
}

async fn send_batch(ws: &mut ServerSocket, events: Vec<Value>) -> Result<()> {
    ws.send(Message::Text(json!({ "events": events }).to_string()))
        .await?;
    Ok(())
}

fn raw_event(time_ms: u64, account: &str) -> Value {
    json!({
        "block_timestamp": (time_ms * 1_000_000).to_string(),
        "event": {
            "standard": "burrow",
            "event": "deposit",
            "data": [{ "account_id": account, "token_id": "wrap.near", "amount": "1" }]
        }
    })
}

async fn wait_for_timeline<F>(handle: &FeedHandle, predicate: F) -> Result<Vec<NormalizedEvent>>
where
    F: FnMut(&Vec<NormalizedEvent>) -> bool,
{
    let mut rx = handle.subscribe();
    let timeline = timeout(WAIT, rx.wait_for(predicate)).await??.clone();
    Ok(timeline)
}

fn times(timeline: &[NormalizedEvent]) -> Vec<i64> {
    timeline
        .iter()
        .map(|e| e.occurred_at.timestamp_millis())
        .collect()
}

#[tokio::test]
async fn test_subscribes_and_merges_batches() -> Result<()> {
    let (endpoint, mut connections) = start_server().await?;
    let (handle, task) = FeedSession::spawn(&test_config(&endpoint), None);

    let mut ws = next_connection(&mut connections).await?;
    let subscription = read_subscription(&mut ws).await?;
    assert_eq!(
        subscription,
        json!({
            "secret": "brrr",
            "filter": {
                "status": "SUCCESS",
                "account_id": "contract.main.burrow.near",
                "event": { "standard": "burrow" }
            },
            "fetch_past_events": 50
        })
    );

    send_batch(&mut ws, vec![raw_event(10, "a.near"), raw_event(20, "b.near"), raw_event(30, "c.near")])
        .await?;
    let timeline = wait_for_timeline(&handle, |t| t.len() == 3).await?;
    assert_eq!(times(&timeline), vec![30, 20, 10]);

    send_batch(&mut ws, vec![raw_event(25, "d.near"), raw_event(40, "e.near")]).await?;
    let timeline = wait_for_timeline(&handle, |t| t.len() == 4).await?;
    assert_eq!(times(&timeline), vec![40, 30, 20, 10]);

    // Indices follow normalization order: a, b, c, d, e
    let indices: Vec<u64> = timeline.iter().map(|e| e.sequence_index).collect();
    assert_eq!(indices, vec![4, 2, 1, 0]);

    handle.shutdown().await?;
    timeout(WAIT, task).await??;
    Ok(())
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() -> Result<()> {
    let (endpoint, mut connections) = start_server().await?;
    let (handle, task) = FeedSession::spawn(&test_config(&endpoint), None);

    let mut ws = next_connection(&mut connections).await?;
    read_subscription(&mut ws).await?;

    ws.send(Message::Text("this is not json".to_string())).await?;
    ws.send(Message::Text(json!({ "status": "ok" }).to_string())).await?;
    send_batch(
        &mut ws,
        vec![
            json!({ "block_timestamp": "5000000", "event": { "event": "deposit", "data": [] } }),
            raw_event(50, "a.near"),
        ],
    )
    .await?;

    let timeline = wait_for_timeline(&handle, |t| !t.is_empty()).await?;
    assert_eq!(times(&timeline), vec![50]);
    assert!(connections.try_recv().is_err(), "no reconnect expected");

    handle.shutdown().await?;
    timeout(WAIT, task).await??;
    Ok(())
}

#[tokio::test]
async fn test_reconnects_and_dedups_replayed_events() -> Result<()> {
    let (endpoint, mut connections) = start_server().await?;
    let (handle, task) = FeedSession::spawn(&test_config(&endpoint), None);

    let mut ws = next_connection(&mut connections).await?;
    let first_subscription = read_subscription(&mut ws).await?;
    send_batch(&mut ws, vec![raw_event(10, "a.near"), raw_event(20, "a.near")]).await?;
    wait_for_timeline(&handle, |t| t.len() == 2).await?;

    ws.close(None).await?;
    drop(ws);

    // The replayed window overlaps what the timeline already holds
    let mut ws = next_connection(&mut connections).await?;
    assert_eq!(read_subscription(&mut ws).await?, first_subscription);
    send_batch(
        &mut ws,
        vec![raw_event(10, "a.near"), raw_event(20, "a.near"), raw_event(30, "a.near")],
    )
    .await?;

    let timeline = wait_for_timeline(&handle, |t| t.len() == 3).await?;
    assert_eq!(times(&timeline), vec![30, 20, 10]);

    handle.shutdown().await?;
    timeout(WAIT, task).await??;
    Ok(())
}

#[tokio::test]
async fn test_filter_change_resets_and_resubscribes() -> Result<()> {
    let (endpoint, mut connections) = start_server().await?;
    let (handle, task) = FeedSession::spawn(&test_config(&endpoint), None);

    let mut ws = next_connection(&mut connections).await?;
    read_subscription(&mut ws).await?;
    send_batch(&mut ws, vec![raw_event(10, "a.near")]).await?;
    wait_for_timeline(&handle, |t| t.len() == 1).await?;

    // Rapid edits collapse into one applied change
    for partial in ["a", "al", "alice.near"] {
        handle.set_account_filter(Some(partial.to_string())).await?;
    }

    wait_for_timeline(&handle, |t| t.is_empty()).await?;

    let mut ws = next_connection(&mut connections).await?;
    let subscription = read_subscription(&mut ws).await?;
    assert_eq!(
        subscription["filter"]["event"]["data"],
        json!([{ "account_id": "alice.near" }])
    );

    // Clearing rebuilds from the template, leaving no trace of the old account
    handle.set_account_filter(None).await?;
    let mut ws = next_connection(&mut connections).await?;
    let subscription = read_subscription(&mut ws).await?;
    assert_eq!(
        subscription["filter"],
        json!({
            "status": "SUCCESS",
            "account_id": "contract.main.burrow.near",
            "event": { "standard": "burrow" }
        })
    );
    assert!(connections.try_recv().is_err(), "one connection per applied filter");

    handle.shutdown().await?;
    timeout(WAIT, task).await??;
    Ok(())
}

#[tokio::test]
async fn test_hidden_host_defers_reconnect() -> Result<()> {
    let (endpoint, mut connections) = start_server().await?;
    let (handle, task) = FeedSession::spawn(&test_config(&endpoint), None);

    let mut ws = next_connection(&mut connections).await?;
    read_subscription(&mut ws).await?;

    handle.set_visibility(Visibility::Hidden);
    ws.close(None).await?;
    drop(ws);

    // Still hidden: every attempt is deferred rather than opening a socket
    assert!(
        timeout(Duration::from_millis(700), connections.recv())
            .await
            .is_err()
    );

    handle.set_visibility(Visibility::Visible);
    let mut ws = next_connection(&mut connections).await?;
    read_subscription(&mut ws).await?;

    handle.shutdown().await?;
    timeout(WAIT, task).await??;
    Ok(())
}
