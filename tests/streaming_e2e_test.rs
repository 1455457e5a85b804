//! End-to-end tests against a server bound to a random port.

mod common;

use clipcast_common::{EncodingMode, StreamStatus};
use common::TestHarness;
use serde_json::Value;

#[tokio::test]
async fn live_stream_over_http() {
    let (h, addr) = TestHarness::with_server().await;
    h.add_stream(1, StreamStatus::Active, EncodingMode::Copy, 2);
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/streams/1/hls/live.m3u8"))
        .header("user-agent", "AppleCoreMedia/1.0")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let playlist = resp.text().await.unwrap();

    // Follow the first segment URL exactly as a player would.
    let segment_url = playlist
        .lines()
        .find(|line| !line.starts_with('#') && !line.is_empty())
        .unwrap()
        .to_string();
    assert_eq!(segment_url, format!("http://{addr}/streams/1/hls/segment-000000.m4s"));

    let resp = client
        .get(&segment_url)
        .header("user-agent", "AppleCoreMedia/1.0")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"segment 0");

    let status: Value = client
        .get(format!("http://{addr}/streams/1/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["live"]["state"], "running");
    let clients = status["clients"].as_array().unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0]["ip"], "127.0.0.1");
    assert_eq!(clients[0]["user_agent"], "AppleCoreMedia/1.0");
    assert!(status["bytes_per_second"].as_f64().unwrap() > 0.0);

    let resp = client
        .post(format!("http://{addr}/streams/1/hls/stop"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(h.ctx.live.is_empty());
}

#[tokio::test]
async fn forwarded_client_is_tracked_per_agent() {
    let (h, addr) = TestHarness::with_server().await;
    let stream = h.add_stream(2, StreamStatus::Active, EncodingMode::Original, 1);
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/streams/2/items/{}/stream", stream.items[0].item_id);

    for agent in ["VLC/3.0", "Safari"] {
        let resp = client
            .get(&url)
            .header("x-forwarded-for", "203.0.113.9")
            .header("user-agent", agent)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.bytes().await.unwrap().len(), 2048);
    }

    let clients = h.ctx.connections.list_active(stream.id);
    assert_eq!(clients.len(), 2);
    assert!(clients.iter().all(|c| c.client.ip == "203.0.113.9"));
}
