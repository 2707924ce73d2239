//! Request/reply integration tests

mod common;

use common::{bus_config, wait_for_status, MockBroker};
use evbus_client::{ConnectionStatus, EventBus, PublishOptions};
use evbus_core::{ClientFrame, Error, EventType};
use serde_json::json;
use std::time::{Duration, Instant};

async fn connected(broker: &MockBroker, client_id: &str) -> EventBus {
    let bus = EventBus::new(bus_config(&broker.url(), client_id));
    bus.connect().await.unwrap();
    assert!(wait_for_status(&bus, ConnectionStatus::Authenticated).await);
    bus
}

/// A bus answering graph searches with a fixed hit count
async fn start_responder(broker: &mut MockBroker) -> EventBus {
    let responder = connected(broker, "graph-service").await;

    let publisher = responder.clone();
    let _ = responder
        .subscribe(EventType::GraphSearchRequested, move |request| {
            let publisher = publisher.clone();
            async move {
                let Some(correlation_id) = request.correlation_id() else {
                    return;
                };
                let reply_type = request.reply_to().unwrap_or(EventType::GraphSearchResults);
                let payload = json!({"query": request.payload()["query"], "hits": 3});
                let options = PublishOptions::new()
                    .with_source("graph_svc")
                    .with_correlation_id(correlation_id);
                let _ = publisher.publish_event(reply_type, payload, options).await;
            }
        })
        .await;

    let announced = broker
        .wait_for_frame(|frame| matches!(frame, ClientFrame::Subscribe { .. }))
        .await;
    assert!(announced.is_some());
    responder
}

#[tokio::test]
async fn test_request_reply_round_trip() {
    let mut broker = MockBroker::start().await;
    let _responder = start_responder(&mut broker).await;
    let requester = connected(&broker, "search-box").await;

    let reply = requester
        .request_reply(
            EventType::GraphSearchRequested,
            json!({"query": "river"}),
            EventType::GraphSearchResults,
            Some(Duration::from_secs(2)),
        )
        .await
        .unwrap()
        .expect("no reply");

    assert_eq!(reply.event_type(), EventType::GraphSearchResults);
    assert_eq!(reply.payload()["hits"], 3);
    assert_eq!(reply.payload()["query"], "river");
    assert_eq!(reply.user_id(), Some("user-graph-service"));
    assert!(reply.correlation_id().is_some());
    assert_eq!(requester.pending_replies().await, 0);

    broker.shutdown();
}

#[tokio::test]
async fn test_concurrent_requests_get_their_own_replies() {
    let mut broker = MockBroker::start().await;
    let _responder = start_responder(&mut broker).await;
    let requester = connected(&broker, "search-box").await;

    let ask = |query: &'static str| {
        let requester = requester.clone();
        async move {
            requester
                .request_reply(
                    EventType::GraphSearchRequested,
                    json!({ "query": query }),
                    EventType::GraphSearchResults,
                    Some(Duration::from_secs(2)),
                )
                .await
        }
    };

    let (first, second) = tokio::join!(ask("river"), ask("dam"));
    let first = first.unwrap().expect("no reply for river");
    let second = second.unwrap().expect("no reply for dam");
    assert_eq!(first.payload()["query"], "river");
    assert_eq!(second.payload()["query"], "dam");
    assert_ne!(first.correlation_id(), second.correlation_id());

    broker.shutdown();
}

#[tokio::test]
async fn test_request_reply_times_out_without_responder() {
    let broker = MockBroker::start().await;
    let requester = connected(&broker, "search-box").await;

    let started = Instant::now();
    let reply = requester
        .request_reply(
            EventType::GraphSearchRequested,
            json!({"query": "nobody home"}),
            EventType::GraphSearchResults,
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap();

    assert!(reply.is_none());
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(requester.pending_replies().await, 0);

    broker.shutdown();
}

#[tokio::test]
async fn test_request_reply_unauthenticated_returns_none() {
    let broker = MockBroker::start().await;
    let bus = EventBus::new(bus_config(&broker.url(), "offline"));

    let reply = bus
        .request_reply(
            EventType::GraphSearchRequested,
            json!({}),
            EventType::GraphSearchResults,
            None,
        )
        .await
        .unwrap();

    assert!(reply.is_none());
    assert_eq!(bus.buffered_len().await, 0);
    assert_eq!(broker.accepted(), 0);

    broker.shutdown();
}

#[tokio::test]
async fn test_disconnect_cancels_pending_request() {
    let mut broker = MockBroker::start().await;
    let requester = connected(&broker, "search-box").await;

    let pending = {
        let requester = requester.clone();
        tokio::spawn(async move {
            requester
                .request_reply(
                    EventType::GraphSearchRequested,
                    json!({"query": "slow"}),
                    EventType::GraphSearchResults,
                    Some(Duration::from_secs(30)),
                )
                .await
        })
    };

    let published = broker
        .wait_for_frame(|frame| matches!(frame, ClientFrame::PublishEvent(_)))
        .await;
    assert!(published.is_some());

    requester.disconnect().await;
    let result = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::Disconnected)));

    broker.shutdown();
}
