//! End-to-end tests of the message router over the in-process bus.

#![allow(clippy::unwrap_used, clippy::panic)]

use fleetgraph::{Bus, BusClient, FleetService};
use fleetgraph_core::wire::{self, ChildrenRequest, Notification};
use fleetgraph_core::{GraphStore, Message, NodeEdge, NodeId, NodeType, Point, point_type};
use std::time::Duration;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn start_service(metrics_period: Duration) -> FleetService {
    let store = GraphStore::in_memory().expect("store");
    FleetService::start(store, Bus::new(256), None, metrics_period).expect("service")
}

fn id(s: &str) -> NodeId {
    NodeId::from(s)
}

/// Create `node` under `parent` with a type and extra points.
async fn add(client: &BusClient, node: &str, parent: &str, node_type: NodeType, points: Vec<Point>) {
    client
        .send_edge_points(&id(node), &id(parent), &[], true)
        .await
        .expect("edge points");
    let mut all = vec![Point::text(point_type::NODE_TYPE, node_type.as_str())];
    all.extend(points);
    client
        .send_node_points(&id(node), &all, true)
        .await
        .expect("node points");
}

/// Poll a node until `check` holds or two seconds pass.
async fn wait_for<F>(client: &BusClient, node: &str, parent: &str, check: F) -> NodeEdge
where
    F: Fn(&NodeEdge) -> bool,
{
    for _ in 0..200 {
        if let Ok(n) = client.get_node(&id(node), parent).await {
            if check(&n) {
                return n;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition on {node} never held");
}

// =============================================================================
// POINTS / DESCRIBE / CHILDREN
// =============================================================================

#[tokio::test]
async fn first_node_becomes_root_and_child_changes_hash() {
    let service = start_service(Duration::from_secs(3600));
    let client = service.client();

    client
        .send_node_points(&id("a"), &[Point::value("value", 10.0)], true)
        .await
        .expect("root points");
    let root = client.get_node(&id("root"), "").await.expect("describe root");
    assert_eq!(root.id, id("a"));
    assert!(root.parent.is_none());
    let before = root.hash;

    client
        .send_edge_points(&id("b"), &id("a"), &[], true)
        .await
        .expect("edge");
    client
        .send_node_points(&id("b"), &[Point::value("value", 20.0)], true)
        .await
        .expect("child points");

    let children = client
        .get_children(&id("a"), &ChildrenRequest::default())
        .await
        .expect("children");
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, id("b"));
    assert_eq!(children[0].points.value("value", ""), Some(20.0));

    let after = client.get_node(&id("a"), "").await.expect("describe").hash;
    assert_ne!(before, after);
}

#[tokio::test]
async fn tombstoned_child_only_shows_with_include_deleted() {
    let service = start_service(Duration::from_secs(3600));
    let client = service.client();

    add(client, "hq", "", NodeType::Device, vec![]).await;
    add(client, "pump", "hq", NodeType::Device, vec![]).await;
    add(client, "valve", "hq", NodeType::Device, vec![]).await;

    client
        .send_edge_points(&id("pump"), &id("hq"), &[Point::flag(point_type::TOMBSTONE, true)], true)
        .await
        .expect("tombstone");

    let live = client
        .get_children(&id("hq"), &ChildrenRequest::default())
        .await
        .expect("children");
    assert_eq!(live.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(), vec!["valve"]);

    let all = client
        .get_children(
            &id("hq"),
            &ChildrenRequest {
                include_del: true,
                ..ChildrenRequest::default()
            },
        )
        .await
        .expect("children");
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn errors_come_back_as_reply_strings() {
    let service = start_service(Duration::from_secs(3600));
    let client = service.client();

    let err = client.get_node(&id("ghost"), "").await.expect_err("missing");
    assert!(err.is_not_found(), "{err}");

    let reply = service
        .bus()
        .request("node.x.points", b"not json".to_vec(), Duration::from_secs(1))
        .await
        .expect("reply");
    assert!(String::from_utf8_lossy(&reply).starts_with("validation"));

    add(client, "hq", "", NodeType::Device, vec![]).await;
    let err = client
        .send_edge_points(&id("orphan"), &id("nowhere"), &[], true)
        .await
        .expect_err("unknown parent");
    assert!(err.is_not_found(), "{err}");
}

// =============================================================================
// RULES
// =============================================================================

#[tokio::test]
async fn rule_transition_sets_value_on_target() {
    let service = start_service(Duration::from_secs(3600));
    let client = service.client();

    add(client, "hq", "", NodeType::Device, vec![]).await;
    add(client, "sensor", "hq", NodeType::Device, vec![]).await;
    add(client, "fan", "hq", NodeType::Device, vec![]).await;
    add(client, "cooling", "hq", NodeType::Rule, vec![]).await;
    add(
        client,
        "hot",
        "cooling",
        NodeType::Condition,
        vec![
            Point::text(point_type::POINT_TYPE, "temp"),
            Point::text(point_type::OPERATOR, ">"),
            Point::value(point_type::VALUE, 30.0),
        ],
    )
    .await;
    add(
        client,
        "fan-on",
        "cooling",
        NodeType::Action,
        vec![
            Point::text(point_type::ACTION, "setValue"),
            Point::text(point_type::NODE_ID, "fan"),
            Point::text(point_type::POINT_TYPE, "speed"),
            Point::value(point_type::VALUE, 100.0),
        ],
    )
    .await;

    client
        .send_node_points(&id("sensor"), &[Point::value("temp", 25.0)], true)
        .await
        .expect("cool reading");
    let fan = client.get_node(&id("fan"), "hq").await.expect("fan");
    assert_eq!(fan.points.value("speed", ""), None);

    client
        .send_node_points(&id("sensor"), &[Point::value("temp", 35.0)], true)
        .await
        .expect("hot reading");
    wait_for(client, "fan", "hq", |n| n.points.value("speed", "") == Some(100.0)).await;

    let rule = client.get_node(&id("cooling"), "hq").await.expect("rule");
    assert!(rule.points.value_bool(point_type::ACTIVE, ""));
}

// =============================================================================
// FAN-OUT
// =============================================================================

#[tokio::test]
async fn notification_reaches_users_up_the_tree() {
    let service = start_service(Duration::from_secs(3600));
    let client = service.client();

    add(client, "hq", "", NodeType::Device, vec![]).await;
    add(
        client,
        "alice",
        "hq",
        NodeType::User,
        vec![Point::text(point_type::EMAIL, "alice@example.com")],
    )
    .await;
    add(client, "ghost", "hq", NodeType::User, vec![]).await;
    add(client, "site", "hq", NodeType::Group, vec![]).await;
    add(client, "dev", "site", NodeType::Device, vec![]).await;

    let mut messages = service.bus().subscribe("node.*.msg").expect("subscribe");
    client
        .send_notification(
            &id("dev"),
            &Notification {
                id: "n1".into(),
                subject: "alarm".into(),
                message: "pump stalled".into(),
                ..Notification::default()
            },
        )
        .expect("notify");

    let msg = tokio::time::timeout(Duration::from_secs(2), messages.recv())
        .await
        .expect("in time")
        .expect("message");
    assert_eq!(msg.subject, "node.alice.msg");
    let message: Message = wire::decode(&msg.payload).expect("decode");
    assert_eq!(message.email, "alice@example.com");
    assert_eq!(message.notification_id, "n1");

    // the unreachable user gets nothing
    let extra = tokio::time::timeout(Duration::from_millis(100), messages.recv()).await;
    assert!(extra.is_err());
}

// =============================================================================
// METRICS
// =============================================================================

#[tokio::test]
async fn handler_metrics_report_onto_root() {
    let service = start_service(Duration::from_millis(1));
    let client = service.client();

    add(client, "hq", "", NodeType::Device, vec![]).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    client
        .send_node_points(&id("hq"), &[Point::value("temp", 1.0)], true)
        .await
        .expect("points");

    let root = wait_for(client, "root", "", |n| {
        n.points.find(point_type::METRIC_BUS_NODE_POINT, "").is_some()
    })
    .await;
    let metric = root
        .points
        .find(point_type::METRIC_BUS_NODE_POINT, "")
        .expect("metric");
    assert!(metric.min <= metric.value && metric.value <= metric.max);
}
