mod common;

use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;

use serde_json::json;
use tokio::io::{duplex, AsyncWriteExt};

use bgpd_injector::injector::{self, InjectError, UpdateRequest};
use bgpd_injector::message::{
    cease, AsPath, Origin, PathAttribute, Update, header_error, open_error, Capability, ErrorCode, Family, Message, Notification, Open,
};
use bgpd_injector::session::{CloseReason, Connection, SessionState};

use common::{FakePeer, Harness, PEER, PEER_ID};

fn request(prefix: &str) -> UpdateRequest {
    serde_json::from_value(json!({
        "nlri": prefix,
        "next_hop": "10.0.0.2",
        "as_path": [65001]
    }))
    .unwrap()
}

#[tokio::test]
async fn test_inject_is_sent_once_in_order() {
    let mut harness = Harness::start("").await;
    let (handle, mut peer) = harness.established().await;

    let prefixes = ["10.1.0.0/24", "10.2.0.0/24", "10.3.0.0/24"];
    let mut ids = vec![];
    for prefix in prefixes.iter() {
        ids.push(injector::inject(&handle, request(prefix)).await.unwrap());
    }
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 3);

    for prefix in prefixes.iter() {
        match peer.recv_skipping_keepalives().await {
            Message::Update(update) => {
                assert_eq!(update.announced_routes, vec![prefix.parse().unwrap()]);
                assert_eq!(update.as_path().unwrap().to_string(), "65000 65001");
            }
            other => panic!("Expected UPDATE, got {:?}", other),
        }
    }

    let status = handle
        .wait_for(|status| status.last_sent_id == Some(ids[2]))
        .await
        .unwrap();
    assert_eq!(status.counts.update.sent, 3);
    assert_eq!(status.queue_depth, 0);
}

#[tokio::test]
async fn test_inject_before_established() {
    let mut harness = Harness::start("").await;
    // Connected and OPEN sent, but the peer never answers
    let mut peer = harness.next_peer().await;
    assert!(matches!(peer.recv().await, Message::Open(_)));
    let handle = harness.handle().await;
    handle
        .wait_for(|status| status.state == SessionState::OpenSent)
        .await
        .unwrap();

    let result = injector::inject(&handle, request("10.1.0.0/24")).await;
    assert_eq!(result, Err(InjectError::SessionNotEstablished));
    assert_eq!(handle.status().queue_depth, 0);
    assert_eq!(handle.status().counts.update.sent, 0);
}

#[tokio::test]
async fn test_invalid_request_never_reaches_session() {
    let mut harness = Harness::start("").await;
    let (handle, _peer) = harness.established().await;
    let request: UpdateRequest =
        serde_json::from_value(json!({"nlri": "10.1.0.0/99", "next_hop": "10.0.0.2", "as_path": []}))
            .unwrap();
    match injector::inject(&handle, request).await {
        Err(InjectError::InvalidRequest { field, .. }) => assert_eq!(field, "nlri"),
        other => panic!("Expected InvalidRequest, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unsupported_family() {
    // Multicast is not configured for this peer
    let mut harness = Harness::start("").await;
    let (handle, _peer) = harness.established().await;
    let multicast: UpdateRequest = serde_json::from_value(json!({
        "nlri": "10.1.0.0/24", "next_hop": "10.0.0.2", "as_path": [], "safi": "multicast"
    }))
    .unwrap();
    assert_eq!(
        injector::inject(&handle, multicast).await,
        Err(InjectError::UnsupportedAddressFamily(Family::IPV4_MULTICAST))
    );
}

#[tokio::test]
async fn test_ipv6_update_uses_mp_reach() {
    let mut harness = Harness::start("").await;
    let (handle, mut peer) = harness.established().await;
    let request: UpdateRequest = serde_json::from_value(json!({
        "nlri": ["2001:db8:1::/48", "2001:db8:2::/48"],
        "next_hop": "2001:db8::2",
        "as_path": [65001],
        "communities": ["65000:100"]
    }))
    .unwrap();
    injector::inject(&handle, request).await.unwrap();
    match peer.recv_skipping_keepalives().await {
        Message::Update(update) => {
            let reach = update.mp_reach().unwrap();
            assert_eq!(reach.family, Family::IPV6_UNICAST);
            assert_eq!(reach.announced_routes.len(), 2);
            assert!(update.announced_routes.is_empty());
        }
        other => panic!("Expected UPDATE, got {:?}", other),
    }
}

#[tokio::test]
async fn test_route_refresh_request() {
    let mut harness = Harness::start("").await;
    let (handle, mut peer) = harness.established().await;
    injector::route_refresh(&handle, Family::IPV6_UNICAST).await.unwrap();
    match peer.recv_skipping_keepalives().await {
        Message::RouteRefresh(refresh) => assert_eq!(refresh.family, Family::IPV6_UNICAST),
        other => panic!("Expected ROUTE-REFRESH, got {:?}", other),
    }
    handle
        .wait_for(|status| status.counts.route_refresh.sent == 1)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_hold_timer_expiry() {
    let mut harness = Harness::start("hold_timer = 3").await;
    let mut peer = harness.next_peer().await;
    let open = peer.handshake(3).await;
    assert_eq!(open.hold_time, 3);
    let handle = harness.handle().await;

    // The peer goes quiet; our keepalives keep coming until the hold time runs out
    match peer.recv_skipping_keepalives().await {
        Message::Notification(notification) => {
            assert_eq!((notification.code, notification.subcode), (ErrorCode::HoldTimerExpired, 0));
        }
        other => panic!("Expected NOTIFICATION, got {:?}", other),
    }
    let status = handle
        .wait_for(|status| status.state == SessionState::Idle)
        .await
        .unwrap();
    assert!(status.last_error.unwrap().contains("Hold time expired"));
    handle.closed().await;
    assert!(harness.registry.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_connection_loss() {
    let mut harness = Harness::with_config(common::reconnecting_config("")).await;
    let (handle, peer) = harness.established().await;
    drop(peer);

    handle
        .wait_for(|status| status.state != SessionState::Established)
        .await
        .unwrap();
    // Fresh attempt after the backoff, and a fresh handshake
    let mut peer = harness.next_peer().await;
    peer.handshake(90).await;
    handle
        .wait_for(|status| status.state == SessionState::Established)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_close_sends_cease() {
    let mut harness = Harness::start("").await;
    let (handle, mut peer) = harness.established().await;
    harness
        .manager
        .close_session(&handle, CloseReason::AdminShutdown)
        .await;
    assert_eq!(
        peer.recv_skipping_keepalives().await,
        Message::Notification(Notification::new(
            ErrorCode::Cease,
            cease::ADMINISTRATIVE_SHUTDOWN
        ))
    );
    assert!(handle.is_closed());
    assert_eq!(
        injector::inject(&handle, request("10.1.0.0/24")).await,
        Err(InjectError::SessionNotEstablished)
    );
}

#[tokio::test]
async fn test_passive_peer_accepts_inbound() {
    let harness = Harness::start("passive = true").await;
    let handle = harness.handle().await;
    handle
        .wait_for(|status| status.state == SessionState::Active)
        .await
        .unwrap();

    let (ours, theirs) = duplex(64 * 1024);
    let local: SocketAddr = "10.0.0.254:179".parse().unwrap();
    let remote: SocketAddr = format!("{}:50000", PEER).parse().unwrap();
    harness
        .manager
        .accept_connection(Connection::new(Box::new(ours), local, remote))
        .await;

    let mut peer = FakePeer::new(theirs);
    peer.handshake(90).await;
    handle
        .wait_for(|status| status.state == SessionState::Established)
        .await
        .unwrap();

    // A second connection while Established is turned away
    let (ours, theirs) = duplex(64 * 1024);
    harness
        .manager
        .accept_connection(Connection::new(Box::new(ours), local, remote))
        .await;
    let mut intruder = FakePeer::new(theirs);
    assert_eq!(
        intruder.recv().await,
        Message::Notification(Notification::new(ErrorCode::Cease, cease::CONNECTION_REJECTED))
    );
}

#[tokio::test]
async fn test_config_reload() {
    let mut harness = Harness::start("").await;
    let (old_handle, mut peer) = harness.established().await;

    // Changed hold time restarts the session
    harness
        .manager
        .apply_config(common::server_config("hold_timer = 30"))
        .await;
    assert_eq!(
        peer.recv_skipping_keepalives().await,
        Message::Notification(Notification::new(
            ErrorCode::Cease,
            cease::OTHER_CONFIGURATION_CHANGE
        ))
    );
    let mut peer = harness.next_peer().await;
    let open = peer.handshake(90).await;
    assert_eq!(open.hold_time, 30);
    let new_handle = harness.handle().await;
    assert!(!new_handle.same_session(&old_handle));

    // Removing the peer closes it for good
    harness.manager.apply_config(common::empty_config()).await;
    assert_eq!(
        peer.recv_skipping_keepalives().await,
        Message::Notification(Notification::new(ErrorCode::Cease, cease::PEER_DECONFIGURED))
    );
    new_handle.closed().await;
    assert!(harness.registry.lookup(PEER.parse().unwrap()).await.is_err());
}

#[tokio::test]
async fn test_malformed_input_sends_notification() {
    let mut harness = Harness::start("").await;
    let (handle, mut peer) = harness.established().await;

    // Valid marker and length, unknown message type 42
    let mut header = vec![0xff; 16];
    header.extend_from_slice(&[0, 19, 42]);
    peer.framed.get_mut().write_all(&header).await.unwrap();

    assert_eq!(
        peer.recv_skipping_keepalives().await,
        Message::Notification(
            Notification::new(ErrorCode::MessageHeader, header_error::BAD_MESSAGE_TYPE)
                .with_data(vec![42])
        )
    );
    let status = handle
        .wait_for(|status| status.state == SessionState::Idle)
        .await
        .unwrap();
    assert!(status.last_error.is_some());
    handle.closed().await;
    assert!(harness.registry.is_empty().await);
}

#[tokio::test]
async fn test_bad_peer_as_sends_notification() {
    let mut harness = Harness::start("").await;
    let mut peer = harness.next_peer().await;
    let handle = harness.handle().await;
    assert!(matches!(peer.recv().await, Message::Open(_)));

    let wrong_as = Open::new(
        65099,
        90,
        PEER_ID,
        vec![
            Capability::MultiProtocol(Family::IPV4_UNICAST),
            Capability::FourOctetAsn(65099),
        ],
    );
    peer.send(Message::Open(wrong_as)).await;
    match peer.recv().await {
        Message::Notification(notification) => {
            assert_eq!(notification.code, ErrorCode::OpenMessage);
            assert_eq!(notification.subcode, open_error::BAD_PEER_AS);
        }
        other => panic!("Expected NOTIFICATION, got {:?}", other),
    }
    handle
        .wait_for(|status| status.state == SessionState::Idle)
        .await
        .unwrap();
    assert_eq!(handle.status().counts.update.sent, 0);
}

#[tokio::test]
async fn test_unacceptable_hold_time_sends_notification() {
    let mut harness = Harness::start("").await;
    let mut peer = harness.next_peer().await;
    let handle = harness.handle().await;
    assert!(matches!(peer.recv().await, Message::Open(_)));

    peer.send(Message::Open(FakePeer::open(2))).await;
    match peer.recv().await {
        Message::Notification(notification) => {
            assert_eq!(notification.code, ErrorCode::OpenMessage);
            assert_eq!(notification.subcode, open_error::UNACCEPTABLE_HOLD_TIME);
        }
        other => panic!("Expected NOTIFICATION, got {:?}", other),
    }
    handle
        .wait_for(|status| status.state == SessionState::Idle)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_broadcast_next_hop_is_rejected() {
    let mut harness = Harness::start("").await;
    let (handle, _peer) = harness.established().await;
    let request: UpdateRequest = serde_json::from_value(json!({
        "nlri": "10.1.0.0/24", "next_hop": "255.255.255.255", "as_path": [65001]
    }))
    .unwrap();
    match injector::inject(&handle, request).await {
        Err(InjectError::InvalidRequest { field, .. }) => assert_eq!(field, "next_hop"),
        other => panic!("Expected InvalidRequest, got {:?}", other),
    }
    assert_eq!(handle.status().queue_depth, 0);
    assert_eq!(handle.state(), SessionState::Established);
}

#[tokio::test]
async fn test_received_messages_written_to_disk() {
    let dir = std::env::temp_dir().join(format!("bgpd-injector-{}", uuid::Uuid::new_v4()));
    let mut harness = Harness::with_config(common::recording_config(&dir)).await;
    let (handle, mut peer) = harness.established().await;

    let update = Update {
        withdrawn_routes: vec![],
        attributes: vec![
            PathAttribute::Origin(Origin::Igp),
            PathAttribute::AsPath(AsPath::sequence(vec![65001])),
            PathAttribute::NextHop("10.0.0.1".parse().unwrap()),
        ],
        announced_routes: vec!["192.0.2.0/24".parse().unwrap()],
    };
    peer.send(Message::Update(update)).await;
    handle
        .wait_for(|status| status.counts.update.received == 1)
        .await
        .unwrap();

    let peer_dir = dir.join(PEER);
    let files: Vec<_> = fs::read_dir(&peer_dir).unwrap().collect();
    assert_eq!(files.len(), 1);
    let contents = fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
    let records: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    // OPEN and UPDATE; keepalives are left out by config
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["type"], 1);
    assert_eq!(records[0]["msg"]["asn"], common::PEER_AS);
    assert_eq!(records[1]["type"], 2);
    assert_eq!(records[1]["afi_safi"], "IPv4 Unicast");
    assert_eq!(records[1]["msg"]["nlri"], json!(["192.0.2.0/24"]));
    fs::remove_dir_all(&dir).unwrap();
}
