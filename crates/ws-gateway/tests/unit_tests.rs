//! Unit tests for ws-gateway

use std::time::Duration;

use axum::http::{HeaderMap, Uri};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use ws_gateway::{
    auth::{verify_with_timeout, HandshakeRequest},
    event::{ack_frame, encode},
    verifier_fn, Claims, ClientMessage, ClientRequest, ConnectionManager, DeliveryFailure, Error,
    Frame, JsonEvent, JwtVerifier, TokenVerifier,
};

fn frame_json(frame: &Frame) -> Value {
    serde_json::from_str(frame).unwrap()
}

fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame_json(&frame));
    }
    frames
}

// ============== Event Tests ==============

#[test]
fn test_encode_json_event() {
    let event = JsonEvent::new("commentAdded", json!({"_id": "c1", "postId": "42"}));
    let frame = encode(&event).unwrap();

    assert_eq!(
        frame_json(&frame),
        json!({"event": "commentAdded", "data": {"_id": "c1", "postId": "42"}})
    );
}

#[test]
fn test_encode_non_object_data() {
    let event = JsonEvent::new("ping", json!("hello"));
    let frame = encode(&event).unwrap();

    assert_eq!(frame_json(&frame), json!({"event": "ping", "data": "hello"}));
}

#[test]
fn test_ack_frame_echoes_id() {
    assert_eq!(
        frame_json(&ack_frame(Some(7))),
        json!({"event": "ack", "ack": 7, "data": {"ok": true}})
    );
}

#[test]
fn test_ack_frame_without_id() {
    let ack = frame_json(&ack_frame(None));
    assert_eq!(ack["data"], json!({"ok": true}));
    assert!(ack.get("ack").is_none());
}

// ============== ClientMessage Tests ==============

#[test]
fn test_client_join_topic() {
    let msg = ClientMessage::parse(r#"{"event":"joinTopic","data":{"topicId":"post:42"},"ack":1}"#)
        .unwrap();

    assert_eq!(msg.ack, Some(1));
    assert_eq!(msg.request(), Some(ClientRequest::Join("post:42".to_string())));
}

#[test]
fn test_client_leave_topic() {
    let msg = ClientMessage::parse(r#"{"event":"leaveTopic","data":{"topicId":"post:42"}}"#).unwrap();

    assert_eq!(msg.ack, None);
    assert_eq!(msg.request(), Some(ClientRequest::Leave("post:42".to_string())));
}

#[test]
fn test_client_post_shorthands() {
    let join = ClientMessage::parse(r#"{"event":"joinPost","data":{"postId":"42"}}"#).unwrap();
    let leave = ClientMessage::parse(r#"{"event":"leavePost","data":{"postId":42}}"#).unwrap();

    assert_eq!(join.request(), Some(ClientRequest::Join("post:42".to_string())));
    assert_eq!(leave.request(), Some(ClientRequest::Leave("post:42".to_string())));
}

#[test]
fn test_client_request_missing_topic() {
    let missing = ClientMessage::parse(r#"{"event":"joinTopic","data":{}}"#).unwrap();
    let blank = ClientMessage::parse(r#"{"event":"joinTopic","data":{"topicId":"  "}}"#).unwrap();
    let no_data = ClientMessage::parse(r#"{"event":"joinTopic"}"#).unwrap();

    assert_eq!(missing.request(), None);
    assert_eq!(blank.request(), None);
    assert_eq!(no_data.request(), None);
}

#[test]
fn test_client_unknown_and_malformed() {
    let unknown = ClientMessage::parse(r#"{"event":"typing","data":{"topicId":"x"}}"#).unwrap();
    assert_eq!(unknown.request(), None);

    assert!(ClientMessage::parse("not json").is_none());
    assert!(ClientMessage::parse(r#"{"data":{}}"#).is_none());
}

// ============== ConnectionManager Tests ==============

#[tokio::test]
async fn test_connection_manager_attach() {
    let manager = ConnectionManager::new("instance-1");

    let (conn, _rx) = manager
        .attach("u1".to_string(), Some("1.2.3.4".to_string()), None)
        .unwrap();

    assert_eq!(conn.identity_id, "u1");
    assert_eq!(conn.metadata.instance_id, "instance-1");
    assert_eq!(manager.connection_count(), 1);
    assert_eq!(manager.identity_count(), 1);
    assert!(manager.connections_for("u1").contains(&conn.id));
}

#[tokio::test]
async fn test_connection_manager_multiple_connections_per_identity() {
    let manager = ConnectionManager::new("instance-1");

    let (a, _rx_a) = manager.attach("u1".to_string(), None, None).unwrap();
    let (b, _rx_b) = manager.attach("u1".to_string(), None, None).unwrap();

    assert_ne!(a.id, b.id);
    assert_eq!(manager.connections_for("u1").len(), 2);
    assert_eq!(manager.identity_count(), 1);
}

#[tokio::test]
async fn test_connection_manager_close() {
    let manager = ConnectionManager::new("instance-1");

    let (conn, _rx) = manager.attach("u1".to_string(), None, None).unwrap();
    assert!(manager.join(&conn.id, "post:42"));

    assert!(manager.close(&conn.id));

    assert_eq!(manager.connection_count(), 0);
    assert!(manager.connections_for("u1").is_empty());
    assert!(manager.members_of("post:42").is_empty());
    assert!(manager.topics_of(&conn.id).is_empty());
    assert!(!conn.is_active());
}

#[tokio::test]
async fn test_connection_manager_close_is_idempotent() {
    let manager = ConnectionManager::new("instance-1");

    let (conn, _rx) = manager.attach("u1".to_string(), None, None).unwrap();
    let (other, _rx_other) = manager.attach("u1".to_string(), None, None).unwrap();

    assert!(manager.close(&conn.id));
    assert!(!manager.close(&conn.id));
    assert!(!manager.close("never-registered"));

    assert_eq!(manager.connections_for("u1").len(), 1);
    assert!(manager.connections_for("u1").contains(&other.id));
}

#[tokio::test]
async fn test_connection_manager_join_leave() {
    let manager = ConnectionManager::new("instance-1");

    let (conn, _rx) = manager.attach("u1".to_string(), None, None).unwrap();

    assert!(manager.join(&conn.id, "post:42"));
    assert!(manager.join(&conn.id, "post:42"));
    assert_eq!(manager.members_of("post:42").len(), 1);
    assert_eq!(manager.topic_count(), 1);

    assert!(manager.leave(&conn.id, "post:42"));
    assert!(manager.leave(&conn.id, "post:42"));
    assert!(manager.members_of("post:42").is_empty());
    assert_eq!(manager.topic_count(), 0);
}

#[tokio::test]
async fn test_connection_manager_join_unknown_connection() {
    let manager = ConnectionManager::new("instance-1");

    assert!(!manager.join("ghost", "post:42"));
    assert!(!manager.leave("ghost", "post:42"));
    assert!(manager.members_of("post:42").is_empty());
}

#[tokio::test]
async fn test_connection_manager_join_after_close() {
    let manager = ConnectionManager::new("instance-1");

    let (conn, _rx) = manager.attach("u1".to_string(), None, None).unwrap();
    manager.close(&conn.id);

    assert!(!manager.join(&conn.id, "post:42"));
    assert!(manager.members_of("post:42").is_empty());
}

#[tokio::test]
async fn test_connection_manager_emit_to_identity() {
    let manager = ConnectionManager::new("instance-1");

    let (_a, mut rx_a) = manager.attach("u1".to_string(), None, None).unwrap();
    let (_b, mut rx_b) = manager.attach("u1".to_string(), None, None).unwrap();
    let (_c, mut rx_c) = manager.attach("u2".to_string(), None, None).unwrap();

    let event = JsonEvent::new("notification", json!({"message": "hi"}));
    let sent = manager.emit_to_identity("u1", &event);

    assert_eq!(sent, 2);
    assert_eq!(drain(&mut rx_a).len(), 1);
    assert_eq!(drain(&mut rx_b).len(), 1);
    assert!(drain(&mut rx_c).is_empty());
}

#[tokio::test]
async fn test_connection_manager_emit_to_topic() {
    let manager = ConnectionManager::new("instance-1");

    let (a, mut rx_a) = manager.attach("u1".to_string(), None, None).unwrap();
    let (b, mut rx_b) = manager.attach("u2".to_string(), None, None).unwrap();
    let (_c, mut rx_c) = manager.attach("u3".to_string(), None, None).unwrap();
    manager.join(&a.id, "post:42");
    manager.join(&b.id, "post:42");
    manager.join(&b.id, "post:7");

    let sent = manager.emit_to_topic("post:42", &JsonEvent::new("commentLiked", json!({"totalLikes": 3})));

    assert_eq!(sent, 2);
    assert_eq!(drain(&mut rx_a).len(), 1);
    assert_eq!(drain(&mut rx_b).len(), 1);
    assert!(drain(&mut rx_c).is_empty());
}

#[tokio::test]
async fn test_connection_manager_broadcast() {
    let manager = ConnectionManager::new("instance-1");

    let (_a, mut rx_a) = manager.attach("u1".to_string(), None, None).unwrap();
    let (_b, mut rx_b) = manager.attach("u2".to_string(), None, None).unwrap();

    let sent = manager.broadcast(&JsonEvent::new("maintenance", json!({"inMinutes": 5})));

    assert_eq!(sent, 2);
    assert_eq!(drain(&mut rx_a)[0]["event"], "maintenance");
    assert_eq!(drain(&mut rx_b)[0]["data"]["inMinutes"], 5);
}

#[tokio::test]
async fn test_connection_manager_preserves_order() {
    let manager = ConnectionManager::new("instance-1");

    let (conn, mut rx) = manager.attach("u1".to_string(), None, None).unwrap();
    manager.join(&conn.id, "post:42");

    for i in 0..5 {
        manager.emit_to_topic("post:42", &JsonEvent::new("commentAdded", json!({"seq": i})));
    }

    let seqs: Vec<i64> = drain(&mut rx)
        .iter()
        .map(|f| f["data"]["seq"].as_i64().unwrap())
        .collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_connection_manager_full_queue_drops_for_that_connection_only() {
    let manager = ConnectionManager::new("instance-1").with_queue_capacity(1);

    let (slow, mut rx_slow) = manager.attach("u1".to_string(), None, None).unwrap();
    let (fast, mut rx_fast) = manager.attach("u2".to_string(), None, None).unwrap();
    manager.join(&slow.id, "post:42");
    manager.join(&fast.id, "post:42");

    let first = manager.emit_to_topic("post:42", &JsonEvent::new("commentAdded", json!({"seq": 1})));
    assert_eq!(first, 2);
    assert_eq!(drain(&mut rx_fast).len(), 1);

    let second = manager.emit_to_topic("post:42", &JsonEvent::new("commentAdded", json!({"seq": 2})));
    assert_eq!(second, 1);
    assert_eq!(drain(&mut rx_fast)[0]["data"]["seq"], 2);

    // The slow connection kept the older frame and is still registered
    let slow_frames = drain(&mut rx_slow);
    assert_eq!(slow_frames.len(), 1);
    assert_eq!(slow_frames[0]["data"]["seq"], 1);
    assert_eq!(manager.connection_count(), 2);
}

#[tokio::test]
async fn test_connection_manager_closed_connection_is_torn_down() {
    let manager = ConnectionManager::new("instance-1");

    let (gone, rx_gone) = manager.attach("u1".to_string(), None, None).unwrap();
    let (live, mut rx_live) = manager.attach("u2".to_string(), None, None).unwrap();
    manager.join(&gone.id, "post:42");
    manager.join(&live.id, "post:42");
    drop(rx_gone);

    let sent = manager.emit_to_topic("post:42", &JsonEvent::new("commentAdded", json!({})));

    assert_eq!(sent, 1);
    assert_eq!(drain(&mut rx_live).len(), 1);
    assert_eq!(gone.push(Frame::from("x")), Err(DeliveryFailure::Closed));
    assert!(manager.get(&gone.id).is_none());
    assert!(!manager.members_of("post:42").contains(&gone.id));
    assert!(manager.connections_for("u1").is_empty());
}

#[tokio::test]
async fn test_connection_manager_disconnect_identity() {
    let manager = ConnectionManager::new("instance-1");

    let (a, _rx_a) = manager.attach("u1".to_string(), None, None).unwrap();
    let (b, _rx_b) = manager.attach("u1".to_string(), None, None).unwrap();
    let (c, _rx_c) = manager.attach("u2".to_string(), None, None).unwrap();

    assert_eq!(manager.disconnect_identity("u1"), 2);
    assert_eq!(manager.disconnect_identity("nobody"), 0);

    // Termination is signalled; teardown belongs to the connection task
    tokio::time::timeout(Duration::from_millis(100), a.terminated())
        .await
        .unwrap();
    assert!(!b.is_active());
    assert!(c.is_active());
}

#[tokio::test]
async fn test_connection_manager_disconnect_all() {
    let manager = ConnectionManager::new("instance-1");

    let (a, _rx_a) = manager.attach("u1".to_string(), None, None).unwrap();
    let (b, _rx_b) = manager.attach("u2".to_string(), None, None).unwrap();

    assert_eq!(manager.disconnect_all(), 2);
    assert!(!a.is_active());
    assert!(!b.is_active());
}

#[tokio::test]
async fn test_connection_manager_list_connections() {
    let manager = ConnectionManager::new("instance-1");

    manager
        .attach("u1".to_string(), Some("1.2.3.4".to_string()), None)
        .unwrap();
    manager
        .attach("u2".to_string(), None, Some("Mozilla".to_string()))
        .unwrap();

    let connections = manager.list_connections();
    assert_eq!(connections.len(), 2);
}

#[tokio::test]
async fn test_connection_manager_cleanup_dead_connections() {
    let manager = ConnectionManager::new("instance-1");

    let (conn, rx) = manager.attach("u1".to_string(), None, None).unwrap();
    manager.join(&conn.id, "post:42");
    assert_eq!(manager.connection_count(), 1);

    // Drop receiver to make connection dead
    drop(rx);

    assert_eq!(manager.cleanup_dead_connections(), 1);
    assert_eq!(manager.connection_count(), 0);
    assert_eq!(manager.identity_count(), 0);
    assert_eq!(manager.topic_count(), 0);
}

// ============== Scenario Tests ==============

#[tokio::test]
async fn test_topic_member_receives_non_member_does_not() {
    let manager = ConnectionManager::new("instance-1");

    let (a, mut rx_a) = manager.attach("u1".to_string(), None, None).unwrap();
    let (_b, mut rx_b) = manager.attach("u2".to_string(), None, None).unwrap();
    manager.join(&a.id, "post:42");

    manager.emit_to_topic("post:42", &JsonEvent::new("commentAdded", json!({"content": "hello"})));

    let received = drain(&mut rx_a);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["event"], "commentAdded");
    assert!(drain(&mut rx_b).is_empty());
}

#[tokio::test]
async fn test_emit_to_offline_identity_is_noop() {
    let manager = ConnectionManager::new("instance-1");
    let (_other, mut rx_other) = manager.attach("u2".to_string(), None, None).unwrap();

    let sent = manager.emit_to_identity("u1", &JsonEvent::new("notification", json!({})));

    assert_eq!(sent, 0);
    assert!(drain(&mut rx_other).is_empty());
    // Nothing is held back for a later connection
    let (_late, mut rx_late) = manager.attach("u1".to_string(), None, None).unwrap();
    assert!(drain(&mut rx_late).is_empty());
}

#[tokio::test]
async fn test_disconnected_member_leaves_topic() {
    let manager = ConnectionManager::new("instance-1");

    let (a, _rx_a) = manager.attach("u1".to_string(), None, None).unwrap();
    manager.join(&a.id, "post:42");
    manager.close(&a.id);

    assert!(manager.members_of("post:42").is_empty());
    assert_eq!(
        manager.emit_to_topic("post:42", &JsonEvent::new("commentAdded", json!({}))),
        0
    );
}

// ============== Auth Tests ==============

#[tokio::test]
async fn test_jwt_verifier_roundtrip() {
    let verifier = JwtVerifier::new(b"test-secret");
    let token = verifier
        .issue("u1", Some("alice"), Duration::from_secs(3600))
        .unwrap();

    assert_eq!(verifier.verify(&token).await.unwrap(), "u1");
    let claims = verifier.decode(&token).unwrap();
    assert_eq!(claims.username.as_deref(), Some("alice"));
    assert_eq!(verifier.name(), "jwt");
}

#[tokio::test]
async fn test_jwt_verifier_wrong_secret() {
    let token = JwtVerifier::new(b"other-secret")
        .issue("u1", None, Duration::from_secs(3600))
        .unwrap();

    let result = JwtVerifier::new(b"test-secret").verify(&token).await;
    assert!(matches!(result, Err(Error::InvalidToken(_))));
}

#[tokio::test]
async fn test_jwt_verifier_expired() {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: "u1".to_string(),
        username: None,
        iat: now - 7200,
        exp: now - 3600,
    };
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(b"test-secret"),
    )
    .unwrap();

    let result = JwtVerifier::new(b"test-secret").verify(&token).await;
    assert!(matches!(result, Err(Error::TokenExpired)));
}

#[tokio::test]
async fn test_jwt_verifier_garbage() {
    let result = JwtVerifier::new(b"test-secret").verify("not-a-jwt").await;
    assert!(matches!(result, Err(Error::InvalidToken(_))));
}

#[tokio::test]
async fn test_verify_with_timeout_missing_token() {
    let verifier = JwtVerifier::new(b"test-secret");

    let none = verify_with_timeout(&verifier, None, Duration::from_secs(1)).await;
    let blank = verify_with_timeout(&verifier, Some("   "), Duration::from_secs(1)).await;

    assert!(matches!(none, Err(Error::InvalidToken(_))));
    assert!(matches!(blank, Err(Error::InvalidToken(_))));
}

#[tokio::test]
async fn test_verify_with_timeout_slow_verifier() {
    let verifier = verifier_fn(|_token: String| async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok("u1".to_string())
    });

    let result = verify_with_timeout(&verifier, Some("t"), Duration::from_millis(20)).await;
    assert!(matches!(result, Err(Error::VerifierTimeout)));
}

#[tokio::test]
async fn test_verifier_fn() {
    let verifier = verifier_fn(|token: String| async move {
        match token.as_str() {
            "letmein" => Ok("u1".to_string()),
            _ => Err(Error::InvalidToken("unknown token".to_string())),
        }
    });

    assert_eq!(verifier.verify("letmein").await.unwrap(), "u1");
    assert!(verifier.verify("nope").await.is_err());
    assert_eq!(verifier.name(), "custom");
}

#[test]
fn test_handshake_bearer_token() {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer my-secret-token".parse().unwrap());

    let req = HandshakeRequest {
        uri: "/ws?token=query-token".parse::<Uri>().unwrap(),
        headers,
        client_ip: None,
    };

    assert_eq!(req.bearer_token(), Some("my-secret-token"));
    assert_eq!(req.token(), Some("my-secret-token"));
}

#[test]
fn test_handshake_query_token() {
    let req = HandshakeRequest {
        uri: "/ws?foo=bar&token=query-token".parse::<Uri>().unwrap(),
        headers: HeaderMap::new(),
        client_ip: Some("1.2.3.4".to_string()),
    };

    assert_eq!(req.bearer_token(), None);
    assert_eq!(req.query_param("foo"), Some("bar"));
    assert_eq!(req.token(), Some("query-token"));
}

#[test]
fn test_handshake_no_token() {
    let req = HandshakeRequest {
        uri: "/ws".parse::<Uri>().unwrap(),
        headers: HeaderMap::new(),
        client_ip: None,
    };

    assert_eq!(req.token(), None);
}
