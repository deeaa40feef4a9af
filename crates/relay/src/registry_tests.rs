// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::registry::{Wing, WingEvent, WingRegistry, SUBSCRIBER_DEPTH};
use crate::test_support;

fn test_wing(wing_id: &str, user_id: &str, org_id: Option<&str>) -> Arc<Wing> {
    test_support::test_wing(wing_id, user_id, org_id).0
}

#[tokio::test]
async fn find_by_wing_id_prefers_newest_duplicate() {
    let registry = WingRegistry::new();
    let old = test_wing("wing-1", "u1", None);
    let new = test_wing("wing-1", "u1", None);
    registry.add(Arc::clone(&old)).await;
    registry.add(Arc::clone(&new)).await;

    let found = registry.find_by_wing_id("wing-1").await;
    assert_eq!(found.map(|w| w.conn_id.clone()), Some(new.conn_id.clone()));
}

#[tokio::test]
async fn count_for_user_tracks_adds_and_removes() {
    let registry = WingRegistry::new();
    let a = test_wing("wing-a", "u1", None);
    let b = test_wing("wing-b", "u1", None);
    registry.add(Arc::clone(&a)).await;
    registry.add(Arc::clone(&b)).await;
    registry.add(test_wing("wing-c", "u2", None)).await;

    assert_eq!(registry.count_for_user("u1").await, 2);
    registry.remove(&a.conn_id).await;
    assert_eq!(registry.count_for_user("u1").await, 1);
}

#[tokio::test]
async fn fan_out_reaches_owner_and_org_members_only() {
    let registry = WingRegistry::new();

    let (owner_tx, mut owner_rx) = mpsc::channel(SUBSCRIBER_DEPTH);
    let (member_tx, mut member_rx) = mpsc::channel(SUBSCRIBER_DEPTH);
    let (outsider_tx, mut outsider_rx) = mpsc::channel(SUBSCRIBER_DEPTH);
    registry.subscribe("owner-1", vec!["org-1".to_owned()], owner_tx).await;
    registry.subscribe("member-1", vec!["org-1".to_owned()], member_tx).await;
    registry.subscribe("outsider-1", vec![], outsider_tx).await;

    let wing = test_wing("wing-stable-1", "owner-1", Some("org-1"));
    let event = WingEvent::Online { wing: wing.snapshot().await };
    registry.notify_wing("owner-1", Some("org-1"), event).await;

    // Owner is also an org member: exactly one delivery, not two.
    assert!(owner_rx.try_recv().is_ok());
    assert!(owner_rx.try_recv().is_err());
    assert!(member_rx.try_recv().is_ok());
    assert!(outsider_rx.try_recv().is_err());
}

#[tokio::test]
async fn full_subscriber_channel_drops_without_blocking() {
    let registry = WingRegistry::new();
    let (tx, mut rx) = mpsc::channel(1);
    registry.subscribe("u1", vec![], tx).await;

    let wing = test_wing("w", "u1", None);
    let event = WingEvent::Online { wing: wing.snapshot().await };
    registry.notify_wing("u1", None, event.clone()).await;
    registry.notify_wing("u1", None, event).await;

    // Second event was dropped, first is intact; notify never blocked.
    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn unsubscribe_removes_from_both_indices() {
    let registry = WingRegistry::new();
    let (tx, mut rx) = mpsc::channel(SUBSCRIBER_DEPTH);
    let id = registry.subscribe("u1", vec!["org-1".to_owned()], tx).await;
    registry.unsubscribe(id).await;

    let wing = test_wing("w", "u1", Some("org-1"));
    let event = WingEvent::Online { wing: wing.snapshot().await };
    registry.notify_wing("u1", Some("org-1"), event).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn update_user_orgs_reindexes() {
    let registry = WingRegistry::new();
    let (tx, mut rx) = mpsc::channel(SUBSCRIBER_DEPTH);
    let id = registry.subscribe("viewer", vec!["org-1".to_owned()], tx).await;
    registry.update_user_orgs(id, vec!["org-2".to_owned()]).await;

    let wing = test_wing("w", "someone-else", Some("org-2"));
    let event = WingEvent::Online { wing: wing.snapshot().await };
    registry.notify_wing("someone-else", Some("org-2"), event.clone()).await;
    assert!(rx.try_recv().is_ok());

    registry.notify_wing("someone-else", Some("org-1"), event).await;
    assert!(rx.try_recv().is_err());
}
