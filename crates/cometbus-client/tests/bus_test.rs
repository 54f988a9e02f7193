//! Remote event bus behaviour against a scripted service.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cometbus_client::RemoteEventBus;
use cometbus_core::{DeploymentFingerprint, Error};

use common::{batch, session_id, type_id, ScriptedService};

fn bus(service: &Arc<ScriptedService>) -> Arc<RemoteEventBus> {
    Arc::new(RemoteEventBus::new(
        service.clone(),
        DeploymentFingerprint::new("build-1").unwrap(),
    ))
}

#[tokio::test]
async fn test_new_session_rejected_while_one_is_held() {
    let service = Arc::new(ScriptedService::new());
    let bus = bus(&service);

    let session = bus.new_session().await.unwrap();
    assert_eq!(bus.session(), Some(session));
    assert!(bus.is_polling());

    let err = bus.new_session().await.unwrap_err();
    assert!(matches!(err, Error::SessionActive));
    assert_eq!(service.sessions_opened(), 1);
}

#[tokio::test]
async fn test_invalidate_requires_a_session() {
    let service = Arc::new(ScriptedService::new());
    let bus = bus(&service);

    let err = bus.invalidate_session().await.unwrap_err();
    assert!(matches!(err, Error::NoActiveSession));

    let session = bus.new_session().await.unwrap();
    bus.invalidate_session().await.unwrap();
    assert_eq!(bus.session(), None);
    assert!(!bus.is_polling());
    assert_eq!(*service.invalidated.lock().unwrap(), vec![session]);
}

#[tokio::test]
async fn test_first_handler_subscribes_once() {
    let service = Arc::new(ScriptedService::new());
    let bus = bus(&service);
    let session = bus.new_session().await.unwrap();

    bus.add_handler(type_id("chat"), |_| {}).await.unwrap();
    bus.add_handler(type_id("chat"), |_| {}).await.unwrap();

    assert_eq!(bus.handler_count(&type_id("chat")), 2);
    assert_eq!(
        *service.subscribed.lock().unwrap(),
        vec![(session, type_id("chat"))]
    );
}

#[tokio::test]
async fn test_new_session_subscribes_handled_types() {
    let service = Arc::new(ScriptedService::new());
    let bus = bus(&service);
    bus.add_handler(type_id("chat"), |_| {}).await.unwrap();
    assert!(service.subscribed.lock().unwrap().is_empty());

    let session = bus.new_session().await.unwrap();
    assert_eq!(
        *service.subscribed.lock().unwrap(),
        vec![(session, type_id("chat"))]
    );
}

#[tokio::test]
async fn test_failed_subscription_abandons_new_session() {
    let service = Arc::new(ScriptedService::new().fail_subscriptions(1));
    let bus = bus(&service);
    bus.add_handler(type_id("chat"), |_| {}).await.unwrap();

    let err = bus.new_session().await.unwrap_err();
    assert!(matches!(err, Error::Transient(_)));
    assert_eq!(bus.session(), None);
    assert!(!bus.is_polling());
    assert!(matches!(bus.poll_once().await, Err(Error::NoActiveSession)));
    assert_eq!(service.invalidated.lock().unwrap().len(), 1);

    let session = bus.new_session().await.unwrap();
    assert!(bus.is_polling());
    assert_eq!(
        *service.subscribed.lock().unwrap(),
        vec![(session, type_id("chat"))]
    );
    assert_ne!(service.invalidated.lock().unwrap()[0], session);
}

#[tokio::test]
async fn test_failed_subscription_drops_new_handler() {
    let service = Arc::new(ScriptedService::new().fail_subscriptions(1));
    let bus = bus(&service);
    let session = bus.new_session().await.unwrap();

    let err = bus.add_handler(type_id("chat"), |_| {}).await.unwrap_err();
    assert!(matches!(err, Error::Transient(_)));
    assert_eq!(bus.handler_count(&type_id("chat")), 0);
    assert!(service.subscribed.lock().unwrap().is_empty());

    bus.add_handler(type_id("chat"), |_| {}).await.unwrap();
    assert_eq!(bus.handler_count(&type_id("chat")), 1);
    assert_eq!(
        *service.subscribed.lock().unwrap(),
        vec![(session, type_id("chat"))]
    );
}

#[tokio::test]
async fn test_last_handler_removal_unsubscribes() {
    let service = Arc::new(ScriptedService::new());
    let bus = bus(&service);
    let session = bus.new_session().await.unwrap();

    let first = bus.add_handler(type_id("chat"), |_| {}).await.unwrap();
    let second = bus.add_handler(type_id("chat"), |_| {}).await.unwrap();

    assert!(bus.remove_handler(&type_id("chat"), first).await.unwrap());
    assert!(service.unsubscribed.lock().unwrap().is_empty());

    assert!(bus.remove_handler(&type_id("chat"), second).await.unwrap());
    assert_eq!(
        *service.unsubscribed.lock().unwrap(),
        vec![(session, type_id("chat"))]
    );
    assert!(!bus.remove_handler(&type_id("chat"), second).await.unwrap());
}

#[tokio::test]
async fn test_auto_unsubscribe_can_be_disabled() {
    let service = Arc::new(ScriptedService::new());
    let bus = bus(&service);
    bus.set_auto_unsubscribe(false);
    bus.new_session().await.unwrap();

    let id = bus.add_handler(type_id("chat"), |_| {}).await.unwrap();
    assert!(bus.remove_handler(&type_id("chat"), id).await.unwrap());
    assert!(service.unsubscribed.lock().unwrap().is_empty());
    assert_eq!(bus.handler_count(&type_id("chat")), 0);
}

#[tokio::test]
async fn test_poll_dispatches_to_handlers() {
    let service = Arc::new(ScriptedService::new().poll(Ok(batch(&[("chat", 0), ("other", 1)]))));
    let bus = bus(&service);
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    bus.add_handler(type_id("chat"), move |event| {
        assert_eq!(event.sequence, 0);
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .await
    .unwrap();
    bus.new_session().await.unwrap();

    let delivered = bus.poll_once().await.unwrap();
    assert_eq!(delivered, 2);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_poll_without_session_fails() {
    let service = Arc::new(ScriptedService::new());
    let bus = bus(&service);
    let err = bus.poll_once().await.unwrap_err();
    assert!(matches!(err, Error::NoActiveSession));
    assert_eq!(service.polls_made(), 0);
}

#[tokio::test]
async fn test_poll_failure_is_returned_classified() {
    let service = Arc::new(ScriptedService::new().poll(Err(Error::InvalidSession)));
    let bus = bus(&service);
    bus.new_session().await.unwrap();

    let err = bus.poll_once().await.unwrap_err();
    assert!(matches!(err, Error::InvalidSession));
}

#[tokio::test]
async fn test_stale_poll_result_is_discarded() {
    let (service, gate) = ScriptedService::new()
        .session(Ok(session_id()))
        .poll(Ok(batch(&[("chat", 0)])))
        .gated();
    let service = Arc::new(service);
    let bus = bus(&service);
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    bus.add_handler(type_id("chat"), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .await
    .unwrap();
    let first = bus.new_session().await.unwrap();

    let polling = tokio::spawn({
        let bus = Arc::clone(&bus);
        async move { bus.poll_once().await }
    });
    tokio::task::yield_now().await;
    assert_eq!(service.polls_made(), 1);

    // Identity replaced while the poll is in flight.
    bus.drop_session();
    let second = bus.new_session().await.unwrap();
    assert_ne!(first, second);

    gate.notify_one();
    let delivered = polling.await.unwrap().unwrap();
    assert_eq!(delivered, 0);
    assert_eq!(seen.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_resume_session_reenables_polling() {
    let service = Arc::new(ScriptedService::new());
    let bus = bus(&service);
    assert!(matches!(
        bus.resume_session().unwrap_err(),
        Error::NoActiveSession
    ));

    let session = bus.new_session().await.unwrap();
    assert_eq!(bus.resume_session().unwrap(), session);
    assert!(bus.is_polling());
}
