// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use openwire::command::{BrokerFault, CommandKind};
use openwire::Command;

use super::*;
use crate::transport::mock::MockTransport;
use crate::transport::Transport as _;

fn keep_alive() -> Command {
    Command::new(CommandKind::KeepAliveInfo)
}

#[tokio::test]
async fn oneway_stamps_monotonic_ids_from_one() {
    let mock = MockTransport::new();
    let correlator = ResponseCorrelator::new(mock.clone());

    for _ in 0..3 {
        correlator.oneway(keep_alive()).await.unwrap();
    }
    let sent = mock.sent();
    let ids: Vec<u32> = sent.iter().map(|c| c.command_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(sent.iter().all(|c| !c.response_required));
}

#[tokio::test]
async fn concurrent_requests_never_share_a_command_id() {
    let mock = MockTransport::new().with_auto_respond();
    let correlator = ResponseCorrelator::new(mock.clone());

    let mut handles = Vec::new();
    for _ in 0..32 {
        let correlator = correlator.clone();
        handles.push(tokio::spawn(async move { correlator.request(keep_alive()).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let mut ids: Vec<u32> = mock.sent().iter().map(|c| c.command_id).collect();
    let before = ids.len();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), before, "duplicate command ids");
    assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn request_completes_with_matching_response() {
    let mock = MockTransport::new().with_auto_respond();
    let correlator = ResponseCorrelator::new(mock.clone());

    let kind = correlator.request(keep_alive()).await.unwrap();
    assert!(matches!(kind, CommandKind::Response { correlation_id: 1 }));
    assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn exception_response_maps_to_broker_error() {
    let mock = MockTransport::new();
    let correlator = ResponseCorrelator::new(mock.clone());

    let request = {
        let correlator = correlator.clone();
        tokio::spawn(async move { correlator.request(keep_alive()).await })
    };
    mock.wait_for_sent(1, Duration::from_secs(1)).await.unwrap();
    mock.inject(Command::new(CommandKind::ExceptionResponse {
        correlation_id: 1,
        exception: BrokerFault::new("org.example.SecurityError", "forbidden"),
    }));

    let error = request.await.unwrap().unwrap_err();
    match error {
        Error::Broker { class, message } => {
            assert_eq!(class, "org.example.SecurityError");
            assert_eq!(message, "forbidden");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn timeout_returns_cleanly_and_removes_entry() {
    let mock = MockTransport::new();
    let correlator = ResponseCorrelator::new(mock.clone());

    let error = correlator
        .request_timeout(keep_alive(), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Timeout(_)));
    assert_eq!(correlator.pending_count(), 0, "scope guard must remove the entry");

    // A late response for the abandoned id is silently dropped.
    mock.inject(Command::new(CommandKind::Response { correlation_id: 1 }));
    assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn failed_send_removes_the_map_entry() {
    let mock = MockTransport::new();
    let correlator = ResponseCorrelator::new(mock.clone());
    mock.fail_sends(true);

    let error = correlator.request(keep_alive()).await.unwrap_err();
    assert!(matches!(error, Error::Io(_)));
    assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn async_request_callback_fires_on_completion() {
    let mock = MockTransport::new();
    let correlator = ResponseCorrelator::new(mock.clone());

    let (tx, rx) = tokio::sync::oneshot::channel();
    let future = correlator
        .async_request(
            keep_alive(),
            Some(Box::new(move |kind| {
                let _ = tx.send(kind);
            })),
        )
        .await
        .unwrap();

    mock.inject(Command::new(CommandKind::Response { correlation_id: 1 }));

    let from_callback = rx.await.unwrap();
    assert!(matches!(from_callback, CommandKind::Response { correlation_id: 1 }));
    let from_future = future.response().await.unwrap();
    assert!(matches!(from_future, CommandKind::Response { correlation_id: 1 }));
}

#[tokio::test]
async fn dispose_completes_every_pending_future_with_its_own_id() {
    let mock = MockTransport::new();
    let correlator = ResponseCorrelator::new(mock.clone());

    let mut futures = Vec::new();
    for _ in 0..5 {
        futures.push(correlator.async_request(keep_alive(), None).await.unwrap());
    }
    assert_eq!(correlator.pending_count(), 5);

    mock.inject_error(Error::io("connection reset"));

    assert_eq!(correlator.pending_count(), 0, "map must drain on failure");
    for (index, future) in futures.into_iter().enumerate() {
        let kind = future.response().await.unwrap();
        match kind {
            CommandKind::ExceptionResponse { correlation_id, exception } => {
                assert_eq!(correlation_id as usize, index + 1);
                assert!(exception.message.contains("connection reset"));
            }
            other => panic!("expected exception response, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn requests_after_failure_fail_synchronously() {
    let mock = MockTransport::new();
    let correlator = ResponseCorrelator::new(mock.clone());
    mock.inject_error(Error::io("gone"));

    assert!(correlator.oneway(keep_alive()).await.is_err());
    assert!(correlator.request(keep_alive()).await.is_err());
    assert!(!correlator.is_connected());
    assert_eq!(mock.sent_count(), 0);
}

#[tokio::test]
async fn close_fails_pending_and_subsequent_requests() {
    let mock = MockTransport::new();
    let correlator = ResponseCorrelator::new(mock.clone());

    let future = correlator.async_request(keep_alive(), None).await.unwrap();
    correlator.close().await.unwrap();

    let kind = future.response().await.unwrap();
    assert!(matches!(kind, CommandKind::ExceptionResponse { .. }));
    assert!(correlator.oneway(keep_alive()).await.is_err());
}

#[tokio::test]
async fn non_response_commands_pass_through_to_the_listener() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter(AtomicUsize);
    impl TransportListener for Counter {
        fn on_command(&self, _command: Command) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn on_exception(&self, _error: Error) {}
    }

    let mock = MockTransport::new();
    let correlator = ResponseCorrelator::new(mock.clone());
    let counter = Arc::new(Counter(AtomicUsize::new(0)));
    correlator.set_listener(counter.clone());

    mock.inject(Command::new(CommandKind::KeepAliveInfo));
    mock.inject(Command::new(CommandKind::Response { correlation_id: 99 }));

    assert_eq!(counter.0.load(Ordering::SeqCst), 1, "responses are short-circuited");
}
