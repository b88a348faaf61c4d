//! End-to-end request pipeline: deadline → rate limit → handler.

use std::time::Duration;

use sentinel_guard::pipeline::{GuardOutcome, InboundRequest};
use sentinel_guard::security::Decision;

mod common;

fn callback(caller: &str, data: &str) -> InboundRequest {
    InboundRequest::Callback {
        caller_id: caller.to_string(),
        query_id: "q".to_string(),
        data: data.to_string(),
    }
}

#[tokio::test]
async fn test_burst_is_rejected_without_running_handler() {
    let (services, _cluster) = common::start_services(&common::test_config()).await;
    let guard = services.request_guard();
    let mut handled = 0;

    for i in 0..6 {
        let outcome = guard
            .handle("menu", callback("u1", &format!("page:{}", i)), None, |request, _| {
                handled += 1;
                async move {
                    match request {
                        InboundRequest::Callback { data, .. } => Ok::<_, String>(data),
                        other => Err(format!("unexpected {}", other.kind())),
                    }
                }
            })
            .await
            .unwrap();

        if i < 5 {
            assert_eq!(outcome, GuardOutcome::Completed(format!("page:{}", i)));
        } else {
            match outcome {
                GuardOutcome::Rejected(Decision::Throttled { retry_after_secs, .. }) => {
                    assert!((retry_after_secs - 1.0).abs() < 0.1);
                }
                other => panic!("expected throttle, got {:?}", other),
            }
        }
    }
    assert_eq!(handled, 5);
}

#[tokio::test]
async fn test_handler_error_propagates_through_guard() {
    let (services, _cluster) = common::start_services(&common::test_config()).await;
    let guard = services.request_guard();

    let err = guard
        .handle("broken", callback("u2", "x"), None, |_, _| async {
            Err::<(), _>("template missing".to_string())
        })
        .await
        .unwrap_err();

    assert_eq!(err, "template missing");
    assert_eq!(services.deadlines.stats().errors, 1);
}

#[tokio::test]
async fn test_slow_handler_times_out_and_background_work_continues() {
    let (services, _cluster) = common::start_services(&common::test_config()).await;
    let guard = services.request_guard();
    let tasks = services.tasks.clone();
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();

    let outcome = guard
        .handle(
            "export",
            callback("u3", "export"),
            Some(Duration::from_millis(50)),
            |_, ctx| async move {
                tasks
                    .spawn(
                        format!("audit-{}", ctx.request_id),
                        async move {
                            let _ = done_tx.send(());
                            Ok::<_, String>(())
                        },
                        None,
                    )
                    .map_err(|e| e.to_string())?;
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, String>(())
            },
        )
        .await
        .unwrap();

    assert!(matches!(outcome, GuardOutcome::TimedOut(ref t) if t.handler == "export"));
    assert_eq!(outcome.as_str(), "timed_out");
    // The spawned task is independent of the cancelled handler.
    done_rx.await.unwrap();
}

#[tokio::test]
async fn test_allowlisted_caller_bypasses_limits() {
    let mut config = common::test_config();
    config.rate_limit.allowlist = vec!["ops".to_string()];
    let (services, _cluster) = common::start_services(&config).await;
    let guard = services.request_guard();

    for _ in 0..20 {
        let outcome = guard
            .handle("menu", callback("ops", "x"), None, |_, _| async { Ok::<_, String>(1) })
            .await
            .unwrap();
        assert_eq!(outcome, GuardOutcome::Completed(1));
    }
}
