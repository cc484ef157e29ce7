//! End-to-end controller behavior over the scriptable connector.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{TestConnector, endpoint};
use switchover::config::{
    CircuitBreakerConfig, EndpointConfig, FailoverConfig, FailoverConfigBuilder,
    InitializationPolicy, RetryConfig,
};
use switchover::{ErrorKind, FailoverError, FailoverProvider, SwitchReason, ValidationError};

fn quick_breaker() -> CircuitBreakerConfig {
    CircuitBreakerConfig::builder()
        .failure_rate_threshold(50.0)
        .min_failures(1)
        .sliding_window_size(2)
        .build()
        .unwrap()
}

fn no_retry() -> RetryConfig {
    RetryConfig::builder().max_attempts(1).build().unwrap()
}

fn base_config() -> FailoverConfigBuilder {
    FailoverConfig::builder()
        .retry(no_retry())
        .breaker(quick_breaker())
        .initialization_policy(InitializationPolicy::OneAvailable)
}

async fn run(provider: &FailoverProvider<TestConnector>) -> Result<String, FailoverError> {
    provider.run(|pool| async move { pool.call().await }).await
}

#[tokio::test(start_paused = true)]
async fn routes_to_highest_weight_endpoint() {
    let connector = TestConnector::new();
    let config = base_config()
        .endpoint(EndpointConfig::builder(endpoint("replica")).weight(1.0).build())
        .endpoint(EndpointConfig::builder(endpoint("primary")).weight(10.0).build())
        .build()
        .unwrap();
    let provider = FailoverProvider::new(connector, config).await.unwrap();

    assert_eq!(provider.active_endpoint(), Some(endpoint("primary")));
    assert_eq!(run(&provider).await.unwrap(), "primary:6379");
}

#[tokio::test(start_paused = true)]
async fn insertion_order_breaks_weight_ties() {
    let connector = TestConnector::new();
    let config = base_config()
        .endpoint(EndpointConfig::builder(endpoint("first")).build())
        .endpoint(EndpointConfig::builder(endpoint("second")).build())
        .build()
        .unwrap();
    let provider = FailoverProvider::new(connector, config).await.unwrap();

    assert_eq!(provider.active_endpoint(), Some(endpoint("first")));
}

#[tokio::test(start_paused = true)]
async fn open_circuit_switches_on_next_call() {
    let connector = TestConnector::new();
    connector
        .script(&endpoint("primary"))
        .fail_always(ErrorKind::Connection);
    let config = base_config()
        .endpoint(EndpointConfig::builder(endpoint("primary")).weight(10.0).build())
        .endpoint(EndpointConfig::builder(endpoint("replica")).weight(1.0).build())
        .build()
        .unwrap();
    let provider = FailoverProvider::new(connector, config).await.unwrap();

    // The failing call itself surfaces to the caller and trips the
    // breaker.
    let error = run(&provider).await.unwrap_err();
    assert!(matches!(error, FailoverError::Command(_)));
    assert_eq!(provider.active_endpoint(), Some(endpoint("primary")));

    // The next call is rejected by the open circuit and triggers the
    // switch.
    let error = run(&provider).await.unwrap_err();
    assert!(matches!(error, FailoverError::CircuitOpen(e) if e == endpoint("primary")));
    assert_eq!(provider.active_endpoint(), Some(endpoint("replica")));

    assert_eq!(run(&provider).await.unwrap(), "replica:6379");
}

#[tokio::test(start_paused = true)]
async fn retry_on_failover_reruns_on_new_endpoint() {
    let connector = TestConnector::new();
    connector
        .script(&endpoint("primary"))
        .fail_always(ErrorKind::Connection);
    let config = base_config()
        .retry_on_failover(true)
        .endpoint(EndpointConfig::builder(endpoint("primary")).weight(10.0).build())
        .endpoint(EndpointConfig::builder(endpoint("replica")).weight(1.0).build())
        .build()
        .unwrap();
    let provider = FailoverProvider::new(connector, config).await.unwrap();

    run(&provider).await.unwrap_err();
    // Rejected by the open circuit, switched, and re-run transparently.
    assert_eq!(run(&provider).await.unwrap(), "replica:6379");
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let connector = TestConnector::new();
    let script = connector.script(&endpoint("primary"));
    script.fail_times(2, ErrorKind::Connection);
    let config = base_config()
        .retry(
            RetryConfig::builder()
                .max_attempts(3)
                .wait_duration(Duration::from_millis(100))
                .build()
                .unwrap(),
        )
        .breaker(CircuitBreakerConfig::default())
        .endpoint(EndpointConfig::builder(endpoint("primary")).build())
        .build()
        .unwrap();
    let provider = FailoverProvider::new(connector, config).await.unwrap();

    assert_eq!(run(&provider).await.unwrap(), "primary:6379");
    assert_eq!(script.commands.load(std::sync::atomic::Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn fallback_kind_bypasses_retry_and_switches() {
    let connector = TestConnector::new();
    let script = connector.script(&endpoint("primary"));
    script.fail_always(ErrorKind::Server);
    let config = base_config()
        .retry(
            RetryConfig::builder()
                .max_attempts(3)
                .included_kinds(vec![ErrorKind::Connection, ErrorKind::Server])
                .build()
                .unwrap(),
        )
        .fallback_kinds(vec![ErrorKind::Server])
        .endpoint(EndpointConfig::builder(endpoint("primary")).weight(10.0).build())
        .endpoint(EndpointConfig::builder(endpoint("replica")).weight(1.0).build())
        .build()
        .unwrap();
    let provider = FailoverProvider::new(connector, config).await.unwrap();

    let error = run(&provider).await.unwrap_err();
    assert!(matches!(error, FailoverError::Command(e) if e.kind() == ErrorKind::Server));
    // Exactly one call: fallback kinds are never retried.
    assert_eq!(script.commands.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(provider.active_endpoint(), Some(endpoint("replica")));
}

#[tokio::test(start_paused = true)]
async fn failover_attempts_are_bounded() {
    let connector = TestConnector::new();
    connector
        .script(&endpoint("primary"))
        .fail_always(ErrorKind::Connection);
    connector
        .script(&endpoint("replica"))
        .set_probe_healthy(false);
    let strategy = connector.strategy_factory();
    let config = base_config()
        .max_failover_attempts(1)
        .failover_attempt_delay(Duration::from_secs(1))
        .failback_supported(false)
        .endpoint(EndpointConfig::builder(endpoint("primary")).weight(10.0).build())
        .endpoint(
            EndpointConfig::builder(endpoint("replica"))
                .weight(1.0)
                .health_check(strategy)
                .build(),
        )
        .build()
        .unwrap();
    let provider = FailoverProvider::new(connector, config).await.unwrap();

    run(&provider).await.unwrap_err();
    // No healthy target: one attempt consumed, freeze armed.
    assert!(matches!(
        run(&provider).await.unwrap_err(),
        FailoverError::TemporarilyUnavailable
    ));
    // Within the freeze window no further budget is spent.
    assert!(matches!(
        run(&provider).await.unwrap_err(),
        FailoverError::TemporarilyUnavailable
    ));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(matches!(
        run(&provider).await.unwrap_err(),
        FailoverError::PermanentlyUnavailable
    ));
    assert!(matches!(
        run(&provider).await.unwrap_err(),
        FailoverError::PermanentlyUnavailable
    ));
}

#[tokio::test(start_paused = true)]
async fn unhealthy_active_triggers_switch() {
    let connector = TestConnector::new();
    let strategy = connector.strategy_factory();
    let config = base_config()
        .grace_period(Duration::ZERO)
        .endpoint(
            EndpointConfig::builder(endpoint("primary"))
                .weight(10.0)
                .health_check(strategy.clone())
                .build(),
        )
        .endpoint(
            EndpointConfig::builder(endpoint("replica"))
                .weight(1.0)
                .health_check(strategy)
                .build(),
        )
        .build()
        .unwrap();
    let primary = connector.script(&endpoint("primary"));
    let provider = FailoverProvider::new(connector, config).await.unwrap();
    assert_eq!(provider.active_endpoint(), Some(endpoint("primary")));

    primary.set_probe_healthy(false);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(provider.active_endpoint(), Some(endpoint("replica")));
    assert_eq!(run(&provider).await.unwrap(), "replica:6379");
}

#[tokio::test(start_paused = true)]
async fn recovered_primary_fails_back() {
    let connector = TestConnector::new();
    let strategy = connector.strategy_factory();
    let config = base_config()
        .grace_period(Duration::ZERO)
        .failback_interval(Duration::from_secs(10))
        .endpoint(
            EndpointConfig::builder(endpoint("primary"))
                .weight(10.0)
                .health_check(strategy.clone())
                .build(),
        )
        .endpoint(
            EndpointConfig::builder(endpoint("replica"))
                .weight(1.0)
                .health_check(strategy)
                .build(),
        )
        .build()
        .unwrap();
    let primary = connector.script(&endpoint("primary"));
    let provider = FailoverProvider::new(connector, config).await.unwrap();

    primary.set_probe_healthy(false);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(provider.active_endpoint(), Some(endpoint("replica")));

    primary.set_probe_healthy(true);
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(provider.active_endpoint(), Some(endpoint("primary")));
    assert_eq!(run(&provider).await.unwrap(), "primary:6379");
}

#[tokio::test(start_paused = true)]
async fn grace_period_delays_failback() {
    let connector = TestConnector::new();
    let strategy = connector.strategy_factory();
    let config = base_config()
        .grace_period(Duration::from_secs(300))
        .failback_interval(Duration::from_secs(10))
        .endpoint(
            EndpointConfig::builder(endpoint("primary"))
                .weight(10.0)
                .health_check(strategy.clone())
                .build(),
        )
        .endpoint(
            EndpointConfig::builder(endpoint("replica"))
                .weight(1.0)
                .health_check(strategy)
                .build(),
        )
        .build()
        .unwrap();
    let primary = connector.script(&endpoint("primary"));
    let provider = FailoverProvider::new(connector, config).await.unwrap();

    primary.set_probe_healthy(false);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(provider.active_endpoint(), Some(endpoint("replica")));

    // Recovered, but still inside the grace period.
    primary.set_probe_healthy(true);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(provider.active_endpoint(), Some(endpoint("replica")));

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(provider.active_endpoint(), Some(endpoint("primary")));
}

#[tokio::test(start_paused = true)]
async fn fast_failover_severs_demoted_pool() {
    let connector = TestConnector::new();
    let primary = connector.script(&endpoint("primary"));
    primary.fail_always(ErrorKind::Connection);
    let config = base_config()
        .fast_failover(true)
        .endpoint(EndpointConfig::builder(endpoint("primary")).weight(10.0).build())
        .endpoint(EndpointConfig::builder(endpoint("replica")).weight(1.0).build())
        .build()
        .unwrap();
    let provider = FailoverProvider::new(connector, config).await.unwrap();

    run(&provider).await.unwrap_err();
    run(&provider).await.unwrap_err();
    // Let the spawned disconnect run.
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(
        primary.disconnects.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn switch_listener_is_notified() {
    let connector = TestConnector::new();
    connector
        .script(&endpoint("primary"))
        .fail_always(ErrorKind::Connection);
    let config = base_config()
        .endpoint(EndpointConfig::builder(endpoint("primary")).weight(10.0).build())
        .endpoint(EndpointConfig::builder(endpoint("replica")).weight(1.0).build())
        .build()
        .unwrap();
    let provider = FailoverProvider::new(connector, config).await.unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    provider.on_switch(Arc::new(move |event| sink.lock().unwrap().push(event)));

    run(&provider).await.unwrap_err();
    run(&provider).await.unwrap_err();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].from, Some(endpoint("primary")));
    assert_eq!(events[0].to, endpoint("replica"));
    assert_eq!(events[0].reason, SwitchReason::CircuitBreaker);
}

#[tokio::test(start_paused = true)]
async fn manual_switch_validates_target() {
    let connector = TestConnector::new();
    let strategy = connector.strategy_factory();
    connector
        .script(&endpoint("replica-2"))
        .set_probe_healthy(false);
    let config = base_config()
        .endpoint(EndpointConfig::builder(endpoint("primary")).weight(10.0).build())
        .endpoint(EndpointConfig::builder(endpoint("replica-1")).weight(1.0).build())
        .endpoint(
            EndpointConfig::builder(endpoint("replica-2"))
                .weight(1.0)
                .health_check(strategy)
                .build(),
        )
        .build()
        .unwrap();
    let provider = FailoverProvider::new(connector, config).await.unwrap();

    provider.set_active_endpoint(&endpoint("replica-1")).unwrap();
    assert_eq!(run(&provider).await.unwrap(), "replica-1:6379");

    let error = provider
        .set_active_endpoint(&endpoint("unknown"))
        .unwrap_err();
    assert!(matches!(
        error,
        FailoverError::Validation(ValidationError::UnknownEndpoint(_))
    ));

    let error = provider
        .set_active_endpoint(&endpoint("replica-2"))
        .unwrap_err();
    assert!(matches!(
        error,
        FailoverError::Validation(ValidationError::UnhealthyEndpoint(_))
    ));

    // Forcing ignores the health verdict.
    provider
        .force_active_endpoint(&endpoint("replica-2"), Duration::from_secs(60))
        .unwrap();
    assert_eq!(provider.active_endpoint(), Some(endpoint("replica-2")));
}

#[tokio::test(start_paused = true)]
async fn forced_endpoint_stays_pinned_for_the_requested_duration() {
    let connector = TestConnector::new();
    let config = base_config()
        .endpoint(
            EndpointConfig::builder(endpoint("primary"))
                .weight(10.0)
                .health_check(connector.strategy_factory())
                .build(),
        )
        .endpoint(
            EndpointConfig::builder(endpoint("replica"))
                .weight(1.0)
                .health_check(connector.strategy_factory())
                .build(),
        )
        .failback_interval(Duration::from_secs(5))
        .grace_period(Duration::ZERO)
        .build()
        .unwrap();
    let provider = FailoverProvider::new(connector, config).await.unwrap();
    assert_eq!(provider.active_endpoint(), Some(endpoint("primary")));

    provider
        .force_active_endpoint(&endpoint("replica"), Duration::from_secs(30))
        .unwrap();
    assert_eq!(provider.active_endpoint(), Some(endpoint("replica")));

    // The healthy higher-weight primary is pinned out during the window.
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(provider.active_endpoint(), Some(endpoint("replica")));

    // Once the pin expires the next failback tick promotes it again.
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(provider.active_endpoint(), Some(endpoint("primary")));
}

#[tokio::test(start_paused = true)]
async fn endpoints_can_be_added_and_removed() {
    let connector = TestConnector::new();
    let config = base_config()
        .endpoint(EndpointConfig::builder(endpoint("primary")).weight(10.0).build())
        .endpoint(EndpointConfig::builder(endpoint("replica")).weight(1.0).build())
        .build()
        .unwrap();
    let replica = connector.script(&endpoint("replica"));
    let provider = FailoverProvider::new(connector, config).await.unwrap();

    provider.remove_endpoint(&endpoint("replica")).await.unwrap();
    assert_eq!(provider.endpoints(), vec![endpoint("primary")]);
    assert_eq!(replica.closes.load(std::sync::atomic::Ordering::SeqCst), 1);

    let error = provider
        .remove_endpoint(&endpoint("primary"))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        FailoverError::Validation(ValidationError::LastEndpoint)
    ));

    provider
        .add_endpoint(EndpointConfig::builder(endpoint("replica")).weight(1.0).build())
        .await
        .unwrap();
    let error = provider
        .add_endpoint(EndpointConfig::builder(endpoint("replica")).build())
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        FailoverError::Validation(ValidationError::DuplicateEndpoint(_))
    ));

    // Removing the active endpoint fails over away from it first.
    provider.remove_endpoint(&endpoint("primary")).await.unwrap();
    assert_eq!(provider.active_endpoint(), Some(endpoint("replica")));
}

#[tokio::test(start_paused = true)]
async fn closed_provider_rejects_commands() {
    let connector = TestConnector::new();
    let config = base_config()
        .endpoint(EndpointConfig::builder(endpoint("primary")).build())
        .build()
        .unwrap();
    let primary = connector.script(&endpoint("primary"));
    let provider = FailoverProvider::new(connector, config).await.unwrap();

    provider.close().await;
    assert!(matches!(
        run(&provider).await.unwrap_err(),
        FailoverError::Closed
    ));
    assert_eq!(primary.closes.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn provider_debug_reports_the_active_endpoint() {
    let connector = TestConnector::new();
    let config = base_config()
        .endpoint(EndpointConfig::builder(endpoint("primary")).build())
        .build()
        .unwrap();
    let provider = FailoverProvider::new(connector, config).await.unwrap();

    let rendered = format!("{provider:?}");
    assert!(rendered.contains("FailoverProvider"));
    assert!(rendered.contains("primary"));
}
