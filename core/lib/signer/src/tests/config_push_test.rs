//! Gateway config push-down rules.

use logsig_ksi_client::{AggregatorConfig, ServiceOption};

use crate::tests::utils::{async_signer, test_config};

fn level_config(max_level: u64) -> AggregatorConfig {
    AggregatorConfig {
        max_requests: None,
        max_level: Some(max_level),
    }
}

#[test]
fn effective_level_limit_only_decreases() {
    let (signer, _handle) = async_signer(test_config()); // configured limit: 12
    let inner = signer.inner();
    assert_eq!(inner.effective_level_limit(), 12);

    // A pushed limit above the configured one is capped.
    inner.apply_aggregator_config(&level_config(20), None);
    assert_eq!(inner.effective_level_limit(), 12);

    inner.apply_aggregator_config(&level_config(5), None);
    assert_eq!(inner.effective_level_limit(), 5);

    // A later, more permissive push must not grow the limit back.
    inner.apply_aggregator_config(&level_config(8), None);
    assert_eq!(inner.effective_level_limit(), 5);
    assert!(!inner.is_disabled());
}

#[test]
fn level_limit_below_two_disables() {
    let (signer, _handle) = async_signer(test_config());
    let inner = signer.inner();

    inner.apply_aggregator_config(&level_config(1), None);
    assert!(inner.is_disabled());
    // The previous effective limit is left untouched.
    assert_eq!(inner.effective_level_limit(), 12);
}

#[test]
fn max_requests_push_reconfigures_the_service() {
    let (signer, handle) = async_signer(test_config());
    let inner = signer.inner();
    let mut service = handle.service();

    inner.apply_aggregator_config(
        &AggregatorConfig {
            max_requests: Some(10),
            max_level: None,
        },
        Some(&mut service),
    );

    assert_eq!(inner.max_requests(), 10);
    let options = handle.options();
    assert!(options.contains(&ServiceOption::MaxRequestCount(10)));
    // The request cache holds five responses per outstanding request.
    assert!(options.contains(&ServiceOption::RequestCacheSize(50)));
}
