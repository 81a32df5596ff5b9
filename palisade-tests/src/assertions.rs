//! Custom assertions for common verification patterns
//!
//! Provides assertion helpers that give better error messages than a bare
//! `assert_eq!` on whole events.

use crate::mocks::RecordingNotifier;
use palisade_core::{FailoverEvent, FailoverState, RecoveryTest};
use palisade_runtime::AlertSeverity;

/// Assert the exact sequence of states a failover went through, starting at `Idle`
pub fn assert_path(event: &FailoverEvent, expected: &[FailoverState]) {
    let actual = event.path();
    assert_eq!(
        actual, expected,
        "failover {} took path {:?}, expected {:?} (abort: {:?}, failure: {:?})",
        event.id, actual, expected, event.abort_reason, event.failure
    );
}

/// Assert the failover stopped before the point of no return
pub fn assert_aborted_before_promotion(event: &FailoverEvent) {
    assert_eq!(
        event.state,
        FailoverState::Aborted,
        "failover {} ended {} (failure: {:?})",
        event.id,
        event.state,
        event.failure
    );
    assert!(!event.completed);
    assert!(
        !event.path().contains(&FailoverState::Promoting),
        "failover {} aborted after promoting: {:?}",
        event.id,
        event.path()
    );
}

/// Assert at least one notification of `severity` mentions `fragment`
pub fn assert_notified(notifier: &RecordingNotifier, severity: AlertSeverity, fragment: &str) {
    let sent = notifier.with_severity(severity);
    assert!(
        sent.iter().any(|n| n.message.contains(fragment)),
        "no {} notification containing '{}'; sent: {:?}",
        severity.as_str(),
        fragment,
        notifier
            .all()
            .iter()
            .map(|n| format!("{}: {}", n.severity.as_str(), n.message))
            .collect::<Vec<_>>()
    );
}

pub fn assert_not_notified(notifier: &RecordingNotifier, severity: AlertSeverity) {
    let sent = notifier.with_severity(severity);
    assert!(
        sent.is_empty(),
        "unexpected {} notifications: {:?}",
        severity.as_str(),
        sent.iter().map(|n| &n.message).collect::<Vec<_>>()
    );
}

/// Assert a recovery test passed, showing its issues otherwise
pub fn assert_test_passed(test: &RecoveryTest) {
    assert_eq!(
        test.passed,
        Some(true),
        "recovery test {} ({}) did not pass: {:?}",
        test.id,
        test.scenario.as_str(),
        test.issues_found
    );
    assert!(test.data_integrity_verified);
    assert!(!test.remediation_required);
}

/// Assert a recovery test failed with an issue mentioning `fragment`
pub fn assert_test_failed_with(test: &RecoveryTest, fragment: &str) {
    assert_eq!(test.passed, Some(false), "recovery test {} passed", test.id);
    assert!(test.remediation_required);
    assert!(
        test.issues_found.iter().any(|issue| issue.contains(fragment)),
        "no issue containing '{}' in {:?}",
        fragment,
        test.issues_found
    );
}
