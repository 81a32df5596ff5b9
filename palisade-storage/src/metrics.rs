//! Prometheus metrics for storage operations
//!
//! This module defines metrics for:
//! - Circuit breaker state and transitions
//! - Object store operation latency and payload sizes
//! - Slow metadata operations

use lazy_static::lazy_static;
use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, GaugeVec, HistogramVec,
    IntCounterVec,
};

lazy_static! {
    /// Circuit breaker state gauge (0 = closed, 1 = open)
    ///
    /// Labels:
    /// - dependency: name of the protected dependency (e.g., "object_store")
    pub static ref CIRCUIT_BREAKER_STATE: GaugeVec = register_gauge_vec!(
        "palisade_circuit_breaker_state",
        "Circuit breaker state (0=closed, 1=open)",
        &["dependency"]
    )
    .expect("Failed to register circuit_breaker_state metric");

    /// Incremented each time a circuit breaker transitions from closed to open.
    pub static ref CIRCUIT_BREAKER_OPENS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "palisade_circuit_breaker_opens_total",
        "Total number of circuit breaker open events",
        &["dependency"]
    )
    .expect("Failed to register circuit_breaker_opens_total metric");

    /// Half-open trial attempts by result ("success" or "failure")
    pub static ref CIRCUIT_BREAKER_HALF_OPEN_ATTEMPTS: IntCounterVec = register_int_counter_vec!(
        "palisade_circuit_breaker_half_open_attempts_total",
        "Total number of half-open trial attempts",
        &["dependency", "result"]
    )
    .expect("Failed to register circuit_breaker_half_open_attempts_total metric");

    /// Object store operation latency
    ///
    /// Labels:
    /// - operation: put | get | get_range | delete
    /// - outcome: ok | error | rejected
    pub static ref OBJECT_STORE_DURATION: HistogramVec = register_histogram_vec!(
        "palisade_object_store_operation_duration_seconds",
        "Object store operation duration in seconds",
        &["operation", "outcome"],
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
    )
    .expect("Failed to register object_store_operation_duration metric");

    /// Metadata operations slower than 100ms, by table
    pub static ref SLOW_METADATA_OPERATIONS: IntCounterVec = register_int_counter_vec!(
        "palisade_slow_metadata_operations_total",
        "Metadata store operations that exceeded 100ms",
        &["table"]
    )
    .expect("Failed to register slow_metadata_operations metric");
}
