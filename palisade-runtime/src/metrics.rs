//! Prometheus metrics for Palisade runtime operations

use lazy_static::lazy_static;
use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, register_int_gauge_vec,
    GaugeVec, HistogramVec, IntCounterVec, IntGaugeVec,
};

lazy_static! {
    /// Finalized backup executions
    ///
    /// Labels:
    /// - backup_type: "full", "incremental", "log_archive"
    /// - status: "completed", "failed"
    pub static ref BACKUP_EXECUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "palisade_backup_executions_total",
        "Total number of finalized backup executions",
        &["backup_type", "status"]
    )
    .expect("palisade_backup_executions_total metric registration");

    pub static ref BACKUP_BYTES_WRITTEN_TOTAL: IntCounterVec = register_int_counter_vec!(
        "palisade_backup_bytes_written_total",
        "Bytes of verified backup artifacts written",
        &["backup_type"]
    )
    .expect("palisade_backup_bytes_written_total metric registration");

    /// Wall-clock time of a backup execution, export to finalize
    pub static ref BACKUP_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "palisade_backup_duration_seconds",
        "Duration of backup executions",
        &["backup_type"],
        vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]
    )
    .expect("palisade_backup_duration_seconds metric registration");

    /// Last measured lag per replication link, labeled `<primary>-><replica>`
    pub static ref REPLICATION_LAG_SECONDS: GaugeVec = register_gauge_vec!(
        "palisade_replication_lag_seconds",
        "Last measured replication lag",
        &["link"]
    )
    .expect("palisade_replication_lag_seconds metric registration");

    /// 0 = healthy, 1 = warning, 2 = critical
    pub static ref HEALTH_SEVERITY: IntGaugeVec = register_int_gauge_vec!(
        "palisade_health_severity",
        "Severity of the latest health snapshot per primary region",
        &["region"]
    )
    .expect("palisade_health_severity metric registration");

    pub static ref FAILOVER_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "palisade_failover_transitions_total",
        "Total number of failover state transitions",
        &["from_state", "to_state"]
    )
    .expect("palisade_failover_transitions_total metric registration");

    /// Labels:
    /// - outcome: "completed", "rolled_back", "aborted"
    pub static ref FAILOVER_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "palisade_failover_duration_seconds",
        "Duration of failover events from claim to terminal state",
        &["outcome"],
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    )
    .expect("palisade_failover_duration_seconds metric registration");

    /// Labels:
    /// - scenario: "backup_restore", "failover", "point_in_time", "full_disaster"
    /// - result: "passed", "failed"
    pub static ref RECOVERY_TESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "palisade_recovery_tests_total",
        "Total number of executed recovery tests",
        &["scenario", "result"]
    )
    .expect("palisade_recovery_tests_total metric registration");

    pub static ref ENGINE_TASKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "palisade_engine_tasks_total",
        "Background engine tasks run",
        &["task", "outcome"]
    )
    .expect("palisade_engine_tasks_total metric registration");

    pub static ref RETENTION_DELETED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "palisade_retention_deleted_total",
        "Backup executions removed by the retention sweep",
        &["backup_type"]
    )
    .expect("palisade_retention_deleted_total metric registration");
}
