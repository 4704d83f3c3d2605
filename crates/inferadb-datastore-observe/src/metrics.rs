//! Metric names and descriptions

use metrics::{describe_counter, describe_gauge};

pub const TELEMETRY_INFO: &str = "inferadb_datastore_telemetry_info";
pub const OBJECT_DEFINITIONS_TOTAL: &str = "inferadb_datastore_object_definitions_total";
pub const RELATIONSHIPS_ESTIMATE_TOTAL: &str = "inferadb_datastore_relationships_estimate_total";
pub const OBJECT_TYPE_RELATIONSHIPS: &str = "inferadb_datastore_object_type_relationships";
pub const QUERIES_TOTAL: &str = "inferadb_datastore_queries_total";
pub const QUERY_ERRORS_TOTAL: &str = "inferadb_datastore_query_errors_total";
pub const COMMITS_TOTAL: &str = "inferadb_datastore_commits_total";
pub const COMMIT_ERRORS_TOTAL: &str = "inferadb_datastore_commit_errors_total";
pub const PRECONDITION_FAILURES_TOTAL: &str = "inferadb_datastore_precondition_failures_total";
pub const SERIALIZATION_CONFLICTS_TOTAL: &str = "inferadb_datastore_serialization_conflicts_total";
pub const NAMESPACE_WRITES_TOTAL: &str = "inferadb_datastore_namespace_writes_total";
pub const WATCH_SUBSCRIPTIONS_TOTAL: &str = "inferadb_datastore_watch_subscriptions_total";
pub const WATCH_ACTIVE: &str = "inferadb_datastore_watch_active";
pub const WATCH_REVISIONS_DELIVERED_TOTAL: &str =
    "inferadb_datastore_watch_revisions_delivered_total";
pub const GC_RUNS_TOTAL: &str = "inferadb_datastore_gc_runs_total";
pub const GC_COLLECTED_TOTAL: &str = "inferadb_datastore_gc_collected_total";

/// Register descriptions for every datastore metric with the current recorder
pub fn init_metrics_descriptions() {
    // Telemetry
    describe_gauge!(
        TELEMETRY_INFO,
        "Datastore environment; labelled with cluster, node, version, platform and engine"
    );
    describe_gauge!(OBJECT_DEFINITIONS_TOTAL, "Number of namespace definitions");
    describe_gauge!(RELATIONSHIPS_ESTIMATE_TOTAL, "Estimated number of live relationships");
    describe_gauge!(OBJECT_TYPE_RELATIONSHIPS, "Estimated live relationships per object type");

    // Queries and commits
    describe_counter!(QUERIES_TOTAL, "Total number of relationship queries executed");
    describe_counter!(QUERY_ERRORS_TOTAL, "Total number of relationship queries that failed");
    describe_counter!(COMMITS_TOTAL, "Total number of read-write transaction commits attempted");
    describe_counter!(COMMIT_ERRORS_TOTAL, "Total number of commits that failed");
    describe_counter!(PRECONDITION_FAILURES_TOTAL, "Total number of violated preconditions");
    describe_counter!(
        SERIALIZATION_CONFLICTS_TOTAL,
        "Total number of commits rejected by optimistic concurrency control"
    );
    describe_counter!(NAMESPACE_WRITES_TOTAL, "Total number of namespace writes and deletes");

    // Watch
    describe_counter!(WATCH_SUBSCRIPTIONS_TOTAL, "Total number of watch subscriptions opened");
    describe_gauge!(WATCH_ACTIVE, "Number of watch subscriptions currently running");
    describe_counter!(
        WATCH_REVISIONS_DELIVERED_TOTAL,
        "Total number of revisions delivered to watch subscribers"
    );

    // Garbage collection
    describe_counter!(GC_RUNS_TOTAL, "Total number of garbage collection passes");
    describe_counter!(GC_COLLECTED_TOTAL, "Total number of relationship versions collected");
}
