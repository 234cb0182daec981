use opentelemetry::metrics::Counter;
use opentelemetry::KeyValue;

/// Counters shared by the job runner and the service reaper.
#[derive(Clone)]
pub struct MaintainMetrics {
    job_runs: Counter<u64>,
    rows_cleaned: Counter<u64>,
    instances_deleted: Counter<u64>,
    services_deleted: Counter<u64>,
}

impl std::fmt::Debug for MaintainMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintainMetrics").finish_non_exhaustive()
    }
}

impl Default for MaintainMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MaintainMetrics {
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("polaris");
        Self {
            job_runs: meter
                .u64_counter("maintain.job_runs")
                .with_description("Number of maintenance job ticks, by job and leadership role")
                .build(),
            rows_cleaned: meter
                .u64_counter("maintain.rows_cleaned")
                .with_description("Soft-deleted rows hard-deleted by maintenance jobs")
                .build(),
            instances_deleted: meter
                .u64_counter("maintain.instances_deleted")
                .with_description("Instances deleted through the discovery server")
                .build(),
            services_deleted: meter
                .u64_counter("maintain.services_deleted")
                .with_description("Services deleted through the discovery server")
                .build(),
        }
    }

    pub(crate) fn record_job_run(&self, job: &str, leader: bool) {
        let role = if leader { "leader" } else { "follower" };
        self.job_runs.add(
            1,
            &[
                KeyValue::new("job", job.to_string()),
                KeyValue::new("role", role),
            ],
        );
    }

    pub(crate) fn record_rows_cleaned(&self, resource: &str, rows: u64) {
        if rows > 0 {
            self.rows_cleaned
                .add(rows, &[KeyValue::new("resource", resource.to_string())]);
        }
    }

    pub(crate) fn record_instances_deleted(&self, count: u64) {
        if count > 0 {
            self.instances_deleted.add(count, &[]);
        }
    }

    pub(crate) fn record_services_deleted(&self, source: &'static str, count: u64) {
        if count > 0 {
            self.services_deleted
                .add(count, &[KeyValue::new("source", source)]);
        }
    }
}
