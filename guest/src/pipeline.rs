//! Table-driven execution of the ordered boot phase.
//!
//! Boot is a fixed sequence of named tasks sharing one context. Keeping the
//! plan as data keeps the ordering guarantees (config before staging before
//! mounts) in one place instead of scattered through the supervisor, and
//! gives every task a timed, logged boundary. The parallel service phase is
//! not a pipeline concern; the supervisor owns that scope.

use std::time::Instant;

use async_trait::async_trait;
use vmlite_shared::VmliteResult;

/// A named unit of boot work run with the shared pipeline context.
#[async_trait]
pub trait BootTask<Ctx>: Send + Sync {
    async fn run(self: Box<Self>, ctx: Ctx) -> VmliteResult<()>;

    /// Human-readable task name for logging and timing.
    fn name(&self) -> &str;
}

pub type BoxedTask<Ctx> = Box<dyn BootTask<Ctx>>;

/// A stage groups tasks that must complete before the next stage starts.
pub struct Stage<Ctx> {
    pub tasks: Vec<BoxedTask<Ctx>>,
}

impl<Ctx> Stage<Ctx> {
    pub fn sequential(tasks: Vec<BoxedTask<Ctx>>) -> Self {
        Self { tasks }
    }
}

pub struct ExecutionPlan<Ctx> {
    stages: Vec<Stage<Ctx>>,
}

impl<Ctx> ExecutionPlan<Ctx> {
    pub fn new(stages: Vec<Stage<Ctx>>) -> Self {
        Self { stages }
    }
}

/// Wall-clock spent in one task, for the boot timing log.
pub struct TaskTiming {
    pub name: String,
    pub duration_ms: u64,
}

/// Run every stage in order, every task within a stage in order.
///
/// The first task error aborts the plan; tasks after it never run.
pub async fn execute<Ctx>(plan: ExecutionPlan<Ctx>, ctx: Ctx) -> VmliteResult<Vec<TaskTiming>>
where
    Ctx: Clone,
{
    let mut timings = Vec::new();

    for stage in plan.stages {
        for task in stage.tasks {
            let name = task.name().to_string();
            let started = Instant::now();
            task.run(ctx.clone()).await?;
            let duration_ms = started.elapsed().as_millis() as u64;
            tracing::debug!(task = %name, duration_ms, "boot task finished");
            timings.push(TaskTiming { name, duration_ms });
        }
    }

    Ok(timings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use vmlite_shared::VmliteError;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    struct Record(&'static str);

    #[async_trait]
    impl BootTask<Log> for Record {
        async fn run(self: Box<Self>, ctx: Log) -> VmliteResult<()> {
            ctx.lock().await.push(self.0);
            Ok(())
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    struct Fail;

    #[async_trait]
    impl BootTask<Log> for Fail {
        async fn run(self: Box<Self>, _ctx: Log) -> VmliteResult<()> {
            Err(VmliteError::Internal("boom".into()))
        }

        fn name(&self) -> &str {
            "fail"
        }
    }

    #[tokio::test]
    async fn runs_stages_in_order() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let plan = ExecutionPlan::new(vec![
            Stage::sequential(vec![Box::new(Record("first"))]),
            Stage::sequential(vec![Box::new(Record("second")), Box::new(Record("third"))]),
        ]);

        let timings = execute(plan, Arc::clone(&log)).await.unwrap();

        assert_eq!(*log.lock().await, vec!["first", "second", "third"]);
        let names: Vec<_> = timings.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn first_error_stops_the_plan() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let plan = ExecutionPlan::new(vec![
            Stage::sequential(vec![Box::new(Record("first"))]),
            Stage::sequential(vec![Box::new(Fail)]),
            Stage::sequential(vec![Box::new(Record("never"))]),
        ]);

        assert!(execute(plan, Arc::clone(&log)).await.is_err());
        assert_eq!(*log.lock().await, vec!["first"]);
    }
}
