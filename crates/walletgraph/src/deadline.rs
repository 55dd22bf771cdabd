use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::PipelineError;

/// Wall-clock budget for one pipeline run, started when the request arrives
/// and handed to every stage that does network work.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Fail fast before starting `stage` if the budget is already spent.
    pub fn check(&self, stage: &'static str) -> Result<(), PipelineError> {
        if self.is_expired() {
            return Err(self.timeout_error(stage));
        }
        Ok(())
    }

    /// Await `fut`, giving up once the remaining budget runs out. The
    /// abandoned future is dropped; in-flight requests are not cancelled
    /// upstream, we just stop waiting on them.
    pub async fn run<F, T>(&self, stage: &'static str, fut: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, PipelineError>>,
    {
        self.check(stage)?;
        match tokio::time::timeout(self.remaining(), fut).await {
            Ok(res) => res,
            Err(_elapsed) => Err(self.timeout_error(stage)),
        }
    }

    fn timeout_error(&self, stage: &'static str) -> PipelineError {
        PipelineError::ProcessingTimeout {
            budget_secs: self.budget.as_secs(),
            stage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_remaining_shrinks_and_expires() {
        let deadline = Deadline::start(Duration::from_secs(10));
        assert!(deadline.check("ingest").is_ok());

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(deadline.remaining(), Duration::from_secs(6));

        tokio::time::advance(Duration::from_secs(7)).await;
        assert!(deadline.is_expired());
        let err = deadline.check("entity_resolution").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ProcessingTimeout {
                budget_secs: 10,
                stage: "entity_resolution"
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out_slow_future() {
        let deadline = Deadline::start(Duration::from_secs(2));
        let res: Result<(), PipelineError> = deadline
            .run("enrichment", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert_eq!(res.unwrap_err().code(), "PROCESSING_TIMEOUT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_passes_through_fast_result() {
        let deadline = Deadline::start(Duration::from_secs(2));
        let value = deadline.run("enrichment", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
