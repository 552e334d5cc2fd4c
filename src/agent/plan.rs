//! Legacy plan-then-execute engine: one PLANNING call produces an upfront
//! step list, which is handed to the ReAct engine as context. Kept as a
//! recognized alternative; `react` is the default.

use super::{AgentEngine, EngineDeps, ReactEngine, RunHandle, RunOutcome, RunStats, TaskContext};
use crate::errors::AgentError;
use crate::provider::{ChatMessage, ChatOptions, Purpose, chat_with_retry};

pub struct PlanEngine {
    deps: EngineDeps,
    executor: ReactEngine,
}

impl PlanEngine {
    pub fn new(deps: EngineDeps) -> Self {
        let executor = ReactEngine::new(deps.clone());
        Self { deps, executor }
    }
}

#[async_trait::async_trait]
impl AgentEngine for PlanEngine {
    fn name(&self) -> &'static str {
        "plan"
    }

    async fn run(
        &self,
        ctx: &TaskContext,
        handle: &RunHandle,
    ) -> Result<(RunOutcome, RunStats), AgentError> {
        let request = vec![
            ChatMessage::system(
                "Produce a short numbered implementation plan for the task below. Steps only, \
                 no code.",
            ),
            ChatMessage::user(format!("{}\n\n{}", ctx.task.title, ctx.task.description)),
        ];
        let response = chat_with_retry(
            self.deps.provider.as_ref(),
            &request,
            &[],
            &ChatOptions::for_purpose(Purpose::Planning),
            &handle.cancel,
        )
        .await
        .map_err(AgentError::Provider)?;

        let mut planned = ctx.clone();
        planned.plan = Some(response.text.clone());

        let (outcome, mut stats) = self.executor.run(&planned, handle).await?;
        stats.usage.add(&response.usage);
        Ok((outcome, stats))
    }
}
