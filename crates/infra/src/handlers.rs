//! Built-in work handlers.

use async_trait::async_trait;

use forgejobs_jobs::{ItemResult, WorkContext, WorkHandler};

/// Job type served by [`EchoHandler`].
pub const ECHO_JOB_TYPE: &str = "echo";

/// Returns each item's input as its output.
///
/// Inputs prefixed with `fail:` produce a failure carrying the rest of the
/// input, which makes the retry path observable in smoke runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl WorkHandler for EchoHandler {
    async fn process_item(&self, ctx: &WorkContext) -> anyhow::Result<ItemResult> {
        Ok(match ctx.item_input.strip_prefix("fail:") {
            Some(reason) => ItemResult::failure(reason.trim()),
            None => ItemResult::success_with(ctx.item_input.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgejobs_core::{JobId, PrincipalId};
    use forgejobs_jobs::JobType;

    fn ctx(input: &str) -> WorkContext {
        WorkContext {
            job_id: JobId::new(),
            owner_id: PrincipalId::new(),
            job_type: JobType::parse(ECHO_JOB_TYPE).unwrap(),
            item_index: 0,
            attempt: 1,
            job_input: None,
            item_input: input.to_string(),
        }
    }

    #[tokio::test]
    async fn echoes_input() {
        let r = EchoHandler.process_item(&ctx("hello")).await.unwrap();
        assert_eq!(r, ItemResult::success_with("hello"));
    }

    #[tokio::test]
    async fn fail_prefix_fails() {
        let r = EchoHandler.process_item(&ctx("fail: nope")).await.unwrap();
        assert_eq!(r, ItemResult::failure("nope"));
    }
}
