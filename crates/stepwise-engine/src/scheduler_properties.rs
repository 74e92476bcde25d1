//! Property tests for loop expansion and branch selection

use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::json;
use stepwise_process::{CommandExecutor, CommandOutput, ProcessError};

use crate::models::{Plan, PlanStatus, Step};
use crate::scheduler::PlanScheduler;

struct EchoExecutor;

#[async_trait]
impl CommandExecutor for EchoExecutor {
    async fn execute_command(
        &self,
        command: &str,
        _check_safety: bool,
        _dry_run: bool,
    ) -> Result<CommandOutput, ProcessError> {
        let stdout = command.strip_prefix("echo ").unwrap_or_default();
        Ok(CommandOutput {
            stdout: format!("{}\n", stdout),
            stderr: String::new(),
            return_code: 0,
        })
    }
}

fn scheduler() -> PlanScheduler {
    PlanScheduler::builder()
        .command_executor(Arc::new(EchoExecutor))
        .build()
        .unwrap()
}

proptest! {
    /// A loop over N literal items runs its body exactly N times, in order
    #[test]
    fn prop_loop_runs_once_per_item(items in prop::collection::vec(0i64..1000, 0..8)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(async {
            let plan = Plan::new("loop")
                .with_step(Step::loop_over("each", json!(items.clone()), &["say"]))
                .with_step(Step::command("say", "echo $loop_item"))
                .with_entry_point("each");
            scheduler().execute(&plan, false, None).await
        });

        prop_assert_eq!(result.status, PlanStatus::Completed);
        let each = result.result("each").unwrap();
        prop_assert_eq!(each.output("iterations"), Some(&json!(items.len())));

        let records = each.output("loop_results").unwrap().as_array().unwrap();
        prop_assert_eq!(records.len(), items.len());
        for (index, (record, item)) in records.iter().zip(&items).enumerate() {
            prop_assert_eq!(&record["index"], &json!(index));
            prop_assert_eq!(&record["item"], &json!(item));
            prop_assert_eq!(
                &record["results"][0]["outputs"]["say_stdout"],
                &json!(format!("{}\n", item))
            );
        }
        prop_assert!(result.result("say").is_none());
    }

    /// `range(n)` yields n iterations
    #[test]
    fn prop_range_iteration_count(count in 0usize..10) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(async {
            let plan = Plan::new("range")
                .with_context("count", json!(count))
                .with_step(Step::loop_over("each", json!("range(count)"), &["say"]))
                .with_step(Step::command("say", "echo $loop_index"))
                .with_entry_point("each");
            scheduler().execute(&plan, false, None).await
        });

        prop_assert!(result.success);
        prop_assert_eq!(
            result.result("each").unwrap().output("iterations"),
            Some(&json!(count))
        );
    }

    /// Exactly one branch of a decision is ever scheduled
    #[test]
    fn prop_decision_runs_one_branch(flag in any::<bool>()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(async {
            let plan = Plan::new("branch")
                .with_context("flag", json!(flag))
                .with_step(Step::decision("check", "flag == true", &["yes"], &["no"]))
                .with_step(Step::command("yes", "echo yes"))
                .with_step(Step::command("no", "echo no"))
                .with_entry_point("check");
            scheduler().execute(&plan, false, None).await
        });

        prop_assert!(result.success);
        let taken = if flag { "yes" } else { "no" };
        let skipped = if flag { "no" } else { "yes" };
        prop_assert!(result.result(taken).is_some());
        prop_assert!(result.result(skipped).is_none());
        prop_assert_eq!(result.execution_path, vec!["check".to_string(), taken.to_string()]);
    }
}
