//! Plan scheduler
//!
//! Runs a plan in rounds. Each round executes every pending step whose
//! dependencies have completed, up to `max_parallel_steps` at a time, then
//! merges the round's outputs into the variable scope in scheduling order.
//! A DECISION adds only its chosen branch to the pending set. A LOOP runs its
//! body subgraph once per item in a child scope. Any other completed step
//! releases the steps that depend on it.
//!
//! The first unrecovered failure stops the plan. Real runs are journaled in a
//! rollback transaction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use serde_json::{json, Map, Value};
use stepwise_files::{FileSystem, LocalFileSystem};
use stepwise_process::{CommandExecutor, PatternSafetyGate, SafetyGate, ShellCommandExecutor};
use stepwise_rollback::{RollbackManager, TransactionStatus};
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, LoopFailurePolicy};
use crate::context::ExecutionContext;
use crate::error::{EngineError, EngineResult};
use crate::executors::{
    ApiHandler, CodeHandler, CommandHandler, DecisionHandler, ExecutorRegistry, FileHandler,
    StepHandler,
};
use crate::expression::{DefaultEvaluator, ExpressionEvaluator};
use crate::generator::PlanGenerator;
use crate::http::{HttpClient, ReqwestHttpClient};
use crate::journal::MutationJournal;
use crate::models::{
    FailureKind, IterationRecord, Plan, PlanFailure, PlanResult, PlanStatus, Step, StepKind,
    StepResult,
};
use crate::recovery::{Recovery, RecoveryHandler};
use crate::render::{JsonRenderer, ResultRenderer};
use crate::runner::{CodeRunner, SubprocessCodeRunner};
use crate::validation::{gated_steps, PlanValidator};
use crate::variables::VariableScope;

/// Executes plans against injected collaborators
pub struct PlanScheduler {
    config: EngineConfig,
    registry: ExecutorRegistry,
    evaluator: Arc<dyn ExpressionEvaluator>,
    rollback: Option<Arc<RollbackManager>>,
    recovery: Option<Arc<dyn RecoveryHandler>>,
    renderer: Arc<dyn ResultRenderer>,
}

/// Per-run state shared by every frame of one `execute` call
struct Run<'a> {
    plan: &'a Plan,
    gated: HashSet<&'a str>,
    dry_run: bool,
    journal: Option<MutationJournal>,
}

/// Why a graph stopped early
struct Halt {
    kind: FailureKind,
    step_id: Option<String>,
    message: String,
}

/// Outcome of running one graph (the plan, or one loop iteration)
struct GraphRun {
    results: Vec<StepResult>,
    path: Vec<String>,
    scope: Arc<VariableScope>,
    halt: Option<Halt>,
}

/// Scheduling state of one graph
struct Frame {
    scope: Arc<VariableScope>,
    results: Arc<HashMap<String, StepResult>>,
    completed: HashSet<String>,
    local: HashSet<String>,
    scheduled: HashSet<String>,
    pending: Vec<String>,
    path: Vec<String>,
    ordered: Vec<StepResult>,
}

impl Frame {
    fn new(
        scope: Arc<VariableScope>,
        results: Arc<HashMap<String, StepResult>>,
        completed: HashSet<String>,
        seeds: &[String],
    ) -> Self {
        let mut frame = Self {
            scope,
            results,
            completed,
            local: HashSet::new(),
            scheduled: HashSet::new(),
            pending: Vec::new(),
            path: Vec::new(),
            ordered: Vec::new(),
        };
        for id in seeds {
            frame.schedule(id);
        }
        frame
    }

    fn schedule(&mut self, step_id: &str) {
        if self.scheduled.insert(step_id.to_string()) {
            self.pending.push(step_id.to_string());
        }
    }

    fn context(&self, run: &Run<'_>, step_id: &str) -> ExecutionContext {
        ExecutionContext {
            step_id: step_id.to_string(),
            plan_id: run.plan.id.clone(),
            dry_run: run.dry_run,
            scope: self.scope.clone(),
            results: self.results.clone(),
            journal: run.journal.clone(),
        }
    }

    fn record(&mut self, result: StepResult) {
        self.path.push(result.step_id.clone());
        if result.success {
            self.completed.insert(result.step_id.clone());
            self.local.insert(result.step_id.clone());
            let scope = Arc::make_mut(&mut self.scope);
            for (name, value) in &result.outputs {
                scope.set(name.clone(), value.clone(), Some(&result.step_id));
            }
        }
        Arc::make_mut(&mut self.results).insert(result.step_id.clone(), result.clone());
        self.ordered.push(result);
    }

    fn finish(self, halt: Option<Halt>) -> GraphRun {
        GraphRun {
            results: self.ordered,
            path: self.path,
            scope: self.scope,
            halt,
        }
    }
}

impl PlanScheduler {
    /// Start building a scheduler
    pub fn builder() -> PlanSchedulerBuilder {
        PlanSchedulerBuilder::new()
    }

    /// Scheduler with the default collaborators and a rollback manager at the
    /// configured locations
    pub async fn from_config(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        let compensations: Arc<dyn CommandExecutor> = Arc::new(
            ShellCommandExecutor::new()
                .with_shell(config.command.shell.clone())
                .with_timeout(Duration::from_secs(config.command.timeout_secs)),
        );
        let manager = RollbackManager::open(&config.rollback, fs.clone(), compensations).await;

        PlanSchedulerBuilder::new()
            .config(config)
            .file_system(fs)
            .rollback_manager(Arc::new(manager))
            .build()
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Rollback manager runs are journaled into, if any
    pub fn rollback_manager(&self) -> Option<&Arc<RollbackManager>> {
        self.rollback.as_ref()
    }

    /// Render a result with the configured renderer
    pub fn render(&self, result: &PlanResult) -> String {
        self.renderer.render(result)
    }

    /// Ask `generator` for a plan for `goal` and execute it
    ///
    /// A generator error yields a rejected result with an empty `plan_id`.
    pub async fn execute_goal(
        &self,
        generator: &dyn PlanGenerator,
        goal: &str,
        context: &Map<String, Value>,
        dry_run: bool,
    ) -> PlanResult {
        match generator.generate(goal, context).await {
            Ok(plan) => self.execute(&plan, dry_run, None).await,
            Err(e) => {
                error!(goal = %goal, error = %e, "Plan generation failed");
                PlanResult::not_started(
                    String::new(),
                    0,
                    PlanStatus::Rejected,
                    FailureKind::Validation,
                    e.to_string(),
                    dry_run,
                )
            }
        }
    }

    /// Execute `plan`
    ///
    /// # Arguments
    ///
    /// * `plan` - Plan to run
    /// * `dry_run` - Simulate every step instead of performing it
    /// * `transaction_id` - Journal into this open transaction instead of a
    ///   new one. The caller closes it.
    ///
    /// # Returns
    ///
    /// The result tree. Failures are reported in it, never as a panic.
    ///
    /// # Examples
    ///
    /// ```
    /// use stepwise_engine::{Plan, PlanScheduler, PlanStatus, Step};
    ///
    /// # tokio_test::block_on(async {
    /// let scheduler = PlanScheduler::builder().build().unwrap();
    /// let plan = Plan::new("rehearse")
    ///     .with_step(Step::command("clean", "rm -rf build"))
    ///     .with_entry_point("clean");
    ///
    /// let result = scheduler.execute(&plan, true, None).await;
    /// assert_eq!(result.status, PlanStatus::Completed);
    /// assert!(result.transaction_id.is_none());
    /// # });
    /// ```
    pub async fn execute(
        &self,
        plan: &Plan,
        dry_run: bool,
        transaction_id: Option<&str>,
    ) -> PlanResult {
        let clock = Instant::now();
        let steps_total = plan.steps.len();

        info!(
            plan_id = %plan.id,
            goal = %plan.goal,
            steps = steps_total,
            dry_run,
            "Plan execution started"
        );

        if let Err(e) = PlanValidator::validate(plan) {
            warn!(plan_id = %plan.id, error = %e, "Plan rejected");
            return PlanResult::not_started(
                &plan.id,
                steps_total,
                PlanStatus::Rejected,
                FailureKind::Validation,
                e.to_string(),
                dry_run,
            );
        }
        if let Err(e) = PlanValidator::detect_cycles(plan) {
            error!(plan_id = %plan.id, error = %e, "Plan graph is cyclic");
            return PlanResult::not_started(
                &plan.id,
                steps_total,
                PlanStatus::Failed,
                FailureKind::Graph,
                e.to_string(),
                dry_run,
            );
        }

        let (journal, owned) = match self.open_journal(plan, dry_run, transaction_id).await {
            Ok(opened) => opened,
            Err(e) => {
                error!(plan_id = %plan.id, error = %e, "Could not journal plan run");
                return PlanResult::not_started(
                    &plan.id,
                    steps_total,
                    PlanStatus::Failed,
                    FailureKind::Rollback,
                    e.to_string(),
                    dry_run,
                );
            }
        };

        let run = Run {
            plan,
            gated: gated_steps(plan),
            dry_run,
            journal,
        };
        let frame = Frame::new(
            Arc::new(VariableScope::from_context(&plan.context)),
            Arc::new(HashMap::new()),
            HashSet::new(),
            &plan.entry_points,
        );
        let outcome = self.run_graph(&run, frame).await;

        let status = match &outcome.halt {
            None => PlanStatus::Completed,
            Some(halt) if halt.kind == FailureKind::Cancelled => PlanStatus::Cancelled,
            Some(_) => PlanStatus::Failed,
        };

        let mut rollback = None;
        if let (Some(manager), Some(tx)) = (&self.rollback, &owned) {
            let tx_status = match status {
                PlanStatus::Completed => TransactionStatus::Completed,
                PlanStatus::Cancelled => TransactionStatus::Cancelled,
                _ => TransactionStatus::Failed,
            };
            manager.end_transaction(tx, tx_status).await;

            if status != PlanStatus::Completed && self.config.rollback_on_failure {
                let summary = manager.rollback_transaction(tx).await;
                info!(
                    plan_id = %plan.id,
                    transaction_id = %tx,
                    rolled_back = summary.rolled_back,
                    failed = summary.failed,
                    "Plan changes rolled back"
                );
                rollback = Some(summary);
            }
        }

        let steps_completed = outcome.results.iter().filter(|r| r.success).count();
        let (failed_step, error) = match outcome.halt {
            Some(halt) => (
                halt.step_id,
                Some(PlanFailure {
                    kind: halt.kind,
                    message: halt.message,
                }),
            ),
            None => (None, None),
        };
        let duration_ms = clock.elapsed().as_millis() as u64;

        match &error {
            None => info!(plan_id = %plan.id, steps_completed, duration_ms, "Plan completed"),
            Some(failure) => error!(
                plan_id = %plan.id,
                failed_step = ?failed_step,
                kind = ?failure.kind,
                error = %failure.message,
                "Plan failed"
            ),
        }

        PlanResult {
            plan_id: plan.id.clone(),
            success: error.is_none(),
            status,
            steps_completed,
            steps_total,
            results: outcome.results,
            failed_step,
            error,
            execution_path: outcome.path,
            variables: outcome.scope.snapshot(),
            transaction_id: run
                .journal
                .as_ref()
                .and_then(|j| j.transaction_id().map(str::to_string)),
            rollback,
            dry_run,
            duration_ms,
        }
    }

    /// Journal for a real run, plus the transaction id if this run owns it
    async fn open_journal(
        &self,
        plan: &Plan,
        dry_run: bool,
        transaction_id: Option<&str>,
    ) -> EngineResult<(Option<MutationJournal>, Option<String>)> {
        let Some(manager) = self.rollback.as_ref().filter(|_| !dry_run) else {
            return Ok((None, None));
        };

        let (tx, owned) = match transaction_id {
            Some(id) => (id.to_string(), None),
            None => {
                let description = format!("plan {}: {}", plan.id, plan.goal);
                let id = manager.start_transaction(&description).await?;
                (id.clone(), Some(id))
            }
        };

        if let Err(e) = manager
            .record_plan_execution(&plan.id, &plan.goal, Some(&tx))
            .await
        {
            if let Some(id) = &owned {
                manager.end_transaction(id, TransactionStatus::Failed).await;
            }
            return Err(e.into());
        }

        debug!(plan_id = %plan.id, transaction_id = %tx, "Plan run journaled");
        Ok((Some(MutationJournal::new(manager.clone(), Some(tx))), owned))
    }

    fn run_graph<'a>(&'a self, run: &'a Run<'a>, mut frame: Frame) -> BoxFuture<'a, GraphRun> {
        async move {
            let mut round = 0usize;
            loop {
                if frame.pending.is_empty() {
                    return frame.finish(None);
                }

                let (ready, blocked): (Vec<String>, Vec<String>) = std::mem::take(&mut frame.pending)
                    .into_iter()
                    .partition(|id| {
                        run.plan.step(id).is_some_and(|step| {
                            step.dependencies.iter().all(|d| frame.completed.contains(d))
                        })
                    });

                if ready.is_empty() {
                    let message = format!("steps can never become ready: {}", blocked.join(", "));
                    error!(plan_id = %run.plan.id, pending = ?blocked, "Scheduling stalled");
                    return frame.finish(Some(Halt {
                        kind: FailureKind::Graph,
                        step_id: None,
                        message,
                    }));
                }
                frame.pending = blocked;
                round += 1;

                info!(plan_id = %run.plan.id, round, steps = ?ready, "Executing round");

                let jobs: Vec<_> = ready
                    .iter()
                    .filter_map(|id| run.plan.step(id))
                    .map(|step| self.run_step(run, step, frame.context(run, &step.id)))
                    .collect();
                let results: Vec<StepResult> = futures::stream::iter(jobs)
                    .buffered(self.config.max_parallel_steps.max(1))
                    .collect()
                    .await;

                let mut halt = None;
                for result in results {
                    let Some(step) = run.plan.step(&result.step_id) else {
                        continue;
                    };
                    if result.success {
                        if let StepKind::Decision {
                            true_branch,
                            false_branch,
                            ..
                        } = &step.kind
                        {
                            let outcome = result
                                .output("condition_result")
                                .and_then(Value::as_bool)
                                .unwrap_or(false);
                            let branch = if outcome { true_branch } else { false_branch };
                            for id in branch {
                                frame.schedule(id);
                            }
                        }
                    } else if halt.is_none() {
                        halt = Some(self.halt_for(step, &result));
                    }
                    frame.record(result);
                }

                if halt.is_some() {
                    return frame.finish(halt);
                }

                for step in &run.plan.steps {
                    if run.gated.contains(step.id.as_str())
                        || frame.scheduled.contains(&step.id)
                        || step.dependencies.is_empty()
                    {
                        continue;
                    }
                    let satisfied = step.dependencies.iter().all(|d| frame.completed.contains(d));
                    let released = step.dependencies.iter().any(|d| frame.local.contains(d));
                    if satisfied && released {
                        frame.schedule(&step.id);
                    }
                }
            }
        }
        .boxed()
    }

    fn halt_for(&self, step: &Step, result: &StepResult) -> Halt {
        let message = result
            .error
            .clone()
            .unwrap_or_else(|| format!("step {} failed", step.id));
        let (kind, message) = if result.cancelled {
            (FailureKind::Cancelled, message)
        } else if step.retry > 0 || self.recovery.is_some() {
            let exhausted = EngineError::RecoveryExhausted {
                step_id: step.id.clone(),
                message,
            };
            (FailureKind::RecoveryExhausted, exhausted.to_string())
        } else {
            (FailureKind::Step, message)
        };
        Halt {
            kind,
            step_id: Some(step.id.clone()),
            message,
        }
    }

    /// Substitute, run with retries, then fall back to recovery
    async fn run_step(&self, run: &Run<'_>, step: &Step, ctx: ExecutionContext) -> StepResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let step = ctx.scope.substitute_step(step);

        debug!(step_id = %step.id, step_type = %step.step_type(), "Step started");

        let mut result = self.attempt(run, &step, &ctx).await;
        let mut retries = 0;
        while !result.success && !result.cancelled && retries < step.retry {
            retries += 1;
            warn!(
                step_id = %step.id,
                attempt = retries + 1,
                error = ?result.error,
                "Retrying step"
            );
            tokio::time::sleep(self.config.retry_delay()).await;
            result = self.attempt(run, &step, &ctx).await;
        }

        if !result.success && !result.cancelled {
            if let Some(handler) = &self.recovery {
                result = self.recover(run, handler.as_ref(), &step, &ctx, result).await;
            }
        }

        result.retries = retries;
        result.started_at = started_at;
        result.duration_ms = clock.elapsed().as_millis() as u64;

        if result.success {
            debug!(step_id = %step.id, duration_ms = result.duration_ms, "Step succeeded");
        } else {
            error!(step_id = %step.id, error = ?result.error, "Step failed");
        }
        result
    }

    async fn recover(
        &self,
        run: &Run<'_>,
        handler: &dyn RecoveryHandler,
        step: &Step,
        ctx: &ExecutionContext,
        failure: StepResult,
    ) -> StepResult {
        match handler.recover(step, ctx, &failure).await {
            Some(Recovery::Substitute(kind)) => {
                info!(step_id = %step.id, "Running substitute from recovery handler");
                let replacement = Step {
                    kind,
                    ..step.clone()
                };
                let mut result = self.attempt(run, &replacement, ctx).await;
                result.recovery_applied = true;
                result
            }
            Some(Recovery::Outputs(outputs)) => {
                info!(step_id = %step.id, "Recovery handler supplied outputs");
                let mut result = StepResult::success(step);
                for (field, value) in outputs {
                    result = result.with_output(&field, value);
                }
                result.recovery_applied = true;
                result
            }
            None => failure,
        }
    }

    /// One attempt under the step's time budget
    async fn attempt(&self, run: &Run<'_>, step: &Step, ctx: &ExecutionContext) -> StepResult {
        let budget = match step.kind {
            StepKind::Loop { .. } => step.timeout,
            _ => step.timeout.or(self.config.default_step_timeout_secs),
        };

        let work = async {
            match step.kind {
                StepKind::Loop { .. } => self.execute_loop(run, step, ctx).await,
                _ => self.registry.dispatch(step, ctx).await,
            }
        };

        match budget {
            Some(seconds) => match tokio::time::timeout(Duration::from_secs(seconds), work).await {
                Ok(result) => result,
                Err(_) => {
                    let error = EngineError::Timeout {
                        step_id: step.id.clone(),
                        seconds,
                    };
                    StepResult::failure(step, error.to_string())
                }
            },
            None => work.await,
        }
    }

    async fn execute_loop(&self, run: &Run<'_>, step: &Step, ctx: &ExecutionContext) -> StepResult {
        let StepKind::Loop {
            loop_items,
            loop_body,
        } = &step.kind
        else {
            return StepResult::failure(step, format!("expected LOOP payload, got {}", step.step_type()));
        };

        let items = match self.evaluator.resolve_items(loop_items, &ctx.scope).await {
            Ok(items) => items,
            Err(e) => return StepResult::failure(step, e.to_string()),
        };
        let total = items.len();
        info!(step_id = %step.id, iterations = total, "Loop started");

        let mut completed: HashSet<String> = ctx
            .results
            .values()
            .filter(|r| r.success)
            .map(|r| r.step_id.clone())
            .collect();
        completed.insert(step.id.clone());

        let mut records: Vec<IterationRecord> = Vec::with_capacity(total);
        let mut cancelled = false;
        for (index, item) in items.into_iter().enumerate() {
            let mut scope = VariableScope::child(ctx.scope.clone());
            scope.set("loop_item", item.clone(), Some(&step.id));
            scope.set("loop_index", json!(index), Some(&step.id));

            let frame = Frame::new(
                Arc::new(scope),
                ctx.results.clone(),
                completed.clone(),
                loop_body,
            );
            let outcome = self.run_graph(run, frame).await;

            let halted_by_gate = outcome
                .halt
                .as_ref()
                .is_some_and(|h| h.kind == FailureKind::Cancelled);
            let record = IterationRecord {
                index,
                item,
                success: outcome.halt.is_none(),
                error: outcome.halt.map(|h| h.message),
                results: outcome.results,
            };
            debug!(step_id = %step.id, index, success = record.success, "Iteration finished");

            let failed = !record.success;
            records.push(record);

            if halted_by_gate {
                cancelled = true;
                break;
            }
            if failed && self.config.loop_failure_policy == LoopFailurePolicy::FailFast {
                warn!(step_id = %step.id, index, "Stopping loop after failed iteration");
                break;
            }
        }

        let failures = records.iter().filter(|r| !r.success).count();
        let mut result = if cancelled {
            StepResult::cancelled(step, format!("iteration {} was vetoed", records.len() - 1))
        } else if failures > 0 {
            StepResult::failure(step, format!("{} of {} iterations failed", failures, total))
        } else {
            StepResult::success(step)
        };

        result = result
            .with_output("iterations", records.len())
            .with_output("loop_results", serde_json::to_value(&records).unwrap_or_default());
        result
    }
}

/// Builds a [`PlanScheduler`], defaulting every collaborator not supplied
pub struct PlanSchedulerBuilder {
    config: EngineConfig,
    command_executor: Option<Arc<dyn CommandExecutor>>,
    file_system: Option<Arc<dyn FileSystem>>,
    safety_gate: Option<Arc<dyn SafetyGate>>,
    code_runner: Option<Arc<dyn CodeRunner>>,
    http_client: Option<Arc<dyn HttpClient>>,
    rollback: Option<Arc<RollbackManager>>,
    recovery: Option<Arc<dyn RecoveryHandler>>,
    renderer: Option<Arc<dyn ResultRenderer>>,
    evaluator: Option<Arc<dyn ExpressionEvaluator>>,
    handlers: Vec<Arc<dyn StepHandler>>,
}

impl PlanSchedulerBuilder {
    /// Builder with default configuration and no collaborators
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            command_executor: None,
            file_system: None,
            safety_gate: None,
            code_runner: None,
            http_client: None,
            rollback: None,
            recovery: None,
            renderer: None,
            evaluator: None,
            handlers: Vec::new(),
        }
    }

    /// Engine configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Executor for COMMAND steps
    ///
    /// A supplied executor does its own safety checks. The default is a shell
    /// executor wired to the safety gate.
    pub fn command_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.command_executor = Some(executor);
        self
    }

    /// Filesystem for FILE steps and file conditions
    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Gate consulted before mutations
    pub fn safety_gate(mut self, gate: Arc<dyn SafetyGate>) -> Self {
        self.safety_gate = Some(gate);
        self
    }

    /// Runner for CODE steps
    pub fn code_runner(mut self, runner: Arc<dyn CodeRunner>) -> Self {
        self.code_runner = Some(runner);
        self
    }

    /// Client for API steps
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Journal real runs into `manager`
    pub fn rollback_manager(mut self, manager: Arc<RollbackManager>) -> Self {
        self.rollback = Some(manager);
        self
    }

    /// Consult `handler` when a step's retries are exhausted
    pub fn recovery_handler(mut self, handler: Arc<dyn RecoveryHandler>) -> Self {
        self.recovery = Some(handler);
        self
    }

    /// Renderer used by [`PlanScheduler::render`]
    pub fn renderer(mut self, renderer: Arc<dyn ResultRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Evaluator for conditions and loop items
    pub fn evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Register a handler, replacing the built-in one for its step type
    pub fn handler(mut self, handler: Arc<dyn StepHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Validate the configuration and assemble the scheduler
    pub fn build(self) -> EngineResult<PlanScheduler> {
        let config = self.config;
        config.validate()?;

        let gate = self
            .safety_gate
            .unwrap_or_else(|| Arc::new(PatternSafetyGate::with_defaults()));
        let fs = self
            .file_system
            .unwrap_or_else(|| Arc::new(LocalFileSystem::new()));
        let commands = self.command_executor.unwrap_or_else(|| {
            let mut executor = ShellCommandExecutor::new()
                .with_shell(config.command.shell.clone())
                .with_timeout(Duration::from_secs(config.command.timeout_secs))
                .with_safety_gate(gate.clone());
            if let Some(dir) = &config.command.workdir {
                executor = executor.with_workdir(dir.clone());
            }
            Arc::new(executor)
        });
        let runner = self
            .code_runner
            .unwrap_or_else(|| Arc::new(SubprocessCodeRunner::new()));
        let http = match self.http_client {
            Some(client) => client,
            None => Arc::new(ReqwestHttpClient::new(Duration::from_secs(
                config.command.timeout_secs,
            ))?),
        };
        let evaluator = self
            .evaluator
            .unwrap_or_else(|| {
                Arc::new(DefaultEvaluator::new(fs.clone()).with_max_items(config.max_loop_items))
            });

        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(
            CommandHandler::new(commands).with_workdir(config.command.workdir.clone()),
        ));
        registry.register(Arc::new(CodeHandler::new(runner)));
        registry.register(Arc::new(FileHandler::new(fs, gate.clone())));
        registry.register(Arc::new(DecisionHandler::new(evaluator.clone())));
        registry.register(Arc::new(ApiHandler::new(http, gate)));
        for handler in self.handlers {
            registry.register(handler);
        }

        Ok(PlanScheduler {
            config,
            registry,
            evaluator,
            rollback: self.rollback,
            recovery: self.recovery,
            renderer: self
                .renderer
                .unwrap_or_else(|| Arc::new(JsonRenderer::new())),
        })
    }
}

impl Default for PlanSchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
