//! Flow engine - the top-level task state machine.
//!
//! One `process` call drives a task through classify -> draft -> validate
//! with bounded revision loops, under a single deadline that every
//! collaborator call inherits. Tasks progress in parallel; within a task
//! the stages are sequential. The engine holds no task-store lock across
//! any collaborator call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use forecourt_agents::{
    Dispatcher, SeniorSpecialist, StandardSpecialist, ValidationContext, Validator,
    MAX_SOURCES_PER_DRAFT,
};
use forecourt_config::FlowConfig;
use forecourt_core::agent::{AgentError, DraftContext, Specialist, ValidationDecision};
use forecourt_core::client::{ModelClient, WarehouseClient};
use forecourt_core::fingerprint::Fingerprint;
use forecourt_core::store::{StoreError, TaskStore};
use forecourt_core::types::{
    Complexity, DraftContent, FlowFailure, InsightRequest, InsightResponse, SpecialistKind, Task,
    TaskId, TaskLifecycleEvent, TaskStatus,
};
use forecourt_stores::{BroadcastLifecycleBus, InMemoryTaskStore, InsightCache, LifecycleBus};

use crate::metrics::{FlowMetrics, MetricsSnapshot};

type FlowOutcome = Result<InsightResponse, FlowFailure>;

/// Why the pipeline stopped before delivering.
enum PipelineAbort {
    /// The task deadline passed (or a sub-call was cancelled by it).
    Deadline,
    /// A typed failure already reflected in the task record.
    Failure(FlowFailure),
}

/// Outcome of the in-flight coalescing check under the map lock.
enum Coalesce {
    /// Another caller is already running this fingerprint; join its broadcast.
    Existing(broadcast::Receiver<FlowOutcome>),
    /// No runner yet; this caller registers as one.
    New(broadcast::Sender<FlowOutcome>),
}

/// Condensed task view for status inspection.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub complexity: Option<Complexity>,
    pub draft_count: usize,
    pub has_validated_draft: bool,
    pub revisions_used: u32,
}

/// The hierarchical flow orchestrator.
pub struct FlowEngine {
    config: FlowConfig,
    task_store: Arc<dyn TaskStore>,
    cache: InsightCache,
    dispatcher: Dispatcher,
    standard: StandardSpecialist,
    senior: SeniorSpecialist,
    validator: Validator,
    lifecycle: Arc<dyn LifecycleBus>,
    metrics: FlowMetrics,
    inflight: Mutex<HashMap<String, broadcast::Sender<FlowOutcome>>>,
    active: AtomicUsize,
}

impl FlowEngine {
    /// Build an engine over the given collaborator handles. Stores and the
    /// lifecycle bus are process-local.
    pub fn new(
        config: FlowConfig,
        model: Arc<dyn ModelClient>,
        warehouse: Arc<dyn WarehouseClient>,
    ) -> Self {
        let cache = InsightCache::new(config.cache_capacity, config.cache_ttl());
        Self {
            dispatcher: Dispatcher::new(model.clone()),
            standard: StandardSpecialist::new(model.clone(), warehouse.clone()),
            senior: SeniorSpecialist::new(model.clone(), warehouse),
            validator: Validator::new(model, config.thresholds, config.min_axis_score),
            task_store: Arc::new(InMemoryTaskStore::new()),
            lifecycle: Arc::new(BroadcastLifecycleBus::default()),
            cache,
            metrics: FlowMetrics::default(),
            inflight: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            config,
        }
    }

    /// Process one query end to end.
    pub async fn process(
        &self,
        request: InsightRequest,
    ) -> Result<InsightResponse, FlowFailure> {
        self.metrics.record_arrival();

        if let Err(detail) = request.validate() {
            self.metrics.record_invalid();
            return Err(FlowFailure::InvalidRequest { detail });
        }

        let fingerprint = Fingerprint::compute(
            &request.query,
            request.tenant_id.trim(),
            &request.context,
            &self.config.cache_context_keys,
        );

        if let Some(mut response) = self.cache.lookup(&fingerprint) {
            response.metadata.cached = true;
            self.metrics.record_cache_hit();
            info!(task_id = %response.metadata.task_id, "cache hit, returning stored insight");
            return Ok(response);
        }

        // Coalescing: join an in-flight task for the same fingerprint, or
        // register as the runner. Subscription happens under the map lock
        // so a joiner can never miss the runner's broadcast.
        let coalesce = {
            let mut inflight = self.inflight.lock().expect("inflight lock poisoned");
            if let Some(tx) = inflight.get(fingerprint.as_str()) {
                Coalesce::Existing(tx.subscribe())
            } else {
                let (tx, _) = broadcast::channel(1);
                inflight.insert(fingerprint.as_str().to_string(), tx.clone());
                Coalesce::New(tx)
            }
        };

        let tx = match coalesce {
            Coalesce::Existing(mut rx) => {
                self.metrics.record_coalesced();
                return match rx.recv().await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(FlowFailure::Overloaded {
                        retry_after_ms: self.config.overload_retry_after_ms,
                    }),
                };
            }
            Coalesce::New(tx) => tx,
        };

        let outcome = self.admit_and_run(&request, &fingerprint).await;

        {
            let mut inflight = self.inflight.lock().expect("inflight lock poisoned");
            inflight.remove(fingerprint.as_str());
        }
        let _ = tx.send(outcome.clone());

        outcome
    }

    /// Snapshot of one task's progress, if it is still retained.
    pub async fn task_status(&self, task_id: &str) -> Option<TaskSnapshot> {
        let task = self.task_store.get(task_id).await.ok()?;
        Some(TaskSnapshot {
            task_id: task.id.clone(),
            status: task.status,
            complexity: task.complexity,
            draft_count: task.drafts.len(),
            has_validated_draft: task.validated_draft.is_some(),
            revisions_used: task.revisions_used,
        })
    }

    /// Read-only engine metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.active.load(Ordering::SeqCst))
    }

    /// The validator's audit counters.
    pub fn audit_summary(&self) -> forecourt_agents::AuditSummary {
        self.validator.audit_summary()
    }

    /// Follow task lifecycle transitions as they happen.
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<TaskLifecycleEvent> {
        self.lifecycle.subscribe()
    }

    async fn admit_and_run(
        &self,
        request: &InsightRequest,
        fingerprint: &Fingerprint,
    ) -> FlowOutcome {
        // Admission control: bounded in-flight tasks, reject beyond the cap.
        let admitted = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < self.config.max_active_tasks).then_some(current + 1)
            })
            .is_ok();
        if !admitted {
            self.metrics.record_overloaded();
            warn!("active task cap reached, rejecting arrival");
            return Err(FlowFailure::Overloaded {
                retry_after_ms: self.config.overload_retry_after_ms,
            });
        }

        let started = Instant::now();
        let outcome = self.run_flow(request, fingerprint, started).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.metrics.record_latency(started.elapsed());

        match &outcome {
            Ok(response) => self.metrics.record_delivered(response.metadata.revisions_used),
            Err(FlowFailure::QualityRejected { .. }) => self.metrics.record_rejected(),
            Err(FlowFailure::TimedOut { .. }) => self.metrics.record_timed_out(),
            Err(FlowFailure::Overloaded { .. }) => self.metrics.record_overloaded(),
            Err(_) => self.metrics.record_failed(),
        }
        outcome
    }

    async fn run_flow(
        &self,
        request: &InsightRequest,
        fingerprint: &Fingerprint,
        started: Instant,
    ) -> FlowOutcome {
        let timeout_ms = request.effective_timeout_ms(self.config.query_timeout_ms);
        let timeout = Duration::from_millis(timeout_ms);
        let deadline = started + timeout;
        let cancel = CancellationToken::new();

        let task = Task::new(
            request.query.trim(),
            request.tenant_id.trim(),
            request.context.clone(),
            fingerprint.clone(),
            chrono::Utc::now() + chrono::Duration::milliseconds(timeout_ms as i64),
        );
        let task_id = task.id.clone();
        if let Err(e) = self.task_store.create(task).await {
            error!(task_id = %task_id, error = %e, "task creation failed");
            return Err(FlowFailure::ClassificationFailed { task_id });
        }
        info!(task_id = %task_id, query_len = request.query.len(), "task created");

        let result = tokio::select! {
            outcome = self.pipeline(&task_id, fingerprint, cancel.clone(), deadline) => outcome,
            _ = tokio::time::sleep(timeout) => Err(PipelineAbort::Deadline),
        };

        match result {
            Ok(response) => Ok(response),
            Err(PipelineAbort::Failure(failure)) => Err(failure),
            Err(PipelineAbort::Deadline) => {
                // Cancel outstanding sub-calls, then settle the record.
                cancel.cancel();
                self.settle_timed_out(&task_id).await;
                Err(FlowFailure::TimedOut {
                    task_id,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }

    async fn pipeline(
        &self,
        task_id: &TaskId,
        fingerprint: &Fingerprint,
        cancel: CancellationToken,
        deadline: Instant,
    ) -> Result<InsightResponse, PipelineAbort> {
        // Tier 1: classification
        self.transition(task_id, TaskStatus::Analyzing).await?;
        let task = self.get_task(task_id).await?;
        let classify = match self
            .dispatcher
            .classify(&task, cancel.clone(), Some(deadline))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.agent_abort(task_id, e, deadline).await),
        };
        let classification = classify.classification.clone();

        self.update_task(task_id, {
            let classification = classify.classification;
            let warning = classify.warning;
            Box::new(move |task: &mut Task| {
                task.complexity = Some(classification.complexity);
                if let Some(warning) = warning {
                    task.record_error("classification_malformed", warning);
                }
                Ok(())
            })
        })
        .await?;
        self.metrics.record_complexity(classification.complexity);

        // Tier 2 <-> Tier 3: draft/validate with bounded revision loops
        let mut revision_feedback: Vec<String> = Vec::new();
        let mut previous: Option<DraftContent> = None;

        loop {
            // A revision loop that crosses the deadline times out rather
            // than burning the remaining budget on doomed sub-calls.
            if Instant::now() >= deadline {
                return Err(PipelineAbort::Deadline);
            }

            self.transition(task_id, TaskStatus::Generating).await?;
            let task = self.get_task(task_id).await?;

            let ctx = DraftContext {
                task_id: task_id.clone(),
                query: task.query.clone(),
                tenant_id: task.tenant_id.clone(),
                complexity: classification.complexity,
                required_data_sources: classification.required_data_sources.clone(),
                revision_feedback: revision_feedback.clone(),
                previous: previous.clone(),
                max_rows_in_prompt: self.config.max_rows_in_prompt,
                row_limit: self.config.warehouse_row_limit,
                cancel: cancel.clone(),
                deadline: Some(deadline),
            };

            let specialist = self.specialist_for(classification.specialist);
            let draft = match specialist.draft(&ctx).await {
                Ok(draft) => draft,
                Err(e) => return Err(self.agent_abort(task_id, e, deadline).await),
            };

            let planned = classification
                .required_data_sources
                .len()
                .min(MAX_SOURCES_PER_DRAFT);
            let executed = draft.queries_executed.len();
            let draft_content = draft.content.clone();
            self.update_task(task_id, {
                let draft = draft.clone();
                Box::new(move |task: &mut Task| {
                    if executed < planned {
                        task.record_error(
                            "partial_data",
                            format!("{executed} of {planned} data sources read"),
                        );
                    }
                    task.push_draft(draft)
                })
            })
            .await?;

            // Tier 3: validation
            self.transition(task_id, TaskStatus::Validating).await?;
            let task = self.get_task(task_id).await?;
            let vctx = ValidationContext {
                task_id: task_id.clone(),
                query: task.query.clone(),
                complexity: classification.complexity,
                revisions_used: task.revisions_used,
                max_revisions: self.config.max_revisions,
                cancel: cancel.clone(),
                deadline: Some(deadline),
            };
            let verdict = match self.validator.validate(&vctx, &draft).await {
                Ok(verdict) => verdict,
                Err(e) => return Err(self.agent_abort(task_id, e, deadline).await),
            };

            let draft_index = task.drafts.len().saturating_sub(1);
            self.update_task(task_id, {
                let scores = verdict.scores;
                let quality = verdict.quality_score;
                let feedback = verdict.feedback.clone();
                Box::new(move |task: &mut Task| {
                    let draft = task.drafts.get_mut(draft_index).ok_or_else(|| {
                        StoreError::PreconditionFailed(format!(
                            "draft {draft_index} missing during validation"
                        ))
                    })?;
                    draft.validation = Some(scores);
                    draft.quality_score = Some(quality);
                    draft.feedback = feedback;
                    Ok(())
                })
            })
            .await?;

            match verdict.decision {
                ValidationDecision::Approve => {
                    self.update_task(
                        task_id,
                        Box::new(move |task: &mut Task| task.set_validated(draft_index)),
                    )
                    .await?;
                    self.transition(task_id, TaskStatus::Approved).await?;

                    let task = self.get_task(task_id).await?;
                    let Some(validated) = task.validated() else {
                        error!(task_id = %task_id, "approved task has no validated draft");
                        return Err(PipelineAbort::Failure(FlowFailure::SpecialistFailed {
                            task_id: task_id.clone(),
                        }));
                    };
                    let response = self.dispatcher.format(&task, validated, false);

                    self.cache.store(fingerprint, response.clone());
                    self.transition(task_id, TaskStatus::Delivered).await?;
                    info!(
                        task_id = %task_id,
                        quality = verdict.quality_score,
                        revisions = task.revisions_used,
                        "insight delivered"
                    );
                    return Ok(response);
                }
                ValidationDecision::Revise => {
                    self.update_task(
                        task_id,
                        Box::new(|task: &mut Task| {
                            task.transition(TaskStatus::Revising)?;
                            task.revisions_used += 1;
                            Ok(())
                        }),
                    )
                    .await?;
                    self.publish_transition(task_id, TaskStatus::Validating, TaskStatus::Revising)
                        .await;
                    revision_feedback = verdict.feedback;
                    previous = Some(draft_content);
                }
                ValidationDecision::Reject => {
                    self.transition(task_id, TaskStatus::Rejected).await?;
                    let task = self.get_task(task_id).await?;
                    return Err(PipelineAbort::Failure(FlowFailure::QualityRejected {
                        task_id: task_id.clone(),
                        last_feedback: verdict.feedback,
                        revisions_used: task.revisions_used,
                    }));
                }
            }
        }
    }

    fn specialist_for(&self, kind: SpecialistKind) -> &dyn Specialist {
        match kind {
            SpecialistKind::Standard => &self.standard,
            SpecialistKind::Senior => &self.senior,
        }
    }

    /// Map a tier error to an abort, settling the task record on the way.
    async fn agent_abort(
        &self,
        task_id: &TaskId,
        error: AgentError,
        deadline: Instant,
    ) -> PipelineAbort {
        use forecourt_core::client::{ModelError, WarehouseError};

        // A sub-call that dies at the deadline is a task timeout, not an
        // upstream outage.
        let deadline_passed = Instant::now() >= deadline;
        let failure = match &error {
            AgentError::Model(ModelError::Cancelled)
            | AgentError::Warehouse(WarehouseError::Cancelled) => return PipelineAbort::Deadline,
            _ if deadline_passed => return PipelineAbort::Deadline,
            AgentError::ClassificationFailed(_) => FlowFailure::ClassificationFailed {
                task_id: task_id.clone(),
            },
            AgentError::SpecialistFailed(_) => FlowFailure::SpecialistFailed {
                task_id: task_id.clone(),
            },
            AgentError::Model(_) => FlowFailure::ModelUnavailable {
                task_id: task_id.clone(),
            },
            AgentError::Warehouse(_) => FlowFailure::WarehouseUnavailable {
                task_id: task_id.clone(),
            },
            AgentError::Store(e) => {
                error!(task_id = %task_id, error = %e, "store invariant violated");
                FlowFailure::SpecialistFailed {
                    task_id: task_id.clone(),
                }
            }
        };

        self.fail_task(task_id, &error).await;
        PipelineAbort::Failure(failure)
    }

    async fn fail_task(&self, task_id: &TaskId, error: &AgentError) {
        let from = match self.task_store.get(task_id).await {
            Ok(task) => task.status,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "could not settle failed task");
                return;
            }
        };
        let message = error.to_string();
        let result = self
            .task_store
            .update(
                task_id,
                Box::new(move |task: &mut Task| {
                    task.record_error("fatal", message);
                    task.transition(TaskStatus::Failed)
                }),
            )
            .await;
        match result {
            Ok(_) => self.publish_transition(task_id, from, TaskStatus::Failed).await,
            Err(e) => warn!(task_id = %task_id, error = %e, "could not settle failed task"),
        }
    }

    async fn settle_timed_out(&self, task_id: &TaskId) {
        let from = match self.task_store.get(task_id).await {
            Ok(task) if !task.status.is_terminal() => task.status,
            Ok(_) => return,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "could not settle timed-out task");
                return;
            }
        };
        let result = self
            .task_store
            .update(
                task_id,
                Box::new(|task: &mut Task| {
                    if task.status.is_terminal() {
                        return Ok(());
                    }
                    task.transition(TaskStatus::TimedOut)
                }),
            )
            .await;
        match result {
            Ok(task) if task.status == TaskStatus::TimedOut => {
                self.publish_transition(task_id, from, TaskStatus::TimedOut).await;
            }
            Ok(_) => {}
            Err(e) => warn!(task_id = %task_id, error = %e, "could not settle timed-out task"),
        }
    }

    async fn get_task(&self, task_id: &TaskId) -> Result<Task, PipelineAbort> {
        self.task_store
            .get(task_id)
            .await
            .map_err(|e| self.store_abort(task_id, e))
    }

    async fn update_task(
        &self,
        task_id: &TaskId,
        mutate: forecourt_core::store::TaskMutator<'_>,
    ) -> Result<Task, PipelineAbort> {
        self.task_store
            .update(task_id, mutate)
            .await
            .map_err(|e| self.store_abort(task_id, e))
    }

    /// Guarded transition plus lifecycle publication.
    async fn transition(
        &self,
        task_id: &TaskId,
        to: TaskStatus,
    ) -> Result<Task, PipelineAbort> {
        let from = self
            .task_store
            .get(task_id)
            .await
            .map(|t| t.status)
            .map_err(|e| self.store_abort(task_id, e))?;
        let task = self
            .task_store
            .update(task_id, Box::new(move |task: &mut Task| task.transition(to)))
            .await
            .map_err(|e| self.store_abort(task_id, e))?;
        self.publish_transition(task_id, from, to).await;
        Ok(task)
    }

    async fn publish_transition(&self, task_id: &TaskId, from: TaskStatus, to: TaskStatus) {
        let _ = self
            .lifecycle
            .publish(TaskLifecycleEvent::new(task_id.clone(), from, to))
            .await;
    }

    fn store_abort(&self, task_id: &TaskId, error: StoreError) -> PipelineAbort {
        // Never caller-facing as such; log and surface a generic failure.
        error!(task_id = %task_id, error = %error, "store operation failed mid-pipeline");
        PipelineAbort::Failure(FlowFailure::SpecialistFailed {
            task_id: task_id.clone(),
        })
    }
}
