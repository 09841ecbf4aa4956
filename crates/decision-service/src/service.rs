use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use audit_log::{
    AuditEntry, AuditRecorder, AuditStats, JsonLinesSink, ViolationRecord, ViolationSink,
};
use policy_engine::{
    Decision, DecisionMetadata, DecisionRequest, DecisionSource, PolicyEngine, Rule, RuleError,
    RulePatch, RuleSet, RuleStore, RuleSummary, SubjectContext,
};

use crate::error::{EvaluationError, FallbackError};
use crate::fallback::FallbackEvaluator;
use crate::subject::SubjectResolver;

/// Role reported in the metadata of requests whose subject never resolved.
const UNRESOLVED_ROLE: &str = "unknown";

/// Resolution step run against a rule set snapshot.
type ResolveFn =
    fn(&RuleSet, &DecisionRequest, &SubjectContext, DateTime<FixedOffset>) -> Decision;

/// Timeouts applied by the [`DecisionService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    #[serde(default = "default_fallback_timeout_ms")]
    pub fallback_timeout_ms: u64,
}

fn default_lookup_timeout_ms() -> u64 {
    2_000
}

fn default_fallback_timeout_ms() -> u64 {
    5_000
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: default_lookup_timeout_ms(),
            fallback_timeout_ms: default_fallback_timeout_ms(),
        }
    }
}

impl ServiceSettings {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }
}

/// Lifecycle of a single request through the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    ContextResolved,
    Evaluated,
    Recorded,
    Returned,
    ContextResolutionFailed,
    InternalError,
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RequestState::Received => "received",
            RequestState::ContextResolved => "context-resolved",
            RequestState::Evaluated => "evaluated",
            RequestState::Recorded => "recorded",
            RequestState::Returned => "returned",
            RequestState::ContextResolutionFailed => "context-resolution-failed",
            RequestState::InternalError => "internal-error",
        };
        f.write_str(s)
    }
}

fn transition(request: &DecisionRequest, state: RequestState) {
    debug!(request_id = %request.id, state = %state, "request state");
}

/// Entry point for callers: resolves the subject, evaluates the request
/// against the current rules, records the outcome, and reports critical
/// violations.
///
/// [`decide`](Self::decide) never fails. Anything that prevents a normal
/// evaluation produces a denial with `audit_required` set.
pub struct DecisionService {
    engine: PolicyEngine,
    recorder: Arc<AuditRecorder>,
    resolver: Arc<dyn SubjectResolver>,
    fallback: Option<Arc<dyn FallbackEvaluator>>,
    violations: Option<Arc<dyn ViolationSink>>,
    mirror: Option<JsonLinesSink<AuditEntry>>,
    settings: ServiceSettings,
}

impl std::fmt::Debug for DecisionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionService")
            .field("engine", &self.engine)
            .field("audit_entries", &self.recorder.len())
            .field("fallback", &self.fallback.is_some())
            .field("violations", &self.violations.is_some())
            .field("mirror", &self.mirror.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

impl DecisionService {
    pub fn new(store: Arc<RuleStore>, resolver: Arc<dyn SubjectResolver>) -> Self {
        Self {
            engine: PolicyEngine::new(store),
            recorder: Arc::new(AuditRecorder::default()),
            resolver,
            fallback: None,
            violations: None,
            mirror: None,
            settings: ServiceSettings::default(),
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<AuditRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackEvaluator>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_violation_sink(mut self, sink: Arc<dyn ViolationSink>) -> Self {
        self.violations = Some(sink);
        self
    }

    /// Mirror every audit entry to a JSON-lines sink.
    pub fn with_audit_mirror(mut self, mirror: JsonLinesSink<AuditEntry>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn with_settings(mut self, settings: ServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn recorder(&self) -> &Arc<AuditRecorder> {
        &self.recorder
    }

    // -----------------------------------------------------------------------
    // Decisions
    // -----------------------------------------------------------------------

    /// Decide `request` using the rule set.
    pub async fn decide(&self, request: DecisionRequest) -> Decision {
        self.decide_using(request, policy_engine::resolve).await
    }

    async fn decide_using(&self, mut request: DecisionRequest, resolve: ResolveFn) -> Decision {
        let started = Instant::now();
        let at = request.pin_timestamp();
        transition(&request, RequestState::Received);

        let decision = match self.lookup_subject(&request.subject_id).await {
            Ok(subject) => {
                transition(&request, RequestState::ContextResolved);
                match self.evaluate(&request, subject, at, resolve).await {
                    Ok(decision) => {
                        transition(&request, RequestState::Evaluated);
                        decision
                    }
                    Err(err) => {
                        transition(&request, RequestState::InternalError);
                        error!(request_id = %request.id, %err, "evaluation failed; denying");
                        fail_closed(&request, &err, DecisionSource::InternalError)
                    }
                }
            }
            Err(err) => {
                transition(&request, RequestState::ContextResolutionFailed);
                warn!(
                    request_id = %request.id,
                    subject = %request.subject_id,
                    %err,
                    "subject lookup failed; denying"
                );
                fail_closed(&request, &err, DecisionSource::ContextResolutionFailed)
            }
        };

        self.finish(request, decision, started).await
    }

    /// Decide `request` through the fallback evaluator instead of the rules.
    ///
    /// Emergency mode still denies. Without a configured fallback the request
    /// is denied. If the fallback errors or times out, the request is allowed
    /// with `audit_required` set and source `fallback_failed`.
    pub async fn decide_with_fallback(&self, mut request: DecisionRequest) -> Decision {
        if self.engine.store().emergency_mode() {
            info!(request_id = %request.id, "emergency mode active; bypass path uses the rules");
            return self.decide(request).await;
        }

        let started = Instant::now();
        request.pin_timestamp();
        transition(&request, RequestState::Received);

        let Some(fallback) = self.fallback.as_ref() else {
            transition(&request, RequestState::InternalError);
            error!(request_id = %request.id, "bypass requested but no fallback evaluator is configured");
            let decision = fail_closed(
                &request,
                &EvaluationError::NoFallback,
                DecisionSource::InternalError,
            );
            return self.finish(request, decision, started).await;
        };

        let timeout = self.settings.fallback_timeout();
        let outcome = match tokio::time::timeout(timeout, fallback.evaluate(&request)).await {
            Ok(result) => result,
            Err(_) => Err(FallbackError::TimedOut(timeout)),
        };

        let decision = match outcome {
            Ok(mut decision) => {
                decision.metadata.source = DecisionSource::Fallback;
                decision
            }
            Err(err) => {
                warn!(
                    request_id = %request.id,
                    %err,
                    "fallback evaluation failed; allowing and flagging for review"
                );
                Decision::allow_flagged_for_review(
                    format!("{err}; allowed pending review"),
                    DecisionMetadata::new(
                        UNRESOLVED_ROLE,
                        request.resource_category(),
                        DecisionSource::FallbackFailed,
                    ),
                )
            }
        };
        transition(&request, RequestState::Evaluated);

        self.finish(request, decision, started).await
    }

    async fn lookup_subject(&self, subject_id: &str) -> Result<SubjectContext, EvaluationError> {
        let timeout = self.settings.lookup_timeout();
        match tokio::time::timeout(timeout, self.resolver.resolve(subject_id)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(EvaluationError::LookupTimeout(timeout)),
        }
    }

    async fn evaluate(
        &self,
        request: &DecisionRequest,
        subject: SubjectContext,
        at: DateTime<FixedOffset>,
        resolve: ResolveFn,
    ) -> Result<Decision, EvaluationError> {
        let snapshot = self.engine.store().snapshot();
        let request = request.clone();
        run_guarded(move || resolve(&snapshot, &request, &subject, at)).await
    }

    /// Stamp latency, record, report violations, return.
    async fn finish(
        &self,
        request: DecisionRequest,
        mut decision: Decision,
        started: Instant,
    ) -> Decision {
        decision.metadata.latency_micros =
            u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);

        if let Some(record) = ViolationRecord::from_decision(&request, &decision) {
            self.report_violation(record);
        }

        let entry = AuditEntry::new(request, decision.clone());
        if let Some(mirror) = &self.mirror {
            mirror.log(entry.clone()).await;
        }
        let request_id = entry.request.id;
        self.recorder.record(entry);
        debug!(
            request_id = %request_id,
            state = %RequestState::Recorded,
            allowed = decision.allowed,
            "request state"
        );
        debug!(request_id = %request_id, state = %RequestState::Returned, "request state");

        decision
    }

    fn report_violation(&self, record: ViolationRecord) {
        let Some(sink) = self.violations.clone() else {
            return;
        };
        warn!(
            action_id = %record.action_id,
            rule = record.rule_id.as_deref().unwrap_or("-"),
            subject = %record.subject_id,
            "critical policy violation"
        );
        tokio::spawn(async move {
            if let Err(err) = sink.deliver(record).await {
                error!(%err, "failed to deliver violation record");
            }
        });
    }

    // -----------------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------------

    pub fn add_rule(&self, rule: Rule) -> Result<(), RuleError> {
        self.engine.store().add(rule)
    }

    pub fn remove_rule(&self, id: &str) -> bool {
        self.engine.store().remove(id)
    }

    pub fn update_rule(&self, id: &str, patch: RulePatch) -> Result<bool, RuleError> {
        self.engine.store().update(id, patch)
    }

    /// All rules in evaluation order.
    pub fn rules(&self) -> Vec<Rule> {
        self.engine.store().list()
    }

    /// Returns the previous state.
    pub fn set_emergency_mode(&self, on: bool) -> bool {
        self.engine.store().set_emergency_mode(on)
    }

    pub fn emergency_mode(&self) -> bool {
        self.engine.store().emergency_mode()
    }

    pub fn rule_summary(&self) -> RuleSummary {
        self.engine.store().summary()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn audit_log(&self, window: Duration) -> Vec<AuditEntry> {
        self.recorder.query(window)
    }

    pub fn stats(&self, window: Duration) -> AuditStats {
        self.recorder.stats(window)
    }
}

/// Run `f` off the async workers; a panic becomes an internal error.
pub(crate) async fn run_guarded<F>(f: F) -> Result<Decision, EvaluationError>
where
    F: FnOnce() -> Decision + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| EvaluationError::Internal(err.to_string()))
}

fn fail_closed(
    request: &DecisionRequest,
    err: &EvaluationError,
    source: DecisionSource,
) -> Decision {
    Decision::fail_closed(
        err.to_string(),
        DecisionMetadata::new(UNRESOLVED_ROLE, request.resource_category(), source),
    )
}
