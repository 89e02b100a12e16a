//! Shared fakes for end-to-end scenario tests: a scripted model, a
//! stateful in-memory VCS, a recording notifier, and an engine builder
//! backed by the in-memory sqlite store and a manual clock.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use mend_core::circuit::CircuitBreaker;
use mend_core::clock::{Clock, ManualClock};
use mend_core::config::Config;
use mend_core::dryrun::DryRunRecorder;
use mend_core::error::{LlmError, NotifyError, VcsError};
use mend_core::llm::{ChatRequest, ChatResponse, ModelClient};
use mend_core::memory::PatternMemory;
use mend_core::metrics::MetricsRegistry;
use mend_core::notify::{Notification, Notifier};
use mend_core::orchestrator::{Engine, EngineDeps};
use mend_core::personality::PersonalityProfiler;
use mend_core::snapshot::content_hash;
use mend_core::types::NewFailure;
use mend_core::vcs::{
    DeploymentState, FileContent, PrState, PullRequest, RunConclusion, RunJob, VcsClient,
    WorkflowRun,
};
use mend_db::{schema, DbStore};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

pub const REPO: &str = "acme/widgets";
pub const BRANCH: &str = "main";
pub const BRANCH_SHA: &str = "feedc0ffee00";
pub const WORKFLOW: &str = "build";

pub struct FakeModel {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    pub calls: Mutex<Vec<ChatRequest>>,
}

impl FakeModel {
    pub fn scripted(responses: Vec<Result<String, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for FakeModel {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        self.calls.lock().unwrap().push(request);
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::EmptyCompletion));
        next.map(|content| ChatResponse {
            content,
            model: "fake-model".to_string(),
            latency_ms: 42,
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PutRecord {
    pub path: String,
    pub branch: String,
    pub content: String,
}

/// Stateful fake host: file trees per ref, branch creation copies the tree
/// at the source sha, writes mutate the branch tree.
pub struct FakeVcs {
    pub runs: Mutex<Vec<WorkflowRun>>,
    pub jobs: Mutex<HashMap<u64, Vec<RunJob>>>,
    pub logs: Mutex<HashMap<u64, String>>,
    pub trees: Mutex<HashMap<String, HashMap<String, String>>>,
    pub branch_heads: Mutex<HashMap<String, String>>,
    pub default_branch: String,
    pub created_branches: Mutex<Vec<(String, String)>>,
    pub puts: Mutex<Vec<PutRecord>>,
    pub pulls: Mutex<Vec<PullRequest>>,
    pub comments: Mutex<Vec<(u64, String)>>,
    pub deployments: Mutex<Vec<String>>,
    pub deployment_state: Mutex<DeploymentState>,
    pub latest_conclusion: Mutex<Option<RunConclusion>>,
    pub pr_state: Mutex<PrState>,
}

impl FakeVcs {
    pub fn new() -> Arc<Self> {
        let vcs = Self {
            runs: Mutex::new(Vec::new()),
            jobs: Mutex::new(HashMap::new()),
            logs: Mutex::new(HashMap::new()),
            trees: Mutex::new(HashMap::new()),
            branch_heads: Mutex::new(HashMap::from([(
                BRANCH.to_string(),
                BRANCH_SHA.to_string(),
            )])),
            default_branch: BRANCH.to_string(),
            created_branches: Mutex::new(Vec::new()),
            puts: Mutex::new(Vec::new()),
            pulls: Mutex::new(Vec::new()),
            comments: Mutex::new(Vec::new()),
            deployments: Mutex::new(Vec::new()),
            deployment_state: Mutex::new(DeploymentState::Pending),
            latest_conclusion: Mutex::new(Some(RunConclusion::Success)),
            pr_state: Mutex::new(PrState::Open),
        };
        Arc::new(vcs)
    }

    /// Seed a file at the failing branch tip (both branch name and sha refs).
    pub fn seed_file(&self, path: &str, content: &str) {
        let mut trees = self.trees.lock().unwrap();
        for reference in [BRANCH, BRANCH_SHA] {
            trees
                .entry(reference.to_string())
                .or_default()
                .insert(path.to_string(), content.to_string());
        }
    }

    pub fn file_at(&self, reference: &str, path: &str) -> Option<String> {
        self.trees
            .lock()
            .unwrap()
            .get(reference)
            .and_then(|tree| tree.get(path))
            .cloned()
    }

    pub fn fix_branch(&self) -> Option<String> {
        self.created_branches
            .lock()
            .unwrap()
            .first()
            .map(|(branch, _)| branch.clone())
    }
}

#[async_trait]
impl VcsClient for FakeVcs {
    async fn list_failed_runs(
        &self,
        _repository: &str,
        _per_page: u32,
    ) -> Result<Vec<WorkflowRun>, VcsError> {
        Ok(self.runs.lock().unwrap().clone())
    }

    async fn run_jobs(&self, _repository: &str, run_id: u64) -> Result<Vec<RunJob>, VcsError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .get(&run_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn job_logs(&self, _repository: &str, job_id: u64) -> Result<String, VcsError> {
        Ok(self
            .logs
            .lock()
            .unwrap()
            .get(&job_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn branch_head_sha(&self, _repository: &str, branch: &str) -> Result<String, VcsError> {
        self.branch_heads
            .lock()
            .unwrap()
            .get(branch)
            .cloned()
            .ok_or_else(|| VcsError::NotFound {
                what: branch.to_string(),
            })
    }

    async fn default_branch(&self, _repository: &str) -> Result<String, VcsError> {
        Ok(self.default_branch.clone())
    }

    async fn get_file(
        &self,
        _repository: &str,
        path: &str,
        reference: &str,
    ) -> Result<Option<FileContent>, VcsError> {
        Ok(self
            .trees
            .lock()
            .unwrap()
            .get(reference)
            .and_then(|tree| tree.get(path))
            .map(|content| FileContent {
                path: path.to_string(),
                content: content.clone(),
                sha: content_hash(content),
            }))
    }

    async fn create_branch(
        &self,
        _repository: &str,
        branch: &str,
        from_sha: &str,
    ) -> Result<(), VcsError> {
        let mut trees = self.trees.lock().unwrap();
        let source = trees.get(from_sha).cloned().unwrap_or_default();
        trees.insert(branch.to_string(), source);
        drop(trees);
        self.branch_heads
            .lock()
            .unwrap()
            .insert(branch.to_string(), from_sha.to_string());
        self.created_branches
            .lock()
            .unwrap()
            .push((branch.to_string(), from_sha.to_string()));
        Ok(())
    }

    async fn put_file(
        &self,
        _repository: &str,
        path: &str,
        content: &str,
        _message: &str,
        branch: &str,
        _sha: Option<&str>,
    ) -> Result<(), VcsError> {
        self.trees
            .lock()
            .unwrap()
            .entry(branch.to_string())
            .or_default()
            .insert(path.to_string(), content.to_string());
        self.puts.lock().unwrap().push(PutRecord {
            path: path.to_string(),
            branch: branch.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }

    async fn create_pull(
        &self,
        _repository: &str,
        _title: &str,
        _body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest, VcsError> {
        let number = self.pulls.lock().unwrap().len() as u64 + 1;
        let pull = PullRequest {
            number,
            url: format!("https://example.test/pull/{number}"),
            head: head.to_string(),
            base: base.to_string(),
        };
        self.pulls.lock().unwrap().push(pull.clone());
        Ok(pull)
    }

    async fn create_pr_comment(
        &self,
        _repository: &str,
        pr_number: u64,
        body: &str,
    ) -> Result<(), VcsError> {
        self.comments
            .lock()
            .unwrap()
            .push((pr_number, body.to_string()));
        Ok(())
    }

    async fn create_deployment(
        &self,
        _repository: &str,
        _reference: &str,
        environment: &str,
        _description: &str,
    ) -> Result<String, VcsError> {
        let id = format!("deploy-{}", self.deployments.lock().unwrap().len() + 1);
        self.deployments.lock().unwrap().push(environment.to_string());
        Ok(id)
    }

    async fn deployment_status(
        &self,
        _repository: &str,
        _deployment_id: &str,
    ) -> Result<DeploymentState, VcsError> {
        Ok(*self.deployment_state.lock().unwrap())
    }

    async fn latest_run_conclusion(
        &self,
        _repository: &str,
        _branch: &str,
        _workflow: &str,
    ) -> Result<Option<RunConclusion>, VcsError> {
        Ok(*self.latest_conclusion.lock().unwrap())
    }

    async fn pr_state(&self, _repository: &str, _pr_number: u64) -> Result<PrState, VcsError> {
        Ok(*self.pr_state.lock().unwrap())
    }
}

pub struct Harness {
    pub engine: Engine<DbStore>,
    pub vcs: Arc<FakeVcs>,
    pub model: Arc<FakeModel>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub metrics: Arc<MetricsRegistry>,
    pub dry_run: Option<Arc<DryRunRecorder>>,
}

pub fn harness(config: Config, model: Arc<FakeModel>) -> Harness {
    let clock = Arc::new(ManualClock::new(
        // A Wednesday, away from the Friday-spike profiler flag.
        Utc.with_ymd_and_hms(2024, 6, 12, 12, 0, 0).unwrap(),
    ));
    let vcs = FakeVcs::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let metrics = Arc::new(MetricsRegistry::default());
    let config = Arc::new(config);
    let dry_run = config
        .dry_run
        .then(|| Arc::new(DryRunRecorder::new(clock.clone() as Arc<dyn mend_core::clock::Clock>)));

    let deps = EngineDeps {
        config: config.clone(),
        clock: clock.clone(),
        vcs: vcs.clone(),
        model: model.clone(),
        notifier: notifier.clone(),
        breaker: Arc::new(CircuitBreaker::new(
            config.circuit_failure_threshold,
            config.circuit_auto_reset_hours,
            clock.clone(),
        )),
        memory: Arc::new(PatternMemory::new(
            None,
            clock.clone(),
            config.pattern_cap_per_repo,
            config.store_negative_patterns,
        )),
        profiler: Arc::new(PersonalityProfiler::new(clock.clone())),
        metrics: metrics.clone(),
        dry_run: dry_run.clone(),
    };
    let store = DbStore::new(schema::with_test_db().expect("in-memory store"));
    Harness {
        engine: Engine::new(store, deps),
        vcs,
        model,
        notifier,
        clock,
        metrics,
        dry_run,
    }
}

pub fn new_failure(reason: &str, clock: &ManualClock) -> NewFailure {
    new_failure_with_run(reason, "9001", clock)
}

pub fn new_failure_with_run(reason: &str, run_id: &str, clock: &ManualClock) -> NewFailure {
    NewFailure {
        repository: REPO.to_string(),
        branch: BRANCH.to_string(),
        workflow: WORKFLOW.to_string(),
        workflow_run_id: run_id.to_string(),
        commit_sha: BRANCH_SHA.to_string(),
        failure_reason: reason.to_string(),
        logs: format!("step output\n{reason}\nmore output"),
        detected_at: clock.now(),
    }
}

pub fn devops_classification(risk: u8, files: &[&str]) -> String {
    let files = files
        .iter()
        .map(|f| format!("\"{f}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"{{
            "error_type": "DEVOPS",
            "category": "timeout",
            "risk_score": {risk},
            "confidence": 90,
            "proposed_fix": "raise the install timeout",
            "effort_estimate": "low",
            "affected_components": ["workflow"],
            "reasoning": "install exceeded the job limit",
            "files_to_modify": [{files}],
            "fix_commands": []
        }}"#
    )
}

pub fn developer_classification() -> String {
    r#"{
        "error_type": "DEVELOPER",
        "category": "test_failure",
        "risk_score": 2,
        "confidence": 85,
        "proposed_fix": "fix the assertion in the math test",
        "effort_estimate": "low",
        "affected_components": ["tests"],
        "reasoning": "unit test assertion failed in application code",
        "files_to_modify": ["tests/math_test.py"],
        "fix_commands": []
    }"#
    .to_string()
}
