//! The replication engine: walks a rule's manifest graph, plans the blob set, and
//! drives the copy through the worker pool and retry layer.

mod plan;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::filter::{self, TagCandidate};
use crate::model::{
    Descriptor, ExecutionCounters, Manifest, ParsedManifest, ProgressEvent, ProgressPhase,
    ReplicationRule, RetryPolicy, TagFilter,
};
use crate::pool::{PoolTask, WorkerPool};
use crate::registry::RegistryClient;
use crate::retry::retry;
use crate::ReplicoreResult;

pub use plan::{blobs_of_manifest, build_tag_plan, TagPlan};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The terminal disposition of one [`ReplicationEngine::run`] call.
#[derive(Debug, Clone, Default)]
pub struct EngineOutcome {
    /// The final counters snapshot.
    pub counters: ExecutionCounters,
    /// Set if the run failed at preflight, i.e. before any blob copy was attempted.
    pub preflight_error: Option<String>,
    /// Per-tag or per-blob errors accumulated while the rule otherwise continued.
    pub errors: Vec<String>,
    /// True if `cancel` was observed before the run reached its natural end.
    pub canceled: bool,
}

/// Orchestrates a single execution of one [`ReplicationRule`].
pub struct ReplicationEngine {
    source: Arc<RegistryClient>,
    target: Arc<RegistryClient>,
    progress: mpsc::Sender<ProgressEvent>,
}

struct BlobCopyTask {
    source: Arc<RegistryClient>,
    target: Arc<RegistryClient>,
    source_repo: String,
    target_repo: String,
    descriptor: Descriptor,
    retry_policy: RetryPolicy,
    counters: Arc<AtomicU64Counters>,
}

#[derive(Default)]
struct AtomicU64Counters {
    synced: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    bytes: AtomicU64,
}

#[async_trait]
impl PoolTask for BlobCopyTask {
    async fn execute(&self, cancel: CancellationToken) -> ReplicoreResult<()> {
        let digest = self.descriptor.digest().clone();

        if let Some(_size) = self.target.blob_exists(&self.target_repo, &digest).await? {
            self.counters.synced.fetch_add(1, Ordering::SeqCst);
            self.counters.skipped.fetch_add(1, Ordering::SeqCst);
            return crate::Ok(());
        }

        if let Ok(crate::registry::MountOutcome::Mounted) =
            self.target.mount_blob(&self.source_repo, &self.target_repo, &digest).await
        {
            self.counters.synced.fetch_add(1, Ordering::SeqCst);
            self.counters.skipped.fetch_add(1, Ordering::SeqCst);
            return crate::Ok(());
        }

        let size = self.descriptor.size();
        let result = retry(&self.retry_policy, &cancel, || {
            let source = self.source.clone();
            let target = self.target.clone();
            let source_repo = self.source_repo.clone();
            let target_repo = self.target_repo.clone();
            let digest = digest.clone();
            async move {
                let (stream, declared_size) = source.get_blob(&source_repo, &digest).await?;
                target.put_blob(&target_repo, &digest, stream, declared_size).await
            }
        })
        .await;

        match result {
            Ok(()) => {
                self.counters.synced.fetch_add(1, Ordering::SeqCst);
                self.counters.bytes.fetch_add(size, Ordering::SeqCst);
                crate::Ok(())
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn description(&self) -> String {
        format!("copy blob {} ({} -> {})", self.descriptor.digest(), self.source_repo, self.target_repo)
    }
}

impl ReplicationEngine {
    /// Builds an engine for one execution, given the already-constructed source and
    /// target clients and the channel progress events should be sent to.
    pub fn new(source: Arc<RegistryClient>, target: Arc<RegistryClient>, progress: mpsc::Sender<ProgressEvent>) -> Self {
        ReplicationEngine { source, target, progress }
    }

    /// Runs `rule` to completion (or cancellation), per the seven-step orchestration:
    /// preflight, enumerate repos, enumerate+filter tags, plan blobs, copy blobs,
    /// push manifests, summarize.
    pub async fn run(
        &self,
        rule: &ReplicationRule,
        execution_id: &str,
        global_concurrency: usize,
        cancel: CancellationToken,
    ) -> ReplicoreResult<EngineOutcome> {
        let mut outcome = EngineOutcome::default();

        // 1. Preflight.
        if let Err(e) = self.preflight(rule).await {
            outcome.preflight_error = Some(e.to_string());
            return crate::Ok(outcome);
        }

        // 2. Enumerate repositories.
        let repos = match self.enumerate_repositories(rule).await {
            Ok(repos) => repos,
            Err(e) => {
                outcome.preflight_error = Some(e.to_string());
                return crate::Ok(outcome);
            }
        };

        // 3/4. Enumerate+filter tags, then plan the blob set per (repo, tag).
        let mut plans = Vec::new();
        for repo in &repos {
            if cancel.is_cancelled() {
                outcome.canceled = true;
                return crate::Ok(outcome);
            }
            match self.plan_repo(rule, repo).await {
                Ok(tag_plans) => plans.extend(tag_plans),
                Err(e) => outcome.errors.push(format!("{repo}: {e}")),
            }
        }

        let mut dedup = HashMap::new();
        let mut all_blobs = Vec::new();
        for plan in &plans {
            for blob in &plan.blobs {
                if dedup.insert(blob.digest().to_string(), ()).is_none() {
                    all_blobs.push((plan.repo.clone(), target_repo_for(rule, &plan.repo), blob.clone()));
                }
            }
        }

        let counters = Arc::new(AtomicU64Counters::default());
        outcome.counters.total_blobs = all_blobs.len() as u64;
        self.emit_progress(execution_id, ProgressPhase::Blob, &outcome.counters, None).await;

        // 5. Copy blobs.
        let retry_policy = rule.get_retry_policy().clone().unwrap_or_default();
        let concurrency = (*rule.get_concurrency()).unwrap_or(global_concurrency);
        let pool = WorkerPool::new(concurrency);
        let pool_cancel = pool.cancellation_token();
        let bridge = cancel.clone();
        tokio::spawn(async move {
            bridge.cancelled().await;
            pool_cancel.cancel();
        });

        for (source_repo, target_repo, descriptor) in all_blobs {
            let task = BlobCopyTask {
                source: self.source.clone(),
                target: self.target.clone(),
                source_repo,
                target_repo,
                descriptor,
                retry_policy: retry_policy.clone(),
                counters: counters.clone(),
            };
            pool.submit(Arc::new(task)).await;
        }
        pool.wait().await;
        outcome.errors.extend(pool.errors().await);

        outcome.counters.synced_blobs = counters.synced.load(Ordering::SeqCst);
        outcome.counters.skipped_blobs = counters.skipped.load(Ordering::SeqCst);
        outcome.counters.failed_blobs = counters.failed.load(Ordering::SeqCst);
        outcome.counters.bytes_synced = counters.bytes.load(Ordering::SeqCst);
        self.emit_progress(execution_id, ProgressPhase::Blob, &outcome.counters, None).await;

        if cancel.is_cancelled() {
            outcome.canceled = true;
            return crate::Ok(outcome);
        }

        // 6. Push manifests (children before the index/list that references them).
        for plan in &plans {
            if cancel.is_cancelled() {
                outcome.canceled = true;
                return crate::Ok(outcome);
            }
            let target_repo = target_repo_for(rule, &plan.repo);
            if let Err(e) = self.push_tag(&target_repo, plan).await {
                outcome.errors.push(format!("{}:{}: {e}", plan.repo, plan.tag));
            }
        }

        // 7. Summarize.
        self.emit_progress(execution_id, ProgressPhase::Complete, &outcome.counters, None).await;
        crate::Ok(outcome)
    }

    async fn preflight(&self, rule: &ReplicationRule) -> ReplicoreResult<()> {
        self.source.ping().await?;
        self.target.ping().await?;

        if !self.target.project_exists(&rule.get_target().project).await? {
            self.target.create_project(&rule.get_target().project).await?;
        }
        crate::Ok(())
    }

    async fn enumerate_repositories(&self, rule: &ReplicationRule) -> ReplicoreResult<Vec<String>> {
        match &rule.get_source().repo {
            Some(repo) => crate::Ok(vec![format!("{}/{}", rule.get_source().project, repo)]),
            None => {
                let repos = self.source.list_repositories(&rule.get_source().project).await?;
                crate::Ok(repos.into_iter().map(|r| format!("{}/{}", rule.get_source().project, r)).collect())
            }
        }
    }

    async fn plan_repo(&self, rule: &ReplicationRule, repo: &str) -> ReplicoreResult<Vec<TagPlan>> {
        let tags = self.source.list_tags(repo).await?;

        // Exclude/include are name-only and cheap; keep_latest needs a per-tag
        // timestamp, which costs an extra manifest (and, for single-platform tags, a
        // config blob) fetch. Run the cheap pass first so excluded tags never pay
        // for a fetch they'll be dropped after anyway.
        let name_filter = TagFilter {
            exclude: rule.get_tag_filter().exclude.clone(),
            include: rule.get_tag_filter().include.clone(),
            keep_latest: 0,
        };
        let placeholder = chrono::DateTime::<chrono::Utc>::MIN_UTC;
        let candidates = tags.into_iter().map(|tag| TagCandidate { tag, updated_at: placeholder }).collect();
        let survivors = filter::apply(&name_filter, candidates)?;

        let keep_latest = rule.get_tag_filter().keep_latest;
        let mut fetched = Vec::new();
        for tag in survivors {
            let manifest = self.source.get_manifest(repo, &tag).await?;
            let created_at = if keep_latest > 0 {
                self.manifest_created_at(repo, &manifest).await
            } else {
                placeholder
            };
            fetched.push((tag, manifest, created_at));
        }

        if keep_latest > 0 {
            fetched.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| b.0.cmp(&a.0)));
            fetched.truncate(keep_latest as usize);
        }

        let mut plans = Vec::new();
        for (tag, manifest, _) in fetched {
            let source = self.source.clone();
            let repo_owned = repo.to_string();
            let plan = build_tag_plan(repo.to_string(), tag, manifest, rule.get_architectures(), |descriptor| {
                let source = source.clone();
                let repo_owned = repo_owned.clone();
                async move { source.get_manifest(&repo_owned, &descriptor.digest().to_string()).await }
            })
            .await?;
            plans.push(plan);
        }
        crate::Ok(plans)
    }

    /// The timestamp `keep_latest` sorts by: a single-platform manifest's config
    /// blob `created` field. Index/manifest-list tags have no single config blob to
    /// consult and fall back to "now", which means `keep_latest` degrades to list
    /// order among index tags; architecture allow-lists are the primary selector
    /// for those anyway.
    async fn manifest_created_at(&self, repo: &str, manifest: &Manifest) -> chrono::DateTime<chrono::Utc> {
        if let ParsedManifest::Image(image) = &manifest.parsed {
            let config_digest = image.config().digest().clone();
            if let Ok((stream, _size)) = self.source.get_blob(repo, &config_digest).await {
                if let Ok(bytes) = stream.try_fold(Vec::new(), |mut acc, chunk| async move {
                    acc.extend_from_slice(&chunk);
                    Ok(acc)
                }).await
                {
                    if let Ok(config) = serde_json::from_slice::<oci_spec::image::ImageConfiguration>(&bytes) {
                        if let Some(created) = config.created() {
                            if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(created) {
                                return parsed.with_timezone(&chrono::Utc);
                            }
                        }
                    }
                }
            }
        }
        chrono::Utc::now()
    }

    async fn push_tag(&self, target_repo: &str, plan: &TagPlan) -> ReplicoreResult<()> {
        for (descriptor, child) in &plan.children {
            self.target.put_manifest(target_repo, &descriptor.digest().to_string(), child).await?;
        }
        self.target.put_manifest(target_repo, &plan.tag, &plan.manifest).await?;
        crate::Ok(())
    }

    async fn emit_progress(&self, execution_id: &str, phase: ProgressPhase, counters: &ExecutionCounters, descriptor: Option<Descriptor>) {
        let _ = self
            .progress
            .send(ProgressEvent { execution_id: execution_id.to_string(), phase, counters: *counters, descriptor })
            .await;
    }
}

fn target_repo_for(rule: &ReplicationRule, source_repo: &str) -> String {
    let source_name = source_repo
        .strip_prefix(&format!("{}/", rule.get_source().project))
        .unwrap_or(source_repo);
    match &rule.get_target().repo {
        Some(repo) => format!("{}/{}", rule.get_target().project, repo),
        None => format!("{}/{}", rule.get_target().project, source_name),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RepositorySelector;

    fn rule() -> ReplicationRule {
        ReplicationRule::builder()
            .id("r1".into())
            .name("r1".into())
            .source(RepositorySelector::builder().project("library".into()).repo("nginx".into()).build())
            .target(RepositorySelector::builder().project("mirror".into()).build())
            .build()
    }

    #[test]
    fn test_target_repo_defaults_to_source_name() {
        assert_eq!(target_repo_for(&rule(), "library/nginx"), "mirror/nginx");
    }
}
