use crate::config::SyncSettings;
use crate::models::{DateWindow, EntityKind, InsightLevel};
use crate::normalize::Normalizer;
use crate::queue::{JobHandler, JobQueue, SyncJob};
use crate::source::AdsSource;
use crate::store::{MirrorStore, UpsertBatch};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Rows written for one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountReport {
    pub account_id: String,
    pub campaigns: usize,
    pub adsets: usize,
    pub ads: usize,
    pub insights: usize,
    /// Malformed raw records dropped during normalization.
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub window: Option<DateWindow>,
    pub accounts_upserted: usize,
    pub synced: Vec<AccountReport>,
    /// Accounts whose stored `active` flag is false.
    pub skipped_inactive: Vec<String>,
    /// `sync_account` jobs enqueued in fan-out mode.
    pub enqueued: Vec<String>,
}

/// Executes sync jobs: fetch from an `AdsSource`, normalize, upsert into a `MirrorStore`.
///
/// Every level of an account is fetched and normalized completely before
/// anything is written for that level, so a failed fetch leaves no partial
/// batch behind.
pub struct SyncEngine {
    source: Arc<dyn AdsSource>,
    store: Arc<dyn MirrorStore>,
    queue: Option<Arc<dyn JobQueue>>,
    normalizer: Normalizer,
    settings: SyncSettings,
}

impl SyncEngine {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(
        source: Arc<dyn AdsSource>,
        store: Arc<dyn MirrorStore>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            source,
            store,
            queue: None,
            normalizer: Normalizer::new(settings.action_mapping.clone()),
            settings,
        }
    }

    /// Queue used for `sync_account` fan-out when `settings.fan_out` is set.
    pub fn with_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Resolve the job's optional dates against the configured default window.
    pub fn window_for(&self, job: &SyncJob) -> Result<DateWindow> {
        let (start, end) = job.dates();
        DateWindow::resolve(
            start,
            end,
            Utc::now().date_naive(),
            self.settings.default_window_days,
        )
    }

    #[tracing::instrument(level = "info", skip(self, job), fields(job = job.kind()))]
    pub async fn run(&self, job: &SyncJob) -> Result<SyncReport> {
        let window = self.window_for(job)?;
        match job {
            SyncJob::SyncAll { .. } => self.sync_all(window).await,
            SyncJob::SyncAccount { account_id, .. } => {
                let account_id = account_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        Error::InvalidInput("sync_account job requires accountId".to_string())
                    })?;
                let report = self.sync_account(account_id, window).await?;
                Ok(SyncReport {
                    window: Some(window),
                    synced: vec![report],
                    ..Default::default()
                })
            }
        }
    }

    /// Refresh the account list, then sync (or enqueue) every active account.
    #[tracing::instrument(level = "info", skip(self, window), fields(window = %window))]
    pub async fn sync_all(&self, window: DateWindow) -> Result<SyncReport> {
        let now = Utc::now();
        let raw = if self.settings.account_ids.is_empty() {
            self.source.list_ad_accounts().await?
        } else {
            let mut raw = Vec::with_capacity(self.settings.account_ids.len());
            for id in &self.settings.account_ids {
                raw.push(self.source.get_ad_account(id).await?);
            }
            raw
        };

        let accounts = self.normalizer.accounts(&raw, now)?;
        let accounts_upserted = self
            .store
            .upsert(UpsertBatch::from_rows(EntityKind::AdAccount, &accounts.rows)?)
            .await?;

        let inactive: HashSet<String> = self
            .store
            .account_states()
            .await?
            .into_iter()
            .filter(|s| !s.active)
            .map(|s| s.id)
            .collect();

        let mut report = SyncReport {
            window: Some(window),
            accounts_upserted,
            ..Default::default()
        };
        let mut targets = Vec::new();
        for row in accounts.rows {
            if inactive.contains(&row.id) {
                tracing::info!(account_id = %row.id, "skipping inactive account");
                report.skipped_inactive.push(row.id);
            } else {
                targets.push(row.id);
            }
        }

        if let Some(queue) = self.queue.as_ref().filter(|_| self.settings.fan_out) {
            for account_id in targets {
                let job = SyncJob::sync_account(account_id.clone()).with_dates(
                    Some(window.since.to_string()),
                    Some(window.until.to_string()),
                );
                let message_id = queue.send(job).await?;
                tracing::debug!(%account_id, %message_id, "enqueued sync_account");
                report.enqueued.push(account_id);
            }
            return Ok(report);
        }

        // Inline mode: keep going past a failing account, then fail the job
        // so the queue retries it.
        let mut first_error: Option<Error> = None;
        for account_id in targets {
            match self.sync_account(&account_id, window).await {
                Ok(r) => report.synced.push(r),
                Err(e) => {
                    tracing::error!(%account_id, error = %e, "account sync failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Campaigns, ad sets, ads, then insights for each configured level.
    #[tracing::instrument(level = "info", skip(self, window), fields(window = %window))]
    pub async fn sync_account(&self, account_id: &str, window: DateWindow) -> Result<AccountReport> {
        let mut report = AccountReport {
            account_id: account_id.to_string(),
            ..Default::default()
        };

        let raw = self.source.list_campaigns(account_id).await?;
        let rows = self.normalizer.campaigns(account_id, &raw, Utc::now())?;
        report.skipped += rows.skipped;
        report.campaigns = self.write(EntityKind::Campaign, &rows.rows).await?;

        let raw = self.source.list_adsets(account_id).await?;
        let rows = self.normalizer.adsets(account_id, &raw, Utc::now())?;
        report.skipped += rows.skipped;
        report.adsets = self.write(EntityKind::AdSet, &rows.rows).await?;

        let raw = self.source.list_ads(account_id).await?;
        let rows = self.normalizer.ads(account_id, &raw, Utc::now())?;
        report.skipped += rows.skipped;
        report.ads = self.write(EntityKind::Ad, &rows.rows).await?;

        for level in &self.settings.insight_levels {
            let (written, skipped) = self.sync_insights(account_id, *level, window).await?;
            report.insights += written;
            report.skipped += skipped;
        }

        tracing::info!(
            campaigns = report.campaigns,
            adsets = report.adsets,
            ads = report.ads,
            insights = report.insights,
            skipped = report.skipped,
            "account synced"
        );
        Ok(report)
    }

    async fn sync_insights(
        &self,
        account_id: &str,
        level: InsightLevel,
        window: DateWindow,
    ) -> Result<(usize, usize)> {
        let raw = self
            .source
            .list_insights(account_id, level, window, &self.settings.metrics)
            .await?;
        let rows = self
            .normalizer
            .insights(account_id, level, &raw, Utc::now())?;
        let written = self.write(EntityKind::Insight(level), &rows.rows).await?;
        Ok((written, rows.skipped))
    }

    async fn write<T: Serialize>(&self, kind: EntityKind, rows: &[T]) -> Result<usize> {
        if rows.is_empty() {
            tracing::debug!(table = kind.table(), "nothing to write");
            return Ok(0);
        }
        self.store.upsert(UpsertBatch::from_rows(kind, rows)?).await
    }
}

#[async_trait]
impl JobHandler for SyncEngine {
    async fn handle(&self, job: &SyncJob) -> Result<()> {
        self.run(job).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parse_date;
    use crate::queue::MemoryJobQueue;
    use crate::store::MemoryStore;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Canned Graph data with a call log.
    #[derive(Default)]
    struct FakeSource {
        accounts: Vec<Value>,
        campaigns: Vec<Value>,
        adsets: Vec<Value>,
        ads: Vec<Value>,
        insights: Vec<Value>,
        insights_status: Option<u16>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn log(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AdsSource for FakeSource {
        async fn list_ad_accounts(&self) -> Result<Vec<Value>> {
            self.log("accounts".into());
            Ok(self.accounts.clone())
        }

        async fn get_ad_account(&self, account_id: &str) -> Result<Value> {
            self.log(format!("account:{account_id}"));
            Ok(json!({"id": account_id, "name": "configured"}))
        }

        async fn list_campaigns(&self, account_id: &str) -> Result<Vec<Value>> {
            self.log(format!("campaigns:{account_id}"));
            Ok(self.campaigns.clone())
        }

        async fn list_adsets(&self, account_id: &str) -> Result<Vec<Value>> {
            self.log(format!("adsets:{account_id}"));
            Ok(self.adsets.clone())
        }

        async fn list_ads(&self, account_id: &str) -> Result<Vec<Value>> {
            self.log(format!("ads:{account_id}"));
            Ok(self.ads.clone())
        }

        async fn list_insights(
            &self,
            account_id: &str,
            level: InsightLevel,
            window: DateWindow,
            _metrics: &[String],
        ) -> Result<Vec<Value>> {
            self.log(format!("insights:{account_id}:{level}:{window}"));
            if let Some(status) = self.insights_status {
                return Err(Error::Upstream {
                    status,
                    body: r#"{"error":{"message":"Invalid parameter"}}"#.into(),
                });
            }
            Ok(self.insights.clone())
        }
    }

    fn populated() -> FakeSource {
        FakeSource {
            accounts: vec![json!({"id": "act_1", "name": "One"}), json!({"id": "act_2", "name": "Two"})],
            campaigns: vec![json!({"id": "C1", "name": "Spring", "daily_budget": "1000"})],
            adsets: vec![json!({"id": "S1", "campaign_id": "C1"})],
            ads: vec![json!({"id": "A1", "adset_id": "S1", "campaign_id": "C1"})],
            insights: vec![json!({
                "ad_id": "A1", "adset_id": "S1", "campaign_id": "C1",
                "date_start": "2024-01-01", "date_stop": "2024-01-01",
                "spend": "10", "impressions": "100"
            })],
            ..Default::default()
        }
    }

    fn engine(source: Arc<FakeSource>, store: &MemoryStore) -> SyncEngine {
        SyncEngine::new(source, Arc::new(store.clone()), SyncSettings::default())
    }

    fn one_day_job() -> SyncJob {
        SyncJob::sync_account("act_123")
            .with_dates(Some("2024-01-01".into()), Some("2024-01-01".into()))
    }

    #[tokio::test]
    async fn sync_account_fetches_each_level_once_then_upserts_once() {
        let source = Arc::new(populated());
        let store = MemoryStore::new();
        let report = engine(source.clone(), &store).run(&one_day_job()).await.unwrap();

        assert_eq!(
            source.calls(),
            vec![
                "campaigns:act_123",
                "adsets:act_123",
                "ads:act_123",
                "insights:act_123:ad:2024-01-01..2024-01-01",
            ]
        );
        let tables: Vec<&str> = store.calls().await.iter().map(|c| c.table).collect();
        assert_eq!(
            tables,
            vec!["facebook_campaigns", "facebook_adsets", "facebook_ads", "facebook_insights"]
        );

        let account = &report.synced[0];
        assert_eq!((account.campaigns, account.adsets, account.ads, account.insights), (1, 1, 1, 1));
        let insight = &store.rows(EntityKind::Insight(InsightLevel::Ad))[0];
        assert_eq!(insight["account_id"], "act_123");
        assert_eq!(insight["date"], "2024-01-01");
        assert_eq!(store.rows(EntityKind::Campaign)[0]["daily_budget"], 10.0);
    }

    #[tokio::test]
    async fn rerunning_a_job_does_not_duplicate_rows() {
        let source = Arc::new(populated());
        let store = MemoryStore::new();
        let engine = engine(source, &store);
        engine.run(&one_day_job()).await.unwrap();
        engine.run(&one_day_job()).await.unwrap();

        assert_eq!(store.row_count(EntityKind::Campaign), 1);
        assert_eq!(store.row_count(EntityKind::Insight(InsightLevel::Ad)), 1);
    }

    #[tokio::test]
    async fn upstream_error_on_insights_writes_no_insight_rows() {
        let source = Arc::new(FakeSource {
            insights_status: Some(400),
            ..populated()
        });
        let store = MemoryStore::new();
        let err = engine(source, &store).run(&one_day_job()).await.unwrap_err();

        assert!(matches!(err, Error::Upstream { status: 400, .. }));
        assert!(!err.is_permanent());
        assert_eq!(store.row_count(EntityKind::Insight(InsightLevel::Ad)), 0);
        assert!(store
            .calls()
            .await
            .iter()
            .all(|c| c.table != "facebook_insights"));
    }

    #[tokio::test]
    async fn write_rejection_fails_the_job() {
        let store = MemoryStore::new();
        store.reject(EntityKind::AdSet);
        let err = engine(Arc::new(populated()), &store)
            .run(&one_day_job())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
        assert_eq!(store.row_count(EntityKind::Ad), 0);
    }

    #[tokio::test]
    async fn sync_account_without_id_is_permanent() {
        let store = MemoryStore::new();
        let job = SyncJob::SyncAccount {
            account_id: None,
            start_date: None,
            end_date: None,
        };
        let err = engine(Arc::new(populated()), &store).run(&job).await.unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn sync_all_skips_inactive_accounts() {
        let source = Arc::new(populated());
        let store = MemoryStore::new();
        store.set_active("act_2", false);

        let report = engine(source.clone(), &store)
            .run(&SyncJob::sync_all())
            .await
            .unwrap();

        assert_eq!(report.accounts_upserted, 2);
        assert_eq!(report.skipped_inactive, vec!["act_2"]);
        assert_eq!(report.synced.len(), 1);
        assert_eq!(report.synced[0].account_id, "act_1");
        assert!(!source.calls().iter().any(|c| c.contains("act_2")));
        // The inactive flag survives the account upsert.
        let states = store.account_states().await.unwrap();
        assert!(states.iter().any(|s| s.id == "act_2" && !s.active));
    }

    #[tokio::test]
    async fn sync_all_uses_configured_accounts() {
        let source = Arc::new(populated());
        let store = MemoryStore::new();
        let settings = SyncSettings {
            account_ids: vec!["act_9".into()],
            ..Default::default()
        };
        let engine = SyncEngine::new(source.clone(), Arc::new(store.clone()), settings);
        engine.run(&SyncJob::sync_all()).await.unwrap();

        let calls = source.calls();
        assert_eq!(calls[0], "account:act_9");
        assert!(!calls.contains(&"accounts".to_string()));
        assert!(calls.contains(&"campaigns:act_9".to_string()));
    }

    #[tokio::test]
    async fn fan_out_enqueues_one_job_per_active_account() {
        let source = Arc::new(populated());
        let store = MemoryStore::new();
        let queue = MemoryJobQueue::new();
        let settings = SyncSettings {
            fan_out: true,
            ..Default::default()
        };
        let engine = SyncEngine::new(source.clone(), Arc::new(store.clone()), settings)
            .with_queue(Arc::new(queue.clone()));

        let job = SyncJob::sync_all().with_dates(Some("2024-02-01".into()), Some("2024-02-03".into()));
        let report = engine.run(&job).await.unwrap();

        assert_eq!(report.enqueued, vec!["act_1", "act_2"]);
        assert!(report.synced.is_empty());
        assert_eq!(
            queue.pending_jobs().await,
            vec![
                SyncJob::sync_account("act_1")
                    .with_dates(Some("2024-02-01".into()), Some("2024-02-03".into())),
                SyncJob::sync_account("act_2")
                    .with_dates(Some("2024-02-01".into()), Some("2024-02-03".into())),
            ]
        );
        assert!(!source.calls().iter().any(|c| c.starts_with("campaigns")));
    }

    #[tokio::test]
    async fn default_window_ends_today() {
        let store = MemoryStore::new();
        let engine = engine(Arc::new(populated()), &store);
        let window = engine.window_for(&SyncJob::sync_all()).unwrap();
        let today = Utc::now().date_naive();
        assert_eq!(window.until, today);
        assert_eq!(window.days(), 2);
        assert!(window.since < today);
        assert!(parse_date("2024-01-01").unwrap() < window.since);
    }
}
