use crate::queue::{JobQueue, SyncJob};
use crate::{Error, Result};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Enqueues one `sync_all` job per cron firing.
///
/// The next run time is computed from the tick time, not from the previous
/// due time, so a long pause yields a single catch-up run instead of a burst.
pub struct SyncScheduler {
    queue: Arc<dyn JobQueue>,
    cron: CronExpr,
    expr: String,
    poll_interval: Duration,
    next_run_at: Mutex<DateTime<Utc>>,
}

impl SyncScheduler {
    #[tracing::instrument(level = "debug", skip(queue))]
    pub fn new(
        expr: &str,
        queue: Arc<dyn JobQueue>,
        poll_interval: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if poll_interval.is_zero() {
            return Err(Error::InvalidInput("poll_interval must be > 0".to_string()));
        }
        let cron = CronExpr::parse(expr)?;
        let next = cron.next_after(now)?;
        Ok(Self {
            queue,
            cron,
            expr: expr.to_string(),
            poll_interval,
            next_run_at: Mutex::new(next),
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub async fn next_run_at(&self) -> DateTime<Utc> {
        *self.next_run_at.lock().await
    }

    /// Run until `cancel` fires. Tick errors are logged and do not stop scheduling.
    #[tracing::instrument(level = "info", skip_all, fields(schedule = %self.expr))]
    pub async fn run_loop(&self, cancel: CancellationToken) {
        let next = self.next_run_at().await;
        tracing::info!(next_run_at = %next, "sync scheduler started");
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("sync scheduler cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        tracing::warn!(error = %e, "sync scheduler tick failed");
                    }
                }
            }
        }
    }

    /// Enqueue `sync_all` if the schedule is due at `now`; returns the message id.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Option<String>> {
        let mut next = self.next_run_at.lock().await;
        if now < *next {
            return Ok(None);
        }
        // Advance before enqueueing so a failed send cannot fire twice.
        *next = self.cron.next_after(now)?;
        let following = *next;
        let id = self.queue.send(SyncJob::sync_all()).await?;
        tracing::info!(message_id = %id, next_run_at = %following, "scheduled sync_all enqueued");
        Ok(Some(id))
    }
}

/// Five-field cron expression: `minute hour day-of-month month day-of-week`.
///
/// Each field accepts `*`, `N`, `A-B`, `*/S`, `A-B/S` and comma lists.
/// Day-of-week runs 0-6 from Sunday; 7 is accepted as Sunday. When both
/// day fields are restricted a time matches if either does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_any: bool,
    dow_any: bool,
}

impl CronExpr {
    #[tracing::instrument(level = "debug")]
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(Error::InvalidInput(format!(
                "cron expr '{expr}' must have 5 fields: min hour dom month dow"
            )));
        };

        let mut days_of_week = parse_field(dow, 0, 7)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            minutes: parse_field(minute, 0, 59)?,
            hours: parse_field(hour, 0, 23)?,
            days_of_month: parse_field(dom, 1, 31)?,
            months: parse_field(month, 1, 12)?,
            days_of_week,
            dom_any: *dom == "*",
            dow_any: *dow == "*",
        })
    }

    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        self.day_matches(t) && bit(self.minutes, t.minute()) && bit(self.hours, t.hour())
    }

    /// First matching minute strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let start = after + ChronoDuration::minutes(1);
        let mut t = start
            .with_second(0)
            .and_then(|d| d.with_nanosecond(0))
            .unwrap_or(start);

        // Four years covers every satisfiable day/month combination (Feb 29).
        let limit = t + ChronoDuration::days(4 * 366);
        while t <= limit {
            if !self.day_matches(t) {
                t = start_of_next_day(t);
                continue;
            }
            if self.matches(t) {
                return Ok(t);
            }
            t += ChronoDuration::minutes(1);
        }
        Err(Error::InvalidInput(
            "cron expr never matches a real date".to_string(),
        ))
    }

    /// Month and day fields only.
    fn day_matches(&self, t: DateTime<Utc>) -> bool {
        if !bit(self.months, t.month()) {
            return false;
        }
        let dom = bit(self.days_of_month, t.day());
        let dow = bit(self.days_of_week, t.weekday().num_days_from_sunday());
        match (self.dom_any, self.dow_any) {
            (true, true) => true,
            (true, false) => dow,
            (false, true) => dom,
            (false, false) => dom || dow,
        }
    }
}

fn bit(mask: u64, v: u32) -> bool {
    mask & (1u64 << v) != 0
}

fn start_of_next_day(t: DateTime<Utc>) -> DateTime<Utc> {
    let next = t + ChronoDuration::days(1);
    next.with_hour(0)
        .and_then(|d| d.with_minute(0))
        .unwrap_or(next)
}

/// Parse one field into a bitmask where bit `v` is set for each allowed value.
fn parse_field(token: &str, min: u32, max: u32) -> Result<u64> {
    let invalid = |why: &str| Error::InvalidInput(format!("cron field '{token}': {why}"));
    let num = |s: &str| s.parse::<u32>().map_err(|_| invalid("not a number"));

    let mut mask = 0u64;
    for part in token.split(',') {
        let (range, step, stepped) = match part.split_once('/') {
            Some((r, s)) => (r, num(s)?, true),
            None => (part, 1, false),
        };
        if step == 0 {
            return Err(invalid("step must be > 0"));
        }

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (num(a)?, num(b)?)
        } else {
            let v = num(range)?;
            // `N/S` means from N to the end of the range.
            if stepped { (v, max) } else { (v, v) }
        };

        if lo < min || hi > max || lo > hi {
            return Err(invalid(&format!("out of range {min}-{max}")));
        }
        let mut v = lo;
        while v <= hi {
            mask |= 1u64 << v;
            v += step;
        }
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryJobQueue;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn parses_common_forms() {
        let every_six = CronExpr::parse("0 */6 * * *").unwrap();
        assert!(every_six.matches(at("2024-01-01T06:00:00Z")));
        assert!(!every_six.matches(at("2024-01-01T07:00:00Z")));

        let weekdays = CronExpr::parse("30 9 * * 1-5").unwrap();
        // 2024-01-06 is a Saturday.
        assert!(!weekdays.matches(at("2024-01-06T09:30:00Z")));
        assert!(weekdays.matches(at("2024-01-08T09:30:00Z")));

        let sunday = CronExpr::parse("0 0 * * 7").unwrap();
        assert!(sunday.matches(at("2024-01-07T00:00:00Z")));
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in ["* * * *", "60 * * * *", "*/0 * * * *", "5-1 * * * *", "a * * * *"] {
            assert!(CronExpr::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn next_after_is_strictly_later_and_aligned() {
        let cron = CronExpr::parse("15 2 * * *").unwrap();
        assert_eq!(
            cron.next_after(at("2024-01-01T02:15:00Z")).unwrap(),
            at("2024-01-02T02:15:00Z")
        );
        assert_eq!(
            cron.next_after(at("2024-01-01T01:00:30Z")).unwrap(),
            at("2024-01-01T02:15:00Z")
        );

        let leap = CronExpr::parse("0 0 29 2 *").unwrap();
        assert_eq!(
            leap.next_after(at("2024-03-01T00:00:00Z")).unwrap(),
            at("2028-02-29T00:00:00Z")
        );
        assert!(CronExpr::parse("0 0 31 2 *")
            .unwrap()
            .next_after(at("2024-01-01T00:00:00Z"))
            .is_err());
    }

    #[tokio::test]
    async fn tick_enqueues_exactly_one_sync_all_per_firing() {
        let queue = MemoryJobQueue::new();
        let sched = SyncScheduler::new(
            "0 * * * *",
            Arc::new(queue.clone()),
            Duration::from_secs(30),
            at("2024-01-01T00:10:00Z"),
        )
        .unwrap();
        assert_eq!(sched.next_run_at().await, at("2024-01-01T01:00:00Z"));

        assert!(sched.tick(at("2024-01-01T00:59:59Z")).await.unwrap().is_none());
        assert!(sched.tick(at("2024-01-01T01:00:05Z")).await.unwrap().is_some());
        assert!(sched.tick(at("2024-01-01T01:00:35Z")).await.unwrap().is_none());
        // A long outage produces one catch-up run, not one per missed hour.
        assert!(sched.tick(at("2024-01-01T05:30:00Z")).await.unwrap().is_some());
        assert!(sched.tick(at("2024-01-01T05:31:00Z")).await.unwrap().is_none());

        assert_eq!(
            queue.pending_jobs().await,
            vec![SyncJob::sync_all(), SyncJob::sync_all()]
        );
        assert_eq!(sched.next_run_at().await, at("2024-01-01T06:00:00Z"));
    }

    #[tokio::test]
    async fn spawned_run_loop_fires_overdue_run_and_stops_on_cancel() {
        let queue = MemoryJobQueue::new();
        let sched = Arc::new(
            SyncScheduler::new(
                "0 0 * * *",
                Arc::new(queue.clone()),
                Duration::from_secs(3600),
                at("2000-01-01T00:00:00Z"),
            )
            .unwrap(),
        );
        let cancel = CancellationToken::new();
        let task = {
            let sched = sched.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { sched.run_loop(cancel).await })
        };

        for _ in 0..100 {
            if queue.pending().await > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(queue.pending_jobs().await, vec![SyncJob::sync_all()]);
        assert!(sched.next_run_at().await > Utc::now());
    }
}
