use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tracing::{debug, info};

use crate::engine::Engine;

/// Periodically soft-delete reservations whose end has passed.
pub async fn run_sweeper(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let now = Local::now().naive_local();
        let expired = engine.sweep_expired(now).await;
        debug!(expired, "sweep tick");
    }
}

/// Purge inactive and past-dated reservations once per local day, at midnight.
pub async fn run_daily_reset(engine: Arc<Engine>) {
    loop {
        let now = Local::now().naive_local();
        let wait = until_next_midnight(now);
        info!("next daily reset in {}s", wait.as_secs());
        tokio::time::sleep(wait).await;
        let today = Local::now().date_naive();
        engine.daily_reset(today).await;
    }
}

fn until_next_midnight(now: NaiveDateTime) -> Duration {
    let next = now
        .date()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0));
    match next {
        Some(next) => (next - now).to_std().unwrap_or(Duration::from_secs(1)),
        // End of the calendar; check again in a day.
        None => Duration::from_secs(24 * 60 * 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Options;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use crate::snapshot::MemoryStore;
    use chrono::NaiveDate;

    #[test]
    fn midnight_wait() {
        let now = NaiveDate::from_ymd_opt(2025, 1, 10)
            .unwrap()
            .and_hms_opt(23, 30, 0)
            .unwrap();
        assert_eq!(until_next_midnight(now), Duration::from_secs(30 * 60));
    }

    #[tokio::test]
    async fn sweeper_expires_past_reservations() {
        let engine = Arc::new(
            Engine::open(
                Arc::new(MemoryStore::new()),
                Arc::new(NotifyHub::new()),
                Options {
                    seed_rooms: vec!["Study Room 1".into()],
                    ..Options::default()
                },
            )
            .await
            .unwrap(),
        );
        let yesterday = Local::now().date_naive().pred_opt().unwrap();
        let req = ReservationRequest::new(yesterday, TimeRange::new(540, 600), Purpose::Meeting, "ana");
        engine.reserve("Study Room 1", req).await.unwrap();

        let task = tokio::spawn(run_sweeper(engine.clone(), Duration::from_millis(10)));
        let mut waited = 0;
        while engine.list_reservations("Study Room 1", yesterday).await.unwrap().len() == 1 {
            assert!(waited < 200, "sweeper never ran");
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        task.abort();

        // Soft delete: still stored.
        assert_eq!(engine.all_reservations("Study Room 1").await.unwrap().len(), 1);
    }
}
