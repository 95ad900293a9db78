// src/scheduler.rs
use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone};
use std::future::Future;

/// Next wall-clock slot strictly after `now` among `hours` (0-23), in `now`'s zone.
///
/// Slots that fall into a DST gap are skipped. `None` only when `hours` is empty.
pub fn next_run_after<Tz: TimeZone>(now: &DateTime<Tz>, hours: &[u32]) -> Option<DateTime<Tz>> {
    let mut sorted: Vec<u32> = hours.iter().copied().filter(|h| *h < 24).collect();
    sorted.sort_unstable();
    sorted.dedup();
    if sorted.is_empty() {
        return None;
    }

    let tz = now.timezone();
    let today = now.date_naive();
    for day in 0..=2 {
        let date = today + Duration::days(day);
        for &h in &sorted {
            let Some(t) = NaiveTime::from_hms_opt(h, 0, 0) else {
                continue;
            };
            let Some(slot) = tz.from_local_datetime(&date.and_time(t)).earliest() else {
                continue;
            };
            if slot > *now {
                return Some(slot);
            }
        }
    }
    None
}

/// Sleeps until each configured local hour and runs `job`, forever.
pub async fn run_at_hours<F, Fut>(hours: &[u32], mut job: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let now = Local::now();
        let next = next_run_after(&now, hours)
            .ok_or_else(|| anyhow!("no schedule hours configured"))?;
        let wait = (next.clone() - now).to_std().unwrap_or_default();
        tracing::info!(next = %next.format("%Y-%m-%d %H:%M"), "next scheduled run in {}s", wait.as_secs());
        tokio::time::sleep(wait).await;
        job().await;
    }
}
