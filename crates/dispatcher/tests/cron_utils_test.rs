use coordinator_dispatcher::cron_utils::CronScheduler;

use chrono::{Duration, TimeZone, Timelike, Utc};

#[test]
fn test_cron_scheduler_creation() {
    assert!(CronScheduler::new("0 0 0 * * *").is_ok());
    assert!(CronScheduler::new("invalid").is_err());
}

#[test]
fn test_should_trigger() {
    let scheduler = CronScheduler::new("0 * * * * *").unwrap();

    let base_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let next_minute_plus = Utc.with_ymd_and_hms(2024, 1, 1, 12, 1, 30).unwrap();
    assert!(scheduler.should_trigger(Some(base_time), next_minute_plus));

    let same_minute = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 30).unwrap();
    assert!(!scheduler.should_trigger(Some(base_time), same_minute));
}

#[test]
fn test_should_trigger_without_last_run() {
    let scheduler = CronScheduler::new("0 * * * * *").unwrap();

    // Never-run tasks only look back one minute.
    let just_past_the_minute = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 30).unwrap();
    assert!(scheduler.should_trigger(None, just_past_the_minute));

    let daily = CronScheduler::new("0 0 9 * * *").unwrap();
    let late_afternoon = Utc.with_ymd_and_hms(2024, 1, 1, 16, 0, 0).unwrap();
    assert!(!daily.should_trigger(None, late_afternoon));
}

#[test]
fn test_next_execution_time() {
    let scheduler = CronScheduler::new("0 0 0 * * *").unwrap();

    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let next = scheduler.next_execution_time(now).unwrap();
    assert_eq!(next.hour(), 0);
    assert_eq!(next.minute(), 0);
    assert_eq!(next.second(), 0);
}

#[test]
fn test_validate_cron_expression() {
    assert!(CronScheduler::validate_cron_expression("0 0 0 * * *").is_ok());
    assert!(CronScheduler::validate_cron_expression("0 */5 * * * *").is_ok());
    assert!(CronScheduler::validate_cron_expression("0 0 9-17 * * 1-5").is_ok());
    assert!(CronScheduler::validate_cron_expression("invalid").is_err());
    assert!(CronScheduler::validate_cron_expression("0 0 0 32 * *").is_err());
    assert!(CronScheduler::validate_cron_expression("").is_err());
}

#[test]
fn test_upcoming_times() {
    let scheduler = CronScheduler::new("0 0 * * * *").unwrap();

    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();
    let upcoming = scheduler.upcoming_times(now, 3);

    assert_eq!(upcoming.len(), 3);
    assert_eq!(upcoming[0].hour(), 13);
    assert_eq!(upcoming[1].hour(), 14);
    assert_eq!(upcoming[2].hour(), 15);
}

#[test]
fn test_time_until_next_execution() {
    let scheduler = CronScheduler::new("0 0 * * * *").unwrap();

    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();
    let time_until = scheduler.time_until_next_execution(now).unwrap();
    assert_eq!(time_until, Duration::minutes(30));
}

#[test]
fn test_daily_schedule_across_days() {
    let daily = CronScheduler::new("0 0 9 * * *").unwrap();

    let yesterday_9am = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
    let today_9_30am = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
    assert!(daily.should_trigger(Some(yesterday_9am), today_9_30am));

    let today_9am = Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap();
    assert!(!daily.should_trigger(Some(today_9am), today_9_30am));
}
