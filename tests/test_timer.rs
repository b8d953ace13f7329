use std::time::{Duration, Instant};

use hppt::http::timer::{ConnectionTimer, Deadline};

const IDLE: Duration = Duration::from_millis(100);
const REQUEST: Duration = Duration::from_millis(1000);

#[test]
fn test_idle_timeout_expires_without_activity() {
    let start = Instant::now();
    let timer = ConnectionTimer::new(IDLE, REQUEST, start);

    assert_eq!(timer.expired(start + Duration::from_millis(99)), None);
    assert_eq!(timer.expired(start + IDLE), Some(Deadline::Idle));
    assert_eq!(timer.next_deadline(), start + IDLE);
}

#[test]
fn test_activity_resets_idle_deadline() {
    let start = Instant::now();
    let mut timer = ConnectionTimer::new(IDLE, REQUEST, start);

    timer.record_activity(start + Duration::from_millis(80));
    assert_eq!(timer.expired(start + Duration::from_millis(150)), None);
    assert_eq!(
        timer.expired(start + Duration::from_millis(180)),
        Some(Deadline::Idle)
    );
}

#[test]
fn test_idle_timeout_applies_during_request() {
    let start = Instant::now();
    let mut timer = ConnectionTimer::new(IDLE, REQUEST, start);
    timer.start_request(start);

    assert!(timer.request_in_progress());
    assert_eq!(timer.expired(start + IDLE), Some(Deadline::Idle));
}

#[test]
fn test_request_deadline_is_not_extended_by_activity() {
    let start = Instant::now();
    let mut timer = ConnectionTimer::new(IDLE, REQUEST, start);
    timer.start_request(start);

    // A slow client trickling bytes keeps the idle deadline away.
    let mut now = start;
    while now < start + REQUEST {
        assert_eq!(timer.expired(now), None);
        now += Duration::from_millis(50);
        timer.record_activity(now);
        timer.start_request(now);
    }
    assert_eq!(timer.expired(start + REQUEST), Some(Deadline::Request));
    assert_eq!(timer.next_deadline(), start + REQUEST);
}

#[test]
fn test_finish_request_clears_request_deadline() {
    let start = Instant::now();
    let mut timer = ConnectionTimer::new(Duration::from_secs(10), REQUEST, start);
    timer.start_request(start);
    timer.finish_request();

    assert!(!timer.request_in_progress());
    assert_eq!(timer.expired(start + REQUEST), None);
    assert_eq!(timer.next_deadline(), start + Duration::from_secs(10));
}

#[test]
fn test_poll_timeout_uses_current_time() {
    let timer = ConnectionTimer::new(Duration::ZERO, REQUEST, Instant::now());
    assert!(timer.poll_timeout());

    let timer = ConnectionTimer::new(Duration::from_secs(60), REQUEST, Instant::now());
    assert!(!timer.poll_timeout());
}
