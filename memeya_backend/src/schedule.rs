//! Activity schedule: decides what a heartbeat opportunity should do.
//!
//! [`evaluate`] is a pure function of the current instant, the in-memory
//! [`ScheduleState`], the configuration, and a caller-supplied random roll,
//! so every branch can be tested by injecting `now`.

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ScheduleConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleState {
    /// Set by an operator command; only an explicit new-day call clears it.
    pub sleep_today: bool,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_morning_news_at: Option<DateTime<Utc>>,
}

impl ScheduleState {
    pub fn go_to_sleep(&mut self) {
        self.sleep_today = true;
    }

    /// There is no automatic midnight reset; the operator (or outer loop) calls this.
    pub fn new_day(&mut self) {
        self.sleep_today = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    Sleeping,
    OutsideActiveHours,
    NotDue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatChoice {
    Reflect,
    SearchNews,
    StayQuiet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleAction {
    Idle(IdleReason),
    MorningNews,
    Heartbeat(HeartbeatChoice),
}

pub fn local_offset(config: &ScheduleConfig) -> FixedOffset {
    FixedOffset::east_opt(config.utc_offset_hours * 3600).unwrap_or_else(|| {
        tracing::warn!(
            "Invalid utc_offset_hours {}; falling back to UTC",
            config.utc_offset_hours
        );
        Utc.fix()
    })
}

pub fn local_hour(now: DateTime<Utc>, config: &ScheduleConfig) -> u32 {
    now.with_timezone(&local_offset(config)).hour()
}

pub fn is_active_hour(hour: u32, config: &ScheduleConfig) -> bool {
    hour >= config.active_start_hour && hour <= config.active_end_hour
}

/// Map a uniform roll in `[0, 1)` onto the heartbeat actions. Quiet takes
/// `quiet_weight`; reflect and news split the remainder evenly.
pub fn choose_heartbeat(roll: f64, quiet_weight: f64) -> HeartbeatChoice {
    let quiet = quiet_weight.clamp(0.0, 1.0);
    if roll < quiet {
        HeartbeatChoice::StayQuiet
    } else if roll < quiet + (1.0 - quiet) / 2.0 {
        HeartbeatChoice::Reflect
    } else {
        HeartbeatChoice::SearchNews
    }
}

pub fn evaluate(
    now: DateTime<Utc>,
    state: &ScheduleState,
    config: &ScheduleConfig,
    roll: f64,
) -> (ScheduleAction, ScheduleState) {
    if state.sleep_today {
        return (ScheduleAction::Idle(IdleReason::Sleeping), state.clone());
    }

    let hour = local_hour(now, config);

    // Morning news is its own carve-out and is checked before the active window.
    if hour == config.morning_news_hour {
        let gap = ChronoDuration::minutes(config.morning_news_min_gap_mins);
        let due = state
            .last_morning_news_at
            .map(|last| now - last > gap)
            .unwrap_or(true);
        if due {
            let mut next = state.clone();
            next.last_morning_news_at = Some(now);
            return (ScheduleAction::MorningNews, next);
        }
    }

    if !is_active_hour(hour, config) {
        return (
            ScheduleAction::Idle(IdleReason::OutsideActiveHours),
            state.clone(),
        );
    }

    let interval = ChronoDuration::minutes(config.heartbeat_interval_mins);
    let due = state
        .last_heartbeat_at
        .map(|last| now - last >= interval)
        .unwrap_or(true);
    if !due {
        return (ScheduleAction::Idle(IdleReason::NotDue), state.clone());
    }

    let mut next = state.clone();
    next.last_heartbeat_at = Some(now);
    (
        ScheduleAction::Heartbeat(choose_heartbeat(roll, config.quiet_weight)),
        next,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// UTC instant for a given local (UTC+8) wall-clock time on 2025-05-10.
    fn local(hour: u32, minute: u32) -> DateTime<Utc> {
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 5, 10, hour, minute, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn config() -> ScheduleConfig {
        ScheduleConfig::default()
    }

    #[test]
    fn sleeping_blocks_everything() {
        let mut state = ScheduleState::default();
        state.go_to_sleep();

        for hour in [8, 12, 23] {
            let (action, next) = evaluate(local(hour, 10), &state, &config(), 0.9);
            assert_eq!(action, ScheduleAction::Idle(IdleReason::Sleeping));
            assert_eq!(next, state);
        }

        state.new_day();
        let (action, _) = evaluate(local(12, 0), &state, &config(), 0.9);
        assert_eq!(action, ScheduleAction::Heartbeat(HeartbeatChoice::SearchNews));
    }

    #[test]
    fn morning_news_fires_at_eight_outside_active_window() {
        let now = local(8, 5);
        let state = ScheduleState {
            last_morning_news_at: Some(now - ChronoDuration::minutes(51)),
            ..Default::default()
        };

        let (action, next) = evaluate(now, &state, &config(), 0.0);
        assert_eq!(action, ScheduleAction::MorningNews);
        assert_eq!(next.last_morning_news_at, Some(now));
        assert_eq!(next.last_heartbeat_at, None);
    }

    #[test]
    fn morning_news_fires_when_never_run() {
        let (action, _) = evaluate(local(8, 0), &ScheduleState::default(), &config(), 0.0);
        assert_eq!(action, ScheduleAction::MorningNews);
    }

    #[test]
    fn morning_news_suppressed_within_gap() {
        let now = local(8, 40);
        for gap in [10, 50] {
            let state = ScheduleState {
                last_morning_news_at: Some(now - ChronoDuration::minutes(gap)),
                ..Default::default()
            };
            let (action, next) = evaluate(now, &state, &config(), 0.0);
            assert_eq!(action, ScheduleAction::Idle(IdleReason::OutsideActiveHours));
            assert_eq!(next, state);
        }
    }

    #[test]
    fn outside_active_window_is_idle() {
        for hour in [0, 3, 7] {
            let (action, _) = evaluate(local(hour, 30), &ScheduleState::default(), &config(), 0.9);
            assert_eq!(action, ScheduleAction::Idle(IdleReason::OutsideActiveHours));
        }
        let (action, _) = evaluate(local(9, 0), &ScheduleState::default(), &config(), 0.9);
        assert!(matches!(action, ScheduleAction::Heartbeat(_)));
        let (action, _) = evaluate(local(23, 59), &ScheduleState::default(), &config(), 0.9);
        assert!(matches!(action, ScheduleAction::Heartbeat(_)));
    }

    #[test]
    fn heartbeat_not_due_leaves_state_unchanged() {
        let now = local(14, 0);
        let last = now - ChronoDuration::minutes(59);
        let state = ScheduleState {
            last_heartbeat_at: Some(last),
            ..Default::default()
        };

        let (action, next) = evaluate(now, &state, &config(), 0.9);
        assert_eq!(action, ScheduleAction::Idle(IdleReason::NotDue));
        assert_eq!(next.last_heartbeat_at, Some(last));
    }

    #[test]
    fn heartbeat_due_updates_timestamp_even_when_quiet() {
        let now = local(14, 0);
        let state = ScheduleState {
            last_heartbeat_at: Some(now - ChronoDuration::minutes(60)),
            ..Default::default()
        };

        let (action, next) = evaluate(now, &state, &config(), 0.1);
        assert_eq!(action, ScheduleAction::Heartbeat(HeartbeatChoice::StayQuiet));
        assert_eq!(next.last_heartbeat_at, Some(now));
    }

    #[test]
    fn heartbeat_weights_split_remainder() {
        assert_eq!(choose_heartbeat(0.0, 0.5), HeartbeatChoice::StayQuiet);
        assert_eq!(choose_heartbeat(0.49, 0.5), HeartbeatChoice::StayQuiet);
        assert_eq!(choose_heartbeat(0.5, 0.5), HeartbeatChoice::Reflect);
        assert_eq!(choose_heartbeat(0.74, 0.5), HeartbeatChoice::Reflect);
        assert_eq!(choose_heartbeat(0.75, 0.5), HeartbeatChoice::SearchNews);
        assert_eq!(choose_heartbeat(0.99, 0.5), HeartbeatChoice::SearchNews);
    }

    #[test]
    fn local_hour_uses_fixed_offset() {
        let now = Utc.with_ymd_and_hms(2025, 5, 10, 0, 30, 0).unwrap();
        assert_eq!(local_hour(now, &config()), 8);
    }
}
