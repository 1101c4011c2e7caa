//! Pure sliding-window math shared by both limiter stores. No I/O.

use super::{Decision, Limit};

/// Live-entry census for one key at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSurvey {
    /// Entries still inside the window, before the event being checked.
    pub live: u32,
    /// Timestamp of the oldest surviving entry.
    pub oldest_ms: Option<i64>,
}

/// Count surviving entries for one key and find the oldest.
///
/// An entry is expired strictly when `timestamp < now - window`; an entry
/// sitting exactly on the window edge still counts.
pub fn survey<I>(timestamps: I, window_ms: i64, now_ms: i64) -> WindowSurvey
where
    I: IntoIterator<Item = i64>,
{
    let window_start = now_ms - window_ms;
    let mut live = 0u32;
    let mut oldest: Option<i64> = None;
    for ts in timestamps {
        if ts < window_start {
            continue;
        }
        live += 1;
        oldest = Some(match oldest {
            Some(o) if o <= ts => o,
            _ => ts,
        });
    }
    WindowSurvey {
        live,
        oldest_ms: oldest,
    }
}

/// Map a survey to the admission decision for one new event at `now_ms`.
///
/// The caller records the event only when the decision allows it.
pub fn admit(limit: &Limit, survey: WindowSurvey, now_ms: i64) -> Decision {
    let window_ms = limit.window_ms();
    let oldest = survey.oldest_ms.unwrap_or(now_ms);
    let reset_at_ms = oldest + window_ms;

    if survey.live < limit.max_requests {
        Decision {
            allowed: true,
            limit: limit.max_requests,
            remaining: limit.max_requests - survey.live - 1,
            reset_at_ms,
            retry_after_ms: 0,
        }
    } else {
        Decision {
            allowed: false,
            limit: limit.max_requests,
            remaining: 0,
            reset_at_ms,
            retry_after_ms: (reset_at_ms - now_ms).max(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_survey_strict_expiry_edge() {
        // window [40_000, 100_000]: an entry exactly at the edge survives,
        // one millisecond earlier does not.
        let s = survey([40_000, 39_999], 60_000, 100_000);
        assert_eq!(s.live, 1);
        assert_eq!(s.oldest_ms, Some(40_000));
    }

    #[test]
    fn test_survey_empty() {
        let s = survey([], 60_000, 100_000);
        assert_eq!(s.live, 0);
        assert_eq!(s.oldest_ms, None);
    }

    #[test]
    fn test_survey_finds_oldest_regardless_of_order() {
        let s = survey([90_000, 50_000, 70_000], 60_000, 100_000);
        assert_eq!(s.live, 3);
        assert_eq!(s.oldest_ms, Some(50_000));
    }

    #[test]
    fn test_admit_first_event() {
        let limit = Limit::new(2, 60);
        let d = admit(&limit, survey([], 60_000, 0), 0);
        assert!(d.allowed);
        assert_eq!(d.remaining, 1);
        assert_eq!(d.reset_at_ms, 60_000);
    }

    #[test]
    fn test_admit_scenario_two_per_minute() {
        // limit {max: 2, window: 60s}: calls at t=0, 10, 20 give
        // allowed, allowed, denied (retry ~40s); t=61 is allowed again.
        let limit = Limit::new(2, 60);

        let d = admit(&limit, survey([0], 60_000, 10_000), 10_000);
        assert!(d.allowed);
        assert_eq!(d.remaining, 0);

        let d = admit(&limit, survey([0, 10_000], 60_000, 20_000), 20_000);
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert_eq!(d.retry_after_ms, 40_000);
        assert_eq!(d.reset_at_ms, 60_000);

        // t=61s: the t=0 entry expired at t=60s.
        let d = admit(&limit, survey([0, 10_000], 60_000, 61_000), 61_000);
        assert!(d.allowed);
        assert_eq!(d.remaining, 0);
    }

    #[test]
    fn test_admit_zero_max_always_denies() {
        let limit = Limit::new(0, 60);
        let d = admit(&limit, survey([], 60_000, 5_000), 5_000);
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert_eq!(d.retry_after_ms, 60_000);
    }

    #[test]
    fn test_admit_remaining_never_underflows() {
        let limit = Limit::new(3, 60);
        // live == max - 1: last slot, remaining drops to zero.
        let d = admit(
            &limit,
            WindowSurvey {
                live: 2,
                oldest_ms: Some(1_000),
            },
            2_000,
        );
        assert!(d.allowed);
        assert_eq!(d.remaining, 0);
    }
}
