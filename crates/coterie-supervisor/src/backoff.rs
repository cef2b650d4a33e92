use std::time::Duration;

/// Finite ordered backoff schedule per §4.H: 5s, 15s, 60s, then 60s forever.
const SCHEDULE_SECS: &[u64] = &[5, 15, 60];

pub fn backoff_for_attempt(attempt: u32) -> Duration {
    let index = attempt.saturating_sub(1) as usize;
    let secs = SCHEDULE_SECS.get(index).copied().unwrap_or(*SCHEDULE_SECS.last().unwrap());
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_follows_5_15_60_then_flat() {
        assert_eq!(backoff_for_attempt(1), Duration::from_secs(5));
        assert_eq!(backoff_for_attempt(2), Duration::from_secs(15));
        assert_eq!(backoff_for_attempt(3), Duration::from_secs(60));
        assert_eq!(backoff_for_attempt(4), Duration::from_secs(60));
        assert_eq!(backoff_for_attempt(9), Duration::from_secs(60));
    }
}
