/// Integer-percent progress over a known byte total.
///
/// Percentages never go backwards and `advance` only reports a value when
/// the integer percent changed, so observers get at most ~101 updates.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: u64,
    done: u64,
    last_reported: Option<u8>,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            done: 0,
            last_reported: None,
        }
    }

    pub fn done(&self) -> u64 {
        self.done
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Current percent, rounded to nearest and clamped to 0..=100
    pub fn percent(&self) -> u8 {
        percent_of(self.done, self.total)
    }

    /// Report the starting value (0) once
    pub fn start(&mut self) -> Option<u8> {
        let percent = if self.total == 0 { 0 } else { self.percent() };
        self.report(percent)
    }

    /// Count `bytes` more; returns the new percent if it changed
    pub fn advance(&mut self, bytes: u64) -> Option<u8> {
        self.done = self.done.saturating_add(bytes);
        self.report(self.percent())
    }

    /// Completion boundary: reports 100 unless it was already reported
    pub fn finish(&mut self) -> Option<u8> {
        self.report(100)
    }

    fn report(&mut self, percent: u8) -> Option<u8> {
        match self.last_reported {
            Some(last) if percent <= last => None,
            _ => {
                self.last_reported = Some(percent);
                Some(percent)
            }
        }
    }
}

/// `done / total * 100`, rounded to nearest, clamped to 0..=100.
/// An empty total counts as complete.
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = (done as f64 / total as f64 * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(0, 1000), 0);
        assert_eq!(percent_of(5, 1000), 1);
        assert_eq!(percent_of(4, 1000), 0);
        assert_eq!(percent_of(1000, 1000), 100);
        assert_eq!(percent_of(2000, 1000), 100);
        assert_eq!(percent_of(0, 0), 100);
    }

    #[test]
    fn test_reports_only_on_change_and_never_decreases() {
        let mut progress = ProgressTracker::new(3_000_000);
        assert_eq!(progress.start(), Some(0));

        let mut reported = vec![0u8];
        for _ in 0..46 {
            if let Some(p) = progress.advance(65536) {
                reported.push(p);
            }
        }
        assert!(reported.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*reported.last().unwrap(), 100);

        // Already at 100, finish does not repeat it
        assert_eq!(progress.finish(), None);
    }

    #[test]
    fn test_empty_total_finishes_at_100() {
        let mut progress = ProgressTracker::new(0);
        assert_eq!(progress.start(), Some(0));
        assert_eq!(progress.finish(), Some(100));
        assert_eq!(progress.finish(), None);
    }
}
