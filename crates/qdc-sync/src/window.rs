use chrono::{Days, NaiveDate};
use qdc_core::TimeWindow;

/// Splits `[start, end]` into contiguous windows of at most `max_span_days`
/// calendar days each. Empty when `start > end`; a span of 0 counts as 1.
pub fn plan_windows(start: NaiveDate, end: NaiveDate, max_span_days: u32) -> Vec<TimeWindow> {
    let span = u64::from(max_span_days.max(1));
    let mut windows = Vec::new();
    let mut cursor = start;

    while cursor <= end {
        let last = cursor
            .checked_add_days(Days::new(span - 1))
            .map_or(end, |date| date.min(end));
        let Some(window) = TimeWindow::new(cursor, last) else {
            break;
        };
        windows.push(window);
        match last.succ_opt() {
            Some(next) => cursor = next,
            None => break,
        }
    }

    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn inverted_range_plans_nothing() {
        assert!(plan_windows(d(2024, 1, 2), d(2024, 1, 1), 365).is_empty());
    }

    #[test]
    fn windows_tile_the_range_exactly() {
        let start = d(2023, 12, 20);
        for length in 1..=40i64 {
            let end = start + chrono::Duration::days(length - 1);
            for span in 0..=12u32 {
                let windows = plan_windows(start, end, span);
                assert_eq!(windows.first().unwrap().start(), start);
                assert_eq!(windows.last().unwrap().end(), end);
                for pair in windows.windows(2) {
                    assert_eq!(pair[0].end().succ_opt().unwrap(), pair[1].start());
                }
                let covered: i64 = windows.iter().map(|w| w.len_days()).sum();
                assert_eq!(covered, length);
                assert!(windows
                    .iter()
                    .all(|w| w.len_days() <= i64::from(span.max(1))));
            }
        }
    }

    #[test]
    fn yearly_spans_from_a_fixed_start() {
        let windows = plan_windows(d(2020, 1, 1), d(2022, 3, 1), 365);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].end(), d(2020, 12, 30));
        assert_eq!(windows[1].start(), d(2020, 12, 31));
        assert_eq!(windows[2].end(), d(2022, 3, 1));
    }

    #[test]
    fn single_day_windows() {
        let windows = plan_windows(d(2024, 3, 1), d(2024, 3, 3), 1);
        assert_eq!(windows.len(), 3);
        assert!(windows.iter().all(|w| w.start() == w.end()));
    }
}
