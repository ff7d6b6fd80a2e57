//! Unread and notification policy, plus human-readable ages.

use chrono::{DateTime, TimeZone, Utc};

use crate::domain::PullRequest;

const MS_PER_MINUTE: i64 = 60 * 1000;
const MS_PER_DAY: i64 = 24 * 60 * MS_PER_MINUTE;

/// True when any pull was updated after the user last looked.
pub fn has_unread(pulls: &[PullRequest], last_view: DateTime<Utc>) -> bool {
    pulls.iter().any(|pull| pull.updated_after(last_view))
}

/// True when `pull` changed since the last notification and, if keywords are
/// configured, mentions one of them (case-sensitive) in its title or body.
pub fn should_notify(
    pull: &PullRequest,
    last_notification: DateTime<Utc>,
    keywords: &[String],
) -> bool {
    if !pull.updated_after(last_notification) {
        return false;
    }
    keywords.is_empty()
        || keywords.iter().any(|word| {
            pull.title.contains(word.as_str())
                || pull
                    .body
                    .as_deref()
                    .is_some_and(|body| body.contains(word.as_str()))
        })
}

/// Orders pulls newest first. The sort is stable, and pulls without a
/// timestamp go last.
pub fn sort_newest_first(pulls: &mut [PullRequest]) {
    pulls.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

/// Describes how long ago `then` was, e.g. "3 hours ago".
///
/// Day counts are measured from midnight of `now` in its own time zone, so
/// something from late yesterday reads "1 day ago" rather than "2 days ago".
pub fn relative_age<Tz: TimeZone>(then: Option<DateTime<Utc>>, now: &DateTime<Tz>) -> String {
    let Some(then) = then else {
        return "some time ago".to_owned();
    };

    let now_utc = now.with_timezone(&Utc);
    let minutes = (now_utc - then)
        .num_milliseconds()
        .div_euclid(MS_PER_MINUTE);
    if minutes == 0 {
        return "just now".to_owned();
    }
    if minutes < 60 {
        return format_ago("minute", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format_ago("hour", hours);
    }

    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| now.timezone().from_local_datetime(&naive).earliest())
        .map_or(now_utc, |local| local.with_timezone(&Utc));
    let since_midnight = (midnight - then).num_milliseconds();
    let days = since_midnight.div_euclid(MS_PER_DAY)
        + i64::from(since_midnight.rem_euclid(MS_PER_DAY) != 0);

    if days < 14 {
        return format_ago("day", days);
    }

    let weeks = days / 7;
    if weeks <= 4 {
        return format_ago("week", weeks);
    }

    let months = days / 30;
    if months <= 23 {
        return format_ago("month", months);
    }

    let years = (days as f64 / 365.0).round() as i64;
    format_ago("year", years)
}

fn format_ago(period: &str, count: i64) -> String {
    format!("{count} {} ago", pluralize(period, count))
}

/// Adds "s" (or "es" after a trailing "s") unless `count` is one.
pub fn pluralize(word: &str, count: i64) -> String {
    if count == 1 {
        word.to_owned()
    } else if word.ends_with('s') {
        format!("{word}es")
    } else {
        format!("{word}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::pull;
    use chrono::{Duration, FixedOffset};
    use proptest::prelude::*;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn keywords(words: &[&str]) -> Vec<String> {
        words.iter().map(|word| word.to_string()).collect()
    }

    #[test]
    fn no_pulls_means_nothing_unread() {
        assert!(!has_unread(&[], DateTime::<Utc>::default()));
        assert!(!has_unread(&[], at(4_102_444_800_000)));
    }

    #[test]
    fn should_notify_without_keywords_is_permissive() {
        let pull = pull("octo", "widgets", 1, 2_000);
        assert!(should_notify(&pull, at(1_000), &[]));
        assert!(!should_notify(&pull, at(2_000), &[]));
    }

    #[test]
    fn should_notify_matches_keywords_case_sensitively() {
        let mut pull = pull("octo", "widgets", 1, 2_000);
        pull.title = "Fix URGENT crash".into();
        pull.body = Some("needs a hotfix".into());

        assert!(should_notify(&pull, at(0), &keywords(&["URGENT"])));
        assert!(should_notify(&pull, at(0), &keywords(&["nope", "hotfix"])));
        assert!(!should_notify(&pull, at(0), &keywords(&["urgent"])));

        pull.body = None;
        assert!(!should_notify(&pull, at(0), &keywords(&["hotfix"])));
    }

    #[test]
    fn should_notify_ignores_keywords_for_old_pulls() {
        let pull = pull("octo", "widgets", 1, 500);
        assert!(!should_notify(&pull, at(1_000), &keywords(&["Change"])));
    }

    #[test]
    fn sort_puts_newest_first_and_unknown_last() {
        let mut pulls = vec![pull("a", "x", 1, 10), pull("a", "x", 2, 30), pull("a", "x", 3, 20)];
        pulls[0].updated_at = None;
        sort_newest_first(&mut pulls);
        let order: Vec<u64> = pulls.iter().map(|pull| pull.number).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    fn now_utc() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn relative_age_minutes_and_hours() {
        let now = now_utc();
        let ago = |d: Duration| relative_age(Some(now - d), &now);

        assert_eq!(ago(Duration::zero()), "just now");
        assert_eq!(ago(Duration::seconds(59)), "just now");
        assert_eq!(ago(Duration::minutes(1)), "1 minute ago");
        assert_eq!(ago(Duration::minutes(45)), "45 minutes ago");
        assert_eq!(ago(Duration::minutes(90)), "1 hour ago");
        assert_eq!(ago(Duration::hours(23)), "23 hours ago");
    }

    #[test]
    fn relative_age_counts_days_from_local_midnight() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2024, 6, 15, 1, 0, 0).unwrap();
        let then = now.with_timezone(&Utc) - Duration::hours(25);
        assert_eq!(relative_age(Some(then), &now), "1 day ago");

        let late = tz.with_ymd_and_hms(2024, 6, 15, 23, 0, 0).unwrap();
        let then = late.with_timezone(&Utc) - Duration::hours(47);
        assert_eq!(relative_age(Some(then), &late), "1 day ago");
        let then = late.with_timezone(&Utc) - Duration::hours(49);
        assert_eq!(relative_age(Some(then), &late), "2 days ago");
    }

    #[test]
    fn relative_age_weeks_months_years() {
        let now = now_utc();
        let ago = |days: i64| relative_age(Some(now - Duration::days(days)), &now);

        assert_eq!(ago(13), "13 days ago");
        assert_eq!(ago(14), "2 weeks ago");
        assert_eq!(ago(34), "4 weeks ago");
        assert_eq!(ago(35), "1 month ago");
        assert_eq!(ago(400), "13 months ago");
        assert_eq!(ago(719), "23 months ago");
        assert_eq!(ago(720), "2 years ago");
        assert_eq!(ago(800), "2 years ago");
    }

    #[test]
    fn relative_age_without_instant() {
        assert_eq!(relative_age(None, &now_utc()), "some time ago");
    }

    #[test]
    fn pluralize_is_naive() {
        assert_eq!(pluralize("day", 1), "day");
        assert_eq!(pluralize("day", 2), "days");
        assert_eq!(pluralize("day", 0), "days");
        assert_eq!(pluralize("bus", 3), "buses");
    }

    proptest! {
        #[test]
        fn sorted_output_is_descending(stamps in proptest::collection::vec(0i64..1_000_000, 0..40)) {
            let mut pulls: Vec<PullRequest> = stamps
                .iter()
                .enumerate()
                .map(|(i, ms)| pull("o", "p", i as u64, *ms))
                .collect();
            sort_newest_first(&mut pulls);
            prop_assert!(pulls.windows(2).all(|w| w[0].updated_at >= w[1].updated_at));
        }

        #[test]
        fn already_sorted_input_is_unchanged(mut stamps in proptest::collection::vec(0i64..1_000, 0..40)) {
            stamps.sort_unstable_by(|a, b| b.cmp(a));
            let pulls: Vec<PullRequest> = stamps
                .iter()
                .enumerate()
                .map(|(i, ms)| pull("o", "p", i as u64, *ms))
                .collect();
            let mut sorted = pulls.clone();
            sort_newest_first(&mut sorted);
            prop_assert_eq!(sorted, pulls);
        }

        #[test]
        fn unread_iff_newest_exceeds_watermark(
            stamps in proptest::collection::vec(0i64..1_000, 0..20),
            watermark in 0i64..1_000,
        ) {
            let pulls: Vec<PullRequest> = stamps
                .iter()
                .map(|ms| pull("o", "p", 1, *ms))
                .collect();
            let expected = stamps.iter().max().is_some_and(|max| *max > watermark);
            prop_assert_eq!(has_unread(&pulls, at(watermark)), expected);
        }
    }
}
