//! Result post-filter

use crate::worker::ResultSet;

/// Platform value meaning "no filtering"
pub const ALL_PLATFORMS: &str = "all";

/// Keep only results from `platform`, compared case-insensitively after
/// trimming. Absent, blank or "all" returns `results` unchanged.
pub fn filter(results: ResultSet, platform: Option<&str>) -> ResultSet {
    let wanted = match platform.map(normalize) {
        Some(p) if !p.is_empty() && p != ALL_PLATFORMS => p,
        _ => return results,
    };

    results
        .into_iter()
        .filter(|item| normalize(&item.platform) == wanted)
        .collect()
}

fn normalize(platform: &str) -> String {
    platform.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::ResultItem;

    fn sample() -> ResultSet {
        vec![
            ResultItem::new("LeetCode", "Binary Search", "https://x"),
            ResultItem::new("Codeforces", "BS", "https://y"),
            ResultItem::new("  leetcode ", "Two Sum", "https://z"),
            ResultItem::new("", "Unknown", "https://w"),
        ]
    }

    #[test]
    fn test_absent_or_all_is_identity() {
        assert_eq!(filter(sample(), None), sample());
        assert_eq!(filter(sample(), Some("all")), sample());
        assert_eq!(filter(sample(), Some(" ALL ")), sample());
        assert_eq!(filter(sample(), Some("   ")), sample());
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        let filtered = filter(sample(), Some(" LEETCODE"));
        let names: Vec<_> = filtered.iter().map(|r| r.problem_name.as_str()).collect();
        assert_eq!(names, vec!["Binary Search", "Two Sum"]);
    }

    #[test]
    fn test_preserves_order() {
        let filtered = filter(sample(), Some("leetcode"));
        assert_eq!(filtered[0].problem_link, "https://x");
        assert_eq!(filtered[1].problem_link, "https://z");
    }

    #[test]
    fn test_empty_platform_never_matches() {
        let filtered = filter(sample(), Some("codeforces"));
        assert_eq!(filtered.len(), 1);
        assert!(filter(sample(), Some("AtCoder")).is_empty());
    }

    #[test]
    fn test_idempotent() {
        let once = filter(sample(), Some("LeetCode"));
        let twice = filter(once.clone(), Some("LeetCode"));
        assert_eq!(once, twice);
    }
}
