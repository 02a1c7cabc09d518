//! Order-index arithmetic.

use chrono::Utc;

use crate::core::Item;

/// Largest order index the backend accepts (`i32::MAX`).
pub const MAX_ORDER: i64 = 2_147_483_647;

/// Highest `order_index` among the given siblings.
#[must_use]
pub fn max_sibling_index<'a, I>(siblings: I) -> Option<i64>
where
    I: IntoIterator<Item = &'a Item>,
{
    siblings.into_iter().map(|item| item.order_index).max()
}

/// Index for appending after the last sibling; `0` for an empty parent.
#[must_use]
pub fn append_index(max_sibling: Option<i64>) -> i64 {
    max_sibling.map_or(0, |max| max.saturating_add(1).min(MAX_ORDER))
}

/// Index for a moved item.
///
/// Lands halfway between the highest sibling and [`MAX_ORDER`], perturbed by
/// the wall clock and the retry attempt so that concurrent moves into the same
/// parent pick different values. Never exceeds `MAX_ORDER - 1`.
#[must_use]
pub fn insert_index(max_sibling: Option<i64>, retry_attempt: u32, now_millis: i64) -> i64 {
    let max_sibling = max_sibling.unwrap_or(0).clamp(0, MAX_ORDER);
    let base = (max_sibling + MAX_ORDER) / 2;
    let unique = now_millis.rem_euclid(10_000) + i64::from(retry_attempt) * 1_000;
    base.saturating_add(unique).min(MAX_ORDER - 1)
}

/// An index strictly between two neighbours, if one exists.
///
/// `None` stands for "no neighbour" on that side.
#[must_use]
pub fn between(before: Option<i64>, after: Option<i64>) -> Option<i64> {
    let lo = before.unwrap_or(-1);
    let hi = after.unwrap_or(MAX_ORDER);
    if hi - lo < 2 {
        return None;
    }
    Some(lo + (hi - lo) / 2)
}

/// Current wall clock in milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ItemType;

    #[test]
    fn test_append_index() {
        assert_eq!(append_index(None), 0);
        assert_eq!(append_index(Some(0)), 1);
        assert_eq!(append_index(Some(41)), 42);
        assert_eq!(append_index(Some(MAX_ORDER)), MAX_ORDER);
    }

    #[test]
    fn test_max_sibling_index() {
        let items = vec![
            Item::new("a", "ws", ItemType::Note, "a").with_order(3),
            Item::new("b", "ws", ItemType::Note, "b").with_order(9),
        ];
        assert_eq!(max_sibling_index(&items), Some(9));
        assert_eq!(max_sibling_index(&Vec::<Item>::new()), None);
    }

    #[test]
    fn test_insert_index_formula() {
        // No siblings: base is floor(MAX_ORDER / 2)
        assert_eq!(insert_index(None, 0, 1_234), 1_073_741_823 + 1_234);
        assert_eq!(insert_index(Some(10), 0, 20_005), (10 + MAX_ORDER) / 2 + 5);
        assert_eq!(insert_index(Some(10), 2, 20_005), (10 + MAX_ORDER) / 2 + 2_005);
    }

    #[test]
    fn test_insert_index_stays_below_max() {
        assert_eq!(insert_index(Some(MAX_ORDER), 3, 9_999), MAX_ORDER - 1);
        assert_eq!(insert_index(Some(MAX_ORDER - 5), 0, 0), MAX_ORDER - 3);
        for attempt in 0..3 {
            for millis in [0, 4_321, 9_999, -17] {
                let idx = insert_index(Some(MAX_ORDER - 2), attempt, millis);
                assert!(idx <= MAX_ORDER - 1);
            }
        }
    }

    #[test]
    fn test_retry_attempt_changes_index() {
        let now = 1_700_000_000_123;
        let first = insert_index(Some(5), 0, now);
        let second = insert_index(Some(5), 1, now);
        assert_ne!(first, second);
        assert_eq!(second - first, 1_000);
    }

    #[test]
    fn test_between() {
        assert_eq!(between(Some(0), Some(10)), Some(5));
        assert_eq!(between(Some(4), Some(5)), None);
        assert_eq!(between(Some(4), Some(6)), Some(5));
        assert_eq!(between(None, Some(2)), Some(0));
        assert_eq!(between(None, Some(0)), None);
        let tail = between(Some(100), None).unwrap();
        assert!(tail > 100 && tail < MAX_ORDER);
    }
}
