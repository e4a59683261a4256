/// Stable sorting with a plain "less than" predicate.
///
/// Several of the orderings used for ranking are not total orders (a record with a gateway error
/// compares on latency alone while others compare on row counts), and `slice::sort_by` is allowed
/// to panic when handed an inconsistent comparator.  This is a top-down merge sort that only ever
/// asks `less(b, a)` and takes from the left run unless the right element is strictly less, so it
/// is stable and always terminates, whatever the predicate does.

pub fn stable_sort_by_less<T, F>(v: &mut Vec<T>, less: F)
where
    F: Fn(&T, &T) -> bool,
{
    if v.len() < 2 {
        return;
    }
    let items = std::mem::take(v);
    *v = merge_sort(items, &less);
}

fn merge_sort<T, F>(mut items: Vec<T>, less: &F) -> Vec<T>
where
    F: Fn(&T, &T) -> bool,
{
    if items.len() < 2 {
        return items;
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items, less);
    let right = merge_sort(right, less);

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(a), Some(b)) => less(b, a),
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        let next = if take_right { right.next() } else { left.next() };
        if let Some(x) = next {
            merged.push(x);
        }
    }
    merged
}

#[test]
fn test_stable_sort() {
    let mut v = vec![(3, 'a'), (1, 'b'), (2, 'c'), (1, 'd'), (3, 'e'), (0, 'f')];
    stable_sort_by_less(&mut v, |a, b| a.0 < b.0);
    assert!(v == vec![(0, 'f'), (1, 'b'), (1, 'd'), (2, 'c'), (3, 'a'), (3, 'e')]);

    let mut empty: Vec<i32> = vec![];
    stable_sort_by_less(&mut empty, |a, b| a < b);
    assert!(empty.is_empty());
}

#[test]
fn test_inconsistent_predicate() {
    // Nothing is ever less, and everything is less: both must terminate and keep every element.
    let mut v = (0..100).collect::<Vec<i32>>();
    stable_sort_by_less(&mut v, |_, _| false);
    assert!(v == (0..100).collect::<Vec<i32>>());
    stable_sort_by_less(&mut v, |_, _| true);
    assert!(v.len() == 100);
}
