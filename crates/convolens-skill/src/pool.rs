//! Bounded worker pool with deterministic result ordering.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Map `f` over `items` on up to `workers` threads. Results are returned in
/// input order regardless of completion order, so downstream writes are
/// deterministic in content.
pub fn map_indexed<T, R, F>(items: &[T], workers: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> R + Sync,
{
    if items.is_empty() {
        return Vec::new();
    }

    let workers = workers.max(1).min(items.len());
    if workers == 1 {
        return items.iter().enumerate().map(|(idx, item)| f(idx, item)).collect();
    }

    let next = AtomicUsize::new(0);
    let results: Mutex<Vec<(usize, R)>> = Mutex::new(Vec::with_capacity(items.len()));

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let idx = next.fetch_add(1, Ordering::SeqCst);
                if idx >= items.len() {
                    break;
                }
                let result = f(idx, &items[idx]);
                results
                    .lock()
                    .expect("worker pool result lock poisoned")
                    .push((idx, result));
            });
        }
    });

    let mut collected = results.into_inner().expect("worker pool result lock poisoned");
    collected.sort_by_key(|(idx, _)| *idx);
    collected.into_iter().map(|(_, result)| result).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn preserves_input_order() {
        let items: Vec<usize> = (0..50).collect();
        let doubled = map_indexed(&items, 4, |_, item| item * 2);
        assert_eq!(doubled, (0..50).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn single_worker_path() {
        let items = vec!["a", "b", "c"];
        let upper = map_indexed(&items, 1, |idx, item| format!("{}{}", idx, item));
        assert_eq!(upper, vec!["0a", "1b", "2c"]);
    }

    #[test]
    fn every_item_processed_exactly_once() {
        let calls = AtomicUsize::new(0);
        let items: Vec<u32> = (0..33).collect();
        let results = map_indexed(&items, 7, |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(results.len(), 33);
        assert_eq!(calls.load(Ordering::SeqCst), 33);
    }

    #[test]
    fn empty_input() {
        let items: Vec<u32> = Vec::new();
        let results: Vec<u32> = map_indexed(&items, 4, |_, item| *item);
        assert!(results.is_empty());
    }
}
