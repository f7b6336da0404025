use std::sync::Mutex;
use std::thread;

/// Applies `op` to every item using at most `parallelism` worker threads. Results are
/// returned in the same order as the input, so fallible operations can return `Result`
/// and have their failures matched back to the items that produced them.
pub fn parallelize<T, R, F>(items: Vec<T>, parallelism: usize, op: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let total = items.len();

    if total <= 1 || parallelism <= 1 {
        return items.into_iter().map(op).collect();
    }

    let work: Mutex<Vec<(usize, T)>> = Mutex::new(items.into_iter().enumerate().collect());
    let results: Mutex<Vec<(usize, R)>> = Mutex::new(Vec::with_capacity(total));
    let workers = parallelism.min(total);

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let next = work.lock().expect("work queue lock poisoned").pop();
                match next {
                    Some((index, item)) => {
                        let result = op(item);
                        results
                            .lock()
                            .expect("result list lock poisoned")
                            .push((index, result));
                    }
                    None => break,
                }
            });
        }
    });

    let mut results = results.into_inner().expect("result list lock poisoned");
    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, result)| result).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::parallelize;

    #[test]
    fn results_are_positional() {
        let items: Vec<u32> = (0..100).collect();
        let results = parallelize(items, 10, |n| n * 2);

        assert_eq!((0..100).map(|n| n * 2).collect::<Vec<u32>>(), results);
    }

    #[test]
    fn failures_do_not_stop_other_items() {
        let items = vec![1, 2, 3, 4, 5];
        let results = parallelize(items, 3, |n| {
            if n % 2 == 0 {
                Err(format!("failed on {}", n))
            } else {
                Ok(n)
            }
        });

        assert_eq!(
            vec![
                Ok(1),
                Err("failed on 2".to_string()),
                Ok(3),
                Err("failed on 4".to_string()),
                Ok(5),
            ],
            results
        );
    }

    #[test]
    fn every_item_processed_exactly_once() {
        let count = AtomicUsize::new(0);
        let items: Vec<usize> = (0..57).collect();

        let results = parallelize(items, 4, |n| {
            count.fetch_add(1, Ordering::SeqCst);
            n
        });

        assert_eq!(57, results.len());
        assert_eq!(57, count.load(Ordering::SeqCst));
    }

    #[test]
    fn serial_when_single_worker() {
        let results = parallelize(vec![1, 2, 3], 1, |n| n + 1);
        assert_eq!(vec![2, 3, 4], results);
    }
}
