use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

#[derive(Debug)]
pub enum DispatchError<E> {
    Failed(E),
    TimedOut(Duration),
}

impl<E: fmt::Display> fmt::Display for DispatchError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => write!(f, "{}", e),
            Self::TimedOut(after) => write!(f, "timed out after {:?}", after),
        }
    }
}

/// Result of one work item
#[derive(Debug)]
pub struct Dispatched<T, E> {
    pub symbol: String,
    pub result: Result<T, DispatchError<E>>,
}

/// Bounded fan-out over per-symbol work.
///
/// Items are grouped by symbol and each group runs sequentially inside a
/// single task, so no two concurrent tasks ever touch the same symbol.
/// `run` returns once every task has finished.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrentDispatcher {
    workers: usize,
    task_timeout: Duration,
}

impl ConcurrentDispatcher {
    pub fn new(workers: usize, task_timeout: Duration) -> Self {
        Self {
            workers: workers.max(1),
            task_timeout,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub async fn run<I, T, E, S, F, Fut>(
        &self,
        items: Vec<I>,
        symbol_of: S,
        task: F,
    ) -> Vec<Dispatched<T, E>>
    where
        S: Fn(&I) -> String,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let groups = partition_by_symbol(items, symbol_of);
        let task = &task;
        let timeout = self.task_timeout;

        let results: Vec<Vec<Dispatched<T, E>>> = stream::iter(groups)
            .map(|(symbol, group)| async move {
                let mut out = Vec::with_capacity(group.len());
                for item in group {
                    let result = match tokio::time::timeout(timeout, task(item)).await {
                        Ok(result) => result.map_err(DispatchError::Failed),
                        Err(_) => {
                            tracing::warn!(symbol = %symbol, "⏱️ Task timed out after {:?}", timeout);
                            Err(DispatchError::TimedOut(timeout))
                        }
                    };
                    out.push(Dispatched {
                        symbol: symbol.clone(),
                        result,
                    });
                }
                out
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        results.into_iter().flatten().collect()
    }
}

/// Groups items by symbol, keeping first-seen order of symbols and items
pub fn partition_by_symbol<I, S>(items: Vec<I>, symbol_of: S) -> Vec<(String, Vec<I>)>
where
    S: Fn(&I) -> String,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<I>)> = Vec::new();

    for item in items {
        let symbol = symbol_of(&item);
        match index.get(&symbol) {
            Some(&i) => groups[i].1.push(item),
            None => {
                index.insert(symbol.clone(), groups.len());
                groups.push((symbol, vec![item]));
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_partition_is_disjoint() {
        let items = vec!["ETH-1", "BTC-1", "ETH-2", "SOL-1", "BTC-2"];
        let groups = partition_by_symbol(items, |s| s[..3].to_string());

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0], ("ETH".to_string(), vec!["ETH-1", "ETH-2"]));
        assert_eq!(groups[1], ("BTC".to_string(), vec!["BTC-1", "BTC-2"]));

        let symbols: HashSet<&String> = groups.iter().map(|(s, _)| s).collect();
        assert_eq!(symbols.len(), groups.len());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_and_symbols_never_overlap() {
        let dispatcher = ConcurrentDispatcher::new(2, Duration::from_secs(5));
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let busy_symbols: Mutex<HashSet<String>> = Mutex::new(HashSet::new());

        let items: Vec<(String, u32)> = (0..12)
            .map(|i| (format!("SYM{}", i % 4), i))
            .collect();

        let results = dispatcher
            .run(
                items,
                |(symbol, _)| symbol.clone(),
                |(symbol, i)| {
                    let running = &running;
                    let peak = &peak;
                    let busy_symbols = &busy_symbols;
                    async move {
                        assert!(busy_symbols.lock().unwrap().insert(symbol.clone()));
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);

                        tokio::time::sleep(Duration::from_millis(10)).await;

                        running.fetch_sub(1, Ordering::SeqCst);
                        busy_symbols.lock().unwrap().remove(&symbol);
                        Ok::<u32, String>(i)
                    }
                },
            )
            .await;

        assert_eq!(results.len(), 12);
        assert!(results.iter().all(|d| d.result.is_ok()));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_hung_task_times_out_without_blocking_others() {
        let dispatcher = ConcurrentDispatcher::new(4, Duration::from_millis(50));
        let items = vec!["SLOW".to_string(), "FAST".to_string()];

        let results = dispatcher
            .run(items, |s| s.clone(), |symbol| async move {
                if symbol == "SLOW" {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                }
                Ok::<(), String>(())
            })
            .await;

        let slow = results.iter().find(|d| d.symbol == "SLOW").unwrap();
        let fast = results.iter().find(|d| d.symbol == "FAST").unwrap();
        assert!(matches!(slow.result, Err(DispatchError::TimedOut(_))));
        assert!(fast.result.is_ok());
    }

    #[tokio::test]
    async fn test_failures_are_reported_per_item() {
        let dispatcher = ConcurrentDispatcher::new(4, Duration::from_secs(1));
        let results = dispatcher
            .run(vec![1, 2, 3], |i| format!("S{}", i), |i| async move {
                if i == 2 {
                    Err("connection reset".to_string())
                } else {
                    Ok(i)
                }
            })
            .await;

        let failed: Vec<&String> = results
            .iter()
            .filter(|d| d.result.is_err())
            .map(|d| &d.symbol)
            .collect();
        assert_eq!(failed, vec!["S2"]);
    }
}
