//! Bounded-wait fan-in: run one lookup per subject and collect whatever
//! finishes before the deadline.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::warn;

/// Results of a fan-in.
#[derive(Debug, Clone, PartialEq)]
pub struct Gathered<T> {
    pub entries: Vec<T>,
    /// Subjects that failed or did not answer in time.
    pub missing: Vec<String>,
    /// Every subject answered.
    pub success: bool,
}

/// Run `lookup` for every subject concurrently until all finish or
/// `deadline` passes. Unfinished lookups are aborted and their results
/// discarded.
pub async fn collect_until<T, E, F, Fut>(
    subjects: Vec<String>,
    deadline: Duration,
    lookup: F,
) -> Gathered<T>
where
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let mut set = JoinSet::new();
    for subject in &subjects {
        let fut = lookup(subject.clone());
        let subject = subject.clone();
        set.spawn(async move { (subject, fut.await) });
    }

    let mut entries = Vec::with_capacity(subjects.len());
    let mut answered: HashSet<String> = HashSet::new();
    let timer = tokio::time::sleep(deadline);
    tokio::pin!(timer);

    loop {
        tokio::select! {
            biased;

            joined = set.join_next() => match joined {
                None => break,
                Some(Ok((subject, Ok(value)))) => {
                    answered.insert(subject);
                    entries.push(value);
                }
                Some(Ok((subject, Err(e)))) => warn!("Lookup for {} failed: {}", subject, e),
                Some(Err(e)) => warn!("Lookup task failed: {}", e),
            },
            _ = &mut timer => {
                warn!("Fan-in deadline hit with {}/{} answers", answered.len(), subjects.len());
                break;
            }
        }
    }
    set.abort_all();

    let missing: Vec<String> = subjects
        .into_iter()
        .filter(|s| !answered.contains(s))
        .collect();
    Gathered {
        success: missing.is_empty(),
        entries,
        missing,
    }
}
