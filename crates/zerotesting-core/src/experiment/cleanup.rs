//! LIFO stack of deferred async cleanups.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::obs;

type Deferred = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Deferred cleanups, run newest first by [`unwind`](Self::unwind).
///
/// A failing or panicking cleanup is logged and the rest still run.
#[derive(Default)]
pub struct CleanupStack {
    entries: Vec<(String, Deferred)>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F, Fut>(&mut self, label: impl Into<String>, cleanup: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.entries
            .push((label.into(), Box::new(move || cleanup().boxed())));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels in registration order.
    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|(label, _)| label.as_str()).collect()
    }

    /// Run every cleanup, newest first. Returns how many failed.
    pub async fn unwind(&mut self) -> usize {
        let mut failed = 0;
        while let Some((label, cleanup)) = self.entries.pop() {
            let outcome = AssertUnwindSafe(async move { cleanup().await })
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => tracing::debug!(cleanup = %label, "cleanup done"),
                Ok(Err(e)) => {
                    failed += 1;
                    obs::emit_cleanup_failed(&label, &format!("{e:#}"));
                }
                Err(panic) => {
                    failed += 1;
                    obs::emit_cleanup_failed(&label, &format!("panicked: {}", panic_message(&*panic)));
                }
            }
        }
        failed
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

impl std::fmt::Debug for CleanupStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupStack")
            .field("entries", &self.labels())
            .finish()
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            tracing::warn!(pending = ?self.labels(), "cleanup stack dropped without unwinding");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn test_unwinds_lifo_and_swallows_errors() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CleanupStack::new();
        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            stack.push(name, move || async move {
                order.lock().unwrap().push(name);
                if name == "second" {
                    anyhow::bail!("delete of {name} refused");
                }
                Ok(())
            });
        }
        assert_eq!(stack.labels(), vec!["first", "second", "third"]);

        let failed = stack.unwind().await;
        assert_eq!(failed, 1);
        assert!(stack.is_empty());
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
        assert!(logs_contain("delete of second refused"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_panicking_cleanup_does_not_skip_older_ones() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CleanupStack::new();
        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            stack.push(name, move || async move {
                order.lock().unwrap().push(name);
                if name == "second" {
                    panic!("delete of {name} blew up");
                }
                Ok(())
            });
        }

        let failed = stack.unwind().await;
        assert_eq!(failed, 1);
        assert!(stack.is_empty());
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
        assert!(logs_contain("delete of second blew up"));
    }
}
