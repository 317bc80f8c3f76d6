//! Factories that open new backend sessions

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{Backend, Result};

/// Factory trait for creating new backend sessions
///
/// Pools call this lazily whenever they need to grow, and eagerly while
/// pre-warming. Failures are surfaced as `ConnectionCreate` by the caller.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Open a new backend session
    async fn create(&self) -> Result<Box<dyn Backend>>;
}

#[async_trait]
impl<T: ConnectionFactory + ?Sized> ConnectionFactory for Arc<T> {
    async fn create(&self) -> Result<Box<dyn Backend>> {
        (**self).create().await
    }
}

/// Adapts an async closure into a `ConnectionFactory`
///
/// ```ignore
/// let factory = FnFactory::new(|| async {
///     Ok(Box::new(MyBackend::connect("db://primary").await?) as Box<dyn Backend>)
/// });
/// ```
pub struct FnFactory<F> {
    f: F,
}

impl<F> FnFactory<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> ConnectionFactory for FnFactory<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Box<dyn Backend>>> + Send + 'static,
{
    async fn create(&self) -> Result<Box<dyn Backend>> {
        (self.f)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExecuteResult, QueryResult, Value, WharfError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullBackend;

    #[async_trait]
    impl Backend for NullBackend {
        fn driver_name(&self) -> &str {
            "null"
        }

        async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
            Ok(QueryResult::empty())
        }

        async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<ExecuteResult> {
            Ok(ExecuteResult::default())
        }
    }

    #[tokio::test]
    async fn test_fn_factory_invokes_closure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let factory = FnFactory::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, WharfError>(Box::new(NullBackend) as Box<dyn Backend>)
            }
        });

        let backend = factory.create().await.expect("create");
        assert_eq!(backend.driver_name(), "null");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shared_factory_forwards_errors() {
        let factory: Arc<dyn ConnectionFactory> = Arc::new(FnFactory::new(|| async {
            Err::<Box<dyn Backend>, _>(WharfError::backend("connect", "refused"))
        }));

        let err = factory.create().await.err().expect("factory should fail");
        assert!(err.to_string().contains("refused"));
    }
}
