//! Token refresh callback.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

/// Source of fresh auth tokens.
///
/// Called before every connection attempt and whenever the server sends
/// `auth_required`. `None` means the refresh failed.
///
/// Any `Fn() -> impl Future<Output = Option<String>>` closure is a token
/// source:
///
/// ```rust
/// use std::sync::Arc;
/// use switchboard_client::auth::TokenSource;
///
/// let source: Arc<dyn TokenSource> = Arc::new(|| async { Some("tok".to_string()) });
/// ```
pub trait TokenSource: Send + Sync {
    /// Fetch a fresh token.
    fn refresh(&self) -> BoxFuture<'static, Option<String>>;
}

impl<F, Fut> TokenSource for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Option<String>> + Send + 'static,
{
    fn refresh(&self) -> BoxFuture<'static, Option<String>> {
        (self)().boxed()
    }
}

/// Shared handle to a token source.
pub type SharedTokenSource = Arc<dyn TokenSource>;
