use axum::http::Method;
use serde::Serialize;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::tenancy::error::GuardError;
use crate::tenancy::guard::RequestGuard;

const READ_PREFIXES: &[&str] = &["get", "list", "find", "search", "query", "read"];
const WRITE_PREFIXES: &[&str] = &[
    "create", "update", "delete", "save", "post", "put", "patch", "remove",
];

/// What an operation needs from the guard before it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AccessIntent {
    Read,
    Write,
}

impl AccessIntent {
    /// Infer intent from an operation name such as `list_entities` or `SaveDocument`
    pub fn for_operation(name: &str) -> Option<Self> {
        let lowered = name.trim_start_matches('_').to_ascii_lowercase();
        if WRITE_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
            Some(AccessIntent::Write)
        } else if READ_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
            Some(AccessIntent::Read)
        } else {
            None
        }
    }

    pub fn for_method(method: &Method) -> Self {
        match *method {
            Method::GET | Method::HEAD | Method::OPTIONS => AccessIntent::Read,
            _ => AccessIntent::Write,
        }
    }

    /// Make sure the guard can serve this intent
    pub async fn prepare(self, guard: &dyn RequestGuard, cancel: &CancellationToken) -> Result<(), GuardError> {
        match self {
            AccessIntent::Read => guard.ensure_read(cancel).await,
            AccessIntent::Write => guard.ensure_write(cancel).await,
        }
    }
}

/// Wrap a unit of work with the matching ensure call
#[allow(async_fn_in_trait)]
pub trait RequestGuardExt: RequestGuard {
    async fn execute_read<F, T, E>(&self, cancel: &CancellationToken, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>> + Send,
        E: From<GuardError>,
    {
        self.ensure_read(cancel).await?;
        fut.await
    }

    async fn execute_write<F, T, E>(&self, cancel: &CancellationToken, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>> + Send,
        E: From<GuardError>,
    {
        self.ensure_write(cancel).await?;
        fut.await
    }
}

impl<G: RequestGuard + ?Sized> RequestGuardExt for G {}
