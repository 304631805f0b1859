//! Ambient network default-deny (spec §4.12 "Ambient network default-deny",
//! §9 Design Notes "Ambient-network deny via global swap").
//!
//! True process-wide interception of an HTTP primitive isn't available in
//! safe Rust without controlling every call site, so this emulates the
//! source's global swap with a task-local flag: the Executor scopes the
//! flag for the duration of `handler.run`. A `tokio::task_local!` (not a
//! `std::thread_local!`) is required here because the workspace runs on the
//! multi-thread runtime (Cargo.toml `rt-multi-thread`) — a handler that
//! suspends at an `.await` can resume on a different worker thread, and a
//! thread-local would silently read as `false` there. Any code path that
//! wants ambient outbound HTTP must go through `guarded_client()`, which
//! consults the flag; legitimate egress happens through
//! `Context::adapter(...)` instead, which is constructed before the scope is
//! entered and is therefore unaffected.

use crate::error::{ChainboxError, ChainboxResult};

tokio::task_local! {
    static DENIED: bool;
}

/// Run `fut` with ambient outbound HTTP denied for the lifetime of the task,
/// following it across any worker-thread migration.
pub async fn deny_network<F: std::future::Future>(fut: F) -> F::Output {
    DENIED.scope(true, fut).await
}

pub fn is_denied() -> bool {
    DENIED.try_with(|d| *d).unwrap_or(false)
}

/// Build an HTTP client for ambient use, failing while the current task is
/// inside a `deny_network` scope. Adapters built outside handler execution
/// are unaffected since they never call this function.
pub fn guarded_client() -> ChainboxResult<reqwest::Client> {
    if is_denied() {
        return Err(ChainboxError::Forbidden {
            fn_name: "ambient-network".to_string(),
        });
    }
    Ok(reqwest::Client::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn denies_while_scope_active_and_restores_after() {
        assert!(guarded_client().is_ok());
        deny_network(async {
            assert!(guarded_client().is_err());
        })
        .await;
        assert!(guarded_client().is_ok());
    }

    #[tokio::test]
    async fn nested_scopes_stay_denied() {
        deny_network(async {
            deny_network(async {
                assert!(is_denied());
            })
            .await;
            assert!(is_denied());
        })
        .await;
        assert!(!is_denied());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deny_follows_the_task_across_worker_threads() {
        deny_network(async {
            for _ in 0..8 {
                tokio::task::yield_now().await;
            }
            assert!(is_denied(), "deny flag must follow the task, not the OS thread");
        })
        .await;
    }
}
