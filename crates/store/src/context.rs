//! Task-scoped "current session" binding.
//!
//! Session-aware tools find the conversation they belong to here instead of
//! taking a session id argument. The binding follows the async task, not the
//! OS thread, so concurrent episodes on one worker never see each other's id.

use std::future::Future;

use proto::SessionId;

tokio::task_local! {
    static CURRENT_SESSION: SessionId;
}

/// Runs `fut` with `session_id` bound as the current session.
pub async fn with_session<F>(session_id: SessionId, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_SESSION.scope(session_id, fut).await
}

/// Runs a synchronous closure with `session_id` bound as the current session.
pub fn sync_with_session<R>(session_id: SessionId, f: impl FnOnce() -> R) -> R {
    CURRENT_SESSION.sync_scope(session_id, f)
}

/// Returns the session bound to the running task, if any.
pub fn current_session() -> Option<SessionId> {
    CURRENT_SESSION.try_with(SessionId::clone).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn current_session_is_none_outside_scope() {
        assert_eq!(current_session(), None);
    }

    #[tokio::test]
    async fn with_session_binds_for_the_future_only() {
        let seen = with_session(SessionId::from("case-a"), async { current_session() }).await;
        assert_eq!(seen, Some(SessionId::from("case-a")));
        assert_eq!(current_session(), None);
    }

    #[tokio::test]
    async fn concurrent_tasks_see_their_own_session() {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let id = SessionId::from(format!("case-{i}"));
                tokio::spawn(with_session(id.clone(), async move {
                    tokio::task::yield_now().await;
                    (id, current_session())
                }))
            })
            .collect();

        for handle in handles {
            let (expected, seen) = handle.await.expect("task");
            assert_eq!(seen, Some(expected));
        }
    }

    #[test]
    fn sync_scope_binds_inside_closure() {
        let seen = sync_with_session(SessionId::from("sync"), current_session);
        assert_eq!(seen.as_ref().map(SessionId::as_str), Some("sync"));
    }
}
