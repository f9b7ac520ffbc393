//! Process-wide authentication signals.

use std::fmt;

use tokio::sync::broadcast;
use tracing::trace;

use crate::user::User;

/// Why the session was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureReason {
    /// The refresh token could not produce a new access token.
    TokenRefreshFailed,
}

impl AuthFailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenRefreshFailed => "token-refresh-failed",
        }
    }
}

impl fmt::Display for AuthFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signals observed by application shells (e.g. to redirect to login).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthSignal {
    /// The signed-in user changed; `None` means logged out.
    StateChanged(Option<User>),
    /// The session ended because credentials could not be restored.
    Failed(AuthFailureReason),
}

/// Fan-out hub for [`AuthSignal`]s.
///
/// Emitting with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct AuthNotifier {
    tx: broadcast::Sender<AuthSignal>,
}

impl AuthNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthSignal> {
        self.tx.subscribe()
    }

    pub fn emit(&self, signal: AuthSignal) {
        let receivers = self.tx.send(signal).unwrap_or(0);
        trace!(receivers, "auth signal emitted");
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for AuthNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_every_subscriber() {
        let notifier = AuthNotifier::default();
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();

        notifier.emit(AuthSignal::Failed(AuthFailureReason::TokenRefreshFailed));

        assert_eq!(
            a.recv().await.unwrap(),
            AuthSignal::Failed(AuthFailureReason::TokenRefreshFailed)
        );
        assert_eq!(
            b.recv().await.unwrap(),
            AuthSignal::Failed(AuthFailureReason::TokenRefreshFailed)
        );
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let notifier = AuthNotifier::new(4);
        notifier.emit(AuthSignal::StateChanged(None));
        assert_eq!(notifier.receiver_count(), 0);
        assert_eq!(AuthFailureReason::TokenRefreshFailed.to_string(), "token-refresh-failed");
    }
}
