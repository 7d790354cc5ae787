use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handle for a pending "in progress" notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationId(pub u64);

impl NotificationId {
    /// Hands out process-unique ids for notifier implementations.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        NotificationId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Transient user-facing notifications. Implementations only present
/// messages; flows decide when to send them.
pub trait Notifier: Send + Sync {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
    fn loading(&self, message: &str) -> NotificationId;
    fn dismiss(&self, id: NotificationId);
}

impl<N: Notifier + ?Sized> Notifier for &N {
    fn success(&self, message: &str) {
        (**self).success(message)
    }

    fn error(&self, message: &str) {
        (**self).error(message)
    }

    fn loading(&self, message: &str) -> NotificationId {
        (**self).loading(message)
    }

    fn dismiss(&self, id: NotificationId) {
        (**self).dismiss(id)
    }
}

impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    fn success(&self, message: &str) {
        (**self).success(message)
    }

    fn error(&self, message: &str) {
        (**self).error(message)
    }

    fn loading(&self, message: &str) -> NotificationId {
        (**self).loading(message)
    }

    fn dismiss(&self, id: NotificationId) {
        (**self).dismiss(id)
    }
}

/// Routes notifications into the log. Useful when there is no terminal to
/// draw on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn success(&self, message: &str) {
        tracing::info!(%message, "success");
    }

    fn error(&self, message: &str) {
        tracing::error!(%message, "failure");
    }

    fn loading(&self, message: &str) -> NotificationId {
        let id = NotificationId::next();
        tracing::info!(id = id.0, %message, "in progress");
        id
    }

    fn dismiss(&self, id: NotificationId) {
        tracing::debug!(id = id.0, "dismissed");
    }
}
