use crate::error::CoreError;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::Span;

#[derive(Debug)]
struct CommonInner {
    label: String,
    logger: watch::Sender<Span>,
    last_error: watch::Sender<Option<CoreError>>,
}

/// Label, logger and last-error shared by an adapter or pipe and the task it launches.
///
/// Launched tasks are the only writers of the last-error; the owner reads it after
/// the task's output channel has closed. A recorded fault is kept over later
/// non-fault outcomes until the next launch clears it.
#[derive(Debug, Clone)]
pub struct Common {
    inner: Arc<CommonInner>,
}

impl Common {
    pub fn new(label: &str) -> Self {
        Self {
            inner: Arc::new(CommonInner {
                label: label.to_owned(),
                logger: watch::Sender::new(Span::none()),
                last_error: watch::Sender::new(None),
            }),
        }
    }

    pub fn label(&self) -> &str {
        self.inner.label.as_str()
    }

    pub fn set_logger(&self, logger: Span) {
        self.inner.logger.send_replace(logger);
    }

    pub fn logger(&self) -> Span {
        self.inner.logger.borrow().clone()
    }

    /// Records `error` unless a fault is already recorded and `error` is not one.
    pub fn set_error(&self, error: CoreError) {
        self.inner.last_error.send_if_modified(|current| {
            if !error.is_fault() && current.as_ref().is_some_and(CoreError::is_fault) {
                return false;
            }
            *current = Some(error);
            true
        });
    }

    pub fn clear_error(&self) {
        self.inner.last_error.send_replace(None);
    }

    pub fn last_error(&self) -> Option<CoreError> {
        self.inner.last_error.borrow().clone()
    }

    /// Span a launched stage runs in: the component label nested under its logger.
    pub fn stage_span(&self) -> Span {
        let parent = self.logger();
        tracing::info_span!(parent: &parent, "stage", label = self.label())
    }
}

/// Accessors every adapter and pipe exposes through its `Common`.
pub trait Component {
    fn common(&self) -> &Common;

    fn label(&self) -> &str {
        self.common().label()
    }

    fn set_logger(&self, logger: Span) {
        self.common().set_logger(logger);
    }

    fn logger(&self) -> Span {
        self.common().logger()
    }

    fn last_error(&self) -> Option<CoreError> {
        self.common().last_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreErrorKind;

    #[test]
    fn clones_share_last_error() {
        let common = Common::new("test");
        let handle = common.clone();
        assert!(common.last_error().is_none());
        handle.set_error(CoreError::interrupted());
        assert_eq!(
            common.last_error().map(|e| e.kind()),
            Some(CoreErrorKind::Interrupted)
        );
        common.clear_error();
        assert!(handle.last_error().is_none());
        assert_eq!(handle.label(), "test");
    }

    #[test]
    fn fault_survives_later_non_fault() {
        let common = Common::new("test");
        common.set_error(CoreError::new(CoreErrorKind::ReadError, "truncated"));
        common.set_error(CoreError::interrupted());
        assert_eq!(
            common.last_error().map(|e| e.kind()),
            Some(CoreErrorKind::ReadError)
        );
        common.set_error(CoreError::new(CoreErrorKind::WriteError, ""));
        assert_eq!(
            common.last_error().map(|e| e.kind()),
            Some(CoreErrorKind::WriteError)
        );
    }
}
