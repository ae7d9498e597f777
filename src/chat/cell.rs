use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::protocol::chat::{ChatResponseObject, ResponseStatus};

/// Owner of an in-flight response object.
///
/// Only the owner mutates the object; observers hold [`ResponseView`]s and
/// see every applied event as soon as the write lock is released.
#[derive(Debug)]
pub struct ResponseCell {
    inner: Arc<RwLock<ChatResponseObject>>,
}

impl ResponseCell {
    #[must_use]
    pub fn new(response: ChatResponseObject) -> Self {
        Self {
            inner: Arc::new(RwLock::new(response)),
        }
    }

    #[must_use]
    pub fn view(&self) -> ResponseView {
        ResponseView {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Never hold the guard across an `.await`.
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, ChatResponseObject> {
        self.inner.write()
    }

    #[must_use]
    pub fn snapshot(&self) -> ChatResponseObject {
        self.inner.read().clone()
    }
}

/// Read-only handle on a response object owned by a [`ResponseCell`].
#[derive(Debug, Clone)]
pub struct ResponseView {
    inner: Arc<RwLock<ChatResponseObject>>,
}

impl ResponseView {
    pub fn read(&self) -> RwLockReadGuard<'_, ChatResponseObject> {
        self.inner.read()
    }

    #[must_use]
    pub fn snapshot(&self) -> ChatResponseObject {
        self.inner.read().clone()
    }

    #[must_use]
    pub fn id(&self) -> String {
        self.inner.read().id.clone()
    }

    #[must_use]
    pub fn status(&self) -> ResponseStatus {
        self.inner.read().status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::VendorId;
    use crate::protocol::chat::ChatConfig;

    #[test]
    fn test_view_observes_writes() {
        let cell = ResponseCell::new(ChatResponseObject::new(
            "temp_id_1",
            ChatConfig::for_model(VendorId::OpenAi, "gpt-4o"),
            "2025-01-01T00:00:00.000Z",
        ));
        let view = cell.view();
        assert_eq!(view.status(), ResponseStatus::Queued);
        cell.write().status = ResponseStatus::InProgress;
        assert_eq!(view.status(), ResponseStatus::InProgress);
        assert_eq!(view.id(), "temp_id_1");
        assert_eq!(cell.snapshot(), view.snapshot());
    }
}
