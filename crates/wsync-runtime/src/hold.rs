#![forbid(unsafe_code)]

//! Scoped guards for batching sends, deferring notifications and locking
//! properties during inbound writes.
//!
//! All three are nesting-safe and release on every exit path, including
//! unwinding.

use wsync_core::WireMap;

use crate::error::SyncError;
use crate::model::Model;

/// Batches outbound updates; see [`Model::hold_sync`].
#[must_use = "the hold ends as soon as the guard is dropped"]
pub struct HoldSync {
    model: Model,
    released: bool,
}

impl HoldSync {
    pub(crate) fn acquire(model: Model) -> Self {
        model.inner.borrow_mut().hold_depth += 1;
        Self {
            model,
            released: false,
        }
    }

    /// End the hold now, returning any send failure.
    pub fn finish(mut self) -> Result<(), SyncError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), SyncError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let outermost = {
            let mut state = self.model.inner.borrow_mut();
            state.hold_depth -= 1;
            state.hold_depth == 0
        };
        if outermost {
            self.model.flush_queued()
        } else {
            Ok(())
        }
    }
}

impl Drop for HoldSync {
    fn drop(&mut self) {
        if let Err(error) = self.release() {
            self.model.report(&error);
        }
    }
}

/// Defers change notifications; see [`Model::hold_notifications`].
#[must_use = "notifications fire as soon as the guard is dropped"]
pub struct NotificationHold {
    model: Model,
}

impl NotificationHold {
    pub(crate) fn acquire(model: Model) -> Self {
        model.inner.borrow_mut().notify_depth += 1;
        Self { model }
    }
}

impl Drop for NotificationHold {
    fn drop(&mut self) {
        let pending = {
            let mut state = self.model.inner.borrow_mut();
            state.notify_depth -= 1;
            if state.notify_depth > 0 {
                return;
            }
            std::mem::take(&mut state.pending_changes)
        };
        for (_, change) in pending {
            if change.old != change.new {
                self.model.dispatch_change(&change);
            }
        }
    }
}

/// Records the wire values an inbound write asserted, restoring the
/// previous lock on drop.
pub(crate) struct PropertyLock {
    model: Model,
    previous: WireMap,
}

impl PropertyLock {
    pub(crate) fn acquire(model: Model, incoming: &WireMap) -> Self {
        let schema = model.schema();
        let previous = {
            let mut state = model.inner.borrow_mut();
            let previous = state.property_lock.clone();
            for (name, wire) in incoming {
                if schema.is_synced(name) {
                    state.property_lock.insert(name.clone(), wire.clone());
                }
            }
            previous
        };
        Self { model, previous }
    }
}

impl Drop for PropertyLock {
    fn drop(&mut self) {
        let previous = std::mem::take(&mut self.previous);
        self.model.inner.borrow_mut().property_lock = previous;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModelRegistry;
    use std::rc::Rc;
    use wsync_core::{AttributeSpec, Schema, TypeKey, WireValue};

    fn model() -> Model {
        let registry = ModelRegistry::new();
        let schema = Schema::builder(TypeKey::widget("IntTextModel", "IntTextView"))
            .attribute(AttributeSpec::synced("value", 0))
            .attribute(AttributeSpec::new("local", 0))
            .build();
        Model::detached(&registry, Rc::new(schema))
    }

    /// Whether `name` is locked at exactly `wire`.
    fn is_locked_at(model: &Model, name: &str, wire: &WireValue) -> bool {
        model
            .inner
            .borrow()
            .property_lock
            .get(name)
            .is_some_and(|locked| wsync_core::wire_eq(locked, wire))
    }

    #[test]
    fn lock_covers_synced_attributes_and_restores() {
        let model = model();
        let mut incoming = WireMap::new();
        incoming.insert("value".into(), WireValue::from(3));
        incoming.insert("local".into(), WireValue::from(4));
        {
            let _lock = PropertyLock::acquire(model.clone(), &incoming);
            assert!(is_locked_at(&model, "value", &WireValue::from(3)));
            assert!(!is_locked_at(&model, "local", &WireValue::from(4)));
        }
        assert!(!is_locked_at(&model, "value", &WireValue::from(3)));
    }

    #[test]
    fn finish_releases_once() {
        let model = model();
        let outer = model.hold_sync();
        let inner = model.hold_sync();
        inner.finish().unwrap();
        assert_eq!(model.inner.borrow().hold_depth, 1);
        drop(outer);
        assert_eq!(model.inner.borrow().hold_depth, 0);
    }

    #[test]
    fn hold_releases_on_unwind() {
        let model = model();
        let handle = model.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _hold = handle.hold_sync();
            panic!("bulk edit failed");
        }));
        assert!(result.is_err());
        assert_eq!(model.inner.borrow().hold_depth, 0);
    }
}
