#![forbid(unsafe_code)]

//! Attribute change observers.
//!
//! Observers are held weakly by the model; the [`Subscription`] returned at
//! registration owns the callback. Dropping the subscription unregisters it.
//! Dead entries are pruned lazily on the next notification.

use std::rc::{Rc, Weak};

use wsync_core::Value;

/// One attribute change, as delivered to observers.
#[derive(Clone, Debug, PartialEq)]
pub struct Change {
    pub name: String,
    pub old: Value,
    pub new: Value,
}

pub(crate) type ObserverFn = dyn Fn(&Change);

/// RAII guard for an observer. Drop to unsubscribe.
#[must_use = "dropping a Subscription unregisters the observer"]
pub struct Subscription {
    _callback: Rc<ObserverFn>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

struct Observer {
    filter: Option<String>,
    callback: Weak<ObserverFn>,
}

#[derive(Default)]
pub(crate) struct Observers {
    entries: Vec<Observer>,
}

impl Observers {
    pub(crate) fn subscribe(
        &mut self,
        filter: Option<&str>,
        callback: impl Fn(&Change) + 'static,
    ) -> Subscription {
        let callback: Rc<ObserverFn> = Rc::new(callback);
        self.entries.push(Observer {
            filter: filter.map(str::to_owned),
            callback: Rc::downgrade(&callback),
        });
        Subscription {
            _callback: callback,
        }
    }

    /// Live callbacks interested in `name`, pruning dead entries.
    pub(crate) fn matching(&mut self, name: &str) -> Vec<Rc<ObserverFn>> {
        self.entries.retain(|o| o.callback.strong_count() > 0);
        self.entries
            .iter()
            .filter(|o| o.filter.as_deref().is_none_or(|f| f == name))
            .filter_map(|o| o.callback.upgrade())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn change(name: &str) -> Change {
        Change {
            name: name.into(),
            old: Value::Null,
            new: Value::Int(1),
        }
    }

    #[test]
    fn filtered_and_catch_all() {
        let mut observers = Observers::default();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _value = observers.subscribe(Some("value"), move |_| h.set(h.get() + 1));
        let h = Rc::clone(&hits);
        let _all = observers.subscribe(None, move |_| h.set(h.get() + 10));

        for cb in observers.matching("value") {
            cb(&change("value"));
        }
        for cb in observers.matching("other") {
            cb(&change("other"));
        }
        assert_eq!(hits.get(), 21);
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let mut observers = Observers::default();
        let sub = observers.subscribe(None, |_| {});
        assert_eq!(observers.matching("x").len(), 1);
        drop(sub);
        assert!(observers.matching("x").is_empty());
        assert!(observers.entries.is_empty());
    }
}
