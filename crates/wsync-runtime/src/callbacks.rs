#![forbid(unsafe_code)]

//! Ordered callback lists with error isolation.
//!
//! # Invariants
//!
//! 1. Callbacks run in registration order.
//! 2. A callback that returns `Err` or panics does not stop the ones after
//!    it; each failure becomes one [`HandlerError`].
//! 3. The list is snapshotted before invocation, so a callback may register
//!    or remove callbacks without affecting the current round.

use std::error::Error;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use crate::error::HandlerError;

/// What an application callback returns.
pub type CallbackResult = Result<(), Box<dyn Error>>;

/// Handle returned by callback registration; pass it back to remove.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

impl CallbackId {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Registration list for one kind of callback.
pub(crate) struct CallbackList<F: ?Sized> {
    kind: &'static str,
    next_id: u64,
    entries: Vec<(CallbackId, Rc<F>)>,
}

impl<F: ?Sized> CallbackList<F> {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            kind,
            next_id: 0,
            entries: Vec::new(),
        }
    }

    pub(crate) fn register(&mut self, callback: Rc<F>) -> CallbackId {
        let id = CallbackId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, callback));
        id
    }

    /// Returns whether `id` was registered.
    pub(crate) fn remove(&mut self, id: CallbackId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<(CallbackId, Rc<F>)> {
        self.entries.clone()
    }

    pub(crate) fn kind(&self) -> &'static str {
        self.kind
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Run one callback, converting `Err` and panics into a [`HandlerError`].
pub(crate) fn invoke_isolated(
    kind: &'static str,
    id: CallbackId,
    call: impl FnOnce() -> CallbackResult,
) -> Result<(), HandlerError> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(HandlerError {
            kind,
            callback: id.0,
            message: e.to_string(),
            panicked: false,
        }),
        Err(payload) => Err(HandlerError {
            kind,
            callback: id.0,
            message: panic_message(payload.as_ref()),
            panicked: true,
        }),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    type Cb = dyn Fn(&str) -> CallbackResult;

    #[test]
    fn ids_are_unique_and_removable() {
        let mut list: CallbackList<Cb> = CallbackList::new("msg");
        let a = list.register(Rc::new(|_| Ok(())));
        let b = list.register(Rc::new(|_| Ok(())));
        assert_ne!(a, b);
        assert!(list.remove(a));
        assert!(!list.remove(a));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn err_and_panic_are_isolated() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut list: CallbackList<Cb> = CallbackList::new("msg");
        list.register(Rc::new(|_| Err("bad content".into())));
        list.register(Rc::new(|_| panic!("handler exploded")));
        let sink = Rc::clone(&seen);
        list.register(Rc::new(move |s| {
            sink.borrow_mut().push(s.to_owned());
            Ok(())
        }));

        let errors: Vec<HandlerError> = list
            .snapshot()
            .into_iter()
            .filter_map(|(id, cb)| invoke_isolated(list.kind(), id, || cb("ping")).err())
            .collect();

        assert_eq!(*seen.borrow(), ["ping"]);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].message, "bad content");
        assert!(!errors[0].panicked);
        assert_eq!(errors[1].message, "handler exploded");
        assert!(errors[1].panicked);
    }
}
