#![forbid(unsafe_code)]

//! In-memory transport that records every open, send and close.
//!
//! [`RecordingTransport`] hands out [`RecordingComm`]s with sequential ids
//! (`comm-0`, `comm-1`, ...). All channels share one [`Recording`], so a
//! test can assert on the exact order of traffic across models.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bytes::Bytes;
use serde_json::Value as Json;
use wsync_runtime::{ChannelUnavailable, Comm, ErrorSink, OpenRequest, SyncError, Transport};

/// One message sent on a channel.
#[derive(Clone, Debug, PartialEq)]
pub struct SentMessage {
    pub comm_id: String,
    pub data: Json,
    pub buffers: Vec<Bytes>,
}

impl SentMessage {
    /// The `method` field, if any.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.data.get("method").and_then(Json::as_str)
    }

    /// The `state` object of an update message.
    #[must_use]
    pub fn update_state(&self) -> Option<&serde_json::Map<String, Json>> {
        if self.method() != Some("update") {
            return None;
        }
        self.data.get("state").and_then(Json::as_object)
    }
}

/// An open request together with the id of the channel it produced.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedOpen {
    pub comm_id: String,
    pub request: OpenRequest,
}

/// Shared log of channel traffic.
#[derive(Debug, Default)]
pub struct Recording {
    opens: RefCell<Vec<RecordedOpen>>,
    sent: RefCell<Vec<SentMessage>>,
    closed: RefCell<Vec<String>>,
    next_id: Cell<u64>,
}

impl Recording {
    #[must_use]
    pub fn opens(&self) -> Vec<RecordedOpen> {
        self.opens.borrow().clone()
    }

    #[must_use]
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.borrow().clone()
    }

    /// Messages sent on one channel, in order.
    #[must_use]
    pub fn sent_to(&self, comm_id: &str) -> Vec<SentMessage> {
        self.sent
            .borrow()
            .iter()
            .filter(|message| message.comm_id == comm_id)
            .cloned()
            .collect()
    }

    /// Update states sent on one channel, in order.
    #[must_use]
    pub fn updates_to(&self, comm_id: &str) -> Vec<serde_json::Map<String, Json>> {
        self.sent_to(comm_id)
            .iter()
            .filter_map(SentMessage::update_state)
            .cloned()
            .collect()
    }

    /// Drain the sent log.
    pub fn take_sent(&self) -> Vec<SentMessage> {
        std::mem::take(&mut *self.sent.borrow_mut())
    }

    #[must_use]
    pub fn closed(&self) -> Vec<String> {
        self.closed.borrow().clone()
    }

    /// Forget all recorded traffic. Ids keep counting.
    pub fn clear(&self) {
        self.opens.borrow_mut().clear();
        self.sent.borrow_mut().clear();
        self.closed.borrow_mut().clear();
    }
}

/// A channel that appends to a [`Recording`].
#[derive(Debug)]
pub struct RecordingComm {
    id: String,
    recording: Rc<Recording>,
}

impl Comm for RecordingComm {
    fn comm_id(&self) -> &str {
        &self.id
    }

    fn send(&self, data: Json, buffers: Vec<Bytes>) {
        tracing::trace!(comm_id = %self.id, %data, buffers = buffers.len(), "recorded send");
        self.recording.sent.borrow_mut().push(SentMessage {
            comm_id: self.id.clone(),
            data,
            buffers,
        });
    }

    fn close(&self) {
        self.recording.closed.borrow_mut().push(self.id.clone());
    }
}

/// Transport whose channels record their traffic.
#[derive(Debug)]
pub struct RecordingTransport {
    recording: Rc<Recording>,
    open_buffers: bool,
    unavailable: Option<String>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            recording: Rc::default(),
            open_buffers: true,
            unavailable: None,
        }
    }

    /// Refuse buffers on open messages, forcing a follow-up update.
    #[must_use]
    pub fn without_open_buffers(mut self) -> Self {
        self.open_buffers = false;
        self
    }

    /// Fail every open with `reason`.
    #[must_use]
    pub fn unavailable(mut self, reason: impl Into<String>) -> Self {
        self.unavailable = Some(reason.into());
        self
    }

    #[must_use]
    pub fn recording(&self) -> Rc<Recording> {
        Rc::clone(&self.recording)
    }
}

impl Transport for RecordingTransport {
    fn open(&self, request: OpenRequest) -> Result<Rc<dyn Comm>, ChannelUnavailable> {
        if let Some(reason) = &self.unavailable {
            return Err(ChannelUnavailable::new(reason.clone()));
        }
        let n = self.recording.next_id.get();
        self.recording.next_id.set(n + 1);
        let id = format!("comm-{n}");
        self.recording.opens.borrow_mut().push(RecordedOpen {
            comm_id: id.clone(),
            request,
        });
        Ok(Rc::new(RecordingComm {
            id,
            recording: Rc::clone(&self.recording),
        }))
    }

    fn supports_open_buffers(&self) -> bool {
        self.open_buffers
    }
}

/// Error sink that keeps every report.
#[derive(Debug, Default)]
pub struct RecordingErrorSink {
    errors: RefCell<Vec<SyncError>>,
}

impl RecordingErrorSink {
    #[must_use]
    pub fn errors(&self) -> Vec<SyncError> {
        self.errors.borrow().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.borrow().is_empty()
    }
}

impl ErrorSink for RecordingErrorSink {
    fn report(&self, error: &SyncError) {
        tracing::debug!(%error, "recorded error");
        self.errors.borrow_mut().push(error.clone());
    }
}
