//! Span lifecycle (§4.9).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::context::{SpanId, TraceContext, TraceId};

/// Terminal outcome recorded on a finished span.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SpanStatus {
    Unset,
    Ok,
    Error,
}

/// A point-in-time annotation attached to a span (spec.md §3 data model).
#[derive(Clone, Debug)]
pub struct SpanEvent {
    pub instant: Instant,
    pub name: String,
    pub tags: HashMap<String, String>,
}

/// One unit of traced work. Mutable while open; `finish` freezes `end` and
/// `status` and rejects a second call (spec.md §8 universal invariant).
#[derive(Clone, Debug)]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub operation: String,
    pub start: Instant,
    pub end: Option<Instant>,
    pub status: SpanStatus,
    pub status_message: String,
    pub tags: HashMap<String, String>,
    pub baggage: HashMap<String, String>,
    pub events: Vec<SpanEvent>,
}

impl Span {
    pub(crate) fn root(operation: impl Into<String>, service: Option<&str>, now: Instant) -> Self {
        let mut tags = HashMap::new();
        let _ = tags.insert("span.kind".to_string(), "internal".to_string());
        if let Some(service) = service {
            let _ = tags.insert("service.name".to_string(), service.to_string());
        }
        Self {
            trace_id: TraceId::generate(),
            span_id: SpanId::generate(),
            parent_span_id: None,
            operation: operation.into(),
            start: now,
            end: None,
            status: SpanStatus::Unset,
            status_message: String::new(),
            tags,
            baggage: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub(crate) fn child(parent: &Span, operation: impl Into<String>, now: Instant) -> Self {
        Self {
            trace_id: parent.trace_id,
            span_id: SpanId::generate(),
            parent_span_id: Some(parent.span_id),
            operation: operation.into(),
            start: now,
            end: None,
            status: SpanStatus::Unset,
            status_message: String::new(),
            tags: HashMap::new(),
            baggage: parent.baggage.clone(),
            events: Vec::new(),
        }
    }

    pub(crate) fn from_context(ctx: &TraceContext, operation: impl Into<String>, now: Instant) -> Self {
        Self {
            trace_id: ctx.trace_id,
            span_id: SpanId::generate(),
            parent_span_id: Some(ctx.span_id),
            operation: operation.into(),
            start: now,
            end: None,
            status: SpanStatus::Unset,
            status_message: String::new(),
            tags: HashMap::new(),
            baggage: ctx.baggage.clone(),
            events: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.end.is_some()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.end.map(|end| end.saturating_duration_since(self.start))
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let _ = self.tags.insert(key.into(), value.into());
    }

    /// Sets the span's terminal status and an accompanying message.
    pub fn set_status(&mut self, status: SpanStatus, message: impl Into<String>) {
        self.status = status;
        self.status_message = message.into();
    }

    /// Appends a point-in-time event to the span, in call order.
    pub fn add_event(&mut self, name: impl Into<String>, tags: HashMap<String, String>) {
        self.events.push(SpanEvent {
            instant: Instant::now(),
            name: name.into(),
            tags,
        });
    }

    pub fn to_context(&self) -> TraceContext {
        TraceContext {
            trace_id: self.trace_id,
            span_id: self.span_id,
            trace_flags: if self.status == SpanStatus::Error { 0x01 } else { 0x00 },
            baggage: self.baggage.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_status_updates_status_and_message_together() {
        let mut span = Span::root("work", None, Instant::now());
        assert_eq!(span.status, SpanStatus::Unset);
        assert_eq!(span.status_message, "");

        span.set_status(SpanStatus::Error, "downstream timed out");
        assert_eq!(span.status, SpanStatus::Error);
        assert_eq!(span.status_message, "downstream timed out");
    }

    #[test]
    fn add_event_appends_in_order() {
        let mut span = Span::root("work", None, Instant::now());
        assert!(span.events.is_empty());

        span.add_event("cache.miss", HashMap::new());
        let mut tags = HashMap::new();
        let _ = tags.insert("retry".to_string(), "1".to_string());
        span.add_event("cache.retry", tags.clone());

        assert_eq!(span.events.len(), 2);
        assert_eq!(span.events[0].name, "cache.miss");
        assert_eq!(span.events[1].name, "cache.retry");
        assert_eq!(span.events[1].tags, tags);
        assert!(span.events[0].instant <= span.events[1].instant);
    }

    #[test]
    fn new_span_has_no_status_message_or_events() {
        let root = Span::root("root", Some("svc"), Instant::now());
        assert!(root.status_message.is_empty());
        assert!(root.events.is_empty());

        let child = Span::child(&root, "child", Instant::now());
        assert!(child.status_message.is_empty());
        assert!(child.events.is_empty());
    }
}
