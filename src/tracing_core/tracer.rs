//! Tracer (C9): span lifecycle, trace storage, and thread-local
//! current-span tracking.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use std::time::Instant;

use crate::error::{Error, Result};

use super::context::{TraceContext, TraceId};
use super::span::{Span, SpanStatus};

thread_local! {
    static CURRENT_SPAN: RefCell<Option<Span>> = const { RefCell::new(None) };
}

/// The current thread's active span, if any.
pub fn get_current_span() -> Option<Span> {
    CURRENT_SPAN.with(|c| c.borrow().clone())
}

pub fn set_current_span(span: Option<Span>) {
    CURRENT_SPAN.with(|c| *c.borrow_mut() = span);
}

/// Configuration for a [`Tracer`].
#[derive(Clone, Copy, Debug)]
pub struct TracerConfig {
    /// Bound on the number of distinct traces held in the store. When full,
    /// the oldest trace (by first-seen order) is evicted to admit a new one
    /// (spec.md §3: "store is bounded; oldest trace evicted").
    pub max_traces: usize,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self { max_traces: 10_000 }
    }
}

impl TracerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_traces == 0 {
            return Err(Error::invalid_configuration("max_traces must be >= 1"));
        }
        Ok(())
    }
}

/// Stores finished spans per trace and mints new spans (§4.9). Bounded by
/// `max_traces`; the oldest trace is evicted on overflow.
pub struct Tracer {
    config: TracerConfig,
    traces: RwLock<HashMap<TraceId, Vec<Span>>>,
    order: Mutex<VecDeque<TraceId>>,
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(TracerConfig::default()).expect("default tracer config is valid")
    }
}

impl Tracer {
    pub fn new(config: TracerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            traces: RwLock::new(HashMap::new()),
            order: Mutex::new(VecDeque::new()),
        })
    }

    pub fn start_span(&self, operation: impl Into<String>, service: Option<&str>) -> Span {
        Span::root(operation, service, Instant::now())
    }

    pub fn start_child_span(&self, parent: &Span, operation: impl Into<String>) -> Span {
        Span::child(parent, operation, Instant::now())
    }

    pub fn start_span_from_context(&self, ctx: &TraceContext, operation: impl Into<String>) -> Span {
        Span::from_context(ctx, operation, Instant::now())
    }

    /// Finishes `span` in place and stores a snapshot under its trace. A
    /// second call on an already-finished span fails (spec.md §8).
    pub fn finish_span(&self, span: &mut Span) -> Result<()> {
        if span.is_finished() {
            return Err(Error::already_exists("span is already finished"));
        }
        span.end = Some(Instant::now());
        if span.status == SpanStatus::Unset {
            span.status = SpanStatus::Ok;
        }

        let mut traces = self.traces.write().expect("trace store poisoned");
        let mut order = self.order.lock().expect("trace order poisoned");
        let is_new_trace = !traces.contains_key(&span.trace_id);
        if is_new_trace && traces.len() >= self.config.max_traces {
            if let Some(oldest) = order.pop_front() {
                log::debug!("tracer: evicting oldest trace {oldest:?}");
                let _ = traces.remove(&oldest);
            }
        }
        traces.entry(span.trace_id).or_default().push(span.clone());
        if is_new_trace {
            order.push_back(span.trace_id);
        }
        Ok(())
    }

    pub fn extract_context(&self, span: &Span) -> TraceContext {
        span.to_context()
    }

    pub fn inject_context(&self, ctx: &TraceContext, carrier: &mut HashMap<String, String>) {
        ctx.inject(carrier);
    }

    pub fn extract_context_from_carrier(&self, carrier: &HashMap<String, String>) -> Result<TraceContext> {
        TraceContext::extract(carrier)
    }

    /// All finished spans for `trace_id`, sorted by start time.
    pub fn get_trace(&self, trace_id: TraceId) -> Vec<Span> {
        let traces = self.traces.read().expect("trace store poisoned");
        let mut spans = traces.get(&trace_id).cloned().unwrap_or_default();
        spans.sort_by_key(|s| s.start);
        spans
    }

    pub fn clear(&self) {
        self.traces.write().expect("trace store poisoned").clear();
    }
}

/// RAII scope that installs `span` as the current thread's span on
/// construction and restores the previous one on drop, finishing the scoped
/// span first if the caller left it open.
pub struct ScopedSpan<'t> {
    tracer: &'t Tracer,
    span: Option<Span>,
    previous: Option<Span>,
}

impl<'t> ScopedSpan<'t> {
    pub fn new(tracer: &'t Tracer, span: Span) -> Self {
        let previous = get_current_span();
        set_current_span(Some(span.clone()));
        Self {
            tracer,
            span: Some(span),
            previous,
        }
    }

    pub fn span(&self) -> &Span {
        self.span.as_ref().expect("span present until drop")
    }

    pub fn span_mut(&mut self) -> &mut Span {
        self.span.as_mut().expect("span present until drop")
    }
}

impl Drop for ScopedSpan<'_> {
    fn drop(&mut self) {
        if let Some(mut span) = self.span.take() {
            if !span.is_finished() {
                let _ = self.tracer.finish_span(&mut span);
            }
        }
        set_current_span(self.previous.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracer() -> Tracer {
        Tracer::new(TracerConfig::default()).unwrap()
    }

    #[test]
    fn finishing_twice_fails() {
        let tracer = tracer();
        let mut span = tracer.start_span("work", Some("svc"));
        tracer.finish_span(&mut span).unwrap();
        let err = tracer.finish_span(&mut span).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::AlreadyExists);
    }

    #[test]
    fn child_span_inherits_trace_and_links_parent() {
        let tracer = tracer();
        let parent = tracer.start_span("parent", None);
        let child = tracer.start_child_span(&parent, "child");
        assert_eq!(child.trace_id, parent.trace_id);
        assert_eq!(child.parent_span_id, Some(parent.span_id));
    }

    #[test]
    fn get_trace_returns_spans_sorted_by_start() {
        let tracer = tracer();
        let mut root = tracer.start_span("root", None);
        let trace_id = root.trace_id;
        std::thread::sleep(std::time::Duration::from_millis(1));
        let mut child = tracer.start_child_span(&root, "child");
        tracer.finish_span(&mut child).unwrap();
        tracer.finish_span(&mut root).unwrap();

        let spans = tracer.get_trace(trace_id);
        assert_eq!(spans.len(), 2);
        assert!(spans[0].start <= spans[1].start);
    }

    #[test]
    fn scoped_span_restores_previous_and_finishes_on_drop() {
        let tracer = tracer();
        assert!(get_current_span().is_none());
        {
            let outer = tracer.start_span("outer", None);
            let _outer_guard = ScopedSpan::new(&tracer, outer);
            assert!(get_current_span().is_some());
            {
                let inner = tracer.start_span("inner", None);
                let guard = ScopedSpan::new(&tracer, inner);
                assert_eq!(get_current_span().unwrap().operation, "inner");
                drop(guard);
            }
            assert_eq!(get_current_span().unwrap().operation, "outer");
        }
        assert!(get_current_span().is_none());
    }

    #[test]
    fn context_round_trips_through_carrier() {
        let tracer = tracer();
        let span = tracer.start_span("work", None);
        let ctx = tracer.extract_context(&span);
        let mut carrier = HashMap::new();
        tracer.inject_context(&ctx, &mut carrier);
        let extracted = tracer.extract_context_from_carrier(&carrier).unwrap();
        assert_eq!(extracted.trace_id, ctx.trace_id);
        assert_eq!(extracted.span_id, ctx.span_id);
    }

    #[test]
    fn oldest_trace_is_evicted_when_store_is_full() {
        let tracer = Tracer::new(TracerConfig { max_traces: 2 }).unwrap();
        let mut first = tracer.start_span("first", None);
        let first_id = first.trace_id;
        tracer.finish_span(&mut first).unwrap();

        let mut second = tracer.start_span("second", None);
        tracer.finish_span(&mut second).unwrap();

        let mut third = tracer.start_span("third", None);
        let third_id = third.trace_id;
        tracer.finish_span(&mut third).unwrap();

        assert!(tracer.get_trace(first_id).is_empty());
        assert_eq!(tracer.get_trace(third_id).len(), 1);
    }
}
