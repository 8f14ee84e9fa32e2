//! Distributed tracer (C9): spans, W3C trace-context propagation, and
//! thread-local current-span tracking.

pub mod context;
pub mod span;
pub mod tracer;

pub use context::{SpanId, TraceContext, TraceId};
pub use span::{Span, SpanEvent, SpanStatus};
pub use tracer::{get_current_span, set_current_span, ScopedSpan, Tracer, TracerConfig};
