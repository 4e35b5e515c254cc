//! Tracing utilities for asserting on supplier spans.
//!
//! Captures every `freshbox.*` and `supplier.*` span together with its fields,
//! including fields recorded after the span was created (such as the outcome
//! of a refresh).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::Dispatch;
use tracing::dispatcher::DefaultGuard;
use tracing::span::{Attributes, Id, Record};
use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;

/// Captured span information for testing.
#[derive(Debug, Clone)]
pub struct CapturedSpan {
    /// Unique span ID
    pub id: u64,
    /// Parent span ID (if any)
    pub parent_id: Option<u64>,
    /// The span name (e.g., "supplier.refresh")
    pub name: String,
    /// Field values rendered as strings, including late recordings
    pub fields: BTreeMap<String, String>,
}

impl CapturedSpan {
    /// Value of a field, if recorded.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

fn is_supplier_span(name: &str) -> bool {
    name.starts_with("supplier.") || name.starts_with("freshbox.")
}

/// A tracing layer that captures supplier spans.
pub struct SpanCaptureLayer {
    spans: Arc<Mutex<Vec<CapturedSpan>>>,
}

/// Renders every field into the target map, overwriting earlier values.
struct FieldWriter<'a>(&'a mut BTreeMap<String, String>);

impl tracing::field::Visit for FieldWriter<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }
}

impl<S> Layer<S> for SpanCaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let metadata = attrs.metadata();
        if !is_supplier_span(metadata.name()) {
            return;
        }

        let mut fields = BTreeMap::new();
        attrs.record(&mut FieldWriter(&mut fields));

        let parent_id = attrs
            .parent()
            .cloned()
            .or_else(|| {
                if attrs.is_contextual() {
                    ctx.current_span().id().cloned()
                } else {
                    None
                }
            })
            .map(|id| id.into_u64());

        self.spans.lock().push(CapturedSpan {
            id: id.into_u64(),
            parent_id,
            name: metadata.name().to_string(),
            fields,
        });
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span_ref) = ctx.span(id) else {
            return;
        };
        if !is_supplier_span(span_ref.metadata().name()) {
            return;
        }

        let span_id = id.into_u64();
        if let Some(captured) = self.spans.lock().iter_mut().find(|s| s.id == span_id) {
            values.record(&mut FieldWriter(&mut captured.fields));
        }
    }
}

/// Collector for captured spans.
#[derive(Clone)]
pub struct SpanCollector {
    spans: Arc<Mutex<Vec<CapturedSpan>>>,
    dispatch: Dispatch,
}

/// Create a new span collector with its associated dispatch.
pub fn create_span_collector() -> SpanCollector {
    let spans = Arc::new(Mutex::new(Vec::new()));
    let layer = SpanCaptureLayer {
        spans: Arc::clone(&spans),
    };
    let dispatch = Dispatch::new(Registry::default().with(layer));
    SpanCollector { spans, dispatch }
}

impl SpanCollector {
    /// Get the dispatch, e.g. for `WithSubscriber::with_subscriber`.
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Capture spans created on the current thread until the guard drops.
    ///
    /// Combine with a current-thread runtime to also capture spans of
    /// background tasks.
    pub fn set_default(&self) -> DefaultGuard {
        tracing::dispatcher::set_default(&self.dispatch)
    }

    /// Get all captured spans.
    pub fn spans(&self) -> Vec<CapturedSpan> {
        self.spans.lock().clone()
    }

    /// Get captured span names in order.
    pub fn span_names(&self) -> Vec<String> {
        self.spans.lock().iter().map(|s| s.name.clone()).collect()
    }

    /// All captured spans called `name`, in creation order.
    pub fn spans_named(&self, name: &str) -> Vec<CapturedSpan> {
        self.spans
            .lock()
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }

    /// Number of captured spans called `name`.
    pub fn count(&self, name: &str) -> usize {
        self.spans.lock().iter().filter(|s| s.name == name).count()
    }

    /// Check if a span with the given name was captured.
    pub fn has_span(&self, name: &str) -> bool {
        self.spans.lock().iter().any(|s| s.name == name)
    }

    /// Get a span by name (returns the last occurrence).
    pub fn get_span(&self, name: &str) -> Option<CapturedSpan> {
        self.spans
            .lock()
            .iter()
            .rev()
            .find(|s| s.name == name)
            .cloned()
    }

    /// Get field value from the last span called `span_name`.
    pub fn get_field(&self, span_name: &str, field_name: &str) -> Option<String> {
        self.get_span(span_name)
            .and_then(|s| s.field(field_name).map(String::from))
    }

    /// Whether `child` was created inside `parent`, directly or not.
    pub fn is_descendant(&self, child: &CapturedSpan, parent: &CapturedSpan) -> bool {
        let spans = self.spans.lock();
        let mut current = child.parent_id;
        while let Some(id) = current {
            if id == parent.id {
                return true;
            }
            current = spans.iter().find(|s| s.id == id).and_then(|s| s.parent_id);
        }
        false
    }

    /// Clear all captured spans.
    pub fn clear(&self) {
        self.spans.lock().clear();
    }

    /// Assert that all given spans were captured (in any order).
    pub fn assert_has_spans(&self, expected: &[&str]) {
        for name in expected {
            if !self.has_span(name) {
                panic!(
                    "Expected span '{}' not found. Captured spans: {:?}",
                    name,
                    self.span_names()
                );
            }
        }
    }
}

/// Run a closure with span capturing enabled.
///
/// Returns the result of the closure and a collector with captured spans.
pub fn with_span_capture<F, R>(f: F) -> (R, SpanCollector)
where
    F: FnOnce() -> R,
{
    let collector = create_span_collector();
    let result = tracing::dispatcher::with_default(collector.dispatch(), f);
    (result, collector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{Level, span};

    #[test]
    fn test_only_supplier_spans_are_captured() {
        let ((), collector) = with_span_capture(|| {
            let outer = span!(Level::DEBUG, "freshbox.get", supplier = "token");
            let _outer = outer.enter();
            let inner = span!(Level::DEBUG, "supplier.refresh", demand = "blocking");
            let _inner = inner.enter();
            let _other = span!(Level::DEBUG, "http.request").entered();
        });

        assert_eq!(collector.span_names(), vec!["freshbox.get", "supplier.refresh"]);
        let get = collector.get_span("freshbox.get").unwrap();
        let refresh = collector.get_span("supplier.refresh").unwrap();
        assert!(collector.is_descendant(&refresh, &get));
        assert!(!collector.is_descendant(&get, &refresh));
    }

    #[test]
    fn test_late_recorded_field_is_captured() {
        let ((), collector) = with_span_capture(|| {
            let span = span!(
                Level::DEBUG,
                "supplier.refresh",
                supplier = "token",
                outcome = tracing::field::Empty
            );
            let _enter = span.enter();
            span.record("outcome", "success");
        });

        assert_eq!(
            collector.get_field("supplier.refresh", "outcome"),
            Some("success".to_string())
        );
        assert_eq!(
            collector.get_field("supplier.refresh", "supplier"),
            Some("token".to_string())
        );
    }
}
