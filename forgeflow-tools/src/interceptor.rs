//! Interceptor Chain: every tool invocation is wrapped by an
//! ordered chain of synchronous observers. Chain order is by declared
//! priority, smaller runs outermost.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

/// Mutable per-call state threaded through `before`/`after`/`on_exception`.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub request_id: String,
    pub tool: String,
    pub args_summary: String,
    pub workflow_id: Option<String>,
    pub step_id: Option<String>,
    pub start_time: Instant,
}

impl InvocationContext {
    pub fn new(request_id: impl Into<String>, tool: impl Into<String>, args_summary: impl Into<String>) -> Self {
        let mut summary = args_summary.into();
        summary.truncate(500);
        Self { request_id: request_id.into(), tool: tool.into(), args_summary: summary, workflow_id: None, step_id: None, start_time: Instant::now() }
    }
}

/// Implemented by both built-in and custom interceptors. `on_exception`
/// returns whether the exception should be suppressed (default: no).
pub trait Interceptor: Send + Sync {
    fn priority(&self) -> i32;
    fn before(&self, context: &mut InvocationContext);
    fn after(&self, context: &InvocationContext, _result: &serde_json::Value) {
        let _ = context;
    }
    fn on_exception(&self, context: &InvocationContext, exception: &str) -> bool {
        let _ = (context, exception);
        false
    }
}

#[derive(Debug, Clone)]
pub struct CapturedException {
    pub tool: String,
    pub message: String,
    pub execution_time: Duration,
    pub context: InvocationContext,
}

/// Priority 0, outermost. Keeps a bounded LRU of recent invocation
/// contexts, keyed by request_id, and records any exception captured
/// against it.
pub struct ExceptionCaptureInterceptor {
    contexts: Mutex<LruCache<String, InvocationContext>>,
    captured: Mutex<VecDeque<CapturedException>>,
    capacity: usize,
}

impl ExceptionCaptureInterceptor {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            contexts: Mutex::new(LruCache::new(NonZeroUsize::new(capacity).unwrap())),
            captured: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn recent_exceptions(&self) -> Vec<CapturedException> {
        self.captured.lock().iter().cloned().collect()
    }
}

impl Interceptor for ExceptionCaptureInterceptor {
    fn priority(&self) -> i32 {
        0
    }

    fn before(&self, context: &mut InvocationContext) {
        self.contexts.lock().put(context.request_id.clone(), context.clone());
    }

    fn on_exception(&self, context: &InvocationContext, exception: &str) -> bool {
        let mut captured = self.captured.lock();
        if captured.len() >= self.capacity {
            captured.pop_front();
        }
        captured.push_back(CapturedException {
            tool: context.tool.clone(),
            message: exception.to_string(),
            execution_time: context.start_time.elapsed(),
            context: context.clone(),
        });
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarianceSeverity {
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct PerformanceVarianceEvent {
    pub tool: String,
    pub current: Duration,
    pub mean: Duration,
    pub severity: VarianceSeverity,
}

struct ToolWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl ToolWindow {
    fn new(capacity: usize) -> Self {
        Self { samples: VecDeque::with_capacity(capacity), capacity }
    }

    fn push(&mut self, duration: Duration) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
    }

    fn mean(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        total / self.samples.len() as u32
    }
}

/// Priority 10. Rolling per-tool window of execution times; once enough
/// samples exist, flags calls that deviate from the mean beyond
/// `variance_threshold` and notifies the buffer dump.
pub struct PerformanceWindowInterceptor {
    windows: Mutex<HashMap<String, ToolWindow>>,
    window_size: usize,
    min_samples: usize,
    variance_threshold: f64,
    buffer: Arc<PerformanceBufferDumpInterceptor>,
    events: Mutex<VecDeque<PerformanceVarianceEvent>>,
}

impl PerformanceWindowInterceptor {
    pub fn new(window_size: usize, min_samples: usize, variance_threshold: f64, buffer: Arc<PerformanceBufferDumpInterceptor>) -> Self {
        Self { windows: Mutex::new(HashMap::new()), window_size, min_samples, variance_threshold, buffer, events: Mutex::new(VecDeque::new()) }
    }

    pub fn record(&self, tool: &str, duration: Duration) {
        let mut windows = self.windows.lock();
        let window = windows.entry(tool.to_string()).or_insert_with(|| ToolWindow::new(self.window_size));

        if window.samples.len() >= self.min_samples {
            let mean = window.mean();
            let mean_secs = mean.as_secs_f64();
            if mean_secs > 0.0 {
                let deviation = (duration.as_secs_f64() - mean_secs).abs() / mean_secs;
                if deviation > self.variance_threshold {
                    let severity = if deviation >= 2.0 * self.variance_threshold { VarianceSeverity::High } else { VarianceSeverity::Medium };
                    let event = PerformanceVarianceEvent { tool: tool.to_string(), current: duration, mean, severity };
                    tracing::warn!(tool = %event.tool, current_ms = event.current.as_millis(), mean_ms = event.mean.as_millis(), severity = ?event.severity, "performance variance detected");
                    self.buffer.emit(tool, severity);
                    self.events.push_back(event);
                }
            }
        }
        window.push(duration);
    }

    pub fn recent_events(&self) -> Vec<PerformanceVarianceEvent> {
        self.events.lock().iter().cloned().collect()
    }
}

impl Interceptor for PerformanceWindowInterceptor {
    fn priority(&self) -> i32 {
        10
    }

    fn before(&self, _context: &mut InvocationContext) {}

    fn after(&self, context: &InvocationContext, _result: &serde_json::Value) {
        self.record(&context.tool, context.start_time.elapsed());
    }
}

#[derive(Debug, Clone)]
struct BufferedCall {
    tool: String,
    start: Instant,
    end: Instant,
}

/// Priority 10. A single global time-bounded buffer of every call; when
/// the performance window fires, the whole buffer is emitted as one
/// structured event.
pub struct PerformanceBufferDumpInterceptor {
    buffer: Mutex<VecDeque<BufferedCall>>,
    window: Duration,
}

impl PerformanceBufferDumpInterceptor {
    pub fn new(window: Duration) -> Self {
        Self { buffer: Mutex::new(VecDeque::new()), window }
    }

    fn prune(&self, buffer: &mut VecDeque<BufferedCall>) {
        let cutoff = Instant::now().checked_sub(self.window).unwrap_or_else(Instant::now());
        while let Some(front) = buffer.front() {
            if front.end < cutoff {
                buffer.pop_front();
            } else {
                break;
            }
        }
    }

    fn emit(&self, trigger_tool: &str, severity: VarianceSeverity) {
        let mut buffer = self.buffer.lock();
        self.prune(&mut buffer);
        tracing::warn!(trigger_tool, severity = ?severity, buffered_calls = buffer.len(), "performance buffer dump");
    }
}

impl Interceptor for PerformanceBufferDumpInterceptor {
    fn priority(&self) -> i32 {
        10
    }

    fn before(&self, context: &mut InvocationContext) {
        let mut buffer = self.buffer.lock();
        self.prune(&mut buffer);
        buffer.push_back(BufferedCall { tool: context.tool.clone(), start: context.start_time, end: context.start_time });
    }

    fn after(&self, context: &InvocationContext, _result: &serde_json::Value) {
        let mut buffer = self.buffer.lock();
        if let Some(entry) = buffer.iter_mut().rev().find(|c| c.tool == context.tool && c.start == context.start_time) {
            entry.end = Instant::now();
        }
    }
}

/// Orders interceptors by priority and threads a single invocation through
/// `before`/`after`/`on_exception`.
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new(mut interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        interceptors.sort_by_key(|i| i.priority());
        Self { interceptors }
    }

    pub fn before(&self, context: &mut InvocationContext) {
        for interceptor in &self.interceptors {
            interceptor.before(context);
        }
    }

    pub fn after(&self, context: &InvocationContext, result: &serde_json::Value) {
        for interceptor in self.interceptors.iter().rev() {
            interceptor.after(context, result);
        }
    }

    /// Returns true if any interceptor suppressed the exception.
    pub fn on_exception(&self, context: &InvocationContext, exception: &str) -> bool {
        let mut suppressed = false;
        for interceptor in self.interceptors.iter().rev() {
            if interceptor.on_exception(context, exception) {
                suppressed = true;
            }
        }
        suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_orders_by_priority() {
        let buffer = Arc::new(PerformanceBufferDumpInterceptor::new(Duration::from_secs(30)));
        let window = Arc::new(PerformanceWindowInterceptor::new(100, 10, 0.2, buffer.clone()));
        let capture = Arc::new(ExceptionCaptureInterceptor::new(64));
        let chain = InterceptorChain::new(vec![window.clone(), buffer.clone(), capture.clone()]);
        assert_eq!(chain.interceptors[0].priority(), 0);
    }

    #[test]
    fn exception_capture_truncates_args_summary() {
        let long = "x".repeat(600);
        let context = InvocationContext::new("req-1", "tool", long);
        assert_eq!(context.args_summary.len(), 500);
    }

    #[test]
    fn performance_window_flags_large_deviation() {
        let buffer = Arc::new(PerformanceBufferDumpInterceptor::new(Duration::from_secs(30)));
        let window = PerformanceWindowInterceptor::new(100, 2, 0.2, buffer);
        for _ in 0..5 {
            window.record("tool", Duration::from_millis(100));
        }
        window.record("tool", Duration::from_millis(500));
        assert_eq!(window.recent_events().len(), 1);
    }
}
