//! GC Logging and Monitoring
//!
//! Structured logging for collection events, useful for:
//! - Performance analysis
//! - Production monitoring
//! - The long-GC and large-heap system monitors
//!
//! Monitor reports are delivered as events after the collection that
//! triggered them completes; no user code runs during a collection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Log level for GC operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

/// Which kind of collection ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Minor,
    Major,
    Hibernate,
    Literals,
}

impl CollectionKind {
    fn as_str(self) -> &'static str {
        match self {
            CollectionKind::Minor => "minor",
            CollectionKind::Major => "major",
            CollectionKind::Hibernate => "hibernate",
            CollectionKind::Literals => "literals",
        }
    }
}

/// GC event types
#[derive(Debug, Clone)]
pub enum GcEvent {
    /// Collection started
    CollectionStart {
        pid: u64,
        kind: CollectionKind,
        need: usize,
    },

    /// Collection completed
    CollectionEnd {
        pid: u64,
        kind: CollectionKind,
        duration_us: u64,
        reclaimed_words: usize,
        heap_words: usize,
    },

    /// A minor collection could not hold the mature data and was
    /// escalated to a major one
    Escalated { pid: u64 },

    /// Heap was resized outside a collection proper
    HeapResize {
        pid: u64,
        old_words: usize,
        new_words: usize,
    },

    /// Long-GC monitor report
    LongGc { pid: u64, duration_ms: u64 },

    /// Large-heap monitor report
    LargeHeap { pid: u64, heap_words: usize },
}

/// GC Logger configuration
#[derive(Debug, Clone)]
pub struct GcLoggerConfig {
    /// Minimum log level
    pub level: LogLevel,

    /// Enable console output
    pub console: bool,

    /// Enable JSON format
    pub json: bool,

    /// Enable timestamps
    pub timestamps: bool,
}

impl Default for GcLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            console: true,
            json: false,
            timestamps: true,
        }
    }
}

/// GC Logger - centralized logging for collection events
pub struct GcLogger {
    config: GcLoggerConfig,
    events: Mutex<Vec<(Instant, GcEvent)>>,
    enabled: AtomicBool,
}

impl GcLogger {
    pub fn new(config: GcLoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Log a GC event
    pub fn log(&self, event: GcEvent) {
        if !self.is_enabled() {
            return;
        }

        let event_level = self.event_level(&event);
        if event_level > self.config.level {
            return;
        }

        if let Ok(mut events) = self.events.lock() {
            events.push((Instant::now(), event.clone()));
        }

        if self.config.console {
            self.output_console(&event);
        }
    }

    fn event_level(&self, event: &GcEvent) -> LogLevel {
        match event {
            GcEvent::LongGc { .. } | GcEvent::LargeHeap { .. } => LogLevel::Warn,
            GcEvent::CollectionEnd { .. } | GcEvent::Escalated { .. } => LogLevel::Info,
            GcEvent::CollectionStart { .. } | GcEvent::HeapResize { .. } => LogLevel::Debug,
        }
    }

    fn output_console(&self, event: &GcEvent) {
        if self.config.timestamps {
            let now = chrono::Local::now();
            print!("[{}] ", now.format("%Y-%m-%d %H:%M:%S%.3f"));
        }

        if self.config.json {
            self.output_json(event);
        } else {
            self.output_human(event);
        }
    }

    fn output_human(&self, event: &GcEvent) {
        match event {
            GcEvent::CollectionStart { pid, kind, need } => {
                println!("[GC] <{}> {} collection started (need {})", pid, kind.as_str(), need);
            }
            GcEvent::CollectionEnd {
                pid,
                kind,
                duration_us,
                reclaimed_words,
                heap_words,
            } => {
                println!(
                    "[GC] <{}> {} collection done ({} us, reclaimed {} words, heap {} words)",
                    pid,
                    kind.as_str(),
                    duration_us,
                    reclaimed_words,
                    heap_words
                );
            }
            GcEvent::Escalated { pid } => {
                println!("[GC] <{}> minor collection escalated to major", pid);
            }
            GcEvent::HeapResize {
                pid,
                old_words,
                new_words,
            } => {
                println!("[GC] <{}> heap resized {} -> {} words", pid, old_words, new_words);
            }
            GcEvent::LongGc { pid, duration_ms } => {
                eprintln!("[GC] <{}> monitor: long gc ({} ms)", pid, duration_ms);
            }
            GcEvent::LargeHeap { pid, heap_words } => {
                eprintln!("[GC] <{}> monitor: large heap ({} words)", pid, heap_words);
            }
        }
    }

    fn output_json(&self, event: &GcEvent) {
        let json = match event {
            GcEvent::CollectionStart { pid, kind, need } => serde_json::json!({
                "type": "collection_start",
                "pid": pid,
                "kind": kind.as_str(),
                "need": need,
            }),
            GcEvent::CollectionEnd {
                pid,
                kind,
                duration_us,
                reclaimed_words,
                heap_words,
            } => serde_json::json!({
                "type": "collection_end",
                "pid": pid,
                "kind": kind.as_str(),
                "duration_us": duration_us,
                "reclaimed_words": reclaimed_words,
                "heap_words": heap_words,
            }),
            GcEvent::Escalated { pid } => serde_json::json!({
                "type": "escalated",
                "pid": pid,
            }),
            GcEvent::HeapResize {
                pid,
                old_words,
                new_words,
            } => serde_json::json!({
                "type": "heap_resize",
                "pid": pid,
                "old_words": old_words,
                "new_words": new_words,
            }),
            GcEvent::LongGc { pid, duration_ms } => serde_json::json!({
                "type": "long_gc",
                "pid": pid,
                "duration_ms": duration_ms,
            }),
            GcEvent::LargeHeap { pid, heap_words } => serde_json::json!({
                "type": "large_heap",
                "pid": pid,
                "heap_words": heap_words,
            }),
        };

        if let Ok(json_str) = serde_json::to_string(&json) {
            println!("{}", json_str);
        }
    }

    /// Get all recorded events
    pub fn get_events(&self) -> Vec<(Instant, GcEvent)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn clear_events(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }
}

impl Default for GcLogger {
    fn default() -> Self {
        Self::new(GcLoggerConfig::default())
    }
}

/// Global GC logger
lazy_static::lazy_static! {
    static ref GLOBAL_LOGGER: Mutex<GcLogger> = Mutex::new(GcLogger::default());
}

/// Log a GC event to the global logger
pub fn log_event(event: GcEvent) {
    if let Ok(logger) = GLOBAL_LOGGER.lock() {
        logger.log(event);
    }
}

/// Replace the global logger configuration
pub fn configure_logger(config: GcLoggerConfig) {
    if let Ok(mut logger) = GLOBAL_LOGGER.lock() {
        *logger = GcLogger::new(config);
    }
}

/// Event count of the global logger
pub fn get_event_count() -> usize {
    GLOBAL_LOGGER.lock().map(|l| l.event_count()).unwrap_or(0)
}
