//! # Transfer Events
//!
//! Lifecycle events emitted around artifact downloads and uploads, the
//! observer trait external progress reporting plugs into, and the
//! identity-checked listener registry shared by every transport.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::TransportError;

/// Whether a transfer moves bytes towards or away from the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Download,
    Upload,
}

impl RequestType {
    fn verb(&self) -> &'static str {
        match self {
            RequestType::Download => "download",
            RequestType::Upload => "upload",
        }
    }
}

/// Describes one transfer for progress observers
#[derive(Debug, Clone)]
pub struct TransferDescription {
    /// Resource name, typically the final path segment of the location
    pub name: String,
    pub request_type: RequestType,
    /// Total length if the server/file reported one
    pub total: Option<u64>,
    /// Local transfers emit no progress reporting
    pub local: bool,
}

/// Observer of transfer lifecycle events.
///
/// One listener instance is shared across all resolvers in a settings
/// context; implementations must tolerate concurrent transfers.
pub trait TransferListener: Send + Sync {
    fn started(&self, description: &TransferDescription);
    fn progress(&self, bytes_so_far: u64, total: Option<u64>);
    fn completed(&self);
    fn failed(&self, error: &TransportError);
}

/// Registry of listeners attached to one transport.
///
/// Attachment is keyed by listener identity: attaching the same `Arc` twice
/// is a no-op.
#[derive(Clone, Default)]
pub struct ListenerSet {
    listeners: Arc<RwLock<Vec<Arc<dyn TransferListener>>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, listener: &Arc<dyn TransferListener>) -> bool {
        self.listeners
            .read()
            .iter()
            .any(|existing| Arc::ptr_eq(existing, listener))
    }

    pub fn add(&self, listener: Arc<dyn TransferListener>) {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|existing| Arc::ptr_eq(existing, &listener)) {
            debug!("Transfer listener already attached, ignoring");
            return;
        }
        listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    pub(crate) fn notify_started(&self, description: &TransferDescription) {
        if description.local {
            return;
        }
        for listener in self.listeners.read().iter() {
            listener.started(description);
        }
    }

    pub(crate) fn notify_progress(&self, bytes_so_far: u64, total: Option<u64>) {
        for listener in self.listeners.read().iter() {
            listener.progress(bytes_so_far, total);
        }
    }

    pub(crate) fn notify_completed(&self) {
        for listener in self.listeners.read().iter() {
            listener.completed();
        }
    }

    pub(crate) fn notify_failed(&self, error: &TransportError) {
        for listener in self.listeners.read().iter() {
            listener.failed(error);
        }
    }
}

/// Human-readable length text for progress lines
pub(crate) fn length_text(bytes: Option<u64>) -> String {
    match bytes {
        None => "unknown size".to_string(),
        Some(bytes) if bytes < 1024 => format!("{bytes} B"),
        Some(bytes) if bytes < 1_048_576 => format!("{} KB", bytes / 1024),
        Some(bytes) => format!("{:.2} MB", bytes as f64 / 1_048_576.0),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Listener that reports transfer progress through `tracing`.
pub struct ProgressLoggingListener {
    current: Mutex<Option<ActiveTransfer>>,
}

struct ActiveTransfer {
    description: String,
    request_type: RequestType,
}

impl ProgressLoggingListener {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }
}

impl Default for ProgressLoggingListener {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferListener for ProgressLoggingListener {
    fn started(&self, description: &TransferDescription) {
        let heading = format!(
            "{} {}",
            capitalize(description.request_type.verb()),
            description.name
        );
        info!("{heading}");
        *self.current.lock() = Some(ActiveTransfer {
            description: heading,
            request_type: description.request_type,
        });
    }

    fn progress(&self, bytes_so_far: u64, total: Option<u64>) {
        let current = self.current.lock();
        if let Some(transfer) = current.as_ref() {
            debug!(
                "{}/{} {}ed",
                length_text(Some(bytes_so_far)),
                length_text(total),
                transfer.request_type.verb()
            );
        }
    }

    fn completed(&self) {
        if let Some(transfer) = self.current.lock().take() {
            info!("{} completed", transfer.description);
        }
    }

    fn failed(&self, error: &TransportError) {
        if let Some(transfer) = self.current.lock().take() {
            warn!("{} failed: {error}", transfer.description);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        started: AtomicUsize,
    }

    impl TransferListener for CountingListener {
        fn started(&self, _description: &TransferDescription) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn progress(&self, _bytes_so_far: u64, _total: Option<u64>) {}
        fn completed(&self) {}
        fn failed(&self, _error: &TransportError) {}
    }

    #[test]
    fn length_text_formats_like_progress_lines() {
        assert_eq!(length_text(None), "unknown size");
        assert_eq!(length_text(Some(512)), "512 B");
        assert_eq!(length_text(Some(2048)), "2 KB");
        assert_eq!(length_text(Some(3 * 1_048_576)), "3.00 MB");
    }

    #[test]
    fn attaching_same_listener_twice_is_a_noop() {
        let set = ListenerSet::new();
        let listener: Arc<dyn TransferListener> = Arc::new(CountingListener {
            started: AtomicUsize::new(0),
        });

        assert!(!set.contains(&listener));
        set.add(listener.clone());
        set.add(listener.clone());
        assert_eq!(set.len(), 1);
        assert!(set.contains(&listener));

        // A distinct instance is a different listener, even if structurally equal
        let other: Arc<dyn TransferListener> = Arc::new(CountingListener {
            started: AtomicUsize::new(0),
        });
        set.add(other);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn local_transfers_are_not_reported() {
        let counting = Arc::new(CountingListener {
            started: AtomicUsize::new(0),
        });
        let set = ListenerSet::new();
        set.add(counting.clone());

        set.notify_started(&TransferDescription {
            name: "widget.jar".to_string(),
            request_type: RequestType::Download,
            total: Some(10),
            local: true,
        });
        assert_eq!(counting.started.load(Ordering::SeqCst), 0);

        set.notify_started(&TransferDescription {
            name: "widget.jar".to_string(),
            request_type: RequestType::Download,
            total: Some(10),
            local: false,
        });
        assert_eq!(counting.started.load(Ordering::SeqCst), 1);
    }
}
