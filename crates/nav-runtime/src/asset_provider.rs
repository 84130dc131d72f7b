//! Process-wide, coalescing cache of section blobs, keyed by resource key.
//!
//! Mirrors the per-key state machine described for the asset provider: a
//! reference count, the owned byte buffer, the validated [`BlobAssetReference`]
//! derived from it, and any callbacks waiting on an in-flight load. All
//! public methods are meant to be called from a single coordinator (the
//! streaming system's `tick`); async completions are harvested by
//! [`AssetProvider::poll_completions`], also on that same thread, so nothing
//! here needs its own internal locking.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use nav_core::blob::BlobAssetReference;
use nav_core::error::{NavError, Result};
use tokio::sync::mpsc;
use tracing::warn;

/// Fired once a checkout resolves. `Some(Ok(blob))` is success, `Some(Err(_))`
/// is a load or validation failure (the caller decides whether to elevate
/// it, e.g. to an `AssetLoadFailed` event), and `None` means the entry was
/// force-invalidated (`unload`, or `release` dropping it to zero) before the
/// load completed — a soft cancellation, not an error.
pub type Callback = Box<dyn FnOnce(Option<Result<BlobAssetReference>>) + Send>;

/// Supplies the raw bytes behind a resource key. The only collaborator the
/// provider needs from the outside world; kept abstract so tests can swap in
/// a loader that never touches a filesystem.
pub trait BlobLoader: Send + Sync + 'static {
    fn load(&self, resource_key: &str) -> Result<Vec<u8>>;
}

/// Reads section blobs from `root/<resource_key>`. Resource keys already
/// contain `/` separators (see §6's `"Data/SubScene_{..}/Section_{..}"`
/// convention), so this lays out as nested directories on disk.
pub struct FsBlobLoader {
    pub root: PathBuf,
}

impl BlobLoader for FsBlobLoader {
    fn load(&self, resource_key: &str) -> Result<Vec<u8>> {
        std::fs::read(self.root.join(resource_key))
            .map_err(|e| NavError::AssetIoError(format!("{resource_key}: {e}")))
    }
}

struct Entry {
    ref_count: u32,
    buffer: Option<Arc<[u8]>>,
    blob_ref: Option<BlobAssetReference>,
    pending: bool,
    callbacks: Vec<Callback>,
}

impl Entry {
    fn new() -> Self {
        Self { ref_count: 0, buffer: None, blob_ref: None, pending: false, callbacks: Vec::new() }
    }
}

enum Completion {
    Loaded { key: String, bytes: Vec<u8> },
    Failed { key: String, error: NavError },
}

pub struct AssetProvider<L: BlobLoader> {
    loader: Arc<L>,
    entries: HashMap<String, Entry>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
}

impl<L: BlobLoader> AssetProvider<L> {
    pub fn new(loader: L) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self { loader: Arc::new(loader), entries: HashMap::new(), completion_tx, completion_rx }
    }

    pub fn is_loaded(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|e| e.blob_ref.is_some())
    }

    /// Synchronous checkout: blocks the calling (coordinator) thread on the
    /// load. On failure, `ref_count` is left untouched.
    pub fn check_out(&mut self, key: &str) -> Option<BlobAssetReference> {
        if let Some(entry) = self.entries.get_mut(key) {
            if let Some(blob) = &entry.blob_ref {
                entry.ref_count += 1;
                return Some(blob.clone());
            }
        }

        let blob = self
            .loader
            .load(key)
            .map_err(|e| warn!(resource_key = key, error = %e, "synchronous blob load failed"))
            .ok()
            .and_then(|bytes| {
                BlobAssetReference::new(Arc::from(bytes))
                    .map_err(|e| warn!(resource_key = key, error = %e, "blob validation failed"))
                    .ok()
            })?;

        let entry = self.entries.entry(key.to_string()).or_insert_with(Entry::new);
        entry.buffer = Some(Arc::clone(blob.buffer()));
        entry.blob_ref = Some(blob.clone());
        entry.ref_count += 1;
        Some(blob)
    }

    /// Increments `ref_count` and appends `cb` immediately. If the blob is
    /// already resident, `cb` fires synchronously (still on the coordinator,
    /// since that's who called this). Otherwise a load is scheduled (unless
    /// one is already in flight) and `cb` joins the queue that fires on the
    /// next [`AssetProvider::poll_completions`].
    pub fn check_out_async(&mut self, key: &str, cb: Callback) {
        let entry = self.entries.entry(key.to_string()).or_insert_with(Entry::new);
        entry.ref_count += 1;

        if let Some(blob) = &entry.blob_ref {
            cb(Some(Ok(blob.clone())));
            return;
        }

        entry.callbacks.push(cb);
        if entry.pending {
            return;
        }
        entry.pending = true;

        let loader = Arc::clone(&self.loader);
        let key_owned = key.to_string();
        let tx = self.completion_tx.clone();
        tokio::task::spawn_blocking(move || {
            let completion = match loader.load(&key_owned) {
                Ok(bytes) => Completion::Loaded { key: key_owned, bytes },
                Err(error) => Completion::Failed { key: key_owned, error },
            };
            let _ = tx.send(completion);
        });
    }

    /// Drains whatever async loads have finished since the last call and
    /// fires their callbacks. Must run on the coordinator thread — the
    /// streaming system calls this at the top of every `tick`.
    pub fn poll_completions(&mut self) {
        while let Ok(completion) = self.completion_rx.try_recv() {
            match completion {
                Completion::Loaded { key, bytes } => self.complete(&key, Ok(bytes)),
                Completion::Failed { key, error } => self.complete(&key, Err(error)),
            }
        }
    }

    fn complete(&mut self, key: &str, result: Result<Vec<u8>>) {
        let Some(entry) = self.entries.get_mut(key) else { return };
        entry.pending = false;
        let callbacks = std::mem::take(&mut entry.callbacks);

        let blob = result.and_then(|bytes| BlobAssetReference::new(Arc::from(bytes)));

        match &blob {
            Ok(b) => {
                entry.buffer = Some(Arc::clone(b.buffer()));
                entry.blob_ref = Some(b.clone());
            }
            Err(e) => {
                warn!(resource_key = key, error = %e, "async blob load failed");
                entry.ref_count = entry.ref_count.saturating_sub(callbacks.len() as u32);
            }
        }

        for cb in callbacks {
            cb(Some(blob.clone()));
        }
    }

    /// Decrements `ref_count`; at zero, drops the buffer and removes the
    /// entry. If a load was still in flight, whatever callbacks were queued
    /// at that moment are notified with `None` — the completion itself is
    /// discarded when it eventually arrives (`complete` no-ops on a missing
    /// entry).
    pub fn release(&mut self, key: &str) {
        let Some(entry) = self.entries.get_mut(key) else { return };
        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count == 0 {
            let callbacks = std::mem::take(&mut entry.callbacks);
            for cb in callbacks {
                cb(None);
            }
            self.entries.remove(key);
        }
    }

    /// Forced eject, independent of `ref_count`. Outstanding callbacks are
    /// invoked with `None`; the called-back system must treat that as a
    /// soft failure, not an error.
    pub fn unload(&mut self, key: &str) {
        if let Some(mut entry) = self.entries.remove(key) {
            for cb in std::mem::take(&mut entry.callbacks) {
                cb(None);
            }
        }
    }

    /// Synchronously reloads `key`'s bytes, replacing the cached buffer.
    /// Handles already checked out keep referring to the old buffer (it's
    /// reference-counted, not reused in place) until their owner releases
    /// and re-checks the key — the documented rebake-during-edit caveat.
    pub fn force_reload(&mut self, key: &str) -> Result<()> {
        let bytes = self.loader.load(key)?;
        let blob = BlobAssetReference::new(Arc::from(bytes))?;
        let entry = self.entries.entry(key.to_string()).or_insert_with(Entry::new);
        entry.buffer = Some(Arc::clone(blob.buffer()));
        entry.blob_ref = Some(blob);
        Ok(())
    }
}
