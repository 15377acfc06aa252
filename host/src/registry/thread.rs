//! Thread registry: text streams keyed by hook identity.

use log::Level;
use std::sync::Arc;

use super::{Host, HostEvent, Registry};
use crate::stream::{StreamKey, TextStream};

impl Host {
    /// Route text captured by a hook into its stream, creating the stream
    /// on first use. The new stream takes its type from the target's hook
    /// table, so a hook must be published there before its first text
    /// arrives; otherwise the stream gets the generic type.
    pub fn dispatch_text(&self, key: StreamKey, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let stream = {
            let mut state = self.lock();
            match state.streams.get(&key) {
                Some(stream) => Arc::clone(stream),
                None => {
                    let hook_type = self
                        .hook_param_locked(&mut state, key.pid, key.hook)
                        .map_or(0, |param| param.hook_type);
                    let stream = Arc::new(TextStream::new(key, hook_type));
                    state.streams.insert(key, Arc::clone(&stream));
                    self.notify(HostEvent::Created(Arc::clone(&stream)));
                    texthost_log!(Level::Debug, "dispatch", "new stream {:?} type={:#x}", key, hook_type);
                    stream
                }
            }
        };
        stream.append_bytes(bytes);
        self.drain_events();
    }

    /// Remove every stream whose key satisfies `predicate(key, cmp)`.
    /// The console stream is never removed. Returns how many went away.
    pub fn remove_threads<F>(&self, predicate: F, cmp: &StreamKey) -> usize
    where
        F: Fn(&StreamKey, &StreamKey) -> bool,
    {
        let removed = {
            let mut state = self.lock();
            self.remove_streams_locked(&mut state, predicate, cmp)
        };
        self.drain_events();
        removed
    }

    /// Current stream for `key`. Never creates one.
    pub fn stream(&self, key: &StreamKey) -> Option<Arc<TextStream>> {
        self.lock().streams.get(key).cloned()
    }

    /// All live streams, ordered by key.
    pub fn streams(&self) -> Vec<Arc<TextStream>> {
        let mut streams: Vec<Arc<TextStream>> = self.lock().streams.values().cloned().collect();
        streams.sort_by_key(|stream| stream.key());
        streams
    }

    pub fn console(&self) -> Option<Arc<TextStream>> {
        self.stream(&StreamKey::CONSOLE)
    }

    /// Append one line to the console stream.
    pub fn append_console_text(&self, text: &str) {
        match self.console() {
            Some(console) => {
                console.append_text(text);
                console.append_text("\n");
            }
            None => texthost_log!(Level::Debug, "dispatch", "console gone, dropped: {}", text),
        }
    }

    pub(crate) fn remove_streams_locked<F>(&self, state: &mut Registry, predicate: F, cmp: &StreamKey) -> usize
    where
        F: Fn(&StreamKey, &StreamKey) -> bool,
    {
        let doomed: Vec<StreamKey> = state
            .streams
            .keys()
            .filter(|key| !key.is_console() && predicate(*key, cmp))
            .copied()
            .collect();
        for key in &doomed {
            if let Some(stream) = state.streams.remove(key) {
                self.notify(HostEvent::Removed(stream));
            }
        }
        doomed.len()
    }
}
