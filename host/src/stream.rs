//! Text streams and their identity.

use std::sync::{Mutex, PoisonError};

use shared::hook::USING_UNICODE;

use crate::sys::encoding::{decode_ansi, decode_utf16le};

/// Identity of one logical text stream: which process, which hook, which
/// call site and which split value produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    pub pid:   u32,
    pub hook:  u32,
    pub retn:  u32,
    pub split: u32,
}

impl StreamKey {
    /// The host's own console. Pid 0 never hosts a hook.
    pub const CONSOLE: StreamKey = StreamKey { pid: 0, hook: u32::MAX, retn: u32::MAX, split: u32::MAX };

    pub const fn new(pid: u32, hook: u32, retn: u32, split: u32) -> Self {
        Self { pid, hook, retn, split }
    }

    /// Key matching every stream of `pid` under `same_process`.
    pub const fn process(pid: u32) -> Self {
        Self::new(pid, 0, 0, 0)
    }

    pub fn is_console(&self) -> bool {
        *self == Self::CONSOLE
    }

    /// Removal predicate selecting every stream of the same process.
    pub fn same_process(entry: &StreamKey, cmp: &StreamKey) -> bool {
        entry.pid == cmp.pid
    }
}

/// Append-only text of one stream. Shared by the registry and the consumer;
/// it lives until the last `Arc` is dropped.
#[derive(Debug)]
pub struct TextStream {
    key:       StreamKey,
    hook_type: u32,
    inner:     Mutex<Buffer>,
}

#[derive(Debug, Default)]
struct Buffer {
    text:    String,
    /// Start of a UTF-16 unit or surrogate pair split across fragments.
    pending: Vec<u8>,
}

impl TextStream {
    pub fn new(key: StreamKey, hook_type: u32) -> Self {
        Self { key, hook_type, inner: Mutex::new(Buffer::default()) }
    }

    pub fn key(&self) -> StreamKey {
        self.key
    }

    /// Hook type flags the stream was created with.
    pub fn hook_type(&self) -> u32 {
        self.hook_type
    }

    pub fn is_unicode(&self) -> bool {
        self.hook_type & USING_UNICODE != 0
    }

    /// Snapshot of everything received so far.
    pub fn text(&self) -> String {
        self.buffer().text.clone()
    }

    pub fn len(&self) -> usize {
        self.buffer().text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().text.is_empty()
    }

    /// Append raw bytes from the target, decoded per the stream's type.
    pub fn append_bytes(&self, bytes: &[u8]) {
        let mut buf = self.buffer();
        if !self.is_unicode() {
            buf.text.push_str(&decode_ansi(bytes));
            return;
        }
        let joined;
        let input = if buf.pending.is_empty() {
            bytes
        } else {
            joined = [buf.pending.as_slice(), bytes].concat();
            joined.as_slice()
        };
        let (text, rest) = decode_utf16le(input);
        let rest = rest.to_vec();
        buf.text.push_str(&text);
        buf.pending = rest;
    }

    /// Append text produced by the host itself.
    pub fn append_text(&self, text: &str) {
        self.buffer().text.push_str(text);
    }

    fn buffer(&self) -> std::sync::MutexGuard<'_, Buffer> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_key_is_not_a_process_key() {
        assert!(StreamKey::CONSOLE.is_console());
        assert!(!StreamKey::process(0).is_console());
        assert!(StreamKey::same_process(&StreamKey::new(7, 1, 2, 3), &StreamKey::process(7)));
        assert!(!StreamKey::same_process(&StreamKey::new(7, 1, 2, 3), &StreamKey::process(8)));
    }

    #[test]
    fn unicode_stream_joins_split_units() {
        let stream = TextStream::new(StreamKey::new(1, 2, 3, 0), USING_UNICODE);
        stream.append_bytes(&[0x4B, 0x30, 0x6A]);
        assert_eq!(stream.text(), "か");
        stream.append_bytes(&[0x30]);
        assert_eq!(stream.text(), "かな");
    }

    #[test]
    fn unicode_stream_joins_split_surrogate_pairs() {
        let stream = TextStream::new(StreamKey::new(1, 2, 3, 0), USING_UNICODE);
        stream.append_bytes(&[0x3D, 0xD8]);
        assert_eq!(stream.text(), "");
        stream.append_bytes(&[0x00, 0xDE]);
        assert_eq!(stream.text(), "😀");

        stream.append_bytes(&[0x3D, 0xD8, 0x01]);
        stream.append_bytes(&[0xDE, 0x21, 0x00]);
        assert_eq!(stream.text(), "😀😁!");
    }

    #[test]
    fn ansi_stream_appends_in_order() {
        let stream = TextStream::new(StreamKey::new(1, 2, 3, 0), 0);
        assert!(stream.is_empty());
        stream.append_bytes(b"abc");
        stream.append_text("-");
        stream.append_bytes(b"def");
        assert_eq!(stream.text(), "abc-def");
        assert_eq!(stream.len(), 7);
    }
}
