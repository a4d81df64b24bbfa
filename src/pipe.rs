//! Exchange pipe: the per-connection inbound/outbound byte buffer.
//!
//! Mirrors the teacher's zero-allocation philosophy (fixed embedded region,
//! spill to heap only under pressure) generalized from an HTTP-only request
//! buffer to a protocol-agnostic byte pipe shared by all five engines.

use crate::errors::CoreError;

/// One RAM page; the unit the network adapter receives into.
pub const PAGE_SIZE: usize = 4096;

/// Extra bytes kept past the logical length of an embedded buffer so a
/// batch-oriented parser (`memchr`/SIMD-style) may over-read safely
/// (spec.md §4.1 invariant ii).
pub const PARSER_PADDING: usize = 64;

/// One direction of an [`ExchangePipe`]: either the inbound or the outbound
/// half. Holds a boxed embedded array (kept boxed so [`crate::pool::ConnectionRecord`]
/// stays small enough for the pool's arena) plus an optional dynamic overflow.
#[derive(Debug)]
pub struct HalfPipe {
    embedded: Box<[u8; PAGE_SIZE + PARSER_PADDING]>,
    used: usize,
    dynamic: Option<Vec<u8>>,
    /// Outbound-only: bytes of the *logical* output already fully flushed
    /// across all previously-sent windows (everything before the window
    /// currently staged in `embedded`). Advances only in
    /// [`Self::prepare_more_outputs`], once the prior window is complete.
    flushed: usize,
    /// Outbound-only: bytes of the window currently staged in
    /// `embedded[..used]` already handed to the kernel, advanced by
    /// [`Self::mark_submitted`] (spec.md §4.1 `mark_submitted_outputs(n)` —
    /// "advances the send cursor by n").
    window_sent: usize,
}

impl HalfPipe {
    pub fn new() -> Self {
        Self {
            embedded: Box::new([0u8; PAGE_SIZE + PARSER_PADDING]),
            used: 0,
            dynamic: None,
            flushed: 0,
            window_sent: 0,
        }
    }

    /// Logical byte span: dynamic takes precedence once it exists, per
    /// spec.md §4.1 invariant (iii) — the embedded prefix has already been
    /// copied into it by [`Self::shift_to_dynamic`].
    pub fn span(&self) -> &[u8] {
        match &self.dynamic {
            Some(v) => v.as_slice(),
            None => &self.embedded[..self.used],
        }
    }

    pub fn len(&self) -> usize {
        self.span().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writable region of exactly one page for the next receive submission.
    /// Only valid while the half-pipe has not yet spilled to dynamic.
    pub fn next_input_address_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        (&mut self.embedded[..PAGE_SIZE]).try_into().unwrap()
    }

    pub fn next_input_length(&self) -> usize {
        PAGE_SIZE
    }

    /// Integrates a receive of `n` bytes into the logical span. If dynamic
    /// storage already exists, the embedded prefix is immediately merged
    /// into it (spec.md §4.1 `absorb_input`).
    pub fn absorb_input(&mut self, n: usize) -> Result<(), CoreError> {
        if let Some(dyn_buf) = &mut self.dynamic {
            dyn_buf
                .try_reserve(n)
                .map_err(|_| CoreError::OutOfMemory)?;
            dyn_buf.extend_from_slice(&self.embedded[..n]);
        } else {
            self.used = n;
        }
        Ok(())
    }

    /// Moves the embedded prefix into a freshly allocated dynamic buffer.
    /// Called when the parser requests more data than one page holds.
    pub fn shift_to_dynamic(&mut self) -> Result<(), CoreError> {
        if self.dynamic.is_some() {
            return Ok(());
        }
        let mut dyn_buf = Vec::new();
        dyn_buf
            .try_reserve(self.used.max(PAGE_SIZE))
            .map_err(|_| CoreError::OutOfMemory)?;
        dyn_buf.extend_from_slice(&self.embedded[..self.used]);
        self.dynamic = Some(dyn_buf);
        self.used = 0;
        self.flushed = 0;
        self.window_sent = 0;
        Ok(())
    }

    /// Appends to an outbound pipe; stays embedded while the cumulative
    /// size fits one page, otherwise spills (spec.md §4.1 `append_outputs`).
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), CoreError> {
        if let Some(dyn_buf) = &mut self.dynamic {
            dyn_buf
                .try_reserve(bytes.len())
                .map_err(|_| CoreError::OutOfMemory)?;
            dyn_buf.extend_from_slice(bytes);
            return Ok(());
        }

        if self.used + bytes.len() <= PAGE_SIZE {
            self.embedded[self.used..self.used + bytes.len()].copy_from_slice(bytes);
            self.used += bytes.len();
            return Ok(());
        }

        self.shift_to_dynamic()?;
        self.append(bytes)
    }

    /// Overwrites `bytes.len()` bytes starting at `offset` in the logical
    /// span. Used by the HTTP engine to back-patch the `Content-Length`
    /// placeholder once the body is fully framed.
    pub fn patch(&mut self, offset: usize, bytes: &[u8]) {
        match &mut self.dynamic {
            Some(v) => v[offset..offset + bytes.len()].copy_from_slice(bytes),
            None => self.embedded[offset..offset + bytes.len()].copy_from_slice(bytes),
        }
    }

    /// If the outbound pipe is dynamic, folds the just-completed window (if
    /// any) into `flushed` and, if any logical bytes remain unflushed,
    /// copies the next page-sized window into embedded so the next send
    /// targets embedded memory only (spec.md §4.1 `prepare_more_outputs`).
    /// Returns whether a new window was staged — callers must send it.
    /// Returns `false` once the dynamic buffer is fully flushed, or if the
    /// output never spilled past one page (that single embedded window
    /// already holds the whole logical output and needs no re-staging).
    ///
    /// Must only be called once the prior window is fully sent
    /// ([`Self::window_complete`]), including the very first call (where
    /// `used == 0`, so folding it into `flushed` is a no-op).
    pub fn prepare_more_outputs(&mut self) -> bool {
        let Some(dyn_buf) = &self.dynamic else {
            return false;
        };
        self.flushed += self.used;
        if self.flushed >= dyn_buf.len() {
            self.used = 0;
            self.window_sent = 0;
            return false;
        }
        let remaining = &dyn_buf[self.flushed..];
        let window = remaining.len().min(PAGE_SIZE);
        self.embedded[..window].copy_from_slice(&remaining[..window]);
        self.used = window;
        self.window_sent = 0;
        true
    }

    /// The bytes of the currently staged window not yet acknowledged as
    /// sent. Distinct from [`Self::span`]: once a dynamic buffer has
    /// spilled, `span` still reports the full logical content (needed
    /// while framing/patching), while `send_window` reports only the
    /// unsent tail of the page [`Self::prepare_more_outputs`] last copied
    /// into the embedded region (or the whole output, for a response that
    /// never spilled to dynamic).
    pub fn send_window(&self) -> &[u8] {
        &self.embedded[self.window_sent..self.used]
    }

    /// Advances the send cursor by `n` (spec.md §4.1
    /// `mark_submitted_outputs(n)`), accounting for a partial kernel write.
    pub fn mark_submitted(&mut self, n: usize) {
        self.window_sent += n;
    }

    /// True once every byte of the window currently staged in `embedded`
    /// has been acknowledged as sent — the only point at which it is valid
    /// to call [`Self::prepare_more_outputs`] for the next window.
    pub fn window_complete(&self) -> bool {
        self.window_sent >= self.used
    }

    /// Resets the half-pipe, freeing any dynamic storage.
    pub fn release(&mut self) {
        self.used = 0;
        self.dynamic = None;
        self.flushed = 0;
        self.window_sent = 0;
    }
}

impl Default for HalfPipe {
    fn default() -> Self {
        Self::new()
    }
}

/// Two half-pipes bundled as a connection's full duplex buffer
/// (spec.md §3 "Exchange pipe").
#[derive(Debug, Default)]
pub struct ExchangePipe {
    pub input: HalfPipe,
    pub output: HalfPipe,
}

impl ExchangePipe {
    pub fn new() -> Self {
        Self { input: HalfPipe::new(), output: HalfPipe::new() }
    }

    pub fn input_span(&self) -> &[u8] {
        self.input.span()
    }

    pub fn output_span(&self) -> &[u8] {
        self.output.span()
    }

    pub fn release_inputs(&mut self) {
        self.input.release();
    }

    pub fn release_outputs(&mut self) {
        self.output.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_round_trip() {
        let mut pipe = HalfPipe::new();
        pipe.next_input_address_mut()[..5].copy_from_slice(b"hello");
        pipe.absorb_input(5).unwrap();
        assert_eq!(pipe.span(), b"hello");
    }

    #[test]
    fn append_spills_to_dynamic_past_one_page() {
        let mut pipe = HalfPipe::new();
        let chunk = vec![b'x'; PAGE_SIZE];
        pipe.append(&chunk).unwrap();
        assert_eq!(pipe.len(), PAGE_SIZE);

        pipe.append(b"more").unwrap();
        assert_eq!(pipe.len(), PAGE_SIZE + 4);
        assert!(pipe.dynamic.is_some());
    }

    #[test]
    fn shift_to_dynamic_preserves_bytes() {
        let mut pipe = HalfPipe::new();
        pipe.next_input_address_mut()[..3].copy_from_slice(b"abc");
        pipe.absorb_input(3).unwrap();
        pipe.shift_to_dynamic().unwrap();
        assert_eq!(pipe.span(), b"abc");

        pipe.next_input_address_mut()[..2].copy_from_slice(b"de");
        pipe.absorb_input(2).unwrap();
        assert_eq!(pipe.span(), b"abcde");
    }

    #[test]
    fn release_clears_embedded_and_dynamic() {
        let mut pipe = HalfPipe::new();
        pipe.append(&vec![b'x'; PAGE_SIZE + 10]).unwrap();
        pipe.release();
        assert!(pipe.is_empty());
        assert!(pipe.dynamic.is_none());
    }

    #[test]
    fn prepare_more_outputs_windows_through_dynamic() {
        let mut pipe = HalfPipe::new();
        pipe.append(&vec![b'y'; PAGE_SIZE + 100]).unwrap();

        // First window: a page was staged, and `prepare_more_outputs`
        // returning `true` means "a window was staged, go send it".
        assert!(pipe.prepare_more_outputs());
        assert_eq!(pipe.used, PAGE_SIZE);

        pipe.mark_submitted(PAGE_SIZE);
        assert!(pipe.window_complete());

        // Second window: the 100-byte tail is itself a window that must be
        // sent, so this also returns `true`.
        assert!(pipe.prepare_more_outputs());
        assert_eq!(pipe.used, 100);

        pipe.mark_submitted(100);
        assert!(pipe.window_complete());
        // Nothing left to stage once the tail is acknowledged.
        assert!(!pipe.prepare_more_outputs());
    }

    /// A response of exactly 3 pages must drain through three distinct
    /// windows, not resend the second page forever or drop the third (the
    /// bug this test guards against: a caller treating `prepare_more_outputs`'s
    /// "is there more after this" return value as "was this window already
    /// sent", which skips the last window whenever it's the tail).
    #[test]
    fn three_page_dynamic_response_drains_every_page_exactly_once() {
        let mut pipe = HalfPipe::new();
        let mut expected = Vec::new();
        for byte in [b'a', b'b', b'c'] {
            expected.extend(std::iter::repeat(byte).take(PAGE_SIZE));
        }
        pipe.append(&expected).unwrap();

        let mut sent = Vec::new();
        assert!(pipe.prepare_more_outputs());
        loop {
            let window = pipe.send_window().to_vec();
            sent.extend_from_slice(&window);
            pipe.mark_submitted(window.len());
            assert!(pipe.window_complete());
            if !pipe.prepare_more_outputs() {
                break;
            }
        }

        assert_eq!(sent, expected);
    }

    /// A short kernel write must resend only the unsent tail of the
    /// current window, not skip ahead to the next page.
    #[test]
    fn partial_write_resends_remainder_of_current_window() {
        let mut pipe = HalfPipe::new();
        pipe.append(&vec![b'z'; PAGE_SIZE + 100]).unwrap();

        assert!(pipe.prepare_more_outputs());
        pipe.mark_submitted(10);
        assert!(!pipe.window_complete());
        assert_eq!(pipe.send_window().len(), PAGE_SIZE - 10);

        pipe.mark_submitted(PAGE_SIZE - 10);
        assert!(pipe.window_complete());

        assert!(pipe.prepare_more_outputs());
        assert_eq!(pipe.send_window().len(), 100);
    }
}
