//! Scatter/gather byte views over externally owned buffers.
//!
//! [`IpBufRef`] is the read-only "buffer chain" that flows through the whole
//! receive and transmit fast path: an incoming frame, a TCP connection's send
//! ring buffer, a reassembled datagram. None of the types here own the bytes
//! they describe or allocate; a view only ever borrows from caller-provided
//! storage, and every processing function below is non-allocating. This lets
//! a protocol handler prepend a freshly built header to an already-written
//! payload (e.g. unacked bytes still sitting in a send ring buffer) without
//! ever copying the payload.
//!
//! A chain is a singly linked walk of [`IpBufNode`]s; a [`IpBufRef`] is a
//! view into such a chain (first node + offset into it + total remaining
//! length). Nodes are never mutated after construction — crossing into the
//! "next" node of a view never touches the node object, it just repoints the
//! view and resets its offset to zero ([`IpBufRef::normalize`]).

/// One link of a buffer chain: a span of bytes, optionally followed by more.
#[derive(Clone, Copy)]
pub struct IpBufNode<'a> {
    pub ptr: &'a [u8],
    pub next: Option<&'a IpBufNode<'a>>,
}

impl<'a> IpBufNode<'a> {
    /// A chain of exactly one span.
    pub const fn new(ptr: &'a [u8]) -> Self {
        IpBufNode { ptr, next: None }
    }

    /// A span followed by an existing chain.
    pub const fn new_with_next(ptr: &'a [u8], next: &'a IpBufNode<'a>) -> Self {
        IpBufNode {
            ptr,
            next: Some(next),
        }
    }
}

/// A read-only view into a [`IpBufNode`] chain.
///
/// Invariant: `offset <= node.ptr.len()`, and at least `total_len` bytes are
/// reachable by repeatedly following `next`. The view is always normalized:
/// `offset` never equals `node.ptr.len()` unless `node.next` is `None` (i.e.
/// we eagerly cross into the next node whenever the current one is
/// exhausted), which keeps ring-buffer-backed offsets bounded by the ring
/// size rather than growing without bound.
#[derive(Clone, Copy)]
pub struct IpBufRef<'a> {
    pub node: &'a IpBufNode<'a>,
    pub offset: usize,
    pub total_len: usize,
}

impl<'a> IpBufRef<'a> {
    pub fn new(node: &'a IpBufNode<'a>, offset: usize, total_len: usize) -> Self {
        debug_assert!(offset <= node.ptr.len());
        let mut view = IpBufRef {
            node,
            offset,
            total_len,
        };
        view.normalize();
        view
    }

    /// A view over a single contiguous slice, e.g. a freshly received frame.
    pub fn from_slice(node: &'a IpBufNode<'a>) -> Self {
        debug_assert!(node.next.is_none());
        IpBufRef::new(node, 0, node.ptr.len())
    }

    fn normalize(&mut self) {
        while self.offset == self.node.ptr.len() {
            match self.node.next {
                Some(next) => {
                    self.node = next;
                    self.offset = 0;
                }
                None => break,
            }
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.total_len == 0
    }

    fn current_chunk(&self) -> &'a [u8] {
        &self.node.ptr[self.offset..]
    }

    /// Visit up to `n` bytes of the consumed prefix as contiguous chunks, in
    /// order, advancing `self` past them. Never invokes `visit` with an empty
    /// slice, and always crosses node boundaries as needed so that `n` bytes
    /// (or `total_len`, whichever is smaller) are visited in total.
    pub fn process_bytes(&mut self, n: usize, mut visit: impl FnMut(&'a [u8])) {
        let mut remaining = n.min(self.total_len);
        while remaining > 0 {
            let chunk = self.current_chunk();
            let take = remaining.min(chunk.len());
            debug_assert!(take > 0);
            visit(&chunk[..take]);
            self.offset += take;
            self.total_len -= take;
            remaining -= take;
            self.normalize();
        }
    }

    /// Like [`process_bytes`](Self::process_bytes), but `visit` reports how
    /// many bytes of the chunk it actually consumed and whether the walk
    /// should stop. Used by [`find_byte`](Self::find_byte) and
    /// [`starts_with`](Self::starts_with). Returns the number of bytes
    /// consumed.
    pub fn process_bytes_interruptible(
        &mut self,
        max_n: usize,
        mut visit: impl FnMut(&'a [u8]) -> (usize, bool),
    ) -> usize {
        let max_n = max_n.min(self.total_len);
        let mut consumed = 0;
        while consumed < max_n {
            let chunk = self.current_chunk();
            let limit = (max_n - consumed).min(chunk.len());
            if limit == 0 {
                break;
            }
            let (took, stop) = visit(&chunk[..limit]);
            let took = took.min(limit);
            self.offset += took;
            self.total_len -= took;
            consumed += took;
            self.normalize();
            if stop || took < limit {
                break;
            }
        }
        consumed
    }

    /// Truncate the view to at most `len` bytes.
    pub fn sub_to(&self, len: usize) -> IpBufRef<'a> {
        IpBufRef::new(self.node, self.offset, len.min(self.total_len))
    }

    /// Skip `off` bytes then truncate to `len` bytes.
    pub fn sub_from_to(&self, off: usize, len: usize) -> IpBufRef<'a> {
        let mut view = *self;
        let skip = off.min(view.total_len);
        view.process_bytes(skip, |_| {});
        view.sub_to(len)
    }

    /// Reveal `n` bytes that were previously hidden from the front of this
    /// view's current node (the counterpart of [`hide_header`](Self::hide_header)).
    /// `n` must not exceed `offset`.
    pub fn reveal_header(&self, n: usize) -> IpBufRef<'a> {
        debug_assert!(n <= self.offset);
        IpBufRef {
            node: self.node,
            offset: self.offset - n,
            total_len: self.total_len + n,
        }
    }

    /// Drop `n` bytes from the front of the view.
    pub fn hide_header(&self, n: usize) -> IpBufRef<'a> {
        self.sub_from_to(n, self.total_len.saturating_sub(n))
    }

    /// Splice `header_len` bytes drawn from this view's current node (a
    /// freshly written header, typically in caller-owned scratch storage)
    /// with a continuation chain, writing the link node into `out_node`.
    ///
    /// `cont` must start at offset 0 of its own first node; a continuation
    /// with a nonzero offset must first be collapsed by the caller (its data
    /// is a plain borrowed slice, so this is always just a reslice, never a
    /// copy).
    pub fn sub_header_to_continued_by(
        &self,
        header_len: usize,
        cont: IpBufRef<'a>,
        total_len: usize,
        out_node: &'a mut IpBufNode<'a>,
    ) -> IpBufRef<'a> {
        debug_assert_eq!(cont.offset, 0);
        debug_assert!(header_len <= self.node.ptr.len() - self.offset);
        *out_node = IpBufNode {
            ptr: &self.node.ptr[self.offset..self.offset + header_len],
            next: Some(cont.node),
        };
        IpBufRef::new(out_node, 0, total_len)
    }

    /// Copy every byte of the view into `out`, which must be exactly
    /// `total_len` bytes long. This is the one place the zero-copy
    /// guarantee is broken on purpose: handing a chain to a device transport
    /// that only accepts one contiguous frame.
    pub fn copy_to_slice(&self, out: &mut [u8]) {
        assert_eq!(out.len(), self.total_len);
        let mut view = *self;
        let mut pos = 0;
        view.process_bytes(view.total_len, |chunk| {
            out[pos..pos + chunk.len()].copy_from_slice(chunk);
            pos += chunk.len();
        });
    }

    /// Find the first occurrence of `byte` within the view, returning its
    /// offset from the current start. Does not advance `self`.
    pub fn find_byte(&self, byte: u8) -> Option<usize> {
        let mut view = *self;
        let mut scanned = 0;
        let mut found = None;
        view.process_bytes_interruptible(view.total_len, |chunk| {
            if let Some(i) = chunk.iter().position(|&b| b == byte) {
                found = Some(scanned + i);
                (i + 1, true)
            } else {
                scanned += chunk.len();
                (chunk.len(), false)
            }
        });
        found
    }

    /// Whether the view's bytes begin with `needle`.
    pub fn starts_with(&self, needle: &[u8]) -> bool {
        if needle.len() > self.total_len {
            return false;
        }
        let mut view = *self;
        let mut pos = 0;
        let mut ok = true;
        view.process_bytes_interruptible(needle.len(), |chunk| {
            if chunk != &needle[pos..pos + chunk.len()] {
                ok = false;
                (chunk.len(), true)
            } else {
                pos += chunk.len();
                (chunk.len(), false)
            }
        });
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_bytes_visits_every_byte_in_order() {
        let tail = IpBufNode::new(&[4, 5, 6]);
        let head = IpBufNode::new_with_next(&[1, 2, 3], &tail);
        let mut view = IpBufRef::new(&head, 0, 6);

        let mut seen = Vec::new();
        view.process_bytes(6, |chunk| seen.extend_from_slice(chunk));
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6]);
        assert!(view.is_empty());
    }

    #[test]
    fn sub_to_then_sub_from_to_is_catenation_identity() {
        let node = IpBufNode::new(&[0, 1, 2, 3, 4, 5, 6, 7]);
        let view = IpBufRef::new(&node, 0, 8);

        for n in 0..=8 {
            let head = view.sub_to(n);
            let tail = view.sub_from_to(n, 8 - n);

            let mut bytes = Vec::new();
            let mut h = head;
            h.process_bytes(h.total_len, |c| bytes.extend_from_slice(c));
            let mut t = tail;
            t.process_bytes(t.total_len, |c| bytes.extend_from_slice(c));

            assert_eq!(bytes, (0u8..8).collect::<Vec<_>>());
        }
    }

    #[test]
    fn reveal_header_undoes_hide_header() {
        let node = IpBufNode::new(&[0, 1, 2, 3, 4]);
        let view = IpBufRef::new(&node, 0, 5);
        let hidden = view.hide_header(2);
        assert_eq!(hidden.total_len, 3);
        let revealed = hidden.reveal_header(2);
        assert_eq!(revealed.total_len, 5);
        assert_eq!(revealed.offset, 0);
    }

    #[test]
    fn find_byte_locates_across_node_boundary() {
        let tail = IpBufNode::new(b"world");
        let head = IpBufNode::new_with_next(b"hello ", &tail);
        let view = IpBufRef::new(&head, 0, 11);
        assert_eq!(view.find_byte(b'w'), Some(6));
        assert_eq!(view.find_byte(b'z'), None);
    }

    #[test]
    fn sub_header_to_continued_by_splices_without_copying_payload() {
        let payload = IpBufNode::new(&[10, 11, 12]);
        let payload_view = IpBufRef::new(&payload, 0, 3);

        let header_storage = IpBufNode::new(&[1, 2]);
        let header_view = IpBufRef::new(&header_storage, 0, 2);

        let mut out_node = IpBufNode::new(&[]);
        let spliced =
            header_view.sub_header_to_continued_by(2, payload_view, 5, &mut out_node);

        let mut bytes = Vec::new();
        let mut s = spliced;
        s.process_bytes(s.total_len, |c| bytes.extend_from_slice(c));
        assert_eq!(bytes, vec![1, 2, 10, 11, 12]);
    }
}
