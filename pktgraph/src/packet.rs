//! Reference-counted, copy-on-write packet buffers.
//!
//! A [`Packet`] is a cheap handle onto a shared byte region. The live data
//! window sits inside the region with headroom in front and tailroom behind,
//! so headers can be prepended or stripped without moving payload bytes.
//!
//! Mutating packet bytes requires a [`WritablePacket`], obtained through
//! [`Packet::uniqueify`]. A `WritablePacket` is statically exclusive: it
//! cannot be cloned and never aliases storage with another handle, so every
//! write is safe against sibling clones by construction.

use std::sync::Arc;
use std::time::SystemTime;

/// Headroom reserved at the front of a freshly allocated buffer.
pub const DEFAULT_HEADROOM: usize = 64;

/// Size of the per-packet annotation scratch area in bytes.
pub const ANNO_SIZE: usize = 48;

/// Out-of-band metadata carried with each packet handle.
///
/// Annotations travel with the handle, not the storage: cloning a packet
/// copies its annotations, and siblings never see each other's changes.
///
/// Header markers are offsets into the underlying buffer (not the data
/// window), so stripping or prepending bytes does not invalidate them.
/// They are meaningless until some upstream element sets them.
#[derive(Clone, Copy)]
pub struct Anno {
    bytes: [u8; ANNO_SIZE],
    timestamp: Option<SystemTime>,
    mac_header: Option<usize>,
    network_header: Option<usize>,
    transport_header: Option<usize>,
}

impl Default for Anno {
    fn default() -> Self {
        Self {
            bytes: [0; ANNO_SIZE],
            timestamp: None,
            mac_header: None,
            network_header: None,
            transport_header: None,
        }
    }
}

impl Anno {
    /// Read one byte of the scratch area.
    #[inline]
    pub fn u8(&self, offset: usize) -> u8 {
        self.bytes[offset]
    }

    /// Write one byte of the scratch area.
    #[inline]
    pub fn set_u8(&mut self, offset: usize, value: u8) {
        self.bytes[offset] = value;
    }

    /// Read a native-endian u16 at `offset`.
    #[inline]
    pub fn u16(&self, offset: usize) -> u16 {
        u16::from_ne_bytes([self.bytes[offset], self.bytes[offset + 1]])
    }

    /// Write a native-endian u16 at `offset`.
    #[inline]
    pub fn set_u16(&mut self, offset: usize, value: u16) {
        self.bytes[offset..offset + 2].copy_from_slice(&value.to_ne_bytes());
    }

    /// Read a native-endian u32 at `offset`.
    #[inline]
    pub fn u32(&self, offset: usize) -> u32 {
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.bytes[offset..offset + 4]);
        u32::from_ne_bytes(b)
    }

    /// Write a native-endian u32 at `offset`.
    #[inline]
    pub fn set_u32(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
    }

    /// Timestamp annotation, if one was set.
    #[inline]
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }

    /// Set the timestamp annotation.
    #[inline]
    pub fn set_timestamp(&mut self, ts: SystemTime) {
        self.timestamp = Some(ts);
    }

    /// Shift all header markers by a signed delta. Used when a reallocation
    /// moves the data bytes within the buffer.
    fn shift_headers(&mut self, delta: isize) {
        for marker in [
            &mut self.mac_header,
            &mut self.network_header,
            &mut self.transport_header,
        ] {
            *marker = marker.and_then(|off| off.checked_add_signed(delta));
        }
    }
}

fn alloc_zeroed(len: usize) -> Option<Vec<u8>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).ok()?;
    v.resize(len, 0);
    Some(v)
}

/// A shared handle onto a packet buffer.
///
/// `Clone` is O(1) and shares storage; annotations are copied per handle.
/// Window-shrinking operations ([`pull`](Packet::pull), [`take`](Packet::take))
/// only move this handle's offsets and are safe on shared storage. Anything
/// that writes bytes goes through [`uniqueify`](Packet::uniqueify).
#[derive(Clone)]
pub struct Packet {
    buf: Arc<[u8]>,
    start: usize,
    end: usize,
    anno: Anno,
}

impl Packet {
    /// Allocate a packet with `len` bytes of zeroed data and default
    /// headroom. Returns `None` if the allocation fails.
    pub fn make(len: usize) -> Option<Packet> {
        Self::make_with(DEFAULT_HEADROOM, len, 0)
    }

    /// Allocate a packet with explicit headroom and tailroom.
    pub fn make_with(headroom: usize, len: usize, tailroom: usize) -> Option<Packet> {
        let cap = headroom.checked_add(len)?.checked_add(tailroom)?;
        let buf = alloc_zeroed(cap)?;
        Some(Packet {
            buf: buf.into(),
            start: headroom,
            end: headroom + len,
            anno: Anno::default(),
        })
    }

    /// Allocate a packet whose data window is a copy of `data`.
    pub fn from_slice(data: &[u8]) -> Option<Packet> {
        let mut buf = alloc_zeroed(DEFAULT_HEADROOM + data.len())?;
        buf[DEFAULT_HEADROOM..].copy_from_slice(data);
        Some(Packet {
            buf: buf.into(),
            start: DEFAULT_HEADROOM,
            end: DEFAULT_HEADROOM + data.len(),
            anno: Anno::default(),
        })
    }

    /// Length of the live data window.
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// True if the data window is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Unused space in front of the data window.
    #[inline]
    pub fn headroom(&self) -> usize {
        self.start
    }

    /// Unused space behind the data window.
    #[inline]
    pub fn tailroom(&self) -> usize {
        self.buf.len() - self.end
    }

    /// Total size of the underlying buffer.
    #[inline]
    pub fn buffer_len(&self) -> usize {
        self.buf.len()
    }

    /// The live data bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// True if other handles share this storage.
    #[inline]
    pub fn shared(&self) -> bool {
        Arc::strong_count(&self.buf) > 1
    }

    /// Number of handles sharing this storage.
    #[inline]
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.buf)
    }

    /// Annotation block for this handle.
    #[inline]
    pub fn anno(&self) -> &Anno {
        &self.anno
    }

    /// Mutable annotation block. Annotations are per handle, so this never
    /// requires uniqueifying.
    #[inline]
    pub fn anno_mut(&mut self) -> &mut Anno {
        &mut self.anno
    }

    /// Strip `n` bytes from the front of the data window.
    ///
    /// The bytes stay in headroom (a later in-place [`WritablePacket::push`]
    /// re-exposes them). Returns `false` and leaves the window untouched when
    /// `n` exceeds the current length.
    #[inline]
    pub fn pull(&mut self, n: usize) -> bool {
        if n <= self.len() {
            self.start += n;
            true
        } else {
            false
        }
    }

    /// Shrink the data window by `n` bytes at the tail. Never reallocates.
    ///
    /// Returns `false` and leaves the window untouched when `n` exceeds the
    /// current length.
    #[inline]
    pub fn take(&mut self, n: usize) -> bool {
        if n <= self.len() {
            self.end -= n;
            true
        } else {
            false
        }
    }

    /// Obtain an exclusive, writable handle.
    ///
    /// If this handle is the only owner the conversion is free; otherwise the
    /// full buffer is copied, preserving the headroom/tailroom layout so that
    /// header markers stay valid. Returns `None` on allocation failure.
    pub fn uniqueify(mut self) -> Option<WritablePacket> {
        if Arc::get_mut(&mut self.buf).is_none() {
            let mut copy = Vec::new();
            copy.try_reserve_exact(self.buf.len()).ok()?;
            copy.extend_from_slice(&self.buf);
            self.buf = copy.into();
        }
        Some(WritablePacket { inner: self })
    }

    /// Prepend `n` bytes, uniqueifying first. Convenience for
    /// `uniqueify()` + [`WritablePacket::push`].
    pub fn push(self, n: usize) -> Option<WritablePacket> {
        let mut wp = self.uniqueify()?;
        wp.push(n)?;
        Some(wp)
    }

    /// Drop this handle. The storage is freed when the last handle is killed.
    #[inline]
    pub fn kill(self) {}

    /// Mark the MAC header at `offset` bytes into the current data window.
    pub fn set_mac_header(&mut self, offset: usize) {
        self.anno.mac_header = Some(self.start + offset);
    }

    /// Mark the network header at `offset` bytes into the current data
    /// window, with `len` header bytes. The transport header marker is placed
    /// immediately after it.
    pub fn set_network_header(&mut self, offset: usize, len: usize) {
        self.anno.network_header = Some(self.start + offset);
        self.anno.transport_header = Some(self.start + offset + len);
    }

    /// Offset of the network header from the current data start, if marked
    /// and still inside the window.
    pub fn network_header_offset(&self) -> Option<usize> {
        self.anno
            .network_header
            .filter(|&off| off >= self.start && off <= self.end)
            .map(|off| off - self.start)
    }

    /// The network header bytes: from the marker to the transport marker, or
    /// to the end of the data window if no transport marker is set.
    pub fn network_header(&self) -> Option<&[u8]> {
        let net = self.anno.network_header?;
        if net < self.start || net > self.end {
            return None;
        }
        let stop = match self.anno.transport_header {
            Some(t) if t >= net && t <= self.end => t,
            _ => self.end,
        };
        Some(&self.buf[net..stop])
    }

    /// The transport header bytes: from the marker to the end of the window.
    pub fn transport_header(&self) -> Option<&[u8]> {
        let t = self.anno.transport_header?;
        if t < self.start || t > self.end {
            return None;
        }
        Some(&self.buf[t..self.end])
    }

    /// The MAC header bytes: from the marker to the network marker, or to the
    /// end of the data window.
    pub fn mac_header(&self) -> Option<&[u8]> {
        let mac = self.anno.mac_header?;
        if mac < self.start || mac > self.end {
            return None;
        }
        let stop = match self.anno.network_header {
            Some(n) if n >= mac && n <= self.end => n,
            _ => self.end,
        };
        Some(&self.buf[mac..stop])
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.len())
            .field("headroom", &self.headroom())
            .field("tailroom", &self.tailroom())
            .field("use_count", &self.use_count())
            .finish()
    }
}

/// An exclusively owned, writable packet.
///
/// Obtained only via [`Packet::uniqueify`]. Not cloneable, and no operation
/// on it can create a second handle to its storage, so in-place writes are
/// always safe.
pub struct WritablePacket {
    inner: Packet,
}

impl WritablePacket {
    fn buf_mut(&mut self) -> &mut [u8] {
        // Exclusive by construction: uniqueify() only builds a WritablePacket
        // around an unshared Arc and nothing can clone it afterwards.
        Arc::get_mut(&mut self.inner.buf).expect("writable packet storage is exclusive")
    }

    /// Length of the data window.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if the data window is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Current headroom.
    #[inline]
    pub fn headroom(&self) -> usize {
        self.inner.headroom()
    }

    /// Current tailroom.
    #[inline]
    pub fn tailroom(&self) -> usize {
        self.inner.tailroom()
    }

    /// The data bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.inner.data()
    }

    /// Mutable access to the data bytes.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        let (start, end) = (self.inner.start, self.inner.end);
        &mut self.buf_mut()[start..end]
    }

    /// Annotation block.
    #[inline]
    pub fn anno(&self) -> &Anno {
        self.inner.anno()
    }

    /// Mutable annotation block.
    #[inline]
    pub fn anno_mut(&mut self) -> &mut Anno {
        self.inner.anno_mut()
    }

    /// Prepend `n` bytes to the data window and return the new front region.
    ///
    /// Extends into headroom in place when possible (O(1), re-exposing
    /// whatever bytes sit there); otherwise reallocates with fresh default
    /// headroom, copying the data window and fixing header markers. Returns
    /// `None` on allocation failure.
    pub fn push(&mut self, n: usize) -> Option<&mut [u8]> {
        if n <= self.inner.start {
            self.inner.start -= n;
        } else {
            // Not enough headroom: move to a bigger buffer. Bytes previously
            // stripped into headroom are not preserved across this path.
            let len = self.inner.len();
            let tailroom = self.inner.tailroom();
            let mut buf = alloc_zeroed(DEFAULT_HEADROOM + n + len + tailroom)?;
            let new_start = DEFAULT_HEADROOM + n;
            buf[new_start..new_start + len].copy_from_slice(self.inner.data());
            let delta = new_start as isize - self.inner.start as isize;
            self.inner.anno.shift_headers(delta);
            self.inner.buf = buf.into();
            self.inner.start = DEFAULT_HEADROOM;
            self.inner.end = new_start + len;
        }
        let (start, n0) = (self.inner.start, n);
        Some(&mut self.buf_mut()[start..start + n0])
    }

    /// Append `n` bytes to the data window and return the new tail region.
    ///
    /// Extends into tailroom in place when possible; otherwise reallocates,
    /// keeping the headroom layout so header markers stay put. Returns `None`
    /// on allocation failure.
    pub fn put(&mut self, n: usize) -> Option<&mut [u8]> {
        if n > self.inner.tailroom() {
            let grown = self.inner.end.checked_add(n)?;
            let mut buf = alloc_zeroed(grown)?;
            buf[..self.inner.end].copy_from_slice(&self.inner.buf[..self.inner.end]);
            self.inner.buf = buf.into();
        }
        let old_end = self.inner.end;
        self.inner.end += n;
        Some(&mut self.buf_mut()[old_end..old_end + n])
    }

    /// Strip `n` bytes from the front of the data window.
    #[inline]
    pub fn pull(&mut self, n: usize) -> bool {
        self.inner.pull(n)
    }

    /// Shrink the data window by `n` bytes at the tail.
    #[inline]
    pub fn take(&mut self, n: usize) -> bool {
        self.inner.take(n)
    }

    /// Release exclusivity and return the plain packet handle.
    #[inline]
    pub fn into_packet(self) -> Packet {
        self.inner
    }

    /// Drop this handle, freeing the storage.
    #[inline]
    pub fn kill(self) {}
}

impl std::fmt::Debug for WritablePacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritablePacket")
            .field("len", &self.len())
            .field("headroom", &self.headroom())
            .field("tailroom", &self.tailroom())
            .finish()
    }
}
