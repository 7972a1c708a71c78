//! The [`Read`] value type: a view over one sequencing record.
//!
//! A `Read` does not copy the bytes of its record. The identifier, bases and
//! qualities are spans into the batch buffer the parser produced them from; the
//! read holds an `Arc` on that buffer, so the view stays valid for as long as the
//! read (or any clone of it) exists. Derived views that cannot alias the input,
//! i.e. an upper-cased copy of the bases and the cached reverse complement, live
//! in a small per-read scratch arena and are addressed by offset.
//!
//! Clipping is always recomputed from the unclipped baseline, so switching
//! between clipping modes never compounds.

use std::fmt;
use std::ops::{Deref, DerefMut, Range};
use std::str::FromStr;
use std::sync::Arc;

use crate::alphabet::{self, TRIM_QUALITY};
use crate::data::{BatchBytes, DataBatch};
use crate::error::{ReadError, Result};

/// Longest read (in bases) a parser will accept.
pub const MAX_READ_LENGTH: usize = 100_000;

/// Scratch capacity per read: upper-cased forward bases plus RC bases and RC qualities.
pub const LOCAL_BUFFER_CAPACITY: usize = 3 * MAX_READ_LENGTH;

const MAX_CIGAR_LENGTH: usize = 1000;

/// Which ends of a read have trailing `#` qualities trimmed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ClippingType {
    NoClipping,
    ClipFront,
    #[default]
    ClipBack,
    ClipFrontAndBack,
}

impl ClippingType {
    fn clips_back(self) -> bool {
        matches!(self, ClippingType::ClipBack | ClippingType::ClipFrontAndBack)
    }

    fn clips_front(self) -> bool {
        matches!(self, ClippingType::ClipFront | ClippingType::ClipFrontAndBack)
    }
}

/// Parses the two-character `<front><back>` form, each `+` (clip) or `-` (keep):
/// `--`, `-+`, `+-`, `++`.
impl FromStr for ClippingType {
    type Err = ReadError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "--" => Ok(ClippingType::NoClipping),
            "-+" => Ok(ClippingType::ClipBack),
            "+-" => Ok(ClippingType::ClipFront),
            "++" => Ok(ClippingType::ClipFrontAndBack),
            other => Err(ReadError::invalid_option(
                "clipping",
                format!("'{other}' is not one of --, -+, +-, ++"),
            )),
        }
    }
}

impl fmt::Display for ClippingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClippingType::NoClipping => "--",
            ClippingType::ClipBack => "-+",
            ClippingType::ClipFront => "+-",
            ClippingType::ClipFrontAndBack => "++",
        };
        f.write_str(s)
    }
}

/// Orientation of a read relative to how it was sequenced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Direction {
    #[default]
    Forward,
    ReverseComplement,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Forward => Direction::ReverseComplement,
            Direction::ReverseComplement => Direction::Forward,
        }
    }
}

/// Alignment state carried over from an already-aligned input (realignment).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AlignmentOrigin {
    pub location: Option<u64>,
    pub mapq: Option<u8>,
    pub sam_flags: u16,
    pub front_clipping: usize,
    pub back_clipping: usize,
    pub front_hard_clipping: usize,
    pub back_hard_clipping: usize,
    pub rnext: Option<String>,
    pub pnext: u64,
}

impl AlignmentOrigin {
    fn swap_ends(&mut self) {
        std::mem::swap(&mut self.front_clipping, &mut self.back_clipping);
        std::mem::swap(&mut self.front_hard_clipping, &mut self.back_hard_clipping);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum SpanOrigin {
    /// Inside the batch buffer the read was parsed from.
    #[default]
    Borrowed,
    /// Inside the read's own scratch arena.
    Local,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Span {
    origin: SpanOrigin,
    offset: usize,
    len: usize,
}

impl Span {
    fn borrowed(range: Range<usize>) -> Self {
        Span { origin: SpanOrigin::Borrowed, offset: range.start, len: range.end - range.start }
    }

    fn local(offset: usize, len: usize) -> Self {
        Span { origin: SpanOrigin::Local, offset, len }
    }
}

/// One sequencing record, viewed in place.
#[derive(Clone, Default)]
pub struct Read {
    backing: Option<Arc<BatchBytes>>,
    id: Span,
    external_data: Span,
    external_quality: Span,
    unclipped_data: Span,
    unclipped_quality: Span,
    unclipped_len: usize,
    data_len: usize,
    front_clipped: usize,
    clipping: ClippingType,
    direction: Direction,
    local: Vec<u8>,
    upcase_forward: Option<usize>,
    rc: Option<(usize, usize)>,
    batch: DataBatch,
    read_group: Option<Arc<str>>,
    origin: AlignmentOrigin,
}

impl Read {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point this read at a record inside `backing`.
    ///
    /// `id`, `data` and `quality` are byte ranges of `backing`; `data` and
    /// `quality` must have the same length. Any previous clipping, orientation
    /// and cached views are discarded. Lower-case bases are upper-cased into the
    /// scratch arena; `backing` itself is never modified.
    pub fn init(
        &mut self,
        backing: &Arc<BatchBytes>,
        id: Range<usize>,
        data: Range<usize>,
        quality: Range<usize>,
    ) {
        self.init_with_origin(backing, id, data, quality, AlignmentOrigin::default());
    }

    /// As [`Read::init`], also recording alignment state from an aligned input.
    pub fn init_with_origin(
        &mut self,
        backing: &Arc<BatchBytes>,
        id: Range<usize>,
        data: Range<usize>,
        quality: Range<usize>,
        origin: AlignmentOrigin,
    ) {
        debug_assert_eq!(data.len(), quality.len());
        self.backing = Some(Arc::clone(backing));
        self.id = Span::borrowed(id);
        self.external_data = Span::borrowed(data.clone());
        self.external_quality = Span::borrowed(quality);
        self.unclipped_data = self.external_data;
        self.unclipped_quality = self.external_quality;
        self.unclipped_len = data.len();
        self.data_len = data.len();
        self.front_clipped = 0;
        self.clipping = ClippingType::NoClipping;
        self.direction = Direction::Forward;
        self.origin = origin;
        self.local.clear();
        self.upcase_forward = None;
        self.rc = None;

        let bases = &backing[data];
        if alphabet::has_lowercase(bases) {
            self.local.extend(bases.iter().map(u8::to_ascii_uppercase));
            self.upcase_forward = Some(0);
            self.unclipped_data = Span::local(0, self.unclipped_len);
        }
    }

    fn span(&self, span: Span) -> &[u8] {
        let range = span.offset..span.offset + span.len;
        match span.origin {
            SpanOrigin::Borrowed => match &self.backing {
                Some(b) => &b[range],
                None => &[],
            },
            SpanOrigin::Local => &self.local[range],
        }
    }

    /// Identifier without the leading `@`.
    pub fn id(&self) -> &[u8] {
        self.span(self.id)
    }

    /// Bases after clipping, in the current orientation.
    pub fn data(&self) -> &[u8] {
        &self.unclipped_data()[self.front_clipped..self.front_clipped + self.data_len]
    }

    /// Qualities after clipping, parallel to [`Read::data`].
    pub fn quality(&self) -> &[u8] {
        &self.unclipped_quality()[self.front_clipped..self.front_clipped + self.data_len]
    }

    pub fn unclipped_data(&self) -> &[u8] {
        self.span(self.unclipped_data)
    }

    pub fn unclipped_quality(&self) -> &[u8] {
        self.span(self.unclipped_quality)
    }

    pub fn data_len(&self) -> usize {
        self.data_len
    }

    pub fn unclipped_len(&self) -> usize {
        self.unclipped_len
    }

    /// Bases clipped from the front of the current orientation.
    pub fn front_clipped_len(&self) -> usize {
        self.front_clipped
    }

    pub fn clipping_state(&self) -> ClippingType {
        self.clipping
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn batch(&self) -> DataBatch {
        self.batch
    }

    pub fn set_batch(&mut self, batch: DataBatch) {
        self.batch = batch;
    }

    pub fn read_group(&self) -> Option<&Arc<str>> {
        self.read_group.as_ref()
    }

    pub fn set_read_group(&mut self, read_group: Option<Arc<str>>) {
        self.read_group = read_group;
    }

    pub fn origin(&self) -> &AlignmentOrigin {
        &self.origin
    }

    /// Clip to `mode`, recomputing from the unclipped bases.
    pub fn clip(&mut self, mode: ClippingType) {
        self.clip_inner(mode, false);
    }

    /// Clip to `mode`, never exposing bases the original alignment had already
    /// soft clipped.
    pub fn clip_preserving(&mut self, mode: ClippingType) {
        self.clip_inner(mode, true);
    }

    fn clip_inner(&mut self, mode: ClippingType, preserve_original: bool) {
        if mode == self.clipping {
            return;
        }

        let mut data_len = self.unclipped_len;
        let mut front = 0;
        {
            let quality = self.unclipped_quality();

            if mode.clips_back() {
                let mut back = 0;
                while data_len > 0 && quality[data_len - 1] == TRIM_QUALITY {
                    data_len -= 1;
                    back += 1;
                }
                if preserve_original && back < self.origin.back_clipping {
                    data_len = data_len.saturating_sub(self.origin.back_clipping - back);
                }
            }

            if mode.clips_front() {
                while front < data_len && quality[front] == TRIM_QUALITY {
                    front += 1;
                }
                if preserve_original {
                    front = front.max(self.origin.front_clipping).min(data_len);
                }
            }
        }

        self.front_clipped = front;
        self.data_len = data_len - front;
        self.clipping = mode;
    }

    /// Number of trailing trim-sentinel qualities in the clipped view.
    pub fn count_trailing_trim_quality(&self) -> usize {
        self.quality().iter().rev().take_while(|&&q| q == TRIM_QUALITY).count()
    }

    pub fn count_ns(&self) -> usize {
        self.data().iter().filter(|&&c| alphabet::is_n(c)).count()
    }

    /// Write the reverse complement of the clipped bases into `out`.
    pub fn reverse_complement_into(&self, out: &mut Vec<u8>) {
        out.clear();
        out.extend(self.data().iter().rev().map(|&c| alphabet::complement(c)));
    }

    /// Flip between forward and reverse-complement orientation.
    ///
    /// The first flip computes the reverse complement into the scratch arena;
    /// later flips only swap views. Clipping lengths and the original front/back
    /// clipping are mirrored so they keep describing the same bases.
    pub fn become_rc(&mut self) {
        match self.direction {
            Direction::ReverseComplement => {
                self.unclipped_data = match self.upcase_forward {
                    Some(offset) => Span::local(offset, self.unclipped_len),
                    None => self.external_data,
                };
                self.unclipped_quality = self.external_quality;
            }
            Direction::Forward => {
                let (data_offset, quality_offset) = match self.rc {
                    Some(cached) => cached,
                    None => {
                        let rc_data: Vec<u8> = self
                            .unclipped_data()
                            .iter()
                            .rev()
                            .map(|&c| alphabet::complement(c))
                            .collect();
                        let rc_quality: Vec<u8> =
                            self.unclipped_quality().iter().rev().copied().collect();
                        let data_offset = self.local.len();
                        self.local.extend_from_slice(&rc_data);
                        let quality_offset = self.local.len();
                        self.local.extend_from_slice(&rc_quality);
                        debug_assert!(self.local.len() <= LOCAL_BUFFER_CAPACITY);
                        self.rc = Some((data_offset, quality_offset));
                        (data_offset, quality_offset)
                    }
                };
                self.unclipped_data = Span::local(data_offset, self.unclipped_len);
                self.unclipped_quality = Span::local(quality_offset, self.unclipped_len);
            }
        }

        self.direction = self.direction.opposite();
        self.front_clipped = self.unclipped_len - self.data_len - self.front_clipped;
        self.origin.swap_ends();
    }
}

impl fmt::Debug for Read {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Read")
            .field("id", &String::from_utf8_lossy(self.id()))
            .field("data", &String::from_utf8_lossy(self.data()))
            .field("quality", &String::from_utf8_lossy(self.quality()))
            .field("clipping", &self.clipping)
            .field("direction", &self.direction)
            .field("batch", &self.batch)
            .finish()
    }
}

/// A read whose id, bases and qualities are copied into its own allocation.
///
/// Unlike [`Read`], it pins only its own bytes, not the whole batch buffer the
/// source read came from, so it can be kept after the source's batch has been
/// released. Dropping it frees the copy.
#[derive(Clone, Debug, Default)]
pub struct OwnedRead {
    read: Read,
}

impl OwnedRead {
    /// Copy `base` with the same orientation, clipping and alignment state.
    pub fn from_read(base: &Read) -> Self {
        // copy the forward baseline, then replay the orientation
        let id = base.id();
        let data = match base.upcase_forward {
            Some(offset) => &base.local[offset..offset + base.unclipped_len],
            None => base.span(base.external_data),
        };
        let quality = base.span(base.external_quality);
        let mut bytes = Vec::with_capacity(id.len() + data.len() + quality.len());
        bytes.extend_from_slice(id);
        bytes.extend_from_slice(data);
        bytes.extend_from_slice(quality);
        let backing = Arc::new(BatchBytes::Heap(bytes));

        let reversed = base.direction == Direction::ReverseComplement;
        let mut origin = base.origin.clone();
        if reversed {
            origin.swap_ends();
        }

        let (i, n) = (id.len(), data.len());
        let mut read = Read::new();
        read.init_with_origin(&backing, 0..i, i..i + n, i + n..i + 2 * n, origin);
        read.clipping = base.clipping;
        read.data_len = base.data_len;
        read.front_clipped = if reversed {
            base.unclipped_len - base.data_len - base.front_clipped
        } else {
            base.front_clipped
        };
        if reversed {
            read.become_rc();
        }
        read.set_read_group(base.read_group().cloned());
        Self { read }
    }

    pub fn into_read(self) -> Read {
        self.read
    }
}

impl Deref for OwnedRead {
    type Target = Read;

    fn deref(&self) -> &Read {
        &self.read
    }
}

impl DerefMut for OwnedRead {
    fn deref_mut(&mut self) -> &mut Read {
        &mut self.read
    }
}

/// Soft and hard clipping at both ends of a CIGAR string.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CigarClipping {
    pub front: usize,
    pub back: usize,
    pub front_hard: usize,
    pub back_hard: usize,
}

/// Extract clipping from a CIGAR string.
///
/// The CIGAR ends at the end of `cigar`, a NUL or a tab. Hard clips are taken
/// from the outside first, then soft clips from what remains. A CIGAR that is a
/// single clip operation counts as front clipping.
///
/// # Errors
/// [`ReadError::Malformed`] for CIGAR strings of 1000 or more characters.
pub fn clipping_from_cigar(cigar: &[u8]) -> Result<CigarClipping> {
    let len = cigar.iter().position(|&c| c == b'\t' || c == 0).unwrap_or(cigar.len());
    if len >= MAX_CIGAR_LENGTH {
        return Err(ReadError::malformed("<cigar>", 0, "absurdly long cigar string"));
    }
    let cigar = &cigar[..len];

    let (front_hard, back_hard, front_chars, back_chars) = extract_clipping(cigar, b'H');
    let inner = &cigar[front_chars..cigar.len() - back_chars];
    let (front, back, _, _) = extract_clipping(inner, b'S');
    Ok(CigarClipping { front, back, front_hard, back_hard })
}

/// `(front, back, front_chars, back_chars)` for one clip operator.
fn extract_clipping(cigar: &[u8], op: u8) -> (usize, usize, usize, usize) {
    let leading_digits = cigar.iter().take_while(|c| c.is_ascii_digit()).count();
    let (front, front_chars) = if leading_digits > 0 && cigar.get(leading_digits) == Some(&op) {
        (parse_digits(&cigar[..leading_digits]), leading_digits + 1)
    } else {
        (0, 0)
    };

    let mut back = 0;
    let mut back_chars = 0;
    if cigar.len() > 1 && cigar[cigar.len() - 1] == op {
        let body = &cigar[..cigar.len() - 1];
        let trailing_digits = body.iter().rev().take_while(|c| c.is_ascii_digit()).count();
        let digits_start = body.len() - trailing_digits;
        // A single clip operation was already counted as front clipping.
        if trailing_digits > 0 && digits_start > 0 {
            back = parse_digits(&body[digits_start..]);
            back_chars = trailing_digits + 1;
        }
    }
    (front, back, front_chars, back_chars)
}

fn parse_digits(digits: &[u8]) -> usize {
    digits.iter().fold(0usize, |acc, &d| acc.saturating_mul(10).saturating_add((d - b'0') as usize))
}

/// Strip a trailing `/1` or `/2` mate suffix.
pub fn strip_mate_suffix(id: &[u8]) -> &[u8] {
    match id {
        [stem @ .., b'/', b'1' | b'2'] => stem,
        _ => id,
    }
}

/// Require that two mates name the same fragment (ignoring `/1`/`/2` suffixes
/// and anything after the first whitespace).
///
/// # Errors
/// [`ReadError::PairDesync`] when the names differ.
pub fn check_id_match(read0: &Read, read1: &Read) -> Result<()> {
    fn stem(id: &[u8]) -> &[u8] {
        let end = id.iter().position(u8::is_ascii_whitespace).unwrap_or(id.len());
        strip_mate_suffix(&id[..end])
    }
    if stem(read0.id()) == stem(read1.id()) {
        Ok(())
    } else {
        Err(ReadError::desync(
            "<pair>",
            read0.id(),
            format!("mate id '{}' does not match", String::from_utf8_lossy(read1.id())),
        ))
    }
}

#[cfg(test)]
mod read_tests {
    use super::*;

    /// Build a read from `@id\ndata\n+\nquality\n`-style parts in one buffer.
    fn make(id: &str, data: &str, quality: &str) -> Read {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(id.as_bytes());
        bytes.extend_from_slice(data.as_bytes());
        bytes.extend_from_slice(quality.as_bytes());
        let backing = Arc::new(BatchBytes::Heap(bytes));
        let (i, n) = (id.len(), data.len());
        let mut r = Read::new();
        r.init(&backing, 0..i, i..i + n, i + n..i + 2 * n);
        r
    }

    #[test]
    fn lowercase_is_upcased_without_touching_backing() {
        let r = make("r1", "acGt", "IIII");
        assert_eq!(r.data(), b"ACGT");
        let backing = r.backing.as_ref().unwrap();
        assert_eq!(&backing[2..6], b"acGt");
    }

    #[test]
    fn back_clipping_of_all_sentinel_read_is_empty() {
        let mut r = make("r2", "NNNN", "####");
        r.clip(ClippingType::ClipBack);
        assert_eq!(r.data_len(), 0);
        assert_eq!(r.data(), b"");
    }

    #[test]
    fn clip_is_idempotent_and_non_compounding() {
        let mut a = make("r", "ACGTACGT", "##IIII##");
        a.clip(ClippingType::ClipFrontAndBack);
        let once = (a.data().to_vec(), a.quality().to_vec());
        a.clip(ClippingType::ClipFrontAndBack);
        assert_eq!((a.data().to_vec(), a.quality().to_vec()), once);
        assert_eq!(a.data(), b"GTAC");

        let mut b = make("r", "ACGTACGT", "##IIII##");
        b.clip(ClippingType::ClipFront);
        b.clip(ClippingType::ClipBack);
        let mut direct = make("r", "ACGTACGT", "##IIII##");
        direct.clip(ClippingType::ClipBack);
        assert_eq!(b.data(), direct.data());
        assert_eq!(b.quality(), direct.quality());
        assert_eq!(b.front_clipped_len(), 0);
        assert_eq!(b.data(), b"ACGTAC");

        b.clip(ClippingType::NoClipping);
        assert_eq!(b.data(), b"ACGTACGT");
    }

    #[test]
    fn clip_preserving_keeps_original_soft_clips() {
        let backing = Arc::new(BatchBytes::Heap(b"rACGTACGTIIIIII##".to_vec()));
        let origin = AlignmentOrigin { front_clipping: 3, back_clipping: 4, ..Default::default() };
        let mut r = Read::new();
        r.init_with_origin(&backing, 0..1, 1..9, 9..17, origin);
        r.clip_preserving(ClippingType::ClipFrontAndBack);
        // two sentinel bases trimmed fresh, extended to the recorded four; front three kept clipped
        assert_eq!(r.front_clipped_len(), 3);
        assert_eq!(r.data(), b"T");

        let mut fresh = Read::new();
        let origin = AlignmentOrigin { front_clipping: 3, back_clipping: 4, ..Default::default() };
        fresh.init_with_origin(&backing, 0..1, 1..9, 9..17, origin);
        fresh.clip(ClippingType::ClipFrontAndBack);
        assert_eq!(fresh.data(), b"ACGTAC");
    }

    #[test]
    fn become_rc_twice_restores_forward_view() {
        let mut r = make("r", "AACGTT", "#ABCDE");
        r.clip(ClippingType::ClipFront);
        let (data, quality) = (r.data().to_vec(), r.quality().to_vec());
        let front = r.front_clipped_len();

        r.become_rc();
        assert_eq!(r.direction(), Direction::ReverseComplement);
        assert_eq!(r.data(), b"AACGT");
        assert_eq!(r.quality(), b"EDCBA");
        assert_eq!(r.front_clipped_len(), 0);

        r.become_rc();
        assert_eq!(r.direction(), Direction::Forward);
        assert_eq!(r.data(), data.as_slice());
        assert_eq!(r.quality(), quality.as_slice());
        assert_eq!(r.front_clipped_len(), front);

        // cached RC reused on the next flip
        r.become_rc();
        assert_eq!(r.unclipped_data(), b"AACGTT");
        assert_eq!(r.unclipped_quality(), b"EDCBA#");
    }

    #[test]
    fn become_rc_swaps_original_clipping() {
        let mut r = make("r", "ACGT", "IIII");
        r.origin = AlignmentOrigin {
            front_clipping: 1,
            back_clipping: 2,
            front_hard_clipping: 3,
            back_hard_clipping: 4,
            ..Default::default()
        };
        r.become_rc();
        assert_eq!(r.origin().front_clipping, 2);
        assert_eq!(r.origin().back_clipping, 1);
        assert_eq!(r.origin().front_hard_clipping, 4);
        assert_eq!(r.origin().back_hard_clipping, 3);
    }

    #[test]
    fn become_rc_on_lowercase_read_uses_upcased_bases() {
        let mut r = make("r", "aacc", "IIII");
        r.become_rc();
        assert_eq!(r.data(), b"GGTT");
        r.become_rc();
        assert_eq!(r.data(), b"AACC");
    }

    #[test]
    fn clone_aliases_backing_and_copies_scratch() {
        let mut r = make("r", "acgt", "IIII");
        r.become_rc();
        let c = r.clone();
        assert!(Arc::ptr_eq(r.backing.as_ref().unwrap(), c.backing.as_ref().unwrap()));
        assert_eq!(c.data(), b"ACGT");
        assert_eq!(c.direction(), Direction::ReverseComplement);
        assert_eq!(c.local.len(), r.local.len());
    }

    #[test]
    fn owned_read_survives_without_source_buffer() {
        let mut r = make("frag/1", "ACGTNN", "II####");
        r.clip(ClippingType::ClipBack);
        r.set_read_group(Some(Arc::from("rg1")));
        let owned = OwnedRead::from_read(&r);
        let source = Arc::clone(r.backing.as_ref().unwrap());
        drop(r);
        assert_eq!(Arc::strong_count(&source), 1);
        assert_eq!(owned.id(), b"frag/1");
        assert_eq!(owned.data(), b"AC");
        assert_eq!(owned.read_group().map(|g| &**g), Some("rg1"));
    }

    #[test]
    fn owned_copy_of_clipped_rc_read_keeps_its_view() {
        let mut r = make("r", "aaCGTT", "IIII##");
        r.clip(ClippingType::ClipBack);
        r.become_rc();
        assert_eq!(r.data(), b"CGTT");

        let mut owned = OwnedRead::from_read(&r);
        assert_eq!(owned.data(), r.data());
        assert_eq!(owned.quality(), r.quality());
        assert_eq!(owned.direction(), Direction::ReverseComplement);
        assert_eq!(owned.front_clipped_len(), r.front_clipped_len());

        r.become_rc();
        owned.become_rc();
        assert_eq!(owned.direction(), Direction::Forward);
        assert_eq!(owned.data(), b"AACG");
        assert_eq!(owned.data(), r.data());
        assert_eq!(owned.unclipped_data(), r.unclipped_data());
        assert_eq!(owned.quality(), r.quality());
    }

    #[test]
    fn owned_copy_keeps_preserved_clipping() {
        let bytes = b"rACGTACIIIIII".to_vec();
        let backing = Arc::new(BatchBytes::Heap(bytes));
        let origin = AlignmentOrigin { back_clipping: 2, ..AlignmentOrigin::default() };
        let mut r = Read::new();
        r.init_with_origin(&backing, 0..1, 1..7, 7..13, origin);
        r.clip_preserving(ClippingType::ClipBack);
        assert_eq!(r.data(), b"ACGT");

        let mut owned = OwnedRead::from_read(&r);
        assert_eq!(owned.data(), b"ACGT");
        assert_eq!(owned.origin(), r.origin());
        owned.become_rc();
        r.become_rc();
        assert_eq!(owned.data(), r.data());
        assert_eq!(owned.origin(), r.origin());
    }

    #[test]
    fn counts_and_reverse_complement() {
        let mut r = make("r", "ANNGT", "III##");
        assert_eq!(r.count_ns(), 2);
        assert_eq!(r.count_trailing_trim_quality(), 2);
        let mut out = Vec::new();
        r.reverse_complement_into(&mut out);
        assert_eq!(out, b"ACNNT");
        r.clip(ClippingType::ClipBack);
        assert_eq!(r.count_trailing_trim_quality(), 0);
    }

    #[test]
    fn cigar_clipping_extraction() {
        let c = clipping_from_cigar(b"5H10S80M3S2H").unwrap();
        assert_eq!(c, CigarClipping { front: 10, back: 3, front_hard: 5, back_hard: 2 });

        let c = clipping_from_cigar(b"100M\tNM:i:0").unwrap();
        assert_eq!(c, CigarClipping::default());

        let c = clipping_from_cigar(b"50S").unwrap();
        assert_eq!(c, CigarClipping { front: 50, ..Default::default() });

        let c = clipping_from_cigar(b"20M7S").unwrap();
        assert_eq!(c, CigarClipping { back: 7, ..Default::default() });

        let long = vec![b'1'; 1000];
        assert!(clipping_from_cigar(&long).is_err());
    }

    #[test]
    fn clipping_type_round_trips_flag_syntax() {
        for s in ["--", "-+", "+-", "++"] {
            assert_eq!(s.parse::<ClippingType>().unwrap().to_string(), s);
        }
        assert!("+".parse::<ClippingType>().is_err());
        assert_eq!(ClippingType::default(), ClippingType::ClipBack);
    }

    #[test]
    fn mate_ids_match_ignoring_suffix() {
        let a = make("frag9/1 extra", "A", "I");
        let b = make("frag9/2", "A", "I");
        let c = make("frag8/2", "A", "I");
        assert!(check_id_match(&a, &b).is_ok());
        assert!(check_id_match(&a, &c).is_err());
        assert_eq!(strip_mate_suffix(b"x/1"), b"x");
        assert_eq!(strip_mate_suffix(b"x/3"), b"x/3");
    }
}
