//! Resynchronising on a FASTQ record start from an arbitrary byte offset.
//!
//! Quality lines may begin with `@`, so "next `@` at a line start" is not enough.
//! A candidate is accepted when it starts with `@`, the following line consists
//! only of base symbols and is newline terminated, and the line after that
//! begins with `+`. This three-line lookahead is a heuristic: adversarial input
//! can still fool it.

use crate::alphabet;
use crate::data::DataReader;

/// Offset of the first verified record start in `buf`, or `None` if the buffer
/// holds no complete candidate.
///
/// `at_line_start` says whether `buf[0]` begins a line in the underlying file;
/// when it does not, a leading `@` belongs to the previous line and is skipped.
pub fn find_record_start(buf: &[u8], at_line_start: bool) -> Option<usize> {
    let mut candidate = if at_line_start && buf.first() == Some(&b'@') {
        0
    } else {
        next_line(buf, 0)?
    };

    loop {
        if candidate >= buf.len() {
            return None;
        }
        let second = next_line(buf, candidate)?;
        if buf[candidate] == b'@' && plausible_record_tail(buf, second) {
            return Some(candidate);
        }
        candidate = second;
    }
}

/// Offset just past the next `\n` at or after `from`.
fn next_line(buf: &[u8], from: usize) -> Option<usize> {
    memchr_newline(&buf[from..]).map(|i| from + i + 1)
}

#[inline]
fn memchr_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&c| c == b'\n')
}

/// `buf[line..]` is a base line ending in `\n` (or `\r\n`) followed by a `+` line.
fn plausible_record_tail(buf: &[u8], line: usize) -> bool {
    let rest = &buf[line..];
    let Some(end) = memchr_newline(rest) else {
        return false;
    };
    let bases = match &rest[..end] {
        [body @ .., b'\r'] => body,
        body => body,
    };
    alphabet::is_base_line(bases) && rest.get(end + 1) == Some(&b'+')
}

/// Advance `data` past the partial record at the start of its window.
///
/// Returns `false` when no record start exists in the window; the reader is
/// then left where it was and the partition yields nothing.
pub fn skip_partial_record(data: &mut dyn DataReader) -> bool {
    let at_line_start = data.at_line_start();
    let Some(window) = data.data() else {
        return false;
    };
    match find_record_start(window.bytes(), at_line_start) {
        Some(skip) => {
            if skip > 0 {
                log::debug!(
                    "{}: skipped {} bytes of partial record at offset {}",
                    data.path().display(),
                    skip,
                    data.file_offset()
                );
            }
            data.advance(skip);
            true
        }
        None => {
            log::debug!(
                "{}: no record start after offset {}",
                data.path().display(),
                data.file_offset()
            );
            data.advance(window.len());
            false
        }
    }
}

#[cfg(test)]
mod boundary_tests {
    use super::*;

    const TWO: &[u8] = b"@r1\nACGT\n+\n!!!!\n@r2\nNNNN\n+\n####\n";

    #[test]
    fn record_start_at_offset_zero() {
        assert_eq!(find_record_start(TWO, true), Some(0));
    }

    #[test]
    fn mid_line_at_is_not_a_record_start() {
        // "@r2..." seen from inside r1's quality line only after a newline
        assert_eq!(find_record_start(&TWO[1..], false), Some(15));
        assert_eq!(find_record_start(&TWO[16..], true), Some(0));
        assert_eq!(find_record_start(&TWO[16..], false), None);
    }

    #[test]
    fn quality_line_starting_with_at_is_rejected() {
        let buf = b"@r1\nACGT\n+\n@@@@\n@r2\nAC\n+\n!!\n";
        // start at the quality line: it begins with '@' but the next line is not bases
        let q = 11;
        assert_eq!(&buf[q..q + 4], b"@@@@");
        assert_eq!(find_record_start(&buf[q..], true), Some(5));
    }

    #[test]
    fn every_offset_resolves_to_next_full_record() {
        let r2 = 16;
        for offset in 1..TWO.len() {
            let at_line_start = TWO[offset - 1] == b'\n';
            let found = find_record_start(&TWO[offset..], at_line_start).map(|s| s + offset);
            if offset <= r2 {
                assert_eq!(found, Some(r2), "offset {offset}");
            } else {
                assert_eq!(found, None, "offset {offset}");
            }
        }
    }

    #[test]
    fn crlf_base_lines_are_accepted() {
        let buf = b"xx\r\n@r\r\nACGT\r\n+\r\nIIII\r\n";
        assert_eq!(find_record_start(buf, false), Some(4));
    }

    #[test]
    fn ambiguity_codes_and_lowercase_count_as_bases() {
        let buf = b"junk\n@r\nacgRYn\n+\nIIIIII\n";
        assert_eq!(find_record_start(buf, true), Some(5));
    }

    #[test]
    fn truncated_candidate_is_none() {
        assert_eq!(find_record_start(b"tail\n@r1\nACGT\n", false), None);
        assert_eq!(find_record_start(b"", true), None);
        assert_eq!(find_record_start(b"no newline", false), None);
    }
}
