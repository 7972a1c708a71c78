//! Byte tables for the FASTQ base and quality alphabets.
//!
//! Bases are IUPAC nucleotide codes plus `U` and `X`, either case. Qualities are
//! printable ASCII in Phred+33; `#` (Phred 2) marks bases to be clipped.

/// Quality character used as the low-quality trim sentinel (Phred+33 for 2).
pub const TRIM_QUALITY: u8 = b'#';

/// Symbols accepted on the sequence line (upper case; lower case also accepted).
pub const BASE_SYMBOLS: &[u8] = b"ACGTNURYKMSWBDHVX";

const fn build_base_table() -> [bool; 256] {
    let mut t = [false; 256];
    let mut i = 0;
    while i < BASE_SYMBOLS.len() {
        let c = BASE_SYMBOLS[i];
        t[c as usize] = true;
        t[c.to_ascii_lowercase() as usize] = true;
        i += 1;
    }
    t
}

static IS_BASE: [bool; 256] = build_base_table();

/// `true` if `c` may appear on a FASTQ sequence line.
#[inline]
pub fn is_base(c: u8) -> bool {
    IS_BASE[c as usize]
}

/// `true` if every byte of `line` is a supported base symbol.
#[inline]
pub fn is_base_line(line: &[u8]) -> bool {
    line.iter().all(|&c| is_base(c))
}

/// `true` for printable, non-space ASCII (`!`..=`~`).
#[inline]
pub fn is_quality(c: u8) -> bool {
    (b'!'..=b'~').contains(&c)
}

#[inline]
pub fn has_lowercase(bases: &[u8]) -> bool {
    bases.iter().any(u8::is_ascii_lowercase)
}

/// Complement of an upper-cased base; ambiguity codes map to their IUPAC
/// complement and anything unknown to `N`.
#[inline]
pub fn complement(c: u8) -> u8 {
    match c {
        b'X' => b'N',
        b'U' => b'A',
        c if is_base(c) => bio::alphabets::dna::complement(c),
        _ => b'N',
    }
}

#[inline]
pub fn is_n(c: u8) -> bool {
    c == b'N' || c == b'n'
}

#[cfg(test)]
mod alphabet_tests {
    use super::*;

    #[test]
    fn bases_case_insensitive() {
        assert!(is_base_line(b"ACGTNacgtn"));
        assert!(is_base_line(b"RYKMSWBDHV"));
        assert!(!is_base_line(b"ACGT!"));
        assert!(!is_base_line(b"@r1"));
        assert!(is_base_line(b""));
    }

    #[test]
    fn complement_of_canonical_bases() {
        assert_eq!(complement(b'A'), b'T');
        assert_eq!(complement(b'C'), b'G');
        assert_eq!(complement(b'G'), b'C');
        assert_eq!(complement(b'T'), b'A');
        assert_eq!(complement(b'N'), b'N');
        assert_eq!(complement(b'U'), b'A');
        assert_eq!(complement(b'.'), b'N');
    }

    #[test]
    fn quality_is_printable_ascii() {
        assert!(is_quality(b'!'));
        assert!(is_quality(b'~'));
        assert!(!is_quality(b' '));
        assert!(!is_quality(b'\n'));
    }
}
