//! Input/output file descriptors and dispatch from file type to reader or
//! writer implementation.

use std::fmt;
use std::path::Path;

use crate::context::ReaderContext;
use crate::data::{BufferSizes, DataSupplier, SourceSpec};
use crate::error::{ReadError, Result};
use crate::fastq::FastqReader;
use crate::paired::{InterleavedFastqReader, PairedFastqReader};
use crate::queue::QueueSettings;
use crate::supplier::{PairedReadSupplierGenerator, ReadSupplierGenerator};
use crate::writer::{FastqWriterSupplier, ReadWriterSupplier};

/// Name that selects standard input or output.
pub const STDIO_NAME: &str = "-";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileType {
    Sam,
    Bam,
    Fastq,
    InterleavedFastq,
    Cram,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileType::Sam => "SAM",
            FileType::Bam => "BAM",
            FileType::Fastq => "FASTQ",
            FileType::InterleavedFastq => "interleaved FASTQ",
            FileType::Cram => "CRAM",
        };
        f.write_str(name)
    }
}

/// One input or output as named on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapFile {
    pub file_name: String,
    /// Second half of a two-file pair.
    pub second_file_name: Option<String>,
    pub file_type: FileType,
    pub is_compressed: bool,
    /// Either half reads standard input (or the output is standard output).
    pub is_stdio: bool,
}

fn is_stdio_name(name: &str) -> bool {
    name == STDIO_NAME
}

fn unknown(name: &str, reason: impl Into<String>) -> ReadError {
    ReadError::UnknownFileType { name: name.to_string(), reason: reason.into() }
}

fn compressed_fastq_output() -> ReadError {
    ReadError::UnsupportedFormat { format: "compressed FASTQ".into(), role: "output" }
}

const FASTQ_EXTENSIONS: [&str; 6] =
    [".fq", ".fastq", ".fq.gz", ".fastq.gz", ".fq.gzip", ".fastq.gzip"];

impl SnapFile {
    /// Plain single-file FASTQ.
    pub fn fastq(name: &str) -> Self {
        Self {
            file_name: name.to_string(),
            second_file_name: None,
            file_type: FileType::Fastq,
            is_compressed: false,
            is_stdio: is_stdio_name(name),
        }
    }

    /// Parse one file specifier from the front of `args`: either an explicit
    /// type flag followed by the name(s), or a bare name typed by extension.
    /// Returns the file and the number of arguments it used.
    pub fn from_args(args: &[String], paired: bool, is_input: bool) -> Result<(SnapFile, usize)> {
        let Some(first) = args.first() else {
            return Err(unknown("", "missing file name"));
        };

        if first.starts_with('-') && first.len() > 1 {
            return Self::from_explicit_type(args, paired, is_input);
        }

        let mut file = SnapFile {
            file_name: first.clone(),
            second_file_name: None,
            file_type: FileType::Fastq,
            is_compressed: false,
            is_stdio: is_stdio_name(first),
        };
        let mut consumed = 1;

        if first.ends_with(".sam") {
            file.file_type = FileType::Sam;
        } else if first.ends_with(".bam") {
            file.file_type = FileType::Bam;
            file.is_compressed = true;
        } else if first.ends_with(".cram") {
            file.file_type = FileType::Cram;
            file.is_compressed = true;
        } else if FASTQ_EXTENSIONS.iter().any(|ext| first.ends_with(ext)) {
            file.is_compressed = first.ends_with(".gz") || first.ends_with(".gzip");
            if !is_input && file.is_compressed {
                return Err(compressed_fastq_output());
            }
            if paired && is_input {
                let Some(second) = args.get(1) else {
                    return Err(unknown(first, "expected a pair of FASTQ files, but got one"));
                };
                file.is_stdio = both_halves(first, second)?;
                file.second_file_name = Some(second.clone());
                consumed = 2;
            }
        } else if file.is_stdio {
            return Err(unknown(
                first,
                "standard input/output requires an explicit type such as -fastq",
            ));
        } else if !is_input {
            return Err(unknown(
                first,
                "no default output type; use a .sam, .bam or .fq name or an explicit type",
            ));
        } else {
            return Err(unknown(
                first,
                "unrecognised extension; specify -fastq, -sam, -bam or similar",
            ));
        }
        Ok((file, consumed))
    }

    fn from_explicit_type(
        args: &[String],
        paired: bool,
        is_input: bool,
    ) -> Result<(SnapFile, usize)> {
        let flag = args[0].as_str();
        let Some(name) = args.get(1) else {
            return Err(unknown(flag, "type flag without a file name"));
        };
        let mut file = SnapFile {
            file_name: name.clone(),
            second_file_name: None,
            file_type: FileType::Fastq,
            is_compressed: false,
            is_stdio: is_stdio_name(name),
        };
        let mut consumed = 2;

        match flag {
            "-fastq" | "-compressedFastq" => {
                file.is_compressed = flag == "-compressedFastq";
                if !is_input && file.is_compressed {
                    return Err(compressed_fastq_output());
                }
                if paired && is_input {
                    let Some(second) = args.get(2) else {
                        return Err(unknown(name, "expected a pair of FASTQ files, but got one"));
                    };
                    file.is_stdio = both_halves(name, second)?;
                    file.second_file_name = Some(second.clone());
                    consumed = 3;
                }
            }
            "-sam" => file.file_type = FileType::Sam,
            "-bam" => {
                file.file_type = FileType::Bam;
                file.is_compressed = true;
            }
            "-pairedInterleavedFastq" | "-pairedCompressedInterleavedFastq" => {
                if !paired {
                    return Err(ReadError::invalid_option(
                        flag,
                        "interleaved input needs a paired run; \
                         use -fastq to treat it as single-end",
                    ));
                }
                file.file_type = FileType::InterleavedFastq;
                file.is_compressed = flag == "-pairedCompressedInterleavedFastq";
            }
            _ => return Err(unknown(flag, "not a file type flag")),
        }
        Ok((file, consumed))
    }

    /// Which kind of data reader each half needs.
    fn source_specs(&self, sizes: BufferSizes) -> [SourceSpec; 2] {
        let stdin0 = is_stdio_name(&self.file_name);
        let stdin1 = self.second_file_name.as_deref().is_some_and(is_stdio_name);
        [
            SourceSpec::new(DataSupplier::for_input(self.is_compressed, stdin0), sizes),
            SourceSpec::new(DataSupplier::for_input(self.is_compressed, stdin1), sizes)
                .with_file_id(1),
        ]
    }

    fn external(&self, role: &'static str) -> ReadError {
        ReadError::UnsupportedFormat { format: self.file_type.to_string(), role }
    }

    /// Fill `context` with the file's header.
    pub fn read_header(&self, context: &mut ReaderContext) -> Result<()> {
        match self.file_type {
            FileType::Fastq | FileType::InterleavedFastq => {
                FastqReader::read_header(Path::new(&self.file_name), context);
                Ok(())
            }
            FileType::Sam | FileType::Bam | FileType::Cram => Err(self.external("input")),
        }
    }

    pub fn create_read_supplier_generator(
        &self,
        partitions: usize,
        context: &ReaderContext,
        sizes: BufferSizes,
        queue: QueueSettings,
    ) -> Result<Box<dyn ReadSupplierGenerator>> {
        match self.file_type {
            FileType::Fastq => {
                let [spec, _] = self.source_specs(sizes);
                let path = Path::new(&self.file_name);
                FastqReader::create_read_supplier_generator(&spec, path, partitions, context, queue)
            }
            FileType::InterleavedFastq => Err(ReadError::invalid_option(
                &self.file_name,
                "interleaved input can only be read as pairs",
            )),
            FileType::Sam | FileType::Bam | FileType::Cram => Err(self.external("input")),
        }
    }

    pub fn create_paired_read_supplier_generator(
        &self,
        partitions: usize,
        context: &ReaderContext,
        sizes: BufferSizes,
        queue: QueueSettings,
    ) -> Result<Box<dyn PairedReadSupplierGenerator>> {
        match (self.file_type, self.second_file_name.as_deref()) {
            (FileType::Fastq, Some(second)) => {
                let [spec0, spec1] = self.source_specs(sizes);
                PairedFastqReader::create_paired_read_supplier_generator(
                    [&spec0, &spec1],
                    [Path::new(&self.file_name), Path::new(second)],
                    partitions,
                    context,
                    queue,
                )
            }
            (FileType::Fastq, None) => Err(ReadError::invalid_option(
                &self.file_name,
                "paired FASTQ needs two files, or an interleaved type",
            )),
            (FileType::InterleavedFastq, _) => {
                let [spec, _] = self.source_specs(sizes);
                InterleavedFastqReader::create_paired_read_supplier_generator(
                    &spec,
                    Path::new(&self.file_name),
                    partitions,
                    context,
                    queue,
                )
            }
            (FileType::Sam | FileType::Bam | FileType::Cram, _) => Err(self.external("input")),
        }
    }

    pub fn create_writer_supplier(&self) -> Result<Box<dyn ReadWriterSupplier>> {
        match self.file_type {
            FileType::Fastq if !self.is_compressed => {
                let path = Path::new(&self.file_name);
                Ok(Box::new(FastqWriterSupplier::create(path, self.is_stdio)?))
            }
            FileType::Fastq => Err(compressed_fastq_output()),
            _ => Err(self.external("output")),
        }
    }
}

/// Both halves of a pair may not be standard input.
fn both_halves(first: &str, second: &str) -> Result<bool> {
    match (is_stdio_name(first), is_stdio_name(second)) {
        (true, true) => Err(unknown(
            STDIO_NAME,
            "both halves of a FASTQ pair cannot be standard input; use an interleaved type",
        )),
        (a, b) => Ok(a || b),
    }
}

impl fmt::Display for SnapFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.second_file_name {
            Some(second) => write!(f, "{} + {} ({})", self.file_name, second, self.file_type),
            None => write!(f, "{} ({})", self.file_name, self.file_type),
        }
    }
}

#[cfg(test)]
mod format_tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn types_by_extension() {
        let cases = [
            ("reads.fq", FileType::Fastq, false),
            ("reads.fastq", FileType::Fastq, false),
            ("reads.fq.gz", FileType::Fastq, true),
            ("reads.fastq.gzip", FileType::Fastq, true),
            ("reads.sam", FileType::Sam, false),
            ("reads.bam", FileType::Bam, true),
            ("reads.cram", FileType::Cram, true),
        ];
        for (name, ty, compressed) in cases {
            let (f, n) = SnapFile::from_args(&args(&[name, "extra"]), false, true).unwrap();
            assert_eq!((f.file_type, f.is_compressed, n), (ty, compressed, 1), "{name}");
            assert!(!f.is_stdio);
        }
    }

    #[test]
    fn paired_fastq_takes_two_names() {
        let (f, n) = SnapFile::from_args(&args(&["a_1.fq", "a_2.fq", "next"]), true, true).unwrap();
        assert_eq!(n, 2);
        assert_eq!(f.second_file_name.as_deref(), Some("a_2.fq"));

        let (f, n) =
            SnapFile::from_args(&args(&["-compressedFastq", "a_1.gz", "-"]), true, true).unwrap();
        assert_eq!(n, 3);
        assert!(f.is_compressed && f.is_stdio);

        assert!(SnapFile::from_args(&args(&["a_1.fq"]), true, true).is_err());
        assert!(SnapFile::from_args(&args(&["-fastq", "-", "-"]), true, true).is_err());
    }

    #[test]
    fn explicit_types() {
        let (f, n) = SnapFile::from_args(&args(&["-fastq", "-"]), false, true).unwrap();
        assert_eq!((f.file_type, f.is_stdio, n), (FileType::Fastq, true, 2));

        let (f, _) = SnapFile::from_args(&args(&["-bam", "x"]), false, true).unwrap();
        assert!(f.is_compressed);

        let flag = "-pairedCompressedInterleavedFastq";
        let (f, n) = SnapFile::from_args(&args(&[flag, "x.gz"]), true, true).unwrap();
        assert_eq!((f.file_type, f.is_compressed, n), (FileType::InterleavedFastq, true, 2));

        let interleaved = args(&["-pairedInterleavedFastq", "x"]);
        assert!(SnapFile::from_args(&interleaved, false, true).is_err());
        assert!(SnapFile::from_args(&args(&["-t", "4"]), false, true).is_err());
        assert!(SnapFile::from_args(&args(&["-sam"]), false, true).is_err());
    }

    #[test]
    fn stdio_and_unknown_names() {
        assert!(matches!(
            SnapFile::from_args(&args(&["-"]), false, true),
            Err(ReadError::UnknownFileType { .. })
        ));
        assert!(SnapFile::from_args(&args(&["reads.txt"]), false, true).is_err());
        assert!(SnapFile::from_args(&args(&[]), false, true).is_err());
    }

    #[test]
    fn outputs() {
        let (f, _) = SnapFile::from_args(&args(&["out.sam"]), false, false).unwrap();
        assert_eq!(f.file_type, FileType::Sam);
        let (f, _) = SnapFile::from_args(&args(&["out.fq"]), false, false).unwrap();
        assert_eq!(f.file_type, FileType::Fastq);
        let (f, _) = SnapFile::from_args(&args(&["-fastq", "-"]), false, false).unwrap();
        assert!(f.is_stdio);
        assert!(SnapFile::from_args(&args(&["out"]), false, false).is_err());
        assert!(SnapFile::from_args(&args(&["out.fq.gz"]), false, false).is_err());
        assert!(matches!(f.create_writer_supplier(), Ok(_)));
        let (sam, _) = SnapFile::from_args(&args(&["out.sam"]), false, false).unwrap();
        assert!(matches!(sam.create_writer_supplier(), Err(ReadError::UnsupportedFormat { .. })));
    }

    #[test]
    fn alignment_formats_are_external() {
        let (f, _) = SnapFile::from_args(&args(&["in.bam"]), false, true).unwrap();
        let mut ctx = ReaderContext::default();
        assert!(matches!(f.read_header(&mut ctx), Err(ReadError::UnsupportedFormat { .. })));
        let sizes = BufferSizes::default();
        let err = f.create_read_supplier_generator(2, &ctx, sizes, QueueSettings::default());
        assert!(matches!(err, Err(ReadError::UnsupportedFormat { .. })));
    }
}
