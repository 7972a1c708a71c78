//! Partitioned reading must see exactly what one sequential reader sees.

use std::io::Write;
use std::path::Path;

use readsplit::context::ReaderContext;
use readsplit::data::{BufferSizes, DataSupplier, SourceSpec};
use readsplit::fastq::FastqReader;
use readsplit::paired::{InterleavedFastqReader, PairedFastqReader};
use readsplit::queue::QueueSettings;
use readsplit::supplier::{PairedReadReader, ReadReader};
use readsplit::{ClippingType, PairedReadSupplierGenerator, Read, ReadSupplierGenerator};

type Record = (String, String, String);

fn small_sizes() -> BufferSizes {
    BufferSizes { batch_size: 256, max_record_bytes: 1024 }
}

fn no_clip() -> ReaderContext {
    ReaderContext::new(ClippingType::NoClipping, None)
}

/// Deterministic reads of varying length; some lowercase, some `#` tails.
fn synthetic_body(records: usize, name: impl Fn(usize) -> String) -> Vec<u8> {
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };
    let mut body = Vec::new();
    for i in 0..records {
        let len = 1 + (next() % 150) as usize;
        let mut seq: String = (0..len).map(|_| b"ACGTN"[(next() % 5) as usize] as char).collect();
        if i % 7 == 3 {
            seq = seq.to_lowercase();
        }
        let qual: String = (0..len)
            .map(|j| {
                if j + 3 >= len && i % 2 == 0 {
                    '#'
                } else {
                    (b'!' + (next() % 60) as u8) as char
                }
            })
            .collect();
        body.extend_from_slice(format!("@{}\n{seq}\n+\n{qual}\n", name(i)).as_bytes());
    }
    body
}

fn temp_file(body: &[u8]) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(body).unwrap();
    f.flush().unwrap();
    f
}

fn record(read: &Read) -> Record {
    let s = |b: &[u8]| String::from_utf8_lossy(b).into_owned();
    (s(read.id()), s(read.data()), s(read.quality()))
}

fn sequential(path: &Path, spec: &SourceSpec) -> Vec<Record> {
    let mut reader = FastqReader::create(spec, path, 0, u64::MAX, no_clip()).unwrap();
    let mut read = Read::new();
    let mut out = Vec::new();
    while reader.next_read(&mut read).unwrap() {
        out.push(record(&read));
        reader.release_batch(read.batch()).unwrap();
    }
    out
}

fn drain(generator: &dyn ReadSupplierGenerator) -> Vec<Record> {
    let mut supplier = generator.generate().unwrap();
    let mut out = Vec::new();
    while let Some(read) = supplier.next_read().unwrap() {
        out.push(record(read));
        let batch = read.batch();
        supplier.release_batch(batch).unwrap();
    }
    out
}

fn drain_pairs(generator: &dyn PairedReadSupplierGenerator) -> Vec<(Record, Record)> {
    let mut supplier = generator.generate().unwrap();
    let mut out = Vec::new();
    while let Some((read0, read1)) = supplier.next_read_pair().unwrap() {
        out.push((record(read0), record(read1)));
        let batches = [read0.batch(), read1.batch()];
        for batch in batches {
            supplier.release_batch(batch).unwrap();
        }
    }
    out
}

#[test]
fn range_split_union_equals_sequential_for_any_partition_count() {
    let body = synthetic_body(400, |i| format!("read{i}"));
    let f = temp_file(&body);
    let spec = SourceSpec::new(DataSupplier::Mapped, small_sizes());
    let expected = sequential(f.path(), &spec);
    assert_eq!(expected.len(), 400);

    for n in [1, 2, 3, 5, 8, 17, 64, 333] {
        let generator = FastqReader::create_read_supplier_generator(
            &spec,
            f.path(),
            n,
            &no_clip(),
            QueueSettings::default(),
        )
        .unwrap();
        let mut union = Vec::new();
        for _ in 0..n {
            union.extend(drain(generator.as_ref()));
        }
        // later calls get empty suppliers
        assert!(drain(generator.as_ref()).is_empty());
        assert_eq!(union, expected, "partition count {n}");
    }
}

#[test]
fn sequential_reader_agrees_with_needletail() {
    let body = synthetic_body(120, |i| format!("read{i} extra=1"));
    let f = temp_file(&body);
    let ours = sequential(f.path(), &SourceSpec::new(DataSupplier::Mapped, small_sizes()));

    let mut oracle = needletail::parse_fastx_file(f.path()).unwrap();
    let mut n = 0;
    while let Some(rec) = oracle.next() {
        let rec = rec.unwrap();
        let (id, data, quality) = &ours[n];
        assert_eq!(id.as_bytes(), rec.id());
        assert_eq!(data.as_bytes(), rec.seq().to_ascii_uppercase().as_slice());
        assert_eq!(Some(quality.as_bytes()), rec.qual());
        n += 1;
    }
    assert_eq!(n, ours.len());
}

#[test]
fn queue_consumers_see_every_read_once() {
    let body = synthetic_body(1000, |i| format!("read{i}"));
    let f = temp_file(&body);
    let mapped = SourceSpec::new(DataSupplier::Mapped, small_sizes());
    let mut expected = sequential(f.path(), &mapped);

    let stream = SourceSpec::new(DataSupplier::Stream { gzip: false, stdin: false }, small_sizes());
    let generator = FastqReader::create_read_supplier_generator(
        &stream,
        f.path(),
        3,
        &no_clip(),
        QueueSettings { depth: 2, reads_per_batch: 16 },
    )
    .unwrap();

    let mut seen: Vec<Record> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..3).map(|_| s.spawn(|| drain(generator.as_ref()))).collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    });
    drop(generator);

    seen.sort();
    expected.sort();
    assert_eq!(seen, expected);
}

#[test]
fn gzip_input_matches_plain() {
    let body = synthetic_body(300, |i| format!("read{i}"));
    let plain = temp_file(&body);
    let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    gz.write_all(&body).unwrap();
    let compressed = temp_file(&gz.finish().unwrap());

    let expected = sequential(plain.path(), &SourceSpec::new(DataSupplier::Mapped, small_sizes()));
    let gzip = DataSupplier::Stream { gzip: true, stdin: false };
    let got = sequential(compressed.path(), &SourceSpec::new(gzip, small_sizes()));
    assert_eq!(got, expected);
}

#[test]
fn two_record_buffer_splits_at_and_inside_the_boundary() {
    let body = b"@r1\nACGT\n+\n!!!!\n@r2\nNNNN\n+\n####\n";
    let f = temp_file(body);
    let spec = SourceSpec::new(DataSupplier::Mapped, small_sizes());

    let all = sequential(f.path(), &spec);
    assert_eq!(
        all,
        vec![
            ("r1".to_string(), "ACGT".to_string(), "!!!!".to_string()),
            ("r2".to_string(), "NNNN".to_string(), "####".to_string()),
        ]
    );

    let range = |start: u64, len: u64| {
        let mut reader = FastqReader::create(&spec, f.path(), start, len, no_clip()).unwrap();
        let mut read = Read::new();
        let mut ids = Vec::new();
        while reader.next_read(&mut read).unwrap() {
            ids.push(String::from_utf8_lossy(read.id()).into_owned());
            reader.release_batch(read.batch()).unwrap();
        }
        ids
    };
    let total = body.len() as u64;
    // exact inter-record boundary
    assert_eq!(range(0, 16), vec!["r1"]);
    assert_eq!(range(16, total - 16), vec!["r2"]);
    // strictly inside r1's quality line
    assert_eq!(range(0, 12), vec!["r1"]);
    assert_eq!(range(12, total - 12), vec!["r2"]);

    // back clipping removes r2 entirely
    let clip_back = ReaderContext::new(ClippingType::ClipBack, None);
    let mut reader = FastqReader::create(&spec, f.path(), 0, u64::MAX, clip_back).unwrap();
    let mut read = Read::new();
    assert!(reader.next_read(&mut read).unwrap());
    assert_eq!(read.data_len(), 4);
    reader.release_batch(read.batch()).unwrap();
    assert!(reader.next_read(&mut read).unwrap());
    assert_eq!(read.data_len(), 0);
    assert_eq!(read.unclipped_len(), 4);
    reader.release_batch(read.batch()).unwrap();
}

#[test]
fn interleaved_range_split_yields_every_pair_once() {
    let body = synthetic_body(400, |i| format!("frag{}/{}", i / 2, i % 2 + 1));
    let f = temp_file(&body);
    let spec = SourceSpec::new(DataSupplier::Mapped, small_sizes());

    let mut reader =
        InterleavedFastqReader::create(&spec, f.path(), 0, u64::MAX, no_clip()).unwrap();
    let (mut read0, mut read1) = (Read::new(), Read::new());
    let mut expected = Vec::new();
    while reader.next_read_pair(&mut read0, &mut read1).unwrap() {
        expected.push((record(&read0), record(&read1)));
        reader.release_batch(read0.batch()).unwrap();
        reader.release_batch(read1.batch()).unwrap();
    }
    assert_eq!(expected.len(), 200);

    for n in [1, 2, 4, 7, 16, 50] {
        let generator = InterleavedFastqReader::create_paired_read_supplier_generator(
            &spec,
            f.path(),
            n,
            &no_clip(),
            QueueSettings::default(),
        )
        .unwrap();
        let mut union = Vec::new();
        for _ in 0..n {
            union.extend(drain_pairs(generator.as_ref()));
        }
        assert_eq!(union, expected, "partition count {n}");
    }
}

#[test]
fn two_file_pairs_split_in_lockstep() {
    let first = synthetic_body(250, |i| format!("frag{i}/1"));
    let second = first
        .split(|&b| b == b'\n')
        .enumerate()
        .map(|(i, line)| {
            if i % 4 == 0 && line.ends_with(b"/1") {
                [&line[..line.len() - 1], &b"2"[..]].concat()
            } else {
                line.to_vec()
            }
        })
        .collect::<Vec<_>>()
        .join(&b'\n');
    assert_eq!(first.len(), second.len());
    let (f0, f1) = (temp_file(&first), temp_file(&second));
    let spec = SourceSpec::new(DataSupplier::Mapped, small_sizes());

    let mut reader =
        PairedFastqReader::create(&spec, [f0.path(), f1.path()], 0, u64::MAX, &no_clip()).unwrap();
    let (mut read0, mut read1) = (Read::new(), Read::new());
    let mut expected = Vec::new();
    while reader.next_read_pair(&mut read0, &mut read1).unwrap() {
        expected.push((record(&read0), record(&read1)));
        reader.release_batch(read0.batch()).unwrap();
        reader.release_batch(read1.batch()).unwrap();
    }
    assert_eq!(expected.len(), 250);

    for n in [1, 3, 9, 40] {
        let generator = PairedFastqReader::create_paired_read_supplier_generator(
            [&spec, &spec],
            [f0.path(), f1.path()],
            n,
            &no_clip(),
            QueueSettings::default(),
        )
        .unwrap();
        let mut union = Vec::new();
        for _ in 0..n {
            union.extend(drain_pairs(generator.as_ref()));
        }
        assert_eq!(union, expected, "partition count {n}");
    }
}
