mod utils;

use lazypdf::{LoadOptions, ObjectId, Resolver, Source};
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use utils::{PdfBuilder, deflate};

const OBJECTS: u32 = 40;

/// Counts every read that reaches the underlying bytes.
struct CountingSource {
    data: Vec<u8>,
    reads: Arc<AtomicUsize>,
}

impl Source for CountingSource {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> io::Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.data.read_at(offset, buf)
    }
}

fn document() -> Vec<u8> {
    let mut pdf = PdfBuilder::new();
    pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    pdf.object(2, "<< /Type /Pages /Kids [] /Count 0 >>");
    for number in 3..OBJECTS {
        if number % 2 == 0 {
            pdf.object(number, &format!("<< /Number {number} /Name (object {number}) >>"));
        } else {
            let text = format!("stream number {number}");
            pdf.stream(number, "/Filter /FlateDecode", &deflate(text.as_bytes()));
        }
    }
    let xref = pdf.xref_table(&format!("/Size {OBJECTS} /Root 1 0 R"));
    pdf.startxref(xref);
    pdf.build()
}

fn counted(options: LoadOptions) -> (Resolver, Arc<AtomicUsize>) {
    let reads = Arc::new(AtomicUsize::new(0));
    let source = CountingSource {
        data: document(),
        reads: reads.clone(),
    };
    (Resolver::from_source(Box::new(source), options).unwrap(), reads)
}

fn ids() -> Vec<ObjectId> {
    (1..OBJECTS).map(|number| (number, 0)).collect()
}

#[test]
fn repeated_resolution_reads_once() {
    let (resolver, reads) = counted(LoadOptions::default());
    let first = resolver.resolve((5, 0)).unwrap();
    let after_first = reads.load(Ordering::SeqCst);
    let second = resolver.resolve((5, 0)).unwrap();
    assert_eq!(first, second);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(reads.load(Ordering::SeqCst), after_first);
}

#[test]
fn evicted_objects_are_read_again_and_equal() {
    let options = LoadOptions::builder()
        .cache_capacity(NonZeroUsize::new(1).unwrap())
        .build();
    let (resolver, reads) = counted(options);
    let first = resolver.resolve((6, 0)).unwrap();
    resolver.resolve((8, 0)).unwrap();
    let before = reads.load(Ordering::SeqCst);
    let again = resolver.resolve((6, 0)).unwrap();
    assert_eq!(first, again);
    assert!(reads.load(Ordering::SeqCst) > before);
}

#[test]
fn threads_share_one_parse_per_object() {
    let _ = env_logger::builder().is_test(true).try_init();

    // Reads needed when everything is resolved once, on one thread.
    let (serial, serial_reads) = counted(LoadOptions::default());
    let opened = serial_reads.load(Ordering::SeqCst);
    let expected: Vec<_> = ids().into_iter().map(|id| serial.resolve(id).unwrap()).collect();
    let per_object = serial_reads.load(Ordering::SeqCst) - opened;

    let (shared, shared_reads) = counted(LoadOptions::default());
    let opened = shared_reads.load(Ordering::SeqCst);
    thread::scope(|scope| {
        for shift in 0..8 {
            let (shared, expected) = (&shared, &expected);
            scope.spawn(move || {
                let mut order = ids();
                order.rotate_left(shift * 5);
                for id in order {
                    let object = shared.resolve(id).unwrap();
                    assert_eq!(*object, *expected[id.0 as usize - 1]);
                    if let Ok(stream) = object.as_stream() {
                        let text = format!("stream number {}", id.0);
                        assert_eq!(stream.decoded_content().unwrap(), text.as_bytes());
                    }
                }
            });
        }
    });
    assert_eq!(shared_reads.load(Ordering::SeqCst) - opened, per_object);
}

#[test]
fn file_source_on_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&document()).unwrap();
    file.flush().unwrap();

    let resolver = Resolver::load(file.path()).unwrap();
    assert!(resolver.catalog().unwrap().as_dict().unwrap().has_type(b"Catalog"));
    let stream = resolver.resolve((7, 0)).unwrap();
    assert_eq!(stream.as_stream().unwrap().decoded_content().unwrap(), b"stream number 7");
    assert_eq!(resolver.objects().filter(Result::is_ok).count(), OBJECTS as usize - 1);
}
