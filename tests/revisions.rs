mod utils;

use lazypdf::{Error, ErrorKind, Mode, Resolver, XrefEntry, XrefError};
use utils::{PdfBuilder, Row};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn base(pdf: &mut PdfBuilder) {
    pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    pdf.object(2, "<< /Type /Pages /Kids [] /Count 0 >>");
}

#[test]
fn newest_revision_wins() {
    init_logger();
    let mut pdf = PdfBuilder::new();
    base(&mut pdf);
    pdf.object(5, "(first)");
    pdf.object(6, "(untouched)");
    let first = pdf.xref_table("/Size 7 /Root 1 0 R /Info 6 0 R");
    pdf.startxref(first);

    pdf.object(5, "(second)");
    let second = pdf.xref_table(&format!("/Size 7 /Root 1 0 R /Prev {first}"));
    pdf.startxref(second);

    pdf.object(5, "(third)");
    let third = pdf.xref_table(&format!("/Size 7 /Root 1 0 R /Prev {second}"));
    pdf.startxref(third);

    let resolver = Resolver::load_mem(pdf.build()).unwrap();
    assert_eq!(resolver.mode(), Mode::Indexed);
    assert_eq!(resolver.resolve((5, 0)).unwrap().as_str().unwrap(), b"third");
    assert_eq!(resolver.resolve((6, 0)).unwrap().as_str().unwrap(), b"untouched");
    assert!(resolver.trailer().has(b"Info"));
    assert!(resolver.diagnostics().is_empty());
}

#[test]
fn middle_revision_survives_a_later_update() {
    init_logger();
    let mut pdf = PdfBuilder::new();
    base(&mut pdf);
    pdf.object(5, "(rev1)");
    let first = pdf.xref_table("/Size 6 /Root 1 0 R");
    pdf.startxref(first);

    pdf.object(7, "(rev2)");
    let second = pdf.xref_table(&format!("/Size 8 /Root 1 0 R /Prev {first}"));
    pdf.startxref(second);

    pdf.object(5, "(rev3)");
    let third = pdf.xref_table(&format!("/Size 8 /Root 1 0 R /Prev {second}"));
    pdf.startxref(third);

    let resolver = Resolver::load_mem(pdf.build()).unwrap();
    assert_eq!(resolver.mode(), Mode::Indexed);
    assert_eq!(resolver.resolve((7, 0)).unwrap().as_str().unwrap(), b"rev2");
    assert_eq!(resolver.resolve((5, 0)).unwrap().as_str().unwrap(), b"rev3");
    assert_eq!(resolver.xref().get(7), Some(&XrefEntry::InUse { offset: pdf.offset(7), generation: 0 }));
    assert!(resolver.diagnostics().is_empty());
}

#[test]
fn object_freed_by_a_later_revision() {
    init_logger();
    let mut pdf = PdfBuilder::new();
    base(&mut pdf);
    pdf.object(5, "(doomed)");
    let first = pdf.xref_table("/Size 6 /Root 1 0 R");
    pdf.startxref(first);

    let second = pdf.len();
    pdf.raw(format!("xref\n5 1\n0000000000 00001 f\r\ntrailer\n<< /Size 6 /Root 1 0 R /Prev {first} >>\n").as_bytes());
    pdf.startxref(second);

    let resolver = Resolver::load_mem(pdf.build()).unwrap();
    assert_eq!(resolver.xref().get(5), Some(&XrefEntry::Free { next: 0, generation: 1 }));
    let err = resolver.resolve((5, 0)).unwrap_err();
    assert!(matches!(err, Error::FreeObject((5, 0))));
    assert_eq!(err.kind(), ErrorKind::Generic);
    // Free entries are not part of the object walk.
    assert_eq!(resolver.objects().count(), 2);
}

#[test]
fn hybrid_file_reads_the_cross_reference_stream() {
    init_logger();
    let mut pdf = PdfBuilder::new();
    let stream = pdf.xref_stream(9, &[(8, Row::Compressed { container: 7, index: 0 })], "");
    base(&mut pdf);
    pdf.object_stream(7, &[(8, "(only in the stream)")]);
    let table = pdf.xref_table(&format!("/Size 10 /Root 1 0 R /XRefStm {stream}"));
    pdf.startxref(table);

    let resolver = Resolver::load_mem(pdf.build()).unwrap();
    assert_eq!(resolver.resolve((8, 0)).unwrap().as_str().unwrap(), b"only in the stream");
    assert!(!resolver.trailer().has(b"XRefStm"));
}

#[test]
fn prev_cycle_is_fatal() {
    init_logger();
    let mut pdf = PdfBuilder::new();
    base(&mut pdf);
    let first = pdf.len();
    let second_guess = {
        // The second table points back at the first, which points at the second.
        let mut sizing = PdfBuilder::new();
        base(&mut sizing);
        sizing.xref_table("/Size 3 /Root 1 0 R /Prev 0000000000");
        sizing.len()
    };
    pdf.xref_table(&format!("/Size 3 /Root 1 0 R /Prev {second_guess:010}"));
    assert_eq!(pdf.len(), second_guess);
    let second = pdf.xref_table(&format!("/Size 3 /Root 1 0 R /Prev {first:010}"));
    pdf.startxref(second);

    let err = Resolver::load_mem(pdf.build()).err().unwrap();
    assert!(matches!(err, Error::Xref(XrefError::Cycle(offset)) if offset == second));
    assert_eq!(err.kind(), ErrorKind::Syntax);
}

#[test]
fn undersized_trailer_is_tolerated() {
    init_logger();
    let mut pdf = PdfBuilder::new();
    base(&mut pdf);
    pdf.object(9, "(beyond /Size)");
    let table = pdf.xref_table("/Size 3 /Root 1 0 R");
    pdf.startxref(table);

    let resolver = Resolver::load_mem(pdf.build()).unwrap();
    assert_eq!(resolver.resolve((9, 0)).unwrap().as_str().unwrap(), b"beyond /Size");
}
