use pdlcount::{
    ErrorKind, Format, PdlError,
    config::Config,
    detect::{self, PRIORITY},
    parsers::SignatureWindows,
};

fn windows(head: &[u8]) -> SignatureWindows {
    SignatureWindows::new(head.to_vec(), Vec::new())
}

fn detected(head: &[u8]) -> Result<Format, PdlError> {
    detect::detect(&windows(head), &Config::default(), "test").map(|p| p.format())
}

#[test]
fn priority_is_fixed_and_plain_text_is_last() {
    assert_eq!(
        PRIORITY,
        [Format::PostScript, Format::PclXl, Format::Pdf, Format::Pcl, Format::PlainText]
    );
}

#[test]
fn postscript_wins_over_plain_text() {
    let head = b"%!PS-Adobe-3.0\n%%Pages: 1\n%%Page: 1 1\nshowpage\n";
    let candidates = detect::candidates(&windows(head));
    assert_eq!(candidates, vec![Format::PostScript, Format::PlainText]);
    assert_eq!(detected(head).unwrap(), Format::PostScript);
}

#[test]
fn each_sample_binds_its_own_parser() {
    assert_eq!(detected(b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n1 0 obj\n").unwrap(), Format::Pdf);
    assert_eq!(detected(b"\x1bE\x1b&l0O\x1b(s0p10h12V").unwrap(), Format::Pcl);
    assert_eq!(detected(b") HP-PCL XL;2;0;Comment\r\n\x43\x44").unwrap(), Format::PclXl);
    assert_eq!(detected(b"Dear reader,\nhello.\n").unwrap(), Format::PlainText);
    assert_eq!(detected(b"\x04%!PS\nshowpage\n").unwrap(), Format::PostScript);
}

#[test]
fn pjl_language_selects_parser() {
    let xl = b"\x1b%-12345X@PJL JOB\r\n@PJL ENTER LANGUAGE=PCLXL\r\n) HP-PCL XL;2;0\r\n\x43\x44";
    assert_eq!(detected(xl).unwrap(), Format::PclXl);

    let pcl = b"\x1b%-12345X@PJL ENTER LANGUAGE = PCL\r\n\x1bE\x1b&l1X";
    assert_eq!(detected(pcl).unwrap(), Format::Pcl);

    let ps = b"\x1b%-12345X@PJL ENTER LANGUAGE=POSTSCRIPT\r\n%!PS-Adobe-3.0\n";
    assert_eq!(detected(ps).unwrap(), Format::PostScript);
}

#[test]
fn binary_garbage_is_unrecognized() {
    let head: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
    let err = detected(&head).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnrecognizedFormat);
    assert!(detect::candidates(&windows(&head)).is_empty());
}

#[test]
fn bind_rejects_mismatched_signature() {
    let err = detect::bind::<pdlcount::parsers::PdfParser>(&windows(b"hello\n"), &Config::default())
        .err()
        .expect("pdf parser must reject plain text");
    assert_eq!(err.kind(), ErrorKind::InvalidFormat);
}

#[test]
fn structured_samples_match_exactly_one_parser_besides_plain_text() {
    let samples: [(&[u8], Format); 4] = [
        (b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n1 0 obj\n", Format::Pdf),
        (b"\x1bE\x1b&l0O\x1b(s0p10h12V", Format::Pcl),
        (b") HP-PCL XL;2;0;Comment\r\n\x43\x44", Format::PclXl),
        (b"%!PS-Adobe-3.0\n%%Pages: 1\n", Format::PostScript),
    ];
    for (head, format) in samples {
        let candidates = detect::candidates(&windows(head));
        assert_eq!(candidates, vec![format, Format::PlainText], "{format:?}");
    }
}
