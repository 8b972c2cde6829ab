use pdlcount::{Analyzer, AnalyzerOptions, Format, JobSource, analyzer::ColorSpace, config::Config};
use std::io::Cursor;

fn analyzer(data: &[u8], options: AnalyzerOptions) -> Analyzer {
    let source = JobSource::seekable("job", Cursor::new(data.to_vec()));
    Analyzer::new(source, options, &Config::default())
}

#[test]
fn detection_happens_once_per_job() {
    let mut a = analyzer(b"%!PS\n%%Page: 1 1\nshowpage\n", AnalyzerOptions::default());
    assert_eq!(a.format().unwrap(), Format::PostScript);
    let windows = a.signature_windows().unwrap();
    assert!(windows.first().starts_with(b"%!PS"));
    assert!(windows.last().is_empty());
    assert_eq!(a.format().unwrap(), Format::PostScript);
    assert_eq!(a.job_size().unwrap(), 1);
}

#[test]
#[allow(deprecated)]
fn deprecated_detect_forwards() {
    let mut a = analyzer(b"\x1bE\x1b&l0OText\x0c", AnalyzerOptions::default());
    assert_eq!(a.detect_pdl_handler().unwrap().format(), Format::Pcl);
    assert_eq!(a.pdl_handler().unwrap().format(), Format::Pcl);
}

#[test]
fn hints_do_not_change_counts() {
    let data = b"one\x0ctwo\n";
    let plain = analyzer(data, AnalyzerOptions::default()).job_size().unwrap();
    let hinted = analyzer(
        data,
        AnalyzerOptions {
            debug: true,
            colorspace: Some(ColorSpace::Cmyk),
            resolution: Some(600),
        },
    )
    .job_size()
    .unwrap();
    assert_eq!(plain, 2);
    assert_eq!(plain, hinted);
}
