use pdlcount::{
    AnalyzerOptions, ErrorKind, Format, JobSource,
    batch::{Interrupt, count_inputs, count_sources},
    config::Config,
};
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

fn write(dir: &Path, name: &str, data: &[u8]) -> String {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path.display().to_string()
}

#[test]
fn failures_are_collected_and_excluded_from_total() {
    let dir = tempfile::tempdir().unwrap();
    let text = write(dir.path(), "memo.txt", b"page one\x0cpage two\n");
    let xl = write(dir.path(), "job.pxl", b") HP-PCL XL;2;0\r\n\x43\x44\x43\x44\x43\x44");
    let broken = write(dir.path(), "broken.pxl", b") HP-PCL XL;2;0\r\n\x43\xfa\x10\x00");
    let empty = write(dir.path(), "empty.prn", b"");

    let inputs = vec![text.clone(), broken.clone(), xl.clone(), empty.clone()];
    let interrupt = Interrupt::new();
    let options = AnalyzerOptions::default();
    let outcome = count_inputs(&inputs, &options, &Config::default(), &interrupt);

    assert!(!outcome.interrupted);
    assert_eq!(outcome.total, 5);
    assert_eq!(outcome.counted.len(), 2);
    assert_eq!(outcome.counted[0].input, text);
    assert_eq!(outcome.counted[0].format, Format::PlainText);
    assert_eq!(outcome.counted[1].format, Format::PclXl);
    assert_eq!(outcome.counted[1].pages, 3);

    let kinds: Vec<_> = outcome.failures.iter().map(|f| (f.input.clone(), f.kind())).collect();
    assert_eq!(
        kinds,
        vec![(broken, ErrorKind::MalformedDocument), (empty, ErrorKind::EmptyInput)]
    );
}

#[test]
fn missing_file_is_an_io_failure() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.prn").display().to_string();
    let interrupt = Interrupt::new();
    let options = AnalyzerOptions::default();
    let outcome = count_inputs(&[missing], &options, &Config::default(), &interrupt);
    assert_eq!(outcome.total, 0);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].kind(), ErrorKind::IoFailure);
}

#[test]
fn pending_interrupt_stops_before_first_input() {
    let interrupt = Interrupt::new();
    assert!(!interrupt.request());
    let sources = vec![JobSource::reader("a", Cursor::new(b"text\n".to_vec()))];
    let options = AnalyzerOptions::default();
    let outcome = count_sources(sources, &options, &Config::default(), &interrupt);
    assert!(outcome.interrupted);
    assert_eq!(outcome.total, 0);
    assert!(outcome.counted.is_empty());
    assert!(outcome.failures.is_empty());
}

#[test]
fn repeated_request_reports_already_pending() {
    let interrupt = Interrupt::new();
    assert!(!interrupt.is_requested());
    assert!(!interrupt.request());
    assert!(interrupt.request());
    assert!(interrupt.is_requested());
}

/// Stream that raises the interrupt while it is being read, the way Ctrl-C
/// arrives while stdin is still delivering data.
struct InterruptingReader {
    inner: Cursor<Vec<u8>>,
    interrupt: Arc<Interrupt>,
}

impl Read for InterruptingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.interrupt.request();
        self.inner.read(buf)
    }
}

#[test]
fn interrupt_during_read_finishes_current_input_and_publishes_total() {
    let interrupt = Arc::new(Interrupt::new());
    let first = InterruptingReader {
        inner: Cursor::new(b"one\x0ctwo\n".to_vec()),
        interrupt: interrupt.clone(),
    };
    let sources = vec![
        JobSource::reader("stdin", first),
        JobSource::reader("b", Cursor::new(b"never\x0cread\x0c\n".to_vec())),
    ];
    let options = AnalyzerOptions::default();
    let outcome = count_sources(sources, &options, &Config::default(), &interrupt);

    assert!(outcome.interrupted);
    assert_eq!(outcome.counted.len(), 1);
    assert_eq!(outcome.total, 2);
    assert_eq!(interrupt.partial_total(), outcome.total);
}
