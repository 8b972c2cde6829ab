use clap::Parser;
use pdlcount::cli::{Args, Command};

#[test]
fn bare_inputs_count_without_subcommand() {
    let args = Args::try_parse_from(["pdlcount", "a.prn", "b.pdf"]).unwrap();
    assert!(args.cmd.is_none());
    assert_eq!(args.inputs, vec!["a.prn", "b.pdf"]);
}

#[test]
fn file_named_like_subcommand_goes_after_double_dash() {
    let args = Args::try_parse_from(["pdlcount", "count", "--", "detect", "job"]).unwrap();
    match args.cmd {
        Some(Command::Count { inputs }) => assert_eq!(inputs, vec!["detect", "job"]),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn colorspace_is_case_insensitive_and_resolution_defaults() {
    let args = Args::try_parse_from(["pdlcount", "--colorspace", "CMYK", "x.prn"]).unwrap();
    let options = args.analyzer.options();
    assert_eq!(options.colorspace, Some(pdlcount::analyzer::ColorSpace::Cmyk));
    assert_eq!(options.resolution, Some(72));
    assert!(Args::try_parse_from(["pdlcount", "--resolution", "0", "x.prn"]).is_err());
}
