//! Format detection: candidates are tried in a fixed priority order and the
//! first one whose signature check passes is bound.

use crate::{
    config::Config,
    error::{PdlError, Result},
    parsers::{
        Format, PclParser, PclXlParser, PdfParser, PdlParser, PlainTextParser, PostScriptParser,
        SignatureWindows,
    },
};
use tracing::debug;

/// Detection order. Formats that are easy to confuse come before looser
/// ones; plain text accepts almost anything and must stay last.
pub const PRIORITY: [Format; 5] = [
    Format::PostScript,
    Format::PclXl,
    Format::Pdf,
    Format::Pcl,
    Format::PlainText,
];

type Constructor = fn(&SignatureWindows, &Config) -> Result<Box<dyn PdlParser>>;

/// Builds `P` if its signature predicate accepts `windows`.
pub fn bind<P: PdlParser + 'static>(
    windows: &SignatureWindows,
    cfg: &Config,
) -> Result<Box<dyn PdlParser>> {
    let parser = P::from_config(cfg);
    if !P::is_valid(windows) {
        return Err(PdlError::InvalidFormat {
            format: parser.format(),
        });
    }
    Ok(Box::new(parser))
}

fn constructor(format: Format) -> Constructor {
    match format {
        Format::PostScript => bind::<PostScriptParser>,
        Format::PclXl => bind::<PclXlParser>,
        Format::Pdf => bind::<PdfParser>,
        Format::Pcl => bind::<PclParser>,
        Format::PlainText => bind::<PlainTextParser>,
    }
}

/// Builds the parser for `format` without checking any signature.
pub fn parser_for(format: Format, cfg: &Config) -> Box<dyn PdlParser> {
    match format {
        Format::PostScript => Box::new(PostScriptParser::from_config(cfg)),
        Format::PclXl => Box::new(PclXlParser::from_config(cfg)),
        Format::Pdf => Box::new(PdfParser::from_config(cfg)),
        Format::Pcl => Box::new(PclParser::from_config(cfg)),
        Format::PlainText => Box::new(PlainTextParser::from_config(cfg)),
    }
}

/// Whether `format`'s signature predicate accepts `windows`.
pub fn accepts(format: Format, windows: &SignatureWindows) -> bool {
    match format {
        Format::PostScript => PostScriptParser::is_valid(windows),
        Format::PclXl => PclXlParser::is_valid(windows),
        Format::Pdf => PdfParser::is_valid(windows),
        Format::Pcl => PclParser::is_valid(windows),
        Format::PlainText => PlainTextParser::is_valid(windows),
    }
}

/// Every format accepting `windows`, in priority order.
pub fn candidates(windows: &SignatureWindows) -> Vec<Format> {
    PRIORITY
        .iter()
        .copied()
        .filter(|&f| accepts(f, windows))
        .collect()
}

/// Binds the first parser, in [`PRIORITY`] order, that accepts `windows`.
pub fn detect(windows: &SignatureWindows, cfg: &Config, input: &str) -> Result<Box<dyn PdlParser>> {
    for format in PRIORITY {
        match constructor(format)(windows, cfg) {
            Ok(parser) => {
                debug!(%input, %format, "input file is in the {format} format");
                return Ok(parser);
            }
            Err(PdlError::InvalidFormat { .. }) => {
                debug!(%input, %format, "rejected");
            }
            Err(e) => return Err(e),
        }
    }
    Err(PdlError::UnrecognizedFormat {
        input: input.to_string(),
    })
}
