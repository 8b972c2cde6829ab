//! PDF: counts leaf nodes of the page tree. Documents whose cross-reference
//! data is too broken to load fall back to a linear scan for page objects.

use super::{Format, PdlParser, SignatureWindows, contains, split_pjl};
use crate::{config::Config, error::PdlError, error::Result, stage::StagedJob};
use lopdf::{Document, Object, ObjectId};
use regex::bytes::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use tracing::{debug, warn};

/// `%PDF-` must appear this early in the (PJL-stripped) head.
const HEADER_WINDOW: usize = 1024;

static OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s-u)(\d+)\s+(\d+)\s+obj\b(.*?)endobj").expect("valid object regex")
});
static PAGE_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u)/Type\s*/Page(?:[^A-Za-z0-9_]|$)").expect("valid page regex")
});

pub struct PdfParser;

impl PdlParser for PdfParser {
    fn is_valid(windows: &SignatureWindows) -> bool {
        let pjl = split_pjl(windows.first());
        if let Some(lang) = pjl.language.as_deref() {
            if lang != "PDF" {
                return false;
            }
        }
        let end = pjl.body.len().min(HEADER_WINDOW);
        contains(&pjl.body[..end], b"%PDF-")
    }

    fn from_config(_cfg: &Config) -> Self {
        PdfParser
    }

    fn format(&self) -> Format {
        Format::Pdf
    }

    fn job_size(&self, job: &mut StagedJob) -> Result<u64> {
        let bytes = job.read_all()?;
        let load_error = match Document::load_mem(&bytes) {
            Ok(doc) => match count_page_tree(&doc) {
                Some(n) => {
                    debug!(pages = n, "page tree walk");
                    return Ok(n);
                }
                None => "page tree is unusable".to_string(),
            },
            Err(e) => e.to_string(),
        };

        warn!("{}: {load_error}; scanning for page objects", job.name());
        let pages = scan_page_objects(&bytes);
        if pages == 0 {
            return Err(PdlError::malformed(
                Format::Pdf,
                0,
                format!("{load_error} and no page objects found"),
            ));
        }
        Ok(pages)
    }
}

/// Walks `/Root /Pages` depth first, counting leaves. `/Count` is never
/// trusted. Returns `None` when the root of the tree can't be reached.
pub fn count_page_tree(doc: &Document) -> Option<u64> {
    let root_id = doc.trailer.get(b"Root").ok()?.as_reference().ok()?;
    let catalog = doc.get_dictionary(root_id).ok()?;
    let pages_id = catalog.get(b"Pages").ok()?.as_reference().ok()?;
    doc.get_dictionary(pages_id).ok()?;

    let mut visited: HashSet<ObjectId> = HashSet::new();
    let mut stack = vec![pages_id];
    let mut count = 0u64;

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            warn!("page tree cycle at object {} {}", id.0, id.1);
            continue;
        }
        let Ok(node) = doc.get_dictionary(id) else {
            debug!("page tree node {} {} is not a dictionary", id.0, id.1);
            continue;
        };
        let node_type = node.get(b"Type").and_then(Object::as_name).ok();
        if node_type == Some(b"Page".as_slice()) {
            count += 1;
            continue;
        }
        match node.get(b"Kids").ok().and_then(|kids| resolve_array(doc, kids)) {
            Some(kids) => {
                for kid in kids.iter().rev() {
                    if let Ok(kid_id) = kid.as_reference() {
                        stack.push(kid_id);
                    }
                }
            }
            None if node_type.is_none() => count += 1,
            None => {}
        }
    }
    Some(count)
}

fn resolve_array<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Vec<Object>> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok()?.as_array().ok(),
        other => other.as_array().ok(),
    }
}

/// Counts objects whose latest definition is a `/Type /Page` dictionary.
/// Later definitions of the same object number (incremental updates)
/// replace earlier ones.
pub fn scan_page_objects(bytes: &[u8]) -> u64 {
    let mut latest: HashMap<u64, bool> = HashMap::new();
    for cap in OBJECT_RE.captures_iter(bytes) {
        let Some(num) = std::str::from_utf8(&cap[1])
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        else {
            continue;
        };
        latest.insert(num, PAGE_TYPE_RE.is_match(&cap[3]));
    }
    latest.values().filter(|&&is_page| is_page).count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    #[test]
    fn page_tree_cycles_are_visited_once() {
        let mut doc = Document::with_version("1.5");
        let root_pages = doc.new_object_id();
        let middle = doc.new_object_id();
        let first = doc.add_object(dictionary! { "Type" => "Page", "Parent" => root_pages });
        let second = doc.add_object(dictionary! { "Type" => "Page", "Parent" => middle });
        doc.objects.insert(
            middle,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Parent" => root_pages,
                "Kids" => vec![
                    Object::Reference(root_pages),
                    Object::Reference(second),
                    Object::Reference(middle),
                ],
                "Count" => 99i64,
            }),
        );
        doc.objects.insert(
            root_pages,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(first), Object::Reference(middle)],
                "Count" => 99i64,
            }),
        );
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => root_pages });
        doc.trailer.set("Root", catalog);

        assert_eq!(count_page_tree(&doc), Some(2));
    }

    #[test]
    fn scan_ignores_pages_nodes_and_replaced_objects() {
        let pdf = b"%PDF-1.4\n\
            1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n\
            2 0 obj << /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 >> endobj\n\
            3 0 obj << /Type /Page /Parent 2 0 R >> endobj\n\
            4 0 obj << /Type/Page/Parent 2 0 R >> endobj\n\
            4 0 obj << /Type /XObject >> endobj\n";
        assert_eq!(scan_page_objects(pdf), 1);
    }
}
