// src/services/detail_parser.rs

//! Field extraction from detail XML documents.

use std::collections::BTreeMap;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::{AppError, Result};
use crate::models::FieldRule;

/// TypeID encoded in a document file name (`{TypeID}_{date}.xml`).
pub fn type_id_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let (type_id, _date) = stem.rsplit_once('_')?;
    let type_id = type_id.trim();
    (!type_id.is_empty()).then(|| type_id.to_string())
}

struct Capture {
    rule: usize,
    depth: usize,
    text: String,
}

/// Extract every configured field from `xml`.
///
/// Each field takes the text of the first element whose local name equals
/// the rule's element, with whitespace collapsed. Fields without a matching
/// element are left out of the map. `context` only labels errors.
pub fn extract_fields(
    xml: &str,
    rules: &[FieldRule],
    context: &str,
) -> Result<BTreeMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut found: Vec<Option<String>> = vec![None; rules.len()];
    let mut active: Vec<Capture> = Vec::new();
    let mut depth = 0usize;
    let mut saw_element = false;

    loop {
        let event = reader.read_event().map_err(|e| {
            AppError::document(
                context,
                format!("malformed XML at byte {}: {e}", reader.buffer_position()),
            )
        })?;

        match event {
            Event::Start(e) => {
                depth += 1;
                saw_element = true;
                let name = e.local_name();
                for (idx, rule) in rules.iter().enumerate() {
                    if found[idx].is_none()
                        && !active.iter().any(|c| c.rule == idx)
                        && rule.element.as_bytes() == name.as_ref()
                    {
                        active.push(Capture {
                            rule: idx,
                            depth,
                            text: String::new(),
                        });
                    }
                }
            }
            Event::Empty(e) => {
                saw_element = true;
                let name = e.local_name();
                for (idx, rule) in rules.iter().enumerate() {
                    if found[idx].is_none()
                        && !active.iter().any(|c| c.rule == idx)
                        && rule.element.as_bytes() == name.as_ref()
                    {
                        found[idx] = Some(String::new());
                    }
                }
            }
            Event::Text(t) => {
                if !active.is_empty() {
                    let text = t
                        .unescape()
                        .map_err(|e| AppError::document(context, format!("bad text: {e}")))?;
                    for capture in &mut active {
                        push_text(&mut capture.text, &text);
                    }
                }
            }
            Event::CData(c) => {
                if !active.is_empty() {
                    let raw = c.into_inner();
                    let text = String::from_utf8_lossy(&raw);
                    for capture in &mut active {
                        push_text(&mut capture.text, &text);
                    }
                }
            }
            Event::End(_) => {
                let (done, open): (Vec<Capture>, Vec<Capture>) =
                    active.drain(..).partition(|c| c.depth == depth);
                active = open;
                for capture in done {
                    found[capture.rule] = Some(collapse(&capture.text));
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_element {
        return Err(AppError::document(context, "no XML element found"));
    }

    Ok(rules
        .iter()
        .zip(found)
        .filter_map(|(rule, value)| value.map(|v| (rule.name.clone(), v)))
        .collect())
}

fn push_text(buf: &mut String, text: &str) {
    if !buf.is_empty() {
        buf.push(' ');
    }
    buf.push_str(text);
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
