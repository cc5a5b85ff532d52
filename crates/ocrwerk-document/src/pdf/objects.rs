// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Small helpers over the lopdf object model shared by the PDF modules.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};

/// Reference chains longer than this are treated as broken.
const MAX_REFERENCE_DEPTH: usize = 32;

/// Page attributes a page may inherit from its ancestors in the page tree.
pub const INHERITABLE_PAGE_KEYS: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// US Letter, used when a page has no usable media box.
const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

/// Follow references until a direct object is reached.
pub fn resolve<'a>(doc: &'a Document, mut object: &'a Object) -> Option<&'a Object> {
    for _ in 0..MAX_REFERENCE_DEPTH {
        match object {
            Object::Reference(id) => object = doc.get_object(*id).ok()?,
            direct => return Some(direct),
        }
    }
    None
}

/// Look up `key` in `dict` and resolve it.
pub fn get<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    resolve(doc, dict.get(key).ok()?)
}

pub fn get_dict<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
    match get(doc, dict, key)? {
        Object::Dictionary(d) => Some(d),
        Object::Stream(s) => Some(&s.dict),
        _ => None,
    }
}

/// Integer or real as `f64`.
pub fn number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

pub fn name<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    match get(doc, dict, key)? {
        Object::Name(n) => Some(n.as_slice()),
        _ => None,
    }
}

/// Filter names of a stream (`/Filter` may be a name or an array).
pub fn filters(doc: &Document, dict: &Dictionary) -> Vec<Vec<u8>> {
    match get(doc, dict, b"Filter") {
        Some(Object::Name(n)) => vec![n.clone()],
        Some(Object::Array(items)) => items
            .iter()
            .filter_map(|item| match resolve(doc, item) {
                Some(Object::Name(n)) => Some(n.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// A page attribute, looked up on the page and then its ancestors.
pub fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_REFERENCE_DEPTH {
        if let Ok(value) = current.get(key) {
            return Some(value);
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

/// Resolved `/Resources` of a page, following inheritance.
pub fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    match resolve(doc, inherited(doc, page_id, b"Resources")?)? {
        Object::Dictionary(d) => Some(d),
        _ => None,
    }
}

/// Page media box as `[llx, lly, urx, ury]`, normalized so that
/// `llx <= urx` and `lly <= ury`.
pub fn media_box(doc: &Document, page_id: ObjectId) -> [f64; 4] {
    let parsed = inherited(doc, page_id, b"MediaBox")
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_array().ok())
        .and_then(|items| {
            let values: Vec<f64> = items.iter().filter_map(|i| resolve(doc, i).and_then(number)).collect();
            (values.len() == 4).then(|| [values[0], values[1], values[2], values[3]])
        });
    match parsed {
        Some([x0, y0, x1, y1]) if (x1 - x0).abs() > 0.0 && (y1 - y0).abs() > 0.0 => {
            [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)]
        }
        _ => DEFAULT_MEDIA_BOX,
    }
}

/// Page `/Rotate`, normalized to 0, 90, 180 or 270.
pub fn rotation(doc: &Document, page_id: ObjectId) -> i32 {
    let raw = inherited(doc, page_id, b"Rotate")
        .and_then(|o| resolve(doc, o))
        .and_then(number)
        .unwrap_or(0.0) as i64;
    let quarter = (raw - raw.rem_euclid(90)) as i32;
    quarter.rem_euclid(360)
}

/// Size of a box as seen by a viewer after applying `rotation`.
pub fn displayed_size(media_box: [f64; 4], rotation: i32) -> (f64, f64) {
    let (w, h) = (media_box[2] - media_box[0], media_box[3] - media_box[1]);
    if rotation % 180 == 0 { (w, h) } else { (h, w) }
}

/// Decode a PDF text string: UTF-16BE with byte-order mark, UTF-8 with
/// byte-order mark, or PDFDocEncoding (treated as Latin-1).
pub fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    bytes.iter().map(|&b| b as char).collect()
}

/// Encode a text string: a literal for ASCII, UTF-16BE otherwise.
pub fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        Object::String(text.as_bytes().to_vec(), StringFormat::Literal)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}

/// Format a timestamp as a PDF date string, `D:YYYYMMDDHHmmSS+HH'mm'`.
pub fn pdf_date(at: &DateTime<FixedOffset>) -> String {
    let offset = at.offset().local_minus_utc();
    let sign = if offset < 0 { '-' } else { '+' };
    let minutes = offset.abs() / 60;
    format!("D:{}{sign}{:02}'{:02}'", at.format("%Y%m%d%H%M%S"), minutes / 60, minutes % 60)
}

/// Parse a PDF date string. Missing trailing fields default to their
/// minimum; a missing offset means UTC.
pub fn parse_pdf_date(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim().strip_prefix("D:").unwrap_or(text.trim());
    let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return None;
    }
    let field = |range: std::ops::Range<usize>, default: u32| -> u32 {
        digits.get(range).and_then(|d| d.parse().ok()).unwrap_or(default)
    };
    let year: i32 = digits[0..4].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, field(4..6, 1), field(6..8, 1))?;
    let time = date.and_hms_opt(field(8..10, 0), field(10..12, 0), field(12..14, 0))?;

    let rest = &text[digits.len()..];
    let offset_seconds = match rest.chars().next() {
        Some(sign @ ('+' | '-')) => {
            let nums: Vec<i32> = rest[1..]
                .split(|c: char| !c.is_ascii_digit())
                .filter(|p| !p.is_empty())
                .filter_map(|p| p.parse().ok())
                .collect();
            let seconds = nums.first().copied().unwrap_or(0) * 3600 + nums.get(1).copied().unwrap_or(0) * 60;
            if sign == '-' { -seconds } else { seconds }
        }
        _ => 0,
    };
    FixedOffset::east_opt(offset_seconds)?.from_local_datetime(&time).single()
}

/// Content streams of a page, in order.
pub fn content_streams(doc: &Document, page_id: ObjectId) -> Vec<&Stream> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };
    let refs: Vec<&Object> = match page.get(b"Contents") {
        Ok(Object::Array(items)) => items.iter().collect(),
        Ok(other) => match resolve(doc, other) {
            Some(Object::Array(items)) => items.iter().collect(),
            _ => vec![other],
        },
        Err(_) => Vec::new(),
    };
    refs.into_iter()
        .filter_map(|r| match resolve(doc, r)? {
            Object::Stream(s) => Some(s),
            _ => None,
        })
        .collect()
}

/// Decoded (decompressed) content of a page, streams joined by newlines.
pub fn page_content(doc: &Document, page_id: ObjectId) -> Vec<u8> {
    let mut out = Vec::new();
    for stream in content_streams(doc, page_id) {
        let data = stream.decompressed_content().unwrap_or_else(|_| stream.content.clone());
        out.extend_from_slice(&data);
        out.push(b'\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn doc_with_inherited_box() -> (Document, ObjectId) {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
                "Rotate" => 450,
            }),
        );
        (doc, page_id)
    }

    #[test]
    fn media_box_and_rotation_are_inherited() {
        let (doc, page) = doc_with_inherited_box();
        assert_eq!(media_box(&doc, page), [0.0, 0.0, 595.0, 842.0]);
        assert_eq!(rotation(&doc, page), 90);
        assert_eq!(displayed_size(media_box(&doc, page), 90), (842.0, 595.0));
    }

    #[test]
    fn negative_rotation_normalizes() {
        let (mut doc, page) = doc_with_inherited_box();
        doc.get_dictionary_mut(page).unwrap().set("Rotate", -90);
        assert_eq!(rotation(&doc, page), 270);
    }

    #[test]
    fn pdf_dates_round_trip() {
        let at = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 14, 15, 9, 26)
            .unwrap();
        let text = pdf_date(&at);
        assert_eq!(text, "D:20260314150926+02'00'");
        assert_eq!(parse_pdf_date(&text), Some(at));
        assert_eq!(
            parse_pdf_date("D:2001").map(|d| d.to_rfc3339()).as_deref(),
            Some("2001-01-01T00:00:00+00:00")
        );
        assert_eq!(parse_pdf_date("garbage"), None);
    }

    #[test]
    fn text_strings_round_trip() {
        assert_eq!(decode_text_string(b"Plain"), "Plain");
        assert_eq!(decode_text_string(&[0xFE, 0xFF, 0x00, 0x54, 0x00, 0xFC]), "T\u{fc}");
        match text_string("Gr\u{fc}\u{df}e") {
            Object::String(bytes, _) => assert_eq!(decode_text_string(&bytes), "Gr\u{fc}\u{df}e"),
            other => panic!("unexpected object {other:?}"),
        }
    }
}
