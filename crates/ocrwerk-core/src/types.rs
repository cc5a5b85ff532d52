// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Ocrwerk pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OcrwerkError;

/// Unique identifier for one OCR job (used in temp dir names and log spans).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Colour depth detected for a source page (drives rasterizer output mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// 1-bit black and white.
    Bilevel,
    /// 8-bit grayscale.
    Gray,
    /// RGB colour.
    Color,
}

impl ColorMode {
    /// Combine two detections, keeping the richer colour mode.
    pub fn widen(self, other: ColorMode) -> ColorMode {
        self.max(other)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Bilevel => 0,
            Self::Gray => 1,
            Self::Color => 2,
        }
    }
}

impl PartialOrd for ColorMode {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ColorMode {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// What to do with pages that already contain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextPolicy {
    /// Behaves like `SkipText`: text-bearing pages are passed through.
    #[default]
    Default,
    /// Pass text-bearing pages through untouched, OCR the rest.
    SkipText,
    /// Rasterize every page, discarding any existing text.
    ForceOcr,
    /// Replace a previous OCR text layer, keeping the page image untouched.
    RedoOcr,
}

impl fmt::Display for TextPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Default => "default",
            Self::SkipText => "skip-text",
            Self::ForceOcr => "force-ocr",
            Self::RedoOcr => "redo-ocr",
        };
        f.write_str(s)
    }
}

/// PDF/A part number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PdfaPart {
    One,
    Two,
    Three,
}

impl PdfaPart {
    /// Numeric part as written into `pdfaid:part`.
    pub fn number(&self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }

    /// Conformance level. Only level B is produced.
    pub fn conformance(&self) -> &'static str {
        "B"
    }

    /// PDF header version mandated by the part.
    pub fn pdf_version(&self) -> &'static str {
        match self {
            Self::One => "1.4",
            Self::Two | Self::Three => "1.7",
        }
    }
}

impl fmt::Display for PdfaPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PDF/A-{}{}", self.number(), self.conformance().to_ascii_lowercase())
    }
}

/// Requested output document type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputType {
    /// Plain PDF, no archival conversion.
    Pdf,
    /// PDF/A-2b.
    #[default]
    Pdfa,
    #[serde(rename = "pdfa-1")]
    Pdfa1,
    #[serde(rename = "pdfa-2")]
    Pdfa2,
    #[serde(rename = "pdfa-3")]
    Pdfa3,
    /// Run OCR (e.g. for a sidecar) but write no PDF.
    None,
}

impl OutputType {
    /// PDF/A part to produce, if any.
    pub fn pdfa_part(&self) -> Option<PdfaPart> {
        match self {
            Self::Pdfa | Self::Pdfa2 => Some(PdfaPart::Two),
            Self::Pdfa1 => Some(PdfaPart::One),
            Self::Pdfa3 => Some(PdfaPart::Three),
            Self::Pdf | Self::None => None,
        }
    }

    /// Whether a PDF file is written at all.
    pub fn writes_pdf(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl FromStr for OutputType {
    type Err = OcrwerkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "pdfa" => Ok(Self::Pdfa),
            "pdfa-1" => Ok(Self::Pdfa1),
            "pdfa-2" => Ok(Self::Pdfa2),
            "pdfa-3" => Ok(Self::Pdfa3),
            "none" => Ok(Self::None),
            other => Err(OcrwerkError::BadArgs(format!("unknown output type '{other}'"))),
        }
    }
}

/// Post-assembly optimization level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OptimizeLevel {
    /// Leave images as they are.
    None,
    /// Lossless recompression only.
    #[default]
    Lossless,
    /// Lossy recompression (JPEG quality 75).
    Lossy,
    /// Aggressive lossy recompression (JPEG quality 50).
    Aggressive,
}

impl OptimizeLevel {
    /// JPEG quality used for lossy re-encoding, if lossy coding is allowed.
    pub fn jpeg_quality(&self) -> Option<u8> {
        match self {
            Self::None | Self::Lossless => None,
            Self::Lossy => Some(75),
            Self::Aggressive => Some(50),
        }
    }
}

impl TryFrom<u8> for OptimizeLevel {
    type Error = OcrwerkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Lossless),
            2 => Ok(Self::Lossy),
            3 => Ok(Self::Aggressive),
            other => Err(OcrwerkError::BadArgs(format!(
                "optimization level must be 0-3, got {other}"
            ))),
        }
    }
}

impl From<OptimizeLevel> for u8 {
    fn from(level: OptimizeLevel) -> u8 {
        match level {
            OptimizeLevel::None => 0,
            OptimizeLevel::Lossless => 1,
            OptimizeLevel::Lossy => 2,
            OptimizeLevel::Aggressive => 3,
        }
    }
}

/// Document information applied to the output `/Info` dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
}

impl DocumentMetadata {
    /// Fill unset fields from `fallback` (typically the source document's info).
    pub fn or(self, fallback: &DocumentMetadata) -> DocumentMetadata {
        DocumentMetadata {
            title: self.title.or_else(|| fallback.title.clone()),
            author: self.author.or_else(|| fallback.author.clone()),
            subject: self.subject.or_else(|| fallback.subject.clone()),
            keywords: self.keywords.or_else(|| fallback.keywords.clone()),
        }
    }
}

/// Subset of pages to OCR, e.g. `1,3-5,9-`. Unselected pages are copied
/// through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PageSelection {
    /// Inclusive ranges; `None` end means "to the last page".
    ranges: Vec<(u32, Option<u32>)>,
}

impl PageSelection {
    /// Whether the 1-based `page` is selected.
    pub fn contains(&self, page: u32) -> bool {
        self.ranges
            .iter()
            .any(|&(start, end)| page >= start && end.is_none_or(|end| page <= end))
    }

    /// Check the selection against the document length.
    pub fn validate_against(&self, page_count: u32) -> Result<(), OcrwerkError> {
        for &(start, _) in &self.ranges {
            if start > page_count {
                return Err(OcrwerkError::BadArgs(format!(
                    "page selection starts at page {start}, but the document has {page_count} pages"
                )));
            }
        }
        Ok(())
    }
}

impl FromStr for PageSelection {
    type Err = OcrwerkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = |detail: String| OcrwerkError::BadArgs(format!("invalid page selection '{s}': {detail}"));
        let mut ranges = Vec::new();

        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (start, end) = match part.split_once('-') {
                Some((a, b)) => {
                    let start: u32 = a.trim().parse().map_err(|_| bad(format!("'{a}' is not a page number")))?;
                    let end = if b.trim().is_empty() {
                        None
                    } else {
                        Some(b.trim().parse::<u32>().map_err(|_| bad(format!("'{b}' is not a page number")))?)
                    };
                    (start, end)
                }
                None => {
                    let page: u32 = part.parse().map_err(|_| bad(format!("'{part}' is not a page number")))?;
                    (page, Some(page))
                }
            };
            if start == 0 {
                return Err(bad("pages are numbered from 1".into()));
            }
            if let Some(end) = end
                && end < start
            {
                return Err(bad(format!("range {start}-{end} is reversed")));
            }
            ranges.push((start, end));
        }

        if ranges.is_empty() {
            return Err(bad("no pages given".into()));
        }
        Ok(Self { ranges })
    }
}

impl TryFrom<String> for PageSelection {
    type Error = OcrwerkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PageSelection> for String {
    fn from(selection: PageSelection) -> String {
        selection.to_string()
    }
}

impl fmt::Display for PageSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .ranges
            .iter()
            .map(|&(start, end)| match end {
                Some(end) if end == start => start.to_string(),
                Some(end) => format!("{start}-{end}"),
                None => format!("{start}-"),
            })
            .collect();
        f.write_str(&parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_selection_parses_ranges() {
        let sel: PageSelection = "1,3-5,9-".parse().unwrap();
        assert!(sel.contains(1));
        assert!(!sel.contains(2));
        assert!(sel.contains(4));
        assert!(!sel.contains(6));
        assert!(sel.contains(9));
        assert!(sel.contains(400));
        assert_eq!(sel.to_string(), "1,3-5,9-");
    }

    #[test]
    fn page_selection_rejects_zero_and_reversed() {
        assert!("0".parse::<PageSelection>().is_err());
        assert!("5-3".parse::<PageSelection>().is_err());
        assert!("".parse::<PageSelection>().is_err());
        assert!("a-b".parse::<PageSelection>().is_err());
    }

    #[test]
    fn page_selection_out_of_range() {
        let sel: PageSelection = "4-".parse().unwrap();
        assert!(sel.validate_against(3).is_err());
        assert!(sel.validate_against(4).is_ok());
    }

    #[test]
    fn output_type_pdfa_parts() {
        assert_eq!(OutputType::Pdfa.pdfa_part(), Some(PdfaPart::Two));
        assert_eq!(OutputType::Pdfa1.pdfa_part(), Some(PdfaPart::One));
        assert_eq!(OutputType::Pdf.pdfa_part(), None);
        assert!(!OutputType::None.writes_pdf());
        assert_eq!("PDFA-3".parse::<OutputType>().unwrap(), OutputType::Pdfa3);
    }

    #[test]
    fn optimize_level_round_trips_through_u8() {
        assert_eq!(OptimizeLevel::try_from(2).unwrap(), OptimizeLevel::Lossy);
        assert!(OptimizeLevel::try_from(4).is_err());
        assert_eq!(u8::from(OptimizeLevel::Aggressive), 3);
        assert_eq!(OptimizeLevel::Lossless.jpeg_quality(), None);
    }

    #[test]
    fn color_mode_widening() {
        assert_eq!(ColorMode::Bilevel.widen(ColorMode::Gray), ColorMode::Gray);
        assert_eq!(ColorMode::Color.widen(ColorMode::Bilevel), ColorMode::Color);
    }

    #[test]
    fn metadata_fallback() {
        let source = DocumentMetadata {
            title: Some("Source".into()),
            author: Some("Scanner".into()),
            ..Default::default()
        };
        let merged = DocumentMetadata {
            title: Some("Mine".into()),
            ..Default::default()
        }
        .or(&source);
        assert_eq!(merged.title.as_deref(), Some("Mine"));
        assert_eq!(merged.author.as_deref(), Some("Scanner"));
        assert_eq!(merged.subject, None);
    }
}
