// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF/A conversion.
//
// Conversion itself is delegated to Ghostscript's pdfwrite device, which
// embeds fonts, flattens colour to sRGB and writes the output intent.
// `normalize` then fixes up what the claimed part requires of the
// document structure: header version, XMP identification, trailer ID and
// the removal of forbidden features.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat, dictionary};
use ocrwerk_core::error::OcrwerkError;
use ocrwerk_core::types::PdfaPart;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use super::objects::{self, decode_text_string, parse_pdf_date, resolve};
use crate::process::{self, ProcessError};

/// Places an sRGB ICC profile is commonly installed.
const ICC_SEARCH_PATHS: [&str; 6] = [
    "/usr/share/color/icc/sRGB.icc",
    "/usr/share/color/icc/colord/sRGB.icc",
    "/usr/share/color/icc/ghostscript/srgb.icc",
    "/usr/share/ghostscript/iccprofiles/srgb.icc",
    "/usr/local/share/ghostscript/iccprofiles/srgb.icc",
    "/opt/homebrew/share/ghostscript/iccprofiles/srgb.icc",
];

/// Action types PDF/A does not allow.
const FORBIDDEN_ACTIONS: [&[u8]; 6] = [b"Launch", b"Sound", b"Movie", b"ResetForm", b"ImportData", b"JavaScript"];

/// Keys holding an action that runs without further user interaction.
const ACTION_KEYS: [&[u8]; 2] = [b"A", b"OpenAction"];

/// How hard conversion should try to guarantee conformance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PdfaProfile {
    #[default]
    Standard,
    /// Abort on non-conforming features instead of dropping them, and
    /// strip transparency and appearance-less annotations.
    Strict,
}

/// One conversion to carry out.
#[derive(Debug, Clone)]
pub struct PdfaRequest<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub part: PdfaPart,
    pub profile: PdfaProfile,
    pub timeout: Duration,
}

/// Converts a PDF into a PDF/A candidate.
#[async_trait]
pub trait PdfaConverter: Send + Sync {
    fn name(&self) -> &str;

    async fn convert(&self, request: &PdfaRequest<'_>) -> Result<(), OcrwerkError>;
}

/// PDF/A conversion with Ghostscript's `pdfwrite` device.
#[derive(Debug, Clone)]
pub struct GhostscriptConverter {
    program: String,
    icc_profile: Option<PathBuf>,
}

impl GhostscriptConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            icc_profile: None,
        }
    }

    /// Use this sRGB profile instead of searching for one.
    pub fn with_icc_profile(mut self, path: Option<PathBuf>) -> Self {
        self.icc_profile = path;
        self
    }

    fn arguments(&self, request: &PdfaRequest<'_>, definition: &Path, icc: &Path) -> Vec<String> {
        let policy = match request.profile {
            PdfaProfile::Standard => 1,
            PdfaProfile::Strict => 2,
        };
        let mut args: Vec<String> = [
            "-dQUIET",
            "-dBATCH",
            "-dNOPAUSE",
            "-dSAFER",
            "-sDEVICE=pdfwrite",
            "-dAutoRotatePages=/None",
            "-sColorConversionStrategy=RGB",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        args.push(format!("-dPDFA={}", request.part.number()));
        args.push(format!("-dPDFACompatibilityPolicy={policy}"));
        if request.profile == PdfaProfile::Strict {
            args.push("-dNOTRANSPARENCY".into());
        }
        args.push(format!("-dCompatibilityLevel={}", request.part.pdf_version()));
        args.push(format!("--permit-file-read={}", icc.display()));
        args.push(format!("-sOutputFile={}", request.output.display()));
        args.push(definition.display().to_string());
        args.push(request.input.display().to_string());
        args
    }
}

impl Default for GhostscriptConverter {
    fn default() -> Self {
        Self::new("gs")
    }
}

#[async_trait]
impl PdfaConverter for GhostscriptConverter {
    fn name(&self) -> &str {
        "ghostscript"
    }

    #[instrument(skip_all, fields(part = %request.part, profile = ?request.profile))]
    async fn convert(&self, request: &PdfaRequest<'_>) -> Result<(), OcrwerkError> {
        let icc = self.icc_profile.clone().or_else(find_icc_profile).ok_or_else(|| {
            OcrwerkError::PdfaConversion(
                "no sRGB ICC profile found; install one or set icc_profile in the configuration".into(),
            )
        })?;

        let definition = request
            .output
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("PDFA_def.ps");
        tokio::fs::write(&definition, pdfa_definition(&icc))
            .await
            .map_err(|e| OcrwerkError::file_access(&definition, e))?;

        let args = self.arguments(request, &definition, &icc);
        debug!(program = %self.program, ?args, "Running PDF/A conversion");
        process::run(&self.program, &args, request.timeout)
            .await
            .map_err(|err| match err {
                ProcessError::NotFound { program } => OcrwerkError::DependencyMissing {
                    program,
                    hint: "install Ghostscript, or choose --output-type pdf".into(),
                },
                other => OcrwerkError::PdfaConversion(other.to_string()),
            })?;

        if !tokio::fs::try_exists(request.output).await.unwrap_or(false) {
            return Err(OcrwerkError::PdfaConversion("Ghostscript produced no output".into()));
        }
        info!(output = %request.output.display(), "PDF/A conversion finished");
        Ok(())
    }
}

/// First sRGB ICC profile found in the usual system locations.
pub fn find_icc_profile() -> Option<PathBuf> {
    ICC_SEARCH_PATHS.iter().map(PathBuf::from).find(|p| p.is_file())
}

/// PostScript prologue declaring the sRGB output intent.
fn pdfa_definition(icc: &Path) -> String {
    format!(
        "%!\n\
         /ICCProfile ({}) def\n\
         [/_objdef {{icc_PDFA}} /type /stream /OBJ pdfmark\n\
         [{{icc_PDFA}} << /N 3 >> /PUT pdfmark\n\
         [{{icc_PDFA}} ICCProfile (r) file /PUT pdfmark\n\
         [/_objdef {{OutputIntent_PDFA}} /type /dict /OBJ pdfmark\n\
         [{{OutputIntent_PDFA}} <<\n  \
           /Type /OutputIntent\n  \
           /S /GTS_PDFA1\n  \
           /DestOutputProfile {{icc_PDFA}}\n  \
           /OutputConditionIdentifier (sRGB)\n  \
           /Info (sRGB IEC61966-2.1)\n\
         >> /PUT pdfmark\n\
         [{{Catalog}} << /OutputIntents [ {{OutputIntent_PDFA}} ] >> /PUT pdfmark\n",
        ps_string(&icc.display().to_string())
    )
}

/// Escape text for a PostScript string literal.
fn ps_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '(' | ')' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Read, normalize and rewrite a converted file in place.
pub async fn normalize_file(path: &Path, part: PdfaPart, profile: PdfaProfile) -> Result<(), OcrwerkError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| OcrwerkError::file_access(path, e))?;
    let normalized = tokio::task::spawn_blocking(move || normalize(&bytes, part, profile))
        .await
        .map_err(|e| OcrwerkError::Other(format!("normalization task failed: {e}")))??;
    tokio::fs::write(path, normalized)
        .await
        .map_err(|e| OcrwerkError::file_access(path, e))
}

/// Bring a converted document in line with `part`.
#[instrument(skip(bytes), fields(bytes_len = bytes.len()))]
pub fn normalize(bytes: &[u8], part: PdfaPart, profile: PdfaProfile) -> Result<Vec<u8>, OcrwerkError> {
    let mut doc = Document::load_mem(bytes)
        .map_err(|e| OcrwerkError::PdfaConversion(format!("converted file is not readable: {e}")))?;
    doc.version = part.pdf_version().to_string();
    doc.trailer.remove(b"Encrypt");

    remove_forbidden_actions(&mut doc);
    let strip_embedded = part != PdfaPart::Three;
    if let Some(names_id) = catalog_entry_id(&doc, b"Names") {
        if let Ok(names) = doc.get_dictionary_mut(names_id) {
            names.remove(b"JavaScript");
            if strip_embedded {
                names.remove(b"EmbeddedFiles");
            }
        }
    } else if let Ok(catalog) = doc.catalog_mut()
        && let Ok(Object::Dictionary(names)) = catalog.get_mut(b"Names")
    {
        names.remove(b"JavaScript");
        if strip_embedded {
            names.remove(b"EmbeddedFiles");
        }
    }

    if profile == PdfaProfile::Strict {
        strip_transparency_groups(&mut doc);
        strip_bare_annotations(&mut doc);
    }

    let xmp = xmp_packet(&doc, part);
    let mut metadata = Stream::new(dictionary! { "Type" => "Metadata", "Subtype" => "XML" }, xmp.into_bytes());
    metadata.allows_compression = false;
    let metadata_id = doc.add_object(metadata);
    doc.catalog_mut()
        .map_err(|e| OcrwerkError::PdfaConversion(format!("converted file has no catalog: {e}")))?
        .set("Metadata", metadata_id);

    let digest = Sha256::digest(bytes);
    let id = Object::String(digest[..16].to_vec(), StringFormat::Hexadecimal);
    doc.trailer.set("ID", vec![id.clone(), id]);

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| OcrwerkError::PdfaConversion(format!("cannot write normalized file: {e}")))?;
    debug!(part = %part, bytes = out.len(), "Normalized for PDF/A");
    Ok(out)
}

/// Object id of a catalog entry, when it is an indirect reference.
fn catalog_entry_id(doc: &Document, key: &[u8]) -> Option<ObjectId> {
    doc.catalog().ok()?.get(key).ok()?.as_reference().ok()
}

fn is_forbidden_action(doc: &Document, object: &Object) -> bool {
    let Some(Object::Dictionary(action)) = resolve(doc, object) else {
        return false;
    };
    objects::name(doc, action, b"S").is_some_and(|s| FORBIDDEN_ACTIONS.iter().any(|f| *f == s))
}

/// Drop additional-actions dictionaries everywhere, and `/A` or
/// `/OpenAction` entries that trigger a forbidden action.
fn remove_forbidden_actions(doc: &mut Document) {
    let mut offending: Vec<(ObjectId, &'static [u8])> = Vec::new();
    for (&id, object) in &doc.objects {
        let dict = match object {
            Object::Dictionary(d) => d,
            Object::Stream(s) => &s.dict,
            _ => continue,
        };
        if dict.has(b"AA") {
            offending.push((id, b"AA"));
        }
        for key in ACTION_KEYS {
            if let Ok(action) = dict.get(key)
                && is_forbidden_action(doc, action)
            {
                offending.push((id, key));
            }
        }
    }
    if !offending.is_empty() {
        warn!(count = offending.len(), "Removing actions not allowed in PDF/A");
    }
    for (id, key) in offending {
        match doc.objects.get_mut(&id) {
            Some(Object::Dictionary(d)) => {
                d.remove(key);
            }
            Some(Object::Stream(s)) => {
                s.dict.remove(key);
            }
            _ => {}
        }
    }
}

fn strip_transparency_groups(doc: &mut Document) {
    let transparent: Vec<ObjectId> = doc
        .objects
        .iter()
        .filter_map(|(&id, object)| {
            let dict = match object {
                Object::Dictionary(d) => d,
                Object::Stream(s) => &s.dict,
                _ => return None,
            };
            let group = objects::get_dict(doc, dict, b"Group")?;
            (objects::name(doc, group, b"S") == Some(b"Transparency".as_slice())).then_some(id)
        })
        .collect();
    for id in transparent {
        match doc.objects.get_mut(&id) {
            Some(Object::Dictionary(d)) => {
                d.remove(b"Group");
            }
            Some(Object::Stream(s)) => {
                s.dict.remove(b"Group");
            }
            _ => {}
        }
    }
}

/// Remove annotations that have no appearance stream, other than links
/// and popups.
fn strip_bare_annotations(doc: &mut Document) {
    let mut keep_only: Vec<(ObjectId, Vec<Object>)> = Vec::new();
    for (_, page_id) in doc.get_pages() {
        let Ok(page) = doc.get_dictionary(page_id) else { continue };
        let Some(Object::Array(annots)) = objects::get(doc, page, b"Annots") else {
            continue;
        };
        let kept: Vec<Object> = annots
            .iter()
            .filter(|annot| match resolve(doc, annot) {
                Some(Object::Dictionary(d)) => {
                    d.has(b"AP")
                        || matches!(objects::name(doc, d, b"Subtype"), Some(b"Link") | Some(b"Popup"))
                }
                _ => false,
            })
            .cloned()
            .collect();
        if kept.len() != annots.len() {
            keep_only.push((page_id, kept));
        }
    }
    for (page_id, kept) in keep_only {
        if let Ok(page) = doc.get_dictionary_mut(page_id) {
            page.set("Annots", kept);
        }
    }
}

/// XMP packet identifying the part, with document information matching
/// `/Info`.
fn xmp_packet(doc: &Document, part: PdfaPart) -> String {
    let info: Option<&Dictionary> = doc
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok());
    let field = |key: &[u8]| -> Option<String> {
        match objects::get(doc, info?, key)? {
            Object::String(bytes, _) => Some(decode_text_string(bytes)),
            _ => None,
        }
    };
    let date = |key: &[u8]| field(key).and_then(|d| parse_pdf_date(&d)).map(|d| d.to_rfc3339_opts(SecondsFormat::Secs, false));

    let mut description = String::new();
    if let Some(title) = field(b"Title") {
        description.push_str(&format!(
            "   <dc:title><rdf:Alt><rdf:li xml:lang=\"x-default\">{}</rdf:li></rdf:Alt></dc:title>\n",
            xml_escape(&title)
        ));
    }
    if let Some(author) = field(b"Author") {
        description.push_str(&format!(
            "   <dc:creator><rdf:Seq><rdf:li>{}</rdf:li></rdf:Seq></dc:creator>\n",
            xml_escape(&author)
        ));
    }
    if let Some(subject) = field(b"Subject") {
        description.push_str(&format!(
            "   <dc:description><rdf:Alt><rdf:li xml:lang=\"x-default\">{}</rdf:li></rdf:Alt></dc:description>\n",
            xml_escape(&subject)
        ));
    }
    if let Some(keywords) = field(b"Keywords") {
        description.push_str(&format!("   <pdf:Keywords>{}</pdf:Keywords>\n", xml_escape(&keywords)));
    }
    if let Some(producer) = field(b"Producer") {
        description.push_str(&format!("   <pdf:Producer>{}</pdf:Producer>\n", xml_escape(&producer)));
    }
    if let Some(tool) = field(b"Creator") {
        description.push_str(&format!("   <xmp:CreatorTool>{}</xmp:CreatorTool>\n", xml_escape(&tool)));
    }
    if let Some(created) = date(b"CreationDate") {
        description.push_str(&format!("   <xmp:CreateDate>{created}</xmp:CreateDate>\n"));
    }
    if let Some(modified) = date(b"ModDate") {
        description.push_str(&format!("   <xmp:ModifyDate>{modified}</xmp:ModifyDate>\n"));
    }

    format!(
        "<?xpacket begin=\"\u{feff}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n\
         <x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\n\
         <rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">\n\
         <rdf:Description rdf:about=\"\"\n\
         \x20   xmlns:dc=\"http://purl.org/dc/elements/1.1/\"\n\
         \x20   xmlns:pdf=\"http://ns.adobe.com/pdf/1.3/\"\n\
         \x20   xmlns:xmp=\"http://ns.adobe.com/xap/1.0/\"\n\
         \x20   xmlns:pdfaid=\"http://www.aiim.org/pdfa/ns/id/\">\n\
         {description}\
         \x20  <pdfaid:part>{}</pdfaid:part>\n\
         \x20  <pdfaid:conformance>{}</pdfaid:conformance>\n\
         </rdf:Description>\n\
         </rdf:RDF>\n\
         </x:xmpmeta>\n\
         <?xpacket end=\"w\"?>",
        part.number(),
        part.conformance()
    )
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(with_annotations: bool) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let js_id = doc.add_object(dictionary! { "S" => "JavaScript", "JS" => Object::string_literal("app.alert(1)") });
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 100.into(), 100.into()],
            "Group" => dictionary! { "S" => "Transparency" },
            "AA" => dictionary! { "O" => js_id },
        };
        if with_annotations {
            let bare = doc.add_object(dictionary! { "Type" => "Annot", "Subtype" => "Text" });
            let link = doc.add_object(dictionary! { "Type" => "Annot", "Subtype" => "Link" });
            page.set("Annots", vec![bare.into(), link.into()]);
        }
        let page_id = doc.add_object(page);
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! { "Type" => "Pages", "Kids" => vec![page_id.into()], "Count" => 1 }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
            "OpenAction" => js_id,
            "Names" => dictionary! {
                "JavaScript" => Dictionary::new(),
                "EmbeddedFiles" => Dictionary::new(),
            },
        });
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal("Q&A <draft>"),
            "Producer" => Object::string_literal("ocrwerk test"),
            "CreationDate" => Object::string_literal("D:20260102030405+01'00'"),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    fn metadata_text(doc: &Document) -> String {
        let catalog = doc.catalog().unwrap();
        let id = catalog.get(b"Metadata").unwrap().as_reference().unwrap();
        let stream = doc.get_object(id).unwrap().as_stream().unwrap();
        String::from_utf8(stream.content.clone()).unwrap()
    }

    #[test]
    fn normalization_identifies_the_part() {
        let out = normalize(&sample(false), PdfaPart::Two, PdfaProfile::Standard).unwrap();
        let doc = Document::load_mem(&out).unwrap();
        assert_eq!(doc.version, "1.7");
        assert!(doc.trailer.get(b"ID").is_ok());

        let xmp = metadata_text(&doc);
        assert!(xmp.contains("<pdfaid:part>2</pdfaid:part>"));
        assert!(xmp.contains("<pdfaid:conformance>B</pdfaid:conformance>"));
        assert!(xmp.contains("Q&amp;A &lt;draft&gt;"));
        assert!(xmp.contains("<pdf:Producer>ocrwerk test</pdf:Producer>"));
        assert!(xmp.contains("<xmp:CreateDate>2026-01-02T03:04:05+01:00</xmp:CreateDate>"));
    }

    #[test]
    fn forbidden_features_are_removed() {
        let out = normalize(&sample(false), PdfaPart::One, PdfaProfile::Standard).unwrap();
        let doc = Document::load_mem(&out).unwrap();
        assert_eq!(doc.version, "1.4");
        let catalog = doc.catalog().unwrap();
        assert!(!catalog.has(b"OpenAction"));
        let names = catalog.get(b"Names").unwrap().as_dict().unwrap();
        assert!(!names.has(b"JavaScript"));
        assert!(!names.has(b"EmbeddedFiles"));

        let page = doc.get_dictionary(doc.get_pages()[&1]).unwrap();
        assert!(!page.has(b"AA"));
        // Transparency groups are only stripped by the strict profile.
        assert!(page.has(b"Group"));
    }

    #[test]
    fn part_three_keeps_embedded_files() {
        let out = normalize(&sample(false), PdfaPart::Three, PdfaProfile::Standard).unwrap();
        let doc = Document::load_mem(&out).unwrap();
        let names = doc.catalog().unwrap().get(b"Names").unwrap().as_dict().unwrap();
        assert!(names.has(b"EmbeddedFiles"));
    }

    #[test]
    fn strict_profile_strips_more() {
        let out = normalize(&sample(true), PdfaPart::Two, PdfaProfile::Strict).unwrap();
        let doc = Document::load_mem(&out).unwrap();
        let page = doc.get_dictionary(doc.get_pages()[&1]).unwrap();
        assert!(!page.has(b"Group"));
        let annots = page.get(b"Annots").unwrap().as_array().unwrap();
        assert_eq!(annots.len(), 1);
    }

    #[test]
    fn ghostscript_arguments() {
        let request = PdfaRequest {
            input: Path::new("/tmp/in.pdf"),
            output: Path::new("/tmp/out.pdf"),
            part: PdfaPart::One,
            profile: PdfaProfile::Strict,
            timeout: Duration::from_secs(5),
        };
        let args = GhostscriptConverter::default().arguments(&request, Path::new("/tmp/def.ps"), Path::new("/icc/s.icc"));
        assert!(args.contains(&"-dPDFA=1".to_string()));
        assert!(args.contains(&"-dPDFACompatibilityPolicy=2".to_string()));
        assert!(args.contains(&"-dNOTRANSPARENCY".to_string()));
        assert!(args.contains(&"-dCompatibilityLevel=1.4".to_string()));
        assert!(args.contains(&"-sOutputFile=/tmp/out.pdf".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/in.pdf"));
    }

    #[test]
    fn definition_escapes_profile_path() {
        let text = pdfa_definition(Path::new("/odd (dir)/s\\rgb.icc"));
        assert!(text.contains("/ICCProfile (/odd \\(dir\\)/s\\\\rgb.icc) def"));
        assert!(text.contains("/S /GTS_PDFA1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn converter_runs_the_program() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-gs");
        std::fs::write(
            &script,
            "#!/bin/sh\nfor a; do case \"$a\" in -sOutputFile=*) out=\"${a#-sOutputFile=}\";; esac; last=\"$a\"; done\ncp \"$last\" \"$out\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let icc = dir.path().join("srgb.icc");
        std::fs::write(&icc, b"icc").unwrap();
        let input = dir.path().join("in.pdf");
        std::fs::write(&input, sample(false)).unwrap();
        let output = dir.path().join("out.pdf");

        let converter = GhostscriptConverter::new(script.display().to_string()).with_icc_profile(Some(icc));
        converter
            .convert(&PdfaRequest {
                input: &input,
                output: &output,
                part: PdfaPart::Two,
                profile: PdfaProfile::Standard,
                timeout: Duration::from_secs(10),
            })
            .await
            .unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), std::fs::read(&input).unwrap());
        assert!(dir.path().join("PDFA_def.ps").is_file());
    }

    #[tokio::test]
    async fn missing_ghostscript_is_a_dependency_error() {
        let dir = tempfile::tempdir().unwrap();
        let icc = dir.path().join("srgb.icc");
        std::fs::write(&icc, b"icc").unwrap();
        let converter = GhostscriptConverter::new("ocrwerk-no-such-gs").with_icc_profile(Some(icc));
        let err = converter
            .convert(&PdfaRequest {
                input: &dir.path().join("in.pdf"),
                output: &dir.path().join("out.pdf"),
                part: PdfaPart::Two,
                profile: PdfaProfile::Standard,
                timeout: Duration::from_secs(5),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OcrwerkError::DependencyMissing { .. }));
    }
}
