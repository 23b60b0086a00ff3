//! Attachment normalization
//!
//! Turns an uploaded file into either extracted text or a base64 visual
//! payload. Text-bearing formats (`.txt`, `.pdf`, `.doc`, `.docx`) are
//! decoded in memory. A PDF without a text layer is sent to the model as a
//! visual input instead; other formats that yield no text are reported as
//! `ExtractionFailed`. Nothing is written to disk.

use std::io::{BufReader, Cursor, Read};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::errors::{AppError, AppResult};
use crate::models::{ContentKind, ExtractedContent, UploadedFile};
use crate::util::truncate_chars;

/// Extensions accepted by [`normalize`]
pub const SUPPORTED_EXTENSIONS: [&str; 11] = [
    ".txt", ".pdf", ".doc", ".docx", ".png", ".jpg", ".jpeg", ".bmp", ".gif", ".tiff", ".webp",
];

/// Cap on extracted text per attachment (characters)
const MAX_EXTRACTED_CHARS: usize = 200_000;
/// Cap on inflated `word/document.xml` bytes read from a `.docx`
const MAX_DOCUMENT_XML_BYTES: u64 = 32 * 1024 * 1024;
/// Shortest printable run kept when scraping legacy `.doc` files
const MIN_DOC_RUN_CHARS: usize = 4;

/// Recognized attachment format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentFormat {
    PlainText,
    Pdf,
    Doc,
    Docx,
    /// Image with its MIME type
    Image(&'static str),
}

impl AttachmentFormat {
    /// MIME type used when the raw bytes are sent to the model
    pub fn media_type(self) -> &'static str {
        match self {
            Self::PlainText => "text/plain",
            Self::Pdf => "application/pdf",
            Self::Doc => "application/msword",
            Self::Docx => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            Self::Image(media_type) => media_type,
        }
    }
}

/// Detect format from the filename extension (case-insensitive)
pub fn detect_format(filename: &str) -> Option<AttachmentFormat> {
    let (_, ext) = filename.rsplit_once('.')?;
    let format = match ext.to_ascii_lowercase().as_str() {
        "txt" => AttachmentFormat::PlainText,
        "pdf" => AttachmentFormat::Pdf,
        "doc" => AttachmentFormat::Doc,
        "docx" => AttachmentFormat::Docx,
        "png" => AttachmentFormat::Image("image/png"),
        "jpg" | "jpeg" => AttachmentFormat::Image("image/jpeg"),
        "bmp" => AttachmentFormat::Image("image/bmp"),
        "gif" => AttachmentFormat::Image("image/gif"),
        "tiff" => AttachmentFormat::Image("image/tiff"),
        "webp" => AttachmentFormat::Image("image/webp"),
        _ => return None,
    };
    Some(format)
}

/// Reduce a client-supplied filename to a safe base name
///
/// Drops directory components and control characters. Returns `attachment`
/// when nothing usable is left.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim().trim_start_matches('.').trim();
    if cleaned.is_empty() {
        "attachment".to_owned()
    } else {
        cleaned.to_owned()
    }
}

/// Normalize one attachment into prompt-ready content
///
/// The size limit is enforced before any decoding work.
///
/// # Errors
///
/// - `FileTooLarge` if the file exceeds `max_bytes`
/// - `UnsupportedFileType` if the extension is not in [`SUPPORTED_EXTENSIONS`]
/// - `ExtractionFailed` if a `.txt`, `.doc` or `.docx` yields no text
pub fn normalize(
    file: &UploadedFile,
    source_file_id: &str,
    max_bytes: usize,
) -> AppResult<ExtractedContent> {
    if file.oversized || file.bytes.len() > max_bytes {
        return Err(AppError::FileTooLarge(format!(
            "{} exceeds the {max_bytes} byte limit",
            file.filename
        )));
    }

    let format = detect_format(&file.filename).ok_or_else(|| {
        AppError::UnsupportedFileType(format!(
            "{} (supported: {})",
            file.filename,
            SUPPORTED_EXTENSIONS.join(", ")
        ))
    })?;

    let extracted = match format {
        AttachmentFormat::Image(_) => return Ok(visual_content(file, source_file_id, format)),
        AttachmentFormat::PlainText => Ok(decode_text(&file.bytes)),
        AttachmentFormat::Pdf => extract_pdf(&file.bytes),
        AttachmentFormat::Docx => extract_docx(&file.bytes),
        AttachmentFormat::Doc => Ok(extract_doc(&file.bytes)),
    };

    let reason = match extracted {
        Ok(text) if !text.trim().is_empty() => {
            return Ok(ExtractedContent {
                source_file_id: source_file_id.to_owned(),
                filename: file.filename.clone(),
                kind: ContentKind::Text,
                media_type: "text/plain".to_owned(),
                payload: truncate_chars(text, MAX_EXTRACTED_CHARS),
            });
        }
        Ok(_) => format!("{} contains no readable text", file.filename),
        Err(AppError::ExtractionFailed(detail)) => format!("{}: {detail}", file.filename),
        Err(e) => format!("{}: {e}", file.filename),
    };

    // Scanned PDFs are the only text format the model accepts as raw bytes.
    if format == AttachmentFormat::Pdf {
        tracing::debug!(
            source_file_id,
            filename = %file.filename,
            "no usable text layer, sending PDF as visual input: {reason}"
        );
        return Ok(visual_content(file, source_file_id, format));
    }

    Err(AppError::ExtractionFailed(reason))
}

fn visual_content(
    file: &UploadedFile,
    source_file_id: &str,
    format: AttachmentFormat,
) -> ExtractedContent {
    ExtractedContent {
        source_file_id: source_file_id.to_owned(),
        filename: file.filename.clone(),
        kind: ContentKind::Image,
        media_type: format.media_type().to_owned(),
        payload: STANDARD.encode(&file.bytes),
    }
}

/// Decode text as UTF-8, falling back to lossy conversion
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_owned(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn extract_pdf(bytes: &[u8]) -> AppResult<String> {
    // pdf-extract can panic on malformed input
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(AppError::ExtractionFailed(format!("PDF: {e}"))),
        Err(_) => Err(AppError::ExtractionFailed(
            "PDF extraction panicked (malformed file)".to_owned(),
        )),
    }
}

/// Extract `<w:t>` runs from `word/document.xml`, one line per paragraph
///
/// Inflation is capped at [`MAX_DOCUMENT_XML_BYTES`] and reading stops once
/// [`MAX_EXTRACTED_CHARS`] characters are collected.
fn extract_docx(bytes: &[u8]) -> AppResult<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| AppError::ExtractionFailed(format!("DOCX zip: {e}")))?;
    let doc = archive
        .by_name("word/document.xml")
        .map_err(|e| AppError::ExtractionFailed(format!("DOCX missing document.xml: {e}")))?;

    read_document_xml(
        BufReader::new(doc.take(MAX_DOCUMENT_XML_BYTES)),
        MAX_EXTRACTED_CHARS,
    )
}

fn read_document_xml<R: Read>(source: BufReader<R>, max_chars: usize) -> AppResult<String> {
    let mut reader = Reader::from_reader(source);
    let mut buf = Vec::new();
    let mut text = String::new();
    let mut chars = 0;
    let mut in_text = false;

    while chars < max_chars {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => text.push('\t'),
                b"br" => text.push('\n'),
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if !text.is_empty() && !text.ends_with('\n') => text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) if in_text => {
                if let Ok(s) = e.unescape() {
                    chars += s.chars().count();
                    text.push_str(&s);
                }
            }
            Ok(Event::Eof) => break,
            // A capped read can cut the document mid-tag; keep what was read.
            Err(e) if !text.is_empty() => {
                tracing::debug!("document.xml ended early: {e}");
                break;
            }
            Err(e) => return Err(AppError::ExtractionFailed(format!("DOCX XML: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    Ok(text)
}

/// Best-effort text recovery from a legacy Word binary
///
/// Word 97-2003 stores body text either as UTF-16LE or as 8-bit characters.
/// Both encodings are scanned for printable runs and the richer result wins.
fn extract_doc(bytes: &[u8]) -> String {
    let wide = printable_runs(
        bytes
            .chunks_exact(2)
            .map(|pair| if pair[1] == 0 { pair[0] } else { 0 }),
    );
    let narrow = printable_runs(bytes.iter().copied());

    if wide.len() >= narrow.len() {
        wide
    } else {
        narrow
    }
}

fn printable_runs(bytes: impl Iterator<Item = u8>) -> String {
    let mut out = String::new();
    let mut run = String::new();

    for b in bytes {
        if b == b'\t' || b == b'\r' || b == b'\n' || (0x20..0x7f).contains(&b) {
            run.push(if b == b'\r' { '\n' } else { char::from(b) });
            continue;
        }
        flush_run(&mut out, &mut run);
    }
    flush_run(&mut out, &mut run);
    out
}

fn flush_run(out: &mut String, run: &mut String) {
    let trimmed = run.trim();
    if trimmed.chars().count() >= MIN_DOC_RUN_CHARS {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(trimmed);
    }
    run.clear();
}

#[cfg(test)]
mod tests {
    use std::io::{BufReader, Cursor, Write};

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use zip::write::SimpleFileOptions;

    use super::{
        AttachmentFormat, MAX_EXTRACTED_CHARS, detect_format, normalize, read_document_xml,
        sanitize_filename,
    };
    use crate::config::DEFAULT_MAX_ATTACHMENT_BYTES;
    use crate::errors::AppError;
    use crate::models::{ContentKind, UploadedFile};

    fn upload(filename: &str, bytes: Vec<u8>) -> UploadedFile {
        UploadedFile {
            filename: filename.to_owned(),
            content_type: None,
            bytes,
            oversized: false,
        }
    }

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", SimpleFileOptions::default())
            .expect("start entry");
        writer
            .write_all(document_xml.as_bytes())
            .expect("write entry");
        writer.finish().expect("finish zip").into_inner()
    }

    /// Single-page PDF with one Helvetica text run
    fn text_pdf(text: &str) -> Vec<u8> {
        let stream = format!("BT /F1 24 Tf 72 700 Td ({text}) Tj ET");
        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>".to_owned(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_owned(),
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R \
             /Resources << /Font << /F1 5 0 R >> >> >>"
                .to_owned(),
            format!("<< /Length {} >>\nstream\n{stream}\nendstream", stream.len()),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_owned(),
        ];

        let mut pdf = String::from("%PDF-1.4\n");
        let mut offsets = Vec::with_capacity(objects.len());
        for (idx, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.push_str(&format!("{} 0 obj\n{body}\nendobj\n", idx + 1));
        }
        let xref_at = pdf.len();
        pdf.push_str(&format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1));
        for offset in offsets {
            pdf.push_str(&format!("{offset:010} 00000 n \n"));
        }
        pdf.push_str(&format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
            objects.len() + 1
        ));
        pdf.into_bytes()
    }

    fn utf16le(text: &str) -> Vec<u8> {
        text.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    #[test]
    fn detects_formats_case_insensitively() {
        assert_eq!(detect_format("Scan.JPG"), Some(AttachmentFormat::Image("image/jpeg")));
        assert_eq!(detect_format("report.Docx"), Some(AttachmentFormat::Docx));
        assert_eq!(detect_format("setup.exe"), None);
        assert_eq!(detect_format("README"), None);
    }

    #[test]
    fn sanitizes_paths_and_control_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\bill\u{7}.pdf"), "bill.pdf");
        assert_eq!(sanitize_filename("  "), "attachment");
        assert_eq!(sanitize_filename(".hidden.txt"), "hidden.txt");
    }

    #[test]
    fn image_extensions_become_base64_visual_inputs() {
        for name in ["a.png", "a.jpg", "a.jpeg", "a.bmp", "a.gif", "a.tiff", "a.webp"] {
            let content = normalize(&upload(name, vec![1, 2, 3]), "m-01", 1024).expect(name);
            assert_eq!(content.kind, ContentKind::Image, "{name}");
            assert_eq!(content.payload, STANDARD.encode([1, 2, 3]));
            assert!(content.media_type.starts_with("image/"));
        }
    }

    #[test]
    fn plain_text_is_extracted_inline() {
        let content = normalize(
            &upload("notes.txt", b"Pay invoice #42 by Friday".to_vec()),
            "mail_001-01",
            1024,
        )
        .expect("txt");
        assert_eq!(content.kind, ContentKind::Text);
        assert_eq!(content.source_file_id, "mail_001-01");
        assert_eq!(content.payload, "Pay invoice #42 by Friday");
    }

    #[test]
    fn invalid_utf8_text_is_decoded_lossily() {
        let content = normalize(&upload("notes.txt", b"caf\xe9 bill".to_vec()), "m-01", 1024)
            .expect("txt");
        assert_eq!(content.kind, ContentKind::Text);
        assert!(content.payload.contains("bill"));
    }

    #[test]
    fn docx_text_runs_are_extracted_per_paragraph() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Electricity bill</w:t></w:r></w:p>
    <w:p><w:r><w:t xml:space="preserve">Amount due: </w:t></w:r><w:r><w:t>&#36;120</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let content = normalize(&upload("bill.docx", docx_bytes(xml)), "m-01", 1 << 20)
            .expect("docx");
        assert_eq!(content.kind, ContentKind::Text);
        assert_eq!(content.payload, "Electricity bill\nAmount due: $120\n");
    }

    #[test]
    fn legacy_doc_text_is_recovered_from_utf16_runs() {
        let mut bytes = vec![0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
        bytes.extend(utf16le("Quarterly tax notice attached"));
        bytes.extend([0xFF, 0xFE, 0x00, 0x01]);
        let content = normalize(&upload("notice.doc", bytes), "m-01", 1 << 20).expect("doc");
        assert_eq!(content.kind, ContentKind::Text);
        assert!(content.payload.contains("Quarterly tax notice attached"));
    }

    #[test]
    fn pdf_without_text_layer_falls_back_to_visual_input() {
        let bytes = b"%PDF-1.4\n%\xff\xff\xff\xff\nnot really a pdf".to_vec();
        let content = normalize(&upload("scan.pdf", bytes.clone()), "m-01", 1 << 20)
            .expect("pdf");
        assert_eq!(content.kind, ContentKind::Image);
        assert_eq!(content.media_type, "application/pdf");
        assert_eq!(content.payload, STANDARD.encode(&bytes));
    }

    #[test]
    fn corrupt_docx_is_reported_as_extraction_failure() {
        let err = normalize(&upload("broken.docx", b"PK\x03\x04junk".to_vec()), "m-01", 1024)
            .expect_err("must fail");
        assert!(matches!(err, AppError::ExtractionFailed(_)));
        assert_eq!(err.code(), "extraction_failed");
        assert!(err.to_string().contains("broken.docx"));
    }

    #[test]
    fn empty_text_file_is_reported_instead_of_sent_as_bytes() {
        for bytes in [Vec::new(), b"  \n\t ".to_vec()] {
            let err = normalize(&upload("empty.txt", bytes), "m-01", 1024).expect_err("must fail");
            assert!(matches!(err, AppError::ExtractionFailed(_)));
        }
    }

    #[test]
    fn doc_without_printable_runs_is_reported() {
        let err = normalize(&upload("blank.doc", vec![0u8; 64]), "m-01", 1024)
            .expect_err("must fail");
        assert!(matches!(err, AppError::ExtractionFailed(_)));
    }

    #[test]
    fn pdf_with_text_layer_is_extracted_inline() {
        let content = normalize(&upload("invoice.pdf", text_pdf("Invoice Total 120")), "m-01", 1 << 20)
            .expect("pdf");
        assert_eq!(content.kind, ContentKind::Text);
        assert_eq!(content.media_type, "text/plain");
        assert!(content.payload.contains("Invoice Total 120"), "{:?}", content.payload);
    }

    #[test]
    fn compressible_docx_is_capped_while_reading() {
        let paragraph = format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", "x".repeat(1_000));
        let xml = format!(
            r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
            paragraph.repeat(1_000)
        );
        let bytes = docx_bytes(&xml);
        assert!(bytes.len() < xml.len() / 50);

        let content = normalize(&upload("bomb.docx", bytes), "m-01", 1 << 20).expect("docx");
        assert_eq!(content.kind, ContentKind::Text);
        assert_eq!(content.payload.chars().count(), MAX_EXTRACTED_CHARS);
    }

    #[test]
    fn document_reader_stops_at_char_limit() {
        let xml = "<w:p><w:t>aaaaaaaaaa</w:t></w:p><w:p><w:t>bbbb</w:t></w:p>";
        let text = read_document_xml(BufReader::new(Cursor::new(xml.as_bytes())), 10)
            .expect("xml");
        assert_eq!(text, "aaaaaaaaaa");
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = normalize(&upload("setup.exe", vec![0x4d, 0x5a]), "m-01", 1024)
            .expect_err("must fail");
        assert!(matches!(err, AppError::UnsupportedFileType(_)));
        assert!(err.to_string().contains("setup.exe"));
    }

    #[test]
    fn oversized_file_is_rejected_before_format_check() {
        let bytes = vec![0u8; DEFAULT_MAX_ATTACHMENT_BYTES + 1];
        let err = normalize(&upload("huge.exe", bytes), "m-01", DEFAULT_MAX_ATTACHMENT_BYTES)
            .expect_err("must fail");
        assert!(matches!(err, AppError::FileTooLarge(_)));

        let mut flagged = upload("huge.pdf", vec![0u8; 10]);
        flagged.oversized = true;
        let err = normalize(&flagged, "m-01", DEFAULT_MAX_ATTACHMENT_BYTES).expect_err("must fail");
        assert!(matches!(err, AppError::FileTooLarge(_)));
    }
}
