//! Document loading
//!
//! PDFs are loaded page by page so that every page keeps its own location
//! metadata. Plain text and markdown files load as a single page.

use crate::error::{QaBotError, Result};
use crate::text::document::Document;
use crate::utils::get_file_extension;
use std::path::Path;

/// Page-wise PDF text extraction
pub struct PdfProcessor;

impl PdfProcessor {
    /// Extract one [`Document`] per page, numbered from zero
    pub fn load_pages<P: AsRef<Path>>(path: P) -> Result<Vec<Document>> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(QaBotError::Pdf(format!("PDF file not found: {}", path.display())));
        }

        let pdf = lopdf::Document::load(path)
            .map_err(|e| QaBotError::Pdf(format!("Failed to parse {}: {}", path.display(), e)))?;

        let source = path.to_string_lossy().to_string();
        let mut pages = Vec::new();
        for (index, page_number) in pdf.get_pages().keys().enumerate() {
            let text = pdf.extract_text(&[*page_number]).map_err(|e| {
                QaBotError::Pdf(format!(
                    "Failed to extract page {} of {}: {}",
                    page_number,
                    path.display(),
                    e
                ))
            })?;
            pages.push(Document::page(text, &source, index as u32));
        }

        log::debug!("Loaded {} pages from {}", pages.len(), path.display());
        Ok(pages)
    }
}

/// Load a plain text file as a single page
pub fn load_text_file<P: AsRef<Path>>(path: P) -> Result<Vec<Document>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    Ok(vec![Document::page(text, &path.to_string_lossy(), 0)])
}

/// Load any supported document, choosing the loader from the extension
pub fn load_documents<P: AsRef<Path>>(path: P) -> Result<Vec<Document>> {
    let path = path.as_ref();
    match get_file_extension(path).as_deref() {
        Some("pdf") => PdfProcessor::load_pages(path),
        Some("txt") | Some("md") | Some("markdown") => load_text_file(path),
        _ => Err(QaBotError::TextProcessing(format!(
            "Unsupported document type: {}",
            path.display()
        ))),
    }
}

/// Write a minimal PDF with one line of text per page
#[cfg(test)]
pub(crate) fn write_test_pdf(path: &Path, pages: &[&str]) {
    use lopdf::content::{Content, Operation};
    use lopdf::{Object, Stream, dictionary};

    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let page_count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}
