//! Whole-document and whole-file cleaning

use std::path::PathBuf;
use lopdf::Document;
use tracing::{info, instrument};
use crate::cookie::Cookie;
use crate::error::{Error, Result};
use super::clean::{CleanStats, Cleaner, DEFAULT_MAX_DEPTH};
use super::page::Page;

/// Options for cleaning a document
#[derive(Debug, Clone)]
pub struct CleanOptions {
    /// 1-based page numbers to clean; `None` cleans every page
    pub pages: Option<Vec<u32>>,
    /// Recompress streams before saving
    pub compress: bool,
    /// Drop objects no longer reachable from the trailer
    pub prune_unused: bool,
    /// Limit on nested object depth
    pub max_depth: usize,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            pages: None,
            compress: true,
            prune_unused: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Outcome of cleaning a document
#[derive(Debug, Clone, Default)]
pub struct CleanReport {
    pub pages_cleaned: usize,
    pub stats: CleanStats,
    /// Objects removed by pruning
    pub objects_pruned: usize,
}

/// Clean the selected pages of `doc` in place.
///
/// All pages share one [`Cleaner`], so forms and fonts used on several pages
/// are cleaned once. Page numbers are checked before anything is modified.
#[instrument(skip_all)]
pub fn clean_document(doc: &mut Document, options: &CleanOptions, cookie: Option<&Cookie>) -> Result<CleanReport> {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(Error::General("Document has no pages".to_string()));
    }

    let selected: Vec<_> = match &options.pages {
        Some(numbers) => numbers
            .iter()
            .map(|n| pages.get(n).copied().ok_or(Error::PageNotFound(*n)))
            .collect::<Result<_>>()?,
        None => pages.values().copied().collect(),
    };

    let mut cleaner = Cleaner::new(cookie).with_max_depth(options.max_depth);
    for id in &selected {
        let mut page = Page::load(doc, *id)?;
        cleaner.clean_page_contents(doc, &mut page, None)?;
    }

    let objects_pruned = if options.prune_unused {
        doc.prune_objects().len()
    } else {
        0
    };

    if options.compress {
        doc.compress();
    }

    let report = CleanReport {
        pages_cleaned: selected.len(),
        stats: cleaner.stats().clone(),
        objects_pruned,
    };
    info!(
        pages = report.pages_cleaned,
        forms = report.stats.forms,
        type3_fonts = report.stats.type3_fonts,
        pruned = report.objects_pruned,
        "document cleaned"
    );

    Ok(report)
}

/// Clean a PDF file and save the result to `output`
///
/// # Example
///
/// ```no_run
/// use pdf_clean::pdf::{clean_pdf, CleanOptions};
/// use std::path::PathBuf;
///
/// let report = clean_pdf(
///     &PathBuf::from("input.pdf"),
///     &PathBuf::from("cleaned.pdf"),
///     &CleanOptions::default(),
/// ).expect("Failed to clean");
/// println!("{} pages cleaned", report.pages_cleaned);
/// ```
pub fn clean_pdf(input: &PathBuf, output: &PathBuf, options: &CleanOptions) -> Result<CleanReport> {
    if !input.exists() {
        return Err(Error::FileNotFound(input.clone()));
    }

    let mut doc = Document::load(input)?;

    if doc.get_pages().is_empty() {
        return Err(Error::EmptyPdf(input.clone()));
    }

    let report = clean_document(&mut doc, options, None)?;
    doc.save(output)?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Object, ObjectId, Stream};

    /// Two pages sharing one form; page 2 also has an unused font
    fn two_page_doc() -> (Document, ObjectId, ObjectId) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let unused = doc.add_object(dictionary! { "Type" => "Font", "Subtype" => "Type1", "BaseFont" => "Courier" });
        let form = doc.add_object(Stream::new(dictionary! { "Subtype" => "Form" }, b"0 0 m 9 9 l S".to_vec()));
        let resources = doc.add_object(dictionary! {
            "XObject" => dictionary! { "X1" => form },
            "Font" => dictionary! { "F9" => unused },
        });
        let mut kids = Vec::new();
        for _ in 0..2 {
            let content = doc.add_object(Stream::new(dictionary! {}, b"/X1 Do".to_vec()));
            kids.push(Object::Reference(doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content,
                "Resources" => resources,
            })));
        }
        doc.objects.insert(pages_id, Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => 2,
        }));
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog);
        (doc, form, unused)
    }

    #[test]
    fn test_clean_document_shares_nested_objects() {
        let (mut doc, _, unused) = two_page_doc();
        let options = CleanOptions { compress: false, ..CleanOptions::default() };

        let report = clean_document(&mut doc, &options, None).unwrap();

        assert_eq!(report.pages_cleaned, 2);
        assert_eq!(report.stats.pages, 2);
        assert_eq!(report.stats.forms, 1);
        assert!(report.objects_pruned >= 1);
        assert!(doc.get_object(unused).is_err());
    }

    #[test]
    fn test_clean_document_keeps_unused_when_asked() {
        let (mut doc, _, unused) = two_page_doc();
        let options = CleanOptions {
            compress: false,
            prune_unused: false,
            ..CleanOptions::default()
        };

        let report = clean_document(&mut doc, &options, None).unwrap();

        assert_eq!(report.objects_pruned, 0);
        assert!(doc.get_object(unused).is_ok());
    }

    #[test]
    fn test_clean_document_selected_pages() {
        let (mut doc, _, _) = two_page_doc();
        let options = CleanOptions { pages: Some(vec![2]), ..CleanOptions::default() };

        let report = clean_document(&mut doc, &options, None).unwrap();

        assert_eq!(report.pages_cleaned, 1);
    }

    #[test]
    fn test_clean_document_rejects_missing_page() {
        let (mut doc, _, _) = two_page_doc();
        let before = doc.objects.len();
        let options = CleanOptions { pages: Some(vec![1, 7]), ..CleanOptions::default() };

        let err = clean_document(&mut doc, &options, None).unwrap_err();

        assert!(matches!(err, Error::PageNotFound(7)));
        assert_eq!(doc.objects.len(), before);
    }

    #[test]
    fn test_clean_pdf_missing_input() {
        let err = clean_pdf(
            &PathBuf::from("/nonexistent/input.pdf"),
            &PathBuf::from("/nonexistent/output.pdf"),
            &CleanOptions::default(),
        )
        .unwrap_err();

        assert!(matches!(err, Error::FileNotFound(_)));
    }
}
