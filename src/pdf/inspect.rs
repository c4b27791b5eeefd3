//! Read-only inspection of page resources
//!
//! Used to check a document before and after cleaning: which resources a
//! page declares, and which nested objects still borrow resources from the
//! scope they are used in instead of declaring their own.

use std::collections::HashSet;
use lopdf::{Dictionary, Document, Object, ObjectId};
use crate::error::Result;
use super::interpret::interpret;
use super::objects::{get_dict, owned_scope, resolve_dict, FontKind, ResourceCategory, XObjectKind};
use super::page::{Page, PageContents};
use super::processor::new_pipeline;

/// Resource names grouped by category, in walk order
pub type ResourceNames = Vec<(ResourceCategory, Vec<String>)>;

/// Resources declared by a page
#[derive(Debug, Clone)]
pub struct PageSummary {
    pub id: ObjectId,
    pub contents: PageContents,
    pub resources: ResourceNames,
    pub has_procset: bool,
}

/// Kind of nested object that can fall back on its user's resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestedKind {
    Form,
    SoftMask,
    Type3Font,
}

/// A nested object without its own `Resources` that looks resources up in
/// the enclosing scope
#[derive(Debug, Clone)]
pub struct InheritedLookup {
    pub kind: NestedKind,
    /// `None` for a font stored directly in a resource dictionary
    pub id: Option<ObjectId>,
    /// Name it is registered under in the enclosing resource dictionary
    pub name: String,
    /// Resources it finds in the enclosing scope
    pub resources: ResourceNames,
}

/// List the resource names declared (directly or by inheritance) for a page
pub fn summarize_page(doc: &Document, page_id: ObjectId) -> Result<PageSummary> {
    let page = Page::load(doc, page_id)?;
    let scope = page.scope(doc);
    let resources = scope
        .as_ref()
        .map(|scope| resource_names(doc, scope))
        .unwrap_or_default();
    let has_procset = scope.as_ref().is_some_and(|scope| scope.has(b"ProcSet"));

    Ok(PageSummary {
        id: page_id,
        contents: page.contents,
        resources,
        has_procset,
    })
}

/// Find form XObjects, soft-mask groups and Type3 fonts reachable from a
/// page's resources that use resources without declaring their own.
///
/// Empty for a page that has been cleaned. Tiling patterns are not
/// reported; they never get resources of their own.
pub fn find_inherited_lookups(doc: &Document, page_id: ObjectId) -> Result<Vec<InheritedLookup>> {
    let page = Page::load(doc, page_id)?;
    let mut found = Vec::new();
    let mut visited = HashSet::new();
    if let Some(scope) = page.scope(doc) {
        walk(doc, &scope, &mut visited, &mut found)?;
    }
    Ok(found)
}

fn resource_names(doc: &Document, resources: &Dictionary) -> ResourceNames {
    ResourceCategory::NAMED
        .iter()
        .filter_map(|&category| {
            let entries = get_dict(doc, resources, category.key())?;
            let names = entries
                .iter()
                .map(|(name, _)| String::from_utf8_lossy(name).into_owned())
                .collect();
            Some((category, names))
        })
        .collect()
}

fn walk(
    doc: &Document,
    scope: &Dictionary,
    visited: &mut HashSet<ObjectId>,
    found: &mut Vec<InheritedLookup>,
) -> Result<()> {
    if let Some(xobjects) = get_dict(doc, scope, b"XObject") {
        for (name, xobject) in xobjects.iter() {
            let Ok(id) = xobject.as_reference() else { continue };
            if resolve_dict(doc, xobject).map(XObjectKind::of) == Some(XObjectKind::Form) {
                check_stream(doc, NestedKind::Form, id, name, scope, visited, found)?;
            }
        }
    }

    if let Some(states) = get_dict(doc, scope, b"ExtGState") {
        for (name, state) in states.iter() {
            let group = resolve_dict(doc, state)
                .and_then(|state| get_dict(doc, state, b"SMask"))
                .and_then(|smask| smask.get(b"G").ok())
                .and_then(|group| group.as_reference().ok());
            if let Some(id) = group {
                check_stream(doc, NestedKind::SoftMask, id, name, scope, visited, found)?;
            }
        }
    }

    if let Some(fonts) = get_dict(doc, scope, b"Font") {
        for (name, font) in fonts.iter() {
            let Some(dict) = resolve_dict(doc, font) else { continue };
            if FontKind::of(dict) != FontKind::Type3 {
                continue;
            }
            let id = font.as_reference().ok();
            if let Some(id) = id {
                if !visited.insert(id) {
                    continue;
                }
            }
            check_type3(doc, id, name, dict, scope, visited, found)?;
        }
    }

    Ok(())
}

fn check_stream(
    doc: &Document,
    kind: NestedKind,
    id: ObjectId,
    name: &[u8],
    scope: &Dictionary,
    visited: &mut HashSet<ObjectId>,
    found: &mut Vec<InheritedLookup>,
) -> Result<()> {
    if !visited.insert(id) {
        return Ok(());
    }
    let own = match doc.get_object(id)? {
        Object::Stream(stream) => owned_scope(doc, stream.dict.get(b"Resources").ok()),
        _ => None,
    };

    match own {
        Some(own) => walk(doc, &own, visited, found),
        None => {
            let used = used_resources(doc, &[id], scope)?;
            record(doc, kind, Some(id), name, &used, found);
            Ok(())
        }
    }
}

fn check_type3(
    doc: &Document,
    id: Option<ObjectId>,
    name: &[u8],
    font: &Dictionary,
    scope: &Dictionary,
    visited: &mut HashSet<ObjectId>,
    found: &mut Vec<InheritedLookup>,
) -> Result<()> {
    if let Some(own) = owned_scope(doc, font.get(b"Resources").ok()) {
        return walk(doc, &own, visited, found);
    }

    let glyphs: Vec<ObjectId> = get_dict(doc, font, b"CharProcs")
        .map(|procs| procs.iter().filter_map(|(_, glyph)| glyph.as_reference().ok()).collect())
        .unwrap_or_default();
    let used = used_resources(doc, &glyphs, scope)?;
    record(doc, NestedKind::Type3Font, id, name, &used, found);
    Ok(())
}

/// Resources from `scope` that the given content streams refer to
fn used_resources(doc: &Document, streams: &[ObjectId], scope: &Dictionary) -> Result<Dictionary> {
    let mut used = Dictionary::new();
    for &id in streams {
        let mut scratch = Vec::new();
        let mut pipeline = new_pipeline(&mut scratch, doc, Some(scope), &mut used);
        interpret(&mut pipeline, doc, &Object::Reference(id), None)?;
    }
    Ok(used)
}

fn record(
    doc: &Document,
    kind: NestedKind,
    id: Option<ObjectId>,
    name: &[u8],
    used: &Dictionary,
    found: &mut Vec<InheritedLookup>,
) {
    if used.is_empty() {
        return;
    }
    found.push(InheritedLookup {
        kind,
        id,
        name: String::from_utf8_lossy(name).into_owned(),
        resources: resource_names(doc, used),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::clean::Cleaner;
    use lopdf::{dictionary, Stream};

    fn page_with(doc: &mut Document, content: &[u8], resources: Dictionary) -> ObjectId {
        let content = doc.add_object(Stream::new(dictionary! {}, content.to_vec()));
        doc.add_object(dictionary! {
            "Type" => "Page",
            "Contents" => content,
            "Resources" => resources,
        })
    }

    #[test]
    fn test_summarize_page_lists_names() {
        let mut doc = Document::with_version("1.5");
        let page_id = page_with(
            &mut doc,
            b"0 0 m",
            dictionary! {
                "Font" => dictionary! { "F1" => dictionary! {}, "F2" => dictionary! {} },
                "ProcSet" => vec![Object::Name(b"PDF".to_vec())],
            },
        );

        let summary = summarize_page(&doc, page_id).unwrap();

        assert_eq!(summary.resources.len(), 1);
        assert_eq!(summary.resources[0].0, ResourceCategory::Font);
        assert_eq!(summary.resources[0].1, vec!["F1".to_string(), "F2".to_string()]);
        assert!(summary.has_procset);
    }

    #[test]
    fn test_inherited_lookups_found_then_cleared() {
        let mut doc = Document::with_version("1.5");
        let f1 = doc.add_object(dictionary! { "Type" => "Font", "Subtype" => "Type1", "BaseFont" => "Helvetica" });
        let image = doc.add_object(Stream::new(dictionary! { "Subtype" => "Image" }, vec![0]));
        let form = doc.add_object(Stream::new(dictionary! { "Subtype" => "Form" }, b"BT /F1 9 Tf (f) Tj ET".to_vec()));
        let glyph = doc.add_object(Stream::new(dictionary! {}, b"/Im1 Do".to_vec()));
        let t3 = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type3",
            "CharProcs" => dictionary! { "g" => glyph },
        });
        let page_id = page_with(
            &mut doc,
            b"/X1 Do BT /T3 1 Tf (g) Tj ET",
            dictionary! {
                "Font" => dictionary! { "F1" => f1, "T3" => t3 },
                "XObject" => dictionary! { "X1" => form, "Im1" => image },
            },
        );

        let before = find_inherited_lookups(&doc, page_id).unwrap();
        let kinds: Vec<_> = before.iter().map(|lookup| lookup.kind).collect();
        assert_eq!(kinds, vec![NestedKind::Form, NestedKind::Type3Font]);
        assert_eq!(before[0].id, Some(form));
        assert_eq!(before[0].resources, vec![(ResourceCategory::Font, vec!["F1".to_string()])]);
        assert_eq!(before[1].name, "T3");

        let mut page = Page::load(&doc, page_id).unwrap();
        Cleaner::new(None).clean_page_contents(&mut doc, &mut page, None).unwrap();

        assert!(find_inherited_lookups(&doc, page_id).unwrap().is_empty());
    }

    #[test]
    fn test_form_using_nothing_is_not_reported() {
        let mut doc = Document::with_version("1.5");
        let form = doc.add_object(Stream::new(dictionary! { "Subtype" => "Form" }, b"0 0 m 1 1 l S".to_vec()));
        let page_id = page_with(&mut doc, b"/X1 Do", dictionary! { "XObject" => dictionary! { "X1" => form } });

        assert!(find_inherited_lookups(&doc, page_id).unwrap().is_empty());
    }
}
