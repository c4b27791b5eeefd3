//! Page handle: content stream container and effective resource scope

use lopdf::{Dictionary, Document, Object, ObjectId};
use crate::error::{Error, Result};
use super::objects::{owned_scope, resolve};

/// Maximum number of `Parent` hops followed when looking up inherited resources
const MAX_PAGE_TREE_DEPTH: usize = 64;

/// Where a page's content stream lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageContents {
    /// A single content stream object
    Stream(ObjectId),
    /// An array of stream fragments to be read in order
    Fragments(Vec<ObjectId>),
    /// No `Contents` entry
    Empty,
}

impl PageContents {
    /// The `Contents` value to hand to the content interpreter
    pub fn to_object(&self) -> Option<Object> {
        match self {
            PageContents::Stream(id) => Some(Object::Reference(*id)),
            PageContents::Fragments(ids) => Some(Object::Array(
                ids.iter().map(|&id| Object::Reference(id)).collect(),
            )),
            PageContents::Empty => None,
        }
    }
}

/// A page being cleaned
#[derive(Debug, Clone)]
pub struct Page {
    /// The page dictionary; cleaned entries are re-attached here
    pub id: ObjectId,
    pub contents: PageContents,
    /// Effective resource scope, including resources inherited from the page tree
    pub resources: Option<Object>,
}

impl Page {
    /// Load the page dictionary at `id`
    pub fn load(doc: &Document, id: ObjectId) -> Result<Self> {
        let dict = doc.get_dictionary(id)?;
        let contents = match dict.get(b"Contents") {
            Ok(contents) => read_contents(doc, contents)?,
            Err(_) => PageContents::Empty,
        };
        let resources = inherited_resources(doc, dict)?;

        Ok(Page { id, contents, resources })
    }

    /// Load page number `page_number` (1-based)
    pub fn load_number(doc: &Document, page_number: u32) -> Result<Self> {
        let id = doc
            .get_pages()
            .get(&page_number)
            .copied()
            .ok_or(Error::PageNotFound(page_number))?;
        Self::load(doc, id)
    }

    /// Owned copy of the resolved resource scope
    pub fn scope(&self, doc: &Document) -> Option<Dictionary> {
        owned_scope(doc, self.resources.as_ref())
    }
}

fn read_contents(doc: &Document, contents: &Object) -> Result<PageContents> {
    match contents {
        Object::Reference(id) => match doc.get_object(*id)? {
            Object::Array(items) => Ok(PageContents::Fragments(fragment_ids(items))),
            _ => Ok(PageContents::Stream(*id)),
        },
        Object::Array(items) => Ok(PageContents::Fragments(fragment_ids(items))),
        Object::Null => Ok(PageContents::Empty),
        _ => Err(Error::General("Page Contents is neither a reference nor an array".to_string())),
    }
}

fn fragment_ids(items: &[Object]) -> Vec<ObjectId> {
    items.iter().filter_map(|item| item.as_reference().ok()).collect()
}

/// `Resources` is inheritable: walk up the `Parent` chain until one is found
fn inherited_resources(doc: &Document, page: &Dictionary) -> Result<Option<Object>> {
    let mut node = page;
    for _ in 0..MAX_PAGE_TREE_DEPTH {
        if let Ok(resources) = node.get(b"Resources") {
            return Ok(Some(resources.clone()));
        }
        node = match node.get(b"Parent") {
            Ok(parent) => match resolve(doc, parent)? {
                Object::Dictionary(dict) => dict,
                _ => return Ok(None),
            },
            Err(_) => return Ok(None),
        };
    }
    Err(Error::General("Page tree too deep".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    #[test]
    fn test_load_inherits_resources_from_parent() {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(Stream::new(dictionary! {}, b"q Q".to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(pages_id, Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => dictionary! { "ProcSet" => vec![Object::Name(b"PDF".to_vec())] },
        }));

        let page = Page::load(&doc, page_id).unwrap();
        assert_eq!(page.contents, PageContents::Stream(content_id));
        let scope = page.scope(&doc).unwrap();
        assert!(scope.has(b"ProcSet"));
    }

    #[test]
    fn test_load_indirect_fragment_array() {
        let mut doc = Document::with_version("1.5");
        let a = doc.add_object(Stream::new(dictionary! {}, b"q".to_vec()));
        let b = doc.add_object(Stream::new(dictionary! {}, b"Q".to_vec()));
        let array_id = doc.add_object(vec![Object::Reference(a), Object::Reference(b)]);
        let page_id = doc.add_object(dictionary! { "Type" => "Page", "Contents" => array_id });

        let page = Page::load(&doc, page_id).unwrap();
        assert_eq!(page.contents, PageContents::Fragments(vec![a, b]));
        assert!(page.resources.is_none());
    }

    #[test]
    fn test_load_without_contents() {
        let mut doc = Document::with_version("1.5");
        let page_id = doc.add_object(dictionary! { "Type" => "Page" });

        let page = Page::load(&doc, page_id).unwrap();
        assert_eq!(page.contents, PageContents::Empty);
        assert!(page.contents.to_object().is_none());
    }
}
