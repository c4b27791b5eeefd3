//! Page content cleaning
//!
//! Every content stream reachable from a page is re-emitted through the
//! filter/buffer pipeline and given a freshly built resource dictionary that
//! holds only what the stream actually uses. Type3 fonts and form XObjects
//! may omit their own resources and fall back on the page's; cleaning
//! flattens that away so each nested object carries its own `Resources`.
//!
//! Failures are not rolled back. Nested objects cleaned before a failure
//! keep their new payload and resources; the page itself is only committed
//! once everything beneath it has succeeded. New objects are added to the
//! document only when they are attached, so a failed clean never leaves
//! unreachable objects behind.

use std::collections::HashSet;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, instrument, warn};
use crate::cookie::Cookie;
use crate::error::{CleanPhase, Error, Result};
use super::interpret::interpret;
use super::objects::{
    get_dict, owned_scope, replace_stream_bytes, resolve_dict, set_entry, FontKind, PatternKind,
    ResourceCategory, XObjectKind,
};
use super::page::{Page, PageContents};
use super::processor::new_pipeline;

/// Default limit on nested object depth (forms within forms, etc.)
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Hook run on the page's new content and resources just before they are
/// committed. It may modify both but must not keep them.
pub type PostProcess<'f> = dyn FnMut(&mut Vec<u8>, &mut Dictionary) -> Result<()> + 'f;

/// Counts of objects cleaned
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanStats {
    pub pages: usize,
    pub forms: usize,
    pub soft_masks: usize,
    pub tiling_patterns: usize,
    pub type3_fonts: usize,
    pub glyph_procs: usize,
}

/// Kind of nested stream object found in a resource dictionary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NestedStream {
    /// Transparency group of a soft mask
    SoftMask,
    /// Tiling pattern; its resources stay as they are
    TilingPattern,
    /// Form XObject
    Form,
}

impl NestedStream {
    fn owns_resources(self) -> bool {
        !matches!(self, NestedStream::TilingPattern)
    }
}

/// Where a Type3 font lives
#[derive(Debug, Clone)]
enum FontSlot {
    Indirect(ObjectId),
    /// Stored inline under this name in the resource dictionary's `Font` entry
    Direct(Vec<u8>),
}

/// Nested objects collected from a resource dictionary, in walk order
#[derive(Debug, Default)]
struct NestedObjects {
    streams: Vec<(ObjectId, NestedStream)>,
    type3_fonts: Vec<FontSlot>,
}

impl NestedObjects {
    fn collect(doc: &Document, resources: &Dictionary) -> Self {
        let mut nested = NestedObjects::default();

        for category in ResourceCategory::NAMED {
            let Some(entries) = get_dict(doc, resources, category.key()) else {
                continue;
            };

            match category {
                ResourceCategory::ExtGState => {
                    for (_, state) in entries.iter() {
                        let group = resolve_dict(doc, state)
                            .and_then(|state| get_dict(doc, state, b"SMask"))
                            .and_then(|smask| smask.get(b"G").ok())
                            .and_then(|group| group.as_reference().ok());
                        if let Some(id) = group {
                            nested.streams.push((id, NestedStream::SoftMask));
                        }
                    }
                }
                ResourceCategory::Pattern => {
                    for (_, pattern) in entries.iter() {
                        let Ok(id) = pattern.as_reference() else { continue };
                        if resolve_dict(doc, pattern).map(PatternKind::of) == Some(PatternKind::Tiling) {
                            nested.streams.push((id, NestedStream::TilingPattern));
                        }
                    }
                }
                ResourceCategory::XObject => {
                    for (_, xobject) in entries.iter() {
                        let Ok(id) = xobject.as_reference() else { continue };
                        if resolve_dict(doc, xobject).map(XObjectKind::of) == Some(XObjectKind::Form) {
                            nested.streams.push((id, NestedStream::Form));
                        }
                    }
                }
                ResourceCategory::Font => {
                    for (name, font) in entries.iter() {
                        if resolve_dict(doc, font).map(FontKind::of) != Some(FontKind::Type3) {
                            continue;
                        }
                        let slot = match font {
                            Object::Reference(id) => FontSlot::Indirect(*id),
                            _ => FontSlot::Direct(name.clone()),
                        };
                        nested.type3_fonts.push(slot);
                    }
                }
                // Opaque data, nothing to clean
                ResourceCategory::ColorSpace
                | ResourceCategory::Shading
                | ResourceCategory::Properties
                | ResourceCategory::ProcSet => {}
            }
        }

        nested
    }
}

/// Drives the cleaning of pages and everything nested beneath them.
///
/// A `Cleaner` remembers which objects it has already cleaned, so shared
/// forms, groups and fonts are rewritten once however many pages use them,
/// and reference cycles terminate.
pub struct Cleaner<'c> {
    cookie: Option<&'c Cookie>,
    max_depth: usize,
    depth: usize,
    cleaned: HashSet<ObjectId>,
    stats: CleanStats,
}

impl<'c> Cleaner<'c> {
    pub fn new(cookie: Option<&'c Cookie>) -> Self {
        Self {
            cookie,
            max_depth: DEFAULT_MAX_DEPTH,
            depth: 0,
            cleaned: HashSet::new(),
            stats: CleanStats::default(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn stats(&self) -> &CleanStats {
        &self.stats
    }

    /// Clean a page's content stream and replace its resource dictionary.
    ///
    /// The page's contents (a single stream or an array of fragments) are
    /// interpreted against its resources into one new stream. Soft-mask
    /// groups, tiling patterns, form XObjects and Type3 fonts used by the
    /// page are then cleaned recursively. Finally the page gets the new
    /// stream and a new, minimal `Resources` dictionary.
    #[instrument(skip_all, fields(page = ?page.id))]
    pub fn clean_page_contents(
        &mut self,
        doc: &mut Document,
        page: &mut Page,
        post_process: Option<&mut PostProcess<'_>>,
    ) -> Result<()> {
        self.clean_page(doc, page, post_process)
            .map_err(|e| e.in_phase(CleanPhase::Page))
    }

    fn clean_page(
        &mut self,
        doc: &mut Document,
        page: &mut Page,
        post_process: Option<&mut PostProcess<'_>>,
    ) -> Result<()> {
        // The page must still be a dictionary when we commit
        doc.get_dictionary(page.id)?;

        let scope = page.scope(doc);
        let contents = page.contents.to_object().unwrap_or(Object::Null);
        let mut resources = Dictionary::new();
        let mut buffer = self.filter_contents(doc, &contents, scope.as_ref(), &mut resources)?;

        self.flatten_resources(doc, &mut resources, scope.as_ref())?;

        // ProcSet carries nothing to clean; inherit it as is
        if let Some(procset) = scope.as_ref().and_then(|scope| scope.get(b"ProcSet").ok()) {
            resources.set("ProcSet", procset.clone());
        }

        if let Some(post_process) = post_process {
            post_process(&mut buffer, &mut resources)?;
        }

        let content_id = match page.contents {
            PageContents::Stream(id) => {
                replace_stream_bytes(doc, id, buffer)?;
                id
            }
            PageContents::Fragments(_) | PageContents::Empty => {
                doc.add_object(Stream::new(Dictionary::new(), buffer))
            }
        };
        let resources_id = doc.add_object(resources);

        let page_dict = doc.get_object_mut(page.id)?.as_dict_mut()?;
        page_dict.set("Contents", Object::Reference(content_id));
        page_dict.set("Resources", Object::Reference(resources_id));

        page.contents = PageContents::Stream(content_id);
        page.resources = Some(Object::Reference(resources_id));
        self.stats.pages += 1;
        debug!(?content_id, ?resources_id, "page committed");

        Ok(())
    }

    /// Clean a stream object (form XObject, soft-mask group, tiling pattern).
    ///
    /// With `own_resources`, the object's own `Resources` (if any) takes the
    /// place of `scope` and is replaced by a new minimal dictionary; nested
    /// objects it uses are cleaned in turn. Without it, only the payload is
    /// rewritten. `None` is a no-op.
    pub fn clean_stream_object(
        &mut self,
        doc: &mut Document,
        id: Option<ObjectId>,
        scope: Option<&Dictionary>,
        own_resources: bool,
    ) -> Result<()> {
        let Some(id) = id else {
            return Ok(());
        };
        if !self.cleaned.insert(id) {
            debug!(?id, "already cleaned");
            return Ok(());
        }

        self.nested(|this| this.clean_stream(doc, id, scope, own_resources))
            .map_err(|e| e.in_phase(CleanPhase::XObject))
    }

    fn clean_stream(
        &mut self,
        doc: &mut Document,
        id: ObjectId,
        scope: Option<&Dictionary>,
        own_resources: bool,
    ) -> Result<()> {
        let own_scope = if own_resources {
            match doc.get_object(id)? {
                Object::Stream(stream) => owned_scope(doc, stream.dict.get(b"Resources").ok()),
                _ => return Err(Error::NotAStream(id)),
            }
        } else {
            None
        };
        let scope = own_scope.as_ref().or(scope);

        let mut resources = Dictionary::new();
        let buffer = self.filter_contents(doc, &Object::Reference(id), scope, &mut resources)?;
        replace_stream_bytes(doc, id, buffer)?;

        if own_resources {
            self.flatten_resources(doc, &mut resources, scope)?;
            let resources_id = doc.add_object(resources);
            set_entry(doc, id, b"Resources", Object::Reference(resources_id))?;
        }

        Ok(())
    }

    /// Clean every glyph procedure of a Type3 font and give the font one
    /// shared, minimal `Resources` dictionary.
    ///
    /// The font's own `Resources` takes the place of `scope` when present.
    /// `ProcSet` is carried over unchanged.
    pub fn clean_type3(
        &mut self,
        doc: &mut Document,
        font: &mut Dictionary,
        scope: Option<&Dictionary>,
    ) -> Result<()> {
        self.nested(|this| this.clean_glyph_procs(doc, font, scope))
            .map_err(|e| e.in_phase(CleanPhase::Type3))
    }

    fn clean_glyph_procs(
        &mut self,
        doc: &mut Document,
        font: &mut Dictionary,
        scope: Option<&Dictionary>,
    ) -> Result<()> {
        let own_scope = owned_scope(doc, font.get(b"Resources").ok());
        let scope = own_scope.as_ref().or(scope);

        let glyphs: Vec<ObjectId> = match get_dict(doc, font, b"CharProcs") {
            Some(char_procs) => char_procs
                .iter()
                .filter_map(|(name, glyph)| match glyph.as_reference() {
                    Ok(id) => Some(id),
                    Err(_) => {
                        warn!(glyph = %String::from_utf8_lossy(name), "glyph procedure is not a stream reference");
                        None
                    }
                })
                .collect(),
            None => Vec::new(),
        };

        let mut resources = Dictionary::new();
        for id in glyphs {
            let buffer = self.filter_contents(doc, &Object::Reference(id), scope, &mut resources)?;
            replace_stream_bytes(doc, id, buffer)?;
            self.stats.glyph_procs += 1;
        }

        if let Some(procset) = scope.and_then(|scope| scope.get(b"ProcSet").ok()) {
            resources.set("ProcSet", procset.clone());
        }

        self.flatten_resources(doc, &mut resources, scope)?;
        let resources_id = doc.add_object(resources);
        font.set("Resources", Object::Reference(resources_id));
        self.stats.type3_fonts += 1;

        Ok(())
    }

    /// Clean the Type3 font stored at `id`
    fn clean_type3_object(&mut self, doc: &mut Document, id: ObjectId, scope: Option<&Dictionary>) -> Result<()> {
        if !self.cleaned.insert(id) {
            debug!(?id, "already cleaned");
            return Ok(());
        }

        let mut font = doc
            .get_dictionary(id)
            .map_err(|e| Error::from(e).in_phase(CleanPhase::Type3))?
            .clone();
        self.clean_type3(doc, &mut font, scope)?;
        *doc.get_object_mut(id)? = Object::Dictionary(font);

        Ok(())
    }

    /// Walk a freshly built resource dictionary and clean every nested object
    /// that carries a content stream, falling back on `scope` for objects
    /// without resources of their own.
    fn flatten_resources(
        &mut self,
        doc: &mut Document,
        resources: &mut Dictionary,
        scope: Option<&Dictionary>,
    ) -> Result<()> {
        let nested = NestedObjects::collect(doc, resources);

        for (id, kind) in nested.streams {
            if self.cleaned.contains(&id) {
                continue;
            }
            debug!(?id, ?kind, "cleaning nested stream");
            self.clean_stream_object(doc, Some(id), scope, kind.owns_resources())?;
            match kind {
                NestedStream::SoftMask => self.stats.soft_masks += 1,
                NestedStream::TilingPattern => self.stats.tiling_patterns += 1,
                NestedStream::Form => self.stats.forms += 1,
            }
        }

        for slot in nested.type3_fonts {
            match slot {
                FontSlot::Indirect(id) => self.clean_type3_object(doc, id, scope)?,
                FontSlot::Direct(name) => {
                    if let Ok(Object::Dictionary(fonts)) = resources.get_mut(b"Font") {
                        if let Ok(Object::Dictionary(font)) = fonts.get_mut(&name) {
                            self.clean_type3(doc, font, scope)?;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Run `contents` through a fresh pipeline; returns the new stream bytes.
    /// Resources the stream uses are copied from `scope` into `resources`.
    fn filter_contents(
        &self,
        doc: &Document,
        contents: &Object,
        scope: Option<&Dictionary>,
        resources: &mut Dictionary,
    ) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(1024);
        {
            let mut pipeline = new_pipeline(&mut buffer, doc, scope, resources);
            interpret(&mut pipeline, doc, contents, self.cookie)?;
        }
        Ok(buffer)
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= self.max_depth {
            return Err(Error::RecursionLimit(self.max_depth));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }
}

/// Clean one page; see [`Cleaner::clean_page_contents`]
pub fn clean_page_contents(
    doc: &mut Document,
    page: &mut Page,
    cookie: Option<&Cookie>,
    post_process: Option<&mut PostProcess<'_>>,
) -> Result<()> {
    Cleaner::new(cookie).clean_page_contents(doc, page, post_process)
}

/// Clean one stream object; see [`Cleaner::clean_stream_object`]
pub fn clean_stream_object(
    doc: &mut Document,
    id: Option<ObjectId>,
    scope: Option<&Dictionary>,
    cookie: Option<&Cookie>,
    own_resources: bool,
) -> Result<()> {
    Cleaner::new(cookie).clean_stream_object(doc, id, scope, own_resources)
}

/// Clean one Type3 font; see [`Cleaner::clean_type3`]
pub fn clean_type3(
    doc: &mut Document,
    font: &mut Dictionary,
    scope: Option<&Dictionary>,
    cookie: Option<&Cookie>,
) -> Result<()> {
    Cleaner::new(cookie).clean_type3(doc, font, scope)
}
