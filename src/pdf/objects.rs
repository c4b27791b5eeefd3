//! Object graph helpers and the closed variants used to dispatch on
//! resource categories and subtypes

use lopdf::{Dictionary, Document, Object, ObjectId};
use crate::error::{Error, Result};

/// Longest chain of references followed before giving up
const MAX_REFERENCE_CHAIN: usize = 32;

/// Resource dictionary categories, in the order the cleaner walks them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceCategory {
    ExtGState,
    ColorSpace,
    Pattern,
    Shading,
    XObject,
    Font,
    Properties,
    ProcSet,
}

impl ResourceCategory {
    /// Categories holding named sub-resources, in walk order
    pub const NAMED: [ResourceCategory; 7] = [
        ResourceCategory::ExtGState,
        ResourceCategory::ColorSpace,
        ResourceCategory::Pattern,
        ResourceCategory::Shading,
        ResourceCategory::XObject,
        ResourceCategory::Font,
        ResourceCategory::Properties,
    ];

    pub fn key(self) -> &'static [u8] {
        match self {
            ResourceCategory::ExtGState => b"ExtGState",
            ResourceCategory::ColorSpace => b"ColorSpace",
            ResourceCategory::Pattern => b"Pattern",
            ResourceCategory::Shading => b"Shading",
            ResourceCategory::XObject => b"XObject",
            ResourceCategory::Font => b"Font",
            ResourceCategory::Properties => b"Properties",
            ResourceCategory::ProcSet => b"ProcSet",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ResourceCategory::ExtGState => "ExtGState",
            ResourceCategory::ColorSpace => "ColorSpace",
            ResourceCategory::Pattern => "Pattern",
            ResourceCategory::Shading => "Shading",
            ResourceCategory::XObject => "XObject",
            ResourceCategory::Font => "Font",
            ResourceCategory::Properties => "Properties",
            ResourceCategory::ProcSet => "ProcSet",
        }
    }
}

/// XObject `Subtype`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XObjectKind {
    Form,
    Image,
    PostScript,
    Unknown,
}

impl XObjectKind {
    pub fn of(dict: &Dictionary) -> Self {
        match subtype(dict) {
            Some(b"Form") => XObjectKind::Form,
            Some(b"Image") => XObjectKind::Image,
            Some(b"PS") => XObjectKind::PostScript,
            _ => XObjectKind::Unknown,
        }
    }
}

/// Font `Subtype`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontKind {
    Type0,
    Type1,
    MMType1,
    TrueType,
    Type3,
    Unknown,
}

impl FontKind {
    pub fn of(dict: &Dictionary) -> Self {
        match subtype(dict) {
            Some(b"Type0") => FontKind::Type0,
            Some(b"Type1") => FontKind::Type1,
            Some(b"MMType1") => FontKind::MMType1,
            Some(b"TrueType") => FontKind::TrueType,
            Some(b"Type3") => FontKind::Type3,
            _ => FontKind::Unknown,
        }
    }
}

/// Pattern `PatternType`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// Code 1, carries a content stream
    Tiling,
    /// Code 2, no content stream
    Shading,
    Unknown,
}

impl PatternKind {
    pub fn of(dict: &Dictionary) -> Self {
        // Some writers store the code as a real
        let code = match dict.get(b"PatternType") {
            Ok(Object::Integer(code)) => *code as f64,
            Ok(Object::Real(code)) => *code as f64,
            _ => return PatternKind::Unknown,
        };
        if code == 1.0 {
            PatternKind::Tiling
        } else if code == 2.0 {
            PatternKind::Shading
        } else {
            PatternKind::Unknown
        }
    }
}

fn subtype(dict: &Dictionary) -> Option<&[u8]> {
    match dict.get(b"Subtype") {
        Ok(Object::Name(name)) => Some(name.as_slice()),
        _ => None,
    }
}

/// Follow references until a direct object is reached
pub fn resolve<'a>(doc: &'a Document, mut object: &'a Object) -> Result<&'a Object> {
    for _ in 0..MAX_REFERENCE_CHAIN {
        match object {
            Object::Reference(id) => object = doc.get_object(*id)?,
            direct => return Ok(direct),
        }
    }
    Err(Error::General("Reference chain too long".to_string()))
}

/// Resolve an object to a dictionary; streams yield their stream dictionary.
/// Dangling references and non-dictionary objects yield `None`.
pub fn resolve_dict<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, object).ok()? {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

/// Look up `key` in `dict` and resolve the value to a dictionary
pub fn get_dict<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
    dict.get(key).ok().and_then(|value| resolve_dict(doc, value))
}

/// Owned copy of a resource scope, detached from the document so the
/// document can be mutated while the scope is in use
pub fn owned_scope(doc: &Document, object: Option<&Object>) -> Option<Dictionary> {
    object.and_then(|obj| resolve_dict(doc, obj)).cloned()
}

/// Raw (decoded) bytes of a content stream
pub fn stream_bytes(doc: &Document, id: ObjectId) -> Result<Vec<u8>> {
    match doc.get_object(id)? {
        Object::Stream(stream) => {
            if stream.dict.has(b"Filter") {
                Ok(stream.decompressed_content()?)
            } else {
                Ok(stream.content.clone())
            }
        }
        _ => Err(Error::NotAStream(id)),
    }
}

/// Replace a stream's payload with unfiltered bytes, keeping its identity.
/// `Filter` and `DecodeParms` are dropped along with the old payload.
pub fn replace_stream_bytes(doc: &mut Document, id: ObjectId, bytes: Vec<u8>) -> Result<()> {
    match doc.get_object_mut(id)? {
        Object::Stream(stream) => {
            stream.set_plain_content(bytes);
            Ok(())
        }
        _ => Err(Error::NotAStream(id)),
    }
}

/// Set `key` on the dictionary (or stream dictionary) stored at `id`
pub fn set_entry(doc: &mut Document, id: ObjectId, key: &[u8], value: Object) -> Result<()> {
    match doc.get_object_mut(id)? {
        Object::Dictionary(dict) => dict.set(key.to_vec(), value),
        Object::Stream(stream) => stream.dict.set(key.to_vec(), value),
        _ => return Err(Error::General(format!("Object {} {} R is not a dictionary", id.0, id.1))),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    #[test]
    fn test_subtype_dispatch_is_exact() {
        let form = dictionary! { "Subtype" => "Form" };
        let lower = dictionary! { "Subtype" => "form" };
        let missing = dictionary! {};
        let string = dictionary! { "Subtype" => Object::string_literal("Form") };

        assert_eq!(XObjectKind::of(&form), XObjectKind::Form);
        assert_eq!(XObjectKind::of(&lower), XObjectKind::Unknown);
        assert_eq!(XObjectKind::of(&missing), XObjectKind::Unknown);
        assert_eq!(XObjectKind::of(&string), XObjectKind::Unknown);
        assert_eq!(FontKind::of(&dictionary! { "Subtype" => "Type3" }), FontKind::Type3);
    }

    #[test]
    fn test_pattern_kind() {
        assert_eq!(PatternKind::of(&dictionary! { "PatternType" => 1 }), PatternKind::Tiling);
        assert_eq!(PatternKind::of(&dictionary! { "PatternType" => 2 }), PatternKind::Shading);
        assert_eq!(PatternKind::of(&dictionary! { "PatternType" => 1.0 }), PatternKind::Tiling);
        assert_eq!(PatternKind::of(&dictionary! { "PatternType" => 2.0 }), PatternKind::Shading);
        assert_eq!(PatternKind::of(&dictionary! { "PatternType" => 1.5 }), PatternKind::Unknown);
        assert_eq!(PatternKind::of(&dictionary! { "PatternType" => "Tiling" }), PatternKind::Unknown);
        assert_eq!(PatternKind::of(&dictionary! {}), PatternKind::Unknown);
    }

    #[test]
    fn test_resolve_follows_references() {
        let mut doc = Document::with_version("1.5");
        let inner = doc.add_object(dictionary! { "Type" => "Font" });
        let outer = doc.add_object(Object::Reference(inner));

        let reference = Object::Reference(outer);
        let resolved = resolve(&doc, &reference).unwrap();
        assert_eq!(resolved.as_dict().unwrap().get(b"Type").unwrap().as_name().unwrap(), b"Font");
    }

    #[test]
    fn test_replace_stream_bytes_drops_filters() {
        let mut doc = Document::with_version("1.5");
        let id = doc.add_object(Stream::new(
            dictionary! { "Filter" => "FlateDecode", "DecodeParms" => dictionary! {} },
            b"garbage".to_vec(),
        ));

        replace_stream_bytes(&mut doc, id, b"q Q\n".to_vec()).unwrap();

        let stream = doc.get_object(id).unwrap().as_stream().unwrap();
        assert!(!stream.dict.has(b"Filter"));
        assert!(!stream.dict.has(b"DecodeParms"));
        assert_eq!(stream.content, b"q Q\n");
        assert_eq!(stream_bytes(&doc, id).unwrap(), b"q Q\n");
    }

    #[test]
    fn test_stream_bytes_rejects_dictionary() {
        let mut doc = Document::with_version("1.5");
        let id = doc.add_object(dictionary! {});
        assert!(matches!(stream_bytes(&doc, id), Err(Error::NotAStream(_))));
    }
}
