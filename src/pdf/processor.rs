//! Content stream processing pipeline
//!
//! A pipeline is a chain of [`Processor`]s. The interpreter feeds the head;
//! each stage forwards what it keeps to the next. The cleaner wires two
//! stages: a [`FilterProcessor`] that decides what survives and records the
//! resources used, in front of a [`BufferProcessor`] that serializes the
//! result.

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object};
use tracing::{debug, warn};
use crate::error::{Error, Result};
use super::interpret::operands_of;
use super::objects::{get_dict, ResourceCategory};

/// A stage in the content processing pipeline
pub trait Processor {
    /// Handle one operation
    fn process(&mut self, op: Operation) -> Result<()>;

    /// Called once after the last operation
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sink stage: serializes operations into a byte buffer
pub struct BufferProcessor<'a> {
    buffer: &'a mut Vec<u8>,
}

impl<'a> BufferProcessor<'a> {
    pub fn new(buffer: &'a mut Vec<u8>) -> Self {
        Self { buffer }
    }
}

impl BufferProcessor<'_> {
    /// Inline images are written back in `BI ... ID data EI` form; lopdf's
    /// encoder would write the image as a stream object
    fn write_inline_image(&mut self, op: Operation) -> Result<()> {
        for operand in op.operands {
            let Object::Stream(image) = operand else {
                return Err(Error::MalformedOperator {
                    operator: op.operator,
                    reason: "expected inline image data".to_string(),
                });
            };
            // `Length` is added by the tokenizer, not part of the image
            let entries: Vec<Object> = image
                .dict
                .iter()
                .filter(|(key, _)| key.as_slice() != b"Length")
                .flat_map(|(key, value)| [Object::Name(key.clone()), value.clone()])
                .collect();
            let header = Content { operations: vec![Operation::new("ID", entries)] }.encode()?;

            self.buffer.extend_from_slice(b"BI\n");
            self.buffer.extend_from_slice(&header);
            self.buffer.push(b' ');
            self.buffer.extend_from_slice(&image.content);
            self.buffer.extend_from_slice(b"\nEI\n");
        }
        Ok(())
    }
}

impl Processor for BufferProcessor<'_> {
    fn process(&mut self, op: Operation) -> Result<()> {
        if op.operator == "BI" {
            return self.write_inline_image(op);
        }
        let encoded = Content { operations: vec![op] }.encode()?;
        self.buffer.extend_from_slice(&encoded);
        self.buffer.push(b'\n');
        Ok(())
    }
}

/// Colour space names that never refer to the resource dictionary
const IMPLICIT_COLOR_SPACES: [&[u8]; 4] = [b"DeviceGray", b"DeviceRGB", b"DeviceCMYK", b"Pattern"];

/// Inline image colour space abbreviations
const INLINE_COLOR_SPACES: [&[u8]; 4] = [b"G", b"RGB", b"CMYK", b"I"];

/// Named colour space resource an inline image refers to, either directly or
/// as the base of an inline `Indexed` space
fn inline_color_space_name(space: &Object) -> Option<&[u8]> {
    let name = match space {
        Object::Name(name) => name.as_slice(),
        Object::Array(items) => match items.as_slice() {
            [Object::Name(family), Object::Name(base), ..]
                if family.as_slice() == b"I" || family.as_slice() == b"Indexed" =>
            {
                base.as_slice()
            }
            _ => return None,
        },
        _ => return None,
    };
    let implicit = IMPLICIT_COLOR_SPACES.contains(&name) || INLINE_COLOR_SPACES.contains(&name);
    (!implicit).then_some(name)
}

/// Filter stage: forwards the operations it keeps to `next` and copies every
/// resource they use from `scope` into `target`.
///
/// `target` only ever gains entries that a forwarded operation referenced.
/// Unmatched `Q`s are dropped and open `q`s are closed on `finish`; operators
/// outside the content stream language are dropped unless inside `BX`/`EX`.
pub struct FilterProcessor<'a, P: Processor> {
    next: P,
    doc: &'a Document,
    scope: Option<&'a Dictionary>,
    target: &'a mut Dictionary,
    save_depth: usize,
    compat_depth: usize,
}

impl<'a, P: Processor> FilterProcessor<'a, P> {
    pub fn new(next: P, doc: &'a Document, scope: Option<&'a Dictionary>, target: &'a mut Dictionary) -> Self {
        Self {
            next,
            doc,
            scope,
            target,
            save_depth: 0,
            compat_depth: 0,
        }
    }

    /// Copy `scope[category][name]` into `target[category][name]`
    fn use_resource(&mut self, category: ResourceCategory, name: &[u8]) {
        if self.target_has(category, name) {
            return;
        }

        let entry = self
            .scope
            .and_then(|scope| get_dict(self.doc, scope, category.key()))
            .and_then(|dict| dict.get(name).ok())
            .cloned();

        match entry {
            Some(value) => {
                if !self.target.has(category.key()) {
                    self.target.set(category.key().to_vec(), Dictionary::new());
                }
                if let Ok(Object::Dictionary(dict)) = self.target.get_mut(category.key()) {
                    dict.set(name.to_vec(), value);
                }
            }
            None => warn!(
                category = category.name(),
                name = %String::from_utf8_lossy(name),
                "referenced resource is missing from scope"
            ),
        }
    }

    fn target_has(&self, category: ResourceCategory, name: &[u8]) -> bool {
        matches!(
            self.target.get(category.key()),
            Ok(Object::Dictionary(dict)) if dict.has(name)
        )
    }

    fn record_resources(&mut self, op: &Operation) {
        let first_name = match op.operands.first() {
            Some(Object::Name(name)) => Some(name.as_slice()),
            _ => None,
        };

        match op.operator.as_str() {
            "Tf" => {
                if let Some(name) = first_name {
                    self.use_resource(ResourceCategory::Font, name);
                }
            }
            "Do" => {
                if let Some(name) = first_name {
                    self.use_resource(ResourceCategory::XObject, name);
                }
            }
            "gs" => {
                if let Some(name) = first_name {
                    self.use_resource(ResourceCategory::ExtGState, name);
                }
            }
            "sh" => {
                if let Some(name) = first_name {
                    self.use_resource(ResourceCategory::Shading, name);
                }
            }
            "cs" | "CS" => {
                if let Some(name) = first_name {
                    if !IMPLICIT_COLOR_SPACES.contains(&name) {
                        self.use_resource(ResourceCategory::ColorSpace, name);
                    }
                }
            }
            "scn" | "SCN" => {
                if let Some(Object::Name(name)) = op.operands.last() {
                    self.use_resource(ResourceCategory::Pattern, name);
                }
            }
            "BDC" | "DP" => {
                if let Some(Object::Name(name)) = op.operands.get(1) {
                    self.use_resource(ResourceCategory::Properties, name);
                }
            }
            "BI" => {
                for operand in &op.operands {
                    if let Object::Stream(image) = operand {
                        let space = image.dict.get(b"CS").or_else(|_| image.dict.get(b"ColorSpace"));
                        if let Ok(space) = space {
                            if let Some(name) = inline_color_space_name(space) {
                                self.use_resource(ResourceCategory::ColorSpace, name);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

impl<P: Processor> Processor for FilterProcessor<'_, P> {
    fn process(&mut self, op: Operation) -> Result<()> {
        match op.operator.as_str() {
            "q" => self.save_depth += 1,
            "Q" => {
                if self.save_depth == 0 {
                    debug!("dropping unbalanced Q");
                    return Ok(());
                }
                self.save_depth -= 1;
            }
            "BX" => self.compat_depth += 1,
            "EX" => self.compat_depth = self.compat_depth.saturating_sub(1),
            other => {
                if operands_of(other).is_none() && self.compat_depth == 0 {
                    debug!(operator = other, "dropping unknown operator");
                    return Ok(());
                }
            }
        }

        self.record_resources(&op);
        self.next.process(op)
    }

    fn finish(&mut self) -> Result<()> {
        while self.save_depth > 0 {
            self.next.process(Operation::new("Q", vec![]))?;
            self.save_depth -= 1;
        }
        self.next.finish()
    }
}

/// Wire a filter stage in front of a sink stage writing into `buffer`.
///
/// Resources used by the forwarded operations are looked up in `scope` and
/// copied into `target`. Dropping the returned head releases the filter and
/// then the sink.
pub fn new_pipeline<'a>(
    buffer: &'a mut Vec<u8>,
    doc: &'a Document,
    scope: Option<&'a Dictionary>,
    target: &'a mut Dictionary,
) -> FilterProcessor<'a, BufferProcessor<'a>> {
    FilterProcessor::new(BufferProcessor::new(buffer), doc, scope, target)
}
