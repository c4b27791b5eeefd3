//! Content stream interpreter
//!
//! Tokenizes content streams with lopdf's content parser, checks each known
//! operator's operands, and feeds the operations one by one into a
//! [`Processor`] pipeline.

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object};
use tracing::trace;
use crate::cookie::Cookie;
use crate::error::{Error, Result};
use super::objects::{resolve, stream_bytes};
use super::processor::Processor;

/// Operand shape expected by a content stream operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operands {
    None,
    Numbers(usize),
    Name,
    /// `Tf`: font name and size
    NameNumber,
    String,
    Array,
    /// `d`: dash array and phase
    ArrayNumber,
    /// `"`: word spacing, character spacing, string
    SpacedString,
    /// `sc`/`scn` and friends: components, optionally followed by a pattern name
    Color,
    /// `BDC`/`DP`: tag and property list (name or inline dictionary)
    Tagged,
    /// Inline image tokens, passed through as the tokenizer produced them
    Any,
}

/// Operand shape of a known operator, `None` for operators outside the language
pub(crate) fn operands_of(operator: &str) -> Option<Operands> {
    let shape = match operator {
        "q" | "Q" | "BT" | "ET" | "h" | "n" | "S" | "s" | "f" | "F" | "f*" | "B" | "B*"
        | "b" | "b*" | "W" | "W*" | "EMC" | "BX" | "EX" | "T*" => Operands::None,
        "w" | "J" | "j" | "M" | "i" | "Tc" | "Tw" | "Tz" | "TL" | "Tr" | "Ts" | "g" | "G" => {
            Operands::Numbers(1)
        }
        "m" | "l" | "Td" | "TD" | "d0" => Operands::Numbers(2),
        "rg" | "RG" => Operands::Numbers(3),
        "v" | "y" | "re" | "k" | "K" => Operands::Numbers(4),
        "cm" | "c" | "Tm" | "d1" => Operands::Numbers(6),
        "gs" | "cs" | "CS" | "sh" | "Do" | "MP" | "BMC" | "ri" => Operands::Name,
        "Tf" => Operands::NameNumber,
        "Tj" | "'" => Operands::String,
        "TJ" => Operands::Array,
        "d" => Operands::ArrayNumber,
        "\"" => Operands::SpacedString,
        "sc" | "SC" | "scn" | "SCN" => Operands::Color,
        "BDC" | "DP" => Operands::Tagged,
        "BI" | "ID" | "EI" => Operands::Any,
        _ => return None,
    };
    Some(shape)
}

fn is_number(object: &Object) -> bool {
    matches!(object, Object::Integer(_) | Object::Real(_))
}

fn malformed(op: &Operation, reason: impl Into<String>) -> Error {
    Error::MalformedOperator {
        operator: op.operator.clone(),
        reason: reason.into(),
    }
}

/// Check a known operator's operand count and types; unknown operators pass
pub(crate) fn validate(op: &Operation) -> Result<()> {
    let Some(shape) = operands_of(&op.operator) else {
        return Ok(());
    };
    let operands = op.operands.as_slice();

    let expect_count = |n: usize| {
        if operands.len() == n {
            Ok(())
        } else {
            Err(malformed(op, format!("expected {} operands, found {}", n, operands.len())))
        }
    };

    match shape {
        Operands::None => expect_count(0),
        Operands::Numbers(n) => {
            expect_count(n)?;
            if operands.iter().all(is_number) {
                Ok(())
            } else {
                Err(malformed(op, "expected numeric operands"))
            }
        }
        Operands::Name => {
            expect_count(1)?;
            match operands[0] {
                Object::Name(_) => Ok(()),
                _ => Err(malformed(op, "expected a name")),
            }
        }
        Operands::NameNumber => {
            expect_count(2)?;
            match (&operands[0], is_number(&operands[1])) {
                (Object::Name(_), true) => Ok(()),
                _ => Err(malformed(op, "expected a font name and size")),
            }
        }
        Operands::String => {
            expect_count(1)?;
            match operands[0] {
                Object::String(..) => Ok(()),
                _ => Err(malformed(op, "expected a string")),
            }
        }
        Operands::Array => {
            expect_count(1)?;
            match operands[0] {
                Object::Array(_) => Ok(()),
                _ => Err(malformed(op, "expected an array")),
            }
        }
        Operands::ArrayNumber => {
            expect_count(2)?;
            match (&operands[0], is_number(&operands[1])) {
                (Object::Array(_), true) => Ok(()),
                _ => Err(malformed(op, "expected a dash array and phase")),
            }
        }
        Operands::SpacedString => {
            expect_count(3)?;
            match (is_number(&operands[0]), is_number(&operands[1]), &operands[2]) {
                (true, true, Object::String(..)) => Ok(()),
                _ => Err(malformed(op, "expected two numbers and a string")),
            }
        }
        Operands::Color => {
            let (last, components) = match operands.split_last() {
                Some(split) => split,
                None => return Err(malformed(op, "expected colour components")),
            };
            let last_ok = is_number(last) || matches!(last, Object::Name(_));
            if last_ok && components.iter().all(is_number) {
                Ok(())
            } else {
                Err(malformed(op, "expected numeric components and an optional pattern name"))
            }
        }
        Operands::Tagged => {
            expect_count(2)?;
            match (&operands[0], &operands[1]) {
                (Object::Name(_), Object::Name(_) | Object::Dictionary(_)) => Ok(()),
                _ => Err(malformed(op, "expected a tag and a property list")),
            }
        }
        Operands::Any => Ok(()),
    }
}

/// Gather the bytes of a `Contents`-like object: a stream, a reference to a
/// stream or to an array, or an array of stream fragments (joined in order)
pub fn content_bytes(doc: &Document, contents: &Object) -> Result<Vec<u8>> {
    match contents {
        Object::Reference(id) => match doc.get_object(*id)? {
            Object::Stream(_) => stream_bytes(doc, *id),
            Object::Array(items) => fragment_bytes(doc, items),
            _ => Err(Error::NotAStream(*id)),
        },
        Object::Array(items) => fragment_bytes(doc, items),
        Object::Stream(stream) => {
            if stream.dict.has(b"Filter") {
                Ok(stream.decompressed_content()?)
            } else {
                Ok(stream.content.clone())
            }
        }
        Object::Null => Ok(Vec::new()),
        _ => Err(Error::General("Content is not a stream".to_string())),
    }
}

fn fragment_bytes(doc: &Document, items: &[Object]) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for item in items {
        match resolve(doc, item)? {
            Object::Stream(_) => {
                let id = item.as_reference()?;
                bytes.extend_from_slice(&stream_bytes(doc, id)?);
                // Fragments may end mid-line; keep tokens from fusing
                bytes.push(b'\n');
            }
            Object::Null => {}
            _ => return Err(Error::General("Content fragment is not a stream".to_string())),
        }
    }
    Ok(bytes)
}

/// The content tokenizer ends operators at the first digit, so `d0`/`d1`
/// arrive as `d` with the digit leading the next operation's operands.
/// An all-numeric `d` is never a dash pattern; stitch those back together.
fn rejoin_glyph_metrics(operations: &mut [Operation]) {
    for i in 0..operations.len() {
        let op = &operations[i];
        if op.operator != "d" || !op.operands.iter().all(is_number) {
            continue;
        }
        let (operator, digit) = match op.operands.len() {
            2 => ("d0", 0),
            6 => ("d1", 1),
            _ => continue,
        };
        operations[i].operator = operator.to_string();
        if let Some(next) = operations.get_mut(i + 1) {
            if matches!(next.operands.first(), Some(Object::Integer(n)) if *n == digit) {
                next.operands.remove(0);
            }
        }
    }
}

/// Interpret `contents` and drive `processor` one operation at a time.
///
/// The cookie is polled before every operation; an aborted cookie ends
/// interpretation with [`Error::Aborted`]. `finish` is called on the
/// processor once all operations are delivered.
pub fn interpret(
    processor: &mut dyn Processor,
    doc: &Document,
    contents: &Object,
    cookie: Option<&Cookie>,
) -> Result<()> {
    let bytes = content_bytes(doc, contents)?;
    let mut content = Content::decode(&bytes)?;
    rejoin_glyph_metrics(&mut content.operations);
    trace!(operations = content.operations.len(), "interpreting content stream");

    for op in content.operations {
        if let Some(cookie) = cookie {
            if cookie.is_aborted() {
                return Err(Error::Aborted);
            }
            cookie.advance();
        }
        validate(&op)?;
        processor.process(op)?;
    }

    processor.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    /// Records operator names
    #[derive(Default)]
    struct Recorder {
        operators: Vec<String>,
        finished: bool,
    }

    impl Processor for Recorder {
        fn process(&mut self, op: Operation) -> Result<()> {
            self.operators.push(op.operator);
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    fn doc_with_stream(content: &[u8]) -> (Document, Object) {
        let mut doc = Document::with_version("1.5");
        let id = doc.add_object(Stream::new(dictionary! {}, content.to_vec()));
        (doc, Object::Reference(id))
    }

    #[test]
    fn test_interpret_delivers_operations_in_order() {
        let (doc, contents) = doc_with_stream(b"q 1 0 0 1 10 10 cm BT /F1 12 Tf (Hi) Tj ET Q");
        let mut recorder = Recorder::default();

        interpret(&mut recorder, &doc, &contents, None).unwrap();

        assert_eq!(recorder.operators, vec!["q", "cm", "BT", "Tf", "Tj", "ET", "Q"]);
        assert!(recorder.finished);
    }

    #[test]
    fn test_interpret_joins_fragments() {
        let mut doc = Document::with_version("1.5");
        let a = doc.add_object(Stream::new(dictionary! {}, b"q 0 0 m".to_vec()));
        let b = doc.add_object(Stream::new(dictionary! {}, b"10 10 l S Q".to_vec()));
        let contents = Object::Array(vec![Object::Reference(a), Object::Reference(b)]);
        let mut recorder = Recorder::default();

        interpret(&mut recorder, &doc, &contents, None).unwrap();

        assert_eq!(recorder.operators, vec!["q", "m", "l", "S", "Q"]);
    }

    #[test]
    fn test_interpret_rejects_malformed_operator() {
        let (doc, contents) = doc_with_stream(b"q 1 0 0 cm Q");
        let mut recorder = Recorder::default();

        let err = interpret(&mut recorder, &doc, &contents, None).unwrap_err();

        assert!(matches!(err, Error::MalformedOperator { ref operator, .. } if operator == "cm"));
        assert!(!recorder.finished);
    }

    #[test]
    fn test_interpret_stops_on_aborted_cookie() {
        let (doc, contents) = doc_with_stream(b"q Q");
        let cookie = Cookie::new();
        cookie.abort();
        let mut recorder = Recorder::default();

        let err = interpret(&mut recorder, &doc, &contents, Some(&cookie)).unwrap_err();

        assert!(matches!(err, Error::Aborted));
        assert!(recorder.operators.is_empty());
    }

    #[test]
    fn test_interpret_counts_progress() {
        let (doc, contents) = doc_with_stream(b"0 0 m 5 5 l S");
        let cookie = Cookie::new();
        let mut recorder = Recorder::default();

        interpret(&mut recorder, &doc, &contents, Some(&cookie)).unwrap();

        assert_eq!(cookie.progress(), 3);
    }

    #[test]
    fn test_interpret_glyph_metrics_operators() {
        let (doc, contents) = doc_with_stream(b"500 0 d0\n0 0 m 10 10 l S\n");
        let mut recorder = Recorder::default();
        interpret(&mut recorder, &doc, &contents, None).unwrap();
        assert_eq!(recorder.operators, vec!["d0", "m", "l", "S"]);

        let (doc, contents) = doc_with_stream(b"500 0 0 0 750 750 d1\n0 0 750 750 re f\n");
        let mut recorder = Recorder::default();
        interpret(&mut recorder, &doc, &contents, None).unwrap();
        assert_eq!(recorder.operators, vec!["d1", "re", "f"]);
    }

    #[test]
    fn test_interpret_keeps_dash_pattern() {
        let (doc, contents) = doc_with_stream(b"[3 2] 0 d 0 0 m 5 5 l S");
        let mut recorder = Recorder::default();
        interpret(&mut recorder, &doc, &contents, None).unwrap();
        assert_eq!(recorder.operators, vec!["d", "m", "l", "S"]);
    }

    #[test]
    fn test_validate_shapes() {
        let ok = [
            Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(12)]),
            Operation::new("scn", vec![Object::Real(0.5), Object::Name(b"P1".to_vec())]),
            Operation::new("BDC", vec![Object::Name(b"OC".to_vec()), Object::Name(b"MC0".to_vec())]),
            Operation::new("foo", vec![Object::Integer(1)]),
        ];
        for op in &ok {
            assert!(validate(op).is_ok(), "{} should validate", op.operator);
        }

        let bad = [
            Operation::new("Do", vec![Object::Integer(1)]),
            Operation::new("Tf", vec![Object::Name(b"F1".to_vec())]),
            Operation::new("scn", vec![]),
            Operation::new("q", vec![Object::Integer(1)]),
        ];
        for op in &bad {
            assert!(validate(op).is_err(), "{} should be rejected", op.operator);
        }
    }
}
