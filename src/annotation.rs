//! Locates the slicer's filament summary comments in a tail window and splits
//! them into per-extruder pieces.
//!
//! Every piece keeps its byte span inside the tail text, so later rewrites can
//! splice new text at an exact position instead of searching for it again.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

pub const NOTES_PREFIX: &str = "; filament_notes = ";
pub const TYPE_PREFIX: &str = "; filament_type = ";
pub const USED_PREFIX: &str = "; filament used [mm] = ";

static NOTES_LINE: LazyLock<Regex> = LazyLock::new(|| line_pattern(NOTES_PREFIX));
static TYPE_LINE: LazyLock<Regex> = LazyLock::new(|| line_pattern(TYPE_PREFIX));
static USED_LINE: LazyLock<Regex> = LazyLock::new(|| line_pattern(USED_PREFIX));

// `[ sm_name = value ]`; group 1 ends where the value starts, group 2 is the value.
static SM_NAME_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\s*sm_name\s*=\s*)([^\]]*\S)?\s*\]").expect("sm_name pattern is valid")
});

fn line_pattern(prefix: &str) -> Regex {
    Regex::new(&format!(r"(?m)^{}([^\r\n]+)", regex::escape(prefix)))
        .expect("annotation line pattern is valid")
}

/// One matched comment line. Both ranges index into the tail text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationLine<'a> {
    pub line: Range<usize>,
    pub value: Range<usize>,
    pub raw_value: &'a str,
}

impl<'a> AnnotationLine<'a> {
    fn find(pattern: &Regex, tail: &'a str) -> Option<Self> {
        let caps = pattern.captures(tail)?;
        let line = caps.get(0)?;
        let value = caps.get(1)?;
        Some(Self {
            line: line.range(),
            value: value.range(),
            raw_value: value.as_str(),
        })
    }

    /// The value with surrounding whitespace removed, and where it starts.
    fn trimmed(&self) -> (usize, &'a str) {
        let leading = self.raw_value.len() - self.raw_value.trim_start().len();
        (self.value.start + leading, self.raw_value.trim())
    }

    /// Split the trimmed value on `delimiter`, keeping each piece's absolute span.
    fn split_spans(&self, delimiter: char) -> Vec<(Range<usize>, &'a str)> {
        let (base, trimmed) = self.trimmed();
        let mut out = Vec::new();
        let mut start = 0usize;
        for (idx, _) in trimmed.match_indices(delimiter) {
            out.push((base + start..base + idx, &trimmed[start..idx]));
            start = idx + delimiter.len_utf8();
        }
        out.push((base + start..base + trimmed.len(), &trimmed[start..]));
        out
    }
}

/// The `sm_name` value inside a fragment.
///
/// `value` is empty for `[sm_name = ]`; `span` is then the empty range where a
/// value would be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmNameToken<'a> {
    pub span: Range<usize>,
    pub value: &'a str,
}

/// One extruder's entry from the notes comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteFragment<'a> {
    pub span: Range<usize>,
    pub text: &'a str,
    pub sm_name: Option<SmNameToken<'a>>,
}

impl<'a> NoteFragment<'a> {
    fn new(span: Range<usize>, text: &'a str) -> Self {
        let sm_name = SM_NAME_TOKEN.captures(text).and_then(|caps| {
            let prefix = caps.get(1)?;
            Some(match caps.get(2) {
                Some(value) => SmNameToken {
                    span: span.start + value.start()..span.start + value.end(),
                    value: value.as_str(),
                },
                None => SmNameToken {
                    span: span.start + prefix.end()..span.start + prefix.end(),
                    value: "",
                },
            })
        });
        Self { span, text, sm_name }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotesAnnotation<'a> {
    pub line: AnnotationLine<'a>,
    pub fragments: Vec<NoteFragment<'a>>,
}

impl NotesAnnotation<'_> {
    /// True when the slicer wrote an empty notes list (`""` or nothing).
    pub fn is_blank(&self) -> bool {
        let (_, trimmed) = self.line.trimmed();
        trimmed.is_empty() || trimmed == "\"\""
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsedAnnotation<'a> {
    pub line: AnnotationLine<'a>,
    pub entries: Vec<&'a str>,
}

/// The three filament comments of interest. Any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilamentAnnotations<'a> {
    pub notes: Option<NotesAnnotation<'a>>,
    pub types: Option<Vec<&'a str>>,
    pub used: Option<UsedAnnotation<'a>>,
}

impl FilamentAnnotations<'_> {
    /// Extruder count as declared by `filament_type`; 0 when that comment is absent.
    pub fn num_filaments(&self) -> usize {
        self.types.as_ref().map_or(0, Vec::len)
    }
}

pub fn parse_annotations(tail: &str) -> FilamentAnnotations<'_> {
    let notes = AnnotationLine::find(&NOTES_LINE, tail).map(|line| {
        let fragments = line
            .split_spans(';')
            .into_iter()
            .map(|(span, text)| NoteFragment::new(span, text))
            .collect();
        NotesAnnotation { line, fragments }
    });
    let types = AnnotationLine::find(&TYPE_LINE, tail)
        .map(|line| line.split_spans(';').into_iter().map(|(_, t)| t).collect());
    let used = AnnotationLine::find(&USED_LINE, tail).map(|line| {
        let entries = line.split_spans(',').into_iter().map(|(_, t)| t).collect();
        UsedAnnotation { line, entries }
    });
    FilamentAnnotations { notes, types, used }
}

/// Number of note fragments that carry an `sm_name` token.
pub fn count_named_extruders(tail: &str) -> usize {
    parse_annotations(tail).notes.map_or(0, |notes| {
        notes
            .fragments
            .iter()
            .filter(|f| f.sm_name.is_some())
            .count()
    })
}

/// Current spool name per extruder (1-based), "" where no name is recorded.
pub fn spools_from_tail(tail: &str) -> BTreeMap<usize, String> {
    let Some(notes) = parse_annotations(tail).notes else {
        return BTreeMap::new();
    };
    if notes.is_blank() {
        return BTreeMap::new();
    }
    notes
        .fragments
        .iter()
        .enumerate()
        .map(|(i, fragment)| {
            let name = fragment
                .sm_name
                .as_ref()
                .map(|token| token.value.to_string())
                .unwrap_or_default();
            (i + 1, name)
        })
        .collect()
}
