use crate::model::{FieldSpec, FormSchema, Section};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Anything whose fields can be visited in document order.
pub trait SchemaScope {
    fn for_each_field<'a>(&'a self, f: &mut dyn FnMut(&'a FieldSpec));

    fn fields(&self) -> Vec<&FieldSpec> {
        let mut out = Vec::new();
        self.for_each_field(&mut |field| out.push(field));
        out
    }
}

impl SchemaScope for Section {
    fn for_each_field<'a>(&'a self, f: &mut dyn FnMut(&'a FieldSpec)) {
        for row in &self.rows {
            for col in &row.cols {
                f(col);
            }
        }
    }
}

impl SchemaScope for [Section] {
    fn for_each_field<'a>(&'a self, f: &mut dyn FnMut(&'a FieldSpec)) {
        for section in self {
            section.for_each_field(f);
        }
    }
}

impl SchemaScope for Vec<Section> {
    fn for_each_field<'a>(&'a self, f: &mut dyn FnMut(&'a FieldSpec)) {
        self.as_slice().for_each_field(f)
    }
}

impl SchemaScope for FormSchema {
    fn for_each_field<'a>(&'a self, f: &mut dyn FnMut(&'a FieldSpec)) {
        self.sections.for_each_field(f)
    }
}

/// Payload key for a section: explicit `payload_key`, `key` or `id`, else the
/// camel-cased title with diacritics stripped, else `section_<idx>`.
pub fn section_key(section: &Section, idx: usize) -> String {
    let explicit = [&section.payload_key, &section.key, &section.id]
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty());
    if let Some(k) = explicit {
        return k.clone();
    }
    section
        .title
        .as_deref()
        .map(camel_slug)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("section_{idx}"))
}

fn camel_slug(title: &str) -> String {
    let plain: String = title
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();
    let mut out = String::new();
    for (i, word) in plain.split_whitespace().enumerate() {
        let mut chars = word.chars();
        let Some(first) = chars.next() else { continue };
        if i == 0 {
            out.extend(first.to_lowercase());
        } else {
            out.extend(first.to_uppercase());
        }
        out.push_str(chars.as_str());
    }
    out
}
