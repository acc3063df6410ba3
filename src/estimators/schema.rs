//! Fixed layout of an estimator record.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub offset: usize,
}

impl FieldSpec {
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len()
    }
}

/// Named, shaped fields laid out back to back. Offsets are computed once at
/// construction and never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimatorSchema {
    fields: Vec<FieldSpec>,
    len: usize,
}

impl EstimatorSchema {
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = (S, Vec<usize>)>) -> Self {
        let mut offset = 0;
        let fields: Vec<FieldSpec> = fields
            .into_iter()
            .map(|(name, shape)| {
                let spec = FieldSpec { name: name.into(), shape, offset };
                offset += spec.len();
                spec
            })
            .collect();
        Self { fields, len: offset }
    }

    /// Scalar fields only.
    pub fn scalars(names: &[&str]) -> Self {
        Self::new(names.iter().map(|n| (*n, vec![1])))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn offset(&self, name: &str) -> Option<usize> {
        self.field(name).map(|f| f.offset)
    }

    /// Concatenate schemas, prefixing every field with `<prefix>/`.
    pub fn concat<'a>(parts: impl IntoIterator<Item = (&'a str, &'a EstimatorSchema)>) -> Self {
        let mut all = Vec::new();
        for (prefix, schema) in parts {
            for f in schema.fields.iter() {
                all.push((format!("{}/{}", prefix, f.name), f.shape.clone()));
            }
        }
        Self::new(all)
    }
}
