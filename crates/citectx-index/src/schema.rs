use tantivy::schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions};

use crate::IndexError;

/// A field of a [`ReferenceRecord`](crate::ReferenceRecord).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordField {
    CitingFile,
    MarkerId,
    Title,
    PubId,
}

impl RecordField {
    pub const ALL: [RecordField; 4] = [
        RecordField::CitingFile,
        RecordField::MarkerId,
        RecordField::Title,
        RecordField::PubId,
    ];

    /// Name of the field in the index schema.
    pub fn as_str(self) -> &'static str {
        match self {
            RecordField::CitingFile => "file",
            RecordField::MarkerId => "ref_id",
            RecordField::Title => "title",
            RecordField::PubId => "pub_id",
        }
    }

    pub(crate) fn resolve(self, schema: &Schema) -> Result<Field, IndexError> {
        schema
            .get_field(self.as_str())
            .map_err(|e| IndexError::Index(e.to_string()))
    }
}

impl std::fmt::Display for RecordField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every field is an untokenized keyword. `title` and `pub_id` are also fast
/// fields so they can be aggregated on.
pub(crate) fn build_schema() -> Schema {
    let keyword = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("raw")
                .set_index_option(IndexRecordOption::Basic),
        )
        .set_stored();
    let aggregatable = keyword.clone().set_fast(Some("raw"));

    let mut builder = Schema::builder();
    builder.add_text_field(RecordField::CitingFile.as_str(), keyword.clone());
    builder.add_text_field(RecordField::MarkerId.as_str(), keyword);
    builder.add_text_field(RecordField::Title.as_str(), aggregatable.clone());
    builder.add_text_field(RecordField::PubId.as_str(), aggregatable);
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_has_every_record_field() {
        let schema = build_schema();
        for field in RecordField::ALL {
            assert!(field.resolve(&schema).is_ok(), "missing {field}");
        }
    }

    #[test]
    fn aggregated_fields_are_fast() {
        let schema = build_schema();
        for field in [RecordField::Title, RecordField::PubId] {
            let entry = schema.get_field_entry(field.resolve(&schema).unwrap());
            assert!(entry.is_fast(), "{field} should be a fast field");
        }
    }
}
