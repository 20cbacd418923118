use arrow_schema::{DataType, Field, Schema, SchemaRef};
use std::sync::Arc;

pub const ID: &str = "id";
pub const DOCUMENT: &str = "document";
pub const METADATA: &str = "metadata";
pub const VECTOR: &str = "vector";

/// Row layout of every collection. `metadata` holds the JSON object.
pub fn chunk_schema(dim: i32) -> SchemaRef {
	Arc::new(Schema::new(vec![
		Field::new(ID, DataType::Utf8, false),
		Field::new(DOCUMENT, DataType::Utf8, true),
		Field::new(METADATA, DataType::Utf8, true),
		Field::new(VECTOR, DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
	]))
}

/// Vector width declared by a collection's schema.
pub fn dimension_of(schema: &Schema) -> Option<i32> {
	match schema.field_with_name(VECTOR).ok()?.data_type() {
		DataType::FixedSizeList(_, dim) => Some(*dim),
		_ => None,
	}
}
