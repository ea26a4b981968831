//! Aggregated rows → objects shaped exactly like the selection.

use serde_json::{Map, Value};

use super::{QueryContext, child_type};
use crate::error::EngineResult;
use crate::mapping::{FieldMapping, MappingRegistry};
use crate::selection::{FieldsByTypeName, SelectionTree};

static NULL: Value = Value::Null;

/// Reshapes raw rows, applying per-field transforms at every level.
pub struct Transformer<'a> {
    registry: &'a MappingRegistry,
}

impl<'a> Transformer<'a> {
    pub fn new(registry: &'a MappingRegistry) -> Self {
        Self { registry }
    }

    /// Build the output object for one raw row of `type_name`.
    ///
    /// The result has exactly the requested output keys. Columns fetched
    /// only because they are required are dropped here.
    pub fn transform_type(
        &self,
        ctx: &QueryContext,
        raw: &Value,
        type_name: &str,
        fields_by_type_name: &FieldsByTypeName,
    ) -> EngineResult<Value> {
        let Value::Object(row) = raw else {
            return Ok(raw.clone());
        };

        let mut out = Map::new();
        for field in fields_by_type_name
            .get(type_name)
            .into_iter()
            .flat_map(|fields| fields.values())
        {
            let value = self.transform_field(ctx, row, type_name, field)?;
            out.insert(field.output_key().to_string(), value);
        }
        Ok(Value::Object(out))
    }

    /// Produce the output value of one field from its raw row.
    ///
    /// A transform replaces the raw value outright, null included. Otherwise
    /// null stays null, nested objects and arrays recurse into their type, and
    /// scalars pass through unchanged.
    pub fn transform_field(
        &self,
        ctx: &QueryContext,
        row: &Map<String, Value>,
        type_name: &str,
        field: &SelectionTree,
    ) -> EngineResult<Value> {
        let field = self.registry.resolve_alias(type_name, field)?;
        let raw = row.get(field.output_key()).unwrap_or(&NULL);

        if let Some(FieldMapping::Transform(transform)) = self.registry.field(type_name, &field.name)
        {
            return Ok(transform(raw, row, ctx));
        }

        if raw.is_null() || !field.is_complex() {
            return Ok(raw.clone());
        }

        let child = child_type(type_name, &field)?;
        match raw {
            Value::Array(items) => items
                .iter()
                .map(|item| self.transform_type(ctx, item, child, &field.fields_by_type_name))
                .collect::<EngineResult<Vec<_>>>()
                .map(Value::Array),
            other => self.transform_type(ctx, other, child, &field.fields_by_type_name),
        }
    }
}
