//! Build-time inference of tool metadata.
//!
//! Names come from the handler's function item path, descriptions and parameters
//! from the `JsonSchema` of the argument struct. Everything here runs once while a
//! tool is built; invocation only reads the resulting [`ToolSpec`](crate::traits::ToolSpec).

use crate::traits::{ParamSpec, ParamType};
use schemars::JsonSchema;
use serde_json::{Map, Value};

/// Last path segment of a function item's type name, e.g. `get_weather` for
/// `my_crate::tools::get_weather`. Closures have no usable identifier.
pub fn callable_name<F>() -> Option<String> {
    name_from_type_path(std::any::type_name::<F>())
}

fn name_from_type_path(path: &str) -> Option<String> {
    let base = path.split('<').next().unwrap_or(path);
    let last = base.rsplit("::").next().unwrap_or(base).trim();
    let is_identifier = last
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && last.chars().all(|c| c.is_alphanumeric() || c == '_');
    if !is_identifier {
        return None;
    }
    Some(last.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferredArgs {
    pub description: Option<String>,
    pub parameters: Vec<ParamSpec>,
}

pub fn infer_args<A: JsonSchema>() -> Result<InferredArgs, String> {
    let root = schemars::schema_for!(A);
    let schema = serde_json::to_value(&root)
        .map_err(|e| format!("failed to render argument schema: {}", e))?;
    infer_from_schema(&schema)
}

pub fn infer_from_schema(schema: &Value) -> Result<InferredArgs, String> {
    let Some(object) = schema.as_object() else {
        return Err(
            "argument type accepts arbitrary values; declare parameters explicitly".to_string(),
        );
    };

    if ParamType::from_json_type(object.get("type")) != ParamType::Object {
        return Err("argument type is not a struct of named fields".to_string());
    }

    let empty = Map::new();
    let properties = object
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let open_ended = object
        .get("additionalProperties")
        .is_some_and(|extra| extra != &Value::Bool(false));

    if properties.is_empty() && open_ended {
        return Err(
            "argument type takes free-form keys; declare parameters explicitly".to_string(),
        );
    }

    let required: Vec<&str> = object
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let definitions = object.get("definitions").and_then(Value::as_object);

    let parameters = properties
        .iter()
        .map(|(name, property)| ParamSpec {
            name: name.clone(),
            ty: resolve_type(property, definitions, 0),
            required: required.contains(&name.as_str()),
            description: property
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
        .collect();

    Ok(InferredArgs {
        description: object
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        parameters,
    })
}

fn resolve_type(property: &Value, definitions: Option<&Map<String, Value>>, depth: usize) -> ParamType {
    if depth > 8 {
        return ParamType::Object;
    }
    if let Some(ty) = property.get("type") {
        return ParamType::from_json_type(Some(ty));
    }
    if let Some(reference) = property.get("$ref").and_then(Value::as_str) {
        let target = reference
            .rsplit('/')
            .next()
            .and_then(|name| definitions.and_then(|defs| defs.get(name)));
        return match target {
            Some(target) => resolve_type(target, definitions, depth + 1),
            None => ParamType::Object,
        };
    }
    for combinator in ["allOf", "anyOf", "oneOf"] {
        if let Some(members) = property.get(combinator).and_then(Value::as_array) {
            let member = members
                .iter()
                .find(|m| m.get("type").and_then(Value::as_str) != Some("null"));
            if let Some(member) = member {
                return resolve_type(member, definitions, depth + 1);
            }
        }
    }
    ParamType::String
}
