//! Argument shapes of the action functions, rendered as JSON Schema when a
//! backend offers the actions to a model as tools.

use serde_json::{Map, Value, json};

/// The shape of one action argument.
#[derive(Debug, Clone)]
pub enum Schema {
    String {
        description: Option<String>,
    },
    Array {
        description: Option<String>,
        items: Box<Schema>,
    },
    /// Every property is required and nothing else is accepted.
    Object {
        description: Option<String>,
        properties: Vec<Property>,
    },
}

#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub schema: Schema,
}

impl Schema {
    pub fn to_json_schema(&self) -> Value {
        let (mut value, description) = match self {
            Schema::String { description } => (json!({ "type": "string" }), description),
            Schema::Array { description, items } => (
                json!({ "type": "array", "items": items.to_json_schema() }),
                description,
            ),
            Schema::Object {
                description,
                properties,
            } => {
                let props: Map<String, Value> = properties
                    .iter()
                    .map(|p| (p.name.clone(), p.schema.to_json_schema()))
                    .collect();
                let required: Vec<&str> = properties.iter().map(|p| p.name.as_str()).collect();
                (
                    json!({
                        "type": "object",
                        "properties": props,
                        "required": required,
                        "additionalProperties": false,
                    }),
                    description,
                )
            }
        };
        if let Some(description) = description {
            value["description"] = json!(description);
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_properties_are_all_required() {
        let schema = Schema::Object {
            description: Some("create_file arguments".into()),
            properties: vec![
                Property {
                    name: "path".into(),
                    schema: Schema::String { description: None },
                },
                Property {
                    name: "packages".into(),
                    schema: Schema::Array {
                        description: None,
                        items: Box::new(Schema::String { description: None }),
                    },
                },
            ],
        };
        let json = schema.to_json_schema();
        assert_eq!(json["type"], "object");
        assert_eq!(json["description"], "create_file arguments");
        assert_eq!(json["properties"]["path"]["type"], "string");
        assert_eq!(json["properties"]["packages"]["items"]["type"], "string");
        assert_eq!(json["required"], json!(["path", "packages"]));
        assert_eq!(json["additionalProperties"], false);
    }
}
