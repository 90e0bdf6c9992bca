use std::collections::BTreeMap;

use serde_json::{json, Value};

/// Parameter types a tool schema can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone)]
pub struct PropertySpec {
    pub kind: ParamType,
    pub description: String,
    /// When set, a provided value must be one of these strings.
    pub enum_values: Option<Vec<String>>,
    /// Filled in when the caller omits the parameter.
    pub default: Option<Value>,
}

impl PropertySpec {
    pub fn new(kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            enum_values: None,
            default: None,
        }
    }

    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// JSON-schema-shaped parameter declaration for a tool.
#[derive(Debug, Clone, Default)]
pub struct ParameterSchema {
    pub properties: BTreeMap<String, PropertySpec>,
    pub required: Vec<String>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, name: impl Into<String>, spec: PropertySpec) -> Self {
        self.properties.insert(name.into(), spec);
        self
    }

    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    /// Validate `params` in place: required fields present, types match,
    /// enums respected, defaults applied. Returns a field-level message on
    /// the first violation.
    pub fn validate(&self, params: &mut Value) -> Result<(), String> {
        if params.is_null() {
            *params = json!({});
        }
        let obj = params
            .as_object_mut()
            .ok_or_else(|| "parameters must be an object".to_string())?;

        for name in &self.required {
            if !obj.contains_key(name) {
                return Err(format!("missing required parameter: {name}"));
            }
        }

        for (name, value) in obj.iter() {
            let Some(spec) = self.properties.get(name) else {
                return Err(format!("unknown parameter: {name}"));
            };
            if !spec.kind.matches(value) {
                return Err(format!(
                    "parameter '{name}' must be of type {}",
                    spec.kind.as_str()
                ));
            }
            if let (Some(allowed), Some(s)) = (&spec.enum_values, value.as_str()) {
                if !allowed.iter().any(|a| a == s) {
                    return Err(format!(
                        "parameter '{name}' must be one of: {}",
                        allowed.join(", ")
                    ));
                }
            }
        }

        for (name, spec) in &self.properties {
            if let Some(default) = &spec.default {
                obj.entry(name.clone()).or_insert_with(|| default.clone());
            }
        }

        Ok(())
    }

    /// Render the JSON-schema form expected by LLM tool definitions.
    pub fn to_json(&self) -> Value {
        let mut props = serde_json::Map::new();
        for (name, spec) in &self.properties {
            let mut p = serde_json::Map::new();
            p.insert("type".into(), json!(spec.kind.as_str()));
            p.insert("description".into(), json!(spec.description));
            if let Some(values) = &spec.enum_values {
                p.insert("enum".into(), json!(values));
            }
            if let Some(default) = &spec.default {
                p.insert("default".into(), default.clone());
            }
            props.insert(name.clone(), Value::Object(p));
        }
        json!({
            "type": "object",
            "properties": props,
            "required": self.required,
        })
    }
}
