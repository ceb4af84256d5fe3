//! Workflow templates
//!
//! A template is a parameterized factory for workflow definitions: a
//! parameter schema plus a render function. Instantiation merges defaults,
//! type-checks the supplied values, renders, and validates the result
//! before handing it back.

mod builtin;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::definition::WorkflowDefinition;
use crate::error::{EngineError, ResourceKind};
use crate::validate;

/// JSON type expected for a template parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParameterKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ParameterKind::String => value.is_string(),
            ParameterKind::Integer => value.is_i64() || value.is_u64(),
            ParameterKind::Number => value.is_number(),
            ParameterKind::Boolean => value.is_boolean(),
            ParameterKind::Array => value.is_array(),
            ParameterKind::Object => value.is_object(),
        }
    }

    /// Lowercase name, matching the wire form.
    pub fn name(&self) -> &'static str {
        match self {
            ParameterKind::String => "string",
            ParameterKind::Integer => "integer",
            ParameterKind::Number => "number",
            ParameterKind::Boolean => "boolean",
            ParameterKind::Array => "array",
            ParameterKind::Object => "object",
        }
    }
}

/// Schema for one template parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateParameter {
    #[serde(rename = "type")]
    pub kind: ParameterKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TemplateParameter {
    fn new(kind: ParameterKind, default: Option<Value>, description: &str) -> Self {
        Self {
            kind,
            default,
            description: Some(description.to_string()),
        }
    }
}

/// Serializable template summary for listings.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateInfo {
    pub template_id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub version: String,
    pub parameters: BTreeMap<String, TemplateParameter>,
}

/// Renders merged parameters into a workflow definition.
pub type RenderFn = fn(&Map<String, Value>) -> WorkflowDefinition;

/// A registered workflow template.
pub struct Template {
    pub template_id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub version: String,
    pub parameters: BTreeMap<String, TemplateParameter>,
    render: RenderFn,
}

impl Template {
    pub fn new(
        template_id: &str,
        name: &str,
        description: &str,
        category: &str,
        parameters: BTreeMap<String, TemplateParameter>,
        render: RenderFn,
    ) -> Self {
        Self {
            template_id: template_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            category: category.to_string(),
            version: "1.0.0".to_string(),
            parameters,
            render,
        }
    }

    pub fn info(&self) -> TemplateInfo {
        TemplateInfo {
            template_id: self.template_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
            version: self.version.clone(),
            parameters: self.parameters.clone(),
        }
    }

    /// Merge defaults with the supplied values, checking presence and type.
    fn resolve_params(&self, params: &Map<String, Value>) -> Result<Map<String, Value>, EngineError> {
        let mut merged = Map::new();
        for (name, schema) in &self.parameters {
            match params.get(name) {
                Some(value) => {
                    if !schema.kind.matches(value) {
                        return Err(EngineError::InvalidParameterType {
                            name: name.clone(),
                            expected: schema.kind.name().to_string(),
                        });
                    }
                    merged.insert(name.clone(), value.clone());
                }
                None => match &schema.default {
                    Some(default) => {
                        merged.insert(name.clone(), default.clone());
                    }
                    None => return Err(EngineError::MissingParameter(name.clone())),
                },
            }
        }
        Ok(merged)
    }

    /// Instantiate the template with the given parameters.
    ///
    /// The rendered definition is validated before being returned.
    pub fn instantiate(&self, params: &Map<String, Value>) -> Result<WorkflowDefinition, EngineError> {
        let merged = self.resolve_params(params)?;
        let definition = (self.render)(&merged);
        validate::validate_workflow(&definition).into_result()?;
        Ok(definition)
    }
}

/// Registry of workflow templates.
pub struct TemplateRegistry {
    templates: BTreeMap<String, Template>,
}

impl TemplateRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            templates: BTreeMap::new(),
        }
    }

    /// A registry seeded with the built-in templates.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for template in builtin::all() {
            registry.register(template);
        }
        registry
    }

    pub fn register(&mut self, template: Template) {
        self.templates.insert(template.template_id.clone(), template);
    }

    pub fn get(&self, template_id: &str) -> Option<&Template> {
        self.templates.get(template_id)
    }

    /// List templates, optionally filtered by category.
    pub fn list(&self, category: Option<&str>) -> Vec<TemplateInfo> {
        self.templates
            .values()
            .filter(|t| category.map(|c| t.category == c).unwrap_or(true))
            .map(Template::info)
            .collect()
    }

    /// Distinct categories, sorted.
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self
            .templates
            .values()
            .map(|t| t.category.clone())
            .collect();
        categories.sort();
        categories.dedup();
        categories
    }

    /// Instantiate a template by id.
    pub fn instantiate(
        &self,
        template_id: &str,
        params: &Map<String, Value>,
    ) -> Result<WorkflowDefinition, EngineError> {
        let template = self
            .get(template_id)
            .ok_or_else(|| EngineError::not_found(ResourceKind::Template, template_id))?;
        template.instantiate(params)
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
