//! Built-in workflow templates
//!
//! Pre-built document-processing patterns users instantiate with their own
//! parameters. Render functions receive the merged parameter map (defaults
//! already applied by the registry).

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use super::{ParameterKind, Template, TemplateParameter};
use crate::definition::WorkflowDefinition;

/// All built-in templates.
pub(super) fn all() -> Vec<Template> {
    vec![
        rag_ingestion(),
        document_analysis(),
        metadata_extraction(),
        multi_format_conversion(),
        content_enhancement(),
    ]
}

fn definition(value: Value) -> WorkflowDefinition {
    serde_json::from_value(value).expect("built-in template definition is well-formed")
}

fn param(params: &Map<String, Value>, name: &str) -> Value {
    params.get(name).cloned().unwrap_or(Value::Null)
}

fn rag_ingestion() -> Template {
    let mut parameters = BTreeMap::new();
    parameters.insert(
        "chunk_size".into(),
        TemplateParameter::new(ParameterKind::Integer, Some(json!(1000)), "Chunk size in characters"),
    );
    parameters.insert(
        "chunk_overlap".into(),
        TemplateParameter::new(ParameterKind::Integer, Some(json!(200)), "Overlap between chunks"),
    );
    parameters.insert(
        "force_ocr".into(),
        TemplateParameter::new(ParameterKind::Boolean, Some(json!(false)), "Always run OCR"),
    );
    parameters.insert(
        "min_text_threshold".into(),
        TemplateParameter::new(
            ParameterKind::Integer,
            Some(json!(100)),
            "Minimum extracted characters before OCR fallback",
        ),
    );

    Template::new(
        "rag-ingestion",
        "RAG Document Ingestion",
        "Process a PDF and chunk it into segments ready for embedding",
        "Document Processing",
        parameters,
        |params| {
            definition(json!({
                "name": "rag-ingestion",
                "description": "Process a PDF and chunk it for retrieval",
                "version": "1.0.0",
                "tasks": [
                    {
                        "id": "process",
                        "type": "process_pdf",
                        "inputs": {
                            "pdf_data": "{{workflow.input.pdf_data}}",
                            "force_ocr": param(params, "force_ocr"),
                            "min_text_threshold": param(params, "min_text_threshold")
                        }
                    },
                    {
                        "id": "chunk",
                        "type": "chunk_document",
                        "depends_on": ["process"],
                        "inputs": {
                            "document_id": "{{workflow.input.document_id}}",
                            "project_id": "{{workflow.input.project_id}}",
                            "content": "{{process.text}}",
                            "chunk_size": param(params, "chunk_size"),
                            "chunk_overlap": param(params, "chunk_overlap")
                        }
                    }
                ],
                "output": {
                    "chunks": "{{chunk.chunks}}",
                    "total_chunks": "{{chunk.total_chunks}}",
                    "metadata": "{{process.metadata}}"
                },
                "options": {"parallel": false, "timeout_ms": 300000}
            }))
        },
    )
}

fn document_analysis() -> Template {
    let mut parameters = BTreeMap::new();
    parameters.insert(
        "model".into(),
        TemplateParameter::new(ParameterKind::String, Some(json!("gpt-4")), "Model for token counting"),
    );

    Template::new(
        "document-analysis",
        "Document Analysis",
        "Analyze a document's metrics and structure before processing",
        "Document Processing",
        parameters,
        |params| {
            definition(json!({
                "name": "document-analysis",
                "description": "Token counts, structure, and metadata for a PDF",
                "version": "1.0.0",
                "tasks": [
                    {
                        "id": "extract",
                        "type": "process_pdf",
                        "inputs": {
                            "pdf_data": "{{workflow.input.pdf_data}}",
                            "force_ocr": false
                        }
                    },
                    {
                        "id": "count",
                        "type": "count_tokens",
                        "depends_on": ["extract"],
                        "inputs": {
                            "content": "{{extract.text}}",
                            "model": param(params, "model")
                        }
                    },
                    {
                        "id": "import",
                        "type": "import_markdown",
                        "depends_on": ["extract"],
                        "inputs": {
                            "content": "{{extract.text}}",
                            "strict_mode": false,
                            "include_metadata": true
                        }
                    }
                ],
                "output": {
                    "metadata": "{{extract.metadata}}",
                    "token_count": "{{count.token_count}}",
                    "document": "{{import.document}}"
                },
                "options": {"parallel": true, "timeout_ms": 300000}
            }))
        },
    )
}

fn metadata_extraction() -> Template {
    let mut parameters = BTreeMap::new();
    parameters.insert(
        "token_model".into(),
        TemplateParameter::new(ParameterKind::String, Some(json!("gpt-4")), "Model for token counting"),
    );

    Template::new(
        "metadata-extraction",
        "Metadata Extraction",
        "Extract PDF metadata and token counts for catalogs and indices",
        "Document Processing",
        parameters,
        |params| {
            definition(json!({
                "name": "metadata-extraction",
                "version": "1.0.0",
                "tasks": [
                    {
                        "id": "extract",
                        "type": "extract_pdf_text",
                        "inputs": {"pdf_data": "{{workflow.input.pdf_data}}"}
                    },
                    {
                        "id": "count",
                        "type": "count_tokens",
                        "depends_on": ["extract"],
                        "inputs": {
                            "content": "{{extract.text}}",
                            "model": param(params, "token_model")
                        }
                    }
                ],
                "output": {
                    "metadata": "{{extract.metadata}}",
                    "token_count": "{{count.token_count}}"
                },
                "options": {"parallel": false, "timeout_ms": 120000}
            }))
        },
    )
}

fn multi_format_conversion() -> Template {
    let mut parameters = BTreeMap::new();
    parameters.insert(
        "include_styles".into(),
        TemplateParameter::new(ParameterKind::Boolean, Some(json!(true)), "Embed CSS in HTML output"),
    );
    parameters.insert(
        "title".into(),
        TemplateParameter::new(ParameterKind::String, Some(json!("Document")), "Document title"),
    );

    Template::new(
        "multi-format-conversion",
        "Multi-Format Conversion",
        "Convert a PDF into HTML, Markdown, and Portable Text in one pass",
        "Conversion",
        parameters,
        |params| {
            definition(json!({
                "name": "multi-format-conversion",
                "version": "1.0.0",
                "tasks": [
                    {
                        "id": "extract",
                        "type": "extract_pdf_text",
                        "inputs": {"pdf_data": "{{workflow.input.pdf_data}}"}
                    },
                    {
                        "id": "import",
                        "type": "import_markdown",
                        "depends_on": ["extract"],
                        "inputs": {
                            "content": "{{extract.text}}",
                            "strict_mode": false,
                            "include_metadata": true
                        }
                    },
                    {
                        "id": "export_html",
                        "type": "export_html",
                        "depends_on": ["import"],
                        "inputs": {
                            "document": "{{import.document}}",
                            "include_styles": param(params, "include_styles"),
                            "include_metadata": false,
                            "class_name": "exported-doc",
                            "title": param(params, "title")
                        }
                    },
                    {
                        "id": "export_md",
                        "type": "export_markdown",
                        "depends_on": ["import"],
                        "inputs": {
                            "document": "{{import.document}}",
                            "include_metadata": false
                        }
                    }
                ],
                "output": {
                    "html": "{{export_html.html}}",
                    "markdown": "{{export_md.markdown}}",
                    "document": "{{import.document}}"
                },
                "options": {"parallel": true, "timeout_ms": 600000}
            }))
        },
    )
}

fn content_enhancement() -> Template {
    let mut parameters = BTreeMap::new();
    parameters.insert(
        "include_styles".into(),
        TemplateParameter::new(ParameterKind::Boolean, Some(json!(true)), "Embed CSS in HTML output"),
    );
    parameters.insert(
        "title".into(),
        TemplateParameter::new(
            ParameterKind::String,
            Some(json!("Enhanced Document")),
            "Title for the published document",
        ),
    );

    Template::new(
        "content-enhancement",
        "Content Enhancement",
        "Extract, clean, and re-export content for publication",
        "Conversion",
        parameters,
        |params| {
            definition(json!({
                "name": "content-enhancement",
                "version": "1.0.0",
                "tasks": [
                    {
                        "id": "extract",
                        "type": "process_pdf",
                        "inputs": {
                            "pdf_data": "{{workflow.input.pdf_data}}",
                            "force_ocr": false
                        }
                    },
                    {
                        "id": "clean",
                        "type": "import_markdown",
                        "depends_on": ["extract"],
                        "inputs": {
                            "content": "{{extract.text}}",
                            "strict_mode": true,
                            "include_metadata": false
                        }
                    },
                    {
                        "id": "export_html",
                        "type": "export_html",
                        "depends_on": ["clean"],
                        "inputs": {
                            "document": "{{clean.document}}",
                            "include_styles": param(params, "include_styles"),
                            "include_metadata": false,
                            "class_name": "enhanced-doc",
                            "title": param(params, "title")
                        }
                    },
                    {
                        "id": "export_md",
                        "type": "export_markdown",
                        "depends_on": ["clean"],
                        "inputs": {
                            "document": "{{clean.document}}",
                            "include_metadata": false
                        }
                    }
                ],
                "output": {
                    "html": "{{export_html.html}}",
                    "markdown": "{{export_md.markdown}}"
                },
                "options": {"parallel": true, "timeout_ms": 300000}
            }))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_templates_have_distinct_ids() {
        let templates = all();
        let mut ids: Vec<&str> = templates.iter().map(|t| t.template_id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), templates.len());
    }

    #[test]
    fn test_rag_ingestion_defaults_flow_into_tasks() {
        let template = rag_ingestion();
        let def = template.instantiate(&Map::new()).unwrap();

        let process = def.task("process").unwrap();
        assert_eq!(process.inputs.get("force_ocr"), Some(&json!(false)));

        let chunk = def.task("chunk").unwrap();
        assert_eq!(chunk.inputs.get("chunk_size"), Some(&json!(1000)));
        assert_eq!(chunk.inputs.get("chunk_overlap"), Some(&json!(200)));
        assert_eq!(chunk.depends_on, vec!["process"]);
    }

    #[test]
    fn test_conversion_templates_fan_out_after_import() {
        let def = multi_format_conversion().instantiate(&Map::new()).unwrap();
        let layers = crate::validate::execution_layers(&def);
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[2], vec!["export_html", "export_md"]);
        assert!(def.options.parallel);
    }
}
