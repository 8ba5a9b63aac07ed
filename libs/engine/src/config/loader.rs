//! Workflow document parsing
//!
//! Accepts YAML or JSON; the two are mutually convertible and detected
//! from the document itself rather than a file extension.

use super::types::ConfigDocument;
use super::ConfigError;

/// Parse a workflow document from YAML or JSON text.
///
/// JSON documents (leading `{`) go through the JSON parser for precise
/// error messages; everything else is treated as YAML.
pub fn parse_document(input: &str) -> Result<ConfigDocument, ConfigError> {
    let trimmed = input.trim_start();
    if trimmed.is_empty() {
        return Err(ConfigError::new("empty workflow document"));
    }

    if trimmed.starts_with('{') {
        serde_json::from_str(input)
            .map_err(|e| ConfigError::new(format!("invalid JSON document: {e}")))
    } else {
        serde_yml::from_str(input)
            .map_err(|e| ConfigError::new(format!("invalid YAML document: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML_DOC: &str = r#"
modules:
  - name: http
    type: http.server
    config:
      listen: "127.0.0.1:8080"
workflows:
  - name: orders
    pipelines:
      - name: intake
        on_error: skip
        steps:
          - name: accept
            type: step.set
            config:
              values:
                ok: true
"#;

    #[test]
    fn test_parse_yaml() {
        let doc = parse_document(YAML_DOC).unwrap();
        assert_eq!(doc.modules.len(), 1);
        assert_eq!(doc.workflows[0].pipelines[0].steps[0].name, "accept");
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "workflows": [
                {"name": "w", "pipelines": [
                    {"name": "p", "steps": [
                        {"name": "s", "type": "step.set"}
                    ]}
                ]}
            ]
        }"#;
        let doc = parse_document(json).unwrap();
        assert_eq!(doc.workflows[0].name, "w");
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_document("").is_err());
        assert!(parse_document("{not json").is_err());
        assert!(parse_document("modules: [:::").is_err());
    }
}
