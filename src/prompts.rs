//! Prompt templates for extraction and query keyword calls.
//!
//! Templates are compiled into the library and rendered by placeholder
//! substitution, so delimiter configuration flows into the instructions the
//! model actually sees.

/// Available prompt templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTemplate {
    /// First-pass entity/relation extraction over one chunk
    ExtractEntities,
    /// Gleaning round: ask the model to continue a previous extraction
    ContinueExtraction,
    /// Query-time keyword extraction (JSON answer)
    ExtractKeywords,
}

impl PromptTemplate {
    /// Raw template text with `{placeholder}` markers.
    pub fn template(&self) -> &'static str {
        match self {
            PromptTemplate::ExtractEntities => EXTRACT_ENTITIES,
            PromptTemplate::ContinueExtraction => CONTINUE_EXTRACTION,
            PromptTemplate::ExtractKeywords => EXTRACT_KEYWORDS,
        }
    }

    /// Render the template, replacing each `{name}` with its value.
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        let mut text = self.template().to_string();
        for (name, value) in vars {
            text = text.replace(&format!("{{{name}}}"), value);
        }
        text
    }
}

/// List of all available templates.
pub fn list_templates() -> Vec<PromptTemplate> {
    vec![
        PromptTemplate::ExtractEntities,
        PromptTemplate::ContinueExtraction,
        PromptTemplate::ExtractKeywords,
    ]
}

const EXTRACT_ENTITIES: &str = r#"You are given a text document. Identify all entities and all relationships among the identified entities.

For each entity, output one record:
("entity"{tuple_delimiter}<entity_name>{tuple_delimiter}<entity_type>{tuple_delimiter}<entity_description>)
Use one of the following entity types: {entity_types}

For each relationship between two identified entities, output one record:
("relationship"{tuple_delimiter}<source_entity>{tuple_delimiter}<target_entity>{tuple_delimiter}<relationship_description>{tuple_delimiter}<relationship_strength>)
relationship_strength is a numeric score between 1 and 10.

Separate records with {record_delimiter} and finish the whole output with {completion_delimiter}.

Text:
{input_text}
"#;

const CONTINUE_EXTRACTION: &str = r#"Some entities and relationships were missed in the last extraction. Add ONLY the missing records below, in the same format, using {tuple_delimiter} between fields and {record_delimiter} between records. Finish with {completion_delimiter}.
"#;

const EXTRACT_KEYWORDS: &str = r#"Extract the search keywords from the user's query. Answer with a single JSON object of the form:
{"high_level_keywords": ["overarching concepts"], "low_level_keywords": ["specific entities or details"]}

Query: {query}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_all_placeholders() {
        let rendered = PromptTemplate::ExtractEntities.render(&[
            ("tuple_delimiter", "<|>"),
            ("record_delimiter", "##"),
            ("completion_delimiter", "<|COMPLETE|>"),
            ("entity_types", "person, organization"),
            ("input_text", "Alice works at Acme."),
        ]);

        assert!(rendered.contains("<|>"));
        assert!(rendered.contains("##"));
        assert!(rendered.contains("<|COMPLETE|>"));
        assert!(rendered.contains("Alice works at Acme."));
        assert!(!rendered.contains("{tuple_delimiter}"));
        assert!(!rendered.contains("{input_text}"));
    }

    #[test]
    fn continue_template_keeps_format_markers() {
        let rendered = PromptTemplate::ContinueExtraction.render(&[
            ("tuple_delimiter", "<|>"),
            ("record_delimiter", "##"),
            ("completion_delimiter", "<|COMPLETE|>"),
        ]);
        assert!(rendered.contains("missing"));
        assert!(!rendered.contains("{record_delimiter}"));
    }

    #[test]
    fn keywords_template_mentions_both_levels() {
        let rendered = PromptTemplate::ExtractKeywords.render(&[("query", "who founded Acme?")]);
        assert!(rendered.contains("high_level_keywords"));
        assert!(rendered.contains("low_level_keywords"));
        assert!(rendered.contains("who founded Acme?"));
    }

    #[test]
    fn list_templates_is_complete() {
        assert_eq!(list_templates().len(), 3);
    }

    #[test]
    fn unreplaced_vars_are_left_alone() {
        let rendered = PromptTemplate::ExtractKeywords.render(&[]);
        assert!(rendered.contains("{query}"));
    }
}
