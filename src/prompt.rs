//! Prompt rendering for the four prompt formats.
//!
//! A rendered prompt has an optional block of few-shot examples followed by
//! the instruction and the sentence to classify, both encoded in the same
//! format. [`TemplateRenderer`] reproduces the historical string templates
//! exactly, including their lack of escaping. [`EscapedRenderer`] runs values
//! through real encoders and is meant for new experiments only, since its
//! prompts differ from the historical ones.

use crate::config::{PromptFormat, RendererKind};
use crate::dataset::ShotExample;
use std::fmt;

/// Fixed classification instruction.
pub const INSTRUCTION: &str = "Classify the sentiment of the following sentence(<output> is one of: positive, negative, or neutral,Respond strictly in the format: Label: <output> .DO NOT INCLUDE ANY EXPLANATION, TAGS, FORMATTING, OR EXTRA WORDS/EXAMPLES): \n";

/// Separator between the shot block and the main block
pub const BLOCK_SEPARATOR: &str = "\n\n";

/// A prompt ready to send, kept in its two parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    /// Formatted few-shot examples; `None` for zero-shot prompts
    pub shot_block: Option<String>,
    /// Formatted instruction and sentence
    pub main_block: String,
}

impl RenderedPrompt {
    /// Full prompt text
    #[must_use]
    pub fn text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RenderedPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(shots) = &self.shot_block {
            f.write_str(shots)?;
            f.write_str(BLOCK_SEPARATOR)?;
        }
        f.write_str(&self.main_block)
    }
}

/// Encodes shot examples and the main instruction in a prompt format
pub trait PromptRenderer {
    /// Render the few-shot examples as one block
    fn render_examples(&self, examples: &[ShotExample], format: PromptFormat) -> String;

    /// Render the instruction and the sentence to classify
    fn render_main(&self, sentence: &str, format: PromptFormat) -> String;

    /// Render a complete prompt; the shot block is omitted when `examples` is empty
    fn render(
        &self,
        sentence: &str,
        examples: &[ShotExample],
        format: PromptFormat,
    ) -> RenderedPrompt {
        let shot_block = if examples.is_empty() {
            None
        } else {
            Some(self.render_examples(examples, format))
        };
        RenderedPrompt {
            shot_block,
            main_block: self.render_main(sentence, format),
        }
    }
}

/// Build the renderer selected in configuration
#[must_use]
pub fn renderer_for(kind: RendererKind) -> Box<dyn PromptRenderer + Send + Sync> {
    match kind {
        RendererKind::Template => Box::new(TemplateRenderer),
        RendererKind::Escaped => Box::new(EscapedRenderer),
    }
}

/// Plain string templates. Quotes, braces and newlines in the input are
/// copied through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

impl PromptRenderer for TemplateRenderer {
    fn render_examples(&self, examples: &[ShotExample], format: PromptFormat) -> String {
        let mut block = String::new();
        for ex in examples {
            let input = ex.input.trim();
            let output = ex.output.trim();
            let entry = match format {
                PromptFormat::Text => format!("{input}\n{output}\n\n"),
                PromptFormat::Json => format!("{{\"input\": \"{input}\", \"output\": \"{output}\"}}\n"),
                PromptFormat::Markdown => format!("**{input}**\n**{output}**\n\n"),
                PromptFormat::Yaml => format!("- input: {input}\n  output: {output}\n"),
            };
            block.push_str(&entry);
        }
        block.trim().to_string()
    }

    fn render_main(&self, sentence: &str, format: PromptFormat) -> String {
        let sentence = sentence.trim();
        match format {
            PromptFormat::Text => format!("{INSTRUCTION}\n{sentence}"),
            PromptFormat::Json => {
                format!("{{\"instruction\": \"{INSTRUCTION}\", \"input\": \"{sentence}\"}}")
            }
            PromptFormat::Markdown => format!("**Instruction**: {INSTRUCTION}\n**Input**: {sentence}"),
            PromptFormat::Yaml => format!("instruction: {INSTRUCTION}\ninput: {sentence}"),
        }
    }
}

/// Encoder-backed rendering: JSON through `serde_json`, YAML through
/// `serde_yaml`, markdown with `*` escaped.
#[derive(Debug, Clone, Copy, Default)]
pub struct EscapedRenderer;

impl EscapedRenderer {
    fn json_object(pairs: &[(&str, &str)]) -> String {
        let map: serde_json::Map<String, serde_json::Value> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), serde_json::Value::from(*v)))
            .collect();
        serde_json::Value::Object(map).to_string()
    }

    /// YAML-encode a single scalar, keeping it on one line
    fn yaml_scalar(value: &str) -> String {
        // JSON strings are valid YAML double-quoted scalars
        if value.contains('\n') {
            return serde_json::Value::from(value).to_string();
        }
        serde_yaml::to_string(value)
            .map(|s| s.trim_end_matches('\n').to_string())
            .unwrap_or_else(|_| format!("{value:?}"))
    }

    fn markdown_escape(value: &str) -> String {
        value.replace('*', "\\*")
    }
}

impl PromptRenderer for EscapedRenderer {
    fn render_examples(&self, examples: &[ShotExample], format: PromptFormat) -> String {
        let entries: Vec<String> = examples
            .iter()
            .map(|ex| {
                let input = ex.input.trim();
                let output = ex.output.trim();
                match format {
                    PromptFormat::Text => format!("{input}\n{output}"),
                    PromptFormat::Json => Self::json_object(&[("input", input), ("output", output)]),
                    PromptFormat::Markdown => format!(
                        "**{}**\n**{}**",
                        Self::markdown_escape(input),
                        Self::markdown_escape(output)
                    ),
                    PromptFormat::Yaml => format!(
                        "- input: {}\n  output: {}",
                        Self::yaml_scalar(input),
                        Self::yaml_scalar(output)
                    ),
                }
            })
            .collect();
        let separator = match format {
            PromptFormat::Text | PromptFormat::Markdown => "\n\n",
            PromptFormat::Json | PromptFormat::Yaml => "\n",
        };
        entries.join(separator)
    }

    fn render_main(&self, sentence: &str, format: PromptFormat) -> String {
        let sentence = sentence.trim();
        match format {
            PromptFormat::Text => format!("{INSTRUCTION}\n{sentence}"),
            PromptFormat::Json => {
                Self::json_object(&[("instruction", INSTRUCTION), ("input", sentence)])
            }
            PromptFormat::Markdown => format!(
                "**Instruction**: {}\n**Input**: {}",
                Self::markdown_escape(INSTRUCTION),
                Self::markdown_escape(sentence)
            ),
            PromptFormat::Yaml => format!(
                "instruction: {}\ninput: {}",
                Self::yaml_scalar(INSTRUCTION),
                Self::yaml_scalar(sentence)
            ),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn shots() -> Vec<ShotExample> {
        vec![
            ShotExample::new(" What a great day! ", "Label: positive"),
            ShotExample::new("I hate waiting.", " Label: negative "),
        ]
    }

    #[test]
    fn test_zero_shot_has_no_shot_block() {
        for format in PromptFormat::ALL {
            let prompt = TemplateRenderer.render("It rained.", &[], format);
            assert!(prompt.shot_block.is_none());
            assert_eq!(prompt.text(), prompt.main_block);
        }
    }

    #[test]
    fn test_shot_block_precedes_main_block() {
        for format in PromptFormat::ALL {
            let prompt = TemplateRenderer.render("It rained.", &shots(), format);
            let shot_block = prompt.shot_block.clone().unwrap();
            let text = prompt.text();
            assert!(text.starts_with(&shot_block));
            assert!(text.ends_with(&prompt.main_block));
            assert_eq!(
                text,
                format!("{shot_block}{BLOCK_SEPARATOR}{}", prompt.main_block)
            );
        }
    }

    #[test]
    fn test_template_examples_text() {
        let block = TemplateRenderer.render_examples(&shots(), PromptFormat::Text);
        assert_eq!(
            block,
            "What a great day!\nLabel: positive\n\nI hate waiting.\nLabel: negative"
        );
    }

    #[test]
    fn test_template_examples_markdown() {
        let block = TemplateRenderer.render_examples(&shots(), PromptFormat::Markdown);
        assert_eq!(
            block,
            "**What a great day!**\n**Label: positive**\n\n**I hate waiting.**\n**Label: negative**"
        );
    }

    #[test]
    fn test_template_examples_yaml() {
        let block = TemplateRenderer.render_examples(&shots(), PromptFormat::Yaml);
        assert_eq!(
            block,
            "- input: What a great day!\n  output: Label: positive\n- input: I hate waiting.\n  output: Label: negative"
        );
    }

    #[test]
    fn test_template_examples_json() {
        let block = TemplateRenderer.render_examples(&shots(), PromptFormat::Json);
        assert_eq!(
            block,
            "{\"input\": \"What a great day!\", \"output\": \"Label: positive\"}\n{\"input\": \"I hate waiting.\", \"output\": \"Label: negative\"}"
        );
    }

    #[test]
    fn test_template_main_blocks() {
        let r = TemplateRenderer;
        assert_eq!(
            r.render_main(" Fine. ", PromptFormat::Text),
            format!("{INSTRUCTION}\nFine.")
        );
        assert_eq!(
            r.render_main("Fine.", PromptFormat::Markdown),
            format!("**Instruction**: {INSTRUCTION}\n**Input**: Fine.")
        );
        assert_eq!(
            r.render_main("Fine.", PromptFormat::Yaml),
            format!("instruction: {INSTRUCTION}\ninput: Fine.")
        );
        assert_eq!(
            r.render_main("Fine.", PromptFormat::Json),
            format!("{{\"instruction\": \"{INSTRUCTION}\", \"input\": \"Fine.\"}}")
        );
    }

    #[test]
    fn test_template_does_not_escape() {
        let main = TemplateRenderer.render_main("He said \"wow\" {!}", PromptFormat::Json);
        assert!(main.ends_with("\"input\": \"He said \"wow\" {!}\"}"));
        assert!(serde_json::from_str::<serde_json::Value>(&main).is_err());
    }

    #[test]
    fn test_escaped_json_is_valid() {
        let main = EscapedRenderer.render_main("He said \"wow\" {!}", PromptFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&main).unwrap();
        assert_eq!(value["input"], "He said \"wow\" {!}");
        assert_eq!(value["instruction"], INSTRUCTION);

        let block = EscapedRenderer.render_examples(&shots(), PromptFormat::Json);
        for line in block.lines() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(value["output"].as_str().unwrap().starts_with("Label:"));
        }
    }

    #[test]
    fn test_escaped_yaml_parses() {
        let block = EscapedRenderer.render_examples(&shots(), PromptFormat::Yaml);
        let parsed: Vec<std::collections::BTreeMap<String, String>> =
            serde_yaml::from_str(&block).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["input"], "What a great day!");
        assert_eq!(parsed[1]["output"], "Label: negative");
    }

    #[test]
    fn test_escaped_markdown() {
        let main = EscapedRenderer.render_main("a *bold* claim", PromptFormat::Markdown);
        assert!(main.ends_with("**Input**: a \\*bold\\* claim"));
    }

    #[test]
    fn test_renderers_agree_on_text() {
        let a = TemplateRenderer.render("Okay.", &shots(), PromptFormat::Text);
        let b = EscapedRenderer.render("Okay.", &shots(), PromptFormat::Text);
        assert_eq!(a, b);
    }

    #[test]
    fn test_renderer_for() {
        let r = renderer_for(RendererKind::Template);
        assert_eq!(
            r.render_main("x", PromptFormat::Json),
            TemplateRenderer.render_main("x", PromptFormat::Json)
        );
    }
}
