//! Field-in / field-out completions.
//!
//! A [`Signature`] names the input fields a model receives, the output fields
//! it must produce, and the instruction tying them together. A [`Predictor`]
//! binds a signature to an [`LlmProvider`] and turns one call into a
//! [`Prediction`]: a map of output field name to raw text.
//!
//! Fields travel in both directions as sections introduced by a header line:
//!
//! ```text
//! [[ ## question ## ]]
//! What is DSPy?
//!
//! [[ ## answer ## ]]
//! A framework for programming language models.
//! ```
//!
//! Output parsing is lenient. Unknown sections are kept, missing sections are
//! simply absent, and a reply with no headers at all is assigned to the sole
//! output field when the signature declares exactly one.

use crate::brain::LlmProvider;
use crate::error::LlmError;
use crate::types::{CompletionRequest, Message};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Name → text map used for both inputs and outputs.
pub type FieldMap = BTreeMap<String, String>;

const COMPLETED_MARKER: &str = "completed";

/// A named field with a short description shown to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub description: String,
}

/// The contract of a single model call.
#[derive(Debug, Clone)]
pub struct Signature {
    instruction: String,
    inputs: Vec<FieldSpec>,
    outputs: Vec<FieldSpec>,
}

impl Signature {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Declare an input field.
    pub fn input(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.inputs.push(FieldSpec {
            name: name.into(),
            description: description.into(),
        });
        self
    }

    /// Declare an output field.
    pub fn output(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.outputs.push(FieldSpec {
            name: name.into(),
            description: description.into(),
        });
        self
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn inputs(&self) -> &[FieldSpec] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[FieldSpec] {
        &self.outputs
    }

    /// Render the system prompt describing the field contract.
    pub fn system_prompt(&self) -> String {
        let mut prompt = String::new();
        prompt.push_str(self.instruction.trim());
        prompt.push_str("\n\nYour input fields are:\n");
        for (i, field) in self.inputs.iter().enumerate() {
            prompt.push_str(&format!("{}. `{}`: {}\n", i + 1, field.name, field.description));
        }
        prompt.push_str("Your output fields are:\n");
        for (i, field) in self.outputs.iter().enumerate() {
            prompt.push_str(&format!("{}. `{}`: {}\n", i + 1, field.name, field.description));
        }
        prompt.push_str(
            "\nRespond with every output field in order, each introduced by its header line, \
             and finish with the completed marker:\n\n",
        );
        for field in &self.outputs {
            prompt.push_str(&header(&field.name));
            prompt.push_str(&format!("\n{{{}}}\n\n", field.name));
        }
        prompt.push_str(&header(COMPLETED_MARKER));
        prompt
    }

    /// Render the user message carrying the input values.
    pub fn user_prompt(&self, inputs: &FieldMap) -> String {
        let pairs: Vec<(&str, &str)> = self
            .inputs
            .iter()
            .map(|f| {
                let value = inputs.get(&f.name).map(String::as_str).unwrap_or("");
                (f.name.as_str(), value)
            })
            .collect();
        let mut prompt = render_fields(&pairs);
        let first_output = self
            .outputs
            .first()
            .map(|f| header(&f.name))
            .unwrap_or_default();
        prompt.push_str(&format!(
            "\n\nRespond with the corresponding output fields, starting with the field `{}`, \
             and then ending with the marker for `{}`.",
            first_output,
            header(COMPLETED_MARKER)
        ));
        prompt
    }

    /// Parse a model reply into output fields.
    pub fn parse_reply(&self, reply: &str) -> FieldMap {
        let mut fields = parse_fields(reply);
        if fields.is_empty() && self.outputs.len() == 1 && !reply.trim().is_empty() {
            fields.insert(self.outputs[0].name.clone(), reply.trim().to_string());
        }
        fields
    }
}

fn header(name: &str) -> String {
    format!("[[ ## {} ## ]]", name)
}

fn header_name(line: &str) -> Option<&str> {
    let inner = line
        .trim()
        .strip_prefix("[[ ##")?
        .strip_suffix("## ]]")?
        .trim();
    if !inner.is_empty() && inner.chars().all(|c| c.is_alphanumeric() || c == '_') {
        Some(inner)
    } else {
        None
    }
}

/// Render field sections in the wire format understood by [`parse_fields`].
pub fn render_fields(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(name, value)| format!("{}\n{}", header(name), value))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Split text into `[[ ## name ## ]]` sections.
///
/// Text before the first header is ignored, as is the completed marker.
/// A repeated header keeps its first section.
pub fn parse_fields(text: &str) -> FieldMap {
    let mut fields = FieldMap::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in text.lines() {
        if let Some(name) = header_name(line) {
            close_section(current.take(), &mut fields);
            current = Some((name.to_string(), Vec::new()));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }
    close_section(current, &mut fields);
    fields
}

fn close_section(section: Option<(String, Vec<&str>)>, fields: &mut FieldMap) {
    if let Some((name, lines)) = section
        && name != COMPLETED_MARKER
    {
        fields
            .entry(name)
            .or_insert_with(|| lines.join("\n").trim().to_string());
    }
}

/// Output of one predictor call.
#[derive(Debug, Clone, Default)]
pub struct Prediction {
    fields: FieldMap,
    raw: String,
}

impl Prediction {
    pub fn new(fields: FieldMap, raw: impl Into<String>) -> Self {
        Self {
            fields,
            raw: raw.into(),
        }
    }

    /// The value of an output field, if the model produced it.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// The value of an output field, or the empty string.
    pub fn text(&self, name: &str) -> String {
        self.get(name).unwrap_or_default().to_string()
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// The unparsed model reply.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// A signature bound to a provider.
#[derive(Clone)]
pub struct Predictor {
    provider: Arc<dyn LlmProvider>,
    signature: Signature,
}

impl std::fmt::Debug for Predictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predictor")
            .field("model", &self.provider.model_name())
            .field("signature", &self.signature)
            .finish()
    }
}

impl Predictor {
    pub fn new(provider: Arc<dyn LlmProvider>, signature: Signature) -> Self {
        Self {
            provider,
            signature,
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Run one completion with the given input values.
    pub async fn call(&self, inputs: &[(&str, &str)]) -> Result<Prediction, LlmError> {
        let inputs: FieldMap = inputs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let request = CompletionRequest {
            messages: vec![
                Message::system(self.signature.system_prompt()),
                Message::user(self.signature.user_prompt(&inputs)),
            ],
            ..Default::default()
        };

        let response = self.provider.complete(request).await?;
        let raw = response.text().to_string();
        let fields = self.signature.parse_reply(&raw);
        debug!(
            model = %response.model,
            output_fields = ?fields.keys().collect::<Vec<_>>(),
            tokens = response.usage.total(),
            "Predictor call completed"
        );
        Ok(Prediction::new(fields, raw))
    }
}
