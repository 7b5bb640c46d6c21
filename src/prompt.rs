use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default system instruction sent ahead of every question.
pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful AI assistant. Be concise and clear in your responses. \nMaintain context of the conversation to provide relevant and coherent answers.";

/// Placeholder filled with the caller's question.
pub const QUESTION_VARIABLE: &str = "question";

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Chat message for the completion API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PromptError {
    #[error("missing variable `{0}` in prompt template")]
    MissingVariable(String),

    #[error("unclosed placeholder starting at offset {0}")]
    UnclosedPlaceholder(usize),

    #[error("single '}}' encountered at offset {0}")]
    UnmatchedBrace(usize),
}

enum Segment {
    Text(String),
    Variable(String),
}

/// A role-tagged fragment with `{name}` placeholders.
///
/// `{{` and `}}` are literal braces. Substituted values are inserted as-is
/// and never re-parsed.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    role: Role,
    template: String,
}

impl MessageTemplate {
    pub fn new(role: Role, template: impl Into<String>) -> Self {
        Self {
            role,
            template: template.into(),
        }
    }

    fn segments(&self) -> Result<Vec<Segment>, PromptError> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut chars = self.template.char_indices().peekable();

        while let Some((offset, c)) = chars.next() {
            match c {
                '{' => {
                    if matches!(chars.peek(), Some((_, '{'))) {
                        chars.next();
                        text.push('{');
                        continue;
                    }
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some((_, '}')) => break,
                            Some((_, c)) => name.push(c),
                            None => return Err(PromptError::UnclosedPlaceholder(offset)),
                        }
                    }
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Variable(name.trim().to_string()));
                }
                '}' => {
                    if matches!(chars.peek(), Some((_, '}'))) {
                        chars.next();
                        text.push('}');
                    } else {
                        return Err(PromptError::UnmatchedBrace(offset));
                    }
                }
                c => text.push(c),
            }
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        Ok(segments)
    }

    pub fn format(&self, vars: &BTreeMap<&str, &str>) -> Result<ChatMessage, PromptError> {
        let mut content = String::with_capacity(self.template.len());
        for segment in self.segments()? {
            match segment {
                Segment::Text(text) => content.push_str(&text),
                Segment::Variable(name) => {
                    let value = vars
                        .get(name.as_str())
                        .ok_or(PromptError::MissingVariable(name))?;
                    content.push_str(value);
                }
            }
        }
        Ok(ChatMessage {
            role: self.role,
            content,
        })
    }
}

/// Two-turn chat template: a system instruction followed by the user turn.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    messages: Vec<MessageTemplate>,
}

impl PromptTemplate {
    pub fn chat(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![
                MessageTemplate::new(Role::System, system),
                MessageTemplate::new(Role::User, user),
            ],
        }
    }

    /// The template used by `/ask`: `system` followed by the bare question.
    pub fn ask(system: impl Into<String>) -> Self {
        Self::chat(system, format!("{{{}}}", QUESTION_VARIABLE))
    }

    /// Variable names referenced by the template, in order of first use.
    pub fn input_variables(&self) -> Result<Vec<String>, PromptError> {
        let mut names: Vec<String> = Vec::new();
        for message in &self.messages {
            for segment in message.segments()? {
                if let Segment::Variable(name) = segment {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
        }
        Ok(names)
    }

    pub fn format(&self, vars: &BTreeMap<&str, &str>) -> Result<Vec<ChatMessage>, PromptError> {
        self.messages.iter().map(|m| m.format(vars)).collect()
    }

    pub fn format_question(&self, question: &str) -> Result<Vec<ChatMessage>, PromptError> {
        let mut vars = BTreeMap::new();
        vars.insert(QUESTION_VARIABLE, question);
        self.format(&vars)
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::ask(DEFAULT_SYSTEM_MESSAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_two_turns() {
        let messages = PromptTemplate::default()
            .format_question("What is Rust?")
            .unwrap();
        assert_eq!(
            messages,
            vec![
                ChatMessage::system(DEFAULT_SYSTEM_MESSAGE),
                ChatMessage::user("What is Rust?"),
            ]
        );
    }

    #[test]
    fn test_question_with_braces_is_literal() {
        let question = "what does {x} mean in format!(\"{}\")? }}";
        let messages = PromptTemplate::default().format_question(question).unwrap();
        assert_eq!(messages[1].content, question);
    }

    #[test]
    fn test_escaped_braces() {
        let template = PromptTemplate::chat("use {{json}} output", "{question}");
        let messages = template.format_question("hi").unwrap();
        assert_eq!(messages[0].content, "use {json} output");
    }

    #[test]
    fn test_missing_variable() {
        let template = PromptTemplate::ask("You answer in {language}.");
        assert_eq!(
            template.format_question("hi").unwrap_err(),
            PromptError::MissingVariable("language".to_string())
        );
    }

    #[test]
    fn test_malformed_templates() {
        assert_eq!(
            PromptTemplate::ask("broken {oops").format_question("q").unwrap_err(),
            PromptError::UnclosedPlaceholder(7)
        );
        assert_eq!(
            PromptTemplate::ask("stray } here").format_question("q").unwrap_err(),
            PromptError::UnmatchedBrace(6)
        );
    }

    #[test]
    fn test_input_variables() {
        let template = PromptTemplate::chat("{tone} and {tone}", "{question} in {language}");
        assert_eq!(
            template.input_variables().unwrap(),
            vec!["tone", "question", "language"]
        );
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let line = serde_json::to_string(&ChatMessage::user("hi")).unwrap();
        assert_eq!(line, r#"{"role":"user","content":"hi"}"#);
    }
}
