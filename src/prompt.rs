use serde::Serialize;

use crate::models::{Message, MessageRole};

const HOME_CHEF_PROMPT: &str = "You are an experienced home cook who designs practical, \
tasty meal plans for families.

When someone asks what to eat for breakfast, lunch or dinner, first collect what you need, \
asking all of these at once:
1. How many people are eating?
2. How much time is there, including shopping and cooking?
3. Is a staple (rice, noodles, buns) needed?
4. Any taste preferences or dietary restrictions?
5. Is shopping convenient, or only ingredients at hand?

Then design a complete menu:
- An overview listing every dish with a balanced mix of meat and vegetables, total time, \
and serving order.
- For every dish: name and cooking time; ingredients with quantities (main, secondary, \
seasoning); preparation steps; numbered cooking steps with heat level, exact durations and \
key techniques; substitutions for hard-to-find ingredients.

If the user wants to swap a dish, ask why first, offer two or three alternatives that keep \
the menu balanced, then give the full recipe for the chosen one along with the updated \
overview and total time.

Speak simply and warmly, like a neighbour teaching a friend. Assume a basic home kitchen. \
Never hand out a recipe before the information above has been collected.";

const GENERAL_PROMPT: &str = "You are a helpful AI assistant. Be concise, accurate, and \
friendly. If you don't know something, say so.";

const TRANSLATOR_PROMPT: &str = "You are a professional translator. Translate the user's \
text between Chinese and English, preserving meaning, tone and formatting. Output only the \
translation.";

/// Instruction used by the title-suggestion endpoint.
pub const TITLE_PROMPT: &str = "Write a short title (at most 15 characters) for a \
conversation that starts with the user's message. Output only the title, without quotes.";

/// Supported assistant personas. Unknown keys fall back to [`AssistantRole::HomeChef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssistantRole {
    #[default]
    HomeChef,
    General,
    Translator,
}

impl AssistantRole {
    /// Total lookup: never fails.
    pub fn resolve(key: Option<&str>) -> Self {
        match key.map(|k| k.trim().to_lowercase()).as_deref() {
            Some("home_chef") | Some("chef") => AssistantRole::HomeChef,
            Some("general") => AssistantRole::General,
            Some("translator") => AssistantRole::Translator,
            _ => AssistantRole::default(),
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            AssistantRole::HomeChef => "home_chef",
            AssistantRole::General => "general",
            AssistantRole::Translator => "translator",
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            AssistantRole::HomeChef => HOME_CHEF_PROMPT,
            AssistantRole::General => GENERAL_PROMPT,
            AssistantRole::Translator => TRANSLATOR_PROMPT,
        }
    }
}

pub fn resolve_system_prompt(key: Option<&str>) -> &'static str {
    AssistantRole::resolve(key).system_prompt()
}

/// One entry of the prompt sent upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptTurn {
    pub role: MessageRole,
    pub content: String,
}

impl PromptTurn {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// Builds a fresh prompt: system instruction, `history` in the order given,
/// then the new user turn.
pub fn build_prompt(system: &str, history: &[Message], user_message: &str) -> Vec<PromptTurn> {
    let mut turns = Vec::with_capacity(history.len() + 2);
    turns.push(PromptTurn::new(MessageRole::System, system));
    turns.extend(
        history
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| PromptTurn::new(m.role, m.content.clone())),
    );
    turns.push(PromptTurn::new(MessageRole::User, user_message));
    turns
}
