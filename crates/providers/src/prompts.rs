//! Prompt templates for the chat-backed oracles.

use refdesk_core::{Message, Role};

/// System prompt for the reasoning oracle.
///
/// Function calling is the primary channel; the text format is the fallback
/// that models without tool support (or models that ignore it) still follow.
pub const REASONING_SYSTEM_PROMPT: &str = "\
You are a financial reference data assistant. You answer questions about bonds, \
issuers, instruments and credit ratings using ONLY the tools provided. Never \
invent identifiers, ratings or dates: if a tool does not return it, say so.

Work step by step. When you need data, call exactly one tool. When you have \
enough information, reply with the answer as plain text without calling a tool.

If you cannot call tools natively, use this format instead:

Thought: what you need to find out next
Action: the tool name
Action Input: a JSON object with the tool arguments

and finish with:

Thought: I now know the answer
Final Answer: the answer for the user";

/// How many earlier messages the intent classifier sees.
const INTENT_CONTEXT_MESSAGES: usize = 4;

/// Strict YES/NO intent classification prompt for `message`.
pub fn intent_prompt(message: &str, context: &[Message]) -> String {
    let mut prompt = String::from(
        "You are a strict intent classifier for a financial reference data assistant.\n\
         Determine if the following user query is related to financial markets, bonds, \
         issuers, ratings, or reference data.\n",
    );

    let recent = &context[context.len().saturating_sub(INTENT_CONTEXT_MESSAGES)..];
    if !recent.is_empty() {
        prompt.push_str(
            "\nThe query may follow up on this earlier conversation:\n",
        );
        for m in recent {
            let who = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => continue,
            };
            prompt.push_str(&format!("{who}: {}\n", m.content.trim()));
        }
    }

    prompt.push_str(&format!(
        "\nQuery: \"{}\"\n\n\
         Respond with ONLY 'YES' if it is relevant, or 'NO' if it is irrelevant \
         (e.g., about cars, weather, general chat).",
        message.trim()
    ));
    prompt
}
