use crate::conversation::Exchange;

/// One `Question:` / `Answer:` block per exchange, separated by a blank line
pub fn render_text(messages: &[Exchange]) -> String {
    messages
        .iter()
        .map(|exchange| format!("Question: {}\nAnswer: {}\n", exchange.question, exchange.answer))
        .collect::<Vec<_>>()
        .join("\n")
}
