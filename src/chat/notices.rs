/// First message of a brand-new conversation.
pub const GREETING: &str = "Hello! I'm your contract assistant. I've analyzed your contract. \
You can ask me anything about it!";

/// Replaces the log on `clear()`.
pub const CLEARED: &str = "Chat cleared. How else can I help you with this contract?";

/// Shown when no answer could be obtained at all.
pub const CONNECTION_FAILED: &str = "I'm sorry, I'm having trouble connecting to the analysis \
service. Please ensure the backend is running.";

/// Appended after a partial answer when the stream dies mid-way.
pub const INTERRUPTED: &str = "(The connection dropped before I could finish this answer.)";

/// Canned prompts listed by `/config`.
pub const SUGGESTED_QUESTIONS: &[(&str, &str)] = &[
    (
        "Summarize Risks",
        "Can you provide a quick summary of the top 3 risks in this contract?",
    ),
    (
        "Check Compliance",
        "Is this contract compliant with the Indian Contract Act?",
    ),
    (
        "Help Negotiate",
        "Give me 3 points I should negotiate to make this contract fairer for me.",
    ),
    (
        "ELI5 Clauses",
        "Pick the most complex clause and explain it like I am 5.",
    ),
];
