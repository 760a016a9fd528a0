//! Prompt commands typed into the input box.
//!
//! A line starting with `/` can set the system prompt of the current chat
//! instead of being sent as a message:
//!
//! - `/system <text>` uses `<text>` verbatim
//! - `/<name>` uses a built-in prompt
//! - `/reset` clears the system prompt

const BUILTIN_PROMPTS: &[(&str, &str)] = &[
    (
        "translator",
        "You are a translator. Detect the language of every message and translate it into English, \
         correcting grammar and keeping the meaning. Reply with the translation only.",
    ),
    (
        "reviewer",
        "You are a senior software engineer reviewing code. Point out bugs, unclear naming and \
         missing error handling. Be concise and suggest concrete fixes.",
    ),
    (
        "terminal",
        "Act as a Linux terminal. Reply only with the terminal output inside one code block and \
         nothing else. Do not write explanations.",
    ),
    (
        "teacher",
        "You are a patient teacher. Explain concepts step by step with small examples and check \
         understanding with a short question at the end.",
    ),
];

/// Names and prompts of the built-in `/<name>` commands.
pub fn builtin_prompts() -> impl Iterator<Item = (&'static str, &'static str)> {
    BUILTIN_PROMPTS.iter().copied()
}

/// Returns the system prompt a command selects, or `None` when the input is
/// an ordinary message. `/reset` returns an empty prompt.
pub fn is_prompt_command(content: &str) -> Option<String> {
    let command = content.trim().strip_prefix('/')?;
    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };

    match name {
        "system" if !rest.is_empty() => Some(rest.to_string()),
        "system" => None,
        "reset" if rest.is_empty() => Some(String::new()),
        _ if rest.is_empty() => BUILTIN_PROMPTS
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, prompt)| prompt.to_string()),
        _ => None,
    }
}
