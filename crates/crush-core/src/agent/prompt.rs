//! Fixed prompts for the agent's sub-turns.

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful coding assistant operating inside a \
user's workspace. Use the available tools to inspect and modify the project when asked. Keep \
answers short and concrete.";

pub const TITLE_SYSTEM_PROMPT: &str = "Generate a short title for this conversation. Respond \
with the title only: no quotes, no punctuation at the end, at most 50 characters.";

pub const SUMMARY_SYSTEM_PROMPT: &str = "Summarize the conversation so far for a fresh \
assistant taking over this session. Capture the user's goals, decisions made, files touched, \
and any unresolved work. Respond with the summary only.";

pub const SUMMARY_USER_PROMPT: &str = "Provide a detailed but concise summary of our \
conversation above, focusing on information that would be helpful for continuing the \
conversation, including what we did, what we're doing, which files we're working on, and \
what we're going to do next.";

/// Normalizes a model-produced title to a single clean line.
pub fn clean_title(raw: &str) -> String {
    let mut title = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .to_string();
    if title.len() > 80 {
        let mut cut = 80;
        while !title.is_char_boundary(cut) {
            cut -= 1;
        }
        title.truncate(cut);
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_title_takes_first_nonempty_line() {
        assert_eq!(clean_title("\n  \"Fix the build\"  \nsecond"), "Fix the build");
    }

    #[test]
    fn clean_title_truncates_long_output() {
        let long = "x".repeat(200);
        assert_eq!(clean_title(&long).len(), 80);
    }
}
