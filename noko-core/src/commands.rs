// ABOUTME: Command parsing for prefixed chat messages
// ABOUTME: Also provides edit-distance suggestions for mistyped command names

/// Represents a parsed command from a chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The command name (without prefix), lowercased
    pub name: String,
    /// Parsed arguments (handles quoted strings)
    pub args: Vec<String>,
    /// The raw argument string after the command name
    pub raw_args: String,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Vec<String>, raw_args: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args,
            raw_args: raw_args.into(),
        }
    }

    pub fn first_arg(&self) -> Option<&str> {
        self.args.first().map(|s| s.as_str())
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(|s| s.as_str())
    }

    /// Raw text after skipping the first `n` whitespace-separated words
    pub fn rest_after(&self, n: usize) -> &str {
        let mut rest = self.raw_args.trim_start();
        for _ in 0..n {
            rest = match rest.split_once(char::is_whitespace) {
                Some((_, tail)) => tail.trim_start(),
                None => "",
            };
        }
        rest
    }

    /// Same arguments under a different command name
    pub fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }
}

/// Result of parsing a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    /// A command was recognized
    Command(Command),
    /// A regular message (not a command)
    Message(String),
    /// Empty or whitespace-only message
    Ignore,
}

impl ParseResult {
    pub fn is_command(&self) -> bool {
        matches!(self, ParseResult::Command(_))
    }

    pub fn as_command(&self) -> Option<&Command> {
        match self {
            ParseResult::Command(cmd) => Some(cmd),
            _ => None,
        }
    }
}

/// Split arguments on whitespace, keeping quoted strings together
fn parse_args(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => {
                quote = None;
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            (None, c) if c.is_whitespace() => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        args.push(current);
    }
    args
}

/// Classify a chat message as a command, a plain message, or nothing.
///
/// A command is the room's prefix immediately followed by an alphabetic
/// name, e.g. `.ping` or `!tell bob "see you"`.
pub fn parse_message(body: &str, prefix: &str) -> ParseResult {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return ParseResult::Ignore;
    }

    if let Some(after) = trimmed.strip_prefix(prefix) {
        if after.chars().next().is_some_and(|c| c.is_alphabetic()) {
            let (name, raw_args) = match after.split_once(char::is_whitespace) {
                Some((name, rest)) => (name, rest.trim()),
                None => (after, ""),
            };
            return ParseResult::Command(Command::new(
                name.to_lowercase(),
                parse_args(raw_args),
                raw_args,
            ));
        }
    }

    ParseResult::Message(trimmed.to_string())
}

/// Classic edit distance over chars
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Closest candidate to a mistyped name.
///
/// Only names of 5 to 15 characters get suggestions, and only candidates
/// within distance 2 (and closer than the name's length) qualify.
pub fn closest_command<'a>(
    name: &str,
    candidates: impl IntoIterator<Item = &'a str>,
) -> Option<&'a str> {
    let len = name.chars().count();
    if !(5..=15).contains(&len) {
        return None;
    }
    candidates
        .into_iter()
        .map(|c| (levenshtein(name, c), c))
        .filter(|(d, _)| *d <= 2 && *d < len)
        .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)))
        .map(|(_, c)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_command() {
        let result = parse_message(".ping", ".");
        assert!(matches!(
            result,
            ParseResult::Command(ref cmd) if cmd.name == "ping"
        ));
    }

    #[test]
    fn test_parse_command_with_args() {
        match parse_message(".tell bob see you later", ".") {
            ParseResult::Command(cmd) => {
                assert_eq!(cmd.name, "tell");
                assert_eq!(cmd.args, vec!["bob", "see", "you", "later"]);
                assert_eq!(cmd.raw_args, "bob see you later");
                assert_eq!(cmd.rest_after(1), "see you later");
            }
            other => panic!("Expected command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_multichar_prefix() {
        let result = parse_message("noko: help me", "noko:");
        assert_eq!(result.as_command().map(|c| c.name.as_str()), Some("help"));
    }

    #[test]
    fn test_parse_name_is_lowercased() {
        let result = parse_message(".PING", ".");
        assert_eq!(result.as_command().map(|c| c.name.as_str()), Some("ping"));
    }

    #[test]
    fn test_parse_regular_message() {
        assert_eq!(
            parse_message("  hello there ", "."),
            ParseResult::Message("hello there".into())
        );
    }

    #[test]
    fn test_prefix_needs_alphabetic_name() {
        assert!(!parse_message("...", ".").is_command());
        assert!(!parse_message(". ping", ".").is_command());
        assert!(!parse_message(".5 stars", ".").is_command());
    }

    #[test]
    fn test_parse_empty_message() {
        assert_eq!(parse_message("", "."), ParseResult::Ignore);
        assert_eq!(parse_message("   \t ", "."), ParseResult::Ignore);
    }

    #[test]
    fn test_parse_quoted_args() {
        let cmd = parse_message(".tell \"big bob\" 'hi there' now", ".");
        assert_eq!(
            cmd.as_command().unwrap().args,
            vec!["big bob", "hi there", "now"]
        );
    }

    #[test]
    fn test_rest_after_past_end() {
        let cmd = Command::new("x", vec![], "one");
        assert_eq!(cmd.rest_after(3), "");
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("remindme", "remindme"), 0);
        assert_eq!(levenshtein("", "abc"), 3);
    }

    #[test]
    fn test_closest_command() {
        let commands = ["remindme", "help", "seen", "tell"];
        assert_eq!(closest_command("remndme", commands), Some("remindme"));
        // too short to get a suggestion
        assert_eq!(closest_command("hepl", commands), None);
        // too far away
        assert_eq!(closest_command("completely", commands), None);
    }
}
