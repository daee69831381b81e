//! Prompt grammars: when does device output end in a prompt?

use regex::bytes::Regex;

/// Default terminator: `#` or `>` ending the output.
pub const DEFAULT_TERMINATOR: &str = r"[#>]";

/// Trait for prompt detection strategies.
///
/// Implementations decide whether the accumulated output ends in a prompt
/// and what device name that prompt carries.
pub trait PromptGrammar: Send + Sync {
    /// `tail` is the end of the accumulated output, with trailing
    /// whitespace already removed.
    fn is_terminated(&self, tail: &[u8]) -> bool;

    /// Strip the terminator from a prompt line, leaving the device name.
    fn prompt_name<'a>(&self, prompt: &'a str) -> &'a str;
}

/// Regex-based prompt grammar (the default implementation).
///
/// Known heuristic limit: a config line that itself ends in the terminator
/// character (e.g. a `banner` ending in `#`) stops a strict read early.
#[derive(Debug, Clone)]
pub struct RegexGrammar {
    /// Anchored at end of the trimmed tail.
    terminator: Regex,

    /// Strings that must NOT appear in the final line for a match.
    not_contains: Vec<String>,

    /// Optional shape the whole final line must have.
    prompt_line: Option<Regex>,
}

impl RegexGrammar {
    /// Build a grammar from a terminator pattern such as `[#>]`.
    ///
    /// The pattern is anchored to the end of the output by
    /// [`compile_prompt_pattern`].
    pub fn new(terminator: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            terminator: compile_prompt_pattern(terminator)?,
            not_contains: Vec::new(),
            prompt_line: None,
        })
    }

    /// Build a grammar with strings that veto a match, such as `(config`.
    pub fn with_not_contains(
        terminator: &str,
        not_contains: Vec<String>,
    ) -> Result<Self, regex::Error> {
        let mut grammar = Self::new(terminator)?;
        grammar.not_contains = not_contains;
        Ok(grammar)
    }

    /// Require the final line to match `pattern` as a whole, e.g.
    /// `[\w.\-@/:()]{1,63}[#>]` for IOS hostnames.
    pub fn with_prompt_line(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.prompt_line = Some(Regex::new(&format!("^(?:{})$", pattern))?);
        Ok(self)
    }
}

impl Default for RegexGrammar {
    fn default() -> Self {
        Self::new(DEFAULT_TERMINATOR).expect("default terminator pattern is valid")
    }
}

impl PromptGrammar for RegexGrammar {
    fn is_terminated(&self, tail: &[u8]) -> bool {
        if !self.terminator.is_match(tail) {
            return false;
        }
        if self.not_contains.is_empty() && self.prompt_line.is_none() {
            return true;
        }

        let last_line = match memchr::memrchr2(b'\n', b'\r', tail) {
            Some(pos) => &tail[pos + 1..],
            None => tail,
        };
        if let Some(shape) = &self.prompt_line {
            if !shape.is_match(last_line.trim_ascii()) {
                return false;
            }
        }

        let last_line = String::from_utf8_lossy(last_line);
        !self.not_contains.iter().any(|nc| last_line.contains(nc.as_str()))
    }

    fn prompt_name<'a>(&self, prompt: &'a str) -> &'a str {
        let prompt = prompt.trim();
        match self.terminator.find(prompt.as_bytes()) {
            Some(m) => prompt[..m.start()].trim_end(),
            None => prompt,
        }
    }
}

/// Compile a terminator pattern into a regex anchored at end of text.
///
/// If the pattern does not already end with `$`, `\s*$` is appended.
pub fn compile_prompt_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let pattern = if pattern.ends_with('$') {
        pattern.to_string()
    } else {
        format!("(?:{})\\s*$", pattern)
    };

    Regex::new(&pattern)
}
