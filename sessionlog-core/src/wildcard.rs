//! Wildcard name masks used to route logger names.
//!
//! A mask is a `;`-separated list of patterns; it matches when any pattern
//! matches. `*` matches any run of characters (including none), `?` exactly
//! one character. Each pattern is compiled once into a fast path (match all,
//! match nothing, exact compare) or into a chunk list walked with an explicit
//! backtracking stack.

pub const WILDCARD_ANY: char = '*';
pub const WILDCARD_ONE: char = '?';
pub const WILDCARD_SEPARATOR: char = ';';

#[derive(Debug, Clone, PartialEq, Eq)]
enum Chunk {
    One,
    Any,
    Literal(Vec<char>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Everything,
    Nothing,
    Exact(String),
    Chunks(Vec<Chunk>),
}

impl Pattern {
    fn compile(pattern: &str) -> Self {
        if pattern == "*" {
            Pattern::Everything
        } else if pattern.is_empty() {
            Pattern::Nothing
        } else if !pattern.contains([WILDCARD_ANY, WILDCARD_ONE]) {
            Pattern::Exact(pattern.to_string())
        } else {
            Pattern::Chunks(chunks(pattern))
        }
    }

    fn is_match(&self, candidate: &str, chars: &[char]) -> bool {
        match self {
            Pattern::Everything => true,
            Pattern::Nothing => false,
            Pattern::Exact(exact) => exact == candidate,
            Pattern::Chunks(chunks) => match_chunks(chunks, chars),
        }
    }
}

/// A compiled, immutable wildcard mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardExpression {
    expression: String,
    case_sensitive: bool,
    patterns: Vec<Pattern>,
}

impl WildcardExpression {
    pub fn new(expression: &str, case_sensitive: bool) -> Self {
        let mut clean = clean_up(expression);
        if !case_sensitive {
            clean = clean.to_lowercase();
        }
        let patterns = if clean == "*" {
            vec![Pattern::Everything]
        } else {
            let mut seen: Vec<&str> = Vec::new();
            for part in clean.split(WILDCARD_SEPARATOR).map(str::trim) {
                if !part.is_empty() && !seen.contains(&part) {
                    seen.push(part);
                }
            }
            seen.into_iter().map(Pattern::compile).collect()
        };
        Self {
            expression: expression.to_string(),
            case_sensitive,
            patterns,
        }
    }

    /// Case-insensitive mask, the default for logger routing.
    pub fn mask(expression: &str) -> Self {
        Self::new(expression, false)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        match self.patterns.as_slice() {
            [] => false,
            [Pattern::Everything] => true,
            patterns => {
                let mut candidate = clean_up(candidate);
                if !self.case_sensitive {
                    candidate = candidate.to_lowercase();
                }
                let chars: Vec<char> = candidate.chars().collect();
                patterns
                    .iter()
                    .any(|pattern| pattern.is_match(&candidate, &chars))
            }
        }
    }
}

/// Strips control characters and surrounding whitespace.
pub(crate) fn clean_up(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

fn chunks(pattern: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut literal = Vec::new();
    for c in pattern.chars() {
        match c {
            WILDCARD_ANY | WILDCARD_ONE => {
                if !literal.is_empty() {
                    chunks.push(Chunk::Literal(std::mem::take(&mut literal)));
                }
                if c == WILDCARD_ONE {
                    chunks.push(Chunk::One);
                } else if chunks.last() != Some(&Chunk::Any) {
                    // consecutive '*' collapse into one
                    chunks.push(Chunk::Any);
                }
            }
            _ => literal.push(c),
        }
    }
    if !literal.is_empty() {
        chunks.push(Chunk::Literal(literal));
    }
    chunks
}

fn find(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.len() > haystack.len() - from {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| haystack[i..].starts_with(needle))
}

fn match_chunks(chunks: &[Chunk], s: &[char]) -> bool {
    // Resumption points: (literal chunk index, cursor to search from). Popping one
    // re-enters skip mode and looks for a later occurrence of that literal.
    let mut stack: Vec<(usize, usize)> = Vec::new();
    let mut n = 0;
    let mut p = 0;
    let mut skip = false;

    macro_rules! backtrack {
        () => {
            match stack.pop() {
                Some((chunk, cursor)) => {
                    n = chunk;
                    p = cursor;
                    skip = true;
                    continue;
                }
                None => return false,
            }
        };
    }

    loop {
        let Some(chunk) = chunks.get(n) else {
            if p == s.len() || skip {
                return true;
            }
            backtrack!();
        };
        match chunk {
            Chunk::One => {
                if p >= s.len() {
                    backtrack!();
                }
                p += 1;
                n += 1;
            }
            Chunk::Any => {
                skip = true;
                n += 1;
            }
            Chunk::Literal(literal) if skip => {
                // Later occurrences only move the cursor further right, so a miss here
                // cannot be repaired by backtracking.
                let Some(found) = find(s, literal, p) else {
                    return false;
                };
                if found + 1 < s.len() {
                    stack.push((n, found + 1));
                }
                p = found + literal.len();
                skip = false;
                n += 1;
            }
            Chunk::Literal(literal) => {
                if p < s.len() && s[p..].starts_with(literal) {
                    p += literal.len();
                    n += 1;
                } else {
                    backtrack!();
                }
            }
        }
    }
}
