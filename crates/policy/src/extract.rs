const FENCE: &str = "```";

/// Statement text pulled out of generated text. Untrusted until validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateQuery(String);

impl CandidateQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self(sql.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionFailure {
    NoFencedBlock,
    MultipleFencedBlocks,
    UnterminatedBlock,
    EmptyBlock,
}

impl ExtractionFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            ExtractionFailure::NoFencedBlock => "no_fenced_block",
            ExtractionFailure::MultipleFencedBlocks => "multiple_fenced_blocks",
            ExtractionFailure::UnterminatedBlock => "unterminated_block",
            ExtractionFailure::EmptyBlock => "empty_block",
        }
    }
}

impl std::fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionFailure::NoFencedBlock => {
                write!(f, "generated text contains no fenced code block")
            }
            ExtractionFailure::MultipleFencedBlocks => {
                write!(f, "generated text contains more than one fenced code block")
            }
            ExtractionFailure::UnterminatedBlock => {
                write!(f, "generated text opens a fenced code block that is never closed")
            }
            ExtractionFailure::EmptyBlock => write!(f, "fenced code block is empty"),
        }
    }
}

impl std::error::Error for ExtractionFailure {}

// First words of a statement; never mistaken for a language hint.
const STATEMENT_KEYWORDS: &[&str] = &[
    "ALTER", "CREATE", "DELETE", "DROP", "EXPLAIN", "INSERT", "SELECT", "TABLE", "TRUNCATE",
    "UPDATE", "VALUES", "WITH",
];

/// Pulls the single fenced block out of `generated`.
///
/// A block opens at the first fence that starts a line (after optional
/// indentation) and closes at the next fence. Zero blocks, several blocks,
/// or a dangling fence all fail; the first block is never picked on a guess.
pub fn extract(generated: &str) -> Result<CandidateQuery, ExtractionFailure> {
    let fences = generated.match_indices(FENCE).map(|(idx, _)| idx).collect::<Vec<_>>();

    let Some(first) = fences
        .iter()
        .position(|&idx| starts_line(generated, idx))
    else {
        return Err(ExtractionFailure::NoFencedBlock);
    };

    let (open, close) = match &fences[first..] {
        [_] => return Err(ExtractionFailure::UnterminatedBlock),
        [open, close] => (*open, *close),
        _ => return Err(ExtractionFailure::MultipleFencedBlocks),
    };

    let body = &generated[open + FENCE.len()..close];
    let body = strip_language_hint(body);

    let sql = body.trim();
    if sql.is_empty() {
        return Err(ExtractionFailure::EmptyBlock);
    }

    Ok(CandidateQuery(sql.to_string()))
}

fn starts_line(text: &str, idx: usize) -> bool {
    text[..idx]
        .rsplit('\n')
        .next()
        .is_some_and(|line| line.chars().all(|c| c == ' ' || c == '\t'))
}

// A hint is a bare word on the fence line, e.g. "sql" or "postgresql".
fn strip_language_hint(body: &str) -> &str {
    let Some((first_line, rest)) = body.split_once('\n') else {
        return body;
    };

    let hint = first_line.trim();
    let is_hint = hint
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+'))
        && !STATEMENT_KEYWORDS
            .iter()
            .any(|k| hint.eq_ignore_ascii_case(k));

    if is_hint { rest } else { body }
}
