//! The fork being validated.

use crate::utils::errors::{HarnessError, Result};
use std::io::{BufRead, Write};

/// A fork URL and an optional branch; `None` means "use the default ref".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub source: String,
    pub branch: Option<String>,
}

impl Candidate {
    pub fn new(source: impl Into<String>, branch: Option<String>) -> Result<Self> {
        let source = source.into().trim().to_string();
        if source.is_empty() {
            return Err(HarnessError::InvalidCandidate("fork URL is empty".into()));
        }
        let branch = branch
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty());
        Ok(Self { source, branch })
    }

    /// The branch to pin, falling back to `default` when none was given.
    pub fn branch_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.branch.as_deref().unwrap_or(default)
    }
}

/// Ask for the fork URL and branch on `output`, reading one line each from `input`.
pub fn prompt<R: BufRead, W: Write>(mut input: R, mut output: W) -> Result<Candidate> {
    let source = ask(&mut input, &mut output, "Fork URL: ")?;
    let branch = ask(&mut input, &mut output, "Branch (empty for default): ")?;
    Candidate::new(source, Some(branch))
}

fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> Result<String> {
    let failed = |e: std::io::Error| HarnessError::InvalidCandidate(format!("failed to read input: {e}"));
    write!(output, "{question}").map_err(failed)?;
    output.flush().map_err(failed)?;
    let mut line = String::new();
    input.read_line(&mut line).map_err(failed)?;
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_empty_source_rejected() {
        assert!(matches!(
            Candidate::new("   ", None),
            Err(HarnessError::InvalidCandidate(_))
        ));
    }

    #[test]
    fn test_blank_branch_means_default() {
        let candidate = Candidate::new("https://fork/repo", Some("  ".into())).unwrap();
        assert_eq!(candidate.branch, None);
        assert_eq!(candidate.branch_or("master"), "master");

        let candidate = Candidate::new(" https://fork/repo ", Some("fix-1".into())).unwrap();
        assert_eq!(candidate.source, "https://fork/repo");
        assert_eq!(candidate.branch_or("master"), "fix-1");
    }

    #[test]
    fn test_prompt_reads_two_lines() {
        let input = Cursor::new("https://fork/repo\n\n");
        let mut output = Vec::new();
        let candidate = prompt(input, &mut output).unwrap();
        assert_eq!(candidate.source, "https://fork/repo");
        assert_eq!(candidate.branch, None);

        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("Fork URL: "));
        assert!(shown.contains("Branch (empty for default): "));
    }

    #[test]
    fn test_prompt_eof_is_invalid() {
        let err = prompt(Cursor::new(""), Vec::new()).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidCandidate(_)));
    }
}
