//! Operator approval before a patch touches the working tree.

use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, Result};
use clap::ValueEnum;
use dialoguer::Input;
use dialoguer::theme::ColorfulTheme;

/// How patch application is approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ApprovalMode {
    /// Ask on the terminal before every apply.
    Prompt,
    /// Apply without asking.
    Auto,
}

/// Operator decision for one patch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Approved,
    Declined,
    /// Stop the whole run.
    Quit,
}

impl Approval {
    /// Empty input, `y` and `yes` approve; `q` and `quit` stop; anything else declines.
    pub fn parse(answer: &str) -> Self {
        match answer.trim().to_ascii_lowercase().as_str() {
            "" | "y" | "yes" => Self::Approved,
            "q" | "quit" => Self::Quit,
            _ => Self::Declined,
        }
    }
}

/// Source of approval decisions in `prompt` mode.
pub trait Approver {
    fn approve(&self, attempt: u32) -> Result<Approval>;
}

/// Reads the decision from the terminal, or from plain stdin lines when
/// stdin or stdout is not a terminal.
pub struct TerminalApprover;

impl Approver for TerminalApprover {
    fn approve(&self, attempt: u32) -> Result<Approval> {
        let prompt = format!("[prompt] Apply patch attempt {attempt}? [y]es/[n]o/[q]uit");
        if !(io::stdin().is_terminal() && io::stdout().is_terminal()) {
            return read_line_decision(&prompt, io::stdin().lock(), io::stdout());
        }
        let answer: String = Input::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
            .context("read patch approval")?;
        Ok(Approval::parse(&answer))
    }
}

/// Line-oriented fallback. End of input quits.
fn read_line_decision<R: BufRead, W: Write>(prompt: &str, mut input: R, mut output: W) -> Result<Approval> {
    write!(output, "{prompt}: ").context("write approval prompt")?;
    output.flush().context("flush approval prompt")?;
    let mut answer = String::new();
    let read = input
        .read_line(&mut answer)
        .context("read patch approval")?;
    if read == 0 {
        return Ok(Approval::Quit);
    }
    Ok(Approval::parse(&answer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_operator_answers() {
        assert_eq!(Approval::parse(""), Approval::Approved);
        assert_eq!(Approval::parse(" Y "), Approval::Approved);
        assert_eq!(Approval::parse("yes"), Approval::Approved);
        assert_eq!(Approval::parse("q"), Approval::Quit);
        assert_eq!(Approval::parse("QUIT"), Approval::Quit);
        assert_eq!(Approval::parse("n"), Approval::Declined);
        assert_eq!(Approval::parse("maybe"), Approval::Declined);
    }

    #[test]
    fn piped_answers_are_read_line_by_line() {
        let mut shown = Vec::new();
        let decision = read_line_decision("[prompt] Apply?", &b"n\n"[..], &mut shown).expect("read");
        assert_eq!(decision, Approval::Declined);
        assert_eq!(String::from_utf8(shown).expect("utf8"), "[prompt] Apply?: ");

        let decision = read_line_decision("p", &b"\n"[..], Vec::new()).expect("read");
        assert_eq!(decision, Approval::Approved);
    }

    #[test]
    fn closed_stdin_quits() {
        let decision = read_line_decision("p", &b""[..], Vec::new()).expect("read");
        assert_eq!(decision, Approval::Quit);
    }
}
