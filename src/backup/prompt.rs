//! Interactive input for the pipelines
//!
//! Pipelines never touch the terminal directly; they ask a [`Prompter`].

use std::io::{self, BufRead, Write};

use crate::crypto::SecureString;
use crate::error::{DvomError, DvomResult};

pub trait Prompter {
    /// Ask for an existing password
    fn password(&self, prompt: &str) -> DvomResult<SecureString>;

    /// Ask for a new password, twice
    fn new_password(&self, prompt: &str) -> DvomResult<SecureString>;

    /// Ask a yes/no question; anything but yes is no
    fn confirm(&self, message: &str) -> DvomResult<bool>;
}

/// Prompts on the controlling terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn password(&self, prompt: &str) -> DvomResult<SecureString> {
        rpassword::prompt_password(prompt)
            .map(SecureString::from)
            .map_err(|e| DvomError::Io(format!("Failed to read password: {}", e)))
    }

    fn new_password(&self, prompt: &str) -> DvomResult<SecureString> {
        let password = self.password(prompt)?;
        if password.is_empty() {
            return Err(DvomError::Validation("password cannot be empty".into()));
        }
        let confirm = self.password("Confirm password: ")?;
        if password.as_str() != confirm.as_str() {
            return Err(DvomError::Validation("passwords do not match".into()));
        }
        Ok(password)
    }

    fn confirm(&self, message: &str) -> DvomResult<bool> {
        print!("{} (y/N): ", message);
        io::stdout().flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(is_yes(&answer))
    }
}

pub(crate) fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
        assert!(!is_yes("yep"));
    }
}
