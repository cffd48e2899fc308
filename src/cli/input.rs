//! Terminal line input for the interactive loop

use crate::session::coordinator::InputSource;
use crate::utils;
use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{self, AsyncBufReadExt, BufReader, Lines, Stdin};

pub struct TerminalInput {
    lines: Lines<BufReader<Stdin>>,
}

impl TerminalInput {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(io::stdin()).lines(),
        }
    }
}

impl Default for TerminalInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InputSource for TerminalInput {
    async fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        utils::print_prompt(prompt);
        Ok(self.lines.next_line().await?)
    }
}
