//! Line-oriented terminal input shared by the chat loop and approval prompts.

use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

/// One reader for every prompt.
///
/// Reads go through a single cancel-safe line stream, so a prompt that is
/// abandoned mid-read (say, an approval cut short by Ctrl+C) leaves the
/// next typed line to whoever asks next.
pub struct Console<R> {
    lines: Mutex<Lines<BufReader<R>>>,
}

impl Console<Stdin> {
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }
}

impl<R: AsyncRead + Unpin> Console<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: Mutex::new(BufReader::new(reader).lines()),
        }
    }

    /// Print `prompt` and wait for a line. `None` at end of input.
    pub async fn read_line(&self, prompt: &str) -> io::Result<Option<String>> {
        let mut lines = self.lines.lock().await;
        let mut stdout = io::stdout();
        write!(stdout, "{prompt}")?;
        stdout.flush()?;
        lines.next_line().await
    }
}
