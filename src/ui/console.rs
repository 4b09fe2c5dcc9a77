use std::fmt::Display;
use std::io::{self, Write};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};

/// Line-oriented terminal: async input so prompts can race other events.
pub struct Console<R = BufReader<Stdin>, W = io::Stdout> {
    lines: Lines<R>,
    out: W,
}

impl Console {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), io::stdout())
    }
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub fn new(reader: R, out: W) -> Self {
        Self {
            lines: reader.lines(),
            out,
        }
    }

    pub fn say(&mut self, text: impl Display) -> io::Result<()> {
        writeln!(self.out, "{}", text)?;
        self.out.flush()
    }

    pub fn header(&mut self) -> io::Result<()> {
        self.say("")?;
        self.say("=== Rclone Mount Manager ===")?;
        self.say("    Manage your cloud drives easily")?;
        self.say("")
    }

    /// Next input line, trimmed. Cancel safe. End of input is an error.
    pub async fn read_line(&mut self) -> io::Result<String> {
        match self.lines.next_line().await? {
            Some(line) => Ok(line.trim().to_string()),
            None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "input closed")),
        }
    }

    pub async fn ask(&mut self, question: &str) -> io::Result<String> {
        write!(self.out, "{}: ", question)?;
        self.out.flush()?;
        self.read_line().await
    }

    /// Re-asks until the answer is one of `choices` (case-insensitive).
    pub async fn choose(&mut self, question: &str, choices: &[String]) -> io::Result<String> {
        let prompt = format!("{} [{}]", question, choices.join("/"));
        loop {
            let answer = self.ask(&prompt).await?.to_lowercase();
            if let Some(choice) = choices.iter().find(|c| c.to_lowercase() == answer) {
                return Ok(choice.clone());
            }
            self.say("Please select one of the available options")?;
        }
    }

    pub async fn confirm(&mut self, question: &str) -> io::Result<bool> {
        loop {
            match self.ask(&format!("{} [y/n]", question)).await?.to_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => self.say("Please enter Y or N")?,
            }
        }
    }

    pub fn writer(&self) -> &W {
        &self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn console(input: &str) -> Console<Cursor<Vec<u8>>, Vec<u8>> {
        Console::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    fn output(console: &Console<Cursor<Vec<u8>>, Vec<u8>>) -> String {
        String::from_utf8_lossy(console.writer()).into_owned()
    }

    #[tokio::test]
    async fn test_choose_retries_until_valid() {
        let mut console = console("7\n B \n");
        let choices = vec!["1".to_string(), "b".to_string()];

        let choice = console.choose("Enter your choice", &choices).await.unwrap();
        assert_eq!(choice, "b");
        assert!(output(&console).contains("Please select one of the available options"));
        assert!(output(&console).contains("Enter your choice [1/b]: "));
    }

    #[tokio::test]
    async fn test_confirm() {
        let mut console = console("maybe\nYes\nn\n");
        assert!(console.confirm("Unmount?").await.unwrap());
        assert!(!console.confirm("Unmount?").await.unwrap());
        assert!(output(&console).contains("Please enter Y or N"));
    }

    #[tokio::test]
    async fn test_end_of_input() {
        let mut console = console("");
        let err = console.read_line().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
