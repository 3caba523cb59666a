mod ask;
mod config;
mod feed;
mod redline;
mod upload;

use anyhow::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::analysis::Redline;
use crate::state::AppState;

pub use ask::spawn_printer;

const MAX_CHUNK: usize = 4000;

pub const HELP: &str = "\
Contract
  /upload <path>          analyze a contract (PDF, DOCX or text)
  /score                  current risk score
  /flags                  risk flags and deviations with their redline state
  /redline flag <i>       apply the redline for flag i
  /redline dev <i>        apply the redline for deviation i
  /redline batch f0 d2..  apply several redlines at once
  /explain <i>            plain-language explanation of flag i
  /map <i>                statute that governs flag i
  /report                 download the PDF report
  /purge                  forget the uploaded contract here and on the server
Assistant
  /ask <question>         streamed answer (bare text does the same)
  /quick <question>       one-shot answer
  /mode <m>               Professional, ELI5 or Negotiator
  /config                 show settings
  /history                show the conversation
  /clear                  start a new conversation
Legal pulse
  /feed                   headlines, current one marked
  /faq                    recent questions
  /next /prev /goto <i>   move the carousel
  /pause /resume          hold or resume autoplay
/help  /quit";

/// One parsed REPL line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Upload(String),
    Score,
    Flags,
    Redline(Vec<Redline>),
    Explain(usize),
    Map(usize),
    Report,
    Purge,
    Ask(String),
    Quick(String),
    Mode(Option<String>),
    Config,
    History,
    Clear,
    Feed,
    Faq,
    Next,
    Prev,
    Goto(usize),
    Pause,
    Resume,
    Help,
    Quit,
}

impl Command {
    /// Parse one input line. `Ok(None)` for blank input; `Err` carries a
    /// usage hint for the user.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Command::Ask(line.to_string())));
        };

        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };

        let command = match name {
            "upload" => Command::Upload(required(args, "/upload <path>")?),
            "score" => Command::Score,
            "flags" => Command::Flags,
            "redline" => Command::Redline(parse_redlines(args)?),
            "explain" => Command::Explain(index(args, "/explain <i>")?),
            "map" => Command::Map(index(args, "/map <i>")?),
            "report" => Command::Report,
            "purge" => Command::Purge,
            "ask" => Command::Ask(required(args, "/ask <question>")?),
            "quick" => Command::Quick(required(args, "/quick <question>")?),
            "mode" => Command::Mode(Some(args.to_string()).filter(|a| !a.is_empty())),
            "config" => Command::Config,
            "history" => Command::History,
            "clear" => Command::Clear,
            "feed" => Command::Feed,
            "faq" => Command::Faq,
            "next" => Command::Next,
            "prev" => Command::Prev,
            "goto" => Command::Goto(index(args, "/goto <i>")?),
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("Unknown command `/{}`. Try /help.", other)),
        };
        Ok(Some(command))
    }
}

fn required(args: &str, usage: &str) -> Result<String, String> {
    if args.is_empty() {
        Err(format!("Usage: {}", usage))
    } else {
        Ok(args.to_string())
    }
}

fn index(args: &str, usage: &str) -> Result<usize, String> {
    args.parse().map_err(|_| format!("Usage: {}", usage))
}

fn parse_redlines(args: &str) -> Result<Vec<Redline>, String> {
    const USAGE: &str = "Usage: /redline flag <i> | /redline dev <i> | /redline batch f0 d2 ...";
    let mut words = args.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some("flag"), Some(i), None) => Ok(vec![Redline::Flag(index(i, "/redline flag <i>")?)]),
        (Some("dev"), Some(i), None) => {
            Ok(vec![Redline::Deviation(index(i, "/redline dev <i>")?)])
        }
        (Some("batch"), Some(_), _) => args
            .split_whitespace()
            .skip(1)
            .map(|token| {
                Redline::parse(token).ok_or_else(|| format!("Bad redline `{}`. {}", token, USAGE))
            })
            .collect(),
        _ => Err(USAGE.to_string()),
    }
}

/// Whether the REPL keeps reading after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Line-oriented output sink for command replies.
pub struct Console<W> {
    out: W,
}

impl<W: AsyncWrite + Unpin> Console<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Write a reply, split into chunks at line boundaries.
    pub async fn say(&mut self, text: impl AsRef<str>) -> Result<()> {
        for chunk in split_chunks(text.as_ref(), MAX_CHUNK) {
            self.out.write_all(chunk.as_bytes()).await?;
            if !chunk.ends_with('\n') {
                self.out.write_all(b"\n").await?;
            }
        }
        self.out.flush().await?;
        Ok(())
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

/// Split `text` into pieces of at most `max` bytes, preferring line breaks,
/// then spaces, and never cutting inside a character.
fn split_chunks(text: &str, max: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= max {
            chunks.push(remaining);
            break;
        }
        let mut end = max;
        while end > 0 && !remaining.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = remaining.chars().next().map_or(remaining.len(), char::len_utf8);
        }
        let split_at = remaining[..end]
            .rfind('\n')
            .or_else(|| remaining[..end].rfind(' '))
            .map(|i| i + 1)
            .unwrap_or(end);
        chunks.push(&remaining[..split_at]);
        remaining = &remaining[split_at..];
    }
    chunks
}

/// Run one command against the session.
pub async fn dispatch<W: AsyncWrite + Unpin>(
    state: &AppState,
    console: &mut Console<W>,
    command: Command,
) -> Result<Flow> {
    match command {
        Command::Upload(path) => upload::upload(state, console, &path).await?,
        Command::Report => upload::report(state, console).await?,
        Command::Purge => upload::purge(state, console).await?,
        Command::Score => redline::score(state, console).await?,
        Command::Flags => redline::flags(state, console).await?,
        Command::Redline(redlines) => redline::apply(state, console, redlines).await?,
        Command::Explain(i) => redline::explain(state, console, i).await?,
        Command::Map(i) => redline::map(state, console, i).await?,
        Command::Ask(question) => ask::ask(state, console, &question).await?,
        Command::Quick(question) => ask::quick(state, console, &question).await?,
        Command::History => ask::history(state, console).await?,
        Command::Clear => ask::clear(state, console).await?,
        Command::Mode(mode) => config::mode(state, console, mode.as_deref()).await?,
        Command::Config => config::config(state, console).await?,
        Command::Feed => feed::feed(state, console).await?,
        Command::Faq => feed::faq(state, console).await?,
        Command::Next => feed::navigate(state, console, feed::Nav::Next).await?,
        Command::Prev => feed::navigate(state, console, feed::Nav::Prev).await?,
        Command::Goto(i) => feed::navigate(state, console, feed::Nav::Goto(i)).await?,
        Command::Pause => feed::hold(state, console, true).await?,
        Command::Resume => feed::hold(state, console, false).await?,
        Command::Help => console.say(HELP).await?,
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_bare_text_is_ask() {
        assert_eq!(
            Command::parse("  Is clause 7 enforceable? ").unwrap(),
            Some(Command::Ask("Is clause 7 enforceable?".to_string()))
        );
        assert_eq!(Command::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_commands_with_args() {
        assert_eq!(
            Command::parse("/upload ./contracts/nda v2.pdf").unwrap(),
            Some(Command::Upload("./contracts/nda v2.pdf".to_string()))
        );
        assert_eq!(Command::parse("/goto 3").unwrap(), Some(Command::Goto(3)));
        assert_eq!(Command::parse("/mode").unwrap(), Some(Command::Mode(None)));
        assert_eq!(
            Command::parse("/mode eli5").unwrap(),
            Some(Command::Mode(Some("eli5".to_string())))
        );
        assert_eq!(Command::parse("/exit").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn test_parse_redlines() {
        assert_eq!(
            Command::parse("/redline flag 2").unwrap(),
            Some(Command::Redline(vec![Redline::Flag(2)]))
        );
        assert_eq!(
            Command::parse("/redline dev 0").unwrap(),
            Some(Command::Redline(vec![Redline::Deviation(0)]))
        );
        assert_eq!(
            Command::parse("/redline batch f0 d1 F3").unwrap(),
            Some(Command::Redline(vec![
                Redline::Flag(0),
                Redline::Deviation(1),
                Redline::Flag(3)
            ]))
        );
        assert!(Command::parse("/redline batch f0 x1").is_err());
        assert!(Command::parse("/redline batch").is_err());
        assert!(Command::parse("/redline flag two").is_err());
    }

    #[test]
    fn test_usage_errors() {
        assert_eq!(
            Command::parse("/ask").unwrap_err(),
            "Usage: /ask <question>"
        );
        assert!(Command::parse("/explain").is_err());
        assert!(Command::parse("/frobnicate").unwrap_err().contains("/help"));
    }

    #[test]
    fn test_split_chunks_prefers_lines() {
        let text = "aaaa\nbbbb\ncccc\n";
        assert_eq!(split_chunks(text, 10), vec!["aaaa\nbbbb\n", "cccc\n"]);
        assert_eq!(split_chunks("short", 10), vec!["short"]);
    }

    #[test]
    fn test_split_chunks_respects_char_boundaries() {
        let text = "₹₹₹₹";
        let chunks = split_chunks(text, 4);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| c.len() <= 4));
    }

    #[tokio::test]
    async fn test_console_terminates_lines() {
        let mut console = Console::new(Vec::new());
        console.say("Score: 38").await.unwrap();
        console.say("done\n").await.unwrap();
        let out = String::from_utf8(console.into_inner()).unwrap();
        assert_eq!(out, "Score: 38\ndone\n");
    }
}
