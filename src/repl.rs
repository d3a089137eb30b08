//! Interactive search shell.
//!
//! Any line that is not a command is a query. Results are numbered so that
//! `show N` and `open N` can refer back to them.

use anyhow::{Context, Result};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{CompletionType, Config, EditMode, Editor};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::model::SearchHit;
use crate::search::SearchService;
use crate::stats::WrappedStats;

struct ReplSession {
    service: SearchService,
    last_hits: Vec<SearchHit>,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Search(String),
    Show(usize),
    Open(usize),
    Stats,
    Help,
    Quit,
}

/// Run the shell until `quit` or end of input.
///
/// # Errors
///
/// Returns an error if the line editor cannot be set up or fails.
pub fn run(service: SearchService) -> Result<()> {
    let config = Config::builder()
        .history_ignore_space(true)
        .history_ignore_dups(true)?
        .completion_type(CompletionType::List)
        .edit_mode(EditMode::Emacs)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".xbm_history");
    let _ = rl.load_history(&history_path);

    let mut session = ReplSession {
        service,
        last_hits: Vec::new(),
    };

    info!(
        posts = session.service.corpus().len(),
        strategy = %session.service.strategy(),
        "Starting search shell"
    );
    println!(
        "{} {} bookmarks, {} search. Type a query, 'help', or 'quit'.",
        "xbm".bold().cyan(),
        session.service.corpus().len(),
        session.service.strategy()
    );

    loop {
        let prompt = if session.last_hits.is_empty() {
            "xbm> ".to_string()
        } else {
            format!("xbm [{}]> ", session.last_hits.len())
        };
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;
                debug!(input = %line, "Shell input");
                match parse_command(line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => {
                        if let Err(e) = session.execute(command) {
                            warn!(error = %e, "Shell command failed");
                            eprintln!("{}: {e}", "Error".red());
                        }
                    }
                    Err(message) => eprintln!("{}", message.yellow()),
                }
            }
            Err(ReadlineError::Interrupted) => println!("^C"),
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!(e)).context("Readline failed"),
        }
    }

    if let Err(e) = rl.save_history(&history_path) {
        warn!(error = %e, "Could not save shell history");
    }
    Ok(())
}

impl ReplSession {
    fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Search(query) => {
                let response = self.service.search(&query);
                if let Some(status) = &response.status {
                    println!("{}", status.yellow());
                }
                println!(
                    "{} {} {}",
                    response.hits.len().to_string().cyan(),
                    "results".dimmed(),
                    format!("({} ms)", response.elapsed_ms).dimmed()
                );
                for (idx, hit) in response.hits.iter().enumerate() {
                    println!(
                        "{:>3}. {} @{} {}",
                        idx + 1,
                        format!("{:.2}", hit.score).dimmed(),
                        hit.tweet.author.screen_name.green(),
                        one_line(&hit.tweet.full_text, 70)
                    );
                }
                self.last_hits = response.hits;
            }
            Command::Show(n) => {
                let hit = self.hit(n)?;
                println!(
                    "{} (@{})  {}",
                    hit.tweet.author.name.bold(),
                    hit.tweet.author.screen_name,
                    crate::format_post_date(hit.tweet.timestamp).dimmed()
                );
                for line in textwrap::wrap(&hit.tweet.full_text, 78) {
                    println!("  {line}");
                }
                if let Some(media) = &hit.tweet.media {
                    println!("  {} {}", format!("[{}]", media.kind).cyan(), media.source.dimmed());
                }
            }
            Command::Open(n) => {
                let hit = self.hit(n)?;
                match hit.tweet.permalink() {
                    Some(url) => println!("{url}"),
                    None => println!("{}", "No permalink: author handle unknown".yellow()),
                }
            }
            Command::Stats => {
                let stats = WrappedStats::compute(self.service.corpus());
                println!("  {:<16} {}", "Bookmarks:", stats.total);
                println!("  {:<16} {}", "Authors:", stats.unique_authors);
                println!("  {:<16} {} min", "Reading time:", stats.reading_minutes);
                println!("  {:<16} {}", "Indexed:", self.service.indexed());
            }
            Command::Help => print_help(),
            Command::Quit => {}
        }
        Ok(())
    }

    fn hit(&self, n: usize) -> Result<&SearchHit> {
        n.checked_sub(1)
            .and_then(|i| self.last_hits.get(i))
            .with_context(|| format!("No result #{n}; run a search first"))
    }
}

fn parse_command(input: &str) -> std::result::Result<Command, String> {
    let (head, rest) = input
        .split_once(char::is_whitespace)
        .map_or((input, ""), |(h, r)| (h, r.trim()));

    let index = |what: &str| {
        rest.parse::<usize>()
            .map_err(|_| format!("Usage: {what} <result number>"))
    };

    match head {
        "quit" | "exit" | "q" => Ok(Command::Quit),
        "help" | "h" | "?" => Ok(Command::Help),
        "stats" => Ok(Command::Stats),
        "show" => index("show").map(Command::Show),
        "open" => index("open").map(Command::Open),
        "search" | "s" if rest.is_empty() => Err("Search query cannot be empty.".to_string()),
        "search" | "s" => Ok(Command::Search(rest.to_string())),
        _ => Ok(Command::Search(input.to_string())),
    }
}

fn one_line(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{cut}…")
}

fn print_help() {
    println!("{}", "Commands:".bold().cyan());
    println!("  <query>          search (same as 'search <query>')");
    println!("  show <n>         full text of result n");
    println!("  open <n>         permalink of result n");
    println!("  stats            collection summary");
    println!("  help             this list");
    println!("  quit             exit");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("quit"), Ok(Command::Quit));
        assert_eq!(parse_command("show 3"), Ok(Command::Show(3)));
        assert!(parse_command("open x").is_err());
        assert!(parse_command("search").is_err());
        assert_eq!(
            parse_command("s borrow checker"),
            Ok(Command::Search("borrow checker".into()))
        );
        assert_eq!(
            parse_command("rust async"),
            Ok(Command::Search("rust async".into()))
        );
    }

    #[test]
    fn test_one_line() {
        assert_eq!(one_line("a\n b", 10), "a b");
        assert_eq!(one_line("abcdefghijkl", 5), "abcd…");
    }
}
