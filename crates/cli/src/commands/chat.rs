//! `refdesk chat` — interactive mode.
//!
//! History carries across turns, so follow-up questions ("and its
//! maturity?") see the earlier answers. Ctrl+C cancels the running turn;
//! at the prompt it quits.

use refdesk_config::AppConfig;
use refdesk_core::Conversation;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::render::{OutputMode, Renderer};
use super::runtime::{Runtime, load_config, require_api_key};

/// Something typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Empty,
    Quit,
    Reset,
    Tools,
    Question(&'a str),
}

fn classify(line: &str) -> Input<'_> {
    match line.trim() {
        "" => Input::Empty,
        "exit" | "quit" | "/exit" | "/quit" => Input::Quit,
        "/reset" => Input::Reset,
        "/tools" => Input::Tools,
        question => Input::Question(question),
    }
}

pub async fn run(mode: OutputMode) -> Result<bool, Box<dyn std::error::Error>> {
    let config = load_config()?;
    require_api_key(&config)?;

    let runtime = Runtime::build(&config)?;
    let renderer = Renderer::new(mode);

    if mode == OutputMode::Human {
        banner(&config);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut conversation = Conversation::new();

    loop {
        if mode == OutputMode::Human {
            print!("  You > ");
            std::io::stdout().flush()?;
        }

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match classify(&line) {
            Input::Empty => continue,
            Input::Quit => break,
            Input::Reset => {
                conversation = Conversation::new();
                println!("  (history cleared)");
            }
            Input::Tools => match runtime.client.connect().await {
                Ok(_) => {
                    for tool in runtime.client.tools().await {
                        println!("  - {}: {}", tool.name, tool.description);
                    }
                }
                Err(e) => eprintln!("  [Error] {e}"),
            },
            Input::Question(question) => {
                let report = runtime.turn(conversation.clone(), question, &renderer).await?;
                // Unanswered turns still keep the question in history.
                conversation = report.conversation().clone();
                println!();
            }
        }
    }

    runtime.client.shutdown().await;
    if mode == OutputMode::Human {
        println!();
        println!("  Goodbye! 👋");
    }
    Ok(true)
}

fn banner(config: &AppConfig) {
    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║        refdesk — Financial Reference Data     ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Model:       {}", config.provider.model);
    println!(
        "  Tool server: {} {}",
        config.tool_server.command,
        config.tool_server.args.join(" ")
    );
    println!("  Guardrail:   {:?}", config.guardrail.mode);
    println!();
    println!("  Try: Who is the issuer for ISIN US912810TS08?");
    println!("       Find the rating for Apple's bond US037833AS99.");
    println!("       Search for issuers with 'Treasury' in their name.");
    println!();
    println!("  /tools lists tools, /reset clears history, 'exit' quits.");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_commands() {
        assert_eq!(classify("   "), Input::Empty);
        assert_eq!(classify("exit"), Input::Quit);
        assert_eq!(classify("/quit\n"), Input::Quit);
        assert_eq!(classify("/reset"), Input::Reset);
        assert_eq!(classify("/tools"), Input::Tools);
        assert_eq!(
            classify("  Who is the issuer for ISIN US912810TS08? \n"),
            Input::Question("Who is the issuer for ISIN US912810TS08?")
        );
    }
}
