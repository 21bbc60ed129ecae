use std::{fmt::Display, future::Future, io::Write, path::PathBuf};

use vision_chat::{record_exchange, ChatBot, ChatMessage, ExamplePrompt, History, StreamExt};

/// A line typed into the terminal chat.
#[derive(Debug, PartialEq)]
enum Command {
    Image(PathBuf),
    Example(usize),
    Reset,
    Quit,
    Message(String),
    Invalid(String),
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return Command::Message(line.to_string());
    };
    let (name, argument) = command
        .split_once(char::is_whitespace)
        .map(|(name, argument)| (name, argument.trim()))
        .unwrap_or((command, ""));
    match name {
        "image" if !argument.is_empty() => Command::Image(PathBuf::from(argument)),
        "image" => Command::Invalid("Usage: /image <path>".to_string()),
        "example" => match argument.parse() {
            Ok(index) => Command::Example(index),
            Err(_) => Command::Invalid("Usage: /example <number>".to_string()),
        },
        "reset" => Command::Reset,
        "quit" | "exit" => Command::Quit,
        _ => Command::Invalid(format!("Unknown command /{name}")),
    }
}

/// Read a line from stdin. Returns `None` once stdin is closed.
fn prompt_input(prompt: impl Display) -> Result<Option<String>, std::io::Error> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut input = String::new();
    if std::io::stdin().read_line(&mut input)? == 0 {
        return Ok(None);
    }
    Ok(Some(input.trim_end_matches(['\r', '\n']).to_string()))
}

/// Chat with the bot in the terminal until the user quits.
pub(crate) async fn run(bot: ChatBot, examples: Vec<ExamplePrompt>) -> anyhow::Result<()> {
    let interface = bot.interface().with_examples(examples);
    println!("{}", interface.title);
    println!("{}", interface.description);
    for (index, example) in interface.examples.iter().enumerate() {
        let files: Vec<_> = example
            .files
            .iter()
            .map(|file| file.display().to_string())
            .collect();
        println!(
            "  /example {} - {} ({})",
            index + 1,
            example.text,
            files.join(", ")
        );
    }
    println!("Attach an image with /image <path>, start over with /reset and leave with /quit.");
    println!("Press Ctrl-C to stop generating and Ctrl-D to leave.");

    let mut history = History::new();
    let mut attached = Vec::new();
    loop {
        let Some(line) = tokio::task::spawn_blocking(|| prompt_input("\n> ")).await?? else {
            break;
        };
        let message = match parse_command(&line) {
            Command::Quit => break,
            Command::Reset => {
                history.clear();
                attached.clear();
                println!("Started a new chat");
                continue;
            }
            Command::Image(path) => {
                if !path.exists() {
                    eprintln!("{} does not exist", path.display());
                    continue;
                }
                println!("Attached {}", path.display());
                attached.push(path);
                continue;
            }
            Command::Example(index) => {
                match index.checked_sub(1).and_then(|index| interface.examples.get(index)) {
                    Some(example) => {
                        println!("> {}", example.text);
                        example.to_message()
                    }
                    None => {
                        eprintln!("There are {} examples", interface.examples.len());
                        continue;
                    }
                }
            }
            Command::Invalid(error) => {
                eprintln!("{error}");
                continue;
            }
            Command::Message(text) if text.is_empty() && attached.is_empty() => continue,
            Command::Message(text) => attached
                .drain(..)
                .fold(ChatMessage::new(text), |message, file| message.with_file(file)),
        };

        let stop = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl-C: {err}");
                std::future::pending::<()>().await;
            }
        };
        match respond(&bot, &message, &history, stop).await {
            Ok(answer) => record_exchange(&mut history, &message, answer),
            Err(err) => eprintln!("{err}"),
        }
    }

    Ok(())
}

/// Print the answer as it grows and return it once generation finishes or `stop` resolves.
async fn respond(
    bot: &ChatBot,
    message: &ChatMessage,
    history: &History,
    stop: impl Future<Output = ()>,
) -> anyhow::Result<String> {
    let mut response = bot.respond(message, history)?;
    tokio::pin!(stop);
    let mut answer = String::new();
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => {
                tracing::debug!("Generation stopped by the user");
                break;
            }
            buffer = response.next() => {
                let Some(buffer) = buffer else {
                    break;
                };
                let buffer = buffer?;
                print!("{}", new_text(&buffer, answer.len()));
                std::io::stdout().flush()?;
                answer = buffer;
            }
        }
    }
    println!();
    Ok(answer)
}

/// The part of the buffer that has not been printed yet.
fn new_text(buffer: &str, printed: usize) -> &str {
    buffer.get(printed..).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{greeter_bot, test_dir};
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_commands() {
        assert_eq!(
            parse_command("/image ./chart.png"),
            Command::Image(PathBuf::from("./chart.png"))
        );
        assert_eq!(parse_command("/example 2"), Command::Example(2));
        assert_eq!(parse_command("  /reset "), Command::Reset);
        assert_eq!(parse_command("/quit"), Command::Quit);
        assert_eq!(
            parse_command("What does the chart display?"),
            Command::Message("What does the chart display?".to_string())
        );
        assert_eq!(
            parse_command("/image"),
            Command::Invalid("Usage: /image <path>".to_string())
        );
        assert_eq!(
            parse_command("/example two"),
            Command::Invalid("Usage: /example <number>".to_string())
        );
        assert_eq!(
            parse_command("/help"),
            Command::Invalid("Unknown command /help".to_string())
        );
    }

    #[test]
    fn only_new_text_is_printed() {
        assert_eq!(new_text("The text", 0), "The text");
        assert_eq!(new_text("The text says", 9), "says");
        assert_eq!(new_text("The", 9), "");
    }

    #[tokio::test]
    async fn answers_until_generation_finishes() {
        let dir = test_dir("finish");
        let message = ChatMessage::new("What is the text saying?").with_file(dir.join("small.png"));
        let answer = respond(&greeter_bot(), &message, &History::new(), std::future::pending())
            .await
            .unwrap();
        assert_eq!(answer, "Hello there\n");
    }

    #[tokio::test]
    async fn stopping_ends_the_answer_early() {
        let dir = test_dir("stop");
        let message = ChatMessage::new("What is the text saying?").with_file(dir.join("small.png"));
        let answer = respond(&greeter_bot(), &message, &History::new(), std::future::ready(()))
            .await
            .unwrap();
        assert_eq!(answer, "");
    }
}
