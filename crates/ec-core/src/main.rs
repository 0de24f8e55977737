use std::io::{self, IsTerminal, Read, Write};

use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use ec_backend::CoachClient;
use ec_core::config::Config;
use ec_core::session::CoachSession;

fn print_help() {
    println!("enercoach — Energy Coach chat client");
    println!();
    println!("Usage:");
    println!("  enercoach                     Interactive chat");
    println!("  enercoach \"question\"          One-shot question (non-interactive)");
    println!("  echo \"question\" | enercoach   One-shot via stdin pipe");
    println!();
    println!("Options:");
    println!("  --version         Print version");
    println!("  --help            Print this help");
    println!();
    println!("Environment:");
    println!("  ENERGY_COACH_URL      Override the service base URL");
    println!("  ENERGY_COACH_API_KEY  API key when no api_key_cmd is configured");
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return;
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("enercoach {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .compact()
        .init();

    let config = Config::load_or_default();
    let api_key = match config.coach.resolve_api_key() {
        Ok(key) => key,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    let client = CoachClient::new(config.coach.resolve_base_url(), api_key);
    let mut session = CoachSession::new(client);

    // Detect one-shot mode: positional arg (non-flag) or piped stdin
    let non_flag_args: Vec<&String> = args.iter().filter(|a| !a.starts_with('-')).collect();
    let stdin_is_pipe = !io::stdin().is_terminal();

    let question = if let Some(arg) = non_flag_args.first() {
        Some((*arg).clone())
    } else if stdin_is_pipe {
        let mut buf = String::new();
        if io::stdin().read_to_string(&mut buf).is_ok() && !buf.trim().is_empty() {
            Some(buf.trim().to_string())
        } else {
            None
        }
    } else {
        None
    };

    let result = match question {
        Some(question) => ask(&mut session, &question).await,
        None => run_chat(&mut session).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

/// Send one question, printing the reply as it streams.
async fn ask(session: &mut CoachSession, question: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    session
        .send_with(question, None, |delta| {
            let _ = stdout.write_all(delta.as_bytes());
            let _ = stdout.flush();
        })
        .await;
    println!();
    Ok(())
}

async fn run_chat(session: &mut CoachSession) -> io::Result<()> {
    println!("enercoach — ask about energy performance, anomalies, and actions");
    println!("/clear to clear the conversation, /quit to exit");
    println!();

    let mut lines = BufReader::new(stdin()).lines();
    loop {
        print!("you> ");
        io::stdout().flush()?;

        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "/quit" {
            break;
        }
        if input == "/clear" {
            session.clear();
            println!("conversation cleared");
            continue;
        }

        print!("coach> ");
        io::stdout().flush()?;
        ask(session, input).await?;
        println!();
    }
    Ok(())
}
