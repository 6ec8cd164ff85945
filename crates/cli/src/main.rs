use clap::{Parser, Subcommand};
use lib::config;
use lib::dispatch::Dispatcher;
use lib::reconcile::{Applied, EntryKind, Reconciler, Submission};
use lib::session::WELCOME_MESSAGE;
use lib::transcript::{self, ThemeMode, TranscriptStore};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "finch")]
#[command(about = "Finch CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config, and the history directory.
    Init {
        /// Config file path (default: FINCH_CONFIG_PATH or ~/.finch/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Chat with the selected model (interactive). Type /help for commands, /exit to quit.
    Chat {
        /// Config file path (default: FINCH_CONFIG_PATH or ~/.finch/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List, show, or delete saved conversations.
    History {
        /// Config file path (default: FINCH_CONFIG_PATH or ~/.finch/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[command(subcommand)]
        action: HistoryCommand,
    },
}

#[derive(Subcommand)]
enum HistoryCommand {
    /// List saved conversations, newest first.
    List,
    /// Print a saved conversation.
    Show {
        /// Transcript file name as printed by `history list`
        file: String,
    },
    /// Delete a saved conversation.
    Delete {
        /// Transcript file name as printed by `history list`
        file: String,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("finch {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Chat { config }) => run_chat(config),
        Some(Commands::History { config, action }) => run_history(config, action),
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let history_dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", path.display());
    println!("conversations will be saved in {}", history_dir.display());
    Ok(())
}

fn open_store(config_path: Option<PathBuf>) -> anyhow::Result<(config::Config, TranscriptStore)> {
    let (config, path) = config::load_config(config_path)?;
    let store = TranscriptStore::new(config::resolve_history_dir(&config, &path));
    Ok((config, store))
}

fn run_chat(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, store) = open_store(config_path)?;
    let dispatcher = Dispatcher::from_config(&config);
    let mut reconciler = Reconciler::new(store, ThemeMode::from_dark(config.is_dark_mode));

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    println!("{}", transcript::plain_text(WELCOME_MESSAGE).trim());
    if config::resolve_api_key(&config).is_empty() || config.selected_model.is_empty() {
        println!("(set api_key and selected_model in the config file, or DASHSCOPE_API_KEY)");
    }

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }

        let shown = reconciler.view().len();
        match reconciler.submit(input) {
            Submission::Send(turn) => {
                let request =
                    Dispatcher::request_from_config(&config, turn.messages, turn.session_id);
                let rx = dispatcher.spawn(request);
                let mut started = false;
                let mut finished = false;
                for event in rx.iter() {
                    finished = event.is_terminal();
                    if let Applied::Delta(text) = reconciler.apply(event) {
                        if !started {
                            write!(stdout, "< ")?;
                            started = true;
                        }
                        write!(stdout, "{}", text)?;
                        stdout.flush()?;
                    }
                    if finished {
                        break;
                    }
                }
                if !finished {
                    reconciler.worker_lost();
                }
                if started {
                    writeln!(stdout)?;
                }
            }
            Submission::Reset => println!("(conversation saved, starting a new one)"),
            Submission::Ignored | Submission::Help | Submission::Busy => {}
        }
        for entry in reconciler.view().get(shown..).unwrap_or(&[]) {
            if entry.kind == EntryKind::Notice {
                println!("! {}", entry.content.replace('\n', "\n  "));
            }
        }
    }

    reconciler.shutdown();
    Ok(())
}

fn run_history(config_path: Option<PathBuf>, action: HistoryCommand) -> anyhow::Result<()> {
    let (_, store) = open_store(config_path)?;
    match action {
        HistoryCommand::List => {
            let entries = store.list()?;
            if entries.is_empty() {
                println!("no saved conversations in {}", store.dir().display());
            }
            for entry in entries {
                println!("{}  {}  ({} bytes)", entry.title, entry.file_name, entry.len);
            }
        }
        HistoryCommand::Show { file } => {
            let loaded = store.load(&file)?;
            println!("# {}", transcript::title_for(&loaded.file_name));
            for message in &loaded.messages {
                println!();
                println!("{}:", message.role);
                println!("{}", transcript::plain_text(&message.content).trim());
            }
        }
        HistoryCommand::Delete { file } => {
            store.delete(&file)?;
            println!("deleted {}", file);
        }
    }
    Ok(())
}
