use clap::{Parser, Subcommand};

mod commands;

use langpt::store::LocalStore;
use langpt::Config;

#[derive(Parser)]
#[command(version, about = "Chat with an AI language tutor", long_about = None)]
#[command(propagate_version = true)]
#[command(name = "langpt")]
struct Cli {
    /// Answer from the offline mock instead of a provider
    #[arg(long, global = true)]
    mock: bool,

    /// Model to use for this invocation
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Signup {
        email: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Sign in and remember the session
    Login {
        email: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Sign out and forget the session
    Logout,
    /// Show the signed-in account
    Whoami,
    /// Send the confirmation email again
    ResendConfirmation { email: String },
    /// Interactive tutoring session
    Chat,
    /// Send a single message and print the reply
    Ask {
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Show or change tutoring preferences
    #[command(subcommand)]
    Settings(commands::SettingsCommand),
    /// Manage the vocabulary list
    #[command(subcommand)]
    Vocab(commands::VocabCommand),
    /// Token usage and cost
    #[command(subcommand)]
    Usage(commands::UsageCommand),
    /// List models with their pricing
    Models,
    /// List supported target languages
    Languages,
    /// Send a tiny request to the configured provider
    TestProvider,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Must precede Config::load, which logs env overrides.
    Config::load_env_file();
    let logging = match langpt::init_logging(&Config::startup_log_level()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    let mut config = Config::load()?;
    if cli.mock {
        config.chat.mock = true;
    }
    if let Some(model) = cli.model {
        config.provider.model = Some(model);
    }

    if let Some(logging) = &logging {
        if let Err(e) = logging.set_level(&config.logging.level) {
            eprintln!("Failed to apply log level: {}", e);
        }
    }

    let store = LocalStore::open_default()?;
    let app = commands::App::new(config, store);

    match cli.command {
        Commands::Signup { email, password } => commands::signup(&app, &email, password).await,
        Commands::Login { email, password } => commands::login(&app, &email, password).await,
        Commands::Logout => commands::logout(&app).await,
        Commands::Whoami => commands::whoami(&app).await,
        Commands::ResendConfirmation { email } => commands::resend_confirmation(&app, &email).await,
        Commands::Chat => commands::chat(&app).await,
        Commands::Ask { text } => commands::ask(&app, &text.join(" ")).await,
        Commands::Settings(cmd) => commands::settings(&app, cmd).await,
        Commands::Vocab(cmd) => commands::vocab(&app, cmd).await,
        Commands::Usage(cmd) => commands::usage(&app, cmd).await,
        Commands::Models => {
            commands::models(&app);
            Ok(())
        }
        Commands::Languages => {
            commands::languages();
            Ok(())
        }
        Commands::TestProvider => commands::test_provider(&app).await,
    }
}
