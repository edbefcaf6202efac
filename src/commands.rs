use anyhow::{bail, Context, Result};
use clap::Subcommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io::{IsTerminal, Write};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use langpt::langpt::conversation::{BackendLink, TutorClient, TutorSession};
use langpt::langpt::display::render_reply;
use langpt::langpt::prompts::{is_available_language, language_name, AVAILABLE_LANGUAGES};
use langpt::langpt::supabase::{AuthSession, ResumedSession, SignUpOutcome, SupabaseClient, VocabularyPatch};
use langpt::langpt::types::{SettingsPatch, TutorSettings, TOGGLE_KEYS};
use langpt::langpt::usage::{available_models, estimate_message_cost, format_usd, is_known_model};
use langpt::store::LocalStore;
use langpt::Config;

const TURN_FAILED: &str =
    "Failed to get response from AI assistant. Please check your API key and try again.";

#[derive(Subcommand)]
pub enum SettingsCommand {
    /// Print the current preferences
    Show,
    /// Change one preference, e.g. `set track_vocabulary on`
    Set { key: String, value: String },
    /// Change the target language
    Language { code: String },
    /// Set custom instructions, or clear them when omitted
    Instructions { text: Option<String> },
}

#[derive(Subcommand)]
pub enum VocabCommand {
    /// List saved words, newest first
    List,
    /// Save a word or bump its usage count
    Add {
        word: String,
        #[arg(long)]
        translation: Option<String>,
        #[arg(long)]
        part_of_speech: Option<String>,
        #[arg(long)]
        example: Option<String>,
    },
    /// Edit a saved word by id. An empty value clears that field
    Update {
        id: String,
        #[arg(long)]
        translation: Option<String>,
        #[arg(long)]
        part_of_speech: Option<String>,
        #[arg(long)]
        example: Option<String>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        difficulty: Option<u8>,
    },
    /// Delete a saved word by id
    Delete { id: String },
}

#[derive(Subcommand)]
pub enum UsageCommand {
    /// Totals and per-model breakdown
    Stats,
    /// The most recent requests
    History,
}

pub struct App {
    config: Config,
    store: LocalStore,
}

/// An authenticated backend client and the session it runs under.
struct SignedIn {
    client: SupabaseClient,
    session: AuthSession,
}

impl SignedIn {
    fn user_id(&self) -> &str {
        &self.session.user.id
    }
}

impl App {
    pub fn new(config: Config, store: LocalStore) -> Self {
        Self { config, store }
    }

    fn backend(&self) -> Result<Option<SupabaseClient>> {
        match self.config.backend_credentials() {
            Some((url, key)) => Ok(Some(SupabaseClient::new(url, key)?)),
            None => Ok(None),
        }
    }

    fn require_backend(&self) -> Result<SupabaseClient> {
        self.backend()?.context(
            "No backend configured. Set SUPABASE_URL and SUPABASE_ANON_KEY or add a [backend] section",
        )
    }

    /// Restores the stored session, refreshing it when it has expired.
    async fn signed_in(&self) -> Result<Option<SignedIn>> {
        let Some(mut client) = self.backend()? else {
            return Ok(None);
        };
        let Some(stored) = self.store.load_session()? else {
            return Ok(None);
        };

        let session = match client.resume_session(stored, chrono::Utc::now()).await {
            ResumedSession::Valid(session) => session,
            ResumedSession::Refreshed(session) => {
                self.store.save_session(&session)?;
                session
            }
            ResumedSession::Lapsed => {
                self.store.clear_session()?;
                return Ok(None);
            }
        };
        Ok(Some(SignedIn { client, session }))
    }

    async fn require_signed_in(&self) -> Result<SignedIn> {
        self.require_backend()?;
        self.signed_in()
            .await?
            .context("Not signed in. Run `langpt login <email>` first")
    }

    async fn load_settings(&self, signed_in: Option<&SignedIn>) -> Result<TutorSettings> {
        match signed_in {
            Some(s) => Ok(s.client.get_user_settings(s.user_id()).await?),
            None => Ok(self.store.load_settings()?),
        }
    }

    async fn save_settings(&self, patch: &SettingsPatch) -> Result<TutorSettings> {
        if let Some(target) = &patch.target_language {
            if !is_available_language(target) {
                tracing::warn!("{} is not in the language list, using it as given", target);
            }
        }
        match self.signed_in().await? {
            Some(s) => Ok(s.client.update_settings(s.user_id(), patch).await?),
            None => {
                let mut settings = self.store.load_settings()?;
                settings.apply(patch);
                self.store.save_settings(&settings)?;
                Ok(settings)
            }
        }
    }

    async fn tutor_session(&self) -> Result<TutorSession> {
        let signed_in = self.signed_in().await?;
        let settings = self.load_settings(signed_in.as_ref()).await?;
        let client = TutorClient::new(self.config.api_config(), self.config.chat.mock)?;
        let mut session = TutorSession::new(client, settings);
        if let Some(s) = signed_in {
            let user_id = s.session.user.id.clone();
            session = session.with_backend(BackendLink {
                client: s.client,
                user_id,
            });
        }
        Ok(session)
    }
}

/// Reads stdin line by line, keeping buffered input across prompts.
struct LineReader {
    lines: tokio::io::Lines<BufReader<tokio::io::Stdin>>,
}

impl LineReader {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    async fn prompt(&mut self, prompt: &str) -> Result<Option<String>> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.flush().await?;
        Ok(self.lines.next_line().await?)
    }
}

enum KeyOutcome {
    Continue,
    Done,
    Cancelled,
}

/// Applies one key press to a hidden input line.
fn apply_key(line: &mut String, key: KeyEvent) -> KeyOutcome {
    if key.kind == KeyEventKind::Release {
        return KeyOutcome::Continue;
    }
    match key.code {
        KeyCode::Enter => KeyOutcome::Done,
        KeyCode::Esc => KeyOutcome::Cancelled,
        KeyCode::Char('c') | KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            KeyOutcome::Cancelled
        }
        KeyCode::Backspace => {
            line.pop();
            KeyOutcome::Continue
        }
        KeyCode::Char(c) => {
            line.push(c);
            KeyOutcome::Continue
        }
        _ => KeyOutcome::Continue,
    }
}

/// Reads a line from the terminal in raw mode so nothing is echoed.
fn read_hidden_line(prompt: &str) -> Result<Option<String>> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{}", prompt)?;
    stdout.flush()?;

    terminal::enable_raw_mode()?;
    let mut line = String::new();
    let outcome = loop {
        let event = match event::read() {
            Ok(event) => event,
            Err(e) => break Err(e),
        };
        match event {
            Event::Key(key) => match apply_key(&mut line, key) {
                KeyOutcome::Continue => {}
                KeyOutcome::Done => break Ok(Some(line)),
                KeyOutcome::Cancelled => break Ok(None),
            },
            Event::Paste(text) => line.push_str(&text),
            _ => {}
        }
    };
    terminal::disable_raw_mode()?;
    writeln!(stdout)?;
    Ok(outcome?)
}

async fn password_or_prompt(password: Option<String>) -> Result<String> {
    let password = match password {
        Some(p) => p,
        None if std::io::stdin().is_terminal() => {
            tokio::task::spawn_blocking(|| read_hidden_line("Password: "))
                .await??
                .context("Password entry cancelled")?
        }
        None => LineReader::new().prompt("Password: ").await?.unwrap_or_default(),
    };
    if password.is_empty() {
        bail!("Password cannot be empty");
    }
    Ok(password)
}

// ---- account ---------------------------------------------------------

pub async fn signup(app: &App, email: &str, password: Option<String>) -> Result<()> {
    let mut client = app.require_backend()?;
    let password = password_or_prompt(password).await?;

    match client.sign_up(email.trim(), &password).await? {
        SignUpOutcome::SignedIn { session, profile } => {
            app.store.save_session(&session)?;
            println!("Account created. Signed in as {}", profile.email);
        }
        SignUpOutcome::ConfirmationRequired(user) => {
            let email = user.email.unwrap_or_else(|| email.to_string());
            println!("Account created. Check {} for a confirmation link, then run `langpt login`.", email);
        }
    }
    Ok(())
}

pub async fn login(app: &App, email: &str, password: Option<String>) -> Result<()> {
    let mut client = app.require_backend()?;
    let password = password_or_prompt(password).await?;

    let (session, profile) = client.sign_in(email.trim(), &password).await?;
    app.store.save_session(&session)?;
    // seeds the settings row on first sign-in
    client.get_user_settings(&session.user.id).await?;
    println!("Signed in as {}", profile.email);
    Ok(())
}

pub async fn logout(app: &App) -> Result<()> {
    if let Some(mut s) = app.signed_in().await? {
        if let Err(e) = s.client.sign_out().await {
            tracing::warn!("Sign out request failed: {}", e);
        }
    }
    app.store.clear_session()?;
    println!("Signed out");
    Ok(())
}

pub async fn whoami(app: &App) -> Result<()> {
    let s = app.require_signed_in().await?;
    let user = s.client.current_user().await?;
    let profile = s.client.ensure_profile(&user).await?;

    println!("id:        {}", user.id);
    println!("email:     {}", user.email.as_deref().unwrap_or("-"));
    println!(
        "confirmed: {}",
        user.email_confirmed_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "no".to_string())
    );
    println!(
        "tokens:    {} in / {} out",
        profile.total_input_tokens, profile.total_output_tokens
    );
    println!("cost:      {}", format_usd(profile.total_cost_usd));
    Ok(())
}

pub async fn resend_confirmation(app: &App, email: &str) -> Result<()> {
    let client = app.require_backend()?;
    client.resend_confirmation(email.trim()).await?;
    println!("Confirmation email sent to {}", email.trim());
    Ok(())
}

// ---- chat ------------------------------------------------------------

async fn send_and_render(session: &mut TutorSession, text: &str) {
    let model = session.client().model().to_string();
    let estimate = estimate_message_cost(&model, text);
    println!("(estimated cost {})", format_usd(estimate));

    match session.send_message(text).await {
        Ok(turn) => {
            println!();
            print!("{}", render_reply(&turn.reply, session.settings()));
            if !session.client().is_mock() {
                println!(
                    "\n[{} | {} in / {} out | {}]",
                    turn.model,
                    turn.usage.input_tokens,
                    turn.usage.output_tokens,
                    format_usd(turn.cost.total)
                );
            }
        }
        Err(e) => {
            tracing::debug!("Turn failed: {}", e);
            eprintln!("{}", TURN_FAILED);
        }
    }
}

fn print_transcript(session: &TutorSession) {
    for entry in session.transcript() {
        if entry.is_user {
            println!("> {}", entry.text);
        } else {
            match &entry.structured {
                Some(reply) => print!("{}", render_reply(reply, session.settings())),
                None => println!("{}", entry.text),
            }
            println!();
        }
    }
}

fn print_settings(settings: &TutorSettings) {
    println!(
        "target_language: {} ({})",
        settings.target_language,
        language_name(&settings.target_language)
    );
    let flags = [
        settings.always_correct_sentences,
        settings.correct_punctuation,
        settings.correct_capitalization,
        settings.correct_accents,
        settings.suggest_natural_alternatives,
        settings.show_verb_conjugations,
        settings.explain_tense_usage,
        settings.track_vocabulary,
    ];
    for (key, on) in TOGGLE_KEYS.iter().zip(flags) {
        println!("{}: {}", key, if on { "on" } else { "off" });
    }
    println!(
        "custom_instructions: {}",
        settings.custom_instructions().unwrap_or("-")
    );
}

pub async fn chat(app: &App) -> Result<()> {
    let mut session = app.tutor_session().await?;
    println!(
        "Practicing {} with {}{}. Type /quit to leave.",
        language_name(&session.settings().target_language),
        session.client().model(),
        if session.client().is_mock() { " (mock)" } else { "" }
    );

    let mut input_lines = LineReader::new();
    while let Some(line) = input_lines.prompt("> ").await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let (command, arg) = match input.split_once(' ') {
            Some((c, a)) => (c, a.trim()),
            None => (input, ""),
        };

        match command {
            "/quit" | "/exit" => break,
            "/new" => {
                session.start_new_conversation();
                println!("Started a new conversation");
            }
            "/example" => {
                session.load_example();
                print_transcript(&session);
            }
            "/model" => {
                if arg.is_empty() {
                    println!("Current model: {}", session.client().model());
                    continue;
                }
                if !is_known_model(arg) {
                    println!("Note: no pricing for {}, costs use gpt-3.5-turbo rates", arg);
                }
                session.client_mut().set_model(arg);
                println!("Model set to {}", arg);
            }
            "/mock" => {
                let enable = !session.client().is_mock();
                let mut api = app.config.api_config();
                api.provider.model = Some(session.client().model().to_string());
                match TutorClient::new(api, enable) {
                    Ok(client) => {
                        session.set_client(client);
                        println!("Mock mode {}", if enable { "on" } else { "off" });
                    }
                    Err(e) => eprintln!("Cannot leave mock mode: {}", e),
                }
            }
            "/settings" => print_settings(session.settings()),
            _ if command.starts_with('/') => {
                println!("Commands: /new /example /model <name> /mock /settings /quit");
            }
            _ => send_and_render(&mut session, input).await,
        }
    }
    Ok(())
}

pub async fn ask(app: &App, text: &str) -> Result<()> {
    let mut session = app.tutor_session().await?;
    let turn = session.send_message(text).await.context(TURN_FAILED)?;
    print!("{}", render_reply(&turn.reply, session.settings()));
    Ok(())
}

// ---- settings --------------------------------------------------------

pub async fn settings(app: &App, cmd: SettingsCommand) -> Result<()> {
    let patch = match cmd {
        SettingsCommand::Show => {
            let signed_in = app.signed_in().await?;
            print_settings(&app.load_settings(signed_in.as_ref()).await?);
            return Ok(());
        }
        SettingsCommand::Set { key, value } => SettingsPatch::from_key_value(&key, &value)?,
        SettingsCommand::Language { code } => SettingsPatch::language(&code),
        SettingsCommand::Instructions { text } => SettingsPatch::instructions(text.as_deref()),
    };

    let updated = app.save_settings(&patch).await?;
    print_settings(&updated);
    Ok(())
}

// ---- vocabulary ------------------------------------------------------

pub async fn vocab(app: &App, cmd: VocabCommand) -> Result<()> {
    let s = app.require_signed_in().await?;
    match cmd {
        VocabCommand::List => {
            let words = s.client.get_vocabulary(s.user_id()).await?;
            println!("Vocabulary ({} words)", words.len());
            for w in words {
                let mut line = format!("{}  {}", w.id, w.word);
                if let Some(t) = &w.translation {
                    line.push_str(&format!(" - {}", t));
                }
                if let Some(pos) = &w.part_of_speech {
                    line.push_str(&format!(" ({})", pos));
                }
                line.push_str(&format!("  x{}", w.usage_count));
                println!("{}", line);
            }
        }
        VocabCommand::Add {
            word,
            translation,
            part_of_speech,
            example,
        } => {
            if word.trim().is_empty() {
                bail!("Word cannot be empty");
            }
            s.client
                .add_vocabulary_word(
                    s.user_id(),
                    &word,
                    translation.as_deref(),
                    part_of_speech.as_deref(),
                    example.as_deref(),
                )
                .await?;
            println!("Saved {}", word.trim().to_lowercase());
        }
        VocabCommand::Update {
            id,
            translation,
            part_of_speech,
            example,
            difficulty,
        } => {
            let patch = VocabularyPatch::from_edits(
                translation.as_deref(),
                part_of_speech.as_deref(),
                example.as_deref(),
                difficulty,
            );
            if patch.is_empty() {
                bail!("Nothing to update. Pass --translation, --part-of-speech, --example or --difficulty");
            }
            s.client.update_vocabulary_word(&id, &patch).await?;
            println!("Updated {}", id);
        }
        VocabCommand::Delete { id } => {
            s.client.delete_vocabulary_word(&id).await?;
            println!("Deleted {}", id);
        }
    }
    Ok(())
}

// ---- usage -----------------------------------------------------------

pub async fn usage(app: &App, cmd: UsageCommand) -> Result<()> {
    let s = app.require_signed_in().await?;
    match cmd {
        UsageCommand::Stats => {
            let stats = s.client.get_user_stats(s.user_id()).await?;
            println!("Input tokens:  {}", stats.total_input_tokens);
            println!("Output tokens: {}", stats.total_output_tokens);
            println!("Total cost:    {}", format_usd(stats.total_cost_usd));
            if !stats.usage_by_model.is_empty() {
                println!("\nUsage by Model");
                for (model, usage) in &stats.usage_by_model {
                    println!(
                        "  {}: {} in / {} out, {}",
                        model,
                        usage.input_tokens,
                        usage.output_tokens,
                        format_usd(usage.cost_usd)
                    );
                }
            }
        }
        UsageCommand::History => {
            for row in s.client.get_user_usage(s.user_id()).await? {
                let when = row
                    .created_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {}  {} in / {} out  {}",
                    when,
                    row.model,
                    row.input_tokens,
                    row.output_tokens,
                    format_usd(row.total_cost_usd)
                );
            }
        }
    }
    Ok(())
}

// ---- catalogues ------------------------------------------------------

pub fn models(app: &App) {
    let current = app.config.provider.model.as_deref();
    for m in available_models() {
        let marker = if Some(m.name) == current { "*" } else { " " };
        println!(
            "{} {:<16} ${:.5}/1K in  ${:.5}/1K out",
            marker, m.name, m.input_price, m.output_price
        );
    }
}

pub fn languages() {
    for (code, name) in AVAILABLE_LANGUAGES {
        println!("{:<12} {}", code, name);
    }
}

pub async fn test_provider(app: &App) -> Result<()> {
    let client = TutorClient::new(app.config.api_config(), app.config.chat.mock)?;
    let t0 = Instant::now();
    client.test_connection().await?;
    let ms = t0.elapsed().as_millis();

    println!("provider: {}", app.config.provider.preset.as_str());
    println!("endpoint: {}", client.endpoint());
    println!("model: {}", client.model());
    println!("latencyMs: {}", ms);
    Ok(())
}
