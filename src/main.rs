mod api;
mod library;
mod play;
mod session;
mod story;
mod view;

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use api::{ClientConfig, HttpStoryApi, StoryApi, DEFAULT_API_URL};
use play::RoundOutcome;
use session::{EnvSession, IdentitySession, Session, StaticSession};
use story::StoryDocument;

/// Play branching stories from the story backend in the terminal.
#[derive(Parser, Debug)]
#[command(name = "fable", version, about)]
struct Cli {
    /// Backend base URL
    #[arg(long, env = "FABLE_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Act as this user instead of FABLE_USER_ID
    #[arg(long)]
    user: Option<String>,

    /// Seconds between story-generation status checks
    #[arg(long, default_value_t = 2)]
    poll_secs: u64,

    /// Status checks before giving up on story generation
    #[arg(long, default_value_t = 90)]
    max_polls: u32,

    /// Per-request timeout in seconds (unbounded when omitted)
    #[arg(long)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play the built-in cave story
    Demo,

    /// Play a story document from a JSON file
    Play {
        path: PathBuf,
    },

    /// Load a saved story by id and play it
    Load {
        story_id: String,
    },

    /// List your saved stories
    #[command(alias = "ls")]
    List,

    /// Generate a new story for a theme and play it
    New {
        theme: String,
    },
}

fn main() -> Result<()> {
    // Initialize logging. The player shares the terminal, so stay quiet
    // unless asked:
    //   RUST_LOG=info   fable demo   # transitions, loads, jobs
    //   RUST_LOG=debug  fable demo   # + commands, request tokens, URLs
    //   RUST_LOG=trace  fable demo   # + raw backend responses
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let config = ClientConfig {
        poll_interval: Duration::from_secs(cli.poll_secs),
        max_polls: cli.max_polls,
        request_timeout: cli.timeout_secs.map(Duration::from_secs),
        ..ClientConfig::default()
    }
    .with_base_url(&cli.api_url);

    let identity: Box<dyn IdentitySession> = match &cli.user {
        Some(user) => Box::new(StaticSession(Some(
            Session::new(user.as_str())
                .with_access_token(std::env::var(session::ACCESS_TOKEN_VAR).ok()),
        ))),
        None => Box::new(EnvSession),
    };
    let signed_in = identity.current();

    let api: Arc<dyn StoryApi> = Arc::new(
        HttpStoryApi::new(&config, signed_in.as_ref()).context("failed to build HTTP client")?,
    );

    let Some(story) = open_story(cli.command, api.as_ref(), &config, identity.as_ref())? else {
        return Ok(());
    };

    run_session(api, &config, identity.as_ref(), story)
}

/// Carry out `command` up to the point where a story is ready to play.
/// Returns `None` for commands that only print.
fn open_story(
    command: Commands,
    api: &dyn StoryApi,
    config: &ClientConfig,
    identity: &dyn IdentitySession,
) -> Result<Option<StoryDocument>> {
    let story = match command {
        Commands::Demo => story::cave_scenario(),
        Commands::Play { path } => StoryDocument::from_file(&path)?,
        Commands::Load { story_id } => {
            session::require(identity)?;
            api.fetch_story(&story_id)
                .with_context(|| format!("failed to load story {story_id}"))?
        }
        Commands::List => {
            let session = session::require(identity)?;
            let stories = api
                .list_stories(&session)
                .context("failed to fetch your stories")?;
            print!("{}", library::format_library(&stories));
            return Ok(None);
        }
        Commands::New { theme } => {
            let session = session::require(identity)?;
            println!("Generating a '{theme}' story...");
            library::generate_story(api, config, &session, &theme)?
        }
    };
    Ok(Some(story))
}

/// Play stories back to back until the player quits.
fn run_session(
    api: Arc<dyn StoryApi>,
    config: &ClientConfig,
    identity: &dyn IdentitySession,
    mut story: StoryDocument,
) -> Result<()> {
    loop {
        let signed_in = identity.current().is_some();
        match play::run(Arc::clone(&api), story, signed_in)? {
            RoundOutcome::Quit => {
                println!("Thanks for playing!");
                return Ok(());
            }
            RoundOutcome::NewStory => {
                let session = session::require(identity)?;
                let Some(theme) = prompt_theme()? else {
                    println!("Thanks for playing!");
                    return Ok(());
                };
                info!("Player asked for a new '{theme}' story");
                println!("Generating a '{theme}' story...");
                story = library::generate_story(api.as_ref(), config, &session, &theme)?;
            }
        }
    }
}

fn prompt_theme() -> Result<Option<String>> {
    loop {
        print!("Theme for the new story: ");
        io::stdout().flush()?;
        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(None);
        }
        let theme = input.trim();
        if !theme.is_empty() {
            return Ok(Some(theme.to_string()));
        }
        println!("  Please name a theme (e.g. pirates, haunted house).");
    }
}
