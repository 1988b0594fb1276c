use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use log::{debug, info, warn};

use crate::api::{ApiError, StoryApi};
use crate::story::{StoryDocument, StoryError};
use crate::view::{Frame, ImageState, ImageUpdate, RequestToken, StoryView};

// ---------------------------------------------------------------------------
// Player commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Zero-based option index.
    Choose(usize),
    Visualize,
    Restart,
    NewStory,
    Quit,
    /// Redraw, picking up any finished image.
    Refresh,
}

pub fn parse_command(input: &str) -> Option<Command> {
    let input = input.trim().to_lowercase();
    match input.as_str() {
        "" => Some(Command::Refresh),
        "v" | "visualize" => Some(Command::Visualize),
        "r" | "restart" => Some(Command::Restart),
        "n" | "new" => Some(Command::NewStory),
        "q" | "quit" | "exit" => Some(Command::Quit),
        other => match other.parse::<usize>() {
            Ok(n) if n >= 1 => Some(Command::Choose(n - 1)),
            _ => None,
        },
    }
}

/// How a round of play ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Quit,
    /// The player asked for a fresh story; the caller owns that flow.
    NewStory,
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

pub fn render_frame(frame: &Frame<'_>, new_story_available: bool) -> String {
    let mut out = String::new();

    let scene = match frame {
        Frame::Loading => {
            out.push_str("Loading story...\n");
            return out;
        }
        Frame::Scene(scene) => scene,
    };

    let title = if scene.title.is_empty() { "Untitled story" } else { scene.title };
    let _ = writeln!(out, "\n=== {title} ===\n");

    match scene.image {
        ImageState::Idle => out.push_str("  [v] Visualize scene\n"),
        ImageState::Loading(_) => out.push_str("  Painting the scene... (press Enter to check)\n"),
        ImageState::Ready(url) => {
            let _ = writeln!(out, "  Scene image: {url}");
        }
    }

    let _ = writeln!(out, "\n{}\n", scene.node.content);

    if let Some(ending) = scene.ending() {
        let _ = writeln!(out, "  *** {} ***", ending.headline());
        let _ = writeln!(out, "  {}", ending.message());
    } else {
        out.push_str("What will you do?\n");
        for (i, option) in scene.options().iter().enumerate() {
            let _ = writeln!(out, "  [{}] {}", i + 1, option.text);
        }
    }

    out.push_str(&controls_line(new_story_available));
    out
}

fn controls_line(new_story_available: bool) -> String {
    if new_story_available {
        "\n  [r] Restart story    [n] New story    [q] Quit\n".into()
    } else {
        "\n  [r] Restart story    [q] Quit\n".into()
    }
}

// ---------------------------------------------------------------------------
// Image requests
// ---------------------------------------------------------------------------

struct ImageResponse {
    token: RequestToken,
    result: Result<String, ApiError>,
}

/// Runs image requests off the input loop and hands results back by token.
struct ImageWorker {
    api: Arc<dyn StoryApi>,
    tx: Sender<ImageResponse>,
    rx: Receiver<ImageResponse>,
}

impl ImageWorker {
    fn new(api: Arc<dyn StoryApi>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self { api, tx, rx }
    }

    fn request(&self, view: &mut StoryView) -> Result<(), StoryError> {
        let Some(request) = view.begin_visualize()? else {
            return Ok(());
        };
        let api = Arc::clone(&self.api);
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = api.generate_scene_image(&request.scene_description);
            // The receiver only goes away when the player has quit.
            let _ = tx.send(ImageResponse {
                token: request.token,
                result,
            });
        });
        Ok(())
    }

    /// Apply every response that has arrived. Returns notices for the player.
    fn drain(&self, view: &mut StoryView) -> Vec<String> {
        self.rx
            .try_iter()
            .filter_map(|response| match view.finish_visualize(&response.token, response.result) {
                ImageUpdate::Failed(msg) => Some(msg),
                ImageUpdate::Applied | ImageUpdate::Stale => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Play loop
// ---------------------------------------------------------------------------

fn read_line() -> Result<Option<String>> {
    print!("> ");
    io::stdout().flush()?;
    let mut input = String::new();
    if io::stdin().read_line(&mut input)? == 0 {
        return Ok(None);
    }
    Ok(Some(input))
}

fn show_intro(story: &StoryDocument) {
    let (winning, total) = story.ending_counts();
    println!("\n========================================");
    let title = if story.title.is_empty() { "Untitled story" } else { story.title.as_str() };
    println!("   {title}");
    println!("========================================");
    println!("{total} endings await, {winning} of them happy.");
    println!("Pick an option by number.\n");
}

/// Play `story` until the player quits or asks for a new story.
pub fn run(api: Arc<dyn StoryApi>, story: StoryDocument, new_story_available: bool) -> Result<RoundOutcome> {
    for problem in story.audit() {
        warn!("Story '{}': {problem}", story.id);
    }
    show_intro(&story);

    let mut view = StoryView::with_story(story);
    let images = ImageWorker::new(api);

    loop {
        for notice in images.drain(&mut view) {
            println!("\n(!) {notice}");
        }

        match view.frame() {
            Ok(frame) => print!("{}", render_frame(&frame, new_story_available)),
            Err(e) => {
                println!("\n(!) This story is damaged: {e}");
                print!("{}", controls_line(new_story_available));
            }
        }

        let Some(input) = read_line()? else {
            info!("Input closed");
            return Ok(RoundOutcome::Quit);
        };
        let Some(command) = parse_command(&input) else {
            println!("  Unknown command '{}'.", input.trim());
            continue;
        };
        debug!("Command: {command:?}");

        match command {
            Command::Choose(index) => {
                if let Err(e) = view.select(index).map(|_| ()) {
                    warn!("Choice rejected at {:?}: {e}", view.current_node_id());
                    println!("  {e}");
                }
            }
            Command::Visualize => {
                if let Err(e) = images.request(&mut view) {
                    println!("  {e}");
                }
            }
            Command::Restart => view.restart(),
            Command::NewStory if new_story_available => return Ok(RoundOutcome::NewStory),
            Command::NewStory => println!("  New stories need a signed-in user."),
            Command::Quit => return Ok(RoundOutcome::Quit),
            Command::Refresh => {}
        }
    }
}
