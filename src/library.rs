//! The signed-in user's saved stories and new-story generation jobs.

use std::fmt::Write as _;
use std::thread;

use anyhow::{bail, Context, Result};
use log::{debug, info};
use serde::Deserialize;

use crate::api::{ClientConfig, StoryApi};
use crate::session::Session;
use crate::story::node::{flexible_id, flexible_opt_id};
use crate::story::StoryDocument;

/// One entry of the story library.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorySummary {
    #[serde(deserialize_with = "flexible_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl StorySummary {
    /// Calendar date of creation, `Unknown` when the backend has none.
    pub fn created_on(&self) -> &str {
        match self.created_at.as_deref() {
            Some(ts) if !ts.is_empty() => ts.split('T').next().unwrap_or(ts),
            _ => "Unknown",
        }
    }
}

pub fn format_library(stories: &[StorySummary]) -> String {
    let mut out = String::from("Your Library\n");
    if stories.is_empty() {
        out.push_str("  You haven't created any stories yet.\n");
        return out;
    }
    for story in stories {
        let _ = writeln!(
            out,
            "  [{}] {}  (created: {})",
            story.id,
            story.title,
            story.created_on()
        );
    }
    out
}

// ---------------------------------------------------------------------------
// Generation jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoryJob {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default, deserialize_with = "flexible_opt_id")]
    pub story_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Create a story for `theme` and wait for the backend to finish it.
pub fn generate_story(
    api: &dyn StoryApi,
    config: &ClientConfig,
    session: &Session,
    theme: &str,
) -> Result<StoryDocument> {
    let theme = theme.trim();
    if theme.is_empty() {
        bail!("a theme is required to generate a story");
    }

    let mut job = api
        .create_story(theme, session)
        .context("failed to start story generation")?;
    info!("Generation job {} started for theme '{theme}'", job.job_id);

    let mut polls = 0;
    loop {
        match job.status {
            JobStatus::Completed => {
                let story_id = job
                    .story_id
                    .with_context(|| format!("job {} completed without a story id", job.job_id))?;
                info!("Job {} produced story {story_id}", job.job_id);
                return api
                    .fetch_story(&story_id)
                    .with_context(|| format!("failed to load story {story_id}"));
            }
            JobStatus::Failed => bail!(
                "story generation failed: {}",
                job.error.as_deref().unwrap_or("no reason given")
            ),
            status => debug!("Job {} is {status:?} (poll {polls})", job.job_id),
        }

        if polls >= config.max_polls {
            bail!("story generation did not finish after {polls} checks");
        }
        polls += 1;

        thread::sleep(config.poll_interval);
        job = api
            .job_status(&job.job_id)
            .with_context(|| format!("failed to check job {}", job.job_id))?;
    }
}
