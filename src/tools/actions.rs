//! Local side-effecting actions behind the tool declarations

use std::process::Command;
use std::time::Duration;

use rand::seq::SliceRandom;

use crate::{Error, Result};

const JOKES: &[&str] = &[
    "Why is a marriage like a public toilet? The ones outside are desperate to get in, and the ones inside are desperate to get out.",
    "Patient: 'Doctor, I keep forgetting everything.' Doctor: 'How long has this been happening?' Patient: 'How long has what been happening?'",
    "A man asks a farmer, 'Why is your bull running so fast?' The farmer replies, 'He sees you're holding two red flags.' The man says, 'But I'm not!' The farmer says, 'Yeah, but the bull doesn't know that.'",
    "I told my computer I needed a break, and it said 'No problem, I'll go to sleep.'",
];

/// Implementations of the tools the model can call
///
/// Each method returns the text handed back to the model. An `Err` is turned
/// into an error result by the dispatcher and never reaches the session.
pub trait Actions: Send + Sync {
    /// Open a web search for `query`
    ///
    /// # Errors
    ///
    /// Returns error if the search cannot be opened
    fn search_web(&self, query: &str) -> Result<String>;

    /// Open a YouTube search for `query`
    ///
    /// # Errors
    ///
    /// Returns error if the search cannot be opened
    fn play_song_on_youtube(&self, query: &str) -> Result<String>;

    /// Arm an alarm `delay_in_seconds` from now
    ///
    /// # Errors
    ///
    /// Returns error if the alarm cannot be scheduled
    fn set_alarm(&self, delay_in_seconds: f64, label: &str) -> Result<String>;

    /// Describe the current local time
    ///
    /// # Errors
    ///
    /// Returns error if the time cannot be determined
    fn current_time(&self) -> Result<String>;

    /// Pick a joke
    ///
    /// # Errors
    ///
    /// Returns error if no joke is available
    fn tell_joke(&self) -> Result<String>;
}

/// Actions against the local desktop
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemActions;

impl Actions for SystemActions {
    fn search_web(&self, query: &str) -> Result<String> {
        let url = format!(
            "https://www.google.com/search?q={}",
            urlencoding::encode(query)
        );
        open_url(&url)?;
        Ok(format!("Searching Google for \"{query}\"."))
    }

    fn play_song_on_youtube(&self, query: &str) -> Result<String> {
        let url = format!(
            "https://www.youtube.com/results?search_query={}",
            urlencoding::encode(query)
        );
        open_url(&url)?;
        Ok(format!("Searching YouTube for \"{query}\"."))
    }

    fn set_alarm(&self, delay_in_seconds: f64, label: &str) -> Result<String> {
        if !delay_in_seconds.is_finite() || delay_in_seconds <= 0.0 {
            return Ok("I can only set alarms for a positive number of seconds.".to_string());
        }

        let Ok(delay) = Duration::try_from_secs_f64(delay_in_seconds) else {
            return Ok("That is too far in the future for me to set an alarm.".to_string());
        };

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Tool("no runtime available to schedule the alarm".to_string()))?;

        let alarm_label = label.to_string();
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            tracing::warn!(label = %alarm_label, "ALARM: {alarm_label}");
        });

        tracing::info!(label, delay_secs = delay_in_seconds, "alarm set");
        Ok(format!(
            "OK, I've set an alarm for \"{label}\" to go off in {}.",
            describe_delay(delay_in_seconds)
        ))
    }

    fn current_time(&self) -> Result<String> {
        let now = chrono::Local::now();
        Ok(format!("The current time is {}.", now.format("%I:%M %p")))
    }

    fn tell_joke(&self) -> Result<String> {
        JOKES
            .choose(&mut rand::thread_rng())
            .map(|j| (*j).to_string())
            .ok_or_else(|| Error::Tool("no jokes available".to_string()))
    }
}

/// Human description of an alarm delay, e.g. "2 minutes and 5 seconds"
#[must_use]
pub fn describe_delay(delay_in_seconds: f64) -> String {
    let minutes = (delay_in_seconds / 60.0).floor();
    let seconds = delay_in_seconds % 60.0;

    let mut parts = Vec::new();
    if minutes > 0.0 {
        parts.push(format!(
            "{minutes} minute{}",
            if minutes > 1.0 { "s" } else { "" }
        ));
    }
    if seconds > 0.0 {
        parts.push(format!(
            "{seconds} second{}",
            if seconds > 1.0 { "s" } else { "" }
        ));
    }

    if parts.is_empty() {
        format!("{delay_in_seconds} seconds")
    } else {
        parts.join(" and ")
    }
}

/// Open a URL with the platform's default handler
fn open_url(url: &str) -> Result<()> {
    #[cfg(target_os = "macos")]
    let mut cmd = Command::new("open");
    #[cfg(target_os = "windows")]
    let mut cmd = {
        let mut c = Command::new("cmd");
        c.args(["/C", "start", ""]);
        c
    };
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let mut cmd = Command::new("xdg-open");

    cmd.arg(url)
        .spawn()
        .map_err(|e| Error::Tool(format!("could not open {url}: {e}")))?;

    tracing::debug!(url, "opened url");
    Ok(())
}
