use crate::WatchduckerError;
use crate::cli::NotifyConfig;
use crate::operator::ReplacementOutcome;
use crate::types::BatchCheckResult;
use chatterbox::dispatcher::Sender;
use chatterbox::dispatcher::discord::Discord;
use chatterbox::dispatcher::slack::Slack;
use chatterbox::dispatcher::telegram::Telegram;
use chatterbox::message::{Dispatcher, Message};
use log::{debug, error, info};
use std::fmt::Write;

pub const UPDATE_TITLE: &str = "watchducker image update";

/// A channel update reports can be delivered to.
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    fn send(&self, title: &str, message: &str) -> Result<(), WatchduckerError>;
}

/// One chatterbox dispatcher wired to a single channel.
pub struct ChatterboxNotifier {
    channel: &'static str,
    dispatcher: Dispatcher,
}

impl ChatterboxNotifier {
    fn new(channel: &'static str, sender: Sender) -> Self {
        Self {
            channel,
            dispatcher: Dispatcher::new(sender),
        }
    }

    pub fn slack(webhook_url: String, channel: String) -> Self {
        Self::new(
            "slack",
            Sender {
                slack: Some(Slack {
                    webhook_url,
                    channel,
                }),
                telegram: None,
                discord: None,
                email: None,
            },
        )
    }

    pub fn telegram(bot_token: String, chat_id: String) -> Self {
        Self::new(
            "telegram",
            Sender {
                slack: None,
                telegram: Some(Telegram { bot_token, chat_id }),
                discord: None,
                email: None,
            },
        )
    }

    pub fn discord(bot_token: String, channel_id: String) -> Self {
        Self::new(
            "discord",
            Sender {
                slack: None,
                telegram: None,
                discord: Some(Discord {
                    bot_token,
                    channel_id,
                }),
                email: None,
            },
        )
    }
}

impl Notifier for ChatterboxNotifier {
    fn name(&self) -> &str {
        self.channel
    }

    fn send(&self, title: &str, message: &str) -> Result<(), WatchduckerError> {
        let message = Message::new(title.to_string(), message.to_string());
        self.dispatcher
            .dispatch(&message)
            .map(|_| ())
            .map_err(|e| WatchduckerError::Notify(format!("{}: {e}", self.channel)))
    }
}

/// Every notifier enabled by the configuration.
#[derive(Default)]
pub struct Notifiers {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl Notifiers {
    pub fn from_config(config: &NotifyConfig) -> Result<Self, WatchduckerError> {
        let mut notifiers = Self::default();
        if let Some((webhook_url, channel)) = pair(
            &config.slack_webhook_url,
            &config.slack_channel,
            "WATCHDUCKER_SLACK_WEBHOOK_URL",
            "WATCHDUCKER_SLACK_CHANNEL",
        )? {
            info!("Using Slack dispatcher");
            notifiers.register(Box::new(ChatterboxNotifier::slack(webhook_url, channel)));
        }
        if let Some((bot_token, chat_id)) = pair(
            &config.telegram_bot_token,
            &config.telegram_chat_id,
            "WATCHDUCKER_TELEGRAM_BOT_TOKEN",
            "WATCHDUCKER_TELEGRAM_CHAT_ID",
        )? {
            info!("Using Telegram dispatcher");
            notifiers.register(Box::new(ChatterboxNotifier::telegram(bot_token, chat_id)));
        }
        if let Some((bot_token, channel_id)) = pair(
            &config.discord_bot_token,
            &config.discord_channel_id,
            "WATCHDUCKER_DISCORD_BOT_TOKEN",
            "WATCHDUCKER_DISCORD_CHANNEL_ID",
        )? {
            info!("Using Discord dispatcher");
            notifiers.register(Box::new(ChatterboxNotifier::discord(bot_token, channel_id)));
        }
        if notifiers.is_empty() {
            info!("no notification channel configured");
        }
        Ok(notifiers)
    }

    pub fn register(&mut self, notifier: Box<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Sends to every channel. A failing channel does not stop the others;
    /// returns how many failed.
    pub fn send(&self, title: &str, message: &str) -> usize {
        debug!("sending notification `{title}`");
        self.notifiers
            .iter()
            .filter_map(|notifier| {
                notifier
                    .send(title, message)
                    .inspect_err(|e| {
                        error!("failed to dispatch message via {}: {e}", notifier.name())
                    })
                    .err()
            })
            .count()
    }

    pub fn send_test_message(&self) -> usize {
        self.send("watchducker test message", "notifications are working")
    }
}

fn pair(
    first: &Option<String>,
    second: &Option<String>,
    first_name: &str,
    second_name: &str,
) -> Result<Option<(String, String)>, WatchduckerError> {
    match (first, second) {
        (Some(a), Some(b)) => Ok(Some((a.clone(), b.clone()))),
        (None, None) => Ok(None),
        (Some(_), None) => Err(WatchduckerError::Config(format!(
            "{second_name} not defined"
        ))),
        (None, Some(_)) => Err(WatchduckerError::Config(format!(
            "{first_name} not defined"
        ))),
    }
}

/// Text of the notification sent after a run that found updates.
pub fn update_summary(result: &BatchCheckResult, outcomes: &[ReplacementOutcome]) -> String {
    let mut summary = String::new();
    for image in result.images.iter().filter(|i| i.updated && !i.is_failed()) {
        let _ = writeln!(summary, "image {} updated ✅", image.name);
    }
    for outcome in outcomes {
        match &outcome.error {
            None => {
                let _ = writeln!(
                    summary,
                    "container {} recreated on {}",
                    outcome.container, outcome.image
                );
            }
            Some(e) => {
                let _ = writeln!(summary, "container {} failed ❌: {e}", outcome.container);
            }
        }
    }
    let _ = write!(
        summary,
        "{} updated, {} up to date, {} failed",
        result.summary.updated, result.summary.up_to_date, result.summary.failed
    );
    summary
}
