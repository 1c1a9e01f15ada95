use crate::WatchduckerError;
use crate::schedule::{CronSchedule, DEFAULT_CRON, RunMode};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::time::Duration;

pub const DEFAULT_CONCURRENCY: usize = 8;

/// Which containers a run looks at. Names win over `--all`, which wins over
/// `--label-reversed`, which wins over `--label`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Discovery {
    Names(Vec<String>),
    All,
    LabelReversed,
    #[default]
    Label,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyConfig {
    pub slack_webhook_url: Option<String>,
    pub slack_channel: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub discord_bot_token: Option<String>,
    pub discord_channel_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub discovery: Discovery,
    pub run_mode: RunMode,
    pub clean_up: bool,
    pub no_restart: bool,
    pub include_stopped: bool,
    pub disabled_containers: Vec<String>,
    pub concurrency: usize,
    pub self_update: bool,
    pub self_image_heuristic: bool,
    pub send_test_message: bool,
    pub notify: NotifyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery: Discovery::default(),
            run_mode: RunMode::Once,
            clean_up: false,
            no_restart: false,
            include_stopped: false,
            disabled_containers: Vec::new(),
            concurrency: DEFAULT_CONCURRENCY,
            self_update: false,
            self_image_heuristic: false,
            send_test_message: false,
            notify: NotifyConfig::default(),
        }
    }
}

impl Config {
    /// True when passes repeat, so a failed pass is logged instead of ending
    /// the process.
    pub fn watch(&self) -> bool {
        self.run_mode != RunMode::Once
    }

    pub fn is_disabled(&self, container_name: &str) -> bool {
        self.disabled_containers.iter().any(|n| n == container_name)
    }
}

impl TryFrom<ArgMatches> for Config {
    type Error = WatchduckerError;

    fn try_from(matches: ArgMatches) -> Result<Self, Self::Error> {
        let names: Vec<String> = matches
            .get_many::<String>("containers")
            .map(|values| values.cloned().collect())
            .unwrap_or_default();
        let discovery = if !names.is_empty() {
            Discovery::Names(names)
        } else if matches.get_flag("all") {
            Discovery::All
        } else if matches.get_flag("label_reversed") {
            Discovery::LabelReversed
        } else if matches.get_flag("label") {
            Discovery::Label
        } else {
            return Err(WatchduckerError::Config(
                "name containers or pass one of --all, --label, --label-reversed".to_string(),
            ));
        };

        let concurrency = matches
            .get_one::<usize>("concurrency")
            .copied()
            .unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(WatchduckerError::Config(
                "--concurrency must be at least 1".to_string(),
            ));
        }

        // --once wins over --watch, which wins over the cron schedule
        let run_mode = if matches.get_flag("once") {
            RunMode::Once
        } else if let Some(seconds) = matches.get_one::<u64>("watch") {
            RunMode::Interval(Duration::from_secs(*seconds))
        } else {
            let expression = matches
                .get_one::<String>("cron")
                .map(String::as_str)
                .unwrap_or(DEFAULT_CRON);
            RunMode::Cron(CronSchedule::parse(expression)?)
        };

        let string = |id: &str| matches.get_one::<String>(id).cloned();
        Ok(Config {
            discovery,
            run_mode,
            clean_up: matches.get_flag("clean"),
            no_restart: matches.get_flag("no_restart"),
            include_stopped: matches.get_flag("include_stopped"),
            disabled_containers: matches
                .get_many::<String>("disabled_containers")
                .map(|values| values.filter(|v| !v.is_empty()).cloned().collect())
                .unwrap_or_default(),
            concurrency,
            self_update: matches.get_flag("self_update"),
            self_image_heuristic: matches.get_flag("self_image_heuristic"),
            send_test_message: matches.get_flag("test_message"),
            notify: NotifyConfig {
                slack_webhook_url: string("slack_webhook_url"),
                slack_channel: string("slack_channel"),
                telegram_bot_token: string("telegram_bot_token"),
                telegram_chat_id: string("telegram_chat_id"),
                discord_bot_token: string("discord_bot_token"),
                discord_channel_id: string("discord_channel_id"),
            },
        })
    }
}

fn flag(id: &'static str, long: &'static str, env: &'static str, help: &'static str) -> Arg {
    Arg::new(id)
        .long(long)
        .env(env)
        .help(help)
        .action(ArgAction::SetTrue)
}

fn secret(id: &'static str, long: &'static str, env: &'static str) -> Arg {
    Arg::new(id)
        .long(long)
        .env(env)
        .hide_env_values(true)
        .value_name("VALUE")
}

pub fn command() -> Command {
    Command::new("watchducker")
        .version(env!("CARGO_PKG_VERSION"))
        .about("detect updated container images and recreate their containers")
        .arg(
            Arg::new("containers")
                .help("names of the containers to check")
                .num_args(0..)
                .value_name("CONTAINER"),
        )
        .arg(flag(
            "all",
            "all",
            "WATCHDUCKER_ALL",
            "check every container regardless of labels",
        ))
        .arg(flag(
            "label",
            "label",
            "WATCHDUCKER_LABEL",
            "check containers labelled watchducker.update=true",
        ))
        .arg(flag(
            "label_reversed",
            "label-reversed",
            "WATCHDUCKER_LABEL_REVERSED",
            "check containers NOT labelled watchducker.update=true",
        ))
        .arg(flag(
            "once",
            "once",
            "WATCHDUCKER_ONCE",
            "run a single check and exit",
        ))
        .arg(
            Arg::new("cron")
                .long("cron")
                .env("WATCHDUCKER_CRON")
                .help("cron expression scheduling the checks")
                .value_name("EXPR")
                .default_value(DEFAULT_CRON),
        )
        .arg(
            Arg::new("watch")
                .short('w')
                .long("watch")
                .env("WATCHDUCKER_WATCH")
                .help("re-run every N seconds instead of on the cron schedule (default: 60)")
                .value_name("SECONDS")
                .num_args(0..=1)
                .default_missing_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(flag(
            "clean",
            "clean",
            "WATCHDUCKER_CLEAN",
            "prune dangling images after updating containers",
        ))
        .arg(flag(
            "no_restart",
            "no-restart",
            "WATCHDUCKER_NO_RESTART",
            "only pull new images, never recreate containers",
        ))
        .arg(flag(
            "include_stopped",
            "include-stopped",
            "WATCHDUCKER_INCLUDE_STOPPED",
            "include stopped containers in the check",
        ))
        .arg(
            Arg::new("disabled_containers")
                .long("disabled-containers")
                .env("WATCHDUCKER_DISABLED_CONTAINERS")
                .help("comma separated container names excluded from checks and updates")
                .value_name("NAMES")
                .value_delimiter(','),
        )
        .arg(
            Arg::new("concurrency")
                .long("concurrency")
                .env("WATCHDUCKER_CONCURRENCY")
                .help(format!(
                    "maximum number of images checked at once (default: {DEFAULT_CONCURRENCY})"
                ))
                .value_name("N")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(flag(
            "self_update",
            "self-update",
            "WATCHDUCKER_SELF_UPDATE",
            "replace watchducker's own container when its image was updated",
        ))
        .arg(flag(
            "self_image_heuristic",
            "self-image-heuristic",
            "WATCHDUCKER_SELF_IMAGE_HEURISTIC",
            "also treat containers whose image contains `watchducker` as self",
        ))
        .arg(flag(
            "test_message",
            "test-message",
            "WATCHDUCKER_TEST_MESSAGE",
            "send a test notification on startup",
        ))
        .arg(secret(
            "slack_webhook_url",
            "slack-webhook-url",
            "WATCHDUCKER_SLACK_WEBHOOK_URL",
        ))
        .arg(secret(
            "slack_channel",
            "slack-channel",
            "WATCHDUCKER_SLACK_CHANNEL",
        ))
        .arg(secret(
            "telegram_bot_token",
            "telegram-bot-token",
            "WATCHDUCKER_TELEGRAM_BOT_TOKEN",
        ))
        .arg(secret(
            "telegram_chat_id",
            "telegram-chat-id",
            "WATCHDUCKER_TELEGRAM_CHAT_ID",
        ))
        .arg(secret(
            "discord_bot_token",
            "discord-bot-token",
            "WATCHDUCKER_DISCORD_BOT_TOKEN",
        ))
        .arg(secret(
            "discord_channel_id",
            "discord-channel-id",
            "WATCHDUCKER_DISCORD_CHANNEL_ID",
        ))
}

pub fn configure_cli() -> Result<Config, WatchduckerError> {
    command().get_matches().try_into()
}
