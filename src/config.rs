use anyhow::{anyhow, bail, Context};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::notification::{Channel, NotificationType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Api,
    Coordinator,
    Aggregator,
    Listener,
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "api" => Ok(Role::Api),
            "coordinator" => Ok(Role::Coordinator),
            "aggregator" => Ok(Role::Aggregator),
            "listener" => Ok(Role::Listener),
            other => Err(anyhow!("unknown role: {}", other)),
        }
    }
}

/// Debounce windows for one notification type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelWindows {
    pub in_app: Duration,
    pub email: Duration,
}

impl ChannelWindows {
    pub fn get(&self, channel: Channel) -> Duration {
        match channel {
            Channel::InApp => self.in_app,
            Channel::Email => self.email,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DebounceWindows {
    windows: HashMap<NotificationType, ChannelWindows>,
}

impl DebounceWindows {
    /// Same windows for every type.
    #[cfg(test)]
    pub fn uniform(in_app: Duration, email: Duration) -> Self {
        let windows = NotificationType::ALL
            .into_iter()
            .map(|kind| (kind, ChannelWindows { in_app, email }))
            .collect();
        Self { windows }
    }

    pub fn window(&self, notification_type: NotificationType, channel: Channel) -> Duration {
        self.windows
            .get(&notification_type)
            .map(|w| w.get(channel))
            .unwrap_or_else(|| default_windows(notification_type).get(channel))
    }

    /// Reads `DEBOUNCE_{TYPE}_{CHANNEL}_SECS` overrides through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut windows = HashMap::new();

        for kind in NotificationType::ALL {
            let mut entry = default_windows(kind);
            for channel in Channel::ALL {
                let var = format!(
                    "DEBOUNCE_{}_{}_SECS",
                    kind.as_str().to_uppercase(),
                    channel.as_str().to_uppercase()
                );
                if let Some(raw) = lookup(&var) {
                    let secs: u64 = raw
                        .trim()
                        .parse()
                        .with_context(|| format!("{} must be a number of seconds", var))?;
                    if secs == 0 {
                        bail!("{} must be greater than zero", var);
                    }
                    match channel {
                        Channel::InApp => entry.in_app = Duration::from_secs(secs),
                        Channel::Email => entry.email = Duration::from_secs(secs),
                    }
                }
            }
            windows.insert(kind, entry);
        }

        Ok(Self { windows })
    }
}

impl Default for DebounceWindows {
    fn default() -> Self {
        let windows = NotificationType::ALL
            .into_iter()
            .map(|kind| (kind, default_windows(kind)))
            .collect();
        Self { windows }
    }
}

fn default_windows(notification_type: NotificationType) -> ChannelWindows {
    let email = match notification_type {
        NotificationType::AssetViewed => Duration::from_secs(900),
        NotificationType::AssetUploaded | NotificationType::CommentAdded => Duration::from_secs(300),
    };

    ChannelWindows {
        in_app: Duration::from_secs(10),
        email,
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub host: String,
    pub port: u16,
    pub roles: Vec<Role>,
    /// Consumer name in every consumer group; keep it stable per replica.
    pub worker_id: String,
    pub worker_concurrency: usize,
    pub handler_deadline: Duration,
    pub stream_prefix: String,
    pub outbox_dir: PathBuf,
    pub configure_keyspace_events: bool,
    pub reconcile_cron: String,
    pub reconcile_grace: Duration,
    pub windows: DebounceWindows,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let roles = var("ROLES", "api,coordinator,aggregator")
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(Role::from_str)
            .collect::<anyhow::Result<Vec<_>>>()?;
        if roles.is_empty() {
            bail!("ROLES must name at least one role");
        }

        let worker_concurrency: usize = var("WORKER_CONCURRENCY", "8")
            .parse()
            .context("WORKER_CONCURRENCY must be a number")?;
        if worker_concurrency == 0 {
            bail!("WORKER_CONCURRENCY must be greater than zero");
        }

        let handler_deadline_secs: u64 = var("HANDLER_DEADLINE_SECS", "30")
            .parse()
            .context("HANDLER_DEADLINE_SECS must be a number")?;
        if handler_deadline_secs == 0 {
            bail!("HANDLER_DEADLINE_SECS must be greater than zero");
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: var("REDIS_URL", "redis://127.0.0.1:6379/0"),
            host: var("HOST", "127.0.0.1"),
            port: var("PORT", "3000").parse().context("PORT must be a number")?,
            roles,
            worker_id: lookup("WORKER_ID").unwrap_or_else(|| Uuid::new_v4().to_string()),
            worker_concurrency,
            handler_deadline: Duration::from_secs(handler_deadline_secs),
            stream_prefix: var("STREAM_PREFIX", "notify"),
            outbox_dir: PathBuf::from(var("OUTBOX_DIR", "./outbox")),
            configure_keyspace_events: var("CONFIGURE_KEYSPACE_EVENTS", "true")
                .parse()
                .context("CONFIGURE_KEYSPACE_EVENTS must be true or false")?,
            reconcile_cron: var("RECONCILE_CRON", "0 * * * * *"),
            reconcile_grace: Duration::from_secs(
                var("RECONCILE_GRACE_SECS", "60")
                    .parse()
                    .context("RECONCILE_GRACE_SECS must be a number")?,
            ),
            windows: DebounceWindows::from_lookup(&lookup)?,
        })
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://localhost/n")])).unwrap();
        assert_eq!(config.roles, vec![Role::Api, Role::Coordinator, Role::Aggregator]);
        assert!(!config.has_role(Role::Listener));
        assert_eq!(config.port, 3000);
        assert_eq!(config.handler_deadline, Duration::from_secs(30));
        assert_eq!(
            config.windows.window(NotificationType::AssetUploaded, Channel::InApp),
            Duration::from_secs(10)
        );
        assert_eq!(
            config.windows.window(NotificationType::AssetViewed, Channel::Email),
            Duration::from_secs(900)
        );
    }

    #[test]
    fn test_database_url_is_required() {
        assert!(Config::from_lookup(lookup_from(&[])).is_err());
    }

    #[test]
    fn test_window_overrides_per_type_and_channel() {
        let windows = DebounceWindows::from_lookup(lookup_from(&[
            ("DEBOUNCE_ASSET_UPLOADED_IN_APP_SECS", "5"),
            ("DEBOUNCE_COMMENT_ADDED_EMAIL_SECS", "60"),
        ]))
        .unwrap();

        assert_eq!(windows.window(NotificationType::AssetUploaded, Channel::InApp), Duration::from_secs(5));
        assert_eq!(windows.window(NotificationType::AssetUploaded, Channel::Email), Duration::from_secs(300));
        assert_eq!(windows.window(NotificationType::CommentAdded, Channel::Email), Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_windows_are_rejected() {
        assert!(DebounceWindows::from_lookup(lookup_from(&[("DEBOUNCE_ASSET_VIEWED_IN_APP_SECS", "0")])).is_err());
        assert!(DebounceWindows::from_lookup(lookup_from(&[("DEBOUNCE_ASSET_VIEWED_EMAIL_SECS", "soon")])).is_err());
    }

    #[test]
    fn test_zero_handler_deadline_is_rejected() {
        let result = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/n"),
            ("HANDLER_DEADLINE_SECS", "0"),
        ]));

        assert!(result.is_err());
    }

    #[test]
    fn test_roles_are_parsed() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/n"),
            ("ROLES", "listener, aggregator"),
        ]))
        .unwrap();
        assert_eq!(config.roles, vec![Role::Listener, Role::Aggregator]);

        assert!(Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/n"),
            ("ROLES", "scheduler"),
        ]))
        .is_err());
    }
}
