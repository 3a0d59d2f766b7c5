//! Engine timing configuration.
//!
//! Every knob has a default that matches how interactive sessions are
//! normally run. Binaries override them from the environment:
//!
//! | Variable | Field | Default |
//! |---|---|---|
//! | `HUDDLE_TOKEN_TTL` | [`Config::token_ttl`] | `10m` |
//! | `HUDDLE_CALL_TIMEOUT` | [`Config::call_timeout`] | `30s` |
//! | `HUDDLE_LOBBY_TIMEOUT` | [`Config::lobby_timeout`] | `10m` |
//! | `HUDDLE_LOBBY_REFRESH` | [`Config::lobby_refresh`] | `2500ms` |
//! | `HUDDLE_TURN_TIMEOUT` | [`Config::turn_timeout`] | `1m` |
//! | `HUDDLE_ACK_DEADLINE` | [`Config::ack_deadline`] | `3s` |
//!
//! Values use the compact form accepted by [`parse_duration`].

use std::time::Duration;

use anyhow::{anyhow, Result};

/// Timing configuration shared by the host, sessions and channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Default lifetime of a correlation token.
    pub token_ttl: Duration,
    /// How long a process channel call waits for its reply.
    pub call_timeout: Duration,
    /// How long a lobby waits for participants.
    pub lobby_timeout: Duration,
    /// Minimum time between two lobby re-broadcasts.
    pub lobby_refresh: Duration,
    /// How long a participant has to play a turn.
    pub turn_timeout: Duration,
    /// Deadline for acknowledging an inbound signal.
    pub ack_deadline: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token_ttl: Duration::from_secs(600),
            call_timeout: Duration::from_secs(30),
            lobby_timeout: Duration::from_secs(600),
            lobby_refresh: Duration::from_millis(2500),
            turn_timeout: Duration::from_secs(60),
            ack_deadline: Duration::from_secs(3),
        }
    }
}

impl Config {
    /// Load configuration from `HUDDLE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Missing keys keep their defaults; present but unparsable keys fail.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let fields: [(&str, &mut Duration); 6] = [
            ("HUDDLE_TOKEN_TTL", &mut config.token_ttl),
            ("HUDDLE_CALL_TIMEOUT", &mut config.call_timeout),
            ("HUDDLE_LOBBY_TIMEOUT", &mut config.lobby_timeout),
            ("HUDDLE_LOBBY_REFRESH", &mut config.lobby_refresh),
            ("HUDDLE_TURN_TIMEOUT", &mut config.turn_timeout),
            ("HUDDLE_ACK_DEADLINE", &mut config.ack_deadline),
        ];
        for (key, field) in fields {
            if let Some(raw) = lookup(key) {
                *field = parse_duration(&raw)
                    .ok_or_else(|| anyhow!("{key} must be a duration like `90s` or `1h 30m`, got {raw:?}"))?;
            }
        }
        Ok(config)
    }
}

/// Parse a compact duration such as `"1h 30m"`, `"45s"`, `"250ms"` or a bare
/// number of milliseconds.
///
/// Units: `d`, `h`, `m`, `s`, `ms`. Components are summed. Returns `None` for
/// empty input or any unrecognized component.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let mut total = Duration::ZERO;
    let mut seen = false;

    for part in input.split_whitespace() {
        let split = part
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(part.len());
        let (digits, unit) = part.split_at(split);
        let value: u64 = digits.parse().ok()?;
        let step = match unit {
            "d" => Duration::from_secs(value.checked_mul(86_400)?),
            "h" => Duration::from_secs(value.checked_mul(3_600)?),
            "m" => Duration::from_secs(value.checked_mul(60)?),
            "s" => Duration::from_secs(value),
            "ms" | "" => Duration::from_millis(value),
            _ => return None,
        };
        total = total.checked_add(step)?;
        seen = true;
    }

    seen.then_some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("45s"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("10m"), Some(Duration::from_secs(600)));
        assert_eq!(parse_duration("2d"), Some(Duration::from_secs(172_800)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("1500"), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_parse_duration_sums_components() {
        assert_eq!(
            parse_duration("1h 30m 10s"),
            Some(Duration::from_secs(3600 + 1800 + 10))
        );
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("   "), None);
        assert_eq!(parse_duration("10x"), None);
        assert_eq!(parse_duration("m"), None);
        assert_eq!(parse_duration("5m soon"), None);
    }

    #[test]
    fn test_from_lookup_overrides_only_present_keys() {
        let env: HashMap<&str, &str> =
            HashMap::from([("HUDDLE_TURN_TIMEOUT", "3m"), ("HUDDLE_ACK_DEADLINE", "2s")]);
        let config = Config::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.turn_timeout, Duration::from_secs(180));
        assert_eq!(config.ack_deadline, Duration::from_secs(2));
        assert_eq!(config.lobby_timeout, Config::default().lobby_timeout);
    }

    #[test]
    fn test_from_lookup_reports_bad_value() {
        let err = Config::from_lookup(|k| (k == "HUDDLE_TOKEN_TTL").then(|| "forever".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("HUDDLE_TOKEN_TTL"));
    }
}
