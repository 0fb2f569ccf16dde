pub const UNREACHABLE_NAME: &str = "Failed to connect";
pub const UNREACHABLE_FLAG: &str = ":warning:";
pub const NO_LOCALE_FLAG: &str = ":no_entry_sign:";
pub const UNKNOWN: &str = "unknown";
pub const VERSION_UNKNOWN: &str = "version unknown";
pub const UNKNOWN_PLAYER_COUNT: &str = "?";

/// One successful query of a game server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerStatus {
    pub name: String,
    pub max_players: u8,
    pub game: String,
    pub map: String,
    pub locale: Option<String>,
    pub player_count: u8,
    pub mod_version: String,
}

/// Display fields that survive failed queries.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDetails {
    pub name: String,
    pub flag: String,
    pub max_players: u8,
    pub game_mode: String,
    pub map: String,
    pub mod_version: String,
}

impl Default for ServerDetails {
    fn default() -> Self {
        Self {
            name: UNREACHABLE_NAME.to_string(),
            flag: UNREACHABLE_FLAG.to_string(),
            max_players: 0,
            game_mode: UNKNOWN.to_string(),
            map: UNKNOWN.to_string(),
            mod_version: VERSION_UNKNOWN.to_string(),
        }
    }
}

impl From<&ServerStatus> for ServerDetails {
    fn from(status: &ServerStatus) -> Self {
        Self {
            name: status.name.clone(),
            flag: flag_for_locale(status.locale.as_deref()),
            max_players: status.max_players,
            game_mode: status.game.clone(),
            map: status.map.clone(),
            mod_version: status.mod_version.clone(),
        }
    }
}

pub fn flag_for_locale(locale: Option<&str>) -> String {
    match locale {
        Some(code) if !code.is_empty() => format!(":flag_{}:", code.to_lowercase()),
        _ => NO_LOCALE_FLAG.to_string(),
    }
}

/// Per-server state kept for the whole process lifetime.
///
/// `connection` never changes. `details` is only replaced by a successful query,
/// while `player_count` is reset on every cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerRecord {
    connection: String,
    details: ServerDetails,
    player_count: Option<u8>,
}

impl ServerRecord {
    pub fn new(connection: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            details: ServerDetails::default(),
            player_count: None,
        }
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn details(&self) -> &ServerDetails {
        &self.details
    }

    pub fn player_count(&self) -> Option<u8> {
        self.player_count
    }

    pub fn apply_success(&mut self, status: &ServerStatus) {
        self.details = ServerDetails::from(status);
        self.player_count = Some(status.player_count);
    }

    pub fn apply_failure(&mut self) {
        self.player_count = None;
    }

    pub fn heading(&self) -> String {
        format!("{} {}", self.details.flag, self.details.name)
    }

    pub fn body(&self) -> String {
        let players = match self.player_count {
            Some(count) => count.to_string(),
            None => UNKNOWN_PLAYER_COUNT.to_string(),
        };
        format!(
            "{}/{} Playing {} on {} | VisTrace {}",
            players,
            self.details.max_players,
            self.details.game_mode,
            self.details.map,
            self.details.mod_version
        )
    }
}
