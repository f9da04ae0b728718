use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A player occupying one of the two catcher slots in a room.
///
/// `x`, `y` and `screen_height` are client-reported; the server clamps `x`
/// to the field but otherwise trusts them (no anti-cheat).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Socket id of the owning connection.
    pub id: String,
    pub score: u32,
    pub x: f64,
    pub screen_height: f64,
    /// Top of the catch line. Falls back to viewport-derived geometry
    /// when zero, see `RoomState::catch_y`.
    pub y: f64,
}

/// A falling heart. Spawned at the top of the field, advances by `speed`
/// each simulation tick until caught or past the bottom bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heart {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub size: f64,
    pub speed: f64,
}

/// Win-condition policy for a room. Set once by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    /// The game runs until a client reports its timer expired (`timeUp`).
    Timer,
    /// First player to reach the target score wins.
    Target,
}

/// Players keyed by slot (1 or 2). BTreeMap so iteration is in ascending
/// slot order, which makes the catch tie-break deterministic.
pub type PlayerMap = BTreeMap<u8, Player>;

/// Messages sent from clients to the server via WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMsg {
    CreateRoom,
    JoinRoom {
        code: String,
    },
    SetGameMode {
        mode: GameMode,
    },
    #[serde(rename_all = "camelCase")]
    ChoosePlayer {
        player: u8,
        #[serde(default)]
        screen_height: Option<f64>,
        #[serde(default)]
        basket_y: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    Move {
        player: u8,
        x: f64,
        #[serde(default)]
        y: Option<f64>,
        #[serde(default)]
        screen_height: Option<f64>,
    },
    TimeUp,
}

/// Messages sent from the server to clients via WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMsg {
    RoomCreated {
        code: String,
    },
    #[serde(rename_all = "camelCase")]
    RoomJoined {
        room_id: String,
        game_mode: Option<GameMode>,
        has_game_mode: bool,
        is_host: bool,
    },
    RoomNotFound,
    PlayerAssigned {
        player: u8,
    },
    PlayerTaken {
        player: u8,
    },
    WaitingForPlayer,
    WaitingForGameMode,
    GameModeSet {
        mode: GameMode,
    },
    GameStarted,
    PlayersUpdate {
        players: PlayerMap,
    },
    HeartsUpdate {
        hearts: Vec<Heart>,
    },
    GameOver {
        winner: Option<u8>,
        scores: BTreeMap<u8, u32>,
    },
}
