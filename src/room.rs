use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::Tuning;
use crate::types::*;

/// Commands the WebSocket handler sends to a room task.
#[derive(Debug, Clone)]
pub enum RoomCommand {
    Join {
        socket_id: String,
    },
    SetMode {
        socket_id: String,
        mode: GameMode,
    },
    ChoosePlayer {
        socket_id: String,
        slot: u8,
        screen_height: Option<f64>,
        basket_y: Option<f64>,
    },
    Move {
        socket_id: String,
        slot: u8,
        x: f64,
        y: Option<f64>,
        screen_height: Option<f64>,
    },
    TimeUp,
    Disconnect {
        socket_id: String,
    },
    Destroy,
}

/// Events fanned out from a room to its subscribed connections.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// Send a message to a specific socket.
    SendTo { socket_id: String, msg: ServerMsg },
    /// Broadcast a message to all sockets in the room.
    Broadcast { msg: ServerMsg },
    /// Broadcast a message to all except the sender.
    BroadcastExcept { exclude: String, msg: ServerMsg },
}

/// Registry of live rooms, keyed by invite code.
pub struct Registry {
    rooms: dashmap::DashMap<String, RoomHandle>,
}

#[derive(Clone)]
pub struct RoomHandle {
    pub code: String,
    pub cmd_tx: mpsc::Sender<RoomCommand>,
    pub event_tx: broadcast::Sender<RoomEvent>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: dashmap::DashMap::new(),
        })
    }

    pub fn get(&self, code: &str) -> Option<RoomHandle> {
        self.rooms.get(code).map(|h| h.clone())
    }

    fn remove_room(&self, code: &str) {
        self.rooms.remove(code);
    }
}

const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..6)
        .map(|_| char::from(CODE_CHARS[rng.random_range(0..CODE_CHARS.len())]))
        .collect()
}

/// Millisecond timestamp with random low bits as a tie-break, unique
/// enough within one room's lifetime.
fn heart_id() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    (millis << 16) | u64::from(rand::rng().random_range(0..u16::MAX))
}

/// What a single simulator tick did to the room.
#[derive(Debug, Default, PartialEq)]
struct TickOutcome {
    /// Slots credited with a catch this tick, in the order they landed.
    caught_by: Vec<u8>,
    /// A catch pushed a score to the target in target mode. No further
    /// catches are recorded once this is set.
    target_reached: bool,
}

/// The internal state of a room, owned by its task.
struct RoomState {
    code: String,
    host_socket_id: String,
    players: PlayerMap,
    hearts: Vec<Heart>,
    mode: Option<GameMode>,
    active: bool,
    /// Terminal detection ran. The room only lingers for the grace
    /// period; no slot claim or restart is possible.
    finished: bool,
    last_activity: Instant,
    tuning: Tuning,
}

impl RoomState {
    fn broadcast(&self, tx: &broadcast::Sender<RoomEvent>, msg: ServerMsg) {
        let _ = tx.send(RoomEvent::Broadcast { msg });
    }

    fn send_to(&self, tx: &broadcast::Sender<RoomEvent>, socket_id: &str, msg: ServerMsg) {
        let _ = tx.send(RoomEvent::SendTo {
            socket_id: socket_id.to_string(),
            msg,
        });
    }

    fn spawn_heart(&mut self) {
        let mut rng = rand::rng();
        self.hearts.push(Heart {
            id: heart_id(),
            x: rng.random_range(0.0..self.tuning.field_width),
            y: 0.0,
            size: rng.random_range(20.0..30.0),
            speed: rng.random_range(2.0..5.0),
        });
    }

    /// Top of a player's catch band. The catch line is client-reported;
    /// a zero `y` falls back to viewport-derived geometry.
    fn catch_y(&self, player: &Player) -> f64 {
        if player.y > 0.0 {
            player.y
        } else if player.screen_height > 0.0 {
            player.screen_height - self.tuning.catch_line_offset
        } else {
            self.tuning.catch_line_fallback
        }
    }

    fn catches(&self, player: &Player, heart: &Heart) -> bool {
        let catch_y = self.catch_y(player);
        let center = heart.y + heart.size / 2.0;
        let band = self.tuning.basket_height + self.tuning.bar_thickness;
        let half = self.tuning.basket_width / 2.0;
        center >= catch_y
            && center <= catch_y + band
            && heart.x > player.x - half
            && heart.x < player.x + half
    }

    /// One simulation step: advance every heart, credit catches in
    /// ascending slot order (slot 1 wins overlaps), drop hearts past the
    /// bottom bound. Pure state transition; broadcasting is the caller's
    /// job. Once a catch reaches the target score the remaining hearts
    /// still advance but no further catches are recorded.
    fn step(&mut self) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        let hearts = std::mem::take(&mut self.hearts);
        let mut kept = Vec::with_capacity(hearts.len());

        for mut heart in hearts {
            heart.y += heart.speed;

            if !outcome.target_reached {
                let slot = self
                    .players
                    .iter()
                    .find(|(_, p)| self.catches(p, &heart))
                    .map(|(slot, _)| *slot);

                if let Some(slot) = slot {
                    if let Some(player) = self.players.get_mut(&slot) {
                        player.score += 1;
                        outcome.caught_by.push(slot);
                        if self.mode == Some(GameMode::Target)
                            && player.score >= self.tuning.target_score
                        {
                            outcome.target_reached = true;
                        }
                    }
                    continue;
                }
            }

            if heart.y < self.tuning.bottom_bound {
                kept.push(heart);
            }
        }

        self.hearts = kept;
        outcome
    }
}

/// Winner by strict maximum; any tie at the top (including 0-0) is a draw.
fn compute_winner(scores: &BTreeMap<u8, u32>) -> Option<u8> {
    let mut winner = None;
    let mut max = 0;
    for (slot, score) in scores {
        if *score > max {
            max = *score;
            winner = Some(*slot);
        } else if *score == max {
            winner = None;
        }
    }
    winner
}

/// Create a new room and spawn its task. Returns the room handle.
pub fn create_room(registry: Arc<Registry>, host_socket_id: String, tuning: Tuning) -> RoomHandle {
    // Regenerate on collision rather than overwriting a live room.
    let code = loop {
        let candidate = generate_room_code();
        if !registry.rooms.contains_key(&candidate) {
            break candidate;
        }
    };

    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let (event_tx, _) = broadcast::channel(256);

    let handle = RoomHandle {
        code: code.clone(),
        cmd_tx,
        event_tx: event_tx.clone(),
    };

    registry.rooms.insert(code.clone(), handle.clone());

    let state = RoomState {
        code: code.clone(),
        host_socket_id,
        players: PlayerMap::new(),
        hearts: Vec::new(),
        mode: None,
        active: false,
        finished: false,
        last_activity: Instant::now(),
        tuning,
    };

    tokio::spawn(room_task(state, cmd_rx, event_tx, registry));

    tracing::info!("Room created: {}", code);

    handle
}

async fn room_task(
    mut state: RoomState,
    mut cmd_rx: mpsc::Receiver<RoomCommand>,
    event_tx: broadcast::Sender<RoomEvent>,
    registry: Arc<Registry>,
) {
    // Hearts fall for the room's whole lifetime, caught or not; the
    // simulator only consumes them while the game is active.
    let mut spawn_interval = tokio::time::interval_at(
        Instant::now() + state.tuning.spawn_interval,
        state.tuning.spawn_interval,
    );
    spawn_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut sim_interval = tokio::time::interval(state.tuning.tick_interval);
    sim_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut idle_interval = tokio::time::interval(state.tuning.idle_sweep_interval);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                state.last_activity = Instant::now();
                match cmd {
                    RoomCommand::Join { socket_id } => {
                        handle_join(&mut state, &event_tx, socket_id);
                    }
                    RoomCommand::SetMode { socket_id, mode } => {
                        handle_set_mode(&mut state, &event_tx, socket_id, mode);
                    }
                    RoomCommand::ChoosePlayer { socket_id, slot, screen_height, basket_y } => {
                        handle_choose_player(&mut state, &event_tx, socket_id, slot, screen_height, basket_y);
                    }
                    RoomCommand::Move { socket_id, slot, x, y, screen_height } => {
                        handle_move(&mut state, &event_tx, socket_id, slot, x, y, screen_height);
                    }
                    RoomCommand::TimeUp => {
                        finish_game(&mut state, &event_tx, &registry);
                    }
                    RoomCommand::Disconnect { socket_id } => {
                        handle_disconnect(&mut state, &event_tx, socket_id);
                    }
                    RoomCommand::Destroy => break,
                }
            }
            _ = spawn_interval.tick() => {
                state.spawn_heart();
            }
            _ = sim_interval.tick() => {
                if state.active {
                    run_tick(&mut state, &event_tx, &registry);
                }
            }
            _ = idle_interval.tick() => {
                if !state.active
                    && state.players.is_empty()
                    && state.last_activity.elapsed() >= state.tuning.idle_timeout
                {
                    tracing::info!("Room {} idle, removing", state.code);
                    break;
                }
            }
        }
    }

    registry.remove_room(&state.code);
    tracing::info!("Room {} task ended", state.code);
}

fn run_tick(state: &mut RoomState, tx: &broadcast::Sender<RoomEvent>, registry: &Arc<Registry>) {
    let outcome = state.step();

    for _ in &outcome.caught_by {
        state.broadcast(
            tx,
            ServerMsg::PlayersUpdate {
                players: state.players.clone(),
            },
        );
    }

    state.broadcast(
        tx,
        ServerMsg::HeartsUpdate {
            hearts: state.hearts.clone(),
        },
    );

    if outcome.target_reached {
        finish_game(state, tx, registry);
    }
}

/// Freeze the room, announce the result and schedule teardown after a
/// grace period. Idempotent: only the first call on an active room does
/// anything, so a threshold crossing and a `timeUp` racing each other
/// produce one broadcast and one teardown.
fn finish_game(state: &mut RoomState, tx: &broadcast::Sender<RoomEvent>, registry: &Arc<Registry>) {
    if !state.active {
        return;
    }
    state.active = false;
    state.finished = true;

    let scores: BTreeMap<u8, u32> = state.players.iter().map(|(s, p)| (*s, p.score)).collect();
    let winner = compute_winner(&scores);

    state.broadcast(tx, ServerMsg::GameOver { winner, scores });
    tracing::info!("Game over in room {}, winner: {:?}", state.code, winner);

    // Let clients show the result before the room disappears.
    let cmd_tx = registry.get(&state.code).map(|h| h.cmd_tx);
    let grace = state.tuning.gameover_grace;
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        if let Some(tx) = cmd_tx {
            let _ = tx.send(RoomCommand::Destroy).await;
        }
    });
}

fn handle_join(state: &mut RoomState, tx: &broadcast::Sender<RoomEvent>, socket_id: String) {
    state.send_to(
        tx,
        &socket_id,
        ServerMsg::RoomJoined {
            room_id: state.code.clone(),
            game_mode: state.mode,
            has_game_mode: state.mode.is_some(),
            is_host: socket_id == state.host_socket_id,
        },
    );
    // Snapshot so a late joiner renders the current field right away.
    state.send_to(
        tx,
        &socket_id,
        ServerMsg::HeartsUpdate {
            hearts: state.hearts.clone(),
        },
    );
    state.send_to(
        tx,
        &socket_id,
        ServerMsg::PlayersUpdate {
            players: state.players.clone(),
        },
    );
    tracing::info!("Socket {} joined room {}", socket_id, state.code);
}

fn handle_set_mode(
    state: &mut RoomState,
    tx: &broadcast::Sender<RoomEvent>,
    socket_id: String,
    mode: GameMode,
) {
    // Only the host may set the mode, and only once.
    if socket_id != state.host_socket_id || state.mode.is_some() {
        return;
    }
    state.mode = Some(mode);
    state.broadcast(tx, ServerMsg::GameModeSet { mode });
    tracing::info!("Game mode set to {:?} in room {}", mode, state.code);

    if state.players.len() == 2 {
        start_game(state, tx);
    }
}

fn start_game(state: &mut RoomState, tx: &broadcast::Sender<RoomEvent>) {
    state.active = true;
    state.broadcast(tx, ServerMsg::GameStarted);
    tracing::info!("Game started in room {}", state.code);
}

fn handle_choose_player(
    state: &mut RoomState,
    tx: &broadcast::Sender<RoomEvent>,
    socket_id: String,
    slot: u8,
    screen_height: Option<f64>,
    basket_y: Option<f64>,
) {
    // A slot vacated during the grace period must not be reclaimable;
    // refilling it would restart a finished game.
    if state.finished || !(1..=2).contains(&slot) {
        return;
    }
    if state.players.contains_key(&slot) {
        state.send_to(tx, &socket_id, ServerMsg::PlayerTaken { player: slot });
        return;
    }

    let player = Player {
        id: socket_id.clone(),
        score: 0,
        x: state.tuning.slot_start_x[usize::from(slot - 1)],
        screen_height: screen_height.unwrap_or(state.tuning.default_screen_height),
        y: basket_y.unwrap_or(state.tuning.default_basket_y) - state.tuning.bar_thickness,
    };
    state.players.insert(slot, player);

    state.send_to(tx, &socket_id, ServerMsg::PlayerAssigned { player: slot });
    state.broadcast(
        tx,
        ServerMsg::PlayersUpdate {
            players: state.players.clone(),
        },
    );

    if state.players.len() == 2 {
        if state.mode.is_some() {
            start_game(state, tx);
        } else {
            state.broadcast(tx, ServerMsg::WaitingForGameMode);
            tracing::info!("Waiting for host to set game mode in room {}", state.code);
        }
    } else {
        state.send_to(tx, &socket_id, ServerMsg::WaitingForPlayer);
    }
}

fn handle_move(
    state: &mut RoomState,
    tx: &broadcast::Sender<RoomEvent>,
    socket_id: String,
    slot: u8,
    x: f64,
    y: Option<f64>,
    screen_height: Option<f64>,
) {
    let half = state.tuning.basket_width / 2.0;
    let max_x = state.tuning.field_width - half;
    let Some(player) = state.players.get_mut(&slot) else {
        return;
    };

    player.x = x.clamp(half, max_x);
    if let Some(y) = y {
        player.y = y;
    }
    if let Some(sh) = screen_height {
        player.screen_height = sh;
    }

    // The sender is the authority for its own position.
    let _ = tx.send(RoomEvent::BroadcastExcept {
        exclude: socket_id,
        msg: ServerMsg::PlayersUpdate {
            players: state.players.clone(),
        },
    });
}

fn handle_disconnect(state: &mut RoomState, tx: &broadcast::Sender<RoomEvent>, socket_id: String) {
    let before = state.players.len();
    state.players.retain(|_, p| p.id != socket_id);
    if state.players.len() != before {
        state.broadcast(
            tx,
            ServerMsg::PlayersUpdate {
                players: state.players.clone(),
            },
        );
    }
}
