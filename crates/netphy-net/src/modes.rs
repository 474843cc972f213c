//! The five game modes.
//!
//! Each mode is a plain struct built fresh by `enter`. [`Mode`] dispatches
//! the shared entry points (`update`, `input`, `leave`) by variant.

use crate::session::{ClientSession, ClientState, ServerSession, SessionError, SessionEvent};
use crate::state::{GameContext, ModeKind};
use netphy_core::{HexCoord, HexMap, Player, PlayerId, LAND_COLOR};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

pub(crate) enum Mode {
    Title(TitleMode),
    Editor(EditorMode),
    Play(PlayMode),
    Server(ServerMode),
    Client(ClientMode),
}

impl Mode {
    pub(crate) fn enter(kind: ModeKind, ctx: &mut GameContext) -> Result<Self, SessionError> {
        let mode = match kind {
            ModeKind::Title => Mode::Title(TitleMode::enter(ctx)),
            ModeKind::Editor => Mode::Editor(EditorMode::enter(ctx)),
            ModeKind::Play => Mode::Play(PlayMode::enter(ctx)),
            ModeKind::Server => Mode::Server(ServerMode::enter(ctx)?),
            ModeKind::Client => Mode::Client(ClientMode::enter(ctx)?),
        };
        Ok(mode)
    }

    pub(crate) fn kind(&self) -> ModeKind {
        match self {
            Mode::Title(_) => ModeKind::Title,
            Mode::Editor(_) => ModeKind::Editor,
            Mode::Play(_) => ModeKind::Play,
            Mode::Server(_) => ModeKind::Server,
            Mode::Client(_) => ModeKind::Client,
        }
    }

    pub(crate) fn update(&mut self, ctx: &mut GameContext) {
        match self {
            Mode::Server(mode) => mode.update(ctx),
            Mode::Client(mode) => mode.update(ctx),
            Mode::Title(_) | Mode::Editor(_) | Mode::Play(_) => {}
        }
    }

    pub(crate) fn input(&mut self, line: &str, ctx: &mut GameContext) {
        match self {
            Mode::Title(mode) => mode.input(line, ctx),
            Mode::Editor(mode) => mode.input(line, ctx),
            Mode::Play(mode) => mode.input(line, ctx),
            Mode::Server(mode) => mode.input(line, ctx),
            Mode::Client(mode) => mode.input(line, ctx),
        }
    }

    pub(crate) fn leave(self, ctx: &mut GameContext) {
        match self {
            Mode::Server(mode) => mode.leave(ctx),
            Mode::Client(mode) => mode.leave(ctx),
            Mode::Title(_) | Mode::Editor(_) | Mode::Play(_) => {}
        }
    }
}

/// Parse `x y` from the first two arguments
fn parse_pair<T: FromStr>(args: &[&str]) -> Option<(T, T)> {
    match args {
        [x, y, ..] => Some((x.parse().ok()?, y.parse().ok()?)),
        _ => None,
    }
}

fn player_name(ctx: &GameContext, id: PlayerId) -> String {
    ctx.game
        .player(id)
        .map(|p| p.name.clone())
        .unwrap_or_else(|| format!("player {id}"))
}

/// Apply a server-authoritative ownership change to the shared map
pub(crate) fn apply_ownership(map: &mut HexMap, coord: HexCoord, owner: Option<PlayerId>) -> bool {
    if let Err(e) = map.set_owner(coord, owner) {
        warn!("Ignoring ownership update: {}", e);
        return false;
    }
    let color = owner.map(Player::color_for).unwrap_or(LAND_COLOR);
    map.at_mut(coord).set_color(color);
    true
}

pub(crate) struct TitleMode;

impl TitleMode {
    pub(crate) fn enter(ctx: &mut GameContext) -> Self {
        ctx.console.push("netphy");
        ctx.console.push("Modes: editor, play, server, client (or /<mode> from anywhere)");
        TitleMode
    }

    fn input(&mut self, line: &str, ctx: &mut GameContext) {
        match line.parse::<ModeKind>() {
            Ok(kind) => {
                if let Err(e) = ctx.request_mode(kind) {
                    warn!("Mode request rejected: {}", e);
                }
            }
            Err(_) => ctx.console.push(format!("Unknown mode: {line}")),
        }
    }
}

pub(crate) struct EditorMode;

impl EditorMode {
    fn enter(ctx: &mut GameContext) -> Self {
        ctx.console.push(
            "Editor: land x y, sea x y, click wx wy, generate, connected x y, regions, save [path], load [path]",
        );
        EditorMode
    }

    fn input(&mut self, line: &str, ctx: &mut GameContext) {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return;
        };
        let args: Vec<&str> = words.collect();

        let reply = match command {
            "land" | "sea" => match parse_pair::<i32>(&args) {
                Some((x, y)) => {
                    let coord = HexCoord::new(x, y);
                    let result = if command == "land" {
                        ctx.map.paint_land(coord)
                    } else {
                        ctx.map.clear_land(coord)
                    };
                    match result {
                        Ok(()) => format!("{coord} is now {command}"),
                        Err(e) => e.to_string(),
                    }
                }
                None => format!("Usage: {command} x y"),
            },
            "click" => match parse_pair::<f64>(&args) {
                Some(point) => match ctx.grid.world_to_hex(point) {
                    Some(coord) => match ctx.map.paint_land(coord) {
                        Ok(()) => format!("{coord} is now land"),
                        Err(_) => format!("{coord} is outside the map"),
                    },
                    None => format!("({}, {}) is not on the grid", point.0, point.1),
                },
                None => "Usage: click wx wy".to_string(),
            },
            "generate" => match ctx.game.assign_random_owners(&mut ctx.map, &mut ctx.rng) {
                Ok(count) => format!("Assigned {count} cells to {} players", ctx.game.len()),
                Err(e) => e.to_string(),
            },
            "connected" => match parse_pair::<i32>(&args).map(|(x, y)| HexCoord::new(x, y)) {
                Some(coord) if ctx.map.is_valid(coord) => {
                    let cells = ctx.map.connected(coord);
                    ctx.map.darken(&cells);
                    format!("{} connected cells from {coord}", cells.len())
                }
                Some(coord) => format!("{coord} is outside the map"),
                None => "Usage: connected x y".to_string(),
            },
            "regions" => {
                let regions = ctx.map.regions();
                for region in &regions {
                    let owner = match region.owner {
                        Some(id) => player_name(ctx, id),
                        None => "nobody".to_string(),
                    };
                    ctx.console.push(format!("  {owner}: {} cells", region.len()));
                }
                format!("{} regions", regions.len())
            }
            "save" => match map_path(&args, ctx) {
                Some(path) => match save_map(&ctx.map, &path) {
                    Ok(()) => format!("Saved map to {}", path.display()),
                    Err(e) => format!("Could not save {}: {e}", path.display()),
                },
                None => "Usage: save path".to_string(),
            },
            "load" => match map_path(&args, ctx) {
                Some(path) => match load_map(&path) {
                    Ok(map) => {
                        ctx.map = map;
                        format!("Loaded map from {}", path.display())
                    }
                    Err(e) => format!("Could not load {}: {e}", path.display()),
                },
                None => "Usage: load path".to_string(),
            },
            other => format!("Unknown editor command: {other}"),
        };
        ctx.console.push(reply);
    }
}

fn map_path(args: &[&str], ctx: &GameContext) -> Option<PathBuf> {
    args.first()
        .map(PathBuf::from)
        .or_else(|| ctx.config.map_path.clone())
}

fn save_map(map: &HexMap, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::write(path, map.to_json()?)?;
    Ok(())
}

fn load_map(path: &Path) -> Result<HexMap, Box<dyn std::error::Error>> {
    let json = std::fs::read_to_string(path)?;
    Ok(HexMap::from_json(&json)?)
}

pub(crate) struct PlayMode;

impl PlayMode {
    fn enter(ctx: &mut GameContext) -> Self {
        ctx.console.push(format!(
            "Play: {} players, {} land cells",
            ctx.game.len(),
            ctx.map.land_count()
        ));
        PlayMode
    }

    fn input(&mut self, line: &str, ctx: &mut GameContext) {
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();

        match command {
            "select" => {
                let Some(point) = parse_pair::<f64>(&args) else {
                    ctx.console.push("Usage: select wx wy");
                    return;
                };
                let Some(coord) = ctx.grid.world_to_hex(point) else {
                    ctx.console
                        .push(format!("({}, {}) is not on the grid", point.0, point.1));
                    return;
                };
                let line = match ctx.map.get(coord) {
                    None => format!("{coord} is outside the map"),
                    Some(cell) if !cell.is_land() => format!("{coord}: sea"),
                    Some(cell) => match cell.owner() {
                        Some(id) => format!(
                            "{coord}: {}, region of {} cells",
                            player_name(ctx, id),
                            ctx.map.connected(coord).len()
                        ),
                        None => format!("{coord}: unclaimed land"),
                    },
                };
                ctx.console.push(line);
            }
            "territory" => {
                let territory = ctx.map.territory();
                let lines: Vec<String> = ctx
                    .game
                    .players()
                    .iter()
                    .map(|p| format!("{}: {} cells", p.name, territory.get(&p.id).copied().unwrap_or(0)))
                    .collect();
                for line in lines {
                    ctx.console.push(line);
                }
            }
            other => ctx.console.push(format!("Unknown play command: {other}")),
        }
    }
}

pub(crate) struct ServerMode {
    session: ServerSession,
}

impl ServerMode {
    fn enter(ctx: &mut GameContext) -> Result<Self, SessionError> {
        let mut session = ServerSession::new();
        let addr = session.start(ctx.network(), &ctx.config.listen_options())?;
        ctx.console.push(format!("Server listening on {addr}"));
        Ok(Self { session })
    }

    fn update(&mut self, ctx: &mut GameContext) {
        for event in self.session.update() {
            ctx.console.push(event.console_line());
        }
    }

    fn input(&mut self, line: &str, ctx: &mut GameContext) {
        let mut words = line.split_whitespace();
        let result = match words.next() {
            Some(".start") => self.session.broadcast_start_game(),
            Some(".claim") => {
                let args: Vec<&str> = words.collect();
                let parsed = parse_pair::<i32>(&args).zip(args.get(2).and_then(|s| s.parse::<PlayerId>().ok()));
                let Some(((x, y), id)) = parsed else {
                    ctx.console.push("Usage: .claim x y player");
                    return;
                };
                let coord = HexCoord::new(x, y);
                if let Err(e) = ctx.game.claim(&mut ctx.map, coord, id) {
                    ctx.console.push(e.to_string());
                    return;
                }
                ctx.console.push(format!("{coord} claimed by {}", player_name(ctx, id)));
                self.session.broadcast_ownership(coord, Some(id))
            }
            _ => {
                ctx.console.push(format!("SERVER: {line}"));
                self.session.broadcast_text(line)
            }
        };

        if let Err(e) = result {
            ctx.console.push(e.to_string());
        }
    }

    fn leave(mut self, ctx: &mut GameContext) {
        self.session.shutdown(ctx.config.shutdown_drain());
        ctx.console.push("Server stopped");
    }
}

pub(crate) struct ClientMode {
    session: ClientSession,
    /// Set once play has been requested during this activation
    started: bool,
}

impl ClientMode {
    fn enter(ctx: &mut GameContext) -> Result<Self, SessionError> {
        let mut session = ClientSession::new();
        let addr = ctx.config.server_addr;
        session.connect(ctx.network(), addr, &ctx.config.password)?;
        ctx.console.push(format!("Connecting to {addr}"));
        Ok(Self {
            session,
            started: false,
        })
    }

    fn update(&mut self, ctx: &mut GameContext) {
        for event in self.session.update() {
            ctx.console.push(event.console_line());
            match event {
                SessionEvent::StartGame { .. } if !self.started => {
                    self.started = true;
                    info!("Server started the game");
                    self.request(ctx, ModeKind::Play);
                }
                SessionEvent::StartGame { .. } => {
                    info!("Ignoring repeated start of game");
                }
                SessionEvent::Ownership { coord, owner } => {
                    apply_ownership(&mut ctx.map, coord, owner);
                }
                _ => {}
            }
        }

        if self.session.state() == ClientState::Idle && !self.started {
            if let Some(error) = self.session.last_error() {
                ctx.console.push(error.to_string());
            }
            self.request(ctx, ModeKind::Title);
        }
    }

    fn request(&self, ctx: &mut GameContext, kind: ModeKind) {
        if let Err(e) = ctx.request_mode(kind) {
            warn!("Mode request rejected: {}", e);
        }
    }

    fn input(&mut self, line: &str, ctx: &mut GameContext) {
        if let Err(e) = self.session.send_text(line) {
            ctx.console.push(e.to_string());
        }
    }

    fn leave(mut self, ctx: &mut GameContext) {
        self.session.disconnect(ctx.config.shutdown_drain());
    }
}
