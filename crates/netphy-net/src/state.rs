//! Mode coordinator.
//!
//! Exactly one mode is active at a time. Modes share a [`GameContext`]
//! holding the map, players, console and network factory. A mode asks for
//! a switch through [`GameContext::request_mode`]; the manager performs it
//! after the mode's update returns.

use crate::config::Config;
use crate::modes::{Mode, TitleMode};
use crate::session::SessionError;
use crate::transport::Network;
use netphy_core::{HexGrid, HexMap, MapError, RosterError, WarGame};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("a mode transition is already in progress")]
    TransitionInProgress,

    #[error("unknown mode {0:?}")]
    UnknownMode(String),

    #[error("could not enter {mode} mode: {source}")]
    EnterFailed {
        mode: ModeKind,
        #[source]
        source: SessionError,
    },

    #[error(transparent)]
    Roster(#[from] RosterError),

    #[error(transparent)]
    Map(#[from] MapError),

    #[error("failed to read map file {path}: {source}")]
    MapFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeKind {
    Title,
    Editor,
    Play,
    Server,
    Client,
}

impl ModeKind {
    pub const ALL: [ModeKind; 5] = [
        ModeKind::Title,
        ModeKind::Editor,
        ModeKind::Play,
        ModeKind::Server,
        ModeKind::Client,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ModeKind::Title => "title",
            ModeKind::Editor => "editor",
            ModeKind::Play => "play",
            ModeKind::Server => "server",
            ModeKind::Client => "client",
        }
    }
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModeKind {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        ModeKind::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| StateError::UnknownMode(s.to_string()))
    }
}

/// Bounded buffer of user-facing lines
#[derive(Debug, Clone)]
pub struct Console {
    lines: VecDeque<String>,
    capacity: usize,
    unread: usize,
}

impl Console {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
            unread: 0,
        }
    }

    /// Append a line, evicting the oldest when full
    pub fn push(&mut self, line: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
        self.unread = (self.unread + 1).min(self.lines.len());
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines pushed since the last call, oldest first
    pub fn take_unread(&mut self) -> Vec<String> {
        let start = self.lines.len() - self.unread;
        self.unread = 0;
        self.lines.iter().skip(start).cloned().collect()
    }
}

/// State shared by every mode
pub struct GameContext {
    pub config: Config,
    pub map: HexMap,
    pub grid: HexGrid,
    pub game: WarGame,
    pub console: Console,
    pub rng: StdRng,
    network: Box<dyn Network>,
    requested: Option<ModeKind>,
    transitioning: bool,
}

impl GameContext {
    /// Build the context from configuration.
    ///
    /// Loads the configured map file when it exists; otherwise starts from
    /// an all-sea map of the configured size.
    pub fn new(config: Config, network: Box<dyn Network>) -> Result<Self, StateError> {
        let game = WarGame::with_players(config.players.as_slice())?;
        let map = match &config.map_path {
            Some(path) if path.exists() => {
                let json = std::fs::read_to_string(path).map_err(|source| StateError::MapFile {
                    path: path.clone(),
                    source,
                })?;
                HexMap::from_json(&json)?
            }
            _ => HexMap::new(config.map_width, config.map_height),
        };
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            grid: HexGrid::new(config.x_spacing, config.y_spacing),
            console: Console::new(config.console_lines),
            map,
            game,
            rng,
            network,
            requested: None,
            transitioning: false,
            config,
        })
    }

    pub fn network(&self) -> &dyn Network {
        self.network.as_ref()
    }

    /// Ask for a switch once the current update finishes.
    ///
    /// Rejected while a transition is running.
    pub fn request_mode(&mut self, kind: ModeKind) -> Result<(), StateError> {
        if self.transitioning {
            return Err(StateError::TransitionInProgress);
        }
        self.requested = Some(kind);
        Ok(())
    }

    pub fn requested_mode(&self) -> Option<ModeKind> {
        self.requested
    }
}

/// Owns the context and the single active mode
pub struct StateManager {
    ctx: GameContext,
    active: Option<Mode>,
    activations: Vec<ModeKind>,
}

impl StateManager {
    pub fn new(ctx: GameContext) -> Self {
        Self {
            ctx,
            active: None,
            activations: Vec::new(),
        }
    }

    pub fn context(&self) -> &GameContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut GameContext {
        &mut self.ctx
    }

    pub fn active(&self) -> Option<ModeKind> {
        self.active.as_ref().map(Mode::kind)
    }

    /// Every mode entered so far, in order
    pub fn activations(&self) -> &[ModeKind] {
        &self.activations
    }

    /// Leave the current mode and enter `kind` with fresh state.
    ///
    /// If entry fails the manager falls back to the title mode and the
    /// failure is returned.
    pub fn set_active(&mut self, kind: ModeKind) -> Result<(), StateError> {
        if self.ctx.transitioning {
            return Err(StateError::TransitionInProgress);
        }
        self.ctx.transitioning = true;
        let result = self.transition(kind);
        self.ctx.transitioning = false;
        result
    }

    fn transition(&mut self, kind: ModeKind) -> Result<(), StateError> {
        if let Some(mode) = self.active.take() {
            info!("Leaving {} mode", mode.kind());
            mode.leave(&mut self.ctx);
        }
        self.ctx.requested = None;

        match Mode::enter(kind, &mut self.ctx) {
            Ok(mode) => {
                info!("Entered {} mode", kind);
                self.active = Some(mode);
                self.activations.push(kind);
                Ok(())
            }
            Err(source) => {
                error!("Could not enter {} mode: {}", kind, source);
                self.ctx.console.push(format!("Could not enter {kind} mode: {source}"));
                self.active = Some(Mode::Title(TitleMode::enter(&mut self.ctx)));
                self.activations.push(ModeKind::Title);
                Err(StateError::EnterFailed { mode: kind, source })
            }
        }
    }

    /// Run one tick of the active mode, then any switch it requested
    pub fn update(&mut self) -> Result<(), StateError> {
        if let Some(mode) = self.active.as_mut() {
            mode.update(&mut self.ctx);
        }
        self.apply_request()
    }

    /// Handle one line of console input.
    ///
    /// `/<mode>` switches mode from anywhere; anything else goes to the
    /// active mode.
    pub fn console_input(&mut self, line: &str) -> Result<(), StateError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        if let Some(command) = line.strip_prefix('/') {
            return match command.parse::<ModeKind>() {
                Ok(kind) => self.set_active(kind),
                Err(e) => {
                    self.ctx.console.push(format!("Unknown command: {line}"));
                    Err(e)
                }
            };
        }

        match self.active.as_mut() {
            Some(mode) => mode.input(line, &mut self.ctx),
            None => warn!("No active mode for input"),
        }
        self.apply_request()
    }

    fn apply_request(&mut self) -> Result<(), StateError> {
        match self.ctx.requested.take() {
            Some(kind) => self.set_active(kind),
            None => Ok(()),
        }
    }

    /// Leave the active mode, releasing its resources
    pub fn shutdown(&mut self) {
        if let Some(mode) = self.active.take() {
            info!("Leaving {} mode", mode.kind());
            mode.leave(&mut self.ctx);
        }
    }
}

impl Drop for StateManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryNetwork;

    fn manager() -> StateManager {
        let config = Config {
            map_width: 8,
            map_height: 6,
            seed: Some(5),
            ..Config::default()
        };
        let ctx = GameContext::new(config, Box::new(MemoryNetwork::new())).unwrap();
        StateManager::new(ctx)
    }

    #[test]
    fn test_mode_names_parse() {
        for kind in ModeKind::ALL {
            assert_eq!(kind.name().parse::<ModeKind>().unwrap(), kind);
        }
        assert_eq!(" Editor ".parse::<ModeKind>().unwrap(), ModeKind::Editor);
        assert!(matches!("lobby".parse::<ModeKind>(), Err(StateError::UnknownMode(_))));
    }

    #[test]
    fn test_console_is_bounded() {
        let mut console = Console::new(3);
        for i in 0..5 {
            console.push(format!("line {i}"));
        }
        assert_eq!(console.len(), 3);
        assert_eq!(console.take_unread(), vec!["line 2", "line 3", "line 4"]);
        assert!(console.take_unread().is_empty());
        console.push("line 5");
        assert_eq!(console.take_unread(), vec!["line 5"]);
        assert_eq!(console.lines().next(), Some("line 3"));
    }

    #[test]
    fn test_zero_capacity_console() {
        let mut console = Console::new(0);
        console.push("dropped");
        assert!(console.is_empty());
        assert!(console.take_unread().is_empty());
    }

    #[test]
    fn test_switching_modes() {
        let mut manager = manager();
        assert_eq!(manager.active(), None);
        manager.set_active(ModeKind::Title).unwrap();
        manager.console_input("/editor").unwrap();
        manager.console_input("/play").unwrap();
        assert_eq!(manager.active(), Some(ModeKind::Play));
        assert_eq!(
            manager.activations(),
            &[ModeKind::Title, ModeKind::Editor, ModeKind::Play]
        );
    }

    #[test]
    fn test_title_accepts_bare_mode_names() {
        let mut manager = manager();
        manager.set_active(ModeKind::Title).unwrap();
        manager.console_input("editor").unwrap();
        assert_eq!(manager.active(), Some(ModeKind::Editor));
    }

    #[test]
    fn test_unknown_slash_command() {
        let mut manager = manager();
        manager.set_active(ModeKind::Title).unwrap();
        assert!(manager.console_input("/lobby").is_err());
        assert_eq!(manager.active(), Some(ModeKind::Title));
        let unread = manager.context_mut().console.take_unread();
        assert_eq!(unread.last().map(String::as_str), Some("Unknown command: /lobby"));
    }

    #[test]
    fn test_requests_rejected_during_transition() {
        let mut manager = manager();
        manager.context_mut().transitioning = true;
        assert!(matches!(
            manager.context_mut().request_mode(ModeKind::Play),
            Err(StateError::TransitionInProgress)
        ));
        assert!(matches!(
            manager.set_active(ModeKind::Play),
            Err(StateError::TransitionInProgress)
        ));
        manager.context_mut().transitioning = false;
        manager.set_active(ModeKind::Play).unwrap();
    }

    #[test]
    fn test_points_off_the_grid_are_reported() {
        let mut manager = manager();
        manager.set_active(ModeKind::Play).unwrap();
        manager.context_mut().console.take_unread();
        manager.console_input("select inf 0").unwrap();
        assert_eq!(
            manager.context_mut().console.take_unread(),
            vec!["(inf, 0) is not on the grid"]
        );

        manager.set_active(ModeKind::Editor).unwrap();
        manager.context_mut().console.take_unread();
        manager.console_input("click 1e12 0").unwrap();
        assert_eq!(
            manager.context_mut().console.take_unread(),
            vec!["(1000000000000, 0) is not on the grid"]
        );
        assert_eq!(manager.context().map.land_count(), 0);
        assert_eq!(manager.active(), Some(ModeKind::Editor));
    }

    #[test]
    fn test_reentering_editor_starts_clean() {
        let mut manager = manager();
        manager.set_active(ModeKind::Editor).unwrap();
        manager.set_active(ModeKind::Editor).unwrap();
        assert_eq!(manager.activations(), &[ModeKind::Editor, ModeKind::Editor]);
    }

    #[test]
    fn test_client_without_server_falls_back_to_title() {
        let mut manager = manager();
        manager.set_active(ModeKind::Client).unwrap();
        manager.update().unwrap();
        assert_eq!(manager.active(), Some(ModeKind::Title));
        assert_eq!(manager.activations(), &[ModeKind::Client, ModeKind::Title]);
    }
}
