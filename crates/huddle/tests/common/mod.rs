//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::time::Duration;

use huddle_core::{
    async_trait, Actor, Config, Control, Game, GameSettings, Roster, Session, SessionError, Signal, Turn,
    TurnInput, TurnRules, View,
};

pub fn alice() -> Actor {
    Actor::new("1", "alice")
}

pub fn bob() -> Actor {
    Actor::new("2", "bob")
}

pub fn carol() -> Actor {
    Actor::new("3", "carol")
}

pub fn dave() -> Actor {
    Actor::new("4", "dave")
}

pub fn house() -> Actor {
    Actor::automated("house", "House")
}

pub fn config() -> Config {
    Config {
        lobby_timeout: Duration::from_secs(60),
        lobby_refresh: Duration::from_secs(1),
        turn_timeout: Duration::from_secs(10),
        ack_deadline: Duration::from_secs(1),
        ..Config::default()
    }
}

/// Take one or two stones per turn; whoever takes the last one wins.
pub struct Countdown {
    pub stones: u32,
    pub settings: GameSettings,
    pub declared: Vec<Actor>,
    pub input: TurnInput,
}

impl Countdown {
    pub fn new(stones: u32, min: usize, max: usize) -> Self {
        Self {
            stones,
            settings: GameSettings::new("Countdown").participants(min, max),
            declared: Vec::new(),
            input: TurnInput::Components,
        }
    }

    pub fn declare(mut self, actor: Actor) -> Self {
        self.declared.push(actor);
        self
    }

    /// Read moves from typed numbers instead of button presses.
    pub fn by_message(mut self) -> Self {
        self.input = TurnInput::Messages;
        self
    }

    pub fn allow_automated(mut self, allow: bool) -> Self {
        self.settings = self.settings.allow_automated(allow);
        self
    }
}

fn current_name(roster: &Roster<()>) -> String {
    roster.current().map(|p| p.name.clone()).unwrap_or_default()
}

impl TurnRules<()> for Countdown {
    type Move = u32;

    fn view(&self, roster: &Roster<()>) -> View {
        View::new("Countdown")
            .body(format!("{} stones left", self.stones))
            .footer(format!("{} to move", current_name(roster)))
            .control(Control::new("take:1", "Take 1"))
            .control(Control::new("take:2", "Take 2").disabled(self.stones < 2))
    }

    fn read_move(&self, signal: &Signal, _roster: &Roster<()>) -> Option<u32> {
        let raw = match signal.custom_id() {
            Some(id) => id.strip_prefix("take:")?,
            None => signal.content()?.trim(),
        };
        let n: u32 = raw.parse().ok()?;
        (1..=2).contains(&n).then_some(n).filter(|n| *n <= self.stones)
    }

    fn input(&self) -> TurnInput {
        self.input
    }

    fn automated_move(&mut self, _roster: &Roster<()>) -> u32 {
        1
    }

    fn apply(&mut self, mv: u32, roster: &mut Roster<()>) -> Turn {
        self.stones -= mv;
        if self.stones == 0 {
            Turn::Finish(View::new("Countdown").body(format!("{} wins", current_name(roster))))
        } else {
            Turn::Continue
        }
    }
}

#[async_trait]
impl Game for Countdown {
    type Data = ();

    fn settings(&self) -> GameSettings {
        self.settings.clone()
    }

    async fn main(&mut self, session: &mut Session<()>) -> Result<(), SessionError> {
        let declared = std::mem::take(&mut self.declared);
        let rules: &Countdown = self;
        session.initialize(declared, |roster| rules.view(roster)).await?;
        session.play(self).await
    }
}
