//! Nim: take one to three stones, whoever takes the last stone wins.

use std::sync::Arc;

use huddle_core::{
    async_trait, Control, Game, GameSettings, Notice, ProcessChannel, Roster, Session, SessionError, Signal,
    Turn, TurnRules, View,
};
use serde_json::json;
use tracing::{info, warn};

pub const REMATCH: &str = "rematch";
const MAX_TAKE: u32 = 3;

pub struct Nim {
    stones: u32,
    start: u32,
    ledger: Option<Arc<ProcessChannel>>,
    result: Option<(String, String)>,
}

impl Nim {
    pub fn new(stones: u32, ledger: Option<Arc<ProcessChannel>>) -> Self {
        Self {
            stones,
            start: stones,
            ledger,
            result: None,
        }
    }

    /// Record the result with the ledger and offer a rematch.
    async fn wrap_up(&mut self, session: &Session<()>) -> Result<(), SessionError> {
        let Some((winner, loser)) = self.result.take() else {
            return Ok(());
        };

        let tally = match &self.ledger {
            Some(ledger) => match ledger.call::<u64>("record", vec![json!(winner), json!(loser)]).await {
                Ok(wins) => format!("{winner} has now won {wins} game(s)."),
                Err(e) => {
                    warn!(error = %e, "ledger unavailable");
                    String::from("The ledger could not be updated.")
                }
            },
            None => String::new(),
        };

        let token = session.issue_component(REMATCH, json!({ "stones": self.start }), None);
        let offer = format!("{tally} Type `<player> {token}` for a rematch.");
        session
            .surface()
            .notify(Notice::public(offer.trim_start()))
            .await?;
        Ok(())
    }
}

fn current_name(roster: &Roster<()>) -> String {
    roster.current().map(|p| p.name.clone()).unwrap_or_default()
}

impl TurnRules<()> for Nim {
    type Move = u32;

    fn view(&self, roster: &Roster<()>) -> View {
        let mut view = View::new("Nim")
            .body(format!("{}\n{} stones left", "| ".repeat(self.stones as usize), self.stones))
            .footer(format!("{} to move", current_name(roster)));
        for n in 1..=MAX_TAKE {
            view = view.control(Control::new(format!("take:{n}"), format!("Take {n}")).disabled(n > self.stones));
        }
        view
    }

    fn read_move(&self, signal: &Signal, _roster: &Roster<()>) -> Option<u32> {
        let n: u32 = signal.custom_id()?.strip_prefix("take:")?.parse().ok()?;
        (1..=MAX_TAKE.min(self.stones)).contains(&n).then_some(n)
    }

    /// Leave a multiple of four whenever possible.
    fn automated_move(&mut self, _roster: &Roster<()>) -> u32 {
        match self.stones % (MAX_TAKE + 1) {
            0 => 1,
            n => n,
        }
    }

    fn apply(&mut self, mv: u32, roster: &mut Roster<()>) -> Turn {
        self.stones -= mv;
        if self.stones > 0 {
            return Turn::Continue;
        }

        let winner = current_name(roster);
        let loser = roster.other().map(|p| p.name.clone()).unwrap_or_default();
        info!(%winner, %loser, "nim finished");
        let view = View::new("Nim").body(format!("{winner} took the last stone and wins!"));
        self.result = Some((winner, loser));
        Turn::Finish(view)
    }
}

#[async_trait]
impl Game for Nim {
    type Data = ();

    fn settings(&self) -> GameSettings {
        GameSettings::new("Nim").participants(2, 2)
    }

    async fn main(&mut self, session: &mut Session<()>) -> Result<(), SessionError> {
        let rules: &Nim = self;
        session.initialize(vec![], |roster| rules.view(roster)).await?;

        match session.play(self).await {
            Err(SessionError::Complete) => self.wrap_up(session).await,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::{Actor, Participant};

    fn table() -> Roster<()> {
        let mut roster = Roster::new();
        roster.add(Participant::new(&Actor::new("1", "alice")));
        roster.add(Participant::new(&Actor::automated("house", "House")));
        roster
    }

    #[test]
    fn test_house_leaves_multiple_of_four() {
        let roster = table();
        for stones in [5, 6, 7, 9, 10, 11] {
            let mut nim = Nim::new(stones, None);
            let take = nim.automated_move(&roster);
            assert_eq!((stones - take) % 4, 0, "from {stones}");
        }
        assert_eq!(Nim::new(8, None).automated_move(&roster), 1);
    }

    #[test]
    fn test_moves_are_bounded_by_pile() {
        let roster = table();
        let nim = Nim::new(2, None);
        let alice = Actor::new("1", "alice");

        assert_eq!(nim.read_move(&Signal::component(alice.clone(), "take:2"), &roster), Some(2));
        assert_eq!(nim.read_move(&Signal::component(alice.clone(), "take:3"), &roster), None);
        assert_eq!(nim.read_move(&Signal::component(alice.clone(), "take:0"), &roster), None);
        assert_eq!(nim.read_move(&Signal::message(alice, "take:1"), &roster), None);
    }

    #[test]
    fn test_last_stone_wins() {
        let mut roster = table();
        let mut nim = Nim::new(3, None);

        assert_eq!(nim.apply(2, &mut roster), Turn::Continue);
        roster.next();
        assert!(matches!(nim.apply(1, &mut roster), Turn::Finish(_)));
        assert_eq!(nim.result, Some(("House".into(), "alice".into())));
    }
}
