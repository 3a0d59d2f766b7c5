mod common;

use std::sync::Arc;
use std::time::Duration;

use huddle_core::{
    async_trait, Actor, ComponentCall, ComponentTicket, Control, Game, GameSettings, Host, Notice, Session,
    SessionError, SessionIndex, SessionOutcome, Signal, Source, View, GENERIC_FAILURE, START,
};
use huddle_testing::{Frame, RecordingAck, ScriptedSurface};
use serde_json::{json, Value};

use common::{alice, bob, carol, config, house, Countdown};

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_declared_participants_skip_lobby() {
    let host = Host::new(config());
    let surface = ScriptedSurface::new();

    let run = tokio::spawn({
        let host = host.clone();
        let surface = surface.clone();
        async move { host.start(&mut Countdown::new(3, 2, 2).declare(bob()), alice(), surface).await }
    });

    surface.wait_for_collectors(1).await;
    let frames = surface.frames();
    assert_eq!(frames.len(), 1);
    assert!(matches!(&frames[0], Frame::Sent { view, .. } if view.body == "3 stones left"));
    assert!(host.index().get(&alice().id).unwrap().message.is_some());

    surface.click(&alice(), "take:2");
    surface.wait_for_collectors(2).await;
    assert_eq!(surface.last_view().unwrap().footer.as_deref(), Some("bob to move"));
    surface.click(&bob(), "take:1");

    assert_eq!(run.await.unwrap().unwrap(), SessionOutcome::Completed);
    assert_eq!(surface.last_view().unwrap().body, "bob wins");
    assert!(host.index().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_second_session_conflicts_before_main() {
    let host = Host::new(config());
    let surface = ScriptedSurface::new();

    let run = tokio::spawn({
        let host = host.clone();
        let surface = surface.clone();
        async move { host.start(&mut Countdown::new(5, 2, 4), alice(), surface).await }
    });
    surface.wait_for_collectors(1).await;

    let err = host
        .start(&mut Countdown::new(1, 1, 1), alice(), surface.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Conflict { existing: None, .. }));
    assert_eq!(err.safe_message(), "You can not start more than one session at a time.");
    // The second game never rendered anything.
    assert_eq!(surface.frames().len(), 1);

    surface.click(&alice(), START);
    let outcome = run.await.unwrap().unwrap();
    assert!(matches!(outcome, SessionOutcome::Aborted(_)));
    assert!(host.index().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_only_sessions_sharing_an_index_conflict() {
    let surface = ScriptedSurface::new();
    let shared = SessionIndex::new();
    let standalone = |index: SessionIndex| {
        let game = Countdown::new(5, 2, 2).declare(bob());
        let session: Session<()> =
            Session::new(game.settings(), alice(), surface.clone(), index).with_config(config());
        (game, session)
    };

    let (mut game, session) = standalone(shared.clone());
    let first = tokio::spawn(async move { session.run(&mut game).await });
    surface.wait_for_collectors(1).await;

    let (mut game, session) = standalone(shared.clone());
    let err = session.run(&mut game).await.unwrap_err();
    assert!(matches!(err, SessionError::Conflict { .. }));

    let (mut game, session) = standalone(SessionIndex::new());
    let second = tokio::spawn(async move { session.run(&mut game).await });
    surface.wait_for_collectors(2).await;
    assert_eq!(shared.len(), 1);

    first.abort();
    second.abort();
}

#[tokio::test(start_paused = true)]
async fn test_conflict_points_at_running_message() {
    let host = Host::new(config());
    let surface = ScriptedSurface::new();

    let run = tokio::spawn({
        let host = host.clone();
        let surface = surface.clone();
        async move { host.start(&mut Countdown::new(5, 2, 2).declare(bob()), alice(), surface).await }
    });
    surface.wait_for_collectors(1).await;

    let err = host
        .start(&mut Countdown::new(1, 1, 1), alice(), surface.clone())
        .await
        .unwrap_err();
    match err {
        SessionError::Conflict { initiator, existing } => {
            assert_eq!(initiator, alice().id);
            assert_eq!(existing, surface.last_sent());
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    run.abort();
}

#[tokio::test]
async fn test_undeliverable_surface_is_user_error() {
    let host = Host::new(config());
    let surface = ScriptedSurface::undeliverable();

    let err = host
        .start(&mut Countdown::new(1, 1, 1), alice(), surface.clone())
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Games can not be played where their messages can't be delivered."
    );

    host.report(surface.as_ref(), &err).await;
    assert_eq!(
        surface.notices(),
        vec![Notice::private("Games can not be played where their messages can't be delivered.")]
    );
    assert!(surface.frames().is_empty());
    assert!(host.index().is_empty());
}

// =============================================================================
// Declared Participants
// =============================================================================

async fn declare_error(host: &Host, game: Countdown) -> String {
    let surface = ScriptedSurface::new();
    let err = host.start(&mut { game }, alice(), surface.clone()).await.unwrap_err();
    assert!(matches!(err, SessionError::User(_)));
    assert!(surface.frames().is_empty());
    err.to_string()
}

#[tokio::test]
async fn test_declared_participant_validation() {
    let host = Host::new(config()).with_automated(house());

    assert_eq!(
        declare_error(&host, Countdown::new(1, 2, 3).declare(bob()).declare(bob())).await,
        "bob has been specified more than once."
    );
    assert_eq!(
        declare_error(&host, Countdown::new(1, 2, 3).declare(alice())).await,
        "alice has been specified more than once."
    );
    assert_eq!(
        declare_error(&host, Countdown::new(1, 1, 2).declare(bob()).declare(carol())).await,
        "Countdown can be played by at most 2 participants."
    );
    assert_eq!(
        declare_error(&host, Countdown::new(1, 2, 2).declare(Actor::automated("x", "Robot"))).await,
        "Robot is automated and can't participate in the game."
    );
    assert_eq!(
        declare_error(&host, Countdown::new(1, 2, 2).declare(house()).allow_automated(false)).await,
        "House is automated and can't participate in the game."
    );
}

#[tokio::test(start_paused = true)]
async fn test_declared_house_plays_immediately() {
    let host = Host::new(config()).with_automated(house());
    let surface = ScriptedSurface::new();

    let run = tokio::spawn({
        let host = host.clone();
        let surface = surface.clone();
        async move { host.start(&mut Countdown::new(2, 2, 2).declare(house()), alice(), surface).await }
    });

    surface.wait_for_collectors(1).await;
    surface.click(&alice(), "take:1");

    assert_eq!(run.await.unwrap().unwrap(), SessionOutcome::Completed);
    assert_eq!(surface.last_view().unwrap().body, "House wins");
    assert_eq!(surface.collectors_opened(), 1);
}

// =============================================================================
// Turns
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_turn_ignores_other_participants_but_acknowledges_them() {
    let host = Host::new(config());
    let surface = ScriptedSurface::new();

    let run = tokio::spawn({
        let host = host.clone();
        let surface = surface.clone();
        async move { host.start(&mut Countdown::new(1, 2, 2).declare(bob()), alice(), surface).await }
    });

    surface.wait_for_collectors(1).await;
    let message = surface.last_sent().unwrap();
    let ack = RecordingAck::new();
    surface.push(
        Source::Components(message.clone()),
        Signal::component(bob(), "take:1").with_ack(ack.clone()),
    );
    surface.click(&alice(), "take:1");

    assert_eq!(run.await.unwrap().unwrap(), SessionOutcome::Completed);
    assert_eq!(surface.last_view().unwrap().body, "alice wins");
    assert_eq!(ack.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_move_keeps_waiting() {
    let host = Host::new(config());
    let surface = ScriptedSurface::new();

    let run = tokio::spawn({
        let host = host.clone();
        let surface = surface.clone();
        async move { host.start(&mut Countdown::new(1, 2, 2).declare(bob()), alice(), surface).await }
    });

    surface.wait_for_collectors(1).await;
    surface.click(&alice(), "take:2");

    surface.wait_for_collectors(2).await;
    surface.click(&alice(), "take:1");

    assert_eq!(run.await.unwrap().unwrap(), SessionOutcome::Completed);
    assert_eq!(surface.last_view().unwrap().body, "alice wins");
}

#[tokio::test(start_paused = true)]
async fn test_turn_timeout_aborts() {
    let host = Host::new(config());
    let surface = ScriptedSurface::new();

    let outcome = host
        .start(&mut Countdown::new(5, 2, 2).declare(bob()), alice(), surface.clone())
        .await
        .unwrap();

    assert_eq!(outcome, SessionOutcome::Aborted("alice did not play in time.".into()));
    let last = surface.last_view().unwrap();
    assert_eq!(last.body, "The game has been aborted.\nalice did not play in time.");
    assert!(last.controls.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_moves_from_messages() {
    let host = Host::new(config());
    let surface = ScriptedSurface::new();

    let run = tokio::spawn({
        let host = host.clone();
        let surface = surface.clone();
        async move {
            let mut game = Countdown::new(2, 2, 2).declare(bob()).by_message();
            host.start(&mut game, alice(), surface).await
        }
    });

    surface.wait_for_collectors(1).await;
    surface.say(&bob(), "2");
    surface.say(&alice(), "two");
    surface.wait_for_collectors(2).await;
    surface.say(&alice(), " 2 ");

    assert_eq!(run.await.unwrap().unwrap(), SessionOutcome::Completed);
    assert_eq!(surface.last_view().unwrap().body, "alice wins");
}

// =============================================================================
// Components
// =============================================================================

/// Ends immediately, leaving a "play again" control behind.
struct Offer;

#[async_trait]
impl Game for Offer {
    type Data = ();

    fn settings(&self) -> GameSettings {
        GameSettings::new("Offer").participants(1, 1)
    }

    async fn main(&mut self, session: &mut Session<()>) -> Result<(), SessionError> {
        session.initialize(vec![], |_| View::new("Offer")).await?;
        let token = session.issue_component("again", json!({ "round": 2 }), None);
        session
            .render(View::new("Offer").control(Control::new(token.as_str(), "Again")))
            .await?;
        session.finish(View::new("Offer").body("done")).await
    }
}

fn offered_token(surface: &ScriptedSurface) -> String {
    surface
        .frames()
        .iter()
        .find_map(|frame| frame.view().controls.first().map(|c| c.id.clone()))
        .unwrap()
}

#[tokio::test]
async fn test_component_outlives_its_session() {
    let host = Host::new(config());
    host.on_component("again", |call: ComponentCall| async move {
        assert!(call.origin.is_some());
        call.surface
            .notify(Notice::public(format!("{} wants round {}", call.signal.actor.name, call.payload["round"])))
            .await?;
        Ok::<(), SessionError>(())
    });
    let surface = ScriptedSurface::new();

    let outcome = host.start(&mut Offer, alice(), surface.clone()).await.unwrap();
    assert_eq!(outcome, SessionOutcome::Completed);
    assert!(host.index().is_empty());

    let token = offered_token(&surface);
    assert!(host.components().contains(token.as_str()));

    let press = Signal::component(bob(), token.clone());
    assert!(host.dispatch(press.clone(), surface.clone()).await);
    assert_eq!(surface.notices(), vec![Notice::public("bob wants round 2")]);

    // Consumed: the second press is not ours.
    assert!(!host.dispatch(press, surface.clone()).await);
    assert_eq!(surface.notices().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_component_expires() {
    let host = Host::new(config());
    let surface = ScriptedSurface::new();
    let token = host.components().issue(
        ComponentTicket {
            handler: "again".into(),
            payload: Value::Null,
            origin: None,
        },
        Duration::from_secs(1),
    );

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(!host.dispatch(Signal::component(alice(), token.as_str()), surface.clone()).await);
    assert!(host.components().is_empty());
}

#[tokio::test]
async fn test_dispatch_reports_handler_failures() {
    let host = Host::new(config());
    host.on_component("refuse", |_call| async { Err::<(), _>(SessionError::user("Not your game.")) });
    host.on_component("crash", |_call| async {
        Err::<(), _>(SessionError::Internal(anyhow::anyhow!("database unreachable")))
    });
    host.on_component("finish", |_call| async { Err::<(), _>(SessionError::Complete) });
    let surface = ScriptedSurface::new();

    let press = |handler: &str| {
        let token = host.components().issue_default(ComponentTicket {
            handler: handler.into(),
            payload: Value::Null,
            origin: None,
        });
        Signal::component(alice(), token.as_str())
    };

    assert!(host.dispatch(press("refuse"), surface.clone()).await);
    assert!(host.dispatch(press("crash"), surface.clone()).await);
    assert!(host.dispatch(press("finish"), surface.clone()).await);
    assert!(host.dispatch(press("unregistered"), surface.clone()).await);

    assert_eq!(
        surface.notices(),
        vec![
            Notice::private("Not your game."),
            Notice::private(GENERIC_FAILURE),
            Notice::private(GENERIC_FAILURE),
        ]
    );
}

#[tokio::test]
async fn test_unknown_press_is_not_ours() {
    let host = Host::new(config());
    let surface: Arc<ScriptedSurface> = ScriptedSurface::new();

    assert!(!host.dispatch(Signal::component(alice(), "take:1"), surface.clone()).await);
    assert!(!host.dispatch(Signal::message(alice(), "hello"), surface.clone()).await);
    assert!(surface.notices().is_empty());
}
