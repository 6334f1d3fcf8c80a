//! Session lifecycle tests.
//!
//! # Test Strategy
//!
//! Each test simulates what users do across several clients sharing one
//! [`SimServer`]:
//! 1. Create, enter and leave sessions through the store
//! 2. Let the server fan out membership, host and link events
//! 3. Settle every client
//! 4. Verify the session state each client would render
//!
//! Overlapping operations are made deterministic by holding a backend
//! operation at its gate while a second action runs.
//!
//! # Oracle Pattern
//!
//! Tests end with oracle checks that verify:
//! - No session-scoped state outlives its session
//! - Connecting notices resolve to "joined" or "left"
//! - Single-flight joins never overlap

use parley_app::{ActiveChannel, JoinOutcome, LogEntry};
use parley_core::{ChannelKind, LinkState, PushEvent, SessionInfo, Visibility};
use parley_harness::{
    Call, InvariantRegistry, LinkPolicy, Op, SimClient, SimEnv, SimServer, SystemSnapshot,
    settle_all,
};

fn setup() -> (SimServer, SimEnv) {
    let env = SimEnv::new();
    (SimServer::new(env.clone()), env)
}

fn assert_invariants(clients: &[&SimClient], context: &str) {
    let mut snapshot = SystemSnapshot::empty();
    for client in clients {
        snapshot.add_client(client.snapshot());
    }
    InvariantRegistry::standard().assert_all(&snapshot, context);
}

fn notices(client: &SimClient) -> Vec<String> {
    client.store.session_log().notices().map(str::to_string).collect()
}

fn joined(outcome: JoinOutcome) -> String {
    match outcome {
        JoinOutcome::Joined(id) => id,
        other => panic!("expected a joined session, got {other:?}"),
    }
}

/// Alice hosts a session, Bob enters it, both settled.
async fn hosted_pair(server: &SimServer, env: &SimEnv) -> (SimClient, SimClient, String) {
    let mut alice = SimClient::new(server, env.clone());
    let mut bob = SimClient::new(server, env.clone());
    alice.connect("alice").await;
    bob.connect("bob").await;

    let id = joined(alice.store.create_session(Visibility::Public, 4).await);
    assert_eq!(bob.store.enter_session(&id).await, JoinOutcome::Joined(id.clone()));
    settle_all(&mut [&mut alice, &mut bob]).await;
    (alice, bob, id)
}

#[tokio::test]
async fn create_commits_session_and_streams() {
    let (server, env) = setup();
    let mut alice = SimClient::new(&server, env);
    alice.connect("alice").await;

    let id = joined(alice.store.create_session(Visibility::Public, 99).await);
    alice.settle().await;

    let view = alice.store.view();
    let session = view.session.unwrap();
    assert_eq!(session.id, id);
    assert_eq!(session.name, id);
    assert_eq!(session.capacity, 16, "capacity is clamped before it is sent");
    assert!(session.existing_peers.is_empty());
    assert_eq!(view.host.as_deref(), Some("alice"));
    assert!(view.is_owner);
    assert_eq!(view.active_channel, ActiveChannel::Session);
    assert_eq!(view.members, vec!["alice".to_string()]);
    assert!(view.sessions.iter().any(|s| s.id == id));
    assert!(!view.join_in_flight);
    assert_eq!(alice.backend.subscription_count(), 8);
    assert!(
        alice.backend.calls().contains(&Call::CreateSession { public: true, capacity: 16 })
    );

    assert_invariants(&[&alice], "after create");
}

#[tokio::test]
async fn small_capacity_is_raised_to_minimum() {
    let (server, env) = setup();
    let mut alice = SimClient::new(&server, env);
    alice.connect("alice").await;

    alice.store.create_session(Visibility::Private, 0).await;

    assert_eq!(alice.store.current_session().map(|s| s.capacity), Some(2));
    assert!(alice.store.sessions().is_empty(), "private sessions are not listed");
}

#[tokio::test]
async fn enter_normalizes_code_and_resolves_notices() {
    let (server, env) = setup();
    let mut alice = SimClient::new(&server, env.clone());
    let mut bob = SimClient::new(&server, env);
    alice.connect("alice").await;
    bob.connect("bob").await;
    let id = joined(alice.store.create_session(Visibility::Public, 4).await);

    let outcome = bob.store.enter_session(&format!("  {}  ", id.to_lowercase())).await;
    settle_all(&mut [&mut alice, &mut bob]).await;

    assert_eq!(outcome, JoinOutcome::Joined(id.clone()));
    assert!(bob.backend.calls().contains(&Call::JoinSession(id.clone())));

    assert_eq!(notices(&bob), ["alice joined"]);
    assert_eq!(notices(&alice), ["bob joined"]);
    assert_eq!(bob.store.peer_links().get("alice"), Some(&LinkState::Open));
    assert_eq!(alice.store.peer_links().get("bob"), Some(&LinkState::Open));
    assert!(!bob.store.is_owner());
    assert_eq!(bob.store.host().as_deref(), Some("alice"));
    assert_eq!(bob.store.view().members, vec!["alice".to_string(), "bob".to_string()]);

    assert_invariants(&[&alice, &bob], "after enter");
}

#[tokio::test]
async fn concurrent_creates_are_single_flight() {
    let (server, env) = setup();
    let mut alice = SimClient::new(&server, env);
    alice.connect("alice").await;
    alice.backend.hold(Op::CreateSession);

    let store = alice.store.clone();
    let backend = alice.backend.clone();
    let (first, second) = tokio::join!(alice.store.create_session(Visibility::Public, 4), async {
        tokio::task::yield_now().await;
        assert!(store.view().join_in_flight);
        let outcome = store.create_session(Visibility::Public, 4).await;
        backend.release(Op::CreateSession);
        outcome
    });
    alice.settle().await;

    assert!(matches!(first, JoinOutcome::Joined(_)));
    assert_eq!(second, JoinOutcome::Skipped);
    let creates = alice
        .backend
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::CreateSession { .. }))
        .count();
    assert_eq!(creates, 1);
    assert!(!alice.store.view().join_in_flight);
    assert_invariants(&[&alice], "after overlapping creates");
}

#[tokio::test]
async fn enter_while_in_session_is_skipped() {
    let (server, env) = setup();
    let mut alice = SimClient::new(&server, env);
    alice.connect("alice").await;
    let id = joined(alice.store.create_session(Visibility::Public, 4).await);
    alice.backend.clear_calls();

    assert_eq!(alice.store.enter_session("ABCD1234").await, JoinOutcome::Skipped);
    assert_eq!(alice.store.create_session(Visibility::Public, 4).await, JoinOutcome::Skipped);

    assert!(alice.backend.calls().is_empty());
    assert_eq!(alice.store.current_session().map(|s| s.id), Some(id));
}

#[tokio::test]
async fn empty_code_fails_and_releases_the_join_flag() {
    let (server, env) = setup();
    let mut alice = SimClient::new(&server, env);
    alice.connect("alice").await;

    assert_eq!(alice.store.enter_session("   ").await, JoinOutcome::Failed);
    assert_eq!(alice.store.error().as_deref(), Some("session code cannot be empty"));
    assert!(!alice.store.view().join_in_flight);

    assert!(matches!(
        alice.store.create_session(Visibility::Public, 4).await,
        JoinOutcome::Joined(_)
    ));
}

#[tokio::test]
async fn unknown_session_surfaces_server_error() {
    let (server, env) = setup();
    let mut alice = SimClient::new(&server, env);
    alice.connect("alice").await;

    assert_eq!(alice.store.enter_session("nope1234").await, JoinOutcome::Failed);

    assert_eq!(alice.store.error().as_deref(), Some("Session 'NOPE1234' not found"));
    assert!(alice.store.current_session().is_none());
    assert_eq!(alice.backend.subscription_count(), 4);
    assert_invariants(&[&alice], "after failed enter");
}

#[tokio::test]
async fn full_session_rejects_entry() {
    let (server, env) = setup();
    let (_alice, _bob, id) = hosted_pair(&server, &env).await;
    server.add_phantom_member(&id, "dave").unwrap();
    let mut carol = SimClient::new(&server, env);
    carol.connect("carol").await;
    server.add_phantom_member(&id, "erin").unwrap();

    assert_eq!(carol.store.enter_session(&id).await, JoinOutcome::Failed);
    assert_eq!(carol.store.error().as_deref(), Some("Session is full"));
}

#[tokio::test]
async fn create_while_disconnected_fails() {
    let (server, env) = setup();
    let alice = SimClient::new(&server, env);

    assert_eq!(alice.store.create_session(Visibility::Public, 4).await, JoinOutcome::Failed);
    assert_eq!(alice.store.error().as_deref(), Some("Not connected"));
    assert!(alice.backend.calls().is_empty());
}

#[tokio::test]
async fn leave_clears_session_and_notifies_peers() {
    let (server, env) = setup();
    let (mut alice, mut bob, id) = hosted_pair(&server, &env).await;
    bob.backend.clear_calls();

    bob.store.leave_session().await;

    let calls = bob.backend.calls();
    assert_eq!(calls[0], Call::LeaveSession(id.clone()));
    assert!(calls.contains(&Call::TeardownPeerLinks));
    assert!(calls.contains(&Call::StopStream(ChannelKind::SessionChat)));
    assert!(calls[calls.len() - 4..].iter().all(|c| matches!(c, Call::Unsubscribe(_))));

    let view = bob.store.view();
    assert!(view.session.is_none());
    assert!(view.session_log.is_empty());
    assert_eq!(view.active_channel, ActiveChannel::Global);
    assert_eq!(bob.backend.subscription_count(), 4);

    settle_all(&mut [&mut alice, &mut bob]).await;
    assert_eq!(notices(&alice), ["bob joined", "bob left"]);
    assert!(!alice.store.peer_links().contains_key("bob"));
    assert_eq!(alice.store.view().members, vec!["alice".to_string()]);
    assert!(alice.backend.calls().contains(&Call::ClosePeerLink("bob".into())));

    assert_invariants(&[&alice, &bob], "after leave");
}

#[tokio::test]
async fn leave_without_session_does_nothing() {
    let (server, env) = setup();
    let mut alice = SimClient::new(&server, env);
    alice.connect("alice").await;
    alice.backend.clear_calls();

    alice.store.leave_session().await;

    assert!(alice.backend.calls().is_empty());
}

#[tokio::test]
async fn host_leaving_promotes_next_member() {
    let (server, env) = setup();
    let (mut alice, mut bob, id) = hosted_pair(&server, &env).await;

    alice.store.leave_session().await;
    settle_all(&mut [&mut alice, &mut bob]).await;

    assert!(bob.store.is_owner());
    assert_eq!(bob.store.host().as_deref(), Some("bob"));
    assert_eq!(notices(&bob), ["alice joined", "alice left", "You are now the host"]);
    assert_eq!(server.session(&id).map(|s| s.host), Some("bob".to_string()));
    assert_invariants(&[&alice, &bob], "after host migration");
}

#[tokio::test]
async fn remote_host_change_is_announced() {
    let (server, env) = setup();
    let (mut alice, mut bob, id) = hosted_pair(&server, &env).await;

    server.migrate_host(&id, "bob");
    settle_all(&mut [&mut alice, &mut bob]).await;

    assert!(!alice.store.is_owner());
    assert_eq!(notices(&alice).last().map(String::as_str), Some("bob is now the host"));
    assert!(bob.store.is_owner());
    assert_invariants(&[&alice, &bob], "after host change");
}

#[tokio::test]
async fn peer_leaving_while_connecting_rewrites_notice() {
    let (server, env) = setup();
    let mut alice = SimClient::new(&server, env);
    alice.connect("alice").await;
    let id = joined(alice.store.create_session(Visibility::Public, 4).await);

    server.add_phantom_member(&id, "carol").unwrap();
    alice.settle().await;
    assert_eq!(notices(&alice), ["carol is connecting…"]);
    assert!(alice.store.view().pending_connect.contains("carol"));

    server.remove_phantom_member(&id, "carol");
    alice.settle().await;

    assert_eq!(notices(&alice), ["carol left"]);
    let view = alice.store.view();
    assert!(view.pending_connect.is_empty());
    assert!(view.left_peers.contains("carol"));
    assert_invariants(&[&alice], "after phantom left");
}

#[tokio::test]
async fn existing_peers_resolve_independently() {
    let (server, env) = setup();
    server.set_link_policy(LinkPolicy::Manual);
    let mut alice = SimClient::new(&server, env.clone());
    let mut bob = SimClient::new(&server, env.clone());
    let mut carol = SimClient::new(&server, env);
    bob.connect("bob").await;
    carol.connect("carol").await;
    alice.connect("alice").await;
    let id = joined(bob.store.create_session(Visibility::Public, 4).await);
    assert_eq!(carol.store.enter_session(&id).await, JoinOutcome::Joined(id.clone()));
    settle_all(&mut [&mut bob, &mut carol]).await;

    assert_eq!(alice.store.enter_session(&id).await, JoinOutcome::Joined(id.clone()));
    assert_eq!(notices(&alice), ["bob is connecting…", "carol is connecting…"]);
    alice.settle().await;

    server.push_link_state("alice", "bob", LinkState::Open);
    carol.store.leave_session().await;
    settle_all(&mut [&mut alice, &mut bob, &mut carol]).await;

    assert_eq!(notices(&alice), ["bob joined", "carol left"]);
    let view = alice.store.view();
    assert_eq!(view.peer_links.len(), 1);
    assert_eq!(view.peer_links.get("bob"), Some(&LinkState::Open));
    assert!(view.pending_connect.is_empty());
    assert!(view.left_peers.contains("carol"));
    assert!(view.error.is_none());
    assert_invariants(&[&alice, &bob, &carol], "after mixed peer outcomes");
}

#[tokio::test]
async fn notices_carry_event_time() {
    let (server, env) = setup();
    let mut alice = SimClient::new(&server, env.clone());
    alice.connect("alice").await;
    let id = joined(alice.store.create_session(Visibility::Public, 4).await);

    env.advance(std::time::Duration::from_secs(30));
    server.add_phantom_member(&id, "carol").unwrap();
    alice.settle().await;

    let log = alice.store.session_log();
    let entry = log.entries().last().unwrap();
    assert!(entry.is_system());
    assert_eq!(entry.timestamp(), SimEnv::EPOCH_SECS as i64 + 30);
}

#[tokio::test]
async fn losing_the_only_peer_leaves_the_session() {
    let (server, env) = setup();
    server.set_link_policy(LinkPolicy::Manual);
    let (mut alice, mut bob, _id) = hosted_pair(&server, &env).await;
    assert_eq!(notices(&bob), ["alice is connecting…"]);

    server.push_link_state("bob", "alice", LinkState::Failed);
    settle_all(&mut [&mut alice, &mut bob]).await;

    assert!(bob.store.current_session().is_none());
    assert_eq!(bob.store.error().as_deref(), Some("Could not connect to alice. Leaving session."));
    assert_eq!(notices(&alice), ["bob left"]);
    assert_invariants(&[&alice, &bob], "after isolation");
}

#[tokio::test]
async fn failure_with_another_open_peer_is_reported_once() {
    let (server, env) = setup();
    server.set_link_policy(LinkPolicy::Manual);
    let (mut alice, mut bob, id) = hosted_pair(&server, &env).await;
    let mut carol = SimClient::new(&server, env.clone());
    carol.connect("carol").await;
    carol.store.enter_session(&id).await;
    settle_all(&mut [&mut alice, &mut bob, &mut carol]).await;

    server.push_link_state("carol", "bob", LinkState::Open);
    server.push_link_state("carol", "alice", LinkState::Failed);
    carol.settle().await;

    assert!(carol.store.current_session().is_some());
    assert_eq!(carol.store.error().as_deref(), Some("Could not connect to alice."));
    assert_eq!(notices(&carol), ["alice is connecting…", "bob joined"]);

    env.advance(std::time::Duration::from_secs(5));
    assert!(carol.store.error().is_none());
    server.push_link_state("carol", "alice", LinkState::Failed);
    carol.settle().await;
    assert!(carol.store.error().is_none(), "a failure is reported once per peer");

    assert_invariants(&[&alice, &bob, &carol], "after partial failure");
}

#[tokio::test]
async fn host_never_leaves_on_failure() {
    let (server, env) = setup();
    server.set_link_policy(LinkPolicy::Manual);
    let (mut alice, _bob, _id) = hosted_pair(&server, &env).await;

    server.push_link_state("alice", "bob", LinkState::Failed);
    alice.settle().await;

    assert!(alice.store.current_session().is_some());
    assert_eq!(alice.store.error().as_deref(), Some("Could not connect to bob."));
    assert_eq!(alice.store.peer_links().get("bob"), Some(&LinkState::Failed));
}

#[tokio::test]
async fn failure_of_departed_peer_is_ignored() {
    let (server, env) = setup();
    server.set_link_policy(LinkPolicy::Manual);
    let (mut alice, mut bob, _id) = hosted_pair(&server, &env).await;

    bob.store.leave_session().await;
    settle_all(&mut [&mut alice, &mut bob]).await;
    server.push_link_state("alice", "bob", LinkState::Failed);
    alice.settle().await;

    assert!(alice.store.error().is_none());
    assert!(!alice.store.peer_links().contains_key("bob"));
}

#[tokio::test]
async fn rejoining_peer_is_tracked_again() {
    let (server, env) = setup();
    let (mut alice, mut bob, id) = hosted_pair(&server, &env).await;

    bob.store.leave_session().await;
    settle_all(&mut [&mut alice, &mut bob]).await;
    bob.store.enter_session(&id).await;
    settle_all(&mut [&mut alice, &mut bob]).await;

    assert_eq!(notices(&alice), ["bob joined", "bob left", "bob joined"]);
    assert_eq!(alice.store.peer_links().get("bob"), Some(&LinkState::Open));
    assert!(!alice.store.view().left_peers.contains("bob"));
}

#[tokio::test]
async fn session_chat_reaches_members() {
    let (server, env) = setup();
    let (mut alice, mut bob, _id) = hosted_pair(&server, &env).await;

    bob.store.send_message("  hi all ").await;
    bob.store.send_message("   ").await;
    settle_all(&mut [&mut alice, &mut bob]).await;

    for client in [&alice, &bob] {
        let log = client.store.session_log();
        let chat: Vec<_> = log
            .entries()
            .iter()
            .filter_map(|e| match e {
                LogEntry::Chat(message) => Some((message.author.as_str(), message.text.as_str())),
                LogEntry::Notice { .. } => None,
            })
            .collect();
        assert_eq!(chat, [("bob", "hi all")]);
        assert!(client.store.global_log().is_empty());
    }
    let sent = bob
        .backend
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::SendSessionMessage(_)))
        .count();
    assert_eq!(sent, 1);
}

#[tokio::test]
async fn active_channel_routes_chat() {
    let (server, env) = setup();
    let (mut alice, mut bob, _id) = hosted_pair(&server, &env).await;

    bob.store.set_active_channel(ActiveChannel::Global);
    bob.store.send_message("lobby").await;
    settle_all(&mut [&mut alice, &mut bob]).await;

    assert_eq!(alice.store.global_log().entries().last().map(LogEntry::text), Some("lobby"));
    assert!(bob.backend.calls().contains(&Call::SendGlobalMessage("lobby".into())));

    bob.store.leave_session().await;
    bob.store.set_active_channel(ActiveChannel::Session);
    assert_eq!(bob.store.active_channel(), ActiveChannel::Global);
}

#[tokio::test]
async fn listed_count_mismatch_refetches_members() {
    let (server, env) = setup();
    let mut alice = SimClient::new(&server, env);
    alice.connect("alice").await;
    let id = joined(alice.store.create_session(Visibility::Public, 4).await);
    alice.settle().await;
    alice.backend.clear_calls();

    let listed = SessionInfo {
        id: id.clone(),
        name: id.clone(),
        member_count: 3,
        visibility: Visibility::Public,
        capacity: 4,
    };
    assert_eq!(alice.backend.push(PushEvent::SessionList(vec![listed])), 1);
    alice.settle().await;

    assert_eq!(alice.backend.calls(), [Call::GetMembers(id)]);
}

#[tokio::test]
async fn session_list_during_leave_sees_no_session() {
    let (server, env) = setup();
    let (mut alice, mut bob, id) = hosted_pair(&server, &env).await;
    bob.backend.clear_calls();
    bob.backend.hold(Op::LeaveSession);

    let listed = SessionInfo {
        id: id.clone(),
        name: id.clone(),
        member_count: 5,
        visibility: Visibility::Public,
        capacity: 4,
    };
    let store = bob.store.clone();
    let backend = bob.backend.clone();
    tokio::join!(store.leave_session(), async {
        while !backend.calls().iter().any(|c| matches!(c, Call::LeaveSession(_))) {
            tokio::task::yield_now().await;
        }
        assert_eq!(backend.push(PushEvent::SessionList(vec![listed.clone()])), 1);
        bob.settle().await;
        backend.release(Op::LeaveSession);
    });
    settle_all(&mut [&mut alice, &mut bob]).await;

    assert!(bob.store.current_session().is_none());
    assert!(!bob.backend.calls().iter().any(|c| matches!(c, Call::GetMembers(_))));
    assert_invariants(&[&alice, &bob], "after list during leave");
}

#[tokio::test]
async fn leave_during_join_abandons_it() {
    let (server, env) = setup();
    let mut alice = SimClient::new(&server, env.clone());
    let mut bob = SimClient::new(&server, env);
    alice.connect("alice").await;
    bob.connect("bob").await;
    let id = joined(alice.store.create_session(Visibility::Public, 4).await);
    bob.backend.hold(Op::EstablishPeerLinks);

    let store = bob.store.clone();
    let backend = bob.backend.clone();
    let (outcome, ()) = tokio::join!(bob.store.enter_session(&id), async {
        while !backend.calls().iter().any(|c| matches!(c, Call::EstablishPeerLinks { .. })) {
            tokio::task::yield_now().await;
        }
        store.leave_session().await;
        backend.release(Op::EstablishPeerLinks);
    });
    settle_all(&mut [&mut alice, &mut bob]).await;

    assert_eq!(outcome, JoinOutcome::Abandoned);
    let view = bob.store.view();
    assert!(view.session.is_none());
    assert!(view.error.is_none(), "an abandoned join reports nothing");
    assert!(!view.join_in_flight);
    assert_eq!(bob.backend.subscription_count(), 4);
    assert_eq!(server.session(&id).map(|s| s.members), Some(vec!["alice".to_string()]));
    assert_invariants(&[&alice, &bob], "after abandoned join");
}

#[tokio::test]
async fn create_waits_out_a_running_leave() {
    let (server, env) = setup();
    let mut alice = SimClient::new(&server, env);
    alice.connect("alice").await;
    alice.store.create_session(Visibility::Public, 4).await;
    alice.backend.hold(Op::LeaveSession);

    let store = alice.store.clone();
    let backend = alice.backend.clone();
    let ((), outcome) = tokio::join!(alice.store.leave_session(), async {
        while !backend.calls().iter().any(|c| matches!(c, Call::LeaveSession(_))) {
            tokio::task::yield_now().await;
        }
        let outcome = store.create_session(Visibility::Public, 4).await;
        backend.release(Op::LeaveSession);
        outcome
    });
    alice.settle().await;

    assert_eq!(outcome, JoinOutcome::Skipped);
    assert!(alice.store.current_session().is_none());
    assert_invariants(&[&alice], "after leave with overlapping create");

    assert!(matches!(
        alice.store.create_session(Visibility::Public, 4).await,
        JoinOutcome::Joined(_)
    ));
}

#[tokio::test]
async fn disconnect_in_session_tears_down_links() {
    let (server, env) = setup();
    let (mut alice, mut bob, id) = hosted_pair(&server, &env).await;
    bob.backend.clear_calls();

    bob.store.disconnect().await;
    settle_all(&mut [&mut alice, &mut bob]).await;

    assert!(bob.backend.calls().contains(&Call::TeardownPeerLinks));
    assert_eq!(server.session(&id).map(|s| s.members), Some(vec!["alice".to_string()]));
    assert_eq!(notices(&alice), ["bob joined", "bob left"]);
    assert_invariants(&[&alice, &bob], "after disconnect in session");
}

#[tokio::test]
async fn late_link_event_after_leave_is_dropped() {
    let (server, env) = setup();
    server.set_link_policy(LinkPolicy::Manual);
    let (mut alice, mut bob, _id) = hosted_pair(&server, &env).await;
    let old = bob.store.view().subscriptions[&ChannelKind::LinkState];

    bob.store.leave_session().await;
    let event = PushEvent::LinkState { peer: "alice".into(), state: LinkState::Failed };
    assert!(bob.backend.push_released(old, event));
    settle_all(&mut [&mut alice, &mut bob]).await;

    assert!(bob.store.error().is_none());
    assert_invariants(&[&alice, &bob], "after late link event");
}
