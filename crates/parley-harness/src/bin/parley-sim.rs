//! Parley simulation binary.
//!
//! Drives several simulated clients through a seeded random walk of
//! connects, joins, leaves, chat, lost connections and overlapping
//! operations, checking every invariant after each step.
//!
//! # Usage
//!
//! ```bash
//! parley-sim --clients 4 --steps 500 --seed 7
//! RUST_LOG=parley_app=debug parley-sim
//! ```

use std::time::Duration;

use clap::Parser;
use parley_app::JoinOutcome;
use parley_core::{LinkState, Visibility};
use parley_harness::{
    InvariantRegistry, LinkPolicy, SimClient, SimEnv, SimServer, SystemSnapshot, settle_all,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Parley client simulation
#[derive(Parser, Debug)]
#[command(name = "parley-sim")]
#[command(about = "Seeded random-walk simulation of Parley clients")]
#[command(version)]
struct Args {
    /// Number of simulated clients
    #[arg(short, long, default_value = "3")]
    clients: usize,

    /// Number of random steps
    #[arg(long, default_value = "200")]
    steps: usize,

    /// RNG seed
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Leave peer links in "checking" until the walk fails or opens them
    #[arg(long)]
    manual_links: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Connect,
    Disconnect,
    Create,
    Enter,
    Leave,
    Chat,
    LoseConnection,
    FailLink,
    OverlapJoinLeave,
    AdvanceClock,
}

const STEPS: [Step; 10] = [
    Step::Connect,
    Step::Disconnect,
    Step::Create,
    Step::Enter,
    Step::Leave,
    Step::Chat,
    Step::LoseConnection,
    Step::FailLink,
    Step::OverlapJoinLeave,
    Step::AdvanceClock,
];

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let env = SimEnv::new();
    let server = SimServer::with_seed(env.clone(), args.seed);
    if args.manual_links {
        server.set_link_policy(LinkPolicy::Manual);
    }

    let mut clients: Vec<SimClient> =
        (0..args.clients.max(1)).map(|_| SimClient::new(&server, env.clone())).collect();
    let identities: Vec<String> = (0..clients.len()).map(|i| format!("peer-{i}")).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let invariants = InvariantRegistry::standard();

    tracing::info!(
        clients = clients.len(),
        steps = args.steps,
        seed = args.seed,
        "simulation starting"
    );

    for step_no in 0..args.steps {
        let actor = rng.gen_range(0..clients.len());
        let step = STEPS[rng.gen_range(0..STEPS.len())];
        let identity = identities[actor].as_str();
        tracing::debug!(step_no, actor = identity, ?step, "step");

        match step {
            Step::Connect => clients[actor].connect(identity).await,
            Step::Disconnect => clients[actor].store.disconnect().await,
            Step::Create => {
                let visibility =
                    if rng.gen_bool(0.5) { Visibility::Public } else { Visibility::Private };
                let capacity = rng.gen_range(0..20);
                clients[actor].store.create_session(visibility, capacity).await;
            },
            Step::Enter => {
                let other = rng.gen_range(0..clients.len());
                let code = clients[other].store.current_session().map(|s| s.id.to_lowercase());
                if let Some(code) = code {
                    let outcome = clients[actor].store.enter_session(&code).await;
                    tracing::debug!(actor = identity, ?outcome, "enter");
                }
            },
            Step::Leave => clients[actor].store.leave_session().await,
            Step::Chat => {
                let text = format!("message {step_no}");
                clients[actor].store.send_message(&text).await;
            },
            Step::LoseConnection => {
                server.drop_client(identity);
            },
            Step::FailLink => {
                let peer = &identities[rng.gen_range(0..identities.len())];
                if peer != identity {
                    server.push_link_state(identity, peer, LinkState::Failed);
                }
            },
            Step::OverlapJoinLeave => {
                let store = clients[actor].store.clone();
                let (outcome, ()) = tokio::join!(
                    store.create_session(Visibility::Public, 4),
                    store.leave_session()
                );
                if outcome == JoinOutcome::Skipped {
                    tracing::debug!(actor = identity, "overlapping create skipped");
                }
            },
            Step::AdvanceClock => env.advance(Duration::from_secs(rng.gen_range(1..8))),
        }

        let mut refs: Vec<&mut SimClient> = clients.iter_mut().collect();
        settle_all(&mut refs).await;

        let mut snapshot = SystemSnapshot::empty();
        for client in &clients {
            snapshot.add_client(client.snapshot());
        }
        if let Err(violations) = invariants.check_all(&snapshot) {
            for violation in &violations {
                tracing::error!(step_no, ?step, "{violation}");
            }
            return Err(violations[0].clone().into());
        }
    }

    for (client, identity) in clients.iter().zip(&identities) {
        let view = client.store.view();
        tracing::info!(
            identity,
            connection = ?view.connection,
            session = ?view.session.map(|s| s.id),
            global_messages = view.global_log.len(),
            "final state"
        );
    }
    tracing::info!("simulation finished, all invariants held");
    Ok(())
}
