//! Demo classmate.
//!
//! A second participant on the same in-memory backend that types and posts a
//! line every so often, so a single terminal shows realtime fan-out, typing
//! indicators and presence without another client.

use std::time::Duration;

use lectern_app::{Command, MemoryBackend, Runtime, RuntimeError, RuntimeHandle, SystemEnv};
use lectern_core::{Identity, SessionConfig, UserId};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::IndexedRandom};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const LINES: &[&str] = &[
    "did anyone finish the reading for today?",
    "the lab deadline moved to friday",
    "which page was that on?",
    "can someone share the slides?",
    "good point",
    "brb, grabbing coffee",
];

/// Delay between keystrokes while the classmate types.
const KEYSTROKE: Duration = Duration::from_millis(80);

/// Random extra pause added to the base interval.
const JITTER_MS: u64 = 4_000;

/// A running demo classmate.
pub struct Classmate {
    handle: RuntimeHandle,
    runtime: JoinHandle<Result<(), RuntimeError>>,
    chatter: JoinHandle<Result<(), RuntimeError>>,
}

impl Classmate {
    /// Identity the classmate chats as.
    pub fn identity() -> Identity {
        Identity::new(UserId(2), "classmate")
    }

    /// Start the classmate's runtime and chatter on `backend`.
    pub fn spawn(
        backend: MemoryBackend<SystemEnv>,
        env: SystemEnv,
        config: SessionConfig,
        every: Duration,
    ) -> Result<Self, RuntimeError> {
        let identity = Self::identity();
        backend.register_author(identity.user_id, identity.author());

        let (runtime, handle) = Runtime::new(backend, env, identity, config)?;
        let runtime = tokio::spawn(runtime.run());
        let chatter = tokio::spawn(chatter(handle.clone(), every));
        info!(every_ms = every.as_millis(), "demo classmate joined");

        Ok(Self { handle, runtime, chatter })
    }

    /// Stop chatting and shut the classmate's runtime down.
    pub async fn stop(self) {
        self.chatter.abort();
        if self.handle.send(Command::Shutdown).is_err() {
            return;
        }
        match self.runtime.await {
            Ok(Ok(())) => {},
            Ok(Err(error)) => warn!(%error, "classmate runtime failed"),
            Err(error) => warn!(%error, "classmate runtime panicked"),
        }
    }
}

/// Type and post a random line every `every` plus jitter until the runtime
/// stops.
async fn chatter(handle: RuntimeHandle, every: Duration) -> Result<(), RuntimeError> {
    let mut rng = StdRng::from_os_rng();

    loop {
        let pause = every + Duration::from_millis(rng.random_range(0..JITTER_MS));
        tokio::time::sleep(pause).await;

        let Some(line) = LINES.choose(&mut rng) else {
            continue;
        };
        let mut typed = String::new();
        for c in line.chars() {
            typed.push(c);
            handle.send(Command::Input(typed.clone()))?;
            tokio::time::sleep(KEYSTROKE).await;
        }
        handle.send(Command::Send((*line).to_owned()))?;
    }
}
