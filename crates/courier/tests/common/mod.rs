//! Message set and helpers shared by the integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use courier::prelude::*;
use serde::{Deserialize, Serialize};

/// Counts down: `Ping{n}` is answered with `Ping{n-1}` until `n` is 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ping {
    pub n: u32,
}

impl MessageType for Ping {
    const IDENTIFIER: &'static str = "Ping";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Note {
    pub text: String,
}

impl MessageType for Note {
    const IDENTIFIER: &'static str = "Note";
}

/// Panics when executed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Boom {}

impl MessageType for Boom {
    const IDENTIFIER: &'static str = "Boom";
}

#[derive(Debug, Clone, PartialEq)]
pub enum Wire {
    Ping(Ping),
    Note(Note),
    Boom(Boom),
}

impl From<Ping> for Wire {
    fn from(p: Ping) -> Self {
        Wire::Ping(p)
    }
}

impl From<Note> for Wire {
    fn from(n: Note) -> Self {
        Wire::Note(n)
    }
}

impl From<Boom> for Wire {
    fn from(b: Boom) -> Self {
        Wire::Boom(b)
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    pub executed: usize,
    pub notes: Vec<String>,
}

impl Message for Wire {
    type Context = Counter;

    fn execute(&self, ctx: &mut Counter) -> Option<Self> {
        ctx.executed += 1;
        match self {
            Wire::Ping(Ping { n }) if *n > 0 => Some(Wire::Ping(Ping { n: n - 1 })),
            Wire::Ping(_) => None,
            Wire::Note(note) => {
                ctx.notes.push(note.text.clone());
                None
            }
            Wire::Boom(_) => panic!("boom"),
        }
    }

    fn to_wire(&self) -> Result<WireFields, ProtocolError> {
        match self {
            Wire::Ping(m) => WireFields::of(m),
            Wire::Note(m) => WireFields::of(m),
            Wire::Boom(m) => WireFields::of(m),
        }
    }
}

pub fn ping(n: u32) -> Wire {
    Wire::Ping(Ping { n })
}

pub fn note(text: &str) -> Wire {
    Wire::Note(Note { text: text.into() })
}

pub fn registry() -> MessageRegistry<Wire> {
    MessageRegistry::new()
        .register::<Ping>()
        .and_then(|r| r.register::<Note>())
        .and_then(|r| r.register::<Boom>())
        .expect("registry should build")
}

pub fn json_factory() -> JsonMessageIoFactory<Wire> {
    JsonMessageIoFactory::new(Arc::new(registry()))
}

/// Polls `condition` every 5ms for up to 2s.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Awaits `fut` with a 2s limit.
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), fut)
        .await
        .expect("timed out after 2s")
}
