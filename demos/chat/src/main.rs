use std::sync::Arc;

use courier::auth::{MemoryAuthenticator, UserProfile, UserSession};
use courier::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Login {
    pub user: String,
    pub password: String,
}

impl MessageType for Login {
    const IDENTIFIER: &'static str = "chat.Login";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginReply {
    pub ok: bool,
    pub user: String,
}

impl MessageType for LoginReply {
    const IDENTIFIER: &'static str = "chat.LoginReply";
}

/// A line typed by a signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Say {
    pub text: String,
}

impl MessageType for Say {
    const IDENTIFIER: &'static str = "chat.Say";
    // First release called it "Message".
    const ADAPTS_FROM: &'static [&'static str] = &["chat.Message"];
}

/// A line relayed to every connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Line {
    pub from: String,
    pub text: String,
}

impl MessageType for Line {
    const IDENTIFIER: &'static str = "chat.Line";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Notice {
    pub text: String,
}

impl MessageType for Notice {
    const IDENTIFIER: &'static str = "chat.Notice";
}

#[derive(Debug, Clone, PartialEq)]
pub enum Chat {
    Login(Login),
    LoginReply(LoginReply),
    Say(Say),
    Line(Line),
    Notice(Notice),
}

macro_rules! variant {
    ($($ty:ident),*) => {
        $(impl From<$ty> for Chat {
            fn from(m: $ty) -> Self {
                Chat::$ty(m)
            }
        })*
    };
}

variant!(Login, LoginReply, Say, Line, Notice);

// ---------------------------------------------------------------------------
// Per-connection state
// ---------------------------------------------------------------------------

/// Context shared by both ends. Servers fill `auth`; clients use the
/// transcript.
#[derive(Debug, Default)]
pub struct Session {
    auth: Arc<MemoryAuthenticator>,
    profile: Option<UserProfile>,
    /// Set by `Say`, drained by the server's relay task.
    relay: Option<Line>,
    pub transcript: Vec<String>,
}

impl Session {
    pub fn new(auth: Arc<MemoryAuthenticator>) -> Self {
        Self {
            auth,
            profile: None,
            relay: None,
            transcript: Vec::new(),
        }
    }
}

impl UserSession for Session {
    fn profile(&self) -> Option<&UserProfile> {
        self.profile.as_ref()
    }

    fn sign_in(&mut self, profile: UserProfile) {
        self.profile = Some(profile);
    }

    fn sign_out(&mut self) -> Option<UserProfile> {
        self.profile.take()
    }
}

// The context goes away with its connection, so the user is released here.
impl Drop for Session {
    fn drop(&mut self) {
        let Some(id) = self.profile.as_ref().map(|p| p.id.clone()) else {
            return;
        };
        let auth = Arc::clone(&self.auth);
        if let Err(e) = Authenticator::<Session>::unauthenticate(&*auth, self, &id) {
            warn!(user = %id, error = %e, "sign out failed");
        }
    }
}

impl Message for Chat {
    type Context = Session;

    fn execute(&self, session: &mut Session) -> Option<Self> {
        match self {
            Chat::Login(login) => {
                let auth = Arc::clone(&session.auth);
                let ok = auth
                    .authenticate_with_password(session, &login.user, &login.password)
                    .unwrap_or_else(|e| {
                        warn!(user = %login.user, error = %e, "login failed");
                        false
                    });
                Some(
                    LoginReply {
                        ok,
                        user: login.user.clone(),
                    }
                    .into(),
                )
            }
            Chat::Say(say) => match &session.profile {
                Some(profile) => {
                    session.relay = Some(Line {
                        from: profile.id.clone(),
                        text: say.text.clone(),
                    });
                    None
                }
                None => Some(
                    Notice {
                        text: "log in first".into(),
                    }
                    .into(),
                ),
            },
            Chat::LoginReply(reply) => {
                session
                    .transcript
                    .push(format!("* login {}: {}", reply.user, reply.ok));
                None
            }
            Chat::Line(line) => {
                session.transcript.push(format!("<{}> {}", line.from, line.text));
                None
            }
            Chat::Notice(notice) => {
                session.transcript.push(format!("* {}", notice.text));
                None
            }
        }
    }

    fn to_wire(&self) -> Result<WireFields, ProtocolError> {
        match self {
            Chat::Login(m) => WireFields::of(m),
            Chat::LoginReply(m) => WireFields::of(m),
            Chat::Say(m) => WireFields::of(m),
            Chat::Line(m) => WireFields::of(m),
            Chat::Notice(m) => WireFields::of(m),
        }
    }
}

pub fn registry() -> Result<MessageRegistry<Chat>, ProtocolError> {
    MessageRegistry::new()
        .register::<Login>()?
        .register::<LoginReply>()?
        .register::<Say>()?
        .register::<Line>()?
        .register::<Notice>()
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

pub async fn chat_server(
    config: ServerConfig,
    auth: Arc<MemoryAuthenticator>,
) -> Result<Server<Chat>, CourierError> {
    let connections = ConnectionBuilder::new()
        .with_message_registry(registry()?)
        .with_context_factory(move || Session::new(Arc::clone(&auth)))
        .with_emergency_stop();

    Server::<Chat>::builder()
        .with_config(config)
        .with_connection_builder(connections)
        .with_contextual_task(|server: &Server<Chat>, session: &mut Session| {
            if let Some(line) = session.relay.take() {
                server.broadcast(line.into());
            }
        })
        .with_connection_added_callback(|server, connection| {
            info!(id = %connection.id(), online = server.connection_count(), "joined");
        })
        .with_connection_removed_callback(|server, connection| {
            info!(id = %connection.id(), online = server.connection_count(), "left");
        })
        .build()
        .await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = std::env::var("COURIER_CHAT_ADDR").unwrap_or_else(|_| "127.0.0.1:7070".into());
    let auth = Arc::new(MemoryAuthenticator::new());
    auth.add_user("alice", "wonderland");
    auth.add_user("bob", "builder");

    let server = chat_server(ServerConfig::bind(addr), auth).await?;
    server.start();
    info!(addr = %server.local_addr(), "chat server listening");

    tokio::signal::ctrl_c().await?;
    server.stop();
    Ok(())
}
