//! Unix socket server for admin commands.
//!
//! Newline-delimited JSON, one command per line. Used by `earshot-admin` to
//! fix identity links by hand and to inspect the live registry.

use crate::error::Result;
use crate::storage::{IdentityLink, Storage};
use earshot_core::{IdentityId, PlayerKey, Registry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Admin command sent over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AdminCommand {
    /// Link a player name to a member id by hand
    Link { name: String, identity: String },
    /// Remove a player's link so it is resolved again
    Unlink { name: String },
    /// List stored links
    ListLinks,
    /// List players currently in the registry
    Players,
    /// Ping (health check)
    Ping,
}

/// Response from admin command.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdminResponse {
    Ok { message: String },
    Error { error: String },
    List { items: Vec<String> },
    Pong,
}

/// Admin socket server.
pub struct AdminSocket {
    storage: Arc<Storage>,
    registry: Arc<Registry>,
    socket_path: PathBuf,
}

impl AdminSocket {
    pub fn new(
        storage: Arc<Storage>,
        registry: Arc<Registry>,
        socket_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            storage,
            registry,
            socket_path: socket_path.into(),
        }
    }

    /// Run the admin socket server.
    pub async fn run(&self) -> Result<()> {
        // Left over from a previous run
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!("Admin socket listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let storage = Arc::clone(&self.storage);
                    let registry = Arc::clone(&self.registry);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &storage, &registry).await {
                            tracing::error!("Admin connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept admin connection: {}", e);
                }
            }
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

async fn handle_connection(
    stream: UnixStream,
    storage: &Storage,
    registry: &Registry,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<AdminCommand>(&line) {
            Ok(cmd) => execute_command(cmd, storage, registry),
            Err(e) => AdminResponse::Error {
                error: format!("Invalid command: {}", e),
            },
        };

        let response_json = serde_json::to_string(&response)? + "\n";
        writer.write_all(response_json.as_bytes()).await?;
        line.clear();
    }

    Ok(())
}

fn execute_command(cmd: AdminCommand, storage: &Storage, registry: &Registry) -> AdminResponse {
    match cmd {
        AdminCommand::Link { name, identity } => {
            let key = PlayerKey::new(&name);
            if key.as_str().is_empty() || identity.trim().is_empty() {
                return AdminResponse::Error {
                    error: "link requires a name and an identity".into(),
                };
            }
            let wanted = IdentityId::from(identity.trim());
            match storage.put_link_if_absent(&IdentityLink::new(key.clone(), wanted.clone())) {
                Ok(link) if link.identity == wanted => {
                    registry.link(&key, wanted);
                    tracing::info!("Linked {} to member {} by hand", key, link.identity);
                    AdminResponse::Ok {
                        message: format!("Linked {} -> {}", key, link.identity),
                    }
                }
                Ok(link) => AdminResponse::Error {
                    error: format!("{} is already linked to {}; unlink first", key, link.identity),
                },
                Err(e) => AdminResponse::Error { error: e.to_string() },
            }
        }

        AdminCommand::Unlink { name } => {
            let key = PlayerKey::new(&name);
            match storage.delete_link(&key) {
                Ok(existed) => {
                    registry.unlink(&key);
                    if existed {
                        tracing::info!("Unlinked {}", key);
                        AdminResponse::Ok {
                            message: format!("Unlinked {}", key),
                        }
                    } else {
                        AdminResponse::Error {
                            error: format!("{} has no link", key),
                        }
                    }
                }
                Err(e) => AdminResponse::Error { error: e.to_string() },
            }
        }

        AdminCommand::ListLinks => match storage.list_links() {
            Ok(links) => AdminResponse::List {
                items: links
                    .into_iter()
                    .map(|l| format!("{} -> {}", l.player, l.identity))
                    .collect(),
            },
            Err(e) => AdminResponse::Error { error: e.to_string() },
        },

        AdminCommand::Players => {
            let now = Instant::now();
            AdminResponse::List {
                items: registry
                    .snapshot()
                    .into_iter()
                    .map(|p| {
                        format!(
                            "{} ({:.1}, {:.1}, {:.1}) {} {}ms",
                            p.name,
                            p.position.x,
                            p.position.y,
                            p.position.z,
                            p.identity.as_ref().map_or("unlinked", |id| id.as_str()),
                            p.age(now).as_millis()
                        )
                    })
                    .collect(),
            }
        }

        AdminCommand::Ping => AdminResponse::Pong,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use earshot_core::Position;
    use tempfile::tempdir;

    fn run(cmd: &str, storage: &Storage, registry: &Registry) -> serde_json::Value {
        let cmd: AdminCommand = serde_json::from_str(cmd).unwrap();
        serde_json::to_value(execute_command(cmd, storage, registry)).unwrap()
    }

    #[test]
    fn link_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let registry = Registry::new();

        let first = run(r#"{"cmd":"link","name":"Steve","identity":"1"}"#, &storage, &registry);
        assert_eq!(first["status"], "ok");

        let second = run(r#"{"cmd":"link","name":"steve","identity":"2"}"#, &storage, &registry);
        assert_eq!(second["status"], "error");
        assert_eq!(
            storage.get_link(&PlayerKey::new("steve")).unwrap().unwrap().identity,
            IdentityId::from("1")
        );
    }

    #[test]
    fn unlink_clears_store_and_registry() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let registry = Registry::new();
        registry.report("Steve", Position::ORIGIN, Some(IdentityId::from("1")));
        run(r#"{"cmd":"link","name":"Steve","identity":"1"}"#, &storage, &registry);

        let reply = run(r#"{"cmd":"unlink","name":"STEVE"}"#, &storage, &registry);
        assert_eq!(reply["status"], "ok");
        assert!(storage.get_link(&PlayerKey::new("steve")).unwrap().is_none());
        assert!(!registry.get(&PlayerKey::new("steve")).unwrap().is_linked());

        let again = run(r#"{"cmd":"unlink","name":"steve"}"#, &storage, &registry);
        assert_eq!(again["status"], "error");
    }

    #[test]
    fn lists_links_and_players() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let registry = Registry::new();
        registry.report("Alex", Position::new(1.0, 2.0, 3.0), None);
        run(r#"{"cmd":"link","name":"steve","identity":"1"}"#, &storage, &registry);

        let links = run(r#"{"cmd":"list_links"}"#, &storage, &registry);
        assert_eq!(links["items"], serde_json::json!(["steve -> 1"]));

        let players = run(r#"{"cmd":"players"}"#, &storage, &registry);
        let line = players["items"][0].as_str().unwrap();
        assert!(line.starts_with("Alex (1.0, 2.0, 3.0) unlinked"));
    }

    #[tokio::test]
    async fn serves_commands_over_socket() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path().join("db")).unwrap());
        let registry = Arc::new(Registry::new());
        let socket = AdminSocket::new(storage, registry, dir.path().join("admin.sock"));
        let path = socket.socket_path().to_path_buf();
        let server = tokio::spawn(async move { socket.run().await });

        let mut stream = None;
        for _ in 0..50 {
            if let Ok(s) = UnixStream::connect(&path).await {
                stream = Some(s);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let (reader, mut writer) = stream.unwrap().into_split();
        writer.write_all(b"{\"cmd\":\"ping\"}\nnot json\n").await.unwrap();

        let mut lines = BufReader::new(reader).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), r#"{"status":"pong"}"#);
        assert!(lines.next_line().await.unwrap().unwrap().contains("Invalid command"));
        server.abort();
    }
}
