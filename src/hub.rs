//! `HubClient`: the one concrete [`RemoteClient`] this binary ships,
//! talking a plain line protocol to whatever process owns the `ccd_*`,
//! `hx_*` and `enu_sm*` actors. The wire format itself is out of scope
//! for the orchestration layer (`client.rs`'s own doc comment calls this
//! out), so this module only needs to be *a* reasonable implementation of
//! the seam, not *the* canonical one.
//!
//! Protocol: one command per TCP connection. The caller writes
//! `<actor> <command>\n`; the hub replies with zero or more keyword lines
//! (`k <actor> <keyword> <v1>,<v2>,…\n`), each published into the keyword
//! registry as it arrives, followed by exactly one terminal line —
//! `: <actor> <text>\n` on success, `f <actor> <text>\n` on failure.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use sps_exposure_core::{KeywordRegistry, ReplyBundle, RemoteClient};

pub struct HubClient {
    addr: SocketAddr,
    registry: KeywordRegistry,
}

impl HubClient {
    pub fn new(addr: SocketAddr, registry: KeywordRegistry) -> Self {
        Self { addr, registry }
    }

    async fn dispatch(&self, actor: &str, command: &str) -> std::io::Result<ReplyBundle> {
        let stream = TcpStream::connect(self.addr).await?;
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(format!("{actor} {command}\n").as_bytes()).await?;
        write_half.flush().await?;

        let mut lines = BufReader::new(read_half).lines();
        loop {
            let Some(line) = lines.next_line().await? else {
                return Ok(ReplyBundle::failure("connection closed before a terminal line"));
            };
            let Some((tag, rest)) = line.split_once(' ') else { continue };
            match tag {
                "k" => {
                    if let Some((keyword, values)) = rest.split_once(' ') {
                        let values: Vec<String> = values.split(',').map(str::to_owned).collect();
                        self.registry.publish(actor, keyword, values);
                    }
                }
                ":" => return Ok(ReplyBundle::success(Default::default())),
                "f" => return Ok(ReplyBundle::failure(rest.to_owned())),
                _ => {}
            }
        }
    }
}

#[async_trait]
impl RemoteClient for HubClient {
    async fn call_raw(&self, actor: &str, command: &str, _time_limit: Duration) -> ReplyBundle {
        match self.dispatch(actor, command).await {
            Ok(reply) => reply,
            Err(err) => ReplyBundle::failure(err.to_string()),
        }
    }

    async fn call_no_wait(&self, actor: &str, command: &str) -> ReplyBundle {
        match TcpStream::connect(self.addr).await {
            Ok(mut stream) => {
                let _ = stream.write_all(format!("{actor} {command}\n").as_bytes()).await;
                ReplyBundle::success(Default::default())
            }
            Err(err) => ReplyBundle::failure(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Spawns a one-shot fake hub that reads a single command line and
    /// writes back `script` verbatim, then closes the connection.
    async fn fake_hub(script: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let _ = lines.next_line().await;
            write_half.write_all(script.as_bytes()).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn publishes_keyword_lines_before_the_terminal_reply() {
        let addr = fake_hub("k ccd_r1 exposureState wiping\n: ccd_r1 OK\n").await;
        let registry = KeywordRegistry::new();
        let client = HubClient::new(addr, registry.clone());

        let reply = client.call_raw("ccd_r1", "wipe", Duration::from_secs(1)).await;

        assert!(!reply.did_fail);
        assert_eq!(registry.current("ccd_r1", "exposureState"), Some(vec!["wiping".to_owned()]));
    }

    #[tokio::test]
    async fn failure_line_surfaces_as_a_failed_reply() {
        let addr = fake_hub("f ccd_r1 detector timed out\n").await;
        let client = HubClient::new(addr, KeywordRegistry::new());

        let reply = client.call_raw("ccd_r1", "read", Duration::from_secs(1)).await;

        assert!(reply.did_fail);
        assert_eq!(reply.last_reply.as_deref(), Some("detector timed out"));
    }

    #[tokio::test]
    async fn connection_closed_without_terminal_line_is_a_failure() {
        let addr = fake_hub("k ccd_r1 exposureState wiping\n").await;
        let client = HubClient::new(addr, KeywordRegistry::new());

        let reply = client.call_raw("ccd_r1", "wipe", Duration::from_secs(1)).await;

        assert!(reply.did_fail);
    }
}
