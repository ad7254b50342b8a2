//! Connection acceptor: turns transport callbacks into player actions.

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use gather_config::ServerConfig;
use gather_net::messages::decode_handshake;
use gather_net::{
    Channel, Connection, ConnectionId, DisconnectReason, HandshakeError, TransportHandler,
};
use tokio::sync::watch;

use crate::ids::PlayerIdGenerator;
use crate::player::Player;
use crate::registry::SessionRegistry;

/// Point-in-time counts for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Connected players.
    pub players: usize,
    /// Published sessions.
    pub sessions: usize,
}

impl fmt::Display for ServerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} players, {} sessions", self.players, self.sessions)
    }
}

/// The session server. Drive it from any transport via [`TransportHandler`].
pub struct GameServer {
    registry: SessionRegistry,
    players: DashMap<ConnectionId, Arc<Player>>,
    player_ids: PlayerIdGenerator,
    accepted_versions: RangeInclusive<i32>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GameServer {
    /// Create a server accepting the client versions `config` allows.
    pub fn new(config: &ServerConfig) -> Self {
        Self::with_version_range(config.min_client_version..=config.max_client_version)
    }

    /// Create a server accepting handshakes whose version is in `accepted_versions`.
    pub fn with_version_range(accepted_versions: RangeInclusive<i32>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            registry: SessionRegistry::new(),
            players: DashMap::new(),
            player_ids: PlayerIdGenerator::new(),
            accepted_versions,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// The session registry.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// The player on `connection`, if connected.
    pub fn player(&self, connection: ConnectionId) -> Option<Arc<Player>> {
        self.players
            .get(&connection)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Current player and session counts.
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            players: self.players.len(),
            sessions: self.registry.len(),
        }
    }

    /// Log [`stats`](Self::stats) every `interval` until [`shutdown`](Self::shutdown).
    /// With no interval, just waits for shutdown.
    pub async fn run_stats(&self, interval: Option<Duration>) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let Some(interval) = interval else {
            stopped(&mut shutdown_rx).await;
            return;
        };

        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tracing::info!("Stats: {}", self.stats());
                }
                _ = stopped(&mut shutdown_rx) => break,
            }
        }
    }

    /// Stop [`run_stats`](Self::run_stats).
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn check_handshake(&self, handshake: &[u8]) -> Result<i32, HandshakeError> {
        let version = decode_handshake(handshake)?;
        if !self.accepted_versions.contains(&version) {
            return Err(HandshakeError::UnsupportedVersion(version));
        }
        Ok(version)
    }
}

/// Resolves once the shutdown flag is set, or its sender is gone.
async fn stopped(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

impl TransportHandler for GameServer {
    fn on_connected(&self, connection: Arc<dyn Connection>, handshake: &[u8]) -> bool {
        let conn_id = connection.id();
        let version = match self.check_handshake(handshake) {
            Ok(version) => version,
            Err(e) => {
                tracing::warn!("Rejecting {conn_id:?}: {e}");
                return false;
            }
        };

        let player = Arc::new(Player::new(self.player_ids.next_id(), version, connection));
        tracing::info!(
            "{} connected on {conn_id:?} (client version {version})",
            player.id()
        );
        self.players.insert(conn_id, player);
        true
    }

    fn on_data(&self, id: ConnectionId, channel: Channel, packet: &[u8]) {
        let Some(player) = self.player(id) else {
            tracing::trace!("Data from unknown {id:?}");
            return;
        };
        player.handle_packet(channel, packet, &self.registry);
    }

    fn on_disconnected(&self, id: ConnectionId, reason: DisconnectReason) {
        let Some((_, player)) = self.players.remove(&id) else {
            return;
        };
        player.leave(&self.registry);
        tracing::info!("{} disconnected: {reason}", player.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gather_net::messages::{create_game_request, encode_handshake};
    use gather_net::MemoryConnection;

    fn connect(server: &GameServer, id: u64) -> Arc<MemoryConnection> {
        let conn = Arc::new(MemoryConnection::new(ConnectionId(id)));
        assert!(server.on_connected(Arc::clone(&conn) as Arc<dyn Connection>, &encode_handshake(1)));
        conn
    }

    #[test]
    fn test_handshake_validation() {
        let server = GameServer::with_version_range(1..=2);
        let conn = Arc::new(MemoryConnection::new(ConnectionId(1)));
        let dyn_conn = || Arc::clone(&conn) as Arc<dyn Connection>;

        assert!(!server.on_connected(dyn_conn(), &[]));
        assert!(!server.on_connected(dyn_conn(), &[1, 0]));
        assert!(!server.on_connected(dyn_conn(), &encode_handshake(3)));
        assert_eq!(server.stats().players, 0);

        assert!(server.on_connected(dyn_conn(), &encode_handshake(2)));
        assert_eq!(server.player(ConnectionId(1)).unwrap().client_version(), 2);
    }

    #[test]
    fn test_player_ids_increase_per_connection() {
        let server = GameServer::with_version_range(1..=1);
        connect(&server, 10);
        connect(&server, 11);
        let first = server.player(ConnectionId(10)).unwrap().id();
        let second = server.player(ConnectionId(11)).unwrap().id();
        assert!(first < second);
    }

    #[test]
    fn test_disconnect_reconciles_sessions() {
        let server = GameServer::with_version_range(1..=1);
        connect(&server, 1);
        server.on_data(ConnectionId(1), Channel::Reliable, &create_game_request());
        assert_eq!(
            server.stats(),
            ServerStats {
                players: 1,
                sessions: 1
            }
        );

        server.on_disconnected(ConnectionId(1), DisconnectReason::TimedOut);
        assert_eq!(server.stats(), ServerStats::default());

        // Late data and repeated disconnects are harmless.
        server.on_data(ConnectionId(1), Channel::Reliable, &create_game_request());
        server.on_disconnected(ConnectionId(1), DisconnectReason::Goodbye);
        assert_eq!(server.stats(), ServerStats::default());
    }

    #[tokio::test]
    async fn test_run_stats_stops_on_shutdown() {
        let server = Arc::new(GameServer::with_version_range(1..=1));
        let srv = Arc::clone(&server);
        let task = tokio::spawn(async move {
            srv.run_stats(Some(Duration::from_millis(10))).await;
        });
        tokio::time::sleep(Duration::from_millis(35)).await;
        server.shutdown();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_stats_without_interval() {
        let server = Arc::new(GameServer::with_version_range(1..=1));
        let srv = Arc::clone(&server);
        let task = tokio::spawn(async move { srv.run_stats(None).await });
        server.shutdown();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
