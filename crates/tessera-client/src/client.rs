//! Application-facing client: connects, owns the world mirror, and drives
//! per-frame work on the application thread.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tessera_config::Config;
use tessera_net::{
    ConnectOptions, ConnectionHandle, FrameConfig, HandshakeConfig, MessageDecoder,
    MessageRegistry, NetError, OutboundMessage, ServerConnection, SharedSecret,
};
use tessera_world::{
    EntityDecoder, FlushSummary, Registries, RendererDecoder, World, WorldSynchronizer,
};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::collaborators::{
    EntityRenderer, FrameListener, ImageHandle, InputSource, ResourceResolver,
};
use crate::error::ClientError;
use crate::keys::PressedKeys;
use crate::messages::register_builtin_messages;
use crate::session::{self, Session};

/// Collects registrations and connection options before connecting.
pub struct ClientBuilder {
    messages: MessageRegistry<Session>,
    registries: Registries,
    options: ConnectOptions,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    /// Builder with the built-in messages, entity kinds and renderer kinds.
    pub fn new() -> Self {
        let mut messages = MessageRegistry::new();
        register_builtin_messages(&mut messages);
        Self {
            messages,
            registries: Registries::with_builtins(),
            options: ConnectOptions::default(),
        }
    }

    /// Builder with framing and handshake options taken from `config`.
    pub fn from_config(config: &Config) -> Result<Self, ClientError> {
        let timeout = (config.handshake.timeout_seconds > 0)
            .then(|| Duration::from_secs(u64::from(config.handshake.timeout_seconds)));
        let handshake = HandshakeConfig::from_decimal(
            &config.handshake.prime,
            config.handshake.min_exponent,
            timeout,
        )?;
        let frame = FrameConfig {
            max_message_size: config.network.max_message_size,
            inbound_routing_tag: config.network.inbound_routing_tag,
        };
        Ok(Self::new().options(ConnectOptions { frame, handshake }))
    }

    pub fn options(mut self, options: ConnectOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a game-defined message. Returns `false` if `kind` is taken.
    pub fn register_message(&mut self, kind: &str, decoder: MessageDecoder<Session>) -> bool {
        self.messages.register(kind, decoder)
    }

    /// Register a game-defined entity kind, replacing any earlier decoder.
    pub fn register_entity(&mut self, kind: i32, decoder: EntityDecoder) {
        self.registries.entities.register(kind, decoder);
    }

    /// Register a game-defined renderer kind, replacing any earlier decoder.
    pub fn register_renderer(&mut self, kind: i32, decoder: RendererDecoder) {
        self.registries.renderers.register(kind, decoder);
    }

    /// Connect to `addr`.
    pub async fn connect(self, addr: SocketAddr) -> Result<Client, ClientError> {
        let (parts, messages, options) = self.into_parts();
        let connection =
            ServerConnection::connect(addr, options, messages, parts.session_factory()).await?;
        Ok(parts.into_client(connection))
    }

    /// Resolve the configured server address and connect to it.
    pub async fn connect_configured(self, config: &Config) -> Result<Client, ClientError> {
        let address = format!(
            "{}:{}",
            config.network.server_address, config.network.server_port
        );
        let resolve_error = |source| ClientError::Resolve {
            address: address.clone(),
            source,
        };
        let addr = tokio::net::lookup_host(&address)
            .await
            .map_err(resolve_error)?
            .next()
            .ok_or_else(|| {
                resolve_error(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no addresses found",
                ))
            })?;
        self.connect(addr).await
    }

    /// Run the session over an already established transport.
    pub async fn connect_stream<S>(
        self,
        stream: S,
        span: tracing::Span,
    ) -> Result<Client, ClientError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (parts, messages, options) = self.into_parts();
        let connection =
            ServerConnection::start(stream, options, messages, parts.session_factory(), span)
                .await?;
        Ok(parts.into_client(connection))
    }

    fn into_parts(self) -> (Parts, MessageRegistry<Session>, ConnectOptions) {
        let (sync, world) = WorldSynchronizer::new(Arc::new(self.registries));
        let parts = Parts {
            sync,
            world,
            keys: PressedKeys::new(),
            in_game: Arc::new(AtomicBool::new(false)),
        };
        (parts, self.messages, self.options)
    }
}

/// State shared between the client and the session it spawns.
struct Parts {
    sync: WorldSynchronizer,
    world: World,
    keys: PressedKeys,
    in_game: Arc<AtomicBool>,
}

impl Parts {
    fn session_factory(&self) -> impl FnOnce(ConnectionHandle, SharedSecret) -> Session + use<> {
        let sync = self.sync.clone();
        let keys = self.keys.clone();
        let in_game = Arc::clone(&self.in_game);
        move |handle, secret| Session::new(handle, secret, sync, keys, in_game)
    }

    fn into_client(self, connection: ServerConnection) -> Client {
        Client {
            connection,
            sync: self.sync,
            world: self.world,
            keys: self.keys,
            in_game: self.in_game,
            resources: Resources::default(),
        }
    }
}

/// Image resources keyed by the names image renderers reference.
#[derive(Debug, Default)]
pub struct Resources {
    images: HashMap<String, ImageHandle>,
}

impl ResourceResolver for Resources {
    fn resolve_image(&self, key: &str) -> Option<ImageHandle> {
        self.images.get(key).copied()
    }
}

/// A connected client.
///
/// Lives on the application thread. The connection's dispatch loop runs on
/// the tokio runtime and feeds the mirror; [`pump`](Self::pump) makes its
/// updates visible.
pub struct Client {
    connection: ServerConnection,
    sync: WorldSynchronizer,
    world: World,
    keys: PressedKeys,
    in_game: Arc<AtomicBool>,
    resources: Resources,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The mirror as of the last [`pump`](Self::pump).
    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn connection(&self) -> &ServerConnection {
        &self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_open()
    }

    /// Send a message to the server.
    pub fn send(&self, message: &dyn OutboundMessage) -> Result<(), NetError> {
        self.connection.send(message)
    }

    /// Apply every update received since the last call.
    pub fn pump(&mut self) -> FlushSummary {
        self.world.flush()
    }

    /// Block until the server finishes a tick or `timeout` passes, applying
    /// updates as they arrive.
    ///
    /// Blocks the calling thread; do not call it from a runtime worker
    /// without `block_in_place`.
    pub fn wait_for_tick(&mut self, timeout: Duration) -> bool {
        self.world.wait_for_tick(timeout)
    }

    /// One application frame: sample input, apply updates, notify `listener`
    /// if a server tick landed, then draw every entity.
    pub fn frame(
        &mut self,
        input: &dyn InputSource,
        renderer: &mut dyn EntityRenderer,
        listener: Option<&mut dyn FrameListener>,
    ) -> FlushSummary {
        self.keys.set_all(input.pressed_keys());
        let summary = self.pump();
        if summary.ticks > 0
            && let Some(listener) = listener
        {
            listener.on_frame_tick(&self.world);
        }
        self.render(renderer);
        summary
    }

    /// Draw every held entity in arrival order.
    pub fn render(&self, renderer: &mut dyn EntityRenderer) {
        for entity in self.world.entities() {
            renderer.render(entity, &self.resources);
        }
    }

    /// Keys reported to the server with every tick.
    pub fn pressed_keys(&self) -> &PressedKeys {
        &self.keys
    }

    pub fn add_resource(&mut self, key: impl Into<String>, image: ImageHandle) {
        self.resources.images.insert(key.into(), image);
    }

    pub fn resource(&self, key: &str) -> Option<ImageHandle> {
        self.resources.resolve_image(key)
    }

    /// Address subsequent messages to game `tag` and empty the mirror.
    pub fn join_game(&self, tag: i32) {
        session::join_game(self.connection.handle(), &self.sync, &self.in_game, tag);
    }

    /// Address subsequent messages to the server itself.
    pub fn leave_game(&self) {
        session::leave_game(self.connection.handle(), &self.in_game);
    }

    pub fn in_game(&self) -> bool {
        self.in_game.load(Ordering::Acquire)
    }

    /// Current routing tag; 0 while not in a game.
    pub fn routing_tag(&self) -> i32 {
        self.connection.handle().routing_tag()
    }

    /// Leave the game and close the connection.
    pub fn close(&self) {
        self.leave_game();
        self.connection.close();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.connection.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyCode;
    use crate::messages::{ClientInfo, FullUpdate, HeartBeat, IncrementalUpdate};
    use glam::DVec2;
    use tessera_net::{
        ByteReader, ByteWriter, DecodeError, EncodeError, Inbound, TRAILER, encode_envelope,
        serve_key_exchange,
    };
    use tessera_world::{
        Delta, Entity, EntityUuid, Geometry, Patch, Renderer, Shape, Upsert, encode_entity,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

    /// Test-side view of the server end of the pipe.
    struct FakeServer {
        stream: DuplexStream,
        pending: Vec<u8>,
    }

    impl FakeServer {
        async fn send(&mut self, message: &dyn OutboundMessage) {
            let frame = encode_envelope(0, message).unwrap();
            self.stream.write_all(&frame[4..]).await.unwrap();
        }

        async fn send_raw(&mut self, bytes: &[u8]) {
            self.stream.write_all(bytes).await.unwrap();
        }

        /// Next client envelope as `(routing tag, kind, body)`.
        async fn recv(&mut self) -> (i32, String, Vec<u8>) {
            loop {
                if let Some(end) = self
                    .pending
                    .windows(TRAILER.len())
                    .position(|w| w == TRAILER)
                {
                    let envelope: Vec<u8> = self.pending.drain(..end + TRAILER.len()).collect();
                    let mut r = ByteReader::new(&envelope[..end]);
                    let tag = r.read_i32().unwrap();
                    let kind = r.read_str().unwrap();
                    let body = r.read_bytes(r.remaining()).unwrap().to_vec();
                    return (tag, kind, body);
                }
                let mut buf = [0u8; 1024];
                let n = tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut buf))
                    .await
                    .unwrap()
                    .unwrap();
                assert!(n > 0, "client closed the connection");
                self.pending.extend_from_slice(&buf[..n]);
            }
        }

        /// Skip envelopes until one of `kind` arrives.
        async fn recv_kind(&mut self, kind: &str) -> (i32, Vec<u8>) {
            loop {
                let (tag, received, body) = self.recv().await;
                if received == kind {
                    return (tag, body);
                }
            }
        }
    }

    async fn connect(builder: ClientBuilder) -> (Client, FakeServer) {
        let (client_end, mut server_end) = duplex(64 * 1024);
        let server = tokio::spawn(async move {
            serve_key_exchange(&mut server_end, &HandshakeConfig::default(), 5, 77_777)
                .await
                .unwrap();
            server_end
        });
        let client = builder
            .connect_stream(client_end, tracing::Span::none())
            .await
            .unwrap();
        let stream = server.await.unwrap();
        (
            client,
            FakeServer {
                stream,
                pending: Vec::new(),
            },
        )
    }

    fn circle(uuid: u128, is_local: bool) -> Entity {
        Entity::new(
            EntityUuid(uuid),
            Geometry {
                shape: Shape::Circle { radius: 1.0 },
                position: DVec2::new(uuid as f64, 0.0),
                rotation: 0.0,
            },
            Renderer::None,
            is_local,
        )
    }

    fn wait_for_tick(client: &mut Client) -> bool {
        tokio::task::block_in_place(|| client.wait_for_tick(Duration::from_secs(5)))
    }

    #[derive(Default)]
    struct Recorder {
        drawn: Vec<(EntityUuid, Option<ImageHandle>)>,
    }

    impl EntityRenderer for Recorder {
        fn render(&mut self, entity: &Entity, resources: &dyn ResourceResolver) {
            let image = match &entity.renderer {
                Renderer::PolyImage { resource, .. } => resources.resolve_image(resource),
                _ => None,
            };
            self.drawn.push((entity.uuid, image));
        }
    }

    struct HeldKeys(Vec<KeyCode>);

    impl InputSource for HeldKeys {
        fn pressed_keys(&self) -> Vec<KeyCode> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct TickCounter {
        ticks: usize,
        last_len: usize,
    }

    impl FrameListener for TickCounter {
        fn on_frame_tick(&mut self, world: &World) {
            self.ticks += 1;
            self.last_len = world.len();
        }
    }

    /// Game message: the server accepted a join request for game `tag`.
    struct GameJoinAnswer(i32);

    impl Inbound<Session> for GameJoinAnswer {
        fn kind(&self) -> &str {
            "gameJoinAns"
        }

        fn execute(self: Box<Self>, session: &mut Session) {
            session.join_game(self.0);
        }
    }

    impl OutboundMessage for GameJoinAnswer {
        fn kind(&self) -> &str {
            "gameJoinAns"
        }

        fn encode(&self, w: &mut ByteWriter) -> Result<(), EncodeError> {
            w.write_i32(self.0);
            Ok(())
        }
    }

    fn decode_join_answer(
        r: &mut ByteReader<'_>,
        _: &Session,
    ) -> Result<Box<dyn Inbound<Session>>, DecodeError> {
        Ok(Box::new(GameJoinAnswer(r.read_i32()?)))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_update_reaches_world_and_reports_keys() {
        let (mut client, mut server) = connect(Client::builder()).await;
        client.pressed_keys().press(KeyCode::W);

        server
            .send(&FullUpdate {
                entities: vec![circle(1, true), circle(2, false)],
            })
            .await;
        assert!(wait_for_tick(&mut client));
        assert_eq!(client.world().len(), 2);
        assert_eq!(
            client.world().local_player().map(|e| e.uuid),
            Some(EntityUuid(1))
        );

        let (tag, body) = server.recv_kind("clInfo").await;
        assert_eq!(tag, 0);
        let mut expected = ByteWriter::new();
        ClientInfo {
            keys: vec![KeyCode::W],
        }
        .encode(&mut expected)
        .unwrap();
        assert_eq!(body, expected.into_inner());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_heart_beat_is_answered() {
        let (_client, mut server) = connect(Client::builder()).await;
        server.send(&HeartBeat::request("are you there")).await;

        let (_, body) = server.recv_kind("HeartBeat").await;
        let mut r = ByteReader::new(&body);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_str().unwrap(), "are you there");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bad_delta_is_skipped_and_stream_recovers() {
        let (mut client, mut server) = connect(Client::builder()).await;
        server
            .send(&FullUpdate {
                entities: vec![circle(1, false)],
            })
            .await;
        assert!(wait_for_tick(&mut client));

        // Patch for an entity the client never saw.
        server
            .send(&IncrementalUpdate {
                delta: Delta {
                    upserts: vec![Upsert::Patch {
                        uuid: EntityUuid(99),
                        patches: vec![Patch::Rotation(1.0)],
                    }],
                    removals: vec![],
                },
            })
            .await;
        server
            .send(&IncrementalUpdate {
                delta: Delta {
                    upserts: vec![Upsert::Patch {
                        uuid: EntityUuid(1),
                        patches: vec![Patch::Position(DVec2::new(8.0, 8.0))],
                    }],
                    removals: vec![],
                },
            })
            .await;

        assert!(wait_for_tick(&mut client));
        client.pump();
        assert_eq!(client.world().server_ticks(), 2);
        let entity = client.world().get(EntityUuid(1)).unwrap();
        assert_eq!(entity.position, DVec2::new(8.0, 8.0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_garbage_before_message_is_skipped() {
        let (mut client, mut server) = connect(Client::builder()).await;
        server.send_raw(&[0x00, 0x01, b'?', 0xFF, 0x00]).await;
        server.send_raw(&TRAILER).await;
        server
            .send(&FullUpdate {
                entities: vec![circle(4, false)],
            })
            .await;
        assert!(wait_for_tick(&mut client));
        assert!(client.world().get(EntityUuid(4)).is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_join_game_from_server_message() {
        let mut builder = Client::builder();
        assert!(builder.register_message("gameJoinAns", decode_join_answer));
        let (mut client, mut server) = connect(builder).await;

        server
            .send(&FullUpdate {
                entities: vec![circle(1, false)],
            })
            .await;
        assert!(wait_for_tick(&mut client));
        assert_eq!(client.world().len(), 1);

        server.send(&GameJoinAnswer(12)).await;
        server.send(&HeartBeat::request("tagged")).await;
        let (tag, _) = server.recv_kind("HeartBeat").await;
        assert_eq!(tag, 12);
        assert!(client.in_game());

        client.pump();
        assert!(client.world().is_empty());

        client.leave_game();
        assert_eq!(client.routing_tag(), 0);
        assert!(!client.in_game());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_frame_drives_collaborators() {
        let (mut client, mut server) = connect(Client::builder()).await;
        let image = ImageHandle {
            id: 3,
            width: 100,
            height: 100,
        };
        client.add_resource("cobble", image);
        assert_eq!(client.resource("cobble"), Some(image));

        let textured = Entity::new(
            EntityUuid(7),
            Geometry {
                shape: Shape::Polygon(tessera_world::Polygon::new(vec![
                    DVec2::new(-1.0, -1.0),
                    DVec2::new(1.0, -1.0),
                    DVec2::new(0.0, 1.0),
                ])),
                position: DVec2::ZERO,
                rotation: 0.0,
            },
            Renderer::PolyImage {
                offset: DVec2::ZERO,
                width: 2.0,
                height: 2.0,
                flip: false,
                resource: "cobble".into(),
            },
            false,
        );
        server
            .send(&FullUpdate {
                entities: vec![textured, circle(8, false)],
            })
            .await;

        let mut renderer = Recorder::default();
        let mut listener = TickCounter::default();
        let input = HeldKeys(vec![KeyCode::LEFT]);
        let mut summary = FlushSummary::default();
        for _ in 0..500 {
            summary = client.frame(&input, &mut renderer, Some(&mut listener));
            if summary.ticks > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(summary.ticks, 1);
        assert_eq!(listener.ticks, 1);
        assert_eq!(listener.last_len, 2);
        assert!(client.pressed_keys().is_pressed(KeyCode::LEFT));

        let last_frame = &renderer.drawn[renderer.drawn.len() - 2..];
        assert_eq!(last_frame[0], (EntityUuid(7), Some(image)));
        assert_eq!(last_frame[1], (EntityUuid(8), None));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_disconnects() {
        let (client, _server) = connect(Client::builder()).await;
        assert!(client.is_connected());
        client.close();
        client.connection().closed().await;
        assert!(!client.is_connected());
        assert!(matches!(
            client.send(&HeartBeat::request("late")),
            Err(NetError::Closed)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropping_client_closes_transport() {
        let (client, mut server) = connect(Client::builder()).await;
        drop(client);

        let mut buf = [0u8; 256];
        loop {
            let n = tokio::time::timeout(Duration::from_secs(5), server.stream.read(&mut buf))
                .await
                .expect("transport still open after drop")
                .unwrap();
            if n == 0 {
                break;
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bad_full_update_keeps_previous_world() {
        let (mut client, mut server) = connect(Client::builder()).await;
        server
            .send(&FullUpdate {
                entities: vec![circle(1, true), circle(2, false)],
            })
            .await;
        assert!(wait_for_tick(&mut client));
        let before = client.world().entities().to_vec();

        // A full update whose last entity has an unregistered kind.
        let mut w = ByteWriter::new();
        w.write_str("fullUpdt").unwrap();
        w.write_i32(2);
        encode_entity(&mut w, &circle(5, false)).unwrap();
        w.write_i32(12345);
        w.write_f64(0.0);
        w.write_bytes(&TRAILER);
        server.send_raw(w.as_slice()).await;

        // Messages are handled in order, so the answer means the bad update
        // has been dealt with.
        server.send(&HeartBeat::request("after")).await;
        server.recv_kind("HeartBeat").await;

        let summary = client.pump();
        assert_eq!(summary.ticks, 0);
        assert_eq!(summary.applied, 0);
        assert_eq!(client.world().entities(), &before[..]);
        assert_eq!(client.world().server_ticks(), 1);
        assert_eq!(
            client.world().local_player().map(|e| e.uuid),
            Some(EntityUuid(1))
        );
    }

    #[test]
    fn test_builder_from_config() {
        let mut config = Config::default();
        config.network.inbound_routing_tag = true;
        assert!(ClientBuilder::from_config(&config).is_ok());

        config.handshake.prime = "not a number".to_string();
        assert!(matches!(
            ClientBuilder::from_config(&config),
            Err(ClientError::Handshake(_))
        ));
    }

    #[test]
    fn test_builtin_message_cannot_be_overridden() {
        let mut builder = Client::builder();
        assert!(!builder.register_message("HeartBeat", decode_join_answer));
    }
}
