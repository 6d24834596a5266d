pub mod hub;
pub mod seed;
pub mod ws;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use hassdash_api::device::DeviceList;
use hassdash_api::entity::{Domain, EntityState};
use hassdash_api::snapshot::{Bucket, Snapshot};

use crate::backend::StateSource;
use crate::command::{ClimateUpdate, Command, CommandRouter, LightAction, LightOptions};
use crate::config::SyncSettings;
use crate::error::{ApiError, ApiResult};

pub use self::hub::Subscription;
pub use self::ws::{ConnectionState, ReconnectPolicy};

#[derive(Clone, Debug)]
pub struct SyncOptions {
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub connect_timeout: Duration,
    /// Ids without a domain prefix that belong in the binary sensor map.
    pub legacy_binary_sensors: HashSet<String>,
    pub reconcile_on_failure: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: ReconnectPolicy::DEFAULT_DELAY,
            max_reconnect_attempts: ReconnectPolicy::DEFAULT_MAX_ATTEMPTS,
            connect_timeout: ReconnectPolicy::DEFAULT_CONNECT_TIMEOUT,
            legacy_binary_sensors: HashSet::new(),
            reconcile_on_failure: true,
        }
    }
}

impl From<&SyncSettings> for SyncOptions {
    fn from(value: &SyncSettings) -> Self {
        Self {
            reconnect_delay: Duration::from_secs(value.reconnect_delay_secs),
            max_reconnect_attempts: value.max_reconnect_attempts,
            connect_timeout: Duration::from_secs(value.connect_timeout_secs),
            legacy_binary_sensors: value.legacy_binary_sensors.iter().cloned().collect(),
            reconcile_on_failure: value.reconcile_on_failure,
        }
    }
}

/// What became of the remote half of a command.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    Applied {
        strategy: &'static str,
    },
    /// Every strategy failed. The optimistic state stays unless `reconciled`,
    /// in which case it was replaced by a fresh read.
    Failed {
        error: String,
        reconciled: bool,
    },
}

/// Handle on the background half of a command.
///
/// The snapshot was already updated when this was handed out. Dropping the
/// ticket does not cancel the command.
#[must_use]
pub struct CommandTicket {
    handle: JoinHandle<CommandOutcome>,
}

impl CommandTicket {
    pub async fn outcome(self) -> ApiResult<CommandOutcome> {
        Ok(self.handle.await?)
    }
}

struct Socket {
    cancel: CancellationToken,
    task: JoinHandle<u32>,
}

struct Inner {
    hub: hub::SnapshotHub,
    reader: Arc<dyn StateSource>,
    router: CommandRouter,
    options: SyncOptions,
    conn: Arc<watch::Sender<ConnectionState>>,
    socket: Mutex<Option<Socket>>,
}

/// Local mirror of the remote entity states.
///
/// Starts from seed data, is refreshed by REST pulls and live socket pushes,
/// and applies commands optimistically before sending them out.
#[derive(Clone)]
pub struct LiveSync {
    inner: Arc<Inner>,
}

impl LiveSync {
    #[must_use]
    pub fn new(reader: Arc<dyn StateSource>, router: CommandRouter, options: SyncOptions) -> Self {
        Self::with_snapshot(seed::seed_snapshot(), reader, router, options)
    }

    #[must_use]
    pub fn with_snapshot(
        snapshot: Snapshot,
        reader: Arc<dyn StateSource>,
        router: CommandRouter,
        options: SyncOptions,
    ) -> Self {
        let (conn, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                hub: hub::SnapshotHub::new(snapshot),
                reader,
                router,
                options,
                conn: Arc::new(conn),
                socket: Mutex::new(None),
            }),
        }
    }

    fn socket(&self) -> MutexGuard<'_, Option<Socket>> {
        self.inner
            .socket
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn get_current_data(&self) -> Arc<Snapshot> {
        self.inner.hub.current()
    }

    pub fn subscribe(&self, callback: impl Fn(&Arc<Snapshot>) + Send + Sync + 'static) -> Subscription {
        self.inner.hub.subscribe(callback)
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.inner.hub.watch()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.conn.borrow()
    }

    #[must_use]
    pub fn connection_watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.conn.subscribe()
    }

    /// Partition for `entity_id`: its prefix, or the binary sensor map for
    /// configured legacy ids.
    #[must_use]
    pub fn bucket_for(&self, entity_id: &str) -> Option<Bucket> {
        Bucket::for_entity(entity_id).or_else(|| {
            self.inner
                .options
                .legacy_binary_sensors
                .contains(entity_id)
                .then_some(Bucket::BinarySensor)
        })
    }

    /// Fetch `entity_ids` and replace every partition that got data.
    /// Partitions without results keep what they had, seed data included.
    pub async fn load_entities(&self, entity_ids: &[String]) -> usize {
        if entity_ids.is_empty() {
            log::info!("[sync] No configured entities to load");
            return 0;
        }

        let patch = self.inner.reader.fetch_configured(entity_ids).await;
        if patch.is_empty() {
            log::warn!(
                "[sync] Initial load via {} returned nothing, keeping current data",
                self.inner.reader.name()
            );
            return 0;
        }

        let loaded = patch.len();
        self.inner.hub.update(|snap| snap.with_patch(patch));
        log::info!("[sync] Loaded {loaded}/{} entities", entity_ids.len());
        loaded
    }

    pub async fn load_devices(&self, devices: &DeviceList) -> usize {
        self.load_entities(&devices.tracked_entity_ids()).await
    }

    /// Merge one pushed update. Updates for untracked domains are dropped.
    pub fn apply_live_update(&self, state: EntityState) -> bool {
        let Some(bucket) = self.bucket_for(&state.entity_id) else {
            log::trace!("[sync] Dropping update for {}", state.entity_id);
            return false;
        };
        log::debug!("[sync] {} -> {}", state.entity_id, state.new_state);
        self.inner.hub.update(|snap| snap.with_entity(bucket, state));
        true
    }

    pub fn handle_message(&self, text: &str) -> bool {
        ws::parse_live_message(text).is_some_and(|state| self.apply_live_update(state))
    }

    /// Start the live socket, replacing any running one. The reconnect
    /// budget starts fresh.
    pub fn connect(&self, url: Url) {
        self.stop_socket();

        let cancel = CancellationToken::new();
        let policy = ReconnectPolicy::new(
            self.inner.options.reconnect_delay,
            self.inner.options.max_reconnect_attempts,
        )
        .with_connect_timeout(self.inner.options.connect_timeout);
        let conn = self.inner.conn.clone();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            ws::run(url, policy, &conn, token, move |state| {
                if let Some(inner) = weak.upgrade() {
                    Self { inner }.apply_live_update(state);
                }
            })
            .await
        });

        *self.socket() = Some(Socket { cancel, task });
    }

    fn stop_socket(&self) -> bool {
        let Some(socket) = self.socket().take() else {
            return false;
        };
        socket.cancel.cancel();
        socket.task.abort();
        true
    }

    /// Close the socket and forget every subscriber.
    pub fn disconnect(&self) {
        if self.stop_socket() {
            log::info!("[sync] Disconnected");
        }
        self.inner.hub.clear();
        self.inner.conn.send_replace(ConnectionState::Disconnected);
    }

    fn apply_optimistic(&self, bucket: Bucket, state: EntityState) {
        log::debug!(
            "[sync] Optimistic {}: {} -> {}",
            state.entity_id,
            state.old_state,
            state.new_state
        );
        self.inner.hub.update(|snap| snap.with_entity(bucket, state));
    }

    fn read_only(&self, entity_id: &str) -> bool {
        self.bucket_for(entity_id)
            .is_some_and(|bucket| matches!(bucket, Bucket::BinarySensor | Bucket::Sensor))
    }

    /// Flip a light or switch, or cycle a climate entity to its next HVAC
    /// mode.
    pub fn toggle_entity(&self, entity_id: &str) -> ApiResult<CommandTicket> {
        if self.read_only(entity_id) {
            return Err(ApiError::ReadOnlyEntity(entity_id.to_string()));
        }

        let current = self.get_current_data();
        let Some(state) = current.get(entity_id) else {
            return match Domain::of(entity_id) {
                Domain::Light | Domain::Switch | Domain::Fan => {
                    log::debug!("[sync] {entity_id} not mirrored, toggling remotely");
                    Ok(self.dispatch(Command::Toggle {
                        entity_id: entity_id.to_string(),
                    }))
                }
                _ => Err(ApiError::UnknownEntity(entity_id.to_string())),
            };
        };

        match state.domain() {
            Domain::Climate => self.update_climate_entity(
                entity_id,
                ClimateUpdate {
                    hvac_mode: Some(state.next_hvac_mode()),
                    ..ClimateUpdate::default()
                },
            ),
            _ => self.control_light(
                entity_id,
                LightAction::from_on(!state.is_on()),
                LightOptions::default(),
            ),
        }
    }

    /// Apply explicit climate changes. An empty update cycles the HVAC mode.
    pub fn update_climate_entity(
        &self,
        entity_id: &str,
        mut update: ClimateUpdate,
    ) -> ApiResult<CommandTicket> {
        if Domain::of(entity_id) != Domain::Climate {
            return Err(ApiError::NoCommandRoute(format!("climate update for {entity_id}")));
        }

        let current = self.get_current_data();
        let existing = current.get(entity_id);

        if update.is_empty() {
            let Some(state) = existing else {
                return Err(ApiError::UnknownEntity(entity_id.to_string()));
            };
            update.hvac_mode = Some(state.next_hvac_mode());
        }

        if let Some(state) = existing {
            let mode = update.hvac_mode.as_deref().unwrap_or(&state.new_state);
            let mut next = state.transitioned(mode);
            if let Some(temperature) = update.temperature {
                next.attributes.insert("temperature".to_string(), json!(temperature));
            }
            if let Some(fan_mode) = &update.fan_mode {
                next.attributes.insert("fan_mode".to_string(), json!(fan_mode));
            }
            self.apply_optimistic(Bucket::Climate, next);
        }

        Ok(self.dispatch(Command::Climate {
            entity_id: entity_id.to_string(),
            update,
        }))
    }

    /// Switch a light (or other on/off entity) to an explicit state.
    pub fn control_light(
        &self,
        entity_id: &str,
        action: LightAction,
        options: LightOptions,
    ) -> ApiResult<CommandTicket> {
        if self.read_only(entity_id) {
            return Err(ApiError::ReadOnlyEntity(entity_id.to_string()));
        }

        let current = self.get_current_data();
        if let (Some(state), Some(bucket)) = (current.get(entity_id), self.bucket_for(entity_id)) {
            let mut next = state.transitioned(action.state());
            if let Some(brightness) = options.brightness {
                next.attributes.insert("brightness".to_string(), json!(brightness));
            }
            if let Some(rgb) = options.rgb_color {
                next.attributes.insert("rgb_color".to_string(), json!(rgb));
            }
            self.apply_optimistic(bucket, next);
        }

        Ok(self.dispatch(Command::Power {
            entity_id: entity_id.to_string(),
            action,
            options,
        }))
    }

    /// Run `command` in the background. Failures are logged, and with
    /// reconciliation enabled the entity is re-read afterwards.
    fn dispatch(&self, command: Command) -> CommandTicket {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            match this.inner.router.dispatch(&command).await {
                Ok(strategy) => CommandOutcome::Applied { strategy },
                Err(err) => {
                    log::error!("[sync] Command {command} failed: {err}");
                    let reconciled = this.inner.options.reconcile_on_failure
                        && this.reconcile(command.entity_id()).await;
                    CommandOutcome::Failed {
                        error: err.to_string(),
                        reconciled,
                    }
                }
            }
        });
        CommandTicket { handle }
    }

    /// Replace the local record of `entity_id` with a fresh read.
    pub async fn reconcile(&self, entity_id: &str) -> bool {
        let Some(bucket) = self.bucket_for(entity_id) else {
            return false;
        };
        match self.inner.reader.fetch_entity(entity_id).await {
            Some(state) => {
                log::info!("[sync] Reconciled {entity_id} to {}", state.new_state);
                self.inner.hub.update(|snap| snap.with_entity(bucket, state));
                true
            }
            None => {
                log::warn!("[sync] Could not reconcile {entity_id}, keeping local state");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use hassdash_api::entity::Origin;
    use hassdash_api::snapshot::SnapshotPatch;
    use tokio::sync::Notify;

    use crate::command::tests::Recorder;
    use crate::command::{BoxStrategy, CommandStrategy};

    use super::*;

    /// Reader answering from a fixed table.
    #[derive(Default)]
    struct Table {
        states: HashMap<String, EntityState>,
        reads: AtomicUsize,
    }

    impl Table {
        fn with(states: &[EntityState]) -> Arc<Self> {
            Arc::new(Self {
                states: states
                    .iter()
                    .map(|s| (s.entity_id.clone(), s.clone()))
                    .collect(),
                reads: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl StateSource for Table {
        fn name(&self) -> &'static str {
            "table"
        }

        async fn fetch_entity(&self, entity_id: &str) -> Option<EntityState> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.states.get(entity_id).cloned()
        }

        async fn fetch_configured(&self, entity_ids: &[String]) -> SnapshotPatch {
            entity_ids
                .iter()
                .filter_map(|id| self.states.get(id).cloned())
                .collect()
        }
    }

    /// Strategy that holds every command until released.
    struct Gate {
        open: Notify,
        fail: bool,
    }

    #[async_trait]
    impl CommandStrategy for Gate {
        fn name(&self) -> &'static str {
            "gate"
        }

        async fn execute(&self, _command: &Command) -> ApiResult<()> {
            self.open.notified().await;
            if self.fail {
                Err(ApiError::Backend("rejected".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn engine(reader: Arc<Table>, direct: BoxStrategy, backend: Option<BoxStrategy>) -> LiveSync {
        let options = SyncOptions {
            legacy_binary_sensors: maplit::hashset! {"water_leak".to_string()},
            ..SyncOptions::default()
        };
        LiveSync::new(reader, CommandRouter::standard(direct, backend), options)
    }

    fn light_state(sync: &LiveSync, entity_id: &str) -> String {
        sync.get_current_data().light_data[entity_id].new_state.clone()
    }

    #[tokio::test]
    async fn optimistic_toggle_before_network() {
        let gate = Arc::new(Gate {
            open: Notify::new(),
            fail: false,
        });
        let sync = engine(Table::with(&[]), gate.clone(), None);
        assert_eq!(light_state(&sync, "light.kitchen"), "off");

        let ticket = sync.toggle_entity("light.kitchen").unwrap();
        assert_eq!(light_state(&sync, "light.kitchen"), "on");

        gate.open.notify_one();
        let outcome = ticket.outcome().await.unwrap();
        assert_eq!(outcome, CommandOutcome::Applied { strategy: "gate" });
        assert_eq!(light_state(&sync, "light.kitchen"), "on");
    }

    #[tokio::test]
    async fn failed_command_keeps_optimistic_state() {
        let gate = Arc::new(Gate {
            open: Notify::new(),
            fail: true,
        });
        let reader = Table::with(&[]);
        let sync = engine(reader.clone(), gate.clone(), None);

        let ticket = sync.toggle_entity("light.kitchen").unwrap();
        gate.open.notify_one();

        let outcome = ticket.outcome().await.unwrap();
        assert!(matches!(outcome, CommandOutcome::Failed { reconciled: false, .. }));
        assert_eq!(light_state(&sync, "light.kitchen"), "on");
        assert_eq!(reader.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_command_reconciles_from_reader() {
        let reader = Table::with(&[EntityState::new("light.kitchen", "off")]);
        let sync = engine(reader, Recorder::new("direct", true), None);

        let outcome = sync
            .toggle_entity("light.kitchen")
            .unwrap()
            .outcome()
            .await
            .unwrap();

        assert!(matches!(outcome, CommandOutcome::Failed { reconciled: true, .. }));
        let light = &sync.get_current_data().light_data["light.kitchen"];
        assert_eq!(light.new_state, "off");
        assert_eq!(light.origin, Origin::Live);
    }

    #[tokio::test]
    async fn light_falls_back_to_direct() {
        let backend = Recorder::new("backend", true);
        let direct = Recorder::new("direct", false);
        let sync = engine(Table::with(&[]), direct.clone(), Some(backend.clone()));

        let outcome = sync
            .control_light("light.living_room", LightAction::TurnOff, LightOptions::default())
            .unwrap()
            .outcome()
            .await
            .unwrap();

        assert_eq!(outcome, CommandOutcome::Applied { strategy: "direct" });
        assert_eq!(backend.calls(), 1);
        assert_eq!(light_state(&sync, "light.living_room"), "off");
    }

    #[tokio::test]
    async fn climate_cycles_hvac_mode() {
        let direct = Recorder::new("direct", false);
        let sync = engine(Table::with(&[]), direct.clone(), None);

        // seed: cool, modes off/heat/cool/fan_only/dry
        sync.toggle_entity("climate.living_room")
            .unwrap()
            .outcome()
            .await
            .unwrap();

        let ac = &sync.get_current_data().climate_data["climate.living_room"];
        assert_eq!(ac.new_state, "fan_only");
        assert_eq!(ac.old_state, "cool");

        let seen = direct.seen.lock().unwrap();
        assert_eq!(
            seen[0],
            Command::Climate {
                entity_id: "climate.living_room".to_string(),
                update: ClimateUpdate {
                    hvac_mode: Some("fan_only".to_string()),
                    ..ClimateUpdate::default()
                },
            }
        );
    }

    #[tokio::test]
    async fn explicit_climate_changes_are_applied() {
        let sync = engine(Table::with(&[]), Recorder::new("direct", false), None);

        let ticket = sync
            .update_climate_entity(
                "climate.bedroom",
                ClimateUpdate {
                    temperature: Some(19.5),
                    fan_mode: Some("low".to_string()),
                    ..ClimateUpdate::default()
                },
            )
            .unwrap();

        let ac = &sync.get_current_data().climate_data["climate.bedroom"];
        assert_eq!(ac.new_state, "off");
        assert_eq!(ac.attributes["temperature"], json!(19.5));
        assert_eq!(ac.attributes["fan_mode"], json!("low"));
        ticket.outcome().await.unwrap();
    }

    #[tokio::test]
    async fn sensors_are_read_only() {
        let direct = Recorder::new("direct", false);
        let sync = engine(Table::with(&[]), direct.clone(), None);
        sync.apply_live_update(EntityState::new("water_leak", "off"));

        for id in ["binary_sensor.front_door", "sensor.living_room_humidity", "water_leak"] {
            let err = sync.toggle_entity(id).err().unwrap();
            assert!(matches!(err, ApiError::ReadOnlyEntity(_)), "{id}");
        }
        assert!(matches!(
            sync.toggle_entity("camera.front").err().unwrap(),
            ApiError::UnknownEntity(_)
        ));
        assert_eq!(direct.calls(), 0);
    }

    #[tokio::test]
    async fn untracked_switch_is_toggled_remotely() {
        let direct = Recorder::new("direct", false);
        let sync = engine(Table::with(&[]), direct.clone(), None);
        let before = sync.get_current_data();

        sync.toggle_entity("switch.pump")
            .unwrap()
            .outcome()
            .await
            .unwrap();

        assert_eq!(*sync.get_current_data(), *before);
        assert_eq!(
            direct.seen.lock().unwrap()[0],
            Command::Toggle {
                entity_id: "switch.pump".to_string()
            }
        );
    }

    #[tokio::test]
    async fn initial_load_replaces_partitions() {
        let reader = Table::with(&[
            EntityState::new("light.kitchen", "on").with_attribute("friendly_name", "Real"),
            EntityState::new("binary_sensor.front_door", "on"),
        ]);
        let sync = engine(reader, Recorder::new("direct", false), None);

        let loaded = sync
            .load_entities(&[
                "light.kitchen".to_string(),
                "binary_sensor.front_door".to_string(),
                "climate.unknown".to_string(),
            ])
            .await;
        assert_eq!(loaded, 2);

        let snap = sync.get_current_data();
        assert_eq!(snap.light_data.len(), 1);
        let kitchen = &snap.light_data["light.kitchen"];
        assert_eq!(kitchen.new_state, "on");
        assert_eq!(kitchen.attributes["friendly_name"], json!("Real"));
        assert!(!kitchen.is_seed());
        assert_eq!(snap.binary_sensor_data.len(), 1);
        // nothing fetched, seed data stays
        assert!(snap.climate_data.values().all(EntityState::is_seed));
        assert!(!snap.climate_data.is_empty());
    }

    #[tokio::test]
    async fn failed_load_keeps_seed() {
        let sync = engine(Table::with(&[]), Recorder::new("direct", false), None);
        let before = sync.get_current_data();

        assert_eq!(sync.load_devices(&DeviceList::default()).await, 0);
        assert!(Arc::ptr_eq(&before, &sync.get_current_data()));
    }

    #[tokio::test]
    async fn live_updates_route_by_prefix_and_allowlist() {
        let sync = engine(Table::with(&[]), Recorder::new("direct", false), None);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let sub = sync.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(sync.handle_message(r#"{"entity_id":"water_leak","new_state":"on"}"#));
        assert!(sync.handle_message(r#"{"entity_id":"sensor.outdoor","new_state":"12"}"#));
        assert!(!sync.handle_message(r#"{"entity_id":"leak_sensor_2","new_state":"on"}"#));
        assert!(!sync.handle_message("not json"));

        let snap = sync.get_current_data();
        assert_eq!(snap.binary_sensor_data["water_leak"].new_state, "on");
        assert_eq!(snap.sensor_data["sensor.outdoor"].new_state, "12");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(sub.unsubscribe());
    }

    #[tokio::test]
    async fn disconnect_clears_subscribers() {
        let sync = engine(Table::with(&[]), Recorder::new("direct", false), None);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _sub = sync.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sync.connect(Url::parse("ws://127.0.0.1:1/api/ws/entities_live").unwrap());
        sync.disconnect();
        sync.apply_live_update(EntityState::new("light.kitchen", "on"));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(sync.connection_state(), ConnectionState::Disconnected);
    }
}
