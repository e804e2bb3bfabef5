//! Per-conversation presence tracking.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::{
    backend::{PresenceEvent, Subscription},
    client::ChatClientInner,
    error::Result,
    models::{Activity, ConversationId, PresenceRecord, Session, UserId},
};

/// Connection state of a [`PresenceTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    Disconnected,
    Connecting,
    Tracking,
}

/// Whether the conversation is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Publishes this client's presence on a conversation channel and mirrors
/// the presence set of everyone else on it.
///
/// Online status is derived from set membership plus heartbeat freshness;
/// there is no separate flag.
#[derive(Debug)]
pub struct PresenceTracker {
    client: Arc<ChatClientInner>,
    conversation_id: ConversationId,
    channel: String,
    me: Session,
    state: PresenceState,
    visibility: Visibility,
    peers: HashMap<UserId, PresenceRecord>,
    departed: HashMap<UserId, DateTime<Utc>>,
    events: Option<Subscription<PresenceEvent>>,
    heartbeat: Option<Interval>,
}

impl PresenceTracker {
    pub(crate) fn new(client: Arc<ChatClientInner>, conversation_id: ConversationId, me: Session) -> Self {
        let channel = client.config.presence_channel(conversation_id.as_str());
        Self {
            client,
            conversation_id,
            channel,
            me,
            state: PresenceState::Disconnected,
            visibility: Visibility::Visible,
            peers: HashMap::new(),
            departed: HashMap::new(),
            events: None,
            heartbeat: None,
        }
    }

    /// Subscribe to the presence channel and announce ourselves.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != PresenceState::Disconnected {
            return Ok(());
        }
        self.state = PresenceState::Connecting;

        let events = match self.client.realtime.subscribe_presence(&self.channel).await {
            Ok(events) => events,
            Err(e) => {
                log::error!("presence subscribe on {} failed: {}", self.channel, e);
                self.state = PresenceState::Disconnected;
                return Err(e);
            }
        };
        self.events = Some(events);

        let record = PresenceRecord::heartbeat(self.me.id.clone(), self.me.name.clone(), self.client.clock.now());
        if let Err(e) = self.client.realtime.track_presence(&self.channel, &record).await {
            log::error!("presence track on {} failed: {}", self.channel, e);
            self.events = None;
            self.state = PresenceState::Disconnected;
            return Err(e);
        }

        self.state = PresenceState::Tracking;
        if self.visibility == Visibility::Visible {
            self.start_heartbeat();
        }
        log::debug!("tracking presence of {} on {}", self.me.id, self.channel);
        Ok(())
    }

    /// Republish our record with a fresh heartbeat.
    ///
    /// Does nothing unless tracking and visible.
    pub async fn heartbeat(&mut self) -> Result<()> {
        if self.state != PresenceState::Tracking || self.visibility != Visibility::Visible {
            return Ok(());
        }
        let record = PresenceRecord::heartbeat(self.me.id.clone(), self.me.name.clone(), self.client.clock.now());
        self.client.realtime.track_presence(&self.channel, &record).await
    }

    /// React to the document becoming visible or hidden.
    ///
    /// Going hidden publishes one last record carrying `last_active_at` and
    /// stops the heartbeat; becoming visible again resumes it.
    pub async fn set_visibility(&mut self, visibility: Visibility) -> Result<()> {
        if self.visibility == visibility {
            return Ok(());
        }
        self.visibility = visibility;
        if self.state != PresenceState::Tracking {
            return Ok(());
        }

        match visibility {
            Visibility::Hidden => {
                self.heartbeat = None;
                let now = self.client.clock.now();
                let mut record = PresenceRecord::heartbeat(self.me.id.clone(), self.me.name.clone(), now);
                record.last_active_at = Some(now);
                self.client.realtime.track_presence(&self.channel, &record).await
            }
            Visibility::Visible => {
                self.start_heartbeat();
                self.heartbeat().await
            }
        }
    }

    /// Retract our record and unsubscribe.
    pub async fn disconnect(&mut self) -> Result<()> {
        let was_tracking = self.state == PresenceState::Tracking;
        self.state = PresenceState::Disconnected;
        self.heartbeat = None;

        let result = if was_tracking {
            self.client
                .realtime
                .untrack_presence(&self.channel, &self.me.id)
                .await
                .map_err(|e| {
                    log::warn!("presence untrack on {} failed: {}", self.channel, e);
                    e
                })
        } else {
            Ok(())
        };

        if let Some(mut events) = self.events.take() {
            events.close();
        }
        self.peers.clear();
        result
    }

    /// Apply one presence event to the mirrored set.
    pub fn apply(&mut self, event: &PresenceEvent) {
        match event {
            PresenceEvent::Sync(records) => {
                let now = self.client.clock.now();
                for (id, record) in self.peers.drain() {
                    if !records.iter().any(|r| r.user_id == id) {
                        self.departed.insert(id, record.last_seen().max(now));
                    }
                }
                for record in records {
                    self.departed.remove(&record.user_id);
                    self.peers.insert(record.user_id.clone(), record.clone());
                }
            }
            PresenceEvent::Join(record) => {
                self.departed.remove(&record.user_id);
                self.peers.insert(record.user_id.clone(), record.clone());
            }
            PresenceEvent::Leave(user) => {
                if let Some(record) = self.peers.remove(user) {
                    let now = self.client.clock.now();
                    self.departed.insert(user.clone(), record.last_seen().max(now));
                }
            }
        }
    }

    /// Drive the tracker: wait for the next presence event, sending
    /// heartbeats whenever the interval elapses in the meantime.
    ///
    /// Returns `None` once disconnected.
    pub async fn next_event(&mut self) -> Option<PresenceEvent> {
        loop {
            let events = self.events.as_mut()?;
            let heartbeat = &mut self.heartbeat;
            tokio::select! {
                event = events.recv() => {
                    return match event {
                        Some(event) => {
                            self.apply(&event);
                            Some(event)
                        }
                        None => {
                            log::debug!("presence channel {} ended", self.channel);
                            self.events = None;
                            self.heartbeat = None;
                            self.state = PresenceState::Disconnected;
                            None
                        }
                    };
                }
                _ = tick(heartbeat) => {
                    if let Err(e) = self.heartbeat().await {
                        log::warn!("presence heartbeat on {} failed: {}", self.channel, e);
                    }
                }
            }
        }
    }

    /// Apply every event that has already arrived, without waiting.
    pub fn drain_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.events.as_mut().and_then(|s| s.try_recv()) {
            self.apply(&event);
            applied += 1;
        }
        applied
    }

    /// Whether `user` has an unexpired heartbeat in the set.
    pub fn is_online(&self, user: &UserId) -> bool {
        let now = self.client.clock.now();
        self.peers
            .get(user)
            .map_or(false, |r| r.is_fresh(now, self.ttl()))
    }

    /// Users currently online, excluding ourselves.
    pub fn online_users(&self) -> Vec<&PresenceRecord> {
        let now = self.client.clock.now();
        let mut users: Vec<_> = self
            .peers
            .values()
            .filter(|r| r.user_id != self.me.id && r.is_fresh(now, self.ttl()))
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }

    /// Recency bucket for `user`, if we have ever seen them.
    pub fn activity(&self, user: &UserId) -> Option<Activity> {
        let now = self.client.clock.now();
        if let Some(record) = self.peers.get(user) {
            if record.is_fresh(now, self.ttl()) && record.last_active_at.is_none() {
                return Some(Activity::Now);
            }
            return Some(Activity::since(record.last_seen(), now));
        }
        self.departed.get(user).map(|at| Activity::since(*at, now))
    }

    /// Current connection state.
    pub fn state(&self) -> PresenceState {
        self.state
    }

    /// Current visibility.
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Conversation this tracker belongs to.
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    fn ttl(&self) -> Duration {
        Duration::from_std(self.client.config.presence_ttl).unwrap_or_else(|_| Duration::days(365))
    }

    fn start_heartbeat(&mut self) {
        let period = self.client.config.heartbeat_interval;
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(interval);
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, Realtime};
    use crate::clock::ManualClock;
    use crate::models::UserProfile;
    use crate::ChatClient;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn setup() -> (Arc<MemoryBackend>, Arc<ManualClock>, ChatClient) {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(t(0)));
        backend.sign_in(UserProfile::new("bob", "Bob"));
        let client = ChatClient::builder()
            .backend(backend.clone())
            .clock(clock.clone())
            .build()
            .unwrap();
        (backend, clock, client)
    }

    #[tokio::test]
    async fn test_connect_announces_self() {
        let (backend, _clock, client) = setup();
        let mut watcher = backend.subscribe_presence("presence:c1").await.unwrap();
        let mut tracker = client.presence("c1").await.unwrap();

        assert_eq!(tracker.state(), PresenceState::Disconnected);
        tracker.connect().await.unwrap();
        assert_eq!(tracker.state(), PresenceState::Tracking);

        assert_eq!(watcher.try_recv(), Some(PresenceEvent::Sync(vec![])));
        match watcher.try_recv() {
            Some(PresenceEvent::Join(record)) => {
                assert_eq!(record.user_id, UserId::from("bob"));
                assert_eq!(record.online_at, t(0));
            }
            other => panic!("expected join, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_peer_online_until_untracked() {
        let (backend, clock, client) = setup();
        let mut tracker = client.presence("c1").await.unwrap();
        tracker.connect().await.unwrap();

        let peer = PresenceRecord::heartbeat("x", "Xavier", t(0));
        backend.track_presence("presence:c1", &peer).await.unwrap();
        tracker.drain_pending();
        assert!(tracker.is_online(&"x".into()));
        assert_eq!(tracker.activity(&"x".into()), Some(Activity::Now));

        clock.advance(Duration::seconds(120));
        backend.untrack_presence("presence:c1", &"x".into()).await.unwrap();
        tracker.drain_pending();
        assert!(!tracker.is_online(&"x".into()));
        assert_eq!(tracker.activity(&"x".into()), Some(Activity::Now));

        clock.advance(Duration::minutes(5));
        assert_eq!(tracker.activity(&"x".into()), Some(Activity::MinutesAgo(5)));
    }

    #[tokio::test]
    async fn test_stale_heartbeat_is_offline() {
        let (backend, clock, client) = setup();
        let mut tracker = client.presence("c1").await.unwrap();
        tracker.connect().await.unwrap();

        backend
            .track_presence("presence:c1", &PresenceRecord::heartbeat("x", "Xavier", t(0)))
            .await
            .unwrap();
        tracker.drain_pending();

        clock.advance(Duration::seconds(90));
        assert!(!tracker.is_online(&"x".into()));
        assert_eq!(tracker.activity(&"x".into()), Some(Activity::MinutesAgo(1)));
        assert!(tracker.online_users().is_empty());
    }

    #[tokio::test]
    async fn test_hidden_publishes_last_active() {
        let (backend, clock, client) = setup();
        let mut tracker = client.presence("c1").await.unwrap();
        tracker.connect().await.unwrap();
        let mut watcher = backend.subscribe_presence("presence:c1").await.unwrap();
        watcher.try_recv();

        clock.advance(Duration::seconds(10));
        tracker.set_visibility(Visibility::Hidden).await.unwrap();

        match watcher.try_recv() {
            Some(PresenceEvent::Join(record)) => assert_eq!(record.last_active_at, Some(t(10))),
            other => panic!("expected join, got {:?}", other),
        }

        // Heartbeats are quiet while hidden.
        tracker.heartbeat().await.unwrap();
        assert_eq!(watcher.try_recv(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_visible_again_republishes_and_resumes_heartbeat() {
        let (backend, clock, client) = setup();
        let mut tracker = client.presence("c1").await.unwrap();
        tracker.connect().await.unwrap();
        tracker.set_visibility(Visibility::Hidden).await.unwrap();
        let mut watcher = backend.subscribe_presence("presence:c1").await.unwrap();
        watcher.try_recv();

        clock.advance(Duration::seconds(40));
        tracker.set_visibility(Visibility::Visible).await.unwrap();
        match watcher.try_recv() {
            Some(PresenceEvent::Join(record)) => {
                assert_eq!(record.online_at, t(40));
                assert_eq!(record.last_active_at, None);
            }
            other => panic!("expected join, got {:?}", other),
        }

        tracker.drain_pending();
        clock.advance(Duration::seconds(30));
        match tracker.next_event().await {
            Some(PresenceEvent::Join(record)) => assert_eq!(record.online_at, t(70)),
            other => panic!("expected heartbeat echo, got {:?}", other),
        }
        assert!(matches!(watcher.try_recv(), Some(PresenceEvent::Join(_))));
    }

    #[tokio::test]
    async fn test_disconnect_retracts() {
        let (backend, _clock, client) = setup();
        let mut tracker = client.presence("c1").await.unwrap();
        tracker.connect().await.unwrap();
        let mut watcher = backend.subscribe_presence("presence:c1").await.unwrap();
        watcher.try_recv();

        tracker.disconnect().await.unwrap();
        assert_eq!(tracker.state(), PresenceState::Disconnected);
        assert_eq!(watcher.try_recv(), Some(PresenceEvent::Leave("bob".into())));
        assert_eq!(tracker.next_event().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_interval_republishes() {
        let (backend, clock, client) = setup();
        let mut tracker = client.presence("c1").await.unwrap();
        tracker.connect().await.unwrap();

        let mut watcher = backend.subscribe_presence("presence:c1").await.unwrap();
        watcher.try_recv();
        clock.advance(Duration::seconds(30));

        // Nothing else arrives on the tracker's own channel besides its
        // heartbeat, so the first event it sees is that heartbeat's echo.
        tracker.drain_pending();
        let event = tracker.next_event().await;
        match event {
            Some(PresenceEvent::Join(record)) => assert_eq!(record.online_at, t(30)),
            other => panic!("expected heartbeat echo, got {:?}", other),
        }
        assert!(matches!(watcher.try_recv(), Some(PresenceEvent::Join(_))));
    }
}
