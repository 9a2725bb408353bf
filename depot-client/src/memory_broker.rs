use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};

use crate::broker::{
    BindingSpec, BrokerChannel, BrokerConnection, BrokerConnector, BrokerResult, Delivery,
    DeliveryAcker, DeliveryStream, ExchangeSpec, QueueSpec,
};
use crate::connection_options::ConnectionOptions;
use crate::errors::BrokerError;

/// Upper bound on how long an idle subscription waits before re-checking
/// its queue (TTL expiry does not notify).
const DELIVERY_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// MemoryBroker is an in-process broker with RabbitMQ semantics for direct
/// exchanges: bindings, per-queue TTL, dead-lettering, prefetch and requeue
/// of unacknowledged deliveries when their channel goes away.
/// SHOULD BE USED ONLY FOR TESTING PURPOSES
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, MemoryQueue>,
    bindings: Vec<BindingSpec>,
    connections: HashSet<u64>,
    channels: HashMap<u64, ChannelState>,
    last_id: u64,
    last_delivery_tag: u64,
    connect_attempts: usize,
    refuse_connections: usize,
    fail_publishes: usize,
    unavailable: bool,
    settle_delay: Duration,
}

#[derive(Debug)]
struct ChannelState {
    connection_id: u64,
    prefetch: u16,
}

#[derive(Debug)]
struct MemoryQueue {
    spec: QueueSpec,
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, Unacked>,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    routing_key: String,
    enqueued_at: Instant,
    redelivered: bool,
}

#[derive(Debug)]
struct Unacked {
    channel_id: u64,
    message: StoredMessage,
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    fn channel_open(&self, channel_id: u64) -> bool {
        self.channels
            .get(&channel_id)
            .is_some_and(|channel| self.connections.contains(&channel.connection_id))
    }

    fn ensure_channel(&self, channel_id: u64) -> BrokerResult<()> {
        if self.channel_open(channel_id) {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed(format!("channel {} is closed", channel_id)))
        }
    }

    /// A broker-side error closes the channel it happened on.
    fn fail_channel(&mut self, channel_id: u64, error: BrokerError) -> BrokerError {
        self.close_channel(channel_id);
        error
    }

    fn close_channel(&mut self, channel_id: u64) {
        if self.channels.remove(&channel_id).is_none() {
            return;
        }
        for queue in self.queues.values_mut() {
            let mut tags: Vec<u64> = queue
                .unacked
                .iter()
                .filter(|(_, unacked)| unacked.channel_id == channel_id)
                .map(|(tag, _)| *tag)
                .collect();
            // highest tag first so the oldest delivery ends up at the head
            tags.sort_unstable_by(|a, b| b.cmp(a));
            for tag in tags {
                if let Some(unacked) = queue.unacked.remove(&tag) {
                    let mut message = unacked.message;
                    message.redelivered = true;
                    queue.ready.push_front(message);
                }
            }
        }
    }

    fn close_connection(&mut self, connection_id: u64) {
        self.connections.remove(&connection_id);
        let channel_ids: Vec<u64> = self
            .channels
            .iter()
            .filter(|(_, channel)| channel.connection_id == connection_id)
            .map(|(id, _)| *id)
            .collect();
        for channel_id in channel_ids {
            self.close_channel(channel_id);
        }
    }

    fn route(&mut self, exchange: &str, routing_key: &str, message: StoredMessage) {
        let targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|binding| binding.exchange == exchange && binding.routing_key == routing_key)
            .map(|binding| binding.queue.clone())
            .collect();
        for target in targets {
            if let Some(queue) = self.queues.get_mut(&target) {
                queue.ready.push_back(message.clone());
            }
        }
    }

    fn dead_letter(&mut self, dead_letter_exchange: Option<String>, message: StoredMessage, now: Instant) {
        let Some(dlx) = dead_letter_exchange else {
            return;
        };
        if !self.exchanges.contains_key(&dlx) {
            return;
        }
        let routing_key = message.routing_key.clone();
        let message = StoredMessage {
            enqueued_at: now,
            redelivered: false,
            ..message
        };
        self.route(&dlx, &routing_key, message);
    }

    /// Dead-letters messages whose TTL ran out while waiting at the head.
    fn expire(&mut self, now: Instant) {
        let mut expired = Vec::new();
        for queue in self.queues.values_mut() {
            let Some(ttl) = queue.spec.message_ttl_ms else {
                continue;
            };
            let ttl = Duration::from_millis(u64::from(ttl));
            while queue
                .ready
                .front()
                .is_some_and(|message| message.enqueued_at + ttl <= now)
            {
                if let Some(message) = queue.ready.pop_front() {
                    expired.push((queue.spec.dead_letter_exchange.clone(), message));
                }
            }
        }
        for (dlx, message) in expired {
            self.dead_letter(dlx, message, now);
        }
    }

    fn try_deliver(
        &mut self,
        channel_id: u64,
        queue_name: &str,
        now: Instant,
    ) -> BrokerResult<Option<(u64, StoredMessage)>> {
        self.ensure_channel(channel_id)?;
        self.expire(now);

        let prefetch = self
            .channels
            .get(&channel_id)
            .map(|channel| channel.prefetch)
            .unwrap_or_default();

        let queue = self
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| BrokerError::ChannelClosed(format!("queue '{}' was deleted", queue_name)))?;

        let in_flight = queue
            .unacked
            .values()
            .filter(|unacked| unacked.channel_id == channel_id)
            .count();
        if prefetch > 0 && in_flight >= usize::from(prefetch) {
            return Ok(None);
        }

        let Some(message) = queue.ready.pop_front() else {
            return Ok(None);
        };
        self.last_delivery_tag += 1;
        let delivery_tag = self.last_delivery_tag;
        queue.unacked.insert(
            delivery_tag,
            Unacked {
                channel_id,
                message: message.clone(),
            },
        );
        Ok(Some((delivery_tag, message)))
    }

    fn settle(
        &mut self,
        channel_id: u64,
        queue_name: &str,
        delivery_tag: u64,
    ) -> BrokerResult<(Option<String>, StoredMessage)> {
        self.ensure_channel(channel_id)?;
        let settled = self.queues.get_mut(queue_name).and_then(|queue| {
            queue
                .unacked
                .remove(&delivery_tag)
                .map(|unacked| (queue.spec.dead_letter_exchange.clone(), unacked.message))
        });
        match settled {
            Some(settled) => Ok(settled),
            None => Err(self.fail_channel(
                channel_id,
                BrokerError::PreconditionFailed(format!("unknown delivery tag {}", delivery_tag)),
            )),
        }
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        MemoryBroker::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.shared.state()
    }

    /// Refuses the next `count` connection attempts.
    pub fn refuse_connections(&self, count: usize) {
        self.state().refuse_connections = count;
    }

    /// Fails the next `count` publishes, dropping the publishing connection.
    pub fn fail_publishes(&self, count: usize) {
        self.state().fail_publishes = count;
    }

    /// Holds every ack and nack for `delay` before the broker settles it.
    pub fn delay_settlements(&self, delay: Duration) {
        self.state().settle_delay = delay;
    }

    /// While unavailable every connection attempt fails.
    pub fn set_available(&self, available: bool) {
        self.state().unavailable = !available;
    }

    /// Drops every client connection. Durable entities and their messages
    /// survive, unacknowledged deliveries are requeued.
    pub fn restart(&self) {
        {
            let mut state = self.state();
            let connections: Vec<u64> = state.connections.iter().copied().collect();
            for connection_id in connections {
                state.close_connection(connection_id);
            }
            state.queues.retain(|_, queue| queue.spec.durable);
            state.exchanges.retain(|_, exchange| exchange.durable);
        }
        self.shared.notify.notify_waiters();
    }

    /// Publishes without a client connection, e.g. to inject a raw body.
    pub fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> BrokerResult<()> {
        {
            let mut state = self.state();
            if !state.exchanges.contains_key(exchange) {
                return Err(BrokerError::NotFound(format!("no exchange '{}'", exchange)));
            }
            let message = StoredMessage {
                payload: payload.to_vec(),
                routing_key: routing_key.to_string(),
                enqueued_at: Instant::now(),
                redelivered: false,
            };
            state.route(exchange, routing_key, message);
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    /// Messages ready for delivery on `queue`.
    pub fn queue_depth(&self, queue: &str) -> usize {
        let mut state = self.state();
        state.expire(Instant::now());
        state.queues.get(queue).map_or(0, |queue| queue.ready.len())
    }

    /// Bodies of the messages ready on `queue`, head first.
    pub fn queue_messages(&self, queue: &str) -> Vec<Vec<u8>> {
        let mut state = self.state();
        state.expire(Instant::now());
        state.queues.get(queue).map_or_else(Vec::new, |queue| {
            queue.ready.iter().map(|message| message.payload.clone()).collect()
        })
    }

    pub fn unacked_count(&self, queue: &str) -> usize {
        self.state()
            .queues
            .get(queue)
            .map_or(0, |queue| queue.unacked.len())
    }

    pub fn exchange(&self, name: &str) -> Option<ExchangeSpec> {
        self.state().exchanges.get(name).cloned()
    }

    pub fn queue(&self, name: &str) -> Option<QueueSpec> {
        self.state().queues.get(name).map(|queue| queue.spec.clone())
    }

    pub fn bindings(&self) -> Vec<BindingSpec> {
        self.state().bindings.clone()
    }

    /// Connection attempts seen so far, refused ones included.
    pub fn connect_attempts(&self) -> usize {
        self.state().connect_attempts
    }

    pub fn open_connections(&self) -> usize {
        self.state().connections.len()
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(&self, _options: &ConnectionOptions) -> BrokerResult<Arc<dyn BrokerConnection>> {
        let mut state = self.state();
        state.connect_attempts += 1;
        if state.refuse_connections > 0 {
            state.refuse_connections -= 1;
            return Err(BrokerError::Io("connection refused".to_string()));
        }
        if state.unavailable {
            return Err(BrokerError::Io("broker unavailable".to_string()));
        }
        let id = state.next_id();
        state.connections.insert(id);
        Ok(Arc::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
            id,
        }))
    }
}

struct MemoryConnection {
    shared: Arc<Shared>,
    id: u64,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn create_channel(&self) -> BrokerResult<Arc<dyn BrokerChannel>> {
        let mut state = self.shared.state();
        if !state.connections.contains(&self.id) {
            return Err(BrokerError::ConnectionClosed(format!(
                "connection {} is closed",
                self.id
            )));
        }
        let id = state.next_id();
        state.channels.insert(
            id,
            ChannelState {
                connection_id: self.id,
                prefetch: 0,
            },
        );
        Ok(Arc::new(MemoryChannel {
            shared: Arc::clone(&self.shared),
            id,
        }))
    }

    fn is_open(&self) -> bool {
        self.shared.state().connections.contains(&self.id)
    }

    async fn close(&self) -> BrokerResult<()> {
        self.shared.state().close_connection(self.id);
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

struct MemoryChannel {
    shared: Arc<Shared>,
    id: u64,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn exchange_declare(&self, exchange: &ExchangeSpec) -> BrokerResult<()> {
        let mut state = self.shared.state();
        state.ensure_channel(self.id)?;
        match state.exchanges.get(&exchange.name) {
            Some(existing) if existing != exchange => Err(state.fail_channel(
                self.id,
                BrokerError::PreconditionFailed(format!(
                    "inequivalent arguments for exchange '{}'",
                    exchange.name
                )),
            )),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(exchange.name.clone(), exchange.clone());
                Ok(())
            }
        }
    }

    async fn exchange_delete(&self, name: &str) -> BrokerResult<()> {
        let mut state = self.shared.state();
        state.ensure_channel(self.id)?;
        if state.exchanges.remove(name).is_none() {
            return Err(state.fail_channel(
                self.id,
                BrokerError::NotFound(format!("no exchange '{}'", name)),
            ));
        }
        state.bindings.retain(|binding| binding.exchange != name);
        Ok(())
    }

    async fn queue_declare(&self, queue: &QueueSpec) -> BrokerResult<()> {
        let mut state = self.shared.state();
        state.ensure_channel(self.id)?;
        match state.queues.get(&queue.name) {
            Some(existing) if existing.spec != *queue => Err(state.fail_channel(
                self.id,
                BrokerError::PreconditionFailed(format!(
                    "inequivalent arguments for queue '{}'",
                    queue.name
                )),
            )),
            Some(_) => Ok(()),
            None => {
                state.queues.insert(
                    queue.name.clone(),
                    MemoryQueue {
                        spec: queue.clone(),
                        ready: VecDeque::new(),
                        unacked: HashMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn queue_delete(&self, name: &str) -> BrokerResult<()> {
        let mut state = self.shared.state();
        state.ensure_channel(self.id)?;
        if state.queues.remove(name).is_none() {
            return Err(state.fail_channel(
                self.id,
                BrokerError::NotFound(format!("no queue '{}'", name)),
            ));
        }
        state.bindings.retain(|binding| binding.queue != name);
        drop(state);
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn queue_bind(&self, binding: &BindingSpec) -> BrokerResult<()> {
        let mut state = self.shared.state();
        state.ensure_channel(self.id)?;
        if !state.exchanges.contains_key(&binding.exchange) {
            return Err(state.fail_channel(
                self.id,
                BrokerError::NotFound(format!("no exchange '{}'", binding.exchange)),
            ));
        }
        if !state.queues.contains_key(&binding.queue) {
            return Err(state.fail_channel(
                self.id,
                BrokerError::NotFound(format!("no queue '{}'", binding.queue)),
            ));
        }
        if !state.bindings.contains(binding) {
            state.bindings.push(binding.clone());
        }
        Ok(())
    }

    async fn confirm_select(&self) -> BrokerResult<()> {
        self.shared.state().ensure_channel(self.id)
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        _persistent: bool,
    ) -> BrokerResult<()> {
        {
            let mut state = self.shared.state();
            state.ensure_channel(self.id)?;

            if state.fail_publishes > 0 {
                state.fail_publishes -= 1;
                if let Some(connection_id) = state.channels.get(&self.id).map(|c| c.connection_id) {
                    state.close_connection(connection_id);
                }
                return Err(BrokerError::ConnectionClosed(
                    "connection reset during publish".to_string(),
                ));
            }

            if !state.exchanges.contains_key(exchange) {
                return Err(state.fail_channel(
                    self.id,
                    BrokerError::NotFound(format!("no exchange '{}'", exchange)),
                ));
            }

            let message = StoredMessage {
                payload: payload.to_vec(),
                routing_key: routing_key.to_string(),
                enqueued_at: Instant::now(),
                redelivered: false,
            };
            state.route(exchange, routing_key, message);
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn basic_qos(&self, prefetch_count: u16) -> BrokerResult<()> {
        let mut state = self.shared.state();
        state.ensure_channel(self.id)?;
        if let Some(channel) = state.channels.get_mut(&self.id) {
            channel.prefetch = prefetch_count;
        }
        Ok(())
    }

    async fn basic_consume(&self, queue: &str, _consumer_tag: &str) -> BrokerResult<DeliveryStream> {
        {
            let mut state = self.shared.state();
            state.ensure_channel(self.id)?;
            if !state.queues.contains_key(queue) {
                return Err(state.fail_channel(
                    self.id,
                    BrokerError::NotFound(format!("no queue '{}'", queue)),
                ));
            }
        }

        let subscription = Some((Arc::clone(&self.shared), self.id, queue.to_string()));
        let deliveries = futures::stream::unfold(subscription, |subscription| async move {
            let (shared, channel_id, queue) = subscription?;
            loop {
                let waker = Arc::clone(&shared);
                let notified = waker.notify.notified();

                let polled = shared.state().try_deliver(channel_id, &queue, Instant::now());
                match polled {
                    Ok(Some((delivery_tag, message))) => {
                        let acker = MemoryAcker {
                            shared: Arc::clone(&shared),
                            queue: queue.clone(),
                            channel_id,
                            delivery_tag,
                        };
                        let delivery = Delivery::new(
                            delivery_tag,
                            message.redelivered,
                            message.payload,
                            Box::new(acker),
                        );
                        return Some((Ok(delivery), Some((shared, channel_id, queue))));
                    }
                    Ok(None) => {}
                    Err(error) => return Some((Err(error), None)),
                }

                tokio::select! {
                    _ = notified => {}
                    _ = tokio::time::sleep(DELIVERY_POLL_INTERVAL) => {}
                }
            }
        });
        Ok(Box::pin(deliveries))
    }

    fn is_open(&self) -> bool {
        self.shared.state().channel_open(self.id)
    }

    async fn close(&self) -> BrokerResult<()> {
        self.shared.state().close_channel(self.id);
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    queue: String,
    channel_id: u64,
    delivery_tag: u64,
}

impl MemoryAcker {
    async fn hold(&self) {
        let delay = self.shared.state().settle_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl DeliveryAcker for MemoryAcker {
    async fn ack(&self) -> BrokerResult<()> {
        self.hold().await;
        self.shared
            .state()
            .settle(self.channel_id, &self.queue, self.delivery_tag)?;
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> BrokerResult<()> {
        self.hold().await;
        {
            let mut state = self.shared.state();
            let (dlx, mut message) = state.settle(self.channel_id, &self.queue, self.delivery_tag)?;
            if requeue {
                message.redelivered = true;
                if let Some(queue) = state.queues.get_mut(&self.queue) {
                    queue.ready.push_front(message);
                }
            } else {
                state.dead_letter(dlx, message, Instant::now());
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}
