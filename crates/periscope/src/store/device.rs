//! Device
//!
//! Represents one physical or virtual machine hosting zero or more app
//! sessions. Device-wide plugins bind here rather than to a session;
//! host-side producers (log tailers, probes) feed them through
//! [`Device::enqueue`], which goes straight to the shared backlog.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;

use periscope_runtime::{
    MessageQueue, Plugin, PluginInstance, QueueProcessor, TimeBudgetIdler,
};
use periscope_types::{ConnectionState, DeviceIdentity, DeviceType, Envelope, PluginKey};

use crate::types::{Error, Result};

/// One known device
pub struct Device {
    identity: DeviceIdentity,
    device_type: DeviceType,
    registered_at: DateTime<Utc>,
    state: AtomicU8,

    instances: DashMap<String, Arc<PluginInstance>>,

    queue: Arc<MessageQueue>,
    processor: Arc<QueueProcessor>,
    outbound: mpsc::Sender<Envelope>,

    max_queue_size: usize,
    idle_budget: Duration,
}

impl Device {
    pub fn new(
        identity: DeviceIdentity,
        device_type: DeviceType,
        queue: Arc<MessageQueue>,
        processor: Arc<QueueProcessor>,
        outbound: mpsc::Sender<Envelope>,
        max_queue_size: usize,
        idle_budget: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            identity,
            device_type,
            registered_at: Utc::now(),
            state: AtomicU8::new(ConnectionState::Connected as u8),
            instances: DashMap::new(),
            queue,
            processor,
            outbound,
            max_queue_size,
            idle_budget,
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn serial(&self) -> &str {
        &self.identity.serial
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// The started instance for a plugin id, if any
    pub fn instance(&self, plugin_id: &str) -> Option<Arc<PluginInstance>> {
        self.instances
            .get(plugin_id)
            .map(|e| Arc::clone(e.value()))
    }

    /// Ids of all started plugin instances
    pub fn plugin_ids(&self) -> Vec<String> {
        self.instances.iter().map(|e| e.key().clone()).collect()
    }

    /// Append an envelope to the backlog of the addressed device plugin
    /// and kick a drain if the plugin is active
    pub fn enqueue(&self, envelope: Envelope) -> Result<()> {
        let Some(instance) = self.instance(&envelope.api) else {
            return Err(Error::UnsupportedPlugin(envelope.api));
        };
        let key = instance.key().clone();
        self.queue.append(&key, vec![envelope], self.max_queue_size);

        if instance.is_active() {
            let processor = Arc::clone(&self.processor);
            let queue = Arc::clone(&self.queue);
            let idle_budget = self.idle_budget;
            tokio::spawn(async move {
                let idler = TimeBudgetIdler::new(idle_budget);
                processor
                    .process_queue(&instance, &key, &queue, Some(&idler))
                    .await;
            });
        }
        Ok(())
    }

    /// Start a plugin instance on this device, activating immediately for
    /// background-eligible plugins
    pub async fn enable_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<Arc<PluginInstance>> {
        let descriptor = plugin.descriptor();
        let key = PluginKey::for_device(&self.identity, &descriptor.id);
        let instance = PluginInstance::new(plugin, key, self.outbound.clone());

        if descriptor.background {
            if let Err(e) = instance.activate().await {
                tracing::error!(
                    serial = %self.identity.serial,
                    plugin_id = %descriptor.id,
                    error = %e,
                    "device plugin activation failed"
                );
                return Err(e.into());
            }
        }

        self.instances
            .insert(descriptor.id.clone(), Arc::clone(&instance));
        tracing::info!(
            serial = %self.identity.serial,
            plugin_id = %descriptor.id,
            "device plugin enabled"
        );
        Ok(instance)
    }

    /// Activate a started instance and drain its backlog
    pub async fn activate_plugin(&self, plugin_id: &str) -> Result<usize> {
        let instance = self
            .instance(plugin_id)
            .ok_or_else(|| Error::NotFound(format!("plugin '{plugin_id}' not started")))?;

        if let Err(e) = instance.activate().await {
            tracing::error!(
                serial = %self.identity.serial,
                plugin_id,
                error = %e,
                "device plugin activation failed"
            );
            self.instances.remove(plugin_id);
            return Err(e.into());
        }

        let idler = TimeBudgetIdler::new(self.idle_budget);
        Ok(self
            .processor
            .process_queue(&instance, instance.key(), &self.queue, Some(&idler))
            .await)
    }

    /// Stop a plugin on this device, clearing its backlog
    pub async fn disable_plugin(&self, plugin_id: &str) {
        let Some((_, instance)) = self.instances.remove(plugin_id) else {
            return;
        };
        self.queue.clear(instance.key());
        instance.destroy().await;
        tracing::info!(serial = %self.identity.serial, plugin_id, "device plugin disabled");
    }

    /// Mark the device disconnected; instances persist until destroy
    pub async fn set_disconnected(&self) {
        if self.state().is_terminal() {
            return;
        }
        self.state
            .store(ConnectionState::Disconnected as u8, Ordering::SeqCst);

        let instances: Vec<_> = self.instances.iter().map(|e| Arc::clone(e.value())).collect();
        for instance in instances {
            instance.deactivate().await;
        }
        tracing::info!(serial = %self.identity.serial, "device disconnected");
    }

    /// Tear the device down, destroying all plugin instances and their
    /// backlogs. Terminal.
    pub async fn destroy(&self) {
        let previous = self
            .state
            .swap(ConnectionState::Destroyed as u8, Ordering::SeqCst);
        if ConnectionState::from_u8(previous) == ConnectionState::Destroyed {
            return;
        }

        let instances: Vec<_> = self.instances.iter().map(|e| Arc::clone(e.value())).collect();
        self.instances.clear();
        for instance in instances {
            self.queue.clear(instance.key());
            instance.destroy().await;
        }
        tracing::info!(serial = %self.identity.serial, "device destroyed");
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("serial", &self.identity.serial)
            .field("os", &self.identity.os)
            .field("state", &self.state())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use periscope_runtime::{PluginContext, PluginDescriptor, PluginResult};
    use serde_json::Value;

    struct LogPlugin {
        seen: Arc<Mutex<Vec<u64>>>,
    }

    #[async_trait]
    impl Plugin for LogPlugin {
        fn descriptor(&self) -> PluginDescriptor {
            PluginDescriptor::device("logcat", "Device Logs").background(true)
        }

        async fn on_message(
            &self,
            _ctx: &PluginContext,
            _method: &str,
            params: Value,
        ) -> PluginResult<()> {
            self.seen.lock().push(params["i"].as_u64().unwrap_or(0));
            Ok(())
        }
    }

    fn test_device() -> Arc<Device> {
        let (tx, _rx) = mpsc::channel(8);
        Device::new(
            DeviceIdentity::new("android", "Pixel 8", "SER-1"),
            DeviceType::Physical,
            Arc::new(MessageQueue::new()),
            Arc::new(QueueProcessor::new()),
            tx,
            100,
            Duration::from_millis(16),
        )
    }

    #[tokio::test]
    async fn test_enqueue_to_active_device_plugin() {
        let device = test_device();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let instance = device
            .enable_plugin(Arc::new(LogPlugin {
                seen: Arc::clone(&seen),
            }))
            .await
            .unwrap();
        assert!(instance.is_active());

        for i in 1..=3 {
            device
                .enqueue(Envelope::new("logcat", "line", serde_json::json!({ "i": i })))
                .unwrap();
        }
        // Drains run as spawned tasks; yield until they settle.
        while seen.lock().len() < 3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_enqueue_unknown_plugin_is_rejected() {
        let device = test_device();
        let result = device.enqueue(Envelope::new("nope", "line", Value::Null));
        assert!(matches!(result, Err(Error::UnsupportedPlugin(_))));
    }

    #[tokio::test]
    async fn test_destroy_is_terminal() {
        let device = test_device();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let instance = device
            .enable_plugin(Arc::new(LogPlugin { seen }))
            .await
            .unwrap();

        device.destroy().await;
        assert_eq!(device.state(), ConnectionState::Destroyed);
        assert_eq!(instance.state(), ConnectionState::Destroyed);
        assert!(device.plugin_ids().is_empty());

        device.set_disconnected().await;
        assert_eq!(device.state(), ConnectionState::Destroyed);
    }
}
