//! Quorum Device Adapter
//!
//! An external arbitrator registered as the pseudo-node with id 0. It is
//! never a transport member; its votes count while it keeps polling.

use crate::error::{Error, Result};
use crate::protocol::ipc::MAX_QDEVICE_NAME_LEN;
use crate::protocol::QdeviceInfo;
use crate::state::NodeState;

use super::{QuorumEngine, TimerKind};

impl QuorumEngine {
    /// Register the quorum device with `votes`; it starts out dead
    pub fn quorum_device_register(&mut self, name: &str, votes: u32) -> Result<()> {
        if name.len() > MAX_QDEVICE_NAME_LEN {
            return Err(Error::InvalidParameter(format!(
                "quorum device name is {} bytes, limit is {}",
                name.len(),
                MAX_QDEVICE_NAME_LEN
            )));
        }
        self.registry.insert_quorum_device(votes)?;
        self.device_name = Some(name.to_string());
        tracing::info!("Registered quorum device '{}' with {} votes", name, votes);
        Ok(())
    }

    /// Remove the quorum device and recalculate without its votes
    pub fn quorum_device_unregister(&mut self) -> Result<()> {
        if self.registry.remove_quorum_device().is_none() {
            return Err(Error::NotFound("no quorum device registered".into()));
        }
        self.disarm_timer(TimerKind::QuorumDevice);
        self.quorum_members.retain(|&id| id != crate::state::QUORUM_DEVICE_ID);
        if let Some(name) = self.device_name.take() {
            tracing::info!("Unregistered quorum device '{}'", name);
        }
        self.recalculate(false, false);
        Ok(())
    }

    /// Liveness report from the quorum device
    pub fn quorum_device_poll(&mut self, alive: bool) -> Result<()> {
        let device = self
            .registry
            .quorum_device_mut()
            .ok_or_else(|| Error::NotFound("no quorum device registered".into()))?;

        if alive {
            device.touch();
            if device.state == NodeState::Dead {
                device.state = NodeState::Member;
                self.recalculate(false, false);
            }
            let poll = self.settings.quorumdev_poll();
            self.arm_timer(TimerKind::QuorumDevice, poll);
        } else if device.state == NodeState::Member {
            device.state = NodeState::Dead;
            self.recalculate(false, false);
            self.disarm_timer(TimerKind::QuorumDevice);
        }
        Ok(())
    }

    /// Name, votes and liveness of the registered device
    pub fn quorum_device_info(&self) -> Result<QdeviceInfo> {
        let device = self
            .registry
            .quorum_device()
            .ok_or_else(|| Error::NotFound("no quorum device registered".into()))?;
        Ok(QdeviceInfo {
            name: self.device_name.clone().unwrap_or_default(),
            votes: device.votes,
            alive: device.is_member(),
        })
    }

    pub(super) fn on_quorum_device_timer(&mut self) {
        let poll = self.settings.quorumdev_poll();
        let Some(device) = self.registry.quorum_device_mut() else {
            return;
        };
        // A dead device is re-armed by its next poll
        if !device.is_member() {
            return;
        }

        if device.hello_expired(poll) {
            device.state = NodeState::Dead;
            tracing::info!("lost contact with quorum device");
            self.recalculate(false, false);
        } else {
            self.arm_timer(TimerKind::QuorumDevice, poll);
        }
    }
}
