//! Line-oriented status report

use std::fmt;

use tagmesh_core::{LogicalTime, NodeId};

use crate::{InputState, PeripheralStatus};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeripheralReport {
    pub name: String,
    pub status: PeripheralStatus,
}

/// Snapshot of a node's state
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusReport {
    pub node_id: NodeId,
    pub label: String,
    pub time: LogicalTime,
    /// Known peers, excluding this node
    pub peer_count: usize,
    pub peripherals: Vec<PeripheralReport>,
    pub inputs: Vec<InputState>,
}

impl StatusReport {
    /// Nodes in the mesh including this one
    #[inline]
    pub fn network_nodes(&self) -> usize {
        self.peer_count + 1
    }

    pub fn peripheral(&self, name: &str) -> Option<PeripheralStatus> {
        self.peripherals
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.status)
    }

    pub fn audio_running(&self) -> bool {
        self.peripheral("audio") == Some(PeripheralStatus::Running)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "<{}> Status Report:", self.time)?;
        writeln!(f, "\t# Of Network Nodes: {}", self.network_nodes())?;
        writeln!(f, "\tPeers: {}", self.peer_count)?;
        writeln!(
            f,
            "\tAudio Playback Status: {}",
            if self.audio_running() { "Running" } else { "Stopped" }
        )?;
        writeln!(f, "\tPeripherals:")?;
        for p in &self.peripherals {
            writeln!(f, "\t\t{}: {}", p.name, p.status)?;
        }
        writeln!(f, "\tInput States:")?;
        for input in &self.inputs {
            writeln!(f, "\t\t{}: {}", input.label, input.high as u8)?;
        }
        Ok(())
    }
}
