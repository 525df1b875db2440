use crate::connections::{ConnectionId, PortConnection};
use crate::error::GraphError;
use crate::port::PortId;
use crate::topology::Topology;

use super::{not_applied, GraphAction};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnectionChange {
    Connect {
        source: PortId,
        destination: PortId,
        multiplier: f32,
    },
    Disconnect(ConnectionId),
    Enable(ConnectionId),
    Disable(ConnectionId),
    ChangeMultiplier {
        connection: ConnectionId,
        multiplier: f32,
    },
}

/// Edits a single user connection.
#[derive(Debug, Clone)]
pub struct PortConnectionAction {
    change: ConnectionChange,
    // The connection as it looked when it was created or removed.
    captured: Option<PortConnection>,
    previous_enabled: Option<bool>,
    previous_multiplier: Option<f32>,
}

impl PortConnectionAction {
    pub fn new(change: ConnectionChange) -> Self {
        Self {
            change,
            captured: None,
            previous_enabled: None,
            previous_multiplier: None,
        }
    }

    pub fn connect(source: PortId, destination: PortId, multiplier: f32) -> Self {
        Self::new(ConnectionChange::Connect {
            source,
            destination,
            multiplier,
        })
    }

    pub fn disconnect(connection: ConnectionId) -> Self {
        Self::new(ConnectionChange::Disconnect(connection))
    }

    pub fn enable(connection: ConnectionId) -> Self {
        Self::new(ConnectionChange::Enable(connection))
    }

    pub fn disable(connection: ConnectionId) -> Self {
        Self::new(ConnectionChange::Disable(connection))
    }

    pub fn change_multiplier(connection: ConnectionId, multiplier: f32) -> Self {
        Self::new(ConnectionChange::ChangeMultiplier {
            connection,
            multiplier,
        })
    }

    pub fn change(&self) -> ConnectionChange {
        self.change
    }

    /// Connection the action operates on; for `Connect`, known once applied.
    pub fn connection(&self) -> Option<ConnectionId> {
        match self.change {
            ConnectionChange::Connect { .. } => self.captured.as_ref().map(|conn| conn.id),
            ConnectionChange::Disconnect(id)
            | ConnectionChange::Enable(id)
            | ConnectionChange::Disable(id) => Some(id),
            ConnectionChange::ChangeMultiplier { connection, .. } => Some(connection),
        }
    }

    fn set_enabled(
        &mut self,
        topology: &mut Topology,
        id: ConnectionId,
        enabled: bool,
    ) -> Result<(), GraphError> {
        let previous = topology.registry_mut().set_enabled(id, enabled)?;
        self.previous_enabled = Some(previous);
        Ok(())
    }
}

impl GraphAction for PortConnectionAction {
    fn label(&self) -> &'static str {
        match self.change {
            ConnectionChange::Connect { .. } => "Connect ports",
            ConnectionChange::Disconnect(_) => "Disconnect ports",
            ConnectionChange::Enable(_) => "Enable connection",
            ConnectionChange::Disable(_) => "Disable connection",
            ConnectionChange::ChangeMultiplier { .. } => "Change connection amount",
        }
    }

    fn apply(&mut self, topology: &mut Topology) -> Result<(), GraphError> {
        match self.change {
            ConnectionChange::Connect {
                source,
                destination,
                multiplier,
            } => {
                if let Some(connection) = self.captured.clone() {
                    return topology.registry_mut().restore(connection);
                }
                let id = topology
                    .registry_mut()
                    .connect(source, destination, multiplier)?;
                self.captured = topology.registry().connection(id).cloned();
                Ok(())
            }
            ConnectionChange::Disconnect(id) => {
                let connection = topology
                    .registry()
                    .connection(id)
                    .ok_or(GraphError::NotFound("connection"))?;
                if connection.locked {
                    return Err(GraphError::InvalidConnection("connection is locked"));
                }
                self.captured = Some(topology.registry_mut().disconnect(id)?);
                Ok(())
            }
            ConnectionChange::Enable(id) => self.set_enabled(topology, id, true),
            ConnectionChange::Disable(id) => self.set_enabled(topology, id, false),
            ConnectionChange::ChangeMultiplier {
                connection,
                multiplier,
            } => {
                let previous = topology
                    .registry_mut()
                    .set_multiplier(connection, multiplier)?;
                self.previous_multiplier = Some(previous);
                Ok(())
            }
        }
    }

    fn revert(&mut self, topology: &mut Topology) -> Result<(), GraphError> {
        match self.change {
            ConnectionChange::Connect { .. } => {
                let id = self.captured.as_ref().ok_or_else(not_applied)?.id;
                topology.registry_mut().disconnect(id)?;
                Ok(())
            }
            ConnectionChange::Disconnect(_) => {
                let connection = self.captured.clone().ok_or_else(not_applied)?;
                topology.registry_mut().restore(connection)
            }
            ConnectionChange::Enable(id) | ConnectionChange::Disable(id) => {
                let previous = self.previous_enabled.ok_or_else(not_applied)?;
                topology.registry_mut().set_enabled(id, previous)?;
                Ok(())
            }
            ConnectionChange::ChangeMultiplier { connection, .. } => {
                let previous = self.previous_multiplier.ok_or_else(not_applied)?;
                topology.registry_mut().set_multiplier(connection, previous)?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::port::NodeKey;
    use crate::topology::MASTER_TRACK;

    fn topology() -> Topology {
        Topology::new(&EngineConfig::new(48_000, 64).with_workers(0)).unwrap()
    }

    #[test]
    fn connect_round_trip_keeps_the_id() {
        let mut topology = topology();
        let source = PortId::output(NodeKey::HardwareInput, 0);
        let destination = PortId::input(NodeKey::TrackProcessor(MASTER_TRACK), 0);
        let mut action = PortConnectionAction::connect(source, destination, 0.5);

        action.apply(&mut topology).unwrap();
        let id = action.connection().unwrap();
        assert_eq!(topology.registry().connection(id).unwrap().multiplier, 0.5);

        action.revert(&mut topology).unwrap();
        assert!(topology.registry().find_connection(source, destination).is_none());

        action.apply(&mut topology).unwrap();
        assert_eq!(
            topology.registry().find_connection(source, destination).unwrap().id,
            id
        );
    }

    #[test]
    fn locked_connections_cannot_be_disconnected() {
        let mut topology = topology();
        let locked = topology
            .registry()
            .connections()
            .iter()
            .find(|conn| conn.locked)
            .unwrap()
            .id;
        let mut action = PortConnectionAction::disconnect(locked);
        assert_eq!(
            action.apply(&mut topology).unwrap_err(),
            GraphError::InvalidConnection("connection is locked")
        );
        assert!(topology.registry().connection(locked).is_some());
    }

    #[test]
    fn toggles_restore_previous_values() {
        let mut topology = topology();
        let id = topology.registry().connections()[0].id;

        let mut disable = PortConnectionAction::disable(id);
        disable.apply(&mut topology).unwrap();
        assert!(!topology.registry().connection(id).unwrap().enabled);
        disable.revert(&mut topology).unwrap();
        assert!(topology.registry().connection(id).unwrap().enabled);

        let mut amount = PortConnectionAction::change_multiplier(id, 0.25);
        amount.apply(&mut topology).unwrap();
        assert_eq!(topology.registry().connection(id).unwrap().multiplier, 0.25);
        amount.revert(&mut topology).unwrap();
        assert_eq!(topology.registry().connection(id).unwrap().multiplier, 1.0);
    }

    #[test]
    fn revert_before_apply_is_an_error() {
        let mut topology = topology();
        let mut action = PortConnectionAction::disconnect(ConnectionId(999));
        assert!(action.revert(&mut topology).is_err());
        assert_eq!(
            action.apply(&mut topology).unwrap_err(),
            GraphError::NotFound("connection")
        );
    }
}
