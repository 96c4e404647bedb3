//! Packet types and the process-wide type-id registry.
//!
//! The source dispatches packets through virtual `Serialize`/`Deserialize`/
//! `Validate` on a macro-registered factory per type. Here that becomes a
//! closed enum of known packet kinds (so the dispatcher can `match` on a
//! tag) plus a registry of decode functions so the transport layer never
//! needs to know the concrete set of packet types at compile time.

use atlas_core::{AtlasEntity, AtlasEntityId, AtlasEntityMinimal, NetworkIdentity, TransferId};
use std::collections::HashMap;
use uuid::Uuid;

use crate::codec::{ByteReader, ByteWriter, CodecError};
use crate::framing::PacketFrame;

/// Implemented by every concrete packet body.
pub trait PacketBody: Sized {
    const TYPE_ID: u32;

    fn write_body(&self, w: &mut ByteWriter);
    fn read_body(r: &mut ByteReader) -> Result<Self, CodecError>;

    /// Checked by the dispatcher before delivery; default accepts.
    fn validate(&self) -> bool {
        true
    }

    fn encode(&self) -> PacketFrame {
        let mut w = ByteWriter::new();
        self.write_body(&mut w);
        PacketFrame::new(Self::TYPE_ID, w.into_bytes())
    }
}

// =============================================================================
// EntityTransferPacket
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum TransferStageTag {
    Prepare = 0,
    Ready = 1,
    Commit = 2,
    Complete = 3,
}

impl TransferStageTag {
    fn from_u32(v: u32) -> Result<Self, CodecError> {
        match v {
            0 => Ok(Self::Prepare),
            1 => Ok(Self::Ready),
            2 => Ok(Self::Commit),
            3 => Ok(Self::Complete),
            other => Err(CodecError::UnknownStage(other)),
        }
    }
}

/// Per-stage payload. Prepare carries the candidate entity ids; Commit
/// carries full snapshots plus a generation counter; Ready/Complete carry
/// nothing.
#[derive(Clone, Debug, PartialEq)]
pub enum TransferStageData {
    Prepare(Vec<AtlasEntityId>),
    Ready,
    Commit(Vec<(AtlasEntity, u64)>),
    Complete,
}

impl TransferStageData {
    fn tag(&self) -> TransferStageTag {
        match self {
            TransferStageData::Prepare(_) => TransferStageTag::Prepare,
            TransferStageData::Ready => TransferStageTag::Ready,
            TransferStageData::Commit(_) => TransferStageTag::Commit,
            TransferStageData::Complete => TransferStageTag::Complete,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EntityTransferPacket {
    pub transfer_id: TransferId,
    pub data: TransferStageData,
}

impl PacketBody for EntityTransferPacket {
    const TYPE_ID: u32 = 1;

    fn write_body(&self, w: &mut ByteWriter) {
        w.write_uuid(self.transfer_id.0);
        w.write_u32(self.data.tag() as u32);
        match &self.data {
            TransferStageData::Prepare(ids) => {
                w.write_container(ids, |w, id| w.write_uuid(id.0));
            }
            TransferStageData::Ready => {}
            TransferStageData::Commit(snapshots) => {
                w.write_container(snapshots, |w, (entity, generation)| {
                    write_entity(w, entity);
                    w.write_u64(*generation);
                });
            }
            TransferStageData::Complete => {}
        }
    }

    fn read_body(r: &mut ByteReader) -> Result<Self, CodecError> {
        let transfer_id = TransferId(r.read_uuid()?);
        let stage = TransferStageTag::from_u32(r.read_u32()?)?;
        let data = match stage {
            TransferStageTag::Prepare => {
                let ids = r.read_container(|r| Ok(AtlasEntityId(r.read_uuid()?)))?;
                TransferStageData::Prepare(ids)
            }
            TransferStageTag::Ready => TransferStageData::Ready,
            TransferStageTag::Commit => {
                let snapshots = r.read_container(|r| {
                    let entity = read_entity(r)?;
                    let generation = r.read_u64()?;
                    Ok((entity, generation))
                })?;
                TransferStageData::Commit(snapshots)
            }
            TransferStageTag::Complete => TransferStageData::Complete,
        };
        Ok(Self { transfer_id, data })
    }
}

fn write_entity(w: &mut ByteWriter, e: &AtlasEntity) {
    w.write_uuid(e.entity_id.0);
    w.write_bool(e.is_client);
    w.write_uuid(e.client_id);
    w.write_u32(e.transform.world);
    w.write_vec3(e.transform.position);
    w.write_vec3(e.transform.bounding_box);
    w.write_blob(&e.metadata);
    w.write_u64(e.generation);
}

fn read_entity(r: &mut ByteReader) -> Result<AtlasEntity, CodecError> {
    let entity_id = AtlasEntityId(r.read_uuid()?);
    let is_client = r.read_bool()?;
    let client_id = r.read_uuid()?;
    let world = r.read_u32()?;
    let position = r.read_vec3()?;
    let bounding_box = r.read_vec3()?;
    let metadata = r.read_blob()?;
    let generation = r.read_u64()?;
    Ok(AtlasEntity {
        entity_id,
        is_client,
        client_id,
        transform: atlas_core::types::Transform {
            world,
            position,
            bounding_box,
        },
        metadata,
        generation,
    })
}

// =============================================================================
// LocalEntityListRequestPacket
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct LocalEntityListRequestPacket {
    pub request_id: Uuid,
    /// When true, reply carries full entities; otherwise the minimal
    /// projection.
    pub full: bool,
}

impl PacketBody for LocalEntityListRequestPacket {
    const TYPE_ID: u32 = 2;

    fn write_body(&self, w: &mut ByteWriter) {
        w.write_uuid(self.request_id);
        w.write_bool(self.full);
    }

    fn read_body(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self {
            request_id: r.read_uuid()?,
            full: r.read_bool()?,
        })
    }
}

// =============================================================================
// LocalEntityListReplyPacket
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
enum EntityListReplyTag {
    Full = 0,
    Minimal = 1,
}

/// Reply to a [`LocalEntityListRequestPacket`]: full entities or the
/// minimal projection, matching the flag the request carried.
#[derive(Clone, Debug, PartialEq)]
pub enum LocalEntityListReplyData {
    Full(Vec<AtlasEntity>),
    Minimal(Vec<AtlasEntityMinimal>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct LocalEntityListReplyPacket {
    pub request_id: Uuid,
    pub data: LocalEntityListReplyData,
}

fn write_entity_minimal(w: &mut ByteWriter, e: &AtlasEntityMinimal) {
    w.write_uuid(e.entity_id.0);
    w.write_bool(e.is_client);
    w.write_uuid(e.client_id);
    w.write_vec3(e.position);
}

fn read_entity_minimal(r: &mut ByteReader) -> Result<AtlasEntityMinimal, CodecError> {
    Ok(AtlasEntityMinimal {
        entity_id: AtlasEntityId(r.read_uuid()?),
        is_client: r.read_bool()?,
        client_id: r.read_uuid()?,
        position: r.read_vec3()?,
    })
}

impl PacketBody for LocalEntityListReplyPacket {
    const TYPE_ID: u32 = 6;

    fn write_body(&self, w: &mut ByteWriter) {
        w.write_uuid(self.request_id);
        match &self.data {
            LocalEntityListReplyData::Full(entities) => {
                w.write_u32(EntityListReplyTag::Full as u32);
                w.write_container(entities, |w, e| write_entity(w, e));
            }
            LocalEntityListReplyData::Minimal(entities) => {
                w.write_u32(EntityListReplyTag::Minimal as u32);
                w.write_container(entities, |w, e| write_entity_minimal(w, e));
            }
        }
    }

    fn read_body(r: &mut ByteReader) -> Result<Self, CodecError> {
        let request_id = r.read_uuid()?;
        let tag = r.read_u32()?;
        let data = match tag {
            0 => LocalEntityListReplyData::Full(r.read_container(read_entity)?),
            1 => LocalEntityListReplyData::Minimal(r.read_container(read_entity_minimal)?),
            other => return Err(CodecError::UnknownStage(other)),
        };
        Ok(Self { request_id, data })
    }
}

// =============================================================================
// HandoffPingPacket
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct HandoffPingPacket {
    pub sender: NetworkIdentity,
    pub sent_at_ms: u64,
}

impl PacketBody for HandoffPingPacket {
    const TYPE_ID: u32 = 3;

    fn write_body(&self, w: &mut ByteWriter) {
        w.write_str(&self.sender.to_string());
        w.write_u64(self.sent_at_ms);
    }

    fn read_body(r: &mut ByteReader) -> Result<Self, CodecError> {
        let sender: NetworkIdentity = r
            .read_str()?
            .parse()
            .map_err(|_| CodecError::UnknownPacketType(Self::TYPE_ID))?;
        Ok(Self {
            sender,
            sent_at_ms: r.read_u64()?,
        })
    }
}

// =============================================================================
// GenericEntityPacket (opaque per-entity simulation payload)
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct GenericEntityPacket {
    pub entity_id: AtlasEntityId,
    pub payload: Vec<u8>,
}

impl PacketBody for GenericEntityPacket {
    const TYPE_ID: u32 = 4;

    fn write_body(&self, w: &mut ByteWriter) {
        w.write_uuid(self.entity_id.0);
        w.write_blob(&self.payload);
    }

    fn read_body(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self {
            entity_id: AtlasEntityId(r.read_uuid()?),
            payload: r.read_blob()?,
        })
    }
}

// =============================================================================
// CommandPayloadPacket (routed via ServerCommandBus)
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct CommandPayloadPacket {
    pub client_id: Uuid,
    pub command: Vec<u8>,
}

impl PacketBody for CommandPayloadPacket {
    const TYPE_ID: u32 = 5;

    fn write_body(&self, w: &mut ByteWriter) {
        w.write_uuid(self.client_id);
        w.write_blob(&self.command);
    }

    fn read_body(r: &mut ByteReader) -> Result<Self, CodecError> {
        Ok(Self {
            client_id: r.read_uuid()?,
            command: r.read_blob()?,
        })
    }
}

// =============================================================================
// Closed enum + registry
// =============================================================================

/// Every packet kind known to this build. The registry below exists
/// alongside this closed set so transport code can dispatch on `type_id`
/// without matching on the enum directly (needed for plugin-style
/// extension packets that carry no compiled-in variant).
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    EntityTransfer(EntityTransferPacket),
    LocalEntityListRequest(LocalEntityListRequestPacket),
    LocalEntityListReply(LocalEntityListReplyPacket),
    HandoffPing(HandoffPingPacket),
    GenericEntity(GenericEntityPacket),
    CommandPayload(CommandPayloadPacket),
}

impl Packet {
    pub fn encode(&self) -> PacketFrame {
        match self {
            Packet::EntityTransfer(p) => p.encode(),
            Packet::LocalEntityListRequest(p) => p.encode(),
            Packet::LocalEntityListReply(p) => p.encode(),
            Packet::HandoffPing(p) => p.encode(),
            Packet::GenericEntity(p) => p.encode(),
            Packet::CommandPayload(p) => p.encode(),
        }
    }

    pub fn decode(frame: &PacketFrame) -> Result<Self, CodecError> {
        let mut r = ByteReader::new(&frame.body);
        match frame.type_id {
            EntityTransferPacket::TYPE_ID => {
                Ok(Packet::EntityTransfer(EntityTransferPacket::read_body(&mut r)?))
            }
            LocalEntityListRequestPacket::TYPE_ID => Ok(Packet::LocalEntityListRequest(
                LocalEntityListRequestPacket::read_body(&mut r)?,
            )),
            LocalEntityListReplyPacket::TYPE_ID => Ok(Packet::LocalEntityListReply(
                LocalEntityListReplyPacket::read_body(&mut r)?,
            )),
            HandoffPingPacket::TYPE_ID => Ok(Packet::HandoffPing(HandoffPingPacket::read_body(&mut r)?)),
            GenericEntityPacket::TYPE_ID => Ok(Packet::GenericEntity(GenericEntityPacket::read_body(&mut r)?)),
            CommandPayloadPacket::TYPE_ID => {
                Ok(Packet::CommandPayload(CommandPayloadPacket::read_body(&mut r)?))
            }
            other => Err(CodecError::UnknownPacketType(other)),
        }
    }

    /// The `Validate()` predicate checked before delivery.
    pub fn validate(&self) -> bool {
        match self {
            Packet::EntityTransfer(p) => p.validate(),
            Packet::LocalEntityListRequest(p) => p.validate(),
            Packet::LocalEntityListReply(p) => p.validate(),
            Packet::HandoffPing(p) => p.validate(),
            Packet::GenericEntity(p) => p.validate(),
            Packet::CommandPayload(p) => p.validate(),
        }
    }
}

/// A decode function for an extension packet type not in the compiled-in
/// [`Packet`] enum. Registered by plugins at process start.
pub type ExtensionDecoder = Box<dyn Fn(&PacketFrame) -> Result<Box<dyn std::any::Any + Send>, CodecError> + Send + Sync>;

/// Process-wide `type_id -> factory` table for extension packet types.
/// Core packet types never need to go through this; it exists so the
/// transport dispatcher can be extended without recompiling `atlas-net`.
#[derive(Default)]
pub struct PacketRegistry {
    extensions: HashMap<u32, ExtensionDecoder>,
}

impl PacketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_id: u32, decoder: ExtensionDecoder) {
        self.extensions.insert(type_id, decoder);
    }

    pub fn decode_extension(
        &self,
        frame: &PacketFrame,
    ) -> Option<Result<Box<dyn std::any::Any + Send>, CodecError>> {
        self.extensions.get(&frame.type_id).map(|f| f(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::identity::Role;
    use atlas_core::types::Transform;
    use glam::Vec3;

    #[test]
    fn entity_transfer_commit_roundtrip() {
        let entity = AtlasEntity {
            entity_id: AtlasEntityId::new(),
            is_client: false,
            client_id: Uuid::nil(),
            transform: Transform {
                world: 1,
                position: Vec3::new(1.0, 2.0, 3.0),
                bounding_box: Vec3::ONE,
            },
            metadata: vec![0xDE, 0xAD, 0xBE, 0xEF],
            generation: 0,
        };
        let packet = EntityTransferPacket {
            transfer_id: TransferId::new(),
            data: TransferStageData::Commit(vec![(entity.clone(), 42)]),
        };

        let frame = packet.encode();
        let decoded = Packet::decode(&frame).unwrap();
        match decoded {
            Packet::EntityTransfer(p) => {
                assert_eq!(p.transfer_id, packet.transfer_id);
                match p.data {
                    TransferStageData::Commit(snaps) => {
                        assert_eq!(snaps.len(), 1);
                        assert_eq!(snaps[0].0.metadata, entity.metadata);
                        assert_eq!(snaps[0].1, 42);
                    }
                    _ => panic!("wrong stage"),
                }
            }
            _ => panic!("wrong packet kind"),
        }
    }

    #[test]
    fn ping_packet_roundtrip() {
        let packet = HandoffPingPacket {
            sender: NetworkIdentity::generate(Role::Shard),
            sent_at_ms: 123456,
        };
        let frame = packet.encode();
        match Packet::decode(&frame).unwrap() {
            Packet::HandoffPing(p) => assert_eq!(p, packet),
            _ => panic!("wrong packet kind"),
        }
    }

    #[test]
    fn entity_list_reply_minimal_roundtrip() {
        let packet = LocalEntityListReplyPacket {
            request_id: Uuid::new_v4(),
            data: LocalEntityListReplyData::Minimal(vec![AtlasEntityMinimal {
                entity_id: AtlasEntityId::new(),
                is_client: true,
                client_id: Uuid::new_v4(),
                position: Vec3::new(1.0, 2.0, 3.0),
            }]),
        };
        let frame = packet.encode();
        match Packet::decode(&frame).unwrap() {
            Packet::LocalEntityListReply(p) => assert_eq!(p, packet),
            _ => panic!("wrong packet kind"),
        }
    }

    #[test]
    fn unknown_type_id_errors() {
        let frame = PacketFrame::new(9999, vec![]);
        assert!(matches!(Packet::decode(&frame), Err(CodecError::UnknownPacketType(9999))));
    }
}
