//! S5 / P3: `EntityTransferPacket` Commit stage round-trips through the
//! wire codec byte-exact, including opaque metadata.

use atlas_core::types::Transform;
use atlas_core::{AtlasEntity, TransferId};
use atlas_net::packet::{EntityTransferPacket, Packet, TransferStageData};
use glam::Vec3;

#[test]
fn commit_packet_round_trips_with_metadata_byte_exact() {
    let mut entity = AtlasEntity::new(
        Transform {
            world: 3,
            position: Vec3::new(1.0, 2.0, 3.0),
            bounding_box: Vec3::new(0.5, 0.5, 0.5),
        },
        vec![0xDE, 0xAD, 0xBE, 0xEF],
    );
    entity.generation = 42;

    let original = Packet::EntityTransfer(EntityTransferPacket {
        transfer_id: TransferId::new(),
        data: TransferStageData::Commit(vec![(entity.clone(), 42)]),
    });

    let frame = original.encode();
    let decoded = Packet::decode(&frame).expect("commit packet must decode");

    assert_eq!(decoded, original);
    if let Packet::EntityTransfer(p) = decoded {
        if let TransferStageData::Commit(snapshots) = p.data {
            assert_eq!(snapshots.len(), 1);
            assert_eq!(snapshots[0].0.metadata, vec![0xDE, 0xAD, 0xBE, 0xEF]);
            assert_eq!(snapshots[0].1, 42);
        } else {
            panic!("expected Commit stage data");
        }
    } else {
        panic!("expected EntityTransfer packet");
    }
}

#[test]
fn network_identity_and_connection_telemetry_round_trip() {
    use atlas_core::identity::Role;
    use atlas_core::NetworkIdentity;
    use atlas_net::{ConnectionState, ConnectionTelemetry};

    let identity = NetworkIdentity::generate(Role::Shard);
    let blob = postcard::to_allocvec(&identity).unwrap();
    let decoded: NetworkIdentity = postcard::from_bytes(&blob).unwrap();
    assert_eq!(decoded, identity);

    let telemetry = ConnectionTelemetry {
        peer: identity,
        state: ConnectionState::Connected,
        ping_ms: 12.5,
        bytes_sent: 100,
        bytes_received: 200,
        packets_sent: 3,
        packets_received: 4,
        pending_unacked: 0,
    };
    let blob = postcard::to_allocvec(&vec![telemetry.clone()]).unwrap();
    let decoded: Vec<ConnectionTelemetry> = postcard::from_bytes(&blob).unwrap();
    assert_eq!(decoded[0].peer, telemetry.peer);
    assert_eq!(decoded[0].ping_ms, telemetry.ping_ms);
}
