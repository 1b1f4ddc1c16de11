use smallvec::smallvec;

use gres::resources::{
    DeviceAmount, DeviceRequest, DevicePoolLayout, JobClaim, JobRequest, NodeInventory,
    NodeTopologyBuilder,
};
use gres::{DeviceTypeId, SocketId};

pub const GPU: DeviceTypeId = DeviceTypeId::new(0);

/// A dense GPU node with devices spread evenly over its sockets
pub fn create_node(sockets: u32, gpus: u32) -> NodeInventory {
    let topology = NodeTopologyBuilder::default()
        .name("bench")
        .sockets(sockets)
        .cores_per_socket(32)
        .build()
        .unwrap();
    let per_socket = gpus / sockets;
    let mut node = NodeInventory::new(0.into(), topology);
    node.apply_layout(vec![DevicePoolLayout {
        type_id: GPU,
        shared: false,
        gpu_like: true,
        capacity: vec![1; gpus as usize],
        affinity: (0..gpus)
            .map(|gpu| smallvec![SocketId::new(gpu / per_socket.max(1))])
            .collect(),
    }])
    .unwrap();
    node
}

pub fn create_job(id: u32, gpus: u64) -> JobClaim {
    let request = JobRequest::new(
        1,
        smallvec![DeviceRequest::new(GPU, DeviceAmount::PerNode(gpus))],
    );
    JobClaim::new(id.into(), request, 1)
}
