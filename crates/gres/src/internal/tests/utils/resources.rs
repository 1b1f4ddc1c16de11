use smallvec::{SmallVec, smallvec};

use crate::internal::common::bitmap::{Bitmap, CoreBitmap};
use crate::internal::common::ids::{DeviceTypeId, SocketId};
use crate::internal::resources::amount::{DeviceCount, MemAmount, NumOfCpus};
use crate::internal::resources::job::JobClaim;
use crate::internal::resources::node::{
    DevicePoolLayout, NodeInventory, NodeTopology, NodeTopologyBuilder,
};
use crate::internal::resources::request::{
    DeviceAmount, DeviceRequest, DeviceRequestEntries, JobRequest, StepAmount, StepDeviceRequest,
    StepFlags, StepRequest,
};
use crate::internal::resources::step::StepClaim;
use crate::internal::tests::utils::env::{GPU, MPS, NIC};

pub struct NodeBuilder {
    id: u32,
    sockets: u32,
    cores_per_socket: u32,
    memory: u64,
    layouts: Vec<DevicePoolLayout>,
}

impl NodeBuilder {
    pub fn new(id: u32) -> Self {
        NodeBuilder {
            id,
            sockets: 1,
            cores_per_socket: 8,
            memory: 0,
            layouts: Vec::new(),
        }
    }

    pub fn sockets(mut self, sockets: u32) -> Self {
        self.sockets = sockets;
        self
    }

    pub fn cores_per_socket(mut self, cores: u32) -> Self {
        self.cores_per_socket = cores;
        self
    }

    pub fn memory(mut self, mb: u64) -> Self {
        self.memory = mb;
        self
    }

    pub fn pool(
        mut self,
        type_id: DeviceTypeId,
        shared: bool,
        gpu_like: bool,
        capacity: Vec<DeviceCount>,
        affinity: Vec<SmallVec<[SocketId; 2]>>,
    ) -> Self {
        self.layouts.push(DevicePoolLayout {
            type_id,
            shared,
            gpu_like,
            capacity,
            affinity,
        });
        self
    }

    pub fn gpus(self, count: usize) -> Self {
        self.pool(GPU, false, true, vec![1; count], vec![smallvec![]; count])
    }

    /// `per_socket[s]` GPUs affine to socket `s`, numbered socket by socket
    pub fn gpus_on_sockets(self, per_socket: &[usize]) -> Self {
        let affinity: Vec<SmallVec<[SocketId; 2]>> = per_socket
            .iter()
            .enumerate()
            .flat_map(|(socket, count)| {
                std::iter::repeat_n(smallvec![SocketId::new(socket as u32)], *count)
            })
            .collect();
        self.pool(GPU, false, true, vec![1; affinity.len()], affinity)
    }

    pub fn nics(self, count: usize) -> Self {
        self.pool(NIC, false, false, vec![1; count], vec![smallvec![]; count])
    }

    pub fn mps(self, devices: usize, shares: DeviceCount) -> Self {
        self.pool(
            MPS,
            true,
            true,
            vec![shares; devices],
            vec![smallvec![]; devices],
        )
    }

    pub fn topology(&self) -> NodeTopology {
        NodeTopologyBuilder::default()
            .name(format!("n{}", self.id))
            .sockets(self.sockets)
            .cores_per_socket(self.cores_per_socket)
            .real_memory(MemAmount::from_mb(self.memory))
            .build()
            .unwrap()
    }

    pub fn build(self) -> NodeInventory {
        let mut node = NodeInventory::new(self.id.into(), self.topology());
        node.apply_layout(self.layouts).unwrap();
        node
    }
}

pub fn n_cpus(node: &NodeInventory) -> NumOfCpus {
    node.topology().n_cpus()
}

/// Cores of the given socket
pub fn socket_cores(node: &NodeInventory, socket: u32) -> CoreBitmap {
    let topology = node.topology();
    let per_socket = topology.cores_per_socket;
    Bitmap::from_range(
        topology.n_cores(),
        socket * per_socket,
        (socket + 1) * per_socket,
    )
}

pub struct JobBuilder {
    id: u32,
    n_nodes: u32,
    tasks_per_node: u32,
    entries: DeviceRequestEntries,
}

impl JobBuilder {
    pub fn new(id: u32) -> Self {
        JobBuilder {
            id,
            n_nodes: 1,
            tasks_per_node: 1,
            entries: SmallVec::new(),
        }
    }

    pub fn n_nodes(mut self, n_nodes: u32) -> Self {
        self.n_nodes = n_nodes;
        self
    }

    pub fn tasks_per_node(mut self, tasks: u32) -> Self {
        self.tasks_per_node = tasks;
        self
    }

    pub fn add(self, type_id: DeviceTypeId, amount: DeviceAmount) -> Self {
        self.add_request(DeviceRequest::new(type_id, amount))
    }

    pub fn add_request(mut self, request: DeviceRequest) -> Self {
        self.entries.push(request);
        self
    }

    pub fn request(&self) -> JobRequest {
        JobRequest::new(self.tasks_per_node, self.entries.clone())
    }

    pub fn build(self) -> JobClaim {
        let request = self.request();
        request.validate().unwrap();
        JobClaim::new(self.id.into(), request, self.n_nodes)
    }
}

pub struct StepBuilder {
    job_id: u32,
    step_id: u32,
    job_nodes: u32,
    flags: StepFlags,
    entries: SmallVec<[StepDeviceRequest; 2]>,
}

impl StepBuilder {
    pub fn new(job: &JobClaim, step_id: u32) -> Self {
        StepBuilder {
            job_id: job.job_id().as_num(),
            step_id,
            job_nodes: job.node_count(),
            flags: StepFlags::empty(),
            entries: SmallVec::new(),
        }
    }

    pub fn flags(mut self, flags: StepFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn add(self, type_id: DeviceTypeId, amount: StepAmount) -> Self {
        self.add_request(StepDeviceRequest::new(type_id, amount))
    }

    pub fn add_request(mut self, request: StepDeviceRequest) -> Self {
        self.entries.push(request);
        self
    }

    pub fn build(self) -> StepClaim {
        let request = StepRequest::new(self.flags, self.entries);
        request.validate().unwrap();
        StepClaim::new(
            self.job_id.into(),
            self.step_id.into(),
            request,
            self.job_nodes,
        )
    }
}
