#[macro_use]
pub mod internal;

pub use crate::internal::common::bitmap::{Bitmap, CoreBitmap, DeviceBitmap, NodeBitmap};
pub use crate::internal::common::index::IndexVec;
pub use crate::internal::common::utils::format_comma_delimited;
pub use crate::internal::common::{Map, Set};

pub use crate::internal::common::ids::{
    DeviceIndex, DeviceTypeId, JobId, NodeId, NodePosition, SocketId, StepId,
};

pub use crate::internal::common::error::{AllocError, AllocResult};
pub use crate::internal::common::lock::{ExclusiveAccess, ReadAccess, ResourceLock, SharedAccess};

pub type Error = internal::common::error::GresError;
pub type Result<T> = std::result::Result<T, Error>;

pub mod config {
    pub use crate::internal::config::{DeviceTypeConfig, GresConfig};
}

pub mod resources {
    pub use crate::internal::resources::{
        AffinityPolicy, DeviceAmount, DeviceBinding, DeviceCount, DeviceRequest,
        DeviceRequestEntries, DevicePool, DevicePoolLayout, DeviceTypeMap, DeviceTypeVec,
        FragmentEntry, JobClaim, JobRequest, MemAmount, NodeFragment, NodeInventory, NodeTopology,
        NumOfCpus, StepAmount, StepClaim, StepDeviceRequest, StepFlags, StepFragment,
        StepFragmentEntry, StepRequest, TresVec,
    };

    pub use crate::internal::resources::node::NodeTopologyBuilder;

    pub use crate::internal::resources::map::split_type_name;
}

pub mod plugin {
    pub use crate::internal::resources::descriptor::{
        ANY_NODE, DeviceDescriptorItem, DeviceFamily, DeviceGroup, DevicePlugin, GenericPlugin,
        GpuPlugin, NicPlugin, StaticLayout,
    };
    pub use crate::internal::resources::registry::DeviceRegistry;
}

pub mod alloc {
    pub use crate::internal::alloc::engine::{
        AllocationEngine, GrantedDevices, NodeGrant, select_whole_node,
    };

    pub use crate::internal::alloc::admission::{
        StepAllocArgs, StepCpuLimit, StepTestArgs, step_alloc, step_dealloc, step_test,
        step_test_per_step,
    };

    pub use crate::internal::alloc::rebase::{PerNodeClaim, state_rebase};
}

pub mod accounting {
    pub use crate::internal::alloc::accounting::{
        job_alloc_string, job_node_detail, job_node_tres, job_tres, node_config_string,
        node_used_string, step_alloc_string, step_tres, tres_string,
    };
}
