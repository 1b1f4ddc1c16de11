pub mod amount;
pub mod descriptor;
pub mod job;
pub mod map;
pub mod node;
pub mod registry;
pub mod request;
pub mod step;

pub use amount::{DeviceCount, MemAmount, NumOfCpus};
pub use descriptor::{DeviceDescriptorItem, DeviceFamily, DeviceGroup, DevicePlugin};
pub use job::{DeviceBinding, FragmentEntry, JobClaim, NodeFragment};
pub use map::{DeviceTypeMap, DeviceTypeVec};
pub use node::{DevicePool, DevicePoolLayout, NodeInventory, NodeTopology};
pub use request::{
    AffinityPolicy, DeviceAmount, DeviceRequest, DeviceRequestEntries, JobRequest, StepAmount,
    StepDeviceRequest, StepFlags, StepRequest,
};
pub use step::{StepClaim, StepFragment, StepFragmentEntry};

// Units of every registered device type, indexed by type id
pub type TresVec = DeviceTypeVec<DeviceCount>;
