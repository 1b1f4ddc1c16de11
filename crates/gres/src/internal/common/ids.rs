use crate::define_id_type;

define_id_type!(JobId, u32);
define_id_type!(StepId, u32);

// Cluster-wide index of a node record
define_id_type!(NodeId, u32);

// Position of a node inside of a job's (or step's) node list.
// It is the rank of the node in the job's node bitmap.
define_id_type!(NodePosition, u32);

// Identifies a device resource type ("gpu", "gpu:a100", ...) registered in a `DeviceTypeMap`
define_id_type!(DeviceTypeId, u32);

// Index of a device instance within a single device type on a single node (e.g. GPU 1)
define_id_type!(DeviceIndex, u32);

define_id_type!(SocketId, u32);
