use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

use crate::internal::common::error::GresError;
use crate::internal::common::ids::DeviceTypeId;
use crate::internal::resources::amount::{DeviceCount, MemAmount, NumOfCpus};

/// How many units of a device type a job asks for
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum DeviceAmount {
    PerNode(DeviceCount),
    /// Count per socket touched by the job's cores on the node
    PerSocket(DeviceCount),
    PerTask(DeviceCount),
    /// Count for the whole job, spread over its nodes
    PerJob(DeviceCount),
    /// Every device of the type present on the node
    All,
}

impl DeviceAmount {
    pub fn validate(&self) -> crate::Result<()> {
        match self {
            DeviceAmount::PerNode(n)
            | DeviceAmount::PerSocket(n)
            | DeviceAmount::PerTask(n)
            | DeviceAmount::PerJob(n) => {
                if *n == 0 {
                    Err(GresError::GenericError(
                        "Zero devices cannot be requested".to_string(),
                    ))
                } else {
                    Ok(())
                }
            }
            DeviceAmount::All => Ok(()),
        }
    }
}

impl fmt::Display for DeviceAmount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeviceAmount::PerNode(n) => write!(f, "{n} per node"),
            DeviceAmount::PerSocket(n) => write!(f, "{n} per socket"),
            DeviceAmount::PerTask(n) => write!(f, "{n} per task"),
            DeviceAmount::PerJob(n) => write!(f, "{n} per job"),
            DeviceAmount::All => write!(f, "all"),
        }
    }
}

/// Whether socket affinity of devices is a preference or a hard constraint
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, Hash, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum AffinityPolicy {
    #[default]
    BestEffort,
    Enforced,
}

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq)]
pub struct DeviceRequest {
    pub type_id: DeviceTypeId,
    pub amount: DeviceAmount,
    #[serde(default)]
    pub cpus_per_device: Option<NumOfCpus>,
    #[serde(default)]
    pub mem_per_device: Option<MemAmount>,
    /// Overrides the configured default policy when set
    #[serde(default)]
    pub affinity: Option<AffinityPolicy>,
}

impl DeviceRequest {
    pub fn new(type_id: DeviceTypeId, amount: DeviceAmount) -> Self {
        DeviceRequest {
            type_id,
            amount,
            cpus_per_device: None,
            mem_per_device: None,
            affinity: None,
        }
    }
}

pub type DeviceRequestEntries = SmallVec<[DeviceRequest; 2]>;

/// Device part of a job's resource request
#[derive(Default, Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq)]
pub struct JobRequest {
    entries: DeviceRequestEntries,
    /// Used to resolve `DeviceAmount::PerTask`
    tasks_per_node: u32,
}

impl JobRequest {
    pub fn new(tasks_per_node: u32, mut entries: DeviceRequestEntries) -> Self {
        entries.sort_unstable_by_key(|e| e.type_id);
        JobRequest {
            entries,
            tasks_per_node,
        }
    }

    #[inline]
    pub fn entries(&self) -> &[DeviceRequest] {
        &self.entries
    }

    #[inline]
    pub fn tasks_per_node(&self) -> u32 {
        self.tasks_per_node
    }

    pub fn find(&self, type_id: DeviceTypeId) -> Option<&DeviceRequest> {
        self.entries.iter().find(|e| e.type_id == type_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds an entry for a type that is not requested yet, keeps the order by type id
    pub(crate) fn add_missing(&mut self, request: DeviceRequest) {
        if self.find(request.type_id).is_none() {
            self.entries.push(request);
            self.entries.sort_unstable_by_key(|e| e.type_id);
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        for entry in &self.entries {
            entry.amount.validate()?;
            if matches!(entry.amount, DeviceAmount::PerTask(_)) && self.tasks_per_node == 0 {
                return Err("Per task request needs a non-zero task count per node".into());
            }
            if entry.cpus_per_device == Some(0) {
                return Err("Zero cpus per device cannot be requested".into());
            }
        }
        for pair in self.entries.windows(2) {
            if pair[0].type_id >= pair[1].type_id {
                return Err("Request are not sorted or unique".into());
            }
        }
        Ok(())
    }
}

/// How many units of a device type a step asks for
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum StepAmount {
    /// Count for the whole step; the constraint spans all nodes of the step
    PerStep(DeviceCount),
    PerNode(DeviceCount),
    PerTask(DeviceCount),
}

impl StepAmount {
    pub fn count(&self) -> DeviceCount {
        match self {
            StepAmount::PerStep(n) | StepAmount::PerNode(n) | StepAmount::PerTask(n) => *n,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq)]
pub struct StepDeviceRequest {
    pub type_id: DeviceTypeId,
    pub amount: StepAmount,
    #[serde(default)]
    pub cpus_per_device: Option<NumOfCpus>,
    #[serde(default)]
    pub mem_per_device: Option<MemAmount>,
}

impl StepDeviceRequest {
    pub fn new(type_id: DeviceTypeId, amount: StepAmount) -> Self {
        StepDeviceRequest {
            type_id,
            amount,
            cpus_per_device: None,
            mem_per_device: None,
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct StepFlags: u32 {
        // Devices have to be affine to the step's cores on the node
        const EXCLUSIVE_BINDING         = 0b00000001;
        // Every task needs a device of its own
        const ONE_TASK_PER_DEVICE       = 0b00000010;
        // Tasks may share a device; this is also the behavior without any flag
        const MULTIPLE_TASKS_PER_DEVICE = 0b00000100;
    }
}

#[derive(Default, Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq)]
pub struct StepRequest {
    entries: SmallVec<[StepDeviceRequest; 2]>,
    flags: StepFlags,
}

impl StepRequest {
    pub fn new(flags: StepFlags, mut entries: SmallVec<[StepDeviceRequest; 2]>) -> Self {
        entries.sort_unstable_by_key(|e| e.type_id);
        StepRequest { entries, flags }
    }

    #[inline]
    pub fn entries(&self) -> &[StepDeviceRequest] {
        &self.entries
    }

    #[inline]
    pub fn flags(&self) -> StepFlags {
        self.flags
    }

    pub fn has_per_step_request(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e.amount, StepAmount::PerStep(_)))
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self
            .flags
            .contains(StepFlags::ONE_TASK_PER_DEVICE | StepFlags::MULTIPLE_TASKS_PER_DEVICE)
        {
            return Err("One task per device and multiple tasks per device are exclusive".into());
        }
        for entry in &self.entries {
            if entry.amount.count() == 0 {
                return Err("Zero devices cannot be requested".into());
            }
        }
        for pair in self.entries.windows(2) {
            if pair[0].type_id >= pair[1].type_id {
                return Err("Request are not sorted or unique".into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn test_job_request_validate() {
        let rq = JobRequest::new(
            1,
            smallvec![
                DeviceRequest::new(1.into(), DeviceAmount::PerNode(2)),
                DeviceRequest::new(0.into(), DeviceAmount::PerNode(1)),
            ],
        );
        assert!(rq.validate().is_ok());
        assert_eq!(rq.entries()[0].type_id, DeviceTypeId::new(0));

        let rq = JobRequest::new(
            1,
            smallvec![
                DeviceRequest::new(1.into(), DeviceAmount::PerNode(2)),
                DeviceRequest::new(1.into(), DeviceAmount::PerJob(4)),
            ],
        );
        assert!(rq.validate().is_err());

        let rq = JobRequest::new(
            0,
            smallvec![DeviceRequest::new(0.into(), DeviceAmount::PerTask(1))],
        );
        assert!(rq.validate().is_err());

        let rq = JobRequest::new(
            1,
            smallvec![DeviceRequest::new(0.into(), DeviceAmount::PerNode(0))],
        );
        assert!(rq.validate().is_err());
    }

    #[test]
    fn test_step_request_validate() {
        let rq = StepRequest::new(
            StepFlags::ONE_TASK_PER_DEVICE | StepFlags::MULTIPLE_TASKS_PER_DEVICE,
            smallvec![],
        );
        assert!(rq.validate().is_err());

        let rq = StepRequest::new(
            StepFlags::EXCLUSIVE_BINDING,
            smallvec![StepDeviceRequest::new(0.into(), StepAmount::PerStep(2))],
        );
        assert!(rq.validate().is_ok());
        assert!(rq.has_per_step_request());
    }
}
